//! Per-connection engine: the state machine that owns one IRC client socket
//! and its corresponding cluster session.
//!
//! `Opening` creates the session and greets the client; `Running` multiplexes
//! IRC lines from the client, payloads from the stream reader, and an idle
//! PING/timeout clock; `Draining` waits for the session to be torn down
//! cleanly after a client `QUIT`; `Closed` is terminal.

use crate::irc::IRCMessage;
use crate::registry::ServerRegistry;
use crate::router::Router;
use crate::session_client;
use crate::stream_reader;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// How long the engine waits for a client `PONG` after sending a `PING`
/// before giving up on the connection.
const PING_TIMEOUT: Duration = Duration::from_secs(60);

enum State {
    Running,
    Draining { quit_message: String },
}

/// Runs one client connection to completion. Never returns early on
/// recoverable errors — only on socket closure, explicit `QUIT`, or a
/// session that cannot be created at all.
pub async fn run(socket: TcpStream, router: Arc<Router>, registry: Arc<ServerRegistry>) {
    let peer = socket
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_owned());

    let session = match session_client::create_session(&router).await {
        Ok(session) => session,
        Err(e) => {
            warn!(peer = %peer, error = %e, "failed to create cluster session");
            let mut socket = socket;
            let _ = socket
                .write_all(
                    IRCMessage::error("Unable to create a session with the server")
                        .to_line()
                        .as_bytes(),
                )
                .await;
            return;
        }
    };

    info!(peer = %peer, session_id = %session.session_id, "session opened");

    let (reader_half, mut writer_half) = socket.into_split();
    let mut lines = BufReader::new(reader_half).lines();

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<String>(64);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let stream_task = stream_reader::spawn(
        router.clone(),
        registry.clone(),
        session.session_id.clone(),
        inbound_tx,
        cancel_rx,
    );

    let mut state = State::Running;
    let mut ping_pending: Option<String> = None;

    'connection: loop {
        let idle = tokio::time::sleep(PING_TIMEOUT);
        tokio::pin!(idle);

        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(raw)) => {
                        let Some(message) = IRCMessage::parse(&raw) else {
                            debug!(peer = %peer, line = %raw, "ignoring unparsable IRC line");
                            continue;
                        };
                        let outcome = handle_client_message(
                            message,
                            &router,
                            &session.session_id,
                            &session.prefix,
                            &mut ping_pending,
                        )
                        .await;
                        if let Some(reply) = outcome.reply {
                            if writer_half.write_all(reply.as_bytes()).await.is_err() {
                                state = State::Draining { quit_message: "Write error".to_owned() };
                                break 'connection;
                            }
                        }
                        if let Some(reason) = outcome.quit {
                            state = State::Draining { quit_message: reason };
                            break 'connection;
                        }
                    }
                    Ok(None) => {
                        info!(peer = %peer, "client closed connection");
                        state = State::Draining { quit_message: "Connection closed".to_owned() };
                        break 'connection;
                    }
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "error reading from client");
                        state = State::Draining { quit_message: "Read error".to_owned() };
                        break 'connection;
                    }
                }
            }

            payload = inbound_rx.recv() => {
                match payload {
                    Some(data) => {
                        if let Err(e) = writer_half.write_all(data.as_bytes()).await {
                            warn!(peer = %peer, error = %e, "error writing to client");
                            state = State::Draining { quit_message: "Write error".to_owned() };
                            break 'connection;
                        }
                    }
                    None => {
                        info!(peer = %peer, "stream reader ended, closing connection");
                        state = State::Draining { quit_message: "Server connection lost".to_owned() };
                        break 'connection;
                    }
                }
            }

            () = &mut idle => {
                if let Some(token) = ping_pending.take() {
                    warn!(peer = %peer, token = %token, "client ping timeout");
                    state = State::Draining { quit_message: "Ping timeout".to_owned() };
                    break 'connection;
                }
                let token = session.session_id.clone();
                let ping = IRCMessage::ping(&session.prefix, &token);
                if writer_half.write_all(ping.to_line().as_bytes()).await.is_err() {
                    state = State::Draining { quit_message: "Write error".to_owned() };
                    break 'connection;
                }
                ping_pending = Some(token);
            }
        }
    }

    let State::Draining { quit_message } = state else {
        unreachable!("loop only exits via break into Draining")
    };

    let _ = cancel_tx.send(true);
    let _ = stream_task.await;

    // The reader closes its channel only after acknowledging cancellation, but
    // it may have already queued payloads before that point; flush them to
    // the client so a late-arriving line isn't silently dropped (spec:
    // Draining -> Closed only after the channel is "fully drained").
    while let Ok(data) = inbound_rx.try_recv() {
        if writer_half.write_all(data.as_bytes()).await.is_err() {
            break;
        }
    }

    if let Err(e) =
        session_client::delete_session(&router, &session.session_id, &quit_message).await
    {
        warn!(peer = %peer, session_id = %session.session_id, error = %e, "failed to delete session cleanly");
    }

    info!(peer = %peer, session_id = %session.session_id, "session closed");
}

/// Outcome of dispatching one client-originated IRC message.
#[derive(Default)]
struct Outcome {
    /// A line to write back to the client immediately (e.g. a `PONG` reply).
    reply: Option<String>,
    /// Set when the message was a `QUIT`, carrying the quit reason.
    quit: Option<String>,
}

async fn handle_client_message(
    message: IRCMessage,
    router: &Router,
    session_id: &str,
    server_prefix: &str,
    ping_pending: &mut Option<String>,
) -> Outcome {
    match message.command.to_ascii_uppercase().as_str() {
        "PONG" => {
            ping_pending.take();
            Outcome::default()
        }
        "PING" => {
            let reply = IRCMessage::pong_reply(
                server_prefix,
                message.params.clone(),
                message.trailing.clone(),
            );
            Outcome { reply: Some(reply.to_line()), quit: None }
        }
        "QUIT" => {
            let reason = message.trailing.unwrap_or_else(|| "Client Quit".to_owned());
            Outcome { reply: None, quit: Some(reason) }
        }
        _ => {
            let line = message.to_line();
            if let Err(e) = session_client::post_message(router, session_id, line.into_bytes()).await
            {
                warn!(session_id = %session_id, error = %e, "failed to post message to cluster");
            }
            Outcome::default()
        }
    }
}
