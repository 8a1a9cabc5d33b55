//! Per-connection sessions
//!
//! A writable session is a handshake (join + initial snapshot) followed by
//! two pumps sharing one cancellation lifetime: the inbound pump delivers
//! validated notify commands to the coordinator, the outbound pump long-polls
//! the watch API and writes each new snapshot to the peer. Either pump
//! cancels the other on exit.
//!
//! Close semantics: a normal close frame (or session cancellation) means the
//! worker left intentionally and triggers `leave`; any other exit path
//! triggers `disconnect`, starting the expiry countdown so a quickly
//! reconnecting worker resumes its partitions.

use crate::handler::CoordinatorHandler;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use nixie_coordinator::{Coordinator, GroupVersion, WatchRequest};
use nixie_core::constants::WATCH_CHANNEL_CAPACITY;
use nixie_proto::{validate_join_command, validate_notify_command, validate_watch_request};
use nixie_proto::{ServerCommand, ServerWatchRequest};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the handshake learned about this connection
struct SessionData {
    group_name: String,
    node_name: String,
    partition_count: u32,
    init_version: GroupVersion,
}

enum FrameRead {
    Text(String),
    GracefulClose,
    Failed,
}

/// Drive a writable worker connection to completion.
pub(crate) async fn run_session(handler: Arc<CoordinatorHandler>, mut socket: WebSocket) {
    let Some(session) = handshake(&handler, &mut socket).await else {
        return;
    };
    debug!(
        group = %session.group_name,
        node = %session.node_name,
        "session established"
    );

    let token = handler.root.child_token();
    let (mut sink, mut stream) = socket.split();

    let inbound = receive_notify(&handler.coordinator, &token, &session, &mut stream);
    let outbound = send_state_update(
        &handler.coordinator,
        &handler.root,
        &token,
        &session.group_name,
        session.init_version + 1,
        &mut sink,
    );
    tokio::join!(inbound, outbound);

    debug!(
        group = %session.group_name,
        node = %session.node_name,
        "session closed"
    );
}

/// Drive a read-only observer connection to completion.
pub(crate) async fn run_readonly_session(handler: Arc<CoordinatorHandler>, mut socket: WebSocket) {
    let FrameRead::Text(text) = read_frame(&mut socket).await else {
        return;
    };
    let request: ServerWatchRequest = match serde_json::from_str(&text) {
        Ok(request) => request,
        Err(error) => {
            warn!(%error, "malformed watch request");
            return;
        }
    };
    if let Err(error) = validate_watch_request(&request, &handler.config.group_secrets) {
        warn!(%error, "watch request rejected");
        return;
    }

    let token = handler.root.child_token();
    send_state_update(
        &handler.coordinator,
        &handler.root,
        &token,
        &request.group_name,
        0,
        &mut socket,
    )
    .await;
}

/// Read the join command, apply it, and send the initial snapshot.
async fn handshake(
    handler: &CoordinatorHandler,
    socket: &mut WebSocket,
) -> Option<SessionData> {
    let FrameRead::Text(text) = read_frame(socket).await else {
        return None;
    };
    let cmd: ServerCommand = match serde_json::from_str(&text) {
        Ok(cmd) => cmd,
        Err(error) => {
            warn!(%error, "malformed join frame");
            return None;
        }
    };
    let join = match validate_join_command(&cmd, &handler.config.group_secrets) {
        Ok(join) => join.clone(),
        Err(error) => {
            warn!(%error, "join command rejected");
            return None;
        }
    };

    if let Err(error) = handler
        .coordinator
        .join(
            &join.group_name,
            &join.node_name,
            join.partition_count,
            join.prev_state,
        )
        .await
    {
        warn!(group = %join.group_name, node = %join.node_name, %error, "join refused");
        return None;
    }

    let (sender, mut receiver) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
    handler
        .coordinator
        .watch(
            &join.group_name,
            WatchRequest {
                from_version: 0,
                sender,
            },
        )
        .await;
    let snapshot = receiver.recv().await?;

    if let Err(error) = write_snapshot(socket, &snapshot).await {
        warn!(group = %join.group_name, error, "initial snapshot write failed");
        // The node already joined; let the expiry path clean it up as with
        // any other transport failure.
        handler
            .coordinator
            .disconnect(&join.group_name, &join.node_name)
            .await;
        return None;
    }

    Some(SessionData {
        group_name: join.group_name,
        node_name: join.node_name,
        partition_count: join.partition_count,
        init_version: snapshot.version,
    })
}

/// Inbound pump: validated notify commands into the coordinator.
async fn receive_notify(
    coordinator: &Coordinator,
    token: &CancellationToken,
    session: &SessionData,
    stream: &mut SplitStream<WebSocket>,
) {
    let mut graceful = false;
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                coordinator
                    .leave(&session.group_name, &session.node_name)
                    .await;
                graceful = true;
                break;
            }
            frame = read_frame(stream) => match frame {
                FrameRead::Text(text) => {
                    let cmd: ServerCommand = match serde_json::from_str(&text) {
                        Ok(cmd) => cmd,
                        Err(error) => {
                            warn!(node = %session.node_name, %error, "malformed notify frame");
                            break;
                        }
                    };
                    let entries = match validate_notify_command(&cmd, session.partition_count) {
                        Ok(entries) => entries,
                        Err(error) => {
                            warn!(node = %session.node_name, %error, "notify command rejected");
                            break;
                        }
                    };
                    coordinator
                        .notify(&session.group_name, &session.node_name, entries)
                        .await;
                }
                FrameRead::GracefulClose => {
                    coordinator
                        .leave(&session.group_name, &session.node_name)
                        .await;
                    graceful = true;
                    break;
                }
                FrameRead::Failed => break,
            }
        }
    }

    if !graceful {
        coordinator
            .disconnect(&session.group_name, &session.node_name)
            .await;
    }
    token.cancel();
}

/// Outbound pump: long-poll the watch API and stream snapshots to the peer.
///
/// Also used by read-only sessions, which start from version 0 and write on
/// the unsplit socket.
async fn send_state_update<S>(
    coordinator: &Coordinator,
    root: &CancellationToken,
    token: &CancellationToken,
    group_name: &str,
    start_version: GroupVersion,
    sink: &mut S,
) where
    S: Sink<Message> + Unpin,
{
    let (sender, mut receiver) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
    let mut from_version = start_version;

    loop {
        coordinator
            .watch(
                group_name,
                WatchRequest {
                    from_version,
                    sender: sender.clone(),
                },
            )
            .await;

        tokio::select! {
            delivered = receiver.recv() => {
                // We hold the sender, so the channel cannot be closed.
                let Some(snapshot) = delivered else {
                    break;
                };
                if let Err(error) = write_snapshot(sink, &snapshot).await {
                    if !token.is_cancelled() {
                        warn!(group = %group_name, error, "snapshot write failed");
                    }
                    break;
                }
                from_version = snapshot.version + 1;
            }
            _ = token.cancelled() => {
                coordinator.remove_watch(group_name, &sender).await;
                break;
            }
        }
    }

    if root.is_cancelled() {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "".into(),
            })))
            .await;
    }
    token.cancel();
}

async fn write_snapshot<S>(
    sink: &mut S,
    snapshot: &nixie_coordinator::GroupData,
) -> Result<(), &'static str>
where
    S: Sink<Message> + Unpin,
{
    let payload = serde_json::to_string(snapshot).map_err(|_| "snapshot encoding failed")?;
    sink.send(Message::Text(payload))
        .await
        .map_err(|_| "peer write failed")
}

/// Read frames until a text frame, a close, or a failure.
///
/// Ping and pong frames are answered by the transport layer and skipped. A
/// close frame counts as graceful only with the normal-closure code; binary
/// frames, read errors, and a vanished peer all take the failure path.
async fn read_frame<S>(stream: &mut S) -> FrameRead
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return FrameRead::Text(text),
            Some(Ok(Message::Close(frame))) => {
                let normal = frame.map_or(false, |f| f.code == close_code::NORMAL);
                return if normal {
                    FrameRead::GracefulClose
                } else {
                    FrameRead::Failed
                };
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Binary(_))) => {
                debug!("unexpected binary frame");
                return FrameRead::Failed;
            }
            Some(Err(error)) => {
                debug!(%error, "frame read failed");
                return FrameRead::Failed;
            }
            None => return FrameRead::Failed,
        }
    }
}
