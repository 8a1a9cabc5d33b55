//! Worker-side connection loop
//!
//! Dial, join, pump snapshots into listeners and acknowledgements back to
//! the server, and reconnect with the last snapshot replayed as previous
//! state whenever the connection drops unexpectedly. A graceful close resets
//! that baseline: the next connection starts fresh.

use crate::config::ClientOptions;
use crate::dial::WsConnection;
use crate::diff::{effective_owner, nodes_changed, notify_list};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use nixie_coordinator::{GroupData, NotifyPartitionData};
use nixie_proto::{ServerCommand, ServerJoinCommand};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type WsSink = SplitSink<WsConnection, Message>;
type WsStream = SplitStream<WsConnection>;

/// Worker-side runtime for one group membership
pub struct CoordinatorClient {
    url: String,
    group_name: String,
    node_name: String,
    partition_count: u32,
    options: ClientOptions,
    shutdown: CancellationToken,
    prev_state: Option<GroupData>,
}

impl CoordinatorClient {
    /// Create a client for the writable endpoint at `url` (including the
    /// path, e.g. `ws://coordinator:8765/core`).
    pub fn new(
        url: impl Into<String>,
        group_name: impl Into<String>,
        node_name: impl Into<String>,
        partition_count: u32,
        options: ClientOptions,
    ) -> Self {
        Self {
            url: url.into(),
            group_name: group_name.into(),
            node_name: node_name.into(),
            partition_count,
            options,
            shutdown: CancellationToken::new(),
            prev_state: None,
        }
    }

    /// Token cancelling the run loop; clone it before calling [`run`].
    ///
    /// [`run`]: CoordinatorClient::run
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until shutdown, reconnecting after every disconnect.
    pub async fn run(mut self) {
        loop {
            let graceful = self.run_connection().await;
            if graceful {
                // An intentional close; do not replay state on reconnect.
                self.prev_state = None;
            }
            if self.shutdown.is_cancelled() {
                return;
            }

            let retry_ms = self.options.retry_duration.as_millis() as u64;
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = self.options.time.sleep_ms(retry_ms) => {}
            }
        }
    }

    /// One connection cycle. Returns true when the server closed gracefully.
    async fn run_connection(&mut self) -> bool {
        let connection = tokio::select! {
            _ = self.shutdown.cancelled() => return false,
            dialed = self.options.dialer.dial(self.url.as_str()) => match dialed {
                Ok(connection) => connection,
                Err(error) => {
                    warn!(url = %self.url, %error, "dial failed");
                    return false;
                }
            }
        };
        debug!(group = %self.group_name, node = %self.node_name, "connected");

        let (mut sink, mut stream) = connection.split();

        let join = ServerCommand::join(ServerJoinCommand {
            group_name: self.group_name.clone(),
            node_name: self.node_name.clone(),
            partition_count: self.partition_count,
            secret: self.options.secret.clone(),
            prev_state: self.prev_state.clone(),
        });
        let payload = match serde_json::to_string(&join) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "join command encoding failed");
                return false;
            }
        };
        if let Err(error) = sink.send(Message::Text(payload)).await {
            warn!(%error, "join write failed");
            return false;
        }

        // Fresh diff baseline: the first snapshot of a connection always
        // fires the listeners.
        self.prev_state = None;

        let connection_token = self.shutdown.child_token();
        let (ack_sender, ack_receiver) = mpsc::channel::<Vec<NotifyPartitionData>>(1);

        let shutdown = self.shutdown.clone();
        let outbound = notify_pump(
            connection_token.clone(),
            shutdown,
            &mut sink,
            ack_receiver,
        );
        let inbound = self.handle_snapshots(connection_token, &mut stream, ack_sender);

        let (_, graceful) = tokio::join!(outbound, inbound);
        graceful
    }

    /// Inbound half: apply each snapshot and queue acknowledgements.
    async fn handle_snapshots(
        &mut self,
        token: CancellationToken,
        stream: &mut WsStream,
        acknowledgements: mpsc::Sender<Vec<NotifyPartitionData>>,
    ) -> bool {
        let mut graceful = false;
        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => break,
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    let data: GroupData = match serde_json::from_str(&text) {
                        Ok(data) => data,
                        Err(error) => {
                            warn!(%error, "malformed snapshot frame");
                            break;
                        }
                    };
                    self.apply_snapshot(data, &token, &acknowledgements).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    graceful = frame.map_or(false, |f| f.code == CloseCode::Normal);
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(error)) => {
                    if !token.is_cancelled() {
                        warn!(%error, "snapshot read failed");
                    }
                    break;
                }
                None => break,
            }
        }
        token.cancel();
        graceful
    }

    async fn apply_snapshot(
        &mut self,
        data: GroupData,
        token: &CancellationToken,
        acknowledgements: &mpsc::Sender<Vec<NotifyPartitionData>>,
    ) {
        let previous = self.prev_state.as_ref();

        let previous_nodes = previous.map_or(&[] as &[String], |s| s.nodes.as_slice());
        if nodes_changed(previous_nodes, &data.nodes) {
            (self.options.node_listener)(&data.nodes);
        }

        for (index, partition) in data.partitions.iter().enumerate() {
            let previous_owner = previous
                .and_then(|s| s.partitions.get(index))
                .map_or("", effective_owner);
            let owner = effective_owner(partition);
            if previous_owner != owner {
                (self.options.partition_listener)(index as u32, owner);
            }
        }

        let acks = notify_list(&self.node_name, previous, &data);
        if !acks.is_empty() {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = acknowledgements.send(acks) => {}
            }
        }

        self.prev_state = Some(data);
    }
}

/// Outbound half: acknowledgement commands to the server, and a graceful
/// close frame when the client is shutting down.
async fn notify_pump(
    token: CancellationToken,
    shutdown: CancellationToken,
    sink: &mut WsSink,
    mut acknowledgements: mpsc::Receiver<Vec<NotifyPartitionData>>,
) {
    loop {
        let entries = tokio::select! {
            _ = token.cancelled() => break,
            entries = acknowledgements.recv() => entries,
        };
        let Some(entries) = entries else {
            break;
        };

        let command = ServerCommand::notify(entries);
        let payload = match serde_json::to_string(&command) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "notify command encoding failed");
                break;
            }
        };
        if let Err(error) = sink.send(Message::Text(payload)).await {
            if !token.is_cancelled() {
                warn!(%error, "notify write failed");
            }
            break;
        }
    }

    if shutdown.is_cancelled() {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })))
            .await;
    }
    token.cancel();
}
