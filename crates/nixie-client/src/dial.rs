//! Websocket dialing seam
//!
//! Kept as a capability so tests can substitute failing or instrumented
//! connects for the real dialer.

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Connection type produced by a dialer
pub type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Establishes websocket connections to the coordinator
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dial `url` and complete the websocket upgrade.
    async fn dial(&self, url: &str) -> Result<WsConnection, WsError>;
}

/// Production dialer
#[derive(Debug, Clone, Default)]
pub struct DefaultDialer;

#[async_trait]
impl Dialer for DefaultDialer {
    async fn dial(&self, url: &str) -> Result<WsConnection, WsError> {
        let (connection, _response) = connect_async(url).await?;
        Ok(connection)
    }
}
