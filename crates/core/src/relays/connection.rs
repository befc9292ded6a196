//! Transient relay connections
//!
//! A publish owns its sockets: they are opened per attempt and dropped when the
//! attempt ends. [`RelayConnector`] is the seam between the publisher and the
//! network so attempts can run against in-memory relays.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::relays::types::RelayError;

/// An open text-frame connection to one relay.
#[async_trait]
pub trait RelaySocket: Send {
    async fn send(&mut self, text: String) -> Result<(), RelayError>;

    /// Next text frame. `None` once the relay has closed the connection.
    async fn recv(&mut self) -> Option<Result<String, RelayError>>;

    async fn close(&mut self);
}

#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelaySocket>, RelayError>;
}

/// WebSocket connector over tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl RelayConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelaySocket>, RelayError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| RelayError::ConnectionError(e.to_string()))?;
        debug!(relay = %url, status = %response.status(), "websocket open");
        Ok(Box::new(WsSocket { stream }))
    }
}

struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RelaySocket for WsSocket {
    async fn send(&mut self, text: String) -> Result<(), RelayError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| RelayError::WebSocketError(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, RelayError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(String::from_utf8(bytes).map_err(|_| RelayError::InvalidMessage))
                }
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(RelayError::WebSocketError(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("websocket close failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_ws_connector_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    ws.send(Message::Text(format!("echo:{}", text))).await.unwrap();
                    ws.close(None).await.unwrap();
                    break;
                }
            }
        });

        let mut socket = WsConnector.connect(&format!("ws://{}", addr)).await.unwrap();
        socket.send("hello".to_string()).await.unwrap();
        assert_eq!(socket.recv().await.unwrap().unwrap(), "echo:hello");
        assert!(socket.recv().await.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_ws_connector_refused() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let result = WsConnector.connect(&format!("ws://127.0.0.1:{}", port)).await;
        assert!(matches!(result, Err(RelayError::ConnectionError(_))));
    }
}
