//! WebSocket transport to the remote display
//!
//! One binary message per frame, nothing else on the wire. A refused
//! connection and a connection that drops mid-stream are distinct
//! conditions; the session controller reacts to each differently.

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::info;

/// Headroom on top of the raw frame size for websocket framing.
pub const MESSAGE_MARGIN: usize = 1024;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("connection refused")]
    Refused(#[source] std::io::Error),
    #[error("connection closed")]
    Closed(#[source] WsError),
    #[error("connection failed")]
    Handshake(#[source] WsError),
}

/// Where frames go. This is the seam that lets the pacer run against a
/// recording sink in tests.
#[async_trait]
pub trait FrameSink {
    async fn send_frame(&mut self, data: Bytes) -> Result<(), NetError>;
    async fn close(&mut self) -> Result<(), NetError>;
}

/// Live websocket connection to the display endpoint.
pub struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    /// Connect once per run. `frame_size` bounds message size with a
    /// small framing margin; outgoing frames are always exactly sized.
    pub async fn connect(url: &str, frame_size: usize) -> Result<Self, NetError> {
        let config =
            WebSocketConfig::default().max_message_size(Some(frame_size + MESSAGE_MARGIN));
        let (ws, _response) = connect_async_with_config(url, Some(config), false)
            .await
            .map_err(classify_connect_error)?;
        info!(url, "connected to display");
        Ok(Self { ws })
    }
}

#[async_trait]
impl FrameSink for WsTransport {
    async fn send_frame(&mut self, data: Bytes) -> Result<(), NetError> {
        self.ws
            .send(Message::Binary(data))
            .await
            .map_err(NetError::Closed)
    }

    async fn close(&mut self) -> Result<(), NetError> {
        match self.ws.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(NetError::Closed(e)),
        }
    }
}

/// Split handshake failures into refused vs everything else.
fn classify_connect_error(err: WsError) -> NetError {
    match err {
        WsError::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            NetError::Refused(io)
        }
        other => NetError::Handshake(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn refused_io_error_is_refused() {
        let err = WsError::Io(std::io::Error::from(ErrorKind::ConnectionRefused));
        assert!(matches!(classify_connect_error(err), NetError::Refused(_)));
    }

    #[test]
    fn other_io_error_is_handshake() {
        let err = WsError::Io(std::io::Error::from(ErrorKind::TimedOut));
        assert!(matches!(
            classify_connect_error(err),
            NetError::Handshake(_)
        ));
    }

    #[test]
    fn closed_error_mentions_closure() {
        let err = NetError::Closed(WsError::ConnectionClosed);
        assert!(err.to_string().contains("closed"));
    }
}
