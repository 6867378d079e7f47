//! Duplex connection to the worker

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{Result, RelayError};
use crate::models::Endpoint;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open connection to the worker
#[async_trait]
pub trait WorkerConnection: Send {
    /// Send one text frame
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Wait for the next inbound frame.
    ///
    /// Returns an error once the worker closes the connection. Must be
    /// cancel-safe.
    async fn next_event(&mut self) -> Result<()>;
}

/// Opens connections to the worker
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> Result<Box<dyn WorkerConnection>>;
}

/// WebSocket connector
pub struct WsConnector;

impl WsConnector {
    /// Open a WebSocket to `endpoint` within `connect_timeout`
    pub async fn open(endpoint: &Endpoint, connect_timeout: Duration) -> Result<WsConnection> {
        let url = endpoint.ws_url()?;
        debug!(%endpoint, "Opening WebSocket to worker");

        let (stream, _response) = timeout(connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| RelayError::ConnectTimeout {
                endpoint: endpoint.to_string(),
            })??;

        Ok(WsConnection { stream })
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> Result<Box<dyn WorkerConnection>> {
        let connection = Self::open(endpoint, connect_timeout).await?;
        Ok(Box::new(connection))
    }
}

/// WebSocket connection wrapper
pub struct WsConnection {
    stream: WsStream,
}

impl WsConnection {
    /// Close the connection, ignoring errors from a worker that is already gone
    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}

#[async_trait]
impl WorkerConnection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::text(text)).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<()> {
        match self.stream.next().await {
            Some(Ok(Message::Close(_))) | None => Err(RelayError::ConnectionClosed),
            Some(Ok(Message::Text(text))) => {
                debug!("Worker sent: {}", text.as_str());
                Ok(())
            }
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(e.into()),
        }
    }
}
