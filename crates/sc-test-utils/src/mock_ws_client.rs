// mock_ws_client: a plain WebSocket client for driving servers under test.
//
// Suites speak strict request/response, so there is no pump pair here: one
// task owns the whole stream and alternates send/recv.  Frames are JSON
// text of whatever serde type the suite is exchanging, which lets the same
// client drive the signaling socket (ClientFrame/ServerFrame) and the
// delivery endpoint (DeliveryFrame).

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct MockWsClient {
    ws: WsStream,
}

impl MockWsClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| format!("connecting to {url}: {e}"))?;
        Ok(Self { ws })
    }

    pub async fn send_frame<T: Serialize>(
        &mut self,
        frame: &T,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(frame)?;
        self.ws.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Next decoded text frame.  Control frames are invisible to suites:
    /// pings are answered by the protocol layer, pongs are dropped.
    pub async fn recv_frame<T: DeserializeOwned>(
        &mut self,
    ) -> Result<T, Box<dyn std::error::Error>> {
        loop {
            let message = match self.ws.next().await {
                None => return Err("server went away mid-test".into()),
                Some(message) => message?,
            };
            match message {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(frame) => {
                    return Err(format!("server closed the socket: {frame:?}").into());
                }
                _ => {}
            }
        }
    }

    /// Receive with a bound; most suites use this so a missing frame fails
    /// fast instead of hanging the test.
    pub async fn recv_frame_timeout<T: DeserializeOwned>(
        &mut self,
        timeout: Duration,
    ) -> Result<T, Box<dyn std::error::Error>> {
        match tokio::time::timeout(timeout, self.recv_frame()).await {
            Ok(result) => result,
            Err(_) => Err(format!("no frame within {timeout:?}").into()),
        }
    }

    /// Assert that the server sends nothing for `window`.
    pub async fn expect_silence(&mut self, window: Duration) -> Result<(), String> {
        match tokio::time::timeout(window, self.recv_frame::<serde_json::Value>()).await {
            Err(_) => Ok(()),
            Ok(Ok(frame)) => Err(format!("expected silence, got frame: {frame}")),
            Ok(Err(_)) => Ok(()), // a closed socket is silent too
        }
    }

    /// Client-initiated close handshake, as a departing viewer would do it.
    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.ws.close(None).await?;
        Ok(())
    }
}
