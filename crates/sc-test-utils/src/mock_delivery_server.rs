// mock_delivery_server: a scriptable stand-in for a signaling instance's
// delivery endpoint.
//
// Accepts WebSocket connections on a random local port, records every
// deliver_message frame it sees, and answers according to the configured
// behavior.  Each test spins up its own isolated instance.

use sc_protocol::{DeliverMessage, DeliverResult, DeliveryFrame};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

/// How the server answers the next deliver_message frames.
#[derive(Debug, Clone, Copy)]
pub enum DeliveryBehavior {
    /// Answer every request with `deliver_result { delivered_count }`.
    Ack { delivered_count: u32 },
    /// Drop the connection on the next request (transport failure).
    Disconnect,
    /// Swallow the request and never answer (deadline testing).
    Stall,
}

#[derive(Default)]
struct Recorded {
    requests: Vec<DeliverMessage>,
}

pub struct MockDeliveryServer {
    addr: SocketAddr,
    behavior: Arc<Mutex<DeliveryBehavior>>,
    recorded: Arc<Mutex<Recorded>>,
    connections_accepted: Arc<AtomicUsize>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockDeliveryServer {
    /// Start on a random port, acking every request with `delivered_count = 1`.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let behavior = Arc::new(Mutex::new(DeliveryBehavior::Ack { delivered_count: 1 }));
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let connections_accepted = Arc::new(AtomicUsize::new(0));

        let task = {
            let behavior = behavior.clone();
            let recorded = recorded.clone();
            let connections_accepted = connections_accepted.clone();
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, _peer)) => {
                            connections_accepted.fetch_add(1, Ordering::SeqCst);
                            let behavior = behavior.clone();
                            let recorded = recorded.clone();
                            tokio::spawn(async move {
                                let _ = handle_connection(stream, behavior, recorded).await;
                            });
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        Ok(Self {
            addr,
            behavior,
            recorded,
            connections_accepted,
            _task: task,
        })
    }

    /// The `host:port` authority callers register as this instance's address.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub async fn set_behavior(&self, behavior: DeliveryBehavior) {
        *self.behavior.lock().await = behavior;
    }

    /// All deliver_message frames received so far, in arrival order.
    pub async fn received(&self) -> Vec<DeliverMessage> {
        self.recorded.lock().await.requests.clone()
    }

    /// Total connections ever accepted (reconnects increment this).
    pub fn connections_accepted(&self) -> usize {
        self.connections_accepted.load(Ordering::SeqCst)
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    behavior: Arc<Mutex<DeliveryBehavior>>,
    recorded: Arc<Mutex<Recorded>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    while let Some(msg_result) = read.next().await {
        let text = match msg_result? {
            Message::Text(t) => t,
            Message::Close(_) => break,
            Message::Ping(data) => {
                write.send(Message::Pong(data)).await?;
                continue;
            }
            _ => continue,
        };

        let frame: DeliveryFrame = serde_json::from_str(&text)?;
        let DeliveryFrame::DeliverMessage(request) = frame else {
            continue;
        };
        recorded.lock().await.requests.push(request);

        match *behavior.lock().await {
            DeliveryBehavior::Ack { delivered_count } => {
                let reply = DeliveryFrame::DeliverResult(DeliverResult { delivered_count });
                let json = serde_json::to_string(&reply)?;
                write.send(Message::Text(json.into())).await?;
            }
            DeliveryBehavior::Disconnect => {
                // Simulate an instance crash: no close handshake.
                break;
            }
            DeliveryBehavior::Stall => {}
        }
    }
    Ok(())
}
