//! Built-in UART channel, reached through the cabinet's native bridge.
//!
//! The bridge process owns the physical device file; this side only speaks
//! its narrow contract (`initialize`, `send(hexString)`, `cleanup`, plus a
//! stream of raw inbound chunks) as line-delimited JSON over a Unix domain
//! socket. Sends use the space-separated hex layout the bridge expects.

use crate::config::BridgeConfig;
use crate::error::TransportError;
use crate::transport::{clean_inbound, ChannelFactory, Transport, INBOUND_CAPACITY};
use async_trait::async_trait;
use dispense_protocol::{frame_to_hex, HexSpacing, FRAME_LEN};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum BridgeRequest {
    Initialize,
    Send { hex: String },
    Cleanup,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    ok: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Unsolicited inbound-data event pushed by the bridge.
#[derive(Debug, Deserialize)]
struct BridgeEvent {
    event: String,
    data: String,
}

pub struct BridgeUartTransport {
    writer: OwnedWriteHalf,
    responses: mpsc::Receiver<BridgeResponse>,
    inbound: broadcast::Sender<String>,
    reader: JoinHandle<()>,
}

impl BridgeUartTransport {
    /// Connect to the bridge socket and run the `initialize` handshake.
    pub async fn connect(config: &BridgeConfig) -> Result<Self, TransportError> {
        let stream = UnixStream::connect(&config.socket).await.map_err(|source| {
            TransportError::BridgeConnect {
                path: config.socket.display().to_string(),
                source,
            }
        })?;
        let (read_half, writer) = stream.into_split();
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let (resp_tx, responses) = mpsc::channel(4);
        let reader = spawn_reader(read_half, resp_tx, inbound.clone());

        let mut transport = Self {
            writer,
            responses,
            inbound,
            reader,
        };
        transport.request(BridgeRequest::Initialize).await?;
        info!(socket = %config.socket.display(), "uart bridge initialized");
        Ok(transport)
    }

    /// Write one request line and wait for the bridge's ok/error reply.
    /// Requests are serialized by `&mut self`, so replies pair up FIFO.
    async fn request(&mut self, req: BridgeRequest) -> Result<(), TransportError> {
        let mut line =
            serde_json::to_string(&req).map_err(|e| TransportError::Bridge(e.to_string()))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        match self.responses.recv().await {
            Some(resp) if resp.ok => Ok(()),
            Some(resp) => Err(TransportError::Bridge(
                resp.message.unwrap_or_else(|| "request rejected".into()),
            )),
            None => Err(TransportError::Closed),
        }
    }
}

fn spawn_reader(
    read_half: OwnedReadHalf,
    responses: mpsc::Sender<BridgeResponse>,
    inbound: broadcast::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Ok(event) = serde_json::from_str::<BridgeEvent>(&line) {
                        if event.event == "data" {
                            if let Some(hex) = clean_inbound(event.data.as_bytes()) {
                                let _ = inbound.send(hex);
                            }
                        }
                        continue;
                    }
                    match serde_json::from_str::<BridgeResponse>(&line) {
                        Ok(resp) => {
                            if responses.send(resp).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "unparseable bridge line"),
                    }
                }
                Ok(None) => {
                    warn!("uart bridge socket closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "uart bridge read failed");
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl Transport for BridgeUartTransport {
    fn name(&self) -> &'static str {
        "bridge-uart"
    }

    async fn send_frame(&mut self, frame: &[u8; FRAME_LEN]) -> Result<(), TransportError> {
        let hex = frame_to_hex(frame, HexSpacing::Spaced);
        debug!(%hex, "sending frame via bridge");
        self.request(BridgeRequest::Send {
            hex: hex.as_str().to_owned(),
        })
        .await
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.inbound.subscribe()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let res = self.request(BridgeRequest::Cleanup).await;
        self.reader.abort();
        info!("uart bridge cleaned up");
        res
    }
}

impl Drop for BridgeUartTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Factory handed to the channel registry; opens a fresh bridge connection
/// per `initialize`.
pub struct BridgeFactory {
    config: BridgeConfig,
}

impl BridgeFactory {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ChannelFactory for BridgeFactory {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        let transport = BridgeUartTransport::connect(&self.config).await?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    async fn accept_scripted_bridge(listener: UnixListener) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 1024];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let text = String::from_utf8_lossy(&buf[..n]).to_string();
            for line in text.lines() {
                if line.contains("initialize") || line.contains("cleanup") {
                    stream.write_all(b"{\"ok\":true}\n").await.unwrap();
                } else if line.contains("\"send\"") {
                    // echo an inbound data event before acknowledging
                    stream
                        .write_all(b"{\"event\":\"data\",\"data\":\"4F 4B!\"}\n")
                        .await
                        .unwrap();
                    stream.write_all(b"{\"ok\":true}\n").await.unwrap();
                }
            }
        }
    }

    #[tokio::test]
    async fn initialize_send_and_event_routing() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("bridge.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        tokio::spawn(accept_scripted_bridge(listener));

        let config = BridgeConfig {
            socket: socket.clone(),
        };
        let mut transport = BridgeUartTransport::connect(&config).await.unwrap();
        let mut rx = transport.subscribe();

        let frame = dispense_protocol::motor_run_frame(5, dispense_protocol::MotorType::ThreeWire);
        transport.send_frame(&frame).await.unwrap();

        // the scripted bridge pushed a data event while acking the send
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg, "4F 4B");

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_send_surfaces_bridge_error() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("bridge.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            // ack initialize, then reject everything else
            let mut first = true;
            loop {
                let n = match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                for _ in String::from_utf8_lossy(&buf[..n]).lines() {
                    let reply: &[u8] = if first {
                        first = false;
                        b"{\"ok\":true}\n"
                    } else {
                        b"{\"ok\":false,\"message\":\"tx busy\"}\n"
                    };
                    stream.write_all(reply).await.unwrap();
                }
            }
        });

        let config = BridgeConfig { socket };
        let mut transport = BridgeUartTransport::connect(&config).await.unwrap();
        let frame = dispense_protocol::motor_run_frame(0, dispense_protocol::MotorType::ThreeWire);
        let err = transport.send_frame(&frame).await.unwrap_err();
        assert!(matches!(err, TransportError::Bridge(ref m) if m == "tx busy"));
    }

    #[tokio::test]
    async fn missing_socket_is_a_connect_error() {
        let config = BridgeConfig {
            socket: PathBuf::from("/nonexistent/bridge.sock"),
        };
        let err = BridgeUartTransport::connect(&config)
            .await
            .err()
            .expect("connect without a socket must fail");
        assert!(matches!(err, TransportError::BridgeConnect { .. }));
    }
}
