//! USB-serial channel: an off-the-shelf USB-to-serial adapter plugged into
//! the control board, fixed at 9600-8-N-1.

use crate::config::UsbConfig;
use crate::error::TransportError;
use crate::transport::{clean_inbound, Transport, INBOUND_CAPACITY};
use async_trait::async_trait;
use dispense_protocol::{frame_to_hex, HexSpacing, FRAME_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialPortType, SerialStream, StopBits};
use tracing::{debug, info, warn};

pub struct UsbSerialTransport {
    port_name: String,
    writer: WriteHalf<SerialStream>,
    inbound: broadcast::Sender<String>,
    reader: JoinHandle<()>,
}

impl UsbSerialTransport {
    /// Pick a candidate port: an explicitly configured path wins, otherwise
    /// the first attached USB serial device whose vendor id passes the
    /// allow-list. Discovery is fallible and never retried here; the retry
    /// policy belongs to the session.
    pub fn discover(config: &UsbConfig) -> Result<String, TransportError> {
        if let Some(port) = &config.port {
            return Ok(port.clone());
        }
        let ports = tokio_serial::available_ports().map_err(TransportError::Discovery)?;
        for info in ports {
            if let SerialPortType::UsbPort(usb) = &info.port_type {
                if config.allowed_vids.is_empty() || config.allowed_vids.contains(&usb.vid) {
                    debug!(port = %info.port_name, vid = usb.vid, "usb candidate accepted");
                    return Ok(info.port_name);
                }
                debug!(port = %info.port_name, vid = usb.vid, "usb candidate filtered out");
            }
        }
        Err(TransportError::NoDevice)
    }

    pub async fn open(config: &UsbConfig) -> Result<Self, TransportError> {
        let port_name = Self::discover(config)?;
        let stream = tokio_serial::new(&port_name, config.baud_rate)
            .parity(Parity::None)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|source| TransportError::Open {
                port: port_name.clone(),
                source,
            })?;
        info!(port = %port_name, baud = config.baud_rate, "usb serial opened");

        let (read_half, writer) = tokio::io::split(stream);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let reader = spawn_reader(read_half, inbound.clone());
        Ok(Self {
            port_name,
            writer,
            inbound,
            reader,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

fn spawn_reader(
    mut read_half: ReadHalf<SerialStream>,
    inbound: broadcast::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; 256];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) => {
                    warn!("usb serial read stream ended");
                    break;
                }
                Ok(n) => {
                    if let Some(hex) = clean_inbound(&buf[..n]) {
                        let _ = inbound.send(hex);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "usb serial read failed");
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl Transport for UsbSerialTransport {
    fn name(&self) -> &'static str {
        "usb-serial"
    }

    async fn send_frame(&mut self, frame: &[u8; FRAME_LEN]) -> Result<(), TransportError> {
        let hex = frame_to_hex(frame, HexSpacing::Contiguous);
        debug!(port = %self.port_name, %hex, "sending frame");
        self.writer.write_all(hex.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.inbound.subscribe()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.reader.abort();
        self.writer.shutdown().await?;
        info!(port = %self.port_name, "usb serial closed");
        Ok(())
    }
}

impl Drop for UsbSerialTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
