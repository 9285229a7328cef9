//! Hardware channels.
//!
//! Two interchangeable implementations sit behind one contract: a USB-serial
//! adapter and the cabinet's built-in UART reached through a native bridge
//! process. Both take whole command frames; each adapter performs its own
//! hex serialization, so the cosmetic difference between the channels
//! (contiguous vs space-separated hex) lives here and nowhere else.

pub mod bridge;
#[cfg(test)]
pub(crate) mod mock;
pub mod usb;

use crate::error::TransportError;
use async_trait::async_trait;
use dispense_protocol::FRAME_LEN;
use tokio::sync::broadcast;

/// Capacity of the per-channel inbound broadcast. Inbound traffic is
/// diagnostic only; slow subscribers may lag and lose chunks.
pub(crate) const INBOUND_CAPACITY: usize = 64;

/// A live hardware channel.
///
/// Sends are strictly sequential (`&mut self`); the physical bus cannot
/// interleave frames. Inbound bytes are surfaced as cleaned hex strings for
/// diagnostic screens; no acknowledgement frame is parsed.
#[async_trait]
pub trait Transport: Send {
    /// Short channel name for logs.
    fn name(&self) -> &'static str;

    /// Transmit one 20-byte command frame.
    async fn send_frame(&mut self, frame: &[u8; FRAME_LEN]) -> Result<(), TransportError>;

    /// Subscribe to cleaned inbound hex chunks.
    fn subscribe(&self) -> broadcast::Receiver<String>;

    /// Release the underlying hardware handle.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens the shared built-in UART channel on demand.
///
/// The registry is handed a factory instead of a live handle so screens can
/// construct it without touching hardware, and so tests can substitute a
/// mock channel.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError>;
}

/// Strip everything but hex digits and whitespace from an inbound chunk.
///
/// Returns `None` when nothing displayable remains.
pub fn clean_inbound(chunk: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(chunk);
    let cleaned: String = text
        .chars()
        .filter(|&c| dispense_protocol::is_clean_hex_char(c))
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
