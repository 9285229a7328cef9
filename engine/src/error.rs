use std::time::Duration;
use thiserror::Error;

/// A product line could not be resolved to a physical motor slot.
///
/// Mapping errors are always raised before any frame for the offending
/// product is sent; a bad lookup would otherwise run the wrong motor.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("product number must be positive")]
    ZeroProductNumber,
    #[error("quantity must be positive for product {product}")]
    ZeroQuantity { product: u32 },
    #[error("product {product} has no entry in the machine profile ({len} slots configured)")]
    MissingProfileEntry { product: u32, len: usize },
    #[error("product {product} maps to slot {slot}, outside the board's single-byte range")]
    SlotOutOfRange { product: u32, slot: u64 },
}

/// Failure reported by a hardware channel.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no matching USB serial device found")]
    NoDevice,
    #[error("device discovery failed: {0}")]
    Discovery(tokio_serial::Error),
    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        source: tokio_serial::Error,
    },
    #[error("bridge socket {path}: {source}")]
    BridgeConnect {
        path: String,
        source: std::io::Error,
    },
    #[error("bridge rejected request: {0}")]
    Bridge(String),
    #[error("channel i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    #[error("channel is closed")]
    Closed,
}

/// Top-level dispense failure, one per session.
///
/// `Acquire` is reported before any frame is sent and leaves the cart state
/// untouched; `Send` carries partial progress so the caller can treat the
/// payment as "dispensed with uncertainty" instead of assuming full success.
/// The engine never retries a failed frame on its own.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("could not acquire hardware channel after {attempts} attempt(s): {source}")]
    Acquire { attempts: u32, source: TransportError },
    #[error("frame send failed after {frames_sent} of {total} frames: {source}")]
    Send {
        frames_sent: usize,
        total: usize,
        source: TransportError,
    },
    #[error("dispense aborted after {frames_sent} of {total} frames")]
    Aborted { frames_sent: usize, total: usize },
}
