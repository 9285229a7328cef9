use crate::error::EngineError;
use serde::{Deserialize, Serialize};

/// One line of a paid cart: a logical product and how many units to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_number: u32,
    pub quantity: u32,
}

/// A confirmed-paid cart, already resolved server-side.
///
/// Line order is preserved end to end: motors run one after another in cart
/// order, and that order is part of the contract with the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispenseRequest {
    lines: Vec<CartLine>,
}

impl DispenseRequest {
    pub fn new(lines: Vec<CartLine>) -> Self {
        Self { lines }
    }

    /// Build from the `[[productNumber, quantity], ...]` shape the backend
    /// returns after payment finalization.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, u32)>) -> Self {
        Self {
            lines: pairs
                .into_iter()
                .map(|(product_number, quantity)| CartLine {
                    product_number,
                    quantity,
                })
                .collect(),
        }
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total physical units across all lines, i.e. the number of frames a
    /// full dispense will send.
    pub fn total_units(&self) -> usize {
        self.lines.iter().map(|l| l.quantity as usize).sum()
    }
}

/// Per-machine wiring profile fetched from the backend.
///
/// `config_array[n - 1]` is the physical motor slot for 1-based product
/// number `n`. Held in memory for the duration of one dispense only; a
/// profile is never persisted as the source of truth, so a stale copy after
/// a backend-side rewiring surfaces as a mapping error instead of silently
/// running the wrong motor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineProfile {
    pub config_array: Vec<u16>,
}

impl MachineProfile {
    pub fn new(config_array: Vec<u16>) -> Self {
        Self { config_array }
    }
}

/// Shared view of the built-in UART channel, readable by any screen without
/// touching hardware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub initialized: bool,
    pub connected: bool,
    pub listening: bool,
}

/// Outcome of one dispense session, consumed exactly once by the
/// payment-completion flow.
///
/// `all_sent` means every command frame was transmitted; it does not claim
/// every item physically dropped (no feedback frame is read back). Retry
/// policy for a partial result belongs to the caller.
#[derive(Debug)]
pub struct DispenseResult {
    pub all_sent: bool,
    pub frames_sent: usize,
    pub last_error: Option<EngineError>,
}

impl DispenseResult {
    pub fn completed(frames_sent: usize) -> Self {
        Self {
            all_sent: true,
            frames_sent,
            last_error: None,
        }
    }

    pub fn failed(frames_sent: usize, error: EngineError) -> Self {
        Self {
            all_sent: false,
            frames_sent,
            last_error: Some(error),
        }
    }
}
