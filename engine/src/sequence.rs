//! Expansion of a paid cart into the ordered frame list for one session.

use crate::error::MappingError;
use crate::model::{DispenseRequest, MachineProfile};
use crate::slot;
use dispense_protocol::{motor_run_frame, MotorType, FRAME_LEN};

/// The fully materialized unit of work for one dispense session.
///
/// Frames are built up front, before anything touches the hardware: the
/// total count is always small (bounded by the units in one cart), every
/// mapping error surfaces before the first send, and the session gets a
/// stable count for progress reporting.
#[derive(Debug, Clone)]
pub struct CommandSequence {
    slots: Vec<u8>,
    frames: Vec<[u8; FRAME_LEN]>,
}

impl CommandSequence {
    pub fn from_request(
        request: &DispenseRequest,
        profile: Option<&MachineProfile>,
    ) -> Result<Self, MappingError> {
        let slots = slot::map_request(request, profile)?;
        let frames = slots
            .iter()
            .map(|&slot| motor_run_frame(slot, MotorType::ThreeWire))
            .collect();
        Ok(Self { slots, frames })
    }

    pub fn frames(&self) -> &[[u8; FRAME_LEN]] {
        &self.frames
    }

    /// Slot indices in send order, one per frame.
    pub fn slots(&self) -> &[u8] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_two_yields_two_identical_frames() {
        let req = DispenseRequest::from_pairs([(3, 2)]);
        let seq = CommandSequence::from_request(&req, None).unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.frames()[0], seq.frames()[1]);
        assert_eq!(seq.frames()[0][2], 4); // product 3 -> slot 4
    }

    #[test]
    fn cart_order_is_preserved() {
        let req = DispenseRequest::from_pairs([(11, 1), (1, 2), (2, 1)]);
        let seq = CommandSequence::from_request(&req, None).unwrap();
        assert_eq!(seq.slots(), &[20, 0, 0, 2]);
        let sent: Vec<u8> = seq.frames().iter().map(|f| f[2]).collect();
        assert_eq!(sent, vec![20, 0, 0, 2]);
    }

    #[test]
    fn mapping_error_propagates() {
        let profile = MachineProfile::new(vec![5]);
        let req = DispenseRequest::from_pairs([(1, 1), (9, 1)]);
        assert!(CommandSequence::from_request(&req, Some(&profile)).is_err());
    }

    #[test]
    fn empty_request_is_an_empty_sequence() {
        let seq = CommandSequence::from_request(&DispenseRequest::default(), None).unwrap();
        assert!(seq.is_empty());
    }
}
