//! Logical product numbers to physical motor slots.
//!
//! Two rules exist. Machines wired to the factory layout use the default
//! arithmetic rule; machines with custom wiring carry a per-machine
//! `configArray` that overrides it entirely. Either way an unmappable
//! product is a hard error, raised before anything is sent to the board.

use crate::error::MappingError;
use crate::model::{DispenseRequest, MachineProfile};

/// Factory wiring: products 1..=10 sit on even slots of the first two rows,
/// products above 10 continue contiguously from slot 20.
///
/// Widened to `u64` so products near `u32::MAX` cannot wrap back into the
/// board's slot range; the range check below rejects them instead.
fn default_slot(product: u32) -> u64 {
    if product <= 10 {
        u64::from(product - 1) * 2
    } else {
        u64::from(product) + 9
    }
}

fn slot_for(product: u32, profile: Option<&MachineProfile>) -> Result<u8, MappingError> {
    if product == 0 {
        return Err(MappingError::ZeroProductNumber);
    }
    let slot = match profile {
        Some(profile) => {
            let idx = (product - 1) as usize;
            match profile.config_array.get(idx) {
                Some(&slot) => u64::from(slot),
                None => {
                    return Err(MappingError::MissingProfileEntry {
                        product,
                        len: profile.config_array.len(),
                    });
                }
            }
        }
        None => default_slot(product),
    };
    u8::try_from(slot).map_err(|_| MappingError::SlotOutOfRange { product, slot })
}

/// Expand a paid cart into one motor slot per physical unit to dispense.
///
/// A quantity of 3 yields three consecutive identical entries; the board
/// drops one unit per motor pulse, so every unit is its own frame. Cart
/// order is preserved.
pub fn map_request(
    request: &DispenseRequest,
    profile: Option<&MachineProfile>,
) -> Result<Vec<u8>, MappingError> {
    let mut slots = Vec::with_capacity(request.total_units());
    for line in request.lines() {
        if line.quantity == 0 {
            return Err(MappingError::ZeroQuantity {
                product: line.product_number,
            });
        }
        let slot = slot_for(line.product_number, profile)?;
        for _ in 0..line.quantity {
            slots.push(slot);
        }
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(product: u32) -> DispenseRequest {
        DispenseRequest::from_pairs([(product, 1)])
    }

    #[test]
    fn default_rule_reference_points() {
        assert_eq!(map_request(&one(1), None).unwrap(), vec![0]);
        assert_eq!(map_request(&one(10), None).unwrap(), vec![18]);
        assert_eq!(map_request(&one(11), None).unwrap(), vec![20]);
        assert_eq!(map_request(&one(20), None).unwrap(), vec![29]);
    }

    #[test]
    fn profile_overrides_arithmetic_rule() {
        let profile = MachineProfile::new(vec![7, 3, 9]);
        assert_eq!(map_request(&one(2), Some(&profile)).unwrap(), vec![3]);
        // product 2 would be slot 2 under the default rule
        assert_eq!(map_request(&one(2), None).unwrap(), vec![2]);
    }

    #[test]
    fn quantity_expands_to_repeated_slots() {
        let req = DispenseRequest::from_pairs([(3, 2), (1, 1)]);
        assert_eq!(map_request(&req, None).unwrap(), vec![4, 4, 0]);
    }

    #[test]
    fn product_outside_profile_is_an_error() {
        let profile = MachineProfile::new(vec![7, 3, 9]);
        let err = map_request(&one(4), Some(&profile)).unwrap_err();
        assert!(matches!(
            err,
            MappingError::MissingProfileEntry { product: 4, len: 3 }
        ));
    }

    #[test]
    fn slot_above_byte_range_is_an_error() {
        let profile = MachineProfile::new(vec![300]);
        let err = map_request(&one(1), Some(&profile)).unwrap_err();
        assert!(matches!(err, MappingError::SlotOutOfRange { slot: 300, .. }));

        // default rule past the byte range fails the same way
        let err = map_request(&one(250), None).unwrap_err();
        assert!(matches!(err, MappingError::SlotOutOfRange { slot: 259, .. }));
    }

    #[test]
    fn huge_product_number_cannot_wrap_into_range() {
        // u32::MAX + 9 must not wrap back into a valid slot byte
        let err = map_request(&one(u32::MAX), None).unwrap_err();
        assert!(matches!(
            err,
            MappingError::SlotOutOfRange {
                product: u32::MAX,
                slot,
            } if slot == u64::from(u32::MAX) + 9
        ));
    }

    #[test]
    fn zero_product_and_zero_quantity_rejected() {
        let err = map_request(&one(0), None).unwrap_err();
        assert!(matches!(err, MappingError::ZeroProductNumber));

        let req = DispenseRequest::from_pairs([(5, 0)]);
        let err = map_request(&req, None).unwrap_err();
        assert!(matches!(err, MappingError::ZeroQuantity { product: 5 }));
    }
}
