#![no_std]

//! Command frames for the vending machine's motor control board.
//!
//! The board speaks a fixed-length 20-byte frame: an 18-byte command body
//! followed by a CRC16 (MODBUS variant) appended low byte first. Frames are
//! transmitted as uppercase ASCII hex; depending on the channel the bytes are
//! either contiguous (`"0105..."`) or separated by single spaces
//! (`"01 05 ..."`). Building a frame is pure: the same motor slot always
//! yields the same 20 bytes.

use heapless::String;

/// Total frame length on the wire, CRC included.
pub const FRAME_LEN: usize = 20;
/// Length of the command body covered by the CRC.
pub const BODY_LEN: usize = 18;
pub const CRC_LEN: usize = 2;

/// Address of the motor control board. Only one board per machine.
pub const BOARD_ADDRESS: u8 = 0x01;
/// Command code for "run this motor once".
pub const CMD_MOTOR_RUN: u8 = 0x05;
/// Light-screen (drop sensor) flag; the deployed boards run with it off.
pub const LIGHT_SCREEN_OFF: u8 = 0x00;

/// Hex length of a contiguous frame (two chars per byte).
pub const HEX_LEN: usize = FRAME_LEN * 2;
/// Hex length with a single space between byte pairs.
pub const HEX_SPACED_LEN: usize = FRAME_LEN * 3 - 1;

/// Motor drive types understood by the control board.
///
/// The dispense engine only ever issues [`MotorType::ThreeWire`] commands;
/// the remaining variants exist on the board and show up in maintenance
/// tooling, so the full set is kept here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotorType {
    NoFeedbackElectromagnet,
    FeedbackElectromagnet,
    TwoWire,
    ThreeWire,
    ThreeTrackStrong,
}

impl MotorType {
    pub const fn code(self) -> u8 {
        match self {
            MotorType::NoFeedbackElectromagnet => 0,
            MotorType::FeedbackElectromagnet => 1,
            MotorType::TwoWire => 2,
            MotorType::ThreeWire => 3,
            MotorType::ThreeTrackStrong => 6,
        }
    }
}

/// How a frame's hex form is laid out for a given channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HexSpacing {
    /// `"0105050300..."`, accepted by the USB-serial channel.
    Contiguous,
    /// `"01 05 05 03 00 ..."`, expected by the built-in UART bridge.
    Spaced,
}

/// CRC16, MODBUS variant: init `0xFFFF`, reflected, polynomial `0xA001`.
pub fn crc16_modbus(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in bytes {
        crc ^= b as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Build the 20-byte "run motor once" frame for one physical slot.
///
/// Layout: board address, command code, slot, motor type, light-screen flag,
/// 13 reserved zero bytes, CRC16 low byte, CRC16 high byte.
pub fn motor_run_frame(slot: u8, motor_type: MotorType) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = BOARD_ADDRESS;
    frame[1] = CMD_MOTOR_RUN;
    frame[2] = slot;
    frame[3] = motor_type.code();
    frame[4] = LIGHT_SCREEN_OFF;
    // bytes 5..18 stay zero (reserved)
    let crc = crc16_modbus(&frame[..BODY_LEN]);
    let crc_bytes = crc.to_le_bytes();
    frame[BODY_LEN] = crc_bytes[0];
    frame[BODY_LEN + 1] = crc_bytes[1];
    frame
}

/// Serialize a frame as uppercase hex in the requested layout.
///
/// This is the single place the two channels' cosmetic framing difference is
/// handled; callers never space-separate by hand.
pub fn frame_to_hex(frame: &[u8; FRAME_LEN], spacing: HexSpacing) -> String<HEX_SPACED_LEN> {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out: String<HEX_SPACED_LEN> = String::new();
    for (i, &byte) in frame.iter().enumerate() {
        if i > 0 && spacing == HexSpacing::Spaced {
            // capacity is sized for the spaced layout, pushes cannot fail
            let _ = out.push(' ');
        }
        let _ = out.push(DIGITS[(byte >> 4) as usize] as char);
        let _ = out.push(DIGITS[(byte & 0x0F) as usize] as char);
    }
    out
}

/// True for characters that may appear in surfaced inbound traffic: hex
/// digits and whitespace. Everything else is line noise and gets stripped
/// before a chunk is shown on diagnostic screens.
pub fn is_clean_hex_char(c: char) -> bool {
    c.is_ascii_hexdigit() || c.is_ascii_whitespace()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_known_answer_all_zero_body() {
        let body = [0u8; BODY_LEN];
        assert_eq!(crc16_modbus(&body), 0xE471);
        // determinism
        assert_eq!(crc16_modbus(&body), crc16_modbus(&body));
    }

    #[test]
    fn motor_run_frame_layout() {
        let frame = motor_run_frame(5, MotorType::ThreeWire);
        assert_eq!(frame.len(), FRAME_LEN);
        assert_eq!(frame[0], BOARD_ADDRESS);
        assert_eq!(frame[1], CMD_MOTOR_RUN);
        assert_eq!(frame[2], 0x05);
        assert_eq!(frame[3], MotorType::ThreeWire.code());
        assert_eq!(frame[4], LIGHT_SCREEN_OFF);
        assert!(frame[5..BODY_LEN].iter().all(|&b| b == 0));
        // CRC16/MODBUS over the 18-byte body, low byte first
        assert_eq!(frame[18], 0xB3);
        assert_eq!(frame[19], 0x1B);
    }

    #[test]
    fn motor_run_frame_is_pure() {
        assert_eq!(
            motor_run_frame(42, MotorType::ThreeWire),
            motor_run_frame(42, MotorType::ThreeWire)
        );
    }

    #[test]
    fn hex_contiguous_uppercase() {
        let frame = motor_run_frame(0, MotorType::ThreeWire);
        let hex = frame_to_hex(&frame, HexSpacing::Contiguous);
        assert_eq!(hex.len(), HEX_LEN);
        assert_eq!(hex.as_str(), "0105000300000000000000000000000000007048");
    }

    #[test]
    fn hex_spaced_layout() {
        let frame = motor_run_frame(5, MotorType::ThreeWire);
        let hex = frame_to_hex(&frame, HexSpacing::Spaced);
        assert_eq!(hex.len(), HEX_SPACED_LEN);
        assert!(hex.as_str().starts_with("01 05 05 03 00"));
        assert!(hex.as_str().ends_with("B3 1B"));
    }

    #[test]
    fn motor_type_codes_match_board() {
        assert_eq!(MotorType::NoFeedbackElectromagnet.code(), 0);
        assert_eq!(MotorType::FeedbackElectromagnet.code(), 1);
        assert_eq!(MotorType::TwoWire.code(), 2);
        assert_eq!(MotorType::ThreeWire.code(), 3);
        assert_eq!(MotorType::ThreeTrackStrong.code(), 6);
    }

    #[test]
    fn clean_hex_char_filter() {
        assert!(is_clean_hex_char('A'));
        assert!(is_clean_hex_char('f'));
        assert!(is_clean_hex_char('0'));
        assert!(is_clean_hex_char(' '));
        assert!(!is_clean_hex_char('g'));
        assert!(!is_clean_hex_char('\u{1b}'));
    }
}
