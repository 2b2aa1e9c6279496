//! Register block layout, decoding and control-bit encoding
//!
//! The scanner PLC exposes one data block holding the measurements (inputs)
//! and the settings/reset bits (outputs). Every multi-byte field is
//! big-endian. Offsets are configurable because different PLC programs lay
//! the block out differently; the default matches the commissioned layout:
//!
//! | Offset | Type | Field |
//! |---|---|---|
//! | 0  | u8  | status byte |
//! | 2  | f32 | D1 |
//! | 6  | f32 | D2 |
//! | 10 | f32 | D3 |
//! | 14 | f32 | D4 |
//! | 18 | u16 | lumps counter |
//! | 20 | u16 | necks counter |
//! | 22 | f32 | line speed |
//! | 26 | u16 | status word |
//! | 28 | u8  | control bits |
//! | 30 | f32 | lump threshold |
//! | 34 | f32 | neck threshold |

use serde::{Deserialize, Serialize};

use super::PlcError;
use crate::types::DIAMETER_CHANNELS;

// ============================================================================
// Control Bits
// ============================================================================

/// Output bit field at the control offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlBits(pub u8);

impl ControlBits {
    pub const RESET_LUMPS: u8 = 0b0000_0001;
    pub const RESET_NECKS: u8 = 0b0000_0010;
    pub const COMMON_FAULT: u8 = 0b0000_0100;
    pub const ALARM_ENABLE: u8 = 0b0000_1000;

    pub const RESET_COUNTERS: u8 = Self::RESET_LUMPS | Self::RESET_NECKS;

    pub const fn contains(self, mask: u8) -> bool {
        self.0 & mask == mask
    }

    #[must_use]
    pub const fn with(self, mask: u8, on: bool) -> Self {
        if on {
            Self(self.0 | mask)
        } else {
            Self(self.0 & !mask)
        }
    }
}

// ============================================================================
// Layout
// ============================================================================

/// Byte offsets of every field inside the data block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterLayout {
    /// Bytes read per cycle
    pub block_size: usize,
    pub status_byte: usize,
    pub d1: usize,
    pub d2: usize,
    pub d3: usize,
    pub d4: usize,
    pub lumps: usize,
    pub necks: usize,
    pub speed: usize,
    pub status_word: usize,
    pub control: usize,
    pub lump_threshold: usize,
    pub neck_threshold: usize,
}

impl Default for RegisterLayout {
    fn default() -> Self {
        Self {
            block_size: 38,
            status_byte: 0,
            d1: 2,
            d2: 6,
            d3: 10,
            d4: 14,
            lumps: 18,
            necks: 20,
            speed: 22,
            status_word: 26,
            control: 28,
            lump_threshold: 30,
            neck_threshold: 34,
        }
    }
}

impl RegisterLayout {
    /// (name, offset, width in bytes) of every field.
    fn fields(&self) -> [(&'static str, usize, usize); 12] {
        [
            ("status_byte", self.status_byte, 1),
            ("d1", self.d1, 4),
            ("d2", self.d2, 4),
            ("d3", self.d3, 4),
            ("d4", self.d4, 4),
            ("lumps", self.lumps, 2),
            ("necks", self.necks, 2),
            ("speed", self.speed, 4),
            ("status_word", self.status_word, 2),
            ("control", self.control, 1),
            ("lump_threshold", self.lump_threshold, 4),
            ("neck_threshold", self.neck_threshold, 4),
        ]
    }

    /// Return every problem with the layout: fields running past the block
    /// end and fields that overlap each other.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let fields = self.fields();

        for &(name, offset, width) in &fields {
            if offset + width > self.block_size {
                errors.push(format!(
                    "plc.layout.{name} at offset {offset} ({width} bytes) runs past block_size {}",
                    self.block_size
                ));
            }
        }

        for (i, &(a, a_off, a_w)) in fields.iter().enumerate() {
            for &(b, b_off, b_w) in &fields[i + 1..] {
                if a_off < b_off + b_w && b_off < a_off + a_w {
                    errors.push(format!(
                        "plc.layout.{a} (offset {a_off}) overlaps plc.layout.{b} (offset {b_off})"
                    ));
                }
            }
        }

        errors
    }

    /// Decode one block read from the PLC.
    pub fn decode(&self, bytes: &[u8]) -> Result<RegisterBlock, PlcError> {
        if bytes.len() < self.block_size {
            return Err(PlcError::Io(format!(
                "short read: got {} bytes, expected {}",
                bytes.len(),
                self.block_size
            )));
        }

        let offsets = [self.d1, self.d2, self.d3, self.d4];
        let mut diameters = [0.0; DIAMETER_CHANNELS];
        for (d, &offset) in diameters.iter_mut().zip(&offsets) {
            *d = f64::from(read_f32(bytes, offset));
        }

        Ok(RegisterBlock {
            status: bytes[self.status_byte],
            diameters,
            lumps: read_u16(bytes, self.lumps),
            necks: read_u16(bytes, self.necks),
            speed: f64::from(read_f32(bytes, self.speed)),
            status_word: read_u16(bytes, self.status_word),
            control: ControlBits(bytes[self.control]),
            lump_threshold: read_f32(bytes, self.lump_threshold),
            neck_threshold: read_f32(bytes, self.neck_threshold),
        })
    }

    /// Offsets of the diameter channels, D1 first.
    pub const fn diameter_offsets(&self) -> [usize; DIAMETER_CHANNELS] {
        [self.d1, self.d2, self.d3, self.d4]
    }
}

// Callers guarantee `offset + N <= bytes.len()` through `decode`'s length
// check and the layout validation done at startup.
fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    f32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

// ============================================================================
// Decoded Block
// ============================================================================

/// Typed view of one register block read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterBlock {
    pub status: u8,
    /// D1..D4 (mm)
    pub diameters: [f64; DIAMETER_CHANNELS],
    pub lumps: u16,
    pub necks: u16,
    /// m/min
    pub speed: f64,
    pub status_word: u16,
    pub control: ControlBits,
    pub lump_threshold: f32,
    pub neck_threshold: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_default(block: &RegisterBlock) -> Vec<u8> {
        let layout = RegisterLayout::default();
        let mut bytes = vec![0u8; layout.block_size];
        bytes[layout.status_byte] = block.status;
        for (&offset, &d) in layout.diameter_offsets().iter().zip(&block.diameters) {
            bytes[offset..offset + 4].copy_from_slice(&(d as f32).to_be_bytes());
        }
        bytes[layout.lumps..layout.lumps + 2].copy_from_slice(&block.lumps.to_be_bytes());
        bytes[layout.necks..layout.necks + 2].copy_from_slice(&block.necks.to_be_bytes());
        bytes[layout.speed..layout.speed + 4].copy_from_slice(&(block.speed as f32).to_be_bytes());
        bytes[layout.control] = block.control.0;
        bytes
    }

    #[test]
    fn default_layout_is_valid() {
        assert!(RegisterLayout::default().validate().is_empty());
    }

    #[test]
    fn overlapping_fields_are_reported() {
        let layout = RegisterLayout {
            d2: 4, // overlaps d1 (2..6)
            ..RegisterLayout::default()
        };
        let errors = layout.validate();
        assert!(errors.iter().any(|e| e.contains("d1") && e.contains("d2")));
    }

    #[test]
    fn field_past_block_end_is_reported() {
        let layout = RegisterLayout {
            block_size: 32,
            ..RegisterLayout::default()
        };
        let errors = layout.validate();
        assert!(errors.iter().any(|e| e.contains("neck_threshold")));
    }

    #[test]
    fn decodes_big_endian_fields() {
        let block = RegisterBlock {
            status: 3,
            diameters: [18.0, 18.25, 17.75, 18.5],
            lumps: 0x0102,
            necks: 9_001,
            speed: 30.0,
            status_word: 0,
            control: ControlBits(ControlBits::ALARM_ENABLE),
            lump_threshold: 0.0,
            neck_threshold: 0.0,
        };
        let bytes = encode_default(&block);
        assert_eq!(bytes[18], 0x01);
        assert_eq!(bytes[19], 0x02);

        let decoded = RegisterLayout::default().decode(&bytes).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn short_read_is_an_io_error() {
        let err = RegisterLayout::default().decode(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, PlcError::Io(_)));
    }

    #[test]
    fn control_bits_set_and_clear() {
        let bits = ControlBits::default()
            .with(ControlBits::RESET_COUNTERS, true)
            .with(ControlBits::COMMON_FAULT, true);
        assert!(bits.contains(ControlBits::RESET_LUMPS));
        assert!(bits.contains(ControlBits::COMMON_FAULT));

        let cleared = bits.with(ControlBits::RESET_COUNTERS, false);
        assert!(!cleared.contains(ControlBits::RESET_NECKS));
        assert!(cleared.contains(ControlBits::COMMON_FAULT));
    }
}
