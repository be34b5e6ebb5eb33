//! Signal encoding rules.
//!
//! Every signal is bound to one or more placements in the frame table. A
//! placement says which byte(s) it touches and how the value is turned into
//! bits:
//!
//! - [`Encoding::Sentinel`]: a boolean selects one of two fixed bytes.
//! - [`Encoding::Affine`]: `byte = clamp(round(value * scale + offset), 0, 255)`.
//! - [`Encoding::BitField`]: the value is shifted into a mask inside a byte
//!   that other signals may share; bits outside the mask are preserved.
//! - [`Encoding::BigEndian16`]: the scaled value is shifted left and split
//!   across two adjacent bytes, high byte first.
//!
//! Bytes shared between signals are declared as [`CompositeByte`]s whose
//! fields are checked for overlapping masks at compile time.

use crate::frames::{FrameError, FrameId, FrameTable};
use crate::signals::{SignalId, SignalValue, SIGNAL_COUNT};
use static_assertions::const_assert;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteLocation {
    pub frame: FrameId,
    pub offset: usize,
}

impl ByteLocation {
    pub const fn new(frame: FrameId, offset: usize) -> Self {
        Self { frame, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Encoding {
    Sentinel { at: ByteLocation, on: u8, off: u8 },
    Affine { at: ByteLocation, scale: f32, offset: f32 },
    BitField { at: ByteLocation, mask: u8 },
    BigEndian16 { at: ByteLocation, scale: f32, shift: u8 },
}

impl Encoding {
    /// Bytes written by this placement, with the mask applied to each.
    pub fn footprint(&self) -> impl Iterator<Item = (ByteLocation, u8)> {
        let (first, second) = match *self {
            Encoding::Sentinel { at, .. } | Encoding::Affine { at, .. } => ((at, 0xFF), None),
            Encoding::BitField { at, mask } => ((at, mask), None),
            Encoding::BigEndian16 { at, .. } => (
                (at, 0xFF),
                Some((ByteLocation::new(at.frame, at.offset + 1), 0xFF)),
            ),
        };
        core::iter::once(first).chain(second)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub name: &'static str,
    pub mask: u8,
}

impl BitField {
    pub const fn new(name: &'static str, mask: u8) -> Self {
        Self { name, mask }
    }
}

/// A byte shared by several independent bit fields.
#[derive(Debug, Clone, Copy)]
pub struct CompositeByte<const N: usize> {
    pub name: &'static str,
    pub at: ByteLocation,
    pub fields: [BitField; N],
}

impl<const N: usize> CompositeByte<N> {
    pub const fn masks_disjoint(&self) -> bool {
        let mut seen = 0u8;
        let mut i = 0;
        while i < N {
            let mask = self.fields[i].mask;
            if mask == 0 || seen & mask != 0 {
                return false;
            }
            seen |= mask;
            i += 1;
        }
        true
    }

    pub const fn field(&self, index: usize) -> Encoding {
        Encoding::BitField {
            at: self.at,
            mask: self.fields[index].mask,
        }
    }
}

pub const CLUSTER_LIGHTING: CompositeByte<2> = CompositeByte {
    name: "cluster lighting",
    at: ByteLocation::new(FrameId::BodyStatus, 3),
    fields: [
        BitField::new("brightness", 0x0F),
        BitField::new("dashboardLighting", 0x20),
    ],
};

pub const DASHBOARD_LIGHTING: CompositeByte<1> = CompositeByte {
    name: "dashboard lighting",
    at: ByteLocation::new(FrameId::DashboardLights, 7),
    fields: [BitField::new("brightness", 0x0F)],
};

pub const DOOR_STATUS: CompositeByte<5> = CompositeByte {
    name: "door status",
    at: ByteLocation::new(FrameId::Doors, 0),
    fields: [
        BitField::new("doorFrontLeft", 0x80),
        BitField::new("doorFrontRight", 0x40),
        BitField::new("doorRearLeft", 0x20),
        BitField::new("doorRearRight", 0x10),
        BitField::new("trunk", 0x08),
    ],
};

const_assert!(CLUSTER_LIGHTING.masks_disjoint());
const_assert!(DASHBOARD_LIGHTING.masks_disjoint());
const_assert!(DOOR_STATUS.masks_disjoint());

pub struct SignalBinding {
    pub signal: SignalId,
    pub encodings: &'static [Encoding],
}

/// Signal to placement table, indexed by [`SignalId`].
pub static BINDINGS: [SignalBinding; SIGNAL_COUNT] = [
    SignalBinding {
        signal: SignalId::Ignition,
        encodings: &[
            Encoding::Sentinel {
                at: ByteLocation::new(FrameId::BodyStatus, 4),
                on: 0x91,
                off: 0x92,
            },
            Encoding::Sentinel {
                at: ByteLocation::new(FrameId::Temperatures, 0),
                on: 0x8E,
                off: 0x86,
            },
        ],
    },
    SignalBinding {
        signal: SignalId::OutdoorTemp,
        encodings: &[Encoding::Affine {
            at: ByteLocation::new(FrameId::Temperatures, 6),
            scale: 2.0,
            offset: 80.0,
        }],
    },
    SignalBinding {
        signal: SignalId::CoolantTemp,
        encodings: &[Encoding::Affine {
            at: ByteLocation::new(FrameId::Temperatures, 1),
            scale: 1.0,
            offset: 39.0,
        }],
    },
    SignalBinding {
        signal: SignalId::Rpm,
        encodings: &[Encoding::BigEndian16 {
            at: ByteLocation::new(FrameId::EngineSpeed, 0),
            scale: 1.0,
            shift: 3,
        }],
    },
    SignalBinding {
        signal: SignalId::VehicleSpeed,
        encodings: &[Encoding::BigEndian16 {
            at: ByteLocation::new(FrameId::EngineSpeed, 2),
            scale: 100.0,
            shift: 0,
        }],
    },
    SignalBinding {
        signal: SignalId::Brightness,
        encodings: &[CLUSTER_LIGHTING.field(0), DASHBOARD_LIGHTING.field(0)],
    },
    SignalBinding {
        signal: SignalId::DashboardLighting,
        encodings: &[CLUSTER_LIGHTING.field(1)],
    },
    SignalBinding {
        signal: SignalId::DoorFrontLeft,
        encodings: &[DOOR_STATUS.field(0)],
    },
    SignalBinding {
        signal: SignalId::DoorFrontRight,
        encodings: &[DOOR_STATUS.field(1)],
    },
    SignalBinding {
        signal: SignalId::DoorRearLeft,
        encodings: &[DOOR_STATUS.field(2)],
    },
    SignalBinding {
        signal: SignalId::DoorRearRight,
        encodings: &[DOOR_STATUS.field(3)],
    },
    SignalBinding {
        signal: SignalId::Trunk,
        encodings: &[DOOR_STATUS.field(4)],
    },
];

pub fn binding(id: SignalId) -> &'static SignalBinding {
    &BINDINGS[id.index()]
}

pub fn affine_byte(value: f32, scale: f32, offset: f32) -> u8 {
    // `as` saturates, clamp keeps the intent explicit
    (value * scale + offset).round().clamp(0.0, 255.0) as u8
}

/// Bits for `mask`, with `raw` clamped to a byte and then to the field width.
pub fn field_bits(raw: f32, mask: u8) -> u8 {
    if mask == 0 {
        return 0;
    }
    let shift = mask.trailing_zeros();
    let width_max = mask >> shift;
    let byte = raw.round().clamp(0.0, 255.0) as u8;
    (byte.min(width_max) << shift) & mask
}

pub fn big_endian16(value: f32, scale: f32, shift: u8) -> [u8; 2] {
    let ceiling = f32::from(u16::MAX >> shift);
    let scaled = (value * scale).round().clamp(0.0, ceiling) as u16;
    (scaled << shift).to_be_bytes()
}

/// Write one placement of `value` into the frame table.
pub fn encode(
    value: SignalValue,
    encoding: &Encoding,
    frames: &mut FrameTable,
) -> Result<(), FrameError> {
    match *encoding {
        Encoding::Sentinel { at, on, off } => {
            let byte = if value.as_f32() != 0.0 { on } else { off };
            frames.write(at.frame, at.offset, byte)
        }
        Encoding::Affine { at, scale, offset } => {
            frames.write(at.frame, at.offset, affine_byte(value.as_f32(), scale, offset))
        }
        Encoding::BitField { at, mask } => {
            frames.write_masked(at.frame, at.offset, mask, field_bits(value.as_f32(), mask))
        }
        Encoding::BigEndian16 { at, scale, shift } => {
            let [high, low] = big_endian16(value.as_f32(), scale, shift);
            frames.write(at.frame, at.offset, high)?;
            frames.write(at.frame, at.offset + 1, low)
        }
    }
}

/// Encode every placement bound to `id`.
pub fn apply(id: SignalId, value: SignalValue, frames: &mut FrameTable) -> Result<(), FrameError> {
    for encoding in binding(id).encodings {
        encode(value, encoding, frames)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("binding for {signal} is stored at the slot of {slot}")]
    Misordered { signal: SignalId, slot: SignalId },
    #[error("{signal} writes frame {frame} at offset {offset}, beyond its length {length}")]
    OutOfFrame {
        signal: SignalId,
        frame: FrameId,
        offset: usize,
        length: usize,
    },
    #[error("{first} and {second} overlap in frame {frame} byte {offset}")]
    Overlap {
        first: SignalId,
        second: SignalId,
        frame: FrameId,
        offset: usize,
    },
}

/// Check the whole binding table: slots match signals, every byte lies within
/// its frame, and no two signals write the same bits.
pub fn validate_bindings() -> Result<(), BindingError> {
    for (slot, binding) in SignalId::ALL.iter().zip(BINDINGS.iter()) {
        if *slot != binding.signal {
            return Err(BindingError::Misordered {
                signal: binding.signal,
                slot: *slot,
            });
        }
        for (at, _) in binding.encodings.iter().flat_map(Encoding::footprint) {
            let length = at.frame.spec().length;
            if at.offset >= length {
                return Err(BindingError::OutOfFrame {
                    signal: binding.signal,
                    frame: at.frame,
                    offset: at.offset,
                    length,
                });
            }
        }
    }

    for (i, first) in BINDINGS.iter().enumerate() {
        for second in &BINDINGS[i + 1..] {
            for (a, mask_a) in first.encodings.iter().flat_map(Encoding::footprint) {
                for (b, mask_b) in second.encodings.iter().flat_map(Encoding::footprint) {
                    if a == b && mask_a & mask_b != 0 {
                        return Err(BindingError::Overlap {
                            first: first.signal,
                            second: second.signal,
                            frame: a.frame,
                            offset: a.offset,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_table_is_consistent() {
        assert_eq!(validate_bindings(), Ok(()));
    }

    #[test]
    fn test_affine_clamps_to_byte() {
        assert_eq!(affine_byte(-40.0, 2.0, 80.0), 0);
        assert_eq!(affine_byte(85.0, 2.0, 80.0), 250);
        assert_eq!(affine_byte(200.0, 2.0, 80.0), 255);
        assert_eq!(affine_byte(-100.0, 1.0, 39.0), 0);
        assert_eq!(affine_byte(10.4, 1.0, 0.0), 10);
    }

    #[test]
    fn test_field_bits_stay_in_mask() {
        assert_eq!(field_bits(15.0, 0x0F), 0x0F);
        assert_eq!(field_bits(1.0, 0x20), 0x20);
        assert_eq!(field_bits(0.0, 0x20), 0x00);
        // wider than the field: saturates to the field maximum
        assert_eq!(field_bits(300.0, 0x0F), 0x0F);
        assert_eq!(field_bits(7.0, 0x30), 0x30);
    }

    #[test]
    fn test_big_endian_split() {
        assert_eq!(big_endian16(8000.0, 1.0, 3), [0xFA, 0x00]);
        assert_eq!(big_endian16(800.0, 1.0, 3), [0x19, 0x00]);
        assert_eq!(big_endian16(120.0, 100.0, 0), [0x2E, 0xE0]);
        assert_eq!(big_endian16(10_000.0, 1.0, 3), [0xFF, 0xF8]);
    }

    #[test]
    fn test_composite_masks() {
        let overlapping = CompositeByte {
            name: "broken",
            at: ByteLocation::new(FrameId::Doors, 1),
            fields: [BitField::new("a", 0x0F), BitField::new("b", 0x18)],
        };
        assert!(!overlapping.masks_disjoint());
        assert!(DOOR_STATUS.masks_disjoint());
    }

    #[test]
    fn test_footprint_of_multi_byte_encoding() {
        let footprint: Vec<_> = binding(SignalId::Rpm).encodings[0].footprint().collect();
        assert_eq!(
            footprint,
            vec![
                (ByteLocation::new(FrameId::EngineSpeed, 0), 0xFF),
                (ByteLocation::new(FrameId::EngineSpeed, 1), 0xFF),
            ]
        );
    }
}
