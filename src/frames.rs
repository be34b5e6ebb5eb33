//! Outgoing frame table.
//!
//! The set of frames is fixed: each one has a protocol identifier, a payload
//! length that never changes, a transmission interval, the subsystem groups
//! that own it and a literal default payload. [`FrameTable`] holds the live
//! payload bytes that the encoder writes and the scheduler transmits.

use crate::gate::{GroupSet, SubsystemGroup};
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use thiserror::Error;

pub const MAX_PAYLOAD_LEN: usize = 8;
pub const FRAME_COUNT: usize = 11;

pub type Payload = ArrayVec<u8, MAX_PAYLOAD_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FrameId {
    /// 0x036: ignition and cluster lighting commands.
    BodyStatus,
    /// 0x0B6: engine speed and vehicle speed.
    EngineSpeed,
    /// 0x0E6
    Chassis,
    /// 0x0F6: ignition mirror, coolant and outdoor temperature.
    Temperatures,
    /// 0x122
    MultimediaKeys,
    /// 0x128: dashboard lights.
    DashboardLights,
    /// 0x1D0
    Climate,
    /// 0x21F
    RadioRemote,
    /// 0x220: door status.
    Doors,
    /// 0x221
    TripComputer,
    /// 0x260
    VehicleSettings,
}

impl FrameId {
    pub const ALL: [FrameId; FRAME_COUNT] = [
        FrameId::BodyStatus,
        FrameId::EngineSpeed,
        FrameId::Chassis,
        FrameId::Temperatures,
        FrameId::MultimediaKeys,
        FrameId::DashboardLights,
        FrameId::Climate,
        FrameId::RadioRemote,
        FrameId::Doors,
        FrameId::TripComputer,
        FrameId::VehicleSettings,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn spec(self) -> &'static FrameSpec {
        &FRAME_SPECS[self as usize]
    }

    /// Protocol-level identifier.
    pub fn raw(self) -> u16 {
        self.spec().raw_id
    }

    pub fn from_raw(raw: u16) -> Option<FrameId> {
        FrameId::ALL.iter().copied().find(|id| id.raw() == raw)
    }
}

impl core::fmt::Display for FrameId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:03X}", self.raw())
    }
}

/// Static description of one frame on the wire.
#[derive(Debug, Clone, Copy)]
pub struct FrameSpec {
    pub id: FrameId,
    pub raw_id: u16,
    pub length: usize,
    pub interval_ms: u32,
    pub defaults: [u8; MAX_PAYLOAD_LEN],
    pub groups: GroupSet,
}

const fn groups(list: &[SubsystemGroup]) -> GroupSet {
    let mut set = GroupSet::EMPTY;
    let mut i = 0;
    while i < list.len() {
        set = set.with(list[i]);
        i += 1;
    }
    set
}

use SubsystemGroup::{Climate, Dashboard, Doors, General, Lighting, Multimedia};

/// Protocol defaults. Bytes 1 and 6 of 0x0F6 are filled from the coolant and
/// outdoor temperature signals when the emulator starts.
pub static FRAME_SPECS: [FrameSpec; FRAME_COUNT] = [
    FrameSpec {
        id: FrameId::BodyStatus,
        raw_id: 0x036,
        length: 8,
        interval_ms: 100,
        defaults: [0x0E, 0x00, 0x00, 0x2F, 0x92, 0x00, 0x00, 0xA0],
        groups: groups(&[General, Dashboard]),
    },
    FrameSpec {
        id: FrameId::EngineSpeed,
        raw_id: 0x0B6,
        length: 8,
        interval_ms: 50,
        defaults: [0x00; 8],
        groups: groups(&[Dashboard]),
    },
    FrameSpec {
        id: FrameId::Chassis,
        raw_id: 0x0E6,
        length: 8,
        interval_ms: 200,
        defaults: [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x45],
        groups: groups(&[General]),
    },
    FrameSpec {
        id: FrameId::Temperatures,
        raw_id: 0x0F6,
        length: 8,
        interval_ms: 500,
        defaults: [0x86, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        groups: groups(&[General, Dashboard, Lighting]),
    },
    FrameSpec {
        id: FrameId::MultimediaKeys,
        raw_id: 0x122,
        length: 8,
        interval_ms: 200,
        defaults: [0x00; 8],
        groups: groups(&[Multimedia]),
    },
    FrameSpec {
        id: FrameId::DashboardLights,
        raw_id: 0x128,
        length: 8,
        interval_ms: 200,
        defaults: [0x00; 8],
        groups: groups(&[Dashboard, Lighting]),
    },
    FrameSpec {
        id: FrameId::Climate,
        raw_id: 0x1D0,
        length: 7,
        interval_ms: 500,
        defaults: [0x00; 8],
        groups: groups(&[Climate]),
    },
    FrameSpec {
        id: FrameId::RadioRemote,
        raw_id: 0x21F,
        length: 3,
        interval_ms: 100,
        defaults: [0x00; 8],
        groups: GroupSet::EMPTY,
    },
    FrameSpec {
        id: FrameId::Doors,
        raw_id: 0x220,
        length: 2,
        interval_ms: 500,
        defaults: [0x00; 8],
        groups: groups(&[Doors]),
    },
    FrameSpec {
        id: FrameId::TripComputer,
        raw_id: 0x221,
        length: 7,
        interval_ms: 1000,
        defaults: [0x00; 8],
        groups: groups(&[Dashboard]),
    },
    FrameSpec {
        id: FrameId::VehicleSettings,
        raw_id: 0x260,
        length: 7,
        interval_ms: 500,
        defaults: [0xB8, 0x34, 0x8F, 0x30, 0xD5, 0x41, 0x00, 0x00],
        groups: groups(&[Multimedia]),
    },
];

const_assert_eq!(FrameId::ALL.len(), FRAME_COUNT);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("write to frame {id} at offset {offset} exceeds payload length {length}")]
    OffsetOutOfRange {
        id: FrameId,
        offset: usize,
        length: usize,
    },
}

/// A frame and its current payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    id: FrameId,
    data: Payload,
}

impl Frame {
    fn from_spec(spec: &FrameSpec) -> Self {
        let mut data = Payload::new();
        data.extend(spec.defaults.iter().copied().take(spec.length));
        Self { id: spec.id, data }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn raw_id(&self) -> u16 {
        self.id.raw()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn byte_mut(&mut self, offset: usize) -> Result<&mut u8, FrameError> {
        let (id, length) = (self.id, self.data.len());
        self.data
            .get_mut(offset)
            .ok_or(FrameError::OffsetOutOfRange { id, offset, length })
    }
}

/// Live payload buffers for every frame.
#[derive(Debug, Clone)]
pub struct FrameTable {
    frames: [Frame; FRAME_COUNT],
}

impl FrameTable {
    /// A table already populated with the protocol defaults.
    pub fn new() -> Self {
        Self {
            frames: core::array::from_fn(|i| Frame::from_spec(&FRAME_SPECS[i])),
        }
    }

    /// Restore every payload to its literal default bytes.
    pub fn initialize(&mut self) {
        for (frame, spec) in self.frames.iter_mut().zip(FRAME_SPECS.iter()) {
            *frame = Frame::from_spec(spec);
        }
    }

    /// Overwrite one whole byte.
    pub fn write(&mut self, id: FrameId, offset: usize, byte: u8) -> Result<(), FrameError> {
        *self.frames[id.index()].byte_mut(offset)? = byte;
        Ok(())
    }

    /// Overwrite only the bits selected by `mask`; other bits keep their value.
    pub fn write_masked(
        &mut self,
        id: FrameId,
        offset: usize,
        mask: u8,
        bits: u8,
    ) -> Result<(), FrameError> {
        let byte = self.frames[id.index()].byte_mut(offset)?;
        *byte = (*byte & !mask) | (bits & mask);
        Ok(())
    }

    /// The live frame, never a stale copy.
    pub fn read(&self, id: FrameId) -> &Frame {
        &self.frames[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new()
    }
}
