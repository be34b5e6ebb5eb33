//! Frame transport.
//!
//! The scheduler hands each eligible frame to a [`Transport`]. Sending is
//! non-blocking and fire-and-forget: a transport that cannot take the frame
//! right now answers `WouldBlock`, a broken one answers with an error, and in
//! both cases the frame simply goes out again on its next tick.

use crate::frames::{Frame, FrameId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transmit buffer full")]
    BufferFull,
    #[error("bus offline")]
    BusOffline,
    #[error("transport closed")]
    Closed,
}

pub trait Transport {
    fn send(&mut self, frame: &Frame) -> nb::Result<(), TransportError>;
}

/// A transmitted frame as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub id: u16,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl FrameRecord {
    pub fn frame_id(&self) -> Option<FrameId> {
        FrameId::from_raw(self.id)
    }
}

impl From<&Frame> for FrameRecord {
    fn from(frame: &Frame) -> Self {
        Self {
            id: frame.raw_id(),
            data: frame.data().to_vec(),
        }
    }
}

/// candump style: `036#0E00002F920000A0`
impl core::fmt::Display for FrameRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:03X}#", self.id)?;
        for byte in &self.data {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Keeps every frame it is given. Can be told to refuse frames.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Vec<FrameRecord>,
    failure: Option<TransportError>,
    busy: bool,
    attempts: u32,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every send with `error` until cleared with `None`.
    pub fn fail_with(&mut self, error: Option<TransportError>) {
        self.failure = error;
    }

    /// Answer `WouldBlock` to every send while set.
    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    pub fn sent(&self) -> &[FrameRecord] {
        &self.sent
    }

    pub fn take(&mut self) -> Vec<FrameRecord> {
        core::mem::take(&mut self.sent)
    }

    pub fn count(&self, id: FrameId) -> usize {
        self.sent.iter().filter(|r| r.id == id.raw()).count()
    }

    pub fn last(&self, id: FrameId) -> Option<&FrameRecord> {
        self.sent.iter().rev().find(|r| r.id == id.raw())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, frame: &Frame) -> nb::Result<(), TransportError> {
        self.attempts += 1;
        if self.busy {
            return Err(nb::Error::WouldBlock);
        }
        if let Some(error) = &self.failure {
            return Err(nb::Error::Other(error.clone()));
        }
        self.sent.push(FrameRecord::from(frame));
        Ok(())
    }
}

/// Publishes frames to any number of monitor subscribers.
///
/// A bus with nobody listening still accepts frames.
#[derive(Debug, Clone)]
pub struct BroadcastTransport {
    tx: broadcast::Sender<FrameRecord>,
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FrameRecord> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Transport for BroadcastTransport {
    fn send(&mut self, frame: &Frame) -> nb::Result<(), TransportError> {
        // SendError only means there are no subscribers right now
        let _ = self.tx.send(FrameRecord::from(frame));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::FrameTable;

    #[test]
    fn test_candump_format() {
        let table = FrameTable::new();
        let record = FrameRecord::from(table.read(FrameId::BodyStatus));
        assert_eq!(record.to_string(), "036#0E00002F920000A0");
        assert_eq!(
            FrameRecord::from(table.read(FrameId::Doors)).to_string(),
            "220#0000"
        );
    }

    #[test]
    fn test_recording_transport_failures() {
        let table = FrameTable::new();
        let mut transport = RecordingTransport::new();

        transport.set_busy(true);
        assert!(matches!(
            transport.send(table.read(FrameId::Doors)),
            Err(nb::Error::WouldBlock)
        ));
        transport.set_busy(false);

        transport.fail_with(Some(TransportError::BusOffline));
        assert!(matches!(
            transport.send(table.read(FrameId::Doors)),
            Err(nb::Error::Other(TransportError::BusOffline))
        ));
        transport.fail_with(None);

        assert!(transport.send(table.read(FrameId::Doors)).is_ok());
        assert_eq!(transport.count(FrameId::Doors), 1);
        assert_eq!(transport.attempts(), 3);
    }

    #[test]
    fn test_broadcast_transport_delivers_to_subscribers() {
        let table = FrameTable::new();
        let mut transport = BroadcastTransport::new(16);
        assert!(transport.send(table.read(FrameId::Climate)).is_ok());

        let mut rx = transport.subscribe();
        transport.send(table.read(FrameId::VehicleSettings)).unwrap();
        let record = rx.try_recv().unwrap();
        assert_eq!(record.frame_id(), Some(FrameId::VehicleSettings));
        assert_eq!(record.data, vec![0xB8, 0x34, 0x8F, 0x30, 0xD5, 0x41, 0x00]);
    }
}
