//! # Vehicle ECU Emulator
//!
//! Emulates a body-computer style ECU on a CAN bus: a handful of vehicle
//! signals (ignition, temperatures, engine speed, lighting, doors) are encoded
//! into a fixed table of frames, and those frames are put on the bus at their
//! own fixed rates while their owning subsystem is enabled.
//!
//! ## Features
//!
//! - **Signal registry**: bounded signals with clamp-on-set semantics
//! - **Frame table**: fixed-length payloads seeded with protocol defaults
//! - **Encoder**: declarative byte/bit placements, overlap-checked
//! - **Subsystem gate**: per-group transmit switches
//! - **Multi-rate scheduler**: one timer per interval, no catch-up bursts
//! - **JSON control protocol**: newline-delimited commands over TCP
//!
//! ## Quick Start
//!
//! ```rust
//! use carbus::{FrameId, RecordingTransport, SignalId, SignalValue, VehicleEmulator};
//!
//! let mut emulator = VehicleEmulator::new().unwrap();
//! let mut bus = RecordingTransport::new();
//!
//! emulator.start();
//! emulator.set_signal(SignalId::Ignition, SignalValue::Bool(true)).unwrap();
//! emulator.update_at(100, &mut bus).unwrap();
//!
//! assert_eq!(bus.last(FrameId::BodyStatus).unwrap().data[4], 0x91);
//! ```
//!
//! ## Architecture
//!
//! - [`frames`] - Frame table and protocol defaults
//! - [`signals`] - Signal registry
//! - [`encoder`] - Signal to byte placement rules
//! - [`gate`] - Subsystem group switches
//! - [`scheduler`] - Multi-rate transmission timers
//! - [`transport`] - Bus abstraction
//! - [`emulator`] - Orchestrator and public API
//! - [`protocol`] - Command/response protocol handling
//! - [`config`] - Startup configuration

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

extern crate alloc;

pub mod config;
pub mod emulator;
pub mod encoder;
pub mod frames;
pub mod gate;
pub mod protocol;
pub mod scheduler;
pub mod signals;
pub mod transport;

// Re-export main public types for convenience
pub use config::EmulatorConfig;
pub use emulator::{EmulatorError, VehicleEmulator};
pub use frames::{Frame, FrameId, FrameTable};
pub use gate::{SubsystemGate, SubsystemGroup};
pub use protocol::{Command, CommandResponse, CommandType};
pub use scheduler::TxScheduler;
pub use signals::{SignalId, SignalRegistry, SignalValue};
pub use transport::{BroadcastTransport, FrameRecord, RecordingTransport, Transport};
