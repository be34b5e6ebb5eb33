use crate::config::EmulatorConfig;
use crate::encoder::validate_bindings;
use crate::frames::{Frame, FrameError, FrameId, FrameTable};
use crate::gate::{GroupSet, SubsystemGate, SubsystemGroup};
use crate::protocol::{
    Command, CommandResponse, CommandType, GroupReading, ProtocolError, ProtocolHandler,
    ResponseStatus, SignalReading, StatusReport,
};
use crate::scheduler::{SchedulerError, SchedulerStats, TickReport, TxScheduler};
use crate::signals::{SignalError, SignalId, SignalRegistry, SignalValue};
use crate::transport::{FrameRecord, Transport};
use heapless::{spsc::Queue, Vec};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

const MAX_COMMAND_QUEUE_SIZE: usize = 32;
const MAX_PENDING_RESPONSES: usize = 16;

type CommandQueue = Queue<Command, MAX_COMMAND_QUEUE_SIZE>;

/// Signals whose starting values feed the 0x0F6 default payload.
const INIT_ENCODED_SIGNALS: [SignalId; 2] = [SignalId::CoolantTemp, SignalId::OutdoorTemp];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmulatorState {
    pub running: bool,
    pub uptime_ms: u64,
    pub command_count: u32,
    pub tick_count: u32,
    pub frames_sent: u32,
    pub send_failures: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("signal error: {0}")]
    Signal(#[from] SignalError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("command queue full")]
    CommandQueueFull,
}

/// The emulated ECU.
///
/// Owns the signal registry, the frame table, the subsystem gate and the
/// transmission scheduler. All mutation goes through `&mut self`, so a signal
/// change is fully encoded before any later scheduler tick can read the frame.
pub struct VehicleEmulator {
    signals: SignalRegistry,
    frames: FrameTable,
    gate: SubsystemGate,
    scheduler: TxScheduler,
    protocol_handler: ProtocolHandler,

    state: EmulatorState,
    start_time: Instant,

    command_queue: CommandQueue,
    response_buffer: Vec<CommandResponse, MAX_PENDING_RESPONSES>,
}

impl VehicleEmulator {
    pub fn new() -> Result<Self, EmulatorError> {
        debug_assert!(validate_bindings().is_ok(), "signal bindings overlap");

        let mut frames = FrameTable::new();
        frames.initialize();
        let signals = SignalRegistry::new();
        for id in INIT_ENCODED_SIGNALS {
            signals.encode(id, &mut frames)?;
        }

        Ok(Self {
            signals,
            frames,
            gate: SubsystemGate::new(),
            scheduler: TxScheduler::from_frame_specs()?,
            protocol_handler: ProtocolHandler::new(),
            state: EmulatorState::default(),
            start_time: Instant::now(),
            command_queue: Queue::new(),
            response_buffer: Vec::new(),
        })
    }

    /// Build from a loaded configuration.
    ///
    /// Initial signal values that fail validation are logged and skipped; the
    /// signal keeps its built-in default.
    pub fn with_config(config: &EmulatorConfig) -> Result<Self, EmulatorError> {
        let mut emulator = Self::new()?;
        emulator.gate = SubsystemGate::from_enabled(config.groups.to_group_set());
        for (&id, &value) in &config.signals {
            if let Err(e) = emulator.set_signal(id, value) {
                warn!(signal = %id, %value, error = %e, "ignoring configured signal value");
            }
        }
        Ok(emulator)
    }

    pub fn start(&mut self) {
        self.start_time = Instant::now();
        self.scheduler.start(0);
        self.state.running = true;
        info!(
            groups = ?self.gate.enabled_groups().iter().collect::<std::vec::Vec<_>>(),
            "emulator started"
        );
    }

    pub fn stop(&mut self) {
        self.state.running = false;
        info!("emulator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    /// Milliseconds since the last `start`.
    pub fn now_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn set_signal(&mut self, id: SignalId, value: SignalValue) -> Result<SignalValue, EmulatorError> {
        let stored = self.signals.set(id, value, &mut self.frames)?;
        debug!(signal = %id, requested = %value, %stored, "signal set");
        Ok(stored)
    }

    pub fn get_signal(&self, id: SignalId) -> SignalValue {
        self.signals.get(id)
    }

    pub fn signals(&self) -> &SignalRegistry {
        &self.signals
    }

    pub fn set_group_enabled(&mut self, group: SubsystemGroup, enabled: bool) {
        self.gate.set_enabled(group, enabled);
        debug!(%group, enabled, "subsystem group switched");
    }

    pub fn is_group_enabled(&self, group: SubsystemGroup) -> bool {
        self.gate.is_group_enabled(group)
    }

    pub fn enabled_groups(&self) -> GroupSet {
        self.gate.enabled_groups()
    }

    pub fn gate(&self) -> &SubsystemGate {
        &self.gate
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        self.frames.read(id)
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    /// Run one loop iteration against the wall clock.
    pub fn update<T: Transport>(&mut self, transport: &mut T) -> Result<TickReport, EmulatorError> {
        let now_ms = self.now_ms();
        self.update_at(now_ms, transport)
    }

    /// Run one loop iteration at `now_ms`.
    ///
    /// Queued commands are applied first, so anything they change is visible
    /// to every timer that fires in the same iteration.
    pub fn update_at<T: Transport>(
        &mut self,
        now_ms: u64,
        transport: &mut T,
    ) -> Result<TickReport, EmulatorError> {
        if !self.state.running {
            return Ok(TickReport::default());
        }

        self.state.uptime_ms = now_ms;
        self.process_commands_at(now_ms)?;

        let report = self.scheduler.poll(now_ms, &self.frames, &self.gate, transport);
        self.state.tick_count = self.state.tick_count.saturating_add(u32::from(report.timers_fired));
        self.state.frames_sent = self.state.frames_sent.saturating_add(report.sent.len() as u32);

        for failure in &report.failures {
            self.state.send_failures = self.state.send_failures.saturating_add(1);
            match &failure.error {
                Some(e) => {
                    warn!(frame = %failure.frame, error = %e, "frame transmission failed");
                    self.state.last_error = Some(format!("send {}: {}", failure.frame, e));
                }
                None => debug!(frame = %failure.frame, "transport busy, frame dropped"),
            }
        }

        Ok(report)
    }

    pub fn queue_command(&mut self, command: Command) -> Result<(), EmulatorError> {
        self.command_queue
            .enqueue(command)
            .map_err(|_| EmulatorError::CommandQueueFull)
    }

    pub fn process_commands(&mut self) -> Result<(), EmulatorError> {
        let now_ms = self.now_ms();
        self.process_commands_at(now_ms)
    }

    fn process_commands_at(&mut self, now_ms: u64) -> Result<(), EmulatorError> {
        while let Some(command) = self.command_queue.dequeue() {
            let response = self.execute_command(command, now_ms);
            if self.response_buffer.push(response.clone()).is_err() {
                // keep the newest
                self.response_buffer.remove(0);
                let _ = self.response_buffer.push(response);
            }
            self.state.command_count = self.state.command_count.saturating_add(1);
        }
        Ok(())
    }

    /// Execute one command immediately and build its response.
    pub fn execute_command(&mut self, command: Command, now_ms: u64) -> CommandResponse {
        if let Err(e) = self.protocol_handler.validate_command(&command) {
            return self.protocol_handler.create_nack_response(
                command.id,
                &format!("Command validation failed: {}", e),
                now_ms,
            );
        }

        let id = command.id;
        let result: Result<Option<String>, EmulatorError> = match command.command_type {
            CommandType::Ping => Ok(Some("pong".to_string())),
            CommandType::Status => self.status_json().map(Some),
            CommandType::SetSignal { signal, value } => self
                .set_signal(signal, value)
                .map(|stored| Some(format!("{}={}", signal, stored))),
            CommandType::GetSignal { signal } => {
                Ok(Some(format!("{}={}", signal, self.get_signal(signal))))
            }
            CommandType::SetGroup { group, enabled } => {
                self.set_group_enabled(group, enabled);
                Ok(Some(format!("{}={}", group, if enabled { "on" } else { "off" })))
            }
            CommandType::GetFrames => self.frames_json().map(Some),
            CommandType::Subscribe => Ok(Some("subscribed".to_string())),
        };

        match result {
            Ok(message) => self.protocol_handler.create_response(
                id,
                ResponseStatus::Success,
                message.as_deref(),
                now_ms,
            ),
            Err(e) => {
                self.state.last_error = Some(e.to_string());
                self.protocol_handler.create_response(
                    id,
                    ResponseStatus::Error,
                    Some(&e.to_string()),
                    now_ms,
                )
            }
        }
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            running: self.state.running,
            uptime_ms: self.state.uptime_ms,
            command_count: self.state.command_count,
            frames_sent: self.state.frames_sent,
            send_failures: self.state.send_failures,
            signals: self
                .signals
                .iter()
                .map(|(signal, value)| SignalReading { signal, value })
                .collect(),
            groups: SubsystemGroup::ALL
                .iter()
                .map(|&group| GroupReading {
                    group,
                    enabled: self.gate.is_group_enabled(group),
                })
                .collect(),
            frames: self.frames.iter().map(FrameRecord::from).collect(),
        }
    }

    fn status_json(&self) -> Result<String, EmulatorError> {
        serde_json::to_string(&self.status_report())
            .map_err(|_| EmulatorError::Protocol(ProtocolError::SerializationError))
    }

    fn frames_json(&self) -> Result<String, EmulatorError> {
        let lines: std::vec::Vec<String> = self.frames.iter().map(|f| FrameRecord::from(f).to_string()).collect();
        serde_json::to_string(&lines)
            .map_err(|_| EmulatorError::Protocol(ProtocolError::SerializationError))
    }

    pub fn get_responses(&mut self) -> Vec<CommandResponse, MAX_PENDING_RESPONSES> {
        core::mem::take(&mut self.response_buffer)
    }

    pub fn get_state(&self) -> &EmulatorState {
        &self.state
    }

    pub fn get_scheduler_stats(&self) -> &SchedulerStats {
        self.scheduler.get_stats()
    }

    pub fn protocol_handler(&mut self) -> &mut ProtocolHandler {
        &mut self.protocol_handler
    }
}
