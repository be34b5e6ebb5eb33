use crate::frames::{FrameId, FrameTable, FRAME_SPECS};
use crate::gate::SubsystemGate;
use crate::transport::{Transport, TransportError};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

const MAX_TIMERS: usize = 8;
const MAX_FRAMES_PER_TIMER: usize = 8;
const MAX_FRAMES_PER_TICK: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("no timer slot left for a {0} ms interval")]
    TooManyTimers(u32),
    #[error("timer for {0} ms already holds the maximum number of frames")]
    TimerFull(u32),
    #[error("interval must be greater than zero")]
    ZeroInterval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    pub frame: FrameId,
    /// `None` when the transport answered `WouldBlock`.
    pub error: Option<TransportError>,
}

/// What one call to [`TxScheduler::poll`] did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub timers_fired: u8,
    pub sent: Vec<FrameId, MAX_FRAMES_PER_TICK>,
    pub gated: Vec<FrameId, MAX_FRAMES_PER_TICK>,
    pub failures: Vec<SendFailure, MAX_FRAMES_PER_TICK>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.timers_fired == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerStats {
    pub total_ticks: u32,
    pub frames_sent: u32,
    pub frames_gated: u32,
    pub send_failures: u32,
    /// Whole periods that elapsed without a tick because the loop ran late.
    pub missed_periods: u32,
}

/// One fixed-interval timer and the frames it owns.
#[derive(Debug, Clone)]
pub struct TxTimer {
    interval_ms: u32,
    next_due_ms: u64,
    frames: Vec<FrameId, MAX_FRAMES_PER_TIMER>,
    fire_count: u32,
}

impl TxTimer {
    pub fn new(interval_ms: u32) -> Self {
        Self {
            interval_ms,
            next_due_ms: u64::from(interval_ms),
            frames: Vec::new(),
            fire_count: 0,
        }
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub fn next_due_ms(&self) -> u64 {
        self.next_due_ms
    }

    pub fn frames(&self) -> &[FrameId] {
        &self.frames
    }

    pub fn fire_count(&self) -> u32 {
        self.fire_count
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_due_ms
    }

    fn arm(&mut self, now_ms: u64) {
        self.next_due_ms = now_ms + u64::from(self.interval_ms);
    }

    /// Advance past `now_ms` by whole intervals. Returns the number of
    /// periods skipped beyond the one being served.
    fn rearm(&mut self, now_ms: u64) -> u32 {
        let interval = u64::from(self.interval_ms);
        let late_by = now_ms - self.next_due_ms;
        let skipped = late_by / interval;
        self.next_due_ms += (skipped + 1) * interval;
        self.fire_count = self.fire_count.wrapping_add(1);
        skipped as u32
    }
}

/// Multi-rate transmission scheduler.
///
/// Timers are polled with the current time. A due timer sends every frame it
/// owns whose subsystem gate is open, reading the live frame table at that
/// moment. A late timer fires once and does not replay missed periods.
#[derive(Debug, Clone)]
pub struct TxScheduler {
    timers: Vec<TxTimer, MAX_TIMERS>,
    stats: SchedulerStats,
}

impl TxScheduler {
    pub fn new() -> Self {
        Self {
            timers: Vec::new(),
            stats: SchedulerStats::default(),
        }
    }

    /// One timer per distinct interval in the frame table.
    pub fn from_frame_specs() -> Result<Self, SchedulerError> {
        let mut scheduler = Self::new();
        for spec in FRAME_SPECS.iter() {
            scheduler.add_frame(spec.id, spec.interval_ms)?;
        }
        Ok(scheduler)
    }

    /// Attach `frame` to the timer for `interval_ms`, creating it if needed.
    pub fn add_frame(&mut self, frame: FrameId, interval_ms: u32) -> Result<(), SchedulerError> {
        if interval_ms == 0 {
            return Err(SchedulerError::ZeroInterval);
        }

        let index = match self.timers.iter().position(|t| t.interval_ms == interval_ms) {
            Some(index) => index,
            None => {
                self.timers
                    .push(TxTimer::new(interval_ms))
                    .map_err(|_| SchedulerError::TooManyTimers(interval_ms))?;
                // fastest timers are served first
                self.timers.sort_unstable_by_key(|t| t.interval_ms);
                self.timers
                    .iter()
                    .position(|t| t.interval_ms == interval_ms)
                    .ok_or(SchedulerError::TooManyTimers(interval_ms))?
            }
        };

        let timer = &mut self.timers[index];
        if !timer.frames.contains(&frame) {
            timer
                .frames
                .push(frame)
                .map_err(|_| SchedulerError::TimerFull(interval_ms))?;
        }
        Ok(())
    }

    /// Arm every timer relative to `now_ms`.
    pub fn start(&mut self, now_ms: u64) {
        for timer in self.timers.iter_mut() {
            timer.arm(now_ms);
        }
    }

    pub fn poll<T: Transport>(
        &mut self,
        now_ms: u64,
        frames: &FrameTable,
        gate: &SubsystemGate,
        transport: &mut T,
    ) -> TickReport {
        let mut report = TickReport::default();

        for timer in self.timers.iter_mut() {
            if !timer.is_due(now_ms) {
                continue;
            }

            let skipped = timer.rearm(now_ms);
            self.stats.missed_periods = self.stats.missed_periods.saturating_add(skipped);
            self.stats.total_ticks = self.stats.total_ticks.saturating_add(1);
            report.timers_fired = report.timers_fired.saturating_add(1);
            trace!(interval_ms = timer.interval_ms, now_ms, skipped, "timer fired");

            for &id in timer.frames.iter() {
                let frame = frames.read(id);
                if !gate.is_enabled(frame) {
                    let _ = report.gated.push(id);
                    self.stats.frames_gated = self.stats.frames_gated.saturating_add(1);
                    continue;
                }

                match transport.send(frame) {
                    Ok(()) => {
                        let _ = report.sent.push(id);
                        self.stats.frames_sent = self.stats.frames_sent.saturating_add(1);
                    }
                    Err(e) => {
                        let error = match e {
                            nb::Error::WouldBlock => None,
                            nb::Error::Other(err) => Some(err),
                        };
                        debug!(frame = %id, ?error, "send failed");
                        let _ = report.failures.push(SendFailure { frame: id, error });
                        self.stats.send_failures = self.stats.send_failures.saturating_add(1);
                    }
                }
            }
        }

        report
    }

    /// Earliest time at which any timer becomes due.
    pub fn next_due_ms(&self) -> Option<u64> {
        self.timers.iter().map(TxTimer::next_due_ms).min()
    }

    pub fn timers(&self) -> &[TxTimer] {
        &self.timers
    }

    pub fn interval_of(&self, frame: FrameId) -> Option<u32> {
        self.timers
            .iter()
            .find(|t| t.frames.contains(&frame))
            .map(TxTimer::interval_ms)
    }

    pub fn get_stats(&self) -> &SchedulerStats {
        &self.stats
    }
}

impl Default for TxScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingTransport;

    fn started_scheduler() -> TxScheduler {
        let mut scheduler = TxScheduler::from_frame_specs().unwrap();
        scheduler.start(0);
        scheduler
    }

    #[test]
    fn test_scheduler_creation() {
        let scheduler = TxScheduler::from_frame_specs().unwrap();
        let intervals: std::vec::Vec<u32> =
            scheduler.timers().iter().map(TxTimer::interval_ms).collect();
        assert_eq!(intervals, vec![50, 100, 200, 500, 1000]);
        assert_eq!(scheduler.timers()[0].frames(), &[FrameId::EngineSpeed]);
        assert_eq!(
            scheduler.timers()[1].frames(),
            &[FrameId::BodyStatus, FrameId::RadioRemote]
        );
        assert_eq!(scheduler.interval_of(FrameId::TripComputer), Some(1000));
    }

    #[test]
    fn test_nothing_due_before_first_interval() {
        let mut scheduler = started_scheduler();
        let mut transport = RecordingTransport::new();
        let report = scheduler.poll(49, &FrameTable::new(), &SubsystemGate::new(), &mut transport);
        assert!(report.is_idle());
        assert!(transport.sent().is_empty());
        assert_eq!(scheduler.next_due_ms(), Some(50));
    }

    #[test]
    fn test_due_timer_sends_its_frames() {
        let mut scheduler = started_scheduler();
        let mut transport = RecordingTransport::new();
        let frames = FrameTable::new();
        let gate = SubsystemGate::new();

        let report = scheduler.poll(50, &frames, &gate, &mut transport);
        assert_eq!(report.timers_fired, 1);
        assert_eq!(report.sent.as_slice(), &[FrameId::EngineSpeed]);

        // same due time polled again: nothing new
        let report = scheduler.poll(50, &frames, &gate, &mut transport);
        assert!(report.is_idle());
        assert_eq!(transport.count(FrameId::EngineSpeed), 1);
    }

    #[test]
    fn test_late_tick_does_not_catch_up() {
        let mut scheduler = started_scheduler();
        let mut transport = RecordingTransport::new();
        let frames = FrameTable::new();
        let gate = SubsystemGate::new();

        // 50 ms timer skips 3 periods, 100 ms timer skips 1
        scheduler.poll(230, &frames, &gate, &mut transport);
        assert_eq!(transport.count(FrameId::EngineSpeed), 1);
        assert_eq!(scheduler.get_stats().missed_periods, 4);
        // phase is kept: next due at 250
        assert_eq!(scheduler.timers()[0].next_due_ms(), 250);

        scheduler.poll(249, &frames, &gate, &mut transport);
        assert_eq!(transport.count(FrameId::EngineSpeed), 1);
        scheduler.poll(250, &frames, &gate, &mut transport);
        assert_eq!(transport.count(FrameId::EngineSpeed), 2);
    }

    #[test]
    fn test_gated_frames_are_reported() {
        let mut scheduler = started_scheduler();
        let mut transport = RecordingTransport::new();
        let report = scheduler.poll(100, &FrameTable::new(), &SubsystemGate::new(), &mut transport);

        // 0x21F has no owning group
        assert!(report.gated.contains(&FrameId::RadioRemote));
        assert!(report.sent.contains(&FrameId::BodyStatus));
        assert_eq!(transport.count(FrameId::RadioRemote), 0);
    }

    #[test]
    fn test_add_frame_rejects_zero_interval() {
        let mut scheduler = TxScheduler::new();
        assert_eq!(
            scheduler.add_frame(FrameId::Doors, 0),
            Err(SchedulerError::ZeroInterval)
        );
        scheduler.add_frame(FrameId::Doors, 20).unwrap();
        scheduler.add_frame(FrameId::Doors, 20).unwrap();
        assert_eq!(scheduler.timers()[0].frames().len(), 1);
    }
}
