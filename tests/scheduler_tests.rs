use carbus::frames::{FrameId, FrameTable, FRAME_SPECS};
use carbus::gate::{GroupSet, SubsystemGate, SubsystemGroup};
use carbus::scheduler::TxScheduler;
use carbus::signals::{SignalId, SignalRegistry, SignalValue};
use carbus::transport::{RecordingTransport, TransportError};

fn started() -> (TxScheduler, FrameTable, RecordingTransport) {
    let mut scheduler = TxScheduler::from_frame_specs().unwrap();
    scheduler.start(0);
    (scheduler, FrameTable::new(), RecordingTransport::new())
}

/// Poll every millisecond up to and including `until_ms`.
fn run(
    scheduler: &mut TxScheduler,
    frames: &FrameTable,
    gate: &SubsystemGate,
    transport: &mut RecordingTransport,
    until_ms: u64,
) {
    for now in 0..=until_ms {
        scheduler.poll(now, frames, gate, transport);
    }
}

#[test]
fn test_each_frame_sent_at_its_interval() {
    let (mut scheduler, frames, mut transport) = started();
    run(&mut scheduler, &frames, &SubsystemGate::new(), &mut transport, 1000);

    for spec in FRAME_SPECS.iter().filter(|s| !s.groups.is_empty()) {
        let expected = (1000 / spec.interval_ms) as usize;
        assert_eq!(
            transport.count(spec.id),
            expected,
            "frame {} at {} ms",
            spec.id,
            spec.interval_ms
        );
    }
}

#[test]
fn test_frame_without_group_is_never_sent() {
    let (mut scheduler, frames, mut transport) = started();
    run(&mut scheduler, &frames, &SubsystemGate::new(), &mut transport, 2000);
    assert_eq!(transport.count(FrameId::RadioRemote), 0);
}

#[test]
fn test_gate_or_across_owning_groups() {
    let (mut scheduler, frames, mut transport) = started();
    let gate = SubsystemGate::from_enabled(GroupSet::EMPTY.with(SubsystemGroup::Lighting));

    // 0x128 is owned by dashboard and lighting, 0x0B6 by dashboard only
    run(&mut scheduler, &frames, &gate, &mut transport, 200);
    assert_eq!(transport.count(FrameId::DashboardLights), 1);
    assert_eq!(transport.count(FrameId::EngineSpeed), 0);
}

#[test]
fn test_single_group_reenables_frame() {
    let (mut scheduler, frames, mut transport) = started();
    let mut gate = SubsystemGate::from_enabled(GroupSet::EMPTY);

    run(&mut scheduler, &frames, &gate, &mut transport, 500);
    assert!(transport.sent().is_empty());

    gate.set_enabled(SubsystemGroup::Climate, true);
    for now in 501..=1000 {
        scheduler.poll(now, &frames, &gate, &mut transport);
    }
    assert_eq!(transport.count(FrameId::Climate), 1);
    assert_eq!(transport.sent().len(), 1);
}

#[test]
fn test_no_double_send_for_one_due_time() {
    let (mut scheduler, frames, mut transport) = started();
    let gate = SubsystemGate::new();

    for _ in 0..5 {
        scheduler.poll(100, &frames, &gate, &mut transport);
    }
    assert_eq!(transport.count(FrameId::BodyStatus), 1);
    assert_eq!(transport.count(FrameId::EngineSpeed), 1);
}

#[test]
fn test_stall_does_not_burst() {
    let (mut scheduler, frames, mut transport) = started();
    let gate = SubsystemGate::new();

    scheduler.poll(1000, &frames, &gate, &mut transport);

    // one send per frame for the whole stalled second
    assert_eq!(transport.count(FrameId::EngineSpeed), 1);
    assert_eq!(transport.count(FrameId::BodyStatus), 1);
    assert_eq!(transport.count(FrameId::TripComputer), 1);
    assert!(scheduler.get_stats().missed_periods > 0);
}

#[test]
fn test_failed_send_retried_on_next_tick() {
    let (mut scheduler, frames, mut transport) = started();
    let gate = SubsystemGate::new();

    transport.fail_with(Some(TransportError::BusOffline));
    let report = scheduler.poll(50, &frames, &gate, &mut transport);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].frame, FrameId::EngineSpeed);
    assert_eq!(report.failures[0].error, Some(TransportError::BusOffline));

    transport.fail_with(None);
    // no immediate retry
    let report = scheduler.poll(51, &frames, &gate, &mut transport);
    assert!(report.is_idle());

    let report = scheduler.poll(100, &frames, &gate, &mut transport);
    assert!(report.sent.contains(&FrameId::EngineSpeed));
    assert_eq!(scheduler.get_stats().send_failures, 1);
}

#[test]
fn test_busy_transport_counts_as_failure() {
    let (mut scheduler, frames, mut transport) = started();
    transport.set_busy(true);

    let report = scheduler.poll(50, &frames, &SubsystemGate::new(), &mut transport);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].error, None);
}

#[test]
fn test_tick_reads_live_frame_bytes() {
    let (mut scheduler, mut frames, mut transport) = started();
    let gate = SubsystemGate::new();
    let mut signals = SignalRegistry::new();

    scheduler.poll(100, &frames, &gate, &mut transport);
    assert_eq!(transport.last(FrameId::BodyStatus).unwrap().data[4], 0x92);

    signals.set(SignalId::Ignition, SignalValue::Bool(true), &mut frames).unwrap();
    scheduler.poll(200, &frames, &gate, &mut transport);
    assert_eq!(transport.last(FrameId::BodyStatus).unwrap().data[4], 0x91);
}

#[test]
fn test_transmitted_length_matches_table() {
    let (mut scheduler, frames, mut transport) = started();
    run(&mut scheduler, &frames, &SubsystemGate::new(), &mut transport, 1000);

    for record in transport.sent() {
        let id = record.frame_id().unwrap();
        assert_eq!(record.data.len(), id.spec().length);
    }
}
