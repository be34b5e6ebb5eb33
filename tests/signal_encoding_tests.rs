use carbus::encoder::{validate_bindings, CLUSTER_LIGHTING, DOOR_STATUS};
use carbus::frames::{FrameId, FrameTable};
use carbus::signals::{SignalError, SignalId, SignalRegistry, SignalValue};

fn setup() -> (SignalRegistry, FrameTable) {
    let mut frames = FrameTable::new();
    frames.initialize();
    (SignalRegistry::new(), frames)
}

fn byte(frames: &FrameTable, id: FrameId, offset: usize) -> u8 {
    frames.read(id).data()[offset]
}

#[test]
fn test_ignition_sets_both_sentinels() {
    let (mut signals, mut frames) = setup();

    signals.set(SignalId::Ignition, SignalValue::Bool(true), &mut frames).unwrap();
    assert_eq!(byte(&frames, FrameId::BodyStatus, 4), 0x91);
    assert_eq!(byte(&frames, FrameId::Temperatures, 0), 0x8E);

    signals.set(SignalId::Ignition, SignalValue::Bool(false), &mut frames).unwrap();
    assert_eq!(byte(&frames, FrameId::BodyStatus, 4), 0x92);
    assert_eq!(byte(&frames, FrameId::Temperatures, 0), 0x86);
}

#[test]
fn test_outdoor_temperature_range_ends() {
    let (mut signals, mut frames) = setup();

    signals.set(SignalId::OutdoorTemp, SignalValue::Int(-40), &mut frames).unwrap();
    assert_eq!(byte(&frames, FrameId::Temperatures, 6), 0);

    signals.set(SignalId::OutdoorTemp, SignalValue::Int(85), &mut frames).unwrap();
    assert_eq!(byte(&frames, FrameId::Temperatures, 6), 250);
}

#[test]
fn test_out_of_range_input_is_clamped() {
    let (mut signals, mut frames) = setup();

    let stored = signals
        .set(SignalId::OutdoorTemp, SignalValue::Int(-100), &mut frames)
        .unwrap();
    assert_eq!(stored, SignalValue::Int(-40));
    assert_eq!(signals.get(SignalId::OutdoorTemp), SignalValue::Int(-40));
    assert_eq!(byte(&frames, FrameId::Temperatures, 6), 0);

    let stored = signals
        .set(SignalId::CoolantTemp, SignalValue::Int(500), &mut frames)
        .unwrap();
    assert_eq!(stored, SignalValue::Int(120));
    assert_eq!(byte(&frames, FrameId::Temperatures, 1), 159);
}

#[test]
fn test_rpm_big_endian_shifted() {
    let (mut signals, mut frames) = setup();

    signals.set(SignalId::Rpm, SignalValue::Int(8000), &mut frames).unwrap();
    assert_eq!(byte(&frames, FrameId::EngineSpeed, 0), 0xFA);
    assert_eq!(byte(&frames, FrameId::EngineSpeed, 1), 0x00);

    // snapped to the 100 rpm grid: 800 << 3 = 0x1900
    let stored = signals.set(SignalId::Rpm, SignalValue::Int(830), &mut frames).unwrap();
    assert_eq!(stored, SignalValue::Int(800));
    assert_eq!(byte(&frames, FrameId::EngineSpeed, 0), 0x19);
    assert_eq!(byte(&frames, FrameId::EngineSpeed, 1), 0x00);
}

#[test]
fn test_vehicle_speed_does_not_touch_rpm_bytes() {
    let (mut signals, mut frames) = setup();

    signals.set(SignalId::Rpm, SignalValue::Int(8000), &mut frames).unwrap();
    signals.set(SignalId::VehicleSpeed, SignalValue::Int(120), &mut frames).unwrap();

    // 120 * 100 = 12000 = 0x2EE0
    assert_eq!(&frames.read(FrameId::EngineSpeed).data()[..4], &[0xFA, 0x00, 0x2E, 0xE0]);
}

#[test]
fn test_brightness_writes_low_nibbles_only() {
    let (mut signals, mut frames) = setup();
    let cluster_before = byte(&frames, FrameId::BodyStatus, 3);
    let dashboard_before = byte(&frames, FrameId::DashboardLights, 7);

    signals.set(SignalId::Brightness, SignalValue::Int(15), &mut frames).unwrap();

    let cluster = byte(&frames, FrameId::BodyStatus, 3);
    let dashboard = byte(&frames, FrameId::DashboardLights, 7);
    assert_eq!(cluster & 0x0F, 0x0F);
    assert_eq!(dashboard & 0x0F, 0x0F);
    assert_eq!(cluster & 0xF0, cluster_before & 0xF0);
    assert_eq!(dashboard & 0xF0, dashboard_before & 0xF0);
}

#[test]
fn test_shared_byte_fields_are_independent() {
    let (mut signals, mut frames) = setup();

    signals.set(SignalId::Brightness, SignalValue::Int(3), &mut frames).unwrap();
    signals.set(SignalId::DashboardLighting, SignalValue::Bool(false), &mut frames).unwrap();
    assert_eq!(byte(&frames, FrameId::BodyStatus, 3), 0x03);

    signals.set(SignalId::DashboardLighting, SignalValue::Bool(true), &mut frames).unwrap();
    assert_eq!(byte(&frames, FrameId::BodyStatus, 3), 0x23);

    signals.set(SignalId::Brightness, SignalValue::Int(0), &mut frames).unwrap();
    assert_eq!(byte(&frames, FrameId::BodyStatus, 3), 0x20);
}

#[test]
fn test_door_bits_never_disturb_neighbours() {
    let (mut signals, mut frames) = setup();
    let doors = [
        (SignalId::DoorFrontLeft, 0x80),
        (SignalId::DoorFrontRight, 0x40),
        (SignalId::DoorRearLeft, 0x20),
        (SignalId::DoorRearRight, 0x10),
        (SignalId::Trunk, 0x08),
    ];

    let mut expected = 0u8;
    for (signal, bit) in doors {
        signals.set(signal, SignalValue::Bool(true), &mut frames).unwrap();
        expected |= bit;
        assert_eq!(byte(&frames, FrameId::Doors, 0), expected);
    }

    signals.set(SignalId::DoorRearLeft, SignalValue::Bool(false), &mut frames).unwrap();
    assert_eq!(byte(&frames, FrameId::Doors, 0), 0xD8);
}

#[test]
fn test_frame_length_never_changes() {
    let (mut signals, mut frames) = setup();
    let lengths: Vec<usize> = frames.iter().map(|f| f.len()).collect();

    for id in SignalId::ALL {
        let value = match signals.get(id) {
            SignalValue::Bool(b) => SignalValue::Bool(!b),
            _ => SignalValue::Int(i32::MAX),
        };
        signals.set(id, value, &mut frames).unwrap();
    }

    let after: Vec<usize> = frames.iter().map(|f| f.len()).collect();
    assert_eq!(lengths, after);
}

#[test]
fn test_wrong_value_type_rejected_without_side_effects() {
    let (mut signals, mut frames) = setup();
    let before = frames.read(FrameId::BodyStatus).clone();

    let err = signals
        .set(SignalId::Ignition, SignalValue::Int(1), &mut frames)
        .unwrap_err();
    assert!(matches!(err, SignalError::TypeMismatch { .. }));
    assert_eq!(frames.read(FrameId::BodyStatus), &before);

    let err = signals
        .set(SignalId::Rpm, SignalValue::Fixed(f32::NAN), &mut frames)
        .unwrap_err();
    assert_eq!(err, SignalError::NotFinite(SignalId::Rpm));
}

#[test]
fn test_binding_table_is_consistent() {
    assert!(validate_bindings().is_ok());
    assert!(CLUSTER_LIGHTING.masks_disjoint());
    assert!(DOOR_STATUS.masks_disjoint());
}
