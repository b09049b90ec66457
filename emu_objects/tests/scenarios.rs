//! End-to-end scenarios: the full threaded runtime driving the real
//! object models. Timings are scaled so every scenario settles within a
//! couple of wall-clock seconds, with tolerance-based assertions.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use emu_common::command::{CommandArgs, CommandId, Direction, StepperCommand};
use emu_common::events::{Event, EventKind, EventPayload};
use emu_common::klass::Klass;
use emu_common::object::ObjectId;
use emu_common::state::ObjectState;
use emu_core::{Runtime, RuntimeConfig};
use emu_objects::register_builtin_klasses;
use parking_lot::Mutex;

const TICK_HZ: u64 = 1_000_000;

fn runtime() -> Runtime {
    let rt = Runtime::new(RuntimeConfig::default());
    register_builtin_klasses(&rt);
    rt
}

fn completion_channel() -> (
    impl Fn(CommandId, i32) + Send + Sync + 'static,
    mpsc::Receiver<(u64, i32)>,
) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    (
        move |id: CommandId, result: i32| {
            let _ = tx.lock().send((id.raw(), result));
        },
        rx,
    )
}

fn wait_completion(rx: &mpsc::Receiver<(u64, i32)>, id: CommandId, timeout: Duration) -> i32 {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or_else(|| panic!("timed out waiting for {id}"));
        let (got, result) = rx.recv_timeout(remaining).expect("completion channel");
        if got == id.raw() {
            return result;
        }
    }
}

fn collect_events(rt: &Runtime, klass: Klass, kind: EventKind) -> Arc<Mutex<Vec<Event>>> {
    let store: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&store);
    rt.event_register(klass, kind, None, move |ev| {
        sink.lock().push(*ev);
    })
    .unwrap();
    store
}

fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    pred()
}

#[test]
fn enable_then_move_completes_with_exact_steps() {
    let rt = runtime();
    let stepper = rt
        .create_object(
            Klass::Stepper,
            "s1",
            br#"{"steps_per_rotation": 200, "microsteps": 16, "start_speed": 8000.0}"#,
        )
        .unwrap();
    rt.init_objects().unwrap();

    let moves = collect_events(&rt, Klass::Stepper, EventKind::StepperMoveComplete);
    let (cb, rx) = completion_channel();
    rt.start(TICK_HZ, cb).unwrap();

    let enable = rt
        .submit(stepper, CommandArgs::Stepper(StepperCommand::Enable(true)))
        .unwrap();
    assert_eq!(wait_completion(&rx, enable, Duration::from_secs(1)), 0);

    let accel = rt
        .submit(
            stepper,
            CommandArgs::Stepper(StepperCommand::SetAccel {
                accel: 160_000.0,
                decel: Some(160_000.0),
            }),
        )
        .unwrap();
    assert_eq!(wait_completion(&rx, accel, Duration::from_secs(1)), 0);

    // 0.05 s accel + 0.15 s cruise + 0.05 s decel ≈ 0.25 s.
    let started = Instant::now();
    let mv = rt
        .submit(
            stepper,
            CommandArgs::Stepper(StepperCommand::Move {
                direction: Direction::Forward,
                steps: 1600,
            }),
        )
        .unwrap();
    assert_eq!(wait_completion(&rx, mv, Duration::from_secs(5)), 0);
    let elapsed = started.elapsed().as_secs_f64();
    assert!(
        (0.15..1.0).contains(&elapsed),
        "move finished in {elapsed} s, expected ≈0.25 s"
    );

    let Some(ObjectState::Stepper(snap)) = rt.get_status(&[stepper])[0] else {
        panic!("missing stepper snapshot");
    };
    assert_eq!(snap.current_step, 1600);
    assert!(!snap.moving);

    assert!(wait_until(Duration::from_secs(1), || !moves.lock().is_empty()));
    let moves = moves.lock();
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].payload, EventPayload::Steps(1600));
    rt.stop();
}

#[test]
fn homing_drives_axis_to_endstop_exactly_once() {
    let rt = runtime();
    let stepper = rt
        .create_object(Klass::Stepper, "sx", br#"{"start_speed": 20000.0}"#)
        .unwrap();
    let axis = rt
        .create_object(
            Klass::Axis,
            "x",
            br#"{
                "type": "X",
                "length": 200.0,
                "travel_per_step": 0.01,
                "steppers": ["sx"],
                "endstop": "es_x",
                "start_position": 50.0
            }"#,
        )
        .unwrap();
    rt.create_object(Klass::Endstop, "es_x", br#"{"axis": "x", "kind": "min"}"#)
        .unwrap();
    rt.init_objects().unwrap();

    let triggers = collect_events(&rt, Klass::Endstop, EventKind::EndstopTrigger);
    let homed = collect_events(&rt, Klass::Axis, EventKind::AxisHomed);
    let (cb, rx) = completion_channel();
    rt.start(TICK_HZ, cb).unwrap();

    let enable = rt
        .submit(stepper, CommandArgs::Stepper(StepperCommand::Enable(true)))
        .unwrap();
    wait_completion(&rx, enable, Duration::from_secs(1));

    // 60 mm of travel against a 50 mm runway: the axis clamps at 0.
    let mv = rt
        .submit(
            stepper,
            CommandArgs::Stepper(StepperCommand::Move {
                direction: Direction::Backward,
                steps: 6000,
            }),
        )
        .unwrap();
    assert_eq!(wait_completion(&rx, mv, Duration::from_secs(5)), 0);

    assert!(wait_until(Duration::from_secs(2), || {
        !homed.lock().is_empty()
    }));

    let Some(ObjectState::Axis(snap)) = rt.get_status(&[axis])[0] else {
        panic!("missing axis snapshot");
    };
    assert_eq!(snap.position, 0.0);
    assert!(snap.homed);

    // Let a few more updates run: no re-trigger while parked on the switch.
    std::thread::sleep(Duration::from_millis(100));
    rt.stop();

    let triggers = triggers.lock();
    let rising: Vec<&Event> = triggers
        .iter()
        .filter(|e| e.payload == EventPayload::Level(true))
        .collect();
    assert_eq!(rising.len(), 1, "endstop fired {} times", rising.len());
    assert_eq!(homed.lock().len(), 1);
}

#[test]
fn toolhead_emits_origin_once_per_transit() {
    let rt = runtime();
    for (axis, stepper) in [("x", "tx"), ("y", "ty"), ("z", "tz")] {
        rt.create_object(Klass::Stepper, stepper, br#"{"start_speed": 20000.0}"#)
            .unwrap();
        let start = if axis == "x" { 10.0 } else { 0.0 };
        let blob = format!(
            r#"{{
                "type": "{}",
                "length": 200.0,
                "travel_per_step": 0.01,
                "steppers": ["{}"],
                "start_position": {}
            }}"#,
            axis.to_uppercase(),
            stepper,
            start
        );
        rt.create_object(Klass::Axis, axis, blob.as_bytes()).unwrap();
    }
    let toolhead = rt.create_object(Klass::Toolhead, "th", b"{}").unwrap();
    rt.init_objects().unwrap();

    let origins = collect_events(&rt, Klass::Toolhead, EventKind::ToolheadOrigin);
    let (cb, rx) = completion_channel();
    rt.start(TICK_HZ, cb).unwrap();

    let sx = rt.lookup(Klass::Stepper, "tx").unwrap();
    let enable = rt
        .submit(sx, CommandArgs::Stepper(StepperCommand::Enable(true)))
        .unwrap();
    wait_completion(&rx, enable, Duration::from_secs(1));

    // X: 10 mm → 0. All axes at origin → exactly one event.
    let mv = rt
        .submit(
            sx,
            CommandArgs::Stepper(StepperCommand::Move {
                direction: Direction::Backward,
                steps: 1000,
            }),
        )
        .unwrap();
    wait_completion(&rx, mv, Duration::from_secs(5));
    assert!(wait_until(Duration::from_secs(2), || {
        !origins.lock().is_empty()
    }));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(origins.lock().len(), 1);

    // Away and back: exactly one more.
    let away = rt
        .submit(
            sx,
            CommandArgs::Stepper(StepperCommand::Move {
                direction: Direction::Forward,
                steps: 500,
            }),
        )
        .unwrap();
    wait_completion(&rx, away, Duration::from_secs(5));
    let back = rt
        .submit(
            sx,
            CommandArgs::Stepper(StepperCommand::Move {
                direction: Direction::Backward,
                steps: 500,
            }),
        )
        .unwrap();
    wait_completion(&rx, back, Duration::from_secs(5));
    assert!(wait_until(Duration::from_secs(2), || {
        origins.lock().len() >= 2
    }));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(origins.lock().len(), 2);

    let Some(ObjectState::Toolhead(snap)) = rt.get_status(&[toolhead])[0] else {
        panic!("missing toolhead snapshot");
    };
    assert!(snap.at_origin);
    rt.stop();
}

#[test]
fn corexy_x_move_drives_both_motors() {
    let rt = runtime();
    for (axis, stepper, ty) in [("a", "ma", "X"), ("b", "mb", "Y")] {
        rt.create_object(Klass::Stepper, stepper, br#"{"start_speed": 20000.0}"#)
            .unwrap();
        let blob = format!(
            r#"{{
                "type": "{ty}",
                "length": 300.0,
                "travel_per_step": 0.01,
                "steppers": ["{stepper}"]
            }}"#
        );
        rt.create_object(Klass::Axis, axis, blob.as_bytes()).unwrap();
    }
    let toolhead = rt
        .create_object(Klass::Toolhead, "th", br#"{"kinematics": {"type": "core_xy"}}"#)
        .unwrap();
    rt.init_objects().unwrap();

    let (cb, rx) = completion_channel();
    rt.start(TICK_HZ, cb).unwrap();

    // A +10 mm cartesian X move on CoreXY: both motors advance 10 mm of
    // step-equivalent.
    for name in ["ma", "mb"] {
        let motor = rt.lookup(Klass::Stepper, name).unwrap();
        let enable = rt
            .submit(motor, CommandArgs::Stepper(StepperCommand::Enable(true)))
            .unwrap();
        wait_completion(&rx, enable, Duration::from_secs(1));
        let mv = rt
            .submit(
                motor,
                CommandArgs::Stepper(StepperCommand::Move {
                    direction: Direction::Forward,
                    steps: 1000,
                }),
            )
            .unwrap();
        wait_completion(&rx, mv, Duration::from_secs(5));
    }

    assert!(wait_until(Duration::from_secs(2), || {
        matches!(
            rt.get_status(&[toolhead])[0],
            Some(ObjectState::Toolhead(snap)) if (snap.position.x - 10.0).abs() < 0.05
        )
    }));
    let Some(ObjectState::Toolhead(snap)) = rt.get_status(&[toolhead])[0] else {
        panic!("missing toolhead snapshot");
    };
    assert!((snap.position.x - 10.0).abs() < 0.05, "x = {}", snap.position.x);
    assert!(snap.position.y.abs() < 0.05, "y = {}", snap.position.y);
    rt.stop();
}

#[test]
fn thermistor_tracks_heater_through_the_runtime() {
    let rt = runtime();
    rt.create_object(
        Klass::Heater,
        "bed",
        br#"{
            "layers": [
                {"role": "heater", "size": [40.0, 40.0, 1.0], "material": "silicone", "power": 60.0},
                {"role": "body", "size": [40.0, 40.0, 3.0], "material": "aluminum"}
            ]
        }"#,
    )
    .unwrap();
    let thermistor = rt
        .create_object(Klass::Thermistor, "t0", br#"{"heater": "bed"}"#)
        .unwrap();
    rt.init_objects().unwrap();

    let (cb, _rx) = completion_channel();
    rt.start(TICK_HZ, cb).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    rt.stop();

    let Some(ObjectState::Thermistor(snap)) = rt.get_status(&[thermistor])[0] else {
        panic!("missing thermistor snapshot");
    };
    // Idle heater sits at ambient; nominal beta resistance.
    assert!((snap.temperature - 25.0).abs() < 0.5);
    assert!((snap.resistance - 100_000.0).abs() < 2_000.0);
}
