//! # EMU Demo Runner
//!
//! Loads a machine description, builds the emulator runtime, subscribes
//! to every event type, and runs for a bounded wall-clock span while
//! logging completions, events and final object states.
//!
//! # Usage
//!
//! ```bash
//! # Run the bundled machine for five seconds
//! emu --config machine.toml
//!
//! # Exercise the steppers while running
//! emu -c machine.toml --demo -v
//! ```

mod machine;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use emu_common::command::{CommandArgs, Direction, StepperCommand};
use emu_common::events::EventKind;
use emu_common::klass::Klass;
use emu_core::Runtime;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// EMU - GCode machine hardware emulator
#[derive(Parser, Debug)]
#[command(name = "emu")]
#[command(version)]
#[command(about = "Soft-real-time emulator of a GCode machine's hardware controller")]
#[command(long_about = None)]
struct Args {
    /// Path to the machine description file
    #[arg(short, long, default_value = "machine.toml")]
    config: PathBuf,

    /// Wall-clock run duration [s]
    #[arg(short, long, default_value_t = 5)]
    duration: u64,

    /// Enable and move every stepper while running
    #[arg(long)]
    demo: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);
    if let Err(e) = run(&args) {
        error!("emulator failed: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("EMU v{} starting...", env!("CARGO_PKG_VERSION"));

    let machine = machine::load(&args.config)?;
    let runtime = Runtime::new(machine.machine.runtime_config());
    emu_objects::register_builtin_klasses(&runtime);

    let ids = machine::build(&runtime, &machine)?;
    runtime.init_objects()?;

    subscribe_events(&runtime);

    runtime.start(machine.machine.tick_frequency, |id, result| {
        info!("command {id} completed with {result}");
    })?;

    if args.demo {
        run_demo(&runtime);
    }

    std::thread::sleep(Duration::from_secs(args.duration));

    let stats = runtime.tick_stats();
    info!(
        "clock: {} ticks, {} ns runtime, jitter avg {} ns / max {} ns over {} pulses",
        runtime.get_clock_ticks(),
        runtime.get_runtime(),
        stats.avg_jitter_ns(),
        stats.max_jitter_ns,
        stats.pulses,
    );
    for (object, state) in ids.iter().zip(runtime.get_status(&ids)) {
        match state {
            Some(state) => info!("{object}: {state:?}"),
            None => info!("{object}: <no state>"),
        }
    }

    runtime.stop();
    info!("EMU shutdown complete");
    Ok(())
}

/// Log every event type from every klass.
fn subscribe_events(runtime: &Runtime) {
    let subscriptions = [
        (Klass::Stepper, EventKind::StepperMoveComplete),
        (Klass::Heater, EventKind::HeaterTempReached),
        (Klass::Endstop, EventKind::EndstopTrigger),
        (Klass::Axis, EventKind::AxisHomed),
        (Klass::Probe, EventKind::ProbeTriggered),
        (Klass::Toolhead, EventKind::ToolheadOrigin),
    ];
    for (klass, kind) in subscriptions {
        let _ = runtime.event_register(klass, kind, None, move |event| {
            info!("event {:?} from {} ({:?})", event.kind, event.origin, event.payload);
        });
    }
}

/// Enable every stepper and issue a short forward move.
fn run_demo(runtime: &Runtime) {
    for id in runtime.core_handle().list_objects(Klass::Stepper) {
        info!("demo: moving stepper {id}");
        let _ = runtime.submit(id, CommandArgs::Stepper(StepperCommand::Enable(true)));
        let _ = runtime.submit(
            id,
            CommandArgs::Stepper(StepperCommand::SetAccel {
                accel: 16_000.0,
                decel: None,
            }),
        );
        let _ = runtime.submit(
            id,
            CommandArgs::Stepper(StepperCommand::Move {
                direction: Direction::Forward,
                steps: 1600,
            }),
        );
    }
}

fn setup_tracing(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
