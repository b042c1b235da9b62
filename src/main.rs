use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use drivetrain_core::bus::{MotorBus, SerialBus, SimBus};
use drivetrain_core::config::DrivetrainConfig;
use drivetrain_core::drivetrain::{ControlMode, DrivetrainController, ShiftOutcome};
use drivetrain_core::messages::DriveCommand;
use drivetrain_core::runtime;
use drivetrain_core::Result;

/// Drive the drivetrain core from the command line
#[derive(Debug, Parser)]
#[command(name = "drivetrain", version)]
struct Cli {
    /// JSON config file (defaults to the reference layout)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Flat JSON object of gain overrides, e.g. {"left.kP": 0.4}
    #[arg(long)]
    gains: Option<PathBuf>,

    /// Run against simulated controllers instead of the serial bus
    #[arg(long)]
    sim: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print mode, gear and leader feedback as JSON
    Status,
    /// Command both leaders in the given mode
    Drive {
        #[arg(long, allow_negative_numbers = true)]
        left: f64,
        #[arg(long, allow_negative_numbers = true)]
        right: f64,
        #[arg(long, value_enum, default_value_t = Mode::Raw)]
        mode: Mode,
        /// Keep re-issuing the command for this long, then disable
        #[arg(long)]
        hold_ms: Option<u64>,
    },
    /// Drive from raw operator axes through the drive profile
    Tank {
        #[arg(long, allow_negative_numbers = true)]
        left_axis: f64,
        #[arg(long, allow_negative_numbers = true)]
        right_axis: f64,
    },
    Disable,
    /// Zero both leaders' position reference
    Reset,
    Shift {
        #[arg(value_enum)]
        gear: Gear,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Disabled,
    Raw,
    Velocity,
    Position,
}

impl From<Mode> for ControlMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Disabled => ControlMode::Disabled,
            Mode::Raw => ControlMode::RawPower,
            Mode::Velocity => ControlMode::ClosedLoopVelocity,
            Mode::Position => ControlMode::ClosedLoopPosition,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Gear {
    Up,
    Down,
}

fn main() {
    // Set RUST_LOG=debug to see every bus write
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(
            "info".parse().expect("static directive parses"),
        ))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Drivetrain error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => DrivetrainConfig::from_file(path)?,
        None => DrivetrainConfig::default(),
    };
    if let Some(path) = &cli.gains {
        config.load_gain_overrides(path)?;
    }

    let bus: Box<dyn MotorBus> = if cli.sim {
        info!("Using simulated bus");
        Box::new(SimBus::for_drivetrain(
            &config.left_ids,
            &config.right_ids,
            config.shifter_id,
        ))
    } else {
        info!("Opening motor bus on {}", config.bus.port);
        Box::new(SerialBus::open_with(
            &config.bus.port,
            config.bus.baudrate,
            config.bus.timeout(),
        )?)
    };

    let mut controller = DrivetrainController::new(&config, bus)?;

    match cli.command {
        Command::Status => {
            let status = controller.status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Drive {
            left,
            right,
            mode,
            hold_ms,
        } => {
            let cmd = DriveCommand::new(left, right, mode.into());
            match hold_ms {
                Some(ms) => {
                    runtime::hold(
                        &mut controller,
                        &cmd,
                        Duration::from_millis(ms),
                        config.loop_period(),
                    )?;
                }
                None => controller.drive_command(&cmd)?,
            }
        }
        Command::Tank {
            left_axis,
            right_axis,
        } => controller.tank_drive(left_axis, right_axis)?,
        Command::Disable => controller.disable()?,
        Command::Reset => controller.reset_position()?,
        Command::Shift { gear } => {
            let outcome = match gear {
                Gear::Up => controller.shift_up()?,
                Gear::Down => controller.shift_down()?,
            };
            match outcome {
                ShiftOutcome::Shifted => println!("Shifted to {:?}", controller.shift_state()),
                ShiftOutcome::AlreadyEngaged => {
                    println!("Already in {:?}", controller.shift_state())
                }
            }
        }
    }

    Ok(())
}
