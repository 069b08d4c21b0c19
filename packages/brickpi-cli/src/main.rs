use std::thread::sleep;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};

use brickpi_driver::{link, BrickPi};
use brickpi_protocol::opcodes::SensorType;
use brickpi_protocol::sensor::SensorConfig;
use brickpi_protocol::values::SensorReading;

#[derive(Parser)]
#[command(version, about = "A CLI for talking to BrickPi expansion boards")]
struct Args {
    /// Serial device the boards hang off of
    #[arg(long, default_value = link::DEFAULT_PORT)]
    port: String,

    /// Baud rate of the shared line
    #[arg(long, default_value_t = link::DEFAULT_BAUD)]
    baud: u32,

    #[clap(subcommand)]
    action: Action,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum SensorKind {
    Raw,
    Touch,
    UltrasonicCont,
    UltrasonicSs,
    ColorFull,
}

impl From<SensorKind> for SensorType {
    fn from(value: SensorKind) -> Self {
        match value {
            SensorKind::Raw => SensorType::RAW,
            SensorKind::Touch => SensorType::TOUCH,
            SensorKind::UltrasonicCont => SensorType::ULTRASONIC_CONT,
            SensorKind::UltrasonicSs => SensorType::ULTRASONIC_SS,
            SensorKind::ColorFull => SensorType::COLOR_FULL,
        }
    }
}

#[derive(Subcommand)]
enum Action {
    /// Float all motors on both boards immediately
    Estop,
    /// Set the firmware communication timeout
    SetTimeout {
        /// Timeout in milliseconds
        millis: u32,
    },
    /// Configure the four sensor ports and poll readings continuously
    Watch {
        /// One sensor kind per port, low to high
        #[arg(num_args = 4, value_delimiter = ',')]
        sensors: Vec<SensorKind>,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 100)]
        interval: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _ = simplelog::TermLogger::init(
        log::LevelFilter::Info,
        Default::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let link = link::open(&args.port, args.baud)?;
    let mut pi = BrickPi::new(link);

    match args.action {
        Action::Estop => {
            pi.emergency_stop()?;
            info!("all motors floated");
        }
        Action::SetTimeout { millis } => {
            pi.set_timeout(millis)?;
            info!("firmware timeout set to {millis} ms");
        }
        Action::Watch { sensors, interval } => {
            for (port, kind) in sensors.into_iter().enumerate() {
                pi.sensors[port] = SensorConfig::new(kind.into());
            }
            pi.setup()?;
            info!("sensor setup acknowledged by both boards");

            loop {
                match pi.update_values() {
                    Ok(snapshot) => {
                        let line = snapshot
                            .readings
                            .iter()
                            .enumerate()
                            .map(|(port, reading)| format!("{port}: {}", describe(reading)))
                            .collect::<Vec<_>>()
                            .join("  ");
                        info!("{line}");
                    }
                    Err(e) => warn!("values exchange failed: {e}"),
                }
                sleep(Duration::from_millis(interval));
            }
        }
    }

    Ok(())
}

fn describe(reading: &Option<SensorReading>) -> String {
    match reading {
        None => "-".to_string(),
        Some(SensorReading::Analog(v)) => v.to_string(),
        Some(SensorReading::Touch(pressed)) => if *pressed { "pressed" } else { "open" }.to_string(),
        Some(SensorReading::Ultrasonic(cm)) => format!("{cm} cm"),
        Some(SensorReading::ColorFull { color, .. }) => format!("color {color}"),
        Some(SensorReading::I2c { success }) => format!("i2c {success:#04b}"),
        Some(SensorReading::Ev3(v)) => v.to_string(),
        Some(SensorReading::Ev3Touch(v)) => v.to_string(),
        Some(SensorReading::FirmwareVersion(v)) => format!("fw {v}"),
    }
}
