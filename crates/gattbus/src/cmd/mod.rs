use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod crc;
pub mod groups;
pub mod parse;
pub mod plan;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compute the CRC of a payload, or check a complete frame.
    Crc(CrcArgs),
    /// Classify a frame and decode its registers.
    Parse(ParseArgs),
    /// List the register groups and their polling cadence.
    Groups(GroupsArgs),
    /// Show the write transactions a settings file would produce.
    Plan(PlanArgs),
    /// Run a session against the built-in device simulator.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Crc(args) => crc::run(args, format),
        Command::Parse(args) => parse::run(args, format),
        Command::Groups(args) => groups::run(args, format),
        Command::Plan(args) => plan::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct CrcArgs {
    /// Hex bytes, e.g. "01 03 00 10 00 08".
    pub hex: String,
    /// Treat the input as a complete frame and verify its trailing CRC.
    #[arg(long)]
    pub check: bool,
}

#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Hex bytes of one notification, CRC included.
    pub hex: String,
}

#[derive(Args, Debug, Default)]
pub struct GroupsArgs {}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Settings JSON file. Omitted fields take their defaults.
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Session config JSON file. Omitted fields take their defaults.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Settings JSON file to apply once the session is ready.
    #[arg(long, value_name = "FILE")]
    pub apply: Option<PathBuf>,
    /// Power the simulated device on once the session is ready.
    #[arg(long)]
    pub power_on: bool,
    /// How long to keep polling (e.g. 10s, 500ms). Ctrl-C stops early.
    #[arg(long, default_value = "5s")]
    pub duration: String,
    /// Corrupt this many responses after the session is ready.
    #[arg(long, default_value_t = 0)]
    pub corrupt: u32,
    /// Drop the link once, halfway through the run.
    #[arg(long)]
    pub drop_link: bool,
    /// Simulated device address.
    #[arg(long, default_value = "SIM:00:00:00:00:01")]
    pub address: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `500ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
