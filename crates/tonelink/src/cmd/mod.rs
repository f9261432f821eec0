use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use tokio::sync::mpsc::UnboundedReceiver;
use tonelink_control::{ControlEvent, Controller, ControllerConfig, EventSink, Polarity};
use tonelink_registry::Registry;
use tonelink_transport::{connect, BridgeReceiver, BridgeSender};

use crate::exit::{control_error, registry_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod monitor;
pub mod params;
pub mod read;
pub mod set;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the parameter table.
    Params(ParamsArgs),
    /// Read parameter values from the amp.
    Read(ReadArgs),
    /// Set one parameter on the amp.
    Set(SetArgs),
    /// Run the amp (and optionally pedal) link and print events.
    Monitor(MonitorArgs),
    /// Act as a virtual amplifier on a bridge socket.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Options shared by every command.
#[derive(Debug)]
pub struct Globals {
    pub format: OutputFormat,
    pub registry: Option<PathBuf>,
}

pub async fn run(command: Command, globals: &Globals) -> CliResult<i32> {
    match command {
        Command::Params(args) => params::run(args, globals),
        Command::Read(args) => read::run(args, globals).await,
        Command::Set(args) => set::run(args, globals).await,
        Command::Monitor(args) => monitor::run(args, globals).await,
        Command::Simulate(args) => simulate::run(args, globals).await,
        Command::Version(args) => version::run(args, globals),
    }
}

#[derive(Args, Debug, Default)]
pub struct ParamsArgs {}

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Amp bridge socket.
    pub path: PathBuf,
    /// Parameters to read. Default: every parameter of the active modes.
    pub keys: Vec<String>,
    /// How long to wait for answers (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub timeout: String,
    /// Pause between reads.
    #[arg(long, default_value = "120ms")]
    pub delay: String,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Amp bridge socket.
    pub path: PathBuf,
    /// Parameter key.
    pub key: String,
    /// Numeric value, or one of the parameter's labels.
    pub value: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Amp bridge socket.
    pub path: PathBuf,
    /// Pedal bridge socket.
    #[arg(long, value_name = "SOCKET")]
    pub pedal: Option<PathBuf>,
    /// Parameter the pedal controls at start.
    #[arg(long, value_name = "KEY")]
    pub select: Option<String>,
    /// Footswitch and expression controller numbers.
    #[arg(long, value_delimiter = ',', value_name = "PREV,NEXT,EXPR")]
    pub footswitch_codes: Option<Vec<u8>>,
    /// Footswitch polarity.
    #[arg(long, value_enum)]
    pub polarity: Option<PolarityArg>,
    /// Skip reading every parameter at start.
    #[arg(long)]
    pub no_initial_read: bool,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Periodically turn this parameter's knob, as a person at the amp would.
    #[arg(long, value_name = "KEY")]
    pub wiggle: Option<String>,
    /// Time between knob turns (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub interval: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum PolarityArg {
    /// Normally open.
    No,
    /// Normally closed.
    Nc,
}

impl From<PolarityArg> for Polarity {
    fn from(arg: PolarityArg) -> Self {
        match arg {
            PolarityArg::No => Polarity::NormallyOpen,
            PolarityArg::Nc => Polarity::NormallyClosed,
        }
    }
}

pub fn load_registry(globals: &Globals) -> CliResult<Registry> {
    match &globals.registry {
        Some(path) => Registry::from_file(path).map_err(|err| {
            registry_error(&format!("loading {} failed", path.display()), err)
        }),
        None => Registry::builtin().map_err(|err| registry_error("built-in table invalid", err)),
    }
}

/// An event stream and a controller attached to the amp at `path`.
pub struct AmpSession {
    pub controller: Controller<BridgeSender>,
    pub receiver: BridgeReceiver,
    pub events: UnboundedReceiver<ControlEvent>,
}

pub async fn connect_amp(
    path: &Path,
    registry: Registry,
    config: ControllerConfig,
) -> CliResult<AmpSession> {
    let (sink, events) = EventSink::channel();
    let controller = Controller::new(registry, config, sink)
        .map_err(|err| control_error("invalid configuration", err))?;
    let (sender, receiver) = connect(path)
        .await
        .map_err(|err| transport_error("connect to amp failed", err))?;
    controller.attach_amp(sender).await;
    Ok(AmpSession {
        controller,
        receiver,
        events,
    })
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
