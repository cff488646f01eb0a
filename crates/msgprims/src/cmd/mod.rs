use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand};
use msgprims_peer::PeerConfig;
use msgprims_transport::Endpoint;
use serde_json::Value;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod request;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an echo server.
    Echo(EchoArgs),
    /// Send a single message.
    Send(SendArgs),
    /// Open a streaming request and print every response packet.
    Request(RequestArgs),
    /// Listen and print received messages.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Settings shared by every command.
pub struct Context {
    pub format: OutputFormat,
    pub config: PeerConfig,
}

pub async fn run(command: Command, ctx: Context) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args, &ctx).await,
        Command::Send(args) => send::run(args, &ctx).await,
        Command::Request(args) => request::run(args, &ctx).await,
        Command::Listen(args) => listen::run(args, &ctx).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Endpoint to bind (`unix:/path`, `/path`, `host:port`, `tcp://host:port`).
    pub endpoint: Endpoint,
}

#[derive(Args, Debug)]
pub struct PayloadArgs {
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// String payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read a JSON payload from a file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
}

impl PayloadArgs {
    /// The payload to send; `null` when none was given.
    pub fn resolve(&self) -> CliResult<Value> {
        if let Some(json) = &self.json {
            return serde_json::from_str(json)
                .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")));
        }
        if let Some(data) = &self.data {
            return Ok(Value::String(data.clone()));
        }
        if let Some(path) = &self.file {
            let text = fs::read_to_string(path)
                .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
            return serde_json::from_str(&text).map_err(|err| {
                CliError::new(
                    DATA_INVALID,
                    format!("{} is not valid JSON: {err}", path.display()),
                )
            });
        }
        Ok(Value::Null)
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Endpoint to connect to.
    pub endpoint: Endpoint,
    #[command(flatten)]
    pub payload: PayloadArgs,
    /// Application type tag (default: derived from the JSON shape).
    #[arg(long = "type", value_name = "TAG", conflicts_with = "wait")]
    pub type_name: Option<String>,
    /// Ask for a callback reply and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Endpoint to connect to.
    pub endpoint: Endpoint,
    #[command(flatten)]
    pub payload: PayloadArgs,
    /// Response stream timeout (e.g. 5s, 500ms). Default: from config.
    #[arg(long)]
    pub timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Endpoint to bind.
    pub endpoint: Endpoint,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Load a JSON [`PeerConfig`], or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> CliResult<PeerConfig> {
    let Some(path) = path else {
        return Ok(PeerConfig::default());
    };
    let text = fs::read_to_string(path)
        .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
    serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            USAGE,
            format!("invalid config {}: {err}", path.display()),
        )
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
