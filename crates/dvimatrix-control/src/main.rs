//! DVImatrix848 controller: command-line entry point.
//!
//! Loads `setup.json`, connects to the switcher, runs one command (or an
//! interactive shell) and writes the configuration back on exit.
//!
//! # Usage
//!
//! ```text
//! dvimatrix [OPTIONS] [COMMAND]
//!
//! Commands:
//!   ports     List serial ports
//!   show      Print labels and the current routing [default]
//!   route     Route INPUT to OUTPUT (zero-based)
//!   status    Query the device and print what it reports [alias: refresh]
//!   store     Save the current routing as emergency routing
//!   restore   Apply the emergency routing
//!   shell     Read commands from stdin until EOF, `quit` or Ctrl-C
//!
//! Options:
//!   -c, --config <PATH>      Configuration file [env: DVIMATRIX_CONFIG]
//!   -p, --port <NAME>        Serial port [env: DVIMATRIX_PORT]
//!       --fetch <POLICY>     never | auto | interactive | always
//!   -r, --restore            Restore emergency routing at startup
//!   -L, --log-file <PATH>    Write log output to PATH (truncated on start)
//!   -v, --verbose...         Raise verbosity
//!   -q, --quiet...           Lower verbosity
//!       --no-save            Do not write the configuration on exit
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ config::load()          -- setup.json, defaults + warnings
//!  └─ MatrixSession::start()  -- connect, apply configured routing
//!  └─ MatrixService::spawn()  -- worker thread owning the session
//!       └─ run_command()      -- one command or the shell
//!  └─ MatrixHandle::shutdown  -- save and stop the worker
//! ```

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dvimatrix_control::application::{
    MatrixHandle, MatrixService, MatrixSession, MatrixView, RoutingObserver, ServiceError,
    SessionOptions,
};
use dvimatrix_control::infrastructure::serial::{
    available_ports, Transport, DEFAULT_SETTLE_INTERVAL,
};
use dvimatrix_control::infrastructure::storage::config;
use dvimatrix_core::{FetchPolicy, RoutingTable};

/// Log levels selectable with `-v` / `-q`, starting from the default `warn`.
const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
const DEFAULT_LEVEL: i32 = 1;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Control a DVImatrix848 crosspoint switcher over RS-232.
#[derive(Debug, Parser)]
#[command(name = "dvimatrix", version)]
struct Cli {
    /// Configuration file to read and write.
    ///
    /// Defaults to `setup.json` in the platform config directory.
    #[arg(short, long, value_name = "PATH", env = "DVIMATRIX_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port to connect to, overriding `serial.port`.
    #[arg(short, long, value_name = "NAME", env = "DVIMATRIX_PORT")]
    port: Option<String>,

    /// When to query the device, overriding `generic.fetchstate`.
    #[arg(long, value_name = "POLICY")]
    fetch: Option<FetchPolicy>,

    /// Restore the emergency routing at startup.
    #[arg(short, long)]
    restore: bool,

    /// Write log output to this file instead of stderr, replacing its contents.
    #[arg(short = 'L', long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Raise verbosity (repeatable).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Lower verbosity (repeatable).
    #[arg(short, long, action = ArgAction::Count)]
    quiet: u8,

    /// Do not write the configuration on exit.
    #[arg(long)]
    no_save: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Command {
    /// List the serial ports on this machine.
    Ports,
    /// Print labels and the current routing.
    Show,
    /// Route INPUT to OUTPUT (both zero-based).
    Route { output: usize, input: usize },
    /// Query the device and print the routing it reports.
    #[command(visible_alias = "refresh")]
    Status,
    /// Save the current routing as the emergency routing.
    Store,
    /// Apply the emergency routing.
    Restore,
    /// Read commands from stdin.
    Shell,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_file = cli.log_file.clone().or_else(config::default_log_file);
    init_logging(cli.verbose, cli.quiet, log_file.as_deref())?;

    let command = cli.command.unwrap_or(Command::Show);
    if command == Command::Ports {
        return list_ports();
    }

    let config_path = match cli.config {
        Some(path) => path,
        None => config::config_file_path()
            .context("cannot locate the configuration directory; pass --config")?,
    };
    let loaded = config::load(&config_path);
    let port = resolve_port(cli.port, loaded.config.serial.port.clone());
    let options = SessionOptions {
        port,
        fetch_policy: cli.fetch,
        restore: cli.restore,
    };

    let transport = Transport::serial(DEFAULT_SETTLE_INTERVAL);
    let (mut session, report) = MatrixSession::start(loaded, config_path, transport, options)
        .context("cannot start the matrix session")?;
    match &report.device {
        Some(device) => info!("connected to {device}"),
        None => warn!("not connected to a matrix; routes are only recorded"),
    }
    if command == Command::Shell {
        session.state_mut().set_observer(Box::new(ConsoleObserver));
    }

    let handle = MatrixService::spawn(session)?;
    let outcome = run_command(&handle, command).await;
    handle
        .shutdown(!cli.no_save)
        .await
        .context("cannot save the configuration")?;
    outcome
}

/// Initialises `tracing`.  `RUST_LOG` wins over `-v` / `-q`.
fn init_logging(verbose: u8, quiet: u8, log_file: Option<&Path>) -> anyhow::Result<()> {
    let level = verbosity_level(verbose, quiet);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

/// Opens `path` for logging, discarding what the previous run wrote.
fn open_log_file(path: &Path) -> anyhow::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path.display()))
}

fn verbosity_level(verbose: u8, quiet: u8) -> &'static str {
    let index = (DEFAULT_LEVEL + i32::from(verbose) - i32::from(quiet))
        .clamp(0, LEVELS.len() as i32 - 1);
    LEVELS[index as usize]
}

/// CLI port, else configured port, else the first port the OS lists.
fn resolve_port(cli: Option<String>, configured: Option<String>) -> Option<String> {
    if let Some(port) = cli.or(configured) {
        return Some(port);
    }
    match available_ports() {
        Ok(ports) => {
            let first = ports.into_iter().next().map(|p| p.name);
            if let Some(name) = &first {
                info!("no port configured; using {name}");
            }
            first
        }
        Err(e) => {
            warn!("{e}");
            None
        }
    }
}

fn list_ports() -> anyhow::Result<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        println!("{}\t{}", port.name, port.description);
    }
    Ok(())
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn run_command(handle: &MatrixHandle, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ports => list_ports(),
        Command::Show => {
            print_view(&handle.view().await?);
            Ok(())
        }
        Command::Route { output, input } => {
            if !handle.set_route(output, input).await? {
                println!("output {output} already shows input {input}");
            }
            Ok(())
        }
        Command::Status => {
            let policy = handle.view().await?.policy;
            if !policy.offers_manual_refresh() {
                bail!("manual refresh is disabled by fetch policy '{policy}'");
            }
            println!("{}", handle.refresh().await?);
            Ok(())
        }
        Command::Store => {
            println!("stored {}", handle.store().await?);
            Ok(())
        }
        Command::Restore => {
            println!("restored {}", handle.restore().await?);
            Ok(())
        }
        Command::Shell => shell(handle).await,
    }
}

fn print_view(view: &MatrixView) {
    let device = view.device.as_deref().unwrap_or("<not connected>");
    println!("{} matrix on {device}, fetch policy {}", view.size, view.policy);
    for output in 0..view.size.outputs() {
        let name = view.labels.outputs.get(output).unwrap_or("?");
        match view.live.get(output) {
            Some(input) => {
                let source = view.labels.inputs.get(input).unwrap_or("?");
                println!("  {output}: {name:<16} <- {input}: {source}");
            }
            None => println!("  {output}: {name:<16} <- (unknown)"),
        }
    }
    if !view.emergency.is_empty() {
        println!("emergency routing: {}", view.emergency);
    }
}

/// Prints every table the routing state displays while the shell runs.
struct ConsoleObserver;

impl RoutingObserver for ConsoleObserver {
    fn show_routing(&mut self, table: &RoutingTable) {
        println!("routing: {table}");
    }
}

// ── Shell ─────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum ShellCommand {
    Route { output: usize, input: usize },
    Refresh,
    Store,
    Restore,
    Show,
    Connect(String),
    Help,
    Quit,
}

const SHELL_HELP: &str = "commands: route OUTPUT INPUT | refresh | store | restore | show | connect PORT | help | quit";

/// Parses one shell line.  Blank lines yield `Ok(None)`.
fn parse_shell_line(line: &str) -> Result<Option<ShellCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();
    let command = match (word, args.as_slice()) {
        ("route", [output, input]) => ShellCommand::Route {
            output: parse_index(output)?,
            input: parse_index(input)?,
        },
        ("route", _) => return Err("usage: route OUTPUT INPUT".to_string()),
        ("refresh" | "status", []) => ShellCommand::Refresh,
        ("store", []) => ShellCommand::Store,
        ("restore", []) => ShellCommand::Restore,
        ("show", []) => ShellCommand::Show,
        ("connect", [port]) => ShellCommand::Connect((*port).to_string()),
        ("connect", _) => return Err("usage: connect PORT".to_string()),
        ("help" | "?", _) => ShellCommand::Help,
        ("quit" | "exit", _) => ShellCommand::Quit,
        (other, _) => return Err(format!("unknown command '{other}'; try 'help'")),
    };
    Ok(Some(command))
}

fn parse_index(word: &str) -> Result<usize, String> {
    word.parse()
        .map_err(|_| format!("'{word}' is not a zero-based index"))
}

async fn shell(handle: &MatrixHandle) -> anyhow::Result<()> {
    println!("{SHELL_HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("cannot read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let command = match parse_shell_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };
        if command == ShellCommand::Quit {
            break;
        }
        match run_shell_command(handle, command).await {
            Ok(()) => {}
            Err(ServiceError::Stopped) => bail!("matrix worker stopped unexpectedly"),
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}

async fn run_shell_command(handle: &MatrixHandle, command: ShellCommand) -> Result<(), ServiceError> {
    match command {
        ShellCommand::Route { output, input } => {
            if !handle.set_route(output, input).await? {
                println!("unchanged");
            }
        }
        ShellCommand::Refresh => {
            let policy = handle.view().await?.policy;
            if policy.offers_manual_refresh() {
                handle.refresh().await?;
            } else {
                println!("manual refresh is disabled by fetch policy '{policy}'");
            }
        }
        ShellCommand::Store => {
            handle.store().await?;
        }
        ShellCommand::Restore => {
            handle.restore().await?;
        }
        ShellCommand::Show => print_view(&handle.view().await?),
        ShellCommand::Connect(port) => {
            if !handle.connect(&port).await? {
                println!("already connected to {port}");
            }
        }
        ShellCommand::Help => println!("{SHELL_HELP}"),
        ShellCommand::Quit => {}
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
