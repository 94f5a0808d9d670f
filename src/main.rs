// UWB tag positioning - command-line entry point
//
// Reads tag report lines from stdin or TCP, prints one estimate per solve tick to
// stdout. Operator commands arrive on the same stream; logs and the anchor table
// go to stderr.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use uwb_positioning::api::{
    spawn_stdin_reader, AnchorSnapshot, AnchorTable, EstimateFormatter, InputEvent, JsonFormatter, TcpInput,
    TextFormatter,
};
use uwb_positioning::utils::AnchorConfig;
use uwb_positioning::{
    AutoAddPolicy, ConfigError, ConfigurationManager, ControlCommand, ControlOutcome, EngineHandle,
    EngineService, EngineUpdate, PositioningEngine,
};

/// UWB tag positioning engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (anchor table, solver and smoothing parameters)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Auto-add anchors that are not in the table, at the default position
    #[arg(long, default_value_t = false)]
    permissive: bool,

    /// Smoothing factor in (0, 1); overrides the config file
    #[arg(long, value_name = "ALPHA")]
    alpha: Option<f64>,

    /// Solve tick period in milliseconds; overrides the config file
    #[arg(long, value_name = "MS")]
    tick_ms: Option<u64>,

    /// Accept tag report connections on this address instead of reading stdin
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Pretty-print JSON output
    #[arg(long, default_value_t = false)]
    pretty: bool,

    /// Print a text status line instead of JSON
    #[arg(long, default_value_t = false)]
    text: bool,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

enum OutputFormat {
    Json(JsonFormatter),
    Text(TextFormatter),
}

struct EstimatePrinter {
    formatter: EstimateFormatter,
    output: OutputFormat,
    last_sequence: u64,
}

impl EstimatePrinter {
    fn new(cli: &Cli) -> Self {
        let output = if cli.text {
            OutputFormat::Text(TextFormatter::new(cli.verbose))
        } else {
            OutputFormat::Json(JsonFormatter::new(cli.pretty))
        };
        Self {
            formatter: EstimateFormatter::new(),
            output,
            last_sequence: 0,
        }
    }

    /// Print `update` unless it was already printed
    fn print(&mut self, update: &EngineUpdate) -> std::io::Result<()> {
        if update.sequence <= self.last_sequence {
            return Ok(());
        }
        self.last_sequence = update.sequence;

        let estimate = self.formatter.format(update);
        let line = match &self.output {
            OutputFormat::Json(json) => json.format(&estimate).map_err(std::io::Error::other)?,
            OutputFormat::Text(text) => text.format(&estimate),
        };

        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        stdout.flush()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut manager = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ConfigurationManager::from_file(path)?
        }
        None => ConfigurationManager::new(),
    };
    if cli.permissive {
        manager.set_auto_add_policy(AutoAddPolicy::Permissive);
    }
    if let Some(alpha) = cli.alpha {
        manager.set_smoothing_alpha(alpha)?;
    }
    if let Some(tick_ms) = cli.tick_ms {
        manager.set_tick_interval(tick_ms)?;
    }

    let config = manager.get_config().clone();
    let validation = manager.validate_config(&config);
    for warning in &validation.warnings {
        warn!("{}", warning);
    }
    for suggestion in &validation.suggestions {
        info!("Suggestion: {}", suggestion);
    }
    validation.into_result()?;

    let tick_interval = Duration::from_millis(config.tick_interval_ms);
    let engine = PositioningEngine::from_config(config)?;
    let handle = EngineService::spawn(engine, tick_interval);

    let mut printer = EstimatePrinter::new(&cli);
    let mut updates = handle.subscribe();
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let mut tcp_input = match cli.listen {
        Some(addr) => Some(TcpInput::start(addr, handle.ingest_sender(), event_tx).await?),
        None => {
            // Not joined: a read blocked on stdin must not delay exit
            spawn_stdin_reader(handle.ingest_sender(), event_tx)?;
            info!("Reading tag reports from stdin");
            None
        }
    };
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    error!("Engine task stopped unexpectedly");
                    break;
                }
                let latest = *updates.borrow_and_update();
                if let Some(update) = latest {
                    if let Err(e) = printer.print(&update) {
                        error!("Failed to write estimate: {}", e);
                        break;
                    }
                }
            }
            event = events.recv() => match event {
                Some(InputEvent::Control(command)) => run_command(&handle, &mut manager, command).await,
                Some(InputEvent::Closed(stats)) => {
                    info!(
                        lines = stats.lines_decoded,
                        rejected_lines = stats.lines_rejected,
                        records = stats.records_accepted,
                        rejected_records = stats.records_rejected,
                        commands = stats.commands,
                        "Input closed"
                    );
                    break;
                }
                None => break,
            },
            result = &mut ctrl_c => {
                match result {
                    Ok(()) => info!("Received shutdown signal (Ctrl+C)"),
                    Err(e) => error!("Unable to listen for shutdown signal: {}", e),
                }
                break;
            }
        }
    }

    info!("Shutting down...");
    if let Some(server) = tcp_input.as_mut() {
        server.shutdown().await;
    }
    let engine = handle.shutdown().await?;

    // Estimate from batches drained during shutdown
    if let Some(update) = engine.last_update() {
        printer.print(&update)?;
    }
    info!(
        anchors = engine.store().len(),
        estimates = engine.last_update().map_or(0, |u| u.sequence),
        "Engine stopped"
    );

    Ok(())
}

/// Apply one operator command and report the result on stderr
async fn run_command(handle: &EngineHandle, manager: &mut ConfigurationManager, command: ControlCommand) {
    let save_path = match &command {
        ControlCommand::SaveConfig { path } => Some(path.clone()),
        _ => None,
    };

    match handle.execute(command).await {
        Ok(ControlOutcome::Calibrated(report)) => {
            for update in &report.updates {
                info!(
                    anchor_id = %update.anchor_id,
                    previous = update.previous_bias,
                    bias = update.bias,
                    "Bias updated"
                );
            }
            info!(r#"Send {{"cmd":"save"}} to write the calibrated biases to the configuration file"#);
            match handle.snapshot().await {
                Ok(snapshot) => eprint!("{}", AnchorTable::new(snapshot.anchors)),
                Err(e) => warn!("Unable to read anchor table: {}", e),
            }
        }
        Ok(ControlOutcome::Anchors(anchors)) => {
            if let Some(path) = save_path {
                match save_anchors(manager, &anchors, path) {
                    Ok(()) => info!(anchors = anchors.len(), "Anchor table saved"),
                    Err(e) => error!("Failed to save anchor table: {}", e),
                }
            }
            eprint!("{}", AnchorTable::new(anchors));
        }
        Ok(ControlOutcome::AnchorUpserted { created }) => info!(created, "Anchor stored"),
        Ok(ControlOutcome::AnchorDeleted(anchor)) => info!(anchor_id = %anchor.id, "Anchor removed"),
        Ok(ControlOutcome::PolicyChanged { previous }) => info!(?previous, "Auto-add policy changed"),
        Err(e) => warn!("Command refused: {}", e),
    }
}

/// Copy the live anchor table, biases included, into the configuration and write it out
fn save_anchors(
    manager: &mut ConfigurationManager,
    anchors: &[AnchorSnapshot],
    path: Option<String>,
) -> Result<(), ConfigError> {
    let warnings = manager.replace_anchors(anchors.iter().map(AnchorConfig::from).collect())?;
    for warning in &warnings {
        warn!("{}", warning);
    }
    match path {
        Some(path) => manager.save_to_file(path),
        None => manager.save(),
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    if verbose {
        subscriber.with_max_level(tracing::Level::DEBUG).init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber.with_max_level(tracing::Level::INFO).init();
    }
}
