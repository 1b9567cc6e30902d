/*!
 * Eager CLI - relay one input into named pipes without stalling the producer
 */

use clap::Parser;
use eager::{
    config::RelayConfig,
    core::{CancelToken, Relay, RelayReport},
    error::{Operation, RelayError, Result, Role, EXIT_CANCELLED, EXIT_SUCCESS},
    get_zero_copy_capabilities, logging, RelayPhase,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

#[derive(Parser)]
#[command(name = "eager")]
#[command(version, about = "Spool a byte stream into named pipes without ever blocking the producer", long_about = None)]
struct Cli {
    /// Input path (file or FIFO); opening waits for a writer on a FIFO
    #[arg(short = 'i', long = "input", value_name = "PATH")]
    input: PathBuf,

    /// Output paths, typically FIFOs (can be specified multiple times)
    #[arg(short = 'o', long = "output", value_name = "PATH", required = true)]
    outputs: Vec<PathBuf>,

    /// Load settings from a TOML file; flags below override it
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bytes moved per transfer call
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<usize>,

    /// Directory for the spool file
    #[arg(long, value_name = "DIR")]
    spool_dir: Option<PathBuf>,

    /// Always use buffered read/write instead of splice/sendfile
    #[arg(long)]
    no_zero_copy: bool,

    /// Release spool blocks once every output has consumed them
    #[arg(long)]
    reclaim: bool,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Verbose (debug) logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Write logs as JSON to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn build_config(&self) -> Result<RelayConfig> {
        let mut config = match self.config {
            Some(ref path) => RelayConfig::from_file(path)?,
            None => RelayConfig::default(),
        };

        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
            config.ingest_budget = config.ingest_budget.max(chunk_size as u64);
        }
        if self.spool_dir.is_some() {
            config.spool_dir = self.spool_dir.clone();
        }
        if self.no_zero_copy {
            config.use_zero_copy = false;
        }
        if self.reclaim {
            config.reclaim = true;
        }
        if self.verbose {
            config.verbose = true;
        }
        if self.log_file.is_some() {
            config.log_file = self.log_file.clone();
        }
        if self.json {
            if let Some(path) = self.outputs.iter().find(|p| is_stdout(p)) {
                return Err(RelayError::Config(format!(
                    "--json writes to stdout, which is also output {}",
                    path.display()
                )));
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match cli.build_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("eager: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("eager: {}", e);
        std::process::exit(e.exit_code());
    }

    let code = match run(&cli, config) {
        Ok(report) => {
            print_report(&report, cli.json);
            if report.phase == RelayPhase::Cancelled {
                EXIT_CANCELLED
            } else {
                EXIT_SUCCESS
            }
        }
        Err(e) => {
            error!(category = %e.category(), "{}", e);
            eprintln!("eager: {}", e);
            e.exit_code()
        }
    };

    std::process::exit(code);
}

/// SIGINT and SIGTERM stop the relay between cycles instead of killing it
fn register_signals(cancel: &CancelToken) -> std::io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};

    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, cancel.flag())?;
    }
    Ok(())
}

/// True when `path` names the same file as this process's stdout
fn is_stdout(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (std::fs::metadata(path), rustix::fs::fstat(std::io::stdout())) {
        (Ok(target), Ok(stdout)) => {
            target.dev() == stdout.st_dev as u64 && target.ino() == stdout.st_ino as u64
        }
        _ => false,
    }
}

fn run(cli: &Cli, config: RelayConfig) -> Result<RelayReport> {
    // Blocks until a producer opens a FIFO input; the relay then switches
    // the descriptor to non-blocking mode. An interrupt here still kills
    // the process, as there is nothing to report yet.
    let input = File::open(&cli.input).map_err(|e| RelayError::io(Operation::Open, Role::Input, e))?;

    let cancel = CancelToken::new();
    if let Err(e) = register_signals(&cancel) {
        warn!("Cannot install signal handlers, interrupts will not report: {}", e);
    }

    let caps = get_zero_copy_capabilities();
    debug!(
        "Zero-copy available: {} ({:?}), enabled: {}",
        caps.available, caps.methods, config.use_zero_copy
    );

    let mut relay = Relay::new(input, cli.outputs.clone(), config)?;
    relay.run(&cancel)
}

fn print_report(report: &RelayReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("eager: failed to encode report: {}", e),
        }
        return;
    }

    eprintln!(
        "Relay {:?}: {} bytes ingested in {} ms ({} cycles)",
        report.phase, report.bytes_ingested, report.duration_ms, report.cycles
    );
    for output in &report.outputs {
        eprintln!(
            "  {} [{:?}]: {} delivered, {} discarded",
            output.name, output.state, output.delivered, output.discarded
        );
    }
}
