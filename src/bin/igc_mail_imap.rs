use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use igc_mail_imap::config::{Config, config_path, load_config_from, state_path_for};
use igc_mail_imap::daemon::{
    CycleReport, CycleSettings, LogReporter, Notifier, Poller, Reporters, run_cycle,
};
use igc_mail_imap::mail::extract::{SaveDir, extract_file};
use igc_mail_imap::mail::{FetchEngine, FetchParams, ImapConnector};
use igc_mail_imap::store::WatermarkStore;

#[derive(Parser)]
#[command(name = "igc_mail_imap")]
#[command(about = "Poll an IMAP mailbox and save IGC flight-log attachments", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/igc_mail_imap/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll on a fixed interval until Ctrl-C
    Run {
        /// Override interval_seconds from the config
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Run a single fetch/extract cycle and exit
    Once,

    /// Extract attachments from a local .eml file
    Extract {
        file: PathBuf,

        #[arg(long, default_value = ".")]
        out: PathBuf,

        #[arg(long, default_value = "igc")]
        extension: String,
    },

    /// Show config/state locations and the current watermark
    Status,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let cfg_path = match cli.config {
        Some(p) => p,
        None => config_path()?,
    };

    match cli.cmd {
        Command::Run { interval } => {
            let cfg = load_config_from(&cfg_path).map_err(|e| anyhow!("Configuration error: {e}"))?;
            if !cfg.polling_enabled {
                info!("polling_enabled is false in {}; not starting", cfg_path.display());
                return Ok(());
            }
            let interval = interval
                .map(Duration::from_secs)
                .filter(|d| !d.is_zero())
                .unwrap_or_else(|| cfg.interval());
            run(&cfg, &cfg_path, interval)
        }

        Command::Once => {
            let cfg = load_config_from(&cfg_path).map_err(|e| anyhow!("Configuration error: {e}"))?;
            let mut store = load_store(&cfg_path)?;
            let engine = FetchEngine::new(ImapConnector, FetchParams::from_config(&cfg));
            let report = run_cycle(
                &engine,
                &mut store,
                &CycleSettings::from_config(&cfg),
                &LogReporter,
            );
            print_summary(&report, store.last_uid());
            match &report.fetch_error {
                Some(e) => Err(anyhow!("fetch failed: {e}")),
                None if report.has_errors() => Err(anyhow!("some messages could not be extracted")),
                None => Ok(()),
            }
        }

        Command::Extract {
            file,
            out,
            extension,
        } => {
            let mut save_dir = SaveDir::with_extension(out, &extension);
            let results = extract_file(&file, &mut save_dir)?;
            for r in &results {
                println!("{}", r.path.display());
            }
            println!("{} file(s) extracted to {}", results.len(), save_dir.dir().display());
            Ok(())
        }

        Command::Status => {
            println!("config: {}", cfg_path.display());
            if cfg_path.exists() {
                let cfg = load_config_from(&cfg_path)?;
                match cfg.server_addr() {
                    Ok(addr) => println!("server: {}:{} ({})", addr.host, addr.port, cfg.mailbox),
                    Err(e) => println!("server: invalid ({e})"),
                }
                println!("credentials set: {}", cfg.has_credentials());
                println!("output: {}", cfg.output_folder);
            }
            let store = load_store(&cfg_path)?;
            println!("state:  {}", store.path().display());
            println!("last uid: {}", store.last_uid());
            Ok(())
        }
    }
}

fn load_store(cfg_path: &Path) -> Result<WatermarkStore> {
    let state_path = state_path_for(cfg_path);
    WatermarkStore::load(&state_path)
        .with_context(|| "refusing to start: fix or remove the state file to reprocess the mailbox")
}

fn run(cfg: &Config, cfg_path: &Path, interval: Duration) -> Result<()> {
    let mut store = load_store(cfg_path)?;
    let engine = FetchEngine::new(ImapConnector, FetchParams::from_config(cfg));
    let settings = CycleSettings::from_config(cfg);

    let mut reporters = Reporters::new().with(LogReporter);
    if cfg.notifications_enabled {
        reporters = reporters.with(Notifier::new());
    }

    let poller = Poller::new();
    poller.start(interval, move || {
        run_cycle(&engine, &mut store, &settings, &reporters);
    })?;
    info!("IMAP polling started with {} second intervals", interval.as_secs());

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    let _ = rx.recv();

    if let Some(handle) = poller.stop()? {
        info!("stopping; waiting for the current cycle to finish");
        handle
            .join()
            .map_err(|_| anyhow!("poll worker panicked"))?;
    }
    info!("IMAP polling stopped");
    Ok(())
}

fn print_summary(report: &CycleReport, last_uid: u32) {
    if report.skipped {
        println!("Skipped: output_folder or imap_server not configured");
        return;
    }
    if let Some(e) = &report.fetch_error {
        println!("IMAP fetch failed: {e}");
        return;
    }
    println!("{} new message(s)", report.messages.len());
    for m in &report.messages {
        let status = match &m.error {
            Some(e) => format!("error: {e}"),
            None => format!("{:?}", m.saved),
        };
        println!("  UID {} from '{}' '{}': {status}", m.uid, m.from, m.subject);
    }
    println!("{} file(s) saved; last uid {last_uid}", report.saved_count());
}
