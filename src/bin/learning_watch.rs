//! learning_watch - follow learning statistics and trigger retraining
//!
//! Without flags, prints a stats line every interval until Ctrl-C.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_capture::learning::{self, RetrainOutcome};
use parking_capture::{ClientConfig, HttpTransport, Readiness, StatsPoller, Transport};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Watch learning statistics of the parking violation detection service"
)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "PARKING_CAPTURE_CONFIG")]
    config: Option<PathBuf>,

    /// Print one snapshot and exit.
    #[arg(long, conflicts_with = "retrain")]
    once: bool,

    /// Trigger retraining if the service reports it is ready, then exit.
    #[arg(long)]
    retrain: bool,

    /// Poll interval in seconds (overrides config).
    #[arg(long)]
    interval_secs: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = ClientConfig::load_from(args.config.as_deref())?;
    if let Some(secs) = args.interval_secs {
        if secs == 0 {
            return Err(anyhow!("--interval-secs must be greater than zero"));
        }
        cfg.stats.interval = Duration::from_secs(secs);
    }
    let threshold = cfg.stats.retraining_threshold;
    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new(&cfg).context("build detection service client")?);

    if args.once {
        let stats = learning::fetch_stats(transport.as_ref())?;
        println!("{}", stats.describe(threshold));
        return Ok(());
    }

    if args.retrain {
        let stats = learning::fetch_stats(transport.as_ref())?;
        if let Readiness::Remaining(remaining) = stats.readiness(threshold) {
            println!("not ready for retraining: {remaining} more confirmed images needed");
            return Ok(());
        }
        log::info!("retraining started; this can take several minutes");
        let outcome = learning::trigger_retraining(transport.as_ref())?;
        println!("{outcome}");
        if let RetrainOutcome::Other { status, .. } = &outcome {
            log::warn!("retraining finished with status {}", status);
        }
        let stats = learning::fetch_stats(transport.as_ref())?;
        println!("{}", stats.describe(threshold));
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    log::info!(
        "polling {} every {}s",
        cfg.base_url,
        cfg.stats.interval.as_secs()
    );
    let handle = StatsPoller::new(transport, cfg.stats.interval)
        .spawn(move |stats| println!("{}", stats.describe(threshold)));

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }
    handle.stop()?;
    Ok(())
}
