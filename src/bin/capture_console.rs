//! capture_console - operator console for parking violation capture
//!
//! Reads one command per line from stdin (`analyze <image>`, `confirm`,
//! `reject`, ...). Learning statistics are refreshed in the background on a
//! timer and after every decision.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use parking_capture::ui::Ui;
use parking_capture::{
    CaptureConsole, ClientConfig, Command, Flow, HttpTransport, StatsPoller, Transport,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Operator console for the parking violation detection service"
)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "PARKING_CAPTURE_CONFIG")]
    config: Option<PathBuf>,

    /// Detection service base url (overrides config).
    #[arg(long)]
    base_url: Option<String>,

    /// Output style: auto, plain, or pretty.
    #[arg(long, default_value = "auto")]
    ui: String,

    /// Do not poll learning statistics in the background.
    #[arg(long)]
    no_stats: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = ClientConfig::load_from(args.config.as_deref())?;
    if let Some(base_url) = args.base_url {
        cfg.base_url = base_url;
    }
    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new(&cfg).context("build detection service client")?);
    log::info!("detection service at {}", cfg.base_url);

    let ui = Ui::from_args(Some(args.ui.as_str()), io::stderr().is_terminal());
    let mut console = CaptureConsole::new(&cfg, transport.clone(), ui);

    let poller = if args.no_stats {
        None
    } else {
        let (events_tx, events_rx) = mpsc::channel();
        console = console.with_events(events_tx);
        let threshold = cfg.stats.retraining_threshold;
        let handle = StatsPoller::new(transport, cfg.stats.interval)
            .with_events(events_rx)
            .spawn(move |stats| println!("[stats] {}", stats.describe(threshold)));
        Some(handle)
    };

    println!("{}", parking_capture::console::HELP);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{}", console.prompt());
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("read command")?;
        match Command::parse(&line) {
            Ok(Some(command)) => {
                if console.execute(command) == Flow::Quit {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => eprintln!("{err}"),
        }
    }

    if let Some(handle) = poller {
        handle.stop()?;
    }
    Ok(())
}
