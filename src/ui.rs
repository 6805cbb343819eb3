use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

/// Tone of an advisory message shown to the operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tone {
    Info,
    Success,
    Warning,
    Failure,
}

impl Tone {
    fn marker(self) -> &'static str {
        match self {
            Tone::Info => "[i]",
            Tone::Success => "[ok]",
            Tone::Warning => "[!]",
            Tone::Failure => "[x]",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty)
    }

    /// Plain output with no spinner; used by tests and pipelines.
    pub fn plain() -> Self {
        Self::new(UiMode::Plain, false)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty && !matches!(self.mode, UiMode::Plain)
    }

    /// Shows a busy indicator until the returned guard is dropped.
    pub fn busy(&self, task: &str) -> BusyGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{task}…"));
            BusyGuard::new(task.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", task);
            BusyGuard::new(task.to_string(), None)
        }
    }

    pub fn notice(&self, tone: Tone, text: &str) {
        println!("{} {}", tone.marker(), text);
    }

    /// Multi-line detail block, indented under the previous notice.
    pub fn detail(&self, lines: &[String]) {
        for line in lines {
            println!("    {line}");
        }
    }
}

pub struct BusyGuard {
    task: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl BusyGuard {
    fn new(task: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            task,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("{} done ({})", self.task, format_duration(elapsed));
        match &self.spinner {
            Some(spinner) => spinner.finish_and_clear(),
            None => eprintln!("{message}"),
        }
        log::debug!("{message}");
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
