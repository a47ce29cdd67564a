use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use xsupdater_core::TaskStatus;
use xsupdater_transfer::TransferProgress;
use xsupdater_xapi::ApplyStep;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum UiMode {
    Plain,
    Interactive,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
    mode: UiMode,
}

pub(crate) struct TerminalProgress {
    style: OutputStyle,
    label: String,
    total: Option<u64>,
    current: u64,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

pub(crate) fn resolve_output_style(
    stdout_is_tty: bool,
    no_color: bool,
    plain: bool,
) -> OutputStyle {
    if stdout_is_tty && !no_color && !plain {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self {
            style,
            mode: ui_mode_from_style(style),
        }
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        if let Some(line) = render_section_header(self.mode, title) {
            println!();
            let rendered = match self.style {
                OutputStyle::Plain => line,
                OutputStyle::Rich => colorize(section_style(), &line),
            };
            println!("{rendered}");
        }
    }

    pub(crate) fn print_apply_step(self, step: &ApplyStep) {
        match step {
            ApplyStep::TaskCreated(task) => {
                self.print_status("step", &format!("created import task {task}"))
            }
            ApplyStep::Uploading(url) => {
                self.print_status("step", &format!("uploading to {url}"))
            }
            ApplyStep::Processing(status) => {
                let badge = match status {
                    TaskStatus::Success => "ok",
                    TaskStatus::Failure | TaskStatus::Cancelled => "err",
                    TaskStatus::Pending | TaskStatus::Cancelling => "step",
                };
                self.print_status(badge, &format!("upload processing status: {status}"));
            }
            ApplyStep::Applying(artifact) => {
                self.print_status("step", &format!("applying {artifact} to the pool"))
            }
        }
    }

    pub(crate) fn start_progress(self) -> TerminalProgress {
        TerminalProgress {
            style: self.style,
            label: String::new(),
            total: None,
            current: 0,
            progress_bar: None,
            started_at: Instant::now(),
        }
    }
}

impl TransferProgress for TerminalProgress {
    fn start(&mut self, label: &str, total: Option<u64>) {
        self.label = label.to_string();
        self.total = total;
        self.current = 0;
        self.started_at = Instant::now();
        if self.style != OutputStyle::Rich {
            return;
        }

        let (progress_bar, template) = match total {
            Some(total) => (
                ProgressBar::new(total.max(1)),
                "{spinner:.cyan.bold} {msg:<12} [{bar:20.cyan/blue}] {bytes:>10}/{total_bytes:10} {bytes_per_sec} {eta}",
            ),
            None => (
                ProgressBar::no_length(),
                "{spinner:.cyan.bold} {msg:<12} {bytes:>10} {bytes_per_sec} {elapsed_precise}",
            ),
        };
        if let Ok(style) = ProgressStyle::with_template(template) {
            progress_bar.set_style(style.tick_chars("|/-\\ ").progress_chars("=>-"));
        }
        progress_bar.set_message(label.to_string());
        progress_bar.enable_steady_tick(Duration::from_millis(80));
        self.progress_bar = Some(progress_bar);
    }

    fn advance(&mut self, bytes: u64) {
        self.current += bytes;
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.inc(bytes);
        }
    }

    fn finish(&mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };

        progress_bar.finish_and_clear();
        if let Some(line) = render_progress_line(
            self.style,
            &self.label,
            self.current,
            self.total,
            Some(self.started_at.elapsed()),
        ) {
            println!("{line}");
        }
    }

    fn abandon(&mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.abandon();
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn progress_bar_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightBlue.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn ui_mode_from_style(style: OutputStyle) -> UiMode {
    match style {
        OutputStyle::Plain => UiMode::Plain,
        OutputStyle::Rich => UiMode::Interactive,
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "err" => "[ERR]",
        _ => "[..]",
    }
}

fn render_section_header(mode: UiMode, title: &str) -> Option<String> {
    match mode {
        UiMode::Plain => None,
        UiMode::Interactive => Some(format!("== {title} ==")),
    }
}

pub(crate) fn render_progress_line(
    style: OutputStyle,
    label: &str,
    current: u64,
    total: Option<u64>,
    elapsed: Option<Duration>,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }

    let suffix = elapsed
        .map(|value| format!(" complete in {}", format_elapsed(value)))
        .unwrap_or_default();
    let Some(total) = total else {
        return Some(format!(
            "{} {}{}",
            colorize(progress_label_style(), label),
            HumanBytes(current),
            suffix
        ));
    };

    let width = 18_u64;
    let safe_total = total.max(1);
    let bounded_current = current.min(safe_total);
    let filled = (bounded_current * width) / safe_total;
    let bar = format!(
        "{}{}",
        "=".repeat(filled as usize),
        "-".repeat(width.saturating_sub(filled) as usize)
    );
    let percent = (bounded_current * 100) / safe_total;

    Some(format!(
        "{} [{}] {:>3}% {}/{}{}",
        colorize(progress_label_style(), label),
        colorize(progress_bar_style(), &bar),
        percent,
        HumanBytes(current),
        HumanBytes(total),
        suffix
    ))
}
