use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::Write;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use crate::cli::ProgressMode;
use crate::state::{NegotiationOutcome, TransferEvent, TransferProgress};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {percent:>3}% {msg}";

// No total means no bar and no percentage, just the byte count.
const SPINNER_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {bytes:>12} {msg}";

/// Drain transfer events until the engine drops its sender, rendering them
/// according to `mode`. Presentation only: nothing here feeds back into the
/// transfer.
pub async fn report(mut rx: UnboundedReceiver<TransferEvent>, mode: ProgressMode, label: String) {
    let mut bar: Option<ProgressBar> = None;
    let mut plain_started = false;
    let mut output_error_logged = false;

    while let Some(event) = rx.recv().await {
        match mode {
            ProgressMode::Off => {}
            ProgressMode::Json => match json_line(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => log_output_error(&mut output_error_logged, &e),
            },
            ProgressMode::Plain => {
                if let TransferEvent::Progress(p) = &event {
                    let mut err = std::io::stderr().lock();
                    let written = write!(err, "\r{}", format_plain(p)).and_then(|_| err.flush());
                    if let Err(e) = written {
                        log_output_error(&mut output_error_logged, &e);
                    }
                    plain_started = true;
                }
            }
            ProgressMode::Bar => match &event {
                TransferEvent::Negotiated {
                    outcome,
                    resume_from,
                    total_size,
                } => {
                    if matches!(
                        outcome,
                        NegotiationOutcome::Complete | NegotiationOutcome::Failed { .. }
                    ) {
                        continue;
                    }
                    bar = Some(new_bar(*total_size, *resume_from, &label));
                }
                TransferEvent::Progress(p) => {
                    if let Some(pb) = &bar {
                        pb.set_position(p.bytes_written_total);
                        pb.set_message(format!("{} {}", format_speed(p.speed), label));
                    }
                }
            },
        }
    }

    if let Some(pb) = bar {
        pb.abandon();
    }
    if plain_started {
        eprintln!();
    }
}

fn json_line(event: &TransferEvent) -> serde_json::Result<String> {
    serde_json::to_string(event)
}

// Progress output is advisory; report the first failure and keep going.
fn log_output_error(logged: &mut bool, error: &dyn std::fmt::Display) {
    if !*logged {
        debug!(error = %error, "progress output failed");
        *logged = true;
    }
}

fn new_bar(total_size: u64, resume_from: u64, label: &str) -> ProgressBar {
    let pb = if total_size > 0 {
        let pb = ProgressBar::new(total_size);
        if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            pb.set_style(style.progress_chars("=>-"));
        }
        pb
    } else {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template(SPINNER_TEMPLATE) {
            pb.set_style(style);
        }
        pb
    };
    // Keep redraws cheap when stderr is redirected to a file.
    pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    pb.set_position(resume_from);
    pb.set_message(label.to_string());
    pb
}

fn format_speed(speed: Option<f64>) -> String {
    match speed {
        Some(bps) => format!("{}/s", HumanBytes(bps as u64)),
        None => "-".to_string(),
    }
}

/// `Progress: 42.0% | 4.00 MiB | Speed: 1.20 MiB/s`, without the percentage
/// when the total is unknown.
pub fn format_plain(p: &TransferProgress) -> String {
    let done = HumanBytes(p.bytes_written_total);
    let speed = format_speed(p.speed);
    match p.percent() {
        Some(pct) => format!("Progress: {:.1}% | {} | Speed: {}", pct, done, speed),
        None => format!("Progress: {} | Speed: {}", done, speed),
    }
}
