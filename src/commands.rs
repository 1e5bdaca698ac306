use anyhow::{Context, Result};
use indicatif::HumanBytes;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::ProgressMode;
use crate::config::TransferConfig;
use crate::downloader::Downloader;
use crate::progress;
use crate::state::{TerminalStatus, TransferRequest};
use crate::utils::{get_filename_from_url, sanitize_filename};

pub const EXIT_FAILED: u8 = 1;
pub const EXIT_INTERRUPTED: u8 = 130;

/// Destination for `url` when none was given: the last path segment.
pub fn default_destination(url: &str) -> Result<PathBuf> {
    let filename = get_filename_from_url(url).context("Cannot derive a file name from the URL")?;
    Ok(PathBuf::from(sanitize_filename(&filename)))
}

/// Download one URL, resuming any partial file at the destination. Ctrl-C
/// stops after the chunk in flight is written.
pub async fn run_transfer(
    url: String,
    output: Option<PathBuf>,
    chunk_size: usize,
    config: TransferConfig,
    progress_mode: ProgressMode,
) -> Result<TerminalStatus> {
    let destination = match output {
        Some(path) => path,
        None => default_destination(&url)?,
    };
    let label = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| destination.display().to_string());

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping after the current chunk");
                cancel.cancel();
            }
        })
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(progress::report(rx, progress_mode, label));

    let downloader = Downloader::new(config).with_events(tx);
    let request = TransferRequest::new(url, destination).with_chunk_size(chunk_size);
    let status = downloader.transfer(&request, &cancel).await;

    // Dropping the downloader closes the event channel so the reporter ends.
    drop(downloader);
    reporter.await.context("Progress reporter stopped unexpectedly")?;
    ctrl_c.abort();

    print_status(&status);
    Ok(status)
}

pub fn exit_code(status: &TerminalStatus) -> u8 {
    match status {
        TerminalStatus::Completed(_) => 0,
        TerminalStatus::Interrupted(_) => EXIT_INTERRUPTED,
        TerminalStatus::Failed(_) => EXIT_FAILED,
    }
}

fn print_status(status: &TerminalStatus) {
    match status {
        TerminalStatus::Completed(s) => {
            eprintln!("Download complete! ({})", HumanBytes(s.bytes_written_total));
        }
        TerminalStatus::Interrupted(s) => {
            eprintln!(
                "Download paused at {}. Run again to resume.",
                HumanBytes(s.bytes_written_total)
            );
        }
        TerminalStatus::Failed(e) => {
            eprintln!("Error occurred: {}", e);
            if e.is_retryable() {
                eprintln!("Run again to resume.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferError;
    use crate::state::{NegotiationOutcome, TransferSummary};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn exit_codes_follow_terminal_status() {
        let summary = TransferSummary {
            outcome: Some(NegotiationOutcome::Fresh),
            bytes_written_total: 1,
            bytes_written_session: 1,
            total_size: 1,
        };
        assert_eq!(exit_code(&TerminalStatus::Completed(summary)), 0);
        assert_eq!(exit_code(&TerminalStatus::Interrupted(summary)), EXIT_INTERRUPTED);
        let failed = TerminalStatus::Failed(TransferError::MalformedHeader("x".into()));
        assert_eq!(exit_code(&failed), EXIT_FAILED);
    }

    #[test]
    fn destination_defaults_to_url_file_name() {
        let dest = default_destination("https://github.com/openmaptiles/fonts/raw/master/Open%20Sans/0-255.pbf").unwrap();
        assert_eq!(dest, PathBuf::from("0-255.pbf"));
    }

    #[tokio::test]
    async fn run_transfer_writes_to_explicit_output() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 3000]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let status = run_transfer(
            format!("{}/data.bin", server.uri()),
            Some(dest.clone()),
            1024,
            TransferConfig::default(),
            ProgressMode::Off,
        )
        .await
        .unwrap();

        assert_eq!(exit_code(&status), 0);
        assert_eq!(std::fs::read(&dest).unwrap(), vec![7u8; 3000]);
    }
}
