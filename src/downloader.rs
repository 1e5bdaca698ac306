use bytes::BytesMut;
use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Instant;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::state::{
    FileMode, LocalState, NegotiationOutcome, TerminalStatus, TransferEvent, TransferProgress,
    TransferRequest, TransferSummary,
};

/// Single-connection resumable downloader.
///
/// Resume state lives entirely in the destination file's length: there is no
/// sidecar. Two concurrent transfers into the same path are not guarded
/// against and must be serialized by the caller.
pub struct Downloader {
    client: Client,
    config: TransferConfig,
    events: Option<UnboundedSender<TransferEvent>>,
}

/// Result of classifying the server's answer against the local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    pub outcome: NegotiationOutcome,
    pub file_mode: FileMode,
    /// Byte count already on disk that the body continues from.
    pub resume_from: u64,
    /// 0 when unknown.
    pub total_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContentRange {
    start: u64,
    end: u64,
    total: Option<u64>,
}

enum StreamEnd {
    Finished,
    Cancelled,
}

impl Downloader {
    pub fn new(config: TransferConfig) -> Self {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            config,
            events: None,
        }
    }

    /// Send negotiation and per-chunk progress events to `tx`.
    pub fn with_events(mut self, tx: UnboundedSender<TransferEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Fetch `request.url` into `request.destination`, continuing from whatever
    /// prefix is already there. Never retries: call again to pick up where a
    /// failed or interrupted run stopped.
    pub async fn transfer(&self, request: &TransferRequest, cancel: &CancellationToken) -> TerminalStatus {
        match self.run(request, cancel).await {
            Ok(status) => status,
            Err(e) => {
                warn!(url = %request.url, error = %e, "transfer failed");
                TerminalStatus::Failed(e)
            }
        }
    }

    async fn run(&self, request: &TransferRequest, cancel: &CancellationToken) -> Result<TerminalStatus, TransferError> {
        let local = match probe(&request.destination).await {
            Ok(local) => local,
            Err(e) => {
                warn!(path = ?request.destination, error = %e, "treating destination as new");
                LocalState::empty()
            }
        };

        if local.file_mode == FileMode::Append {
            info!(
                path = ?request.destination,
                size = local.existing_bytes,
                "found existing file"
            );
        }

        let mut req = self.client.get(&request.url);
        if local.existing_bytes > 0 {
            info!(offset = local.existing_bytes, "attempting to resume");
            req = req.header(RANGE, format!("bytes={}-", local.existing_bytes));
        }

        // Only the wait for response headers is bounded; the body is not.
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("cancelled before the server answered");
                return Ok(TerminalStatus::Interrupted(TransferSummary {
                    outcome: None,
                    bytes_written_total: local.existing_bytes,
                    bytes_written_session: 0,
                    total_size: 0,
                }));
            }
            sent = tokio::time::timeout(self.config.negotiate_timeout, req.send()) => {
                sent.map_err(|_| TransferError::NegotiationTimeout(self.config.negotiate_timeout))??
            }
        };

        let negotiation = classify(
            response.status(),
            local,
            response.content_length(),
            response.headers(),
        )?;
        debug!(
            status = %response.status(),
            outcome = negotiation.outcome.label(),
            total = negotiation.total_size,
            "negotiated"
        );
        self.emit(TransferEvent::Negotiated {
            outcome: negotiation.outcome,
            resume_from: negotiation.resume_from,
            total_size: negotiation.total_size,
        });

        match negotiation.outcome {
            NegotiationOutcome::Complete => {
                info!("range not satisfiable, file is already fully downloaded");
                return Ok(TerminalStatus::Completed(TransferSummary {
                    outcome: Some(negotiation.outcome),
                    bytes_written_total: local.existing_bytes,
                    bytes_written_session: 0,
                    total_size: negotiation.total_size,
                }));
            }
            NegotiationOutcome::Failed { status } => {
                return Err(TransferError::UnexpectedStatus { status });
            }
            NegotiationOutcome::Resumed { .. } => info!("server supports resuming, continuing download"),
            NegotiationOutcome::Restarted => {
                info!("server ignored the range request, restarting download")
            }
            NegotiationOutcome::Fresh => info!("starting download"),
        }

        if negotiation.total_size > 0 {
            info!(total = negotiation.total_size, "total file size");
        } else {
            info!("total file size unknown");
        }

        let file = open_destination(&request.destination, negotiation.file_mode).await?;
        self.stream(response, file, &negotiation, request.chunk_size, cancel).await
    }

    async fn stream(
        &self,
        response: Response,
        file: File,
        negotiation: &Negotiation,
        chunk_size: usize,
        cancel: &CancellationToken,
    ) -> Result<TerminalStatus, TransferError> {
        let mut sink = ChunkSink {
            file,
            written_total: negotiation.resume_from,
            written_session: 0,
            total_size: negotiation.total_size,
            started: Instant::now(),
            events: self.events.as_ref(),
        };
        let mut body = response.bytes_stream();
        let mut pending = BytesMut::with_capacity(chunk_size);

        // Cancellation is only observed here, between chunk writes.
        let end = 'read: loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'read Ok(StreamEnd::Cancelled),
                next = body.next() => next,
            };

            match next {
                None => break 'read Ok(StreamEnd::Finished),
                Some(Err(e)) => break 'read Err(TransferError::Network(e)),
                Some(Ok(bytes)) => {
                    pending.extend_from_slice(&bytes);
                    while pending.len() >= chunk_size {
                        let chunk = pending.split_to(chunk_size);
                        if let Err(e) = sink.write_chunk(&chunk).await {
                            pending.clear();
                            break 'read Err(TransferError::Io(e));
                        }
                    }
                }
            }
        };

        // Whatever was received is written before the handle goes away, on
        // every path, so the next probe sees exactly the persisted prefix.
        let flushed = sink.finish(&pending).await;
        let summary = TransferSummary {
            outcome: Some(negotiation.outcome),
            bytes_written_total: sink.written_total,
            bytes_written_session: sink.written_session,
            total_size: sink.total_size,
        };
        drop(sink);

        match end? {
            StreamEnd::Cancelled => {
                flushed?;
                info!(written = summary.bytes_written_total, "download paused, run again to resume");
                Ok(TerminalStatus::Interrupted(summary))
            }
            StreamEnd::Finished => {
                flushed?;
                if summary.total_size > 0 && summary.bytes_written_total != summary.total_size {
                    return Err(TransferError::LengthMismatch {
                        expected: summary.total_size,
                        actual: summary.bytes_written_total,
                    });
                }
                info!(written = summary.bytes_written_total, "download complete");
                Ok(TerminalStatus::Completed(summary))
            }
        }
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver just means nobody is watching.
            let _ = tx.send(event);
        }
    }
}

struct ChunkSink<'a> {
    file: File,
    written_total: u64,
    written_session: u64,
    total_size: u64,
    started: Instant,
    events: Option<&'a UnboundedSender<TransferEvent>>,
}

impl ChunkSink<'_> {
    async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.file.write_all(chunk).await?;
        // tokio's File buffers internally; flush hands the bytes to the OS.
        self.file.flush().await?;

        self.written_total += chunk.len() as u64;
        self.written_session += chunk.len() as u64;

        if let Some(tx) = self.events {
            let _ = tx.send(TransferEvent::Progress(TransferProgress::new(
                self.written_total,
                self.written_session,
                self.total_size,
                self.started.elapsed(),
            )));
        }
        Ok(())
    }

    async fn finish(&mut self, pending: &[u8]) -> std::io::Result<()> {
        self.write_chunk(pending).await?;
        self.file.sync_data().await
    }
}

/// Look at the destination once: its length is the resume offset.
pub async fn probe(path: &Path) -> Result<LocalState, TransferError> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(LocalState {
            existing_bytes: meta.len(),
            file_mode: FileMode::Append,
        }),
        Ok(_) => Err(TransferError::LocalState(std::io::Error::new(
            ErrorKind::Other,
            "destination exists but is not a regular file",
        ))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(LocalState::empty()),
        Err(e) => Err(TransferError::LocalState(e)),
    }
}

/// Decide resume, restart or stop from the status line and length headers.
pub fn classify(
    status: StatusCode,
    local: LocalState,
    content_length: Option<u64>,
    headers: &HeaderMap,
) -> Result<Negotiation, TransferError> {
    let existing = local.existing_bytes;

    if status == StatusCode::RANGE_NOT_SATISFIABLE {
        // Inferred, not verified: a remote that changed size since the last
        // run is not detected here.
        return Ok(Negotiation {
            outcome: NegotiationOutcome::Complete,
            file_mode: local.file_mode,
            resume_from: existing,
            total_size: existing,
        });
    }

    if status == StatusCode::PARTIAL_CONTENT {
        let range = match headers.get(CONTENT_RANGE) {
            Some(value) => {
                let raw = value
                    .to_str()
                    .map_err(|_| TransferError::MalformedHeader("Content-Range is not ASCII".into()))?;
                Some(parse_content_range(raw)?)
            }
            None => None,
        };

        if let Some(range) = range {
            if range.start != existing {
                return Err(TransferError::MalformedHeader(format!(
                    "Content-Range starts at {} but {} bytes are on disk",
                    range.start, existing
                )));
            }
            debug!(start = range.start, end = range.end, total = ?range.total, "content range");
        }

        let total_size = match content_length {
            Some(remaining) => existing.checked_add(remaining).ok_or_else(|| {
                TransferError::MalformedHeader(format!(
                    "Content-Length {} overflows with {} bytes on disk",
                    remaining, existing
                ))
            })?,
            None => range.and_then(|r| r.total).unwrap_or(0),
        };

        return Ok(Negotiation {
            outcome: NegotiationOutcome::Resumed { remaining: content_length },
            file_mode: FileMode::Append,
            resume_from: existing,
            total_size,
        });
    }

    if status.is_success() {
        let outcome = if existing > 0 {
            NegotiationOutcome::Restarted
        } else {
            NegotiationOutcome::Fresh
        };
        return Ok(Negotiation {
            outcome,
            file_mode: FileMode::Create,
            resume_from: 0,
            total_size: content_length.unwrap_or(0),
        });
    }

    Ok(Negotiation {
        outcome: NegotiationOutcome::Failed { status },
        file_mode: local.file_mode,
        resume_from: existing,
        total_size: 0,
    })
}

/// Parses `bytes <start>-<end>/<total|*>`.
fn parse_content_range(raw: &str) -> Result<ContentRange, TransferError> {
    let malformed = || TransferError::MalformedHeader(format!("Content-Range: {}", raw));

    let spec = raw.trim().strip_prefix("bytes ").ok_or_else(malformed)?;
    let (range, total) = spec.split_once('/').ok_or_else(malformed)?;
    let (start, end) = range.split_once('-').ok_or_else(malformed)?;

    let start: u64 = start.trim().parse().map_err(|_| malformed())?;
    let end: u64 = end.trim().parse().map_err(|_| malformed())?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().map_err(|_| malformed())?),
    };

    if end < start {
        return Err(malformed());
    }
    Ok(ContentRange { start, end, total })
}

async fn open_destination(path: &Path, mode: FileMode) -> Result<File, TransferError> {
    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        FileMode::Append => options.append(true),
        FileMode::Create => options.write(true).truncate(true),
    };
    Ok(options.open(path).await?)
}
