use reqwest::StatusCode;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::TransferError;

/// One download: where from, where to, and how big each disk write is.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub destination: PathBuf,
    pub chunk_size: usize,
}

impl TransferRequest {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        // A zero-sized chunk would never make progress.
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Create,
    Append,
}

/// What was on disk before the request went out. Read once, never refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalState {
    pub existing_bytes: u64,
    pub file_mode: FileMode,
}

impl LocalState {
    pub fn empty() -> Self {
        Self {
            existing_bytes: 0,
            file_mode: FileMode::Create,
        }
    }
}

/// How the server answered the (possibly ranged) GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NegotiationOutcome {
    /// 206: append the remaining bytes after the local prefix.
    Resumed { remaining: Option<u64> },
    /// 200 while a local prefix existed: the range was ignored, start over.
    Restarted,
    /// 200 with nothing on disk.
    Fresh,
    /// 416: the local file is assumed to already hold the whole resource.
    Complete,
    /// Anything else.
    Failed {
        #[serde(serialize_with = "serialize_status")]
        status: StatusCode,
    },
}

fn serialize_status<S: serde::Serializer>(status: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u16(status.as_u16())
}

impl NegotiationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            NegotiationOutcome::Resumed { .. } => "resumed",
            NegotiationOutcome::Restarted => "restarted",
            NegotiationOutcome::Fresh => "fresh",
            NegotiationOutcome::Complete => "complete",
            NegotiationOutcome::Failed { .. } => "failed",
        }
    }
}

/// Snapshot taken after each chunk write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferProgress {
    pub bytes_written_total: u64,
    pub bytes_written_session: u64,
    /// 0 when the server did not say how big the resource is.
    pub total_size: u64,
    pub elapsed_secs: f64,
    /// Bytes per second over this session, absent while elapsed time is ~0.
    pub speed: Option<f64>,
}

impl TransferProgress {
    pub fn new(
        bytes_written_total: u64,
        bytes_written_session: u64,
        total_size: u64,
        elapsed: Duration,
    ) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        let speed = if elapsed_secs > 1e-3 {
            Some(bytes_written_session as f64 / elapsed_secs)
        } else {
            None
        };
        Self {
            bytes_written_total,
            bytes_written_session,
            total_size,
            elapsed_secs,
            speed,
        }
    }

    /// Percentage in 0..=100, or `None` when the total size is unknown.
    pub fn percent(&self) -> Option<f64> {
        if self.total_size > 0 {
            Some(self.bytes_written_total as f64 / self.total_size as f64 * 100.0)
        } else {
            None
        }
    }
}

/// Everything the engine tells its observer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransferEvent {
    Negotiated {
        outcome: NegotiationOutcome,
        resume_from: u64,
        total_size: u64,
    },
    Progress(TransferProgress),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    /// `None` when the call stopped before the server answered.
    pub outcome: Option<NegotiationOutcome>,
    /// Bytes of the resource durably on disk when the call returned.
    pub bytes_written_total: u64,
    pub bytes_written_session: u64,
    pub total_size: u64,
}

#[derive(Debug)]
pub enum TerminalStatus {
    Completed(TransferSummary),
    Interrupted(TransferSummary),
    Failed(TransferError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_omitted_when_total_unknown() {
        let p = TransferProgress::new(4096, 4096, 0, Duration::from_secs(1));
        assert_eq!(p.percent(), None);

        let p = TransferProgress::new(500, 500, 1000, Duration::from_secs(1));
        assert_eq!(p.percent(), Some(50.0));
    }

    #[test]
    fn speed_is_omitted_without_elapsed_time() {
        let p = TransferProgress::new(1024, 1024, 2048, Duration::ZERO);
        assert_eq!(p.speed, None);

        let p = TransferProgress::new(3000, 2000, 0, Duration::from_secs(2));
        assert_eq!(p.speed, Some(1000.0));
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let req = TransferRequest::new("http://x/a.bin", "a.bin").with_chunk_size(0);
        assert_eq!(req.chunk_size, 1);
        assert_eq!(TransferRequest::new("http://x/a.bin", "a.bin").chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn progress_event_serializes_as_tagged_json() {
        let event = TransferEvent::Negotiated {
            outcome: NegotiationOutcome::Failed { status: StatusCode::NOT_FOUND },
            resume_from: 0,
            total_size: 0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "negotiated");
        assert_eq!(json["outcome"]["kind"], "failed");
        assert_eq!(json["outcome"]["status"], 404);
    }
}
