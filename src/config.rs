use std::time::Duration;

/// Default size of a single disk write: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_NEGOTIATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Knobs for the HTTP client behind the engine.
///
/// Only connecting and waiting for response headers are bounded; the body
/// stream itself may take as long as it needs.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub connect_timeout: Duration,
    pub negotiate_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            negotiate_timeout: DEFAULT_NEGOTIATE_TIMEOUT,
            user_agent: concat!("resume-dl/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}
