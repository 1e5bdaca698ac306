mod cli;
mod commands;
mod config;
mod downloader;
mod error;
mod progress;
mod state;
mod utils;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::cli::ProgressMode;
use crate::config::{TransferConfig, DEFAULT_CHUNK_SIZE};

#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable single-file HTTP downloader", long_about = None)]
struct Args {
    /// URL to download
    #[arg(index = 1)]
    url: String,

    /// Output file (defaults to the last segment of the URL path)
    #[arg(index = 2)]
    output: Option<PathBuf>,

    /// Bytes written to disk per chunk
    #[arg(short = 'c', long = "chunk-size", default_value_t = DEFAULT_CHUNK_SIZE, value_parser = parse_chunk_size)]
    chunk_size: usize,

    /// Seconds allowed for establishing the connection
    #[arg(long = "connect-timeout", default_value_t = 30)]
    connect_timeout: u64,

    /// Seconds allowed for the server to answer the request (the body itself is not limited)
    #[arg(long = "negotiate-timeout", default_value_t = 30)]
    negotiate_timeout: u64,

    /// Override the User-Agent header
    #[arg(long = "user-agent")]
    user_agent: Option<String>,

    /// Progress display
    #[arg(short = 'p', long = "progress", value_enum, default_value = "bar")]
    progress: ProgressMode,

    /// Log debug details
    #[arg(short = 'v', long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short = 'q', long)]
    quiet: bool,
}

fn parse_chunk_size(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("chunk size must be at least 1 byte".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let mut config = TransferConfig {
        connect_timeout: Duration::from_secs(args.connect_timeout),
        negotiate_timeout: Duration::from_secs(args.negotiate_timeout),
        ..TransferConfig::default()
    };
    if let Some(user_agent) = args.user_agent {
        config.user_agent = user_agent;
    }

    let rt = tokio::runtime::Runtime::new()?;
    let status = rt.block_on(async {
        crate::commands::run_transfer(
            args.url,
            args.output,
            args.chunk_size,
            config,
            args.progress,
        )
        .await
    })?;

    Ok(ExitCode::from(crate::commands::exit_code(&status)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_accept_url_and_optional_output() {
        let args = Args::try_parse_from(["resume-dl", "https://example.com/a.pbf"]).unwrap();
        assert_eq!(args.url, "https://example.com/a.pbf");
        assert!(args.output.is_none());
        assert_eq!(args.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(args.progress, ProgressMode::Bar);

        let args = Args::try_parse_from([
            "resume-dl",
            "https://example.com/a.pbf",
            "out.pbf",
            "--chunk-size",
            "4096",
            "-p",
            "json",
        ])
        .unwrap();
        assert_eq!(args.output, Some(PathBuf::from("out.pbf")));
        assert_eq!(args.chunk_size, 4096);
        assert_eq!(args.progress, ProgressMode::Json);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(Args::try_parse_from(["resume-dl", "http://x/y", "-c", "0"]).is_err());
    }
}
