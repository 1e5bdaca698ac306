use clap::ValueEnum;

/// How transfer progress is shown.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressMode {
    /// Interactive progress bar on stderr
    Bar,
    /// One carriage-returned status line on stderr
    Plain,
    /// One JSON object per event on stdout
    Json,
    Off,
}
