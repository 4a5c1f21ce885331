//! Error types for the launcher

use thiserror::Error;

/// Errors surfaced by platform resolution, provisioning and tunnel launch.
#[derive(Error, Debug)]
pub enum Error {
    /// No cloudflared release artifact exists for this OS/architecture pair
    #[error("{os}/{arch} is not supported")]
    UnsupportedPlatform { os: String, arch: String },

    /// Download request failed or returned a non-success status
    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),

    /// The darwin release archive could not be extracted
    #[error("failed to unpack archive: {0}")]
    Unpack(String),

    /// Filesystem or process-spawn error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The diagnostic stream never produced both URLs within the line budget
    #[error("cloudflared failed to start")]
    TunnelStart,

    /// Termination requested for a port with no registered tunnel
    #[error("no tunnel running on port {0}")]
    NotRunning(u16),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
