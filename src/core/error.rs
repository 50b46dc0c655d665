use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the fetch core.
/// Every module returns `Result<T, FetchError>`.
#[derive(Debug, Error)]
pub enum FetchError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    // ── Jobs ────────────────────────────────────────────
    #[error("Job '{job}' failed to process:\n{}", display_paths(.failed))]
    JobFailed { job: String, failed: Vec<PathBuf> },

    #[error(
        "Some libraries marked as 'local' are missing their jar files:\n{}\n\n\
         You'll have to correct this problem manually.",
        display_paths(.0)
    )]
    MissingLocalLibraries(Vec<PathBuf>),

    #[error("Downloaded content at {path:?} is invalid: {reason}")]
    InvalidContent { path: PathBuf, reason: String },

    // ── Cache ───────────────────────────────────────────
    #[error("Unknown cache namespace: {0}")]
    UnknownCacheBase(String),

    #[error("Cache path {0:?} leaves its namespace")]
    InvalidCachePath(String),

    // ── Maven ───────────────────────────────────────────
    #[error("Invalid Maven coordinate: {0}")]
    InvalidMavenCoordinate(String),

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type FetchResult<T> = Result<T, FetchError>;

impl From<std::io::Error> for FetchError {
    fn from(source: std::io::Error) -> Self {
        FetchError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
