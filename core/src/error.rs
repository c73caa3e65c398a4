use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid calendar month '{raw}' (expected YYYY-MM)")]
    InvalidMonth { raw: String },

    #[error("Month sequence is not contiguous: {previous} is followed by {next}")]
    NonContiguousMonths { previous: String, next: String },

    #[error("Analysis window is empty")]
    EmptyWindow,

    #[error("Run '{run_id}' not initialized")]
    RunNotInitialized { run_id: String },

    #[error("Stage '{name}' not found")]
    StageNotFound { name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type MetricsResult<T> = Result<T, MetricsError>;
