use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateCaseError {
    #[error("Missing source data: {source_name}")]
    MissingSource { source_name: String },

    #[error("Invariant '{invariant}' violated for {utility} ({year}): {details}")]
    InvariantViolation {
        utility: String,
        year: i32,
        invariant: String,
        details: String,
    },

    #[error("Duplicate record for {utility} ({year})")]
    DuplicateRecord { utility: String, year: i32 },

    #[error("Coverage shortfall: expected {expected} utility-years, found {actual}; missing: {}", missing.join(", "))]
    CoverageShortfall {
        expected: usize,
        actual: usize,
        missing: Vec<String>,
    },

    #[error("Missing field '{field}' for {utility} ({year})")]
    MissingField {
        utility: String,
        year: i32,
        field: String,
    },

    #[error("Invalid assumption: {0}")]
    InvalidAssumption(String),

    #[error("Invalid crosswalk: {0}")]
    InvalidCrosswalk(String),

    #[error("Invalid chart of accounts: {0}")]
    InvalidChart(String),

    #[error("Invalid sensitivity grid: {0}")]
    InvalidSensitivityGrid(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RateCaseError>;
