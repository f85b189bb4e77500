use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Bad input price data; the bar can be dropped and ingestion continued.
    #[error("Malformed bar at {timestamp}: {reason}")]
    MalformedBar {
        timestamp: NaiveDateTime,
        reason: String,
    },

    #[error("No valid parameter configuration was found for {date}")]
    NoParameterConfiguration { date: NaiveDate },

    #[error("No parameters found")]
    EmptyConfiguration,

    /// A strategy produced an impossible trade setup.
    #[error("Invalid trade setup at {timestamp}: {reason}")]
    StrategyConfiguration {
        timestamp: NaiveDateTime,
        reason: String,
    },

    #[error("No viable candidate among {candidates} decisions")]
    NoViableCandidate { candidates: usize },

    #[error("Invalid date range: start {start} must be before end {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Unknown strategy template: {0}")]
    UnknownStrategy(String),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Simulation cancelled before bucket {bucket}")]
    Cancelled { bucket: NaiveDate },
}

impl EngineError {
    /// Stable label used when a failure is stored alongside results.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::MalformedBar { .. } => "malformed_bar",
            EngineError::NoParameterConfiguration { .. } => "no_parameter_configuration",
            EngineError::EmptyConfiguration => "empty_configuration",
            EngineError::StrategyConfiguration { .. } => "strategy_configuration",
            EngineError::NoViableCandidate { .. } => "no_viable_candidate",
            EngineError::InvalidDateRange { .. } => "invalid_date_range",
            EngineError::UnknownStrategy(_) => "unknown_strategy",
            EngineError::InvalidParameter { .. } => "invalid_parameter",
            EngineError::Cancelled { .. } => "cancelled",
        }
    }

    pub fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        EngineError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
