use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChoroplethError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Schema(String),

    #[error("no usable values in column \"{metric}\"")]
    EmptyInput { metric: String },

    #[error("Map data unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Unknown district: {0}")]
    UnknownDistrict(String),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("invalid value {value:?} in column \"{column}\" at row {row}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },

    #[error("cannot read uploaded file '{path}': {reason}")]
    UnreadableUpload { path: String, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChoroplethError {
    /// HTTP status a handler reports for this failure. Anything the caller
    /// can fix by changing the request is a 400.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Schema(_)
            | Self::EmptyInput { .. }
            | Self::UnknownDistrict(_)
            | Self::UnknownMetric(_)
            | Self::InvalidValue { .. }
            | Self::UnreadableUpload { .. }
            | Self::Csv(_) => 400,
            _ => 500,
        }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ChoroplethError>;
