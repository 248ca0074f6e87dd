//! Error types for proxkit operations.
//!
//! Only failures the caller has to see live here: upstream I/O, malformed
//! inputs and bad parameters. Per-record problems (a missing attribute value,
//! a zero weight sum) are absorbed where they happen and never surface as an
//! `Error`.

use thiserror::Error;

/// Main error type for table, weights and analysis operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid table: {0}")]
    InvalidTable(String),

    #[error("Unsupported geometry type: {0} (only Point is supported)")]
    UnsupportedGeometry(String),

    #[error("Field not found: {field} in table {table}")]
    FieldNotFound { field: String, table: String },

    #[error("Join field {field} from the weights relation has no match in table {table}")]
    JoinFieldNotFound { field: String, table: String },

    #[error("Invalid weight {weight} for {entity} -> {neighbor}: weights must be finite and non-negative")]
    InvalidWeight {
        entity: String,
        neighbor: String,
        weight: f64,
    },

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Result type alias for proxkit operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_not_found_message() {
        let err = Error::FieldNotFound {
            field: "POP".to_string(),
            table: "parcels".to_string(),
        };
        assert_eq!(err.to_string(), "Field not found: POP in table parcels");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.json");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
