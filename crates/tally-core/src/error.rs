use time::OffsetDateTime;

/// Contract violations raised before any processing starts.
///
/// Data-quality problems inside individual months are never reported here;
/// they degrade to zero/empty values and set the bucket's `unreconciled` flag.
#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    #[error("raw months must be a JSON array, got {found}")]
    NotAnArray { found: &'static str },

    #[error("invalid date range: start {start} is after end {end}")]
    InvertedRange {
        start: OffsetDateTime,
        end: OffsetDateTime,
    },

    #[error("invalid timestamp: {input:?}")]
    InvalidTimestamp { input: String },
}

pub type Result<T> = std::result::Result<T, TallyError>;

/// Short JSON type name for error messages.
pub fn json_type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn not_an_array_message_names_type() {
        let err = TallyError::NotAnArray {
            found: json_type_name(&serde_json::json!({"months": []})),
        };
        assert_eq!(err.to_string(), "raw months must be a JSON array, got object");
    }

    #[test]
    fn inverted_range_message_has_both_ends() {
        let err = TallyError::InvertedRange {
            start: datetime!(2024-03-01 0:00 UTC),
            end: datetime!(2024-01-01 0:00 UTC),
        };
        let msg = err.to_string();
        assert!(msg.contains("2024-03-01"));
        assert!(msg.contains("2024-01-01"));
    }
}
