use super::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum InternalError {
    #[snafu(display("Failed to serialize JSON: {source}"))]
    Serialization {
        #[snafu(source(from(serde_json::Error, Box::new)))]
        source: Box<serde_json::Error>,
    },

    #[snafu(display("Failed to parse hex string: {source}"))]
    HexParse { source: hex::FromHexError },

    #[snafu(display("Invalid length: expected {expected}, got {actual}"))]
    InvalidLength { expected: usize, actual: usize },

    #[snafu(display("Invalid value: {reason}"))]
    InvalidValue { reason: String },

    #[snafu(display("Parse error: {message}"))]
    Parse { message: String },

    #[snafu(display("{message}"))]
    Protocol { message: String },

    #[snafu(display("Connection closed by pool"))]
    Disconnected,

    #[snafu(display("Timed out waiting for response id {id}"))]
    ResponseTimeout { id: u32 },

    #[snafu(display("Connection timeout: {source}"))]
    Timeout { source: tokio::time::error::Elapsed },

    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },
}

impl From<std::io::Error> for InternalError {
    fn from(source: std::io::Error) -> Self {
        InternalError::Io { source }
    }
}

impl From<serde_json::Error> for InternalError {
    fn from(source: serde_json::Error) -> Self {
        InternalError::Serialization {
            source: Box::new(source),
        }
    }
}

/// The `[code, message, traceback]` error array of stratum responses.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    pub traceback: Option<Value>,
}

impl Serialize for JsonRpcError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.code, &self.message, &self.traceback).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for JsonRpcError {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;

        let array = value
            .as_array()
            .ok_or_else(|| de::Error::custom("stratum error must be an array"))?;

        let code = array
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| de::Error::custom("stratum error code must be an integer"))?;

        let message = array
            .get(1)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            code,
            message,
            traceback: array.get(2).filter(|v| !v.is_null()).cloned(),
        })
    }
}

impl Display for JsonRpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_array_roundtrip() {
        let error: JsonRpcError = serde_json::from_str(r#"[21,"Job not found",null]"#).unwrap();
        assert_eq!(error.code, 21);
        assert_eq!(error.message, "Job not found");
        assert_eq!(error.traceback, None);
        assert_eq!(error.to_string(), "21: Job not found");

        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!([21, "Job not found", null])
        );
    }

    #[test]
    fn error_array_tolerates_short_and_long_forms() {
        let error: JsonRpcError = serde_json::from_str(r#"[25]"#).unwrap();
        assert_eq!(error.code, 25);
        assert_eq!(error.message, "");

        let error: JsonRpcError =
            serde_json::from_str(r#"[20,"Other/Unknown",{"detail":"x"}]"#).unwrap();
        assert_eq!(error.traceback, Some(json!({"detail": "x"})));
    }

    #[test]
    fn error_array_rejects_non_arrays() {
        assert!(serde_json::from_str::<JsonRpcError>(r#""stale""#).is_err());
        assert!(serde_json::from_str::<JsonRpcError>(r#"{"code":1}"#).is_err());
    }

    #[test]
    fn internal_error_display() {
        let err = InternalError::InvalidLength {
            expected: 64,
            actual: 32,
        };
        assert_eq!(err.to_string(), "Invalid length: expected 64, got 32");

        let err = InternalError::Parse {
            message: "bad field".into(),
        };
        assert_eq!(err.to_string(), "Parse error: bad field");
    }
}
