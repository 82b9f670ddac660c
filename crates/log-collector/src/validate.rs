// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;

/// The five accepted record levels, lowercase as they appear on the
/// wire.
pub const LOG_LEVELS: [&str; 5] = ["log", "info", "warn", "error", "debug"];

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("level must be one of log, info, warn, error, debug")]
    InvalidLevel,
    #[error("message must be a non-empty string")]
    InvalidMessage,
    #[error("timestamp is required")]
    MissingTimestamp,
}

/// A record that passed validation and normalization: message
/// truncated to the configured maximum, optional fields coerced away
/// unless they carry the expected shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRecord {
    pub level: String,
    pub message: String,
    pub timestamp: String,
    pub source: Option<String>,
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub args: Option<Vec<Value>>,
}

/// Validates a raw payload against the record contract. The producer
/// is not trusted: the message is re-truncated here regardless of what
/// the wire claims, and non-string metadata fields are dropped rather
/// than rejected. The timestamp is an opaque pass-through.
pub fn validate_record(raw: &Value, max_log_size: usize) -> Result<ValidRecord, ValidationError> {
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let level = obj
        .get("level")
        .and_then(Value::as_str)
        .filter(|level| LOG_LEVELS.contains(level))
        .ok_or(ValidationError::InvalidLevel)?;

    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .filter(|message| !message.is_empty())
        .ok_or(ValidationError::InvalidMessage)?;

    let timestamp = match obj.get("timestamp") {
        None | Some(Value::Null) => return Err(ValidationError::MissingTimestamp),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };

    let opt_str = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);

    Ok(ValidRecord {
        level: level.to_string(),
        message: truncate_chars(message, max_log_size),
        timestamp,
        source: opt_str("source"),
        url: opt_str("url"),
        user_agent: opt_str("userAgent"),
        session_id: opt_str("sessionId"),
        args: obj.get("args").and_then(Value::as_array).cloned(),
    })
}

/// Character-based truncation; idempotent by construction.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
