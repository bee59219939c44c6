//! Native crash marker
//!
//! The out-of-process crash handler serializes a [`CrashLog`] as JSON into the
//! granted crash directory right before the process dies.

use serde::{Deserialize, Serialize};

use crate::error::CrashLogError;

/// Crash details written by the native crash handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashLog {
    /// Raw signal number
    pub signal: i32,
    /// Human readable signal name (e.g. `SIGSEGV`)
    pub signal_name: String,
    /// Wall clock time of the crash, in milliseconds since epoch
    pub timestamp: i64,
    /// Time elapsed since the application started, when known
    #[serde(default)]
    pub time_since_app_start_ms: Option<i64>,
    /// Handler supplied message
    #[serde(default)]
    pub message: String,
    /// Native stack trace
    #[serde(default)]
    pub stacktrace: String,
}

impl CrashLog {
    /// Parse a crash log from the marker file content
    pub fn from_json(bytes: &[u8]) -> Result<Self, CrashLogError> {
        let log: CrashLog = serde_json::from_slice(bytes)?;
        if log.signal_name.is_empty() {
            return Err(CrashLogError::MissingField("signal_name"));
        }
        Ok(log)
    }

    /// Serialize to the marker file content
    pub fn to_json(&self) -> Result<Vec<u8>, CrashLogError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CrashLog {
        CrashLog {
            signal: 11,
            signal_name: "SIGSEGV".to_string(),
            timestamp: 1_700_000_000_000,
            time_since_app_start_ms: Some(5_400),
            message: "Segmentation fault".to_string(),
            stacktrace: "#00 pc 0000 libapp.so".to_string(),
        }
    }

    #[test]
    fn test_json_round_trip() {
        let log = sample();
        let bytes = log.to_json().unwrap();
        assert_eq!(CrashLog::from_json(&bytes).unwrap(), log);
    }

    #[test]
    fn test_optional_fields_default() {
        let log = CrashLog::from_json(
            br#"{"signal":6,"signal_name":"SIGABRT","timestamp":10}"#,
        )
        .unwrap();
        assert_eq!(log.time_since_app_start_ms, None);
        assert!(log.stacktrace.is_empty());
    }

    #[test]
    fn test_malformed_marker() {
        assert!(matches!(
            CrashLog::from_json(b"\x00\x01garbage"),
            Err(CrashLogError::Malformed(_))
        ));
        assert!(matches!(
            CrashLog::from_json(br#"{"signal":6,"signal_name":"","timestamp":10}"#),
            Err(CrashLogError::MissingField("signal_name"))
        ));
    }
}
