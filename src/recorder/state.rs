//! Recording state management
//!
//! Defines the recorder state machine and per-session bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Current state of the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Currently recording
    Recording,
}

/// Metadata for one Start..Stop session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    /// Unique session ID
    pub id: Uuid,

    /// Output file
    pub path: PathBuf,

    /// Wall-clock start time
    pub started_at: DateTime<Utc>,

    /// Ogg stream serial
    pub serial: u32,
}

impl RecordingSession {
    /// Create a new session starting now
    pub fn new(path: PathBuf, serial: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            started_at: Utc::now(),
            serial,
        }
    }

    /// Milliseconds since the session started
    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOutput {
    /// Session ID
    pub session_id: Uuid,

    /// Path to the recorded file
    pub path: PathBuf,

    /// Frames accepted into the frame channel
    pub frames_captured: u64,

    /// Frames encoded into the file
    pub frames_encoded: u64,

    /// Ogg pages written
    pub pages_written: u64,

    /// Bytes written to the file
    pub bytes_written: u64,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,

    /// First error hit by the encode thread, if any
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_default_and_serde() {
        assert_eq!(RecordingState::default(), RecordingState::Idle);
        assert_eq!(
            serde_json::to_string(&RecordingState::Recording).unwrap(),
            "\"recording\""
        );
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        let a = RecordingSession::new(PathBuf::from("a.ogg"), 1);
        let b = RecordingSession::new(PathBuf::from("b.ogg"), 2);
        assert_ne!(a.id, b.id);
        assert!(a.elapsed_ms() < 60_000);
    }

    #[test]
    fn test_output_serializes_camel_case() {
        let output = RecordingOutput {
            session_id: Uuid::nil(),
            path: PathBuf::from("/tmp/recording.ogg"),
            frames_captured: 3,
            frames_encoded: 3,
            pages_written: 4,
            bytes_written: 1024,
            duration_ms: 100,
            error: None,
        };
        let json = serde_json::to_string(&output).unwrap();
        assert!(json.contains("\"framesEncoded\":3"));
        assert!(json.contains("\"bytesWritten\":1024"));
    }
}
