// Push-channel frame decoding
//
// One logical frame carries at most one record. Accepted shapes:
//   {"id": 43, "timestamp": 1001, "channels": [...], "sessionId": "..."}
//   {"type": "eeg_record", "record": {...}}
// Any other `{"type": ...}` envelope (acks such as `data_received`, `data_error`,
// `error`) is a control message and carries no record.

use crate::record::EegRecord;
use crate::types::{FeedError, FeedResult};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Record(EegRecord),
    Control { kind: String, body: Value },
}

const RECORD_TYPES: &[&str] = &["eeg_record", "record"];

pub fn decode_frame(text: &str) -> FeedResult<Frame> {
    let value: Value = serde_json::from_str(text)?;

    let kind = match value.get("type") {
        Some(Value::String(kind)) => Some(kind.clone()),
        Some(other) => {
            return Err(FeedError::Protocol(format!(
                "frame type must be a string, got {}",
                other
            )))
        }
        None => None,
    };

    match kind {
        Some(kind) if RECORD_TYPES.contains(&kind.as_str()) => {
            let record = value
                .get("record")
                .cloned()
                .ok_or_else(|| FeedError::Protocol(format!("'{}' frame has no record", kind)))?;
            Ok(Frame::Record(serde_json::from_value(record)?))
        }
        Some(kind) => Ok(Frame::Control { kind, body: value }),
        None => Ok(Frame::Record(serde_json::from_value(value)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordId;

    #[test]
    fn test_bare_record() {
        let frame = decode_frame(r#"{"id":43,"timestamp":1001,"channels":[0.3,0.4]}"#).unwrap();
        match frame {
            Frame::Record(record) => {
                assert_eq!(record.id, RecordId(43));
                assert_eq!(record.channels, vec![0.3, 0.4]);
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_enveloped_record() {
        let frame = decode_frame(
            r#"{"type":"eeg_record","record":{"id":7,"timestamp":5,"channels":[],"sessionId":"s"}}"#,
        )
        .unwrap();
        assert!(matches!(frame, Frame::Record(ref r) if r.session_id == "s"));
    }

    #[test]
    fn test_control_messages_pass_through() {
        let frame = decode_frame(r#"{"type":"data_received","timestamp":"2024-01-01T00:00:00"}"#)
            .unwrap();
        assert!(matches!(frame, Frame::Control { ref kind, .. } if kind == "data_received"));
    }

    #[test]
    fn test_malformed_frames_are_protocol_errors() {
        for text in [
            "not json",
            r#"{"id":"abc","timestamp":1,"channels":[]}"#,
            r#"{"type":"eeg_record"}"#,
            r#"{"type":5}"#,
            "[1,2,3]",
        ] {
            assert!(
                matches!(decode_frame(text), Err(FeedError::Protocol(_))),
                "{} should be rejected",
                text
            );
        }
    }
}
