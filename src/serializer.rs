//! Record → bytes encoding.
//!
//! Runs on the caller thread by default so CPU cost is charged to the
//! producer, not the writer. The default encoding is a
//! compact JSON-like line, keys ordered `ts, tid, lvl, mt, at, st, dur,
//! msg` followed by user fields and context, terminated by `\n` — one
//! self-delimiting line per record.

use bytes::Bytes;

use crate::error::PipelineError;
use crate::record::Record;

pub trait RecordSerializer: Send + Sync {
    /// Serialize one record to a `\n`-terminated line. Never fails the
    /// pipeline: on encoding trouble (e.g. a non-finite float) a
    /// best-effort placeholder line is produced instead, and the
    /// swallowed error is returned alongside it so the caller can count
    /// it in `Metrics`.
    fn serialize(&self, record: &Record) -> (Bytes, Option<PipelineError>);
}

/// The default line-oriented JSON serializer.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineSerializer;

impl RecordSerializer for LineSerializer {
    fn serialize(&self, record: &Record) -> (Bytes, Option<PipelineError>) {
        match serde_json::to_vec(record) {
            Ok(mut buf) => {
                buf.push(b'\n');
                (Bytes::from(buf), None)
            }
            Err(err) => {
                let placeholder = placeholder_line(record, &err);
                (
                    Bytes::from(placeholder),
                    Some(PipelineError::SerializationError {
                        reason: err.to_string(),
                    }),
                )
            }
        }
    }
}

/// Best-effort rendering used when the structured encode fails: the
/// record is replaced with a minimal placeholder line carrying the
/// original message and the encode error, rather than being dropped.
fn placeholder_line(record: &Record, err: &serde_json::Error) -> Vec<u8> {
    let msg = format!(
        "{{\"ts\":{},\"tid\":{:?},\"lvl\":{:?},\"mt\":\"serialization_error\",\"msg\":{:?}}}\n",
        record.timestamp,
        record.task_id.as_str(),
        record.level.as_str(),
        format!("{}: {}", record.message, err),
    );
    msg.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::new_root;
    use crate::record::{Level, OrderedFields};

    #[test]
    fn line_is_newline_terminated() {
        let rec = Record::new(
            1.0,
            Level::Info,
            "hi",
            None,
            OrderedFields::new(),
            OrderedFields::new(),
            new_root(),
            vec![1],
        );
        let (bytes, err) = LineSerializer.serialize(&rec);
        assert!(err.is_none());
        assert!(bytes.ends_with(b"\n"));
        assert_eq!(bytes.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn non_finite_float_falls_back_to_placeholder() {
        let mut fields = OrderedFields::new();
        fields.push("ratio", f64::NAN);
        let rec = Record::new(
            1.0,
            Level::Error,
            "bad value",
            None,
            fields,
            OrderedFields::new(),
            new_root(),
            vec![1],
        );
        let (bytes, err) = LineSerializer.serialize(&rec);
        assert!(err.is_some());
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("serialization_error"));
        assert!(text.ends_with('\n'));
    }
}
