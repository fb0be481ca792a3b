//! The structured log record.
//!
//! A `Record` is immutable once built: every producer-side field is set
//! by `Record::new`/`RecordBuilder` and never mutated afterward — the
//! enqueueing thread owns it exclusively until serialization, at which
//! point ownership of the resulting bytes passes to the writer thread.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::id::TaskId;

/// Severity / record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Debug,
    Info,
    Success,
    Note,
    Warning,
    Error,
    Critical,
    Checkpoint,
}

impl Level {
    /// Short tag used as the default `message_type` when the caller does
    /// not supply one.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Success => "success",
            Level::Note => "note",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
            Level::Checkpoint => "checkpoint",
        }
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

/// An action scope's status at the point a record was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Started,
    Succeeded,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Started => "started",
            ActionStatus::Succeeded => "succeeded",
            ActionStatus::Failed => "failed",
        }
    }
}

impl Serialize for ActionStatus {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

/// A single field value. Ordered nested maps keep insertion order
/// round-trip significant.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Map(Vec<(String, FieldValue)>),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Int(v) => s.serialize_i64(*v),
            FieldValue::UInt(v) => s.serialize_u64(*v),
            FieldValue::Float(v) => s.serialize_f64(*v),
            FieldValue::Bool(v) => s.serialize_bool(*v),
            FieldValue::Str(v) => s.serialize_str(v),
            FieldValue::Bytes(v) => {
                // Not all serializers (incl. the default JSON-line one)
                // can emit raw bytes; render as a base64-free hex string
                // so the wire format stays a single self-delimiting line.
                let hex: String = v.iter().map(|b| format!("{b:02x}")).collect();
                s.serialize_str(&hex)
            }
            FieldValue::Map(entries) => {
                let mut map = s.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

macro_rules! from_impls {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for FieldValue {
            fn from(v: $t) -> Self { FieldValue::$variant(v.into()) }
        })*
    };
}

from_impls! {
    i64 => Int, i32 => Int, i16 => Int,
    u64 => UInt, u32 => UInt, u16 => UInt,
    f64 => Float, f32 => Float,
    bool => Bool,
    String => Str,
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

/// An ordered `(name, value)` vector — used for both the record's own
/// `fields` and the ambient `context` snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderedFields(pub Vec<(String, FieldValue)>);

impl OrderedFields {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, FieldValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, FieldValue)> for OrderedFields {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The immutable structured log record.
#[derive(Debug, Clone)]
pub struct Record {
    pub timestamp: f64,
    pub level: Level,
    pub message: String,
    pub message_type: String,
    pub fields: OrderedFields,
    pub context: OrderedFields,
    pub task_id: TaskId,
    /// Non-empty path of 1-based indices from root to this record's
    /// position in the current action tree.
    pub task_level: Vec<u32>,
    pub action_type: Option<String>,
    pub action_status: Option<ActionStatus>,
    /// Populated on action-end records; elapsed seconds since the
    /// matching start record.
    pub duration_secs: Option<f64>,
}

impl Record {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: f64,
        level: Level,
        message: impl Into<String>,
        message_type: Option<String>,
        fields: OrderedFields,
        context: OrderedFields,
        task_id: TaskId,
        task_level: Vec<u32>,
    ) -> Self {
        assert!(!task_level.is_empty(), "task_level must never be empty");
        let message_type = message_type.unwrap_or_else(|| level.as_str().to_string());
        Record {
            timestamp,
            level,
            message: message.into(),
            message_type,
            fields,
            context,
            task_id,
            task_level,
            action_type: None,
            action_status: None,
            duration_secs: None,
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let extra = 8
            + usize::from(self.action_type.is_some())
            + usize::from(self.action_status.is_some())
            + usize::from(self.duration_secs.is_some())
            + self.fields.0.len()
            + self.context.0.len();
        let mut map = s.serialize_map(Some(extra))?;
        map.serialize_entry("ts", &self.timestamp)?;
        map.serialize_entry("tid", self.task_id.as_str())?;
        map.serialize_entry("lvl", &self.level)?;
        map.serialize_entry("mt", &self.message_type)?;
        if let Some(at) = &self.action_type {
            map.serialize_entry("at", at)?;
        }
        if let Some(st) = &self.action_status {
            map.serialize_entry("st", st)?;
        }
        if let Some(dur) = self.duration_secs {
            map.serialize_entry("dur", &dur)?;
        }
        map.serialize_entry("msg", &self.message)?;
        for (k, v) in &self.fields.0 {
            map.serialize_entry(k, v)?;
        }
        for (k, v) in &self.context.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::new_root;

    #[test]
    fn serializes_keys_in_documented_order() {
        let mut fields = OrderedFields::new();
        fields.push("user", "alice");
        let rec = Record::new(
            1.5,
            Level::Info,
            "hello",
            None,
            fields,
            OrderedFields::new(),
            new_root(),
            vec![1],
        );
        let json = serde_json::to_string(&rec).unwrap();
        let ts_pos = json.find("\"ts\"").unwrap();
        let tid_pos = json.find("\"tid\"").unwrap();
        let lvl_pos = json.find("\"lvl\"").unwrap();
        let msg_pos = json.find("\"msg\"").unwrap();
        let user_pos = json.find("\"user\"").unwrap();
        assert!(ts_pos < tid_pos);
        assert!(tid_pos < lvl_pos);
        assert!(lvl_pos < msg_pos);
        assert!(msg_pos < user_pos);
    }

    #[test]
    fn message_type_defaults_to_level() {
        let rec = Record::new(
            0.0,
            Level::Warning,
            "m",
            None,
            OrderedFields::new(),
            OrderedFields::new(),
            new_root(),
            vec![1],
        );
        assert_eq!(rec.message_type, "warning");
    }

    #[test]
    #[should_panic(expected = "task_level must never be empty")]
    fn empty_task_level_panics() {
        Record::new(
            0.0,
            Level::Info,
            "m",
            None,
            OrderedFields::new(),
            OrderedFields::new(),
            new_root(),
            vec![],
        );
    }
}
