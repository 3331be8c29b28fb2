use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEvent {
    StepLine,
    Return,
}

/// Program state at one executed line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub event: TraceEvent,
    pub func_name: String,
    pub line: u32,
    pub variables: Map<String, Value>,
    pub heap: Map<String, Value>,
}

/// Ordered, append-only list of trace records for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceSequence(Vec<TraceRecord>);

impl TraceSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: TraceRecord) {
        self.0.push(record);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TraceRecord> {
        self.0.iter()
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a TraceSequence {
    type Item = &'a TraceRecord;
    type IntoIter = std::slice::Iter<'a, TraceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The published file: the traced source next to its trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceDocument {
    pub code: String,
    pub trace: TraceSequence,
}
