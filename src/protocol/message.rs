use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One JSON message of the V8 debugger protocol, tagged by its `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum V8Message {
    Request(Request),
    Response(Response),
    Event(Event),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub seq: u64,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub request_seq: u64,
    #[serde(default)]
    pub command: String,
    pub success: bool,
    #[serde(default)]
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Mirrors of objects referenced from `body` (scripts, functions).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<Value>,
}

impl Response {
    pub fn ok(request_seq: u64, command: &str, body: Value) -> Self {
        Self {
            seq: 0,
            request_seq,
            command: command.to_string(),
            success: true,
            running: false,
            message: None,
            body: Some(body),
            refs: Vec::new(),
        }
    }

    pub fn with_refs(mut self, refs: Vec<Value>) -> Self {
        self.refs = refs;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub seq: u64,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Where the target stopped, as reported by a `break` event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakEvent {
    pub script_name: Option<String>,
    pub source_line: Option<u32>,
}

impl BreakEvent {
    pub fn from_body(body: Option<&Value>) -> Self {
        let script_name = body
            .and_then(|b| b.get("script"))
            .and_then(|s| s.get("name"))
            .and_then(|n| n.as_str())
            .map(str::to_string);
        let source_line = body
            .and_then(|b| b.get("sourceLine"))
            .and_then(|l| l.as_u64())
            .and_then(|l| u32::try_from(l).ok());
        Self {
            script_name,
            source_line,
        }
    }
}

/// What the session controller sees coming out of the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum DebuggerEvent {
    /// Protocol handshake received.
    Connect,
    Break(BreakEvent),
    /// Unhandled exception in the target.
    Exception(Value),
    /// Transport trouble. The stream is still read until it closes.
    Error(String),
    /// Any other event (`afterCompile`, `scriptCollected` ...).
    Other(String),
    Close,
}

impl From<Event> for DebuggerEvent {
    fn from(event: Event) -> Self {
        match event.event.as_str() {
            "break" => Self::Break(BreakEvent::from_body(event.body.as_ref())),
            "exception" => Self::Exception(event.body.unwrap_or(Value::Null)),
            _ => Self::Other(event.event),
        }
    }
}
