use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::debugger::{Binding, Handle, SourceDescriptor, StackFrame};
use crate::error::{Error, Result};

/// Frames returned by a `backtrace` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Backtrace {
    pub frames: Vec<StackFrame>,
    pub to_frame: usize,
}

impl Backtrace {
    /// Frames `[0, toFrame)`, innermost first.
    pub fn captured(&self) -> &[StackFrame] {
        &self.frames[..self.to_frame.min(self.frames.len())]
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBacktrace {
    #[serde(default)]
    to_frame: Option<usize>,
    #[serde(default)]
    frames: Vec<WireFrame>,
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(default)]
    func: Option<WireRef>,
    #[serde(default)]
    script: Option<WireRef>,
    #[serde(default)]
    line: u32,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    arguments: Vec<WireBinding>,
    #[serde(default)]
    locals: Vec<WireBinding>,
}

#[derive(Debug, Deserialize)]
struct WireRef {
    #[serde(rename = "ref")]
    handle: Handle,
}

#[derive(Debug, Deserialize)]
struct WireBinding {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: Option<WireRef>,
}

/// Mirrors listed in the response's `refs`, keyed by handle.
struct RefTable<'a>(HashMap<Handle, &'a Value>);

impl<'a> RefTable<'a> {
    fn new(refs: &'a [Value]) -> Self {
        let table = refs
            .iter()
            .filter_map(|r| Some((Handle(r.get("handle")?.as_i64()?), r)))
            .collect();
        Self(table)
    }

    fn str_field(&self, reference: Option<&WireRef>, field: &str) -> Option<&'a str> {
        let mirror: &'a Value = self.0.get(&reference?.handle).copied()?;
        mirror.get(field)?.as_str().filter(|s| !s.is_empty())
    }
}

fn bindings(wire: Vec<WireBinding>) -> Vec<Binding> {
    wire.into_iter()
        .filter_map(|b| match b.value {
            Some(value) => Some(Binding::new(b.name, value.handle)),
            None => {
                trace!(name = %b.name, "binding without value handle");
                None
            }
        })
        .collect()
}

/// Decode a `backtrace` response body together with its `refs`.
pub fn decode_backtrace(body: Option<Value>, refs: &[Value]) -> Result<Backtrace> {
    let Some(body) = body else {
        return Ok(Backtrace::default());
    };
    let wire: WireBacktrace = serde_json::from_value(body)
        .map_err(|e| Error::protocol("backtrace", format!("unexpected body: {e}")))?;
    let refs = RefTable::new(refs);

    let frames: Vec<StackFrame> = wire
        .frames
        .into_iter()
        .map(|frame| {
            let source = match (refs.str_field(frame.script.as_ref(), "name"), frame.text) {
                (Some(name), _) => SourceDescriptor::Script(name.to_string()),
                (None, Some(text)) => SourceDescriptor::Text(text),
                (None, None) => SourceDescriptor::Unknown,
            };
            let func_name = refs
                .str_field(frame.func.as_ref(), "name")
                .or_else(|| refs.str_field(frame.func.as_ref(), "inferredName"))
                .unwrap_or_default()
                .to_string();
            StackFrame {
                func_name,
                line: frame.line,
                source,
                locals: bindings(frame.locals),
                arguments: bindings(frame.arguments),
            }
        })
        .collect();

    let to_frame = wire.to_frame.unwrap_or(frames.len());
    Ok(Backtrace { frames, to_frame })
}
