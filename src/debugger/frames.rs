use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Opaque reference into the target's object space, resolved with a `lookup` round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub i64);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handles waiting for the next lookup round.
pub type PendingHandles = BTreeSet<Handle>;

/// A variable name paired with the unresolved handle of its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub handle: Handle,
}

impl Binding {
    pub fn new(name: impl Into<String>, handle: Handle) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }
}

/// Where a frame's code lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Script path taken from the script mirror.
    Script(String),
    /// Only the free-form frame description was available.
    Text(String),
    Unknown,
}

impl SourceDescriptor {
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Script(name) => Some(name),
            Self::Text(text) => path_from_frame_text(text),
            Self::Unknown => None,
        }
    }
}

/// Pull the script path out of a frame description such as
/// `#01 foo(a=1) /srv/app.js line 3 column 5 (position 42)`.
fn path_from_frame_text(text: &str) -> Option<&str> {
    let location = text.rfind(" line ")?;
    text[..location].split_whitespace().last()
}

/// One activation record of a captured backtrace. Index 0 is the innermost frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub func_name: String,
    pub line: u32,
    pub source: SourceDescriptor,
    pub locals: Vec<Binding>,
    pub arguments: Vec<Binding>,
}

/// Last path segment of `script_path` compared verbatim with the tracked filename.
pub fn is_user_script(script_path: &str, target_filename: &str) -> bool {
    let basename = script_path.rsplit(['/', '\\']).next().unwrap_or(script_path);
    !basename.is_empty() && basename == target_filename
}

/// A frame whose source cannot be determined never counts as user code.
pub fn is_user_frame(source: &SourceDescriptor, target_filename: &str) -> bool {
    source
        .path()
        .is_some_and(|path| is_user_script(path, target_filename))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingOrigin {
    Local,
    Argument,
}

/// Bindings of every user frame seen in one break, keyed by `(frame index, name)`.
#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    entries: BTreeMap<(usize, String), (BindingOrigin, Handle)>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Within one frame a later insert replaces an earlier one of the same name.
    pub fn insert(&mut self, frame_index: usize, origin: BindingOrigin, binding: Binding) {
        self.entries
            .insert((frame_index, binding.name), (origin, binding.handle));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One handle per name; a binding from an inner frame shadows outer ones.
    pub fn visible(&self) -> BTreeMap<&str, Handle> {
        let mut visible = BTreeMap::new();
        // Entries iterate innermost frame first.
        for ((_, name), (_, handle)) in &self.entries {
            visible.entry(name.as_str()).or_insert(*handle);
        }
        visible
    }
}

/// Collects user-visible bindings from a captured backtrace.
#[derive(Debug, Clone)]
pub struct BacktraceExtractor {
    target_filename: String,
    excluded_arguments: BTreeSet<String>,
}

impl BacktraceExtractor {
    pub fn new(target_filename: impl Into<String>, excluded_arguments: BTreeSet<String>) -> Self {
        Self {
            target_filename: target_filename.into(),
            excluded_arguments,
        }
    }

    pub fn target_filename(&self) -> &str {
        &self.target_filename
    }

    /// Walks `frames` from the outermost to the innermost, skipping non-user frames.
    pub fn extract(&self, frames: &[StackFrame]) -> (VariableTable, PendingHandles) {
        let mut table = VariableTable::new();
        let mut pending = PendingHandles::new();

        for (index, frame) in frames.iter().enumerate().rev() {
            if !is_user_frame(&frame.source, &self.target_filename) {
                trace!(index, source = ?frame.source, "skipping non-user frame");
                continue;
            }

            for local in &frame.locals {
                pending.insert(local.handle);
                table.insert(index, BindingOrigin::Local, local.clone());
            }

            for argument in &frame.arguments {
                if self.excluded_arguments.contains(&argument.name) {
                    continue;
                }
                pending.insert(argument.handle);
                table.insert(index, BindingOrigin::Argument, argument.clone());
            }
        }

        debug!(
            frames = frames.len(),
            bindings = table.len(),
            handles = pending.len(),
            "extracted backtrace"
        );
        (table, pending)
    }
}
