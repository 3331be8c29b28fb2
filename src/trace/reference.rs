use std::collections::{BTreeMap, VecDeque};

use serde_json::{json, Map, Value};

use crate::debugger::{Handle, ResolvedStore};

/// Variables and heap in the shapes the trace consumer expects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedState {
    pub variable_dict: Map<String, Value>,
    pub heap: Map<String, Value>,
}

/// Understands the target's raw object mirrors.
pub trait ReferenceParser {
    /// Every handle embedded anywhere in `object`, nested containers included.
    fn extract_nested_refs(&self, object: &Value) -> Vec<Handle>;

    /// Render the visible variables and everything they reach.
    fn render(&self, store: &ResolvedStore, variables: &BTreeMap<&str, Handle>) -> RenderedState;
}

/// Renders V8 mirrors into the Online Python Tutor trace encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptReferenceParser;

/// Links into the runtime's builtins rather than user data.
const SKIPPED_LINKS: [&str; 3] = ["protoObject", "prototypeObject", "constructorFunction"];

fn collect_refs(value: &Value, out: &mut Vec<Handle>) {
    match value {
        Value::Object(map) => {
            if let Some(handle) = map.get("ref").and_then(Value::as_i64) {
                out.push(Handle(handle));
            }
            for (key, nested) in map {
                if key != "ref" && !SKIPPED_LINKS.contains(&key.as_str()) {
                    collect_refs(nested, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_refs(item, out)),
        _ => {}
    }
}

fn mirror_type(mirror: &Value) -> &str {
    mirror.get("type").and_then(Value::as_str).unwrap_or("undefined")
}

/// Property names arrive as strings or, for array indices, as numbers.
fn property_name(property: &Value) -> Option<String> {
    match property.get("name")? {
        Value::String(name) => Some(name.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn property_handle(property: &Value) -> Option<Handle> {
    property.get("ref").and_then(Value::as_i64).map(Handle)
}

struct Renderer<'a> {
    store: &'a ResolvedStore,
    heap: Map<String, Value>,
    queue: VecDeque<Handle>,
}

impl<'a> Renderer<'a> {
    fn new(store: &'a ResolvedStore) -> Self {
        Self {
            store,
            heap: Map::new(),
            queue: VecDeque::new(),
        }
    }

    /// Inline encoding of the value behind `handle`; objects become `["REF", id]`.
    fn encode(&mut self, handle: Handle) -> Value {
        let store = self.store;
        let Some(mirror) = store.get(handle) else {
            return json!(["UNRESOLVED", handle]);
        };
        match mirror_type(mirror) {
            "undefined" | "null" => Value::Null,
            "number" => match mirror.get("value") {
                Some(Value::Number(n)) => Value::Number(n.clone()),
                Some(Value::String(text)) => json!(["SPECIAL_FLOAT", text]),
                _ => Value::Null,
            },
            "boolean" | "string" => mirror.get("value").cloned().unwrap_or(Value::Null),
            _ => {
                if !self.heap.contains_key(&handle.to_string()) {
                    self.queue.push_back(handle);
                }
                json!(["REF", handle])
            }
        }
    }

    fn encode_object(&mut self, mirror: &Value) -> Value {
        let class_name = mirror
            .get("className")
            .and_then(Value::as_str)
            .unwrap_or("Object");
        let properties: Vec<(String, Handle)> = mirror
            .get("properties")
            .and_then(Value::as_array)
            .map(|props| {
                props
                    .iter()
                    .filter_map(|p| Some((property_name(p)?, property_handle(p)?)))
                    .collect()
            })
            .unwrap_or_default();

        if mirror_type(mirror) == "function" {
            let name = ["name", "inferredName"]
                .iter()
                .filter_map(|key| mirror.get(*key).and_then(Value::as_str))
                .find(|name| !name.is_empty())
                .unwrap_or("");
            return json!(["FUNCTION", name, null]);
        }

        if class_name == "Array" {
            let mut elements: Vec<(usize, Handle)> = properties
                .iter()
                .filter_map(|(name, handle)| Some((name.parse().ok()?, *handle)))
                .collect();
            elements.sort_by_key(|(index, _)| *index);
            let mut list = vec![json!("LIST")];
            list.extend(elements.into_iter().map(|(_, handle)| self.encode(handle)));
            return Value::Array(list);
        }

        let mut encoded = if class_name == "Object" {
            vec![json!("DICT")]
        } else {
            vec![json!("INSTANCE"), json!(class_name)]
        };
        for (name, handle) in properties {
            encoded.push(json!([name, self.encode(handle)]));
        }
        Value::Array(encoded)
    }

    fn drain(&mut self) {
        let store = self.store;
        while let Some(handle) = self.queue.pop_front() {
            let key = handle.to_string();
            if self.heap.contains_key(&key) {
                continue;
            }
            let Some(mirror) = store.get(handle) else {
                continue;
            };
            // Reserve the slot first so self-references do not re-queue.
            self.heap.insert(key.clone(), Value::Null);
            let encoded = self.encode_object(mirror);
            self.heap.insert(key, encoded);
        }
    }
}

impl ReferenceParser for OptReferenceParser {
    fn extract_nested_refs(&self, object: &Value) -> Vec<Handle> {
        let mut refs = Vec::new();
        if let Some(properties) = object.get("properties") {
            collect_refs(properties, &mut refs);
        }
        refs
    }

    fn render(&self, store: &ResolvedStore, variables: &BTreeMap<&str, Handle>) -> RenderedState {
        let mut renderer = Renderer::new(store);
        let mut variable_dict = Map::new();
        for (name, handle) in variables {
            let encoded = renderer.encode(*handle);
            variable_dict.insert((*name).to_string(), encoded);
        }
        renderer.drain();
        RenderedState {
            variable_dict,
            heap: renderer.heap,
        }
    }
}
