use crate::document::Document;
use crate::error::TreeError;
use crate::node::{NodeId, Value};
use serde_json::{Map, Value as JsonValue};

impl Document {
    /// Builds a detached tree from a `serde_json` value.
    pub fn import_value(&mut self, value: &JsonValue) -> Result<NodeId, TreeError> {
        let root = self.import_node(value)?;
        if let Err(err) = self.import_children(root, value) {
            self.discard(root);
            return Err(err);
        }
        Ok(root)
    }

    fn import_children(&mut self, root: NodeId, value: &JsonValue) -> Result<(), TreeError> {
        let mut pending = vec![(value, root)];
        while let Some((source, container)) = pending.pop() {
            match source {
                JsonValue::Array(items) => {
                    for item in items {
                        let child = self.import_node(item)?;
                        if let Err(err) = self.link(container, child, None, None) {
                            self.discard(child);
                            return Err(err);
                        }
                        pending.push((item, child));
                    }
                }
                JsonValue::Object(members) => {
                    for (key, item) in members {
                        let child = self.import_node(item)?;
                        let key = match self.own_text(key) {
                            Ok(key) => key,
                            Err(err) => {
                                self.discard(child);
                                return Err(err);
                            }
                        };
                        if let Err(err) = self.link(container, child, None, Some(key)) {
                            self.discard(child);
                            return Err(err);
                        }
                        pending.push((item, child));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn import_node(&mut self, value: &JsonValue) -> Result<NodeId, TreeError> {
        match value {
            JsonValue::Null => self.create_null(),
            JsonValue::Bool(b) => self.create_bool(*b),
            JsonValue::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(integer), _) => self.create_integer(integer),
                (None, Some(double)) => self.create_number(double),
                (None, None) => Err(TreeError::InvalidOperation("number out of range")),
            },
            JsonValue::String(s) => self.create_string(s),
            JsonValue::Array(_) => self.create_array(),
            JsonValue::Object(_) => self.create_object(),
        }
    }

    /// Converts the tree rooted at `id` into a `serde_json` value.
    ///
    /// Reference wrappers are followed. Raw nodes are parsed as JSON and
    /// non-finite numbers become `0`. Duplicate object keys collapse to the
    /// last occurrence.
    pub fn export_value(&self, id: NodeId) -> Result<JsonValue, TreeError> {
        let mut stack = match self.export_node(id, 0)? {
            Exported::Leaf(value) => return Ok(value),
            Exported::Open(frame) => vec![frame],
        };

        while let Some(frame) = stack.last_mut() {
            if frame.next == frame.items.len() {
                if let Some(done) = stack.pop() {
                    let value = done.building.finish();
                    match stack.last_mut() {
                        None => return Ok(value),
                        Some(parent) => parent.building.push(done.key, value),
                    }
                }
                continue;
            }

            let child = frame.items[frame.next];
            frame.next += 1;
            let hops = frame.hops;
            let key = match frame.building {
                Building::Object(_) => Some(self.key(child).unwrap_or_default().to_owned()),
                Building::Array(_) => None,
            };
            match self.export_node(child, hops)? {
                Exported::Leaf(value) => {
                    if let Some(frame) = stack.last_mut() {
                        frame.building.push(key, value);
                    }
                }
                Exported::Open(mut nested) => {
                    nested.key = key;
                    stack.push(nested);
                }
            }
        }
        // The root frame returns its value when it closes.
        Ok(JsonValue::Null)
    }

    fn export_node(&self, id: NodeId, mut hops: usize) -> Result<Exported<'_>, TreeError> {
        if self.is_reference(id) {
            hops += 1;
            if hops > self.live_references() {
                return Err(TreeError::InvalidOperation("reference cycle"));
            }
        }
        let value = match self.value(id)? {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(integer) => JsonValue::from(integer),
                None => serde_json::Number::from_f64(n.as_f64())
                    .map_or(JsonValue::from(0), JsonValue::Number),
            },
            Value::String(text) => JsonValue::String(text.to_string()),
            Value::Raw(text) => serde_json::from_str(text)
                .map_err(|_| TreeError::InvalidOperation("raw text is not valid JSON"))?,
            Value::Array(children) => {
                return Ok(Exported::Open(ExportFrame {
                    items: &children.ids,
                    next: 0,
                    hops,
                    key: None,
                    building: Building::Array(Vec::with_capacity(children.len())),
                }));
            }
            Value::Object(children) => {
                return Ok(Exported::Open(ExportFrame {
                    items: &children.ids,
                    next: 0,
                    hops,
                    key: None,
                    building: Building::Object(Map::new()),
                }));
            }
            Value::Reference(_) => {
                return Err(TreeError::InvalidOperation("reference to a reference"));
            }
        };
        Ok(Exported::Leaf(value))
    }
}

enum Exported<'d> {
    Leaf(JsonValue),
    Open(ExportFrame<'d>),
}

struct ExportFrame<'d> {
    items: &'d [NodeId],
    next: usize,
    hops: usize,
    /// Key under which the finished value goes into its parent object.
    key: Option<String>,
    building: Building,
}

enum Building {
    Array(Vec<JsonValue>),
    Object(Map<String, JsonValue>),
}

impl Building {
    fn push(&mut self, key: Option<String>, value: JsonValue) {
        match self {
            Building::Array(items) => items.push(value),
            Building::Object(members) => {
                members.insert(key.unwrap_or_default(), value);
            }
        }
    }

    fn finish(self) -> JsonValue {
        match self {
            Building::Array(items) => JsonValue::Array(items),
            Building::Object(members) => JsonValue::Object(members),
        }
    }
}
