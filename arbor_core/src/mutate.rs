use crate::document::Document;
use crate::error::TreeError;
use crate::node::{Children, Node, NodeId, Number, Text, Value};
use std::borrow::Cow;
use std::collections::VecDeque;

impl Document {
    pub fn create_null(&mut self) -> Result<NodeId, TreeError> {
        self.insert_value(Value::Null)
    }

    pub fn create_true(&mut self) -> Result<NodeId, TreeError> {
        self.insert_value(Value::Bool(true))
    }

    pub fn create_false(&mut self) -> Result<NodeId, TreeError> {
        self.insert_value(Value::Bool(false))
    }

    pub fn create_bool(&mut self, value: bool) -> Result<NodeId, TreeError> {
        self.insert_value(Value::Bool(value))
    }

    pub fn create_number(&mut self, value: f64) -> Result<NodeId, TreeError> {
        self.insert_value(Value::Number(Number::from_f64(value)))
    }

    /// Number node holding an exact integer, printed without loss even beyond 2^53.
    pub fn create_integer(&mut self, value: i64) -> Result<NodeId, TreeError> {
        self.insert_value(Value::Number(Number::from_i64(value)))
    }

    /// String node owning a copy of `value`.
    pub fn create_string(&mut self, value: &str) -> Result<NodeId, TreeError> {
        let text = self.own_text(value)?;
        self.insert_value(Value::String(text))
    }

    /// String node borrowing static text; the document never frees it.
    pub fn create_string_static(&mut self, value: &'static str) -> Result<NodeId, TreeError> {
        self.insert_value(Value::String(Cow::Borrowed(value)))
    }

    /// Raw node: `text` is printed verbatim and never validated.
    pub fn create_raw(&mut self, text: &str) -> Result<NodeId, TreeError> {
        let text = self.own_text(text)?;
        self.insert_value(Value::Raw(text))
    }

    pub fn create_raw_static(&mut self, text: &'static str) -> Result<NodeId, TreeError> {
        self.insert_value(Value::Raw(Cow::Borrowed(text)))
    }

    pub fn create_array(&mut self) -> Result<NodeId, TreeError> {
        self.insert_value(Value::Array(Children::default()))
    }

    pub fn create_object(&mut self) -> Result<NodeId, TreeError> {
        self.insert_value(Value::Object(Children::default()))
    }

    /// Detached reference wrapper around `target`. A reference to a
    /// reference points at the final target.
    pub fn create_reference(&mut self, target: NodeId) -> Result<NodeId, TreeError> {
        let target = self.resolve(target)?;
        self.insert_value(Value::Reference(target))
    }

    pub fn create_int_array(&mut self, values: &[i32]) -> Result<NodeId, TreeError> {
        self.build_array(values, |doc, &v| doc.create_integer(i64::from(v)))
    }

    pub fn create_float_array(&mut self, values: &[f32]) -> Result<NodeId, TreeError> {
        self.build_array(values, |doc, &v| doc.create_number(f64::from(v)))
    }

    pub fn create_double_array(&mut self, values: &[f64]) -> Result<NodeId, TreeError> {
        self.build_array(values, |doc, &v| doc.create_number(v))
    }

    pub fn create_string_array(&mut self, values: &[&str]) -> Result<NodeId, TreeError> {
        self.build_array(values, |doc, v| doc.create_string(v))
    }

    fn build_array<T>(
        &mut self,
        values: &[T],
        mut make: impl FnMut(&mut Self, &T) -> Result<NodeId, TreeError>,
    ) -> Result<NodeId, TreeError> {
        let array = self.create_array()?;
        for value in values {
            let outcome = make(self, value).and_then(|child| {
                self.link(array, child, None, None)
                    .inspect_err(|_| self.discard(child))
            });
            if let Err(err) = outcome {
                self.discard(array);
                return Err(err);
            }
        }
        Ok(array)
    }

    /// Appends the detached node `child` to `array`.
    pub fn add_to_array(&mut self, array: NodeId, child: NodeId) -> Result<(), TreeError> {
        self.attach(array, child, None, None)
    }

    /// Appends `child` to `object` under a copy of `key`.
    pub fn add_to_object(
        &mut self,
        object: NodeId,
        key: &str,
        child: NodeId,
    ) -> Result<(), TreeError> {
        let key = self.own_text(key)?;
        self.attach(object, child, None, Some(key))
    }

    /// Like [`add_to_object`](Self::add_to_object) but borrows a static key
    /// instead of copying it.
    pub fn add_to_object_cs(
        &mut self,
        object: NodeId,
        key: &'static str,
        child: NodeId,
    ) -> Result<(), TreeError> {
        self.attach(object, child, None, Some(Cow::Borrowed(key)))
    }

    /// Inserts `child` before position `index`; an index past the end appends.
    pub fn insert_in_array(
        &mut self,
        array: NodeId,
        index: usize,
        child: NodeId,
    ) -> Result<(), TreeError> {
        self.attach(array, child, Some(index), None)
    }

    /// Appends a reference to `target` and returns the wrapper.
    pub fn add_reference_to_array(
        &mut self,
        array: NodeId,
        target: NodeId,
    ) -> Result<NodeId, TreeError> {
        let wrapper = self.create_reference(target)?;
        self.attach_or_free(array, wrapper, None)
    }

    /// Adds a reference to `target` under `key` and returns the wrapper.
    pub fn add_reference_to_object(
        &mut self,
        object: NodeId,
        key: &str,
        target: NodeId,
    ) -> Result<NodeId, TreeError> {
        let wrapper = self.create_reference(target)?;
        self.attach_or_free(object, wrapper, Some(key))
    }

    /// Attaches a freshly created node, freeing it if the container refuses.
    fn attach_or_free(
        &mut self,
        container: NodeId,
        child: NodeId,
        key: Option<&str>,
    ) -> Result<NodeId, TreeError> {
        let outcome = match key {
            Some(key) => self.add_to_object(container, key, child),
            None => self.add_to_array(container, child),
        };
        match outcome {
            Ok(()) => Ok(child),
            Err(err) => {
                self.discard(child);
                Err(err)
            }
        }
    }

    pub fn add_null_to_object(&mut self, object: NodeId, key: &str) -> Result<NodeId, TreeError> {
        let child = self.create_null()?;
        self.attach_or_free(object, child, Some(key))
    }

    pub fn add_true_to_object(&mut self, object: NodeId, key: &str) -> Result<NodeId, TreeError> {
        let child = self.create_true()?;
        self.attach_or_free(object, child, Some(key))
    }

    pub fn add_false_to_object(&mut self, object: NodeId, key: &str) -> Result<NodeId, TreeError> {
        let child = self.create_false()?;
        self.attach_or_free(object, child, Some(key))
    }

    pub fn add_bool_to_object(
        &mut self,
        object: NodeId,
        key: &str,
        value: bool,
    ) -> Result<NodeId, TreeError> {
        let child = self.create_bool(value)?;
        self.attach_or_free(object, child, Some(key))
    }

    pub fn add_number_to_object(
        &mut self,
        object: NodeId,
        key: &str,
        value: f64,
    ) -> Result<NodeId, TreeError> {
        let child = self.create_number(value)?;
        self.attach_or_free(object, child, Some(key))
    }

    pub fn add_string_to_object(
        &mut self,
        object: NodeId,
        key: &str,
        value: &str,
    ) -> Result<NodeId, TreeError> {
        let child = self.create_string(value)?;
        self.attach_or_free(object, child, Some(key))
    }

    pub fn add_raw_to_object(
        &mut self,
        object: NodeId,
        key: &str,
        raw: &str,
    ) -> Result<NodeId, TreeError> {
        let child = self.create_raw(raw)?;
        self.attach_or_free(object, child, Some(key))
    }

    pub fn add_object_to_object(&mut self, object: NodeId, key: &str) -> Result<NodeId, TreeError> {
        let child = self.create_object()?;
        self.attach_or_free(object, child, Some(key))
    }

    pub fn add_array_to_object(&mut self, object: NodeId, key: &str) -> Result<NodeId, TreeError> {
        let child = self.create_array()?;
        self.attach_or_free(object, child, Some(key))
    }

    /// Children the container itself owns. Reference wrappers are refused:
    /// members are never added or removed through a borrowed view.
    fn owned_children(&self, container: NodeId) -> Result<&[NodeId], TreeError> {
        match &self.node(container)?.value {
            Value::Array(children) | Value::Object(children) => Ok(&children.ids),
            Value::Reference(_) => Err(TreeError::InvalidOperation(
                "cannot modify members through a reference",
            )),
            _ => Err(TreeError::InvalidOperation("node is not a container")),
        }
    }

    fn owned_member(&self, object: NodeId, key: &str, case_sensitive: bool) -> Option<usize> {
        let children = self.owned_children(object).ok()?;
        if !matches!(self.node(object).ok()?.value, Value::Object(_)) {
            return None;
        }
        children.iter().position(|&child| {
            self.key(child).is_some_and(|candidate| {
                crate::document::keys_match(candidate, key, case_sensitive)
            })
        })
    }

    /// Unlinks element `index` of `array` and hands it to the caller.
    pub fn detach_from_array(&mut self, array: NodeId, index: usize) -> Option<NodeId> {
        if !matches!(self.node(array).ok()?.value, Value::Array(_)) {
            return None;
        }
        self.unlink(array, index).ok()
    }

    /// Unlinks the first member matching `key` (ASCII case-insensitive).
    pub fn detach_from_object(&mut self, object: NodeId, key: &str) -> Option<NodeId> {
        let index = self.owned_member(object, key, false)?;
        self.unlink(object, index).ok()
    }

    pub fn detach_from_object_case_sensitive(
        &mut self,
        object: NodeId,
        key: &str,
    ) -> Option<NodeId> {
        let index = self.owned_member(object, key, true)?;
        self.unlink(object, index).ok()
    }

    /// Unlinks `child` from `parent` by identity.
    pub fn detach_via_pointer(
        &mut self,
        parent: NodeId,
        child: NodeId,
    ) -> Result<NodeId, TreeError> {
        let index = self.child_position(parent, child)?;
        self.unlink(parent, index)
    }

    fn child_position(&self, parent: NodeId, child: NodeId) -> Result<usize, TreeError> {
        if self.node(child)?.parent != Some(parent) {
            return Err(TreeError::InvalidOperation(
                "node is not a child of this container",
            ));
        }
        self.owned_children(parent)?
            .iter()
            .position(|&id| id == child)
            .ok_or(TreeError::InvalidOperation(
                "node is not a child of this container",
            ))
    }

    /// Detaches and frees element `index`. Returns whether anything was deleted.
    pub fn delete_from_array(&mut self, array: NodeId, index: usize) -> bool {
        self.detach_from_array(array, index)
            .is_some_and(|child| self.free_tree(child).is_ok())
    }

    pub fn delete_from_object(&mut self, object: NodeId, key: &str) -> bool {
        self.detach_from_object(object, key)
            .is_some_and(|child| self.free_tree(child).is_ok())
    }

    pub fn delete_from_object_case_sensitive(&mut self, object: NodeId, key: &str) -> bool {
        self.detach_from_object_case_sensitive(object, key)
            .is_some_and(|child| self.free_tree(child).is_ok())
    }

    /// Frees `id` and everything it owns, detaching it first if attached.
    /// Returns the number of nodes released.
    pub fn delete(&mut self, id: NodeId) -> Result<usize, TreeError> {
        if let Some(parent) = self.node(id)?.parent {
            self.detach_via_pointer(parent, id)?;
        }
        self.free_tree(id)
    }

    /// Puts the detached node `replacement` in the slot `old` occupies in
    /// `parent`, then frees `old`. In objects `replacement` takes over the key.
    pub fn replace_via_pointer(
        &mut self,
        parent: NodeId,
        old: NodeId,
        replacement: NodeId,
    ) -> Result<(), TreeError> {
        let index = self.child_position(parent, old)?;
        self.replace_at(parent, index, replacement, None)
    }

    pub fn replace_in_array(
        &mut self,
        array: NodeId,
        index: usize,
        replacement: NodeId,
    ) -> Result<(), TreeError> {
        if !matches!(self.node(array)?.value, Value::Array(_)) {
            return Err(TreeError::InvalidOperation("node is not an array"));
        }
        if index >= self.owned_children(array)?.len() {
            return Err(TreeError::InvalidOperation("child index out of range"));
        }
        self.replace_at(array, index, replacement, None)
    }

    /// Replaces the first member matching `key` (ASCII case-insensitive); the
    /// replacement is stored under `key` exactly as given.
    pub fn replace_in_object(
        &mut self,
        object: NodeId,
        key: &str,
        replacement: NodeId,
    ) -> Result<(), TreeError> {
        self.replace_member(object, key, replacement, false)
    }

    pub fn replace_in_object_case_sensitive(
        &mut self,
        object: NodeId,
        key: &str,
        replacement: NodeId,
    ) -> Result<(), TreeError> {
        self.replace_member(object, key, replacement, true)
    }

    fn replace_member(
        &mut self,
        object: NodeId,
        key: &str,
        replacement: NodeId,
        case_sensitive: bool,
    ) -> Result<(), TreeError> {
        let index = self
            .owned_member(object, key, case_sensitive)
            .ok_or(TreeError::InvalidOperation("object has no such member"))?;
        let key = self.own_text(key)?;
        self.replace_at(object, index, replacement, Some(key))
    }

    /// Swaps `replacement` into slot `index` of `parent` and frees the old
    /// occupant. `key` overrides the inherited key; it is released on failure.
    fn replace_at(
        &mut self,
        parent: NodeId,
        index: usize,
        replacement: NodeId,
        key: Option<Text>,
    ) -> Result<(), TreeError> {
        if let Err(err) = self.check_replacement(parent, replacement) {
            if let Some(key) = &key {
                self.release_text(key);
            }
            return Err(err);
        }

        let old = self.owned_children(parent)?[index];
        let inherited = self.node_mut(old)?.key.take();
        let key = match key {
            Some(key) => {
                if let Some(previous) = &inherited {
                    self.release_text(previous);
                }
                Some(key)
            }
            None => inherited,
        };

        let node = self.node_mut(replacement)?;
        node.parent = Some(parent);
        node.key = key;
        if let Some(children) = self.node_mut(parent)?.value.children_mut() {
            children.ids[index] = replacement;
        }
        self.node_mut(old)?.parent = None;
        self.free_tree(old)?;
        Ok(())
    }

    fn check_replacement(&self, parent: NodeId, replacement: NodeId) -> Result<(), TreeError> {
        if self.node(replacement)?.parent.is_some() {
            return Err(TreeError::InvalidOperation("node is already attached"));
        }
        if self.is_ancestor_or_self(replacement, parent) {
            return Err(TreeError::InvalidOperation(
                "node cannot be attached beneath itself",
            ));
        }
        Ok(())
    }

    fn own_value_mut(&mut self, id: NodeId) -> Result<&mut Value, TreeError> {
        let node = self.node_mut(id)?;
        if let Value::Reference(_) = node.value {
            return Err(TreeError::InvalidOperation(
                "cannot modify a value through a reference",
            ));
        }
        Ok(&mut node.value)
    }

    /// Overwrites a number in place and returns the previous value.
    pub fn set_number(&mut self, id: NodeId, value: f64) -> Result<f64, TreeError> {
        match self.own_value_mut(id)? {
            Value::Number(number) => {
                let previous = number.as_f64();
                *number = Number::from_f64(value);
                Ok(previous)
            }
            _ => Err(TreeError::InvalidOperation("node is not a number")),
        }
    }

    /// Turns a boolean node into `value` and returns the previous value.
    pub fn set_bool(&mut self, id: NodeId, value: bool) -> Result<bool, TreeError> {
        match self.own_value_mut(id)? {
            Value::Bool(current) => Ok(std::mem::replace(current, value)),
            _ => Err(TreeError::InvalidOperation("node is not a boolean")),
        }
    }

    /// Replaces the text of a `String` or `Raw` node with a copy of `value`
    /// and hands the previous text back to the caller.
    pub fn set_string(&mut self, id: NodeId, value: &str) -> Result<Text, TreeError> {
        self.ensure_text(id)?;
        let text = self.own_text(value)?;
        self.swap_text(id, text)
    }

    pub fn set_string_static(&mut self, id: NodeId, value: &'static str) -> Result<Text, TreeError> {
        self.ensure_text(id)?;
        self.swap_text(id, Cow::Borrowed(value))
    }

    fn ensure_text(&mut self, id: NodeId) -> Result<(), TreeError> {
        match self.own_value_mut(id)? {
            Value::String(_) | Value::Raw(_) => Ok(()),
            _ => Err(TreeError::InvalidOperation("node is not a string")),
        }
    }

    fn swap_text(&mut self, id: NodeId, text: Text) -> Result<Text, TreeError> {
        let previous = match self.own_value_mut(id)? {
            Value::String(current) | Value::Raw(current) => std::mem::replace(current, text),
            _ => return Err(TreeError::InvalidOperation("node is not a string")),
        };
        self.release_text(&previous);
        Ok(previous)
    }

    /// Copies `id` into a new detached tree of owned nodes.
    ///
    /// With `recurse == false` a container is copied without its children.
    /// Reference wrappers are resolved and their targets copied as owned
    /// values; borrowed strings become owned strings.
    pub fn duplicate(&mut self, id: NodeId, recurse: bool) -> Result<NodeId, TreeError> {
        let source = self.resolve(id)?;
        let copy = self.copy_node(source)?;
        if !recurse {
            return Ok(copy);
        }

        let mut pending = VecDeque::from([(source, copy, 0usize)]);
        while let Some((from, into, hops)) = pending.pop_front() {
            if let Err(err) = self.copy_children(from, into, hops, &mut pending) {
                self.discard(copy);
                return Err(err);
            }
        }
        Ok(copy)
    }

    fn copy_children(
        &mut self,
        from: NodeId,
        into: NodeId,
        hops: usize,
        pending: &mut VecDeque<(NodeId, NodeId, usize)>,
    ) -> Result<(), TreeError> {
        let members: Vec<NodeId> = self.children(from).to_vec();
        let keyed = self.is_object(from);
        for member in members {
            let hops = if self.is_reference(member) {
                hops + 1
            } else {
                hops
            };
            if hops > self.live_references() {
                return Err(TreeError::InvalidOperation("reference cycle"));
            }
            let source = self.resolve(member)?;
            let copy = self.copy_node(source)?;
            let key = match self.key(member) {
                Some(key) if keyed => match self.own_text(key) {
                    Ok(key) => Some(key),
                    Err(err) => {
                        self.discard(copy);
                        return Err(err);
                    }
                },
                _ => None,
            };
            if let Err(err) = self.link(into, copy, None, key) {
                self.discard(copy);
                return Err(err);
            }
            if self.is_object(copy) || self.is_array(copy) {
                pending.push_back((source, copy, hops));
            }
        }
        Ok(())
    }

    /// Detached, childless copy of a resolved node.
    fn copy_node(&mut self, source: NodeId) -> Result<NodeId, TreeError> {
        let value = match &self.node(source)?.value {
            Value::Null => Value::Null,
            Value::Bool(b) => Value::Bool(*b),
            Value::Number(n) => Value::Number(*n),
            Value::String(text) => Value::String(self.own_text(text)?),
            Value::Raw(text) => Value::Raw(self.own_text(text)?),
            Value::Array(_) => Value::Array(Children::default()),
            Value::Object(_) => Value::Object(Children::default()),
            Value::Reference(_) => {
                return Err(TreeError::InvalidOperation("reference to a reference"));
            }
        };
        self.insert(Node::detached(value))
    }
}
