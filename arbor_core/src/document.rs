use crate::error::TreeError;
use crate::hooks::{MemoryHooks, SystemHooks};
use crate::node::{Children, Kind, Node, NodeId, Text, Value, owned_len};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Bytes reported to the hooks for every node.
pub(crate) const NODE_SIZE: usize = std::mem::size_of::<Node>();
/// Bytes reported per reserved child slot of a container.
pub(crate) const LINK_SIZE: usize = std::mem::size_of::<NodeId>();
const MIN_CHILD_CAPACITY: usize = 4;

static NEXT_DOCUMENT_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug)]
enum Slot {
    Occupied { generation: u32, node: Node },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Arena holding any number of JSON trees.
///
/// Every node lives in a slot of the document and is addressed by a
/// [`NodeId`]. A node has at most one owning parent; reference wrappers point
/// at a node without owning it. Deleting a tree releases the nodes it owns and
/// leaves every reference target alone.
///
/// All memory the document owns is reported to the [`MemoryHooks`] it was
/// created with. Dropping the document releases whatever it still holds.
pub struct Document {
    id: u32,
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live: usize,
    references: usize,
    hooks: Arc<dyn MemoryHooks>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("live", &self.live)
            .field("references", &self.references)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Creates an empty document backed by [`SystemHooks`].
    pub fn new() -> Self {
        Self::with_hooks(Arc::new(SystemHooks))
    }

    /// Creates an empty document whose allocations go through `hooks`.
    pub fn with_hooks(hooks: Arc<dyn MemoryHooks>) -> Self {
        Self {
            id: NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
            free_head: None,
            live: 0,
            references: 0,
            hooks,
        }
    }

    pub fn hooks(&self) -> &Arc<dyn MemoryHooks> {
        &self.hooks
    }

    /// Number of nodes currently alive, reference wrappers included.
    pub fn live_nodes(&self) -> usize {
        self.live
    }

    /// Number of reference wrappers currently alive.
    pub fn live_references(&self) -> usize {
        self.references
    }

    /// Whether `id` names a live node of this document.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        if id.document != self.id {
            return Err(TreeError::UnknownNode);
        }
        match self.slots.get(id.index as usize) {
            Some(Slot::Occupied { generation, node }) if *generation == id.generation => Ok(node),
            _ => Err(TreeError::UnknownNode),
        }
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        if id.document != self.id {
            return Err(TreeError::UnknownNode);
        }
        match self.slots.get_mut(id.index as usize) {
            Some(Slot::Occupied { generation, node }) if *generation == id.generation => Ok(node),
            _ => Err(TreeError::UnknownNode),
        }
    }

    /// Follows a reference wrapper to its target; other nodes resolve to themselves.
    pub(crate) fn resolve(&self, id: NodeId) -> Result<NodeId, TreeError> {
        match self.node(id)?.value {
            Value::Reference(target) => {
                if self.contains(target) {
                    Ok(target)
                } else {
                    log::debug!("reference {id} points at deleted node {target}");
                    Err(TreeError::DanglingReference)
                }
            }
            _ => Ok(id),
        }
    }

    /// Payload of `id`, looking through a reference wrapper.
    pub(crate) fn value(&self, id: NodeId) -> Result<&Value, TreeError> {
        let target = self.resolve(id)?;
        Ok(&self.node(target)?.value)
    }

    pub(crate) fn meter(&self, size: usize) -> Result<(), TreeError> {
        if self.hooks.alloc(size) {
            Ok(())
        } else {
            log::debug!("memory hooks refused {size} bytes");
            Err(TreeError::AllocationFailure)
        }
    }

    pub(crate) fn unmeter(&self, size: usize) {
        self.hooks.free(size);
    }

    /// Copies `text` into an owned, metered payload.
    pub(crate) fn own_text(&self, text: &str) -> Result<Text, TreeError> {
        self.meter(text.len())?;
        let mut owned = String::new();
        if owned.try_reserve_exact(text.len()).is_err() {
            self.unmeter(text.len());
            return Err(TreeError::AllocationFailure);
        }
        owned.push_str(text);
        Ok(Cow::Owned(owned))
    }

    /// Takes ownership of an already built string, metering its length.
    pub(crate) fn adopt_text(&self, text: String) -> Result<Text, TreeError> {
        self.meter(text.len())?;
        Ok(Cow::Owned(text))
    }

    pub(crate) fn release_text(&self, text: &Text) {
        if let Cow::Owned(owned) = text {
            self.unmeter(owned.len());
        }
    }

    fn footprint(node: &Node) -> usize {
        let key = node.key.as_ref().map_or(0, owned_len);
        let payload = match &node.value {
            Value::String(text) | Value::Raw(text) => owned_len(text),
            Value::Array(children) | Value::Object(children) => children.reserved * LINK_SIZE,
            _ => 0,
        };
        NODE_SIZE + key + payload
    }

    /// Releases whatever `node` holds besides its own slot.
    fn release_payload(&self, node: &Node) {
        if let Some(key) = &node.key {
            self.release_text(key);
        }
        match &node.value {
            Value::String(text) | Value::Raw(text) => self.release_text(text),
            Value::Array(children) | Value::Object(children) if children.reserved > 0 => {
                self.unmeter(children.reserved * LINK_SIZE)
            }
            _ => {}
        }
    }

    /// Stores a new detached node. On failure everything `node` holds is
    /// released, so callers never clean up after a refused insert.
    pub(crate) fn insert(&mut self, node: Node) -> Result<NodeId, TreeError> {
        if let Err(err) = self.meter(NODE_SIZE) {
            self.release_payload(&node);
            return Err(err);
        }
        let is_reference = matches!(node.value, Value::Reference(_));

        let (index, generation) = match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                let (generation, next_free) = match slot {
                    Slot::Vacant {
                        generation,
                        next_free,
                    } => (*generation, *next_free),
                    Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
                };
                *slot = Slot::Occupied { generation, node };
                self.free_head = next_free;
                (index, generation)
            }
            None => {
                if self.slots.try_reserve(1).is_err() || self.slots.len() >= u32::MAX as usize {
                    self.unmeter(NODE_SIZE);
                    self.release_payload(&node);
                    return Err(TreeError::AllocationFailure);
                }
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Occupied {
                    generation: 0,
                    node,
                });
                (index, 0)
            }
        };

        self.live += 1;
        if is_reference {
            self.references += 1;
        }
        Ok(NodeId {
            document: self.id,
            index,
            generation,
        })
    }

    pub(crate) fn insert_value(&mut self, value: Value) -> Result<NodeId, TreeError> {
        self.insert(Node::detached(value))
    }

    /// Vacates the slot of `id` and returns its node with all metering released.
    fn take(&mut self, id: NodeId) -> Result<Node, TreeError> {
        self.node(id)?;
        let slot = &mut self.slots[id.index as usize];
        let vacant = Slot::Vacant {
            generation: id.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        let node = match std::mem::replace(slot, vacant) {
            Slot::Occupied { node, .. } => node,
            Slot::Vacant { .. } => unreachable!("validated as occupied"),
        };
        self.free_head = Some(id.index);
        self.live -= 1;
        if matches!(node.value, Value::Reference(_)) {
            self.references -= 1;
        }
        self.unmeter(Self::footprint(&node));
        Ok(node)
    }

    /// Frees `root` and every node it owns. Reference targets are not touched.
    pub(crate) fn free_tree(&mut self, root: NodeId) -> Result<usize, TreeError> {
        self.node(root)?;
        let mut pending = vec![root];
        let mut freed = 0;
        while let Some(id) = pending.pop() {
            let node = self.take(id)?;
            freed += 1;
            if let Some(children) = node.value.children() {
                pending.extend(children.ids.iter().rev().copied());
            }
        }
        Ok(freed)
    }

    /// Frees a tree built by a failed operation. The handle was created by
    /// that operation, so it cannot be stale.
    pub(crate) fn discard(&mut self, root: NodeId) {
        if let Err(err) = self.free_tree(root) {
            log::debug!("discarding partial tree {root} failed: {err}");
        }
    }

    /// Whether `ancestor` is `node` itself or owns it through parent links.
    pub(crate) fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.node(current).ok().and_then(|n| n.parent);
        }
        false
    }

    /// Makes room for one more child in `container`, growing geometrically.
    fn reserve_child(&mut self, container: NodeId) -> Result<(), TreeError> {
        let hooks = Arc::clone(&self.hooks);
        let children = self
            .node_mut(container)?
            .value
            .children_mut()
            .ok_or(TreeError::InvalidOperation("node is not a container"))?;
        if children.ids.len() < children.reserved {
            return Ok(());
        }
        let grown = (children.reserved * 2).max(MIN_CHILD_CAPACITY);
        let additional = grown - children.ids.len();
        if children.ids.try_reserve_exact(additional).is_err() {
            return Err(TreeError::AllocationFailure);
        }
        let granted = if children.reserved == 0 {
            hooks.alloc(grown * LINK_SIZE)
        } else {
            hooks.realloc(children.reserved * LINK_SIZE, grown * LINK_SIZE)
        };
        if !granted {
            log::debug!("memory hooks refused growing a child list to {grown} entries");
            return Err(TreeError::AllocationFailure);
        }
        children.reserved = grown;
        Ok(())
    }

    /// Attaches the detached node `child` to `container` at `position`
    /// (`None` appends; an index past the end appends as well).
    ///
    /// Objects require a `key`; arrays refuse one. On any failure the key is
    /// released and neither node changes.
    pub(crate) fn attach(
        &mut self,
        container: NodeId,
        child: NodeId,
        position: Option<usize>,
        key: Option<Text>,
    ) -> Result<(), TreeError> {
        if let Err(err) = self.check_attach(container, child, key.is_some()) {
            if let Some(key) = &key {
                self.release_text(key);
            }
            return Err(err);
        }
        self.link(container, child, position, key)
    }

    /// Attaches a node created by the caller a moment ago, which therefore
    /// cannot be attached already nor own `container`. Only capacity can fail.
    pub(crate) fn link(
        &mut self,
        container: NodeId,
        child: NodeId,
        position: Option<usize>,
        key: Option<Text>,
    ) -> Result<(), TreeError> {
        if let Err(err) = self.reserve_child(container) {
            if let Some(key) = &key {
                self.release_text(key);
            }
            return Err(err);
        }

        let node = self.node_mut(child)?;
        node.parent = Some(container);
        node.key = key;
        let children = self
            .node_mut(container)?
            .value
            .children_mut()
            .ok_or(TreeError::InvalidOperation("node is not a container"))?;
        match position {
            Some(index) if index < children.ids.len() => children.ids.insert(index, child),
            _ => children.ids.push(child),
        }
        Ok(())
    }

    fn check_attach(
        &self,
        container: NodeId,
        child: NodeId,
        keyed: bool,
    ) -> Result<(), TreeError> {
        let child_node = self.node(child)?;
        let is_object = match self.node(container)?.value {
            Value::Object(_) => true,
            Value::Array(_) => false,
            Value::Reference(_) => {
                return Err(TreeError::InvalidOperation(
                    "cannot add members through a reference",
                ));
            }
            _ => return Err(TreeError::InvalidOperation("node is not a container")),
        };
        if is_object != keyed {
            return Err(TreeError::InvalidOperation(if is_object {
                "object members need a key"
            } else {
                "array elements take no key"
            }));
        }
        if child_node.parent.is_some() {
            return Err(TreeError::InvalidOperation("node is already attached"));
        }
        if self.is_ancestor_or_self(child, container) {
            return Err(TreeError::InvalidOperation(
                "node cannot be attached beneath itself",
            ));
        }
        Ok(())
    }

    /// Removes the child at `index` of `container` and returns it detached,
    /// with its key released.
    pub(crate) fn unlink(&mut self, container: NodeId, index: usize) -> Result<NodeId, TreeError> {
        let children = self
            .node_mut(container)?
            .value
            .children_mut()
            .ok_or(TreeError::InvalidOperation("node is not a container"))?;
        if index >= children.ids.len() {
            return Err(TreeError::InvalidOperation("child index out of range"));
        }
        let child = children.ids.remove(index);
        let node = self.node_mut(child)?;
        node.parent = None;
        if let Some(key) = node.key.take() {
            self.release_text(&key);
        }
        Ok(child)
    }

    /// Kind of the node, looking through reference wrappers.
    pub fn kind(&self, id: NodeId) -> Result<Kind, TreeError> {
        self.value(id)?
            .kind()
            .ok_or(TreeError::InvalidOperation("reference to a reference"))
    }

    fn is_kind(&self, id: NodeId, kind: Kind) -> bool {
        self.kind(id).is_ok_and(|k| k == kind)
    }

    pub fn is_null(&self, id: NodeId) -> bool {
        self.is_kind(id, Kind::Null)
    }

    pub fn is_true(&self, id: NodeId) -> bool {
        self.is_kind(id, Kind::True)
    }

    pub fn is_false(&self, id: NodeId) -> bool {
        self.is_kind(id, Kind::False)
    }

    pub fn is_bool(&self, id: NodeId) -> bool {
        self.is_true(id) || self.is_false(id)
    }

    pub fn is_number(&self, id: NodeId) -> bool {
        self.is_kind(id, Kind::Number)
    }

    pub fn is_string(&self, id: NodeId) -> bool {
        self.is_kind(id, Kind::String)
    }

    pub fn is_raw(&self, id: NodeId) -> bool {
        self.is_kind(id, Kind::Raw)
    }

    pub fn is_array(&self, id: NodeId) -> bool {
        self.is_kind(id, Kind::Array)
    }

    pub fn is_object(&self, id: NodeId) -> bool {
        self.is_kind(id, Kind::Object)
    }

    /// Whether `id` is a reference wrapper rather than an owned value.
    pub fn is_reference(&self, id: NodeId) -> bool {
        self.node(id)
            .is_ok_and(|node| matches!(node.value, Value::Reference(_)))
    }

    /// Whether the string or raw payload is borrowed static text. Always
    /// `false` for other kinds, whatever their key.
    pub fn is_const_string(&self, id: NodeId) -> bool {
        match self.node(id) {
            Ok(Node {
                value: Value::String(text) | Value::Raw(text),
                ..
            }) => matches!(text, Cow::Borrowed(_)),
            _ => false,
        }
    }

    pub fn number(&self, id: NodeId) -> Option<f64> {
        match self.value(id).ok()? {
            Value::Number(n) => Some(n.as_f64()),
            _ => None,
        }
    }

    /// Exact integer value, when the number has one.
    pub fn integer(&self, id: NodeId) -> Option<i64> {
        match self.value(id).ok()? {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn bool_value(&self, id: NodeId) -> Option<bool> {
        match self.value(id).ok()? {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Text of a `String` node.
    pub fn string(&self, id: NodeId) -> Option<&str> {
        match self.value(id).ok()? {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    /// Verbatim text of a `Raw` node.
    pub fn raw(&self, id: NodeId) -> Option<&str> {
        match self.value(id).ok()? {
            Value::Raw(text) => Some(text),
            _ => None,
        }
    }

    /// Key of an object member. Reference wrappers carry their own key.
    pub fn key(&self, id: NodeId) -> Option<&str> {
        self.node(id).ok()?.key.as_deref()
    }

    /// Owning container of an attached node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).ok()?.parent
    }

    /// Children of a container in order; empty for anything else.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.value(id).ok().and_then(Value::children) {
            Some(children) => &children.ids,
            None => &[],
        }
    }

    /// Key/child pairs of an object in order.
    pub fn members(&self, id: NodeId) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        let ids = if self.is_object(id) {
            self.children(id)
        } else {
            &[]
        };
        ids.iter()
            .map(move |&child| (self.key(child).unwrap_or_default(), child))
    }

    pub fn array_size(&self, id: NodeId) -> usize {
        self.value(id)
            .ok()
            .and_then(Value::children)
            .map_or(0, Children::len)
    }

    pub fn array_item(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.children(id).get(index).copied()
    }

    /// First member of `object` whose key matches ASCII case-insensitively.
    pub fn object_item(&self, object: NodeId, key: &str) -> Option<NodeId> {
        self.find_member(object, key, false).map(|(_, id)| id)
    }

    pub fn object_item_case_sensitive(&self, object: NodeId, key: &str) -> Option<NodeId> {
        self.find_member(object, key, true).map(|(_, id)| id)
    }

    pub fn has_object_item(&self, object: NodeId, key: &str) -> bool {
        self.object_item(object, key).is_some()
    }

    /// Position and handle of the first member of `object` named `key`.
    pub(crate) fn find_member(
        &self,
        object: NodeId,
        key: &str,
        case_sensitive: bool,
    ) -> Option<(usize, NodeId)> {
        if !self.is_object(object) {
            return None;
        }
        self.children(object)
            .iter()
            .enumerate()
            .find(|&(_, &child)| {
                self.key(child)
                    .is_some_and(|candidate| keys_match(candidate, key, case_sensitive))
            })
            .map(|(index, &child)| (index, child))
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        for slot in &self.slots {
            if let Slot::Occupied { node, .. } = slot {
                self.hooks.free(Self::footprint(node));
            }
        }
    }
}

pub(crate) fn keys_match(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::hooks::TrackingHooks;

    /// A document wired to tracking hooks, plus the hooks for inspection.
    pub fn tracked_document() -> (Document, Arc<TrackingHooks>) {
        let hooks = Arc::new(TrackingHooks::new());
        let document = Document::with_hooks(hooks.clone());
        (document, hooks)
    }
}
