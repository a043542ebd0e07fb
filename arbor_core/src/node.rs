use std::borrow::Cow;
use std::fmt;

/// String payloads and object keys.
///
/// `Cow::Borrowed` is static text the document never owns or frees;
/// `Cow::Owned` is metered through the document's memory hooks.
pub type Text = Cow<'static, str>;

/// Handle to a node inside a [`Document`](crate::document::Document).
///
/// Handles are generational: once a node is deleted its handle stops
/// resolving, even after the slot is reused by a new node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) document: u32,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// The JSON kind of a node, as seen by callers.
///
/// Reference wrappers report the kind of their target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    False,
    True,
    Number,
    String,
    Array,
    Object,
    Raw,
}

impl Kind {
    pub fn is_container(self) -> bool {
        matches!(self, Kind::Array | Kind::Object)
    }
}

/// Largest magnitude at which every integer is exactly representable as `f64`.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A JSON number: the double value plus, when known, its exact integer value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Number {
    value: f64,
    integer: Option<i64>,
}

impl Number {
    /// Wraps a double. Whole values within the exactly representable range
    /// also record their integer form so they print without a fraction.
    pub fn from_f64(value: f64) -> Self {
        let is_negative_zero = value == 0.0 && value.is_sign_negative();
        let integer = if value.is_finite()
            && value.fract() == 0.0
            && value.abs() <= MAX_EXACT_INTEGER
            && !is_negative_zero
        {
            Some(value as i64)
        } else {
            None
        };
        Self { value, integer }
    }

    pub fn from_i64(value: i64) -> Self {
        Self {
            value: value as f64,
            integer: Some(value),
        }
    }

    /// Builds a number from a parsed literal: `value` as read, `integer` only
    /// when the literal had no fraction or exponent and fit an `i64`.
    pub(crate) fn from_parts(value: f64, integer: Option<i64>) -> Self {
        Self { value, integer }
    }

    pub fn as_f64(&self) -> f64 {
        self.value
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.integer
    }

    /// Exact equality: integers compare as integers when both sides have one.
    pub fn exact_eq(&self, other: &Number) -> bool {
        match (self.integer, other.integer) {
            (Some(a), Some(b)) => a == b,
            _ => self.value == other.value,
        }
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Number::from_f64(value)
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::from_i64(value)
    }
}

/// Ordered child handles of a container plus the capacity reported to the hooks.
#[derive(Debug, Default)]
pub(crate) struct Children {
    pub(crate) ids: Vec<NodeId>,
    pub(crate) reserved: usize,
}

impl Children {
    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Payload of a node.
#[derive(Debug)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(Text),
    Raw(Text),
    Array(Children),
    Object(Children),
    /// Non-owning wrapper around another node of the same document.
    Reference(NodeId),
}

impl Value {
    /// Kind of the payload. `None` for reference wrappers, which have no kind
    /// of their own.
    pub(crate) fn kind(&self) -> Option<Kind> {
        Some(match self {
            Value::Null => Kind::Null,
            Value::Bool(false) => Kind::False,
            Value::Bool(true) => Kind::True,
            Value::Number(_) => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Raw(_) => Kind::Raw,
            Value::Array(_) => Kind::Array,
            Value::Object(_) => Kind::Object,
            Value::Reference(_) => return None,
        })
    }

    pub(crate) fn children(&self) -> Option<&Children> {
        match self {
            Value::Array(children) | Value::Object(children) => Some(children),
            _ => None,
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Children> {
        match self {
            Value::Array(children) | Value::Object(children) => Some(children),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) value: Value,
    /// Set only while the node is a member of an object.
    pub(crate) key: Option<Text>,
    pub(crate) parent: Option<NodeId>,
}

impl Node {
    pub(crate) fn detached(value: Value) -> Self {
        Self {
            value,
            key: None,
            parent: None,
        }
    }
}

/// Bytes a text payload holds against the hooks; borrowed text holds none.
pub(crate) fn owned_len(text: &Text) -> usize {
    match text {
        Cow::Borrowed(_) => 0,
        Cow::Owned(owned) => owned.len(),
    }
}
