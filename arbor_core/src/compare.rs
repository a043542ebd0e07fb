use crate::document::{Document, keys_match};
use crate::node::{NodeId, Value};

impl Document {
    /// Structural equality of two trees of this document.
    ///
    /// Object members match by key regardless of order. With
    /// `case_sensitive == false`, keys and string payloads match ASCII
    /// case-insensitively.
    pub fn compare(&self, a: NodeId, b: NodeId, case_sensitive: bool) -> bool {
        compare_documents(self, a, self, b, case_sensitive)
    }
}

/// Structural equality of a tree in `left` and a tree in `right`.
///
/// Unknown handles, dangling references and reference cycles never compare
/// equal.
pub fn compare_documents(
    left: &Document,
    a: NodeId,
    right: &Document,
    b: NodeId,
    case_sensitive: bool,
) -> bool {
    // (left node, right node, references followed on each side)
    let mut pending = vec![(a, b, 0usize, 0usize)];
    while let Some((a, b, hops_a, hops_b)) = pending.pop() {
        let hops_a = hops_a + usize::from(left.is_reference(a));
        let hops_b = hops_b + usize::from(right.is_reference(b));
        if hops_a > left.live_references() || hops_b > right.live_references() {
            log::debug!("reference cycle while comparing {a} and {b}");
            return false;
        }
        let (Ok(left_value), Ok(right_value)) = (left.value(a), right.value(b)) else {
            return false;
        };

        match (left_value, right_value) {
            (Value::Null, Value::Null) => {}
            (Value::Bool(x), Value::Bool(y)) if x == y => {}
            (Value::Number(x), Value::Number(y)) if x.exact_eq(y) => {}
            (Value::String(x), Value::String(y)) | (Value::Raw(x), Value::Raw(y))
                if keys_match(x, y, case_sensitive) => {}
            (Value::Array(x), Value::Array(y)) if x.len() == y.len() => {
                pending.extend(
                    x.ids
                        .iter()
                        .zip(&y.ids)
                        .map(|(&x, &y)| (x, y, hops_a, hops_b)),
                );
            }
            (Value::Object(x), Value::Object(y)) if x.len() == y.len() => {
                for &member in &x.ids {
                    let key = left.key(member).unwrap_or_default();
                    let Some((_, other)) = right.find_member(b, key, case_sensitive) else {
                        return false;
                    };
                    pending.push((member, other, hops_a, hops_b));
                }
                let all_present = y.ids.iter().all(|&member| {
                    let key = right.key(member).unwrap_or_default();
                    left.find_member(a, key, case_sensitive).is_some()
                });
                if !all_present {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_pair(doc: &mut Document, a: &str, b: &str) -> (NodeId, NodeId) {
        (doc.parse_str(a).unwrap(), doc.parse_str(b).unwrap())
    }

    #[test]
    fn objects_compare_regardless_of_member_order() {
        let mut doc = Document::new();
        let (a, b) = parse_pair(&mut doc, r#"{"a":1,"b":2}"#, r#"{"b":2,"a":1}"#);
        assert!(doc.compare(a, b, true));
    }

    #[test]
    fn arrays_compare_in_order() {
        let mut doc = Document::new();
        let (a, b) = parse_pair(&mut doc, "[1,2]", "[2,1]");
        assert!(!doc.compare(a, b, true));
        let (a, b) = parse_pair(&mut doc, "[1,[2,{}]]", "[1, [2, {}]]");
        assert!(doc.compare(a, b, true));
        let (a, b) = parse_pair(&mut doc, "[1,2]", "[1,2,3]");
        assert!(!doc.compare(a, b, true));
    }

    #[test]
    fn case_sensitivity_applies_to_keys_and_strings() {
        let mut doc = Document::new();
        let (a, b) = parse_pair(&mut doc, r#"{"Key":"Value"}"#, r#"{"key":"value"}"#);
        assert!(!doc.compare(a, b, true));
        assert!(doc.compare(a, b, false));
    }

    #[test]
    fn objects_of_equal_size_with_different_keys_differ() {
        let mut doc = Document::new();
        let (a, b) = parse_pair(&mut doc, r#"{"a":1,"a":1}"#, r#"{"a":1,"b":1}"#);
        assert!(!doc.compare(a, b, true), "b is missing on the left");
        assert!(!doc.compare(b, a, true));
    }

    #[test]
    fn numbers_compare_exactly() {
        let mut doc = Document::new();
        let (a, b) = parse_pair(&mut doc, "9007199254740993", "9007199254740992");
        assert!(!doc.compare(a, b, true));
        let (a, b) = parse_pair(&mut doc, "1.0", "1");
        assert!(doc.compare(a, b, true), "same value, one without integer form");
        let nan = doc.create_number(f64::NAN).unwrap();
        assert!(!doc.compare(nan, nan, true));
    }

    #[test]
    fn kinds_must_match() {
        let mut doc = Document::new();
        let (a, b) = parse_pair(&mut doc, "true", "false");
        assert!(!doc.compare(a, b, true));
        let string = doc.create_string("x").unwrap();
        let raw = doc.create_raw("x").unwrap();
        assert!(!doc.compare(string, raw, true));
        let (a, b) = parse_pair(&mut doc, "null", "[]");
        assert!(!doc.compare(a, b, true));
    }

    #[test]
    fn references_compare_by_target() {
        let mut doc = Document::new();
        let (target, copy) = parse_pair(&mut doc, r#"{"x":[1]}"#, r#"{"x":[1]}"#);
        let reference = doc.create_reference(target).unwrap();
        assert!(doc.compare(reference, copy, true));

        doc.delete(target).unwrap();
        assert!(!doc.compare(reference, copy, true), "dangling");
    }

    #[test]
    fn reference_cycles_compare_unequal() {
        let mut doc = Document::new();
        let outer = doc.create_array().unwrap();
        let inner = doc.create_array().unwrap();
        doc.add_to_array(outer, inner).unwrap();
        doc.add_reference_to_array(inner, outer).unwrap();
        assert!(!doc.compare(outer, outer, true));
    }

    #[test]
    fn trees_in_different_documents() {
        let mut left = Document::new();
        let mut right = Document::new();
        let a = left.parse_str(r#"{"list":[1,"two",null]}"#).unwrap();
        let b = right.parse_str(r#"{ "list" : [ 1, "two", null ] }"#).unwrap();
        assert!(compare_documents(&left, a, &right, b, true));
        assert!(!compare_documents(&left, a, &right, a, true), "foreign handle");
    }
}
