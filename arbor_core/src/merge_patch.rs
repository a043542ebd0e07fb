use crate::document::Document;
use crate::error::TreeError;
use crate::node::NodeId;

/// Applies `patch` to the detached tree `target` and returns the patched root.
///
/// The patch is not consumed. The result is always a new root: on success
/// `target` has been deleted, on failure it is left untouched. Members of the
/// target that survive keep their positions; new members are appended.
pub fn apply_merge_patch(
    doc: &mut Document,
    target: NodeId,
    patch: NodeId,
    case_sensitive: bool,
) -> Result<NodeId, TreeError> {
    if doc.parent(target).is_some() {
        return Err(TreeError::InvalidOperation(
            "merge patch target must be detached",
        ));
    }
    doc.node(patch)?;
    let working = doc.duplicate(target, true)?;
    let patched = merge_into(doc, working, patch, case_sensitive)?;
    if let Err(err) = doc.delete(target) {
        doc.discard(patched);
        return Err(err);
    }
    Ok(patched)
}

/// Patches the detached `root`, taking ownership of it. On failure `root`
/// and everything built from it have been freed.
fn merge_into(
    doc: &mut Document,
    root: NodeId,
    patch: NodeId,
    case_sensitive: bool,
) -> Result<NodeId, TreeError> {
    if !doc.is_object(patch) {
        doc.discard(root);
        return doc.duplicate(patch, true);
    }
    let root = if doc.is_object(root) {
        root
    } else {
        doc.discard(root);
        doc.create_object()?
    };
    if let Err(err) = merge_objects(doc, root, patch, case_sensitive) {
        doc.discard(root);
        return Err(err);
    }
    Ok(root)
}

/// Merges the object `patch` into the object `root`, one nesting level at a
/// time. Everything built is attached under `root` before the next step.
fn merge_objects(
    doc: &mut Document,
    root: NodeId,
    patch: NodeId,
    case_sensitive: bool,
) -> Result<(), TreeError> {
    let mut pending = vec![(root, patch)];
    while let Some((object, patch)) = pending.pop() {
        let members: Vec<(String, NodeId)> = doc
            .members(patch)
            .map(|(key, member)| (key.to_owned(), member))
            .collect();
        for (key, member) in members {
            let existing = doc.find_member(object, &key, case_sensitive);
            if doc.is_null(member) {
                if let Some((index, _)) = existing {
                    let removed = doc.unlink(object, index)?;
                    doc.discard(removed);
                }
                continue;
            }

            if !doc.is_object(member) {
                let copy = doc.duplicate(member, true)?;
                put_member(doc, object, &key, existing, copy)?;
                continue;
            }
            match existing {
                Some((_, current)) if doc.is_object(current) => pending.push((current, member)),
                _ => {
                    let fresh = doc.create_object()?;
                    put_member(doc, object, &key, existing, fresh)?;
                    pending.push((fresh, member));
                }
            }
        }
    }
    Ok(())
}

/// Stores the detached `child` under `key`, in place of `existing` when there
/// is one (keeping its position and spelling of the key). `child` is freed
/// on failure.
fn put_member(
    doc: &mut Document,
    object: NodeId,
    key: &str,
    existing: Option<(usize, NodeId)>,
    child: NodeId,
) -> Result<(), TreeError> {
    let (position, key) = match existing {
        Some((index, current)) => (Some(index), doc.key(current).unwrap_or(key).to_owned()),
        None => (None, key.to_owned()),
    };
    if let Some(index) = position {
        match doc.unlink(object, index) {
            Ok(removed) => doc.discard(removed),
            Err(err) => {
                doc.discard(child);
                return Err(err);
            }
        }
    }
    let key = match doc.adopt_text(key) {
        Ok(key) => key,
        Err(err) => {
            doc.discard(child);
            return Err(err);
        }
    };
    doc.link(object, child, position, Some(key))
        .inspect_err(|_| doc.discard(child))
}

/// Builds the patch that turns `from` into `to`, or `None` when the two
/// already compare equal. The patch is a new detached tree.
///
/// Members whose value is `null` in `to` cannot be expressed by a merge
/// patch; they come out as deletions.
pub fn generate_merge_patch(
    doc: &mut Document,
    from: NodeId,
    to: NodeId,
    case_sensitive: bool,
) -> Result<Option<NodeId>, TreeError> {
    doc.node(from)?;
    doc.node(to)?;
    if doc.compare(from, to, case_sensitive) {
        return Ok(None);
    }
    if !doc.is_object(from) || !doc.is_object(to) {
        return doc.duplicate(to, true).map(Some);
    }

    let patch = doc.create_object()?;
    if let Err(err) = fill_object_patch(doc, patch, from, to, case_sensitive) {
        doc.discard(patch);
        return Err(err);
    }
    Ok(Some(patch))
}

/// Fills `patch` one nesting level at a time. Pairs of nested objects get an
/// empty patch object up front; those still empty at the end are removed.
fn fill_object_patch(
    doc: &mut Document,
    patch: NodeId,
    from: NodeId,
    to: NodeId,
    case_sensitive: bool,
) -> Result<(), TreeError> {
    let mut pending = vec![(patch, from, to)];
    let mut nested = Vec::new();
    while let Some((patch, from, to)) = pending.pop() {
        let removed_or_changed: Vec<(String, NodeId)> = doc
            .members(from)
            .map(|(key, member)| (key.to_owned(), member))
            .collect();
        for (key, member) in removed_or_changed {
            let Some((_, target)) = doc.find_member(to, &key, case_sensitive) else {
                let null = doc.create_null()?;
                add_owned(doc, patch, &key, null)?;
                continue;
            };
            if doc.is_object(member) && doc.is_object(target) {
                let entry = doc.create_object()?;
                add_owned(doc, patch, &key, entry)?;
                nested.push(entry);
                pending.push((entry, member, target));
            } else if !doc.compare(member, target, case_sensitive) {
                let copy = doc.duplicate(target, true)?;
                add_owned(doc, patch, &key, copy)?;
            }
        }

        let added: Vec<(String, NodeId)> = doc
            .members(to)
            .map(|(key, member)| (key.to_owned(), member))
            .collect();
        for (key, member) in added {
            if doc.find_member(from, &key, case_sensitive).is_none() {
                let copy = doc.duplicate(member, true)?;
                add_owned(doc, patch, &key, copy)?;
            }
        }
    }

    // Entries are recorded parent first, so walking backwards empties
    // children before their parents are checked.
    for entry in nested.into_iter().rev() {
        if doc.array_size(entry) == 0 {
            doc.delete(entry)?;
        }
    }
    Ok(())
}

/// Adds a node built here to `patch`, freeing it if that fails.
fn add_owned(
    doc: &mut Document,
    patch: NodeId,
    key: &str,
    child: NodeId,
) -> Result<(), TreeError> {
    doc.add_to_object(patch, key, child).inspect_err(|_| doc.discard(child))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_utils::tracked_document;
    use crate::hooks::FailingHooks;
    use crate::parser::ParseOptions;
    use crate::printer::Format;
    use std::sync::Arc;

    fn patched(target: &str, patch: &str) -> String {
        let mut doc = Document::new();
        let target = doc.parse_str(target).unwrap();
        let patch = doc.parse_str(patch).unwrap();
        let result = apply_merge_patch(&mut doc, target, patch, true).unwrap();
        assert!(!doc.contains(target), "target is replaced");
        assert!(doc.contains(patch), "patch is not consumed");
        doc.print(result, Format::Compact).unwrap()
    }

    #[test]
    fn rfc7396_examples() {
        let cases = [
            (r#"{"a":"b"}"#, r#"{"a":"c"}"#, r#"{"a":"c"}"#),
            (r#"{"a":"b"}"#, r#"{"b":"c"}"#, r#"{"a":"b","b":"c"}"#),
            (r#"{"a":"b"}"#, r#"{"a":null}"#, r#"{}"#),
            (r#"{"a":"b","b":"c"}"#, r#"{"a":null}"#, r#"{"b":"c"}"#),
            (r#"{"a":["b"]}"#, r#"{"a":"c"}"#, r#"{"a":"c"}"#),
            (r#"{"a":"c"}"#, r#"{"a":["b"]}"#, r#"{"a":["b"]}"#),
            (
                r#"{"a":{"b":"c"}}"#,
                r#"{"a":{"b":"d","c":null}}"#,
                r#"{"a":{"b":"d"}}"#,
            ),
            (r#"{"a":[{"b":"c"}]}"#, r#"{"a":[1]}"#, r#"{"a":[1]}"#),
            (r#"["a","b"]"#, r#"["c","d"]"#, r#"["c","d"]"#),
            (r#"{"a":"b"}"#, r#"["c"]"#, r#"["c"]"#),
            (r#"{"a":"foo"}"#, "null", "null"),
            (r#"{"a":"foo"}"#, r#""bar""#, r#""bar""#),
            (r#"{"e":null}"#, r#"{"a":1}"#, r#"{"e":null,"a":1}"#),
            (r#"[1,2]"#, r#"{"a":"b","c":null}"#, r#"{"a":"b"}"#),
            (r#"{}"#, r#"{"a":{"bb":{"ccc":null}}}"#, r#"{"a":{"bb":{}}}"#),
        ];
        for (target, patch, expected) in cases {
            assert_eq!(patched(target, patch), expected, "{target} + {patch}");
        }
    }

    #[test]
    fn surviving_members_keep_their_position() {
        assert_eq!(
            patched(r#"{"a":1,"b":2,"c":3}"#, r#"{"a":9,"d":4}"#),
            r#"{"a":9,"b":2,"c":3,"d":4}"#
        );
    }

    #[test]
    fn case_insensitive_matching_keeps_target_key() {
        let mut doc = Document::new();
        let target = doc.parse_str(r#"{"Name":"old"}"#).unwrap();
        let patch = doc.parse_str(r#"{"name":"new"}"#).unwrap();
        let result = apply_merge_patch(&mut doc, target, patch, false).unwrap();
        assert_eq!(doc.print(result, Format::Compact).unwrap(), r#"{"Name":"new"}"#);
    }

    #[test]
    fn attached_target_is_rejected() {
        let mut doc = Document::new();
        let root = doc.parse_str(r#"{"inner":{}}"#).unwrap();
        let inner = doc.object_item(root, "inner").unwrap();
        let patch = doc.parse_str(r#"{"x":1}"#).unwrap();
        assert_eq!(
            apply_merge_patch(&mut doc, inner, patch, true),
            Err(TreeError::InvalidOperation("merge patch target must be detached"))
        );
        assert_eq!(doc.print(root, Format::Compact).unwrap(), r#"{"inner":{}}"#);
    }

    #[test]
    fn generated_patch_reproduces_the_target() {
        let mut doc = Document::new();
        let from = doc
            .parse_str(r#"{"keep":1,"drop":true,"nested":{"x":1,"y":[1]},"swap":{}}"#)
            .unwrap();
        let to = doc
            .parse_str(r#"{"keep":1,"nested":{"x":2,"y":[1]},"swap":[],"new":"n"}"#)
            .unwrap();
        let patch = generate_merge_patch(&mut doc, from, to, true)
            .unwrap()
            .expect("trees differ");
        assert_eq!(
            doc.print(patch, Format::Compact).unwrap(),
            r#"{"drop":null,"nested":{"x":2},"swap":[],"new":"n"}"#
        );

        let result = apply_merge_patch(&mut doc, from, patch, true).unwrap();
        assert!(doc.compare(result, to, true));
    }

    #[test]
    fn equal_trees_need_no_patch() {
        let mut doc = Document::new();
        let a = doc.parse_str(r#"{"a":[1,2]}"#).unwrap();
        let b = doc.parse_str(r#"{ "a" : [1, 2] }"#).unwrap();
        assert_eq!(generate_merge_patch(&mut doc, a, b, true), Ok(None));
    }

    #[test]
    fn patching_is_leak_free() {
        let (mut doc, hooks) = tracked_document();
        let target = doc.parse_str(r#"{"a":{"b":"c"},"list":[1,2,3]}"#).unwrap();
        let patch = doc.parse_str(r#"{"a":{"b":null,"z":"long text"},"list":null}"#).unwrap();
        let result = apply_merge_patch(&mut doc, target, patch, true).unwrap();
        let diff = generate_merge_patch(&mut doc, result, patch, true).unwrap();

        doc.delete(result).unwrap();
        doc.delete(patch).unwrap();
        if let Some(diff) = diff {
            doc.delete(diff).unwrap();
        }
        assert_eq!(doc.live_nodes(), 0);
        assert_eq!(hooks.live_bytes(), 0);
    }

    #[test]
    fn equal_nested_objects_leave_no_empty_entry() {
        let mut doc = Document::new();
        let from = doc.parse_str(r#"{"same":{"x":[1]},"other":1}"#).unwrap();
        let to = doc.parse_str(r#"{"same":{"x":[1]},"other":2}"#).unwrap();
        let patch = generate_merge_patch(&mut doc, from, to, true)
            .unwrap()
            .expect("trees differ");
        assert_eq!(doc.print(patch, Format::Compact).unwrap(), r#"{"other":2}"#);
    }

    #[test]
    fn deep_trees_merge_and_diff_without_recursion() {
        const DEPTH: usize = 100_000;
        let nested = |leaf: &str| format!("{}{leaf}{}", r#"{"k":"#.repeat(DEPTH), "}".repeat(DEPTH));
        let options = ParseOptions {
            max_depth: DEPTH + 1,
            ..ParseOptions::default()
        };
        let mut doc = Document::new();
        let patch = doc
            .parse_with_options(nested("1").as_bytes(), &options)
            .unwrap()
            .root;

        let empty = doc.create_object().unwrap();
        let built = apply_merge_patch(&mut doc, empty, patch, true).unwrap();
        assert!(doc.compare(built, patch, true));

        let target = doc
            .parse_with_options(nested("2").as_bytes(), &options)
            .unwrap()
            .root;
        let diff = generate_merge_patch(&mut doc, target, built, true)
            .unwrap()
            .expect("leaves differ");
        assert!(doc.compare(diff, patch, true));

        let patched = apply_merge_patch(&mut doc, target, diff, true).unwrap();
        assert!(doc.compare(patched, built, true));

        for root in [patch, built, diff, patched] {
            doc.delete(root).unwrap();
        }
        assert_eq!(doc.live_nodes(), 0);
    }

    #[test]
    fn refused_allocations_leave_nothing_behind() {
        let texts = [
            r#"{"a":{"b":"c","keep":[1]},"d":[1],"gone":true}"#,
            r#"{"a":{"b":null,"e":{"f":"g","h":null}},"d":{"x":1},"gone":null}"#,
        ];
        for grants in 0..160 {
            let hooks = Arc::new(FailingHooks::new(grants));
            let mut doc = Document::with_hooks(hooks.clone());
            let roots: Vec<NodeId> = texts
                .iter()
                .filter_map(|text| doc.parse_str(text).ok())
                .collect();
            if let &[target, patch] = roots.as_slice() {
                if let Ok(Some(diff)) = generate_merge_patch(&mut doc, target, patch, true) {
                    doc.delete(diff).unwrap();
                }
                match apply_merge_patch(&mut doc, target, patch, true) {
                    Ok(result) => doc.delete(result).unwrap(),
                    Err(_) => doc.delete(target).unwrap(),
                };
                doc.delete(patch).unwrap();
            } else {
                for root in roots {
                    doc.delete(root).unwrap();
                }
            }
            assert_eq!(doc.live_nodes(), 0, "grants = {grants}");
            assert_eq!(hooks.live_bytes(), 0, "grants = {grants}");
        }
    }
}
