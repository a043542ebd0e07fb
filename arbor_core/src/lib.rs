pub mod compare;
pub mod config;
pub mod document;
pub mod error;
pub mod hooks;
pub mod interop;
pub mod merge_patch;
pub mod minify;
pub mod mutate;
pub mod node;
pub mod parser;
pub mod printer;

pub use compare::compare_documents;
pub use config::ArborConfig;
pub use document::Document;
pub use error::{ParseErrorKind, TreeError};
pub use hooks::{FailingHooks, MemoryHooks, SystemHooks, TrackingHooks};
pub use merge_patch::{apply_merge_patch, generate_merge_patch};
pub use minify::{minify, minify_str, minify_vec};
pub use node::{Kind, NodeId, Number, Text};
pub use parser::{ParseOptions, Parsed};
pub use printer::{Format, PrintOptions};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_utils::tracked_document;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Builds a random tree of at most `budget` nodes.
    fn random_tree(doc: &mut Document, rng: &mut ChaCha8Rng, budget: usize) -> NodeId {
        let root = doc.create_object().unwrap();
        let mut containers = vec![root];
        for index in 0..budget {
            let parent = containers[rng.random_range(0..containers.len())];
            let child = match rng.random_range(0..8) {
                0 => doc.create_null(),
                1 => doc.create_bool(rng.random_bool(0.5)),
                2 => doc.create_integer(rng.random_range(-1_000_000..1_000_000)),
                3 => doc.create_number(rng.random_range(-1e6..1e6)),
                4 => doc.create_string(&format!("s{}\n\"{}", index, rng.random_range(0..100))),
                5 => doc.create_string("é😀"),
                6 => doc.create_array(),
                _ => doc.create_object(),
            }
            .unwrap();
            if doc.kind(child).unwrap().is_container() {
                containers.push(child);
            }
            if doc.is_object(parent) {
                doc.add_to_object(parent, &format!("k{index}"), child).unwrap();
            } else {
                doc.add_to_array(parent, child).unwrap();
            }
        }
        root
    }

    #[test]
    fn random_trees_round_trip_through_text() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
        let mut doc = Document::new();
        for _ in 0..50 {
            let tree = random_tree(&mut doc, &mut rng, 40);
            for format in [Format::Compact, Format::Pretty] {
                let text = doc.print(tree, format).unwrap();
                let reparsed = doc.parse_str(&text).unwrap();
                assert!(doc.compare(tree, reparsed, true), "{text}");
                assert_eq!(doc.print(reparsed, format).unwrap(), text);
                doc.delete(reparsed).unwrap();
            }
            doc.delete(tree).unwrap();
        }
        assert_eq!(doc.live_nodes(), 0);
    }

    #[test]
    fn random_duplicates_are_independent() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let (mut doc, hooks) = tracked_document();
        for _ in 0..20 {
            let tree = random_tree(&mut doc, &mut rng, 30);
            let before = doc.print(tree, Format::Compact).unwrap();
            let copy = doc.duplicate(tree, true).unwrap();
            assert!(doc.compare(tree, copy, true));

            doc.add_null_to_object(copy, "extra").unwrap();
            assert!(!doc.compare(tree, copy, true));
            assert_eq!(doc.print(tree, Format::Compact).unwrap(), before);

            doc.delete(tree).unwrap();
            assert!(doc.print(copy, Format::Compact).is_ok());
            doc.delete(copy).unwrap();
        }
        assert_eq!(hooks.live_bytes(), 0);
    }

    #[test]
    fn minified_pretty_output_equals_compact_output() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut doc = Document::new();
        for _ in 0..20 {
            let tree = random_tree(&mut doc, &mut rng, 25);
            let pretty = doc.print(tree, Format::Pretty).unwrap();
            let compact = doc.print(tree, Format::Compact).unwrap();
            assert_eq!(minify_str(&pretty), compact);
            doc.delete(tree).unwrap();
        }
    }
}
