use crate::document::Document;
use crate::error::TreeError;
use crate::hooks::MemoryHooks;
use crate::node::{NodeId, Number, Value};
use serde::Deserialize;
use std::fmt::{self, Write as _};

pub const DEFAULT_INITIAL_CAPACITY: usize = 256;

fn default_initial_capacity() -> usize {
    DEFAULT_INITIAL_CAPACITY
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    /// Two-space indentation, one member per line.
    #[default]
    Pretty,
    /// No insignificant whitespace.
    Compact,
}

/// Printer settings. Also the `[print]` table of [`ArborConfig`](crate::config::ArborConfig).
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct PrintOptions {
    #[serde(default)]
    pub format: Format,
    /// Escape every non-ASCII character as `\uXXXX`.
    #[serde(default)]
    pub ascii_only: bool,
    /// First size of the growable output buffer, in bytes.
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            format: Format::default(),
            ascii_only: false,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }
}

impl From<Format> for PrintOptions {
    fn from(format: Format) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }
}

impl Document {
    /// Prints the tree rooted at `id` into a new string.
    pub fn print(&self, id: NodeId, format: Format) -> Result<String, TreeError> {
        self.print_with_options(id, &PrintOptions::from(format))
    }

    pub fn print_with_options(
        &self,
        id: NodeId,
        options: &PrintOptions,
    ) -> Result<String, TreeError> {
        let mut sink = GrowableSink::new(self.hooks().as_ref(), options.initial_capacity)?;
        self.write_tree(id, options, &mut sink)?;
        Ok(sink.finish())
    }

    /// Prints into a caller-supplied buffer and returns the bytes written.
    ///
    /// Fails with [`TreeError::BufferTooSmall`] when the output does not fit;
    /// nothing is ever written past the end of `buffer`.
    pub fn print_into(
        &self,
        id: NodeId,
        buffer: &mut [u8],
        options: &PrintOptions,
    ) -> Result<usize, TreeError> {
        let mut sink = FixedSink {
            buffer,
            written: 0,
        };
        self.write_tree(id, options, &mut sink)?;
        Ok(sink.written)
    }

    fn write_tree(
        &self,
        root: NodeId,
        options: &PrintOptions,
        sink: &mut dyn Sink,
    ) -> Result<(), TreeError> {
        let pretty = options.format == Format::Pretty;
        let mut stack: Vec<Frame<'_>> = Vec::new();
        self.write_value(root, 0, options, sink, &mut stack)?;

        loop {
            let depth = stack.len();
            let Some(frame) = stack.last_mut() else {
                break;
            };
            if frame.next == frame.items.len() {
                let closer = if frame.is_object { "}" } else { "]" };
                stack.pop();
                if pretty {
                    sink.write("\n")?;
                    write_indent(sink, depth - 1)?;
                }
                sink.write(closer)?;
                continue;
            }

            let child = frame.items[frame.next];
            let first = frame.next == 0;
            let is_object = frame.is_object;
            let hops = frame.hops;
            frame.next += 1;

            if !first {
                sink.write(",")?;
            }
            if pretty {
                sink.write("\n")?;
                write_indent(sink, depth)?;
            }
            if is_object {
                write_string(sink, self.key(child).unwrap_or_default(), options.ascii_only)?;
                sink.write(if pretty { ": " } else { ":" })?;
            }
            self.write_value(child, hops, options, sink, &mut stack)?;
        }
        Ok(())
    }

    /// Writes a scalar, or the opening bracket of a non-empty container
    /// and pushes a frame for its children.
    fn write_value<'d>(
        &'d self,
        id: NodeId,
        mut hops: usize,
        options: &PrintOptions,
        sink: &mut dyn Sink,
        stack: &mut Vec<Frame<'d>>,
    ) -> Result<(), TreeError> {
        if self.is_reference(id) {
            hops += 1;
            if hops > self.live_references() {
                return Err(TreeError::InvalidOperation("reference cycle"));
            }
        }
        match self.value(id)? {
            Value::Null => sink.write("null"),
            Value::Bool(true) => sink.write("true"),
            Value::Bool(false) => sink.write("false"),
            Value::Number(number) => write_number(sink, number),
            Value::String(text) => write_string(sink, text, options.ascii_only),
            Value::Raw(text) => sink.write(text),
            Value::Array(children) | Value::Object(children) => {
                let is_object = self.is_object(id);
                if children.ids.is_empty() {
                    return sink.write(if is_object { "{}" } else { "[]" });
                }
                sink.write(if is_object { "{" } else { "[" })?;
                stack.push(Frame {
                    items: &children.ids,
                    next: 0,
                    is_object,
                    hops,
                });
                Ok(())
            }
            Value::Reference(_) => Err(TreeError::InvalidOperation("reference to a reference")),
        }
    }
}

/// An open container whose members are still being printed.
struct Frame<'d> {
    items: &'d [NodeId],
    next: usize,
    is_object: bool,
    /// Reference wrappers followed on the way down to this container.
    hops: usize,
}

trait Sink {
    fn write(&mut self, text: &str) -> Result<(), TreeError>;
}

/// Output buffer that grows through the document's hooks.
struct GrowableSink<'h> {
    text: String,
    reserved: usize,
    hooks: &'h dyn MemoryHooks,
}

impl<'h> GrowableSink<'h> {
    fn new(hooks: &'h dyn MemoryHooks, capacity: usize) -> Result<Self, TreeError> {
        if !hooks.alloc(capacity) {
            log::debug!("memory hooks refused a {capacity} byte print buffer");
            return Err(TreeError::AllocationFailure);
        }
        let mut text = String::new();
        if text.try_reserve_exact(capacity).is_err() {
            hooks.free(capacity);
            return Err(TreeError::AllocationFailure);
        }
        Ok(Self {
            text,
            reserved: capacity,
            hooks,
        })
    }

    /// Hands the text to the caller. The buffer stops counting against the
    /// hooks at this point.
    fn finish(mut self) -> String {
        std::mem::take(&mut self.text)
    }
}

impl Sink for GrowableSink<'_> {
    fn write(&mut self, text: &str) -> Result<(), TreeError> {
        let needed = self.text.len() + text.len();
        if needed > self.reserved {
            let grown = (self.reserved * 2).max(needed);
            if !self.hooks.realloc(self.reserved, grown) {
                log::debug!("memory hooks refused growing the print buffer to {grown} bytes");
                return Err(TreeError::AllocationFailure);
            }
            log::trace!("print buffer grew from {} to {grown} bytes", self.reserved);
            self.reserved = grown;
            self.text
                .try_reserve_exact(grown - self.text.len())
                .map_err(|_| TreeError::AllocationFailure)?;
        }
        self.text.push_str(text);
        Ok(())
    }
}

impl Drop for GrowableSink<'_> {
    fn drop(&mut self) {
        self.hooks.free(self.reserved);
    }
}

struct FixedSink<'b> {
    buffer: &'b mut [u8],
    written: usize,
}

impl Sink for FixedSink<'_> {
    fn write(&mut self, text: &str) -> Result<(), TreeError> {
        let end = self.written + text.len();
        let Some(target) = self.buffer.get_mut(self.written..end) else {
            return Err(TreeError::BufferTooSmall {
                capacity: self.buffer.len(),
            });
        };
        target.copy_from_slice(text.as_bytes());
        self.written = end;
        Ok(())
    }
}

fn write_indent(sink: &mut dyn Sink, depth: usize) -> Result<(), TreeError> {
    for _ in 0..depth {
        sink.write("  ")?;
    }
    Ok(())
}

/// Stack buffer for a number or a `\u` escape.
struct ShortText {
    bytes: [u8; 64],
    len: usize,
}

impl ShortText {
    fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len]).unwrap_or("0")
    }
}

impl fmt::Write for ShortText {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        let target = self.bytes.get_mut(self.len..end).ok_or(fmt::Error)?;
        target.copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

fn format_number(number: &Number) -> ShortText {
    let mut text = ShortText {
        bytes: [0; 64],
        len: 0,
    };
    let value = number.as_f64();
    let written = match number.as_i64() {
        Some(integer) => write!(text, "{integer}"),
        None if !value.is_finite() => text.write_str("0"),
        None if value == 0.0 || (1e-5..1e17).contains(&value.abs()) => write!(text, "{value}"),
        None => write!(text, "{value:e}"),
    };
    if written.is_err() {
        text.len = 0;
        let _ = text.write_str("0");
    }
    text
}

fn write_number(sink: &mut dyn Sink, number: &Number) -> Result<(), TreeError> {
    sink.write(format_number(number).as_str())
}

fn write_string(sink: &mut dyn Sink, text: &str, ascii_only: bool) -> Result<(), TreeError> {
    sink.write("\"")?;
    let mut run_start = 0;
    for (index, c) in text.char_indices() {
        let plain = match c {
            '"' | '\\' => false,
            c if c < ' ' => false,
            c => c.is_ascii() || !ascii_only,
        };
        if plain {
            continue;
        }
        sink.write(&text[run_start..index])?;
        run_start = index + c.len_utf8();
        match c {
            '"' => sink.write("\\\"")?,
            '\\' => sink.write("\\\\")?,
            '\u{8}' => sink.write("\\b")?,
            '\u{c}' => sink.write("\\f")?,
            '\n' => sink.write("\\n")?,
            '\r' => sink.write("\\r")?,
            '\t' => sink.write("\\t")?,
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let mut escape = ShortText {
                        bytes: [0; 64],
                        len: 0,
                    };
                    write!(escape, "\\u{unit:04x}").map_err(|_| {
                        TreeError::InvalidOperation("escape does not fit its buffer")
                    })?;
                    sink.write(escape.as_str())?;
                }
            }
        }
    }
    sink.write(&text[run_start..])?;
    sink.write("\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_utils::tracked_document;
    use crate::hooks::FailingHooks;
    use std::sync::Arc;

    fn reprint(input: &str, format: Format) -> String {
        let mut doc = Document::new();
        let root = doc.parse_str(input).expect("valid json");
        doc.print(root, format).expect("print")
    }

    #[test]
    fn pretty_output_uses_two_space_indent() {
        let printed = reprint(r#"{"a":1,"b":[true,{}],"c":{"d":[]}}"#, Format::Pretty);
        assert_eq!(
            printed,
            "{\n  \"a\": 1,\n  \"b\": [\n    true,\n    {}\n  ],\n  \"c\": {\n    \"d\": []\n  }\n}"
        );
    }

    #[test]
    fn compact_and_pretty_agree_on_scalars() {
        for text in ["null", "true", "false", "\"s\"", "3", "[]", "{}"] {
            assert_eq!(reprint(text, Format::Compact), text);
            assert_eq!(reprint(text, Format::Pretty), text);
        }
    }

    #[test]
    fn numbers_print_in_shortest_form() {
        let mut doc = Document::new();
        let cases: [(f64, &str); 9] = [
            (0.0, "0"),
            (1.5, "1.5"),
            (-2.25, "-2.25"),
            (0.1, "0.1"),
            (1e-7, "1e-7"),
            (1e20, "1e20"),
            (123456.789, "123456.789"),
            (9007199254740992.0, "9007199254740992"),
            (-0.0, "-0"),
        ];
        for (value, expected) in cases {
            let id = doc.create_number(value).unwrap();
            assert_eq!(doc.print(id, Format::Compact).unwrap(), expected, "{value}");
        }
    }

    #[test]
    fn exact_integers_survive_printing() {
        assert_eq!(
            reprint("[9007199254740993,-9223372036854775808]", Format::Compact),
            "[9007199254740993,-9223372036854775808]"
        );
    }

    #[test]
    fn non_finite_numbers_print_as_zero() {
        let mut doc = Document::new();
        let array = doc.create_double_array(&[f64::NAN, f64::INFINITY, f64::NEG_INFINITY]).unwrap();
        assert_eq!(doc.print(array, Format::Compact).unwrap(), "[0,0,0]");
    }

    #[test]
    fn strings_escape_quotes_and_controls() {
        let mut doc = Document::new();
        let id = doc
            .create_string("q\"b\\s/\u{8}\u{c}\n\r\t\u{1}\u{1f}é")
            .unwrap();
        assert_eq!(
            doc.print(id, Format::Compact).unwrap(),
            "\"q\\\"b\\\\s/\\b\\f\\n\\r\\t\\u0001\\u001fé\""
        );
    }

    #[test]
    fn ascii_only_escapes_non_ascii_with_surrogates() {
        let mut doc = Document::new();
        let id = doc.create_string("é😀x").unwrap();
        let options = PrintOptions {
            format: Format::Compact,
            ascii_only: true,
            ..PrintOptions::default()
        };
        assert_eq!(
            doc.print_with_options(id, &options).unwrap(),
            "\"\\u00e9\\ud83d\\ude00x\""
        );
    }

    #[test]
    fn keys_are_escaped_like_strings() {
        let mut doc = Document::new();
        let object = doc.create_object().unwrap();
        doc.add_null_to_object(object, "a\"b").unwrap();
        assert_eq!(doc.print(object, Format::Compact).unwrap(), r#"{"a\"b":null}"#);
    }

    #[test]
    fn raw_nodes_are_copied_verbatim() {
        let mut doc = Document::new();
        let array = doc.create_array().unwrap();
        let raw = doc.create_raw("{ \"pre\" : 1 }").unwrap();
        doc.add_to_array(array, raw).unwrap();
        assert_eq!(doc.print(array, Format::Compact).unwrap(), "[{ \"pre\" : 1 }]");
    }

    #[test]
    fn fixed_buffer_reports_too_small_without_overflowing() {
        let mut doc = Document::new();
        let root = doc.parse_str(r#"{"long":"aaaaaaaaaaaa"}"#).unwrap();
        let mut buffer = [0u8; 8];
        let err = doc
            .print_into(root, &mut buffer, &Format::Compact.into())
            .unwrap_err();
        assert_eq!(err, TreeError::BufferTooSmall { capacity: 8 });

        let mut buffer = [0u8; 64];
        let written = doc
            .print_into(root, &mut buffer, &Format::Compact.into())
            .unwrap();
        assert_eq!(&buffer[..written], br#"{"long":"aaaaaaaaaaaa"}"#);
    }

    #[test]
    fn exact_fit_buffer_succeeds() {
        let mut doc = Document::new();
        let root = doc.parse_str("[1,2]").unwrap();
        let mut buffer = [0u8; 5];
        assert_eq!(
            doc.print_into(root, &mut buffer, &Format::Compact.into()),
            Ok(5)
        );
    }

    #[test]
    fn references_print_their_target() {
        let mut doc = Document::new();
        let shared = doc.parse_str(r#"{"x":1}"#).unwrap();
        let array = doc.create_array().unwrap();
        doc.add_reference_to_array(array, shared).unwrap();
        doc.add_reference_to_array(array, shared).unwrap();
        assert_eq!(
            doc.print(array, Format::Compact).unwrap(),
            r#"[{"x":1},{"x":1}]"#
        );
    }

    #[test]
    fn reference_cycle_is_an_error() {
        let mut doc = Document::new();
        let outer = doc.create_array().unwrap();
        let inner = doc.create_array().unwrap();
        doc.add_to_array(outer, inner).unwrap();
        doc.add_reference_to_array(inner, outer).unwrap();
        assert_eq!(
            doc.print(outer, Format::Compact),
            Err(TreeError::InvalidOperation("reference cycle"))
        );
    }

    #[test]
    fn print_buffer_metering_is_released() {
        let (mut doc, hooks) = tracked_document();
        let root = doc.parse_str(r#"[1,2,3,"four"]"#).unwrap();
        let before = hooks.live_bytes();
        let options = PrintOptions {
            initial_capacity: 2,
            ..PrintOptions::default()
        };
        let printed = doc.print_with_options(root, &options).unwrap();
        assert!(printed.len() > 2);
        assert!(hooks.peak_bytes() > before, "buffer was metered");
        assert_eq!(hooks.live_bytes(), before);
    }

    #[test]
    fn refused_buffer_growth_fails_cleanly() {
        // One grant for the node, one for the initial buffer.
        let hooks = Arc::new(FailingHooks::new(2));
        let mut doc = Document::with_hooks(hooks.clone());
        let text = doc
            .create_string_static("needs more than four bytes")
            .unwrap();
        let options = PrintOptions {
            initial_capacity: 4,
            ..PrintOptions::default()
        };
        assert_eq!(
            doc.print_with_options(text, &options),
            Err(TreeError::AllocationFailure)
        );
        assert_eq!(hooks.live_bytes(), crate::document::NODE_SIZE);
    }
}
