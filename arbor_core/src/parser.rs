use crate::document::Document;
use crate::error::{ParseErrorKind, TreeError};
use crate::node::{Children, Node, NodeId, Number, Value};
use serde::Deserialize;

pub const DEFAULT_MAX_DEPTH: usize = 1000;

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

/// Parser settings. Also the `[parse]` table of [`ArborConfig`](crate::config::ArborConfig).
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ParseOptions {
    /// Reject anything but whitespace after the root value.
    #[serde(default)]
    pub require_complete: bool,
    /// Treat the first NUL byte as the end of the input.
    #[serde(default)]
    pub nul_terminated: bool,
    /// Deepest allowed container nesting.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            require_complete: false,
            nul_terminated: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ParseOptions {
    pub fn complete() -> Self {
        Self {
            require_complete: true,
            ..Self::default()
        }
    }
}

/// Result of a successful parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parsed {
    pub root: NodeId,
    /// Offset of the first byte after the root value and its trailing whitespace.
    pub end: usize,
}

impl Document {
    /// Parses one JSON value with default options; trailing bytes are allowed.
    pub fn parse(&mut self, input: &[u8]) -> Result<NodeId, TreeError> {
        self.parse_with_options(input, &ParseOptions::default())
            .map(|parsed| parsed.root)
    }

    pub fn parse_str(&mut self, input: &str) -> Result<NodeId, TreeError> {
        self.parse(input.as_bytes())
    }

    pub fn parse_with_options(
        &mut self,
        input: &[u8],
        options: &ParseOptions,
    ) -> Result<Parsed, TreeError> {
        let input = if options.nul_terminated {
            match input.iter().position(|&b| b == 0) {
                Some(end) => &input[..end],
                None => input,
            }
        } else {
            input
        };

        let mut parser = Parser {
            input,
            pos: 0,
            max_depth: options.max_depth,
        };
        let mut root = None;
        let outcome = parser.parse_tree(self, &mut root).and_then(|()| {
            parser.skip_whitespace();
            if options.require_complete && parser.pos < input.len() {
                Err(parser.error(ParseErrorKind::TrailingCharacters))
            } else {
                Ok(())
            }
        });

        match (outcome, root) {
            (Ok(()), Some(root)) => Ok(Parsed {
                root,
                end: parser.pos,
            }),
            (outcome, root) => {
                if let Some(root) = root {
                    self.discard(root);
                }
                let err = outcome
                    .err()
                    .unwrap_or(parser.error(ParseErrorKind::UnexpectedEnd));
                log::debug!("rejected {} bytes of JSON: {err}", input.len());
                Err(err)
            }
        }
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    max_depth: usize,
}

/// An open container on the parse stack.
struct Open {
    id: NodeId,
    is_object: bool,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn error(&self, kind: ParseErrorKind) -> TreeError {
        TreeError::parse(self.pos, kind)
    }

    fn skip_whitespace(&mut self) {
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.peek() {
            self.pos += 1;
        }
    }

    /// Reads one complete value. `root` is set as soon as the root node
    /// exists, so the caller can free a partial tree on failure.
    fn parse_tree(
        &mut self,
        doc: &mut Document,
        root: &mut Option<NodeId>,
    ) -> Result<(), TreeError> {
        let mut open: Vec<Open> = Vec::new();
        let mut key: Option<String> = None;

        'values: loop {
            self.skip_whitespace();
            let start = self.pos;
            let value = match self.peek() {
                None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
                Some(b'{' | b'[') if open.len() >= self.max_depth => {
                    return Err(self.error(ParseErrorKind::DepthLimit));
                }
                Some(b'{') => {
                    self.pos += 1;
                    Value::Object(Children::default())
                }
                Some(b'[') => {
                    self.pos += 1;
                    Value::Array(Children::default())
                }
                Some(b'"') => {
                    let text = self.parse_string()?;
                    Value::String(doc.adopt_text(text)?)
                }
                Some(b't') => {
                    self.expect_literal(b"true")?;
                    Value::Bool(true)
                }
                Some(b'f') => {
                    self.expect_literal(b"false")?;
                    Value::Bool(false)
                }
                Some(b'n') => {
                    self.expect_literal(b"null")?;
                    Value::Null
                }
                Some(b'-' | b'0'..=b'9') => Value::Number(self.parse_number()?),
                Some(_) => {
                    return Err(TreeError::parse(start, ParseErrorKind::UnexpectedCharacter));
                }
            };

            let is_object = matches!(value, Value::Object(_));
            let is_container = is_object || matches!(value, Value::Array(_));
            let id = doc.insert(Node::detached(value))?;
            match open.last() {
                None => *root = Some(id),
                Some(parent) => {
                    let member_key = match key.take() {
                        Some(text) => match doc.adopt_text(text) {
                            Ok(text) => Some(text),
                            Err(err) => {
                                doc.discard(id);
                                return Err(err);
                            }
                        },
                        None => None,
                    };
                    if let Err(err) = doc.link(parent.id, id, None, member_key) {
                        doc.discard(id);
                        return Err(err);
                    }
                }
            }

            if is_container {
                open.push(Open { id, is_object });
                self.skip_whitespace();
                let closer = if is_object { b'}' } else { b']' };
                if self.peek() == Some(closer) {
                    self.pos += 1;
                    open.pop();
                } else {
                    if is_object {
                        key = Some(self.parse_member_key()?);
                    }
                    continue 'values;
                }
            }

            // A value is complete: close finished containers until the next
            // member starts or the root is done.
            loop {
                let Some(top) = open.last() else {
                    return Ok(());
                };
                let is_object = top.is_object;
                self.skip_whitespace();
                match self.peek() {
                    Some(b',') => {
                        self.pos += 1;
                        if is_object {
                            key = Some(self.parse_member_key()?);
                        }
                        continue 'values;
                    }
                    Some(b'}') if is_object => {
                        self.pos += 1;
                        open.pop();
                    }
                    Some(b']') if !is_object => {
                        self.pos += 1;
                        open.pop();
                    }
                    Some(_) => return Err(self.error(ParseErrorKind::UnexpectedCharacter)),
                    None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
                }
            }
        }
    }

    /// `"key"` followed by `:`.
    fn parse_member_key(&mut self) -> Result<String, TreeError> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'"') => {}
            Some(_) => return Err(self.error(ParseErrorKind::UnexpectedCharacter)),
            None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
        }
        let key = self.parse_string()?;
        self.skip_whitespace();
        match self.peek() {
            Some(b':') => {
                self.pos += 1;
                Ok(key)
            }
            Some(_) => Err(self.error(ParseErrorKind::UnexpectedCharacter)),
            None => Err(self.error(ParseErrorKind::UnexpectedEnd)),
        }
    }

    fn expect_literal(&mut self, literal: &[u8]) -> Result<(), TreeError> {
        let rest = &self.input[self.pos..];
        if rest.starts_with(literal) {
            self.pos += literal.len();
            Ok(())
        } else if literal.starts_with(rest) {
            Err(TreeError::parse(
                self.input.len(),
                ParseErrorKind::UnexpectedEnd,
            ))
        } else {
            Err(self.error(ParseErrorKind::InvalidLiteral))
        }
    }

    /// Reads a string literal starting at its opening quote and returns the
    /// unescaped text.
    fn parse_string(&mut self) -> Result<String, TreeError> {
        self.pos += 1;
        let mut text = String::new();
        let mut run_start = self.pos;
        loop {
            match self.peek() {
                None => return Err(self.error(ParseErrorKind::UnexpectedEnd)),
                Some(b'"') => {
                    self.push_run(&mut text, run_start)?;
                    self.pos += 1;
                    return Ok(text);
                }
                Some(b'\\') => {
                    self.push_run(&mut text, run_start)?;
                    let decoded = self.parse_escape()?;
                    push_char(&mut text, decoded)?;
                    run_start = self.pos;
                }
                Some(byte) if byte < 0x20 => {
                    return Err(self.error(ParseErrorKind::ControlCharacter));
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Appends the unescaped bytes `run_start..pos` after validating them.
    fn push_run(&self, text: &mut String, run_start: usize) -> Result<(), TreeError> {
        let run = &self.input[run_start..self.pos];
        let run = std::str::from_utf8(run).map_err(|err| {
            TreeError::parse(run_start + err.valid_up_to(), ParseErrorKind::InvalidUtf8)
        })?;
        text.try_reserve(run.len())
            .map_err(|_| TreeError::AllocationFailure)?;
        text.push_str(run);
        Ok(())
    }

    /// Decodes the escape sequence at `pos` (which holds the backslash).
    fn parse_escape(&mut self) -> Result<char, TreeError> {
        let escape_start = self.pos;
        let decoded = match self.input.get(self.pos + 1) {
            None => {
                return Err(TreeError::parse(
                    self.input.len(),
                    ParseErrorKind::UnexpectedEnd,
                ));
            }
            Some(b'"') => '"',
            Some(b'\\') => '\\',
            Some(b'/') => '/',
            Some(b'b') => '\u{8}',
            Some(b'f') => '\u{c}',
            Some(b'n') => '\n',
            Some(b'r') => '\r',
            Some(b't') => '\t',
            Some(b'u') => {
                self.pos += 2;
                return self.parse_unicode_escape(escape_start);
            }
            Some(_) => {
                return Err(TreeError::parse(
                    escape_start,
                    ParseErrorKind::InvalidEscape,
                ));
            }
        };
        self.pos += 2;
        Ok(decoded)
    }

    /// Decodes `XXXX` (and a following `\uXXXX` low surrogate when needed).
    fn parse_unicode_escape(&mut self, escape_start: usize) -> Result<char, TreeError> {
        let invalid = || TreeError::parse(escape_start, ParseErrorKind::InvalidUnicode);
        let first = self.read_hex4().ok_or_else(invalid)?;
        let code = match first {
            0xD800..=0xDBFF => {
                if self.input.get(self.pos..self.pos + 2) != Some(b"\\u".as_slice()) {
                    return Err(invalid());
                }
                self.pos += 2;
                let second = self.read_hex4().ok_or_else(invalid)?;
                if !(0xDC00..=0xDFFF).contains(&second) {
                    return Err(invalid());
                }
                0x10000 + ((first - 0xD800) << 10) + (second - 0xDC00)
            }
            0xDC00..=0xDFFF => return Err(invalid()),
            _ => first,
        };
        char::from_u32(code).ok_or_else(invalid)
    }

    fn read_hex4(&mut self) -> Option<u32> {
        let digits = self.input.get(self.pos..self.pos + 4)?;
        let mut value = 0u32;
        for &digit in digits {
            value = (value << 4) | char::from(digit).to_digit(16)?;
        }
        self.pos += 4;
        Some(value)
    }

    /// Reads a number following the JSON grammar
    /// `-? (0 | [1-9][0-9]*) (. [0-9]+)? ([eE] [+-]? [0-9]+)?`.
    fn parse_number(&mut self) -> Result<Number, TreeError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        match self.peek() {
            Some(b'0') => self.pos += 1,
            Some(b'1'..=b'9') => self.skip_digits(),
            _ => return Err(self.error(ParseErrorKind::InvalidNumber)),
        }

        let mut is_integer = true;
        if self.peek() == Some(b'.') {
            is_integer = false;
            self.pos += 1;
            self.require_digits()?;
        }
        if let Some(b'e' | b'E') = self.peek() {
            is_integer = false;
            self.pos += 1;
            if let Some(b'+' | b'-') = self.peek() {
                self.pos += 1;
            }
            self.require_digits()?;
        }

        let literal = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| TreeError::parse(start, ParseErrorKind::InvalidNumber))?;
        let value: f64 = literal
            .parse()
            .map_err(|_| TreeError::parse(start, ParseErrorKind::InvalidNumber))?;
        let integer = if is_integer && literal != "-0" {
            literal.parse::<i64>().ok()
        } else {
            None
        };
        Ok(Number::from_parts(value, integer))
    }

    fn skip_digits(&mut self) {
        while let Some(b'0'..=b'9') = self.peek() {
            self.pos += 1;
        }
    }

    fn require_digits(&mut self) -> Result<(), TreeError> {
        match self.peek() {
            Some(b'0'..=b'9') => {
                self.skip_digits();
                Ok(())
            }
            _ => Err(self.error(ParseErrorKind::InvalidNumber)),
        }
    }
}

fn push_char(text: &mut String, decoded: char) -> Result<(), TreeError> {
    text.try_reserve(decoded.len_utf8())
        .map_err(|_| TreeError::AllocationFailure)?;
    text.push(decoded);
    Ok(())
}
