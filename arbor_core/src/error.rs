use thiserror::Error;

/// Why the parser rejected its input.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unexpected character")]
    UnexpectedCharacter,
    #[error("invalid literal")]
    InvalidLiteral,
    #[error("invalid number")]
    InvalidNumber,
    #[error("invalid escape sequence")]
    InvalidEscape,
    #[error("invalid unicode escape or surrogate pair")]
    InvalidUnicode,
    #[error("unescaped control character in string")]
    ControlCharacter,
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("nesting depth limit exceeded")]
    DepthLimit,
    #[error("trailing characters after the root value")]
    TrailingCharacters,
}

/// Every failure the tree, codec and mutation API can report.
///
/// Operations that return one of these leave the document exactly as it was
/// before the call, or in the documented rolled-back state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Malformed input text. `offset` is the byte position of the failure.
    #[error("parse error at byte {offset}: {kind}")]
    Parse { offset: usize, kind: ParseErrorKind },

    /// The document's memory hooks (or the system allocator) refused memory.
    #[error("allocation failure")]
    AllocationFailure,

    /// The operation does not apply to the given nodes.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// `print_into` output would not fit in the caller's buffer.
    #[error("printed output does not fit in {capacity} bytes")]
    BufferTooSmall { capacity: usize },

    /// The handle refers to a deleted node or to another document.
    #[error("node handle is stale or belongs to another document")]
    UnknownNode,

    /// A reference wrapper whose target has been deleted.
    #[error("reference target has been deleted")]
    DanglingReference,
}

impl TreeError {
    pub(crate) fn parse(offset: usize, kind: ParseErrorKind) -> Self {
        TreeError::Parse { offset, kind }
    }

    /// Byte offset of a parse failure, if this is one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            TreeError::Parse { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display_includes_offset_and_reason() {
        let err = TreeError::parse(7, ParseErrorKind::UnexpectedEnd);
        assert_eq!(
            err.to_string(),
            "parse error at byte 7: unexpected end of input"
        );
        assert_eq!(err.offset(), Some(7));
    }

    #[test]
    fn non_parse_errors_have_no_offset() {
        assert_eq!(TreeError::AllocationFailure.offset(), None);
        assert_eq!(TreeError::BufferTooSmall { capacity: 8 }.offset(), None);
    }
}
