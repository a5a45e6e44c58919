use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

/// Errors raised while compiling a description source into schema documents.
///
/// Every variant that originates from a specific source line carries its 1-based line number.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("line {line}: malformed `{key}` pragma block: {message}")]
    MalformedPragma {
        line: usize,
        key: String,
        message: String,
    },

    #[error("line {line}: malformed field declaration: {message}")]
    MalformedField { line: usize, message: String },

    #[error(
        "line {line}: field `{name}` declares offset 0x{offset:X}, which is behind the current offset 0x{cursor:X}"
    )]
    OffsetRegression {
        line: usize,
        name: String,
        offset: u64,
        cursor: u64,
    },

    #[error("line {line}: template `{name}` is never closed with `DEFT:{{{name}:END}}`")]
    UnterminatedTemplate { line: usize, name: String },

    #[error("line {line}: template `{name}` opened while template `{open}` is still open")]
    TemplateReopened {
        line: usize,
        name: String,
        open: String,
    },

    #[error("line {line}: `DEFT:{{{name}:END}}` does not close an open template")]
    UnmatchedTemplateEnd { line: usize, name: String },

    #[error("line {line}: reference to undefined template `{name}`")]
    UnknownTemplateReference { line: usize, name: String },

    #[error("line {line}: template `{name}` expands into itself")]
    RecursiveTemplate { line: usize, name: String },

    #[error("line {line}: length `{length}` of field `{name}` does not resolve to a number")]
    UnresolvedLength {
        line: usize,
        name: String,
        length: String,
    },

    #[error("line {line}: bit-field declaration `{text}` is missing its `:` length separator")]
    BitFieldSyntax { line: usize, text: String },

    #[error(
        "line {line}: bit-field `{name}` ends at bit {end}, beyond the {bits} bits of its container"
    )]
    BitFieldOverflow {
        line: usize,
        name: String,
        end: u32,
        bits: u64,
    },

    #[error("line {line}: `!>` without a matching `!< include`")]
    UnbalancedInclude { line: usize },

    #[error("line {line}: structure close `{name}` without a matching open")]
    UnbalancedStruct { line: usize, name: String },

    #[error("unsupported source `{}`: {reason}", path.display())]
    UnsupportedSourceFormat { path: PathBuf, reason: String },

    #[error("failed to read rule table: {source}")]
    InvalidRules {
        #[from]
        source: serde_json::Error,
    },

    #[error("an I/O error has occurred on `{}`: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl CompileError {
    /// Source line the error points at, when it has one.
    pub fn line(&self) -> Option<usize> {
        match self {
            CompileError::MalformedPragma { line, .. }
            | CompileError::MalformedField { line, .. }
            | CompileError::OffsetRegression { line, .. }
            | CompileError::UnterminatedTemplate { line, .. }
            | CompileError::TemplateReopened { line, .. }
            | CompileError::UnmatchedTemplateEnd { line, .. }
            | CompileError::UnknownTemplateReference { line, .. }
            | CompileError::RecursiveTemplate { line, .. }
            | CompileError::UnresolvedLength { line, .. }
            | CompileError::BitFieldSyntax { line, .. }
            | CompileError::BitFieldOverflow { line, .. }
            | CompileError::UnbalancedInclude { line }
            | CompileError::UnbalancedStruct { line, .. } => Some(*line),
            CompileError::UnsupportedSourceFormat { .. }
            | CompileError::InvalidRules { .. }
            | CompileError::Io { .. } => None,
        }
    }
}

/// Errors of the bit-window and alignment helpers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BitError {
    #[error("bit window {start}+{length} exceeds the {bits} bits of the buffer")]
    OutOfBounds { start: usize, length: usize, bits: usize },

    #[error("bit window of {length} bits is wider than 64 bits")]
    TooWide { length: usize },

    #[error("alignment {alignment} is not a power of two")]
    AlignmentNotPowerOfTwo { alignment: u64 },

    #[error("aligning {value} to {alignment} overflows")]
    Overflow { value: u64, alignment: u64 },
}

/// Errors of the binary header layouts.
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("invalid {what} tag, expected one of {expected:?}, found `{found:02X?}`")]
    InvalidTag {
        what: &'static str,
        expected: &'static [[u8; 4]],
        found: [u8; 4],
    },

    #[error("unknown {what} code {value}")]
    UnknownCode { what: &'static str, value: u8 },

    #[error("buffer too small for {what} at offset {offset} (need {need} bytes, have {have})")]
    Truncated {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("{what} payload of {len} bytes does not fit a {bits}-bit size field")]
    PayloadTooLarge {
        what: &'static str,
        len: usize,
        bits: u32,
    },

    #[error("an I/O error has occurred at offset {offset}: {source}")]
    Io { offset: u64, source: io::Error },
}
