#![deny(unused_must_use)]
#![forbid(unsafe_code)]
// Don't allow dbg! prints in release.
#![cfg_attr(not(debug_assertions), deny(clippy::dbg_macro))]

#[macro_use]
mod macros;

pub mod bits;
pub mod classify;
pub mod compiler;
pub mod descriptor;
pub mod emit;
pub mod err;
pub mod headers;
pub mod settings;
pub mod source;
pub mod template;
pub mod tracker;

pub use bits::{align_up, padding_needed, read_bits, write_bits};
pub use classify::{LineEvent, classify};
pub use compiler::{CompileOutput, Compiler, CompilerContext, Diagnostic, Schema};
pub use descriptor::{Entry, FieldDescriptor, FieldLength, Metadata, Offset, Role};
pub use emit::OutputDocument;
pub use err::{CompileError, Result};
pub use headers::{
    CompressionAlgorithm, CompressionHeader, HashAlgorithm, KeyType, PublicKeyHeader,
    SignatureHeader, SignatureScheme,
};
pub use settings::{CompilerSettings, FixupAction, FixupRule, HeaderRule, NamePattern, Substitution};
pub use source::{SourceDocument, SourceLine, VariableBinding};
pub use template::{TemplateDefinition, TemplateTable};
