//! Line classification.
//!
//! Every [`SourceLine`] maps to exactly one [`LineEvent`]. Classification is a pure function of
//! the line text; state such as pending pragma keys lives in the descriptor builder.

use log::trace;

use crate::descriptor::{FieldLength, Offset};
use crate::err::{CompileError, Result};
use crate::source::{SourceLine, section_name};

/// Parses a hex (`0x` prefixed) or decimal number.
pub(crate) fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse::<u64>().ok()
    }
}

/// A `Name | Offset | Length | Value` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub offset: Offset,
    pub length: FieldLength,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeDirective {
    /// `# !< include path`
    Open(String),
    /// `# !>`
    Close,
}

/// One `KEY:{value}` block of a pragma line. Keys are upper-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PragmaBlock {
    pub key: String,
    pub value: String,
}

/// The blocks of a pragma line, plus the blocks that failed to parse.
#[derive(Debug, Default)]
pub struct PragmaLine {
    pub blocks: Vec<PragmaBlock>,
    pub malformed: Vec<CompileError>,
}

#[derive(Debug)]
pub enum LineEvent {
    Section(String),
    FieldDecl(FieldDecl),
    Include(IncludeDirective),
    Bsf(PragmaLine),
    Hdr(PragmaLine),
    Unrecognized,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '(' | ')')
}

fn classify_field(line: &SourceLine, text: &str) -> Result<LineEvent> {
    let malformed = |message: String| CompileError::MalformedField {
        line: line.number,
        message,
    };

    let parts: Vec<&str> = text.splitn(4, '|').map(str::trim).collect();
    let [name, offset, length, value] = parts.as_slice() else {
        return Err(malformed(format!(
            "expected `Name | Offset | Length | Value`, found {} column(s)",
            parts.len()
        )));
    };

    // Drop the token-space prefix, `gCfgData.Name` declares `Name`.
    let name = name.split_once('.').map_or(*name, |(_, n)| n);
    if name.is_empty() || !name.chars().all(is_name_char) {
        return Err(malformed(format!("invalid field name `{name}`")));
    }

    let offset = if *offset == "*" {
        Offset::Auto
    } else {
        Offset::At(
            parse_number(offset)
                .ok_or_else(|| malformed(format!("invalid offset `{offset}` for `{name}`")))?,
        )
    };

    if length.is_empty() {
        return Err(malformed(format!("missing length for `{name}`")));
    }
    if value.is_empty() {
        return Err(malformed(format!("missing value for `{name}`")));
    }

    Ok(LineEvent::FieldDecl(FieldDecl {
        name: name.to_owned(),
        offset,
        length: FieldLength::parse(length),
        value: (*value).to_owned(),
    }))
}

/// Splits `KEY:{...} KEY:{...}` into blocks. Braces nest, and braces inside double quotes are
/// not counted. A block that fails to parse is recorded and scanning resumes at the next block.
pub(crate) fn parse_pragma_blocks(line: usize, text: &str) -> PragmaLine {
    let mut out = PragmaLine::default();
    let chars: Vec<char> = text.chars().collect();
    let mut pos = 0;

    while pos < chars.len() {
        if chars[pos].is_whitespace() {
            pos += 1;
            continue;
        }

        let key_start = pos;
        while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_') {
            pos += 1;
        }
        let key: String = chars[key_start..pos].iter().collect::<String>().to_uppercase();

        if key.is_empty() || chars.get(pos) != Some(&':') || chars.get(pos + 1) != Some(&'{') {
            // Skip the unparseable token.
            while pos < chars.len() && !chars[pos].is_whitespace() {
                pos += 1;
            }
            let token: String = chars[key_start..pos].iter().collect();
            out.malformed.push(CompileError::MalformedPragma {
                line,
                key: if key.is_empty() { token.clone() } else { key },
                message: format!("expected `KEY:{{...}}`, found `{token}`"),
            });
            continue;
        }

        pos += 2;
        let value_start = pos;
        let mut depth = 1;
        let mut in_quotes = false;
        while pos < chars.len() {
            match chars[pos] {
                '"' => in_quotes = !in_quotes,
                '{' if !in_quotes => depth += 1,
                '}' if !in_quotes => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            pos += 1;
        }

        if depth != 0 {
            out.malformed.push(CompileError::MalformedPragma {
                line,
                key,
                message: "unterminated `{` block".to_owned(),
            });
            break;
        }

        let value: String = chars[value_start..pos].iter().collect();
        out.blocks.push(PragmaBlock {
            key,
            value: value.trim().to_owned(),
        });
        pos += 1;
    }

    out
}

/// Classifies one source line.
///
/// Field declarations with the wrong shape fail; pragma blocks with the wrong shape are kept in
/// [`PragmaLine::malformed`] so the caller can recover.
pub fn classify(line: &SourceLine) -> Result<LineEvent> {
    let text = line.text.trim();

    let event = if text.is_empty() {
        LineEvent::Unrecognized
    } else if let Some(name) = section_name(text) {
        LineEvent::Section(name.trim().to_owned())
    } else if let Some(comment) = text.strip_prefix('#') {
        let comment = comment.trim_start();
        if let Some(rest) = comment.strip_prefix("!BSF") {
            LineEvent::Bsf(parse_pragma_blocks(line.number, rest))
        } else if let Some(rest) = comment.strip_prefix("!HDR") {
            LineEvent::Hdr(parse_pragma_blocks(line.number, rest))
        } else if let Some(rest) = comment.strip_prefix("!<") {
            let rest = rest.trim_start();
            match rest.strip_prefix("include") {
                Some(path) if !path.trim().is_empty() => LineEvent::Include(
                    IncludeDirective::Open(path.trim().trim_matches('"').to_owned()),
                ),
                _ => {
                    return Err(CompileError::MalformedPragma {
                        line: line.number,
                        key: "include".to_owned(),
                        message: format!("expected `!< include <path>`, found `{text}`"),
                    });
                }
            }
        } else if comment.starts_with("!>") {
            LineEvent::Include(IncludeDirective::Close)
        } else {
            LineEvent::Unrecognized
        }
    } else if text.contains('|') {
        classify_field(line, text)?
    } else {
        LineEvent::Unrecognized
    };

    trace!("line {}: {:?}", line.number, event);
    Ok(event)
}
