//! Compiler settings and the data-driven rule tables.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::err::{CompileError, Result};

/// Header placed at the top of every emitted document.
pub const DEFAULT_BOILERPLATE: &str = "\
## @file
#
#  CFGDATA option file.
#
#  SPDX-License-Identifier: BSD-2-Clause-Patent
#
##";

/// One literal rewrite of the static substitution table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub from: String,
    pub to: String,
    /// Only replace occurrences not surrounded by identifier characters.
    #[serde(default)]
    pub whole_word: bool,
}

impl Substitution {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Substitution {
            from: from.into(),
            to: to.into(),
            whole_word: false,
        }
    }

    pub fn whole_word(mut self) -> Self {
        self.whole_word = true;
        self
    }

    fn apply(&self, text: &str) -> String {
        if self.from.is_empty() {
            return text.to_owned();
        }
        if !self.whole_word {
            return text.replace(&self.from, &self.to);
        }

        let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(pos) = rest.find(&self.from) {
            let end = pos + self.from.len();
            let before = rest[..pos].chars().next_back();
            let after = rest[end..].chars().next();
            out.push_str(&rest[..pos]);
            if before.is_some_and(is_ident) || after.is_some_and(is_ident) {
                out.push_str(&self.from);
            } else {
                out.push_str(&self.to);
            }
            rest = &rest[end..];
        }
        out.push_str(rest);
        out
    }
}

/// A template family whose instantiations carry the tag of the enclosing structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRule {
    /// Structure names starting with this prefix are header structures.
    pub struct_prefix: String,
    /// Template instantiated through `SUBT` for the header.
    pub template: String,
    /// Argument replaced with the enclosing `EMBED` tag.
    pub sentinel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text")]
pub enum NamePattern {
    Exact(String),
    Prefix(String),
}

impl NamePattern {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Exact(n) => name == n,
            NamePattern::Prefix(p) => name.starts_with(p.as_str()),
        }
    }
}

impl std::fmt::Display for NamePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamePattern::Exact(n) => write!(f, "{n}"),
            NamePattern::Prefix(p) => write!(f, "{p}*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum FixupAction {
    /// Adds `delta` bytes to the rendered length.
    AdjustLength { delta: i64 },
}

/// A per-field correction applied while rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixupRule {
    pub pattern: NamePattern,
    #[serde(flatten)]
    pub action: FixupAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Write one satellite document per `!include` target.
    pub emit_all: bool,
    pub substitutions: Vec<Substitution>,
    pub header_rules: Vec<HeaderRule>,
    pub fixups: Vec<FixupRule>,
    /// Name prefix of synthesized padding fields.
    pub padding_prefix: String,
    /// Name of the marker holding a bit-field container's own attributes.
    pub bit_group_tag: String,
    pub boilerplate: String,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        CompilerSettings {
            emit_all: false,
            substitutions: vec![
                Substitution::new("gCfgData.", ""),
                Substitution::new("TRUE", "1").whole_word(),
                Substitution::new("FALSE", "0").whole_word(),
            ],
            header_rules: vec![HeaderRule {
                struct_prefix: "CFGHDR".to_owned(),
                template: "CFGHDR_TMPL".to_owned(),
                sentinel: "TAG".to_owned(),
            }],
            fixups: Vec::new(),
            padding_prefix: "UnusedUpdSpace".to_owned(),
            bit_group_tag: "$STRUCT".to_owned(),
            boilerplate: DEFAULT_BOILERPLATE.to_owned(),
        }
    }
}

impl CompilerSettings {
    pub fn new() -> Self {
        CompilerSettings::default()
    }

    /// Reads rule tables from a JSON document, absent keys keep their defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| CompileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn emit_all(mut self, emit_all: bool) -> Self {
        self.emit_all = emit_all;
        self
    }

    pub fn substitutions(mut self, substitutions: Vec<Substitution>) -> Self {
        self.substitutions = substitutions;
        self
    }

    pub fn header_rules(mut self, header_rules: Vec<HeaderRule>) -> Self {
        self.header_rules = header_rules;
        self
    }

    pub fn fixups(mut self, fixups: Vec<FixupRule>) -> Self {
        self.fixups = fixups;
        self
    }

    pub fn padding_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.padding_prefix = prefix.into();
        self
    }

    pub fn boilerplate(mut self, boilerplate: impl Into<String>) -> Self {
        self.boilerplate = boilerplate.into();
        self
    }

    /// Runs `text` through the substitution table, in table order.
    pub fn substitute(&self, text: &str) -> String {
        self.substitutions
            .iter()
            .fold(text.to_owned(), |acc, sub| sub.apply(&acc))
    }

    pub fn header_rule_for_template(&self, template: &str) -> Option<&HeaderRule> {
        self.header_rules.iter().find(|r| r.template == template)
    }

    pub fn header_rule_for_struct(&self, name: &str) -> Option<&HeaderRule> {
        self.header_rules
            .iter()
            .find(|r| name.starts_with(r.struct_prefix.as_str()))
    }
}
