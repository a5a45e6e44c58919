//! Loading of description sources and splitting them into regions.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;

use crate::err::{CompileError, Result};

/// One line of the loaded document together with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub number: usize,
    pub text: String,
}

impl SourceLine {
    pub fn new(number: usize, text: impl Into<String>) -> Self {
        SourceLine {
            number,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// `[Defines]`, the macro table.
    Defines,
    /// `[PcdsDynamicVpd.Tmp]`, template definitions.
    Template,
    /// `[PcdsDynamicVpd.Upd]`, the configuration layout.
    Config,
    Other,
}

impl RegionKind {
    fn from_section(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "defines" => RegionKind::Defines,
            "pcdsdynamicvpd.tmp" => RegionKind::Template,
            "pcdsdynamicvpd.upd" => RegionKind::Config,
            _ => RegionKind::Other,
        }
    }
}

/// A `NAME = VALUE` binding harvested from the `[Defines]` region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableBinding {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub lines: Vec<SourceLine>,
}

/// Returns the section name if `text` is a `[Section]` header.
pub(crate) fn section_name(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
}

impl SourceDocument {
    /// Reads a `.dsc` description source from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let is_dsc = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("dsc"));
        if !is_dsc {
            return Err(CompileError::UnsupportedSourceFormat {
                path: path.to_path_buf(),
                reason: "expected a `.dsc` description file".to_owned(),
            });
        }

        let text = fs::read_to_string(path).map_err(|source| CompileError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_text(path, &text)
    }

    /// Splits an in-memory document, `path` is only used for naming and error reporting.
    pub fn from_text(path: impl AsRef<Path>, text: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let lines: Vec<SourceLine> = text
            .lines()
            .enumerate()
            .map(|(i, line)| SourceLine::new(i + 1, line.trim_end()))
            .collect();

        if !lines.iter().any(|l| section_name(&l.text).is_some()) {
            return Err(CompileError::UnsupportedSourceFormat {
                path,
                reason: "no `[Section]` header found".to_owned(),
            });
        }

        Ok(SourceDocument { path, lines })
    }

    /// Lines belonging to all sections of `kind`, in document order, section headers excluded.
    pub fn region(&self, kind: RegionKind) -> Vec<SourceLine> {
        let mut current = RegionKind::Other;
        let mut out = Vec::new();

        for line in &self.lines {
            if let Some(name) = section_name(&line.text) {
                current = RegionKind::from_section(name);
                debug!("line {}: entering section `{}`", line.number, name);
                continue;
            }
            if current == kind {
                out.push(line.clone());
            }
        }

        out
    }

    /// Macro bindings of the `[Defines]` region, in declaration order. Later definitions of the
    /// same name replace the earlier value in place.
    pub fn variables(&self) -> Vec<VariableBinding> {
        let mut out: Vec<VariableBinding> = Vec::new();

        for line in self.region(RegionKind::Defines) {
            let text = line.text.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }

            let text = text.strip_prefix("DEFINE ").unwrap_or(text);
            let Some((name, value)) = text.split_once('=') else {
                continue;
            };

            let binding = VariableBinding {
                name: name.trim().to_owned(),
                value: value.trim().to_owned(),
            };
            match out.iter_mut().find(|b| b.name == binding.name) {
                Some(existing) => existing.value = binding.value,
                None => out.push(binding),
            }
        }

        out
    }
}
