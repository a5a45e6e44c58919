//! Rendering of the tracked schema into output documents.
//!
//! The top-level document has three sections, `variable:`, `template:` and `configs:`. With
//! `emit_all` every `!include` target becomes a satellite document referenced from the place it
//! was included; otherwise included content is rendered inline.

use std::path::Path;

use hashbrown::HashMap;
use log::{debug, warn};
use serde::Serialize;

use crate::descriptor::{Entry, FieldDescriptor, FieldLength, Role};
use crate::err::{CompileError, Result};
use crate::settings::{CompilerSettings, FixupAction};
use crate::source::VariableBinding;
use crate::template::{TOP_LEVEL, TemplateDefinition, TemplateTable};

const KEY_WIDTH: usize = 12;
const VARIABLE_WIDTH: usize = 30;

/// One physical output artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputDocument {
    pub file: String,
    pub lines: Vec<String>,
}

impl OutputDocument {
    fn new(file: impl Into<String>) -> Self {
        OutputDocument {
            file: file.into(),
            lines: Vec::new(),
        }
    }

    pub fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

/// Output file name of an include target: its stem with a `.yaml` extension. Directory parts are
/// dropped so satellites always land next to the top-level document.
pub fn satellite_name(include: &str) -> String {
    let stem = Path::new(include)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty() && *s != "..")
        .unwrap_or("include");
    format!("{stem}.yaml")
}

/// Appends a `:WORD`/`:DWORD`/`:QWORD` unit to a `{a, b, c}` list whose element count differs
/// from its byte length.
pub fn annotate_list(value: &str, length: u64) -> String {
    let trimmed = value.trim();
    let Some(inner) = trimmed
        .strip_prefix('{')
        .and_then(|v| v.strip_suffix('}'))
    else {
        return value.to_owned();
    };
    if inner.contains(['"', '\'', ':']) {
        return value.to_owned();
    }

    let count = inner.split(',').filter(|e| !e.trim().is_empty()).count() as u64;
    if count == 0 || count == length {
        return value.to_owned();
    }

    let unit = if length % count == 0 {
        match length / count {
            2 => Some("WORD"),
            4 => Some("DWORD"),
            8 => Some("QWORD"),
            _ => None,
        }
    } else {
        None
    };

    match unit {
        Some(unit) => format!("{trimmed}:{unit}"),
        None => {
            warn!("cannot infer the element width of `{trimmed}` for {length} byte(s)");
            value.to_owned()
        }
    }
}

#[derive(Clone, Copy)]
struct Frame {
    doc: usize,
    indent: usize,
    depth: usize,
}

impl Frame {
    fn indent(&self) -> usize {
        self.indent + 2 * self.depth
    }
}

pub struct Emitter<'a> {
    settings: &'a CompilerSettings,
    templates: &'a TemplateTable,
    documents: Vec<OutputDocument>,
    index: HashMap<String, usize>,
    fixups_used: Vec<bool>,
}

impl<'a> Emitter<'a> {
    /// `top_file` names the top-level document, which is always the first one emitted.
    pub fn new(
        settings: &'a CompilerSettings,
        templates: &'a TemplateTable,
        top_file: impl Into<String>,
    ) -> Self {
        let mut emitter = Emitter {
            settings,
            templates,
            documents: Vec::new(),
            index: HashMap::new(),
            fixups_used: vec![false; settings.fixups.len()],
        };
        emitter.document(&top_file.into());
        emitter
    }

    fn document(&mut self, file: &str) -> usize {
        if let Some(&doc) = self.index.get(file) {
            return doc;
        }
        let doc = self.documents.len();
        let mut document = OutputDocument::new(file);
        if doc > 0 {
            document.lines.extend(self.boilerplate());
        }
        self.documents.push(document);
        self.index.insert(file.to_owned(), doc);
        doc
    }

    fn boilerplate(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.settings.boilerplate.lines().map(String::from).collect();
        lines.push(String::new());
        lines
    }

    fn push(&mut self, doc: usize, indent: usize, line: impl AsRef<str>) {
        self.documents[doc]
            .lines
            .push(format!("{:indent$}{}", "", line.as_ref()));
    }

    /// Renders the whole schema.
    pub fn emit(
        mut self,
        variables: &[VariableBinding],
        bodies: &[(&TemplateDefinition, Vec<Entry>)],
        configs: &[Entry],
    ) -> Result<Vec<OutputDocument>> {
        let top = 0;
        let boilerplate = self.boilerplate();
        self.documents[top].lines.extend(boilerplate);

        self.push(top, 0, "variable:");
        for var in variables {
            let value = self.settings.substitute(&var.value);
            self.push(
                top,
                2,
                format!("{:<VARIABLE_WIDTH$} : {}", var.name, value),
            );
        }
        self.push(top, 0, "");

        self.push(top, 0, "template:");
        let mut referenced: Vec<usize> = Vec::new();
        for (definition, entries) in bodies {
            let (doc, indent) = if self.settings.emit_all && definition.file != TOP_LEVEL {
                let doc = self.document(&satellite_name(&definition.file));
                if !referenced.contains(&doc) {
                    referenced.push(doc);
                    let include = format!("!include {}", self.documents[doc].file);
                    self.push(top, 2, include);
                }
                (doc, 0)
            } else {
                (top, 2)
            };

            debug!("rendering template `{}`", definition.name);
            self.push(doc, indent, format!("{}: >", definition.name));
            self.render(entries, doc, indent + 2)?;
            self.push(doc, 0, "");
        }
        self.push(top, 0, "");

        self.push(top, 0, "configs:");
        self.render(configs, top, 2)?;

        for (used, rule) in self.fixups_used.iter().zip(&self.settings.fixups) {
            if !used {
                warn!("fixup rule for `{}` matched no field", rule.pattern);
            }
        }

        Ok(self.documents)
    }

    /// Renders a descriptor stream starting at `indent` in document `doc`.
    pub fn render(&mut self, entries: &[Entry], doc: usize, indent: usize) -> Result<()> {
        let mut frames = vec![Frame {
            doc,
            indent,
            depth: 0,
        }];
        let mut includes: Vec<bool> = Vec::new();

        for entry in entries {
            let Some(frame) = frames.last().copied() else {
                break;
            };
            match entry {
                Entry::IncludeOpen(path) if self.settings.emit_all => {
                    let satellite = self.document(&satellite_name(path));
                    let include = format!("- !include {}", self.documents[satellite].file);
                    self.push(frame.doc, frame.indent(), include);
                    frames.push(Frame {
                        doc: satellite,
                        indent: 0,
                        depth: 0,
                    });
                    includes.push(true);
                }
                Entry::IncludeOpen(_) => includes.push(false),
                Entry::IncludeClose => {
                    if includes.pop() == Some(true) && frames.len() > 1 {
                        frames.pop();
                    }
                }
                Entry::Field(field) => {
                    self.field(field, frame)?;
                    if let Some(current) = frames.last_mut() {
                        match field.role {
                            Role::StructOpen => current.depth += 1,
                            Role::StructClose => {
                                current.depth = current.depth.saturating_sub(1)
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn field(&mut self, field: &FieldDescriptor, frame: Frame) -> Result<()> {
        let indent = frame.indent();

        if let Some(call) = &field.expand {
            if self.templates.get(&call.template).is_none() {
                return Err(CompileError::UnknownTemplateReference {
                    line: field.line,
                    name: call.template.clone(),
                });
            }
            self.push(frame.doc, indent, format!("- !expand {{ {call} }}"));
            return Ok(());
        }

        if field.role == Role::StructClose {
            return Ok(());
        }

        self.push(frame.doc, indent, format!("- {} :", field.cname));
        let key_indent = indent + 4;

        for (key, value) in field.meta.entries() {
            let value = match key {
                "option" | "condition" => self.settings.substitute(value),
                _ => value.to_owned(),
            };
            self.key(frame.doc, key_indent, key, &value);
        }

        let length = match field.role {
            Role::Plain | Role::Padding | Role::BitField => self.length(field),
            Role::StructOpen | Role::StructClose | Role::Action => None,
        };
        if let Some((rendered, bytes)) = &length {
            self.key(frame.doc, key_indent, "length", rendered);
            if let Some(value) = &field.value {
                let value = match bytes {
                    Some(bytes) => annotate_list(value, *bytes),
                    None => value.clone(),
                };
                self.key(frame.doc, key_indent, "value", &value);
            }
        } else if let Some(value) = &field.value {
            self.key(frame.doc, key_indent, "value", value);
        }

        Ok(())
    }

    /// The rendered length and, for byte fields, the corrected byte count.
    fn length(&mut self, field: &FieldDescriptor) -> Option<(String, Option<u64>)> {
        match (&field.length, field.role) {
            (FieldLength::Fixed(bits), Role::BitField) => Some((format!("{bits}b"), None)),
            (FieldLength::Fixed(bytes), _) => {
                let bytes = self.fixup(&field.cname, field.role, *bytes);
                Some((format!("0x{bytes:02X}"), Some(bytes)))
            }
            (FieldLength::Symbolic(text), _) => Some((text.clone(), None)),
        }
    }

    fn fixup(&mut self, name: &str, role: Role, length: u64) -> u64 {
        if role == Role::Padding {
            return length;
        }
        let mut length = length;
        for (i, rule) in self.settings.fixups.iter().enumerate() {
            if !rule.pattern.matches(name) {
                continue;
            }
            self.fixups_used[i] = true;
            let FixupAction::AdjustLength { delta } = rule.action;
            let adjusted = length.checked_add_signed(delta);
            match adjusted {
                Some(adjusted) => {
                    debug!("fixup `{}`: length 0x{length:X} -> 0x{adjusted:X}", rule.pattern);
                    length = adjusted;
                }
                None => warn!(
                    "fixup `{}` would make the length of `{name}` negative, skipped",
                    rule.pattern
                ),
            }
        }
        length
    }

    fn key(&mut self, doc: usize, indent: usize, key: &str, value: &str) {
        if value.contains('\n') {
            self.push(doc, indent, format!("{key:<KEY_WIDTH$} : >"));
            for line in value.lines() {
                self.push(doc, indent + 2, line);
            }
        } else {
            self.push(doc, indent, format!("{key:<KEY_WIDTH$} : {value}"));
        }
    }
}

/// Renders a descriptor stream on its own, without document framing.
pub fn render_entries(
    settings: &CompilerSettings,
    templates: &TemplateTable,
    entries: &[Entry],
) -> Result<Vec<String>> {
    let mut emitter = Emitter::new(settings, templates, "fragment");
    emitter.render(entries, 0, 0)?;
    Ok(emitter.documents.swap_remove(0).lines)
}
