//! Field descriptors and the builder that assembles them from classified lines.

use log::{debug, warn};
use serde::Serialize;

use crate::classify::{IncludeDirective, LineEvent, PragmaBlock, parse_number};
use crate::err::{CompileError, Result};
use crate::settings::CompilerSettings;
use crate::source::SourceLine;

/// Declared byte offset of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Offset {
    /// `*`, placed at the running cursor.
    Auto,
    At(u64),
}

/// Declared length. Bytes for byte fields, bits for bit-field members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FieldLength {
    Fixed(u64),
    /// Not a number yet, e.g. `$(2)` inside a template body.
    Symbolic(String),
}

impl FieldLength {
    pub fn parse(text: &str) -> Self {
        match parse_number(text) {
            Some(n) => FieldLength::Fixed(n),
            None => FieldLength::Symbolic(text.trim().to_owned()),
        }
    }

    pub fn fixed(&self) -> Option<u64> {
        match self {
            FieldLength::Fixed(n) => Some(*n),
            FieldLength::Symbolic(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    Plain,
    /// Member of a packed bit-field group, length in bits.
    BitField,
    StructOpen,
    StructClose,
    /// Synthesized to fill a gap before an explicit offset.
    Padding,
    /// Zero-length page-tree marker emitted by `PAGES`.
    Action,
}

/// UI metadata collected from `!BSF`/`!HDR` pragmas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub page: Option<String>,
    pub option: Option<String>,
    pub condition: Option<String>,
    pub help: Option<String>,
    pub order: Option<String>,
    pub marker: Option<String>,
    #[serde(rename = "struct")]
    pub struct_text: Option<String>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        *self == Metadata::default()
    }

    fn slot(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "NAME" => Some(&mut self.name),
            "TYPE" => Some(&mut self.kind),
            "PAGE" => Some(&mut self.page),
            "OPTION" => Some(&mut self.option),
            "CONDITION" => Some(&mut self.condition),
            "HELP" => Some(&mut self.help),
            "ORDER" => Some(&mut self.order),
            "MARKER" => Some(&mut self.marker),
            "STRUCT" => Some(&mut self.struct_text),
            _ => None,
        }
    }

    /// Rendered `(key, value)` pairs in output order.
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("name", &self.name),
            ("type", &self.kind),
            ("page", &self.page),
            ("option", &self.option),
            ("condition", &self.condition),
            ("help", &self.help),
            ("order", &self.order),
            ("marker", &self.marker),
            ("struct", &self.struct_text),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.as_deref().map(|v| (k, v)))
    }
}

/// A template instantiation, `NAME : [ arg, arg ]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpandCall {
    pub template: String,
    pub args: Vec<String>,
}

impl std::fmt::Display for ExpandCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} : [ {} ]", self.template, self.args.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub cname: String,
    pub role: Role,
    pub declared_offset: Offset,
    /// Resolved byte offset, filled in by the tracker.
    pub offset: Option<u64>,
    pub length: FieldLength,
    pub value: Option<String>,
    pub meta: Metadata,
    pub expand: Option<ExpandCall>,
    /// Tag declared by an `EMBED` block, for structure opens.
    pub tag: Option<u32>,
    /// First bit inside the container, for bit-field members.
    pub bit_offset: Option<u32>,
    pub line: usize,
}

impl FieldDescriptor {
    pub fn new(cname: impl Into<String>, role: Role, line: usize) -> Self {
        FieldDescriptor {
            cname: cname.into(),
            role,
            declared_offset: Offset::Auto,
            offset: None,
            length: FieldLength::Fixed(0),
            value: None,
            meta: Metadata::default(),
            expand: None,
            tag: None,
            bit_offset: None,
            line,
        }
    }

    /// A byte field that moves the cursor on its own.
    pub fn is_plain(&self) -> bool {
        self.role == Role::Plain && self.expand.is_none()
    }
}

/// An element of a descriptor stream: a field, or a switch of the virtual output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Entry {
    Field(FieldDescriptor),
    IncludeOpen(String),
    IncludeClose,
}

impl Entry {
    pub fn field(&self) -> Option<&FieldDescriptor> {
        match self {
            Entry::Field(f) => Some(f),
            _ => None,
        }
    }
}

struct OpenEmbed {
    name: String,
    tag: Option<u32>,
}

/// Turns classified lines into descriptors, holding the pragma keys seen since the last
/// finalized descriptor.
pub struct DescriptorBuilder<'s> {
    settings: &'s CompilerSettings,
    pending: Metadata,
    embeds: Vec<OpenEmbed>,
    diagnostics: Vec<CompileError>,
}

impl<'s> DescriptorBuilder<'s> {
    pub fn new(settings: &'s CompilerSettings) -> Self {
        DescriptorBuilder {
            settings,
            pending: Metadata::default(),
            embeds: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Recovered pragma problems seen so far.
    pub fn take_diagnostics(&mut self) -> Vec<CompileError> {
        std::mem::take(&mut self.diagnostics)
    }

    fn recover(&mut self, err: CompileError) {
        warn!("{err}");
        self.diagnostics.push(err);
    }

    /// Feeds one event, returning the entries it finalized.
    pub fn apply(&mut self, line: &SourceLine, event: LineEvent) -> Result<Vec<Entry>> {
        let mut out = Vec::new();

        match event {
            LineEvent::FieldDecl(decl) => {
                let mut field = FieldDescriptor::new(decl.name, Role::Plain, line.number);
                field.declared_offset = decl.offset;
                field.length = decl.length;
                field.value = Some(decl.value);
                field.meta = std::mem::take(&mut self.pending);
                out.push(Entry::Field(field));
            }
            LineEvent::Include(IncludeDirective::Open(path)) => out.push(Entry::IncludeOpen(path)),
            LineEvent::Include(IncludeDirective::Close) => out.push(Entry::IncludeClose),
            LineEvent::Bsf(pragma) => {
                for err in pragma.malformed {
                    self.recover(err);
                }
                for block in pragma.blocks {
                    if let Some(entry) = self.apply_bsf(line.number, block)? {
                        out.push(entry);
                    }
                }
            }
            LineEvent::Hdr(pragma) => {
                for err in pragma.malformed {
                    self.recover(err);
                }
                for block in pragma.blocks {
                    if let Some(entry) = self.apply_hdr(line.number, block) {
                        out.push(entry);
                    }
                }
            }
            LineEvent::Section(_) | LineEvent::Unrecognized => {}
        }

        Ok(out)
    }

    fn set_meta(&mut self, key: &str, value: String) {
        let Some(slot) = self.pending.slot(key) else {
            return;
        };
        // `+` continues the previous value on a new line.
        let Some(more) = value.strip_prefix('+') else {
            *slot = Some(value);
            return;
        };
        let more = more.trim_start();
        if let Some(existing) = slot.as_mut() {
            existing.push('\n');
            existing.push_str(more);
        } else {
            *slot = Some(more.to_owned());
        }
    }

    fn apply_bsf(&mut self, line: usize, block: PragmaBlock) -> Result<Option<Entry>> {
        match block.key.as_str() {
            "NAME" | "HELP" | "TYPE" | "PAGE" | "OPTION" | "CONDITION" | "ORDER" | "MARKER" => {
                self.set_meta(&block.key, block.value);
                Ok(None)
            }
            "PAGES" => {
                let mut action = FieldDescriptor::new("$ACTION", Role::Action, line);
                action.meta.page = Some(block.value);
                Ok(Some(Entry::Field(action)))
            }
            "FIELD" => {
                let (name, bits) = match block.value.split_once(':') {
                    Some((name, bits)) if !name.trim().is_empty() => (name, bits),
                    _ => {
                        return Err(CompileError::BitFieldSyntax {
                            line,
                            text: block.value,
                        });
                    }
                };
                // Widths may carry a `b` unit suffix, `FIELD:{Flag:1b}`.
                let bits = bits.trim();
                let bits = bits
                    .strip_suffix('b')
                    .filter(|n| parse_number(n).is_some())
                    .unwrap_or(bits);
                let mut field = FieldDescriptor::new(name.trim(), Role::BitField, line);
                field.length = FieldLength::parse(bits);
                field.meta = std::mem::take(&mut self.pending);
                Ok(Some(Entry::Field(field)))
            }
            "SUBT" => {
                // A template instantiation replaces whatever keys were collected for this field.
                self.pending = Metadata::default();
                Ok(self.subtype(line, &block.value).map(Entry::Field))
            }
            "DEFT" => {
                debug!("line {line}: template bound outside of a template region, ignored");
                Ok(None)
            }
            other => {
                debug!("line {line}: ignoring unknown `!BSF` key `{other}`");
                Ok(None)
            }
        }
    }

    fn subtype(&mut self, line: usize, value: &str) -> Option<FieldDescriptor> {
        let mut parts = value.split(':').map(|p| p.trim().to_owned());
        let template = match parts.next() {
            Some(t) if !t.is_empty() => t,
            _ => {
                self.recover(CompileError::MalformedPragma {
                    line,
                    key: "SUBT".to_owned(),
                    message: "missing template name".to_owned(),
                });
                return None;
            }
        };

        let mut args: Vec<String> = parts
            .map(|arg| match arg.strip_prefix("TAG_") {
                Some(hex) if u32::from_str_radix(hex, 16).is_ok() => format!("0x{hex}"),
                _ => arg,
            })
            .collect();

        if let Some(rule) = self.settings.header_rule_for_template(&template) {
            let tag = self.embeds.last().and_then(|e| e.tag);
            let has_sentinel = args.iter().any(|a| a == &rule.sentinel);
            // The tag is the second argument, after the structure name.
            let has_explicit_tag = args
                .get(1)
                .is_some_and(|a| a.starts_with("0x") || a.starts_with("0X"));
            match tag {
                Some(tag) if has_sentinel => {
                    for arg in args.iter_mut().filter(|a| **a == rule.sentinel) {
                        *arg = format!("0x{tag:03X}");
                    }
                }
                Some(tag) if !has_explicit_tag => {
                    let at = args.len().min(1);
                    args.insert(at, format!("0x{tag:03X}"));
                }
                Some(_) => {}
                None if has_sentinel || !has_explicit_tag => {
                    self.recover(CompileError::MalformedPragma {
                        line,
                        key: "SUBT".to_owned(),
                        message: format!(
                            "header template `{template}` used outside of a tagged `EMBED` block"
                        ),
                    });
                }
                None => {}
            }
        }

        let mut field = FieldDescriptor::new(template.clone(), Role::Plain, line);
        field.length = FieldLength::Symbolic(String::new());
        field.expand = Some(ExpandCall { template, args });
        Some(field)
    }

    fn apply_hdr(&mut self, line: usize, block: PragmaBlock) -> Option<Entry> {
        match block.key.as_str() {
            "EMBED" => self.embed(line, &block.value).map(Entry::Field),
            "STRUCT" => {
                self.set_meta("STRUCT", block.value);
                None
            }
            other => {
                debug!("line {line}: ignoring unknown `!HDR` key `{other}`");
                None
            }
        }
    }

    fn embed(&mut self, line: usize, value: &str) -> Option<FieldDescriptor> {
        let parts: Vec<&str> = value.split(':').map(str::trim).collect();
        let malformed = |message: String| CompileError::MalformedPragma {
            line,
            key: "EMBED".to_owned(),
            message,
        };

        let (name, tag, bound) = match parts.as_slice() {
            [name, bound] => (*name, None, *bound),
            [name, tag, bound] => {
                let parsed = tag
                    .strip_prefix("TAG_")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok());
                if parsed.is_none() {
                    self.recover(malformed(format!("invalid tag `{tag}`")));
                    return None;
                }
                (*name, parsed, *bound)
            }
            _ => {
                self.recover(malformed(format!(
                    "expected `NAME[:TAG_xxx]:START|END`, found `{value}`"
                )));
                return None;
            }
        };

        if name.is_empty() {
            self.recover(malformed("missing structure name".to_owned()));
            return None;
        }

        match bound.to_ascii_uppercase().as_str() {
            "START" => {
                let mut field = FieldDescriptor::new(name, Role::StructOpen, line);
                field.tag = tag;
                field.meta = std::mem::take(&mut self.pending);
                self.embeds.push(OpenEmbed {
                    name: name.to_owned(),
                    tag,
                });
                debug!("line {line}: open structure `{name}` (tag {tag:?})");
                Some(field)
            }
            "END" => {
                if let Some(pos) = self.embeds.iter().rposition(|e| e.name == name) {
                    self.embeds.truncate(pos);
                }
                debug!("line {line}: close structure `{name}`");
                Some(FieldDescriptor::new(name, Role::StructClose, line))
            }
            other => {
                self.recover(malformed(format!("expected START or END, found `{other}`")));
                None
            }
        }
    }
}

/// Classifies and builds a whole run of lines.
pub fn build_entries(
    settings: &CompilerSettings,
    lines: &[SourceLine],
    diagnostics: &mut Vec<CompileError>,
) -> Result<Vec<Entry>> {
    let mut builder = DescriptorBuilder::new(settings);
    let mut out = Vec::new();

    for line in lines {
        let event = crate::classify::classify(line)?;
        out.extend(builder.apply(line, event)?);
    }

    diagnostics.extend(builder.take_diagnostics());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn build(text: &str) -> (Vec<Entry>, Vec<CompileError>) {
        let settings = CompilerSettings::default();
        let lines: Vec<SourceLine> = text
            .lines()
            .enumerate()
            .map(|(i, l)| SourceLine::new(i + 1, l))
            .collect();
        let mut diagnostics = Vec::new();
        let entries = build_entries(&settings, &lines, &mut diagnostics).unwrap();
        (entries, diagnostics)
    }

    fn fields(entries: &[Entry]) -> Vec<&FieldDescriptor> {
        entries.iter().filter_map(Entry::field).collect()
    }

    #[test]
    fn test_pending_keys_attach_to_next_field() {
        let (entries, diagnostics) = build(
            "# !BSF NAME:{Speed} TYPE:{Combo}\n\
             # !BSF HELP:{First line}\n\
             # !BSF HELP:{+second line}\n\
             gCfgData.MemSpeed | * | 2 | 0x640\n\
             gCfgData.Other | * | 1 | 0",
        );
        assert!(diagnostics.is_empty());

        let fields = fields(&entries);
        assert_eq!(fields[0].cname, "MemSpeed");
        assert_eq!(fields[0].meta.name.as_deref(), Some("Speed"));
        assert_eq!(fields[0].meta.kind.as_deref(), Some("Combo"));
        assert_eq!(
            fields[0].meta.help.as_deref(),
            Some("First line\nsecond line")
        );
        assert!(fields[1].meta.is_empty());
    }

    #[test]
    fn test_bit_field_pragma_finalizes_immediately() {
        let (entries, _) = build("# !BSF NAME:{Sub}\n# !BSF FIELD:{SubFlag:4}");
        let fields = fields(&entries);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].role, Role::BitField);
        assert_eq!(fields[0].cname, "SubFlag");
        assert_eq!(fields[0].length, FieldLength::Fixed(4));
        assert_eq!(fields[0].meta.name.as_deref(), Some("Sub"));
    }

    #[test]
    fn test_bit_field_width_accepts_unit_suffix() {
        let (entries, _) = build("# !BSF FIELD:{EccEnable:1b}\n# !BSF FIELD:{Mask:0xB}");
        let fields = fields(&entries);
        assert_eq!(fields[0].length, FieldLength::Fixed(1));
        assert_eq!(fields[1].length, FieldLength::Fixed(0xB));
    }

    #[test]
    fn test_bit_field_without_separator_is_fatal() {
        let settings = CompilerSettings::default();
        let lines = vec![SourceLine::new(3, "# !BSF FIELD:{SubFlag}")];
        let err = build_entries(&settings, &lines, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, CompileError::BitFieldSyntax { line: 3, .. }));
    }

    #[test]
    fn test_bit_field_without_name_is_fatal() {
        let settings = CompilerSettings::default();
        let lines = vec![SourceLine::new(4, "# !BSF FIELD:{:4}")];
        let err = build_entries(&settings, &lines, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, CompileError::BitFieldSyntax { line: 4, .. }));
    }

    #[test]
    fn test_subtype_rewrites_header_tag() {
        let (entries, diagnostics) = build(
            "# !BSF NAME:{dropped}\n\
             # !HDR EMBED:{MEMORY_CFG_DATA:TAG_200:START}\n\
             # !BSF SUBT:{CFGHDR_TMPL:MEMORY_CFG_DATA:TAG:0}\n\
             # !HDR EMBED:{MEMORY_CFG_DATA:TAG_200:END}",
        );
        assert!(diagnostics.is_empty());

        let fields = fields(&entries);
        assert_eq!(fields[0].role, Role::StructOpen);
        assert_eq!(fields[0].tag, Some(0x200));
        assert_eq!(
            fields[1].expand.as_ref().map(ToString::to_string).as_deref(),
            Some("CFGHDR_TMPL : [ MEMORY_CFG_DATA, 0x200, 0 ]")
        );
        assert!(fields[1].meta.is_empty());
        assert_eq!(fields[2].role, Role::StructClose);
    }

    #[test]
    fn test_subtype_inserts_missing_header_tag() {
        let (entries, _) = build(
            "# !HDR EMBED:{GPIO_CFG_DATA:TAG_400:START}\n\
             # !BSF SUBT:{CFGHDR_TMPL:GPIO_CFG_DATA:0:0}",
        );
        let expand = fields(&entries)[1].expand.clone().unwrap();
        assert_eq!(expand.args, vec!["GPIO_CFG_DATA", "0x400", "0", "0"]);
    }

    #[test]
    fn test_hex_arguments_after_the_tag_slot_do_not_count_as_tag() {
        let (entries, diagnostics) = build(
            "# !HDR EMBED:{GPIO_CFG_DATA:TAG_400:START}\n\
             # !BSF SUBT:{CFGHDR_TMPL:GPIO_CFG_DATA:0:0x0}",
        );
        assert!(diagnostics.is_empty());
        let expand = fields(&entries)[1].expand.clone().unwrap();
        assert_eq!(expand.args, vec!["GPIO_CFG_DATA", "0x400", "0", "0x0"]);

        let (entries, _) = build(
            "# !HDR EMBED:{GPIO_CFG_DATA:TAG_400:START}\n\
             # !BSF SUBT:{CFGHDR_TMPL:GPIO_CFG_DATA:0x401:0}",
        );
        let expand = fields(&entries)[1].expand.clone().unwrap();
        assert_eq!(expand.args, vec!["GPIO_CFG_DATA", "0x401", "0"]);
    }

    #[test]
    fn test_unknown_keys_are_ignored_and_malformed_blocks_recovered() {
        let (entries, diagnostics) = build(
            "# !BSF FUTURE:{x} NAME:{Kept}\n\
             # !HDR EMBED:{ONLYNAME}\n\
             Field | * | 1 | 0",
        );
        let fields = fields(&entries);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].meta.name.as_deref(), Some("Kept"));
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(
            diagnostics[0],
            CompileError::MalformedPragma { line: 2, .. }
        ));
    }

    #[test]
    fn test_pages_emit_action() {
        let (entries, _) = build(r#"# !BSF PAGES:{MEM:PLT:"Memory Settings"}"#);
        let fields = fields(&entries);
        assert_eq!(fields[0].role, Role::Action);
        assert_eq!(
            fields[0].meta.page.as_deref(),
            Some(r#"MEM:PLT:"Memory Settings""#)
        );
    }
}
