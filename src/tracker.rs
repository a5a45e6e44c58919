//! Offset resolution, padding and bit-field grouping over a descriptor stream.
//!
//! The tracker walks one region in document order with a running byte cursor. Explicit offsets
//! ahead of the cursor get a synthesized padding field, explicit offsets behind it are fatal.
//! A bit-field member directly after a byte field turns that field into a container: the field
//! is reopened as a structure of the same name whose first child is a `$STRUCT` marker holding
//! the original attributes, followed by the bit-field members. The output stream is kept
//! indexable so these rewrites only ever look back one or two entries.

use hashbrown::HashSet;
use log::{debug, trace};

use crate::bits::{read_bits, value_to_le_bytes};
use crate::classify::parse_number;
use crate::descriptor::{Entry, ExpandCall, FieldDescriptor, FieldLength, Offset, Role};
use crate::err::{CompileError, Result};
use crate::settings::CompilerSettings;

/// Widest byte field that can hold packed bit-fields.
const MAX_BIT_CONTAINER: u64 = 8;

/// Supplies byte sizes of template instantiations.
pub trait LengthResolver {
    fn expanded_len(&self, call: &ExpandCall, line: usize) -> Result<u64>;
}

/// Hands out padding names that collide with no declared field.
#[derive(Debug, Clone)]
pub struct NameAllocator {
    prefix: String,
    taken: HashSet<String>,
    next: usize,
}

impl NameAllocator {
    pub fn new(prefix: impl Into<String>) -> Self {
        NameAllocator {
            prefix: prefix.into(),
            taken: HashSet::new(),
            next: 0,
        }
    }

    pub fn reserve(&mut self, name: impl Into<String>) {
        self.taken.insert(name.into());
    }

    pub fn next_name(&mut self) -> String {
        loop {
            let name = format!("{}{}", self.prefix, self.next);
            self.next += 1;
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }
}

/// Result of tracking one region.
#[derive(Debug, Clone)]
pub struct TrackedRegion {
    pub entries: Vec<Entry>,
    /// Final cursor, `None` when a length along the way stayed symbolic.
    pub size: Option<u64>,
}

struct OpenStruct {
    name: String,
    line: usize,
    /// Position of the open in the output stream.
    index: usize,
    /// For a header structure, where its block goes once it closes.
    hoist_to: Option<usize>,
}

struct BitGroup {
    name: String,
    offset: Option<u64>,
    /// Container default as little-endian bytes, when it is a plain number.
    image: Option<Vec<u8>>,
    bits: u64,
    next_bit: Option<u32>,
}

pub struct Tracker<'a> {
    settings: &'a CompilerSettings,
    names: &'a mut NameAllocator,
    resolver: &'a dyn LengthResolver,
    strict: bool,
    cursor: Option<u64>,
    out: Vec<Entry>,
    open: Vec<OpenStruct>,
    includes: usize,
    group: Option<BitGroup>,
}

impl<'a> Tracker<'a> {
    /// In strict mode every length must resolve to a number, as the configuration region
    /// requires. Template bodies are tracked leniently since their lengths may be placeholders.
    pub fn new(
        settings: &'a CompilerSettings,
        names: &'a mut NameAllocator,
        resolver: &'a dyn LengthResolver,
        strict: bool,
    ) -> Self {
        Tracker {
            settings,
            names,
            resolver,
            strict,
            cursor: Some(0),
            out: Vec::new(),
            open: Vec::new(),
            includes: 0,
            group: None,
        }
    }

    pub fn track(mut self, entries: Vec<Entry>) -> Result<TrackedRegion> {
        let mut last_line = 0;

        for entry in entries {
            match entry {
                Entry::Field(field) => {
                    last_line = field.line;
                    self.field(field)?;
                }
                Entry::IncludeOpen(path) => {
                    self.close_bit_group();
                    self.includes += 1;
                    self.out.push(Entry::IncludeOpen(path));
                }
                Entry::IncludeClose => {
                    self.close_bit_group();
                    if self.includes == 0 {
                        return Err(CompileError::UnbalancedInclude { line: last_line });
                    }
                    self.includes -= 1;
                    self.out.push(Entry::IncludeClose);
                }
            }
        }

        self.close_bit_group();
        if let Some(open) = self.open.pop() {
            return Err(CompileError::UnbalancedStruct {
                line: open.line,
                name: open.name,
            });
        }

        Ok(TrackedRegion {
            entries: self.out,
            size: self.cursor,
        })
    }

    fn field(&mut self, mut field: FieldDescriptor) -> Result<()> {
        trace!("track `{}` at {:?}", field.cname, self.cursor);

        if field.role != Role::BitField {
            self.close_bit_group();
        }

        match field.role {
            Role::BitField => self.bit_member(field),
            Role::StructOpen => {
                field.offset = self.cursor;
                let open = OpenStruct {
                    name: field.cname.clone(),
                    line: field.line,
                    index: self.out.len(),
                    hoist_to: None,
                };
                self.out.push(Entry::Field(field));
                let hoist_to = self.header_target();
                self.open.push(OpenStruct { hoist_to, ..open });
                Ok(())
            }
            Role::StructClose => {
                let open = match self.open.pop() {
                    Some(open) if open.name == field.cname => open,
                    _ => {
                        return Err(CompileError::UnbalancedStruct {
                            line: field.line,
                            name: field.cname,
                        });
                    }
                };
                field.offset = self.cursor;
                self.out.push(Entry::Field(field));
                if let Some(at) = open.hoist_to {
                    self.hoist(open.index, at);
                }
                Ok(())
            }
            Role::Action => {
                field.offset = self.cursor;
                self.out.push(Entry::Field(field));
                Ok(())
            }
            Role::Plain | Role::Padding => self.place(field),
        }
    }

    fn place(&mut self, mut field: FieldDescriptor) -> Result<()> {
        if let Offset::At(offset) = field.declared_offset {
            if let Some(cursor) = self.cursor {
                if offset < cursor {
                    return Err(CompileError::OffsetRegression {
                        line: field.line,
                        name: field.cname,
                        offset,
                        cursor,
                    });
                }
                if offset > cursor {
                    self.pad(cursor, offset - cursor, field.line);
                }
            }
            self.cursor = Some(offset);
        }
        field.offset = self.cursor;

        let length = match (&field.expand, field.length.fixed()) {
            (Some(call), _) if self.strict => {
                let len = self.resolver.expanded_len(call, field.line)?;
                field.length = FieldLength::Fixed(len);
                Some(len)
            }
            (Some(_), _) => None,
            (None, Some(len)) => Some(len),
            (None, None) if self.strict => {
                return Err(CompileError::UnresolvedLength {
                    line: field.line,
                    name: field.cname,
                    length: match field.length {
                        FieldLength::Symbolic(s) => s,
                        FieldLength::Fixed(n) => n.to_string(),
                    },
                });
            }
            (None, None) => None,
        };

        self.cursor = match (self.cursor, length) {
            (Some(cursor), Some(len)) => Some(cursor.checked_add(len).ok_or_else(|| {
                CompileError::MalformedField {
                    line: field.line,
                    message: format!(
                        "`{}` of 0x{len:X} bytes at 0x{cursor:X} overflows the offset range",
                        field.cname
                    ),
                }
            })?),
            _ => None,
        };
        self.out.push(Entry::Field(field));
        Ok(())
    }

    fn pad(&mut self, cursor: u64, gap: u64, line: usize) {
        let mut padding = FieldDescriptor::new(self.names.next_name(), Role::Padding, line);
        padding.declared_offset = Offset::At(cursor);
        padding.offset = Some(cursor);
        padding.length = FieldLength::Fixed(gap);
        padding.value = Some("0".to_owned());
        padding.meta.kind = Some("Reserved".to_owned());
        debug!(
            "line {line}: inserting `{}` of 0x{gap:X} bytes at 0x{cursor:X}",
            padding.cname
        );
        self.out.push(Entry::Field(padding));
    }

    fn open_bit_group(&mut self, member: &FieldDescriptor) -> Result<()> {
        let prev = match self.out.pop() {
            Some(Entry::Field(prev)) if prev.is_plain() && prev.length.fixed().is_some() => prev,
            other => {
                self.out.extend(other);
                return Err(CompileError::MalformedField {
                    line: member.line,
                    message: format!(
                        "bit-field `{}` does not follow a byte field it can be packed into",
                        member.cname
                    ),
                });
            }
        };

        let bytes = prev.length.fixed().unwrap_or_default();
        if bytes > MAX_BIT_CONTAINER {
            let message = format!(
                "bit-field `{}` is packed into `{}` of {bytes} bytes, containers hold at most {MAX_BIT_CONTAINER}",
                member.cname, prev.cname
            );
            self.out.push(Entry::Field(prev));
            return Err(CompileError::MalformedField {
                line: member.line,
                message,
            });
        }
        let image = prev
            .value
            .as_deref()
            .and_then(parse_number)
            .map(|v| value_to_le_bytes(v, bytes as usize));

        let mut open = FieldDescriptor::new(prev.cname.clone(), Role::StructOpen, prev.line);
        open.declared_offset = prev.declared_offset;
        open.offset = prev.offset;
        open.length = prev.length.clone();

        let mut marker = prev;
        marker.cname = self.settings.bit_group_tag.clone();

        debug!(
            "line {}: `{}` becomes a bit-field container",
            open.line, open.cname
        );

        self.group = Some(BitGroup {
            name: open.cname.clone(),
            offset: open.offset,
            image,
            bits: bytes * 8,
            next_bit: Some(0),
        });
        self.out.push(Entry::Field(open));
        self.out.push(Entry::Field(marker));
        Ok(())
    }

    fn bit_member(&mut self, mut field: FieldDescriptor) -> Result<()> {
        if self.group.is_none() {
            self.open_bit_group(&field)?;
        }
        let Some(group) = self.group.as_mut() else {
            return Ok(());
        };

        field.offset = group.offset;
        match (group.next_bit, field.length.fixed()) {
            (Some(start), Some(width)) => {
                let end = u64::from(start).saturating_add(width);
                if end > group.bits {
                    return Err(CompileError::BitFieldOverflow {
                        line: field.line,
                        name: field.cname,
                        end: u32::try_from(end).unwrap_or(u32::MAX),
                        bits: group.bits,
                    });
                }
                if let Some(image) = &group.image {
                    let value = read_bits(image, start as usize, width as usize).map_err(|_| {
                        CompileError::BitFieldOverflow {
                            line: field.line,
                            name: field.cname.clone(),
                            end: u32::try_from(end).unwrap_or(u32::MAX),
                            bits: group.bits,
                        }
                    })?;
                    field.value = Some(format!("0x{value:X}"));
                }
                field.bit_offset = Some(start);
                group.next_bit = Some(end as u32);
            }
            _ => group.next_bit = None,
        }

        self.out.push(Entry::Field(field));
        Ok(())
    }

    fn close_bit_group(&mut self) {
        if let Some(group) = self.group.take() {
            let line = self
                .out
                .last()
                .and_then(Entry::field)
                .map_or(0, |f| f.line);
            let mut close = FieldDescriptor::new(group.name, Role::StructClose, line);
            close.offset = self.cursor;
            self.out.push(Entry::Field(close));
        }
    }

    /// A header structure opened right after another structure open (padding aside) is moved
    /// in front of it once it closes, and the outer structure takes over the header's tag.
    /// Returns where the header block goes.
    fn header_target(&mut self) -> Option<usize> {
        let last = self.out.len().checked_sub(1)?;
        let tag = match &self.out[last] {
            Entry::Field(f) if self.settings.header_rule_for_struct(&f.cname).is_some() => f.tag,
            _ => return None,
        };

        let mut prev = last.checked_sub(1)?;
        if matches!(&self.out[prev], Entry::Field(f) if f.role == Role::Padding) {
            prev = prev.checked_sub(1)?;
        }

        let outer_index = self.open.last().map(|o| o.index)?;
        match &mut self.out[prev] {
            Entry::Field(outer) if outer.role == Role::StructOpen && prev == outer_index => {
                if outer.tag.is_none() {
                    outer.tag = tag;
                }
                debug!("header structure will be moved in front of `{}`", outer.cname);
                Some(prev)
            }
            _ => None,
        }
    }

    /// Moves the entries from `from` to the end of the stream to position `at`.
    fn hoist(&mut self, from: usize, at: usize) {
        let block = self.out.split_off(from);
        let moved = block.len();
        let rest = self.out.split_off(at);
        self.out.extend(block);
        self.out.extend(rest);
        for open in self.open.iter_mut().filter(|o| o.index >= at) {
            open.index += moved;
        }
    }
}
