//! Template collection and expansion.
//!
//! Templates are declared in the template region between `# !BSF DEFT:{NAME:START}` and
//! `# !BSF DEFT:{NAME:END}`. Their bodies are kept as source text: an instantiation substitutes
//! the positional placeholders `$(1)`, `$(2)`, ... textually and runs the result through the
//! regular classify/build/track pipeline.

use std::cell::RefCell;

use hashbrown::HashMap;
use log::{debug, warn};

use crate::classify::{IncludeDirective, LineEvent, classify};
use crate::descriptor::{Entry, ExpandCall, build_entries};
use crate::err::{CompileError, Result};
use crate::settings::CompilerSettings;
use crate::source::SourceLine;
use crate::tracker::{LengthResolver, NameAllocator, TrackedRegion, Tracker};

/// Virtual file name of the top-level document.
pub const TOP_LEVEL: &str = ".";

#[derive(Debug, Clone)]
pub struct TemplateDefinition {
    pub name: String,
    /// Include target active where the template was (last) declared.
    pub file: String,
    /// Line of the `DEFT:{NAME:START}` pragma.
    pub line: usize,
    pub body: Vec<SourceLine>,
}

#[derive(Debug, Default)]
pub struct TemplateTable {
    templates: Vec<TemplateDefinition>,
    index: HashMap<String, usize>,
}

fn template_bound(event: &LineEvent) -> Option<(String, bool)> {
    let LineEvent::Bsf(pragma) = event else {
        return None;
    };
    pragma
        .blocks
        .iter()
        .filter(|b| b.key == "DEFT")
        .find_map(|b| {
            let (name, bound) = b.value.rsplit_once(':')?;
            match bound.trim().to_ascii_uppercase().as_str() {
                "START" => Some((name.trim().to_owned(), true)),
                "END" => Some((name.trim().to_owned(), false)),
                _ => None,
            }
        })
}

impl TemplateTable {
    /// Collects the templates of a template region.
    ///
    /// Regions cannot nest: a `START` for another name while a template is open is an error.
    /// A template declared again replaces the earlier body but keeps its position.
    pub fn collect(lines: &[SourceLine]) -> Result<Self> {
        let mut table = TemplateTable::default();
        let mut includes: Vec<String> = Vec::new();
        let mut open: Option<TemplateDefinition> = None;

        for line in lines {
            let event = classify(line)?;

            match &event {
                LineEvent::Include(IncludeDirective::Open(path)) => {
                    includes.push(path.clone());
                    continue;
                }
                LineEvent::Include(IncludeDirective::Close) => {
                    if includes.pop().is_none() {
                        return Err(CompileError::UnbalancedInclude { line: line.number });
                    }
                    continue;
                }
                _ => {}
            }

            match (template_bound(&event), open.as_mut()) {
                (Some((name, true)), None) => {
                    debug!("line {}: template `{name}` starts", line.number);
                    open = Some(TemplateDefinition {
                        name,
                        file: includes
                            .last()
                            .cloned()
                            .unwrap_or_else(|| TOP_LEVEL.to_owned()),
                        line: line.number,
                        body: Vec::new(),
                    });
                }
                (Some((name, true)), Some(current)) => {
                    if name != current.name {
                        return Err(CompileError::TemplateReopened {
                            line: line.number,
                            name,
                            open: current.name.clone(),
                        });
                    }
                    warn!(
                        "line {}: template `{name}` is already open, ignoring repeated START",
                        line.number
                    );
                }
                (Some((name, false)), Some(current)) if name == current.name => {
                    if let Some(done) = open.take() {
                        table.insert(done);
                    }
                }
                (Some((name, false)), _) => {
                    return Err(CompileError::UnmatchedTemplateEnd {
                        line: line.number,
                        name,
                    });
                }
                (None, Some(current)) => current.body.push(line.clone()),
                (None, None) => {
                    if matches!(event, LineEvent::FieldDecl(_)) {
                        warn!(
                            "line {}: field declared outside of any template, ignored",
                            line.number
                        );
                    }
                }
            }
        }

        if let Some(current) = open {
            return Err(CompileError::UnterminatedTemplate {
                line: current.line,
                name: current.name,
            });
        }

        Ok(table)
    }

    fn insert(&mut self, definition: TemplateDefinition) {
        match self.index.get(&definition.name) {
            Some(&pos) => {
                debug!("template `{}` redefined", definition.name);
                self.templates[pos] = definition;
            }
            None => {
                self.index
                    .insert(definition.name.clone(), self.templates.len());
                self.templates.push(definition);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&TemplateDefinition> {
        self.index.get(name).map(|&pos| &self.templates[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &TemplateDefinition> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Replaces `$(n)` with the n-th (1-based) argument. Placeholders without an argument stay.
pub fn substitute_args(text: &str, args: &[String]) -> String {
    let mut out = text.to_owned();
    for (i, arg) in args.iter().enumerate().rev() {
        out = out.replace(&format!("$({})", i + 1), arg);
    }
    out
}

/// Instantiates templates and resolves their sizes.
pub struct Expander<'a> {
    table: &'a TemplateTable,
    settings: &'a CompilerSettings,
    active: RefCell<Vec<String>>,
}

impl<'a> Expander<'a> {
    pub fn new(table: &'a TemplateTable, settings: &'a CompilerSettings) -> Self {
        Expander {
            table,
            settings,
            active: RefCell::new(Vec::new()),
        }
    }

    fn lookup(&self, call: &ExpandCall, line: usize) -> Result<&'a TemplateDefinition> {
        self.table
            .get(&call.template)
            .ok_or_else(|| CompileError::UnknownTemplateReference {
                line,
                name: call.template.clone(),
            })
    }

    /// The template body as written, tracked leniently for rendering.
    pub fn body(
        &self,
        definition: &TemplateDefinition,
        diagnostics: &mut Vec<CompileError>,
    ) -> Result<Vec<Entry>> {
        let entries = build_entries(self.settings, &definition.body, diagnostics)?;
        let mut names = NameAllocator::new(self.settings.padding_prefix.clone());
        let region = Tracker::new(self.settings, &mut names, self, false).track(entries)?;
        Ok(region.entries)
    }

    /// Substitutes the arguments of `call` into its template and tracks the result strictly.
    pub fn expand(&self, call: &ExpandCall, line: usize) -> Result<TrackedRegion> {
        let definition = self.lookup(call, line)?;

        if self.active.borrow().contains(&call.template) {
            return Err(CompileError::RecursiveTemplate {
                line,
                name: call.template.clone(),
            });
        }

        let body: Vec<SourceLine> = definition
            .body
            .iter()
            .map(|l| SourceLine::new(l.number, substitute_args(&l.text, &call.args)))
            .collect();

        self.active.borrow_mut().push(call.template.clone());
        let result = self.track_expansion(&body);
        self.active.borrow_mut().pop();
        result
    }

    fn track_expansion(&self, body: &[SourceLine]) -> Result<TrackedRegion> {
        // Pragma issues of a body are reported once, when the body itself is rendered.
        let entries = build_entries(self.settings, body, &mut Vec::new())?;
        let mut names = NameAllocator::new(self.settings.padding_prefix.clone());
        Tracker::new(self.settings, &mut names, self, true).track(entries)
    }
}

impl LengthResolver for Expander<'_> {
    fn expanded_len(&self, call: &ExpandCall, line: usize) -> Result<u64> {
        let region = self.expand(call, line)?;
        region.size.ok_or_else(|| CompileError::UnresolvedLength {
            line,
            name: call.template.clone(),
            length: call.to_string(),
        })
    }
}
