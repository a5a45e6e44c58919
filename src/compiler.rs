use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;

use crate::descriptor::{Entry, build_entries};
use crate::emit::{Emitter, OutputDocument};
use crate::err::{CompileError, Result};
use crate::settings::CompilerSettings;
use crate::source::{RegionKind, SourceDocument, VariableBinding};
use crate::template::{Expander, TemplateTable};
use crate::tracker::{NameAllocator, Tracker};

/// State owned by one compilation run and handed from stage to stage.
pub struct CompilerContext<'s> {
    pub settings: &'s CompilerSettings,
    pub variables: Vec<VariableBinding>,
    pub templates: TemplateTable,
    pub names: NameAllocator,
    /// Recovered problems, reported alongside a successful result.
    pub diagnostics: Vec<CompileError>,
}

impl<'s> CompilerContext<'s> {
    pub fn new(settings: &'s CompilerSettings) -> Self {
        CompilerContext {
            settings,
            variables: Vec::new(),
            templates: TemplateTable::default(),
            names: NameAllocator::new(settings.padding_prefix.clone()),
            diagnostics: Vec::new(),
        }
    }
}

/// A recovered problem, flattened for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub line: Option<usize>,
    pub message: String,
}

impl From<CompileError> for Diagnostic {
    fn from(err: CompileError) -> Self {
        Diagnostic {
            line: err.line(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateSchema {
    pub name: String,
    pub file: String,
    pub fields: Vec<Entry>,
}

/// The tracked schema before rendering.
#[derive(Debug, Clone, Serialize)]
pub struct Schema {
    /// Byte size of the configuration region.
    pub size: Option<u64>,
    pub variables: Vec<VariableBinding>,
    pub templates: Vec<TemplateSchema>,
    pub configs: Vec<Entry>,
}

#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// The top-level document first, satellites in order of first reference.
    pub documents: Vec<OutputDocument>,
    pub diagnostics: Vec<Diagnostic>,
    pub schema: Schema,
}

impl CompileOutput {
    pub fn top_level(&self) -> &OutputDocument {
        &self.documents[0]
    }

    /// Paths `write_to_dir` would write.
    pub fn paths(&self, dir: impl AsRef<Path>) -> Vec<PathBuf> {
        self.documents
            .iter()
            .map(|doc| dir.as_ref().join(&doc.file))
            .collect()
    }

    pub fn write_to_dir(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| CompileError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut written = Vec::with_capacity(self.documents.len());
        for (doc, path) in self.documents.iter().zip(self.paths(dir)) {
            fs::write(&path, doc.text()).map_err(|source| CompileError::Io {
                path: path.clone(),
                source,
            })?;
            debug!("wrote `{}`", path.display());
            written.push(path);
        }
        Ok(written)
    }
}

pub struct Compiler {
    settings: CompilerSettings,
}

impl Compiler {
    pub fn new(settings: CompilerSettings) -> Self {
        Compiler { settings }
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    pub fn compile_path(&self, path: impl AsRef<Path>) -> Result<CompileOutput> {
        let document = SourceDocument::from_path(path)?;
        self.compile_document(&document)
    }

    /// Compiles an in-memory source. `name` only determines the output file names.
    pub fn compile_str(&self, name: &str, text: &str) -> Result<CompileOutput> {
        let document = SourceDocument::from_text(name, text)?;
        self.compile_document(&document)
    }

    pub fn compile_document(&self, document: &SourceDocument) -> Result<CompileOutput> {
        let settings = &self.settings;
        let mut ctx = CompilerContext::new(settings);

        ctx.variables = document.variables();
        ctx.templates = TemplateTable::collect(&document.region(RegionKind::Template))?;
        debug!(
            "collected {} variable(s) and {} template(s)",
            ctx.variables.len(),
            ctx.templates.len()
        );

        let entries = build_entries(
            settings,
            &document.region(RegionKind::Config),
            &mut ctx.diagnostics,
        )?;
        for field in entries.iter().filter_map(Entry::field) {
            ctx.names.reserve(field.cname.clone());
        }

        let expander = Expander::new(&ctx.templates, settings);
        let mut bodies = Vec::with_capacity(ctx.templates.len());
        for definition in ctx.templates.iter() {
            bodies.push((definition, expander.body(definition, &mut ctx.diagnostics)?));
        }

        let region = Tracker::new(settings, &mut ctx.names, &expander, true).track(entries)?;

        let stem = document
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("CfgDataDef");
        let documents = Emitter::new(settings, &ctx.templates, format!("{stem}.yaml")).emit(
            &ctx.variables,
            &bodies,
            &region.entries,
        )?;

        info!(
            "compiled `{}`: {} field(s), {} template(s), configuration size {}",
            document.path.display(),
            region.entries.iter().filter_map(Entry::field).count(),
            ctx.templates.len(),
            region
                .size
                .map_or_else(|| "unknown".to_owned(), |s| format!("0x{s:X}"))
        );

        let schema = Schema {
            size: region.size,
            variables: ctx.variables.clone(),
            templates: bodies
                .into_iter()
                .map(|(definition, fields)| TemplateSchema {
                    name: definition.name.clone(),
                    file: definition.file.clone(),
                    fields,
                })
                .collect(),
            configs: region.entries,
        };

        Ok(CompileOutput {
            documents,
            diagnostics: ctx.diagnostics.into_iter().map(Diagnostic::from).collect(),
            schema,
        })
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new(CompilerSettings::default())
    }
}
