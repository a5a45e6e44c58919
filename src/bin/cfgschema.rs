use anyhow::{Context, Result, bail};
use cfgschema::{CompileOutput, Compiler, CompilerSettings};
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use indoc::indoc;
use log::{LevelFilter, info, warn};
use simplelog::{Config, SimpleLogger};

use std::path::PathBuf;
use std::process::exit;

struct CfgSchema {
    settings: CompilerSettings,
    input: PathBuf,
    output_dir: PathBuf,
    dump_json: bool,
    no_confirm_overwrite: bool,
    verbosity_level: Option<LevelFilter>,
}

impl CfgSchema {
    pub fn from_cli_matches(matches: &ArgMatches) -> Result<Self> {
        let input = PathBuf::from(
            matches
                .get_one::<String>("INPUT")
                .context("an input source is required")?,
        );

        let output_dir = matches
            .get_one::<String>("output-dir")
            .map_or_else(|| PathBuf::from("."), PathBuf::from);

        let verbosity_level = match matches.get_count("verbose") {
            0 => None,
            1 => Some(LevelFilter::Info),
            2 => Some(LevelFilter::Debug),
            3 => Some(LevelFilter::Trace),
            _ => {
                eprintln!("using more than -vvv does not affect verbosity level");
                Some(LevelFilter::Trace)
            }
        };

        let settings = match matches.get_one::<String>("rules") {
            Some(path) => CompilerSettings::from_json_file(path)
                .with_context(|| format!("failed to load rule table `{path}`"))?,
            None => CompilerSettings::default(),
        }
        .emit_all(matches.get_flag("all"));

        Ok(CfgSchema {
            settings,
            input,
            output_dir,
            dump_json: matches.get_flag("json"),
            no_confirm_overwrite: matches.get_flag("no-confirm-overwrite"),
            verbosity_level,
        })
    }

    fn try_to_initialize_logging(&self) {
        if let Some(level) = self.verbosity_level {
            match SimpleLogger::init(level, Config::default()) {
                Ok(_) => {}
                Err(e) => eprintln!("Failed to initialize logging: {e:?}"),
            };
        }
    }

    /// Asks before replacing files that already exist, unless prompting is disabled.
    fn confirm_overwrite(&self, paths: &[PathBuf]) -> Result<()> {
        for path in paths.iter().filter(|p| p.exists()) {
            if self.no_confirm_overwrite {
                warn!("overwriting `{}`", path.display());
                continue;
            }

            let prompt = format!("Are you sure you want to override output file {}", path.display());
            let overwrite = Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
                .context("failed to read confirmation")?;
            if !overwrite {
                bail!("Cancelled: `{}` already exists", path.display());
            }
        }
        Ok(())
    }

    fn write(&self, output: &CompileOutput) -> Result<()> {
        self.confirm_overwrite(&output.paths(&self.output_dir))?;
        let written = output.write_to_dir(&self.output_dir).with_context(|| {
            format!(
                "failed to write output documents to `{}`",
                self.output_dir.display()
            )
        })?;
        for path in written {
            info!("wrote `{}`", path.display());
        }
        Ok(())
    }

    pub fn run(&self) -> Result<()> {
        self.try_to_initialize_logging();

        let output = Compiler::new(self.settings.clone())
            .compile_path(&self.input)
            .with_context(|| format!("failed to compile `{}`", self.input.display()))?;

        for diagnostic in &output.diagnostics {
            eprintln!("warning: {diagnostic}");
        }

        if self.dump_json {
            let json = serde_json::to_string_pretty(&output.schema)
                .context("failed to serialize the schema")?;
            println!("{json}");
        }

        self.write(&output)
    }
}

fn command() -> Command {
    Command::new("cfgschema")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Compiles annotated CFGDATA description sources into schema documents")
        .long_about(indoc!(r#"
            Compiles an annotated CFGDATA description source (`.dsc`) into a layered schema
            document with `variable:`, `template:` and `configs:` sections.

            Field offsets are resolved, gaps are padded and packed bit-fields are grouped
            under their container before rendering. With `-a`, every `!include` target is
            written to its own document and referenced from the top-level one.
        "#))
        .arg(
            Arg::new("INPUT")
                .long("input")
                .short('i')
                .required(true)
                .value_name("SOURCE")
                .help("Description source to compile (.dsc)."),
        )
        .arg(
            Arg::new("output-dir")
                .long("output")
                .short('o')
                .value_name("DIR")
                .default_value(".")
                .help("Directory the generated documents are written to."),
        )
        .arg(
            Arg::new("all")
                .short('a')
                .long("all")
                .action(ArgAction::SetTrue)
                .help("Write one document per `!include` target instead of inlining them."),
        )
        .arg(
            Arg::new("rules")
                .long("rules")
                .value_name("FILE")
                .help("JSON rule table overriding substitutions, header rules and fixups."),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Also print the tracked schema as JSON to stdout."),
        )
        .arg(
            Arg::new("no-confirm-overwrite")
                .long("no-confirm-overwrite")
                .action(ArgAction::SetTrue)
                .help(indoc!(
                    "When set, will not ask for confirmation before overwriting existing \
                     output files."
                )),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help(indoc!(
                    r#"Sets debug prints level for the application:
                -v   - info
                -vv  - debug
                -vvv - trace
                NOTE: trace output is only available in debug builds, as it is extremely verbose."#
                )),
        )
}

fn main() {
    let matches = command().get_matches();

    let app = match CfgSchema::from_cli_matches(&matches) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{e:?}");
            exit(1);
        }
    };

    if let Err(e) = app.run() {
        eprintln!("{e:?}");
        exit(1);
    }
}
