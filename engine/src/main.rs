//! Docbatch CLI - resolve tables through a mapping scheme and generate documents
//!
//! # Main Commands
//!
//! ```bash
//! docbatch generate --tables data/ --scheme scheme.json --template letter.txt --out-dir out/
//! docbatch resolve --tables data/ --scheme scheme.json       # Resolved records as JSON
//! docbatch aggregate --tables data/ --scheme scheme.json     # Summary records as JSON
//! ```
//!
//! # Scheme Commands
//!
//! ```bash
//! docbatch check --tables data/ --scheme scheme.json --placeholders Name,Dept
//! docbatch suggest --tables data/ --placeholders Name,Dept --instruction "one letter per employee"
//! docbatch operations                                        # Show transform operations
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use docbatch::logs::{LogLevel, LogRecorder, LOG_BROADCASTER};
use docbatch::pipeline::prepare_records;
use docbatch::{
    check_scheme, generate_documents, load_scheme, load_tables, suggest_primary_table, AiClient, GenerateOptions,
    GenerationMode, MappingScheme, SchemeDocument, TableSet, TextTemplateRenderer,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "docbatch")]
#[command(about = "Resolve tabular data through a mapping scheme and batch-generate documents", long_about = None)]
struct Cli {
    /// Silence engine progress on stderr
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve one record per primary row and output JSON
    Resolve {
        /// Table source: CSV file, JSON file or directory
        #[arg(short, long)]
        tables: PathBuf,

        /// Mapping scheme JSON (bare scheme or saved document)
        #[arg(short, long)]
        scheme: PathBuf,

        /// Also expose loop children as Field_1, Field_2, ...
        #[arg(long)]
        flatten_loops: bool,

        /// One record per row even with a group-by loop
        #[arg(long)]
        no_collapse: bool,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compute aggregate summary records and output JSON
    Aggregate {
        #[arg(short, long)]
        tables: PathBuf,

        #[arg(short, long)]
        scheme: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Full pipeline: rules → resolution → batch rendering
    Generate {
        #[arg(short, long)]
        tables: PathBuf,

        #[arg(short, long)]
        scheme: PathBuf,

        /// UTF-8 text template with {{Field}} and {#Loop}...{/Loop}
        #[arg(long)]
        template: PathBuf,

        /// Directory receiving the generated files
        #[arg(long)]
        out_dir: PathBuf,

        #[arg(long, value_enum, default_value = "per-row")]
        mode: ModeArg,

        /// Render calls in flight at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Records per logged chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Base name for records without a name-like field
        #[arg(long)]
        base_name: Option<String>,

        /// Output file extension (default: the template's)
        #[arg(long)]
        extension: Option<String>,

        /// Stop at the first failed record
        #[arg(long)]
        fail_fast: bool,

        /// Unknown template keys are errors
        #[arg(long)]
        strict: bool,

        /// Evaluate rule fields with the AI oracle (needs ANTHROPIC_API_KEY)
        #[arg(long)]
        rules: bool,

        /// JSON file with GenerateOptions
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write every engine log entry as JSON lines to this file
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Check a scheme against the tables
    Check {
        #[arg(short, long)]
        tables: PathBuf,

        #[arg(short, long)]
        scheme: PathBuf,

        /// Template placeholders, comma separated
        #[arg(short, long, value_delimiter = ',')]
        placeholders: Vec<String>,
    },

    /// Ask the AI for a mapping scheme (falls back to an empty scheme)
    Suggest {
        #[arg(short, long)]
        tables: PathBuf,

        /// Template placeholders, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        placeholders: Vec<String>,

        /// Natural-language instruction for the mapping
        #[arg(short, long)]
        instruction: Option<String>,

        /// Save as a versioned scheme document with this name
        #[arg(long)]
        name: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show available transform operations
    Operations,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    PerRow,
    Aggregate,
}

impl From<ModeArg> for GenerationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::PerRow => GenerationMode::PerRow,
            ModeArg::Aggregate => GenerationMode::Aggregate,
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    if cli.quiet {
        LOG_BROADCASTER.set_echo(false);
    }

    let result = match cli.command {
        Commands::Resolve {
            tables,
            scheme,
            flatten_loops,
            no_collapse,
            output,
        } => cmd_resolve(&tables, &scheme, flatten_loops, no_collapse, output.as_deref()),

        Commands::Aggregate { tables, scheme, output } => cmd_aggregate(&tables, &scheme, output.as_deref()),

        Commands::Generate {
            tables,
            scheme,
            template,
            out_dir,
            mode,
            concurrency,
            chunk_size,
            base_name,
            extension,
            fail_fast,
            strict,
            rules,
            config,
            log_file,
        } => {
            let args = GenerateArgs {
                mode: mode.into(),
                concurrency,
                chunk_size,
                base_name,
                extension,
                fail_fast,
                strict,
                rules,
                config,
                log_file,
            };
            cmd_generate(&tables, &scheme, &template, &out_dir, args).await
        }

        Commands::Check {
            tables,
            scheme,
            placeholders,
        } => cmd_check(&tables, &scheme, &placeholders),

        Commands::Suggest {
            tables,
            placeholders,
            instruction,
            name,
            output,
        } => cmd_suggest(&tables, &placeholders, instruction.as_deref(), name, output.as_deref()).await,

        Commands::Operations => cmd_operations(),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn load_inputs(tables: &Path, scheme: &Path) -> Result<(TableSet, MappingScheme), Box<dyn std::error::Error>> {
    eprintln!("📄 Loading tables: {}", tables.display());
    let tables = load_tables(tables)?;
    let scheme = load_scheme(&fs::read_to_string(scheme)?)?;
    eprintln!(
        "   {} tables, primary '{}'",
        tables.len(),
        scheme.primary_table
    );
    Ok((tables, scheme))
}

fn cmd_resolve(tables: &Path, scheme: &Path, flatten_loops: bool, no_collapse: bool, output: Option<&Path>) -> CliResult {
    let (tables, scheme) = load_inputs(tables, scheme)?;
    let options = docbatch::ResolveOptions::default()
        .with_flatten_loops(flatten_loops)
        .with_collapse_groups(!no_collapse);

    let prepared = prepare_records(&tables, &scheme, GenerationMode::PerRow, &options)?;
    eprintln!("✅ {} records, {} diagnostics", prepared.records.len(), prepared.diagnostics.len());

    write_output(&serde_json::to_string_pretty(&prepared.records)?, output)
}

fn cmd_aggregate(tables: &Path, scheme: &Path, output: Option<&Path>) -> CliResult {
    let (tables, scheme) = load_inputs(tables, scheme)?;
    let prepared = prepare_records(&tables, &scheme, GenerationMode::Aggregate, &Default::default())?;
    eprintln!("✅ {} summaries", prepared.records.len());

    write_output(&serde_json::to_string_pretty(&prepared.records)?, output)
}

struct GenerateArgs {
    mode: GenerationMode,
    concurrency: Option<usize>,
    chunk_size: Option<usize>,
    base_name: Option<String>,
    extension: Option<String>,
    fail_fast: bool,
    strict: bool,
    rules: bool,
    config: Option<PathBuf>,
    log_file: Option<PathBuf>,
}

async fn cmd_generate(tables: &Path, scheme: &Path, template_path: &Path, out_dir: &Path, args: GenerateArgs) -> CliResult {
    let (tables, scheme) = load_inputs(tables, scheme)?;
    let template = fs::read(template_path)?;

    let mut options: GenerateOptions = match &args.config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => GenerateOptions::default(),
    };
    options.mode = args.mode;
    if let Some(concurrency) = args.concurrency {
        options.batch.concurrency = concurrency;
    }
    if let Some(chunk_size) = args.chunk_size {
        options.batch.chunk_size = chunk_size;
    }
    if let Some(base_name) = args.base_name {
        options.base_name = base_name;
    }
    options.extension = args
        .extension
        .or(options.extension)
        .or_else(|| template_path.extension().and_then(|e| e.to_str()).map(str::to_string));
    if args.fail_fast {
        options.batch.continue_on_error = false;
    }
    options.batch = options.batch.with_progress(|done, total| {
        eprintln!("   ↻ {}/{} rendered", done, total);
    });

    let oracle = if args.rules && scheme.has_rules() {
        Some(AiClient::from_env()?)
    } else {
        None
    };

    let recorder = args.log_file.as_ref().map(|_| LogRecorder::start());
    let renderer = TextTemplateRenderer::new().strict(args.strict);
    let output = generate_documents(&template, &tables, &scheme, &renderer, oracle.as_ref(), &options).await;
    if let (Some(recorder), Some(path)) = (recorder, &args.log_file) {
        let summary = recorder.finish().await;
        fs::write(path, summary.to_json_lines()?)?;
        eprintln!(
            "📝 {} log entries ({} warnings, {} errors) written to {}",
            summary.entries.len(),
            summary.count(LogLevel::Warning),
            summary.count(LogLevel::Error),
            path.display()
        );
        if summary.skipped > 0 {
            eprintln!("   ⚠️  {} entries were dropped while recording", summary.skipped);
        }
    }
    let output = output?;

    fs::create_dir_all(out_dir)?;
    for artifact in &output.artifacts {
        fs::write(out_dir.join(&artifact.file_name), &artifact.content)?;
    }

    eprintln!(
        "\n✨ {} of {} documents written to {} ({} failed, {} diagnostics)",
        output.stats.successful,
        output.stats.total,
        out_dir.display(),
        output.stats.failed,
        output.diagnostics.len()
    );
    for failure in output.failures.iter().take(5) {
        eprintln!("   ❌ record {}: {}", failure.index + 1, failure.message);
    }
    Ok(())
}

fn cmd_check(tables: &Path, scheme: &Path, placeholders: &[String]) -> CliResult {
    let (tables, mut scheme) = load_inputs(tables, scheme)?;
    if !placeholders.is_empty() {
        scheme.refresh_unmapped(placeholders);
    }

    let report = check_scheme(&scheme, &tables);
    for warning in &report.warnings {
        eprintln!("   ⚠️  {}", warning);
    }
    for error in &report.errors {
        eprintln!("   ❌ {}", error);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_valid() {
        std::process::exit(1);
    }
    eprintln!("✅ Scheme is valid");
    Ok(())
}

async fn cmd_suggest(
    tables: &Path,
    placeholders: &[String],
    instruction: Option<&str>,
    name: Option<String>,
    output: Option<&Path>,
) -> CliResult {
    eprintln!("📄 Loading tables: {}", tables.display());
    let tables = load_tables(tables)?;
    if let Some(primary) = suggest_primary_table(&tables, instruction) {
        eprintln!("   Likely primary table: {}", primary);
    }

    let client = AiClient::from_env()?;
    let outcome = client.suggest_scheme(placeholders, &tables, instruction).await?;
    if outcome.used_fallback {
        eprintln!("⚠️  Suggestion unusable, returning an empty scheme");
    }
    for warning in outcome.warnings.iter().take(5) {
        eprintln!("   - {}", warning);
    }

    let json = match name {
        Some(name) => SchemeDocument::new(name, outcome.scheme).to_json()?,
        None => serde_json::to_string_pretty(&outcome.scheme)?,
    };
    write_output(&json, output)
}

fn cmd_operations() -> CliResult {
    println!("{}", docbatch::transform::operations_description());
    Ok(())
}

fn write_output(content: &str, path: Option<&Path>) -> CliResult {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
