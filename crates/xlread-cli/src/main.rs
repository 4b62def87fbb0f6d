use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use glob::glob;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use xlread_core::{
    DecodeError, DecodeOptions, DecodeReport, DecodedFile, FileError, FileKind, build_report,
    validate_toc,
};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit ",
    env!("XLREAD_BUILD_COMMIT"),
    ", ",
    env!("XLREAD_BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "xlread")]
#[command(version, long_version = LONG_VERSION)]
#[command(
    about = "Template-driven decoder for EEG recording files (.eeg/.erd/.ent/.etc/.snc/.stc/.vtc).",
    long_about = None,
    after_help = "Examples:\n  xlread decode study.erd --templates data_templates -o report.json\n  xlread decode study.vtc --templates data_templates --stdout --pretty\n  xlread check-toc study.etc --erd study.erd --templates data_templates"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode one recording file and write a versioned JSON report.
    #[command(alias = "read")]
    Decode(DecodeArgs),
    /// Check that every table-of-contents offset ends a packet of the matching .erd file.
    CheckToc(CheckTocArgs),
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Path (or glob pattern matching exactly one file) to a recording file
    input: PathBuf,

    /// Template root directory (holds generic_header_data_template_schema_<v>.json)
    #[arg(long, value_name = "DIR")]
    templates: PathBuf,

    /// File kind; defaults to the input extension
    #[arg(long, value_name = "EXT")]
    kind: Option<FileKind>,

    /// Output report path (JSON)
    #[arg(short = 'o', long, required_unless_present = "stdout")]
    report: Option<PathBuf>,

    /// Write JSON report to stdout
    #[arg(long, conflicts_with = "report")]
    stdout: bool,

    /// Pretty-print JSON output
    #[arg(long, conflicts_with = "compact")]
    pretty: bool,

    /// Compact JSON output (default)
    #[arg(long)]
    compact: bool,

    /// Include every decoded packet in the report (.erd only)
    #[arg(long)]
    packets: bool,

    /// Reorder channel names by the header's physical channel map (.erd only)
    #[arg(long)]
    reorder_electrodes: bool,

    /// Suppress non-error output
    #[arg(long)]
    quiet: bool,
}

#[derive(Args, Debug)]
struct CheckTocArgs {
    /// Path (or glob pattern) to the .etc file
    etc: PathBuf,

    /// Path (or glob pattern) to the .erd file the index describes
    #[arg(long)]
    erd: PathBuf,

    /// Template root directory
    #[arg(long, value_name = "DIR")]
    templates: PathBuf,

    /// Suppress non-error output
    #[arg(long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Decode(args) => {
            init_tracing(args.quiet);
            cmd_decode(args)
        }
        Commands::CheckToc(args) => {
            init_tracing(args.quiet);
            cmd_check_toc(args)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(2)
        }
    }
}

/// Diagnostics go to stderr; `RUST_LOG` overrides the default level.
fn init_tracing(quiet: bool) {
    let default_level = if quiet { "error" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(Debug)]
struct CliError {
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            message: message.into(),
            hint,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::new(format!("{err:#}"), None)
    }
}

impl From<FileError> for CliError {
    fn from(err: FileError) -> Self {
        let hint = decode_hint(&err.source);
        CliError::new(err.to_string(), hint)
    }
}

fn decode_hint(err: &DecodeError) -> Option<String> {
    let hint = match err {
        DecodeError::SchemaMismatch { .. } => {
            "add a file_schema_<n> directory for this file kind under --templates"
        }
        DecodeError::MissingTemplateFile { .. } => "check the --templates directory layout",
        DecodeError::RequirementViolation { .. } | DecodeError::CheckpointMismatch { .. } => {
            "the file does not match its template; check --kind and the template version"
        }
        DecodeError::UnexpectedEof { .. } => "the file looks truncated",
        DecodeError::Io(_) => "check that the input file is readable",
        _ => return None,
    };
    Some(hint.to_string())
}

fn cmd_decode(args: DecodeArgs) -> Result<(), CliError> {
    let resolved_input = resolve_input_path(&args.input)?;
    let kind = resolve_kind(&resolved_input, args.kind)?;
    validate_templates_dir(&args.templates)?;
    let input_abs = fs::canonicalize(&resolved_input)
        .with_context(|| format!("Failed to resolve input path: {}", resolved_input.display()))?;

    let report_path = if args.stdout {
        None
    } else {
        let report_path = args.report.ok_or_else(|| {
            CliError::new(
                "missing output path",
                Some("use -o/--report or --stdout".to_string()),
            )
        })?;
        ensure_distinct_output(&report_path, &input_abs)?;
        Some(report_path)
    };

    let meta = fs::metadata(&resolved_input)
        .with_context(|| format!("Failed to read input file: {}", resolved_input.display()))?;
    let options = DecodeOptions {
        reorder_electrodes: args.reorder_electrodes,
    };
    debug!(%kind, path = %resolved_input.display(), bytes = meta.len(), "decoding");
    let decoded = options.decode_path(kind, &resolved_input, &args.templates)?;
    let report = build_report(
        &resolved_input.display().to_string(),
        meta.len(),
        &decoded,
        args.packets,
    );
    let json = serialize_report(&report, args.pretty, args.compact)?;

    let Some(report_path) = report_path else {
        print!("{}", json);
        return Ok(());
    };
    if let Some(parent) = report_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory: {}", parent.display())
            })?;
        }
    }
    fs::write(&report_path, json)
        .with_context(|| format!("Failed to write report: {}", report_path.display()))?;

    if !args.quiet {
        eprintln!("OK: report written -> {}", report_path.display());
    }
    Ok(())
}

fn cmd_check_toc(args: CheckTocArgs) -> Result<(), CliError> {
    let etc_path = resolve_input_path(&args.etc)?;
    let erd_path = resolve_input_path(&args.erd)?;
    expect_kind(&etc_path, FileKind::Etc)?;
    expect_kind(&erd_path, FileKind::Erd)?;
    validate_templates_dir(&args.templates)?;

    let options = DecodeOptions::default();
    let erd = options.decode_path(FileKind::Erd, &erd_path, &args.templates)?;
    let etc = options.decode_path(FileKind::Etc, &etc_path, &args.templates)?;
    debug!(
        etc = %etc_path.display(),
        erd = %erd_path.display(),
        "cross-checking table of contents"
    );
    let checked = check_offsets(&etc, &erd).map_err(|err| {
        CliError::new(
            format!("{}: {err}", etc_path.display()),
            Some(format!(
                "the index does not describe {}; check that the files belong together",
                erd_path.display()
            )),
        )
    })?;

    if !args.quiet {
        eprintln!(
            "OK: {checked} table-of-contents offsets match packet ends in {}",
            erd_path.display()
        );
    }
    Ok(())
}

fn check_offsets(etc: &DecodedFile, erd: &DecodedFile) -> Result<usize, DecodeError> {
    match erd.packets.as_ref() {
        Some(stream) => validate_toc(&etc.record, stream),
        None => Err(DecodeError::MissingField {
            section: "erd".to_string(),
            field: "data_packets".to_string(),
        }),
    }
}

fn serialize_report(
    report: &DecodeReport,
    pretty: bool,
    compact: bool,
) -> Result<String, CliError> {
    if pretty && !compact {
        serde_json::to_string_pretty(report)
            .context("JSON serialization failed")
            .map_err(Into::into)
    } else {
        serde_json::to_string(report)
            .context("JSON serialization failed")
            .map_err(Into::into)
    }
}

fn ensure_distinct_output(report_path: &Path, input_abs: &Path) -> Result<(), CliError> {
    let parent = match report_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    // A parent that does not exist yet cannot contain the input.
    let Ok(report_dir) = fs::canonicalize(parent) else {
        return Ok(());
    };
    let file_name = report_path
        .file_name()
        .ok_or_else(|| CliError::new("invalid report path", None))?;
    if report_dir.join(file_name) == input_abs {
        return Err(CliError::new(
            format!(
                "report path must differ from input: {}",
                report_path.display()
            ),
            Some("choose a different output path".to_string()),
        ));
    }
    Ok(())
}

fn resolve_kind(input: &Path, explicit: Option<FileKind>) -> Result<FileKind, CliError> {
    if let Some(kind) = explicit {
        return Ok(kind);
    }
    FileKind::from_path(input).ok_or_else(|| {
        CliError::new(
            format!("cannot tell the file kind of '{}'", input.display()),
            Some("pass --kind (eeg, erd, ent, etc, snc, stc or vtc)".to_string()),
        )
    })
}

fn expect_kind(input: &Path, expected: FileKind) -> Result<(), CliError> {
    match FileKind::from_path(input) {
        Some(kind) if kind == expected => Ok(()),
        _ => Err(CliError::new(
            format!("expected a .{expected} file, got '{}'", input.display()),
            None,
        )),
    }
}

fn validate_templates_dir(templates: &Path) -> Result<(), CliError> {
    if templates.is_dir() {
        return Ok(());
    }
    Err(CliError::new(
        format!("template directory not found: {}", templates.display()),
        Some("point --templates at the data_templates root".to_string()),
    ))
}

fn resolve_input_path(input: &Path) -> Result<PathBuf, CliError> {
    let pattern = input.to_string_lossy();
    if !is_glob_pattern(&pattern) {
        if !input.is_file() {
            return Err(CliError::new(
                format!("input file not found: {}", input.display()),
                Some("pass a recording file such as study.erd".to_string()),
            ));
        }
        return Ok(input.to_path_buf());
    }

    let mut matches = Vec::new();
    let paths = glob(&pattern).map_err(|err| {
        CliError::new(
            format!("invalid input pattern '{}'", pattern),
            Some(format!("pattern error: {}", err.msg)),
        )
    })?;
    for entry in paths {
        let path = entry.map_err(|err| {
            CliError::new(
                format!("invalid input pattern '{}'", pattern),
                Some(format!("pattern error: {}", err)),
            )
        })?;
        if path.is_file() {
            matches.push(path);
        }
    }

    if matches.is_empty() {
        return Err(CliError::new(
            format!("no files match pattern '{}'", pattern),
            Some("check the path or quote the pattern".to_string()),
        ));
    }
    if matches.len() > 1 {
        let hint = "pass a single recording file, or run once per file".to_string();
        let mut message = format!(
            "multiple files match pattern '{}' ({} matches)",
            pattern,
            matches.len()
        );
        let listed = matches
            .iter()
            .take(3)
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        message.push_str("; matches: ");
        message.push_str(&listed);
        if matches.len() > 3 {
            message.push_str(", ...");
        }
        return Err(CliError::new(message, Some(hint)));
    }

    Ok(matches.remove(0))
}

fn is_glob_pattern(input: &str) -> bool {
    input.contains('*') || input.contains('?') || input.contains('[')
}
