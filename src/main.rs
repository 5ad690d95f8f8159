//! Purpose: `vdbdump` CLI entry point: argument parsing, logging setup, output envelopes.
//! Role: Binary crate root; parses args, builds resolver config, runs commands.
//! Invariants: Structured results go to stdout as JSON; records go to stdout as text or JSONL.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{
    CommandFactory, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use vdbdump::api::{Error, ErrorKind, to_exit_code};
use vdbdump::core::resolver::{RemoteMode, ResolverConfig, parse_locator_url};
use vdbdump::notice::{Notice, notice_json};

const LOG_ENV: &str = "VDBDUMP_LOG";

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint(clap_error_hint(&err)),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing(cli.verbose);
    let color_mode = cli.color;
    let config = resolver_config(&cli.resolver).map_err(|err| (err, color_mode))?;

    command_dispatch::dispatch_command(cli.command, config, color_mode)
        .map_err(add_corrupt_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "vdbdump",
    version,
    about = "Inspect and dump column-store tables of sequencing reads",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Sources are table or database directories, or accessions resolved through
local repositories (and, when allowed, a remote locator)."#,
    after_help = r#"EXAMPLES
  $ vdbdump info ./SRR000001
  $ vdbdump columns ./SRR000001 --enum --sra-schema
  $ vdbdump fastq SRR000001 --split --rows 10
  $ vdbdump resolve SRR000001 --remote-only

LEARN MORE
  $ vdbdump <command> --help
  Set VDBDUMP_LOG=debug for detailed logs on stderr."#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[command(flatten)]
    resolver: ResolverArgs,
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        global = true,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        global = true,
        help = "Raise log verbosity (repeatable); VDBDUMP_LOG overrides"
    )]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Default)]
struct ResolverArgs {
    #[arg(
        long = "repository",
        value_name = "DIR",
        global = true,
        help = "Local repository searched for accessions (repeatable; default: ~/ncbi/public)",
        value_hint = ValueHint::DirPath
    )]
    repositories: Vec<PathBuf>,
    #[arg(
        long = "cache-dir",
        value_name = "DIR",
        global = true,
        help = "Directory holding cached downloads",
        value_hint = ValueHint::DirPath
    )]
    cache_dir: Option<PathBuf>,
    #[arg(
        long = "resolver-url",
        value_name = "URL",
        global = true,
        help = "Locator service queried for remote locations"
    )]
    resolver_url: Option<String>,
    #[arg(
        long,
        value_enum,
        global = true,
        help = "When remote lookups are allowed: auto|always|never"
    )]
    remote: Option<RemoteModeCli>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum RemoteModeCli {
    Auto,
    Always,
    Never,
}

impl From<RemoteModeCli> for RemoteMode {
    fn from(value: RemoteModeCli) -> Self {
        match value {
            RemoteModeCli::Auto => RemoteMode::Auto,
            RemoteModeCli::Always => RemoteMode::Always,
            RemoteModeCli::Never => RemoteMode::Never,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Print version info",
        long_about = r#"Print the crate and manager version (JSON when stdout is not a terminal)."#
    )]
    Version,
    #[command(
        arg_required_else_help = true,
        about = "Report whether a path is a table, database, or column",
        after_help = r#"EXAMPLES
  $ vdbdump info ./SRR000001
  $ vdbdump info ./SRR000001/col/READ"#
    )]
    Info {
        #[arg(help = "Path to probe", value_hint = ValueHint::AnyPath)]
        path: String,
        #[arg(
            long,
            value_name = "FILES",
            help = "Schema files (repeatable; comma or colon separated)"
        )]
        schema: Vec<String>,
    },
    #[command(
        arg_required_else_help = true,
        about = "List the tables of a database",
        after_help = r#"EXAMPLES
  $ vdbdump tables ./SRZ000001
  $ vdbdump tables ./SRZ000001 --table seq"#
    )]
    Tables {
        #[arg(help = "Database path or accession")]
        db: String,
        #[arg(long, help = "Select this table (exact, else first case-insensitive prefix)")]
        table: Option<String>,
    },
    #[command(
        arg_required_else_help = true,
        about = "List the columns of a table",
        after_help = r#"EXAMPLES
  $ vdbdump columns ./SRR000001
  $ vdbdump columns ./SRZ000001 --table SEQUENCE --enum --sra-schema"#
    )]
    Columns {
        #[arg(help = "Table or database path, or accession")]
        path: String,
        #[arg(long, help = "Table to use when the path is a database (default: first)")]
        table: Option<String>,
        #[arg(long = "enum", help = "Numbered listing with bit width, dimension, and domain")]
        enumerate: bool,
        #[arg(
            long,
            value_name = "FILES",
            help = "Schema files (repeatable; comma or colon separated)"
        )]
        schema: Vec<String>,
        #[arg(long = "sra-schema", help = "Include the built-in read-data schema")]
        sra_schema: bool,
    },
    #[command(
        arg_required_else_help = true,
        about = "Resolve an accession to a path or URL",
        after_help = r#"EXAMPLES
  $ vdbdump resolve SRR000001
  $ vdbdump resolve SRR000001 --remote-only
  $ vdbdump resolve SRR000001 --cache"#
    )]
    Resolve {
        #[arg(help = "Accession, optionally prefixed with ncbi-acc:")]
        accession: String,
        #[arg(
            long = "remote-only",
            conflicts_with_all = ["cache", "local_only"],
            help = "Remote location only (lookups forced on)"
        )]
        remote_only: bool,
        #[arg(long, conflicts_with = "local_only", help = "Cache location, whether or not cached")]
        cache: bool,
        #[arg(long = "local-only", help = "Never fall back to a remote location")]
        local_only: bool,
    },
    #[command(
        arg_required_else_help = true,
        about = "Report how much of a file is present in the cache",
        after_help = r#"EXAMPLES
  $ vdbdump cache ~/ncbi/public/sra/SRR000001.sra"#
    )]
    Cache {
        #[arg(help = "File path; <path>.cache is inspected when present", value_hint = ValueHint::FilePath)]
        path: String,
    },
    #[command(
        arg_required_else_help = true,
        about = "Dump reads of a SEQUENCE table",
        after_help = r#"EXAMPLES
  $ vdbdump fastq ./SRR000001
  $ vdbdump fastq SRR000001 --split --first-row 100 --rows 10
  $ vdbdump fastq ./SRR000001 --format json --skip-damaged

NOTES
  - Databases are read through their SEQUENCE table.
  - Damaged rows stop the dump unless --skip-damaged is given."#
    )]
    Fastq {
        #[arg(help = "Table or database path, or accession")]
        source: String,
        #[arg(long, help = "Emit each read of a spot separately (uses READ_LEN)")]
        split: bool,
        #[arg(long = "first-row", help = "First row id to dump")]
        first_row: Option<i64>,
        #[arg(long, help = "Maximum number of rows to dump")]
        rows: Option<u64>,
        #[arg(long, default_value = "fastq", help = "Output format: fastq|json")]
        format: String,
        #[arg(long = "skip-damaged", help = "Report damaged rows as notices and continue")]
        skip_damaged: bool,
        #[arg(
            long,
            value_name = "FILES",
            help = "Schema files (repeatable; comma or colon separated)"
        )]
        schema: Vec<String>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ vdbdump completion bash > ~/.local/share/bash-completion/completions/vdbdump
  $ vdbdump completion zsh > ~/.zfunc/_vdbdump"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Environment first, then flags.
fn resolver_config(args: &ResolverArgs) -> Result<ResolverConfig, Error> {
    let mut config = ResolverConfig::from_env()?;
    if !args.repositories.is_empty() {
        config.repositories = args.repositories.clone();
    }
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if let Some(url) = &args.resolver_url {
        config.locator_url = Some(parse_locator_url(url)?);
    }
    if let Some(mode) = args.remote {
        config.remote = mode.into();
    }
    tracing::debug!(
        repositories = ?config.repositories,
        cache_dir = ?config.cache_dir,
        remote = config.remote.as_str(),
        "resolver config"
    );
    Ok(config)
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => {
            err.with_hint("Permission denied. Check file and directory permissions.")
        }
        ErrorKind::Busy => {
            err.with_hint("Another writer holds the lock on this object. Retry later.")
        }
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and network."),
        _ => err,
    }
}

fn add_corrupt_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Corrupt || err.hint().is_some() {
        return err;
    }
    err.with_hint("Data appears corrupt. Re-fetch the object or use --skip-damaged for dumps.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with VDBDUMP_LOG=debug and share the output if it persists.",
    )
}

fn emit_version_output(manager_version: &str) {
    if io::stdout().is_terminal() {
        println!("vdbdump {} (manager {manager_version})", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json(
            json!({
                "name": "vdbdump",
                "version": env!("CARGO_PKG_VERSION"),
                "manager_version": manager_version,
            }),
        );
    }
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn notice_time_now() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {} (source: {})", notice.message, notice.source);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Corrupt => "corrupt data".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(row) = err.row() {
        inner.insert("row".to_string(), json!(row));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(row) = err.row() {
        lines.push(format!(
            "{} {row}",
            colorize_label("row:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);
    let Some(usage) = usage else {
        return "Try `vdbdump --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "vdbdump") else {
        return "Try `vdbdump --help`.".to_string();
    };
    let parts: Vec<&str> = tokens
        .iter()
        .skip(pos + 1)
        .take_while(|token| {
            !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
        })
        .copied()
        .collect();
    if parts.is_empty() {
        return "Try `vdbdump --help`.".to_string();
    }
    format!("Try `vdbdump {} --help`.", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, RemoteModeCli, error_json, resolver_config};
    use clap::Parser;
    use vdbdump::api::{Error, ErrorKind};
    use vdbdump::core::resolver::RemoteMode;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "vdbdump",
            "resolve",
            "SRR1",
            "--repository",
            "/a",
            "--repository",
            "/b",
            "--remote",
            "never",
        ])
        .expect("parse");
        assert_eq!(cli.resolver.repositories.len(), 2);
        assert_eq!(cli.resolver.remote, Some(RemoteModeCli::Never));
        assert!(matches!(cli.command, Command::Resolve { .. }));

        let config = resolver_config(&cli.resolver).expect("config");
        assert_eq!(config.remote, RemoteMode::Never);
        assert_eq!(config.repositories[1].to_str(), Some("/b"));
    }

    #[test]
    fn resolve_flags_conflict() {
        assert!(
            Cli::try_parse_from(["vdbdump", "resolve", "SRR1", "--remote-only", "--cache"]).is_err()
        );
        assert!(Cli::try_parse_from(["vdbdump", "resolve", "SRR1", "--remote-only"]).is_ok());
        assert!(
            Cli::try_parse_from(["vdbdump", "resolve", "SRR1", "--cache", "--local-only"]).is_err()
        );
    }

    #[test]
    fn error_json_carries_row() {
        let err = Error::new(ErrorKind::Corrupt)
            .with_message("bad cell")
            .with_row(42);
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "Corrupt");
        assert_eq!(value["error"]["row"], 42);
    }
}
