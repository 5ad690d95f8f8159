//! Purpose: Hold top-level CLI command dispatch for `vdbdump`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Sources that are not existing paths are resolved as accessions.
//! Invariants: Damaged rows stop a dump unless skipping was requested.

use std::io::{BufWriter, Write};
use std::path::Path;

use vdbdump::api::helper::{
    check_cache_completeness, index_of_match, is_path_column, is_path_database,
    is_path_table, parse_schema, print_col_info, resolve_accession, resolve_cache,
    resolve_remote_accession, show_manager_version, split_buffer, take_first_table,
    take_named_table, take_named_table_from_db,
};
use vdbdump::api::{DumpContext, FastqIter, FastqRecord, Fetched, IterParams};
use vdbdump::core::manager::Manager;

use super::*;

const SCHEMA_LIST_DELIMS: &str = ",:";
const OUTPUT_FORMATS: [Option<&str>; 2] = [Some("fastq"), Some("json")];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum OutputFormat {
    Fastq,
    Json,
}

pub(super) fn dispatch_command(
    command: Command,
    config: ResolverConfig,
    color_mode: ColorMode,
) -> Result<RunOutcome, Error> {
    let manager = Manager::new();
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "vdbdump", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            let text = show_manager_version(&manager);
            emit_version_output(&text);
            Ok(RunOutcome::ok())
        }
        Command::Info { path, schema } => {
            let files = schema_files(&schema);
            let target = Path::new(&path);
            let kind = if is_path_database(&manager, target, &files) {
                "database"
            } else if is_path_table(&manager, target, &files) {
                "table"
            } else if is_path_column(&manager, &path, &files) {
                "column"
            } else {
                "unknown"
            };
            emit_json(json!({ "path": path, "kind": kind }));
            Ok(RunOutcome::ok())
        }
        Command::Tables { db, table } => {
            let source = resolve_source(&db, &config)?;
            let database = manager.open_db_read(&source, None)?;
            let names = database.list_tables()?;
            let mut ctx = DumpContext::new();
            let found = match &table {
                Some(requested) => take_named_table(&mut ctx, &names, requested),
                None => take_first_table(&mut ctx, &names),
            };
            if let (false, Some(requested)) = (found, &table) {
                return Err(Error::new(ErrorKind::NotFound)
                    .with_message(format!("no table matches '{requested}'"))
                    .with_path(&source));
            }
            emit_json(json!({ "tables": names, "selected": ctx.table }));
            Ok(RunOutcome::ok())
        }
        Command::Columns {
            path,
            table,
            enumerate,
            schema,
            sra_schema,
        } => {
            let files = schema_files(&schema);
            let composed = parse_schema(&manager, &files, sra_schema)?;
            let source = resolve_source(&path, &config)?;
            let mut ctx = DumpContext::new().with_enumeration(enumerate);

            let opened = if is_path_database(&manager, &source, &[]) {
                let db = manager.open_db_read(&source, composed.as_ref())?;
                let found = match &table {
                    Some(requested) => take_named_table_from_db(&mut ctx, &db, requested),
                    None => take_first_table(&mut ctx, &db.list_tables()?),
                };
                let Some(name) = ctx.table.clone().filter(|_| found) else {
                    return Err(Error::new(ErrorKind::NotFound)
                        .with_message("no matching table in database")
                        .with_path(&source));
                };
                db.open_table_read(&name)?
            } else {
                let opened = manager.open_table_read(&source, composed.as_ref())?;
                ctx.set_table(opened.name());
                opened
            };

            let type_schema = composed.as_ref().map(|_| opened.schema());
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            for def in opened.column_defs()? {
                print_col_info(&mut ctx, &def, type_schema, &mut out)?;
            }
            flush(&mut out)?;
            Ok(RunOutcome::ok())
        }
        Command::Resolve {
            accession,
            remote_only,
            cache,
            local_only,
        } => {
            let path = if remote_only {
                resolve_remote_accession(&config, &accession)?
            } else if cache {
                resolve_cache(&config, &accession)?
            } else {
                resolve_accession(&config, &accession, !local_only)?
            };
            emit_json(json!({ "accession": accession, "path": path }));
            Ok(RunOutcome::ok())
        }
        Command::Cache { path } => {
            let result = check_cache_completeness(&path)?;
            emit_json(json!({
                "path": path,
                "percent": result.percent,
                "bytes": result.bytes_in_cache,
            }));
            Ok(RunOutcome::ok())
        }
        Command::Fastq {
            source,
            split,
            first_row,
            rows,
            format,
            skip_damaged,
            schema,
        } => {
            let format = parse_output_format(&format)?;
            let files = schema_files(&schema);
            let params = IterParams {
                source: resolve_source(&source, &config)?,
                schema: parse_schema(&manager, &files, false)?,
                first_row,
                row_count: rows,
            };
            let label = source_label(&source);
            let mut iter = FastqIter::open(&manager, &params, split)?;
            tracing::info!(rows = iter.row_count(), split, "dumping reads");

            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            let mut rec = FastqRecord::default();
            let mut skipped = 0u64;
            loop {
                let damage = match iter.next_into(&mut rec)? {
                    Fetched::End => break,
                    Fetched::Row => match write_record(&mut out, &label, &rec, split, format) {
                        Ok(()) => continue,
                        Err(err) if err.kind() == ErrorKind::Corrupt => err,
                        Err(err) => return Err(err),
                    },
                    Fetched::Damaged(err) => err,
                };
                if !skip_damaged {
                    flush(&mut out)?;
                    return Err(damage.with_hint("Use --skip-damaged to continue past bad rows."));
                }
                skipped += 1;
                emit_notice(&damaged_row_notice(&label, rec.row_id, &damage), color_mode);
            }
            flush(&mut out)?;
            if skipped > 0 {
                tracing::warn!(skipped, "damaged rows skipped");
            }
            Ok(RunOutcome::ok())
        }
    }
}

/// Expands repeated, delimiter-separated `--schema` values.
fn schema_files(values: &[String]) -> Vec<PathBuf> {
    values
        .iter()
        .flat_map(|value| split_buffer(value, SCHEMA_LIST_DELIMS))
        .map(PathBuf::from)
        .collect()
}

fn parse_output_format(value: &str) -> Result<OutputFormat, Error> {
    match index_of_match(value, &OUTPUT_FORMATS) {
        Some(0) => Ok(OutputFormat::Fastq),
        Some(_) => Ok(OutputFormat::Json),
        None => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("unknown format '{value}'"))
            .with_hint("Use --format fastq or --format json.")),
    }
}

/// Existing paths are used as is; anything else is resolved as an accession.
fn resolve_source(source: &str, config: &ResolverConfig) -> Result<PathBuf, Error> {
    let path = Path::new(source);
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    let remote_allowed = config.remote != RemoteMode::Never;
    let resolved = resolve_accession(config, source, remote_allowed).map_err(|err| {
        if err.hint().is_some() {
            err
        } else {
            err.with_hint("Pass an existing table/database path or a resolvable accession.")
        }
    })?;
    if resolved.starts_with("http://") || resolved.starts_with("https://") {
        return Err(Error::new(ErrorKind::NotFound)
            .with_message(format!("'{source}' is only available remotely"))
            .with_path(resolved)
            .with_hint("Download it into a repository (see --repository) and retry."));
    }
    Ok(PathBuf::from(resolved))
}

fn source_label(source: &str) -> String {
    let stripped = vdbdump::core::resolver::strip_scheme(source);
    Path::new(stripped)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| stripped.to_string())
}

fn write_record<W: Write>(
    out: &mut W,
    label: &str,
    rec: &FastqRecord,
    split: bool,
    format: OutputFormat,
) -> Result<(), Error> {
    match format {
        OutputFormat::Json => {
            let value = json!({
                "row_id": rec.row_id,
                "prim_alig_id": rec.prim_alig_id,
                "num_reads": rec.num_reads,
                "read_len": rec.read_len,
                "cmp_read": rec.cmp_read.to_string(),
                "quality": rec.quality.to_string(),
            });
            writeln!(out, "{value}").map_err(write_error)
        }
        OutputFormat::Fastq if split => write_split_fastq(out, label, rec),
        OutputFormat::Fastq => {
            let name = format!("{label}.{}", rec.row_id);
            write_fastq(out, &name, &rec.cmp_read, &rec.quality)
        }
    }
}

/// Unaligned reads (alignment id 0) are stored back to back in `CMP_READ`.
fn write_split_fastq<W: Write>(out: &mut W, label: &str, rec: &FastqRecord) -> Result<(), Error> {
    let lens = rec.read_len.unwrap_or_default();
    let mut offset = 0usize;
    for read in 0..(rec.num_reads as usize).min(2) {
        if rec.prim_alig_id[read] != 0 {
            continue;
        }
        let len = lens[read] as usize;
        let end = offset + len;
        if end > rec.cmp_read.len() || end > rec.quality.len() {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!(
                    "read {} needs {end} bases, row holds {}",
                    read + 1,
                    rec.cmp_read.len()
                ))
                .with_row(rec.row_id));
        }
        if len > 0 {
            let name = format!("{label}.{}/{}", rec.row_id, read + 1);
            write_fastq(out, &name, &rec.cmp_read[offset..end], &rec.quality[offset..end])?;
        }
        offset = end;
    }
    Ok(())
}

fn write_fastq<W: Write>(out: &mut W, name: &str, bases: &[u8], quality: &[u8]) -> Result<(), Error> {
    let mut chunk = Vec::with_capacity(name.len() + bases.len() + quality.len() + 8);
    chunk.push(b'@');
    chunk.extend_from_slice(name.as_bytes());
    chunk.push(b'\n');
    chunk.extend_from_slice(bases);
    chunk.extend_from_slice(b"\n+\n");
    chunk.extend_from_slice(quality);
    chunk.push(b'\n');
    out.write_all(&chunk).map_err(write_error)
}

fn damaged_row_notice(source: &str, row_id: i64, err: &Error) -> Notice {
    Notice::damaged_row("fastq", source, row_id, notice_time_now().unwrap_or_default())
        .with_error(&format!("{:?}", err.kind()), &error_message(err))
}

fn flush<W: Write>(out: &mut W) -> Result<(), Error> {
    out.flush().map_err(write_error)
}

fn write_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write output")
        .with_source(err)
}
