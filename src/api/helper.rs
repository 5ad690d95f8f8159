//! Purpose: Support routines for the dump tool: schemas, path probes, table picking,
//! column listing, accession resolution, cache probing, and small string helpers.
//! Exports: One free function per operation; see each item.
//! Role: Glue between the CLI and the store; most failures are logged at the point of origin.
//! Invariants: Probes and name searches answer `false`/`None` instead of failing.
//! Invariants: Accession results never carry a leading `ncbi-acc:`.
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::api::context::DumpContext;
use crate::core::cache::{CACHE_SUFFIX, CacheCompleteness, cache_completeness};
use crate::core::column::ColumnDef;
use crate::core::error::{Error, ErrorKind, io_error_kind};
use crate::core::manager::{Database, Manager, version_text};
use crate::core::paths;
use crate::core::resolver::{
    Query, RemoteMode, Resolver, ResolverConfig, VPath, strip_scheme,
};
use crate::core::schema::Schema;

pub const UNKNOWN_TABLE: &str = "unknown table";

/// Logs and returns the manager version as `major.minor.release`.
pub fn show_manager_version(manager: &Manager) -> String {
    let version = manager.version();
    let text = version_text(version);
    tracing::info!(version, "manager-version = {text}");
    text
}

/// Builds the schema for opening objects. `None` when nothing was requested.
///
/// The read-data profile comes first when `with_sra` is set; explicit files are parsed
/// on top in order. A file that fails to parse is logged and skipped.
pub fn parse_schema(
    manager: &Manager,
    schema_files: &[PathBuf],
    with_sra: bool,
) -> Result<Option<Schema>, Error> {
    let mut schema = None;
    if with_sra {
        let sra = manager.make_sra_schema().inspect_err(|err| {
            tracing::error!(error = %err, "failed to make read-data schema");
        })?;
        schema = Some(sra);
    }
    if !schema_files.is_empty() {
        let schema = schema.get_or_insert_with(|| manager.make_schema());
        for file in schema_files {
            if let Err(err) = schema.parse_file(file) {
                tracing::error!(file = %file.display(), error = %err, "failed to parse schema file");
            }
        }
    }
    Ok(schema)
}

pub fn is_path_table(manager: &Manager, path: &Path, schema_files: &[PathBuf]) -> bool {
    let Ok(schema) = parse_schema(manager, schema_files, false) else {
        return false;
    };
    manager.open_table_read(path, schema.as_ref()).is_ok()
}

pub fn is_path_database(manager: &Manager, path: &Path, schema_files: &[PathBuf]) -> bool {
    let Ok(schema) = parse_schema(manager, schema_files, false) else {
        return false;
    };
    manager.open_db_read(path, schema.as_ref()).is_ok()
}

/// A column lives at `<table>/col/<name>`, so its grandparent must be a table.
pub fn is_path_column(manager: &Manager, path: &str, schema_files: &[PathBuf]) -> bool {
    match paths::grandparent(path) {
        Ok(table) => is_path_table(manager, &table, schema_files),
        Err(err) => {
            tracing::error!(path, error = %err, "failed to resolve column path");
            false
        }
    }
}

/// Selects the first table name (store order) into the context.
pub fn take_first_table(ctx: &mut DumpContext, names: &[String]) -> bool {
    match names.first() {
        Some(name) => {
            ctx.set_table(name.clone());
            true
        }
        None => false,
    }
}

/// Exact, case-sensitive membership.
pub fn list_contains_value(names: &[String], value: &str) -> bool {
    names.iter().any(|name| name == value)
}

fn first_starting_with<'a>(names: &'a [String], prefix: &str) -> Option<&'a str> {
    let prefix = prefix.to_lowercase();
    names
        .iter()
        .find(|name| name.to_lowercase().starts_with(&prefix))
        .map(String::as_str)
}

/// Exact match first, then the first entry starting with `requested` (any case).
pub fn take_named_table(ctx: &mut DumpContext, names: &[String], requested: &str) -> bool {
    if list_contains_value(names, requested) {
        ctx.set_table(requested);
        return true;
    }
    match first_starting_with(names, requested) {
        Some(found) => {
            ctx.set_table(found);
            true
        }
        None => false,
    }
}

pub fn take_named_table_from_db(ctx: &mut DumpContext, db: &Database, requested: &str) -> bool {
    match db.list_tables() {
        Ok(names) => take_named_table(ctx, &names, requested),
        Err(err) => {
            tracing::error!(db = %db.path().display(), error = %err, "failed to list tables");
            false
        }
    }
}

/// Writes one column description: enumerated (`table.NN : ...`) or short.
pub fn print_col_info<W: Write>(
    ctx: &mut DumpContext,
    def: &ColumnDef,
    schema: Option<&Schema>,
    out: &mut W,
) -> Result<(), Error> {
    if ctx.column_enum_requested {
        print_full_col_info(ctx, def, schema, out)
    } else {
        print_short_col_info(def, schema, out)
    }
}

fn print_full_col_info<W: Write>(
    ctx: &mut DumpContext,
    def: &ColumnDef,
    schema: Option<&Schema>,
    out: &mut W,
) -> Result<(), Error> {
    let table = ctx
        .table
        .get_or_insert_with(|| UNKNOWN_TABLE.to_string())
        .clone();
    if table.is_empty() || def.name.is_empty() {
        if table.is_empty() {
            write!(out, "error: no table-name in print_column_info()").map_err(write_error)?;
        }
        if def.name.is_empty() {
            write!(out, "error: no column-name in print_column_info()").map_err(write_error)?;
        }
        return Ok(());
    }

    let idx = ctx.generic_idx;
    ctx.generic_idx += 1;
    let desc = &def.type_desc;
    write!(
        out,
        "{table}.{idx:02} : ({:03} bits [{:02}], {:>8})  {}",
        desc.intrinsic_bits, desc.intrinsic_dim, desc.domain, def.name
    )
    .map_err(write_error)?;
    if let Some(schema) = schema {
        let text = type_text(schema, def)?;
        write!(out, "\n      ({text})").map_err(write_error)?;
    }
    writeln!(out).map_err(write_error)
}

fn print_short_col_info<W: Write>(
    def: &ColumnDef,
    schema: Option<&Schema>,
    out: &mut W,
) -> Result<(), Error> {
    if def.name.is_empty() {
        return write!(out, "error: no column-name in print_column_info()").map_err(write_error);
    }
    write!(out, "{}", def.name).map_err(write_error)?;
    if let Some(schema) = schema {
        let text = type_text(schema, def)?;
        write!(out, " ({text})").map_err(write_error)?;
    }
    writeln!(out).map_err(write_error)
}

fn type_text(schema: &Schema, def: &ColumnDef) -> Result<String, Error> {
    schema.typedecl_to_text(&def.type_decl).inspect_err(|err| {
        tracing::error!(column = %def.name, error = %err, "failed to render type");
    })
}

fn write_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write column info")
        .with_source(err)
}

/// Remote location of `accession`, with remote lookups forced on.
pub fn resolve_remote_accession(config: &ResolverConfig, accession: &str) -> Result<String, Error> {
    let path = accession_path(accession)?;
    let mut resolver = Resolver::new(config.clone());
    resolver.remote_enable(RemoteMode::Always);
    let result = resolver.query(
        &path,
        Query {
            remote: true,
            ..Query::default()
        },
    );
    finish_resolution(accession, result.map(|found| found.remote))
}

/// Local location of `accession`, else its remote location when `remotely` is set.
///
/// The remote side is only consulted once the local lookup came back empty.
pub fn resolve_accession(
    config: &ResolverConfig,
    accession: &str,
    remotely: bool,
) -> Result<String, Error> {
    let path = accession_path(accession)?;
    let resolver = Resolver::new(config.clone());
    let local = resolver.query(
        &path,
        Query {
            local: true,
            ..Query::default()
        },
    );
    let found = match local {
        Ok(found) => Ok(found.local),
        Err(err) if remotely && err.kind() == ErrorKind::NotFound => resolver
            .query(
                &path,
                Query {
                    remote: true,
                    ..Query::default()
                },
            )
            .map(|found| found.remote),
        Err(err) => Err(err),
    };
    finish_resolution(accession, found)
}

/// Where `accession` would be cached, whether or not it is.
pub fn resolve_cache(config: &ResolverConfig, accession: &str) -> Result<String, Error> {
    let path = accession_path(accession)?;
    let resolver = Resolver::new(config.clone());
    let result = resolver.query(
        &path,
        Query {
            cache: true,
            ..Query::default()
        },
    );
    finish_resolution(accession, result.map(|found| found.cache))
}

fn accession_path(accession: &str) -> Result<VPath, Error> {
    VPath::from_accession(accession).inspect_err(|err| {
        tracing::error!(accession, error = %err, "failed to make accession path");
    })
}

fn finish_resolution(
    accession: &str,
    found: Result<Option<VPath>, Error>,
) -> Result<String, Error> {
    match found {
        Ok(Some(path)) => Ok(strip_scheme(&path.to_string()).to_string()),
        Ok(None) => Err(Error::new(ErrorKind::NotFound)
            .with_message(format!("accession '{accession}' did not resolve"))),
        Err(err) => {
            tracing::error!(accession, error = %err, "accession resolution failed");
            Err(err)
        }
    }
}

/// Share of `path` that is present locally. A plain file counts as complete;
/// a path that opens as neither file nor sidecar reports zeros.
pub fn check_cache_completeness(path: &str) -> Result<CacheCompleteness, Error> {
    if path.is_empty() {
        return Ok(CacheCompleteness::default());
    }
    let sidecar = format!("{path}{CACHE_SUFFIX}");
    if let Ok(mut file) = File::open(&sidecar) {
        return cache_completeness(&mut file).map_err(|err| err.with_path(&sidecar));
    }
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            tracing::debug!(path, error = %err, "no cached copy");
            return Ok(CacheCompleteness::default());
        }
    };
    let size = file
        .metadata()
        .map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to stat file")
                .with_path(path)
                .with_source(err)
        })?
        .len();
    Ok(CacheCompleteness {
        percent: 100.0,
        bytes_in_cache: size,
    })
}

/// Index of the first candidate equal to `word` ignoring case; `None` entries are skipped.
pub fn index_of_match(word: &str, candidates: &[Option<&str>]) -> Option<usize> {
    let word = word.to_lowercase();
    candidates.iter().position(|candidate| {
        candidate.is_some_and(|candidate| candidate.to_lowercase() == word)
    })
}

/// Splits on any char of `delims`, keeping only non-empty spans.
pub fn split_buffer(input: &str, delims: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut span = String::new();
    for ch in input.chars() {
        if delims.contains(ch) {
            if !span.is_empty() {
                parts.push(std::mem::take(&mut span));
            }
        } else {
            span.push(ch);
        }
    }
    if !span.is_empty() {
        parts.push(span);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{Domain, TypeDesc};
    use crate::core::writer::TableBuilder;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    fn def(name: &str, type_decl: &str, desc: TypeDesc) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            type_decl: type_decl.to_string(),
            type_desc: desc,
        }
    }

    #[test]
    fn split_drops_empty_spans() {
        assert_eq!(split_buffer("a,,b,", ","), vec!["a", "b"]);
        assert_eq!(split_buffer("x:y,z", ",:"), vec!["x", "y", "z"]);
        assert!(split_buffer(",,,", ",").is_empty());
        assert_eq!(split_buffer("abc", ""), vec!["abc"]);
    }

    #[test]
    fn match_is_whole_word_and_case_insensitive() {
        assert_eq!(index_of_match("TABLE", &[Some("table"), Some("other")]), Some(0));
        assert_eq!(index_of_match("tab", &[Some("table")]), None);
        assert_eq!(index_of_match("json", &[None, Some("fastq"), Some("JSON")]), Some(2));
        assert_eq!(index_of_match("x", &[]), None);
    }

    #[test]
    fn named_table_prefers_exact_match() {
        let list = names(&["SEQUENCE_X", "SEQUENCE"]);
        let mut ctx = DumpContext::new();
        assert!(take_named_table(&mut ctx, &list, "SEQUENCE"));
        assert_eq!(ctx.table(), Some("SEQUENCE"));
    }

    #[test]
    fn named_table_falls_back_to_first_prefix() {
        let list = names(&["PRIMARY_ALIGNMENT", "REFERENCE", "REF_X"]);
        let mut ctx = DumpContext::new();
        assert!(take_named_table(&mut ctx, &list, "ref"));
        assert_eq!(ctx.table(), Some("REFERENCE"));

        let mut ctx = DumpContext::new();
        assert!(!take_named_table(&mut ctx, &list, "SEQ"));
        assert_eq!(ctx.table(), None);
        assert!(!list_contains_value(&list, "reference"));
    }

    #[test]
    fn first_table_needs_entries() {
        let mut ctx = DumpContext::new();
        assert!(!take_first_table(&mut ctx, &[]));
        assert!(take_first_table(&mut ctx, &names(&["A", "B"])));
        assert_eq!(ctx.table(), Some("A"));
    }

    #[test]
    fn full_col_info_numbers_columns() {
        let mut ctx = DumpContext::new().with_enumeration(true);
        ctx.set_table("SEQUENCE");
        let schema = Schema::sra().expect("schema");
        let mut out = Vec::new();
        let read = def("READ", "INSDC:dna:text", TypeDesc::new(8, 1, Domain::Ascii));
        let lens = def("READ_LEN", "INSDC:coord:len", TypeDesc::new(32, 1, Domain::Uint));
        print_col_info(&mut ctx, &read, Some(&schema), &mut out).expect("first");
        print_col_info(&mut ctx, &lens, None, &mut out).expect("second");

        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(
            text,
            "SEQUENCE.01 : (008 bits [01],    ascii)  READ\n      (INSDC:dna:text)\n\
             SEQUENCE.02 : (032 bits [01],     uint)  READ_LEN\n"
        );
        assert_eq!(ctx.generic_idx, 3);
    }

    #[test]
    fn full_col_info_defaults_table_name() {
        let mut ctx = DumpContext::new().with_enumeration(true);
        let mut out = Vec::new();
        let col = def("X", "U8", TypeDesc::new(8, 1, Domain::Uint));
        print_col_info(&mut ctx, &col, None, &mut out).expect("print");
        assert_eq!(ctx.table(), Some(UNKNOWN_TABLE));
        assert!(String::from_utf8(out).expect("utf8").starts_with("unknown table.01 :"));
    }

    #[test]
    fn missing_names_print_inline_errors() {
        let mut ctx = DumpContext::new().with_enumeration(true);
        ctx.set_table("");
        let mut out = Vec::new();
        let col = def("", "U8", TypeDesc::new(8, 1, Domain::Uint));
        print_col_info(&mut ctx, &col, None, &mut out).expect("print");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "error: no table-name in print_column_info()error: no column-name in print_column_info()"
        );
        assert_eq!(ctx.generic_idx, 1);

        let mut short = DumpContext::new();
        let mut out = Vec::new();
        print_col_info(&mut short, &col, None, &mut out).expect("print");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "error: no column-name in print_column_info()"
        );
    }

    #[test]
    fn short_col_info_and_type_errors() {
        let mut ctx = DumpContext::new();
        let schema = Schema::sra().expect("schema");
        let mut out = Vec::new();
        let col = def("QUALITY", "INSDC:quality:phred", TypeDesc::new(8, 1, Domain::Uint));
        print_col_info(&mut ctx, &col, Some(&schema), &mut out).expect("print");
        print_col_info(&mut ctx, &col, None, &mut out).expect("print");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "QUALITY (INSDC:quality:phred)\nQUALITY\n"
        );

        let odd = def("ODD", "NO:such:type", TypeDesc::new(8, 1, Domain::Uint));
        let err = print_col_info(&mut ctx, &odd, Some(&schema), &mut Vec::new())
            .expect_err("unknown type");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn schema_composition_skips_bad_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let good = temp.path().join("good.vschema");
        let bad = temp.path().join("bad.vschema");
        std::fs::write(&good, "typedef U32 my:count;\n").expect("good");
        std::fs::write(&bad, "typedef U32 half:ok;\ntypedef NOPE broken;\n").expect("bad");
        let manager = Manager::new();

        assert!(parse_schema(&manager, &[], false).expect("none").is_none());
        let schema = parse_schema(&manager, &[bad.clone(), good.clone()], false)
            .expect("schema")
            .expect("some");
        assert!(schema.contains("my:count"));
        assert!(!schema.contains("half:ok"));
        assert!(!schema.contains("INSDC:dna:text"));

        let schema = parse_schema(&manager, &[good], true)
            .expect("schema")
            .expect("some");
        assert!(schema.contains("INSDC:dna:text"));
        assert!(schema.contains("my:count"));
    }

    #[test]
    fn overflowing_schema_file_does_not_stop_later_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let big = temp.path().join("big.vschema");
        std::fs::write(&big, "typedef U8[4294967295] big;\ntypedef big[2] bigger;\n")
            .expect("write");
        let good = temp.path().join("good.vschema");
        std::fs::write(&good, "typedef U32 my:count;\n").expect("write");

        let schema = parse_schema(&Manager::new(), &[big, good], false)
            .expect("schema")
            .expect("some");
        assert!(!schema.contains("big"));
        assert!(schema.contains("my:count"));
    }

    #[test]
    fn empty_cache_path_reports_zeros() {
        let result = check_cache_completeness("").expect("empty");
        assert_eq!(result, CacheCompleteness::default());
    }

    #[test]
    fn plain_file_counts_as_complete() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("SRR1.sra");
        std::fs::write(&path, vec![0u8; 123]).expect("write");
        let result = check_cache_completeness(path.to_str().expect("utf8")).expect("probe");
        assert_eq!(result.percent, 100.0);
        assert_eq!(result.bytes_in_cache, 123);

    }

    #[test]
    fn missing_cache_path_reports_zeros() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = temp.path().join("nope");
        let result = check_cache_completeness(missing.to_str().expect("utf8")).expect("missing");
        assert_eq!(result, CacheCompleteness::default());
    }

    #[test]
    fn cache_resolution_strips_scheme() {
        let config = ResolverConfig {
            repositories: vec![PathBuf::from("/repo")],
            cache_dir: None,
            ..ResolverConfig::default()
        };
        let path = resolve_cache(&config, "ncbi-acc:SRR1").expect("cache");
        assert_eq!(path, "/repo/sra/SRR1.sra");
        let remote = resolve_remote_accession(&config, "SRR1").expect("remote");
        assert_eq!(remote, "https://sra-pub-run-odp.s3.amazonaws.com/sra/SRR1/SRR1");
    }

    #[test]
    fn local_resolution_respects_remote_flag() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = ResolverConfig {
            repositories: vec![temp.path().to_path_buf()],
            ..ResolverConfig::default()
        };
        let err = resolve_accession(&config, "SRR2", false).expect_err("no local");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let remote = resolve_accession(&config, "SRR2", true).expect("remote");
        assert!(remote.ends_with("/sra/SRR2/SRR2"));

        std::fs::write(temp.path().join("SRR2.sra"), b"x").expect("write");
        let local = resolve_accession(&config, "SRR2", true).expect("local");
        assert_eq!(local, temp.path().join("SRR2.sra").display().to_string());
    }

    #[test]
    fn local_hit_skips_locator_even_when_remote_is_forced() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("SRR3.sra"), b"x").expect("write");
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.set_nonblocking(true).expect("nonblocking");
        let addr = listener.local_addr().expect("addr");
        let config = ResolverConfig {
            repositories: vec![temp.path().to_path_buf()],
            locator_url: Some(format!("http://{addr}/locate").parse().expect("url")),
            remote: RemoteMode::Always,
            ..ResolverConfig::default()
        };

        let local = resolve_accession(&config, "SRR3", true).expect("local");
        assert_eq!(local, temp.path().join("SRR3.sra").display().to_string());
        let pending = listener.accept().expect_err("no locator request");
        assert_eq!(pending.kind(), std::io::ErrorKind::WouldBlock);
    }

    #[test]
    fn column_probe_ignores_the_column_itself() {
        let temp = tempfile::tempdir().expect("tempdir");
        let table = temp.path().join("SRR4");
        let schema = Schema::primitives();
        let mut builder = TableBuilder::create(&table, &schema).expect("table");
        builder.add_column("IDS", "U64", 1).expect("column");
        builder.append_u64s("IDS", &[0]).expect("cell");
        builder.finish().expect("finish");

        let manager = Manager::new();
        let absent = table.join("col").join("NOPE");
        assert!(!absent.exists());
        assert!(is_path_column(&manager, absent.to_str().expect("utf8"), &[]));
        let stray = temp.path().join("elsewhere").join("col").join("IDS");
        assert!(!is_path_column(&manager, stray.to_str().expect("utf8"), &[]));
    }
}
