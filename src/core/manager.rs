// Entry point into the directory-backed store: schemas, tables, and databases.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::column::{self, ColumnData, ColumnDef};
use crate::core::cursor::Cursor;
use crate::core::error::{Error, ErrorKind, io_error_kind};
use crate::core::schema::Schema;

pub const TABLE_MANIFEST: &str = "tbl.json";
pub const DATABASE_MANIFEST: &str = "db.json";
pub const COLUMN_DIR: &str = "col";
pub const TABLE_DIR: &str = "tbl";
pub const TABLE_FORMAT: &str = "vdbdump-table";
pub const DATABASE_FORMAT: &str = "vdbdump-database";
pub const LAYOUT_VERSION: u32 = 1;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format: String,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl Manifest {
    pub fn table(schema: Option<String>) -> Self {
        Self {
            format: TABLE_FORMAT.to_string(),
            version: LAYOUT_VERSION,
            schema,
        }
    }

    pub fn database(schema: Option<String>) -> Self {
        Self {
            format: DATABASE_FORMAT.to_string(),
            version: LAYOUT_VERSION,
            schema,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Manager {
    _private: (),
}

impl Manager {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Packed as `major << 24 | minor << 16 | release`.
    pub fn version(&self) -> u32 {
        let major: u32 = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0);
        let minor: u32 = env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0);
        let release: u32 = env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0);
        (major << 24) | ((minor & 0xFF) << 16) | (release & 0xFFFF)
    }

    pub fn make_schema(&self) -> Schema {
        Schema::primitives()
    }

    pub fn make_sra_schema(&self) -> Result<Schema, Error> {
        Schema::sra()
    }

    pub fn open_table_read(
        &self,
        path: impl AsRef<Path>,
        schema: Option<&Schema>,
    ) -> Result<Table, Error> {
        let path = path.as_ref();
        read_manifest(path, TABLE_MANIFEST, TABLE_FORMAT)?;
        let schema = self.object_schema(schema)?;
        Ok(Table {
            path: path.to_path_buf(),
            name: dir_name(path),
            schema,
        })
    }

    pub fn open_db_read(
        &self,
        path: impl AsRef<Path>,
        schema: Option<&Schema>,
    ) -> Result<Database, Error> {
        let path = path.as_ref();
        read_manifest(path, DATABASE_MANIFEST, DATABASE_FORMAT)?;
        let schema = self.object_schema(schema)?;
        Ok(Database {
            path: path.to_path_buf(),
            schema,
        })
    }

    // Stored objects always carry the read-data profile; a caller schema extends it.
    fn object_schema(&self, extra: Option<&Schema>) -> Result<Schema, Error> {
        let mut schema = self.make_sra_schema()?;
        if let Some(extra) = extra {
            schema.merge(extra);
        }
        Ok(schema)
    }
}

/// Formats a packed manager version as `major.minor.release`.
pub fn version_text(version: u32) -> String {
    format!(
        "{}.{}.{}",
        version >> 24,
        (version >> 16) & 0xFF,
        version & 0xFFFF
    )
}

#[derive(Clone, Debug)]
pub struct Table {
    path: PathBuf,
    name: String,
    schema: Schema,
}

impl Table {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Column names in sorted order.
    pub fn list_columns(&self) -> Result<Vec<String>, Error> {
        list_dir_names(&self.path.join(COLUMN_DIR))
    }

    pub fn column_def(&self, name: &str) -> Result<ColumnDef, Error> {
        let meta = column::read_meta(&self.column_path(name))?;
        Ok(ColumnDef {
            name: name.to_string(),
            type_decl: meta.type_decl,
            type_desc: meta.desc,
        })
    }

    pub fn column_defs(&self) -> Result<Vec<ColumnDef>, Error> {
        self.list_columns()?
            .iter()
            .map(|name| self.column_def(name))
            .collect()
    }

    pub fn create_cursor(&self) -> Cursor {
        Cursor::new(self.clone())
    }

    pub(crate) fn column_path(&self, name: &str) -> PathBuf {
        self.path.join(COLUMN_DIR).join(name)
    }

    pub(crate) fn open_column(&self, name: &str) -> Result<ColumnData, Error> {
        let dir = self.column_path(name);
        if !dir.is_dir() {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message(format!("column '{name}' not found"))
                .with_path(&self.path));
        }
        ColumnData::open(&dir, name)
    }
}

#[derive(Clone, Debug)]
pub struct Database {
    path: PathBuf,
    schema: Schema,
}

impl Database {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Table names in sorted order.
    pub fn list_tables(&self) -> Result<Vec<String>, Error> {
        list_dir_names(&self.path.join(TABLE_DIR))
    }

    pub fn open_table_read(&self, name: &str) -> Result<Table, Error> {
        let path = self.path.join(TABLE_DIR).join(name);
        read_manifest(&path, TABLE_MANIFEST, TABLE_FORMAT)?;
        Ok(Table {
            path,
            name: name.to_string(),
            schema: self.schema.clone(),
        })
    }
}

fn read_manifest(dir: &Path, file: &str, format: &str) -> Result<Manifest, Error> {
    let path = dir.join(file);
    let text = std::fs::read_to_string(&path).map_err(|err| {
        Error::new(io_error_kind(&err))
            .with_message(format!("no {format} manifest"))
            .with_path(dir)
            .with_source(err)
    })?;
    let manifest: Manifest = serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Corrupt)
            .with_message("invalid manifest")
            .with_path(&path)
            .with_source(err)
    })?;
    if manifest.format != format {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("expected {format}, found {}", manifest.format))
            .with_path(dir));
    }
    if manifest.version != LAYOUT_VERSION {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("unsupported layout version {}", manifest.version))
            .with_path(dir));
    }
    Ok(manifest)
}

fn list_dir_names(dir: &Path) -> Result<Vec<String>, Error> {
    let entries = std::fs::read_dir(dir).map_err(|err| {
        Error::new(io_error_kind(&err))
            .with_message("failed to read directory")
            .with_path(dir)
            .with_source(err)
    })?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read directory entry")
                .with_path(dir)
                .with_source(err)
        })?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{DATABASE_MANIFEST, Manager, Manifest, TABLE_MANIFEST, version_text};
    use crate::core::error::ErrorKind;

    fn write_manifest(dir: &std::path::Path, file: &str, manifest: &Manifest) {
        std::fs::create_dir_all(dir).expect("mkdir");
        std::fs::write(dir.join(file), serde_json::to_vec(manifest).expect("json"))
            .expect("manifest");
    }

    #[test]
    fn version_text_unpacks_fields() {
        assert_eq!(version_text(0x0302_0010), "3.2.16");
        let manager = Manager::new();
        let text = version_text(manager.version());
        assert_eq!(text, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn table_and_database_do_not_cross_open() {
        let temp = tempfile::tempdir().expect("tempdir");
        let table = temp.path().join("SRR1");
        let db = temp.path().join("SRZ1");
        write_manifest(&table, TABLE_MANIFEST, &Manifest::table(None));
        write_manifest(&db, DATABASE_MANIFEST, &Manifest::database(None));

        let manager = Manager::new();
        assert!(manager.open_table_read(&table, None).is_ok());
        assert!(manager.open_db_read(&db, None).is_ok());
        let err = manager.open_table_read(&db, None).expect_err("db is not a table");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(manager.open_db_read(&table, None).is_err());
    }

    #[test]
    fn wrong_format_is_usage_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("odd");
        write_manifest(&dir, TABLE_MANIFEST, &Manifest::database(None));

        let err = Manager::new()
            .open_table_read(&dir, None)
            .expect_err("format mismatch");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn database_lists_tables_sorted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let db = temp.path().join("db");
        write_manifest(&db, DATABASE_MANIFEST, &Manifest::database(None));
        for name in ["SEQUENCE", "PRIMARY_ALIGNMENT", "REFERENCE"] {
            write_manifest(&db.join("tbl").join(name), TABLE_MANIFEST, &Manifest::table(None));
        }

        let database = Manager::new().open_db_read(&db, None).expect("open db");
        let names = database.list_tables().expect("list");
        assert_eq!(names, vec!["PRIMARY_ALIGNMENT", "REFERENCE", "SEQUENCE"]);
        let table = database.open_table_read("SEQUENCE").expect("table");
        assert_eq!(table.name(), "SEQUENCE");
    }
}
