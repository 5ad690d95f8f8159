// Table and database creation in the directory layout read by `Manager`.
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::core::column::{COLUMN_DATA, COLUMN_INDEX, COLUMN_META, ColumnMeta};
use crate::core::error::{Error, ErrorKind, io_error_kind};
use crate::core::manager::{COLUMN_DIR, DATABASE_MANIFEST, Manifest, TABLE_DIR, TABLE_MANIFEST};
use crate::core::schema::Schema;

const LOCK_FILE: &str = ".lock";

struct PendingColumn {
    meta: ColumnMeta,
    offsets: Vec<u64>,
    data: Vec<u8>,
}

pub struct TableBuilder {
    path: PathBuf,
    schema: Schema,
    schema_name: Option<String>,
    columns: BTreeMap<String, PendingColumn>,
    _lock: DirLock,
}

impl TableBuilder {
    pub fn create(path: impl AsRef<Path>, schema: &Schema) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        ensure_absent(&path, TABLE_MANIFEST)?;
        create_dir(&path.join(COLUMN_DIR))?;
        let lock = DirLock::acquire(&path)?;
        Ok(Self {
            path,
            schema: schema.clone(),
            schema_name: None,
            columns: BTreeMap::new(),
            _lock: lock,
        })
    }

    /// Records the table type name in the manifest.
    pub fn with_schema_name(mut self, name: impl Into<String>) -> Self {
        self.schema_name = Some(name.into());
        self
    }

    pub fn add_column(&mut self, name: &str, type_decl: &str, first_row: i64) -> Result<(), Error> {
        if name.is_empty() || name.contains(['/', '\\', '(', ')']) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid column name '{name}'")));
        }
        if self.columns.contains_key(name) {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message(format!("column '{name}' already defined")));
        }
        let desc = self.schema.type_desc(type_decl).ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message(format!("unknown type '{type_decl}'"))
        })?;
        self.columns.insert(
            name.to_string(),
            PendingColumn {
                meta: ColumnMeta {
                    type_decl: type_decl.to_string(),
                    desc,
                    first_row,
                },
                offsets: vec![0],
                data: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn append_cell(&mut self, name: &str, bytes: &[u8]) -> Result<(), Error> {
        let column = self.pending(name)?;
        column.data.extend_from_slice(bytes);
        column.offsets.push(column.data.len() as u64);
        Ok(())
    }

    pub fn append_u64s(&mut self, name: &str, values: &[u64]) -> Result<(), Error> {
        self.check_bits(name, 64)?;
        let bytes: Vec<u8> = values.iter().flat_map(|value| value.to_le_bytes()).collect();
        self.append_cell(name, &bytes)
    }

    pub fn append_u32s(&mut self, name: &str, values: &[u32]) -> Result<(), Error> {
        self.check_bits(name, 32)?;
        let bytes: Vec<u8> = values.iter().flat_map(|value| value.to_le_bytes()).collect();
        self.append_cell(name, &bytes)
    }

    /// Writes every column, then the manifest that makes the table openable.
    pub fn finish(self) -> Result<PathBuf, Error> {
        for (name, column) in &self.columns {
            let dir = self.path.join(COLUMN_DIR).join(name);
            create_dir(&dir)?;
            let meta = serde_json::to_vec_pretty(&column.meta).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode column metadata")
                    .with_source(err)
            })?;
            write_file(&dir.join(COLUMN_META), &meta)?;
            let index: Vec<u8> = column
                .offsets
                .iter()
                .flat_map(|offset| offset.to_le_bytes())
                .collect();
            write_file(&dir.join(COLUMN_INDEX), &index)?;
            write_file(&dir.join(COLUMN_DATA), &column.data)?;
        }
        write_manifest(&self.path, TABLE_MANIFEST, &Manifest::table(self.schema_name.clone()))?;
        Ok(self.path.clone())
    }

    fn pending(&mut self, name: &str) -> Result<&mut PendingColumn, Error> {
        self.columns.get_mut(name).ok_or_else(|| {
            Error::new(ErrorKind::NotFound).with_message(format!("column '{name}' not defined"))
        })
    }

    fn check_bits(&mut self, name: &str, bits: u32) -> Result<(), Error> {
        let column = self.pending(name)?;
        if column.meta.desc.intrinsic_bits != bits {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "column '{name}' holds {}-bit elements, not {bits}",
                column.meta.desc.intrinsic_bits
            )));
        }
        Ok(())
    }
}

pub struct DatabaseBuilder {
    path: PathBuf,
    schema_name: Option<String>,
    _lock: DirLock,
}

impl DatabaseBuilder {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        ensure_absent(&path, DATABASE_MANIFEST)?;
        create_dir(&path.join(TABLE_DIR))?;
        let lock = DirLock::acquire(&path)?;
        Ok(Self {
            path,
            schema_name: None,
            _lock: lock,
        })
    }

    pub fn with_schema_name(mut self, name: impl Into<String>) -> Self {
        self.schema_name = Some(name.into());
        self
    }

    pub fn create_table(&self, name: &str, schema: &Schema) -> Result<TableBuilder, Error> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid table name '{name}'")));
        }
        TableBuilder::create(self.path.join(TABLE_DIR).join(name), schema)
    }

    pub fn finish(self) -> Result<PathBuf, Error> {
        write_manifest(
            &self.path,
            DATABASE_MANIFEST,
            &Manifest::database(self.schema_name.clone()),
        )?;
        Ok(self.path.clone())
    }
}

/// Exclusive advisory lock on a directory being written; released on drop.
struct DirLock {
    file: File,
}

impl DirLock {
    fn acquire(dir: &Path) -> Result<Self, Error> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::new(io_error_kind(&err)).with_path(&path).with_source(err))?;
        file.try_lock_exclusive().map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("another writer holds this directory")
                .with_path(dir)
                .with_source(err)
        })?;
        Ok(Self { file })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

fn ensure_absent(dir: &Path, manifest: &str) -> Result<(), Error> {
    if dir.join(manifest).exists() {
        return Err(Error::new(ErrorKind::AlreadyExists)
            .with_message("target already holds a finished object")
            .with_path(dir));
    }
    Ok(())
}

fn create_dir(dir: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(dir).map_err(|err| {
        Error::new(io_error_kind(&err))
            .with_message("failed to create directory")
            .with_path(dir)
            .with_source(err)
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    std::fs::write(path, bytes).map_err(|err| {
        Error::new(io_error_kind(&err))
            .with_message("failed to write file")
            .with_path(path)
            .with_source(err)
    })
}

fn write_manifest(dir: &Path, file: &str, manifest: &Manifest) -> Result<(), Error> {
    let bytes = serde_json::to_vec_pretty(manifest).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode manifest")
            .with_source(err)
    })?;
    write_file(&dir.join(file), &bytes)
}

#[cfg(test)]
mod tests {
    use super::{DatabaseBuilder, TableBuilder, lock_error_kind};
    use crate::core::error::ErrorKind;
    use crate::core::manager::Manager;
    use crate::core::schema::Schema;

    #[test]
    fn finished_table_opens_with_its_columns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("SRR1");
        let schema = Schema::sra().expect("schema");
        let mut builder = TableBuilder::create(&path, &schema)
            .expect("builder")
            .with_schema_name("NCBI:SRA:tbl:sra");
        builder.add_column("READ", "INSDC:dna:text", 1).expect("column");
        builder.append_cell("READ", b"ACGT").expect("cell");
        builder.finish().expect("finish");

        let table = Manager::new().open_table_read(&path, None).expect("open");
        assert_eq!(table.list_columns().expect("columns"), vec!["READ"]);
        let def = table.column_def("READ").expect("def");
        assert_eq!(def.type_decl, "INSDC:dna:text");
        assert_eq!(def.type_desc.intrinsic_bits, 8);
    }

    #[test]
    fn unfinished_table_does_not_open() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("SRR2");
        let schema = Schema::sra().expect("schema");
        let builder = TableBuilder::create(&path, &schema).expect("builder");

        assert!(Manager::new().open_table_read(&path, None).is_err());
        drop(builder);
    }

    #[test]
    fn second_writer_is_busy() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("SRR3");
        let schema = Schema::primitives();
        let _first = TableBuilder::create(&path, &schema).expect("first");
        let err = TableBuilder::create(&path, &schema).err().expect("second");
        assert_eq!(err.kind(), ErrorKind::Busy);
    }

    #[test]
    fn column_definitions_are_validated() {
        let temp = tempfile::tempdir().expect("tempdir");
        let schema = Schema::primitives();
        let mut builder = TableBuilder::create(temp.path().join("t"), &schema).expect("builder");
        builder.add_column("IDS", "U64", 1).expect("ids");
        assert_eq!(
            builder.add_column("IDS", "U64", 1).expect_err("dup").kind(),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            builder.add_column("X", "INSDC:dna:text", 1).expect_err("type").kind(),
            ErrorKind::Usage
        );
        assert_eq!(
            builder.add_column("a/b", "U8", 1).expect_err("name").kind(),
            ErrorKind::Usage
        );
        assert_eq!(
            builder.append_u32s("IDS", &[1]).expect_err("width").kind(),
            ErrorKind::Usage
        );
        assert_eq!(
            builder.append_cell("NOPE", b"x").expect_err("missing").kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn finished_objects_are_not_overwritten() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("db");
        let builder = DatabaseBuilder::create(&path).expect("db");
        builder.finish().expect("finish");
        let err = DatabaseBuilder::create(&path).err().expect("exists");
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn lock_errors_map_to_expected_kinds() {
        let err = std::io::Error::from_raw_os_error(libc::EAGAIN);
        assert_eq!(lock_error_kind(&err), ErrorKind::Busy);

        let err = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(lock_error_kind(&err), ErrorKind::Permission);

        let err = std::io::Error::from_raw_os_error(libc::EBADF);
        assert_eq!(lock_error_kind(&err), ErrorKind::Io);
    }
}
