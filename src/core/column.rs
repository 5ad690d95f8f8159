// Column directories: metadata, offset index, and memory-mapped cell data.
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, io_error_kind};
use crate::core::schema::TypeDesc;

pub const COLUMN_META: &str = "meta.json";
pub const COLUMN_INDEX: &str = "idx";
pub const COLUMN_DATA: &str = "data";
const OFFSET_LEN: usize = 8;

/// Persisted description of one column.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub type_decl: String,
    #[serde(flatten)]
    pub desc: TypeDesc,
    pub first_row: i64,
}

/// Column name plus its declared and physical type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub type_decl: String,
    pub type_desc: TypeDesc,
}

/// Half-open row id range `[first, first + count)`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RowRange {
    pub first: i64,
    pub count: u64,
}

impl RowRange {
    pub fn new(first: i64, count: u64) -> Self {
        Self { first, count }
    }

    pub fn end(&self) -> i64 {
        self.first.saturating_add(self.count as i64)
    }

    pub fn contains(&self, row_id: i64) -> bool {
        row_id >= self.first && row_id < self.end()
    }
}

enum Mapped {
    Empty,
    Map(Mmap),
}

impl Mapped {
    fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to open column file")
                .with_path(path)
                .with_source(err)
        })?;
        let len = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
        if len == 0 {
            return Ok(Mapped::Empty);
        }
        // Column files are written once by the table builder and never modified in place.
        let map = unsafe {
            Mmap::map(&file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?
        };
        Ok(Mapped::Map(map))
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            Mapped::Empty => &[],
            Mapped::Map(map) => map,
        }
    }
}

pub(crate) struct ColumnData {
    dir: PathBuf,
    name: String,
    meta: ColumnMeta,
    index: Mapped,
    data: Mapped,
}

impl ColumnData {
    pub(crate) fn open(dir: &Path, name: &str) -> Result<Self, Error> {
        let meta = read_meta(dir)?;
        let index = Mapped::open(&dir.join(COLUMN_INDEX))?;
        let len = index.as_slice().len();
        if len == 0 || len % OFFSET_LEN != 0 {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("column index has invalid length")
                .with_path(dir.join(COLUMN_INDEX)));
        }
        let data = Mapped::open(&dir.join(COLUMN_DATA))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            meta,
            index,
            data,
        })
    }

    pub(crate) fn meta(&self) -> &ColumnMeta {
        &self.meta
    }

    pub(crate) fn def(&self) -> ColumnDef {
        ColumnDef {
            name: self.name.clone(),
            type_decl: self.meta.type_decl.clone(),
            type_desc: self.meta.desc,
        }
    }

    pub(crate) fn row_range(&self) -> RowRange {
        let rows = (self.index.as_slice().len() / OFFSET_LEN - 1) as u64;
        RowRange::new(self.meta.first_row, rows)
    }

    pub(crate) fn cell(&self, row_id: i64) -> Result<&[u8], Error> {
        let range = self.row_range();
        if !range.contains(row_id) {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message(format!("row outside column '{}'", self.name))
                .with_path(&self.dir)
                .with_row(row_id));
        }
        let slot = (row_id - range.first) as usize;
        let index = self.index.as_slice();
        let start = read_offset(index, slot);
        let end = read_offset(index, slot + 1);
        let data = self.data.as_slice();
        if start > end || end > data.len() as u64 {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("cell offsets out of bounds")
                .with_path(&self.dir)
                .with_row(row_id));
        }
        Ok(&data[start as usize..end as usize])
    }
}

fn read_offset(index: &[u8], slot: usize) -> u64 {
    let start = slot * OFFSET_LEN;
    let mut out = [0u8; OFFSET_LEN];
    out.copy_from_slice(&index[start..start + OFFSET_LEN]);
    u64::from_le_bytes(out)
}

pub(crate) fn read_meta(dir: &Path) -> Result<ColumnMeta, Error> {
    let path = dir.join(COLUMN_META);
    let text = std::fs::read_to_string(&path).map_err(|err| {
        Error::new(io_error_kind(&err))
            .with_message("failed to read column metadata")
            .with_path(&path)
            .with_source(err)
    })?;
    serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Corrupt)
            .with_message("invalid column metadata")
            .with_path(&path)
            .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use super::{COLUMN_DATA, COLUMN_INDEX, COLUMN_META, ColumnData, ColumnMeta, RowRange};
    use crate::core::error::ErrorKind;
    use crate::core::schema::{Domain, TypeDesc};
    use std::path::Path;

    fn write_column(dir: &Path, first_row: i64, offsets: &[u64], data: &[u8]) {
        std::fs::create_dir_all(dir).expect("mkdir");
        let meta = ColumnMeta {
            type_decl: "ascii".to_string(),
            desc: TypeDesc::new(8, 1, Domain::Ascii),
            first_row,
        };
        std::fs::write(dir.join(COLUMN_META), serde_json::to_vec(&meta).expect("json"))
            .expect("meta");
        let index: Vec<u8> = offsets.iter().flat_map(|off| off.to_le_bytes()).collect();
        std::fs::write(dir.join(COLUMN_INDEX), index).expect("idx");
        std::fs::write(dir.join(COLUMN_DATA), data).expect("data");
    }

    #[test]
    fn cells_follow_offsets() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("NAME");
        write_column(&dir, 5, &[0, 3, 3, 5], b"abcde");

        let column = ColumnData::open(&dir, "NAME").expect("open");
        assert_eq!(column.row_range(), RowRange::new(5, 3));
        assert_eq!(column.cell(5).expect("row 5"), b"abc");
        assert_eq!(column.cell(6).expect("row 6"), b"");
        assert_eq!(column.cell(7).expect("row 7"), b"de");
        let err = column.cell(8).expect_err("past end");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.row(), Some(8));
    }

    #[test]
    fn empty_column_has_no_rows() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("EMPTY");
        write_column(&dir, 1, &[0], b"");

        let column = ColumnData::open(&dir, "EMPTY").expect("open");
        assert_eq!(column.row_range().count, 0);
        assert!(column.cell(1).is_err());
    }

    #[test]
    fn offsets_past_data_are_corrupt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("BAD");
        write_column(&dir, 1, &[0, 10], b"abc");

        let column = ColumnData::open(&dir, "BAD").expect("open");
        let err = column.cell(1).expect_err("corrupt");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn missing_index_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("NOIDX");
        write_column(&dir, 1, &[0], b"");
        std::fs::remove_file(dir.join(COLUMN_INDEX)).expect("rm");

        let err = ColumnData::open(&dir, "NOIDX").err().expect("missing idx");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
