//! Purpose: Generic row iterator over one table, shared by the record iterators.
//! Exports: `IterParams`, `TableIter`.
//! Role: Opens a table (directly or as a database member), registers columns, walks rows.
//! Invariants: Columns are registered before `set_range`; rows are read only after it.
//! Invariants: Iteration covers `[first, first + count)` of the range column, narrowed by params.
use std::borrow::Cow;
use std::path::PathBuf;

use crate::core::column::RowRange;
use crate::core::cursor::{ColumnId, Cursor};
use crate::core::error::{Error, ErrorKind};
use crate::core::manager::Manager;
use crate::core::schema::Schema;

#[derive(Clone, Debug, Default)]
pub struct IterParams {
    pub source: PathBuf,
    pub schema: Option<Schema>,
    /// Defaults to the first row of the range column.
    pub first_row: Option<i64>,
    /// Defaults to every row up to the end of the range column.
    pub row_count: Option<u64>,
}

impl IterParams {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }
}

pub struct TableIter {
    cursor: Cursor,
    first_row: Option<i64>,
    row_count: Option<u64>,
    range: Option<RowRange>,
    next_row: i64,
    current: Option<i64>,
}

impl TableIter {
    /// Opens `table_name` inside a database source, or the source itself when it is a table.
    pub fn open(manager: &Manager, params: &IterParams, table_name: &str) -> Result<Self, Error> {
        let schema = params.schema.as_ref();
        let table = match manager.open_db_read(&params.source, schema) {
            Ok(db) => db.open_table_read(table_name).inspect_err(|err| {
                tracing::error!(table = table_name, error = %err, "failed to open database table");
            })?,
            Err(_) => manager
                .open_table_read(&params.source, schema)
                .inspect_err(|err| {
                    tracing::error!(
                        source = %params.source.display(),
                        error = %err,
                        "failed to open table"
                    );
                })?,
        };
        Ok(Self {
            cursor: table.create_cursor(),
            first_row: params.first_row,
            row_count: params.row_count,
            range: None,
            next_row: 0,
            current: None,
        })
    }

    pub fn add_column(&mut self, spec: &str) -> Result<ColumnId, Error> {
        self.cursor.add_column(spec).inspect_err(|err| {
            tracing::error!(column = spec, error = %err, "failed to add column");
        })
    }

    /// Opens the cursor and fixes the iteration range from `id`'s rows.
    pub fn set_range(&mut self, id: ColumnId) -> Result<RowRange, Error> {
        self.cursor.open()?;
        let column = self.cursor.id_range(id)?;
        let first = self.first_row.unwrap_or(column.first);
        if first < column.first {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "first row {first} precedes the first stored row {}",
                    column.first
                ))
                .with_row(first));
        }
        let available = column
            .end()
            .checked_sub(first)
            .and_then(|rows| u64::try_from(rows).ok())
            .unwrap_or(0);
        let count = self.row_count.map_or(available, |n| n.min(available));
        let range = RowRange::new(first, count);
        tracing::debug!(first = range.first, count = range.count, "iteration range");
        self.range = Some(range);
        self.next_row = first;
        self.current = None;
        Ok(range)
    }

    /// Advances to the next row; `false` once the range is exhausted.
    pub fn next(&mut self) -> Result<bool, Error> {
        let range = self.range.ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message("iteration range not set")
        })?;
        if self.next_row < range.end() {
            self.current = Some(self.next_row);
            self.next_row += 1;
            Ok(true)
        } else {
            self.current = None;
            Ok(false)
        }
    }

    pub fn row_id(&self) -> Option<i64> {
        self.current
    }

    pub fn row_count(&self) -> u64 {
        self.range.map_or(0, |range| range.count)
    }

    pub fn range(&self) -> Option<RowRange> {
        self.range
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn read_bytes(&self, id: ColumnId) -> Result<Cow<'_, [u8]>, Error> {
        let row = self.current_row()?;
        self.cursor
            .read_bytes(id, row)
            .map_err(|err| with_row(err, row))
    }

    pub fn read_u64_array(&self, id: ColumnId, out: &mut [u64]) -> Result<usize, Error> {
        let row = self.current_row()?;
        self.cursor
            .read_u64_array(id, row, out)
            .map_err(|err| with_row(err, row))
    }

    pub fn read_u32_array(&self, id: ColumnId, out: &mut [u32]) -> Result<usize, Error> {
        let row = self.current_row()?;
        self.cursor
            .read_u32_array(id, row, out)
            .map_err(|err| with_row(err, row))
    }

    fn current_row(&self) -> Result<i64, Error> {
        self.current
            .ok_or_else(|| Error::new(ErrorKind::Usage).with_message("no current row"))
    }
}

fn with_row(err: Error, row: i64) -> Error {
    if err.row().is_some() {
        err
    } else {
        err.with_row(row)
    }
}
