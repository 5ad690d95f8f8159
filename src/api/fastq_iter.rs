//! Purpose: Row iterator yielding FASTQ-ready records from a `SEQUENCE` table.
//! Exports: `FastqIter`, `FastqRecord`, `Fetched`, and the fixed column names.
//! Role: Feeds the `fastq` dump; records are caller-owned and refilled in place.
//! Invariants: Columns decode in fixed order and decoding stops at the first failure.
//! Invariants: `READ_LEN` is registered and decoded only in split mode.
use bstr::BString;

use crate::api::table_iter::{IterParams, TableIter};
use crate::core::cursor::ColumnId;
use crate::core::error::Error;
use crate::core::manager::Manager;

pub const SEQUENCE_TABLE: &str = "SEQUENCE";
pub const PRIMARY_ALIGNMENT_ID: &str = "PRIMARY_ALIGNMENT_ID";
pub const CMP_READ: &str = "CMP_READ";
pub const QUALITY: &str = "(INSDC:quality:text:phred_33)QUALITY";
pub const READ_LEN: &str = "READ_LEN";

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FastqRecord {
    pub row_id: i64,
    pub prim_alig_id: [u64; 2],
    /// Number of alignment ids the row held (1 or 2).
    pub num_reads: u32,
    /// Per-read lengths; only filled in split mode.
    pub read_len: Option<[u32; 2]>,
    pub cmp_read: BString,
    pub quality: BString,
}

/// Outcome of one [`FastqIter::next_into`] call.
#[derive(Debug)]
pub enum Fetched {
    End,
    Row,
    /// The row id is set but a column failed; later fields are stale.
    Damaged(Error),
}

impl Fetched {
    pub fn has_row(&self) -> bool {
        !matches!(self, Fetched::End)
    }
}

pub struct FastqIter {
    iter: TableIter,
    split: bool,
    prim_alig_id: ColumnId,
    cmp_read: ColumnId,
    quality: ColumnId,
    read_len: Option<ColumnId>,
}

impl FastqIter {
    pub fn open(manager: &Manager, params: &IterParams, split: bool) -> Result<Self, Error> {
        let mut iter = step("open SEQUENCE", TableIter::open(manager, params, SEQUENCE_TABLE))?;
        let prim_alig_id = step(PRIMARY_ALIGNMENT_ID, iter.add_column(PRIMARY_ALIGNMENT_ID))?;
        let cmp_read = step(CMP_READ, iter.add_column(CMP_READ))?;
        let quality = step(QUALITY, iter.add_column(QUALITY))?;
        let read_len = if split {
            Some(step(READ_LEN, iter.add_column(READ_LEN))?)
        } else {
            None
        };
        step("set range", iter.set_range(prim_alig_id))?;
        Ok(Self {
            iter,
            split,
            prim_alig_id,
            cmp_read,
            quality,
            read_len,
        })
    }

    pub fn split(&self) -> bool {
        self.split
    }

    pub fn row_count(&self) -> u64 {
        self.iter.row_count()
    }

    /// Advances and decodes the next row into `rec`.
    pub fn next_into(&mut self, rec: &mut FastqRecord) -> Result<Fetched, Error> {
        if !self.iter.next()? {
            return Ok(Fetched::End);
        }
        let Some(row_id) = self.iter.row_id() else {
            return Ok(Fetched::End);
        };
        rec.row_id = row_id;
        match self.decode(rec) {
            Ok(()) => Ok(Fetched::Row),
            Err(err) => {
                tracing::debug!(row_id, error = %err, "damaged row");
                Ok(Fetched::Damaged(err))
            }
        }
    }

    fn decode(&self, rec: &mut FastqRecord) -> Result<(), Error> {
        let mut ids = [0u64; 2];
        let count = self.iter.read_u64_array(self.prim_alig_id, &mut ids)?;
        rec.prim_alig_id = ids;
        rec.num_reads = count as u32;

        let read = self.iter.read_bytes(self.cmp_read)?;
        rec.cmp_read.clear();
        rec.cmp_read.extend_from_slice(&read);

        let quality = self.iter.read_bytes(self.quality)?;
        rec.quality.clear();
        rec.quality.extend_from_slice(&quality);

        rec.read_len = match self.read_len {
            Some(id) => {
                let mut lens = [0u32; 2];
                self.iter.read_u32_array(id, &mut lens)?;
                Some(lens)
            }
            None => None,
        };
        Ok(())
    }
}

fn step<T>(what: &str, result: Result<T, Error>) -> Result<T, Error> {
    result.inspect_err(|err| {
        tracing::error!(step = what, error = %err, "fastq iterator setup failed");
    })
}
