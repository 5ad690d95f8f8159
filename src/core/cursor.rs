// Random-access cursor over a set of registered table columns.
use std::borrow::Cow;

use crate::core::column::{ColumnData, ColumnDef, RowRange};
use crate::core::error::{Error, ErrorKind};
use crate::core::manager::Table;
use crate::core::schema::{QUALITY_PHRED, QUALITY_TEXT_PHRED_33, TypeDesc};

const PHRED_OFFSET: u8 = 33;
const PHRED_MAX: u8 = 93;

/// Handle issued by [`Cursor::add_column`]; indexes the cursor's column list.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ColumnId(u32);

impl ColumnId {
    pub fn index(&self) -> u32 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Cast {
    Identity,
    PhredToText,
    TextToPhred,
}

struct Registered {
    spec: String,
    desc: TypeDesc,
    cast: Cast,
    data: ColumnData,
}

pub struct Cursor {
    table: Table,
    columns: Vec<Registered>,
    opened: bool,
}

impl Cursor {
    pub(crate) fn new(table: Table) -> Self {
        Self {
            table,
            columns: Vec::new(),
            opened: false,
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Registers `NAME` or `(cast-type)NAME`.
    pub fn add_column(&mut self, spec: &str) -> Result<ColumnId, Error> {
        if self.opened {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("columns cannot be added to an open cursor"));
        }
        if self.columns.iter().any(|column| column.spec == spec) {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message(format!("column '{spec}' already added")));
        }
        let (cast_type, name) = parse_column_spec(spec)?;
        let data = self.table.open_column(name)?;
        let stored_desc = data.meta().desc;
        let (desc, cast) = match cast_type {
            None => (stored_desc, Cast::Identity),
            Some(target) => self.resolve_cast(&data.meta().type_decl, stored_desc, target)?,
        };
        let id = ColumnId(self.columns.len() as u32);
        self.columns.push(Registered {
            spec: spec.to_string(),
            desc,
            cast,
            data,
        });
        Ok(id)
    }

    pub fn open(&mut self) -> Result<(), Error> {
        if self.columns.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("cursor has no columns"));
        }
        self.opened = true;
        Ok(())
    }

    pub fn id_range(&self, id: ColumnId) -> Result<RowRange, Error> {
        Ok(self.registered(id)?.data.row_range())
    }

    /// Definition of a registered column, with the cast type applied.
    pub fn column_def(&self, id: ColumnId) -> Result<ColumnDef, Error> {
        let column = self.registered(id)?;
        let mut def = column.data.def();
        def.type_desc = column.desc;
        Ok(def)
    }

    pub fn read_bytes(&self, id: ColumnId, row_id: i64) -> Result<Cow<'_, [u8]>, Error> {
        self.ensure_open()?;
        let column = self.registered(id)?;
        let raw = column.data.cell(row_id)?;
        Ok(match column.cast {
            Cast::Identity => Cow::Borrowed(raw),
            Cast::PhredToText => Cow::Owned(
                raw.iter()
                    .map(|score| (*score).min(PHRED_MAX) + PHRED_OFFSET)
                    .collect(),
            ),
            Cast::TextToPhred => Cow::Owned(
                raw.iter()
                    .map(|ch| ch.saturating_sub(PHRED_OFFSET))
                    .collect(),
            ),
        })
    }

    /// Reads up to `out.len()` 64-bit elements; returns how many the cell held.
    pub fn read_u64_array(&self, id: ColumnId, row_id: i64, out: &mut [u64]) -> Result<usize, Error> {
        let cell = self.fixed_cell(id, row_id, 64, out.len())?;
        for (slot, chunk) in out.iter_mut().zip(cell.chunks_exact(8)) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            *slot = u64::from_le_bytes(buf);
        }
        Ok(cell.len() / 8)
    }

    /// Reads up to `out.len()` 32-bit elements; returns how many the cell held.
    pub fn read_u32_array(&self, id: ColumnId, row_id: i64, out: &mut [u32]) -> Result<usize, Error> {
        let cell = self.fixed_cell(id, row_id, 32, out.len())?;
        for (slot, chunk) in out.iter_mut().zip(cell.chunks_exact(4)) {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(chunk);
            *slot = u32::from_le_bytes(buf);
        }
        Ok(cell.len() / 4)
    }

    fn fixed_cell(
        &self,
        id: ColumnId,
        row_id: i64,
        bits: u32,
        capacity: usize,
    ) -> Result<Cow<'_, [u8]>, Error> {
        let column = self.registered(id)?;
        if column.desc.intrinsic_bits != bits {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "column '{}' holds {}-bit elements, not {bits}",
                column.spec, column.desc.intrinsic_bits
            )));
        }
        let cell = self.read_bytes(id, row_id)?;
        let width = (bits / 8) as usize;
        if cell.len() % width != 0 {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!("cell of '{}' is not a whole number of elements", column.spec))
                .with_row(row_id));
        }
        let count = cell.len() / width;
        if count > capacity {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!(
                    "cell of '{}' holds {count} elements, expected at most {capacity}",
                    column.spec
                ))
                .with_row(row_id));
        }
        Ok(cell)
    }

    fn resolve_cast(
        &self,
        stored_decl: &str,
        stored: TypeDesc,
        target: &str,
    ) -> Result<(TypeDesc, Cast), Error> {
        let schema = self.table.schema();
        let target_desc = schema.type_desc(target).ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message(format!("unknown cast type '{target}'"))
        })?;
        let target_text = schema.typedecl_to_text(target)?;
        let stored_text = schema
            .typedecl_to_text(stored_decl)
            .unwrap_or_else(|_| stored_decl.to_string());

        let cast = if target_text == stored_text {
            Cast::Identity
        } else if stored_text == QUALITY_PHRED && target_text == QUALITY_TEXT_PHRED_33 {
            Cast::PhredToText
        } else if stored_text == QUALITY_TEXT_PHRED_33 && target_text == QUALITY_PHRED {
            Cast::TextToPhred
        } else if target_desc
            .element_bits()
            .is_some_and(|bits| Some(bits) == stored.element_bits())
        {
            Cast::Identity
        } else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("cannot cast '{stored_text}' to '{target_text}'")));
        };
        Ok((target_desc, cast))
    }

    fn registered(&self, id: ColumnId) -> Result<&Registered, Error> {
        self.columns.get(id.0 as usize).ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message(format!("unknown column id {}", id.0))
        })
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if !self.opened {
            return Err(Error::new(ErrorKind::Usage).with_message("cursor is not open"));
        }
        Ok(())
    }
}

fn parse_column_spec(spec: &str) -> Result<(Option<&str>, &str), Error> {
    let spec = spec.trim();
    let (cast, name) = match spec.strip_prefix('(') {
        Some(rest) => {
            let close = rest.find(')').ok_or_else(|| {
                Error::new(ErrorKind::Usage).with_message(format!("unbalanced cast in '{spec}'"))
            })?;
            (Some(rest[..close].trim()), rest[close + 1..].trim())
        }
        None => (None, spec),
    };
    if name.is_empty() || cast.is_some_and(str::is_empty) {
        return Err(Error::new(ErrorKind::Usage).with_message(format!("invalid column '{spec}'")));
    }
    Ok((cast, name))
}
