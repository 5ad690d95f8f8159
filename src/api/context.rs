// Per-session state threaded through the dump formatters.

/// Selected table and column numbering for one dump run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DumpContext {
    pub table: Option<String>,
    pub column_enum_requested: bool,
    pub generic_idx: u32,
}

impl Default for DumpContext {
    fn default() -> Self {
        Self {
            table: None,
            column_enum_requested: false,
            generic_idx: 1,
        }
    }
}

impl DumpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enumeration(mut self, enabled: bool) -> Self {
        self.column_enum_requested = enabled;
        self
    }

    pub fn set_table(&mut self, name: impl Into<String>) {
        self.table = Some(name.into());
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::DumpContext;

    #[test]
    fn counter_starts_at_one() {
        let ctx = DumpContext::new();
        assert_eq!(ctx.generic_idx, 1);
        assert_eq!(ctx.table(), None);
        assert!(!ctx.column_enum_requested);
        assert!(DumpContext::new().with_enumeration(true).column_enum_requested);
    }
}
