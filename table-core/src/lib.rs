//! table-core — in-memory xlsx package editing focused on worksheet tables:
//! reading table rows, appending rows below a table and growing its range.

mod append;
mod cell;
mod discover;
mod error;
mod extract;
mod files_part;
mod format;
mod read_part;
mod reference;
pub mod style;
mod table;
mod write_part;

#[cfg(any(test, feature = "test-support"))]
pub mod fixture;
mod test;

use std::path::PathBuf;

pub use append::{AppendOutcome, append_rows};
pub use cell::{CellType, CellValue, CellWrite, Row};
pub use discover::list_workbooks;
pub use error::CollectError;
pub use extract::{read_table, read_tables, table_headers};
pub use format::{DataFormatter, Locale};
pub use read_part::{Cell, SheetCells};
pub use reference::{CellRange, CellRef, col_index, col_letter, format_range};
pub use table::Table;

/// A workbook loaded fully into memory. Parts are kept in archive order;
/// parts touched by an edit live in `new_files` until `save`.
pub struct XlsxWorkbook {
    src_path: PathBuf,
    parts: Vec<(String, Vec<u8>)>,
    new_files: Vec<(String, Vec<u8>)>,
    workbook_path: String,
    sheets: Vec<SheetEntry>,
    shared_strings: Vec<String>,
    styles: style::Styles,
}

/// `<sheet>` entry of workbook.xml resolved to its worksheet part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetEntry {
    pub name: String,
    pub path: String,
}

impl XlsxWorkbook {
    pub fn src_path(&self) -> &std::path::Path {
        &self.src_path
    }

    pub fn sheets(&self) -> &[SheetEntry] {
        &self.sheets
    }

    pub fn sheet(&self, name: &str) -> anyhow::Result<&SheetEntry> {
        self.sheets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| CollectError::SheetNotFound(name.to_owned()).into())
    }

    pub fn styles(&self) -> &style::Styles {
        &self.styles
    }

    /// Parses the cells of a worksheet from its current (possibly edited) XML.
    pub fn cells(&self, sheet: &SheetEntry) -> anyhow::Result<SheetCells> {
        let xml = self.require_part(&sheet.path)?;
        read_part::parse_sheet_cells(xml, &self.shared_strings)
    }
}
