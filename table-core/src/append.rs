//! append.rs – writes rows below a table and grows its range.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use log::debug;

use crate::{
    CellRange, CellRef, CellWrite, CollectError, DataFormatter, Row, Table, XlsxWorkbook,
    extract::headers_in, format_range, reference::MAX_ROW, table::parse_table, write_part,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Rows written below the table.
    pub rows: usize,
    /// Table range after the append.
    pub new_range: CellRange,
}

/// Appends `rows` directly below `table`, mapping values by header text, and
/// extends the table's `ref` to cover them.
///
/// The table part is re-read first, so `table` may be a stale handle from an
/// earlier lookup. Header text is rendered with `formatter`, which must be the
/// one the rows were extracted with. Tables with a totals row are rejected.
pub fn append_rows(
    wb: &mut XlsxWorkbook,
    table: &Table,
    rows: &[Row],
    formatter: &DataFormatter,
) -> Result<AppendOutcome> {
    let table = parse_table(wb.require_part(&table.part_path)?, &table.part_path, &table.sheet)?;
    if table.totals_row_count > 0 {
        return Err(CollectError::TotalsRowUnsupported(table.name.clone()).into());
    }
    let range = table.range()?;
    if rows.is_empty() {
        return Ok(AppendOutcome { rows: 0, new_range: range });
    }

    let cells = wb.cells(&table.sheet)?;
    let headers = headers_in(wb, &table, &cells, formatter)?;

    let mut cursor = range.end.row;
    let mut writes = BTreeMap::new();
    for row in rows {
        cursor += 1;
        if cursor > MAX_ROW {
            return Err(CollectError::InvalidReference(format!(
                "{} would grow past the last worksheet row",
                table.name
            ))
            .into());
        }
        debug!("Writing keys: {:?}", row.headers().collect::<Vec<_>>());
        for (i, header) in headers.iter().enumerate() {
            let at = CellRef::new(cursor, range.start.col + i as u32);
            let write = CellWrite::coerce(row.get(header));
            debug!("{at}\t{header}\t{write:?}");
            writes.insert(at, write);
        }
    }

    let sheet_xml = write_part::apply_cell_writes(wb.require_part(&table.sheet.path)?, &writes)
        .with_context(|| format!("{}: cannot write rows", table.sheet.path))?;
    wb.put_part(&table.sheet.path, sheet_xml);

    let new_range: CellRange = format_range(range.start, cursor, range.end.col).parse()?;
    let updated = wb.set_table_range(&table, new_range)?;
    debug!(
        "appended {} rows to {}!{} -> {}",
        rows.len(),
        table.sheet.name,
        table.name,
        updated.reference()
    );
    Ok(AppendOutcome {
        rows: rows.len(),
        new_range: updated.range()?,
    })
}
