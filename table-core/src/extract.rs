//! extract.rs – table rows as header → value maps.

use anyhow::Result;
use log::debug;

use crate::{CellRef, CellValue, DataFormatter, Row, SheetCells, Table, XlsxWorkbook};

/// Header texts of `table`, one per column of its range.
pub fn table_headers(wb: &XlsxWorkbook, table: &Table, formatter: &DataFormatter) -> Result<Vec<String>> {
    let cells = wb.cells(&table.sheet)?;
    headers_in(wb, table, &cells, formatter)
}

/// Data rows of a single table.
pub fn read_table(wb: &XlsxWorkbook, table: &Table, formatter: &DataFormatter) -> Result<Vec<Row>> {
    let cells = wb.cells(&table.sheet)?;
    rows_in(wb, table, &cells, formatter)
}

/// Rows of every table named in `allow` (by name or display name), sheets in
/// workbook order and tables in `<tableParts>` order.
pub fn read_tables<S: AsRef<str>>(
    wb: &XlsxWorkbook,
    allow: &[S],
    formatter: &DataFormatter,
) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    for sheet in wb.sheets() {
        let tables: Vec<Table> = wb
            .tables(sheet)?
            .into_iter()
            .filter(|t| allow.iter().any(|a| t.matches(a.as_ref())))
            .collect();
        if tables.is_empty() {
            continue;
        }
        let cells = wb.cells(sheet)?;
        for table in &tables {
            let found = rows_in(wb, table, &cells, formatter)?;
            debug!(
                "{}: {}!{} ({}) -> {} rows",
                wb.src_path().display(),
                sheet.name,
                table.name,
                table.reference(),
                found.len()
            );
            for row in &found {
                for (header, value) in row.iter() {
                    debug!("{header}\t{}", value.value);
                }
            }
            rows.extend(found);
        }
    }
    Ok(rows)
}

pub(crate) fn headers_in(
    wb: &XlsxWorkbook,
    table: &Table,
    cells: &SheetCells,
    formatter: &DataFormatter,
) -> Result<Vec<String>> {
    let range = table.range()?;
    let declared = |i: usize| table.columns.get(i).cloned().unwrap_or_default();
    if table.header_row_count == 0 {
        return Ok((0..range.width() as usize).map(declared).collect());
    }
    Ok((0..range.width())
        .map(|i| {
            let at = CellRef::new(range.start.row, range.start.col + i);
            let text = formatter.format_cell(cells.get(at), wb.styles());
            if text.is_empty() { declared(i as usize) } else { text }
        })
        .collect())
}

pub(crate) fn rows_in(
    wb: &XlsxWorkbook,
    table: &Table,
    cells: &SheetCells,
    formatter: &DataFormatter,
) -> Result<Vec<Row>> {
    let range = table.range()?;
    let headers = headers_in(wb, table, cells, formatter)?;

    let first = range.start.row + table.header_row_count;
    let Some(last) = (range.end.row + 1).checked_sub(table.totals_row_count + 1) else {
        return Ok(Vec::new());
    };
    if first > last {
        return Ok(Vec::new());
    }

    let mut rows = Vec::with_capacity((last - first + 1) as usize);
    for r in first..=last {
        let mut row = Row::new();
        for (i, header) in headers.iter().enumerate() {
            let at = CellRef::new(r, range.start.col + i as u32);
            let value = match cells.get(at) {
                Some(cell) => CellValue::new(cell.kind, formatter.format_cell(Some(cell), wb.styles())),
                None => CellValue::blank(),
            };
            row.insert(header.as_str(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}
