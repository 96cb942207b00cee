//! table.rs – table parts (`xl/tables/tableN.xml`): lookup and range edits.

use std::io::Cursor;

use anyhow::{Context, Result};
use log::debug;
use quick_xml::{
    Reader, Writer,
    events::{BytesStart, Event},
};

use crate::{CellRange, CollectError, SheetEntry, XlsxWorkbook, read_part::attr};

/// A table as declared by its table part.
///
/// `ref` is the only source of truth for the range: [`Table::range`] parses it
/// on every call, so a re-read table always reflects the latest edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub display_name: String,
    reference: String,
    pub header_row_count: u32,
    pub totals_row_count: u32,
    /// `<tableColumn name>` values in column order.
    pub columns: Vec<String>,
    pub part_path: String,
    pub sheet: SheetEntry,
}

impl Table {
    /// The `ref` attribute, e.g. `B2:D10`.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn range(&self) -> Result<CellRange> {
        self.reference.parse()
    }

    /// Tables are addressed by either `name` or `displayName`.
    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.display_name == name
    }
}

impl XlsxWorkbook {
    /// Tables of `sheet` in `<tableParts>` order.
    pub fn tables(&self, sheet: &SheetEntry) -> Result<Vec<Table>> {
        let ids = table_part_ids(self.require_part(&sheet.path)?)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rels = self.relationships(&sheet.path)?;
        let mut tables = Vec::with_capacity(ids.len());
        for id in ids {
            let rel = rels
                .iter()
                .find(|r| r.id == id)
                .with_context(|| format!("{}: table relationship {id} not found", sheet.path))?;
            let xml = self.require_part(&rel.target)?;
            tables.push(parse_table(xml, &rel.target, sheet)?);
        }
        Ok(tables)
    }

    /// Table `table_name` (by name or display name) on `sheet_name`, or the
    /// sheet's first table when no name is given.
    pub fn find_table(&self, sheet_name: &str, table_name: Option<&str>) -> Result<Table> {
        let sheet = self.sheet(sheet_name)?;
        let tables = self.tables(sheet)?;
        let found = match table_name {
            Some(name) => tables.into_iter().find(|t| t.matches(name)),
            None => tables.into_iter().next(),
        };
        found.ok_or_else(|| {
            CollectError::TableNotFound {
                sheet: sheet_name.to_owned(),
                table: table_name.unwrap_or("<first>").to_owned(),
            }
            .into()
        })
    }

    /// Points the table (and its auto-filter) at `range` and stores the
    /// patched part. Returns the table as it now reads.
    pub(crate) fn set_table_range(&mut self, table: &Table, range: CellRange) -> Result<Table> {
        let new_ref = range.to_string();
        let patched = rewrite_refs(self.require_part(&table.part_path)?, &new_ref)
            .with_context(|| format!("{}: cannot rewrite ref", table.part_path))?;
        self.put_part(&table.part_path, patched);
        debug!("table {} ref {} -> {}", table.name, table.reference, new_ref);

        let updated = parse_table(
            self.require_part(&table.part_path)?,
            &table.part_path,
            &table.sheet,
        )?;
        Ok(updated)
    }
}

/// `r:id` of every `<tablePart>` of a worksheet, in document order.
fn table_part_ids(sheet_xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(sheet_xml);
    reader.config_mut().trim_text(true);
    let mut ids = Vec::new();
    loop {
        match reader.read_event().context("worksheet: malformed xml")? {
            Event::Empty(ref e) | Event::Start(ref e) if e.local_name().as_ref() == b"tablePart" => {
                for a in e.attributes().with_checks(false).flatten() {
                    if a.key.prefix().is_some() && a.key.local_name().as_ref() == b"id" {
                        ids.push(a.unescape_value()?.into_owned());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(ids)
}

pub(crate) fn parse_table(xml: &[u8], part_path: &str, sheet: &SheetEntry) -> Result<Table> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut table: Option<Table> = None;
    let mut columns = Vec::new();
    loop {
        match reader.read_event().with_context(|| format!("{part_path}: malformed xml"))? {
            Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"table" => {
                let count = |name: &str, default: u32| -> Result<u32> {
                    Ok(attr(e, name)?.and_then(|v| v.trim().parse().ok()).unwrap_or(default))
                };
                let name = attr(e, "name")?.unwrap_or_default();
                table = Some(Table {
                    display_name: attr(e, "displayName")?.unwrap_or_else(|| name.clone()),
                    name,
                    reference: attr(e, "ref")?
                        .with_context(|| format!("{part_path}: table without ref"))?,
                    header_row_count: count("headerRowCount", 1)?,
                    totals_row_count: count("totalsRowCount", 0)?,
                    columns: Vec::new(),
                    part_path: part_path.to_owned(),
                    sheet: sheet.clone(),
                });
            }
            Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"tableColumn" => {
                columns.push(attr(e, "name")?.unwrap_or_default());
            }
            Event::Eof => break,
            _ => {}
        }
    }
    let mut table = table.with_context(|| format!("{part_path}: no <table> element"))?;
    table.columns = columns;
    Ok(table)
}

/// Copies the table part event by event, replacing `ref` on `<table>` and
/// `<autoFilter>`.
fn rewrite_refs(xml: &[u8], new_ref: &str) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Cursor::new(Vec::with_capacity(xml.len() + 16)));
    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) if has_range_ref(&e) => {
                writer.write_event(Event::Start(with_ref(&e, new_ref)))?
            }
            Event::Empty(e) if has_range_ref(&e) => {
                writer.write_event(Event::Empty(with_ref(&e, new_ref)))?
            }
            e => writer.write_event(e)?,
        }
    }
    Ok(writer.into_inner().into_inner())
}

fn has_range_ref(e: &BytesStart<'_>) -> bool {
    matches!(e.local_name().as_ref(), b"table" | b"autoFilter")
}

fn with_ref(e: &BytesStart<'_>, new_ref: &str) -> BytesStart<'static> {
    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for a in e.attributes().with_checks(false).flatten() {
        if a.key.as_ref() == b"ref" {
            out.push_attribute(("ref", new_ref));
        } else {
            out.push_attribute(a);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TABLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<table xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" id="1" name="テーブル1" displayName="Sales" ref="B2:D5" totalsRowShown="0"><autoFilter ref="B2:D5"/><tableColumns count="3"><tableColumn id="1" name="Name"/><tableColumn id="2" name="Qty &amp; Unit"/><tableColumn id="3" name="Price"/></tableColumns><tableStyleInfo name="TableStyleMedium2" showFirstColumn="0" showLastColumn="0" showRowStripes="1" showColumnStripes="0"/></table>"#;

    fn sheet() -> SheetEntry {
        SheetEntry {
            name: "Sheet1".into(),
            path: "xl/worksheets/sheet1.xml".into(),
        }
    }

    #[test]
    fn parses_table_part() -> Result<()> {
        let t = parse_table(TABLE_XML.as_bytes(), "xl/tables/table1.xml", &sheet())?;
        assert_eq!(t.name, "テーブル1");
        assert_eq!(t.display_name, "Sales");
        assert_eq!(t.reference(), "B2:D5");
        assert_eq!(t.header_row_count, 1);
        assert_eq!(t.totals_row_count, 0);
        assert_eq!(t.columns, vec!["Name", "Qty & Unit", "Price"]);
        assert!(t.matches("Sales") && t.matches("テーブル1") && !t.matches("Other"));
        Ok(())
    }

    #[test]
    fn rewrite_touches_only_refs() -> Result<()> {
        let out = rewrite_refs(TABLE_XML.as_bytes(), "B2:D9")?;
        let text = String::from_utf8(out.clone())?;
        assert_eq!(text.matches("ref=\"B2:D9\"").count(), 2);
        assert!(!text.contains("B2:D5"));
        assert!(text.contains("Qty &amp; Unit"));

        let t = parse_table(&out, "xl/tables/table1.xml", &sheet())?;
        assert_eq!(t.range()?.to_string(), "B2:D9");
        assert_eq!(t.columns.len(), 3);
        Ok(())
    }

    #[test]
    fn table_parts_in_document_order() -> Result<()> {
        let xml = br#"<worksheet xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheetData/><tableParts count="2"><tablePart r:id="rId3"/><tablePart r:id="rId1"/></tableParts></worksheet>"#;
        assert_eq!(table_part_ids(xml)?, vec!["rId3", "rId1"]);
        Ok(())
    }
}
