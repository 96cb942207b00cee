//! write_part.rs – applies a batch of cell writes to worksheet XML.
//!
//! One ordered pass over the sheet: existing rows are patched in place,
//! missing rows are created in row order, `<dimension>` is widened. Everything
//! else is copied through unchanged. New elements take the prefix of
//! `<sheetData>`, so `x:`-prefixed worksheets stay in one namespace.

use std::{
    collections::{BTreeMap, btree_map},
    io::Cursor,
    iter::Peekable,
};

use anyhow::{Context, Result};
use quick_xml::{
    Reader, Writer,
    events::{BytesEnd, BytesStart, BytesText, Event},
};

use crate::{CellRange, CellRef, CellWrite, read_part::attr};

type PendingRows<'w> = Peekable<btree_map::IntoIter<u32, Vec<(u32, &'w CellWrite)>>>;

pub(crate) fn apply_cell_writes(xml: &[u8], writes: &BTreeMap<CellRef, CellWrite>) -> Result<Vec<u8>> {
    if writes.is_empty() {
        return Ok(xml.to_vec());
    }

    // CellRef orders by row, then column
    let mut by_row: BTreeMap<u32, Vec<(u32, &CellWrite)>> = BTreeMap::new();
    for (at, w) in writes {
        by_row.entry(at.row).or_default().push((at.col, w));
    }
    let bounds = writes
        .keys()
        .fold(None::<CellRange>, |acc, &c| {
            Some(acc.map_or(CellRange::new(c, c), |r| r.expand_to(c)))
        });
    let mut pending: PendingRows<'_> = by_row.into_iter().peekable();

    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Cursor::new(Vec::with_capacity(xml.len() + writes.len() * 64)));

    let mut in_sheet_data = false;
    let mut prefix = String::new();
    let mut last_row: Option<u32> = None;
    loop {
        match reader.read_event().context("worksheet: malformed xml")? {
            Event::Eof => break,

            Event::Empty(e) if e.local_name().as_ref() == b"dimension" => {
                writer.write_event(Event::Empty(widen_dimension(&e, bounds)?))?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"dimension" => {
                writer.write_event(Event::Start(widen_dimension(&e, bounds)?))?;
            }

            Event::Start(e) if e.local_name().as_ref() == b"sheetData" => {
                prefix = prefix_of(&e);
                writer.write_event(Event::Start(e))?;
                in_sheet_data = true;
            }
            // <sheetData/>: nothing to patch, every row is new
            Event::Empty(e) if e.local_name().as_ref() == b"sheetData" => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                prefix = prefix_of(&e);
                writer.write_event(Event::Start(e))?;
                flush_rows(&mut writer, &mut pending, None, &prefix)?;
                writer.write_event(Event::End(BytesEnd::new(name)))?;
            }
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => {
                flush_rows(&mut writer, &mut pending, None, &prefix)?;
                writer.write_event(Event::End(e))?;
                in_sheet_data = false;
            }

            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                let r = row_index(&e, last_row)?;
                last_row = Some(r);
                flush_rows(&mut writer, &mut pending, Some(r), &prefix)?;
                match pending.next_if(|(pr, _)| *pr == r) {
                    Some((_, cells)) => {
                        let children = read_row_children(&mut reader)?;
                        write_patched_row(&mut writer, &e, r, children, &cells, &prefix)?;
                    }
                    None => writer.write_event(Event::Start(e))?,
                }
            }
            Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                let r = row_index(&e, last_row)?;
                last_row = Some(r);
                flush_rows(&mut writer, &mut pending, Some(r), &prefix)?;
                match pending.next_if(|(pr, _)| *pr == r) {
                    Some((_, cells)) => {
                        write_patched_row(&mut writer, &e, r, Vec::new(), &cells, &prefix)?
                    }
                    None => writer.write_event(Event::Empty(e))?,
                }
            }

            e => writer.write_event(e)?,
        }
    }
    Ok(writer.into_inner().into_inner())
}

/// 0-based index of a `<row>`; rows without `r` follow the previous one.
fn row_index(e: &BytesStart<'_>, last_row: Option<u32>) -> Result<u32> {
    match attr(e, "r")? {
        Some(r) => Ok(r
            .trim()
            .parse::<u32>()
            .with_context(|| format!("bad row number `{r}`"))?
            .saturating_sub(1)),
        None => Ok(last_row.map_or(0, |l| l + 1)),
    }
}

/// `x:` for `<x:sheetData>`, empty for the default namespace.
fn prefix_of(e: &BytesStart<'_>) -> String {
    match e.name().prefix() {
        Some(p) => format!("{}:", String::from_utf8_lossy(p.as_ref())),
        None => String::new(),
    }
}

/// Writes queued rows with an index below `before` (all of them for `None`).
fn flush_rows<W: std::io::Write>(
    writer: &mut Writer<W>,
    pending: &mut PendingRows<'_>,
    before: Option<u32>,
    prefix: &str,
) -> Result<()> {
    while let Some((r, cells)) = pending.next_if(|(r, _)| before.is_none_or(|b| *r < b)) {
        writer
            .create_element(format!("{prefix}row"))
            .with_attribute(("r", (r + 1).to_string().as_str()))
            .write_inner_content(|w| {
                for &(col, value) in &cells {
                    write_cell(w, CellRef::new(r, col), value, None, prefix)?;
                }
                Ok(())
            })?;
    }
    Ok(())
}

/// Events of a row up to (and consuming) its `</row>`.
fn read_row_children<'i>(reader: &mut Reader<&'i [u8]>) -> Result<Vec<Event<'i>>> {
    let mut out = Vec::new();
    loop {
        match reader.read_event().context("worksheet: malformed xml")? {
            Event::End(e) if e.local_name().as_ref() == b"row" => break,
            Event::Eof => anyhow::bail!("worksheet: unterminated <row>"),
            e => out.push(e),
        }
    }
    Ok(out)
}

/// An existing `<c>` kept as raw events.
struct ExistingCell<'i> {
    col: u32,
    style: Option<String>,
    events: Vec<Event<'i>>,
}

fn write_patched_row<W: std::io::Write>(
    writer: &mut Writer<W>,
    start: &BytesStart<'_>,
    row: u32,
    children: Vec<Event<'_>>,
    writes: &[(u32, &CellWrite)],
    prefix: &str,
) -> Result<()> {
    let mut cells: Vec<ExistingCell<'_>> = Vec::new();
    let mut trailing = Vec::new();
    let mut next_col = 0u32;
    let mut open: Option<ExistingCell<'_>> = None;

    for ev in children {
        match ev {
            Event::Start(ref e) if open.is_none() && e.local_name().as_ref() == b"c" => {
                let col = cell_col(e, next_col)?;
                next_col = col + 1;
                open = Some(ExistingCell { col, style: attr(e, "s")?, events: vec![ev.clone()] });
            }
            Event::Empty(ref e) if open.is_none() && e.local_name().as_ref() == b"c" => {
                let col = cell_col(e, next_col)?;
                next_col = col + 1;
                cells.push(ExistingCell { col, style: attr(e, "s")?, events: vec![ev.clone()] });
            }
            Event::End(ref e) if e.local_name().as_ref() == b"c" => {
                if let Some(mut cell) = open.take() {
                    cell.events.push(ev.clone());
                    cells.push(cell);
                }
            }
            _ => match open.as_mut() {
                Some(cell) => cell.events.push(ev),
                None => {
                    let blank = matches!(&ev, Event::Text(t) if t.iter().all(u8::is_ascii_whitespace));
                    if !blank {
                        trailing.push(ev);
                    }
                }
            },
        }
    }
    cells.sort_by_key(|c| c.col);

    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    writer.write_event(Event::Start(without_spans(start)))?;

    let mut writes = writes.iter().peekable();
    for cell in cells {
        while let Some(&(col, value)) = writes.next_if(|(col, _)| *col < cell.col) {
            write_cell(writer, CellRef::new(row, col), value, None, prefix)?;
        }
        match writes.next_if(|(col, _)| *col == cell.col) {
            Some(&(col, value)) => {
                write_cell(writer, CellRef::new(row, col), value, cell.style.as_deref(), prefix)?
            }
            None => {
                for ev in cell.events {
                    writer.write_event(ev)?;
                }
            }
        }
    }
    for &(col, value) in writes {
        write_cell(writer, CellRef::new(row, col), value, None, prefix)?;
    }
    for ev in trailing {
        writer.write_event(ev)?;
    }
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn cell_col(e: &BytesStart<'_>, next_col: u32) -> Result<u32> {
    Ok(match attr(e, "r")? {
        Some(r) => r.parse::<CellRef>()?.col,
        None => next_col,
    })
}

/// `spans` is only a hint and goes stale once cells are added.
fn without_spans(e: &BytesStart<'_>) -> BytesStart<'static> {
    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for a in e.attributes().with_checks(false).flatten() {
        if a.key.as_ref() != b"spans" {
            out.push_attribute(a);
        }
    }
    out
}

fn widen_dimension(e: &BytesStart<'_>, bounds: Option<CellRange>) -> Result<BytesStart<'static>> {
    let current = attr(e, "ref")?.and_then(|r| r.parse::<CellRange>().ok());
    let widened = match (current, bounds) {
        (Some(cur), Some(b)) => Some(cur.expand_to(b.start).expand_to(b.end)),
        (None, b) => b,
        (cur, None) => cur,
    };
    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for a in e.attributes().with_checks(false).flatten() {
        if a.key.as_ref() != b"ref" {
            out.push_attribute(a);
        }
    }
    if let Some(range) = widened {
        let text = if range.start == range.end {
            range.start.to_string()
        } else {
            range.to_string()
        };
        out.push_attribute(("ref", text.as_str()));
    }
    Ok(out)
}

/// `<c>` for one typed value. Text goes in as an inline string.
fn write_cell<W: std::io::Write>(
    w: &mut Writer<W>,
    at: CellRef,
    value: &CellWrite,
    style: Option<&str>,
    prefix: &str,
) -> std::io::Result<()> {
    let coord = at.to_string();
    let mut c = w.create_element(format!("{prefix}c")).with_attribute(("r", coord.as_str()));
    if let Some(s) = style {
        c = c.with_attribute(("s", s));
    }
    match value {
        CellWrite::Text(text) => {
            c.with_attribute(("t", "inlineStr")).write_inner_content(|w2| {
                w2.create_element(format!("{prefix}is")).write_inner_content(|w3| {
                    let t = w3.create_element(format!("{prefix}t"));
                    let t = if text.trim() != text {
                        t.with_attribute(("xml:space", "preserve"))
                    } else {
                        t
                    };
                    t.write_text_content(BytesText::new(text))?;
                    Ok(())
                })?;
                Ok(())
            })?;
        }
        CellWrite::Number(n) => {
            c.write_inner_content(|w2| {
                w2.create_element(format!("{prefix}v"))
                    .write_text_content(BytesText::new(&n.to_string()))?;
                Ok(())
            })?;
        }
        CellWrite::Bool(b) => {
            c.with_attribute(("t", "b")).write_inner_content(|w2| {
                w2.create_element(format!("{prefix}v"))
                    .write_text_content(BytesText::new(if *b { "1" } else { "0" }))?;
                Ok(())
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_part::parse_sheet_cells;
    use crate::CellType;
    use pretty_assertions::assert_eq;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><dimension ref="A1:B3"/><sheetData><row r="1" spans="1:2"><c r="A1" t="inlineStr"><is><t>Name</t></is></c><c r="B1" s="3"><v>7</v></c></row><row r="3"><c r="A3"><v>1</v></c></row></sheetData><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></worksheet>"#;

    fn writes(items: &[(&str, CellWrite)]) -> Result<BTreeMap<CellRef, CellWrite>> {
        items.iter().map(|(r, w)| Ok((r.parse::<CellRef>()?, w.clone()))).collect()
    }

    #[test]
    fn patches_existing_and_inserts_new_rows_in_order() -> Result<()> {
        let batch = writes(&[
            ("B1", CellWrite::Number(2.5)),
            ("C1", CellWrite::Bool(true)),
            ("A2", CellWrite::Text("mid".into())),
            ("A5", CellWrite::Text(" padded ".into())),
        ])?;
        let out = apply_cell_writes(SHEET.as_bytes(), &batch)?;
        let text = String::from_utf8(out.clone())?;

        // row order in the document
        let positions: Vec<usize> = ["r=\"1\"", "r=\"2\"", "r=\"3\"", "r=\"5\""]
            .iter()
            .map(|needle| text.find(needle).unwrap_or(usize::MAX))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{text}");
        assert!(text.contains(r#"<dimension ref="A1:C5"/>"#), "{text}");
        assert!(text.contains(r#"<c r="B1" s="3"><v>2.5</v></c>"#), "{text}");
        assert!(text.contains(r#"<t xml:space="preserve"> padded </t>"#), "{text}");
        assert!(!text.contains("spans"));
        assert!(text.contains("<pageMargins"));

        let cells = parse_sheet_cells(&out, &[])?;
        assert_eq!(cells.get("A1".parse()?).map(|c| c.value.as_str()), Some("Name"));
        assert_eq!(cells.get("C1".parse()?).map(|c| c.result), Some(CellType::Boolean));
        assert_eq!(cells.get("A2".parse()?).map(|c| c.value.as_str()), Some("mid"));
        assert_eq!(cells.get("A3".parse()?).map(|c| c.value.as_str()), Some("1"));
        assert_eq!(cells.last_row(), Some(4));
        Ok(())
    }

    #[test]
    fn fills_an_empty_sheet_data() -> Result<()> {
        let xml = br#"<worksheet><dimension ref="A1"/><sheetData/></worksheet>"#;
        let out = apply_cell_writes(xml, &writes(&[("B2", CellWrite::Text(String::new()))])?)?;
        let text = String::from_utf8(out)?;
        assert_eq!(
            text,
            r#"<worksheet><dimension ref="A1:B2"/><sheetData><row r="2"><c r="B2" t="inlineStr"><is><t></t></is></c></row></sheetData></worksheet>"#
        );
        Ok(())
    }

    #[test]
    fn new_elements_follow_a_prefixed_namespace() -> Result<()> {
        let xml = br#"<x:worksheet xmlns:x="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><x:sheetData><x:row r="1"><x:c r="A1"><x:v>1</x:v></x:c></x:row></x:sheetData></x:worksheet>"#;
        let batch = writes(&[("B1", CellWrite::Number(2.0)), ("A2", CellWrite::Text("a".into()))])?;
        let text = String::from_utf8(apply_cell_writes(xml, &batch)?)?;
        assert_eq!(
            text,
            r#"<x:worksheet xmlns:x="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><x:sheetData><x:row r="1"><x:c r="A1"><x:v>1</x:v></x:c><x:c r="B1"><x:v>2</x:v></x:c></x:row><x:row r="2"><x:c r="A2" t="inlineStr"><x:is><x:t>a</x:t></x:is></x:c></x:row></x:sheetData></x:worksheet>"#
        );
        Ok(())
    }

    #[test]
    fn no_writes_is_identity() -> Result<()> {
        let out = apply_cell_writes(SHEET.as_bytes(), &BTreeMap::new())?;
        assert_eq!(out, SHEET.as_bytes());
        Ok(())
    }
}
