//! read_part.rs – parsing of sharedStrings.xml and worksheet cells.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use quick_xml::{
    Reader,
    escape::resolve_xml_entity,
    events::{BytesRef, BytesStart, Event},
};

use crate::{CellRef, CellType};

/// One parsed worksheet cell.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cell {
    /// Stored type; `Formula` whenever the cell carries an `<f>`.
    pub kind: CellType,
    /// Type of the stored (or cached formula) value.
    pub result: CellType,
    /// Raw value text; shared strings are already resolved.
    pub value: String,
    pub formula: Option<String>,
    /// Index into `cellXfs`.
    pub style: Option<u32>,
}

/// Cells of one worksheet keyed by coordinate. Absent cells are simply missing.
#[derive(Debug, Default)]
pub struct SheetCells {
    cells: HashMap<CellRef, Cell>,
    last_row: Option<u32>,
}

impl SheetCells {
    pub fn get(&self, at: CellRef) -> Option<&Cell> {
        self.cells.get(&at)
    }

    /// 0-based index of the last `<row>` seen, cells or not.
    pub fn last_row(&self) -> Option<u32> {
        self.last_row
    }
}

/// Unescaped value of the unprefixed attribute `name`.
pub(crate) fn attr(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    Ok(e.try_get_attribute(name)?
        .map(|a| a.unescape_value().map(|v| v.into_owned()))
        .transpose()?)
}

/// Collects text up to the closing `end` tag. With `direct` the element's own
/// text counts (`<v>`, `<f>`); otherwise only `<t>` runs do (`<si>`, `<is>`),
/// and phonetic `<rPh>` runs are skipped.
pub(crate) fn read_text(reader: &mut Reader<&[u8]>, end: &[u8], direct: bool) -> Result<String> {
    let mut text = String::new();
    let mut in_t = direct;
    let mut in_phonetic = false;
    loop {
        match reader.read_event()? {
            Event::End(ref e) if e.local_name().as_ref() == end => break,
            Event::Start(ref e) if e.local_name().as_ref() == b"rPh" => in_phonetic = true,
            Event::End(ref e) if e.local_name().as_ref() == b"rPh" => in_phonetic = false,
            Event::Start(ref e) if !in_phonetic && e.local_name().as_ref() == b"t" => in_t = true,
            Event::End(ref e) if e.local_name().as_ref() == b"t" => in_t = direct,
            Event::Text(ref t) if in_t && !in_phonetic => text.push_str(&t.xml_content()?),
            Event::CData(ref t) if in_t && !in_phonetic => text.push_str(&t.xml_content()?),
            Event::GeneralRef(ref r) if in_t && !in_phonetic => push_entity(&mut text, r)?,
            Event::Eof => bail!("unexpected end of xml inside <{}>", String::from_utf8_lossy(end)),
            _ => {}
        }
    }
    Ok(text)
}

fn push_entity(text: &mut String, r: &BytesRef<'_>) -> Result<()> {
    let raw = r.xml_content()?;
    if let Some(number) = raw.strip_prefix('#') {
        let code = match number.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16)?,
            None => number.parse::<u32>()?,
        };
        let ch = char::from_u32(code).with_context(|| format!("invalid character reference &{raw};"))?;
        text.push(ch);
    } else if let Some(entity) = resolve_xml_entity(&raw) {
        text.push_str(entity);
    } else {
        bail!("unknown entity &{raw};");
    }
    Ok(())
}

pub(crate) fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut out = Vec::new();
    loop {
        match reader.read_event().context("sharedStrings.xml: malformed xml")? {
            Event::Start(ref e) if e.local_name().as_ref() == b"si" => {
                out.push(read_text(&mut reader, b"si", false)?);
            }
            Event::Empty(ref e) if e.local_name().as_ref() == b"si" => out.push(String::new()),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/// Storage type from the `t` attribute; `None` means numeric.
fn stored_type(t: Option<&str>) -> CellType {
    match t {
        Some("s" | "inlineStr" | "str" | "d") => CellType::Text,
        Some("b") => CellType::Boolean,
        Some("e") => CellType::Error,
        _ => CellType::Numeric,
    }
}

pub(crate) fn parse_sheet_cells(xml: &[u8], shared: &[String]) -> Result<SheetCells> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut sheet = SheetCells::default();
    // implicit coordinates for rows/cells written without `r`
    let mut row: u32 = 0;
    let mut next_col: u32 = 0;
    let mut seen_row = false;

    // cell under construction
    let mut current: Option<(CellRef, Option<String>, Cell)> = None;

    loop {
        match reader.read_event().context("worksheet: malformed xml")? {
            Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"row" => {
                row = match attr(e, "r")? {
                    Some(r) => r
                        .trim()
                        .parse::<u32>()
                        .with_context(|| format!("bad row number `{r}`"))?
                        .saturating_sub(1),
                    None if seen_row => row + 1,
                    None => 0,
                };
                seen_row = true;
                next_col = 0;
                sheet.last_row = Some(sheet.last_row.map_or(row, |l| l.max(row)));
            }
            Event::Start(ref e) if e.local_name().as_ref() == b"c" => {
                current = Some(begin_cell(e, row, &mut next_col)?);
            }
            Event::Empty(ref e) if e.local_name().as_ref() == b"c" => {
                let (at, t, cell) = begin_cell(e, row, &mut next_col)?;
                sheet.cells.insert(at, finish_cell(t.as_deref(), cell, shared)?);
            }
            Event::Start(ref e) if current.is_some() && e.local_name().as_ref() == b"v" => {
                let text = read_text(&mut reader, b"v", true)?;
                if let Some((_, _, cell)) = current.as_mut() {
                    cell.value = text;
                }
            }
            Event::Start(ref e) if current.is_some() && e.local_name().as_ref() == b"f" => {
                let text = read_text(&mut reader, b"f", true)?;
                if let Some((_, _, cell)) = current.as_mut() {
                    cell.formula = Some(text);
                }
            }
            // shared-formula children: `<f t="shared" si="0"/>`
            Event::Empty(ref e) if current.is_some() && e.local_name().as_ref() == b"f" => {
                if let Some((_, _, cell)) = current.as_mut() {
                    cell.formula.get_or_insert_with(String::new);
                }
            }
            Event::Start(ref e) if current.is_some() && e.local_name().as_ref() == b"is" => {
                let text = read_text(&mut reader, b"is", false)?;
                if let Some((_, _, cell)) = current.as_mut() {
                    cell.value = text;
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"c" => {
                if let Some((at, t, cell)) = current.take() {
                    sheet.cells.insert(at, finish_cell(t.as_deref(), cell, shared)?);
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"sheetData" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheet)
}

fn begin_cell(
    e: &BytesStart<'_>,
    row: u32,
    next_col: &mut u32,
) -> Result<(CellRef, Option<String>, Cell)> {
    let at = match attr(e, "r")? {
        Some(r) => r.parse::<CellRef>()?,
        None => CellRef::new(row, *next_col),
    };
    *next_col = at.col + 1;
    let cell = Cell {
        style: attr(e, "s")?.and_then(|s| s.parse::<u32>().ok()),
        ..Cell::default()
    };
    Ok((at, attr(e, "t")?, cell))
}

fn finish_cell(t: Option<&str>, mut cell: Cell, shared: &[String]) -> Result<Cell> {
    if t == Some("s") && !cell.value.is_empty() {
        let idx: usize = cell
            .value
            .trim()
            .parse()
            .with_context(|| format!("bad shared string index `{}`", cell.value))?;
        cell.value = shared
            .get(idx)
            .cloned()
            .with_context(|| format!("shared string {idx} out of range"))?;
    }
    let has_value = !cell.value.is_empty() || t == Some("inlineStr") || t == Some("s");
    cell.result = if has_value { stored_type(t) } else { CellType::Blank };
    cell.kind = if cell.formula.is_some() {
        CellType::Formula
    } else {
        cell.result
    };
    Ok(cell)
}
