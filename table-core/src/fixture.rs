//! fixture.rs – small xlsx packages assembled in code, for tests.
//!
//! ```ignore
//! WorkbookBuilder::new()
//!     .sheet(
//!         SheetBuilder::new("Data")
//!             .row("B2", ["Name", "Qty"])
//!             .row("B3", [FixtureCell::from("apple"), 3.0.into()])
//!             .table(TableSpec::new("テーブル1", "B2:C3")),
//!     )
//!     .write_to(&path)?;
//! ```

use std::{
    collections::BTreeMap,
    fs,
    io::{Cursor, Write},
    path::Path,
};

use anyhow::Result;
use quick_xml::escape::escape;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::{CellRange, CellRef};

const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_PKG_REL: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

#[derive(Debug, Clone, PartialEq)]
pub enum FixtureCell {
    /// Stored through sharedStrings.xml.
    Shared(String),
    Inline(String),
    Number(f64),
    /// Number with a style index (see [`WorkbookBuilder::number_format`]).
    Styled(f64, u32),
    Bool(bool),
    Error(String),
    Formula { formula: String, cached: Option<f64> },
    /// A `<c>` with no value.
    Empty,
}

impl From<&str> for FixtureCell {
    fn from(s: &str) -> Self {
        FixtureCell::Shared(s.to_owned())
    }
}

impl From<f64> for FixtureCell {
    fn from(n: f64) -> Self {
        FixtureCell::Number(n)
    }
}

impl From<bool> for FixtureCell {
    fn from(b: bool) -> Self {
        FixtureCell::Bool(b)
    }
}

#[derive(Debug, Clone)]
pub struct TableSpec {
    name: String,
    display_name: Option<String>,
    reference: String,
    header_row_count: u32,
    totals_row_count: u32,
    columns: Option<Vec<String>>,
}

impl TableSpec {
    pub fn new(name: &str, reference: &str) -> Self {
        Self {
            name: name.to_owned(),
            display_name: None,
            reference: reference.to_owned(),
            header_row_count: 1,
            totals_row_count: 0,
            columns: None,
        }
    }

    pub fn display_name(mut self, display_name: &str) -> Self {
        self.display_name = Some(display_name.to_owned());
        self
    }

    /// `<tableColumn>` names; by default they are taken from the header row.
    pub fn columns<I: IntoIterator<Item = S>, S: Into<String>>(mut self, columns: I) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn headerless(mut self) -> Self {
        self.header_row_count = 0;
        self
    }

    pub fn totals_row(mut self) -> Self {
        self.totals_row_count = 1;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SheetBuilder {
    name: String,
    cells: BTreeMap<CellRef, FixtureCell>,
    tables: Vec<TableSpec>,
}

impl SheetBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            cells: BTreeMap::new(),
            tables: Vec::new(),
        }
    }

    /// Panics on a malformed reference; fixtures are written by hand.
    pub fn cell(mut self, at: &str, value: impl Into<FixtureCell>) -> Self {
        let at: CellRef = at.parse().expect("fixture cell reference");
        self.cells.insert(at, value.into());
        self
    }

    /// Consecutive cells to the right of `start`.
    pub fn row<I: IntoIterator<Item = V>, V: Into<FixtureCell>>(mut self, start: &str, values: I) -> Self {
        let start: CellRef = start.parse().expect("fixture cell reference");
        for (i, v) in values.into_iter().enumerate() {
            self.cells.insert(CellRef::new(start.row, start.col + i as u32), v.into());
        }
        self
    }

    pub fn table(mut self, table: TableSpec) -> Self {
        self.tables.push(table);
        self
    }

    fn column_names(&self, table: &TableSpec) -> Result<Vec<String>> {
        if let Some(cols) = &table.columns {
            return Ok(cols.clone());
        }
        let range: CellRange = table.reference.parse()?;
        Ok((0..range.width())
            .map(|i| match self.cells.get(&CellRef::new(range.start.row, range.start.col + i)) {
                Some(FixtureCell::Shared(s) | FixtureCell::Inline(s)) if table.header_row_count > 0 => s.clone(),
                _ => format!("Column{}", i + 1),
            })
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkbookBuilder {
    sheets: Vec<SheetBuilder>,
    number_formats: Vec<String>,
    date1904: bool,
}

impl WorkbookBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet(mut self, sheet: SheetBuilder) -> Self {
        self.sheets.push(sheet);
        self
    }

    /// Registers a custom number format. The n-th registered format is
    /// style index n (1-based); style 0 is `General`.
    pub fn number_format(mut self, code: &str) -> Self {
        self.number_formats.push(code.to_owned());
        self
    }

    pub fn date1904(mut self) -> Self {
        self.date1904 = true;
        self
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.build()?)?;
        Ok(())
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let mut shared: Vec<String> = Vec::new();
        let mut parts: Vec<(String, String)> = Vec::new();
        let mut overrides: Vec<(String, &str)> = Vec::new();
        let mut table_no = 0usize;

        let mut sheet_entries = String::new();
        let mut wb_rels = String::new();
        for (i, sheet) in self.sheets.iter().enumerate() {
            let n = i + 1;
            sheet_entries.push_str(&format!(
                r#"<sheet name="{}" sheetId="{n}" r:id="rId{n}"/>"#,
                escape(sheet.name.as_str())
            ));
            wb_rels.push_str(&format!(
                r#"<Relationship Id="rId{n}" Type="{NS_REL}/worksheet" Target="worksheets/sheet{n}.xml"/>"#
            ));

            let mut table_parts = String::new();
            let mut sheet_rels = String::new();
            for (k, table) in sheet.tables.iter().enumerate() {
                table_no += 1;
                let rid = k + 1;
                table_parts.push_str(&format!(r#"<tablePart r:id="rId{rid}"/>"#));
                sheet_rels.push_str(&format!(
                    r#"<Relationship Id="rId{rid}" Type="{NS_REL}/table" Target="../tables/table{table_no}.xml"/>"#
                ));
                let path = format!("xl/tables/table{table_no}.xml");
                parts.push((path.clone(), table_xml(table_no, table, &sheet.column_names(table)?)));
                overrides.push((
                    path,
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.table+xml",
                ));
            }
            if !sheet.tables.is_empty() {
                parts.push((
                    format!("xl/worksheets/_rels/sheet{n}.xml.rels"),
                    rels_xml(&sheet_rels),
                ));
            }

            let path = format!("xl/worksheets/sheet{n}.xml");
            parts.push((path.clone(), sheet_xml(sheet, &table_parts, &mut shared)));
            overrides.push((
                path,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml",
            ));
        }

        let n = self.sheets.len();
        wb_rels.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="{NS_REL}/styles" Target="styles.xml"/><Relationship Id="rId{}" Type="{NS_REL}/sharedStrings" Target="sharedStrings.xml"/>"#,
            n + 1,
            n + 2
        ));

        let workbook = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="{NS_MAIN}" xmlns:r="{NS_REL}"><workbookPr{}/><sheets>{sheet_entries}</sheets></workbook>"#,
            if self.date1904 { r#" date1904="1""# } else { "" }
        );
        parts.push(("xl/workbook.xml".into(), workbook));
        parts.push(("xl/_rels/workbook.xml.rels".into(), rels_xml(&wb_rels)));
        parts.push(("xl/styles.xml".into(), self.styles_xml()));
        parts.push(("xl/sharedStrings.xml".into(), shared_strings_xml(&shared)));
        parts.push((
            "_rels/.rels".into(),
            rels_xml(&format!(
                r#"<Relationship Id="rId1" Type="{NS_REL}/officeDocument" Target="xl/workbook.xml"/>"#
            )),
        ));
        overrides.push((
            "xl/workbook.xml".into(),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml",
        ));
        overrides.push((
            "xl/styles.xml".into(),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml",
        ));
        overrides.push((
            "xl/sharedStrings.xml".into(),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml",
        ));

        let mut content_types = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>"#,
        );
        for (path, kind) in &overrides {
            content_types.push_str(&format!(r#"<Override PartName="/{path}" ContentType="{kind}"/>"#));
        }
        content_types.push_str("</Types>");

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let opt = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file("[Content_Types].xml", opt)?;
        zip.write_all(content_types.as_bytes())?;
        for (name, xml) in &parts {
            zip.start_file(name.as_str(), opt)?;
            zip.write_all(xml.as_bytes())?;
        }
        Ok(zip.finish()?.into_inner())
    }

    fn styles_xml(&self) -> String {
        let mut num_fmts = String::new();
        let mut xfs = String::from(r#"<xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>"#);
        for (i, code) in self.number_formats.iter().enumerate() {
            let id = 164 + i;
            num_fmts.push_str(&format!(r#"<numFmt numFmtId="{id}" formatCode="{}"/>"#, escape(code.as_str())));
            xfs.push_str(&format!(
                r#"<xf numFmtId="{id}" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/>"#
            ));
        }
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="{NS_MAIN}"><numFmts count="{}">{num_fmts}</numFmts><fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts><fills count="1"><fill><patternFill patternType="none"/></fill></fills><borders count="1"><border/></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="{}">{xfs}</cellXfs></styleSheet>"#,
            self.number_formats.len(),
            self.number_formats.len() + 1
        )
    }
}

fn rels_xml(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="{NS_PKG_REL}">{body}</Relationships>"#
    )
}

fn shared_strings_xml(shared: &[String]) -> String {
    let items: String = shared
        .iter()
        .map(|s| format!("<si><t>{}</t></si>", escape(s.as_str())))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="{NS_MAIN}" count="{0}" uniqueCount="{0}">{items}</sst>"#,
        shared.len()
    )
}

fn sheet_xml(sheet: &SheetBuilder, table_parts: &str, shared: &mut Vec<String>) -> String {
    let dimension = match (sheet.cells.keys().next(), sheet.cells.keys().next_back()) {
        (Some(&first), Some(_)) => sheet
            .cells
            .keys()
            .fold(CellRange::new(first, first), |r, &c| r.expand_to(c))
            .to_string(),
        _ => "A1".to_owned(),
    };

    let mut rows: BTreeMap<u32, String> = BTreeMap::new();
    for (at, value) in &sheet.cells {
        let xml = rows.entry(at.row).or_default();
        let r = at.to_string();
        let c = match value {
            FixtureCell::Shared(s) => {
                let idx = shared.iter().position(|x| x == s).unwrap_or_else(|| {
                    shared.push(s.clone());
                    shared.len() - 1
                });
                format!(r#"<c r="{r}" t="s"><v>{idx}</v></c>"#)
            }
            FixtureCell::Inline(s) => format!(r#"<c r="{r}" t="inlineStr"><is><t>{}</t></is></c>"#, escape(s.as_str())),
            FixtureCell::Number(n) => format!(r#"<c r="{r}"><v>{n}</v></c>"#),
            FixtureCell::Styled(n, style) => format!(r#"<c r="{r}" s="{style}"><v>{n}</v></c>"#),
            FixtureCell::Bool(b) => format!(r#"<c r="{r}" t="b"><v>{}</v></c>"#, u8::from(*b)),
            FixtureCell::Error(e) => format!(r#"<c r="{r}" t="e"><v>{}</v></c>"#, escape(e.as_str())),
            FixtureCell::Formula { formula, cached } => match cached {
                Some(v) => format!(r#"<c r="{r}"><f>{}</f><v>{v}</v></c>"#, escape(formula.as_str())),
                None => format!(r#"<c r="{r}"><f>{}</f></c>"#, escape(formula.as_str())),
            },
            FixtureCell::Empty => format!(r#"<c r="{r}"/>"#),
        };
        xml.push_str(&c);
    }
    let sheet_data: String = rows
        .iter()
        .map(|(row, cells)| format!(r#"<row r="{}">{cells}</row>"#, row + 1))
        .collect();
    let table_parts = if table_parts.is_empty() {
        String::new()
    } else {
        format!(
            r#"<tableParts count="{}">{table_parts}</tableParts>"#,
            table_parts.matches("<tablePart ").count()
        )
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="{NS_MAIN}" xmlns:r="{NS_REL}"><dimension ref="{dimension}"/><sheetViews><sheetView workbookViewId="0"/></sheetViews><sheetFormatPr defaultRowHeight="15"/><sheetData>{sheet_data}</sheetData><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/>{table_parts}</worksheet>"#
    )
}

fn table_xml(id: usize, table: &TableSpec, columns: &[String]) -> String {
    let display = table.display_name.as_deref().unwrap_or(&table.name);
    let mut attrs = format!(
        r#"id="{id}" name="{}" displayName="{}" ref="{}""#,
        escape(table.name.as_str()),
        escape(display),
        table.reference
    );
    if table.header_row_count == 0 {
        attrs.push_str(r#" headerRowCount="0""#);
    }
    if table.totals_row_count > 0 {
        attrs.push_str(&format!(r#" totalsRowCount="{}""#, table.totals_row_count));
    } else {
        attrs.push_str(r#" totalsRowShown="0""#);
    }
    let auto_filter = if table.header_row_count > 0 && table.totals_row_count == 0 {
        format!(r#"<autoFilter ref="{}"/>"#, table.reference)
    } else {
        String::new()
    };
    let cols: String = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!(r#"<tableColumn id="{}" name="{}"/>"#, i + 1, escape(c.as_str())))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<table xmlns="{NS_MAIN}" {attrs}>{auto_filter}<tableColumns count="{}">{cols}</tableColumns><tableStyleInfo name="TableStyleMedium2" showFirstColumn="0" showLastColumn="0" showRowStripes="1" showColumnStripes="0"/></table>"#,
        columns.len()
    )
}
