use crate::{CollectError, SheetEntry, XlsxWorkbook, read_part, style};
use ::zip as zip_crate;
use anyhow::{Context, Result};
use log::debug;
use quick_xml::{Reader, events::Event};
use std::{
    fs,
    io::{Cursor, Read, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

const REL_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const REL_SHARED_STRINGS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings";
const REL_STYLES: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";

/// `<Relationship>` of a `.rels` part, target already resolved to a part name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Relationship {
    pub id: String,
    pub kind: String,
    pub target: String,
}

/// Work with files
impl XlsxWorkbook {
    /// Reads the whole package at `src` into memory.
    ///
    /// Any failure (missing file, not a zip, missing workbook part, malformed
    /// XML) is reported as [`CollectError::InvalidFormat`] so callers can tell
    /// an unusable workbook apart from other errors.
    pub fn open<P: AsRef<Path>>(src: P) -> Result<Self> {
        let src_path = src.as_ref().to_path_buf();
        Self::load(&src_path).map_err(|e| {
            anyhow::Error::from(CollectError::InvalidFormat {
                path: src_path,
                reason: format!("{e:#}"),
            })
        })
    }

    fn load(src_path: &Path) -> Result<Self> {
        let bytes = fs::read(src_path).with_context(|| format!("reading {}", src_path.display()))?;
        let mut zip = zip_crate::ZipArchive::new(Cursor::new(bytes))?;

        let mut parts = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_owned();
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)
                .with_context(|| format!("{name}: cannot decompress"))?;
            parts.push((name, buf));
        }

        let mut wb = Self {
            src_path: src_path.to_path_buf(),
            parts,
            new_files: Vec::new(),
            workbook_path: String::new(),
            sheets: Vec::new(),
            shared_strings: Vec::new(),
            styles: style::Styles::default(),
        };

        // ── workbook part, via the package relationships ─────────────────
        wb.workbook_path = wb
            .relationships("")?
            .into_iter()
            .find(|r| r.kind == REL_OFFICE_DOCUMENT)
            .map(|r| r.target)
            .unwrap_or_else(|| "xl/workbook.xml".to_owned());
        let workbook_xml = wb.require_part(&wb.workbook_path)?;
        let (sheet_tags, date1904) = parse_workbook(workbook_xml)?;

        let wb_rels = wb.relationships(&wb.workbook_path)?;
        let mut sheets = Vec::with_capacity(sheet_tags.len());
        for (name, rid) in sheet_tags {
            let rel = wb_rels
                .iter()
                .find(|r| r.id == rid)
                .with_context(|| format!("relationship {rid} for sheet `{name}` not found"))?;
            sheets.push(SheetEntry {
                name,
                path: rel.target.clone(),
            });
        }
        wb.sheets = sheets;

        // ── sharedStrings.xml / styles.xml are optional ──────────────────
        let ss_path = rel_target_or(&wb_rels, REL_SHARED_STRINGS, "xl/sharedStrings.xml");
        let shared_strings = match wb.part(&ss_path) {
            Some(xml) => read_part::parse_shared_strings(xml)?,
            None => Vec::new(),
        };
        let styles_path = rel_target_or(&wb_rels, REL_STYLES, "xl/styles.xml");
        let mut styles = match wb.part(&styles_path) {
            Some(xml) => style::parse_styles(xml)?,
            None => style::Styles::default(),
        };
        styles.date1904 = date1904;
        wb.shared_strings = shared_strings;
        wb.styles = styles;

        debug!(
            "opened {}: {} parts, sheets {:?}",
            src_path.display(),
            wb.parts.len(),
            wb.sheets.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()
        );
        Ok(wb)
    }

    /// Current content of a part; edited content wins over the original.
    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.new_files
            .iter()
            .chain(self.parts.iter())
            .find(|(p, _)| p == name)
            .map(|(_, c)| c.as_slice())
    }

    pub(crate) fn require_part(&self, name: &str) -> Result<&[u8]> {
        self.part(name).with_context(|| format!("{name} not found"))
    }

    pub(crate) fn put_part(&mut self, name: &str, content: Vec<u8>) {
        if let Some((_, c)) = self.new_files.iter_mut().find(|(p, _)| p == name) {
            *c = content;
        } else {
            self.new_files.push((name.to_owned(), content));
        }
    }

    /// Relationships of `part` (`""` for the package root), targets resolved
    /// against the part's folder. A missing `.rels` part means no relationships.
    pub(crate) fn relationships(&self, part: &str) -> Result<Vec<Relationship>> {
        let rels_path = rels_path_for(part);
        let Some(xml) = self.part(&rels_path) else {
            return Ok(Vec::new());
        };

        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);
        let mut out = Vec::new();
        loop {
            match reader.read_event().with_context(|| format!("{rels_path}: malformed xml"))? {
                Event::Empty(ref e) | Event::Start(ref e)
                    if e.local_name().as_ref() == b"Relationship" =>
                {
                    let id = read_part::attr(e, "Id")?.unwrap_or_default();
                    let kind = read_part::attr(e, "Type")?.unwrap_or_default();
                    let target = read_part::attr(e, "Target")?.unwrap_or_default();
                    let external = read_part::attr(e, "TargetMode")?.as_deref() == Some("External");
                    if !external {
                        out.push(Relationship {
                            id,
                            kind,
                            target: resolve_target(part, &target),
                        });
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(out)
    }

    /// Writes every part into a temporary file next to `dst`, then renames it
    /// over `dst`. The source package is never modified unless `dst` is it.
    pub fn save<P: AsRef<Path>>(&self, dst: P) -> Result<()> {
        let dst = dst.as_ref();
        let dir = dst
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("cannot create temp file in {}", dir.display()))?;
        {
            let mut zout = zip_crate::ZipWriter::new(&mut tmp);
            let opt: zip_crate::write::FileOptions<'_, ()> = zip_crate::write::FileOptions::default()
                .compression_method(zip_crate::CompressionMethod::Deflated)
                .compression_level(Some(6));

            for (name, original) in &self.parts {
                zout.start_file(name.as_str(), opt)?;
                zout.write_all(self.part(name).unwrap_or(original))?;
            }
            // parts created in memory
            for (name, content) in &self.new_files {
                if !self.parts.iter().any(|(p, _)| p == name) {
                    zout.start_file(name.as_str(), opt)?;
                    zout.write_all(content)?;
                }
            }
            zout.finish()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(dst)
            .with_context(|| format!("cannot replace {}", dst.display()))?;
        debug!("saved {} ({} edited parts)", dst.display(), self.new_files.len());
        Ok(())
    }
}

/// `(name, r:id)` of every `<sheet>` plus the `date1904` flag.
fn parse_workbook(xml: &[u8]) -> Result<(Vec<(String, String)>, bool)> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut sheets = Vec::new();
    let mut date1904 = false;
    loop {
        match reader.read_event().context("workbook.xml: malformed xml")? {
            Event::Empty(ref e) | Event::Start(ref e) if e.local_name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut rid = None;
                for a in e.attributes().with_checks(false).flatten() {
                    match (a.key.prefix().is_some(), a.key.local_name().as_ref()) {
                        (false, b"name") => name = Some(a.unescape_value()?.into_owned()),
                        (true, b"id") => rid = Some(a.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                if let (Some(n), Some(r)) = (name, rid) {
                    sheets.push((n, r));
                }
            }
            Event::Empty(ref e) | Event::Start(ref e)
                if e.local_name().as_ref() == b"workbookPr" =>
            {
                date1904 = read_part::attr(e, "date1904")?
                    .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok((sheets, date1904))
}

fn rel_target_or(rels: &[Relationship], kind: &str, fallback: &str) -> String {
    rels.iter()
        .find(|r| r.kind == kind)
        .map(|r| r.target.clone())
        .unwrap_or_else(|| fallback.to_owned())
}

/// `xl/worksheets/sheet1.xml` → `xl/worksheets/_rels/sheet1.xml.rels`;
/// the package root (`""`) → `_rels/.rels`.
pub(crate) fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolves a relationship target relative to the folder of `source_part`.
pub(crate) fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(abs) = target.strip_prefix('/') {
        return normalize(PathBuf::from(abs));
    }
    let base = source_part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    normalize(Path::new(base).join(target))
}

fn normalize(path: PathBuf) -> String {
    let mut segs: Vec<String> = Vec::new();
    for comp in path.components() {
        match comp {
            std::path::Component::ParentDir => {
                segs.pop();
            }
            std::path::Component::Normal(s) => segs.push(s.to_string_lossy().into_owned()),
            _ => {}
        }
    }
    segs.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rels_paths() {
        assert_eq!(rels_path_for(""), "_rels/.rels");
        assert_eq!(rels_path_for("xl/workbook.xml"), "xl/_rels/workbook.xml.rels");
        assert_eq!(
            rels_path_for("xl/worksheets/sheet2.xml"),
            "xl/worksheets/_rels/sheet2.xml.rels"
        );
    }

    #[test]
    fn targets_resolve_relative_to_source_folder() {
        assert_eq!(resolve_target("", "xl/workbook.xml"), "xl/workbook.xml");
        assert_eq!(resolve_target("xl/workbook.xml", "worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(
            resolve_target("xl/worksheets/sheet1.xml", "../tables/table1.xml"),
            "xl/tables/table1.xml"
        );
        assert_eq!(resolve_target("xl/workbook.xml", "/xl/styles.xml"), "xl/styles.xml");
    }
}
