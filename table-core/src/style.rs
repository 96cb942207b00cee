//! style.rs – number formats from styles.xml (`numFmts` + `cellXfs`).

use anyhow::{Context, Result};
use quick_xml::{Reader, events::Event};
use std::collections::HashMap;

use crate::read_part::attr;

/* ========================== STYLE TABLE ==================================== */

#[derive(Debug, Clone, Default)]
pub struct Styles {
    /// `numFmtId` of each `<xf>` in `cellXfs`, by style index.
    xf_num_fmts: Vec<u32>,
    /// Custom `<numFmt>` codes by id.
    custom: HashMap<u32, String>,
    /// Serial dates count from 1904-01-01 instead of 1900-01-00.
    pub date1904: bool,
}

impl Styles {
    /// Format code applied to a cell with style index `style`.
    pub fn format_code(&self, style: Option<u32>) -> &str {
        let Some(id) = style.and_then(|s| self.xf_num_fmts.get(s as usize).copied()) else {
            return "General";
        };
        self.custom
            .get(&id)
            .map(String::as_str)
            .or_else(|| builtin_format(id))
            .unwrap_or("General")
    }
}

/// Built-in number formats (ECMA-376 §18.8.30), as rendered for en-US.
pub fn builtin_format(id: u32) -> Option<&'static str> {
    Some(match id {
        0 => "General",
        1 => "0",
        2 => "0.00",
        3 => "#,##0",
        4 => "#,##0.00",
        9 => "0%",
        10 => "0.00%",
        11 => "0.00E+00",
        12 => "# ?/?",
        13 => "# ??/??",
        14 => "m/d/yy",
        15 => "d-mmm-yy",
        16 => "d-mmm",
        17 => "mmm-yy",
        18 => "h:mm AM/PM",
        19 => "h:mm:ss AM/PM",
        20 => "h:mm",
        21 => "h:mm:ss",
        22 => "m/d/yy h:mm",
        37 => "#,##0 ;(#,##0)",
        38 => "#,##0 ;[Red](#,##0)",
        39 => "#,##0.00;(#,##0.00)",
        40 => "#,##0.00;[Red](#,##0.00)",
        45 => "mm:ss",
        46 => "[h]:mm:ss",
        47 => "mmss.0",
        48 => "##0.0E+0",
        49 => "@",
        _ => return None,
    })
}

pub(crate) fn parse_styles(xml: &[u8]) -> Result<Styles> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut styles = Styles::default();
    let mut in_cell_xfs = false;
    loop {
        match reader.read_event().context("styles.xml: malformed xml")? {
            Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"numFmt" => {
                let id = attr(e, "numFmtId")?.and_then(|v| v.parse::<u32>().ok());
                if let (Some(id), Some(code)) = (id, attr(e, "formatCode")?) {
                    styles.custom.insert(id, code);
                }
            }
            Event::Start(ref e) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = true,
            Event::End(ref e) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = false,
            Event::Start(ref e) | Event::Empty(ref e)
                if in_cell_xfs && e.local_name().as_ref() == b"xf" =>
            {
                let id = attr(e, "numFmtId")?
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(0);
                styles.xf_num_fmts.push(id);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(styles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_codes_override_builtins() -> Result<()> {
        let xml = br#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
            <numFmts count="1"><numFmt numFmtId="164" formatCode="0.000&quot;kg&quot;"/></numFmts>
            <cellStyleXfs count="1"><xf numFmtId="0"/></cellStyleXfs>
            <cellXfs count="3"><xf numFmtId="0"/><xf numFmtId="164"/><xf numFmtId="14"/></cellXfs>
        </styleSheet>"#;
        let styles = parse_styles(xml)?;
        assert_eq!(styles.format_code(None), "General");
        assert_eq!(styles.format_code(Some(0)), "General");
        assert_eq!(styles.format_code(Some(1)), "0.000\"kg\"");
        assert_eq!(styles.format_code(Some(2)), "m/d/yy");
        assert_eq!(styles.format_code(Some(9)), "General");
        Ok(())
    }
}
