//! cell.rs – extracted cell snapshots and the typed write path.

use std::fmt;

/// Stored type of a worksheet cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellType {
    Numeric,
    Text,
    Formula,
    #[default]
    Blank,
    Boolean,
    Error,
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CellType::Numeric => "numeric",
            CellType::Text => "text",
            CellType::Formula => "formula",
            CellType::Blank => "blank",
            CellType::Boolean => "boolean",
            CellType::Error => "error",
        })
    }
}

/// Type tag plus display text of a cell, captured during extraction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CellValue {
    pub kind: CellType,
    pub value: String,
}

impl CellValue {
    pub fn new(kind: CellType, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn blank() -> Self {
        Self::default()
    }
}

/// One extracted table row: header → value, in source column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    entries: Vec<(String, CellValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// A repeated header replaces the earlier value in place.
    pub fn insert(&mut self, header: impl Into<String>, value: CellValue) {
        let header = header.into();
        match self.entries.iter_mut().find(|(h, _)| *h == header) {
            Some((_, v)) => *v = value,
            None => self.entries.push((header, value)),
        }
    }

    pub fn get(&self, header: &str) -> Option<&CellValue> {
        self.entries.iter().find(|(h, _)| h == header).map(|(_, v)| v)
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(h, _)| h.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.entries.iter().map(|(h, v)| (h.as_str(), v))
    }
}

impl<H: Into<String>> FromIterator<(H, CellValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (H, CellValue)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (h, v) in iter {
            row.insert(h, v);
        }
        row
    }
}

/// Value as it lands in the destination worksheet.
#[derive(Debug, Clone, PartialEq)]
pub enum CellWrite {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellWrite {
    /// Coerces an extracted value (or its absence) into a typed write.
    pub fn coerce(value: Option<&CellValue>) -> Self {
        let Some(value) = value else {
            return CellWrite::Text(String::new());
        };
        match value.kind {
            CellType::Numeric => match parse_number(&value.value) {
                Some(n) => CellWrite::Number(n),
                None => CellWrite::Text(value.value.clone()),
            },
            CellType::Blank => CellWrite::Text(String::new()),
            CellType::Boolean => CellWrite::Bool(value.value.trim().eq_ignore_ascii_case("true")),
            // cached result text only, numeric results are not re-derived
            CellType::Formula => CellWrite::Text(value.value.clone()),
            CellType::Text | CellType::Error => CellWrite::Text(value.value.clone()),
        }
    }
}

// NaN and infinities parse fine but cannot be stored in a cell.
fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercion_table() {
        let cases = [
            (None, CellWrite::Text(String::new())),
            (Some(CellValue::new(CellType::Numeric, "5")), CellWrite::Number(5.0)),
            (Some(CellValue::new(CellType::Numeric, " 2.5 ")), CellWrite::Number(2.5)),
            (
                Some(CellValue::new(CellType::Numeric, "not-a-number")),
                CellWrite::Text("not-a-number".into()),
            ),
            (Some(CellValue::new(CellType::Numeric, "NaN")), CellWrite::Text("NaN".into())),
            (Some(CellValue::new(CellType::Blank, "ignored")), CellWrite::Text(String::new())),
            (Some(CellValue::new(CellType::Boolean, "TRUE")), CellWrite::Bool(true)),
            (Some(CellValue::new(CellType::Boolean, "yes")), CellWrite::Bool(false)),
            (Some(CellValue::new(CellType::Formula, "42")), CellWrite::Text("42".into())),
            (Some(CellValue::new(CellType::Text, "abc")), CellWrite::Text("abc".into())),
            (Some(CellValue::new(CellType::Error, "#N/A")), CellWrite::Text("#N/A".into())),
        ];
        for (input, expected) in cases {
            assert_eq!(CellWrite::coerce(input.as_ref()), expected, "{input:?}");
        }
    }

    #[test]
    fn row_keeps_column_order_and_unique_keys() {
        let mut row = Row::new();
        row.insert("Name", CellValue::new(CellType::Text, "a"));
        row.insert("Age", CellValue::new(CellType::Numeric, "1"));
        row.insert("Name", CellValue::new(CellType::Text, "b"));
        assert_eq!(row.headers().collect::<Vec<_>>(), ["Name", "Age"]);
        assert_eq!(row.get("Name").map(|v| v.value.as_str()), Some("b"));
        assert_eq!(row.iter().count(), 2);
        assert!(row.get("City").is_none());
    }
}
