//! reference.rs – A1 addressing: cells, rectangular ranges, column letters.

use std::{fmt, str::FromStr, sync::LazyLock};

use anyhow::Result;
use regex::Regex;

use crate::error::CollectError;

static RE_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$?([A-Za-z]{1,3})\$?([0-9]+)$").expect("cell regex"));

/// Excel's last column is XFD.
pub const MAX_COL: u32 = 16_383;
pub const MAX_ROW: u32 = 1_048_575;

/// Cell coordinate, 0-based on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", col_letter(self.col), self.row + 1)
    }
}

impl FromStr for CellRef {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        let caps = RE_CELL
            .captures(s.trim())
            .ok_or_else(|| CollectError::InvalidReference(s.to_owned()))?;
        let col = col_index(&caps[1]);
        let row: u32 = caps[2]
            .parse()
            .map_err(|_| CollectError::InvalidReference(s.to_owned()))?;
        if row == 0 || row - 1 > MAX_ROW || col > MAX_COL {
            return Err(CollectError::InvalidReference(s.to_owned()).into());
        }
        Ok(Self { row: row - 1, col })
    }
}

/// Rectangular region, `start` is top-left and `end` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    /// Builds a range from any two corners.
    pub fn new(a: CellRef, b: CellRef) -> Self {
        Self {
            start: CellRef::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellRef::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    pub fn height(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    pub fn width(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    /// Smallest range covering both `self` and `cell`.
    pub fn expand_to(&self, cell: CellRef) -> Self {
        Self {
            start: CellRef::new(self.start.row.min(cell.row), self.start.col.min(cell.col)),
            end: CellRef::new(self.end.row.max(cell.row), self.end.col.max(cell.col)),
        }
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

impl FromStr for CellRange {
    type Err = anyhow::Error;
    /// Accepts `A1:C3` and the single-cell form `A1`.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((a, b)) => Ok(Self::new(a.parse()?, b.parse()?)),
            None => {
                let cell: CellRef = s.parse()?;
                Ok(Self::new(cell, cell))
            }
        }
    }
}

/// `"<startCell>:<endCell>"` for a range anchored at `start` whose bottom-right
/// corner moves to (`end_row`, `end_col`).
pub fn format_range(start: CellRef, end_row: u32, end_col: u32) -> String {
    format!("{}:{}", start, CellRef::new(end_row, end_col))
}

/// 0-based column index → letters (0 → "A", 26 → "AA").
pub fn col_letter(mut n: u32) -> String {
    let mut s = String::new();
    loop {
        s.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    s
}

/// Column letters → 0-based index. Non-letters are ignored.
pub fn col_index(s: &str) -> u32 {
    s.bytes()
        .filter(|b| b.is_ascii_alphabetic())
        .fold(0u32, |acc, b| acc * 26 + (b.to_ascii_uppercase() - b'A' + 1) as u32)
        .saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_round_trip_at_boundaries() {
        for (idx, letters) in [(0, "A"), (25, "Z"), (26, "AA"), (701, "ZZ"), (702, "AAA"), (MAX_COL, "XFD")] {
            assert_eq!(col_letter(idx), letters);
            assert_eq!(col_index(letters), idx);
        }
    }

    #[test]
    fn parses_absolute_and_relative_refs() -> Result<()> {
        assert_eq!("$B$2".parse::<CellRef>()?, CellRef::new(1, 1));
        let range: CellRange = "B2:D5".parse()?;
        assert_eq!(range.start, CellRef::new(1, 1));
        assert_eq!(range.end, CellRef::new(4, 3));
        assert_eq!(range.height(), 4);
        assert_eq!(range.width(), 3);
        assert_eq!(range.to_string(), "B2:D5");
        Ok(())
    }

    #[test]
    fn reversed_corners_are_normalized() -> Result<()> {
        let range: CellRange = "D5:B2".parse()?;
        assert_eq!(range.to_string(), "B2:D5");
        Ok(())
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "A0", "1A", "A1:", "ZZZZ1", "A1048577"] {
            let err = bad.parse::<CellRange>().unwrap_err();
            assert!(
                matches!(err.downcast_ref::<CollectError>(), Some(CollectError::InvalidReference(_))),
                "{bad}: {err}"
            );
        }
    }

    #[test]
    fn format_range_of_single_cell_table() {
        assert_eq!(format_range(CellRef::new(1, 1), 1, 1), "B2:B2");
        assert_eq!(format_range(CellRef::new(0, 0), 9, 2), "A1:C10");
    }
}
