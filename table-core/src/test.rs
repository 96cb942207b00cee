#![cfg(test)]

use std::path::{Path, PathBuf};

use anyhow::Result;
use pretty_assertions::assert_eq;

use crate::{
    CellType, CellValue, CollectError, DataFormatter, Row, XlsxWorkbook, append_rows,
    fixture::{FixtureCell, SheetBuilder, TableSpec, WorkbookBuilder},
    read_table, read_tables, table_headers,
};

fn text(s: &str) -> CellValue {
    CellValue::new(CellType::Text, s)
}

fn number(s: &str) -> CellValue {
    CellValue::new(CellType::Numeric, s)
}

fn sheet_names(path: &Path) -> Result<Vec<String>> {
    let wb = XlsxWorkbook::open(path)?;
    Ok(wb.sheets().iter().map(|s| s.name.clone()).collect())
}

/// Source workbook: `テーブル1` on Data, `テーブル2` plus an unrelated table on Extra.
fn source_workbook(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("source.xlsx");
    WorkbookBuilder::new()
        .number_format("yyyy-mm-dd")
        .sheet(
            SheetBuilder::new("Data")
                .cell("A1", "title, outside the table")
                .row("B2", ["Name", "Qty", "Price", "When"])
                .row(
                    "B3",
                    [
                        FixtureCell::from("apple"),
                        3.0.into(),
                        FixtureCell::Formula { formula: "C3*2".into(), cached: Some(1.5) },
                        FixtureCell::Styled(45366.0, 1),
                    ],
                )
                .row(
                    "B4",
                    [
                        FixtureCell::from("pear"),
                        FixtureCell::Error("#N/A".into()),
                        FixtureCell::Formula { formula: "C4*2".into(), cached: None },
                    ],
                )
                .table(TableSpec::new("テーブル1", "B2:E4")),
        )
        .sheet(
            SheetBuilder::new("Extra")
                .row("A1", ["Name", "Flag"])
                .row("A2", [FixtureCell::from("plum"), true.into()])
                .row("D1", ["Name"])
                .row("D2", ["ignored"])
                .table(TableSpec::new("Table9", "A1:B2").display_name("テーブル2"))
                .table(TableSpec::new("Other", "D1:D2")),
        )
        .write_to(&path)?;
    Ok(path)
}

/// Destination workbook: an untouched first sheet and `Summary` with a
/// header-only table at B2:D2.
fn summary_workbook(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("summary.xlsx");
    WorkbookBuilder::new()
        .number_format("0.00")
        .sheet(SheetBuilder::new("Notes").cell("A1", "keep me").cell("B7", 42.0))
        .sheet(
            SheetBuilder::new("Summary")
                .row("B2", ["Name", "Qty", "Active"])
                .cell("C3", FixtureCell::Styled(0.0, 1))
                .cell("F10", "below and aside")
                .table(TableSpec::new("Summary", "B2:D2")),
        )
        .write_to(&path)?;
    Ok(path)
}

#[test]
fn sheets_are_listed_in_tab_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = source_workbook(dir.path())?;
    assert_eq!(sheet_names(&path)?, vec!["Data", "Extra"]);
    Ok(())
}

#[test]
fn headers_come_from_the_first_range_row() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let wb = XlsxWorkbook::open(source_workbook(dir.path())?)?;
    let table = wb.find_table("Data", Some("テーブル1"))?;
    assert_eq!(table.reference(), "B2:E4");
    assert_eq!(
        table_headers(&wb, &table, &DataFormatter::default())?,
        vec!["Name", "Qty", "Price", "When"]
    );
    Ok(())
}

#[test]
fn rows_carry_type_and_display_text() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let wb = XlsxWorkbook::open(source_workbook(dir.path())?)?;
    let table = wb.find_table("Data", None)?;
    let rows = read_table(&wb, &table, &DataFormatter::default())?;

    let expected: Vec<Row> = vec![
        [
            ("Name", text("apple")),
            ("Qty", number("3")),
            ("Price", CellValue::new(CellType::Formula, "1.5")),
            ("When", number("2024-03-15")),
        ]
        .into_iter()
        .collect(),
        [
            ("Name", text("pear")),
            ("Qty", CellValue::new(CellType::Error, "#N/A")),
            ("Price", CellValue::new(CellType::Formula, "C4*2")),
            ("When", CellValue::blank()),
        ]
        .into_iter()
        .collect(),
    ];
    assert_eq!(rows, expected);
    Ok(())
}

#[test]
fn allow_list_matches_name_or_display_name() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let wb = XlsxWorkbook::open(source_workbook(dir.path())?)?;
    let rows = read_tables(&wb, &["テーブル1", "テーブル2"], &DataFormatter::default())?;

    let names: Vec<&str> = rows
        .iter()
        .filter_map(|r| r.get("Name").map(|v| v.value.as_str()))
        .collect();
    assert_eq!(names, vec!["apple", "pear", "plum"]);
    assert_eq!(
        rows[2].get("Flag"),
        Some(&CellValue::new(CellType::Boolean, "TRUE"))
    );

    assert!(read_tables(&wb, &["nothing"], &DataFormatter::default())?.is_empty());
    Ok(())
}

#[test]
fn headerless_and_totals_tables_bound_their_data() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("shapes.xlsx");
    WorkbookBuilder::new()
        .sheet(
            SheetBuilder::new("S")
                .row("A1", ["k1", "v1"])
                .row("A2", ["k2", "v2"])
                .table(TableSpec::new("Bare", "A1:B2").headerless().columns(["Key", "Value"]))
                .row("D1", ["Item", "Amount"])
                .row("D2", [FixtureCell::from("x"), 1.0.into()])
                .row("D3", [FixtureCell::from("Total"), 1.0.into()])
                .table(TableSpec::new("WithTotals", "D1:E3").totals_row()),
        )
        .write_to(&path)?;
    let wb = XlsxWorkbook::open(&path)?;
    let f = DataFormatter::default();

    let bare = read_table(&wb, &wb.find_table("S", Some("Bare"))?, &f)?;
    assert_eq!(bare.len(), 2);
    assert_eq!(bare[0].get("Key"), Some(&text("k1")));
    assert_eq!(bare[1].get("Value"), Some(&text("v2")));

    let totals = read_table(&wb, &wb.find_table("S", Some("WithTotals"))?, &f)?;
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0].get("Item"), Some(&text("x")));
    Ok(())
}

#[test]
fn append_writes_typed_cells_and_grows_the_range() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = summary_workbook(dir.path())?;
    let mut wb = XlsxWorkbook::open(&path)?;
    let table = wb.find_table("Summary", None)?;

    let rows: Vec<Row> = vec![
        [
            ("Name", text("apple")),
            ("Qty", number("7")),
            ("Active", CellValue::new(CellType::Boolean, "TRUE")),
            ("Ignored", text("not a destination column")),
        ]
        .into_iter()
        .collect(),
        [("Name", text("pear")), ("Qty", number("n/a"))].into_iter().collect(),
    ];
    let outcome = append_rows(&mut wb, &table, &rows, &DataFormatter::default())?;
    assert_eq!(outcome.rows, 2);
    assert_eq!(outcome.new_range.to_string(), "B2:D4");
    wb.save(&path)?;

    let wb = XlsxWorkbook::open(&path)?;
    let table = wb.find_table("Summary", Some("Summary"))?;
    assert_eq!(table.reference(), "B2:D4");

    let cells = wb.cells(&table.sheet)?;
    let qty = cells.get("C3".parse()?).cloned().unwrap_or_default();
    assert_eq!((qty.result, qty.value.as_str(), qty.style), (CellType::Numeric, "7", Some(1)));
    let fallback = cells.get("C4".parse()?).cloned().unwrap_or_default();
    assert_eq!((fallback.result, fallback.value.as_str()), (CellType::Text, "n/a"));
    let absent = cells.get("D4".parse()?).cloned().unwrap_or_default();
    assert_eq!((absent.result, absent.value.as_str()), (CellType::Text, ""));
    assert_eq!(
        cells.get("F10".parse()?).map(|c| c.value.as_str()),
        Some("below and aside")
    );

    let read_back = read_table(&wb, &table, &DataFormatter::default())?;
    assert_eq!(read_back[0].get("Qty"), Some(&number("7.00")));
    assert_eq!(
        read_back[0].get("Active"),
        Some(&CellValue::new(CellType::Boolean, "TRUE"))
    );
    Ok(())
}

#[test]
fn repeated_appends_continue_below_the_last_row() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut wb = XlsxWorkbook::open(summary_workbook(dir.path())?)?;
    // the handle goes stale after the first append
    let table = wb.find_table("Summary", None)?;

    let one: Vec<Row> = vec![[("Name", text("a"))].into_iter().collect()];
    let first = append_rows(&mut wb, &table, &one, &DataFormatter::default())?;
    let second = append_rows(&mut wb, &table, &one, &DataFormatter::default())?;
    assert_eq!(first.new_range.to_string(), "B2:D3");
    assert_eq!(second.new_range.to_string(), "B2:D4");

    let table = wb.find_table("Summary", None)?;
    let names: Vec<String> = read_table(&wb, &table, &DataFormatter::default())?
        .iter()
        .map(|r| r.get("Name").map(|v| v.value.clone()).unwrap_or_default())
        .collect();
    assert_eq!(names, vec!["a", "a"]);
    Ok(())
}

#[test]
fn appending_nothing_leaves_the_workbook_alone() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut wb = XlsxWorkbook::open(summary_workbook(dir.path())?)?;
    let table = wb.find_table("Summary", None)?;
    let sheet_before = wb.part(&table.sheet.path).map(<[u8]>::to_vec);
    let table_before = wb.part(&table.part_path).map(<[u8]>::to_vec);

    let outcome = append_rows(&mut wb, &table, &[], &DataFormatter::default())?;
    assert_eq!(outcome.rows, 0);
    assert_eq!(outcome.new_range.to_string(), "B2:D2");
    assert_eq!(wb.part(&table.sheet.path).map(<[u8]>::to_vec), sheet_before);
    assert_eq!(wb.part(&table.part_path).map(<[u8]>::to_vec), table_before);
    Ok(())
}

#[test]
fn other_sheets_survive_a_save_byte_for_byte() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = summary_workbook(dir.path())?;
    let original = XlsxWorkbook::open(&path)?;
    let notes = original.sheet("Notes")?.clone();

    let mut wb = XlsxWorkbook::open(&path)?;
    let table = wb.find_table("Summary", None)?;
    let one: Vec<Row> = vec![[("Name", text("x"))].into_iter().collect()];
    append_rows(&mut wb, &table, &one, &DataFormatter::default())?;
    let out = dir.path().join("out.xlsx");
    wb.save(&out)?;

    let saved = XlsxWorkbook::open(&out)?;
    assert_eq!(saved.part(&notes.path), original.part(&notes.path));
    assert_eq!(saved.part("xl/styles.xml"), original.part("xl/styles.xml"));
    assert_eq!(sheet_names(&out)?, vec!["Notes", "Summary"]);
    Ok(())
}

#[test]
fn totals_row_tables_are_not_appended_to() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("totals.xlsx");
    WorkbookBuilder::new()
        .sheet(
            SheetBuilder::new("Summary")
                .row("A1", ["Name"])
                .row("A2", ["Total"])
                .table(TableSpec::new("T", "A1:A2").totals_row()),
        )
        .write_to(&path)?;
    let mut wb = XlsxWorkbook::open(&path)?;
    let table = wb.find_table("Summary", None)?;
    let one: Vec<Row> = vec![[("Name", text("x"))].into_iter().collect()];
    let err = append_rows(&mut wb, &table, &one, &DataFormatter::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CollectError>(),
        Some(CollectError::TotalsRowUnsupported(name)) if name == "T"
    ));
    Ok(())
}

#[test]
fn lookups_report_what_is_missing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let wb = XlsxWorkbook::open(summary_workbook(dir.path())?)?;

    let err = wb.find_table("Nope", None).unwrap_err();
    assert!(matches!(err.downcast_ref::<CollectError>(), Some(CollectError::SheetNotFound(s)) if s == "Nope"));

    let err = wb.find_table("Notes", None).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CollectError>(),
        Some(CollectError::TableNotFound { sheet, .. }) if sheet == "Notes"
    ));
    Ok(())
}

#[test]
fn unreadable_packages_are_invalid_format() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("broken.xlsx");
    std::fs::write(&path, b"this is not a zip archive")?;
    let err = XlsxWorkbook::open(&path).err().map(|e| e.to_string()).unwrap_or_default();
    assert!(err.contains("broken.xlsx"), "{err}");

    let err = XlsxWorkbook::open(&path).err();
    assert!(matches!(
        err.as_ref().and_then(|e| e.downcast_ref::<CollectError>()),
        Some(CollectError::InvalidFormat { .. })
    ));
    Ok(())
}
