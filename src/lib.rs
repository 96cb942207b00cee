//! xlsx-collect — gathers rows from named tables across a folder of workbooks
//! and appends them to one summary table.

mod config;

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use table_core::{CollectError, DataFormatter, XlsxWorkbook, append_rows, list_workbooks, read_tables};

pub use config::{Args, Config};

/// What a run did.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub files_read: usize,
    pub rows_appended: usize,
    /// Summary table range after the last append.
    pub range: Option<String>,
    pub skipped: Vec<SkippedFile>,
    pub written: bool,
}

/// An input that could not be read.
#[derive(Debug, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Reads every input workbook, appends its rows to the summary table and
/// writes the output once at the end.
///
/// Unreadable inputs are skipped and reported in the summary; problems with
/// the output workbook abort the run.
pub fn run(config: &Config) -> Result<RunSummary> {
    config.validate()?;
    let formatter = DataFormatter::new(config.locale()?);

    let files = list_workbooks(&config.input_dir, &config.extension)?;
    info!("{} input workbooks in {}", files.len(), config.input_dir.display());

    let mut wb = XlsxWorkbook::open(&config.output)
        .with_context(|| format!("cannot open output {}", config.output.display()))?;
    let table = wb.find_table(&config.summary_sheet, config.summary_table.as_deref())?;
    debug!("summary table {} at {}", table.name, table.reference());

    let mut summary = RunSummary::default();
    for file in files {
        if same_file(&file, &config.output) {
            debug!("skipping the output workbook {}", file.display());
            continue;
        }
        let rows = match collect_file(&file, &config.tables, &formatter) {
            Ok(rows) => rows,
            Err(e) => {
                let reason = match e.downcast_ref::<CollectError>() {
                    Some(CollectError::InvalidFormat { reason, .. }) => reason.clone(),
                    _ => format!("{e:#}"),
                };
                warn!("Skipping {}: {reason}", file.display());
                summary.skipped.push(SkippedFile { path: file, reason });
                continue;
            }
        };
        info!("Read {} ({} rows)", file.display(), rows.len());
        summary.files_read += 1;

        let outcome = append_rows(&mut wb, &table, &rows, &formatter)?;
        if outcome.rows > 0 {
            info!("Appended {} rows, {} is now {}", outcome.rows, table.name, outcome.new_range);
        }
        summary.rows_appended += outcome.rows;
    }

    let table = wb.find_table(&config.summary_sheet, config.summary_table.as_deref())?;
    summary.range = Some(table.reference().to_owned());

    if config.dry_run {
        info!("Dry run, {} left untouched", config.output.display());
    } else {
        wb.save(&config.output)?;
        summary.written = true;
        info!("Wrote {}", config.output.display());
    }
    Ok(summary)
}

/// Rows of the allow-listed tables of one input workbook.
fn collect_file(path: &Path, tables: &[String], formatter: &DataFormatter) -> Result<Vec<table_core::Row>> {
    let wb = XlsxWorkbook::open(path)?;
    read_tables(&wb, tables, formatter)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
