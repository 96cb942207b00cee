use std::path::PathBuf;

use thiserror::Error;

/// Failures the collector reacts to individually. Everything else travels as
/// a plain `anyhow::Error` with context attached.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("cannot open workbook {}: {reason}", .path.display())]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("sheet `{0}` not found")]
    SheetNotFound(String),

    #[error("no table `{table}` on sheet `{sheet}`")]
    TableNotFound { sheet: String, table: String },

    #[error("invalid cell reference `{0}`")]
    InvalidReference(String),

    #[error("table `{0}` has a totals row, appending below it is not supported")]
    TotalsRowUnsupported(String),
}
