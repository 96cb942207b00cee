//! config.rs – run configuration: defaults, an optional JSON file, CLI flags.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, ensure};
use clap::Parser;
use serde::{Deserialize, Serialize};
use table_core::Locale;

#[derive(Parser, Debug, Default)]
#[command(
    name = "xlsx-collect",
    about = "Collect rows from named tables in a folder of workbooks into one summary table."
)]
pub struct Args {
    /// Folder scanned for input workbooks (not recursive).
    #[arg(long, value_name = "DIR")]
    pub input_dir: Option<PathBuf>,

    /// Workbook holding the summary table; rewritten in place.
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Source table name or display name to collect (repeatable).
    #[arg(long = "table", value_name = "NAME")]
    pub tables: Vec<String>,

    /// Sheet of the output workbook holding the summary table.
    #[arg(long)]
    pub summary_sheet: Option<String>,

    /// Summary table name; the sheet's first table when omitted.
    #[arg(long)]
    pub summary_table: Option<String>,

    /// File extension of input workbooks.
    #[arg(long)]
    pub extension: Option<String>,

    /// Locale for rendering numbers (en-US, ja-JP, de-DE, fr-FR).
    #[arg(long)]
    pub locale: Option<String>,

    /// Read and append in memory, but do not write the output.
    #[arg(long)]
    pub dry_run: bool,

    /// JSON file with the same settings; flags override it.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub input_dir: PathBuf,
    pub output: PathBuf,
    pub tables: Vec<String>,
    pub summary_sheet: String,
    pub summary_table: Option<String>,
    pub extension: String,
    pub locale: String,
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data"),
            output: PathBuf::from("summary.xlsx"),
            tables: vec!["テーブル1".to_owned(), "テーブル2".to_owned()],
            summary_sheet: "Summary".to_owned(),
            summary_table: None,
            extension: ".xlsx".to_owned(),
            locale: Locale::default().to_string(),
            dry_run: false,
        }
    }
}

impl Config {
    /// Reads a JSON config; absent keys keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Defaults, then the `--config` file, then explicit flags.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut cfg = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(v) = &args.input_dir {
            cfg.input_dir = v.clone();
        }
        if let Some(v) = &args.output {
            cfg.output = v.clone();
        }
        if !args.tables.is_empty() {
            cfg.tables = args.tables.clone();
        }
        if let Some(v) = &args.summary_sheet {
            cfg.summary_sheet = v.clone();
        }
        if let Some(v) = &args.summary_table {
            cfg.summary_table = Some(v.clone());
        }
        if let Some(v) = &args.extension {
            cfg.extension = v.clone();
        }
        if let Some(v) = &args.locale {
            cfg.locale = v.clone();
        }
        cfg.dry_run |= args.dry_run;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.input_dir.as_os_str().is_empty(), "input_dir is empty");
        ensure!(!self.output.as_os_str().is_empty(), "output is empty");
        ensure!(!self.tables.is_empty(), "no source tables configured");
        ensure!(
            self.tables.iter().all(|t| !t.trim().is_empty()),
            "source table names must not be empty"
        );
        ensure!(!self.summary_sheet.trim().is_empty(), "summary_sheet is empty");
        ensure!(
            self.extension.len() > 1 && self.extension.starts_with('.'),
            "extension must look like `.xlsx`, got `{}`",
            self.extension
        );
        self.locale()?;
        Ok(())
    }

    pub fn locale(&self) -> Result<Locale> {
        self.locale.parse()
    }
}
