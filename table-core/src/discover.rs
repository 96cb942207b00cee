//! discover.rs – input workbook discovery.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::debug;

use crate::CollectError;

/// Regular files directly inside `dir` whose name ends with `extension`
/// (case-insensitive), sorted. Excel lock files (`~$…`) are left out.
pub fn list_workbooks<P: AsRef<Path>>(dir: P, extension: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(CollectError::DirectoryNotFound(dir.to_path_buf()).into());
    }
    let suffix = format!(".{}", extension.trim_start_matches('.').to_lowercase());

    let mut out = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("cannot list {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.to_lowercase().ends_with(&suffix) {
            continue;
        }
        if name.starts_with("~$") {
            debug!("skipping lock file {}", path.display());
            continue;
        }
        out.push(path);
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lists_matching_regular_files_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["b.xlsx", "A.XLSX", "notes.txt", "~$b.xlsx", "archive.xlsx.bak"] {
            fs::write(dir.path().join(name), b"x")?;
        }
        fs::create_dir(dir.path().join("folder.xlsx"))?;

        let found: Vec<String> = list_workbooks(dir.path(), ".xlsx")?
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(found, vec!["A.XLSX", "b.xlsx"]);
        Ok(())
    }

    #[test]
    fn extension_without_dot() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("x.xlsm"), b"x")?;
        fs::write(dir.path().join("y.xlsx"), b"x")?;
        assert_eq!(list_workbooks(dir.path(), "xlsm")?, vec![dir.path().join("x.xlsm")]);
        Ok(())
    }

    #[test]
    fn missing_directory_is_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let missing = dir.path().join("nope");
        let err = list_workbooks(&missing, ".xlsx").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CollectError>(),
            Some(CollectError::DirectoryNotFound(p)) if *p == missing
        ));
        // a file is not a directory either
        let file = dir.path().join("f.xlsx");
        fs::write(&file, b"x")?;
        assert!(list_workbooks(&file, ".xlsx").is_err());
        Ok(())
    }
}
