// SPDX-License-Identifier: Apache-2.0

use glob::{glob, Pattern};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Expands include patterns and filters matches against exclude patterns.
/// Directories are skipped here; regular-file checks happen at stat time in
/// the prospector, closer to classification.
#[derive(Debug, Clone)]
pub struct FileFinder {
    include: Vec<String>,
    exclude: Vec<Pattern>,
}

impl FileFinder {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Result<Self> {
        let exclude = exclude
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| Error::InvalidGlob(e.to_string())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { include, exclude })
    }

    /// All matching paths, deduplicated and sorted for stable scan order.
    pub fn find(&self) -> Result<Vec<PathBuf>> {
        let mut found = BTreeSet::new();

        for pattern in &self.include {
            let matches = glob(pattern).map_err(|e| Error::InvalidGlob(e.to_string()))?;
            for entry in matches {
                let path = entry.map_err(|e| Error::Io(e.into_error()))?;
                if path.is_dir() {
                    continue;
                }
                if self.exclude.iter().any(|p| p.matches_path(&path)) {
                    continue;
                }
                found.insert(path);
            }
        }

        Ok(found.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, "x\n").unwrap();
        path
    }

    #[test]
    fn finds_matching_files() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "a.log");
        touch(&dir, "b.log");
        touch(&dir, "c.txt");

        let finder =
            FileFinder::new(vec![format!("{}/*.log", dir.path().display())], vec![]).unwrap();
        let files = finder.find().unwrap();
        assert_eq!(2, files.len());
    }

    #[test]
    fn exclude_patterns_filter_matches() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "app.log");
        touch(&dir, "app_debug.log");

        let finder = FileFinder::new(
            vec![format!("{}/*.log", dir.path().display())],
            vec![format!("{}/*_debug.log", dir.path().display())],
        )
        .unwrap();

        let files = finder.find().unwrap();
        assert_eq!(1, files.len());
        assert!(files[0].ends_with("app.log"));
    }

    #[test]
    fn overlapping_patterns_do_not_duplicate() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "a.log");

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = FileFinder::new(vec![pattern.clone(), pattern], vec![]).unwrap();
        assert_eq!(1, finder.find().unwrap().len());
    }

    #[test]
    fn directories_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub.log")).unwrap();
        touch(&dir, "real.log");

        let finder =
            FileFinder::new(vec![format!("{}/*.log", dir.path().display())], vec![]).unwrap();
        let files = finder.find().unwrap();
        assert_eq!(1, files.len());
        assert!(files[0].ends_with("real.log"));
    }

    #[test]
    fn invalid_exclude_pattern_is_an_error() {
        assert!(FileFinder::new(vec!["*.log".into()], vec!["[".into()]).is_err());
    }

    #[test]
    fn discovers_files_created_between_scans() {
        let dir = TempDir::new().unwrap();
        let finder =
            FileFinder::new(vec![format!("{}/*.log", dir.path().display())], vec![]).unwrap();
        assert!(finder.find().unwrap().is_empty());

        touch(&dir, "late.log");
        assert_eq!(1, finder.find().unwrap().len());
    }
}
