use glob::{MatchOptions, Pattern};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Create a progress bar with the given length and label
pub fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
                label
            ))
            .progress_chars("#>-"),
    );
    pb
}

/// Create a spinner for work whose total is not known up front
pub fn create_spinner(label: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{}] {{pos}} {{msg}}",
                label
            )),
    );
    pb.enable_steady_tick(100);
    pb
}

/// Create a directory (and parents) unless it already exists
pub fn ensure_directory(path: &Path) -> std::io::Result<PathBuf> {
    if !path.is_dir() {
        fs::create_dir_all(path)?;
    }
    Ok(path.to_path_buf())
}

/// Compile a list of glob patterns
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).map_err(Into::into))
        .collect()
}

/// Whether a basename matches any pattern, ignoring case
pub fn matches_any(patterns: &[Pattern], file_name: &str) -> bool {
    patterns
        .iter()
        .any(|p| p.matches_with(file_name, MATCH_OPTIONS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_any() {
        let patterns = compile_patterns(&["*.jpg".to_string(), "*.png".to_string()]).unwrap();
        assert!(matches_any(&patterns, "tile.jpg"));
        assert!(matches_any(&patterns, "TILE.JPG"));
        assert!(matches_any(&patterns, "tile.png"));
        assert!(!matches_any(&patterns, "tile.tif"));
        assert!(!matches_any(&patterns, "tile.jpg.bak"));
    }

    #[test]
    fn test_ensure_directory_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("train_stage1/images");
        ensure_directory(&dir).unwrap();
        fs::write(dir.join("keep.jpg"), b"x").unwrap();
        ensure_directory(&dir).unwrap();
        assert!(dir.join("keep.jpg").exists());
    }
}
