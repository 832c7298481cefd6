//! File catalog: enumerate images and masks and join them by filename stem.

use jwalk::{Parallelism, WalkDir};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::coco::Category;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::types::{FileEntry, MatchedPair};
use crate::utils::{compile_patterns, matches_any};

pub const IMAGE_DIR_NAME: &str = "images";
pub const LABEL_DIR_NAME: &str = "labels";

/// How a mask stem must relate to an image stem to be joined with it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatchRule {
    /// Mask stem starts with the image stem.
    Prefix,
    /// Image stem appears anywhere in the mask stem.
    Contains,
}

/// Image stem -> masks joined to it.
///
/// When several image stems fit one mask, the mask goes to the longest of
/// them (earliest position on ties), so `tile_1` never claims `tile_10_x`.
#[derive(Debug, Default, Clone)]
pub struct MatchIndex {
    by_stem: HashMap<String, Vec<FileEntry>>,
}

impl MatchIndex {
    pub fn build<'a, I>(image_stems: I, masks: &[FileEntry], rule: MatchRule) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::build_keyed(image_stems, masks, rule, |mask| mask.stem.as_str())
    }

    /// Like [`MatchIndex::build`], but matches image stems against `key(mask)`
    /// instead of the whole mask stem.
    pub fn build_keyed<'a, I, F>(image_stems: I, masks: &[FileEntry], rule: MatchRule, key: F) -> Self
    where
        I: IntoIterator<Item = &'a str>,
        F: Fn(&FileEntry) -> &str,
    {
        let stems: HashSet<&str> = image_stems.into_iter().filter(|s| !s.is_empty()).collect();
        let mut by_stem: HashMap<String, Vec<FileEntry>> = HashMap::new();

        for mask in masks {
            match owning_stem(key(mask), &stems, rule) {
                Some(stem) => by_stem.entry(stem.to_string()).or_default().push(mask.clone()),
                None => debug!("Mask {} matches no image", mask.path.display()),
            }
        }

        Self { by_stem }
    }

    pub fn masks_for(&self, image_stem: &str) -> &[FileEntry] {
        self.by_stem
            .get(image_stem)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn matched_mask_count(&self) -> usize {
        self.by_stem.values().map(Vec::len).sum()
    }
}

fn owning_stem<'a>(mask_stem: &str, stems: &HashSet<&'a str>, rule: MatchRule) -> Option<&'a str> {
    let bounds: Vec<usize> = mask_stem
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(mask_stem.len()))
        .collect();
    let starts = match rule {
        MatchRule::Prefix => &bounds[..1],
        MatchRule::Contains => &bounds[..bounds.len() - 1],
    };

    let mut best: Option<&'a str> = None;
    for (si, &start) in starts.iter().enumerate() {
        // longest candidate first; stop once nothing longer than `best` is left
        for &end in bounds[si + 1..].iter().rev() {
            if best.is_some_and(|b| end - start <= b.len()) {
                break;
            }
            if let Some(&stem) = stems.get(&mask_stem[start..end]) {
                best = Some(stem);
                break;
            }
        }
    }
    best
}

/// Recursively collect files under `root` whose basename matches any pattern.
///
/// A missing or unreadable root is fatal; entries that cannot be read are skipped.
pub fn collect_files(root: &Path, patterns: &[String]) -> Result<Vec<FileEntry>> {
    if !root.is_dir() || fs::read_dir(root).is_err() {
        return Err(PipelineError::SourceMissing(root.to_path_buf()));
    }
    let patterns = compile_patterns(patterns)?;

    let files = WalkDir::new(root)
        .skip_hidden(false)
        .sort(true)
        // walks run inside pool tasks; spawning onto the same pool could starve
        .parallelism(Parallelism::Serial)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|name| matches_any(&patterns, name))
        })
        .map(|e| FileEntry::new(e.path()))
        .collect();

    Ok(files)
}

/// Raw images plus, per category id, the raw masks of that category.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub images: Vec<FileEntry>,
    pub masks: BTreeMap<u32, Vec<FileEntry>>,
}

impl Catalog {
    /// Join each image with the masks whose stem begins with the image stem.
    pub fn matched_pairs(&self) -> Vec<MatchedPair> {
        let indexes: Vec<(u32, MatchIndex)> = self
            .masks
            .iter()
            .map(|(&id, masks)| {
                let stems = self.images.iter().map(|image| image.stem.as_str());
                (id, MatchIndex::build(stems, masks, MatchRule::Prefix))
            })
            .collect();

        self.images
            .iter()
            .map(|image| MatchedPair {
                image: image.clone(),
                masks: indexes
                    .iter()
                    .map(|(id, index)| (*id, index.masks_for(&image.stem).to_vec()))
                    .filter(|(_, masks)| !masks.is_empty())
                    .collect(),
            })
            .collect()
    }
}

/// Build the catalog from `<source>/images` and `<source>/labels/<category id>`.
pub fn build_catalog(config: &PipelineConfig) -> Result<Catalog> {
    let source = &config.source_dir;
    if !source.is_dir() {
        return Err(PipelineError::SourceMissing(source.clone()));
    }

    let image_dir = source.join(IMAGE_DIR_NAME);
    info!("Walking {} to collect images.", image_dir.display());
    let images = collect_files(&image_dir, &config.image_patterns)?;
    info!("Found {} image files.", images.len());

    let mut masks = BTreeMap::new();
    for category in &config.categories {
        masks.insert(category.id, collect_category_masks(source, category, &config.mask_patterns)?);
    }

    Ok(Catalog { images, masks })
}

fn collect_category_masks(source: &Path, category: &Category, patterns: &[String]) -> Result<Vec<FileEntry>> {
    let category_dir = source.join(LABEL_DIR_NAME).join(category.id.to_string());
    if !category_dir.is_dir() {
        warn!(
            "No label directory {} for category '{}' (id {})",
            category_dir.display(),
            category.name,
            category.id
        );
        return Ok(Vec::new());
    }

    let masks = collect_files(&category_dir, patterns)?;
    info!(
        "Found {} mask files for category '{}' (id {})",
        masks.len(),
        category.name,
        category.id
    );
    Ok(masks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entries(names: &[&str]) -> Vec<FileEntry> {
        names.iter().map(|n| FileEntry::new(PathBuf::from(n))).collect()
    }

    #[test]
    fn test_prefix_match_prefers_longest_stem() {
        let masks = entries(&["tile_1_mask.tif", "tile_10_mask.tif", "other.tif"]);
        let index = MatchIndex::build(["tile_1", "tile_10"], &masks, MatchRule::Prefix);

        assert_eq!(index.masks_for("tile_1"), &masks[0..1]);
        assert_eq!(index.masks_for("tile_10"), &masks[1..2]);
        assert!(index.masks_for("missing").is_empty());
        assert_eq!(index.matched_mask_count(), 2);
    }

    #[test]
    fn test_contains_match() {
        let masks = entries(&["tile_7_footprint.tif", "x_tile_7.tif", "tile_8.tif"]);

        let contains = MatchIndex::build(["tile_7"], &masks, MatchRule::Contains);
        assert_eq!(contains.masks_for("tile_7").len(), 2);

        let prefix = MatchIndex::build(["tile_7"], &masks, MatchRule::Prefix);
        assert_eq!(prefix.masks_for("tile_7").len(), 1);
    }

    #[test]
    fn test_collect_files_filters_by_pattern() {
        let temp_dir = tempfile::tempdir().unwrap();
        let nested = temp_dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp_dir.path().join("one.jpg"), b"x").unwrap();
        fs::write(nested.join("two.JPG"), b"x").unwrap();
        fs::write(nested.join("three.tif"), b"x").unwrap();

        let files = collect_files(temp_dir.path(), &["*.jpg".to_string()]).unwrap();
        let mut stems: Vec<_> = files.iter().map(|f| f.stem.clone()).collect();
        stems.sort();
        assert_eq!(stems, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_collect_files_missing_root_is_fatal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = collect_files(&temp_dir.path().join("nope"), &["*.jpg".to_string()]);
        assert!(matches!(result, Err(PipelineError::SourceMissing(_))));
    }

    #[test]
    fn test_matched_pairs() {
        let catalog = Catalog {
            images: entries(&["img/a.jpg", "img/b.jpg"]),
            masks: BTreeMap::from([(1, entries(&["lbl/a.tif", "lbl/a_2.tif"]))]),
        };

        let pairs = catalog.matched_pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].masks[&1].len(), 2);
        assert_eq!(pairs[0].first_mask(1).unwrap().stem, "a");
        assert!(pairs[1].masks.is_empty());
    }
}
