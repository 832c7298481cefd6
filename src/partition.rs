//! Dataset partitioning: shuffle the catalog, cut it into subsets, split each
//! subset into train/val slices and copy the files into stage directories.

use indicatif::ProgressBar;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::catalog::{Catalog, IMAGE_DIR_NAME};
use crate::coco::Category;
use crate::config::PipelineConfig;
use crate::encoder::ANNOTATION_DIR_NAME;
use crate::error::{PipelineError, Result};
use crate::types::{FileEntry, MatchedPair, SplitSlices, Subset};
use crate::utils::{create_progress_bar, ensure_directory};

/// Shuffle in place; a seed makes the order reproducible.
pub fn shuffle<T>(items: &mut [T], seed: Option<u64>) {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    items.shuffle(&mut rng);
}

/// Cut `items` into exactly `k` contiguous slices whose sizes differ by at most one.
pub fn chunk<T>(items: &[T], k: usize) -> Vec<&[T]> {
    let k = k.max(1);
    let base = items.len() / k;
    let extra = items.len() % k;

    let mut chunks = Vec::with_capacity(k);
    let mut start = 0;
    for i in 0..k {
        let len = base + usize::from(i < extra);
        chunks.push(&items[start..start + len]);
        start += len;
    }
    chunks
}

/// Number of training members out of `n`: `floor(ratio * n)`.
pub fn train_len(n: usize, ratio: f64) -> usize {
    // absorb representation error so 0.95 * 20 is 19, not 18
    let len = (ratio * n as f64 + 1e-9).floor() as usize;
    len.min(n)
}

/// Split a subset into its training slice and the remaining validation slice.
pub fn split_train_val(members: &[MatchedPair], ratio: f64) -> SplitSlices<'_> {
    let (train, val) = members.split_at(train_len(members.len(), ratio));
    SplitSlices { train, val }
}

/// Partition already-shuffled pairs into `k` subsets.
pub fn make_subsets(pairs: Vec<MatchedPair>, k: usize) -> Vec<Subset> {
    chunk(&pairs, k)
        .into_iter()
        .enumerate()
        .map(|(index, members)| Subset {
            index,
            members: members.to_vec(),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct StageDirs {
    pub train: PathBuf,
    pub val: PathBuf,
}

/// Create `<root>/train_stage<N>` and `<root>/val_stage<N>` with their
/// `images/` and `annotations/` children, keeping anything already there.
pub fn create_stage_dirs(root: &Path, stage: u32) -> std::io::Result<StageDirs> {
    let train = root.join(format!("train_stage{}", stage));
    let val = root.join(format!("val_stage{}", stage));
    for dir in [&train, &val] {
        ensure_directory(&dir.join(IMAGE_DIR_NAME))?;
        ensure_directory(&dir.join(ANNOTATION_DIR_NAME))?;
    }
    Ok(StageDirs { train, val })
}

/// `<mask stem>_<category name><mask ext>`, keeping the image stem as a prefix.
pub fn mask_target_name(mask: &FileEntry, category: &Category) -> String {
    match mask.extension() {
        Some(ext) => format!("{}_{}.{}", mask.stem, category.name, ext),
        None => format!("{}_{}", mask.stem, category.name),
    }
}

/// Copy one image and, per category, its first matching mask into `dir`.
/// Returns the number of masks copied.
pub fn materialize_pair(pair: &MatchedPair, categories: &[Category], dir: &Path) -> std::io::Result<usize> {
    fs::copy(&pair.image.path, dir.join(IMAGE_DIR_NAME).join(pair.image.file_name()))?;

    let mut copied = 0;
    for category in categories {
        match pair.first_mask(category.id) {
            Some(mask) => {
                let target = dir.join(ANNOTATION_DIR_NAME).join(mask_target_name(mask, category));
                fs::copy(&mask.path, &target)?;
                debug!("Copied {} to {}", mask.path.display(), target.display());
                copied += 1;
            }
            None => debug!(
                "No annotation found for {} where category id = {}",
                pair.image.path.display(),
                category.id
            ),
        }
    }
    Ok(copied)
}

/// Split members into those with a unique image file name and the later
/// ones that would land on an earlier member's file in the flat `images/`.
pub fn split_name_collisions(members: &[MatchedPair]) -> (Vec<&MatchedPair>, Vec<&MatchedPair>) {
    let mut seen = HashSet::new();
    members
        .iter()
        .partition(|pair| seen.insert(pair.image.file_name()))
}

/// Copy a slice into `dir`; returns how many members were copied.
fn copy_slice(members: &[MatchedPair], categories: &[Category], dir: &Path, pb: &ProgressBar) -> usize {
    let (unique, collisions) = split_name_collisions(members);
    for pair in &collisions {
        warn!(
            "Skipping {}: another image named {} is already staged in {}",
            pair.image.path.display(),
            pair.image.file_name(),
            dir.display()
        );
        pb.inc(1);
    }

    unique
        .par_iter()
        .map(|pair| {
            let copied = match materialize_pair(pair, categories, dir) {
                Ok(_) => 1usize,
                Err(e) => {
                    warn!("Failed to copy {} into {}: {}", pair.image.path.display(), dir.display(), e);
                    0
                }
            };
            pb.inc(1);
            copied
        })
        .sum()
}

/// Shuffle, split and copy the catalog. Returns the stage directories in
/// stage order, each train directory followed by its val directory.
pub fn partition_dataset(catalog: &Catalog, config: &PipelineConfig) -> Result<Vec<PathBuf>> {
    let mut pairs = catalog.matched_pairs();
    info!(
        "Found {} images. Will split into {} training and validation sets.",
        pairs.len(),
        config.subsets
    );
    shuffle(&mut pairs, config.seed);
    let total = pairs.len() as u64;
    let subsets = make_subsets(pairs, config.subsets);

    ensure_directory(&config.root_dir).map_err(|source| PipelineError::OutputRoot {
        path: config.root_dir.clone(),
        source,
    })?;

    let pb = create_progress_bar(total, "Copy");
    let mut dirs = Vec::with_capacity(subsets.len() * 2);
    for subset in &subsets {
        let stage = config.start_stage + subset.index as u32;
        let stage_dirs = create_stage_dirs(&config.root_dir, stage)?;
        let slices = split_train_val(&subset.members, config.train_ratio);
        info!(
            "Stage {}: {} training and {} validation images",
            stage,
            slices.train.len(),
            slices.val.len()
        );

        let train = copy_slice(slices.train, &config.categories, &stage_dirs.train, &pb);
        let val = copy_slice(slices.val, &config.categories, &stage_dirs.val, &pb);
        debug!("Stage {}: copied {} training and {} validation images", stage, train, val);
        dirs.push(stage_dirs.train);
        dirs.push(stage_dirs.val);
    }
    pb.finish_with_message("Copy complete");

    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use clap::Parser;
    use std::collections::BTreeMap;

    fn pairs(n: usize) -> Vec<MatchedPair> {
        (0..n)
            .map(|i| MatchedPair {
                image: FileEntry::new(PathBuf::from(format!("img_{}.jpg", i))),
                masks: BTreeMap::new(),
            })
            .collect()
    }

    #[test]
    fn test_chunk_sizes() {
        let items: Vec<usize> = (0..1000).collect();
        let sizes: Vec<usize> = chunk(&items, 5).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![200, 200, 200, 200, 200]);

        let items: Vec<usize> = (0..1003).collect();
        let sizes: Vec<usize> = chunk(&items, 5).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![201, 201, 201, 200, 200]);

        let items: Vec<usize> = (0..2).collect();
        let sizes: Vec<usize> = chunk(&items, 4).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_subsets_cover_catalog_once() {
        let mut all = pairs(103);
        shuffle(&mut all, Some(7));
        let subsets = make_subsets(all, 4);
        assert_eq!(subsets.len(), 4);

        let mut seen = HashSet::new();
        for subset in &subsets {
            for member in &subset.members {
                assert!(seen.insert(member.image.stem.clone()));
            }
        }
        assert_eq!(seen.len(), 103);
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let mut a: Vec<usize> = (0..50).collect();
        let mut b: Vec<usize> = (0..50).collect();
        shuffle(&mut a, Some(42));
        shuffle(&mut b, Some(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_train_val_split() {
        for n in [0usize, 1, 7, 20, 200, 201] {
            let members = pairs(n);
            let slices = split_train_val(&members, 0.95);
            assert_eq!(slices.train.len() + slices.val.len(), n);
            assert_eq!(slices.train.len(), train_len(n, 0.95));
        }
        assert_eq!(train_len(20, 0.95), 19);
        assert_eq!(train_len(200, 0.95), 190);
        assert_eq!(train_len(10, 0.0), 0);
        assert_eq!(train_len(10, 1.0), 10);
        assert_eq!(train_len(7, 0.5), 3);
    }

    #[test]
    fn test_mask_target_name() {
        let category = crate::config::parse_category("1:footprint:building").unwrap();
        let mask = FileEntry::new(PathBuf::from("labels/1/tile_3.tif"));
        assert_eq!(mask_target_name(&mask, &category), "tile_3_footprint.tif");
    }

    #[test]
    fn test_same_file_name_is_staged_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = temp_dir.path().join("source/images");
        fs::create_dir_all(source.join("a")).unwrap();
        fs::create_dir_all(source.join("b")).unwrap();
        fs::write(source.join("a/tile.png"), b"first").unwrap();
        fs::write(source.join("b/tile.png"), b"second").unwrap();
        fs::write(source.join("b/other.png"), b"third").unwrap();
        let members: Vec<MatchedPair> = ["a/tile.png", "b/tile.png", "b/other.png"]
            .iter()
            .map(|name| MatchedPair {
                image: FileEntry::new(source.join(name)),
                masks: BTreeMap::new(),
            })
            .collect();

        let (unique, collisions) = split_name_collisions(&members);
        assert_eq!(unique.len(), 2);
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].image.path, source.join("b/tile.png"));

        let stage = create_stage_dirs(&temp_dir.path().join("out"), 1).unwrap();
        let copied = copy_slice(&members, &[], &stage.train, &ProgressBar::hidden());
        assert_eq!(copied, 2);
        assert_eq!(fs::read(stage.train.join("images/tile.png")).unwrap(), b"first");
    }

    #[test]
    fn test_unusable_output_root_is_fatal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("dataset");
        fs::write(&root, b"not a directory").unwrap();
        let args = Args::parse_from([
            "masks2coco".to_string(),
            "-s".to_string(),
            temp_dir.path().display().to_string(),
            "-o".to_string(),
            root.display().to_string(),
        ]);
        let config = args.to_pipeline_config().unwrap();

        let result = partition_dataset(&Catalog::default(), &config);

        match result {
            Err(PipelineError::OutputRoot { path, .. }) => assert_eq!(path, root),
            other => panic!("expected OutputRoot error, got {:?}", other),
        }
        assert!(root.is_file());
    }
}
