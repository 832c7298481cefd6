use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

use crate::coco::Category;
use crate::error::{PipelineError, Result};

/// Command-line arguments for converting image/mask collections into COCO datasets.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct Args {
    /// Source directory holding `images/` and `labels/<category id>/`
    #[arg(short = 's', long = "source_dir")]
    pub source_dir: String,

    /// Output root for the staged subsets and the COCO documents
    #[arg(short = 'o', long = "root_dir", default_value = "coco_dataset")]
    pub root_dir: String,

    /// Glob pattern(s) selecting raw image files
    #[arg(long = "image_pattern", default_values_t = vec!["*.jpg".to_string()])]
    pub image_patterns: Vec<String>,

    /// Glob pattern(s) selecting mask files
    #[arg(long = "mask_pattern", default_values_t = vec!["*.tif".to_string()])]
    pub mask_patterns: Vec<String>,

    /// Number of disjoint subsets to split the catalog into
    #[arg(long = "subsets", default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub subsets: u32,

    /// Fraction of each subset that goes into the training slice
    #[arg(long = "train_ratio", default_value_t = 0.95, value_parser = validate_ratio)]
    pub train_ratio: f64,

    /// Number of worker threads (defaults to the available parallelism)
    #[arg(short = 'w', long = "workers")]
    pub workers: Option<usize>,

    /// Maximum polygon simplification deviation, in pixels
    #[arg(long = "tolerance", default_value_t = 2.0, value_parser = validate_tolerance)]
    pub tolerance: f64,

    /// Category as id:name[:supercategory]; may be repeated
    #[arg(long = "category", value_parser = parse_category)]
    pub categories: Vec<Category>,

    /// Seed for the subset shuffle; omitted means a fresh random order each run
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Number given to the first train/val stage directory pair
    #[arg(long = "start_stage", default_value_t = 1)]
    pub start_stage: u32,

    /// Skip partitioning and only encode stage directories already under root_dir
    #[arg(long = "skip_split")]
    pub skip_split: bool,

    /// First image id of every document
    #[arg(long = "start_image_id", default_value_t = 1)]
    pub start_image_id: u32,

    /// First annotation id of every document
    #[arg(long = "start_annotation_id", default_value_t = 1)]
    pub start_annotation_id: u32,

    /// Dataset description written to the info block
    #[arg(long = "description", default_value = "Mask-derived instance annotations")]
    pub description: String,

    /// Contributor written to the info block
    #[arg(long = "contributor", default_value = "")]
    pub contributor: String,

    /// Dataset version written to the info block
    #[arg(long = "dataset_version", default_value = "0.0.1")]
    pub dataset_version: String,
}

/// Validated, immutable settings shared by every pipeline stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source_dir: PathBuf,
    pub root_dir: PathBuf,
    pub image_patterns: Vec<String>,
    pub mask_patterns: Vec<String>,
    pub subsets: usize,
    pub train_ratio: f64,
    pub workers: usize,
    pub tolerance: f64,
    pub categories: Vec<Category>,
    pub seed: Option<u64>,
    pub start_stage: u32,
    pub skip_split: bool,
    pub start_image_id: u32,
    pub start_annotation_id: u32,
    pub description: String,
    pub contributor: String,
    pub dataset_version: String,
}

impl Args {
    pub fn to_pipeline_config(&self) -> Result<PipelineConfig> {
        for pattern in self.image_patterns.iter().chain(&self.mask_patterns) {
            glob::Pattern::new(pattern)?;
        }

        let categories = if self.categories.is_empty() {
            default_categories()
        } else {
            self.categories.clone()
        };

        Ok(PipelineConfig {
            source_dir: PathBuf::from(&self.source_dir),
            root_dir: PathBuf::from(&self.root_dir),
            image_patterns: self.image_patterns.clone(),
            mask_patterns: self.mask_patterns.clone(),
            subsets: self.subsets as usize,
            train_ratio: self.train_ratio,
            workers: self.workers.filter(|&w| w > 0).unwrap_or_else(default_workers),
            tolerance: self.tolerance,
            categories,
            seed: self.seed,
            start_stage: self.start_stage,
            skip_split: self.skip_split,
            start_image_id: self.start_image_id,
            start_annotation_id: self.start_annotation_id,
            description: self.description.clone(),
            contributor: self.contributor.clone(),
            dataset_version: self.dataset_version.clone(),
        })
    }
}

pub fn default_categories() -> Vec<Category> {
    vec![Category {
        id: 1,
        name: "footprint".to_string(),
        supercategory: "building".to_string(),
    }]
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// Validate that the ratio is between 0.0 and 1.0
fn validate_ratio(s: &str) -> std::result::Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("RATIO must be between 0.0 and 1.0".to_string()),
    }
}

fn validate_tolerance(s: &str) -> std::result::Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if val >= 0.0 && val.is_finite() => Ok(val),
        _ => Err("TOLERANCE must be a non-negative number".to_string()),
    }
}

/// Parse `id:name[:supercategory]`. The supercategory defaults to the name.
pub fn parse_category(s: &str) -> std::result::Result<Category, PipelineError> {
    let invalid = || PipelineError::InvalidCategory(s.to_string());
    let mut parts = s.splitn(3, ':');

    let id = parts
        .next()
        .and_then(|id| id.trim().parse::<u32>().ok())
        .ok_or_else(invalid)?;
    let name = parts
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(invalid)?;
    let supercategory = parts
        .next()
        .map(str::trim)
        .filter(|sc| !sc.is_empty())
        .unwrap_or(name);

    Ok(Category {
        id,
        name: name.to_string(),
        supercategory: supercategory.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ratio() {
        assert!(validate_ratio("0.95").is_ok());
        assert!(validate_ratio("1.0").is_ok());
        assert!(validate_ratio("0.0").is_ok());
        assert!(validate_ratio("-0.1").is_err());
        assert!(validate_ratio("1.1").is_err());
        assert!(validate_ratio("abc").is_err());
    }

    #[test]
    fn test_parse_category() {
        let category = parse_category("1:footprint:building").unwrap();
        assert_eq!(category.id, 1);
        assert_eq!(category.name, "footprint");
        assert_eq!(category.supercategory, "building");

        let category = parse_category("7:road").unwrap();
        assert_eq!(category.supercategory, "road");

        assert!(parse_category("x:road").is_err());
        assert!(parse_category("3").is_err());
        assert!(parse_category("3::building").is_err());
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["masks2coco", "-s", "data"]);
        let config = args.to_pipeline_config().unwrap();

        assert_eq!(config.subsets, 5);
        assert_eq!(config.image_patterns, vec!["*.jpg".to_string()]);
        assert_eq!(config.mask_patterns, vec!["*.tif".to_string()]);
        assert_eq!(config.categories.len(), 1);
        assert_eq!(config.categories[0].name, "footprint");
        assert!(config.workers >= 1);
        assert!(config.seed.is_none());
    }

    #[test]
    fn test_rejects_zero_subsets() {
        assert!(Args::try_parse_from(["masks2coco", "-s", "data", "--subsets", "0"]).is_err());
    }

    #[test]
    fn test_rejects_bad_pattern() {
        let args = Args::parse_from(["masks2coco", "-s", "data", "--image_pattern", "[*.jpg"]);
        assert!(args.to_pipeline_config().is_err());
    }
}
