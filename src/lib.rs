//! Image + binary mask to COCO instance dataset converter
//!
//! This library matches raw images with their per-category masks, partitions
//! them into train/validation stages and encodes every stage as a COCO
//! instance segmentation document.

pub mod catalog;
pub mod coco;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod encoder;
pub mod error;
pub mod partition;
pub mod types;
pub mod utils;
pub mod vectorize;

// Re-export commonly used types and functions
pub use catalog::{build_catalog, Catalog, MatchIndex, MatchRule};
pub use coco::{CocoFile, CocoWriter};
pub use codec::{ImageCodec, ImageCrateCodec};
pub use config::{Args, PipelineConfig};
pub use coordinator::{run_encoding, run_pipeline};
pub use encoder::AnnotationEncoder;
pub use error::{PipelineError, Result};
pub use partition::partition_dataset;
pub use types::{EncodeStats, FileEntry, MatchedPair, RunSummary, SubsetReport};
pub use vectorize::{ContourVectorizer, MaskVectorizer, Region};
