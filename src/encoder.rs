//! Annotation encoder: one staged directory -> one COCO document.

use indicatif::ProgressBar;
use log::{debug, info, warn};
use std::path::Path;

use crate::catalog::{collect_files, MatchIndex, MatchRule, IMAGE_DIR_NAME};
use crate::coco::{Category, CocoFile, CocoWriter, Segmentation};
use crate::codec::ImageCodec;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::types::{EncodeStats, FileEntry};
use crate::vectorize::{encode_rle, MaskVectorizer};

pub const ANNOTATION_DIR_NAME: &str = "annotations";

/// Marker in an image file name that flags all of its annotations as crowd regions
pub const CROWD_MARKER: &str = "crowd";

/// Category encoded in a mask file name: a `_<name>` stem suffix wins,
/// otherwise the first category whose name appears anywhere in the file name.
pub fn category_for_mask<'c>(mask: &FileEntry, categories: &'c [Category]) -> Option<&'c Category> {
    categories
        .iter()
        .find(|c| mask.stem.ends_with(&format!("_{}", c.name)))
        .or_else(|| {
            let file_name = mask.file_name();
            categories.iter().find(|c| file_name.contains(&c.name))
        })
}

/// Mask stem without its `_<category>` suffix, the part that names the image.
pub fn image_key<'m>(mask: &'m FileEntry, categories: &[Category]) -> &'m str {
    categories
        .iter()
        .find_map(|c| {
            mask.stem
                .strip_suffix(c.name.as_str())
                .and_then(|rest| rest.strip_suffix('_'))
        })
        .unwrap_or(mask.stem.as_str())
}

pub struct AnnotationEncoder<'a> {
    config: &'a PipelineConfig,
    codec: &'a dyn ImageCodec,
    vectorizer: &'a dyn MaskVectorizer,
}

impl<'a> AnnotationEncoder<'a> {
    pub fn new(config: &'a PipelineConfig, codec: &'a dyn ImageCodec, vectorizer: &'a dyn MaskVectorizer) -> Self {
        Self {
            config,
            codec,
            vectorizer,
        }
    }

    /// Encode `<dir>/images` with the masks in `<dir>/annotations`.
    ///
    /// Images are visited in path order so unchanged inputs give identical ids.
    pub fn encode_directory(&self, dir: &Path, pb: &ProgressBar) -> Result<(CocoFile, EncodeStats)> {
        let mut images = collect_files(&dir.join(IMAGE_DIR_NAME), &self.config.image_patterns)?;
        images.sort();

        let annotation_dir = dir.join(ANNOTATION_DIR_NAME);
        let masks = if annotation_dir.is_dir() {
            collect_files(&annotation_dir, &self.config.mask_patterns)?
        } else {
            warn!("No {} directory in {}", ANNOTATION_DIR_NAME, dir.display());
            Vec::new()
        };

        let categories = &self.config.categories;
        let index = MatchIndex::build_keyed(
            images.iter().map(|image| image.stem.as_str()),
            &masks,
            MatchRule::Contains,
            |mask| image_key(mask, categories),
        );
        info!(
            "Annotating {} images with {} matched masks in {}",
            images.len(),
            index.matched_mask_count(),
            dir.display()
        );

        let mut writer = CocoWriter::from_config(self.config);
        let mut stats = EncodeStats::default();
        for image in &images {
            self.encode_image(image, index.masks_for(&image.stem), &mut writer, &mut stats);
            pb.inc(1);
        }
        info!(
            "{}: {} images and {} annotations accepted",
            dir.display(),
            writer.image_count(),
            writer.annotation_count()
        );

        Ok((writer.build(), stats))
    }

    /// Add one image and its annotations.
    ///
    /// A mask failure only drops that mask; an accepted image is never removed.
    pub fn encode_image(
        &self,
        image: &FileEntry,
        masks: &[FileEntry],
        writer: &mut CocoWriter,
        stats: &mut EncodeStats,
    ) {
        let (width, height) = match self.codec.dimensions(&image.path) {
            Ok(size) => size,
            Err(e) => {
                warn!("Failed to decode image {}: {}", image.path.display(), e);
                stats.images_failed += 1;
                return;
            }
        };

        let file_name = image.file_name();
        let iscrowd = file_name.contains(CROWD_MARKER);
        let Some(image_id) = writer.add_image(file_name, width, height) else {
            warn!("Image ids exhausted, skipping {}", image.path.display());
            stats.images_failed += 1;
            return;
        };
        stats.images_added += 1;

        let mut accepted = 0usize;
        for mask in masks {
            let Some(category) = category_for_mask(mask, &self.config.categories) else {
                warn!("Mask {} matches no known category", mask.path.display());
                stats.masks_uncategorized += 1;
                continue;
            };

            let binary = match self.codec.load_mask(&mask.path, (width, height)) {
                Ok(binary) => binary,
                Err(e) => {
                    warn!("Failed to decode mask {}: {}", mask.path.display(), e);
                    stats.annotations_failed += 1;
                    continue;
                }
            };

            let Some(region) = self.vectorizer.vectorize(&binary, self.config.tolerance) else {
                debug!("Mask {} has no foreground", mask.path.display());
                stats.annotations_failed += 1;
                continue;
            };

            let segmentation = if iscrowd {
                Segmentation::Rle(encode_rle(&binary))
            } else {
                Segmentation::Polygons(region.polygons)
            };
            if writer
                .add_annotation(image_id, category.id, iscrowd, segmentation, region.bbox, region.area)
                .is_none()
            {
                warn!("Annotation ids exhausted, skipping mask {}", mask.path.display());
                stats.annotations_failed += 1;
                continue;
            }
            stats.annotations_added += 1;
            accepted += 1;
        }

        if accepted > 0 {
            stats.images_with_annotations += 1;
        } else {
            debug!("No annotations for {}", image.path.display());
            stats.images_with_no_annotations += 1;
        }
    }
}
