//! COCO format data structures and the per-document assembler
//!
//! One [`CocoWriter`] accumulates the images and annotations of a single
//! staged directory and serializes them as one instance document.

use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::config::PipelineConfig;
use crate::error::Result;

/// COCO dataset information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    pub year: u32,
    pub version: String,
    pub description: String,
    pub contributor: String,
    pub url: String,
    pub date_created: String,
}

impl Default for Info {
    fn default() -> Self {
        use chrono::Datelike;
        let now = chrono::Utc::now();
        Self {
            year: now.year() as u32,
            version: "0.0.1".to_string(),
            description: "Mask-derived instance annotations".to_string(),
            contributor: String::new(),
            url: String::new(),
            date_created: now.naive_utc().to_string(),
        }
    }
}

impl Info {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            version: config.dataset_version.clone(),
            description: config.description.clone(),
            contributor: config.contributor.clone(),
            ..Self::default()
        }
    }
}

/// COCO license information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: u32,
    pub name: String,
    pub url: String,
}

impl Default for License {
    fn default() -> Self {
        Self {
            id: 1,
            name: "Unknown".to_string(),
            url: String::new(),
        }
    }
}

/// COCO category information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
    pub supercategory: String,
}

/// COCO image information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: u32,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    pub license: u32,
}

impl Image {
    pub fn new(id: u32, file_name: String, width: u32, height: u32) -> Self {
        Self {
            id,
            file_name,
            width,
            height,
            license: 1,
        }
    }
}

/// Uncompressed run-length encoding, column-major, starting with a background run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rle {
    pub counts: Vec<u32>,
    /// `[height, width]`
    pub size: [u32; 2],
}

/// Object outline: flat `[x0, y0, x1, y1, ...]` rings, or an RLE for crowd regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segmentation {
    Polygons(Vec<Vec<f64>>),
    Rle(Rle),
}

/// COCO annotation information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u32,
    pub image_id: u32,
    pub category_id: u32,
    pub iscrowd: u32,
    pub segmentation: Segmentation,
    pub bbox: [f64; 4], // [x, y, width, height]
    pub area: f64,
}

/// Complete COCO dataset structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoFile {
    pub info: Info,
    pub licenses: Vec<License>,
    pub categories: Vec<Category>,
    pub images: Vec<Image>,
    pub annotations: Vec<Annotation>,
}

impl Default for CocoFile {
    fn default() -> Self {
        Self {
            info: Info::default(),
            licenses: vec![License::default()],
            categories: Vec::new(),
            images: Vec::new(),
            annotations: Vec::new(),
        }
    }
}

impl CocoFile {
    /// Annotations whose `image_id` has no image record in this document.
    pub fn dangling_annotations(&self) -> Vec<u32> {
        let image_ids: std::collections::HashSet<u32> =
            self.images.iter().map(|image| image.id).collect();
        self.annotations
            .iter()
            .filter(|ann| !image_ids.contains(&ann.image_id))
            .map(|ann| ann.id)
            .collect()
    }
}

/// Accumulates one document and hands out its image and annotation ids.
///
/// Ids start at the configured values and advance by one per accepted
/// record; nothing is ever removed, so ids are never reused. Once an id
/// space runs past `u32::MAX` further records of that kind are refused.
#[derive(Debug)]
pub struct CocoWriter {
    info: Info,
    categories: Vec<Category>,
    next_image_id: Option<u32>,
    next_annotation_id: Option<u32>,
    images: Vec<Image>,
    annotations: Vec<Annotation>,
}

impl CocoWriter {
    pub fn new(info: Info, categories: Vec<Category>, start_image_id: u32, start_annotation_id: u32) -> Self {
        Self {
            info,
            categories,
            next_image_id: Some(start_image_id),
            next_annotation_id: Some(start_annotation_id),
            images: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            Info::from_config(config),
            config.categories.clone(),
            config.start_image_id,
            config.start_annotation_id,
        )
    }

    /// Add an image to the document and return its id, or `None` when image ids are exhausted
    pub fn add_image(&mut self, file_name: String, width: u32, height: u32) -> Option<u32> {
        let image_id = self.next_image_id?;
        self.next_image_id = image_id.checked_add(1);
        self.images.push(Image::new(image_id, file_name, width, height));
        Some(image_id)
    }

    /// Add an annotation for an image already in the document and return its id,
    /// or `None` when annotation ids are exhausted
    pub fn add_annotation(
        &mut self,
        image_id: u32,
        category_id: u32,
        iscrowd: bool,
        segmentation: Segmentation,
        bbox: [f64; 4],
        area: f64,
    ) -> Option<u32> {
        let annotation_id = self.next_annotation_id?;
        self.next_annotation_id = annotation_id.checked_add(1);
        self.annotations.push(Annotation {
            id: annotation_id,
            image_id,
            category_id,
            iscrowd: u32::from(iscrowd),
            segmentation,
            bbox,
            area,
        });
        Some(annotation_id)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn annotation_count(&self) -> usize {
        self.annotations.len()
    }

    /// Build the complete COCO dataset structure
    pub fn build(self) -> CocoFile {
        CocoFile {
            info: self.info,
            categories: self.categories,
            images: self.images,
            annotations: self.annotations,
            ..CocoFile::default()
        }
    }
}

/// Write a document in one piece: serialize to a sibling temp file, then rename.
pub fn write_document(document: &CocoFile, path: &Path) -> Result<()> {
    let tmp_path = path.with_extension("json.partial");
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        serde_json::to_writer(&mut writer, document)?;
        writer.flush()?;
    }
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    info!("Wrote {}", path.display());
    Ok(())
}
