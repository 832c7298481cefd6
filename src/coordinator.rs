//! Parallel run coordinator: one encoding task per stage directory on a
//! fixed-size pool, reports merged in scheduling order.

use indicatif::ProgressBar;
use log::{error, info};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::fs;
use std::path::{Path, PathBuf};

use crate::catalog::{build_catalog, IMAGE_DIR_NAME};
use crate::coco::write_document;
use crate::codec::ImageCodec;
use crate::config::PipelineConfig;
use crate::encoder::AnnotationEncoder;
use crate::error::{PipelineError, Result};
use crate::partition::partition_dataset;
use crate::types::{EncodeStats, RunSummary, SubsetReport};
use crate::utils::create_spinner;
use crate::vectorize::MaskVectorizer;

/// Create a thread pool with a fixed number of workers
pub fn build_pool(workers: usize) -> Result<ThreadPool> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("masks2coco-worker-{}", i))
        .build()?)
}

/// Subdirectories of `root` holding an `images/` directory, sorted by name.
pub fn discover_stage_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(root).map_err(|_| PipelineError::SourceMissing(root.to_path_buf()))?;

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|path| path.join(IMAGE_DIR_NAME).is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// `<root>/instances_<directory name>.json`
pub fn output_path(root: &Path, dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    root.join(format!("instances_{}.json", name))
}

fn encode_one(encoder: &AnnotationEncoder, dir: &Path, root: &Path, pb: &ProgressBar) -> SubsetReport {
    let name = dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let output = output_path(root, dir);

    let (stats, write_failed) = match encoder.encode_directory(dir, pb) {
        Ok((document, stats)) => match write_document(&document, &output) {
            Ok(()) => (stats, false),
            Err(e) => {
                error!("Failed to write {}: {}", output.display(), e);
                (stats, true)
            }
        },
        Err(e) => {
            error!("Failed to encode {}: {}", dir.display(), e);
            (EncodeStats::default(), true)
        }
    };

    SubsetReport {
        name,
        output,
        stats,
        write_failed,
    }
}

/// Encode every directory in parallel and write one document per directory.
///
/// Runs on the current rayon pool; call inside [`ThreadPool::install`] to bound it.
pub fn run_encoding(
    dirs: &[PathBuf],
    config: &PipelineConfig,
    codec: &dyn ImageCodec,
    vectorizer: &dyn MaskVectorizer,
) -> RunSummary {
    let encoder = AnnotationEncoder::new(config, codec, vectorizer);
    let pb = create_spinner("Encoding images");

    info!("Encoding {} directories with {} workers", dirs.len(), rayon::current_num_threads());
    let reports = dirs
        .par_iter()
        .map(|dir| encode_one(&encoder, dir, &config.root_dir, &pb))
        .collect();
    pb.finish_with_message("Encoding complete");

    RunSummary { reports }
}

/// Full run: catalog, partition and copy (unless skipped), then encode.
pub fn run_pipeline(
    config: &PipelineConfig,
    codec: &dyn ImageCodec,
    vectorizer: &dyn MaskVectorizer,
) -> Result<RunSummary> {
    let pool = build_pool(config.workers)?;

    pool.install(|| {
        let dirs = if config.skip_split {
            info!("Skipping split; encoding stage directories in {}", config.root_dir.display());
            discover_stage_dirs(&config.root_dir)?
        } else {
            let catalog = build_catalog(config)?;
            partition_dataset(&catalog, config)?
        };

        Ok(run_encoding(&dirs, config, codec, vectorizer))
    })
}
