use std::collections::BTreeMap;
use std::path::PathBuf;

// A file found in the catalog, keyed by its basename without extension
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileEntry {
    pub path: PathBuf,
    pub stem: String,
}

impl FileEntry {
    pub fn new(path: PathBuf) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, stem }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
    }
}

// An image together with its candidate masks, per category id
#[derive(Debug, Clone)]
pub struct MatchedPair {
    pub image: FileEntry,
    pub masks: BTreeMap<u32, Vec<FileEntry>>,
}

impl MatchedPair {
    /// First candidate mask for the category, if any.
    pub fn first_mask(&self, category_id: u32) -> Option<&FileEntry> {
        self.masks.get(&category_id).and_then(|masks| masks.first())
    }
}

// One disjoint share of the catalog
#[derive(Debug, Clone)]
pub struct Subset {
    pub index: usize,
    pub members: Vec<MatchedPair>,
}

// A subset divided into its training and validation slices
#[derive(Debug)]
pub struct SplitSlices<'a> {
    pub train: &'a [MatchedPair],
    pub val: &'a [MatchedPair],
}

// Counters for one encoding pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EncodeStats {
    pub images_added: usize,
    pub images_failed: usize,
    pub annotations_added: usize,
    pub annotations_failed: usize,
    pub images_with_annotations: usize,
    pub images_with_no_annotations: usize,
    pub masks_uncategorized: usize,
}

impl EncodeStats {
    pub fn merge(&mut self, other: &EncodeStats) {
        self.images_added += other.images_added;
        self.images_failed += other.images_failed;
        self.annotations_added += other.annotations_added;
        self.annotations_failed += other.annotations_failed;
        self.images_with_annotations += other.images_with_annotations;
        self.images_with_no_annotations += other.images_with_no_annotations;
        self.masks_uncategorized += other.masks_uncategorized;
    }
}

// Outcome of encoding one staged directory
#[derive(Debug, Clone)]
pub struct SubsetReport {
    pub name: String,
    pub output: PathBuf,
    pub stats: EncodeStats,
    pub write_failed: bool,
}

// Per-directory reports in the order the directories were scheduled
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub reports: Vec<SubsetReport>,
}

impl RunSummary {
    pub fn totals(&self) -> EncodeStats {
        let mut totals = EncodeStats::default();
        for report in &self.reports {
            totals.merge(&report.stats);
        }
        totals
    }

    /// Reports whose document is missing from the output root.
    pub fn failed_documents(&self) -> Vec<&SubsetReport> {
        self.reports.iter().filter(|report| report.write_failed).collect()
    }

    pub fn print_summary(&self) {
        log::info!("=== Encoding Summary ===");
        for report in &self.reports {
            let stats = &report.stats;
            log::info!(
                "{}: images added {}, images failed {}, annotations added {}, annotations failed {}, \
                 images with annotations {}, images without annotations {}",
                report.name,
                stats.images_added,
                stats.images_failed,
                stats.annotations_added,
                stats.annotations_failed,
                stats.images_with_annotations,
                stats.images_with_no_annotations
            );
            if stats.masks_uncategorized > 0 {
                log::warn!(
                    "{}: {} mask(s) matched no known category",
                    report.name,
                    stats.masks_uncategorized
                );
            }
            if report.write_failed {
                log::warn!("{}: document {} was not written", report.name, report.output.display());
            }
        }

        let totals = self.totals();
        log::info!(
            "Total: {} images ({} failed), {} annotations ({} failed)",
            totals.images_added,
            totals.images_failed,
            totals.annotations_added,
            totals.annotations_failed
        );
    }
}
