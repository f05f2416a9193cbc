//! Reference genotype extraction.
//!
//! The RPP pulls the variants matching a session's filters out of its
//! reference panel and hashes their identifiers with the session salt, the
//! same way the client hashes its own.

use privas_core::payload::VariantRecord;
use privas_core::{Dataset, Salt};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

const DATASET_EXTENSION: &str = "tsv";

/// Filters an extraction applies.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractRequest {
    pub dataset: String,
    pub max_af: f64,
    pub limit_to_snvs: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unknown dataset {0:?}")]
    UnknownDataset(String),
    #[error("dataset {dataset} line {line}: {reason}")]
    Row {
        dataset: String,
        line: usize,
        reason: String,
    },
    #[error("reading dataset: {0}")]
    Io(#[from] io::Error),
}

pub trait ReferenceExtractor: Send + Sync {
    /// Datasets this RPP can extract from.
    fn datasets(&self) -> io::Result<Vec<Dataset>>;

    /// Extract and hash the matching reference genotypes.
    ///
    /// `progress` receives a human-readable ETA now and then.
    fn extract(
        &self,
        request: &ExtractRequest,
        salt: &Salt,
        progress: &mut dyn FnMut(String),
    ) -> Result<Vec<VariantRecord>, ExtractError>;
}

/// Reads reference panels from `<dir>/<dataset>.tsv`.
///
/// Columns: variant id (`chrom-pos-ref-alt`), gene, allele frequency,
/// consequence, comma-separated dosages. A leading `#` line is the dataset
/// description; other `#` lines are ignored.
#[derive(Debug, Clone)]
pub struct TsvExtractor {
    dir: PathBuf,
    progress_every: usize,
}

impl TsvExtractor {
    pub fn new(dir: impl Into<PathBuf>, progress_every: usize) -> Self {
        Self {
            dir: dir.into(),
            progress_every: progress_every.max(1),
        }
    }

    fn dataset_path(&self, name: &str) -> Option<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        valid.then(|| self.dir.join(format!("{name}.{DATASET_EXTENSION}")))
    }
}

/// The panel's `#` header line, read without touching the rows.
fn description(path: &Path) -> io::Result<String> {
    let mut first = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first)?;
    Ok(first
        .strip_prefix('#')
        .map(|d| d.trim().to_string())
        .unwrap_or_default())
}

/// Single-nucleotide variant ids end in one-base ref and alt alleles.
fn is_snv(variant: &str) -> bool {
    let mut alleles = variant.rsplit(['-', ':']);
    match (alleles.next(), alleles.next()) {
        (Some(alt), Some(reference)) => alt.len() == 1 && reference.len() == 1,
        _ => false,
    }
}

fn format_eta(secs: u64) -> String {
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

impl ReferenceExtractor for TsvExtractor {
    fn datasets(&self) -> io::Result<Vec<Dataset>> {
        let mut datasets = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(datasets),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != DATASET_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            datasets.push(Dataset::new(name, description(&path)?));
        }
        datasets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(datasets)
    }

    fn extract(
        &self,
        request: &ExtractRequest,
        salt: &Salt,
        progress: &mut dyn FnMut(String),
    ) -> Result<Vec<VariantRecord>, ExtractError> {
        let path = self
            .dataset_path(&request.dataset)
            .filter(|p| p.is_file())
            .ok_or_else(|| ExtractError::UnknownDataset(request.dataset.clone()))?;
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let started = std::time::Instant::now();
        let mut buf = String::new();
        let (mut line_no, mut consumed, mut scanned) = (0, 0u64, 0usize);
        let mut records = Vec::new();
        loop {
            buf.clear();
            let read = reader.read_line(&mut buf)?;
            if read == 0 {
                break;
            }
            line_no += 1;
            consumed += read as u64;
            let line = buf.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            scanned += 1;

            let row_error = |reason: String| ExtractError::Row {
                dataset: request.dataset.clone(),
                line: line_no,
                reason,
            };
            let cols: Vec<&str> = line.split('\t').collect();
            let [variant, gene, af, _csq, dosages] = cols[..] else {
                return Err(row_error(format!("expected 5 columns, got {}", cols.len())));
            };
            let af: f64 = af
                .trim()
                .parse()
                .map_err(|_| row_error(format!("allele frequency {af:?} is not a number")))?;
            if af <= request.max_af && (!request.limit_to_snvs || is_snv(variant)) {
                let record = format!("{}\t{gene}\t{dosages}", salt.hash(variant));
                records.push(
                    record
                        .parse::<VariantRecord>()
                        .map_err(|e| row_error(e.to_string()))?,
                );
            }

            if scanned % self.progress_every == 0 && consumed < size {
                let elapsed = started.elapsed().as_secs_f64();
                let remaining = elapsed / consumed as f64 * (size - consumed) as f64;
                progress(format!("ETA {}", format_eta(remaining.round() as u64)));
            }
        }
        tracing::debug!(
            dataset = %request.dataset,
            kept = records.len(),
            scanned,
            "extracted reference"
        );
        Ok(records)
    }
}
