//! Genotype payloads exchanged inside the encrypted blobs.
//!
//! One record per line: `variant\tgene\tdosages`, where dosages are the
//! comma-separated alternate allele counts (0, 1 or 2) of every sample.
//! Client and reference payloads share the format; the variant column is
//! always salted-hashed before it leaves its owner.

use std::fmt;
use std::str::FromStr;

/// One variant of one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantRecord {
    pub variant: String,
    pub gene: String,
    pub dosages: Vec<u8>,
}

impl VariantRecord {
    pub fn new(variant: impl Into<String>, gene: impl Into<String>, dosages: Vec<u8>) -> Self {
        Self {
            variant: variant.into(),
            gene: gene.into(),
            dosages,
        }
    }

    /// Samples carrying at least one alternate allele.
    pub fn carriers(&self) -> usize {
        self.dosages.iter().filter(|&&d| d > 0).count()
    }
}

impl fmt::Display for VariantRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t", self.variant, self.gene)?;
        for (i, d) in self.dosages.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

/// Error parsing a payload line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("line {line}: expected 3 tab-separated columns")]
    Columns { line: usize },
    #[error("line {line}: invalid dosage {value:?}")]
    Dosage { line: usize, value: String },
}

impl FromStr for VariantRecord {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_line(s, 1)
    }
}

fn parse_line(line: &str, number: usize) -> Result<VariantRecord, PayloadError> {
    let mut columns = line.split('\t');
    let (Some(variant), Some(gene), Some(dosages), None) = (
        columns.next(),
        columns.next(),
        columns.next(),
        columns.next(),
    ) else {
        return Err(PayloadError::Columns { line: number });
    };
    let dosages = if dosages.is_empty() {
        Vec::new()
    } else {
        dosages
            .split(',')
            .map(|d| match d.trim().parse::<u8>() {
                Ok(v) if v <= 2 => Ok(v),
                _ => Err(PayloadError::Dosage {
                    line: number,
                    value: d.to_string(),
                }),
            })
            .collect::<Result<_, _>>()?
    };
    Ok(VariantRecord::new(variant, gene, dosages))
}

/// Serialize records, one per line.
pub fn encode_records(records: &[VariantRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&record.to_string());
        out.push('\n');
    }
    out
}

/// Parse records, skipping blank lines and `#` comments.
pub fn decode_records(text: &str) -> Result<Vec<VariantRecord>, PayloadError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty() && !line.starts_with('#'))
        .map(|(i, line)| parse_line(line.trim_end_matches('\r'), i + 1))
        .collect()
}

/// Serialize a list of variant identifiers, one per line.
pub fn encode_variant_list(variants: &[String]) -> String {
    variants.iter().map(|v| format!("{v}\n")).collect()
}

pub fn decode_variant_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect()
}
