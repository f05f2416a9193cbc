//! The statistical test seam.
//!
//! The TPS treats the association test as an opaque engine: decrypted client
//! genotypes and hashed reference genotypes in, result text out. Progress is
//! reported as free text and surfaces as RUNNING details.

use privas_core::payload::VariantRecord;
use std::collections::{BTreeMap, HashSet};

/// Algorithm name of [`CarrierCountEngine`].
pub const CARRIER_COUNT: &str = "carrier-count";

/// Decrypted inputs of one job.
#[derive(Debug, Clone, Default)]
pub struct EngineInput {
    /// Client (case) genotypes.
    pub client: Vec<VariantRecord>,
    /// Reference (control) genotypes.
    pub reference: Vec<VariantRecord>,
    /// Hashed variants the client's QC excluded; dropped on both sides.
    pub excluded: Vec<String>,
    /// Algorithm parameters as sent by the client.
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("no gene has variants on both sides")]
    NothingToTest,
}

/// A gene-based association test.
pub trait ComputeEngine: Send + Sync {
    fn run(
        &self,
        input: &EngineInput,
        progress: &mut dyn FnMut(String),
    ) -> Result<String, EngineError>;
}

/// Per-gene carrier counts for cases and controls.
///
/// Not an association test in itself; it stands in for the permutation
/// engine and exercises the same inputs and outputs.
#[derive(Debug, Clone, Copy)]
pub struct CarrierCountEngine {
    /// Genes between two progress reports.
    pub report_every: usize,
}

impl Default for CarrierCountEngine {
    fn default() -> Self {
        Self { report_every: 100 }
    }
}

#[derive(Debug, Default)]
struct GeneTally<'a> {
    variants: HashSet<&'a str>,
    client: Vec<&'a VariantRecord>,
    reference: Vec<&'a VariantRecord>,
}

fn carriers(records: &[&VariantRecord]) -> (usize, usize) {
    let samples = records.iter().map(|r| r.dosages.len()).max().unwrap_or(0);
    let carrying = (0..samples)
        .filter(|&i| records.iter().any(|r| r.dosages.get(i).is_some_and(|&d| d > 0)))
        .count();
    (carrying, samples)
}

impl ComputeEngine for CarrierCountEngine {
    fn run(
        &self,
        input: &EngineInput,
        progress: &mut dyn FnMut(String),
    ) -> Result<String, EngineError> {
        let name = input.algorithm.split(';').next().unwrap_or_default().trim();
        if name != CARRIER_COUNT {
            return Err(EngineError::UnsupportedAlgorithm(input.algorithm.clone()));
        }

        let excluded: HashSet<&str> = input.excluded.iter().map(String::as_str).collect();
        let mut genes: BTreeMap<&str, GeneTally<'_>> = BTreeMap::new();
        for record in input.client.iter().filter(|r| !excluded.contains(r.variant.as_str())) {
            let tally = genes.entry(record.gene.as_str()).or_default();
            tally.variants.insert(&record.variant);
            tally.client.push(record);
        }
        for record in input
            .reference
            .iter()
            .filter(|r| !excluded.contains(r.variant.as_str()))
        {
            let tally = genes.entry(record.gene.as_str()).or_default();
            tally.variants.insert(&record.variant);
            tally.reference.push(record);
        }
        genes.retain(|_, t| !t.client.is_empty() && !t.reference.is_empty());
        if genes.is_empty() {
            return Err(EngineError::NothingToTest);
        }

        let total = genes.len();
        let mut out = String::from(
            "gene\tvariants\tcase_carriers\tcases\tcontrol_carriers\tcontrols\n",
        );
        for (done, (gene, tally)) in genes.iter().enumerate() {
            let (case_carriers, cases) = carriers(&tally.client);
            let (control_carriers, controls) = carriers(&tally.reference);
            out.push_str(&format!(
                "{gene}\t{}\t{case_carriers}\t{cases}\t{control_carriers}\t{controls}\n",
                tally.variants.len()
            ));
            if (done + 1) % self.report_every.max(1) == 0 || done + 1 == total {
                progress(format!("processed {}/{total} genes", done + 1));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> EngineInput {
        EngineInput {
            client: vec![
                VariantRecord::new("h1", "BRCA2", vec![1, 0, 0]),
                VariantRecord::new("h2", "BRCA2", vec![0, 2, 0]),
                VariantRecord::new("h9", "TTN", vec![1, 1, 1]),
            ],
            reference: vec![
                VariantRecord::new("h1", "BRCA2", vec![0, 0, 1, 0]),
                VariantRecord::new("h3", "BRCA2", vec![0, 0, 0, 0]),
                VariantRecord::new("h9", "TTN", vec![1, 0, 0, 0]),
                VariantRecord::new("h7", "ABCA4", vec![1, 0, 0, 0]),
            ],
            excluded: vec!["h9".into()],
            algorithm: CARRIER_COUNT.into(),
        }
    }

    #[test]
    fn counts_carriers_per_gene() {
        let mut reports = Vec::new();
        let engine = CarrierCountEngine { report_every: 1 };
        let out = engine.run(&input(), &mut |p: String| reports.push(p)).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        // TTN excluded entirely, ABCA4 has no client side
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "BRCA2\t3\t2\t3\t1\t4");
        assert_eq!(reports, vec!["processed 1/1 genes".to_string()]);
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let mut input = input();
        input.algorithm = "wss;permutations=1000".into();
        let err = CarrierCountEngine::default().run(&input, &mut |_: String| {}).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn empty_overlap_is_an_error() {
        let input = EngineInput {
            algorithm: CARRIER_COUNT.into(),
            ..EngineInput::default()
        };
        assert_eq!(
            CarrierCountEngine::default().run(&input, &mut |_: String| {}),
            Err(EngineError::NothingToTest)
        );
    }
}
