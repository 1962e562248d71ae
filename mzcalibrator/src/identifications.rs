//! Reading peptide-spectrum matches from tab-separated search results.
use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use mzcalibrate::Identification;

/// One row of a MetaMorpheus-style `psmtsv` table. Other columns are ignored.
#[derive(Debug, Clone, Deserialize)]
struct PSMRecord {
    #[serde(rename = "Scan Number")]
    scan_number: usize,
    #[serde(rename = "Precursor Charge")]
    precursor_charge: i32,
    #[serde(rename = "Full Sequence")]
    full_sequence: String,
    #[serde(rename = "QValue", default, deserialize_with = "csv::invalid_option")]
    q_value: Option<f64>,
    #[serde(rename = "Decoy/Contaminant/Target", default)]
    label: Option<String>,
}

impl PSMRecord {
    fn is_decoy(&self) -> bool {
        self.label.as_deref().is_some_and(|l| l.contains('D'))
    }
}

impl From<PSMRecord> for Identification {
    fn from(value: PSMRecord) -> Self {
        let decoy = value.is_decoy();
        let mut ident = Identification::new(
            value.scan_number,
            value.precursor_charge,
            value.full_sequence,
        );
        ident.q_value = value.q_value;
        ident.decoy = decoy;
        ident
    }
}

/// Counts of how many rows were kept from a PSM table
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PSMFilterSummary {
    pub rows: usize,
    pub decoys: usize,
    pub above_threshold: usize,
    pub accepted: usize,
}

pub fn read_identifications_from<R: io::Read>(
    source: R,
    max_q_value: f64,
) -> Result<(Vec<Identification>, PSMFilterSummary), csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(source);

    let mut summary = PSMFilterSummary::default();
    let mut accepted = Vec::new();
    for row in reader.deserialize() {
        let record: PSMRecord = row?;
        summary.rows += 1;
        if record.is_decoy() {
            summary.decoys += 1;
            continue;
        }
        // Rows without a q-value are assumed to have been filtered upstream
        if record.q_value.is_some_and(|q| q > max_q_value) {
            summary.above_threshold += 1;
            continue;
        }
        accepted.push(record.into());
    }
    summary.accepted = accepted.len();
    Ok((accepted, summary))
}

/// Read the confident, non-decoy identifications from a PSM table at `path`
pub fn read_identifications(
    path: &Path,
    max_q_value: f64,
) -> Result<Vec<Identification>, csv::Error> {
    let handle = io::BufReader::new(fs::File::open(path)?);
    let (identifications, summary) = read_identifications_from(handle, max_q_value)?;
    debug!(
        "{} decoy rows and {} rows above q-value {max_q_value} were dropped",
        summary.decoys, summary.above_threshold
    );
    info!(
        "Read {} identifications from {} rows of {}",
        summary.accepted,
        summary.rows,
        path.display()
    );
    Ok(identifications)
}

#[cfg(test)]
mod test {
    use super::*;

    const TABLE: &str = "File Name\tScan Number\tPrecursor Charge\tFull Sequence\tQValue\tDecoy/Contaminant/Target
run\t12\t2\tPEPTIDEK\t0.001\tT
run\t13\t3\tPEPTM[Common Variable:Oxidation on M]IDEK\t0.005\tC
run\t14\t2\tKEDITPEP\t0.002\tD
run\t15\t2\tSAMPLER\t0.2\tT
run\t16\t2\tSAMPLERK\tNA\tT|D
run\t17\t4\tPEPTIDEPEPTIDEK\t\tT
";

    #[test_log::test]
    fn test_filtering() {
        let (idents, summary) = read_identifications_from(TABLE.as_bytes(), 0.01).unwrap();
        assert_eq!(summary.rows, 6);
        assert_eq!(summary.decoys, 2);
        assert_eq!(summary.above_threshold, 1);
        assert_eq!(idents.len(), 3);
        assert_eq!(idents[0].scan_number, 12);
        assert_eq!(idents[0].charge, 2);
        assert_eq!(idents[0].q_value, Some(0.001));
        assert_eq!(idents[1].sequence, "PEPTM[Common Variable:Oxidation on M]IDEK");
        assert_eq!(idents[2].q_value, None);
        assert!(idents.iter().all(|i| !i.decoy));
    }

    #[test_log::test]
    fn test_missing_column() {
        let table = "Scan Number\tFull Sequence\n1\tPEPTIDE\n";
        assert!(read_identifications_from(table.as_bytes(), 0.01).is_err());
    }
}
