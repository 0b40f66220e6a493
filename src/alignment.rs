use std::collections::HashSet;
use std::fmt::{self, Display};

use anyhow::bail;
use bio::io::fasta::Record;
use log::{info, warn};

use crate::errors::DataError;
use crate::Result;

pub static GAP: u8 = b'-';
pub static POSSIBLE_GAPS: &[u8] = b"-.?";
pub static CODON_LEN: usize = 3;

/// Multiple sequence alignment of codon sequences.
///
/// Records keep the order they were read in. Once constructed the alignment is guaranteed to be
/// non-empty, with unique ids and all sequences of the same length, a multiple of [`CODON_LEN`].
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    records: Vec<Record>,
    msa_len: usize,
}

impl Alignment {
    /// Validates the records and wraps them into an alignment.
    ///
    /// # Example
    /// ```
    /// use cladefit::alignment::Alignment;
    /// use cladefit::record_wo_desc as record;
    /// let msa = Alignment::new(vec![
    ///     record!("sp1", b"ATGAAA"),
    ///     record!("sp2", b"ATG---"),
    /// ])
    /// .unwrap();
    /// assert_eq!(msa.seq_count(), 2);
    /// assert_eq!(msa.msa_len(), 6);
    /// assert_eq!(msa.codon_count(), 2);
    /// ```
    pub fn new(records: Vec<Record>) -> Result<Alignment> {
        if records.is_empty() {
            bail!(DataError::new("No sequences in the alignment"));
        }
        Self::check_unique_ids(&records)?;

        let msa_len = records[0].seq().len();
        if let Some(rec) = records.iter().find(|rec| rec.seq().len() != msa_len) {
            bail!(DataError::new(format!(
                "Sequences are not aligned, sequence {} has length {} instead of {}",
                rec.id(),
                rec.seq().len(),
                msa_len
            )));
        }
        if msa_len == 0 {
            bail!(DataError::new("Alignment has no sites"));
        }
        if msa_len % CODON_LEN != 0 {
            bail!(DataError::new(format!(
                "Alignment length {msa_len} is not a multiple of {CODON_LEN}, not a codon alignment"
            )));
        }

        let alignment = Alignment { records, msa_len };
        let empty = alignment.empty_sequence_ids();
        if !empty.is_empty() {
            warn!(
                "Sequences without any informative site: {}",
                empty.join(", ")
            );
        }
        info!(
            "Codon alignment with {} sequences of {} codons",
            alignment.seq_count(),
            alignment.codon_count()
        );
        Ok(alignment)
    }

    fn check_unique_ids(records: &[Record]) -> Result<()> {
        let mut seen = HashSet::with_capacity(records.len());
        let mut duplicates = records
            .iter()
            .map(|rec| rec.id())
            .filter(|id| !seen.insert(*id))
            .collect::<Vec<_>>();
        if !duplicates.is_empty() {
            duplicates.sort();
            duplicates.dedup();
            bail!(DataError::new(format!(
                "Duplicate sequence IDs found: {duplicates:?}"
            )));
        }
        Ok(())
    }

    /// Number of sequences.
    pub fn seq_count(&self) -> usize {
        self.records.len()
    }

    /// Number of nucleotide columns.
    pub fn msa_len(&self) -> usize {
        self.msa_len
    }

    pub fn codon_count(&self) -> usize {
        self.msa_len / CODON_LEN
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|rec| rec.id().to_string()).collect()
    }

    pub fn by_id(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|rec| rec.id() == id)
    }

    /// Ids of the sequences made up of gaps and undetermined nucleotides only.
    pub fn empty_sequence_ids(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|rec| rec.seq().iter().all(|c| *c == GAP || *c == b'N'))
            .map(|rec| rec.id().to_string())
            .collect()
    }
}

impl Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rec in &self.records {
            writeln!(f, ">{}", rec.id())?;
            writeln!(f, "{}", String::from_utf8_lossy(rec.seq()))?;
        }
        Ok(())
    }
}
