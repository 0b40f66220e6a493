use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::bail;
use bio::alphabets;
use bio::io::fasta::{Reader, Record, Writer};
use log::{info, warn};

use crate::alignment::{Alignment, GAP, POSSIBLE_GAPS};
use crate::errors::DataError;
use crate::extract::StatisticsRecord;
use crate::tree::{tree_parser, Tree};
use crate::Result;

/// Reads sequences from a fasta file, returning a vector of fasta records.
/// All sequences are converted to uppercase and every gap character is replaced by `-`.
///
/// # Arguments
/// * `path` - Path to the fasta file.
///
/// # Example
/// ```
/// use cladefit::io::read_sequences;
/// use std::path::PathBuf;
/// let records = read_sequences(&PathBuf::from("./data/ND1_primates.fasta")).unwrap();
/// # assert_eq!(records.len(), 4);
/// # for rec in records {
/// #    assert_eq!(rec.seq().len(), 12);
/// # }
/// ```
pub fn read_sequences(path: &Path) -> Result<Vec<Record>> {
    info!("Reading sequences from file {}", path.display());
    let reader = Reader::from_file(path)?;
    let mut alphabet = alphabets::dna::iupac_alphabet();
    alphabet.insert(GAP);

    let mut sequences = Vec::new();
    for result in reader.records() {
        let rec = result?;
        if let Err(e) = rec.check() {
            bail!(DataError::new(e.to_string()));
        }
        let seq: Vec<u8> = rec
            .seq()
            .to_ascii_uppercase()
            .iter()
            .map(|c| if POSSIBLE_GAPS.contains(c) { GAP } else { *c })
            .collect();

        if !alphabet.is_word(&seq) {
            bail!(DataError::new(format!(
                "Invalid nucleotide sequence encountered for {}: {}",
                rec.id(),
                String::from_utf8_lossy(&seq)
            )));
        }
        sequences.push(Record::with_attrs(rec.id(), rec.desc(), &seq));
    }
    if sequences.is_empty() {
        bail!(DataError::new("No sequences found in file"));
    }

    info!("Read {} sequences successfully", sequences.len());
    Ok(sequences)
}

/// Reads a codon alignment from a fasta file, see [`Alignment::new`] for the checks applied.
pub fn read_alignment(path: &Path) -> Result<Alignment> {
    Alignment::new(read_sequences(path)?)
}

/// Writes fasta sequences to the given file path. Will return an error if the file already exists.
///
/// # Arguments
/// * `sequences` - Vector of fasta records.
/// * `path` - Path to the fasta file.
pub fn write_sequences_to_file(sequences: &[Record], path: &Path) -> Result<()> {
    info!("Writing sequences/MSA to file {}", path.display());
    if path.exists() {
        bail!(DataError::new("File already exists"));
    }
    let mut writer = Writer::to_file(path)?;
    for rec in sequences {
        writer.write_record(rec)?;
    }
    writer.flush()?;
    info!("Finished writing successfully");
    Ok(())
}

/// Reads newick trees from a file, returning a vector of trees.
///
/// # Example
/// ```
/// use cladefit::io::read_newick_from_file;
/// use std::path::PathBuf;
/// let trees = read_newick_from_file(&PathBuf::from("./data/tree_4_leaves.newick")).unwrap();
/// # assert_eq!(trees.len(), 1);
/// # assert_eq!(trees[0].leaves().len(), 4);
/// ```
pub fn read_newick_from_file(path: &Path) -> Result<Vec<Tree>> {
    info!("Reading newick trees from file {}", path.display());
    let newick = fs::read_to_string(path)?;
    info!("Read file successfully");
    tree_parser::from_newick(&newick)
}

/// Reads the first tree of a newick file.
/// Bails if the file has no trees, warns if it has more than one.
pub fn read_tree(path: &Path) -> Result<Tree> {
    let mut trees = read_newick_from_file(path)?;
    info!("{} tree(s) read successfully", trees.len());
    check_tree_number(&trees)?;
    Ok(trees.remove(0))
}

fn check_tree_number(trees: &[Tree]) -> Result<()> {
    if trees.is_empty() {
        bail!(DataError::new("No trees in the tree file, aborting"));
    }
    if trees.len() > 1 {
        warn!("More than one tree in the tree file, only the first tree will be processed");
    }
    Ok(())
}

/// Writes newick strings to the given file path, one per line.
/// Will return an error if the file already exists.
pub fn write_newick_to_file(newicks: &[String], path: &Path) -> Result<()> {
    info!("Writing newick trees to file {}", path.display());
    if path.exists() {
        bail!(DataError::new("File already exists"));
    }
    let mut writer = File::create(path)?;
    for newick in newicks {
        writer.write_all(newick.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    info!("Finished writing successfully");
    Ok(())
}

/// Reads the foreground taxa, one name per line.
/// Lines are trimmed and blank lines are skipped, repeated names are kept once in the order of
/// their first occurrence.
///
/// # Example
/// ```
/// use cladefit::io::read_foreground_taxa;
/// use std::path::PathBuf;
/// let taxa = read_foreground_taxa(&PathBuf::from("./data/taxa_sp1_sp2.txt")).unwrap();
/// assert_eq!(taxa, vec!["sp1", "sp2"]);
/// ```
pub fn read_foreground_taxa(path: &Path) -> Result<Vec<String>> {
    info!("Reading foreground taxa from file {}", path.display());
    let content = fs::read_to_string(path)?;
    let mut seen = HashSet::new();
    let mut taxa = Vec::new();
    for name in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if seen.insert(name) {
            taxa.push(name.to_string());
        } else {
            warn!("Foreground taxon {name} listed more than once, using it once");
        }
    }
    info!("Read {} foreground taxa: {}", taxa.len(), taxa.join(", "));
    Ok(taxa)
}

/// Checks that the ids of the tree leaves and the sequences match, bails with an error otherwise.
pub fn validate_taxa_ids(tree: &Tree, alignment: &Alignment) -> Result<()> {
    info!("Checking that tree tip and sequence IDs match");
    let leaf_ids = tree.leaf_ids();
    let tip_ids: HashSet<String> = HashSet::from_iter(leaf_ids.iter().cloned());
    if tip_ids.len() != leaf_ids.len() {
        bail!(DataError::new("Tree has duplicate leaf names"));
    }
    let sequence_ids: HashSet<String> = HashSet::from_iter(alignment.ids());
    let mut missing_tips = sequence_ids.difference(&tip_ids).collect::<Vec<_>>();
    if !missing_tips.is_empty() {
        missing_tips.sort();
        bail!(DataError::new(format!(
            "Mismatched IDs found, missing tree tip IDs: {missing_tips:?}"
        )));
    }
    let mut missing_seqs = tip_ids.difference(&sequence_ids).collect::<Vec<_>>();
    if !missing_seqs.is_empty() {
        missing_seqs.sort();
        bail!(DataError::new(format!(
            "Mismatched IDs found, missing sequence IDs: {missing_seqs:?}"
        )));
    }
    Ok(())
}

/// Gene and clade names encoded in an alignment file name `<gene>_<clade>[_...].<ext>`.
///
/// # Example
/// ```
/// use cladefit::io::names_from_alignment_path;
/// use std::path::PathBuf;
/// let (gene, clade) = names_from_alignment_path(&PathBuf::from("aln/ND1_primates_filtered.fasta"));
/// assert_eq!(gene.as_deref(), Some("ND1"));
/// assert_eq!(clade.as_deref(), Some("primates"));
/// ```
pub fn names_from_alignment_path(path: &Path) -> (Option<String>, Option<String>) {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let stem = path.file_stem().and_then(|n| n.to_str()).unwrap_or("");
    let gene = file_name
        .split('_')
        .next()
        .filter(|g| !g.is_empty() && *g != file_name)
        .map(String::from);
    let clade = stem
        .split('_')
        .nth(1)
        .filter(|c| !c.is_empty())
        .map(String::from);
    (gene, clade)
}

/// Output file of the statistics record of one family.
pub fn record_path(out_dir: &Path, clade: &str, gene: &str, family: &str) -> PathBuf {
    out_dir.join(format!("{clade}_{gene}_{family}.csv"))
}

/// Writes a statistics record followed by a newline.
/// Bails if the file already exists and `overwrite` is not set.
pub fn write_record(record: &StatisticsRecord, path: &Path, overwrite: bool) -> Result<()> {
    info!("Writing {} record to file {}", record.model, path.display());
    if path.exists() {
        if !overwrite {
            bail!(DataError::new(format!(
                "File {} already exists",
                path.display()
            )));
        }
        warn!("Overwriting existing file {}", path.display());
    }
    let mut writer = File::create(path)?;
    writeln!(writer, "{record}")?;
    info!("Finished writing successfully");
    Ok(())
}
