use std::fmt::{self, Display};

use anyhow::bail;
use fixedbitset::FixedBitSet;
use itertools::Itertools;
use log::{debug, info};

use crate::errors::FitError;
use crate::tree::{NodeIdx, Tree};
use crate::Result;

/// Resolves a taxon name to its leaf in the tree.
/// Only leaves are considered, an internal node with the same label does not match.
///
/// # Example
/// ```
/// use cladefit::marking::resolve;
/// use cladefit::tree;
/// let tree = tree!("((sp1:0.1,sp2:0.2):0.3,sp3:0.4,sp4:0.5);");
/// assert_eq!(resolve(&tree, "sp2").unwrap(), tree.idx("sp2"));
/// assert!(resolve(&tree, "sp9").is_err());
/// ```
pub fn resolve(tree: &Tree, taxon: &str) -> Result<NodeIdx> {
    match tree.iter().find(|node| node.is_leaf() && node.id == taxon) {
        Some(node) => Ok(node.idx),
        None => bail!(FitError::TaxonNotFound {
            taxon: taxon.to_string()
        }),
    }
}

/// Nodes whose branches are tagged foreground for one fitting session.
///
/// Built once per tree and foreground taxa list by [`compute_mark_set`] and never modified
/// afterwards. Membership is stored as a bit per node index of the tree it was built for.
#[derive(Debug, Clone)]
pub struct MarkSet {
    marks: FixedBitSet,
    nodes: Vec<NodeIdx>,
}

impl PartialEq for MarkSet {
    fn eq(&self, other: &Self) -> bool {
        self.marks == other.marks
    }
}

impl Eq for MarkSet {}

impl MarkSet {
    fn new(tree: &Tree) -> Self {
        Self {
            marks: FixedBitSet::with_capacity(tree.len()),
            nodes: Vec::new(),
        }
    }

    fn insert(&mut self, idx: NodeIdx) {
        if !self.marks.put(usize::from(idx)) {
            self.nodes.push(idx);
        }
    }

    pub fn contains(&self, idx: &NodeIdx) -> bool {
        self.marks.contains(usize::from(idx))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Marked nodes in the order they were first marked: the foreground leaves in input order
    /// followed by the common ancestors.
    pub fn iter(&self) -> std::slice::Iter<'_, NodeIdx> {
        self.nodes.iter()
    }

    /// Marked nodes sorted by node index.
    pub fn sorted(&self) -> Vec<NodeIdx> {
        self.nodes.iter().copied().sorted().collect()
    }
}

impl Display for MarkSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.sorted().iter().join(", "))
    }
}

/// Computes the set of foreground nodes for the given taxa.
///
/// Every taxon is resolved first, so an unknown name fails the call before anything is marked.
/// Each foreground leaf is marked, then for every subset of at least two taxa the MRCA of the
/// subset is marked. The result does not depend on the order of `foreground_taxa`.
///
/// All `2^n - n - 1` subsets of the `n` foreground taxa are visited, so the running time is
/// exponential in `n`. This stays cheap for foreground sets of a handful of taxa, around 20
/// taxa it reaches a million MRCA queries.
///
/// # Example
/// ```
/// use cladefit::marking::compute_mark_set;
/// use cladefit::tree;
/// let tree = tree!("((sp1:0.1,sp2:0.2):0.3,sp3:0.4,sp4:0.5);");
/// let marks = compute_mark_set(&tree, &["sp1".to_string(), "sp2".to_string()]).unwrap();
/// assert_eq!(marks.len(), 3);
/// assert!(marks.contains(&tree.mrca(&[tree.idx("sp1"), tree.idx("sp2")]).unwrap()));
/// ```
pub fn compute_mark_set(tree: &Tree, foreground_taxa: &[String]) -> Result<MarkSet> {
    if foreground_taxa.is_empty() {
        bail!(FitError::EmptyForegroundSet);
    }
    let leaves = foreground_taxa
        .iter()
        .map(|taxon| resolve(tree, taxon))
        .collect::<Result<Vec<_>>>()?;

    let mut marks = MarkSet::new(tree);
    for leaf in &leaves {
        debug!("Marking foreground {}", tree.node(leaf));
        marks.insert(*leaf);
    }
    for k in (2..=leaves.len()).rev() {
        for subset in leaves.iter().copied().combinations(k) {
            if let Some(mrca) = tree.mrca(&subset) {
                marks.insert(mrca);
            }
        }
    }
    info!(
        "Marked {} foreground branch(es) for {} taxa: {}",
        marks.len(),
        leaves.len(),
        marks
    );
    Ok(marks)
}
