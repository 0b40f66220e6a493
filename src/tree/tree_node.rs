use std::fmt::{self, Display};

use approx::relative_eq;

use crate::tree::NodeIdx::{self, Internal as Int, Leaf};

/// One node of a [`Tree`](crate::tree::Tree) together with the branch leading to it.
///
/// `blen` is the length of the branch above the node, the root keeps whatever length the
/// newick string gave it. Only leaves carry taxon names, internal labels such as support
/// values are kept in `id` but never match a taxon.
#[derive(Debug, Clone)]
pub struct Node {
    pub idx: NodeIdx,
    pub parent: Option<NodeIdx>,
    pub children: Vec<NodeIdx>,
    pub blen: f64,
    pub id: String,
}

impl Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id.as_str() {
            "" => write!(f, "{}", self.idx),
            id => write!(f, "{} with id {id}", self.idx),
        }
    }
}

// Branch lengths round trip through newick text, so they are compared approximately.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx
            && self.parent == other.parent
            && self.children == other.children
            && self.id == other.id
            && relative_eq!(self.blen, other.blen)
    }
}

impl Node {
    pub(crate) fn new_leaf(idx: usize, parent: Option<NodeIdx>, blen: f64, id: String) -> Self {
        Self {
            idx: Leaf(idx),
            parent,
            children: Vec::new(),
            blen,
            id,
        }
    }

    pub(crate) fn new_internal(
        idx: usize,
        parent: Option<NodeIdx>,
        children: Vec<NodeIdx>,
        blen: f64,
        id: String,
    ) -> Self {
        Self {
            idx: Int(idx),
            parent,
            children,
            blen,
            id,
        }
    }

    /// Internal node whose children, branch length and label are filled in while parsing.
    pub(crate) fn placeholder(idx: usize, parent: Option<NodeIdx>) -> Self {
        Self::new_internal(idx, parent, Vec::new(), 0.0, String::new())
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.idx, Leaf(_))
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
