use std::collections::HashSet;
use std::fmt::{self, Display};

mod tree_node;
pub mod tree_parser;

pub use tree_node::Node;

#[derive(PartialEq, Clone, Copy, PartialOrd, Eq, Ord, Hash)]
pub enum NodeIdx {
    Internal(usize),
    Leaf(usize),
}

use NodeIdx::{Internal as Int, Leaf};

impl Display for NodeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Int(idx) => write!(f, "internal node {idx}"),
            Leaf(idx) => write!(f, "leaf node {idx}"),
        }
    }
}

impl fmt::Debug for NodeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Int(idx) => write!(f, "Int({idx})"),
            Leaf(idx) => write!(f, "Leaf({idx})"),
        }
    }
}

impl From<NodeIdx> for usize {
    fn from(node_idx: NodeIdx) -> usize {
        match node_idx {
            Int(idx) => idx,
            Leaf(idx) => idx,
        }
    }
}

impl From<&NodeIdx> for usize {
    fn from(node_idx: &NodeIdx) -> usize {
        usize::from(*node_idx)
    }
}

/// Phylogenetic tree with nodes stored in a single vector.
///
/// Node indices are assigned once, when the tree is parsed, and never change afterwards.
/// Both `Leaf(i)` and `Internal(i)` index into the same node vector, so `usize::from(idx)`
/// is a dense identifier in `0..tree.len()`.
///
/// Internal nodes may have any number of children, an unrooted tree is kept as a root with
/// three (or more) children rather than being resolved into a bifurcation.
#[derive(Debug, Clone)]
pub struct Tree {
    pub root: NodeIdx,
    pub(crate) nodes: Vec<Node>,
    pub postorder: Vec<NodeIdx>,
    pub preorder: Vec<NodeIdx>,
    pub(crate) leaf_ids: Vec<String>,
    pub complete: bool,
}

impl Tree {
    pub(crate) fn new_empty() -> Self {
        Self {
            root: Int(0),
            nodes: Vec::new(),
            postorder: Vec::new(),
            preorder: Vec::new(),
            leaf_ids: Vec::new(),
            complete: false,
        }
    }

    pub(crate) fn complete(&mut self) {
        self.complete = true;
        self.compute_postorder();
        self.compute_preorder();
    }

    /// Number of nodes in the tree, leaves and internal nodes together.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn leaves(&self) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.idx, Leaf(_)))
            .collect()
    }

    /// Leaf names in the order the leaves appear in the newick string.
    pub fn leaf_ids(&self) -> Vec<String> {
        self.leaf_ids.clone()
    }

    pub fn node(&self, idx: &NodeIdx) -> &Node {
        &self.nodes[usize::from(idx)]
    }

    pub fn node_id(&self, idx: &NodeIdx) -> &str {
        &self.nodes[usize::from(idx)].id
    }

    pub fn parent(&self, idx: &NodeIdx) -> Option<&NodeIdx> {
        self.nodes[usize::from(idx)].parent.as_ref()
    }

    pub fn children(&self, idx: &NodeIdx) -> &[NodeIdx] {
        &self.nodes[usize::from(idx)].children
    }

    /// A tree is treated as rooted when its root is a bifurcation.
    pub fn is_rooted(&self) -> bool {
        self.children(&self.root).len() == 2
    }

    /// Returns the index of the node with the given id.
    /// Panics if there is no such node.
    pub fn idx(&self, id: &str) -> NodeIdx {
        self.by_id(id).idx
    }

    /// Returns the node with the given id.
    /// Panics if there is no such node.
    pub fn by_id(&self, id: &str) -> &Node {
        self.nodes
            .iter()
            .find(|node| node.id == id)
            .unwrap_or_else(|| panic!("No node with id {id} found in the tree"))
    }

    pub(crate) fn compute_postorder(&mut self) {
        let mut order = Vec::<NodeIdx>::with_capacity(self.nodes.len());
        let mut stack = Vec::<NodeIdx>::with_capacity(self.nodes.len());
        stack.push(self.root);
        while let Some(cur) = stack.pop() {
            order.push(cur);
            stack.extend(self.children(&cur).iter().copied());
        }
        order.reverse();
        self.postorder = order;
    }

    pub(crate) fn compute_preorder(&mut self) {
        self.preorder = self.preorder_subroot(&self.root);
    }

    pub fn preorder_subroot(&self, subroot_idx: &NodeIdx) -> Vec<NodeIdx> {
        let mut order = Vec::<NodeIdx>::with_capacity(self.nodes.len());
        let mut stack = Vec::<NodeIdx>::with_capacity(self.nodes.len());
        stack.push(*subroot_idx);
        while let Some(cur) = stack.pop() {
            order.push(cur);
            stack.extend(self.children(&cur).iter().rev().copied());
        }
        order
    }

    /// Path from the given node up to the root, both ends included.
    pub fn ancestors(&self, idx: &NodeIdx) -> Vec<NodeIdx> {
        let mut path = vec![*idx];
        let mut cur = *idx;
        while let Some(parent) = self.parent(&cur) {
            path.push(*parent);
            cur = *parent;
        }
        path
    }

    /// Most recent common ancestor of the given nodes, `None` for an empty slice.
    /// The MRCA of a single node is the node itself.
    pub fn mrca(&self, nodes: &[NodeIdx]) -> Option<NodeIdx> {
        let (first, rest) = nodes.split_first()?;
        let mut common = self.ancestors(first);
        for idx in rest {
            let path: HashSet<NodeIdx> = self.ancestors(idx).into_iter().collect();
            common.retain(|anc| path.contains(anc));
        }
        common.first().copied()
    }

    /// Writes the tree in newick format. The root branch length is not written.
    pub fn to_newick(&self) -> String {
        self.to_marked_newick(|_| false)
    }

    /// Writes the tree in newick format, labelling every branch for which `marked` returns true
    /// with ` #1` after its branch length, the codeml convention for foreground branches.
    pub fn to_marked_newick(&self, marked: impl Fn(&NodeIdx) -> bool) -> String {
        let mut newick = String::new();
        self.subtree_to_newick(&self.root, &marked, &mut newick);
        newick.push(';');
        newick
    }

    fn subtree_to_newick(
        &self,
        idx: &NodeIdx,
        marked: &impl Fn(&NodeIdx) -> bool,
        newick: &mut String,
    ) {
        let node = self.node(idx);
        if let Int(_) = idx {
            newick.push('(');
            for (i, child) in node.children.iter().enumerate() {
                if i > 0 {
                    newick.push(',');
                }
                self.subtree_to_newick(child, marked, newick);
            }
            newick.push(')');
        }
        newick.push_str(&quote_label(&node.id));
        if !node.is_root() {
            newick.push_str(&format!(":{}", node.blen));
            if marked(idx) {
                newick.push_str(" #1");
            }
        }
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_newick())
    }
}

fn quote_label(label: &str) -> String {
    const SPECIAL: &[char] = &['(', ')', '[', ']', '\'', ':', ';', ',', ' ', '\t', '\n', '\r'];
    if label.contains(SPECIAL) {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}
