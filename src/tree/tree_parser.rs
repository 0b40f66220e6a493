use std::error::Error;
use std::fmt;

use anyhow::bail;
use log::{info, warn};
use pest::{error::Error as PestError, iterators::Pair, Parser};
use pest_derive::Parser;

use crate::tree::{
    Node,
    NodeIdx::{self, Internal as Int, Leaf},
    Tree,
};
use crate::Result;

#[derive(Parser)]
#[grammar = "./tree/newick.pest"]
pub struct NewickParser;

#[derive(Debug)]
pub struct ParsingError(pub(crate) Box<PestError<Rule>>);

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Malformed newick string")?;
        write!(f, "{}", self.0)
    }
}

impl Error for ParsingError {}

/// Parses all trees from a newick string.
///
/// Nodes are numbered in preorder of the newick string, so the root is always node 0 and a
/// node's index never changes after parsing. Multifurcations are kept as they are, in particular
/// an unrooted tree keeps its basal trifurcation.
///
/// # Example
/// ```
/// use cladefit::tree::tree_parser::from_newick;
/// let trees = from_newick("((A:0.1,B:0.2):0.3,C:0.4,D:0.5);").unwrap();
/// assert_eq!(trees.len(), 1);
/// assert_eq!(trees[0].leaves().len(), 4);
/// assert!(!trees[0].is_rooted());
/// ```
pub fn from_newick(newick: &str) -> Result<Vec<Tree>> {
    info!("Parsing newick trees.");
    let newick_rule = match NewickParser::parse(Rule::newick, newick) {
        Ok(mut pairs) => match pairs.next() {
            Some(rule) => rule,
            None => bail!("Empty newick parse result"),
        },
        Err(e) => bail!(ParsingError(Box::new(e))),
    };

    let mut trees = Vec::new();
    for tree_rule in newick_rule.into_inner() {
        match tree_rule.as_rule() {
            Rule::tree => {
                let mut tree = Tree::new_empty();
                if let Some(node_rule) = tree_rule.into_inner().next() {
                    tree.root = tree.parse_node_rule(node_rule, None);
                }
                tree.complete();
                tree.warn_duplicate_leaves();
                trees.push(tree);
            }
            Rule::EOI => {}
            _ => unreachable!(),
        }
    }
    info!("Finished parsing {} newick tree(s) successfully.", trees.len());
    Ok(trees)
}

impl Tree {
    fn parse_node_rule(&mut self, node_rule: Pair<Rule>, parent: Option<NodeIdx>) -> NodeIdx {
        match node_rule.as_rule() {
            Rule::leaf => self.parse_leaf_rule(node_rule, parent),
            Rule::internal => self.parse_internal_rule(node_rule, parent),
            _ => unreachable!(),
        }
    }

    fn parse_internal_rule(&mut self, internal_rule: Pair<Rule>, parent: Option<NodeIdx>) -> NodeIdx {
        let node_idx = self.nodes.len();
        self.nodes.push(Node::placeholder(node_idx, parent));

        let mut id = String::new();
        let mut blen = 0.0;
        let mut children = Vec::new();
        for rule in internal_rule.into_inner() {
            match rule.as_rule() {
                Rule::label => id = Tree::parse_label_rule(rule),
                Rule::branch_length => blen = Tree::parse_branch_length_rule(rule),
                Rule::internal | Rule::leaf => {
                    children.push(self.parse_node_rule(rule, Some(Int(node_idx))))
                }
                _ => unreachable!(),
            }
        }
        let node = &mut self.nodes[node_idx];
        node.id = id;
        node.blen = blen;
        node.children = children;
        Int(node_idx)
    }

    fn parse_leaf_rule(&mut self, leaf_rule: Pair<Rule>, parent: Option<NodeIdx>) -> NodeIdx {
        let mut id = String::new();
        let mut blen = 0.0;
        for rule in leaf_rule.into_inner() {
            match rule.as_rule() {
                Rule::label => id = Tree::parse_label_rule(rule),
                Rule::branch_length => blen = Tree::parse_branch_length_rule(rule),
                _ => unreachable!(),
            }
        }
        let node_idx = self.nodes.len();
        self.nodes
            .push(Node::new_leaf(node_idx, parent, blen, id.clone()));
        self.leaf_ids.push(id);
        Leaf(node_idx)
    }

    fn parse_branch_length_rule(rule: Pair<Rule>) -> f64 {
        rule.into_inner()
            .next()
            .map(|float| float.as_str().trim().parse::<f64>().unwrap_or_default())
            .unwrap_or_default()
    }

    fn parse_label_rule(rule: Pair<Rule>) -> String {
        let label = rule.as_str();
        match label.strip_prefix('\'').and_then(|l| l.strip_suffix('\'')) {
            Some(quoted) => quoted.replace("''", "'"),
            None => label.to_string(),
        }
    }

    fn warn_duplicate_leaves(&self) {
        let mut ids = self.leaf_ids.clone();
        ids.sort();
        ids.dedup();
        if ids.len() != self.leaf_ids.len() {
            warn!("Tree contains duplicate leaf names, lookups by name use the first match.");
        }
    }
}
