//! Labelled directed tree graphs extracted from fitted decision trees.

use std::collections::VecDeque;
use std::fmt::Write as _;

use petgraph::Direction::Incoming;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use rafo_forest::{DecisionTree, Node, RandomForest};
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::error::GedError;
use crate::label::{MatchKey, NodeLabel, NodeStats};
use crate::matcher::NodeMatcher;

/// Which way a split sends samples along an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Branch {
    /// `feature <= threshold`
    True,
    False,
}

/// One node: the label text and its decoded form.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    text: String,
    label: NodeLabel,
}

impl TreeNode {
    /// Decode `text` once; matching later reads only the decoded label.
    ///
    /// # Errors
    ///
    /// Returns [`GedError::LabelParse`] when `text` is not a valid label.
    pub fn from_text(text: impl Into<String>) -> Result<Self, GedError> {
        let text = text.into();
        let label = NodeLabel::parse(&text)?;
        Ok(Self { text, label })
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn label(&self) -> &NodeLabel {
        &self.label
    }
}

/// Flat views of a [`TreeGraph`] used by the edit-distance search.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    pub(crate) keys: Vec<MatchKey>,
    /// Breadth-first order from the root; the root comes first.
    pub(crate) bfs: Vec<usize>,
    /// Children per node, `True` branch first.
    pub(crate) children: Vec<Vec<usize>>,
    /// Nodes joined to each node by an edge in either direction.
    pub(crate) neighbours: Vec<Vec<usize>>,
    pub(crate) edges: Vec<(usize, usize)>,
    adjacency: Vec<bool>,
}

impl Layout {
    fn n(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn has_edge(&self, from: usize, to: usize) -> bool {
        self.adjacency[from * self.n() + to]
    }

    /// Directed edges between `a` and `b`, counting both directions.
    pub(crate) fn edges_between(&self, a: usize, b: usize) -> usize {
        usize::from(self.has_edge(a, b)) + usize::from(self.has_edge(b, a))
    }
}

/// A decision tree as a labelled directed graph.
///
/// Node `i` corresponds to node `i` of the source tree's arena, so the root
/// is always node 0. Construction validates that the graph is a tree:
/// node 0 has no parent, every other node has exactly one, and every node
/// is reachable from the root.
#[derive(Debug, Clone)]
pub struct TreeGraph {
    graph: DiGraph<TreeNode, Branch>,
    layout: Layout,
}

impl TreeGraph {
    /// Extract the graph of a fitted tree.
    ///
    /// `index` is the tree's position in its ensemble and only feeds error
    /// context. Split labels name features via `feature_names`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`GedError::StructureExtraction`] | unfitted, unknown feature or child, or not a tree |
    /// | [`GedError::LabelParse`] | a rendered label does not decode, e.g. a backslash in a name |
    pub fn from_tree(
        index: usize,
        tree: &DecisionTree,
        feature_names: &[String],
    ) -> Result<Self, GedError> {
        if !tree.is_fitted() {
            return Err(extraction(index, "estimator exposes no tree structure (not fitted)"));
        }
        let criterion = tree.criterion().name();
        let nodes = tree.nodes();
        let mut graph = DiGraph::with_capacity(nodes.len(), nodes.len().saturating_sub(1));

        for node in nodes {
            let stats = NodeStats {
                criterion: criterion.to_string(),
                impurity: node.impurity().value(),
                samples: node.n_samples(),
                value: node.class_counts().iter().map(|&c| c as f64).collect(),
            };
            let label = match node {
                Node::Split {
                    feature, threshold, ..
                } => {
                    let name = feature_names.get(feature.index()).ok_or_else(|| {
                        extraction(index, &format!("split on unknown feature column {feature}"))
                    })?;
                    NodeLabel::Split {
                        feature: name.clone(),
                        threshold: *threshold,
                        stats,
                    }
                }
                Node::Leaf { .. } => NodeLabel::Leaf { stats },
            };
            graph.add_node(TreeNode::from_text(label.render())?);
        }

        for (i, node) in nodes.iter().enumerate() {
            if let Some((left, right)) = node.children() {
                for (child, branch) in [(left, Branch::True), (right, Branch::False)] {
                    if child.index() >= nodes.len() {
                        let reason = format!("node {i} points at missing child {child}");
                        return Err(extraction(index, &reason));
                    }
                    graph.add_edge(NodeIndex::new(i), NodeIndex::new(child.index()), branch);
                }
            }
        }

        Self::assemble(index, graph)
    }

    /// Extract one graph per estimator, in ensemble order.
    ///
    /// # Errors
    ///
    /// The first error of [`TreeGraph::from_tree`] in tree order.
    #[instrument(skip_all, fields(n_trees = forest.n_trees()))]
    pub fn from_forest(forest: &RandomForest) -> Result<Vec<Self>, GedError> {
        let graphs = forest
            .trees()
            .par_iter()
            .enumerate()
            .map(|(i, tree)| Self::from_tree(i, tree, forest.feature_names()))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(n_nodes = graphs.iter().map(Self::n_nodes).sum::<usize>(), "tree graphs extracted");
        Ok(graphs)
    }

    /// Build a graph from label texts and `(parent, child)` edges.
    ///
    /// The first edge leaving a node is its `True` branch. Node 0 must be
    /// the root.
    ///
    /// # Errors
    ///
    /// Same conditions as [`TreeGraph::from_tree`].
    pub fn from_texts<S: AsRef<str>>(
        index: usize,
        labels: &[S],
        edges: &[(usize, usize)],
    ) -> Result<Self, GedError> {
        let mut graph = DiGraph::with_capacity(labels.len(), edges.len());
        for text in labels {
            graph.add_node(TreeNode::from_text(text.as_ref())?);
        }
        let mut outgoing = vec![0usize; labels.len()];
        for &(parent, child) in edges {
            if parent >= labels.len() || child >= labels.len() {
                let reason = format!("edge ({parent}, {child}) leaves the graph");
                return Err(extraction(index, &reason));
            }
            let branch = if outgoing[parent] == 0 { Branch::True } else { Branch::False };
            outgoing[parent] += 1;
            graph.add_edge(NodeIndex::new(parent), NodeIndex::new(child), branch);
        }
        Self::assemble(index, graph)
    }

    fn assemble(index: usize, graph: DiGraph<TreeNode, Branch>) -> Result<Self, GedError> {
        let n = graph.node_count();
        if n == 0 {
            return Err(extraction(index, "graph has no nodes"));
        }
        for node in graph.node_indices() {
            let parents = graph.neighbors_directed(node, Incoming).count();
            let expected = usize::from(node.index() != 0);
            if parents != expected {
                return Err(extraction(
                    index,
                    &format!("node {} has {parents} parents, expected {expected}", node.index()),
                ));
            }
        }
        let mut bfs = Bfs::new(&graph, NodeIndex::new(0));
        let mut reached = 0;
        while bfs.next(&graph).is_some() {
            reached += 1;
        }
        if reached != n {
            let reason = format!("only {reached} of {n} nodes are reachable from the root");
            return Err(extraction(index, &reason));
        }

        let layout = Self::layout(&graph);
        Ok(Self { graph, layout })
    }

    fn layout(graph: &DiGraph<TreeNode, Branch>) -> Layout {
        let n = graph.node_count();
        let matcher = NodeMatcher::new();
        let keys = graph.node_weights().map(|node| matcher.key(&node.label)).collect();

        let mut children = vec![Vec::new(); n];
        let mut neighbours = vec![Vec::new(); n];
        let mut edges = Vec::with_capacity(graph.edge_count());
        let mut adjacency = vec![false; n * n];
        for node in graph.node_indices() {
            let mut out: Vec<(Branch, usize)> = graph
                .edges(node)
                .map(|e| (*e.weight(), e.target().index()))
                .collect();
            out.sort_unstable();
            let from = node.index();
            for (_, to) in out {
                children[from].push(to);
                edges.push((from, to));
                adjacency[from * n + to] = true;
                neighbours[from].push(to);
                neighbours[to].push(from);
            }
        }

        let mut bfs = Vec::with_capacity(n);
        let mut queue = VecDeque::from([0usize]);
        while let Some(node) = queue.pop_front() {
            bfs.push(node);
            queue.extend(children[node].iter().copied());
        }

        Layout {
            keys,
            bfs,
            children,
            neighbours,
            edges,
            adjacency,
        }
    }

    pub(crate) fn layout_ref(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    pub fn graph(&self) -> &DiGraph<TreeNode, Branch> {
        &self.graph
    }

    /// Root node id; always 0.
    #[must_use]
    pub fn root(&self) -> usize {
        0
    }

    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn n_edges(&self) -> usize {
        self.graph.edge_count()
    }

    #[must_use]
    pub fn node(&self, id: usize) -> Option<&TreeNode> {
        self.graph.node_weight(NodeIndex::new(id))
    }

    /// Children of `id`, `True` branch first.
    #[must_use]
    pub fn children(&self, id: usize) -> &[usize] {
        self.layout.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Label texts in node order.
    pub fn texts(&self) -> impl Iterator<Item = &str> + '_ {
        self.graph.node_weights().map(TreeNode::text)
    }

    /// Render as Graphviz DOT, marking the root's branches `True`/`False`.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph Tree {\nnode [shape=box] ;\n");
        for (id, node) in self.graph.node_weights().enumerate() {
            let _ = writeln!(out, "{id} [label=\"{}\"] ;", node.text.replace('"', "\\\""));
        }
        for &(from, to) in &self.layout.edges {
            if from == self.root() {
                let (angle, head) = if self.layout.children[from].first() == Some(&to) {
                    (45, "True")
                } else {
                    (-45, "False")
                };
                let _ = writeln!(
                    out,
                    "{from} -> {to} [labeldistance=2.5, labelangle={angle}, headlabel=\"{head}\"] ;"
                );
            } else {
                let _ = writeln!(out, "{from} -> {to} ;");
            }
        }
        out.push('}');
        out
    }
}

fn extraction(tree: usize, reason: &str) -> GedError {
    GedError::StructureExtraction {
        tree,
        reason: reason.to_string(),
    }
}
