//! MCTS tree node with visit counts and Q-values.
//!
//! Each node represents one partial formula. Children are created for every
//! legal token when the node is expanded, in registration order, so "first
//! child" and "lowest token id" are the same thing.

use crate::token::TokenId;

/// Reference to an MCTS node (index into arena).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeRef(pub usize);

impl NodeRef {
    /// Get the underlying index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// MCTS tree node.
#[derive(Clone, Debug)]
pub struct MctsNode {
    /// Token that led to this node (None for root).
    pub action: Option<TokenId>,

    /// Parent node reference (None for root).
    pub parent: Option<NodeRef>,

    /// Child node references.
    pub children: Vec<NodeRef>,

    /// Visit count N(s).
    pub visit_count: u32,

    /// Total value accumulated W(s).
    /// Q(s) = W(s) / N(s)
    pub total_value: f64,

    /// Prior probability P(s, a) from the policy.
    pub prior: f64,

    /// Whether this node has been expanded (children created).
    pub is_expanded: bool,

    /// Whether the episode ends here.
    pub is_terminal: bool,

    /// Depth in the tree (root = 0).
    pub depth: usize,
}

impl MctsNode {
    /// Create a new root node.
    #[must_use]
    pub fn root() -> Self {
        Self {
            action: None,
            parent: None,
            children: Vec::new(),
            visit_count: 0,
            total_value: 0.0,
            prior: 1.0,
            is_expanded: false,
            is_terminal: false,
            depth: 0,
        }
    }

    /// Create a child node.
    #[must_use]
    pub fn child(action: TokenId, parent: NodeRef, prior: f64, depth: usize) -> Self {
        Self {
            action: Some(action),
            parent: Some(parent),
            prior,
            depth,
            ..Self::root()
        }
    }

    /// Get Q-value (mean value).
    #[must_use]
    pub fn q_value(&self) -> f64 {
        if self.visit_count == 0 {
            0.0
        } else {
            self.total_value / f64::from(self.visit_count)
        }
    }

    /// PUCT score for action selection.
    ///
    /// PUCT(s, a) = Q(s,a) + c_puct * P(s,a) * sqrt(N(parent)) / (1 + N(s,a))
    #[must_use]
    pub fn ucb_score(&self, parent_visits: u32, c_puct: f64) -> f64 {
        let exploration =
            c_puct * self.prior * f64::from(parent_visits).sqrt() / (1.0 + f64::from(self.visit_count));
        self.q_value() + exploration
    }

    /// Update node statistics after a simulation.
    pub fn update(&mut self, value: f64) {
        self.visit_count += 1;
        self.total_value += value;
    }
}

/// Arena-based storage for MCTS nodes.
///
/// Nodes are stored in a vector and referenced by index.
pub struct MctsArena {
    nodes: Vec<MctsNode>,
}

impl MctsArena {
    /// Create a new arena with a root node.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(1)
    }

    /// Create an arena with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut nodes = Vec::with_capacity(capacity.max(1));
        nodes.push(MctsNode::root());
        Self { nodes }
    }

    /// Get root node reference.
    #[must_use]
    pub fn root(&self) -> NodeRef {
        NodeRef(0)
    }

    /// Get a node by reference.
    #[must_use]
    pub fn get(&self, node_ref: NodeRef) -> &MctsNode {
        &self.nodes[node_ref.0]
    }

    /// Get a mutable node by reference.
    pub fn get_mut(&mut self, node_ref: NodeRef) -> &mut MctsNode {
        &mut self.nodes[node_ref.0]
    }

    /// Add a child node and return its reference.
    pub fn add_child(&mut self, parent: NodeRef, action: TokenId, prior: f64) -> NodeRef {
        let depth = self.get(parent).depth + 1;
        let child_ref = NodeRef(self.nodes.len());
        self.nodes.push(MctsNode::child(action, parent, prior, depth));
        self.get_mut(parent).children.push(child_ref);
        child_ref
    }

    /// Number of nodes in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if arena is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Child with the highest PUCT score. Ties go to the earliest child.
    #[must_use]
    pub fn select_child_puct(&self, parent: NodeRef, c_puct: f64) -> Option<NodeRef> {
        let parent_node = self.get(parent);
        let parent_visits = parent_node.visit_count;
        first_max_by(&parent_node.children, |&child| {
            self.get(child).ucb_score(parent_visits, c_puct)
        })
    }

    /// Most visited child (robust-child rule). Ties go to the earliest child.
    #[must_use]
    pub fn best_child_by_visits(&self, parent: NodeRef) -> Option<NodeRef> {
        first_max_by(&self.get(parent).children, |&child| {
            f64::from(self.get(child).visit_count)
        })
    }

    /// Backpropagate value through ancestors.
    pub fn backpropagate(&mut self, mut node_ref: NodeRef, value: f64) {
        loop {
            let node = self.get_mut(node_ref);
            node.update(value);

            match node.parent {
                Some(parent) => node_ref = parent,
                None => break,
            }
        }
    }
}

impl Default for MctsArena {
    fn default() -> Self {
        Self::new()
    }
}

/// First element with the maximal key. NaN keys never win.
fn first_max_by<F>(children: &[NodeRef], mut key: F) -> Option<NodeRef>
where
    F: FnMut(&NodeRef) -> f64,
{
    let mut best: Option<(NodeRef, f64)> = None;
    for child in children {
        let score = key(child);
        if score.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((*child, score));
        }
    }
    best.map(|(child, _)| child).or_else(|| children.first().copied())
}
