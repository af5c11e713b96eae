//! Time-bounded graph edit distance between tree graphs.
//!
//! Unit costs: substituting unequal nodes, deleting and inserting nodes,
//! and deleting and inserting edges each cost 1. Equal nodes and kept edges
//! are free. Node equality is [`NodeMatcher`](crate::NodeMatcher)'s, read
//! from keys interned once per tree. The two roots are always mapped onto
//! each other.
//!
//! Two search scopes are available. [`EditScope::TopDown`] restricts the
//! mapping so that a mapped node's parent maps onto its image's parent and
//! solves that exactly by dynamic programming over node pairs, with a small
//! assignment problem per pair of child lists. [`EditScope::Full`] ranges
//! over every mapping with a depth-first branch and bound that starts from
//! the top-down optimum.

use std::collections::HashMap;
use std::iter;
use std::time::{Duration, Instant};

use crate::graph::{Layout, TreeGraph};
use crate::label::MatchKey;

/// What a pair reports when its search runs out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum TimeoutPolicy {
    /// The distance is undefined (`NaN`) and left to matrix repair.
    #[default]
    Undefined,
    /// Report the cheapest complete edit path found before the deadline.
    BestSoFar,
}

/// Which node mappings the search ranges over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum EditScope {
    /// Mappings that keep every mapped node under the image of its parent.
    /// Polynomial; the result bounds the [`EditScope::Full`] distance from
    /// above and equals it whenever an optimal mapping is top-down.
    #[default]
    TopDown,
    /// Every mapping. Exponential in the worst case, so large trees usually
    /// need a generous timeout.
    Full,
}

/// Per-pair search budget and scope.
///
/// # Defaults
///
/// | Parameter        | Default     |
/// |------------------|-------------|
/// | `timeout`        | 500 ms      |
/// | `timeout_policy` | `Undefined` |
/// | `scope`          | `TopDown`   |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GedConfig {
    timeout: Duration,
    timeout_policy: TimeoutPolicy,
    scope: EditScope,
}

impl GedConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            timeout_policy: TimeoutPolicy::Undefined,
            scope: EditScope::TopDown,
        }
    }

    /// Wall-clock budget per pair. A zero budget times out every pair.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_timeout_policy(mut self, timeout_policy: TimeoutPolicy) -> Self {
        self.timeout_policy = timeout_policy;
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: EditScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        self.timeout_policy
    }

    #[must_use]
    pub fn scope(&self) -> EditScope {
        self.scope
    }
}

impl Default for GedConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one bounded search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditSearch {
    /// Cheapest complete edit path found.
    pub cost: f64,
    /// `true` when the search finished, so `cost` is the optimum over the
    /// configured [`EditScope`].
    pub complete: bool,
}

/// Graph edit distance calculator. Cheap to copy and safe to share.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphEditDistance {
    config: GedConfig,
}

impl GraphEditDistance {
    #[must_use]
    pub fn new(config: GedConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &GedConfig {
        &self.config
    }

    /// Distance between `a` and `b`, or `NaN` when the search timed out
    /// under [`TimeoutPolicy::Undefined`].
    #[must_use]
    pub fn distance(&self, a: &TreeGraph, b: &TreeGraph) -> f64 {
        let search = self.search(a, b);
        match (search.complete, self.config.timeout_policy) {
            (true, _) | (false, TimeoutPolicy::BestSoFar) => search.cost,
            (false, TimeoutPolicy::Undefined) => f64::NAN,
        }
    }

    /// Run the bounded search and report the best path and whether the
    /// search finished.
    #[must_use]
    pub fn search(&self, a: &TreeGraph, b: &TreeGraph) -> EditSearch {
        let deadline = Instant::now().checked_add(self.config.timeout);
        let mut search = Search::new(a.layout_ref(), b.layout_ref(), deadline);

        search.best = search.full_cost(&search.branch_alignment());
        if search.clock_expired() {
            search.timed_out = true;
        } else if let Some(top_down) = search.top_down() {
            search.best = search.best.min(top_down);
            if self.config.scope == EditScope::Full && search.best > search.floor {
                search.descend(0, 0);
            }
        }

        EditSearch {
            cost: search.best as f64,
            complete: !search.timed_out,
        }
    }
}

/// How often, in expanded search nodes, the clock is read.
const CLOCK_STRIDE: u32 = 64;

struct Search<'a> {
    g1: &'a Layout,
    g2: &'a Layout,
    k1: Vec<usize>,
    k2: Vec<usize>,
    /// Unassigned g1 nodes and unused g2 nodes per match key.
    count1: Vec<usize>,
    count2: Vec<usize>,
    /// `Σ min(count1[k], count2[k])`
    shared: usize,
    left1: usize,
    left2: usize,
    /// Edges not yet charged, i.e. with at least one endpoint still open.
    open_edges1: usize,
    open_edges2: usize,
    map12: Vec<Option<usize>>,
    map21: Vec<Option<usize>>,
    assigned1: Vec<bool>,
    best: usize,
    floor: usize,
    deadline: Option<Instant>,
    ticks: u32,
    timed_out: bool,
}

fn intern<'k>(ids: &mut HashMap<&'k MatchKey, usize>, keys: &'k [MatchKey]) -> Vec<usize> {
    keys.iter()
        .map(|k| {
            let next = ids.len();
            *ids.entry(k).or_insert(next)
        })
        .collect()
}

impl<'a> Search<'a> {
    fn new(g1: &'a Layout, g2: &'a Layout, deadline: Option<Instant>) -> Self {
        let mut ids = HashMap::new();
        let k1 = intern(&mut ids, &g1.keys);
        let k2 = intern(&mut ids, &g2.keys);
        let mut count1 = vec![0usize; ids.len()];
        let mut count2 = vec![0usize; ids.len()];
        k1.iter().for_each(|&k| count1[k] += 1);
        k2.iter().for_each(|&k| count2[k] += 1);
        let shared: usize = count1.iter().zip(&count2).map(|(a, b)| *a.min(b)).sum();

        let (n1, n2) = (k1.len(), k2.len());
        let mut search = Self {
            g1,
            g2,
            k1,
            k2,
            count1,
            count2,
            shared,
            left1: n1,
            left2: n2,
            open_edges1: g1.edges.len(),
            open_edges2: g2.edges.len(),
            map12: vec![None; n1],
            map21: vec![None; n2],
            assigned1: vec![false; n1],
            best: usize::MAX,
            floor: 0,
            deadline,
            ticks: 0,
            timed_out: false,
        };
        search.floor = search.lower_bound();
        search
    }

    fn clock_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Admissible estimate of the cost still to pay.
    fn lower_bound(&self) -> usize {
        self.left1.max(self.left2) - self.shared
            + self.open_edges1.abs_diff(self.open_edges2)
    }

    /// Cost charged when g1 node `u` is mapped to `x` (`None` deletes it):
    /// the node operation plus every edge between `u` and already assigned
    /// nodes that is deleted or inserted.
    fn step_cost(&self, u: usize, x: Option<usize>) -> usize {
        let mut cost = match x {
            Some(x) => usize::from(self.k1[u] != self.k2[x]),
            None => 1,
        };
        for &w in &self.g1.neighbours[u] {
            if !self.assigned1[w] {
                continue;
            }
            let (out2, in2) = match (x, self.map12[w]) {
                (Some(x), Some(y)) => (self.g2.has_edge(x, y), self.g2.has_edge(y, x)),
                _ => (false, false),
            };
            cost += usize::from(self.g1.has_edge(u, w) != out2)
                + usize::from(self.g1.has_edge(w, u) != in2);
        }
        if let Some(x) = x {
            for &y in &self.g2.neighbours[x] {
                if let Some(w) = self.map21[y]
                    && self.g1.edges_between(u, w) == 0
                {
                    cost += self.g2.edges_between(x, y);
                }
            }
        }
        cost
    }

    /// Assign `u -> x`, returning the number of edges newly charged on
    /// each side.
    fn assign(&mut self, u: usize, x: Option<usize>) -> (usize, usize) {
        self.assigned1[u] = true;
        self.map12[u] = x;
        self.left1 -= 1;
        let k = self.k1[u];
        if self.count1[k] <= self.count2[k] {
            self.shared -= 1;
        }
        self.count1[k] -= 1;
        let closed1: usize = self.g1.neighbours[u]
            .iter()
            .filter(|&&w| self.assigned1[w])
            .map(|&w| self.g1.edges_between(u, w))
            .sum();
        self.open_edges1 -= closed1;

        let mut closed2 = 0;
        if let Some(x) = x {
            self.map21[x] = Some(u);
            self.left2 -= 1;
            let k = self.k2[x];
            if self.count2[k] <= self.count1[k] {
                self.shared -= 1;
            }
            self.count2[k] -= 1;
            closed2 = self.g2.neighbours[x]
                .iter()
                .filter(|&&y| self.map21[y].is_some())
                .map(|&y| self.g2.edges_between(x, y))
                .sum();
            self.open_edges2 -= closed2;
        }
        (closed1, closed2)
    }

    fn unassign(&mut self, u: usize, x: Option<usize>, (closed1, closed2): (usize, usize)) {
        self.open_edges1 += closed1;
        let k = self.k1[u];
        self.count1[k] += 1;
        if self.count1[k] <= self.count2[k] {
            self.shared += 1;
        }
        self.left1 += 1;
        self.map12[u] = None;
        self.assigned1[u] = false;

        if let Some(x) = x {
            self.open_edges2 += closed2;
            let k = self.k2[x];
            self.count2[k] += 1;
            if self.count2[k] <= self.count1[k] {
                self.shared += 1;
            }
            self.left2 += 1;
            self.map21[x] = None;
        }
    }

    fn out_of_time(&mut self) -> bool {
        if !self.timed_out {
            self.ticks = self.ticks.wrapping_add(1);
            if self.ticks % CLOCK_STRIDE == 0 && self.clock_expired() {
                self.timed_out = true;
            }
        }
        self.timed_out
    }

    fn descend(&mut self, depth: usize, cost: usize) {
        if self.out_of_time() {
            return;
        }
        let Some(&u) = self.g1.bfs.get(depth) else {
            // Every g1 node is placed; insert what is left of g2.
            let total = cost + self.left2 + self.open_edges2;
            self.best = self.best.min(total);
            return;
        };

        let mut options: Vec<(usize, Option<usize>)> = if depth == 0 {
            vec![(self.step_cost(u, Some(0)), Some(0))]
        } else {
            (0..self.map21.len())
                .filter(|&x| self.map21[x].is_none())
                .map(Some)
                .chain(iter::once(None))
                .map(|x| (self.step_cost(u, x), x))
                .collect()
        };
        options.sort_by_key(|&(step, _)| step);

        for (step, x) in options {
            let next = cost + step;
            if next >= self.best {
                break;
            }
            let closed = self.assign(u, x);
            if next + self.lower_bound() < self.best {
                self.descend(depth + 1, next);
            }
            self.unassign(u, x, closed);
            if self.timed_out || self.best <= self.floor {
                return;
            }
        }
    }

    /// Cheapest top-down mapping, or `None` when the deadline passes first.
    ///
    /// `table[u][x]` is the cost of editing the subtree under `u` into the
    /// subtree under `x` with `u` mapped onto `x`: the substitution plus the
    /// best assignment between the two child lists. A child left without a
    /// partner is deleted or inserted with its whole subtree, one node and
    /// one edge per subtree node.
    fn top_down(&mut self) -> Option<usize> {
        let (g1, g2) = (self.g1, self.g2);
        let n2 = self.k2.len();
        let size1 = subtree_sizes(g1);
        let size2 = subtree_sizes(g2);
        let mut table = vec![0usize; self.k1.len() * n2];
        let mut cost = Vec::new();

        for &u in g1.bfs.iter().rev() {
            if self.clock_expired() {
                self.timed_out = true;
                return None;
            }
            let kids1 = &g1.children[u];
            for &x in g2.bfs.iter().rev() {
                let kids2 = &g2.children[x];
                let (p, q) = (kids1.len(), kids2.len());
                let m = p + q;
                cost.clear();
                cost.resize(m * m, 0);
                for (i, &a) in kids1.iter().enumerate() {
                    for (j, &b) in kids2.iter().enumerate() {
                        cost[i * m + j] = table[a * n2 + b];
                    }
                    for j in q..m {
                        cost[i * m + j] = 2 * size1[a];
                    }
                }
                for i in p..m {
                    for (j, &b) in kids2.iter().enumerate() {
                        cost[i * m + j] = 2 * size2[b];
                    }
                }
                table[u * n2 + x] =
                    usize::from(self.k1[u] != self.k2[x]) + assignment_cost(&cost, m);
            }
        }
        Some(table[0])
    }

    /// Map the trees onto each other top-down, pairing children by branch;
    /// subtrees without a partner are deleted.
    fn branch_alignment(&self) -> Vec<Option<usize>> {
        let mut mapping = vec![None; self.map12.len()];
        let mut stack = vec![(0usize, 0usize)];
        while let Some((u, x)) = stack.pop() {
            mapping[u] = Some(x);
            let pairs = self.g1.children[u].iter().zip(&self.g2.children[x]);
            stack.extend(pairs.map(|(&a, &b)| (a, b)));
        }
        mapping
    }

    /// Total cost of the edit path induced by a complete node mapping.
    fn full_cost(&self, mapping: &[Option<usize>]) -> usize {
        let mut inverse = vec![None; self.map21.len()];
        for (u, x) in mapping.iter().enumerate() {
            if let Some(x) = *x {
                inverse[x] = Some(u);
            }
        }
        let nodes: usize = mapping
            .iter()
            .enumerate()
            .map(|(u, x)| x.map_or(1, |x| usize::from(self.k1[u] != self.k2[x])))
            .sum::<usize>()
            + inverse.iter().filter(|p| p.is_none()).count();
        let dropped = self
            .g1
            .edges
            .iter()
            .filter(|&&(a, b)| match (mapping[a], mapping[b]) {
                (Some(x), Some(y)) => !self.g2.has_edge(x, y),
                _ => true,
            })
            .count();
        let added = self
            .g2
            .edges
            .iter()
            .filter(|&&(x, y)| match (inverse[x], inverse[y]) {
                (Some(a), Some(b)) => !self.g1.has_edge(a, b),
                _ => true,
            })
            .count();
        nodes + dropped + added
    }
}

fn subtree_sizes(layout: &Layout) -> Vec<usize> {
    let mut size = vec![1usize; layout.children.len()];
    for &u in layout.bfs.iter().rev() {
        let below: usize = layout.children[u].iter().map(|&c| size[c]).sum();
        size[u] += below;
    }
    size
}

/// Minimum total cost of a perfect assignment on the `m x m` row-major
/// matrix `cost`, by the Hungarian method with row and column potentials.
fn assignment_cost(cost: &[usize], m: usize) -> usize {
    if m == 0 {
        return 0;
    }
    // 1-based; column 0 is the virtual start of each augmenting path.
    let c = |i: usize, j: usize| cost[(i - 1) * m + (j - 1)] as i64;
    let mut row_pot = vec![0i64; m + 1];
    let mut col_pot = vec![0i64; m + 1];
    let mut owner = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=m {
        owner[0] = i;
        let mut j0 = 0;
        let mut min_slack = vec![i64::MAX; m + 1];
        let mut used = vec![false; m + 1];
        loop {
            used[j0] = true;
            let i0 = owner[j0];
            let mut delta = i64::MAX;
            let mut j1 = 0;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let slack = c(i0, j) - row_pot[i0] - col_pot[j];
                if slack < min_slack[j] {
                    min_slack[j] = slack;
                    way[j] = j0;
                }
                if min_slack[j] < delta {
                    delta = min_slack[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    row_pot[owner[j]] += delta;
                    col_pot[j] -= delta;
                } else {
                    min_slack[j] -= delta;
                }
            }
            j0 = j1;
            if owner[j0] == 0 {
                break;
            }
        }
        while j0 != 0 {
            let j1 = way[j0];
            owner[j0] = owner[j1];
            j0 = j1;
        }
    }
    (1..=m).map(|j| cost[(owner[j] - 1) * m + (j - 1)]).sum()
}
