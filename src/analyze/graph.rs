//! Dependency graph and its derived views
//!
//! Nodes are stack positions. An edge `c -> p` means commit `c` needs `p`
//! to land first.

use crate::types::CommitId;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

/// Dependency relation between commits of one stack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    ids: Vec<CommitId>,
    prereqs: Vec<BTreeSet<usize>>,
}

/// One node of the single-parent forest: an SCC of the dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForestNode {
    /// Stack positions in this node, ascending
    pub members: Vec<usize>,
    /// Index (into [`Forest::nodes`]) of the parent node
    pub parent: Option<usize>,
}

/// Minimal single-parent forest over the SCC-collapsed graph.
///
/// Nodes are ordered parents-first, ties broken by stack position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forest {
    /// Forest nodes, parents before children
    pub nodes: Vec<ForestNode>,
}

impl Forest {
    /// Nodes without a parent
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(i, _)| i)
    }

    /// Direct children of a node
    pub fn children(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| n.parent == Some(node))
            .map(|(i, _)| i)
    }

    /// Node containing a stack position
    pub fn node_of(&self, position: usize) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.members.contains(&position))
    }

    /// Nodes from the root down to `node`, inclusive
    pub fn path_to(&self, node: usize) -> Vec<usize> {
        let mut path = vec![node];
        let mut cur = self.nodes[node].parent;
        while let Some(p) = cur {
            path.push(p);
            cur = self.nodes[p].parent;
        }
        path.reverse();
        path
    }
}

impl DependencyGraph {
    /// Graph with no edges
    pub fn new(ids: Vec<CommitId>) -> Self {
        let prereqs = vec![BTreeSet::new(); ids.len()];
        Self { ids, prereqs }
    }

    /// Record that `dependent` needs `prerequisite`
    pub fn add_dependency(&mut self, dependent: usize, prerequisite: usize) {
        if dependent != prerequisite {
            self.prereqs[dependent].insert(prerequisite);
        }
    }

    /// Number of commits
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the graph has no commits
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Commit-ids by stack position
    pub fn ids(&self) -> &[CommitId] {
        &self.ids
    }

    /// Direct prerequisites of a commit
    pub fn prerequisites(&self, position: usize) -> &BTreeSet<usize> {
        &self.prereqs[position]
    }

    /// Every prerequisite reachable from `positions`, transitively.
    ///
    /// Starting positions are only included when another one needs them.
    pub fn closure(&self, positions: &[usize]) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut todo: Vec<usize> = positions
            .iter()
            .flat_map(|&p| self.prereqs[p].iter().copied())
            .collect();
        while let Some(p) = todo.pop() {
            if seen.insert(p) {
                todo.extend(self.prereqs[p].iter().copied());
            }
        }
        seen
    }

    /// Positions with at least one dependency in either direction, ascending
    pub fn connected(&self) -> Vec<usize> {
        let mut linked: BTreeSet<usize> = BTreeSet::new();
        for (c, prereqs) in self.prereqs.iter().enumerate() {
            if !prereqs.is_empty() {
                linked.insert(c);
                linked.extend(prereqs.iter().copied());
            }
        }
        linked.into_iter().collect()
    }

    /// Strongly connected components (Tarjan).
    ///
    /// Every commit appears in exactly one component. Members are sorted, and
    /// components are ordered by their lowest member.
    pub fn sccs(&self) -> Vec<Vec<usize>> {
        let mut tarjan = Tarjan::new(self.len());
        for v in 0..self.len() {
            if tarjan.index[v].is_none() {
                tarjan.visit(v, &self.prereqs);
            }
        }
        let mut sccs = tarjan.sccs;
        for scc in &mut sccs {
            scc.sort_unstable();
        }
        sccs.sort_by_key(|scc| scc[0]);
        sccs
    }

    /// Weakly connected components: groups that share no dependency with
    /// each other
    pub fn components(&self) -> Vec<Vec<usize>> {
        fn find(parent: &mut [usize], x: usize) -> usize {
            let mut root = x;
            while parent[root] != root {
                root = parent[root];
            }
            let mut cur = x;
            while parent[cur] != root {
                let next = parent[cur];
                parent[cur] = root;
                cur = next;
            }
            root
        }

        let mut parent: Vec<usize> = (0..self.len()).collect();
        for (c, prereqs) in self.prereqs.iter().enumerate() {
            for &p in prereqs {
                let (a, b) = (find(&mut parent, c), find(&mut parent, p));
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut slot: Vec<Option<usize>> = vec![None; self.len()];
        for v in 0..self.len() {
            let root = find(&mut parent, v);
            match slot[root] {
                Some(g) => groups[g].push(v),
                None => {
                    slot[root] = Some(groups.len());
                    groups.push(vec![v]);
                }
            }
        }
        groups
    }

    /// Single-parent forest: SCCs collapsed, each node keeps only its
    /// nearest (highest stack position) outside prerequisite
    pub fn forest(&self) -> Forest {
        let sccs = self.sccs();
        let mut scc_of = vec![0; self.len()];
        for (i, scc) in sccs.iter().enumerate() {
            for &m in scc {
                scc_of[m] = i;
            }
        }

        let parent_scc: Vec<Option<usize>> = sccs
            .iter()
            .enumerate()
            .map(|(i, scc)| {
                scc.iter()
                    .flat_map(|&m| self.prereqs[m].iter().copied())
                    .filter(|&p| scc_of[p] != i)
                    .max()
                    .map(|p| scc_of[p])
            })
            .collect();

        // Parents first, lowest stack position among ready nodes next
        let mut pending_children: Vec<Vec<usize>> = vec![Vec::new(); sccs.len()];
        let mut ready = BinaryHeap::new();
        for (i, parent) in parent_scc.iter().enumerate() {
            match parent {
                Some(p) => pending_children[*p].push(i),
                None => ready.push(Reverse((sccs[i][0], i))),
            }
        }

        let mut order = Vec::with_capacity(sccs.len());
        let mut new_index = vec![0; sccs.len()];
        while let Some(Reverse((_, i))) = ready.pop() {
            new_index[i] = order.len();
            order.push(i);
            for &c in &pending_children[i] {
                ready.push(Reverse((sccs[c][0], c)));
            }
        }

        let nodes = order
            .iter()
            .map(|&i| ForestNode {
                members: sccs[i].clone(),
                parent: parent_scc[i].map(|p| new_index[p]),
            })
            .collect();
        Forest { nodes }
    }

    /// Groups that can be submitted in parallel: the forest roots
    pub fn parallel_roots(&self) -> Vec<Vec<usize>> {
        let forest = self.forest();
        forest
            .roots()
            .map(|r| forest.nodes[r].members.clone())
            .collect()
    }
}

struct Tarjan {
    next: usize,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    sccs: Vec<Vec<usize>>,
}

impl Tarjan {
    fn new(n: usize) -> Self {
        Self {
            next: 0,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            sccs: Vec::new(),
        }
    }

    /// Iterative DFS so deep stacks can't overflow
    fn visit(&mut self, root: usize, edges: &[BTreeSet<usize>]) {
        let mut work: Vec<(usize, Vec<usize>, usize)> = Vec::new();
        self.open(root);
        work.push((root, edges[root].iter().copied().collect(), 0));

        while let Some((v, succ, pos)) = work.last_mut() {
            let v = *v;
            if let Some(&w) = succ.get(*pos) {
                *pos += 1;
                match self.index[w] {
                    None => {
                        self.open(w);
                        work.push((w, edges[w].iter().copied().collect(), 0));
                    }
                    Some(wi) if self.on_stack[w] => {
                        self.lowlink[v] = self.lowlink[v].min(wi);
                    }
                    Some(_) => {}
                }
                continue;
            }

            work.pop();
            if let Some((u, _, _)) = work.last() {
                let u = *u;
                self.lowlink[u] = self.lowlink[u].min(self.lowlink[v]);
            }
            if Some(self.lowlink[v]) == self.index[v] {
                let mut scc = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                self.sccs.push(scc);
            }
        }
    }

    fn open(&mut self, v: usize) {
        self.index[v] = Some(self.next);
        self.lowlink[v] = self.next;
        self.next += 1;
        self.stack.push(v);
        self.on_stack[v] = true;
    }
}
