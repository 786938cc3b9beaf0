use dagcore::{Connection, NodeId, WorkflowError};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};

/// Dependency graph over a set of node ids, with a deterministic
/// topological order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<NodeId, ()>,
    index: HashMap<NodeId, NodeIndex>,
    order: Vec<NodeId>,
}

impl DependencyGraph {
    /// Build the graph and sort it with Kahn's algorithm.
    ///
    /// Connections with an endpoint outside `node_ids` are ignored. The ready
    /// queue is seeded in `node_ids` order and successors are released in
    /// connection order.
    pub fn build(node_ids: &[NodeId], connections: &[Connection]) -> Result<Self, WorkflowError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for id in node_ids {
            if !index.contains_key(id) {
                index.insert(id.clone(), graph.add_node(id.clone()));
            }
        }

        // Successor lists in connection order; one entry per connection.
        let mut successors: Vec<Vec<NodeIndex>> = vec![Vec::new(); graph.node_count()];
        let mut in_degree = vec![0usize; graph.node_count()];
        for conn in connections {
            let (Some(&from), Some(&to)) = (index.get(&conn.from_node), index.get(&conn.to_node))
            else {
                continue;
            };
            graph.add_edge(from, to, ());
            successors[from.index()].push(to);
            in_degree[to.index()] += 1;
        }

        let mut queue: VecDeque<NodeIndex> = graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();
        let mut order = Vec::with_capacity(graph.node_count());

        while let Some(idx) = queue.pop_front() {
            order.push(graph[idx].clone());
            for &next in &successors[idx.index()] {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() < graph.node_count() {
            let nodes = graph
                .node_indices()
                .filter(|idx| in_degree[idx.index()] > 0)
                .map(|idx| graph[idx].clone())
                .collect();
            return Err(WorkflowError::CycleDetected { nodes });
        }

        Ok(Self { graph, index, order })
    }

    /// Node ids in execution order
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Direct upstream nodes of `id`, deduplicated.
    pub fn predecessors(&self, id: &str) -> Vec<NodeId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut preds: Vec<NodeId> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|p| self.graph[p].clone())
            .collect();
        preds.sort();
        preds.dedup();
        preds
    }

    /// Whether a dependency path leads from `from` to `to`.
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) if a != b => has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }
}

/// Topologically order `node_ids` given `connections`.
pub fn build_order(
    node_ids: &[NodeId],
    connections: &[Connection],
) -> Result<Vec<NodeId>, WorkflowError> {
    DependencyGraph::build(node_ids, connections).map(|g| g.order)
}
