//! Foreign-key graph over the tables of one database.
//!
//! Joins are only ever inferred from declared foreign keys. Tables that are
//! not connected produce [`EngineError::NoJoinPath`], never a cross join.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

use super::generated::InferredJoin;
use crate::error::{EngineError, EngineResult};
use crate::schema::TableSchema;
use crate::sql::JoinType;

/// A declared foreign key: `table.columns` reference `referenced_columns`
/// on the other endpoint.
#[derive(Debug, Clone)]
struct ForeignKeyEdge {
    table: String,
    columns: Vec<String>,
    referenced_columns: Vec<String>,
}

struct ParentInfo {
    parent: NodeIndex,
    edge_idx: EdgeIndex,
}

#[derive(Debug, Default)]
pub struct JoinGraph {
    graph: UnGraph<String, ForeignKeyEdge>,
    nodes: HashMap<String, NodeIndex>,
}

impl JoinGraph {
    pub fn from_tables<'a>(tables: impl IntoIterator<Item = &'a TableSchema>) -> Self {
        let mut tables: Vec<&TableSchema> = tables.into_iter().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));

        let mut graph = UnGraph::default();
        let mut nodes = HashMap::new();
        for table in &tables {
            let idx = graph.add_node(table.name.clone());
            nodes.insert(table.name.to_lowercase(), idx);
        }

        for table in &tables {
            for fk in &table.foreign_keys {
                // `db.table` references are accepted; the graph is per database.
                let referenced = fk
                    .referenced_table
                    .rsplit('.')
                    .next()
                    .unwrap_or(&fk.referenced_table);
                let (Some(&from), Some(&to)) = (
                    nodes.get(&table.name.to_lowercase()),
                    nodes.get(&referenced.to_lowercase()),
                ) else {
                    continue;
                };
                if from == to || fk.columns.is_empty() || fk.columns.len() != fk.referenced_columns.len() {
                    continue;
                }
                let edge = ForeignKeyEdge {
                    table: table.name.clone(),
                    columns: fk.columns.clone(),
                    referenced_columns: fk.referenced_columns.clone(),
                };
                graph.add_edge(from, to, edge);
            }
        }

        Self { graph, nodes }
    }

    pub fn table_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Joins connecting `base` to every table in `targets`.
    ///
    /// Each table is joined once, along a shortest foreign-key path from
    /// `base`, in the order the targets are first reached.
    pub fn connect(&self, base: &str, targets: &[&str]) -> EngineResult<Vec<InferredJoin>> {
        let root = *self
            .nodes
            .get(&base.to_lowercase())
            .ok_or_else(|| EngineError::UnknownElement(base.to_string()))?;
        let parents = self.bfs(root);

        let mut joins = Vec::new();
        let mut joined: HashSet<NodeIndex> = HashSet::from([root]);
        for target in targets {
            let idx = *self
                .nodes
                .get(&target.to_lowercase())
                .ok_or_else(|| EngineError::UnknownElement(target.to_string()))?;
            if joined.contains(&idx) {
                continue;
            }
            if !parents.contains_key(&idx) {
                return Err(EngineError::NoJoinPath {
                    from: base.to_string(),
                    to: target.to_string(),
                });
            }

            for (parent, edge_idx, node) in self.path_to(root, idx, &parents) {
                if joined.insert(node) {
                    joins.push(self.join_for(parent, node, edge_idx));
                }
            }
        }
        Ok(joins)
    }

    /// Breadth-first search from `root`, recording how each node was reached.
    fn bfs(&self, root: NodeIndex) -> HashMap<NodeIndex, ParentInfo> {
        let mut visited: HashSet<NodeIndex> = HashSet::from([root]);
        let mut parents: HashMap<NodeIndex, ParentInfo> = HashMap::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::from([root]);

        while let Some(current) = queue.pop_front() {
            let mut edges: Vec<_> = self.graph.edges(current).collect();
            edges.sort_by_key(|e| (self.graph[e.target()].clone(), e.id()));
            for edge_ref in edges {
                let neighbor = edge_ref.target();
                if !visited.insert(neighbor) {
                    continue;
                }
                parents.insert(
                    neighbor,
                    ParentInfo {
                        parent: current,
                        edge_idx: edge_ref.id(),
                    },
                );
                queue.push_back(neighbor);
            }
        }
        parents
    }

    /// Steps from `root` to `to`, each as (parent, edge, node).
    fn path_to(
        &self,
        root: NodeIndex,
        to: NodeIndex,
        parents: &HashMap<NodeIndex, ParentInfo>,
    ) -> Vec<(NodeIndex, EdgeIndex, NodeIndex)> {
        let mut steps = Vec::new();
        let mut current = to;
        while current != root {
            let Some(info) = parents.get(&current) else {
                break;
            };
            steps.push((info.parent, info.edge_idx, current));
            current = info.parent;
        }
        steps.reverse();
        steps
    }

    fn join_for(&self, from: NodeIndex, to: NodeIndex, edge_idx: EdgeIndex) -> InferredJoin {
        let edge = &self.graph[edge_idx];
        let from_name = self.graph[from].clone();
        let to_name = self.graph[to].clone();
        if edge.table.eq_ignore_ascii_case(&from_name) {
            InferredJoin {
                left_table: from_name,
                left_columns: edge.columns.clone(),
                right_table: to_name,
                right_columns: edge.referenced_columns.clone(),
                join_type: JoinType::Inner,
            }
        } else {
            InferredJoin {
                left_table: from_name,
                left_columns: edge.referenced_columns.clone(),
                right_table: to_name,
                right_columns: edge.columns.clone(),
                join_type: JoinType::Inner,
            }
        }
    }
}
