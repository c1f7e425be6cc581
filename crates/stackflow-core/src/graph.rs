//! 依存グラフ
//!
//! リソースのプロパティ内の参照と明示的な `depends-on` から
//! 有向非巡回グラフを構築します。辺の向きは「参照元 → 参照先」です。

use crate::error::{FlowError, Result};
use crate::model::{Declaration, Resource};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// 依存辺の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// プロパティ内の参照による依存
    Reference,
    /// `depends-on` による明示的な依存
    Explicit,
}

/// リソース間の依存グラフ
///
/// ノードのインデックスは宣言順の位置と一致します。
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<String, EdgeKind>,
    index: HashMap<String, NodeIndex>,
    resources: Vec<Resource>,
}

impl DependencyGraph {
    /// 宣言セットからグラフを構築
    ///
    /// 存在しない論理IDへの参照は `UnknownReference`、
    /// 循環がある場合は循環上の全リソースを含む `Cycle` エラー。
    pub fn build(declaration: &Declaration) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let resources: Vec<Resource> = declaration.iter().cloned().collect();

        for resource in &resources {
            let idx = graph.add_node(resource.logical_id.clone());
            index.insert(resource.logical_id.clone(), idx);
        }

        for resource in &resources {
            let from = index[&resource.logical_id];

            for reference in resource.references() {
                let to = *index.get(&reference.logical_id).ok_or_else(|| {
                    FlowError::UnknownReference {
                        from: resource.logical_id.clone(),
                        target: reference.logical_id.clone(),
                    }
                })?;
                graph.update_edge(from, to, EdgeKind::Reference);
            }

            for dependency in &resource.depends_on {
                let to = *index
                    .get(dependency)
                    .ok_or_else(|| FlowError::UnknownReference {
                        from: resource.logical_id.clone(),
                        target: dependency.clone(),
                    })?;
                // 参照による辺が既にあればそちらを優先
                if graph.find_edge(from, to).is_none() {
                    graph.add_edge(from, to, EdgeKind::Explicit);
                }
            }
        }

        if let Some(cycle) = find_cycle(&graph) {
            return Err(FlowError::Cycle { cycle });
        }

        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Built dependency graph"
        );

        Ok(Self {
            graph,
            index,
            resources,
        })
    }

    /// 宣言順の全リソース
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.position(logical_id).map(|i| &self.resources[i])
    }

    /// 宣言順の位置
    pub fn position(&self, logical_id: &str) -> Option<usize> {
        self.index.get(logical_id).map(|idx| idx.index())
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.index.contains_key(logical_id)
    }

    /// 依存先（このリソースより先に適用されるもの）を宣言順で返す
    pub fn dependencies(&self, logical_id: &str) -> Vec<&str> {
        self.neighbors(logical_id, Direction::Outgoing)
    }

    /// 依存元（このリソースに依存するもの）を宣言順で返す
    pub fn dependents(&self, logical_id: &str) -> Vec<&str> {
        self.neighbors(logical_id, Direction::Incoming)
    }

    /// 2リソース間の辺の種類
    pub fn edge_kind(&self, from: &str, to: &str) -> Option<EdgeKind> {
        let from = *self.index.get(from)?;
        let to = *self.index.get(to)?;
        self.graph
            .find_edge(from, to)
            .and_then(|e| self.graph.edge_weight(e).copied())
    }

    /// 宣言位置ごとの依存先位置（トポロジカルソート用）
    pub(crate) fn dependency_positions(&self) -> Vec<Vec<usize>> {
        self.graph
            .node_indices()
            .map(|idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .map(|n| n.index())
                    .collect()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn neighbors(&self, logical_id: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.index.get(logical_id) else {
            return Vec::new();
        };
        let mut neighbors: Vec<NodeIndex> =
            self.graph.neighbors_directed(idx, direction).collect();
        neighbors.sort();
        neighbors
            .into_iter()
            .map(|n| self.graph[n].as_str())
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// 深さ優先探索で循環を検出
///
/// 再帰スタックを明示的に保持し、スタック上のノードへの辺を見つけた時点で
/// そのノードからスタック末尾までを循環として返します。
fn find_cycle(graph: &DiGraph<String, EdgeKind>) -> Option<Vec<String>> {
    let mut marks = vec![Mark::Unvisited; graph.node_count()];

    for root in graph.node_indices() {
        if marks[root.index()] != Mark::Unvisited {
            continue;
        }

        // (ノード, 未探索の隣接ノード)
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = Vec::new();
        marks[root.index()] = Mark::OnStack;
        stack.push((root, sorted_successors(graph, root)));

        while let Some((_, pending)) = stack.last_mut() {
            match pending.pop() {
                Some(next) => match marks[next.index()] {
                    Mark::OnStack => {
                        let start = stack
                            .iter()
                            .position(|(n, _)| *n == next)
                            .unwrap_or(0);
                        return Some(
                            stack[start..]
                                .iter()
                                .map(|(n, _)| graph[*n].clone())
                                .collect(),
                        );
                    }
                    Mark::Unvisited => {
                        marks[next.index()] = Mark::OnStack;
                        stack.push((next, sorted_successors(graph, next)));
                    }
                    Mark::Done => {}
                },
                None => {
                    if let Some((done, _)) = stack.pop() {
                        marks[done.index()] = Mark::Done;
                    }
                }
            }
        }
    }

    None
}

/// 宣言順に探索するため、pop 順が昇順になるよう降順で並べる
fn sorted_successors(graph: &DiGraph<String, EdgeKind>, node: NodeIndex) -> Vec<NodeIndex> {
    let mut successors: Vec<NodeIndex> = graph.neighbors(node).collect();
    successors.sort_by(|a, b| b.cmp(a));
    successors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    fn declaration(resources: Vec<Resource>) -> Declaration {
        let mut decl = Declaration::new();
        for r in resources {
            decl.insert(r).unwrap();
        }
        decl
    }

    #[test]
    fn test_build_edges_from_references_and_depends_on() {
        let decl = declaration(vec![
            Resource::new("ec2.vpc", "vpc"),
            Resource::new("ecs.cluster", "cluster").with_property("vpc", Value::reference("vpc", "id")),
            Resource::new("ecs.service", "api")
                .with_property("cluster", Value::reference("cluster", "arn"))
                .with_dependency("vpc"),
        ]);

        let graph = DependencyGraph::build(&decl).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.dependencies("api"), vec!["vpc", "cluster"]);
        assert_eq!(graph.dependents("vpc"), vec!["cluster", "api"]);
        assert_eq!(graph.edge_kind("api", "cluster"), Some(EdgeKind::Reference));
        assert_eq!(graph.edge_kind("api", "vpc"), Some(EdgeKind::Explicit));
        assert!(graph.dependencies("vpc").is_empty());
    }

    #[test]
    fn test_unknown_reference() {
        let decl = declaration(vec![
            Resource::new("ecs.cluster", "cluster").with_property("vpc", Value::reference("vpc", "id")),
        ]);

        let err = DependencyGraph::build(&decl).unwrap_err();
        assert!(matches!(
            err,
            FlowError::UnknownReference { ref from, ref target } if from == "cluster" && target == "vpc"
        ));
    }

    #[test]
    fn test_unknown_explicit_dependency() {
        let decl = declaration(vec![Resource::new("s3.bucket", "site").with_dependency("ghost")]);
        assert!(matches!(
            DependencyGraph::build(&decl),
            Err(FlowError::UnknownReference { .. })
        ));
    }

    #[test]
    fn test_cycle_names_every_member() {
        let decl = declaration(vec![
            Resource::new("x", "standalone"),
            Resource::new("x", "a").with_property("next", Value::reference("b", "id")),
            Resource::new("x", "b").with_property("next", Value::reference("c", "id")),
            Resource::new("x", "c").with_dependency("a"),
        ]);

        let err = DependencyGraph::build(&decl).unwrap_err();
        let FlowError::Cycle { cycle } = err else {
            panic!("expected cycle error");
        };
        assert_eq!(cycle, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let decl = declaration(vec![
            Resource::new("x", "loop").with_property("me", Value::reference("loop", "arn")),
        ]);

        let err = DependencyGraph::build(&decl).unwrap_err();
        assert!(matches!(err, FlowError::Cycle { ref cycle } if cycle == &vec!["loop".to_string()]));
    }
}
