//! トポロジカル順序の計算
//!
//! 依存先が必ず先に来る順序を計算します。順序制約のないリソース同士は
//! 宣言順（先に宣言されたものが先）で並べ、同じ入力なら常に同じ結果になります。

use crate::graph::DependencyGraph;
use crate::model::Resource;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// 作成順（依存先が先）
pub fn order(graph: &DependencyGraph) -> Vec<&Resource> {
    let resources = graph.resources();
    kahn(&graph.dependency_positions())
        .into_iter()
        .map(|i| &resources[i])
        .collect()
}

/// 削除順（`order` の完全な逆順）
pub fn reverse_order(graph: &DependencyGraph) -> Vec<&Resource> {
    let mut ordered = order(graph);
    ordered.reverse();
    ordered
}

/// 任意のID集合を依存順に並べる
///
/// `dependencies` が返すIDのうち `ids` に含まれないものは無視します。
/// ステートに記録された依存が壊れて循環している場合でも、
/// 残りは入力順で末尾に追加されます。
pub fn order_ids<F>(ids: &[String], dependencies: F) -> Vec<String>
where
    F: Fn(&str) -> Vec<String>,
{
    let position: HashMap<&str, usize> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let deps: Vec<Vec<usize>> = ids
        .iter()
        .map(|id| {
            dependencies(id)
                .iter()
                .filter_map(|d| position.get(d.as_str()).copied())
                .filter(|&d| ids[d] != *id)
                .collect()
        })
        .collect();

    let mut ordered = kahn(&deps);
    if ordered.len() < ids.len() {
        tracing::warn!("Recorded dependencies contain a cycle; falling back to input order");
        let mut seen = vec![false; ids.len()];
        for &i in &ordered {
            seen[i] = true;
        }
        ordered.extend((0..ids.len()).filter(|&i| !seen[i]));
    }

    ordered.into_iter().map(|i| ids[i].clone()).collect()
}

/// Kahn のアルゴリズム（最小ヒープで宣言順タイブレーク）
///
/// `deps[i]` はノード `i` の依存先。循環に含まれるノードは結果に現れません。
fn kahn(deps: &[Vec<usize>]) -> Vec<usize> {
    let mut remaining: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); deps.len()];
    for (node, node_deps) in deps.iter().enumerate() {
        for &dep in node_deps {
            dependents[dep].push(node);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = remaining
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut ordered = Vec::with_capacity(deps.len());
    while let Some(Reverse(node)) = ready.pop() {
        ordered.push(node);
        for &dependent in &dependents[node] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    ordered
}
