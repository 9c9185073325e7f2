//! リソース依存グラフ
//!
//! 参照と明示的な `depends_on` から依存グラフを構築し、
//! 作成順序（トポロジカル順）と並列実行可能なグループを求めます。

use crate::error::{FlowError, Result};
use crate::model::Stack;
use std::collections::{BTreeMap, BTreeSet};

/// 論理IDをノードとする依存グラフ
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    /// ノード → 依存先
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// ノード → 依存元
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl ResourceGraph {
    /// スタックからグラフを構築
    ///
    /// スタックに存在しない依存先への辺は含めない（検証は `validate` の責務）。
    pub fn from_stack(stack: &Stack) -> Self {
        let mut graph = Self::default();
        for id in stack.resources.keys() {
            graph.add_node(id);
        }
        for resource in stack.iter() {
            for dep in resource.dependencies() {
                if stack.resources.contains_key(dep) {
                    graph.add_edge(&resource.id, dep);
                }
            }
        }
        graph
    }

    pub fn add_node(&mut self, id: &str) {
        self.dependencies.entry(id.to_string()).or_default();
        self.dependents.entry(id.to_string()).or_default();
    }

    /// `from` が `to` に依存する辺を追加
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(from);
        self.add_node(to);
        self.dependencies
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.dependents
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.dependencies.contains_key(id)
    }

    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.dependencies
            .get(id)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.dependents
            .get(id)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// 依存先が先に並ぶ順序を返す（同順位は論理ID順）
    pub fn topological_order(&self) -> Result<Vec<String>> {
        Ok(self.levels()?.into_iter().flatten().collect())
    }

    /// 互いに独立なノードのグループを依存順に返す
    pub fn levels(&self) -> Result<Vec<Vec<String>>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, in_degree)| **in_degree == 0)
                .map(|(id, _)| *id)
                .collect();

            if ready.is_empty() {
                let stuck: BTreeSet<&str> = remaining.keys().copied().collect();
                return Err(FlowError::CircularDependency(self.describe_cycle(&stuck)));
            }

            for id in &ready {
                remaining.remove(id);
                for dependent in self.dependents_of(id) {
                    if let Some(in_degree) = remaining.get_mut(dependent) {
                        *in_degree -= 1;
                    }
                }
            }

            levels.push(ready.into_iter().map(str::to_string).collect());
        }

        Ok(levels)
    }

    /// 未処理ノード集合から循環を1つ取り出して "a -> b -> a" 形式で表す
    ///
    /// 未処理ノードは必ず未処理の依存先を持つため、依存を辿れば必ず循環に入る。
    fn describe_cycle(&self, stuck: &BTreeSet<&str>) -> String {
        let Some(&start) = stuck.iter().next() else {
            return String::new();
        };

        let mut path: Vec<&str> = Vec::new();
        let mut current = start;
        loop {
            if let Some(pos) = path.iter().position(|id| *id == current) {
                let mut cycle: Vec<&str> = path[pos..].to_vec();
                cycle.push(current);
                return cycle.join(" -> ");
            }
            path.push(current);

            match self
                .dependencies_of(current)
                .into_iter()
                .find(|dep| stuck.contains(dep))
            {
                Some(next) => current = next,
                None => return path.join(" -> "),
            }
        }
    }
}
