//! 依赖图检查

use std::collections::{btree_set, BTreeSet, HashMap, HashSet};

use super::model::Task;

/// 若新任务的依赖会形成环，返回环路径（以新任务开头和结尾）
///
/// 依赖可以引用尚未创建的 id，因此后创建的任务可能闭合一个环。
/// 显式栈做深度优先遍历，长依赖链不会耗尽线程栈。
pub(crate) fn find_cycle(
    tasks: &[Task],
    new_id: &str,
    dependencies: &BTreeSet<String>,
) -> Option<Vec<String>> {
    let edges: HashMap<&str, &BTreeSet<String>> = tasks
        .iter()
        .map(|t| (t.id.as_str(), &t.dependencies))
        .collect();
    let no_edges = BTreeSet::new();

    let mut visited: HashSet<&str> = HashSet::new();
    // path[i] 是 stack[i] 正在展开的节点
    let mut path: Vec<&str> = vec![new_id];
    let mut stack: Vec<btree_set::Iter<'_, String>> = vec![dependencies.iter()];

    while let Some(children) = stack.last_mut() {
        let Some(node) = children.next() else {
            stack.pop();
            path.pop();
            continue;
        };
        let node = node.as_str();

        if node == new_id {
            path.push(node);
            return Some(path.into_iter().map(str::to_string).collect());
        }
        if !visited.insert(node) {
            continue;
        }

        path.push(node);
        stack.push(edges.get(node).copied().unwrap_or(&no_edges).iter());
    }
    None
}
