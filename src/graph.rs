//! The task graph.
//!
//! Dependency references are plain strings until every task file has been
//! loaded, because a reference may point into another group. Construction is
//! the single resolution pass: each `name` or `group:name` string is looked
//! up and the resolved adjacency is stored on the graph, keeping [Task]
//! records immutable.
//!
//! Traversal uses a two-phase protocol: [`TopologicalOrder::next_ready`]
//! yields a task only once all of its dependencies have been marked done via
//! [`TopologicalOrder::mark_done`]. The caller interleaves arbitrary work
//! (cache restore, action execution) between the two phases, which keeps the
//! contract stable should execution ever become concurrent.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{Graph, NodeIndex};

use crate::error::GraphError;
use crate::task::Task;

/// An immutable directed graph of tasks keyed by `(group, name)`.
///
/// Edges point from a dependency to its dependent. Cycles are representable;
/// they are detected during topological iteration, not at construction.
pub struct TaskGraph {
    graph: Graph<Arc<Task>, ()>,
    index: HashMap<(String, String), NodeIndex>,
    // Resolved dependencies per node, in declaration order.
    dependencies: Vec<Vec<NodeIndex>>,
}

/// Splits a dependency reference into `(group, name)`, defaulting the group
/// to the referencing task's own.
fn split_reference<'a>(reference: &'a str, default_group: &'a str) -> (&'a str, &'a str) {
    match reference.split_once(':') {
        Some((group, name)) => (group, name),
        None => (default_group, reference),
    }
}

impl TaskGraph {
    /// Builds the graph and resolves every dependency reference. Purely
    /// computational; no I/O happens here.
    pub fn new(tasks: impl IntoIterator<Item = Arc<Task>>) -> Result<TaskGraph, GraphError> {
        let mut graph = Graph::new();
        let mut index = HashMap::new();

        for task in tasks {
            let key = (task.group().to_owned(), task.name().to_owned());
            if index.contains_key(&key) {
                return Err(GraphError::DuplicateTask(task.label()));
            }
            let node = graph.add_node(task);
            index.insert(key, node);
        }

        let mut dependencies = vec![Vec::new(); graph.node_count()];
        for node in graph.node_indices() {
            let task = graph[node].clone();
            for reference in task.unresolved_dependencies() {
                let (group, name) = split_reference(reference, task.group());
                let dependency = *index
                    .get(&(group.to_owned(), name.to_owned()))
                    .ok_or_else(|| GraphError::DependencyNotFound {
                        task: task.label(),
                        group: group.to_owned(),
                        name: name.to_owned(),
                    })?;
                dependencies[node.index()].push(dependency);
                graph.add_edge(dependency, node, ());
            }
        }

        Ok(TaskGraph {
            graph,
            index,
            dependencies,
        })
    }

    /// All tasks in insertion order.
    pub fn all_tasks(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.graph.node_weights()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Looks a task up by its exact group and name.
    pub fn get(&self, group: &str, name: &str) -> Option<Arc<Task>> {
        self.index
            .get(&(group.to_owned(), name.to_owned()))
            .map(|node| self.graph[*node].clone())
    }

    /// The resolved dependencies of `task`, in declaration order. `None` if
    /// the task is not part of this graph.
    pub fn dependencies_of(&self, task: &Task) -> Option<Vec<Arc<Task>>> {
        let node = self.node_of(task)?;
        Some(
            self.dependencies[node.index()]
                .iter()
                .map(|dep| self.graph[*dep].clone())
                .collect(),
        )
    }

    fn node_of(&self, task: &Task) -> Option<NodeIndex> {
        self.index
            .get(&(task.group().to_owned(), task.name().to_owned()))
            .copied()
    }

    /// Depth-first closure over dependencies, producing a new graph holding
    /// exactly the tasks reachable from `roots`. Cycles in this graph carry
    /// over and surface during topological iteration.
    pub fn subgraph(&self, roots: &[Arc<Task>]) -> Result<TaskGraph, GraphError> {
        let mut visited = HashSet::new();
        let mut reachable = Vec::new();
        let mut stack = Vec::new();

        for root in roots {
            let node = self
                .node_of(root)
                .ok_or_else(|| GraphError::TaskNotFound(root.label()))?;
            stack.push(node);

            while let Some(node) = stack.pop() {
                if !visited.insert(node) {
                    continue;
                }
                reachable.push(self.graph[node].clone());
                stack.extend(&self.dependencies[node.index()]);
            }
        }

        TaskGraph::new(reachable)
    }

    /// Starts a two-phase topological traversal over this graph.
    pub fn topological_order(&self) -> TopologicalOrder<'_> {
        TopologicalOrder::new(self)
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}

/// Proof that a task was yielded by [`TopologicalOrder::next_ready`]; hand
/// it back through [`TopologicalOrder::mark_done`] once the task completed.
#[derive(Debug)]
pub struct DoneToken {
    node: NodeIndex,
}

/// Lazy dependency-respecting traversal.
///
/// Every yielded task must be marked done before the next call to
/// [`next_ready`](Self::next_ready); the executor completes each task
/// (by cache restore or action execution) between the two phases.
pub struct TopologicalOrder<'g> {
    graph: &'g TaskGraph,
    ready: VecDeque<NodeIndex>,
    // Unsatisfied dependency counts for tasks not yet yielded.
    remaining: HashMap<NodeIndex, usize>,
}

impl<'g> TopologicalOrder<'g> {
    fn new(graph: &'g TaskGraph) -> Self {
        let mut ready = VecDeque::new();
        let mut remaining = HashMap::new();

        for node in graph.graph.node_indices() {
            let count = graph.dependencies[node.index()].len();
            if count == 0 {
                ready.push_back(node);
            } else {
                remaining.insert(node, count);
            }
        }

        TopologicalOrder {
            graph,
            ready,
            remaining,
        }
    }

    /// The next task whose dependencies have all been marked done, or
    /// `Ok(None)` once every task has been yielded. If no task is ready
    /// while unyielded tasks remain, the traversal cannot terminate and a
    /// [`GraphError::Cycle`] names the blocked tasks.
    pub fn next_ready(&mut self) -> Result<Option<(Arc<Task>, DoneToken)>, GraphError> {
        if let Some(node) = self.ready.pop_front() {
            let task = self.graph.graph[node].clone();
            return Ok(Some((task, DoneToken { node })));
        }

        if self.remaining.is_empty() {
            return Ok(None);
        }

        let mut blocked: Vec<String> = self
            .remaining
            .keys()
            .map(|node| self.graph.graph[*node].label())
            .collect();
        blocked.sort();
        Err(GraphError::Cycle(blocked.join(", ")))
    }

    /// Marks a yielded task done, unlocking dependents whose last
    /// outstanding dependency it was.
    pub fn mark_done(&mut self, token: DoneToken) {
        for dependent in self
            .graph
            .graph
            .neighbors_directed(token.node, Direction::Outgoing)
        {
            if let Some(count) = self.remaining.get_mut(&dependent) {
                *count -= 1;
                if *count == 0 {
                    self.remaining.remove(&dependent);
                    self.ready.push_back(dependent);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Context;
    use crate::task::{Action, TaskBuilder};
    use camino::Utf8PathBuf;
    use std::fs;

    fn tempdir_utf8() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().canonicalize().unwrap()).unwrap();
        (dir, path)
    }

    fn noop_action() -> Action {
        std::sync::Arc::new(|_: &Context| Ok(()))
    }

    fn task(name: &str, group: &str, deps: &[&str], root: &Utf8PathBuf) -> Arc<Task> {
        let file_path = root.join(format!("{group}.tasks"));
        if !file_path.exists() {
            fs::write(&file_path, group).unwrap();
        }
        let mut builder = TaskBuilder::new(
            name.to_owned(),
            group.to_owned(),
            root.clone(),
            file_path,
            false,
            noop_action(),
        );
        builder.dependencies(deps);
        Arc::new(builder.build())
    }

    fn drain(graph: &TaskGraph) -> Result<Vec<String>, GraphError> {
        let mut order = graph.topological_order();
        let mut labels = Vec::new();
        while let Some((task, token)) = order.next_ready()? {
            labels.push(task.label());
            order.mark_done(token);
        }
        Ok(labels)
    }

    #[test]
    fn test_resolution_within_group() {
        let (_guard, root) = tempdir_utf8();
        let graph = TaskGraph::new([
            task("compile", "a", &[], &root),
            task("test", "a", &["compile"], &root),
        ])
        .unwrap();

        let test = graph.get("a", "test").unwrap();
        let deps = graph.dependencies_of(&test).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].label(), "a:compile");
    }

    #[test]
    fn test_resolution_across_groups() {
        let (_guard, root) = tempdir_utf8();
        let graph = TaskGraph::new([
            task("x", "a", &[], &root),
            task("y", "b", &["a:x"], &root),
        ])
        .unwrap();

        let y = graph.get("b", "y").unwrap();
        let deps = graph.dependencies_of(&y).unwrap();
        assert_eq!(deps[0].label(), "a:x");
    }

    #[test]
    fn test_missing_dependency_is_fatal() {
        let (_guard, root) = tempdir_utf8();
        let result = TaskGraph::new([task("test", "a", &["compile"], &root)]);

        assert!(matches!(
            result,
            Err(GraphError::DependencyNotFound { group, name, .. })
                if group == "a" && name == "compile"
        ));
    }

    #[test]
    fn test_duplicate_identity_is_fatal() {
        let (_guard, root) = tempdir_utf8();
        let result = TaskGraph::new([
            task("build", "a", &[], &root),
            task("build", "a", &[], &root),
        ]);

        assert!(matches!(result, Err(GraphError::DuplicateTask(label)) if label == "a:build"));
    }

    #[test]
    fn test_subgraph_is_the_dependency_closure() {
        let (_guard, root) = tempdir_utf8();
        let graph = TaskGraph::new([
            task("a", "g", &["b"], &root),
            task("b", "g", &["c"], &root),
            task("c", "g", &[], &root),
            task("unrelated", "g", &[], &root),
        ])
        .unwrap();

        let a = graph.get("g", "a").unwrap();
        let subgraph = graph.subgraph(&[a]).unwrap();

        let mut labels: Vec<_> = subgraph.all_tasks().map(|t| t.label()).collect();
        labels.sort();
        assert_eq!(labels, ["g:a", "g:b", "g:c"]);
    }

    #[test]
    fn test_subgraph_of_unknown_root() {
        let (_guard, root) = tempdir_utf8();
        let graph = TaskGraph::new([task("a", "g", &[], &root)]).unwrap();
        let stranger = task("ghost", "g", &[], &root);

        assert!(matches!(
            graph.subgraph(&[stranger]),
            Err(GraphError::TaskNotFound(label)) if label == "g:ghost"
        ));
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let (_guard, root) = tempdir_utf8();
        let graph = TaskGraph::new([
            task("test", "a", &["compile"], &root),
            task("compile", "a", &[], &root),
        ])
        .unwrap();

        assert_eq!(drain(&graph).unwrap(), ["a:compile", "a:test"]);
    }

    #[test]
    fn test_diamond_executes_each_task_once() {
        let (_guard, root) = tempdir_utf8();
        let graph = TaskGraph::new([
            task("top", "g", &["left", "right"], &root),
            task("left", "g", &["base"], &root),
            task("right", "g", &["base"], &root),
            task("base", "g", &[], &root),
        ])
        .unwrap();

        let order = drain(&graph).unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], "g:base");
        assert_eq!(order[3], "g:top");
    }

    #[test]
    fn test_cycle_is_reported() {
        let (_guard, root) = tempdir_utf8();
        let graph = TaskGraph::new([
            task("p", "a", &["q"], &root),
            task("q", "a", &["p"], &root),
        ])
        .unwrap();

        let result = drain(&graph);
        assert!(matches!(
            result,
            Err(GraphError::Cycle(tasks)) if tasks == "a:p, a:q"
        ));
    }
}
