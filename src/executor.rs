use std::collections::HashMap;
use std::sync::Arc;

use console::style;
use tracing::{error, info, warn};

use crate::cache::TaskCache;
use crate::error::{ExecutionError, XtaskError};
use crate::graph::TaskGraph;
use crate::task::Task;
use crate::utils::WorkingDir;

/// The execution context bound to the currently-executing task.
///
/// A context bundles the shared task graph, the optional task cache, and the
/// user-supplied property map. Executing a task clones the context with
/// `this_task` rebound, so an action always observes itself as the current
/// task.
#[derive(Clone)]
pub struct Context {
    this_task: Arc<Task>,
    graph: Arc<TaskGraph>,
    cache: Option<Arc<dyn TaskCache>>,
    properties: Arc<HashMap<String, String>>,
}

impl Context {
    pub fn new(
        this_task: Arc<Task>,
        graph: Arc<TaskGraph>,
        cache: Option<Arc<dyn TaskCache>>,
        properties: HashMap<String, String>,
    ) -> Self {
        Context {
            this_task,
            graph,
            cache,
            properties: Arc::new(properties),
        }
    }

    /// The task this context is bound to.
    pub fn this_task(&self) -> &Arc<Task> {
        &self.this_task
    }

    /// The `key=value` properties passed by the invoker.
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Resolves a `name` or `group:name` reference against the graph,
    /// defaulting the group to the current task's.
    pub fn task(&self, reference: &str) -> Option<Arc<Task>> {
        let (group, name) = match reference.split_once(':') {
            Some((group, name)) => (group, name),
            None => (self.this_task.group(), reference),
        };
        self.graph.get(group, name)
    }

    /// Executes `tasks`. With `with_dependencies` the transitive dependency
    /// closure runs first, in topological order, each task exactly once;
    /// otherwise the given tasks run in caller order. Cycles surface as a
    /// [`GraphError::Cycle`](crate::error::GraphError::Cycle).
    pub fn execute(
        &self,
        tasks: &[Arc<Task>],
        use_cache: bool,
        with_dependencies: bool,
    ) -> Result<(), XtaskError> {
        if with_dependencies {
            let subgraph = self.graph.subgraph(tasks)?;
            let mut order = subgraph.topological_order();
            while let Some((task, token)) = order.next_ready()? {
                self.execute_task(&task, use_cache)?;
                order.mark_done(token);
            }
        } else {
            for task in tasks {
                self.execute_task(task, use_cache)?;
            }
        }

        Ok(())
    }

    /// Runs one task under its working directory, consulting the cache when
    /// the task opted in. The working directory is restored on every exit
    /// path, including action failure.
    fn execute_task(&self, task: &Arc<Task>, use_cache: bool) -> Result<(), XtaskError> {
        info!("preparing to execute {task}");
        let working_directory = task.working_directory_path().to_owned();
        let _cwd = WorkingDir::enter(&working_directory)
            .map_err(|err| ExecutionError::WorkingDir(working_directory.clone(), err))?;

        if use_cache
            && task.use_cache()
            && let Some(cache) = &self.cache
        {
            let input_hash = task.input_hash()?;
            info!("checking the task cache for {task} with input hash {input_hash}");

            if cache.contains(input_hash) {
                info!("found an entry for {task} with input hash {input_hash}");
                match cache.copy_to(input_hash, &working_directory) {
                    Ok(()) => {
                        info!("copied outputs cached for {task} to `{working_directory}`");
                        return Ok(());
                    }
                    // A cache read failure degrades to a miss.
                    Err(err) => warn!("discarding unreadable cache entry for {task}: {err}"),
                }
            } else {
                info!("could not find outputs in the task cache for {task}");
            }

            if !self.run_action(task) {
                return Ok(());
            }

            let output_files = task.outputs()?;
            let mut files = Vec::with_capacity(output_files.len());
            for path in output_files {
                info!("caching output file `{path}` under input hash {input_hash}");
                let content = std::fs::read(&path)
                    .map_err(|err| ExecutionError::OutputRead(path.clone(), err))?;
                let relative = path
                    .strip_prefix(&working_directory)
                    .map(|relative| relative.to_owned())
                    .unwrap_or(path);
                files.push((relative, content));
            }
            cache.put(input_hash, &files)?;
            info!("caching successful");
        } else {
            self.run_action(task);
        }

        Ok(())
    }

    /// Invokes the task's action with a rebound context. Failures are
    /// reported and swallowed so tasks already ready keep running.
    fn run_action(&self, task: &Arc<Task>) -> bool {
        let context = self.clone_for_task(task);

        println!(
            "{}",
            style(format!(
                "\n==================================================\n\
                 | Executing {task}\n\
                 --------------------------------------------------"
            ))
            .cyan()
            .bold()
        );

        match (task.action())(&context) {
            Ok(()) => {
                println!(
                    "{}",
                    style(format!(
                        "--------------------------------------------------\n\
                         | Successfully executed {task}\n\
                         ==================================================\n"
                    ))
                    .green()
                    .bold()
                );
                true
            }
            Err(err) => {
                error!("action for {task} raised an error\n{err:?}");
                println!(
                    "{}",
                    style(format!(
                        "--------------------------------------------------\n\
                         | Failed to execute {task}\n\
                         ==================================================\n"
                    ))
                    .red()
                    .bold()
                );
                false
            }
        }
    }

    fn clone_for_task(&self, task: &Arc<Task>) -> Context {
        Context {
            this_task: task.clone(),
            graph: self.graph.clone(),
            cache: self.cache.clone(),
            properties: self.properties.clone(),
        }
    }
}
