//! Task file discovery and loading.
//!
//! Task files are any `*.tasks` files beneath the project root, at most one
//! per directory. Executing a task file as source code of a host extension
//! language is outside the engine; the seam is [`TaskFileEvaluator`]. For
//! each file the loader installs a [`TaskScope`] carrying the file path, the
//! working directory, and the default group name (the file's stem), hands it
//! to the evaluator, and collects the tasks declared through it. The scope
//! plays the role the write-through registry and ambient group name play in
//! host languages that execute task files directly.

use std::collections::HashMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::TASKS_FILE_EXTENSION;
use crate::error::LoadError;
use crate::executor::Context;
use crate::task::{Action, Task, TaskBuilder};

/// Evaluates one task file, declaring its tasks through the scope.
///
/// Implementations typically read `scope.file_path()` and interpret its
/// content; tests and embedders can declare tasks straight from Rust. Any
/// returned error aborts loading as a [`LoadError::Evaluate`].
pub trait TaskFileEvaluator {
    fn evaluate(&mut self, scope: &mut TaskScope) -> anyhow::Result<()>;
}

impl<F> TaskFileEvaluator for F
where
    F: FnMut(&mut TaskScope) -> anyhow::Result<()>,
{
    fn evaluate(&mut self, scope: &mut TaskScope) -> anyhow::Result<()> {
        self(scope)
    }
}

/// The scoped registration handle alive while one task file is evaluated.
pub struct TaskScope {
    file_path: Utf8PathBuf,
    working_directory_path: Utf8PathBuf,
    group: String,
    tasks: Vec<TaskBuilder>,
}

impl TaskScope {
    fn new(file_path: Utf8PathBuf, working_directory_path: Utf8PathBuf, group: String) -> Self {
        TaskScope {
            file_path,
            working_directory_path,
            group,
            tasks: Vec::new(),
        }
    }

    /// The task file being evaluated.
    pub fn file_path(&self) -> &Utf8Path {
        &self.file_path
    }

    /// The directory containing the task file.
    pub fn working_directory(&self) -> &Utf8Path {
        &self.working_directory_path
    }

    /// The ambient group name for subsequent declarations.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Overrides the ambient group name. Tasks already declared keep the
    /// group that was ambient at their declaration.
    pub fn set_group(&mut self, name: impl Into<String>) {
        self.group = name.into();
    }

    /// Registers a task in the ambient group, bound to this file and its
    /// directory. Returns the builder for further configuration.
    pub fn declare<F>(&mut self, name: &str, use_cache: bool, action: F) -> &mut TaskBuilder
    where
        F: Fn(&Context) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let action: Action = Arc::new(action);
        self.tasks.push(TaskBuilder::new(
            name.to_owned(),
            self.group.clone(),
            self.working_directory_path.clone(),
            self.file_path.clone(),
            use_cache,
            action,
        ));
        self.tasks.last_mut().unwrap()
    }

    fn finish(self) -> TaskFile {
        TaskFile {
            file_path: self.file_path,
            group: self.group,
            tasks: self
                .tasks
                .into_iter()
                .map(|builder| Arc::new(builder.build()))
                .collect(),
        }
    }
}

/// A loaded task file: its path, final group name, and declared tasks.
pub struct TaskFile {
    pub file_path: Utf8PathBuf,
    pub group: String,
    pub tasks: Vec<Arc<Task>>,
}

impl TaskFile {
    /// Loads a single task file through `evaluator`.
    pub fn load(
        path: &Utf8Path,
        evaluator: &mut dyn TaskFileEvaluator,
    ) -> Result<TaskFile, LoadError> {
        if !path.is_file() {
            return Err(LoadError::NotAFile(path.to_owned()));
        }
        let file_path = path
            .canonicalize_utf8()
            .map_err(|err| LoadError::Resolve(path.to_owned(), err))?;
        let working_directory_path = file_path
            .parent()
            .map(Utf8Path::to_owned)
            .unwrap_or_else(|| file_path.clone());

        // The group name defaults to the file name up to the first dot.
        let group = file_path
            .file_name()
            .and_then(|name| name.split('.').next())
            .unwrap_or(TASKS_FILE_EXTENSION)
            .to_owned();

        let mut scope = TaskScope::new(file_path.clone(), working_directory_path, group);
        evaluator
            .evaluate(&mut scope)
            .map_err(|err| LoadError::Evaluate(file_path, err))?;

        Ok(scope.finish())
    }
}

/// Discovers and loads every task file beneath `root`, enforcing the
/// one-task-file-per-directory rule.
pub fn load_all(
    root: &Utf8Path,
    evaluator: &mut dyn TaskFileEvaluator,
) -> Result<Vec<TaskFile>, LoadError> {
    let pattern = root.join("**").join(format!("*.{TASKS_FILE_EXTENSION}"));
    let mut visited: HashMap<Utf8PathBuf, Utf8PathBuf> = HashMap::new();
    let mut task_files = Vec::new();

    for entry in glob::glob(pattern.as_str())? {
        let path = Utf8PathBuf::try_from(entry?)?;
        debug!("loading task file from `{path}`");

        let task_file = TaskFile::load(&path, evaluator)?;
        let directory = task_file
            .file_path
            .parent()
            .map(Utf8Path::to_owned)
            .unwrap_or_else(|| task_file.file_path.clone());
        if let Some(first) = visited.insert(directory, task_file.file_path.clone()) {
            return Err(LoadError::DuplicateTaskFile {
                first,
                second: task_file.file_path,
            });
        }

        debug!(
            "loaded {} task(s) from `{}`: {}",
            task_file.tasks.len(),
            task_file.file_path,
            task_file
                .tasks
                .iter()
                .map(|task| task.to_string())
                .collect::<Vec<_>>()
                .join(","),
        );
        task_files.push(task_file);
    }

    Ok(task_files)
}
