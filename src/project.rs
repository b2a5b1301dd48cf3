//! Project assembly: everything between process start and the first task.
//!
//! [`Project::load`] runs the original startup sequence — find the project
//! root, read the settings, set up the cache, load every task file, build
//! the graph — and the remaining methods are the contract a command-line
//! front-end builds its subcommands on.

use std::collections::HashMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::cache::{DirectoryTaskCache, TaskCache};
use crate::error::XtaskError;
use crate::executor::Context;
use crate::graph::TaskGraph;
use crate::loader::{TaskFileEvaluator, load_all};
use crate::settings::{Settings, find_project_root};
use crate::task::Task;
use crate::ROOT_SETTINGS_FILE_NAME;

/// What a front-end needs to offer one task as a subcommand.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    /// The `group:name` subcommand.
    pub label: String,
    /// Bare-name aliases; present when the task's working directory equals
    /// the invoker's current directory.
    pub aliases: Vec<String>,
    /// Help text: the task's doc, or a generated default.
    pub about: String,
}

/// A fully loaded project: root, settings, cache, and the task graph.
pub struct Project {
    root: Utf8PathBuf,
    settings: Settings,
    graph: Arc<TaskGraph>,
    cache: Option<Arc<dyn TaskCache>>,
}

impl Project {
    /// Loads the project that contains the current working directory.
    pub fn load(evaluator: &mut dyn TaskFileEvaluator) -> Result<Project, XtaskError> {
        let current_dir = std::env::current_dir().map_err(XtaskError::CurrentDir)?;
        let current_dir = Utf8PathBuf::try_from(current_dir)
            .map_err(|err| XtaskError::Load(err.into()))?;
        Project::load_from(&current_dir, evaluator)
    }

    /// Loads the project whose root is the nearest ancestor of `start_dir`
    /// with an `xtask.project` file (or `start_dir` itself).
    pub fn load_from(
        start_dir: &Utf8Path,
        evaluator: &mut dyn TaskFileEvaluator,
    ) -> Result<Project, XtaskError> {
        let root = find_project_root(start_dir);
        debug!("project root resolved to `{root}`");

        let settings_path = root.join(ROOT_SETTINGS_FILE_NAME);
        let settings = if settings_path.exists() {
            Settings::load(&settings_path)?
        } else {
            Settings::default()
        };

        let cache = settings
            .cache_location
            .as_ref()
            .map(|location| {
                // A relative cache location is anchored at the project root.
                if location.is_absolute() {
                    location.clone()
                } else {
                    root.join(location)
                }
            })
            .filter(|location| location.is_dir())
            .map(|location| {
                info!("using the task cache at `{location}`");
                Arc::new(DirectoryTaskCache::new(location)) as Arc<dyn TaskCache>
            });
        if cache.is_none() {
            debug!("no usable cache location configured, caching is disabled");
        }

        if let Some(extension_location) = &settings.extension_location {
            debug!("extension location `{extension_location}` is available to the host");
        }

        let task_files = load_all(&root, evaluator)?;
        let tasks = task_files.into_iter().flat_map(|file| file.tasks);
        let graph = Arc::new(TaskGraph::new(tasks)?);

        Ok(Project {
            root,
            settings,
            graph,
            cache,
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn graph(&self) -> &Arc<TaskGraph> {
        &self.graph
    }

    /// One [`CommandSpec`] per task, in graph insertion order.
    pub fn commands(&self, current_dir: &Utf8Path) -> Vec<CommandSpec> {
        self.graph
            .all_tasks()
            .map(|task| CommandSpec {
                label: task.label(),
                aliases: if task.working_directory_path() == current_dir {
                    vec![task.name().to_owned()]
                } else {
                    Vec::new()
                },
                about: match task.doc() {
                    Some(doc) => doc.to_owned(),
                    None => format!("Runs the {task} task and all of its dependencies."),
                },
            })
            .collect()
    }

    /// Resolves a subcommand back to its task: a full `group:name` label, or
    /// a bare name aliasing a task rooted in `current_dir`.
    pub fn find_task(&self, reference: &str, current_dir: &Utf8Path) -> Option<Arc<Task>> {
        if let Some((group, name)) = reference.split_once(':') {
            return self.graph.get(group, name);
        }
        self.graph
            .all_tasks()
            .find(|task| task.name() == reference && task.working_directory_path() == current_dir)
            .cloned()
    }

    /// Executes `task` and its transitive dependencies with caching enabled,
    /// passing `properties` to every action's context.
    pub fn run(
        &self,
        task: &Arc<Task>,
        properties: HashMap<String, String>,
    ) -> Result<(), XtaskError> {
        let context = Context::new(
            task.clone(),
            self.graph.clone(),
            self.cache.clone(),
            properties,
        );
        context.execute(std::slice::from_ref(task), true, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::TaskScope;
    use crate::utils::CWD_LOCK;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tempdir_utf8() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().canonicalize().unwrap()).unwrap();
        (dir, path)
    }

    fn write_project(root: &Utf8Path) {
        fs::write(
            root.join(ROOT_SETTINGS_FILE_NAME),
            r#"{"cache_location": ".xtask-cache"}"#,
        )
        .unwrap();
        fs::create_dir(root.join(".xtask-cache")).unwrap();
        fs::write(root.join("app.tasks"), "").unwrap();
        fs::write(root.join("src.txt"), "hello").unwrap();
    }

    #[test]
    fn test_load_from_nested_directory() {
        let (_guard, root) = tempdir_utf8();
        write_project(&root);
        let nested = root.join("deep").join("down");
        fs::create_dir_all(&nested).unwrap();

        let mut evaluator = |scope: &mut TaskScope| -> anyhow::Result<()> {
            scope.declare("build", false, |_| Ok(()));
            Ok(())
        };
        let project = Project::load_from(&nested, &mut evaluator).unwrap();

        assert_eq!(project.root(), root);
        assert_eq!(project.graph().len(), 1);
        assert!(project.settings().cache_location.is_some());
    }

    #[test]
    fn test_commands_alias_tasks_in_the_current_directory() {
        let (_guard, root) = tempdir_utf8();
        write_project(&root);
        let lib = root.join("lib");
        fs::create_dir(&lib).unwrap();
        fs::write(lib.join("lib.tasks"), "").unwrap();

        let mut evaluator = |scope: &mut TaskScope| -> anyhow::Result<()> {
            if scope.group() == "app" {
                scope
                    .declare("build", false, |_| Ok(()))
                    .doc("Builds the application.");
            } else {
                scope.declare("check", false, |_| Ok(()));
            }
            Ok(())
        };
        let project = Project::load_from(&root, &mut evaluator).unwrap();

        let commands = project.commands(&root);
        let build = commands.iter().find(|c| c.label == "app:build").unwrap();
        let check = commands.iter().find(|c| c.label == "lib:check").unwrap();

        assert_eq!(build.aliases, ["build"]);
        assert_eq!(build.about, "Builds the application.");
        assert!(check.aliases.is_empty());
        assert_eq!(
            check.about,
            "Runs the [lib:check] task and all of its dependencies."
        );
    }

    #[test]
    fn test_find_task_by_label_and_alias() {
        let (_guard, root) = tempdir_utf8();
        write_project(&root);

        let mut evaluator = |scope: &mut TaskScope| -> anyhow::Result<()> {
            scope.declare("build", false, |_| Ok(()));
            Ok(())
        };
        let project = Project::load_from(&root, &mut evaluator).unwrap();

        assert_eq!(
            project.find_task("app:build", &root).unwrap().label(),
            "app:build"
        );
        assert_eq!(
            project.find_task("build", &root).unwrap().label(),
            "app:build"
        );
        let elsewhere = root.join("deep");
        fs::create_dir_all(&elsewhere).unwrap();
        assert!(project.find_task("build", &elsewhere).is_none());
        assert!(project.find_task("app:missing", &root).is_none());
    }

    #[test]
    fn test_run_uses_the_directory_cache() {
        let _lock = CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let (_guard, root) = tempdir_utf8();
        write_project(&root);

        let counter = Arc::new(AtomicUsize::new(0));
        let mut evaluator = {
            let counter = counter.clone();
            move |scope: &mut TaskScope| -> anyhow::Result<()> {
                let counter = counter.clone();
                scope
                    .declare("build", true, move |ctx| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let suffix = ctx.property("suffix").unwrap_or("").to_owned();
                        fs::write("out.txt", format!("hello{suffix}"))?;
                        Ok(())
                    })
                    .inputs(&["src.txt"], &[])?
                    .outputs(&["out.txt"], &[])?;
                Ok(())
            }
        };
        let project = Project::load_from(&root, &mut evaluator).unwrap();
        let build = project.find_task("app:build", &root).unwrap();

        let properties = HashMap::from([(String::from("suffix"), String::from("!"))]);
        project.run(&build, properties.clone()).unwrap();
        assert_eq!(fs::read(root.join("out.txt")).unwrap(), b"hello!");
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // One archive landed in the configured cache directory, and the
        // second run restores from it without executing the action.
        assert_eq!(fs::read_dir(root.join(".xtask-cache")).unwrap().count(), 1);
        fs::remove_file(root.join("out.txt")).unwrap();
        project.run(&build, properties).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(root.join("out.txt")).unwrap(), b"hello!");
    }
}
