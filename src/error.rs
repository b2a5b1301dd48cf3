use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XtaskError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Error while loading task files: {0}")]
    Load(#[from] LoadError),

    #[error("Task graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Error while executing tasks: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Task cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Failed to resolve the current working directory: {0}")]
    CurrentDir(std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read the settings file `{0}`: {1}")]
    SettingsRead(Utf8PathBuf, std::io::Error),

    #[error("Malformed settings file `{0}`: {1}")]
    SettingsParse(Utf8PathBuf, serde_json::Error),

    #[error("Task [{0}] cannot configure inputs without any include patterns")]
    EmptyInputPatterns(String),

    #[error("Task [{0}] cannot configure outputs without any include patterns")]
    EmptyOutputPatterns(String),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Could not load the task file `{0}` because it is not a file")]
    NotAFile(Utf8PathBuf),

    #[error("Failed to resolve the task file path `{0}`: {1}")]
    Resolve(Utf8PathBuf, std::io::Error),

    #[error(
        "Unable to load the task file `{second}` because a task file from the same \
         directory has already been loaded: `{first}`"
    )]
    DuplicateTaskFile {
        first: Utf8PathBuf,
        second: Utf8PathBuf,
    },

    #[error("The task file `{0}` raised an error during evaluation: {1}")]
    Evaluate(Utf8PathBuf, #[source] anyhow::Error),

    #[error("Invalid task file search pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Failed to walk the project tree: {0}")]
    Walk(#[from] glob::GlobError),

    #[error("Only UTF-8 paths are supported: {0}")]
    NonUtf8Path(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("A task labeled [{0}] has already been added to the graph")]
    DuplicateTask(String),

    #[error("Could not find a task named \"{name}\" in group \"{group}\", required by {task}")]
    DependencyNotFound {
        task: String,
        group: String,
        name: String,
    },

    #[error("Task {0} is not part of this graph")]
    TaskNotFound(String),

    #[error("Dependency cycle detected among tasks: {0}")]
    Cycle(String),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Glob error: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("Only UTF-8 paths are supported: {0}")]
    NonUtf8Path(#[from] camino::FromPathBufError),

    #[error("Failed to read input file `{0}`: {1}")]
    InputRead(Utf8PathBuf, std::io::Error),

    #[error("Failed to read output file `{0}`: {1}")]
    OutputRead(Utf8PathBuf, std::io::Error),

    #[error("Failed to switch the working directory to `{0}`: {1}")]
    WorkingDir(Utf8PathBuf, std::io::Error),

    #[error("Failed to copy output from `{0}` to `{1}`: {2}")]
    OutputCopy(Utf8PathBuf, Utf8PathBuf, std::io::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to open cache entry `{0}`: {1}")]
    Open(Utf8PathBuf, std::io::Error),

    #[error("Malformed cache entry `{0}`: {1}")]
    Archive(Utf8PathBuf, zip::result::ZipError),

    #[error("Failed to extract cache entry `{0}` into `{1}`: {2}")]
    Extract(Utf8PathBuf, Utf8PathBuf, zip::result::ZipError),

    #[error("Failed to write cache entry `{0}`: {1}")]
    Write(Utf8PathBuf, std::io::Error),

    #[error("Failed to archive outputs for cache entry `{0}`: {1}")]
    Pack(Utf8PathBuf, zip::result::ZipError),

    #[error("Failed to acquire the cache lock")]
    Lock,
}
