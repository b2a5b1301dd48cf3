//! The task model.
//!
//! A [Task] is a named unit of work bound to a working directory. It carries
//! glob patterns describing its input and output files, optional scalar
//! inputs, unresolved references to the tasks it depends on, and an action
//! closure invoked with an execution [`Context`].
//!
//! Tasks are declared through a [`TaskBuilder`] while a task file is being
//! evaluated and are immutable afterwards. Dependency references stay
//! unresolved strings until a [`TaskGraph`](crate::TaskGraph) is built, since
//! a reference may point into a group whose file has not been loaded yet.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use tracing::debug;

use crate::error::{ConfigError, ExecutionError};
use crate::executor::Context;
use crate::utils::xglob;
use crate::InputHash;

/// The action thunk invoked when a task executes.
pub type Action = Arc<dyn Fn(&Context) -> anyhow::Result<()> + Send + Sync>;

/// A scalar configuration value contributing bytes to a task's input hash.
///
/// Each variant has a fixed byte encoding, so equal values always feed equal
/// bytes into the digest:
/// - `Bytes` are used as-is;
/// - `Int` becomes two's-complement little-endian, trimmed to the minimum
///   number of bytes (at least one);
/// - `Float` becomes the 8-byte little-endian IEEE-754 double;
/// - `Text` becomes its UTF-8 bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ScalarValue {
    /// Encodes any displayable value through its textual form.
    pub fn display(value: impl std::fmt::Display) -> Self {
        ScalarValue::Text(value.to_string())
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        match self {
            ScalarValue::Bytes(bytes) => bytes.clone(),
            ScalarValue::Int(value) => encode_int(*value),
            ScalarValue::Float(value) => value.to_le_bytes().to_vec(),
            ScalarValue::Text(text) => text.clone().into_bytes(),
        }
    }
}

/// Minimal-length two's-complement little-endian encoding. Redundant
/// sign-extension bytes are trimmed, keeping at least one byte.
fn encode_int(value: i64) -> Vec<u8> {
    let bytes = value.to_le_bytes();
    let mut len = bytes.len();

    while len > 1 {
        let sign = bytes[len - 1];
        let msb_set = bytes[len - 2] & 0x80 != 0;
        if (sign == 0x00 && !msb_set) || (sign == 0xFF && msb_set) {
            len -= 1;
        } else {
            break;
        }
    }

    bytes[..len].to_vec()
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int(value.into())
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Text(value.to_owned())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Text(value)
    }
}

impl From<&[u8]> for ScalarValue {
    fn from(value: &[u8]) -> Self {
        ScalarValue::Bytes(value.to_owned())
    }
}

impl From<Vec<u8>> for ScalarValue {
    fn from(value: Vec<u8>) -> Self {
        ScalarValue::Bytes(value)
    }
}

/// A declared task. Identity is `(group, name)`; everything else is
/// configuration frozen at declaration time.
pub struct Task {
    name: String,
    group: String,
    doc: Option<String>,
    working_directory_path: Utf8PathBuf,
    file_path: Utf8PathBuf,
    use_cache: bool,
    include_inputs: Vec<String>,
    exclude_inputs: Vec<String>,
    include_outputs: Vec<String>,
    exclude_outputs: Vec<String>,
    additional_inputs: Vec<Vec<u8>>,
    unresolved_dependencies: Vec<String>,
    action: Action,
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// The globally unique `group:name` identity.
    pub fn label(&self) -> String {
        format!("{}:{}", self.group, self.name)
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Directory containing the defining task file; the action runs with
    /// this as the current directory.
    pub fn working_directory_path(&self) -> &Utf8Path {
        &self.working_directory_path
    }

    /// The defining task file; its bytes participate in the input hash.
    pub fn file_path(&self) -> &Utf8Path {
        &self.file_path
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    pub fn unresolved_dependencies(&self) -> &[String] {
        &self.unresolved_dependencies
    }

    pub(crate) fn action(&self) -> &Action {
        &self.action
    }

    /// Resolves the input patterns against the working directory.
    pub fn inputs(&self) -> Result<Vec<Utf8PathBuf>, ExecutionError> {
        xglob(
            &self.include_inputs,
            &self.exclude_inputs,
            &self.working_directory_path,
        )
    }

    /// Resolves the output patterns against the working directory.
    pub fn outputs(&self) -> Result<Vec<Utf8PathBuf>, ExecutionError> {
        xglob(
            &self.include_outputs,
            &self.exclude_outputs,
            &self.working_directory_path,
        )
    }

    /// Digest over the defining file's bytes, every resolved input file's
    /// bytes in sorted path order, and the additional inputs in declaration
    /// order. File contents only; paths never enter the digest.
    pub fn input_hash(&self) -> Result<InputHash, ExecutionError> {
        debug!("hashing inputs for {self}");
        let mut hasher = blake3::Hasher::new();

        debug!("updating the hash with the task file `{}`", self.file_path);
        hasher
            .update_mmap(&self.file_path)
            .map_err(|err| ExecutionError::InputRead(self.file_path.clone(), err))?;

        for input_file in self.inputs()? {
            debug!("updating the hash with the input file `{input_file}`");
            hasher
                .update_mmap(&input_file)
                .map_err(|err| ExecutionError::InputRead(input_file.clone(), err))?;
        }

        for additional_input in &self.additional_inputs {
            hasher.update(additional_input);
        }

        Ok(InputHash::from_digest(hasher.finalize()))
    }

    /// Copies the resolved outputs matching `include` (and not `exclude`)
    /// into `destination_directory`. Patterns match the output's path
    /// relative to the working directory. With `keep_structure` the relative
    /// path is preserved below the destination; otherwise files land flat
    /// under their file names.
    pub fn copy_outputs(
        &self,
        destination_directory: &Utf8Path,
        include: &str,
        exclude: Option<&str>,
        keep_structure: bool,
    ) -> Result<(), ExecutionError> {
        let include = Pattern::new(include)?;
        let exclude = exclude.map(Pattern::new).transpose()?;

        for file in self.outputs()? {
            let relative = file
                .strip_prefix(&self.working_directory_path)
                .unwrap_or(&file);
            if !include.matches(relative.as_str()) {
                continue;
            }
            if let Some(exclude) = &exclude
                && exclude.matches(relative.as_str())
            {
                continue;
            }

            let target = if keep_structure {
                destination_directory.join(relative)
            } else {
                match relative.file_name() {
                    Some(name) => destination_directory.join(name),
                    None => continue,
                }
            };

            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| ExecutionError::OutputCopy(file.clone(), target.clone(), err))?;
            }
            debug!("copying `{file}` to `{target}`");
            std::fs::copy(&file, &target)
                .map_err(|err| ExecutionError::OutputCopy(file.clone(), target.clone(), err))?;
        }

        Ok(())
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.group == other.group
    }
}

impl Eq for Task {}

impl std::hash::Hash for Task {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.group.hash(state);
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.label())
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("label", &self.label())
            .field("working_directory_path", &self.working_directory_path)
            .field("use_cache", &self.use_cache)
            .finish_non_exhaustive()
    }
}

/// Mutable task configuration, alive only while its task file is being
/// evaluated. [`build`](TaskBuilder::build) freezes it into a [Task].
pub struct TaskBuilder {
    name: String,
    group: String,
    doc: Option<String>,
    working_directory_path: Utf8PathBuf,
    file_path: Utf8PathBuf,
    use_cache: bool,
    include_inputs: Vec<String>,
    exclude_inputs: Vec<String>,
    include_outputs: Vec<String>,
    exclude_outputs: Vec<String>,
    additional_inputs: Vec<Vec<u8>>,
    unresolved_dependencies: Vec<String>,
    action: Action,
}

impl TaskBuilder {
    pub(crate) fn new(
        name: String,
        group: String,
        working_directory_path: Utf8PathBuf,
        file_path: Utf8PathBuf,
        use_cache: bool,
        action: Action,
    ) -> Self {
        TaskBuilder {
            name,
            group,
            doc: None,
            working_directory_path,
            file_path,
            use_cache,
            include_inputs: Vec::new(),
            exclude_inputs: Vec::new(),
            include_outputs: Vec::new(),
            exclude_outputs: Vec::new(),
            additional_inputs: Vec::new(),
            unresolved_dependencies: Vec::new(),
            action,
        }
    }

    fn label(&self) -> String {
        format!("{}:{}", self.group, self.name)
    }

    /// Human description, used as the subcommand help text.
    pub fn doc(&mut self, text: &str) -> &mut Self {
        self.doc = Some(text.to_owned());
        self
    }

    /// Appends encoded scalar inputs in declaration order.
    pub fn additional_inputs(
        &mut self,
        values: impl IntoIterator<Item = ScalarValue>,
    ) -> &mut Self {
        self.additional_inputs
            .extend(values.into_iter().map(|value| value.encode()));
        self
    }

    /// Extends the input glob lists. An empty `include` is a configuration
    /// error.
    pub fn inputs(
        &mut self,
        include: &[&str],
        exclude: &[&str],
    ) -> Result<&mut Self, ConfigError> {
        if include.is_empty() {
            return Err(ConfigError::EmptyInputPatterns(self.label()));
        }
        self.include_inputs
            .extend(include.iter().map(|s| (*s).to_owned()));
        self.exclude_inputs
            .extend(exclude.iter().map(|s| (*s).to_owned()));
        Ok(self)
    }

    /// Extends the output glob lists. An empty `include` is a configuration
    /// error.
    pub fn outputs(
        &mut self,
        include: &[&str],
        exclude: &[&str],
    ) -> Result<&mut Self, ConfigError> {
        if include.is_empty() {
            return Err(ConfigError::EmptyOutputPatterns(self.label()));
        }
        self.include_outputs
            .extend(include.iter().map(|s| (*s).to_owned()));
        self.exclude_outputs
            .extend(exclude.iter().map(|s| (*s).to_owned()));
        Ok(self)
    }

    /// Appends dependency references, each `name` or `group:name`. They are
    /// resolved when the graph is constructed.
    pub fn dependencies(&mut self, references: &[&str]) -> &mut Self {
        self.unresolved_dependencies
            .extend(references.iter().map(|s| (*s).to_owned()));
        self
    }

    pub(crate) fn build(self) -> Task {
        Task {
            name: self.name,
            group: self.group,
            doc: self.doc,
            working_directory_path: self.working_directory_path,
            file_path: self.file_path,
            use_cache: self.use_cache,
            include_inputs: self.include_inputs,
            exclude_inputs: self.exclude_inputs,
            include_outputs: self.include_outputs,
            exclude_outputs: self.exclude_outputs,
            additional_inputs: self.additional_inputs,
            unresolved_dependencies: self.unresolved_dependencies,
            action: self.action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tempdir_utf8() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().canonicalize().unwrap()).unwrap();
        (dir, path)
    }

    fn noop_action() -> Action {
        Arc::new(|_: &Context| Ok(()))
    }

    fn builder(name: &str, group: &str, root: &Utf8Path) -> TaskBuilder {
        let file_path = root.join("build.tasks");
        if !file_path.exists() {
            fs::write(&file_path, "declare build").unwrap();
        }
        TaskBuilder::new(
            name.to_owned(),
            group.to_owned(),
            root.to_owned(),
            file_path,
            false,
            noop_action(),
        )
    }

    #[test]
    fn test_scalar_encoding() {
        // 42 || 3.14 || "hello" || 0x00 0x01, byte for byte.
        assert_eq!(ScalarValue::from(42).encode(), vec![0x2a]);
        assert_eq!(ScalarValue::from(3.14).encode(), 3.14f64.to_le_bytes().to_vec());
        assert_eq!(ScalarValue::from("hello").encode(), b"hello".to_vec());
        assert_eq!(ScalarValue::from(vec![0x00u8, 0x01]).encode(), vec![0x00, 0x01]);
    }

    #[test]
    fn test_int_encoding_edge_cases() {
        assert_eq!(encode_int(0), vec![0x00]);
        assert_eq!(encode_int(-1), vec![0xff]);
        assert_eq!(encode_int(127), vec![0x7f]);
        assert_eq!(encode_int(128), vec![0x80, 0x00]);
        assert_eq!(encode_int(-128), vec![0x80]);
        assert_eq!(encode_int(-129), vec![0x7f, 0xff]);
        assert_eq!(encode_int(0x1234), vec![0x34, 0x12]);
    }

    #[test]
    fn test_identity_by_group_and_name() {
        let (_guard, root) = tempdir_utf8();
        let a = builder("build", "app", &root).build();
        let b = builder("build", "app", &root).build();
        let c = builder("build", "lib", &root).build();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.label(), "app:build");
        assert_eq!(format!("{a}"), "[app:build]");
    }

    #[test]
    fn test_empty_include_patterns_are_fatal() {
        let (_guard, root) = tempdir_utf8();
        let mut builder = builder("build", "app", &root);

        assert!(matches!(
            builder.inputs(&[], &["*.tmp"]),
            Err(ConfigError::EmptyInputPatterns(_))
        ));
        assert!(matches!(
            builder.outputs(&[], &[]),
            Err(ConfigError::EmptyOutputPatterns(_))
        ));
    }

    #[test]
    fn test_input_hash_is_deterministic() {
        let (_guard, root) = tempdir_utf8();
        fs::write(root.join("src.txt"), "hello").unwrap();

        let mut builder = builder("build", "app", &root);
        builder
            .inputs(&["*.txt"], &[])
            .unwrap()
            .additional_inputs([ScalarValue::from(42)]);
        let task = builder.build();

        assert_eq!(task.input_hash().unwrap(), task.input_hash().unwrap());
    }

    #[test]
    fn test_input_hash_is_sensitive() {
        let (_guard, root) = tempdir_utf8();
        fs::write(root.join("src.txt"), "hello").unwrap();

        let task = {
            let mut builder = builder("build", "app", &root);
            builder.inputs(&["*.txt"], &[]).unwrap();
            builder.build()
        };
        let before = task.input_hash().unwrap();

        // One changed input byte changes the hash.
        fs::write(root.join("src.txt"), "hello!").unwrap();
        let after = task.input_hash().unwrap();
        assert_ne!(before, after);

        // A changed defining file changes the hash.
        fs::write(root.join("src.txt"), "hello").unwrap();
        fs::write(root.join("build.tasks"), "declare build # v2").unwrap();
        assert_ne!(before, task.input_hash().unwrap());
    }

    #[test]
    fn test_input_hash_is_sensitive_to_additional_inputs() {
        let (_guard, root) = tempdir_utf8();
        fs::write(root.join("src.txt"), "hello").unwrap();

        let hash_with = |values: [ScalarValue; 1]| {
            let mut builder = builder("build", "app", &root);
            builder
                .inputs(&["*.txt"], &[])
                .unwrap()
                .additional_inputs(values);
            builder.build().input_hash().unwrap()
        };

        assert_ne!(hash_with([42.into()]), hash_with([43.into()]));
    }

    #[test]
    fn test_input_hash_ignores_file_names() {
        let (_guard, root) = tempdir_utf8();
        fs::write(root.join("a.txt"), "one").unwrap();
        fs::write(root.join("b.txt"), "two").unwrap();

        let task = {
            let mut builder = builder("build", "app", &root);
            builder.inputs(&["*.txt"], &[]).unwrap();
            builder.build()
        };
        let before = task.input_hash().unwrap();

        // Renames that keep the sorted content order hash identically.
        fs::rename(root.join("a.txt"), root.join("c.txt")).unwrap();
        fs::rename(root.join("b.txt"), root.join("d.txt")).unwrap();
        assert_eq!(before, task.input_hash().unwrap());
    }

    #[test]
    fn test_copy_outputs() {
        let (_guard, root) = tempdir_utf8();
        let (_dest_guard, dest) = tempdir_utf8();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("out.txt"), "flat").unwrap();
        fs::write(root.join("sub").join("deep.txt"), "deep").unwrap();

        let task = {
            let mut builder = builder("build", "app", &root);
            builder.outputs(&["**/*.txt"], &[]).unwrap();
            builder.build()
        };

        task.copy_outputs(&dest.join("flat"), "**/*", None, false).unwrap();
        assert!(dest.join("flat").join("out.txt").is_file());
        assert!(dest.join("flat").join("deep.txt").is_file());

        task.copy_outputs(&dest.join("tree"), "**/*", None, true).unwrap();
        assert!(dest.join("tree").join("out.txt").is_file());
        assert!(dest.join("tree").join("sub").join("deep.txt").is_file());
    }
}
