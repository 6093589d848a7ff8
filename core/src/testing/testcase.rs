use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Testcase dir '{0}' does not exist or is not a directory")]
    RootNotFound(PathBuf),

    #[error("Cannot walk testcase dir '{0}': {1}")]
    Walk(PathBuf, #[source] walkdir::Error),

    #[error("No valid testcase (a '.sy' file with its '.out' file) found in '{0}'")]
    NoTestcases(PathBuf),

    #[error("No testcase in '{0}' matches the filter {1:?}")]
    NoMatch(PathBuf, Vec<String>),
}

/// A testcase: `<name>.sy`, optional `<name>.in` and `<name>.out`.
/// `name` is the path relative to the testcase root, without extension, `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    name: String,
    source_path: PathBuf,
    input_path: Option<PathBuf>,
    expected_path: PathBuf,
}

#[derive(Debug, Default)]
struct FileGroup {
    source: Option<PathBuf>,
    input: Option<PathBuf>,
    expected: Option<PathBuf>,
}

impl TestCase {
    pub const SOURCE_EXT: &str = "sy";
    pub const INPUT_EXT: &str = "in";
    pub const EXPECTED_EXT: &str = "out";

    pub fn new(
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        input: Option<PathBuf>,
        expected: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            source_path: source.into(),
            input_path: input,
            expected_path: expected.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn input_path(&self) -> Option<&Path> {
        self.input_path.as_deref()
    }

    pub fn expected_path(&self) -> &Path {
        &self.expected_path
    }

    /// `name` with path separators replaced, usable as a single file name.
    /// Not injective on its own (`a/b` and `a_b` collide); always combine with the run index.
    pub fn flat_name(&self) -> String {
        self.name.replace(['/', '\\'], "_")
    }

    /// Recursively collects testcases under `root`, sorted by name.
    pub fn discover(root: impl AsRef<Path>) -> Result<Vec<Self>, DiscoveryError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(DiscoveryError::RootNotFound(root.to_owned()));
        }

        let mut groups: BTreeMap<String, FileGroup> = BTreeMap::new();
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry.map_err(|e| DiscoveryError::Walk(root.to_owned(), e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(name) = Self::testcase_name(root, path) else {
                continue;
            };
            let group = groups.entry(name).or_default();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some(Self::SOURCE_EXT) => group.source = Some(path.to_owned()),
                Some(Self::INPUT_EXT) => group.input = Some(path.to_owned()),
                Some(Self::EXPECTED_EXT) => group.expected = Some(path.to_owned()),
                _ => (),
            }
        }

        let mut res = Vec::with_capacity(groups.len());
        for (name, group) in groups {
            match group {
                FileGroup {
                    source: Some(source),
                    input,
                    expected: Some(expected),
                } => res.push(Self::new(name, source, input, expected)),
                FileGroup { source: None, expected: None, .. } => (),
                FileGroup { source: None, .. } => {
                    log::warn!("Skip testcase '{}': missing .{} file", name, Self::SOURCE_EXT)
                }
                FileGroup { expected: None, .. } => {
                    log::warn!("Skip testcase '{}': missing .{} file", name, Self::EXPECTED_EXT)
                }
            }
        }

        if res.is_empty() {
            return Err(DiscoveryError::NoTestcases(root.to_owned()));
        }
        log::debug!("Discovered {} testcases in {:?}", res.len(), root);
        Ok(res)
    }

    /// Like [`TestCase::discover`], keeping only testcases whose name starts with one of `prefixes`.
    /// An empty `prefixes` keeps everything.
    pub fn discover_filtered(
        root: impl AsRef<Path>,
        prefixes: &[String],
    ) -> Result<Vec<Self>, DiscoveryError> {
        let mut testcases = Self::discover(&root)?;
        if prefixes.is_empty() {
            return Ok(testcases);
        }
        testcases.retain(|t| prefixes.iter().any(|p| t.name.starts_with(p.as_str())));
        if testcases.is_empty() {
            return Err(DiscoveryError::NoMatch(
                root.as_ref().to_owned(),
                prefixes.to_vec(),
            ));
        }
        Ok(testcases)
    }

    fn testcase_name(root: &Path, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(root).ok()?;
        let Some(rel_str) = rel.to_str() else {
            log::warn!("Skipping {:?}: path is not valid UTF-8", path);
            return None;
        };
        let stem = Path::new(rel_str).file_stem()?.to_str()?;
        if stem.starts_with('.') {
            return None;
        }
        let mut parts: Vec<&str> = Path::new(rel_str)
            .parent()
            .map(|dir| dir.iter().filter_map(|c| c.to_str()).collect())
            .unwrap_or_default();
        parts.push(stem);
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn touch(root: &Path, rel: &str) {
        fsutil::write_with_mkdir(root.join(rel), "").unwrap();
    }

    fn names(testcases: &[TestCase]) -> Vec<&str> {
        testcases.iter().map(|t| t.name()).collect()
    }

    #[test]
    fn discover_groups_files_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(root, "basic/add.sy");
        touch(root, "basic/add.out");
        touch(root, "basic/read.sy");
        touch(root, "basic/read.in");
        touch(root, "basic/read.out");
        touch(root, "00_main.sy");
        touch(root, "00_main.out");

        let testcases = TestCase::discover(root).unwrap();

        assert_eq!(names(&testcases), vec!["00_main", "basic/add", "basic/read"]);
        assert_eq!(testcases[1].input_path(), None);
        assert_eq!(
            testcases[2].input_path(),
            Some(root.join("basic/read.in").as_path())
        );
        assert_eq!(testcases[2].expected_path(), root.join("basic/read.out"));
    }

    #[test]
    fn discover_skips_incomplete_groups() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(root, "ok.sy");
        touch(root, "ok.out");
        touch(root, "no_expected.sy");
        touch(root, "no_source.out");
        touch(root, "no_source.in");
        touch(root, "README.md");

        let testcases = TestCase::discover(root).unwrap();
        assert_eq!(names(&testcases), vec!["ok"]);
    }

    #[test]
    fn discover_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        for name in ["z", "a/b", "a_b", "m/n/o"] {
            touch(root, &format!("{}.sy", name));
            touch(root, &format!("{}.out", name));
        }

        let first = TestCase::discover(root).unwrap();
        let second = TestCase::discover(root).unwrap();
        assert_eq!(first, second);
        assert_eq!(names(&first), vec!["a/b", "a_b", "m/n/o", "z"]);
    }

    #[test]
    fn discover_fails_on_missing_or_empty_root() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            TestCase::discover(tmp.path().join("nope")),
            Err(DiscoveryError::RootNotFound(_))
        ));

        touch(tmp.path(), "lonely.sy");
        assert!(matches!(
            TestCase::discover(tmp.path()),
            Err(DiscoveryError::NoTestcases(_))
        ));
    }

    #[test]
    fn discover_filtered_by_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        for name in ["basic/add", "basic/sub", "perf/loop"] {
            touch(root, &format!("{}.sy", name));
            touch(root, &format!("{}.out", name));
        }

        let testcases = TestCase::discover_filtered(root, &["perf/".to_owned()]).unwrap();
        assert_eq!(names(&testcases), vec!["perf/loop"]);

        let all = TestCase::discover_filtered(root, &[]).unwrap();
        assert_eq!(all.len(), 3);

        assert!(matches!(
            TestCase::discover_filtered(root, &["nothing".to_owned()]),
            Err(DiscoveryError::NoMatch(_, _))
        ));
    }

    #[test]
    fn flat_name_replaces_separators() {
        let t = TestCase::new("a/b/c", "a/b/c.sy", None, "a/b/c.out");
        assert_eq!(t.flat_name(), "a_b_c");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_paths_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let bad_dir = root.join(OsStr::from_bytes(b"bad\xff"));
        fsutil::write_with_mkdir(bad_dir.join("add.sy"), "").unwrap();
        fsutil::write_with_mkdir(bad_dir.join("add.out"), "").unwrap();
        touch(root, "add.sy");
        touch(root, "add.out");

        let testcases = TestCase::discover(root).unwrap();
        assert_eq!(names(&testcases), vec!["add"]);
        assert_eq!(testcases[0].source_path(), root.join("add.sy"));
    }
}
