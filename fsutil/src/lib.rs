use serde::Serialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

pub mod error {
    use std::{io, path::PathBuf};

    pub type Result<T> = std::result::Result<T, self::Error>;

    type Msg = &'static str;

    #[derive(Debug, thiserror::Error)]
    pub enum Error {
        #[error("{0} ({1}): {2}")]
        SingleIO(Msg, PathBuf, #[source] io::Error),

        #[error("Cannot serialize to JSON (dest='{0}'): {1}")]
        SerializeToJson(PathBuf, #[source] serde_json::Error),
    }
}
pub use error::{Error, Result};

#[must_use]
pub fn mkdir_all(path: impl AsRef<Path>) -> Result<()> {
    let dir = path.as_ref();
    fs::create_dir_all(dir).map_err(|e| Error::SingleIO("Cannot create dir", dir.to_owned(), e))
}

/// Removes `path` recursively. A missing directory is not an error.
#[must_use]
pub fn remove_dir_all(path: impl AsRef<Path>) -> Result<()> {
    let dir = path.as_ref();
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::SingleIO("Cannot remove dir", dir.to_owned(), e)),
    }
}

/// Makes sure `path` exists and is empty.
#[must_use]
pub fn mkdir_empty(path: impl AsRef<Path>) -> Result<()> {
    self::remove_dir_all(&path)?;
    self::mkdir_all(path)
}

#[must_use]
pub fn write<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    fs::write(&filepath, contents)
        .map_err(|e| Error::SingleIO("Cannot write file", filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn write_with_mkdir<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    if let Some(dir) = filepath.as_ref().parent() {
        self::mkdir_all(dir)?;
    }
    self::write(filepath, contents)
}

#[must_use]
pub fn read_to_string(filepath: impl AsRef<Path>) -> Result<String> {
    fs::read_to_string(&filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn write_json_with_mkdir<P, T>(filepath: P, data: &T) -> Result<()>
where
    P: AsRef<Path>,
    T: Serialize,
{
    let s = serde_json::to_string_pretty(data)
        .map_err(|e| Error::SerializeToJson(filepath.as_ref().to_owned(), e))?;
    write_with_mkdir(filepath, &s)
}

/// Adds the executable bits (`u+x,g+x,o+x`) to the file.
#[must_use]
#[cfg(unix)]
pub fn set_executable(filepath: impl AsRef<Path>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    let filepath = filepath.as_ref();
    let mut perm = fs::metadata(filepath)
        .map_err(|e| Error::SingleIO("Cannot stat file", filepath.to_owned(), e))?
        .permissions();
    perm.set_mode(perm.mode() | 0o111);
    fs::set_permissions(filepath, perm)
        .map_err(|e| Error::SingleIO("Cannot change permission", filepath.to_owned(), e))
}

/// Normalize the path
/// ```
/// use fsutil::normalize_path;
/// use std::path::Path;
///
/// assert_eq!(normalize_path("./hoge/.config/././foo"), Path::new("hoge/.config/foo"));
/// assert_eq!(normalize_path("hoge/.config/../../bar/."), Path::new("bar"));
/// assert_eq!(normalize_path("../foo/../hello"), Path::new("../hello"));
/// assert_eq!(normalize_path("/"), Path::new("/"));
/// assert_eq!(normalize_path("/foo/"), Path::new("/foo"));
/// assert_eq!(normalize_path("./foo/"), Path::new("foo"));
/// assert_eq!(normalize_path("."), Path::new("."));
/// ```
pub fn normalize_path(path: impl AsRef<Path>) -> PathBuf {
    use ::std::path::Component;
    let components = path.as_ref().components();
    let mut stack = Vec::with_capacity(components.size_hint().1.unwrap_or(4));
    for c in components {
        match c {
            Component::CurDir => (),
            Component::ParentDir if matches!(stack.last(), Some(Component::Normal(_))) => {
                stack.pop();
            }
            _ => {
                stack.push(c);
            }
        }
    }
    if stack.is_empty() {
        stack.push(Component::CurDir);
    }
    stack.iter().collect()
}

/// Joins `path` onto `base` unless it is already absolute, then normalizes.
pub fn resolve_path(base: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        self::normalize_path(path)
    } else {
        self::normalize_path(base.as_ref().join(path))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mkdir_empty_clears_existing_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("scratch");
        write_with_mkdir(dir.join("nested/old.txt"), "stale").unwrap();

        mkdir_empty(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn remove_dir_all_ignores_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        remove_dir_all(tmp.path().join("no-such-dir")).unwrap();
    }

    #[test]
    fn resolve_path_keeps_absolute_path() {
        assert_eq!(resolve_path("/repo", "/opt/lib.o"), Path::new("/opt/lib.o"));
        assert_eq!(resolve_path("/repo", "./lib/lib.o"), Path::new("/repo/lib/lib.o"));
        assert_eq!(resolve_path("/repo/sub", "../tmp"), Path::new("/repo/tmp"));
    }

    #[cfg(unix)]
    #[test]
    fn set_executable_adds_exec_bits() {
        use std::os::unix::fs::PermissionsExt as _;

        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("show_diff.sh");
        write(&file, "#!/bin/sh\n").unwrap();

        set_executable(&file).unwrap();

        let mode = fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
