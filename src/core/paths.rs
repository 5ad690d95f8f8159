// Lexical path resolution: absolute, normalized, symlinks left alone.
use std::path::{Component, Path, PathBuf};

use crate::core::error::{Error, ErrorKind};

/// Appended to a column path to reach its owning table (`<table>/col/<name>`).
pub const GRANDPARENT_SUFFIX: &str = "/../..";

/// Makes `path` absolute against `base` and folds `.` and `..` components.
pub fn resolve_lexically(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// Resolves `path` against the current working directory.
pub fn resolve_path(path: &str) -> Result<PathBuf, Error> {
    let cwd = std::env::current_dir().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read current directory")
            .with_source(err)
    })?;
    Ok(resolve_lexically(&cwd, Path::new(path)))
}

/// Returns the directory two levels above `path`, computed textually.
pub fn grandparent(path: &str) -> Result<PathBuf, Error> {
    resolve_path(&format!("{path}{GRANDPARENT_SUFFIX}"))
}
