use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("file name is empty")]
    EmptyName,
    #[error("path segment {0:?} is not allowed under the songs folder")]
    UnsupportedComponent(String),
}

pub fn normalize_relative_path(raw: &str) -> String {
    raw.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Maps a manifest entry under `root`, refusing anything that could escape it.
pub fn resolve_destination(
    root: &Path,
    relative_path: &str,
    name: &str,
) -> Result<PathBuf, PathError> {
    if name.is_empty() {
        return Err(PathError::EmptyName);
    }
    if name.contains(['/', '\\']) {
        return Err(PathError::UnsupportedComponent(name.to_string()));
    }

    let mut out = root.to_path_buf();
    for segment in relative_path.split('/').filter(|s| !s.is_empty()) {
        push_segment(&mut out, segment)?;
    }
    push_segment(&mut out, name)?;
    Ok(out)
}

pub fn group_dir(root: &Path, group_key: &str) -> Result<PathBuf, PathError> {
    let mut out = root.to_path_buf();
    for segment in group_key.split('/').filter(|s| !s.is_empty()) {
        push_segment(&mut out, segment)?;
    }
    Ok(out)
}

fn push_segment(out: &mut PathBuf, segment: &str) -> Result<(), PathError> {
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => {
            out.push(part);
            Ok(())
        }
        _ => Err(PathError::UnsupportedComponent(segment.to_string())),
    }
}
