//! Module archives: tar.gz of a module directory, minus excluded paths.

use crate::error::{PublishError, PublishResult};
use boring_storage::{ByteStream, StorageError};
use bytes::{Bytes, BytesMut};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

/// Paths left out of module archives.
///
/// Each pattern is checked two ways: a path component equal to the pattern
/// excludes the whole path, and a glob match against the file's base name
/// excludes the file.
#[derive(Clone, Debug, Default)]
pub struct Exclusions {
    literals: Vec<String>,
    globs: Vec<glob::Pattern>,
}

impl Exclusions {
    pub fn new<S: AsRef<str>>(patterns: impl IntoIterator<Item = S>) -> PublishResult<Self> {
        let mut exclusions = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = glob::Pattern::new(pattern).map_err(|e| PublishError::Exclude {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
            exclusions.literals.push(pattern.to_string());
            exclusions.globs.push(glob);
        }
        Ok(exclusions)
    }

    /// Whether `relative` (a path below the module root) is left out.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        let in_excluded_dir = relative.components().any(|c| match c {
            Component::Normal(part) => self.literals.iter().any(|l| part == l.as_str()),
            _ => false,
        });
        if in_excluded_dir {
            return true;
        }
        let Some(base) = relative.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.globs.iter().any(|g| g.matches(base))
    }
}

/// Tar header name of `path`, found while walking from `root`.
///
/// Walking from `.` yields paths that are already relative and are used
/// verbatim; otherwise the root prefix and any leading separator are
/// stripped.
pub fn header_name(root: &Path, path: &Path) -> PathBuf {
    if root == Path::new(".") {
        return path.to_path_buf();
    }
    match path.strip_prefix(root) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => path
            .components()
            .skip_while(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect(),
    }
}

/// Regular files below `root` that survive `exclusions`, in a stable order.
///
/// Paths are returned the way a walk from `root` produces them.
pub fn collect_files(root: &Path, exclusions: &Exclusions) -> PublishResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = std::fs::read_dir(&dir)
            .map_err(PublishError::io(&dir))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(PublishError::io(&dir))?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = if root == Path::new(".") && dir == root {
                PathBuf::from(entry.file_name())
            } else {
                entry.path()
            };
            if exclusions.is_excluded(&header_name(root, &path)) {
                tracing::debug!(path = %path.display(), "excluded from module archive");
                continue;
            }
            let file_type = std::fs::metadata(&path)
                .map_err(PublishError::io(&path))?
                .file_type();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Write a gzip-compressed tar of `root` into a temporary file.
///
/// Entries are files only; modes are taken from the source files.
pub fn build(root: &Path, exclusions: &Exclusions) -> PublishResult<tempfile::NamedTempFile> {
    let output = tempfile::NamedTempFile::new().map_err(PublishError::io(root))?;
    let encoder = GzEncoder::new(
        output.reopen().map_err(PublishError::io(output.path()))?,
        Compression::default(),
    );
    let mut tar = tar::Builder::new(encoder);
    for path in collect_files(root, exclusions)? {
        let name = header_name(root, &path);
        let mut file = File::open(&path).map_err(PublishError::io(&path))?;
        tar.append_file(&name, &mut file)
            .map_err(PublishError::io(&path))?;
    }
    tar.into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(PublishError::io(output.path()))?;
    Ok(output)
}

/// Stream a file in fixed-size chunks.
pub async fn file_stream(path: &Path) -> PublishResult<ByteStream> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(PublishError::io(path))?;
    Ok(Box::pin(futures::stream::try_unfold(file, |mut file| async move {
        let mut buf = BytesMut::zeroed(READ_CHUNK);
        let n = file.read(&mut buf).await.map_err(StorageError::Io)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some((Bytes::from(buf), file)))
    })))
}
