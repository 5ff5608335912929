use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("import_path cannot be empty.")]
    EmptyPath,

    #[error("import_path support is not configured on this node.")]
    NotConfigured,

    #[error("Import path {} is not allowed on this node.", .0.display())]
    NotAllowed(PathBuf),

    #[error("Import path {} must be a directory.", .0.display())]
    NotADirectory(PathBuf),

    #[error("Import path {} cannot be accessed ({source}).", .path.display())]
    NotAccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A server-local directory a request may use as its dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportGrant {
    path: PathBuf,
}

impl ImportGrant {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Confines `import_path` references to a set of allowed root directories.
#[derive(Debug, Clone)]
pub struct ImportSandbox {
    roots: Vec<PathBuf>,
}

impl ImportSandbox {
    pub fn new(roots: &[PathBuf]) -> Self {
        let roots = roots
            .iter()
            .filter(|root| !root.as_os_str().is_empty())
            .map(|root| absolutize(root))
            .collect();
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Resolves `raw` to an absolute, normalized path and checks that it is
    /// an existing directory at or below one of the allowed roots.
    ///
    /// Resolution is lexical: `..` is collapsed but symlinks are not
    /// followed. Containment is component-wise, so `/data-2/x` is never
    /// inside `/data`.
    pub async fn resolve(&self, raw: &str) -> Result<ImportGrant, SandboxError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SandboxError::EmptyPath);
        }
        if self.roots.is_empty() {
            return Err(SandboxError::NotConfigured);
        }

        let resolved = absolutize(Path::new(trimmed));
        if !self.is_allowed(&resolved) {
            return Err(SandboxError::NotAllowed(resolved));
        }

        match tokio::fs::metadata(&resolved).await {
            Ok(meta) if meta.is_dir() => Ok(ImportGrant { path: resolved }),
            Ok(_) => Err(SandboxError::NotADirectory(resolved)),
            Err(source) => Err(SandboxError::NotAccessible {
                path: resolved,
                source,
            }),
        }
    }

    fn is_allowed(&self, resolved: &Path) -> bool {
        self.roots.iter().any(|root| resolved.starts_with(root))
    }
}

/// Lexically normalizes `path` against the current working directory.
fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping past the root leaves the root in place
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
