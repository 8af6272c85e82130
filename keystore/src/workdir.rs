use std::path::{Path, PathBuf};

/// Base directory that relative keystore paths live under.
#[derive(Debug, Clone)]
pub struct WorkDir {
    workdir: PathBuf,
}

impl WorkDir {
    pub fn new(workdir: impl AsRef<Path>) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
        }
    }

    /// Absolute paths are returned unchanged.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.workdir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let workdir = WorkDir::new("/srv/lab3");
        assert_eq!(
            workdir.resolve("auth-service/tls/auth-keystore.p12"),
            PathBuf::from("/srv/lab3/auth-service/tls/auth-keystore.p12")
        );
        assert_eq!(
            workdir.resolve("/etc/tls/data-keystore.p12"),
            PathBuf::from("/etc/tls/data-keystore.p12")
        );
    }
}
