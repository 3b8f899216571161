use std::path::{Component, Path, PathBuf};

use basilisk_core::config::MediaConfig;

use crate::error::{PipelineError, Result};

/// Maps stored media paths (`media-file/forest.mp4`) onto the local media
/// directory (`public/media/forest.mp4`).
///
/// The stored prefix is optional; what remains must be a relative path
/// without `..`, so a stored path can never escape the library root.
#[derive(Debug, Clone)]
pub struct MediaLibrary {
    root: PathBuf,
    stored_prefix: String,
}

impl MediaLibrary {
    pub fn new(root: impl Into<PathBuf>, stored_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            stored_prefix: stored_prefix.into(),
        }
    }

    pub fn from_config(cfg: &MediaConfig) -> Self {
        Self::new(&cfg.library_root, &cfg.stored_prefix)
    }

    pub fn resolve(&self, stored: &str) -> Result<PathBuf> {
        let normalized = stored.trim().replace('\\', "/");
        let prefix = self.stored_prefix.trim_matches('/');
        let relative = match normalized.strip_prefix(prefix) {
            Some(rest) if !prefix.is_empty() && (rest.is_empty() || rest.starts_with('/')) => {
                rest.trim_start_matches('/')
            }
            _ => normalized.as_str(),
        };

        let rel = Path::new(relative);
        let safe = !relative.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(PipelineError::Composition(format!(
                "media path {stored:?} does not map into the media library"
            )));
        }
        Ok(self.root.join(rel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> MediaLibrary {
        MediaLibrary::new("public/media", "media-file")
    }

    #[test]
    fn strips_stored_prefix() {
        assert_eq!(
            library().resolve("media-file/forest.mp4").unwrap(),
            PathBuf::from("public/media/forest.mp4")
        );
    }

    #[test]
    fn accepts_backslashes_and_unprefixed_paths() {
        assert_eq!(
            library().resolve("media-file\\night\\forest.mp4").unwrap(),
            PathBuf::from("public/media/night/forest.mp4")
        );
        assert_eq!(
            library().resolve("forest.mp4").unwrap(),
            PathBuf::from("public/media/forest.mp4")
        );
    }

    #[test]
    fn prefix_must_be_a_whole_segment() {
        assert_eq!(
            library().resolve("media-files/a.mp4").unwrap(),
            PathBuf::from("public/media/media-files/a.mp4")
        );
    }

    #[test]
    fn rejects_escapes() {
        assert!(library().resolve("media-file/../../etc/passwd").is_err());
        assert!(library().resolve("/etc/passwd").is_err());
        assert!(library().resolve("media-file").is_err());
        assert!(library().resolve("").is_err());
    }
}
