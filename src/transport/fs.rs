use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tempfile::Builder;
use walkdir::WalkDir;

use super::ArtifactStore;
use crate::constants::store::DEFAULT_STORE_DIR;
use crate::errors::PipelineError;
use crate::types::ArtifactKey;

const TMP_EXTENSION: &str = "tmp";

/// Artifact store rooted at a directory; keys map to relative file paths.
///
/// Each write goes to its own sibling temp file and is renamed into place, so
/// a reader (or the completion monitor) never observes a partial artifact and
/// concurrent writers of one key never share a temp file. The last rename wins.
#[derive(Clone, Debug)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `DEFAULT_STORE_DIR` under the current directory.
    pub fn default_location() -> Self {
        Self::new(DEFAULT_STORE_DIR)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, PipelineError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(PipelineError::Store {
                key: key.to_string(),
                reason: "key must be a relative path without '..'".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn store_error(key: &str, action: &str, path: &Path, err: std::io::Error) -> PipelineError {
        PipelineError::Store {
            key: key.to_string(),
            reason: format!("failed {action} {}: {err}", path.display()),
        }
    }
}

impl ArtifactStore for FileArtifactStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), PipelineError> {
        let path = self.path_for(key)?;
        let parent = path.parent().unwrap_or(self.root.as_path());
        fs::create_dir_all(parent).map_err(|err| Self::store_error(key, "creating", parent, err))?;
        let mut tmp = Builder::new()
            .prefix(".")
            .suffix(&format!(".{TMP_EXTENSION}"))
            .tempfile_in(parent)
            .map_err(|err| Self::store_error(key, "creating temp file in", parent, err))?;
        tmp.write_all(bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|err| Self::store_error(key, "writing", tmp.path(), err))?;
        tmp.persist(&path)
            .map(|_| ())
            .map_err(|err| Self::store_error(key, "renaming", &path, err.error))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::store_error(key, "reading", &path, err)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<ArtifactKey>, PipelineError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut keys: Vec<ArtifactKey> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext != TMP_EXTENSION)
                    .unwrap_or(true)
            })
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&self.root).ok()?;
                let key = relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                key.starts_with(prefix).then_some(key)
            })
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_replaces_and_lists_by_prefix() {
        let temp = tempdir().unwrap();
        let store = FileArtifactStore::new(temp.path());

        store.put("intermediate/1/t_0_1_5.json", b"first").unwrap();
        store.put("intermediate/1/t_0_1_5.json", b"second").unwrap();
        store.put("intermediate/1/t_0_6_9.json", b"x").unwrap();
        store.put("submissions/1/mos_output.json", b"y").unwrap();

        assert_eq!(
            store.get("intermediate/1/t_0_1_5.json").unwrap().unwrap(),
            b"second"
        );
        assert_eq!(store.count("intermediate/1/").unwrap(), 2);
        assert_eq!(
            store.list("submissions/").unwrap(),
            vec!["submissions/1/mos_output.json"]
        );
        assert!(store.get("intermediate/1/missing.json").unwrap().is_none());
    }

    #[test]
    fn concurrent_writers_of_one_key_all_succeed() {
        let temp = tempdir().unwrap();
        let store = std::sync::Arc::new(FileArtifactStore::new(temp.path()));
        let key = "intermediate/j/t_0_1_4.json";

        let handles: Vec<_> = (0..4u8)
            .map(|writer| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let payload = vec![b'a' + writer; 1 << 20];
                    (0..20)
                        .filter(|_| store.put(key, &payload).is_err())
                        .count()
                })
            })
            .collect();
        let failures: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(failures, 0);

        let stored = store.get(key).unwrap().unwrap();
        assert_eq!(stored.len(), 1 << 20);
        assert!(stored.iter().all(|byte| *byte == stored[0]));
        assert_eq!(store.list("intermediate/").unwrap(), vec![key]);
    }

    #[test]
    fn rejects_escaping_keys() {
        let temp = tempdir().unwrap();
        let store = FileArtifactStore::new(temp.path());
        assert!(store.put("../outside.json", b"x").is_err());
        assert!(store.put("/abs.json", b"x").is_err());
        assert!(store.get("").is_err());
    }

    #[test]
    fn missing_root_lists_nothing() {
        let temp = tempdir().unwrap();
        let store = FileArtifactStore::new(temp.path().join("never-created"));
        assert!(store.list("").unwrap().is_empty());
    }
}
