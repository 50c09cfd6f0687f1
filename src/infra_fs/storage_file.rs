use crate::domain_port::*;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;

/// Durable storage as one file per key inside `dir`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous value readable.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStorage { dir: dir.into() }
    }

    fn path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait::async_trait]
impl DurableStorage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path(key)?).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path(key)?;
        fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(format!(".{}.{}.tmp", key, nanoid::nanoid!(8)));
        fs::write(&tmp, value).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path(key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_survive_a_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("state"));
        assert_eq!(storage.get_item("react-query-cache").await.unwrap(), None);

        storage.set_item("react-query-cache", "{\"clientState\":1}").await.unwrap();
        storage.set_item("react-query-cache", "{\"clientState\":2}").await.unwrap();

        let reopened = FileStorage::new(dir.path().join("state"));
        assert_eq!(
            reopened.get_item("react-query-cache").await.unwrap().as_deref(),
            Some("{\"clientState\":2}")
        );

        let leftovers = std::fs::read_dir(dir.path().join("state")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage.set_item("sb-auth-token", "{}").await.unwrap();
        storage.remove_item("sb-auth-token").await.unwrap();
        storage.remove_item("sb-auth-token").await.unwrap();
        assert_eq!(storage.get_item("sb-auth-token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn path_like_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        for key in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(
                storage.set_item(key, "x").await,
                Err(StorageError::InvalidKey(_))
            ));
        }
    }
}
