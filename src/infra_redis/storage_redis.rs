use crate::domain_port::*;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

/// Durable storage in Redis, one string key per item under `prefix`.
pub struct RedisStorage {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStorage {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        RedisStorage {
            conn,
            prefix: prefix.into(),
        }
    }

    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StorageError> {
        let client = redis::Client::open(url).map_err(redis_error)?;
        let conn = ConnectionManager::new(client).await.map_err(redis_error)?;
        Ok(Self::new(conn, prefix))
    }

    fn key(&self, key: &str) -> Result<String, StorageError> {
        prefixed_key(&self.prefix, key)
    }
}

fn prefixed_key(prefix: &str, key: &str) -> Result<String, StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(format!("{}:{}", prefix, key))
}

fn redis_error(e: redis::RedisError) -> StorageError {
    StorageError::Backend(e.to_string())
}

#[async_trait::async_trait]
impl DurableStorage for RedisStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let key = self.key(key)?;
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(&key).await.map_err(redis_error)?;
        Ok(value)
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let key = self.key(key)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(&key, value).await.map_err(redis_error)?;
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let key = self.key(key)?;
        let mut conn = self.conn.clone();
        let _: () = conn.del(&key).await.map_err(redis_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REDIS_URL_VAR: &str = "KALIMBA_TEST_REDIS_URL";

    #[test]
    fn keys_live_under_prefix() {
        assert_eq!(
            prefixed_key("kalimba", "react-query-cache").unwrap(),
            "kalimba:react-query-cache"
        );
        assert!(matches!(
            prefixed_key("kalimba", ""),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn items_round_trip_through_redis() {
        let Ok(url) = std::env::var(REDIS_URL_VAR) else {
            eprintln!("{} not set, skipping", REDIS_URL_VAR);
            return;
        };
        let prefix = format!("kalimba-test-{}", nanoid::nanoid!(8));
        let storage = RedisStorage::connect(&url, prefix).await.unwrap();

        assert_eq!(storage.get_item("sb-auth-token").await.unwrap(), None);
        storage.set_item("sb-auth-token", "{\"a\":1}").await.unwrap();
        assert_eq!(
            storage.get_item("sb-auth-token").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        storage.remove_item("sb-auth-token").await.unwrap();
        assert_eq!(storage.get_item("sb-auth-token").await.unwrap(), None);
        assert!(storage.set_item("", "x").await.is_err());
    }
}
