use crate::application_port::BackendError;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::Utc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// `users` table kept in process memory. Emails are unique, like the real
/// table's constraint.
#[derive(Default)]
pub struct MemoryUserTable {
    rows: Mutex<Vec<UserRecord>>,
    writes: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryUserTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of insert calls that reached the table.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes every following call fail as if the backend was unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::network("users table unavailable"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserTable for MemoryUserTable {
    async fn list_by_created_desc(&self) -> Result<Vec<UserRecord>, BackendError> {
        self.check_available()?;
        let rows = self
            .rows
            .lock()
            .map_err(|e| BackendError::network(e.to_string()))?;
        let mut list = rows.clone();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn insert(&self, user: &NewUser) -> Result<UserRecord, BackendError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let mut rows = self
            .rows
            .lock()
            .map_err(|e| BackendError::network(e.to_string()))?;
        if rows.iter().any(|r| r.email == user.email) {
            return Err(BackendError::validation(
                "duplicate key value violates unique constraint \"users_email_key\"",
            ));
        }
        let record = UserRecord {
            id: RecordId(uuid::Uuid::new_v4()),
            name: user.name.clone(),
            email: user.email.clone(),
            created_at: Utc::now(),
            extra: Default::default(),
        };
        rows.push(record.clone());
        Ok(record)
    }
}
