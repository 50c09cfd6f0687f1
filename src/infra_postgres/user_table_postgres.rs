use crate::application_port::BackendError;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgDatabaseError;

const UNIQUE_VIOLATION: &str = "23505";
const NOT_NULL_VIOLATION: &str = "23502";
const CHECK_VIOLATION: &str = "23514";

/// The `users` table over a direct Postgres connection.
pub struct PostgresUserTable {
    pool: PgPool,
}

impl PostgresUserTable {
    pub fn new(pool: PgPool) -> Self {
        PostgresUserTable { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: RecordId,
    name: String,
    email: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        UserRecord {
            id: row.id,
            name: row.name,
            email: row.email,
            created_at: row.created_at,
            extra: Default::default(),
        }
    }
}

fn sql_error(err: sqlx::Error) -> BackendError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(pg) = db.try_downcast_ref::<PgDatabaseError>() {
            let code = pg.code();
            if code == UNIQUE_VIOLATION || code == NOT_NULL_VIOLATION || code == CHECK_VIOLATION {
                let message = pg.message().to_string();
                return BackendError::validation(message).with_cause(err);
            }
        }
    }
    match err {
        sqlx::Error::RowNotFound => BackendError::not_found("no matching row"),
        other => BackendError::network("database request failed").with_cause(other),
    }
}

#[async_trait::async_trait]
impl UserTable for PostgresUserTable {
    async fn list_by_created_desc(&self) -> Result<Vec<UserRecord>, BackendError> {
        let rows: Vec<UserRow> = sqlx::query_as(
            r#"
SELECT id, name, email, created_at
FROM users
ORDER BY created_at DESC
"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sql_error)?;

        Ok(rows.into_iter().map(UserRecord::from).collect())
    }

    async fn insert(&self, user: &NewUser) -> Result<UserRecord, BackendError> {
        let row: UserRow = sqlx::query_as(
            r#"
INSERT INTO users (name, email)
VALUES ($1, $2)
RETURNING id, name, email, created_at
"#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .fetch_one(&self.pool)
        .await
        .map_err(sql_error)?;

        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_row_maps_to_not_found() {
        assert!(matches!(
            sql_error(sqlx::Error::RowNotFound),
            BackendError::NotFound { .. }
        ));
    }

    #[test]
    fn pool_failures_are_network_errors() {
        assert!(matches!(
            sql_error(sqlx::Error::PoolTimedOut),
            BackendError::Network { .. }
        ));
    }
}
