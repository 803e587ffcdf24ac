//! Users and login sessions

use chrono::{DateTime, Utc};
use grc_core::UserRole;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{found, stale_or_missing, DbError, WithTotal};
use crate::models::{Paginated, Pagination};

const USER_COLUMNS: &str = "id, email, first_name, last_name, department, job_title, role, \
     is_active, last_login_at, created_at, updated_at, row_version";

const SESSION_USER_COLUMNS: &str = "u.id, u.email, u.first_name, u.last_name, u.department, \
     u.job_title, u.role, u.is_active, u.last_login_at, u.created_at, u.updated_at, u.row_version";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub department: Option<String>,
    pub job_title: Option<String>,
    #[sqlx(try_from = "String")]
    pub role: UserRole,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub row_version: i32,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(FromRow)]
struct LoginRow {
    #[sqlx(flatten)]
    user: User,
    password_hash: String,
}

/// Validated fields for a new account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub role: UserRole,
    pub password_hash: String,
}

/// Editable profile fields.
#[derive(Debug, Clone)]
pub struct UserUpdate {
    pub first_name: String,
    pub last_name: String,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub role: UserRole,
}

pub struct UserRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> UserRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewUser) -> Result<User, DbError> {
        let sql = format!(
            r#"
            INSERT INTO users (email, first_name, last_name, department, job_title, role, password_hash)
            VALUES (LOWER($1), $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&new.email)
            .bind(&new.first_name)
            .bind(&new.last_name)
            .bind(&new.department)
            .bind(&new.job_title)
            .bind(new.role.as_str())
            .bind(&new.password_hash)
            .fetch_one(self.pool)
            .await
            .map_err(|e| DbError::classify(e, "user", new.email))
    }

    pub async fn get(&self, id: Uuid) -> Result<User, DbError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        found(row, "user", id)
    }

    /// User and password hash for a login attempt, matched case-insensitively.
    pub async fn find_for_login(&self, email: &str) -> Result<Option<(User, String)>, DbError> {
        let sql = format!(
            "SELECT {}, password_hash FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLUMNS
        );
        let row = sqlx::query_as::<_, LoginRow>(&sql)
            .bind(email.trim())
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(|r| (r.user, r.password_hash)))
    }

    pub async fn list(&self, search: Option<&str>, page: Pagination) -> Result<Paginated<User>, DbError> {
        let sql = format!(
            r#"
            SELECT {}, COUNT(*) OVER() AS total
            FROM users
            WHERE ($1::text IS NULL
                   OR email ILIKE $1 OR first_name ILIKE $1 OR last_name ILIKE $1)
            ORDER BY last_name, first_name
            LIMIT $2 OFFSET $3
            "#,
            USER_COLUMNS
        );
        let rows: Vec<WithTotal<User>> = sqlx::query_as(&sql)
            .bind(search.map(super::like_pattern))
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(self.pool)
            .await?;
        Ok(WithTotal::paginate(rows, page))
    }

    pub async fn update(&self, id: Uuid, row_version: i32, update: UserUpdate) -> Result<User, DbError> {
        let sql = format!(
            r#"
            UPDATE users
            SET first_name = $3, last_name = $4, department = $5, job_title = $6, role = $7,
                updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1 AND row_version = $2
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(row_version)
            .bind(&update.first_name)
            .bind(&update.last_name)
            .bind(&update.department)
            .bind(&update.job_title)
            .bind(update.role.as_str())
            .fetch_optional(self.pool)
            .await?;
        match row {
            Some(user) => Ok(user),
            None => Err(stale_or_missing(self.pool, "users", "user", id).await),
        }
    }

    /// Activating or deactivating also ends the user's sessions when deactivated.
    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<User, DbError> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            r#"
            UPDATE users
            SET is_active = $2, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(active)
            .fetch_optional(&mut *tx)
            .await?;
        let user = found(user, "user", id)?;

        if !active {
            sqlx::query("DELETE FROM sessions WHERE user_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(user)
    }

    pub async fn set_password(&self, id: Uuid, password_hash: &str) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, updated_at = NOW(), row_version = row_version + 1
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("user", id));
        }
        Ok(())
    }

    pub async fn record_login(&self, id: Uuid) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_admins(&self) -> Result<i64, DbError> {
        let n = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'Admin' AND is_active")
            .fetch_one(self.pool)
            .await?;
        Ok(n)
    }
}

/// Bearer sessions, stored by SHA-256 digest of the token.
pub struct SessionRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> SessionRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query("INSERT INTO sessions (token_hash, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(token_hash)
            .bind(user_id)
            .bind(expires_at)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Active user owning an unexpired session.
    pub async fn find_user(&self, token_hash: &str) -> Result<Option<User>, DbError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token_hash = $1 AND s.expires_at > NOW() AND u.is_active
            "#,
            SESSION_USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(token_hash)
            .fetch_optional(self.pool)
            .await?;
        Ok(user)
    }

    pub async fn delete(&self, token_hash: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn purge_expired(&self) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grc_core::UserRole;

    async fn pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = crate::db::create_pool(&url).await.expect("pool");
        crate::db::run_migrations(&pool).await.expect("migrations");
        pool
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            first_name: "Test".into(),
            last_name: "User".into(),
            department: None,
            job_title: None,
            role: UserRole::GrcUser,
            password_hash: "not-a-real-hash".into(),
        }
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn duplicate_email_is_case_insensitive() {
        let pool = pool().await;
        let repo = UserRepo::new(&pool);
        let email = format!("dup-{}@example.com", Uuid::new_v4());

        repo.create(new_user(&email)).await.expect("first insert");
        let err = repo.create(new_user(&email.to_uppercase())).await.unwrap_err();
        assert!(matches!(err, DbError::Duplicate { .. }));
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn stale_update_conflicts() {
        let pool = pool().await;
        let repo = UserRepo::new(&pool);
        let user = repo
            .create(new_user(&format!("v-{}@example.com", Uuid::new_v4())))
            .await
            .unwrap();

        let update = UserUpdate {
            first_name: "New".into(),
            last_name: "Name".into(),
            department: None,
            job_title: None,
            role: UserRole::ItUser,
        };
        let updated = repo.update(user.id, user.row_version, update.clone()).await.unwrap();
        assert_eq!(updated.row_version, user.row_version + 1);

        let err = repo.update(user.id, user.row_version, update).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict { .. }));
    }
}
