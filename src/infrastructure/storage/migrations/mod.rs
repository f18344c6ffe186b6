//! Versioned schema migrations for the identity tables

use sqlx::postgres::PgPool;
use tracing::info;

use crate::domain::DomainError;

/// A schema migration
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: String,
    pub sql: String,
}

impl Migration {
    pub fn new(
        version: i64,
        description: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            version,
            description: description.into(),
            sql: sql.into(),
        }
    }
}

/// Applies migrations, recording each applied version in `_identity_migrations`
#[derive(Debug, Clone)]
pub struct PostgresMigrator {
    pool: PgPool,
}

impl PostgresMigrator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_history_table(&self) -> Result<(), DomainError> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS _identity_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT NOT NULL,
                installed_on TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to create migration history: {}", e)))?;

        Ok(())
    }

    /// Latest applied version, if any
    pub async fn current_version(&self) -> Result<Option<i64>, DomainError> {
        self.ensure_history_table().await?;

        sqlx::query_scalar("SELECT MAX(version) FROM _identity_migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to read migration version: {}", e)))
    }

    /// Apply every migration newer than the current version, each in its own transaction
    pub async fn migrate(&self, migrations: &[Migration]) -> Result<usize, DomainError> {
        let current = self.current_version().await?.unwrap_or(0);
        let mut applied = 0;

        for migration in migrations.iter().filter(|m| m.version > current) {
            let mut tx = self.pool.begin().await.map_err(|e| {
                DomainError::storage(format!("Failed to begin migration transaction: {}", e))
            })?;

            sqlx::raw_sql(&migration.sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    DomainError::storage(format!(
                        "Failed to apply migration {}: {}",
                        migration.version, e
                    ))
                })?;

            sqlx::query("INSERT INTO _identity_migrations (version, description) VALUES ($1, $2)")
                .bind(migration.version)
                .bind(&migration.description)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    DomainError::storage(format!(
                        "Failed to record migration {}: {}",
                        migration.version, e
                    ))
                })?;

            tx.commit().await.map_err(|e| {
                DomainError::storage(format!("Failed to commit migration: {}", e))
            })?;

            info!(
                version = migration.version,
                description = %migration.description,
                "Applied migration"
            );
            applied += 1;
        }

        Ok(applied)
    }
}

/// Schema of the identity store
pub fn identity_migrations() -> Vec<Migration> {
    vec![
        Migration::new(
            1,
            "Create identity users",
            r#"
            CREATE TABLE IF NOT EXISTS identity_users (
                id VARCHAR(255) PRIMARY KEY,
                user_name VARCHAR(256),
                normalized_user_name VARCHAR(256),
                email VARCHAR(256),
                normalized_email VARCHAR(256),
                email_confirmed BOOLEAN NOT NULL DEFAULT FALSE,
                password_hash TEXT,
                security_stamp TEXT,
                concurrency_stamp VARCHAR(64) NOT NULL,
                lockout_enabled BOOLEAN NOT NULL DEFAULT FALSE,
                lockout_end TIMESTAMPTZ
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_identity_users_normalized_user_name
                ON identity_users(normalized_user_name);
            CREATE INDEX IF NOT EXISTS ix_identity_users_normalized_email
                ON identity_users(normalized_email);
            "#,
        ),
        Migration::new(
            2,
            "Create identity roles",
            r#"
            CREATE TABLE IF NOT EXISTS identity_roles (
                id VARCHAR(255) PRIMARY KEY,
                name VARCHAR(256) NOT NULL,
                normalized_name VARCHAR(256) NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS ux_identity_roles_normalized_name
                ON identity_roles(normalized_name);
            "#,
        ),
        Migration::new(
            3,
            "Create identity user logins and roles",
            r#"
            CREATE TABLE IF NOT EXISTS identity_user_logins (
                login_provider VARCHAR(128) NOT NULL,
                provider_key VARCHAR(128) NOT NULL,
                provider_display_name TEXT,
                user_id VARCHAR(255) NOT NULL REFERENCES identity_users(id) ON DELETE CASCADE,
                PRIMARY KEY (login_provider, provider_key)
            );
            CREATE INDEX IF NOT EXISTS ix_identity_user_logins_user_id
                ON identity_user_logins(user_id);
            CREATE TABLE IF NOT EXISTS identity_user_roles (
                user_id VARCHAR(255) NOT NULL REFERENCES identity_users(id) ON DELETE CASCADE,
                role_id VARCHAR(255) NOT NULL REFERENCES identity_roles(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, role_id)
            );
            CREATE INDEX IF NOT EXISTS ix_identity_user_roles_role_id
                ON identity_user_roles(role_id);
            "#,
        ),
    ]
}

/// Bring the identity schema up to date
pub async fn run_identity_migrations(pool: &PgPool) -> Result<usize, DomainError> {
    PostgresMigrator::new(pool.clone())
        .migrate(&identity_migrations())
        .await
}
