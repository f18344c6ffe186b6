//! Storage plumbing: connection pooling and schema migrations

pub mod migrations;
mod postgres;

pub use migrations::{identity_migrations, run_identity_migrations, Migration, PostgresMigrator};
pub use postgres::PostgresConfig;
