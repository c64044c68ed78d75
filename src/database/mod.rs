//! Postgres connection pool, schema migrations and the startup schema check.

pub mod pool;

pub use pool::{
    create_pool, missing_tables, run_migrations, verify_schema, DatabaseError, MIGRATIONS_DIR,
    WALLET_TABLES,
};
