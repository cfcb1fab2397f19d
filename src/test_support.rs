//! Ephemeral PostgreSQL databases and fixtures for integration tests.

use sqlx::PgPool;

pub use database::{TestDatabase, TestDatabaseError};

/// Convenience helpers for creating and inspecting load targets in tests.
pub struct TestFixtures<'a> {
    pool: &'a PgPool,
}

impl<'a> TestFixtures<'a> {
    /// Create a fixture helper bound to the provided pool.
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Create `example_table(id integer primary key, description text)`.
    pub async fn create_example_table(&self, schema: Option<&str>) -> Result<(), sqlx::Error> {
        if let Some(schema) = schema {
            sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", schema))
                .execute(self.pool)
                .await?;
        }

        sqlx::query(&format!(
            "CREATE TABLE {} (id integer PRIMARY KEY, description text)",
            qualified("example_table", schema)
        ))
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// All `(id, description)` rows of `example_table`, ordered by id.
    pub async fn example_rows(
        &self,
        schema: Option<&str>,
    ) -> Result<Vec<(i32, Option<String>)>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT id, description FROM {} ORDER BY id",
            qualified("example_table", schema)
        ))
        .fetch_all(self.pool)
        .await
    }

    /// Number of temporary staging tables visible to any session.
    pub async fn staging_table_count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM pg_class WHERE relpersistence = 't' AND relname LIKE 'staging\\_%'",
        )
        .fetch_one(self.pool)
        .await
    }
}

fn qualified(table: &str, schema: Option<&str>) -> String {
    match schema {
        Some(schema) => format!("\"{}\".\"{}\"", schema, table),
        None => format!("\"{}\"", table),
    }
}

pub mod database {
    use log::LevelFilter;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use sqlx::{ConnectOptions, PgPool};
    use testcontainers::ImageExt;
    use testcontainers_modules::postgres::Postgres;
    use testcontainers_modules::testcontainers::{
        ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
    };
    use thiserror::Error;
    use tokio::runtime::Handle;
    use uuid::Uuid;

    #[derive(Debug, Error)]
    pub enum TestDatabaseError {
        #[error("database error: {0}")]
        Sqlx(#[from] sqlx::Error),
        #[error("container error: {0}")]
        Container(#[from] TestcontainersError),
    }

    /// Ephemeral database factory for integration tests.
    pub struct TestDatabase {
        pool: Option<PgPool>,
        admin_options: PgConnectOptions,
        database_name: String,
        container: Option<ContainerAsync<Postgres>>,
    }

    impl TestDatabase {
        /// Provision a fresh database on the server named by `TEST_DATABASE_URL`,
        /// or in a disposable container when the variable is unset.
        pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
            match std::env::var("TEST_DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
            {
                Some(url) => Self::provision(&url, None).await,
                None => Self::new().await,
            }
        }

        /// Provision a fresh database by launching a disposable Postgres container.
        pub async fn new() -> Result<Self, TestDatabaseError> {
            let container = Postgres::default().with_tag("16-alpine").start().await?;

            let host = container.get_host().await?.to_string();
            let port = container.get_host_port_ipv4(5432).await?;
            let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            Self::provision(&admin_url, Some(container)).await
        }

        async fn provision(
            admin_url: &str,
            container: Option<ContainerAsync<Postgres>>,
        ) -> Result<Self, TestDatabaseError> {
            let base_options: PgConnectOptions = admin_url.parse().map_err(TestDatabaseError::Sqlx)?;
            let base_options = base_options.log_statements(LevelFilter::Off);

            let base_name = base_options
                .get_database()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "postgres".to_string());

            let admin_options = base_options.clone();
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options.clone())
                .await
                .map_err(TestDatabaseError::Sqlx)?;

            let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
            let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
            sqlx::query(&create_sql)
                .execute(&admin_pool)
                .await
                .map_err(TestDatabaseError::Sqlx)?;
            admin_pool.close().await;

            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect_with(base_options.database(&new_db_name))
                .await
                .map_err(TestDatabaseError::Sqlx)?;

            Ok(Self {
                pool: Some(pool),
                admin_options,
                database_name: new_db_name,
                container,
            })
        }

        /// Cloneable connection pool for use in tests.
        pub fn pool(&self) -> &PgPool {
            self.pool.as_ref().expect("test database pool is available")
        }

        /// Convenience method returning a clone of the pooled connection handle.
        pub fn pool_clone(&self) -> PgPool {
            self.pool().clone()
        }

        /// Close pool connections and drop the ephemeral database.
        pub async fn close(mut self) -> Result<(), TestDatabaseError> {
            if let Some(pool) = self.pool.take() {
                pool.close().await;
            }

            drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                .await
                .map_err(TestDatabaseError::Sqlx)?;

            if let Some(container) = self.container.take() {
                drop(container);
            }

            Ok(())
        }
    }

    async fn drop_database_with_fallback(
        admin_options: PgConnectOptions,
        database_name: &str,
    ) -> Result<(), sqlx::Error> {
        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(admin_options)
            .await?;

        let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
        match sqlx::query(&drop_force).execute(&admin_pool).await {
            Ok(_) => Ok(()),
            Err(err) if force_drop_unsupported(&err) => {
                let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                sqlx::query(&drop_sql).execute(&admin_pool).await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn force_drop_unsupported(err: &sqlx::Error) -> bool {
        matches!(
            err,
            sqlx::Error::Database(db_err)
                if db_err
                    .code()
                    .map(|code| code == "42601" || code == "0A000")
                    .unwrap_or(false)
        )
    }

    impl Drop for TestDatabase {
        fn drop(&mut self) {
            if let Some(pool) = self.pool.take() {
                let admin_options = self.admin_options.clone();
                let db_name = self.database_name.clone();
                if let Ok(handle) = Handle::try_current() {
                    handle.spawn(async move {
                        pool.close().await;
                        let _ = drop_database_with_fallback(admin_options, &db_name).await;
                    });
                } else {
                    std::thread::spawn(move || {
                        if let Ok(rt) = tokio::runtime::Runtime::new() {
                            rt.block_on(async move {
                                pool.close().await;
                                let _ = drop_database_with_fallback(admin_options, &db_name).await;
                            });
                        }
                    });
                }
            }

            if let Some(container) = self.container.take() {
                drop(container);
            }
        }
    }
}
