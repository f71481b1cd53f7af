//! PostgreSQL destination.
//!
//! Connections come from a `deadpool_postgres` pool. Each dataset is a schema,
//! each resource a table inside it with a `JSONB` data column.

use chrono::{DateTime, Utc};
use deadpool_postgres::{Config as DeadpoolConfig, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::{debug, info};

use super::{prepare_rows, quote_ident, Destination, DestinationError, LOADS_TABLE};
use crate::configs::{ConfigError, RuntimeConfig};
use crate::pipeline::{ExtractedTable, WriteDisposition};

/// Connection settings, either a full connection URL or individual fields.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PostgresCredentials {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

// Hand-written so the password never reaches a log line.
impl std::fmt::Debug for PostgresCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCredentials")
            .field("url", &self.url.as_ref().map(|_| "***"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl PostgresCredentials {
    /// Resolves the `postgres` destination credentials of `pipeline`.
    ///
    /// A whole `credentials` value is taken as a connection URL. Otherwise
    /// `host` and `database` are required and `port`, `username`, `password`
    /// are optional fields under `credentials`.
    pub fn from_config(config: &RuntimeConfig, pipeline: &str) -> Result<Self, ConfigError> {
        if let Some(url) = config.resolve_destination_credential(pipeline, "postgres", None) {
            return Ok(Self {
                url: Some(url),
                ..Self::default()
            });
        }

        let field = |name: &str| config.resolve_destination_credential(pipeline, "postgres", Some(name));
        let required = |name: &str| {
            field(name).ok_or_else(|| ConfigError::Missing {
                key: format!("destination.postgres.credentials.{}", name),
                tried: RuntimeConfig::destination_candidates(pipeline, "postgres", Some(name)),
            })
        };

        let port = field("port")
            .map(|raw| {
                raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                    key: "destination.postgres.credentials.port".to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            url: None,
            host: Some(required("host")?),
            port,
            database: Some(required("database")?),
            username: field("username"),
            password: field("password"),
        })
    }

    fn pool_config(&self) -> DeadpoolConfig {
        let mut cfg = DeadpoolConfig::new();
        cfg.url = self.url.clone();
        cfg.host = self.host.clone();
        cfg.port = self.port;
        cfg.dbname = self.database.clone();
        cfg.user = self.username.clone();
        cfg.password = self.password.clone();
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg
    }
}

/// Pooled PostgreSQL warehouse.
#[derive(Debug, Clone)]
pub struct PostgresDestination {
    pool: Pool,
}

impl PostgresDestination {
    /// Creates the pool. No connection is opened until the first load.
    pub fn new(credentials: &PostgresCredentials) -> Result<Self, DestinationError> {
        let pool = credentials
            .pool_config()
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DestinationError::Pool(e.to_string()))?;
        info!(?credentials, "PostgreSQL connection pool created");
        Ok(Self { pool })
    }

    async fn client(&self) -> Result<Object, DestinationError> {
        self.pool
            .get()
            .await
            .map_err(|e| DestinationError::Pool(e.to_string()))
    }

    fn loads_table(dataset: &str) -> String {
        format!("{}.{}", quote_ident(dataset), quote_ident(LOADS_TABLE))
    }

    async fn ensure_dataset(client: &Object, dataset: &str) -> Result<(), DestinationError> {
        client
            .batch_execute(&format!(
                "CREATE SCHEMA IF NOT EXISTS {schema};
                 CREATE TABLE IF NOT EXISTS {loads} (
                     load_id TEXT PRIMARY KEY,
                     pipeline_name TEXT NOT NULL,
                     dataset_name TEXT NOT NULL,
                     inserted_at TIMESTAMPTZ NOT NULL
                 );",
                schema = quote_ident(dataset),
                loads = Self::loads_table(dataset)
            ))
            .await?;
        Ok(())
    }
}

impl Destination for PostgresDestination {
    fn name(&self) -> &str {
        "postgres"
    }

    fn destination_type(&self) -> &str {
        "postgres"
    }

    async fn has_completed_load(&self, pipeline: &str, dataset: &str) -> Result<bool, DestinationError> {
        let client = self.client().await?;
        Self::ensure_dataset(&client, dataset).await?;
        let row = client
            .query_one(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE pipeline_name = $1 AND dataset_name = $2",
                    Self::loads_table(dataset)
                ),
                &[&pipeline, &dataset],
            )
            .await?;
        let count: i64 = row.get(0);
        Ok(count > 0)
    }

    async fn load_table(
        &self,
        dataset: &str,
        load_id: &str,
        table: &ExtractedTable,
    ) -> Result<u64, DestinationError> {
        let rows = prepare_rows(table, load_id)?;
        let name = format!("{}.{}", quote_ident(dataset), quote_ident(&table.resource.name));

        let mut client = self.client().await?;
        Self::ensure_dataset(&client, dataset).await?;

        let tx = tokio_postgres::Client::transaction(&mut client).await?;
        tx.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                 _row_key TEXT PRIMARY KEY,
                 data JSONB NOT NULL,
                 _load_id TEXT NOT NULL
             );",
            name
        ))
        .await?;
        if table.resource.write_disposition == WriteDisposition::Replace {
            tx.execute(&format!("DELETE FROM {}", name), &[]).await?;
        }
        let stmt = tx
            .prepare(&format!(
                "INSERT INTO {} (_row_key, data, _load_id) VALUES ($1, $2, $3)
                 ON CONFLICT (_row_key) DO UPDATE SET data = EXCLUDED.data, _load_id = EXCLUDED._load_id",
                name
            ))
            .await?;
        for row in &rows {
            tx.execute(&stmt, &[&row.row_key, &row.data, &load_id]).await?;
        }
        tx.commit().await?;

        debug!(table = %name, rows = rows.len(), "postgres table written");
        Ok(rows.len() as u64)
    }

    async fn complete_load(
        &self,
        pipeline: &str,
        dataset: &str,
        load_id: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<(), DestinationError> {
        let client = self.client().await?;
        Self::ensure_dataset(&client, dataset).await?;
        client
            .execute(
                &format!(
                    "INSERT INTO {} (load_id, pipeline_name, dataset_name, inserted_at) VALUES ($1, $2, $3, $4)",
                    Self::loads_table(dataset)
                ),
                &[&load_id, &pipeline, &dataset, &finished_at],
            )
            .await?;
        Ok(())
    }
}
