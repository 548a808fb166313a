//! PostgreSQL document store: one `(seq, doc JSONB)` table per collection.
//!
//! Filters become JSONB containment (`doc @> $1`), which for the scalar
//! filters used here is field equality. The store is synchronous; it owns a
//! tokio runtime and blocks on every query.

use anyhow::{Context, Result};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime as PoolRuntime};
use serde_json::Value;
use tokio::runtime::Runtime;
use tokio_postgres::NoTls;

use super::{merged, Document, DocumentStore};

/// Connection parameters, resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Prepended to every collection name to form its table name.
    pub table_prefix: String,
}

impl PostgresSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct PostgresDocumentStore {
    pool: Pool,
    rt: Runtime,
    table_prefix: String,
}

impl PostgresDocumentStore {
    /// Connect and make sure a table exists for each collection.
    pub fn connect(settings: &PostgresSettings, collections: &[&str]) -> Result<Self> {
        if !settings
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            anyhow::bail!("Invalid table prefix {:?}", settings.table_prefix);
        }

        let mut cfg = Config::new();
        cfg.host = Some(settings.host.clone());
        cfg.port = Some(settings.port);
        cfg.dbname = Some(settings.database.clone());
        cfg.user = Some(settings.user.clone());
        if !settings.password.is_empty() {
            cfg.password = Some(settings.password.clone());
        }
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(PoolRuntime::Tokio1), NoTls)
            .context("Failed to create Postgres pool")?;

        // Create a runtime for bridging async/sync
        let rt = Runtime::new().context("Failed to start tokio runtime")?;

        let store = Self {
            pool,
            rt,
            table_prefix: settings.table_prefix.clone(),
        };
        store.init_schema(collections)?;
        Ok(store)
    }

    fn table(&self, collection: &str) -> String {
        format!("{}{}", self.table_prefix, collection)
    }

    fn init_schema(&self, collections: &[&str]) -> Result<()> {
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            for collection in collections {
                let table = self.table(collection);
                client
                    .batch_execute(&format!(
                        "CREATE TABLE IF NOT EXISTS {table} (
                            seq BIGSERIAL PRIMARY KEY,
                            doc JSONB NOT NULL
                        );
                        CREATE INDEX IF NOT EXISTS idx_{table}_doc ON {table} USING GIN (doc);"
                    ))
                    .await
                    .with_context(|| format!("Failed to init schema for {}", table))?;
            }
            Ok::<_, anyhow::Error>(())
        })
    }
}

fn into_document(value: Value) -> Result<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("Stored document is not an object: {}", other),
    }
}

impl DocumentStore for PostgresDocumentStore {
    fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>> {
        let table = self.table(collection);
        let sql = format!("SELECT doc FROM {table} WHERE doc @> $1 ORDER BY seq");
        let filter = Value::Object(filter.clone());
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            let rows = client
                .query(sql.as_str(), &[&filter])
                .await
                .with_context(|| format!("Failed to query {}", table))?;
            let docs = rows
                .into_iter()
                .map(|row| into_document(row.get::<_, Value>(0)))
                .collect::<Result<Vec<_>>>()?;
            Ok::<_, anyhow::Error>(docs)
        })
    }

    fn upsert(&self, collection: &str, filter: &Document, fields: &Document) -> Result<()> {
        let table = self.table(collection);
        let update = format!(
            "UPDATE {table} SET doc = doc || $2
             WHERE seq = (SELECT seq FROM {table} WHERE doc @> $1 ORDER BY seq LIMIT 1 FOR UPDATE)"
        );
        let insert = format!("INSERT INTO {table} (doc) VALUES ($1)");
        let filter_value = Value::Object(filter.clone());
        let fields_value = Value::Object(fields.clone());
        let full = Value::Object(merged(filter, fields));
        self.rt.block_on(async {
            let mut client = self.pool.get().await.context("Failed to get DB connection")?;
            let tx = client.transaction().await.context("Failed to open transaction")?;
            let updated = tx
                .execute(update.as_str(), &[&filter_value, &fields_value])
                .await
                .with_context(|| format!("Failed to update {}", table))?;
            if updated == 0 {
                tx.execute(insert.as_str(), &[&full])
                    .await
                    .with_context(|| format!("Failed to insert into {}", table))?;
            }
            tx.commit().await.context("Failed to commit upsert")?;
            Ok::<_, anyhow::Error>(())
        })
    }

    fn find_and_remove(&self, collection: &str, filter: &Document) -> Result<Option<Document>> {
        let table = self.table(collection);
        let sql = format!(
            "DELETE FROM {table}
             WHERE seq = (SELECT seq FROM {table} WHERE doc @> $1 ORDER BY seq LIMIT 1)
             RETURNING doc"
        );
        let filter = Value::Object(filter.clone());
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            let row = client
                .query_opt(sql.as_str(), &[&filter])
                .await
                .with_context(|| format!("Failed to delete from {}", table))?;
            let doc = row.map(|row| into_document(row.get::<_, Value>(0))).transpose()?;
            Ok::<_, anyhow::Error>(doc)
        })
    }

    fn insert(&self, collection: &str, document: &Document) -> Result<()> {
        let table = self.table(collection);
        let sql = format!("INSERT INTO {table} (doc) VALUES ($1)");
        let doc = Value::Object(document.clone());
        self.rt.block_on(async {
            let client = self.pool.get().await.context("Failed to get DB connection")?;
            client
                .execute(sql.as_str(), &[&doc])
                .await
                .with_context(|| format!("Failed to insert into {}", table))?;
            Ok::<_, anyhow::Error>(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unsafe_table_prefix() {
        let settings = PostgresSettings {
            host: "localhost".into(),
            port: 5432,
            database: "landclaim".into(),
            user: "postgres".into(),
            password: String::new(),
            table_prefix: "gp; DROP TABLE x; --".into(),
        };
        let err = PostgresDocumentStore::connect(&settings, &["claimdata"])
            .err()
            .expect("prefix must be rejected");
        assert!(err.to_string().contains("Invalid table prefix"));
        assert_eq!(settings.address(), "localhost:5432");
    }
}
