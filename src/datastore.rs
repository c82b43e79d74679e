use crate::errors::{HarnessError, HarnessResult};
use async_trait::async_trait;
use itertools::Itertools;
use sea_orm::{ConnectOptions, ConnectionTrait, Database};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_TABLES: [&str; 3] = ["users", "products", "orders"];
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Puts the datastore shared by the benchmarked services back into a known state.
#[async_trait]
pub trait StateReset: Send + Sync {
    async fn reset(&self) -> HarnessResult<()>;
}

/// Leaves the datastore untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReset;

#[async_trait]
impl StateReset for NoopReset {
    async fn reset(&self) -> HarnessResult<()> {
        debug!("skipping datastore reset");
        Ok(())
    }
}

/// Truncates the experiment tables of a Postgres database and restarts their identity sequences.
#[derive(Debug, Clone)]
pub struct PostgresReset {
    url: String,
    tables: Vec<String>,
}
impl PostgresReset {
    pub fn new(url: &str, tables: &[String]) -> HarnessResult<Self> {
        if tables.is_empty() {
            return Err(HarnessError::Config(
                "at least one table must be reset".to_string(),
            ));
        }
        if let Some(bad) = tables.iter().find(|t| !is_identifier(t)) {
            return Err(HarnessError::Config(format!(
                "'{bad}' is not a valid table name"
            )));
        }

        Ok(Self {
            url: url.to_string(),
            tables: tables.to_vec(),
        })
    }

    /// Reads `DATABASE_URL`, or assembles a url from the `POSTGRES_*` variables. `.env` files are
    /// honoured.
    pub fn from_env(tables: &[String]) -> HarnessResult<Self> {
        let url = database_url(|key| dotenvy::var(key).ok())?;
        Self::new(&url, tables)
    }

    pub fn truncate_statement(&self) -> String {
        format!(
            "TRUNCATE TABLE {} RESTART IDENTITY CASCADE",
            self.tables.iter().join(", ")
        )
    }
}

#[async_trait]
impl StateReset for PostgresReset {
    async fn reset(&self) -> HarnessResult<()> {
        let fail = |err: sea_orm::DbErr| HarnessError::DatastoreResetFailure(err.to_string());

        let mut opts = ConnectOptions::new(self.url.clone());
        opts.connect_timeout(CONNECT_TIMEOUT)
            .acquire_timeout(CONNECT_TIMEOUT)
            .max_connections(1)
            .sqlx_logging(false);

        let db = Database::connect(opts).await.map_err(fail)?;
        db.execute_unprepared(&self.truncate_statement())
            .await
            .map_err(fail)?;
        db.close().await.map_err(fail)?;

        info!("Reset tables {}", self.tables.iter().join(", "));
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Resolves the connection url from the given variable lookup.
pub fn database_url(lookup: impl Fn(&str) -> Option<String>) -> HarnessResult<String> {
    if let Some(url) = lookup("DATABASE_URL") {
        return Ok(url);
    }

    let vars = [
        "POSTGRES_USER",
        "POSTGRES_PASSWORD",
        "POSTGRES_HOST",
        "POSTGRES_PORT",
        "POSTGRES_DB",
    ]
    .map(|key| lookup(key).filter(|v| !v.is_empty()).ok_or(key));

    match vars {
        [Ok(user), Ok(password), Ok(host), Ok(port), Ok(db)] => Ok(format!(
            "postgres://{user}:{password}@{host}:{port}/{db}"
        )),
        _ => {
            let missing = vars.iter().filter_map(|v| v.as_ref().err()).join(", ");
            Err(HarnessError::Config(format!(
                "DATABASE_URL is not set and {missing} missing"
            )))
        }
    }
}
