//! Environment configuration for choosing and opening an event store.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::info;

use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;
use chronicle_core::serializer::JsonSerializer;
use chronicle_core::store::{EventStore, InMemoryEventStore};

use crate::file::FileEventStore;
use crate::pg_event_store::{DEFAULT_PAGE_SIZE, PgEventStore};

const MAX_CONNECTIONS: u32 = 10;

/// Invalid store configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric variable did not parse as a positive integer.
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber {
        /// The variable name.
        name: &'static str,
        /// The raw value found.
        value: String,
    },

    /// A variable was set to an empty or blank string.
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Which store [`open_event_store`] builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// A [`PgEventStore`] on a new connection pool.
    Postgres {
        /// Connection string passed to `PgPoolOptions::connect`.
        database_url: String,
    },
    /// A [`FileEventStore`] over one JSON file.
    File {
        /// The event file, created if missing.
        path: PathBuf,
    },
    /// An [`InMemoryEventStore`]; nothing survives the process.
    InMemory,
}

/// Event store settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// `DATABASE_URL`; selects Postgres when set.
    pub database_url: Option<String>,
    /// `EVENT_STORE_FILE`; selects the file store when no database is set.
    pub file: Option<PathBuf>,
    /// `EVENT_STORE_PAGE_SIZE`; rows per Postgres page query.
    pub page_size: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            file: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl StoreConfig {
    /// Reads `DATABASE_URL`, `EVENT_STORE_FILE` and `EVENT_STORE_PAGE_SIZE`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the same variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = non_empty(lookup("DATABASE_URL"), "DATABASE_URL")?;
        let file = non_empty(lookup("EVENT_STORE_FILE"), "EVENT_STORE_FILE")?.map(PathBuf::from);
        let page_size = match lookup("EVENT_STORE_PAGE_SIZE") {
            None => DEFAULT_PAGE_SIZE,
            Some(value) => match value.trim().parse::<i64>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::InvalidNumber {
                        name: "EVENT_STORE_PAGE_SIZE",
                        value,
                    });
                }
            },
        };
        Ok(Self {
            database_url,
            file,
            page_size,
        })
    }

    /// Postgres wins over a file path; with neither, events stay in memory.
    #[must_use]
    pub fn backend(&self) -> Backend {
        match (&self.database_url, &self.file) {
            (Some(database_url), _) => Backend::Postgres {
                database_url: database_url.clone(),
            },
            (None, Some(path)) => Backend::File { path: path.clone() },
            (None, None) => Backend::InMemory,
        }
    }
}

fn non_empty(value: Option<String>, name: &'static str) -> Result<Option<String>, ConfigError> {
    match value {
        Some(value) if value.trim().is_empty() => Err(ConfigError::Empty(name)),
        other => Ok(other),
    }
}

/// Opens the store selected by `config`, serializing with JSON.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the database or file cannot be
/// reached, or any error from opening the file store.
pub async fn open_event_store<E>(config: &StoreConfig) -> Result<Arc<dyn EventStore<E>>, DomainError>
where
    E: DomainEvent + Serialize + DeserializeOwned,
{
    match config.backend() {
        Backend::Postgres { database_url } => {
            let pool = PgPoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .connect(&database_url)
                .await
                .map_err(|e| DomainError::Infrastructure(format!("database connection failed: {e}")))?;
            let store = PgEventStore::<E, _>::new(pool, JsonSerializer).with_page_size(config.page_size);
            store.ensure_schema().await?;
            info!(page_size = config.page_size, "using postgres event store");
            Ok(Arc::new(store))
        }
        Backend::File { path } => {
            let store = FileEventStore::<E, _>::open(&path, JsonSerializer).await?;
            info!(path = %path.display(), "using file event store");
            Ok(Arc::new(store))
        }
        Backend::InMemory => {
            info!("using in-memory event store");
            Ok(Arc::new(InMemoryEventStore::<E>::new()))
        }
    }
}
