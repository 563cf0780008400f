//! Read models and their repositories.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::identity::Identity;

/// A projection kept up to date by event listeners.
pub trait ReadModel: Clone + Send + Sync + 'static {
    /// Returns the key the model is stored under.
    fn id(&self) -> &Identity;
}

/// Predicate used by [`ReadModelRepository::find_by`].
pub type Predicate<'a, M> = &'a (dyn Fn(&M) -> bool + Send + Sync);

/// Keyed storage for read models. Saving overwrites any model with the same id.
#[async_trait]
pub trait ReadModelRepository<M: ReadModel>: Send + Sync {
    /// Stores `model`, replacing any previous one with the same id.
    async fn save(&self, model: M) -> Result<(), DomainError>;

    /// Returns `true` if a model is stored under `id`.
    async fn has(&self, id: &Identity) -> Result<bool, DomainError>;

    /// Returns the model stored under `id`, if any.
    async fn find(&self, id: &Identity) -> Result<Option<M>, DomainError>;

    /// Returns the model stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ModelNotFound` if nothing is stored under `id`.
    async fn get(&self, id: &Identity) -> Result<M, DomainError> {
        self.find(id)
            .await?
            .ok_or_else(|| DomainError::ModelNotFound(id.clone()))
    }

    /// Returns every stored model.
    async fn find_all(&self) -> Result<Vec<M>, DomainError>;

    /// Returns every stored model matching `predicate`.
    async fn find_by(&self, predicate: Predicate<'_, M>) -> Result<Vec<M>, DomainError>;

    /// Removes the model stored under `id`; absent ids are ignored.
    async fn remove(&self, id: &Identity) -> Result<(), DomainError>;
}

/// Read model repository kept in memory, ordered by id.
pub struct InMemoryReadModelRepository<M> {
    models: RwLock<BTreeMap<Identity, M>>,
}

impl<M> InMemoryReadModelRepository<M> {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            models: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<M> Default for InMemoryReadModelRepository<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for InMemoryReadModelRepository<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InMemoryReadModelRepository")
            .field("models", &models.len())
            .finish()
    }
}

#[async_trait]
impl<M: ReadModel> ReadModelRepository<M> for InMemoryReadModelRepository<M> {
    async fn save(&self, model: M) -> Result<(), DomainError> {
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.id().clone(), model);
        Ok(())
    }

    async fn has(&self, id: &Identity) -> Result<bool, DomainError> {
        Ok(self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id))
    }

    async fn find(&self, id: &Identity) -> Result<Option<M>, DomainError> {
        Ok(self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn find_all(&self) -> Result<Vec<M>, DomainError> {
        Ok(self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn find_by(&self, predicate: Predicate<'_, M>) -> Result<Vec<M>, DomainError> {
        Ok(self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|model| predicate(model))
            .cloned()
            .collect())
    }

    async fn remove(&self, id: &Identity) -> Result<(), DomainError> {
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        Ok(())
    }
}

/// Read model wrapping an arbitrary serializable payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobReadModel<T> {
    /// Key of the model.
    pub id: Identity,
    /// The stored value.
    pub payload: T,
}

impl<T> BlobReadModel<T> {
    /// Wraps `payload` under `id`.
    #[must_use]
    pub fn new(id: Identity, payload: T) -> Self {
        Self { id, payload }
    }
}

impl<T: Clone + Send + Sync + 'static> ReadModel for BlobReadModel<T> {
    fn id(&self) -> &Identity {
        &self.id
    }
}
