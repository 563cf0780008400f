//! Query abstractions and the query bus.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, instrument};

use crate::error::DomainError;

/// A request for data with a typed answer.
pub trait Query: Send + Sync + fmt::Debug + 'static {
    /// The type name for this query (for logging/routing).
    const QUERY_TYPE: &'static str;

    /// What the handler returns.
    type Output: Send + 'static;
}

/// Answers one kind of query.
#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    /// Answers `query`.
    async fn handle(&self, query: Q) -> Result<Q::Output, DomainError>;
}

type Answer = Box<dyn Any + Send>;

type ErasedQueryHandler =
    Arc<dyn Fn(Box<dyn Any + Send>) -> BoxFuture<'static, Result<Answer, DomainError>> + Send + Sync>;

/// Routes each query to the single handler registered for its type.
#[derive(Default)]
pub struct SimpleQueryBus {
    handlers: RwLock<HashMap<&'static str, (&'static str, ErasedQueryHandler)>>,
}

impl SimpleQueryBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for queries of type `Q`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerAlreadyRegistered` if `Q` already has a
    /// handler.
    pub fn register<Q, H>(&self, handler: Arc<H>) -> Result<(), DomainError>
    where
        Q: Query,
        H: QueryHandler<Q> + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(Q::QUERY_TYPE) {
            return Err(DomainError::HandlerAlreadyRegistered {
                message_type: Q::QUERY_TYPE.to_owned(),
                handler: type_name::<H>().to_owned(),
            });
        }
        let call: ErasedQueryHandler = Arc::new(
            move |query: Box<dyn Any + Send>| -> BoxFuture<'static, Result<Answer, DomainError>> {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let query = query.downcast::<Q>().map_err(|_| mismatch(Q::QUERY_TYPE))?;
                    let output = handler.handle(*query).await?;
                    Ok(Box::new(output) as Answer)
                })
            },
        );
        handlers.insert(Q::QUERY_TYPE, (type_name::<H>(), call));
        debug!(query_type = Q::QUERY_TYPE, "registered query handler");
        Ok(())
    }

    /// Sends `query` to its handler and returns the answer.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerNotRegistered` if no handler exists for
    /// `Q`, otherwise whatever the handler returns.
    #[instrument(skip(self, query), fields(query_type = Q::QUERY_TYPE))]
    pub async fn dispatch<Q: Query>(&self, query: Q) -> Result<Q::Output, DomainError> {
        let call = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(Q::QUERY_TYPE)
            .map(|(_, call)| Arc::clone(call))
            .ok_or_else(|| DomainError::HandlerNotRegistered(Q::QUERY_TYPE.to_owned()))?;
        let answer = call(Box::new(query)).await?;
        answer
            .downcast::<Q::Output>()
            .map(|output| *output)
            .map_err(|_| mismatch(Q::QUERY_TYPE))
    }
}

fn mismatch(query_type: &str) -> DomainError {
    DomainError::Infrastructure(format!("query routed to the wrong handler: {query_type}"))
}

impl fmt::Debug for SimpleQueryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_map()
            .entries(handlers.iter().map(|(query, (handler, _))| (query, handler)))
            .finish()
    }
}
