//! Command abstractions and the command bus.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, instrument};

use crate::error::DomainError;

/// Trait that all commands implement.
pub trait Command: Send + Sync + fmt::Debug + 'static {
    /// The type name for this command (for logging/routing).
    const COMMAND_TYPE: &'static str;
}

/// Executes one kind of command.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    /// Handles `command`.
    async fn handle(&self, command: C) -> Result<(), DomainError>;
}

type ErasedCommandHandler =
    Arc<dyn Fn(Box<dyn Any + Send>) -> BoxFuture<'static, Result<(), DomainError>> + Send + Sync>;

struct Registration {
    handler: &'static str,
    call: ErasedCommandHandler,
}

/// Routes each command to the single handler registered for its type.
#[derive(Default)]
pub struct SimpleCommandBus {
    handlers: RwLock<HashMap<&'static str, Registration>>,
}

impl SimpleCommandBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for commands of type `C`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerAlreadyRegistered` if `C` already has a
    /// handler.
    pub fn register<C, H>(&self, handler: Arc<H>) -> Result<(), DomainError>
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(C::COMMAND_TYPE) {
            return Err(DomainError::HandlerAlreadyRegistered {
                message_type: C::COMMAND_TYPE.to_owned(),
                handler: type_name::<H>().to_owned(),
            });
        }
        let call: ErasedCommandHandler = Arc::new(
            move |command: Box<dyn Any + Send>| -> BoxFuture<'static, Result<(), DomainError>> {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let command = command.downcast::<C>().map_err(|_| {
                        DomainError::Infrastructure(format!(
                            "command routed to the wrong handler: {}",
                            C::COMMAND_TYPE
                        ))
                    })?;
                    handler.handle(*command).await
                })
            },
        );
        handlers.insert(
            C::COMMAND_TYPE,
            Registration {
                handler: type_name::<H>(),
                call,
            },
        );
        debug!(command_type = C::COMMAND_TYPE, "registered command handler");
        Ok(())
    }

    /// Dispatches `command` to its handler.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerNotRegistered` if no handler exists for
    /// `C`, otherwise whatever the handler returns.
    #[instrument(skip(self, command), fields(command_type = C::COMMAND_TYPE))]
    pub async fn dispatch<C: Command>(&self, command: C) -> Result<(), DomainError> {
        let call = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(C::COMMAND_TYPE)
            .map(|registration| Arc::clone(&registration.call))
            .ok_or_else(|| DomainError::HandlerNotRegistered(C::COMMAND_TYPE.to_owned()))?;
        call(Box::new(command)).await
    }
}

impl fmt::Debug for SimpleCommandBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_map()
            .entries(handlers.iter().map(|(command, r)| (command, r.handler)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug)]
    struct Rename {
        name: String,
    }

    impl Command for Rename {
        const COMMAND_TYPE: &'static str = "test.rename";
    }

    #[derive(Debug)]
    struct Delete;

    impl Command for Delete {
        const COMMAND_TYPE: &'static str = "test.delete";
    }

    #[derive(Default)]
    struct Names {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandHandler<Rename> for Names {
        async fn handle(&self, command: Rename) -> Result<(), DomainError> {
            if command.name.is_empty() {
                return Err(DomainError::Validation("name must not be empty".into()));
            }
            self.seen.lock().unwrap().push(command.name);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_registered_handler() {
        // Arrange
        let bus = SimpleCommandBus::new();
        let handler = Arc::new(Names::default());
        bus.register::<Rename, _>(Arc::clone(&handler)).unwrap();

        // Act
        bus.dispatch(Rename { name: "x".into() }).await.unwrap();

        // Assert
        assert_eq!(*handler.seen.lock().unwrap(), vec!["x".to_owned()]);
    }

    #[tokio::test]
    async fn test_dispatch_returns_handler_error() {
        let bus = SimpleCommandBus::new();
        bus.register::<Rename, _>(Arc::new(Names::default())).unwrap();

        let result = bus.dispatch(Rename { name: String::new() }).await;

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_dispatch_without_handler_fails() {
        let bus = SimpleCommandBus::new();

        let result = bus.dispatch(Delete).await;

        assert!(matches!(
            result,
            Err(DomainError::HandlerNotRegistered(name)) if name == "test.delete"
        ));
    }

    #[test]
    fn test_second_registration_for_same_command_fails() {
        let bus = SimpleCommandBus::new();
        bus.register::<Rename, _>(Arc::new(Names::default())).unwrap();

        let result = bus.register::<Rename, _>(Arc::new(Names::default()));

        assert!(matches!(
            result,
            Err(DomainError::HandlerAlreadyRegistered { message_type, .. }) if message_type == "test.rename"
        ));
    }
}
