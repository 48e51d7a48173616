//! Command registry for dispatching calls by command name.
//!
//! The registry maps command names to their [`CommandSchema`] and, for
//! commands this side answers, a [`Handler`]. Commands may also be declared
//! without a handler so the local side can call them on the peer.
//!
//! # Example
//!
//! ```
//! use ampwire::codec::{Fields, Schema, ValueType};
//! use ampwire::handler::{CommandRegistry, CommandSchema};
//!
//! let mut registry = CommandRegistry::new();
//! let echo = CommandSchema::new(
//!     "Echo",
//!     Schema::new().field("s", ValueType::Text),
//!     Schema::new().field("s", ValueType::Text),
//! );
//!
//! registry
//!     .register(echo, |args: Fields, _ctx| async move { Ok(args.into()) })
//!     .unwrap();
//! assert!(registry.schema("Echo").is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use super::CallContext;
use crate::codec::{Fields, Schema};
use crate::error::{AmpError, Result};
use crate::protocol::{error_codes, Message};

/// Immutable definition of a command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSchema {
    /// Command name, unique within a registry.
    pub name: String,
    /// Declared call arguments.
    pub arguments: Schema,
    /// Declared response fields.
    pub response: Schema,
}

impl CommandSchema {
    /// Create a command schema.
    pub fn new(name: &str, arguments: Schema, response: Schema) -> Self {
        Self {
            name: name.to_string(),
            arguments,
            response,
        }
    }

    /// Check the name and both field declarations.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(AmpError::SchemaViolation(
                "command names must not be empty".to_string(),
            ));
        }
        self.arguments.validate()?;
        self.response.validate()
    }
}

/// Callback receiving the outcome of a follow-up call.
pub type ReplyHook = Box<dyn FnOnce(Result<Fields>) + Send + 'static>;

/// What to do once a reply has been queued.
pub enum FollowUp {
    /// Issue a call to the peer without blocking the handler.
    Call {
        /// Command to call.
        command: String,
        /// Call arguments.
        arguments: Fields,
        /// Receives the call's outcome; when absent the outcome is only logged.
        on_reply: Option<ReplyHook>,
    },
    /// Close the connection.
    Close,
}

impl fmt::Debug for FollowUp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FollowUp::Call {
                command,
                arguments,
                on_reply,
            } => f
                .debug_struct("Call")
                .field("command", command)
                .field("arguments", arguments)
                .field("on_reply", &on_reply.is_some())
                .finish(),
            FollowUp::Close => f.write_str("Close"),
        }
    }
}

/// A handler's answer: response fields plus an optional follow-up.
#[derive(Debug)]
pub struct Reply {
    /// Response fields, checked against the response schema.
    pub fields: Fields,
    /// Action to take after the response is queued.
    pub follow_up: Option<FollowUp>,
}

impl Reply {
    /// Reply with fields and no follow-up.
    pub fn new(fields: Fields) -> Self {
        Self {
            fields,
            follow_up: None,
        }
    }

    /// Call `command` on the peer after replying.
    pub fn then_call(mut self, command: &str, arguments: Fields) -> Self {
        self.follow_up = Some(FollowUp::Call {
            command: command.to_string(),
            arguments,
            on_reply: None,
        });
        self
    }

    /// Call `command` on the peer after replying and hand its outcome to `hook`.
    pub fn then_call_with(
        mut self,
        command: &str,
        arguments: Fields,
        hook: impl FnOnce(Result<Fields>) + Send + 'static,
    ) -> Self {
        self.follow_up = Some(FollowUp::Call {
            command: command.to_string(),
            arguments,
            on_reply: Some(Box::new(hook)),
        });
        self
    }

    /// Close the connection after replying.
    pub fn then_close(mut self) -> Self {
        self.follow_up = Some(FollowUp::Close);
        self
    }
}

impl From<Fields> for Reply {
    fn from(fields: Fields) -> Self {
        Reply::new(fields)
    }
}

/// Result type for handler functions.
pub type HandlerResult = Result<Reply>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for command handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle a call whose arguments already match the declared schema.
    fn call(&self, arguments: Fields, ctx: CallContext) -> BoxFuture<'static, HandlerResult>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F, Fut>
where
    F: Fn(Fields, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(Fields, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Wrap a closure.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(Fields, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, arguments: Fields, ctx: CallContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(arguments, ctx))
    }
}

/// Entry for a known command.
struct CommandEntry {
    schema: Arc<CommandSchema>,
    handler: Option<Arc<dyn Handler>>,
}

/// Outcome of dispatching a call: the reply message and its follow-up.
#[derive(Debug)]
pub struct Dispatched {
    /// Response or Error message to send back.
    pub message: Message,
    /// Action to run once `message` is queued.
    pub follow_up: Option<FollowUp>,
}

impl Dispatched {
    fn error(correlation_id: u32, code: &str, description: &str) -> Self {
        Self {
            message: Message::error(correlation_id, code, description),
            follow_up: None,
        }
    }
}

/// Registry mapping command names to schemas and handlers.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, CommandEntry>,
}

impl CommandRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command this side answers, with a closure handler.
    pub fn register<F, Fut>(&mut self, schema: CommandSchema, handler: F) -> Result<()>
    where
        F: Fn(Fields, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_handler(schema, Arc::new(FnHandler::new(handler)))
    }

    /// Register a command this side answers, with a shared handler.
    pub fn register_handler(
        &mut self,
        schema: CommandSchema,
        handler: Arc<dyn Handler>,
    ) -> Result<()> {
        self.insert(schema, Some(handler))
    }

    /// Declare a command without a local handler (callable on the peer only).
    pub fn declare(&mut self, schema: CommandSchema) -> Result<()> {
        self.insert(schema, None)
    }

    fn insert(&mut self, schema: CommandSchema, handler: Option<Arc<dyn Handler>>) -> Result<()> {
        schema.validate()?;
        if self.commands.contains_key(&schema.name) {
            return Err(AmpError::SchemaViolation(format!(
                "command {} registered twice",
                schema.name
            )));
        }
        self.commands.insert(
            schema.name.clone(),
            CommandEntry {
                schema: Arc::new(schema),
                handler,
            },
        );
        Ok(())
    }

    /// Get a command's schema.
    pub fn schema(&self, name: &str) -> Option<&Arc<CommandSchema>> {
        self.commands.get(name).map(|e| &e.schema)
    }

    /// Check if a local handler is registered for a command.
    pub fn has_handler(&self, name: &str) -> bool {
        self.commands
            .get(name)
            .is_some_and(|e| e.handler.is_some())
    }

    /// Number of known commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if no commands are known.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Dispatch a Call message to its handler.
    ///
    /// Unknown or unanswerable commands, arguments that do not match the
    /// schema and non-fatal handler errors all produce an Error message and
    /// keep the connection usable. Undecodable arguments and handler
    /// responses that do not match the response schema are returned as fatal
    /// errors.
    pub async fn dispatch(&self, message: Message, ctx: CallContext) -> Result<Dispatched> {
        let id = message.correlation_id;

        let Some(entry) = self.commands.get(&message.command) else {
            tracing::warn!(command = %message.command, "call for unknown command");
            return Ok(Dispatched::error(
                id,
                error_codes::UNKNOWN_COMMAND,
                &format!("unknown command {}", message.command),
            ));
        };
        let Some(handler) = entry.handler.as_ref() else {
            return Ok(Dispatched::error(
                id,
                error_codes::UNHANDLED,
                &format!("no handler for {}", message.command),
            ));
        };

        let arguments = match entry.schema.arguments.decode_fields(&message.fields) {
            Ok(arguments) => arguments,
            Err(AmpError::SchemaViolation(detail)) => {
                tracing::warn!(command = %message.command, %detail, "rejecting call arguments");
                return Ok(Dispatched::error(id, error_codes::SCHEMA_VIOLATION, &detail));
            }
            Err(e) => return Err(e),
        };

        let reply = match handler.call(arguments, ctx).await {
            Ok(reply) => reply,
            Err(AmpError::SchemaViolation(detail)) => {
                return Ok(Dispatched::error(id, error_codes::SCHEMA_VIOLATION, &detail));
            }
            Err(e @ AmpError::HandlerContractViolation(_)) => return Err(e),
            Err(e) => {
                tracing::error!(command = %message.command, error = %e, "handler failed");
                return Ok(Dispatched::error(id, error_codes::UNHANDLED, &e.to_string()));
            }
        };

        let fields = entry
            .schema
            .response
            .encode_fields(&reply.fields)
            .map_err(|e| {
                AmpError::HandlerContractViolation(format!(
                    "{} returned a non-conforming response: {}",
                    message.command, e
                ))
            })?;

        Ok(Dispatched {
            message: Message::response(id, fields),
            follow_up: reply.follow_up,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ValueType;
    use crate::protocol::MessageKind;

    fn echo_schema() -> CommandSchema {
        CommandSchema::new(
            "Echo",
            Schema::new().field("n", ValueType::Integer),
            Schema::new().field("n", ValueType::Integer),
        )
    }

    fn echo_registry() -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        registry
            .register(echo_schema(), |args: Fields, _ctx| async move {
                Ok(Reply::new(args).then_close())
            })
            .unwrap();
        registry
    }

    fn call(id: u32, command: &str, args: Fields) -> Message {
        let fields = echo_schema().arguments.encode_fields(&args).unwrap_or_default();
        Message::call(id, command, fields)
    }

    #[test]
    fn test_register_and_declare() {
        let mut registry = echo_registry();
        registry
            .declare(CommandSchema::new("Ping", Schema::new(), Schema::new()))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.has_handler("Echo"));
        assert!(!registry.has_handler("Ping"));
        assert!(registry.schema("Ping").is_some());
        assert!(registry.schema("Nope").is_none());
    }

    #[test]
    fn test_duplicate_and_empty_names_rejected() {
        let mut registry = echo_registry();
        assert!(registry.declare(echo_schema()).is_err());
        assert!(registry
            .declare(CommandSchema::new("", Schema::new(), Schema::new()))
            .is_err());
    }

    #[tokio::test]
    async fn test_dispatch_success_with_follow_up() {
        let registry = echo_registry();
        let out = registry
            .dispatch(call(5, "Echo", Fields::new().with("n", 3)), CallContext::detached(5, "Echo"))
            .await
            .unwrap();

        assert_eq!(out.message.kind, MessageKind::Response);
        assert_eq!(out.message.correlation_id, 5);
        assert!(matches!(out.follow_up, Some(FollowUp::Close)));
        let fields = echo_schema().response.decode_fields(&out.message.fields).unwrap();
        assert_eq!(fields.get("n").and_then(|v| v.as_integer()), Some(3));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_command() {
        let registry = echo_registry();
        let out = registry
            .dispatch(call(1, "Nope", Fields::new().with("n", 1)), CallContext::detached(1, "Nope"))
            .await
            .unwrap();

        assert_eq!(out.message.kind, MessageKind::Error);
        assert_eq!(out.message.error_parts().unwrap().0, error_codes::UNKNOWN_COMMAND);
    }

    #[tokio::test]
    async fn test_dispatch_declared_without_handler() {
        let mut registry = CommandRegistry::new();
        registry.declare(echo_schema()).unwrap();
        let out = registry
            .dispatch(call(1, "Echo", Fields::new().with("n", 1)), CallContext::detached(1, "Echo"))
            .await
            .unwrap();

        assert_eq!(out.message.error_parts().unwrap().0, error_codes::UNHANDLED);
    }

    #[tokio::test]
    async fn test_schema_violation_skips_handler() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let invoked = Arc::new(AtomicBool::new(false));
        let flag = invoked.clone();
        let mut registry = CommandRegistry::new();
        registry
            .register(echo_schema(), move |args: Fields, _ctx| {
                flag.store(true, Ordering::SeqCst);
                async move { Ok(args.into()) }
            })
            .unwrap();

        // Missing argument
        let out = registry
            .dispatch(Message::call(2, "Echo", vec![]), CallContext::detached(2, "Echo"))
            .await
            .unwrap();
        let (code, description) = out.message.error_parts().unwrap();
        assert_eq!(code, error_codes::SCHEMA_VIOLATION);
        assert!(description.contains("missing field n"));

        // Extra argument
        let extra = Schema::new()
            .field("n", ValueType::Integer)
            .field("m", ValueType::Integer)
            .encode_fields(&Fields::new().with("n", 1).with("m", 2))
            .unwrap();
        let out = registry
            .dispatch(Message::call(3, "Echo", extra), CallContext::detached(3, "Echo"))
            .await
            .unwrap();
        assert_eq!(out.message.error_parts().unwrap().0, error_codes::SCHEMA_VIOLATION);

        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_fatal() {
        let registry = echo_registry();
        let mut fields = echo_schema()
            .arguments
            .encode_fields(&Fields::new().with("n", 1))
            .unwrap();
        fields[0].value = bytes::Bytes::from_static(&[0, 1]);

        let err = registry
            .dispatch(Message::call(4, "Echo", fields), CallContext::detached(4, "Echo"))
            .await
            .unwrap_err();
        assert!(matches!(err, AmpError::MalformedValue(_)));
    }

    #[tokio::test]
    async fn test_non_conforming_response_is_contract_violation() {
        let mut registry = CommandRegistry::new();
        registry
            .register(echo_schema(), |_args: Fields, _ctx| async move {
                Ok(Fields::new().with("n", "not an integer").into())
            })
            .unwrap();

        let err = registry
            .dispatch(call(6, "Echo", Fields::new().with("n", 1)), CallContext::detached(6, "Echo"))
            .await
            .unwrap_err();
        assert!(matches!(err, AmpError::HandlerContractViolation(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_handler_error_becomes_unhandled() {
        let mut registry = CommandRegistry::new();
        registry
            .register(echo_schema(), |_args: Fields, _ctx| async move {
                Err(AmpError::ConnectionLost)
            })
            .unwrap();

        let out = registry
            .dispatch(call(7, "Echo", Fields::new().with("n", 1)), CallContext::detached(7, "Echo"))
            .await
            .unwrap();
        assert_eq!(out.message.error_parts().unwrap().0, error_codes::UNHANDLED);
    }
}
