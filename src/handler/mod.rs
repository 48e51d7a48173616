//! Handler module - command registration and call dispatch.
//!
//! Provides:
//! - [`CommandRegistry`] - maps command names to schemas and handlers
//! - [`CallContext`] - identifies a call and the connection it came from
//! - [`Reply`] - response fields plus an optional [`FollowUp`]

mod context;
mod registry;

pub use context::CallContext;
pub use registry::{
    BoxFuture, CommandRegistry, CommandSchema, Dispatched, FnHandler, FollowUp, Handler,
    HandlerResult, Reply, ReplyHook,
};
