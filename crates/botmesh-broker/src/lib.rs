//! `botmesh-broker` – The Reference Desk
//!
//! Turns "give me something implementing type T" into a live, callable
//! handle. A [`Reference`] is a pseudo-reference: it stands in for a
//! possibly-remote, possibly-currently-down component, re-resolves its
//! endpoint from the registration table on every call, and silently starts
//! working again when a down target returns. Holders treat call failures
//! as transient, never fatal.
//!
//! # Modules
//!
//! - [`broker`] – [`ReferenceBroker`] plus the [`Directory`] and
//!   [`Invoker`] seams the broker works through.
//! - [`reference`] – the tagged-handle [`Reference`] itself.
//! - [`hooks`] – [`NotificationHooks`], the callback contract every
//!   component implements, and the [`HookRunner`] that feeds it.
//! - [`context`] – [`ComponentContext`]: per-component state passed to
//!   hooks and dispatch, replacing any process-wide globals.
//! - [`local`] – [`LocalMesh`]: an in-process directory + invoker for
//!   same-process components and test harnesses.

pub mod broker;
pub mod context;
pub mod hooks;
pub mod local;
pub mod reference;

pub use broker::{Directory, Invoker, ReferenceBroker};
pub use context::ComponentContext;
pub use hooks::{HookRunner, NoopHooks, NotificationHooks};
pub use local::LocalMesh;
pub use reference::Reference;
