//! `botmesh-dispatch` – The Method Table
//!
//! Dynamic dispatch without reflection: a component publishes an ordered
//! [`Catalog`] of method signatures at registration time, and calls are
//! resolved against it with a pure widening matcher over type tags. The
//! actual method bodies live in a [`Dispatcher`]'s handler table on the
//! component that serves the call.
//!
//! # Modules
//!
//! - [`catalog`] – [`Catalog`]: the ordered signature table plus the
//!   [`TypeHierarchy`] its class names are matched through.
//! - [`matcher`] – the pure assignability and first-match resolution
//!   functions.
//! - [`dispatcher`] – [`Dispatcher`]: binds handlers to cataloged
//!   signatures and executes resolved calls.

pub mod catalog;
pub mod dispatcher;
pub mod matcher;

pub use catalog::{Catalog, TypeHierarchy};
pub use dispatcher::{Dispatcher, Handler};
pub use matcher::{assignable, resolve_first_match};
