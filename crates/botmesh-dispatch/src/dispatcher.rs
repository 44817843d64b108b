//! [`Dispatcher`] – binds handlers to cataloged signatures and runs calls.
//!
//! The dispatcher is the component-side half of the invocation protocol: it
//! owns the published [`Catalog`] and a handler table parallel to it.
//! Resolution failures (`NoSuchMethod`) are distinguished from handler
//! failures (`RemoteInvocationFailed`) so a caller can tell "you asked for
//! the wrong thing" apart from "the right thing failed while running".

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use botmesh_types::{MeshError, TypeTag, Value};

use crate::catalog::Catalog;
use crate::matcher::resolve_first_match;

/// A bound method body. Errors carry the callee's failure payload as text.
pub type Handler = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Component-side dispatch table: one [`Catalog`] plus the handlers bound to
/// its signatures.
#[derive(Clone)]
pub struct Dispatcher {
    component_type: String,
    catalog: Catalog,
    handlers: HashMap<usize, Handler>,
}

impl Dispatcher {
    /// Create a dispatcher for `component_type` over a published catalog.
    pub fn new(component_type: impl Into<String>, catalog: Catalog) -> Self {
        Self {
            component_type: component_type.into(),
            catalog,
            handlers: HashMap::new(),
        }
    }

    pub fn component_type(&self) -> &str {
        &self.component_type
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Bind `handler` to the cataloged signature with exactly this name and
    /// parameter list.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NoSuchMethod`] when the catalog has no such
    /// signature; binding never invents catalog entries.
    pub fn bind(
        &mut self,
        method: &str,
        params: &[TypeTag],
        handler: Handler,
    ) -> Result<(), MeshError> {
        let index = self
            .catalog
            .signatures()
            .iter()
            .position(|sig| sig.name == method && sig.params == params)
            .ok_or_else(|| MeshError::NoSuchMethod {
                component_type: self.component_type.clone(),
                method: method.to_string(),
                arity: params.len(),
            })?;
        self.handlers.insert(index, handler);
        Ok(())
    }

    /// Resolve and execute a call.
    ///
    /// # Errors
    ///
    /// * [`MeshError::NoSuchMethod`] – no cataloged signature matches the
    ///   method name and argument list (widening included). Not retryable.
    /// * [`MeshError::RemoteInvocationFailed`] – the signature resolved but
    ///   its handler failed, or no handler was ever bound to it.
    pub fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, MeshError> {
        let index = resolve_first_match(
            self.catalog.signatures(),
            method,
            args,
            self.catalog.hierarchy(),
        )
        .ok_or_else(|| MeshError::NoSuchMethod {
            component_type: self.component_type.clone(),
            method: method.to_string(),
            arity: args.len(),
        })?;

        debug!(
            component_type = %self.component_type,
            signature = %self.catalog.signature(index).map(|s| s.to_string()).unwrap_or_default(),
            "dispatching call"
        );

        let handler = self.handlers.get(&index).ok_or_else(|| {
            MeshError::RemoteInvocationFailed {
                method: method.to_string(),
                detail: "signature is cataloged but no handler is bound".to_string(),
                connection_lost: false,
            }
        })?;

        handler(args).map_err(|detail| MeshError::RemoteInvocationFailed {
            method: method.to_string(),
            detail,
            connection_lost: false,
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("component_type", &self.component_type)
            .field("signatures", &self.catalog.len())
            .field("bound_handlers", &self.handlers.len())
            .finish()
    }
}
