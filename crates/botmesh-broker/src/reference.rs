//! [`Reference`] – the pseudo-reference handle.
//!
//! A reference is a tagged handle `{type, name?}`, not a cached pointer:
//! every call re-resolves the target from the registration table, so a
//! handle can never dangle. When the target is down the call fails
//! transiently; when the target re-registers, the same handle silently
//! starts working again — it is never reissued.

use std::sync::{Arc, Mutex};

use botmesh_types::{MeshError, Value};

use crate::broker::{Directory, Invoker};

/// A logical handle to a component of some type, optionally pinned to one
/// named instance. Obtained from
/// [`ReferenceBroker::get_reference`][crate::broker::ReferenceBroker::get_reference];
/// never null once acquired, even when the target is currently down.
pub struct Reference {
    holder_key: String,
    component_type: String,
    name: Option<String>,
    directory: Arc<dyn Directory>,
    invoker: Arc<dyn Invoker>,
    /// Last key this handle resolved to; diagnostic and release
    /// bookkeeping only — calls never trust it.
    resolved: Mutex<Option<String>>,
}

impl Reference {
    pub(crate) fn new(
        holder_key: String,
        component_type: &str,
        name: Option<&str>,
        directory: Arc<dyn Directory>,
        invoker: Arc<dyn Invoker>,
    ) -> Self {
        Self {
            holder_key,
            component_type: component_type.to_string(),
            name: name.map(str::to_string),
            directory,
            invoker,
            resolved: Mutex::new(None),
        }
    }

    pub fn component_type(&self) -> &str {
        &self.component_type
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The key this handle last resolved to, if it has ever resolved.
    pub fn last_resolved_key(&self) -> Option<String> {
        self.resolved.lock().expect("reference lock poisoned").clone()
    }

    pub(crate) fn note_resolved(&self, key: &str) {
        *self.resolved.lock().expect("reference lock poisoned") = Some(key.to_string());
    }

    /// Invoke `method` on the component behind this handle.
    ///
    /// The target is re-resolved from the table first; a target that is
    /// missing or down fails with [`MeshError::ConnectionLost`], which is
    /// transient — retry once the dependency-up hook has fired, or just
    /// retry later. `timeout_ms` bounds the local wait (`0` = forever).
    pub async fn call(
        &self,
        method: &str,
        args: &[Value],
        timeout_ms: u64,
    ) -> Result<Value, MeshError> {
        let found = self
            .directory
            .lookup(&self.component_type, self.name.as_deref())
            .await?;
        let Some(info) = found else {
            return Err(MeshError::ConnectionLost(self.describe()));
        };
        let key = info.identity.key();
        if !info.state.is_live() {
            return Err(MeshError::ConnectionLost(key));
        }

        let newly_resolved = {
            let mut resolved = self.resolved.lock().expect("reference lock poisoned");
            if resolved.as_deref() != Some(key.as_str()) {
                *resolved = Some(key.clone());
                true
            } else {
                false
            }
        };
        if newly_resolved {
            self.directory
                .track_reference(&self.holder_key, &key)
                .await?;
        }

        self.invoker.invoke(&key, method, args, timeout_ms).await
    }

    fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("{}${name}", self.component_type),
            None => self.component_type.clone(),
        }
    }
}

impl std::fmt::Debug for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reference")
            .field("holder", &self.holder_key)
            .field("target", &self.describe())
            .field("resolved", &self.last_resolved_key())
            .finish()
    }
}
