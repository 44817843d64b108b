//! [`ComponentContext`] – per-component state, explicitly passed around.
//!
//! There is deliberately no process-wide mutable state in BotMesh: every
//! hook invocation and shutdown decision reads from the context of the
//! component it concerns.

use std::sync::Arc;

use botmesh_types::{ComponentIdentity, Credentials};

use crate::hooks::NotificationHooks;

/// Everything a component carries through its lifetime: who it is, what
/// authorizes shutting it down, and how it reacts to mesh events.
#[derive(Clone)]
pub struct ComponentContext {
    identity: ComponentIdentity,
    credentials: Credentials,
    hooks: Arc<dyn NotificationHooks>,
}

impl ComponentContext {
    pub fn new(
        identity: ComponentIdentity,
        credentials: Credentials,
        hooks: Arc<dyn NotificationHooks>,
    ) -> Self {
        Self {
            identity,
            credentials,
            hooks,
        }
    }

    pub fn identity(&self) -> &ComponentIdentity {
        &self.identity
    }

    pub fn key(&self) -> String {
        self.identity.key()
    }

    pub fn hooks(&self) -> &Arc<dyn NotificationHooks> {
        &self.hooks
    }

    /// Decide a remote shutdown request.
    ///
    /// Credentials are checked first when this component carries any; the
    /// hook then has the final word, so a component can refuse shutdown
    /// even for an authorized caller (or allow it while mid-motion, etc.).
    pub async fn permit_shutdown(&self, presented: &Credentials) -> bool {
        if !self.credentials.is_empty() && !self.credentials.permits(presented) {
            return false;
        }
        self.hooks.on_shutdown_requested(presented).await
    }
}

impl std::fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentContext")
            .field("identity", &self.identity.key())
            .field("credentials", &self.credentials)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopHooks;
    use async_trait::async_trait;

    struct RefuseShutdown;

    #[async_trait]
    impl NotificationHooks for RefuseShutdown {
        async fn on_shutdown_requested(&self, _credentials: &Credentials) -> bool {
            false
        }
    }

    fn context(credentials: Credentials, hooks: Arc<dyn NotificationHooks>) -> ComponentContext {
        ComponentContext::new(
            ComponentIdentity::new("Velocity", "v1").unwrap(),
            credentials,
            hooks,
        )
    }

    #[tokio::test]
    async fn wrong_credentials_are_refused_before_the_hook_runs() {
        let ctx = context(Credentials::new("secret"), Arc::new(NoopHooks));
        assert!(!ctx.permit_shutdown(&Credentials::new("wrong")).await);
        assert!(ctx.permit_shutdown(&Credentials::new("secret")).await);
    }

    #[tokio::test]
    async fn hook_can_refuse_even_authorized_requests() {
        let ctx = context(Credentials::new("secret"), Arc::new(RefuseShutdown));
        assert!(!ctx.permit_shutdown(&Credentials::new("secret")).await);
    }

    #[tokio::test]
    async fn ungated_component_defers_entirely_to_the_hook() {
        let ctx = context(Credentials::none(), Arc::new(NoopHooks));
        assert!(ctx.permit_shutdown(&Credentials::new("anything")).await);
    }
}
