//! Model lifecycle hooks
//!
//! A [`Hooks`] value is handed to a [`Dao`] at construction instead of being
//! registered globally, so a scope can run with a subset of hooks disabled
//! without touching any other caller.

use super::Dao;
use crate::error::SqliteResult;
use cairn_core::Model;
use std::sync::Arc;

/// Runs before a write and may veto it by returning an error
pub type BeforeHook = Arc<dyn Fn(&Dao<'_>, &mut dyn Model) -> SqliteResult<()> + Send + Sync>;

/// Runs after a successful write (post-commit when inside a transaction)
pub type AfterHook = Arc<dyn Fn(&Dao<'_>, &dyn Model) -> SqliteResult<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    pub before_create: Option<BeforeHook>,
    pub after_create: Option<AfterHook>,
    pub before_update: Option<BeforeHook>,
    pub after_update: Option<AfterHook>,
    pub before_delete: Option<BeforeHook>,
    pub after_delete: Option<AfterHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before_create(
        mut self,
        hook: impl Fn(&Dao<'_>, &mut dyn Model) -> SqliteResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.before_create = Some(Arc::new(hook));
        self
    }

    pub fn on_after_create(
        mut self,
        hook: impl Fn(&Dao<'_>, &dyn Model) -> SqliteResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.after_create = Some(Arc::new(hook));
        self
    }

    pub fn on_before_update(
        mut self,
        hook: impl Fn(&Dao<'_>, &mut dyn Model) -> SqliteResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.before_update = Some(Arc::new(hook));
        self
    }

    pub fn on_after_update(
        mut self,
        hook: impl Fn(&Dao<'_>, &dyn Model) -> SqliteResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.after_update = Some(Arc::new(hook));
        self
    }

    pub fn on_before_delete(
        mut self,
        hook: impl Fn(&Dao<'_>, &mut dyn Model) -> SqliteResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.before_delete = Some(Arc::new(hook));
        self
    }

    pub fn on_after_delete(
        mut self,
        hook: impl Fn(&Dao<'_>, &dyn Model) -> SqliteResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.after_delete = Some(Arc::new(hook));
        self
    }

    /// Same hooks with every before-hook removed
    pub fn without_before_hooks(&self) -> Self {
        Self {
            before_create: None,
            before_update: None,
            before_delete: None,
            ..self.clone()
        }
    }

    pub fn has_before_hooks(&self) -> bool {
        self.before_create.is_some() || self.before_update.is_some() || self.before_delete.is_some()
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("before_create", &self.before_create.is_some())
            .field("after_create", &self.after_create.is_some())
            .field("before_update", &self.before_update.is_some())
            .field("after_update", &self.after_update.is_some())
            .field("before_delete", &self.before_delete.is_some())
            .field("after_delete", &self.after_delete.is_some())
            .finish()
    }
}
