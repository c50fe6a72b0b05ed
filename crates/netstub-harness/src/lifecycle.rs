//! Test lifecycle integration
//!
//! Test frameworks call `before_each` / `after_each` around every test. For
//! code that prefers scoping, `Engine::install_scoped` returns a guard that
//! uninstalls on drop.

use async_trait::async_trait;
use tracing::debug;

use crate::engine::Engine;

/// Hooks run around each test
#[async_trait]
pub trait TestLifecycle: Send + Sync {
    async fn before_each(&self);
    async fn after_each(&self);
}

#[async_trait]
impl TestLifecycle for Engine {
    async fn before_each(&self) {
        self.install();
    }

    async fn after_each(&self) {
        self.uninstall();
    }
}

/// Keeps an engine installed for the lifetime of the guard
#[must_use = "dropping the guard uninstalls the engine immediately"]
#[derive(Debug)]
pub struct InstallGuard {
    engine: Engine,
}

impl InstallGuard {
    pub(crate) fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

impl std::ops::Deref for InstallGuard {
    type Target = Engine;

    fn deref(&self) -> &Engine {
        &self.engine
    }
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        if self.engine.uninstall() {
            debug!("Install guard dropped, transports restored");
        }
    }
}
