//! Process-scoped lookup of modules and worker pools, and their shared lifecycle.
//!
//! A [`Registry`] is an explicit handle: create one at startup, hand clones to
//! whatever needs to find peers, call [`Registry::start`] once and
//! [`Registry::close`] to shut everything down.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::module::{install_panic_hook, ModuleHandle};
use crate::timer::now_ms;
use crate::types::{Config, Error, Result};
use crate::worker_pool::WorkerPool;

struct RegistryInner {
    config: Config,
    modules: RwLock<HashMap<String, ModuleHandle>>,
    pools: RwLock<HashMap<String, WorkerPool>>,
    tracker: TaskTracker,
    active: Arc<AtomicUsize>,
    started: AtomicBool,
    closed: AtomicBool,
}

/// Handle to the set of modules and pools that start and stop together.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Validate `config` and create an empty registry.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        install_panic_hook();
        // Pin the process clock epoch before any timer is scheduled
        let _ = now_ms();
        Ok(Self {
            inner: Arc::new(RegistryInner {
                config,
                modules: RwLock::new(HashMap::new()),
                pools: RwLock::new(HashMap::new()),
                tracker: TaskTracker::new(),
                active: Arc::new(AtomicUsize::new(0)),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The module named `name`, created on first lookup. A module created
    /// after [`start`](Self::start) begins running immediately.
    pub fn module(&self, name: &str) -> Result<ModuleHandle> {
        if name.is_empty() {
            return Err(Error::validation("module name must not be empty"));
        }
        self.ensure_open()?;
        if let Some(module) = self.find_module(name) {
            return Ok(module);
        }

        let mut modules = self
            .inner
            .modules
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(module) = modules.get(name) {
            return Ok(module.clone());
        }
        // close() flips the flag under this lock, so recheck before inserting
        self.ensure_open()?;
        let module = ModuleHandle::new(name, self.inner.config.runtime.clone());
        if self.is_started() {
            module.start(&self.inner.tracker, &self.inner.active)?;
        }
        modules.insert(name.to_string(), module.clone());
        debug!(module = %name, id = %module.id(), "module_registered");
        Ok(module)
    }

    /// Look up an existing module without creating it.
    pub fn find_module(&self, name: &str) -> Option<ModuleHandle> {
        self.inner
            .modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Create (or, before start, resize) the pool `name` with `size` members.
    pub fn create_workers(&self, name: &str, size: usize) -> Result<WorkerPool> {
        if name.is_empty() {
            return Err(Error::validation("worker pool name must not be empty"));
        }
        self.ensure_open()?;
        if self.is_started() {
            return Err(Error::state_transition(format!(
                "cannot create worker pool '{}' after start",
                name
            )));
        }

        let mut pools = self
            .inner
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let runtime = &self.inner.config.runtime;
        if let Some(pool) = pools.get(name) {
            pool.resize(size, runtime)?;
            return Ok(pool.clone());
        }
        let pool = WorkerPool::new(name, size, runtime)?;
        pools.insert(name.to_string(), pool.clone());
        Ok(pool)
    }

    pub fn worker_pool(&self, name: &str) -> Option<WorkerPool> {
        self.inner
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Launch every registered module and pool member on the current tokio runtime.
    pub fn start(&self) -> Result<()> {
        self.ensure_open()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::config("Registry::start requires a tokio runtime"));
        }
        // Hold the module map so a concurrent lookup cannot slip in unstarted
        let modules = self
            .inner
            .modules
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.ensure_open()?;
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(Error::state_transition("registry already started"));
        }
        for module in modules.values() {
            module.start(&self.inner.tracker, &self.inner.active)?;
        }
        drop(modules);

        let pools = self
            .inner
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for pool in pools.values() {
            pool.start(&self.inner.tracker, &self.inner.active)?;
        }
        info!(
            modules = self.module_count(),
            pools = pools.len(),
            active = self.active_loops(),
            "registry_started"
        );
        Ok(())
    }

    /// Signal every module and pool to stop, then wait for all loops to exit.
    pub async fn close(&self) {
        // Flag and snapshot under the module lock so no lookup can add a
        // module this close would miss
        let snapshot: Option<Vec<ModuleHandle>> = {
            let modules = self
                .inner
                .modules
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                None
            } else {
                Some(modules.values().cloned().collect())
            }
        };
        let Some(modules) = snapshot else {
            self.inner.tracker.wait().await;
            return;
        };
        info!(active = self.active_loops(), "registry_closing");
        for module in &modules {
            module.close();
        }
        let pools: Vec<WorkerPool> = self
            .inner
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for pool in &pools {
            pool.signal_close();
        }

        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("registry_closed");
    }

    /// Number of module loops currently running.
    pub fn active_loops(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn module_count(&self) -> usize {
        self.inner
            .modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::state_transition("registry is closed"));
        }
        Ok(())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("modules", &self.module_count())
            .field("started", &self.is_started())
            .field("closed", &self.is_closed())
            .field("active_loops", &self.active_loops())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::types::RuntimeConfig;

    fn registry() -> Registry {
        Registry::new(Config::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config {
            runtime: RuntimeConfig {
                timer_budget: 0,
                ..RuntimeConfig::default()
            },
            ..Config::default()
        };
        assert!(matches!(Registry::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_module_lookup_is_get_or_create() {
        let registry = registry();
        assert!(registry.find_module("lobby").is_none());
        let a = registry.module("lobby").unwrap();
        let b = registry.module("lobby").unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(registry.find_module("lobby").unwrap().id(), a.id());
        assert!(matches!(registry.module(""), Err(Error::Validation(_))));
    }

    #[test]
    fn test_start_requires_runtime() {
        let registry = registry();
        assert!(matches!(registry.start(), Err(Error::Config(_))));
        assert!(!registry.is_started());
    }

    #[test]
    fn test_create_workers_resizes_before_start() {
        let registry = registry();
        registry.create_workers("db", 2).unwrap();
        let pool = registry.create_workers("db", 4).unwrap();
        assert_eq!(pool.size(), 4);
        assert_eq!(registry.worker_pool("db").unwrap().size(), 4);
        assert!(registry.worker_pool("nope").is_none());
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let registry = registry();
        registry.module("login").unwrap();
        registry.create_workers("game", 3).unwrap();
        registry.start().unwrap();
        assert_eq!(registry.active_loops(), 4);
        assert!(matches!(registry.start(), Err(Error::StateTransition(_))));
        assert!(matches!(
            registry.create_workers("late", 1),
            Err(Error::StateTransition(_))
        ));

        // Created after start, so it runs right away
        let late = registry.module("late").unwrap();
        late.register_rpc_handler("ping", |_ctx, _args| args!["pong"])
            .unwrap();
        assert_eq!(
            late.await_rpc_call("ping", args![]).await.unwrap(),
            args!["pong"]
        );
        assert_eq!(registry.active_loops(), 5);

        registry.close().await;
        assert_eq!(registry.active_loops(), 0);
        assert!(matches!(registry.module("other"), Err(Error::StateTransition(_))));
        // Second close is a no-op
        registry.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_races_with_lookups() {
        for round in 0..20 {
            let registry = registry();
            registry.start().unwrap();
            let handle = tokio::runtime::Handle::current();
            let lookups: Vec<_> = (0..3)
                .map(|t| {
                    let registry = registry.clone();
                    let handle = handle.clone();
                    std::thread::spawn(move || {
                        let _guard = handle.enter();
                        let mut created = Vec::new();
                        for n in 0.. {
                            match registry.module(&format!("r{}_t{}_{}", round, t, n)) {
                                Ok(module) => created.push(module),
                                Err(err) => {
                                    assert!(matches!(err, Error::StateTransition(_)));
                                    break;
                                }
                            }
                        }
                        created
                    })
                })
                .collect();

            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            tokio::time::timeout(std::time::Duration::from_secs(5), registry.close())
                .await
                .unwrap_or_else(|_| panic!("round {}: close hung", round));
            assert_eq!(registry.active_loops(), 0);

            for lookup in lookups {
                for module in lookup.join().unwrap() {
                    assert!(module.is_closed(), "{} left running", module.name());
                }
            }
        }
    }
}
