//! Named groups of identical modules with stateless routing.
//!
//! Members are created together and never resized once the pool's registry has
//! started. Routing is a pure function of the pool size and the key, so any
//! number of callers can route concurrently without coordination.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::task::TaskTracker;
use tracing::info;

use crate::codec::Value;
use crate::module::{ModuleContext, ModuleHandle};
use crate::types::{Error, ProtoTypeId, Result, RuntimeConfig};

/// Shard key hash: first byte + last byte + middle byte + length.
///
/// Weak by construction (anagrams with the same ends collide), kept as is so
/// existing shard assignments stay put. Empty keys hash to 0.
pub fn key_hash(key: &str) -> u32 {
    let bytes = key.as_bytes();
    let Some((&first, &last)) = bytes.first().zip(bytes.last()) else {
        return 0;
    };
    let middle = bytes[(bytes.len() - 1) / 2];
    u32::from(first)
        .wrapping_add(u32::from(last))
        .wrapping_add(u32::from(middle))
        .wrapping_add(bytes.len() as u32)
}

struct PoolInner {
    name: String,
    members: RwLock<Arc<[ModuleHandle]>>,
    cursor: AtomicU32,
}

/// Cloneable handle to a worker pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub(crate) fn new(name: impl Into<String>, size: usize, config: &RuntimeConfig) -> Result<Self> {
        let name = name.into();
        let members = build_members(&name, size, config)?;
        info!(pool = %name, size, "worker_pool_created");
        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                members: RwLock::new(members),
                cursor: AtomicU32::new(0),
            }),
        })
    }

    /// Replace every member with `size` fresh modules. Only valid before start.
    pub(crate) fn resize(&self, size: usize, config: &RuntimeConfig) -> Result<()> {
        let fresh = build_members(&self.inner.name, size, config)?;
        let old = std::mem::replace(
            &mut *self
                .inner
                .members
                .write()
                .unwrap_or_else(PoisonError::into_inner),
            fresh,
        );
        for module in old.iter() {
            module.close();
        }
        info!(pool = %self.inner.name, size, "worker_pool_resized");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn size(&self) -> usize {
        self.members().len()
    }

    /// Member `n mod size`.
    pub fn slot(&self, n: usize) -> ModuleHandle {
        let members = self.members();
        members[n % members.len()].clone()
    }

    /// Member owning `key`; stable for the pool's lifetime.
    pub fn constant(&self, key: &str) -> ModuleHandle {
        let members = self.members();
        members[key_hash(key) as usize % members.len()].clone()
    }

    /// Next member in round-robin order.
    pub fn balancer(&self) -> ModuleHandle {
        let members = self.members();
        let turn = self.inner.cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        members[turn as usize % members.len()].clone()
    }

    /// Route a fire-and-forget call to the member owning `name`.
    pub fn rpc_call<I>(&self, name: &str, args: I) -> Result<()>
    where
        I: IntoIterator<Item = Value>,
    {
        self.constant(name).rpc_call(name, args)
    }

    /// Run `f` for every member on the calling thread, not on the members' loops.
    pub fn for_each_module(&self, mut f: impl FnMut(&ModuleHandle)) {
        for module in self.members().iter() {
            f(module);
        }
    }

    pub fn register_handler<F>(&self, type_id: ProtoTypeId, handler: F) -> Result<()>
    where
        F: Fn(&mut ModuleContext<'_>, &(dyn Any + Send)) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        for module in self.members().iter() {
            let handler = Arc::clone(&handler);
            module.register_handler(type_id, move |ctx, payload| handler(ctx, payload))?;
        }
        Ok(())
    }

    pub fn register_rpc_handler<F>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&mut ModuleContext<'_>, &[Value]) -> Vec<Value> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        for module in self.members().iter() {
            let handler = Arc::clone(&handler);
            module.register_rpc_handler(name, move |ctx, args| handler(ctx, args))?;
        }
        Ok(())
    }

    pub(crate) fn start(&self, tracker: &TaskTracker, active: &Arc<AtomicUsize>) -> Result<()> {
        for module in self.members().iter() {
            module.start(tracker, active)?;
        }
        info!(pool = %self.inner.name, size = self.size(), "worker_pool_started");
        Ok(())
    }

    pub(crate) fn signal_close(&self) {
        info!(pool = %self.inner.name, "worker_pool_closing");
        for module in self.members().iter() {
            module.close();
        }
    }

    /// Close every member and wait until all of their loops have exited.
    pub async fn close(&self) {
        self.signal_close();
        let members = self.members();
        for module in members.iter() {
            module.stopped().await;
        }
    }

    fn members(&self) -> Arc<[ModuleHandle]> {
        Arc::clone(
            &self
                .inner
                .members
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("size", &self.size())
            .finish()
    }
}

fn build_members(name: &str, size: usize, config: &RuntimeConfig) -> Result<Arc<[ModuleHandle]>> {
    if size == 0 {
        return Err(Error::config(format!(
            "worker pool '{}' needs at least one member",
            name
        )));
    }
    Ok((1..=size)
        .map(|i| ModuleHandle::new(format!("{}_worker_{}", name, i), config.clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use std::collections::HashMap;

    fn pool(size: usize) -> WorkerPool {
        WorkerPool::new("game", size, &RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn test_key_hash_matches_reference_values() {
        // 'a'(97) + 'c'(99) + 'b'(98) + 3
        assert_eq!(key_hash("abc"), 297);
        // 'x' counted three times + 1
        assert_eq!(key_hash("x"), 361);
        assert_eq!(key_hash(""), 0);
        // Middle index is (len - 1) / 2
        assert_eq!(key_hash("abcd"), 97 + 100 + 98 + 4);
    }

    #[test]
    fn test_known_collision() {
        assert_eq!(key_hash("abxc"), key_hash("ab_c"));
    }

    #[test]
    fn test_member_names_are_one_based() {
        let pool = pool(3);
        let mut names = Vec::new();
        pool.for_each_module(|m| names.push(m.name().to_string()));
        assert_eq!(names, vec!["game_worker_1", "game_worker_2", "game_worker_3"]);
    }

    #[test]
    fn test_slot_wraps() {
        let pool = pool(4);
        for n in 0..16 {
            assert_eq!(pool.slot(n).id(), pool.slot(n + 4).id());
        }
    }

    #[test]
    fn test_constant_is_stable() {
        let pool = pool(5);
        let first = pool.constant("player:1001").id();
        for _ in 0..10 {
            assert_eq!(pool.constant("player:1001").id(), first);
        }
        assert_eq!(pool.constant("abc").id(), pool.slot(297).id());
    }

    #[test]
    fn test_balancer_round_robin() {
        let pool = pool(4);
        let mut hits: HashMap<_, usize> = HashMap::new();
        for _ in 0..400 {
            *hits.entry(pool.balancer().id()).or_default() += 1;
        }
        assert_eq!(hits.len(), 4);
        assert!(hits.values().all(|&n| n == 100));
        // First pick is member 1, as the cursor is incremented before use
        let fresh = self::pool(4);
        assert_eq!(fresh.balancer().id(), fresh.slot(1).id());
    }

    #[test]
    fn test_zero_size_is_config_error() {
        let err = WorkerPool::new("empty", 0, &RuntimeConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_resize_replaces_members() {
        let pool = pool(2);
        let old = pool.slot(0);
        pool.resize(3, &RuntimeConfig::default()).unwrap();
        assert_eq!(pool.size(), 3);
        assert!(old.is_closed());
        assert_ne!(pool.slot(0).id(), old.id());
    }

    #[tokio::test]
    async fn test_rpc_routes_by_name_hash() {
        let pool = pool(3);
        pool.register_rpc_handler("whoami", |ctx, _args| args![ctx.name()])
            .unwrap();
        let tracker = TaskTracker::new();
        let active = Arc::new(AtomicUsize::new(0));
        pool.start(&tracker, &active).unwrap();
        assert_eq!(active.load(Ordering::SeqCst), 3);

        let owner = pool.constant("whoami");
        let reply = owner.await_rpc_call("whoami", args![]).await.unwrap();
        assert_eq!(reply, args![owner.name()]);

        pool.close().await;
        tracker.close();
        tracker.wait().await;
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}
