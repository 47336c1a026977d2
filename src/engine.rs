// # Engine Facade
//
// The operation surface exposed to the host server. Every cache-touching
// method samples the host clock once, takes the cache lock for its whole
// critical section, and returns an engine error code on failure. Aggregate
// counters sit behind a second mutex; lock order is cache then stats and
// never the reverse.
//
// References are explicit: `allocate` and `get` hand out an `ItemHandle`
// that must be given back through `release` exactly once. The handle is
// neither `Copy` nor `Clone` and `release` consumes it, so a double release
// does not compile.

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::item::{ItemId, ItemStore, KEY_MAX_LENGTH};
use crate::server::{RelTime, ServerApi};
use crate::stats::EngineStats;
use parking_lot::Mutex;
use std::sync::Arc;

/// The only engine interface revision this crate implements.
pub const ENGINE_INTERFACE_VERSION: u64 = 1;

/// Storage command selector for [`SlabCache::store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Add,
    Set,
    Replace,
    Append,
    Prepend,
    Cas,
}

/// Owned reference to a cached item. Obtained from [`SlabCache::allocate`]
/// or [`SlabCache::get`]; must be returned through [`SlabCache::release`].
#[derive(Debug)]
pub struct ItemHandle {
    id: ItemId,
}

/// Header snapshot of an item, copied out under the cache lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub key: Vec<u8>,
    pub flags: u32,
    pub exptime: RelTime,
    pub nbytes: usize,
    pub cas: u64,
    pub clsid: u8,
}

/// Outcome of an INCR/DECR operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArithmeticResult {
    pub value: u64,
    pub cas: u64,
}

/// Slab-allocated, LRU-evicting key/value cache engine.
///
/// Multiple host worker threads may call into one instance concurrently;
/// operations serialize under the cache lock.
pub struct SlabCache {
    core: Mutex<ItemStore>,
    stats: Arc<Mutex<EngineStats>>,
    server: Arc<dyn ServerApi>,
    verbose: usize,
}

impl SlabCache {
    /// Create an engine instance from a host configuration string.
    ///
    /// Fails with `NotSupported` for an unknown interface revision and with
    /// `Configuration` for an unparseable or invalid option string.
    pub fn create(
        interface: u64,
        config_str: Option<&str>,
        server: Arc<dyn ServerApi>,
    ) -> Result<Self> {
        if interface != ENGINE_INTERFACE_VERSION {
            return Err(EngineError::NotSupported);
        }
        let config = match config_str {
            Some(cfg) => Config::parse(cfg)?,
            None => Config::default(),
        };
        Self::with_config(config, server)
    }

    /// Create an engine instance from an already-built configuration.
    pub fn with_config(config: Config, server: Arc<dyn ServerApi>) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            cache_size = config.maxbytes,
            chunk_size = config.chunk_size,
            factor = config.factor,
            use_cas = config.use_cas,
            eviction = config.evict_to_free,
            "cache engine initializing"
        );
        let stats = Arc::new(Mutex::new(EngineStats::default()));
        let verbose = config.verbose;
        let core = ItemStore::new(config, Arc::clone(&server), Arc::clone(&stats));
        Ok(Self {
            core: Mutex::new(core),
            stats,
            server,
            verbose,
        })
    }

    /// Engine name and version string.
    pub fn info(&self) -> &'static str {
        concat!("rusty-cache slab engine v", env!("CARGO_PKG_VERSION"))
    }

    /// Allocate an unlinked item for the given key. The value buffer is
    /// sized to `nbytes` and filled through [`SlabCache::write_value`];
    /// `exptime` is in the engine's relative time domain.
    pub fn allocate(
        &self,
        key: &[u8],
        nbytes: usize,
        flags: u32,
        exptime: RelTime,
    ) -> Result<ItemHandle> {
        if key.is_empty() || key.len() > KEY_MAX_LENGTH {
            return Err(EngineError::InvalidArgument(format!(
                "key length must be 1..={KEY_MAX_LENGTH}, got {}",
                key.len()
            )));
        }
        let now = self.server.current_time();
        let mut core = self.core.lock();
        if core.classify(key.len(), nbytes) == 0 {
            return Err(EngineError::TooBig);
        }
        match core.alloc(key, flags, exptime, nbytes, now) {
            Some(id) => Ok(ItemHandle { id }),
            None => Err(EngineError::OutOfMemory),
        }
    }

    /// Look up a key. A hit returns an owned handle; expired items are
    /// reported as misses.
    pub fn get(&self, key: &[u8]) -> Result<ItemHandle> {
        let now = self.server.current_time();
        let mut core = self.core.lock();
        match core.get(key, now) {
            Some(id) => Ok(ItemHandle { id }),
            None => Err(EngineError::KeyNotFound),
        }
    }

    /// Remove the item behind the handle from the cache. The handle itself
    /// stays valid until released.
    pub fn remove(&self, handle: &ItemHandle) -> Result<()> {
        let mut core = self.core.lock();
        core.unlink(handle.id);
        Ok(())
    }

    /// Give back a reference obtained from `allocate` or `get`.
    pub fn release(&self, handle: ItemHandle) {
        let mut core = self.core.lock();
        core.release(handle.id);
    }

    /// Store the candidate item behind `handle` according to `operation`.
    pub fn store(&self, handle: &ItemHandle, operation: StoreOperation) -> Result<()> {
        let now = self.server.current_time();
        let mut core = self.core.lock();
        core.store_item(handle.id, operation, now)
    }

    /// Increment or decrement the decimal value stored under `key`.
    ///
    /// With `create` set, a miss stores `initial` instead of failing. A
    /// non-zero `cas` must match the live item's version.
    #[allow(clippy::too_many_arguments)]
    pub fn arithmetic(
        &self,
        key: &[u8],
        increment: bool,
        create: bool,
        delta: u64,
        initial: u64,
        exptime: RelTime,
        cas: u64,
    ) -> Result<ArithmeticResult> {
        let now = self.server.current_time();
        let mut core = self.core.lock();
        core.arithmetic(key, increment, create, delta, initial, exptime, cas, now)
    }

    /// Expire every item older than the cutoff. `when` is a client time
    /// value; zero or negative means "everything stored so far".
    pub fn flush(&self, when: i64) -> Result<()> {
        let now = self.server.current_time();
        let oldest = if when > 0 {
            self.server.realtime(when).saturating_sub(1)
        } else {
            now.saturating_sub(1)
        };
        let mut core = self.core.lock();
        core.oldest_live = oldest;
        core.flush_expired();
        if self.verbose > 0 {
            tracing::debug!(oldest_live = oldest, "cache flushed");
        }
        Ok(())
    }

    /// Emit statistics through the host callback.
    ///
    /// `None` emits the aggregate counters; `"slabs"`, `"items"` and
    /// `"sizes"` select the detailed groups. Unknown keys report
    /// `KeyNotFound`.
    pub fn get_stats(
        &self,
        stat_key: Option<&str>,
        add_stat: &mut dyn FnMut(&str, &str),
    ) -> Result<()> {
        match stat_key {
            None | Some("") => {
                let stats = self.stats.lock();
                add_stat("evictions", &stats.evictions.to_string());
                add_stat("curr_items", &stats.curr_items.to_string());
                add_stat("total_items", &stats.total_items.to_string());
                add_stat("bytes", &stats.curr_bytes.to_string());
                Ok(())
            }
            Some("slabs") => {
                let core = self.core.lock();
                core.slabs.stats(add_stat);
                Ok(())
            }
            Some("items") => {
                let core = self.core.lock();
                core.item_stats(add_stat);
                Ok(())
            }
            Some("sizes") => {
                let core = self.core.lock();
                core.stats_sizes(add_stat);
                Ok(())
            }
            Some(_) => Err(EngineError::KeyNotFound),
        }
    }

    /// Zero the per-class counters and the resettable aggregates. The live
    /// gauges (`curr_items`, `bytes`) are left alone.
    pub fn reset_stats(&self) {
        {
            let mut core = self.core.lock();
            core.stats_reset();
        }
        let mut stats = self.stats.lock();
        stats.evictions = 0;
        stats.total_items = 0;
    }

    /// Protocol commands the engine does not understand.
    pub fn unknown_command(&self, _request: &[u8]) -> Result<()> {
        Err(EngineError::NotSupported)
    }

    /// Copy out an item's header fields.
    pub fn item_info(&self, handle: &ItemHandle) -> ItemInfo {
        let core = self.core.lock();
        let slot = core.slabs.slot(handle.id);
        ItemInfo {
            key: slot.key().to_vec(),
            flags: slot.flags,
            exptime: slot.exptime,
            nbytes: slot.nbytes as usize,
            cas: slot.cas,
            clsid: handle.id.cls,
        }
    }

    /// Copy out an item's value bytes, trailing CRLF included.
    pub fn value(&self, handle: &ItemHandle) -> Vec<u8> {
        let core = self.core.lock();
        core.slabs.slot(handle.id).value().to_vec()
    }

    /// Fill the value buffer of a freshly allocated item. The data length
    /// must match the allocation exactly.
    pub fn write_value(&self, handle: &ItemHandle, data: &[u8]) -> Result<()> {
        let mut core = self.core.lock();
        core.check_value_len(handle.id, data.len())?;
        core.slabs
            .slot_mut(handle.id)
            .value_mut()
            .copy_from_slice(data);
        Ok(())
    }

    /// Set the candidate item's expected CAS version before a CAS store.
    pub fn set_cas(&self, handle: &ItemHandle, cas: u64) {
        let mut core = self.core.lock();
        core.slabs.slot_mut(handle.id).cas = cas;
    }
}
