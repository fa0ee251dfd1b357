//! The log registry.
//!
//! [`StressLog`] owns the store, the list of thread logs, the byte budgets
//! and the module table. Call sites write through it; each thread lazily
//! gets its own log on first write. The common write path takes no lock:
//! only log creation, thread exit, module registration and teardown take
//! the registry's single coarse lock.

use crate::clock::{MonotonicTicks, TickSource};
use crate::config::StressLogConfig;
use crate::error::{Result, StressLogError};
use crate::facility::LF_ALWAYS;
use crate::host::{Host, StdHost};
use crate::layout::{
    HDR_CHUNK_SIZE, HDR_DEAD_COUNT, HDR_FACILITIES_LEVEL, HDR_HEADER_SIZE, HDR_IMAGE_CAPACITY,
    HDR_IMAGE_USED, HDR_LOGS, HDR_MAGIC_VERSION, HDR_MAX_BYTES_PER_THREAD, HDR_MAX_BYTES_TOTAL,
    HDR_MEMORY_BASE, HDR_MEMORY_CUR, HDR_MEMORY_LIMIT, HDR_START_TIME_MS, HDR_START_TIMESTAMP,
    HDR_THREADS_WITH_NO_LOG, HDR_TICK_FREQUENCY, HDR_TOTAL_CHUNKS, LOG_HEADER_SIZE, STORE_MAGIC,
    STORE_VERSION, align_up, chunk_alloc_size, data_offset,
};
use crate::messages::WELL_KNOWN;
use crate::modules::{FormatSite, ModuleId, ModuleTable};
use crate::record::MAX_ARGS;
use crate::region::Region;
use crate::thread_log::{ChunkSource, ThreadLogRef};
use parking_lot::Mutex;
use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// Chunks reserved beyond the global ceiling, absorbing the overshoot the
/// unsynchronized budget check allows.
const RESERVE_CHUNKS: u64 = 64;

/// Per-thread ceiling multiplier for GC special threads.
const GC_SPECIAL_MULTIPLIER: u64 = 5;

const PAGE_SIZE: usize = 4096;

static NEXT_REGISTRY_ID: AtomicU32 = AtomicU32::new(1);

struct Shared {
    id: u32,
    config: StressLogConfig,
    region: Region,
    data_start: usize,
    recycle_ticks: u64,
    host: Box<dyn Host>,
    clock: Box<dyn TickSource>,
    modules: ModuleTable,
    lock: Mutex<()>,
    terminated: AtomicBool,
}

impl Shared {
    fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    fn log_ref(&self, offset: usize) -> ThreadLogRef<'_> {
        ThreadLogRef::new(&self.region, offset, self.chunk_size())
    }

    /// Offsets of all logs, newest first.
    fn log_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::new();
        let mut next = self.region.load(HDR_LOGS) as usize;
        while next != 0 {
            offsets.push(next);
            next = self.log_ref(next).next_log();
        }
        offsets
    }

    fn log_on(&self, facility: u32, level: u32) -> bool {
        let word = self.region.load(HDR_FACILITIES_LEVEL);
        let (facilities, max_level) = (word as u32, (word >> 32) as u32);
        facilities != 0
            && (facility & LF_ALWAYS != 0 || facility & facilities != 0)
            && level <= max_level
    }

    fn intern(&self, s: &str) -> Option<u32> {
        if let Some(offset) = self.modules.lookup(s) {
            return Some(offset);
        }
        if self.host.in_cant_alloc_region() {
            return None;
        }
        let guard = self.lock.lock();
        self.modules.intern(&self.region, &guard, s)
    }

    fn allow_new_chunk(&self, held: u32) -> bool {
        let chunk = self.chunk_size() as u64;
        let mut per_thread = self.config.max_bytes_per_thread;
        if self.host.is_gc_special_thread() {
            per_thread = per_thread.saturating_mul(GC_SPECIAL_MULTIPLIER);
        }
        if u64::from(held) * chunk >= per_thread {
            return false;
        }
        self.region.load(HDR_TOTAL_CHUNKS) * chunk < self.config.max_bytes_total
    }

    /// A dead log that may be handed to a new thread. Caller holds the lock.
    fn find_recyclable(&self) -> Option<ThreadLogRef<'_>> {
        if self.region.load(HDR_DEAD_COUNT) == 0 {
            return None;
        }
        let cutoff = self.clock.ticks().saturating_sub(self.recycle_ticks);
        let mut oldest: Option<(ThreadLogRef<'_>, u64)> = None;
        for offset in self.log_offsets() {
            let log = self.log_ref(offset);
            if !log.is_dead() {
                continue;
            }
            let newest = log.latest_timestamp();
            if newest != 0 && newest < cutoff {
                return Some(log);
            }
            match oldest {
                None => oldest = Some((log, newest)),
                Some((_, best)) if newest != 0 && newest < best => oldest = Some((log, newest)),
                Some(_) => {}
            }
        }
        if self.allow_new_chunk(0) {
            None
        } else {
            oldest.map(|(log, _)| log)
        }
    }

    fn create_thread_log(&self) -> Option<usize> {
        if self.terminated.load(Ordering::Acquire) || self.host.in_cant_alloc_region() {
            return None;
        }
        let _guard = self.lock.lock();
        if self.terminated.load(Ordering::Acquire) {
            return None;
        }
        let thread_id = self.host.current_thread_id();

        if let Some(log) = self.find_recyclable().filter(|log| log.is_valid()) {
            log.activate(thread_id);
            self.region.saturating_sub(HDR_DEAD_COUNT, 1);
            tracing::trace!(thread_id, log = log.offset(), "Recycled dead thread log");
            return Some(log.offset());
        }

        let Some(log) = ThreadLogRef::allocate(&self.region, self.chunk_size()) else {
            tracing::debug!(thread_id, "Store exhausted, thread gets no log");
            return None;
        };
        if !log.is_valid() {
            return None;
        }
        self.region.fetch_add(HDR_TOTAL_CHUNKS, 1);
        log.activate(thread_id);
        log.set_next_log(self.region.load(HDR_LOGS) as usize);
        self.region.store(HDR_LOGS, log.offset() as u64);
        Some(log.offset())
    }

    fn thread_detach(&self, offset: usize) {
        if self.terminated.load(Ordering::Acquire) {
            return;
        }
        let _guard = self.lock.lock();
        let log = self.log_ref(offset);
        if !log.is_dead() {
            log.mark_dead();
            self.region.fetch_add(HDR_DEAD_COUNT, 1);
            tracing::trace!(thread_id = log.thread_id(), "Thread log marked dead");
        }
    }
}

impl ChunkSource for Shared {
    fn new_chunk(&self, held: u32) -> Option<usize> {
        if self.host.in_cant_alloc_region() || !self.allow_new_chunk(held) {
            return None;
        }
        let offset = self.region.allocate(chunk_alloc_size(self.chunk_size()))?;
        self.region.fetch_add(HDR_TOTAL_CHUNKS, 1);
        Some(offset)
    }
}

struct Slot {
    registry: u32,
    shared: Weak<Shared>,
    log: usize,
}

/// The calling thread's logs, one per live registry.
#[derive(Default)]
struct ThreadSlots {
    slots: Vec<Slot>,
}

impl ThreadSlots {
    fn position(&self, registry: u32) -> Option<usize> {
        self.slots.iter().position(|s| s.registry == registry)
    }

    fn log_for(&mut self, shared: &Arc<Shared>) -> Option<usize> {
        if let Some(index) = self.position(shared.id) {
            let slot = &mut self.slots[index];
            if slot.log == 0 {
                slot.log = shared.create_thread_log()?;
            }
            return Some(slot.log);
        }

        self.slots.retain(|s| s.shared.strong_count() > 0);
        let log = shared.create_thread_log();
        if log.is_none() {
            shared.region.fetch_add(HDR_THREADS_WITH_NO_LOG, 1);
        }
        self.slots.push(Slot {
            registry: shared.id,
            shared: Arc::downgrade(shared),
            log: log.unwrap_or(0),
        });
        log
    }

    fn detach(&mut self, registry: u32) {
        if let Some(index) = self.position(registry) {
            let slot = self.slots.swap_remove(index);
            if let (Some(shared), true) = (slot.shared.upgrade(), slot.log != 0) {
                shared.thread_detach(slot.log);
            }
        }
    }
}

impl Drop for ThreadSlots {
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            if slot.log == 0 {
                continue;
            }
            if let Some(shared) = slot.shared.upgrade() {
                shared.thread_detach(slot.log);
            }
        }
    }
}

thread_local! {
    static THREAD_SLOTS: RefCell<ThreadSlots> = RefCell::new(ThreadSlots::default());
}

/// Counters describing a registry's store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StressLogStats {
    /// Thread logs in the list, dead ones included.
    pub logs: usize,
    /// Logs whose thread has exited.
    pub dead_logs: u64,
    /// Chunks held across all logs.
    pub total_chunks: u64,
    /// Threads that could not obtain a log.
    pub threads_with_no_log: u64,
    /// Bytes of the data area handed out.
    pub bytes_used: u64,
    /// Bytes of the data area reserved.
    pub bytes_reserved: u64,
    /// Bytes of the format image in use.
    pub image_used: u64,
}

/// A stress log registry.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct StressLog {
    shared: Arc<Shared>,
}

impl fmt::Debug for StressLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StressLog")
            .field("id", &self.shared.id)
            .field("path", &self.shared.region.path())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Builder for a [`StressLog`] with a custom host or tick source.
pub struct StressLogBuilder {
    config: StressLogConfig,
    host: Box<dyn Host>,
    clock: Box<dyn TickSource>,
}

impl StressLogBuilder {
    /// Use `host` for thread identity and allocation checks.
    pub fn host(mut self, host: impl Host + 'static) -> Self {
        self.host = Box::new(host);
        self
    }

    /// Use `clock` for timestamps.
    pub fn clock(mut self, clock: impl TickSource + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Map the store, write its header and register the well-known
    /// messages as module 0.
    pub fn build(self) -> Result<StressLog> {
        let config = self.config;
        config.validate()?;

        let chunk_size = config.chunk_size;
        let data_start = data_offset(config.image_capacity);
        let reserve = config.total_chunks() + RESERVE_CHUNKS;
        let per_chunk = (chunk_alloc_size(chunk_size) + LOG_HEADER_SIZE) as u64;
        let data_len = reserve
            .checked_mul(per_chunk)
            .filter(|len| *len <= isize::MAX as u64 / 2)
            .ok_or_else(|| StressLogError::config("max_bytes_total", "store would not fit in memory"))?;
        let len = align_up(data_start + data_len as usize, PAGE_SIZE);

        let region = match &config.output_file {
            Some(path) => Region::create_file(path, len)?,
            None => Region::anonymous(len)?,
        };

        let clock = self.clock;
        region.store(HDR_HEADER_SIZE, data_start as u64);
        region.store(HDR_MEMORY_BASE, region.base_address());
        region.store(HDR_MEMORY_CUR, data_start as u64);
        region.store(HDR_MEMORY_LIMIT, len as u64);
        region.store(HDR_LOGS, 0);
        region.store(HDR_TICK_FREQUENCY, clock.frequency());
        region.store(HDR_START_TIMESTAMP, clock.ticks());
        region.store(HDR_THREADS_WITH_NO_LOG, 0);
        region.store(HDR_CHUNK_SIZE, chunk_size as u64);
        region.store(HDR_START_TIME_MS, clock.wall_clock_millis());
        region.store_pair(HDR_FACILITIES_LEVEL, config.facilities, config.level);
        region.store(HDR_MAX_BYTES_PER_THREAD, config.max_bytes_per_thread);
        region.store(HDR_MAX_BYTES_TOTAL, config.max_bytes_total);
        region.store(HDR_TOTAL_CHUNKS, 0);
        region.store(HDR_DEAD_COUNT, 0);
        region.store(HDR_IMAGE_CAPACITY, config.image_capacity as u64);

        let modules = ModuleTable::new(config.image_capacity);
        modules.init(&region);

        let recycle_ticks = clock.ticks_in(config.recycle_age);
        let shared = Shared {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            config,
            region,
            data_start,
            recycle_ticks,
            host: self.host,
            clock,
            modules,
            lock: Mutex::new(()),
            terminated: AtomicBool::new(false),
        };

        {
            let guard = shared.lock.lock();
            if shared
                .modules
                .add_module(&shared.region, &guard, &WELL_KNOWN)
                .is_none()
            {
                return Err(StressLogError::config(
                    "image_capacity",
                    "too small for the well-known messages",
                ));
            }
        }
        shared
            .region
            .store_pair(HDR_MAGIC_VERSION, STORE_MAGIC, STORE_VERSION);
        shared.region.flush()?;

        tracing::debug!(
            id = shared.id,
            bytes = len,
            chunk_size,
            path = ?shared.region.path(),
            "Stress log initialized"
        );

        Ok(StressLog {
            shared: Arc::new(shared),
        })
    }
}

impl StressLog {
    /// Start building a registry with the default host and tick source.
    pub fn builder(config: StressLogConfig) -> StressLogBuilder {
        StressLogBuilder {
            config,
            host: Box::new(StdHost),
            clock: Box::new(MonotonicTicks::new()),
        }
    }

    /// Initialize a registry with the default host and tick source.
    pub fn initialize(config: StressLogConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// The configuration this registry was built with.
    pub fn config(&self) -> &StressLogConfig {
        &self.shared.config
    }

    /// Path of the backing file, if the store is file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.shared.region.path()
    }

    /// Whether a message with this facility and level would be written.
    #[inline]
    pub fn log_on(&self, facility: u32, level: u32) -> bool {
        self.shared.log_on(facility, level)
    }

    /// Write a message from the calling thread.
    ///
    /// Silently does nothing if the facility or level is masked off, the
    /// thread has no log, or the format cannot be interned. Arguments past
    /// [`MAX_ARGS`] are dropped.
    ///
    /// Every call looks the format up in the store's shared string index,
    /// which takes a shard lock. Do not call this from a context that may
    /// interrupt another stress log write on the same thread, such as a
    /// signal handler. [`stress_log!`](crate::stress_log) caches the format
    /// offset per call site and skips the lookup after its first write.
    pub fn log_msg(&self, level: u32, facility: u32, format: &str, args: &[u64]) {
        if !self.log_on(facility, level) {
            return;
        }
        let Some(offset) = self.shared.intern(format) else {
            return;
        };
        self.write(facility, offset, args);
    }

    /// Write through a call-site format cache. Used by [`stress_log!`](crate::stress_log);
    /// the caller has already checked [`log_on`](Self::log_on).
    #[doc(hidden)]
    pub fn log_at(&self, site: &FormatSite, facility: u32, format: &str, args: &[u64]) {
        let offset = match site.get(self.shared.id) {
            Some(offset) => offset,
            None => {
                let Some(offset) = self.shared.intern(format) else {
                    return;
                };
                site.set(self.shared.id, offset);
                offset
            }
        };
        self.write(facility, offset, args);
    }

    fn write(&self, facility: u32, format_offset: u32, args: &[u64]) {
        let args = &args[..args.len().min(MAX_ARGS)];
        let shared = &self.shared;
        let _ = THREAD_SLOTS.try_with(|slots| {
            // A failed borrow means we are inside our own write path.
            let Ok(mut slots) = slots.try_borrow_mut() else {
                return;
            };
            let Some(offset) = slots.log_for(shared) else {
                return;
            };
            if shared.terminated.load(Ordering::Relaxed) {
                return;
            }
            let timestamp = shared.clock.ticks();
            shared
                .log_ref(offset)
                .write_msg(&**shared, facility, format_offset, timestamp, args);
        });
    }

    /// Make sure the calling thread has a log, so a later write never needs
    /// the registry lock. Returns whether the thread has one.
    pub fn create_thread_log(&self) -> bool {
        THREAD_SLOTS
            .try_with(|slots| {
                slots
                    .try_borrow_mut()
                    .ok()
                    .and_then(|mut slots| slots.log_for(&self.shared))
                    .is_some()
            })
            .unwrap_or(false)
    }

    /// Mark the calling thread's log dead. It stays readable until a new
    /// thread recycles it. Thread exit does this automatically.
    pub fn thread_detach(&self) {
        let _ = THREAD_SLOTS.try_with(|slots| {
            if let Ok(mut slots) = slots.try_borrow_mut() {
                slots.detach(self.shared.id);
            }
        });
    }

    /// Approximate admission check for a log holding `held` chunks.
    ///
    /// Concurrent callers may all pass, overshooting the global ceiling by
    /// a few chunks.
    pub fn allow_new_chunk(&self, held: u32) -> bool {
        self.shared.allow_new_chunk(held)
    }

    /// Register a module of format strings. Returns `None` if the table or
    /// the image is full.
    pub fn add_module(&self, strings: &[&str]) -> Option<ModuleId> {
        let guard = self.shared.lock.lock();
        let id = self
            .shared
            .modules
            .add_module(&self.shared.region, &guard, strings)?;
        tracing::debug!(module = id.0, strings = strings.len(), "Module registered");
        Some(id)
    }

    /// Intern a string so it can be passed as a `%s` argument.
    pub fn intern_str(&self, s: &str) -> Option<u32> {
        self.shared.intern(s)
    }

    /// `%s` argument word for `s`; zero (rendered as `(null)`) if the string
    /// cannot be interned.
    pub fn str_arg(&self, s: &str) -> u64 {
        self.intern_str(s).map(u64::from).unwrap_or(0)
    }

    /// Stop logging and tear down.
    ///
    /// With `process_detach` the store is left intact (and flushed if it is
    /// file-backed): threads may still be inside a write, so nothing is
    /// released. Otherwise all logs are freed and the data area is reset;
    /// the caller must ensure no other thread is writing.
    pub fn terminate(&self, process_detach: bool) {
        let shared = &self.shared;
        shared.terminated.store(true, Ordering::Release);
        shared.region.store_pair(HDR_FACILITIES_LEVEL, 0, 0);

        if !process_detach {
            let _guard = shared.lock.lock();
            let used = shared.region.load(HDR_MEMORY_CUR) as usize;
            shared.region.store(HDR_LOGS, 0);
            shared.region.store(HDR_TOTAL_CHUNKS, 0);
            shared.region.store(HDR_DEAD_COUNT, 0);
            shared.region.zero(shared.data_start, used);
            shared
                .region
                .store(HDR_MEMORY_CUR, shared.data_start as u64);
        }

        if let Err(e) = shared.region.flush() {
            tracing::warn!(error = %e, "Failed to flush stress log store");
        }
        tracing::debug!(id = shared.id, process_detach, "Stress log terminated");
    }

    /// Whether [`terminate`](Self::terminate) has been called.
    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::Acquire)
    }

    /// Copy the store up to its high-water mark.
    ///
    /// The copy is self-contained and decodes like a store file. Taken while
    /// other threads write, individual records may be torn; the decoder
    /// reports and skips what it cannot trust.
    pub fn snapshot(&self) -> Vec<u8> {
        let _guard = self.shared.lock.lock();
        let used = self.shared.region.load(HDR_MEMORY_CUR) as usize;
        let mut bytes = self.shared.region.copy_prefix(used);
        // Chunks allocated during the copy lie past its end.
        bytes[HDR_MEMORY_CUR..HDR_MEMORY_CUR + 8].copy_from_slice(&(used as u64).to_le_bytes());
        bytes
    }

    /// Flush a file-backed store to disk.
    pub fn flush(&self) -> Result<()> {
        self.shared.region.flush()
    }

    /// Current counters.
    pub fn stats(&self) -> StressLogStats {
        let shared = &self.shared;
        let logs = {
            let _guard = shared.lock.lock();
            shared.log_offsets().len()
        };
        StressLogStats {
            logs,
            dead_logs: shared.region.load(HDR_DEAD_COUNT),
            total_chunks: shared.region.load(HDR_TOTAL_CHUNKS),
            threads_with_no_log: shared.region.load(HDR_THREADS_WITH_NO_LOG),
            bytes_used: shared.region.load(HDR_MEMORY_CUR) - shared.data_start as u64,
            bytes_reserved: shared.region.load(HDR_MEMORY_LIMIT) - shared.data_start as u64,
            image_used: shared.region.load(HDR_IMAGE_USED),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTicks;
    use crate::facility::{LF_GC, LF_JIT, LL_INFO10, LL_INFO1000, LL_INFO10000};
    use crate::host::CantAllocRegion;
    use crate::reader::StoreImage;

    fn small_config() -> StressLogConfig {
        StressLogConfig::default()
            .with_chunk_size(4096)
            .with_max_bytes_per_thread(4096 * 2)
            .with_max_bytes_total(4096 * 16)
            .with_image_capacity(16 * 1024)
    }

    fn registry() -> StressLog {
        StressLog::builder(small_config())
            .clock(ManualTicks::new())
            .build()
            .unwrap()
    }

    #[test]
    fn log_on_honors_mask_and_level() {
        let log = StressLog::initialize(
            small_config()
                .with_facilities(LF_GC)
                .with_level(LL_INFO1000),
        )
        .unwrap();
        assert!(log.log_on(LF_GC, LL_INFO10));
        assert!(log.log_on(LF_GC, LL_INFO1000));
        assert!(!log.log_on(LF_GC, LL_INFO10000));
        assert!(!log.log_on(LF_JIT, LL_INFO10));
        assert!(log.log_on(LF_ALWAYS, LL_INFO10));
    }

    #[test]
    fn zero_facilities_disable_logging() {
        let log = StressLog::initialize(small_config().with_facilities(0)).unwrap();
        assert!(!log.log_on(LF_ALWAYS, 0));
        log.log_msg(0, LF_ALWAYS, "never", &[]);
        assert_eq!(log.stats().logs, 0);
    }

    #[test]
    fn first_write_creates_a_log() {
        let log = registry();
        assert_eq!(log.stats().logs, 0);
        log.log_msg(LL_INFO10, LF_GC, "hello %d\n", &[1]);
        log.log_msg(LL_INFO10, LF_GC, "hello %d\n", &[2]);
        let stats = log.stats();
        assert_eq!(stats.logs, 1);
        assert_eq!(stats.total_chunks, 1);
    }

    #[test]
    fn warmed_call_site_skips_the_format_lookup() {
        let log = registry();
        let site = FormatSite::new();
        log.log_at(&site, LF_GC, "warm %d\n", &[1]);
        // The cached offset wins over the format passed in.
        log.log_at(&site, LF_GC, "never interned", &[2]);

        let bytes = log.snapshot();
        let image = StoreImage::parse(&bytes).unwrap();
        let view = image.logs().next().unwrap().unwrap();
        let formats: Vec<&str> = view
            .read()
            .map(|at| image.format_str(at.unwrap().record.format_offset()).unwrap())
            .collect();
        assert_eq!(formats, vec!["warm %d\n", "warm %d\n"]);
    }

    #[test]
    fn cant_alloc_region_blocks_log_creation() {
        let log = registry();
        {
            let _region = CantAllocRegion::enter();
            assert!(!log.create_thread_log());
            log.log_msg(LL_INFO10, LF_GC, "dropped", &[]);
        }
        assert_eq!(log.stats().logs, 0);
        assert_eq!(log.stats().threads_with_no_log, 1);
        assert!(log.create_thread_log());
        assert_eq!(log.stats().logs, 1);
        assert_eq!(log.stats().threads_with_no_log, 1);
    }

    #[test]
    fn thread_exit_marks_log_dead() {
        let log = registry();
        let worker = log.clone();
        std::thread::spawn(move || worker.log_msg(LL_INFO10, LF_GC, "bye", &[]))
            .join()
            .unwrap();
        let stats = log.stats();
        assert_eq!(stats.logs, 1);
        assert_eq!(stats.dead_logs, 1);
    }

    #[test]
    fn dead_log_is_recycled_after_recycle_age() {
        let clock = Arc::new(ManualTicks::new());
        let log = StressLog::builder(small_config())
            .clock(clock.clone())
            .build()
            .unwrap();
        let worker = log.clone();
        std::thread::spawn(move || worker.log_msg(LL_INFO10, LF_GC, "first", &[]))
            .join()
            .unwrap();
        assert_eq!(log.stats().dead_logs, 1);

        clock.advance_by(std::time::Duration::from_secs(2));
        log.log_msg(LL_INFO10, LF_GC, "second", &[]);
        let stats = log.stats();
        assert_eq!(stats.logs, 1);
        assert_eq!(stats.dead_logs, 0);
    }

    #[test]
    fn young_dead_log_is_not_recycled() {
        let log = registry();
        let worker = log.clone();
        std::thread::spawn(move || worker.log_msg(LL_INFO10, LF_GC, "first", &[]))
            .join()
            .unwrap();
        log.log_msg(LL_INFO10, LF_GC, "second", &[]);
        let stats = log.stats();
        assert_eq!(stats.logs, 2);
        assert_eq!(stats.dead_logs, 1);
    }

    #[test]
    fn add_module_until_full() {
        let log = registry();
        let mut ids = Vec::new();
        while let Some(id) = log.add_module(&["a %d", "b %d"]) {
            ids.push(id);
        }
        assert_eq!(ids, vec![ModuleId(1), ModuleId(2), ModuleId(3), ModuleId(4)]);
    }

    #[test]
    fn intern_str_is_stable() {
        let log = registry();
        let a = log.intern_str("worker-1").unwrap();
        assert_eq!(log.intern_str("worker-1"), Some(a));
        assert_eq!(log.str_arg("worker-1"), u64::from(a));
    }

    #[test]
    fn snapshot_parses() {
        let log = registry();
        log.log_msg(LL_INFO10, LF_GC, "x", &[]);
        let bytes = log.snapshot();
        let image = StoreImage::parse(&bytes).unwrap();
        assert_eq!(image.header().chunk_size, 4096);
        assert_eq!(image.logs().count(), 1);
        assert_eq!(image.header().modules.len(), 1);
    }

    #[test]
    fn terminate_frees_logs() {
        let log = registry();
        log.log_msg(LL_INFO10, LF_GC, "x", &[]);
        log.terminate(false);
        assert!(log.is_terminated());
        let stats = log.stats();
        assert_eq!(stats.logs, 0);
        assert_eq!(stats.total_chunks, 0);
        assert_eq!(stats.bytes_used, 0);
        log.log_msg(LL_INFO10, LF_GC, "ignored", &[]);
        assert_eq!(log.stats().logs, 0);
    }

    #[test]
    fn process_detach_keeps_store() {
        let log = registry();
        log.log_msg(LL_INFO10, LF_GC, "x", &[]);
        log.terminate(true);
        assert_eq!(log.stats().logs, 1);
        assert!(!log.log_on(LF_ALWAYS, 0));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = StressLog::initialize(small_config().with_chunk_size(1000)).unwrap_err();
        assert_eq!(err.code(), "E001");
        let err = StressLog::initialize(small_config().with_image_capacity(128)).unwrap_err();
        assert_eq!(err.code(), "E001");
    }
}
