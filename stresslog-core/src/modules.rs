//! Module table and format image.
//!
//! Format strings are copied into an image embedded in the store header so a
//! decoder can resolve them with nothing but the store. A record refers to
//! its format by byte offset into that image. Strings are grouped into
//! modules (at most [`MAX_MODULES`]); strings interned on the fly extend the
//! newest module.

use crate::layout::{
    HDR_IMAGE_USED, HDR_MODULE_COUNT, HDR_MODULES, IMAGE_OFFSET, IMAGE_RESERVED, MAX_MODULES,
    MODULE_DESC_SIZE, align_up,
};
use crate::region::Region;
use dashmap::DashMap;
use parking_lot::MutexGuard;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Index of a registered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

/// Per-call-site cache of a format offset.
///
/// Holds the offset together with the id of the registry it belongs to, so a
/// site shared by several registries simply misses for all but one.
#[derive(Debug)]
pub struct FormatSite {
    cached: AtomicU64,
}

impl FormatSite {
    /// An empty cache.
    pub const fn new() -> Self {
        Self {
            cached: AtomicU64::new(0),
        }
    }

    pub(crate) fn get(&self, registry: u32) -> Option<u32> {
        let cached = self.cached.load(Ordering::Relaxed);
        ((cached >> 32) as u32 == registry).then_some(cached as u32)
    }

    pub(crate) fn set(&self, registry: u32, offset: u32) {
        self.cached
            .store((u64::from(registry) << 32) | u64::from(offset), Ordering::Relaxed);
    }
}

impl Default for FormatSite {
    fn default() -> Self {
        Self::new()
    }
}

/// Interned strings of one store.
pub(crate) struct ModuleTable {
    offsets: DashMap<Box<str>, u32>,
    capacity: usize,
}

impl ModuleTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            offsets: DashMap::new(),
            capacity,
        }
    }

    /// Write an empty table and reserve the image's leading zero bytes.
    pub(crate) fn init(&self, region: &Region) {
        region.store(HDR_MODULE_COUNT, 0);
        region.store(HDR_IMAGE_USED, IMAGE_RESERVED as u64);
    }

    /// Offset of an already interned string.
    #[inline]
    pub(crate) fn lookup(&self, s: &str) -> Option<u32> {
        self.offsets.get(s).map(|entry| *entry)
    }

    pub(crate) fn module_count(&self, region: &Region) -> usize {
        region.load(HDR_MODULE_COUNT) as usize
    }

    fn image_used(&self, region: &Region) -> usize {
        region.load(HDR_IMAGE_USED) as usize
    }

    fn footprint(s: &str) -> usize {
        align_up(s.len() + 1, 8)
    }

    /// Copy `s` to the end of the image. The caller holds the registry lock
    /// and updates the module table afterwards.
    fn append(&self, region: &Region, s: &str) -> Option<u32> {
        let offset = self.image_used(region);
        let end = offset + Self::footprint(s);
        if end > self.capacity {
            return None;
        }
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        region.write_bytes(IMAGE_OFFSET + offset, &bytes);
        region.store(HDR_IMAGE_USED, end as u64);
        self.offsets.entry(s.into()).or_insert(offset as u32);
        Some(offset as u32)
    }

    /// Register a new module holding `strings`.
    ///
    /// Fails without side effects if the table is full or the strings do not
    /// fit in the image.
    pub(crate) fn add_module(
        &self,
        region: &Region,
        _lock: &MutexGuard<'_, ()>,
        strings: &[&str],
    ) -> Option<ModuleId> {
        let index = self.module_count(region);
        if index >= MAX_MODULES {
            tracing::warn!(capacity = MAX_MODULES, "Module table full");
            return None;
        }
        let base = self.image_used(region);
        let needed: usize = strings.iter().map(|s| Self::footprint(s)).sum();
        if base + needed > self.capacity {
            tracing::warn!(
                needed,
                available = self.capacity - base,
                "Format image too small for module"
            );
            return None;
        }

        for s in strings {
            self.append(region, s)?;
        }
        let desc = HDR_MODULES + index * MODULE_DESC_SIZE;
        region.store(desc, base as u64);
        region.store(desc + 8, (self.image_used(region) - base) as u64);
        region.store(HDR_MODULE_COUNT, index as u64 + 1);
        Some(ModuleId(index as u32))
    }

    /// Intern `s`, extending the newest module. Returns the existing offset
    /// if `s` is already interned.
    pub(crate) fn intern(
        &self,
        region: &Region,
        lock: &MutexGuard<'_, ()>,
        s: &str,
    ) -> Option<u32> {
        if let Some(offset) = self.lookup(s) {
            return Some(offset);
        }
        let count = self.module_count(region);
        if count == 0 {
            let offset_before = self.image_used(region) as u32;
            self.add_module(region, lock, &[s])?;
            return Some(offset_before);
        }
        let offset = self.append(region, s)?;
        let desc = HDR_MODULES + (count - 1) * MODULE_DESC_SIZE;
        let base = region.load(desc) as usize;
        region.store(desc + 8, (self.image_used(region) - base) as u64);
        Some(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::data_offset;
    use crate::reader::StoreImage;
    use parking_lot::Mutex;

    fn region(capacity: usize) -> Region {
        let region = Region::anonymous(data_offset(capacity) + 4096).unwrap();
        region.store(0, data_offset(capacity) as u64);
        region
    }

    #[test]
    fn format_site_is_registry_scoped() {
        let site = FormatSite::new();
        assert_eq!(site.get(1), None);
        site.set(1, 64);
        assert_eq!(site.get(1), Some(64));
        assert_eq!(site.get(2), None);
    }

    #[test]
    fn modules_are_contiguous_and_deduplicated() {
        let region = region(4096);
        let lock = Mutex::new(());
        let table = ModuleTable::new(4096);
        table.init(&region);
        let guard = lock.lock();

        let m0 = table.add_module(&region, &guard, &["alpha %d\n", "beta"]).unwrap();
        assert_eq!(m0, ModuleId(0));
        assert_eq!(table.lookup("alpha %d\n"), Some(IMAGE_RESERVED as u32));
        assert_eq!(table.lookup("beta"), Some(IMAGE_RESERVED as u32 + 16));

        let again = table.intern(&region, &guard, "beta").unwrap();
        assert_eq!(again, IMAGE_RESERVED as u32 + 16);

        let fresh = table.intern(&region, &guard, "gamma").unwrap();
        assert_eq!(fresh, IMAGE_RESERVED as u32 + 24);
        assert_eq!(region.load(HDR_MODULES + 8), 32);
    }

    #[test]
    fn full_table_and_full_image_are_refused() {
        let region = region(64);
        let lock = Mutex::new(());
        let table = ModuleTable::new(64);
        table.init(&region);
        let guard = lock.lock();

        assert!(table.add_module(&region, &guard, &["x".repeat(100).as_str()]).is_none());
        assert_eq!(table.module_count(&region), 0);
        for _ in 0..MAX_MODULES {
            table.add_module(&region, &guard, &[]).unwrap();
        }
        assert!(table.add_module(&region, &guard, &[]).is_none());
    }

    #[test]
    fn interned_strings_resolve_from_image() {
        let region = region(4096);
        let lock = Mutex::new(());
        let table = ModuleTable::new(4096);
        table.init(&region);
        let guard = lock.lock();
        let offset = table.intern(&region, &guard, "hello %s").unwrap();

        let len = region.load(0) as usize;
        let mut bytes = region.copy_prefix(len);
        // Minimal header so the image parses.
        bytes[8..12].copy_from_slice(b"STRL");
        bytes[12..16].copy_from_slice(&crate::layout::STORE_VERSION.to_le_bytes());
        bytes[24..32].copy_from_slice(&(len as u64).to_le_bytes());
        bytes[32..40].copy_from_slice(&(len as u64).to_le_bytes());
        bytes[48..56].copy_from_slice(&1u64.to_le_bytes());
        bytes[72..80].copy_from_slice(&4096u64.to_le_bytes());
        bytes[128..136].copy_from_slice(&4096u64.to_le_bytes());

        let image = StoreImage::parse(&bytes).unwrap();
        assert_eq!(image.format_str(offset), Some("hello %s"));
        assert_eq!(image.format_str(0), None);
    }
}
