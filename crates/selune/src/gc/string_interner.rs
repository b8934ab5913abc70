// String interning table.
//
// Open-chained buckets (a power-of-two Vec of id chains) keyed by the
// full-content hash. Every string in the VM goes through here, so equal
// byte content always yields the same id and string equality elsewhere is
// id equality. The hash is computed once with ahash and frozen in the
// string object.
//
// The table grows when the population exceeds the bucket count and is
// shrunk by the GC between string-sweep steps, never mid-sweep.

use std::hash::{BuildHasher, Hash, Hasher};

use ahash::RandomState;

use crate::gc::gc_header::GcHeader;
use crate::gc::object_pool::{Arena, GcString};
use crate::gc::StringId;
use crate::lua_value::LuaString;

pub const MIN_STRTAB_SIZE: usize = 32;

pub struct StringInterner {
    pub(crate) buckets: Vec<Vec<StringId>>,
    pub(crate) nuse: usize,
    hash_builder: RandomState,
}

impl StringInterner {
    pub fn new() -> Self {
        StringInterner {
            buckets: vec![Vec::new(); MIN_STRTAB_SIZE],
            nuse: 0,
            hash_builder: RandomState::new(),
        }
    }

    #[inline]
    pub fn hash_str(&self, s: &str) -> u64 {
        let mut h = self.hash_builder.build_hasher();
        s.hash(&mut h);
        h.finish()
    }

    #[inline(always)]
    fn bucket_of(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    /// Insert-if-absent. A hit on a string already condemned this cycle
    /// resurrects it (its dead-white bit is cleared). Returns the id and
    /// the bytes newly allocated (0 on a hit).
    pub fn intern(
        &mut self,
        strings: &mut Arena<GcString>,
        current_white: u8,
        s: &str,
    ) -> (StringId, usize) {
        let hash = self.hash_str(s);
        let b = self.bucket_of(hash);
        for &id in &self.buckets[b] {
            let obj = strings.get(id.0).expect("interned id out of pool");
            if obj.data.hash == hash && obj.data.as_str() == s {
                let obj = strings.get_mut(id.0).expect("interned id out of pool");
                if obj.header.is_dead(current_white) {
                    obj.header.make_white(current_white);
                }
                return (id, 0);
            }
        }
        let data = LuaString::new(s.to_string(), hash);
        let size = data.footprint();
        let header = GcHeader::with_white(current_white, size as u32);
        let id = StringId(strings.alloc(GcString { header, data }));
        self.buckets[b].push(id);
        self.nuse += 1;
        (id, size)
    }

    /// Grow when the population outruns the buckets. Callers invoke this
    /// only outside a string-sweep step, since it rebuilds the buckets.
    pub fn maybe_grow(&mut self, strings: &Arena<GcString>) {
        if self.nuse > self.buckets.len() && self.buckets.len() <= (u32::MAX as usize) / 4 {
            self.resize(strings, self.buckets.len() * 2);
        }
    }

    pub fn len(&self) -> usize {
        self.nuse
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Rebuild the bucket array at a new power-of-two size. Only called
    /// outside a string-sweep step.
    pub fn resize(&mut self, strings: &Arena<GcString>, new_size: usize) {
        let new_size = new_size.max(MIN_STRTAB_SIZE).next_power_of_two();
        if new_size == self.buckets.len() {
            return;
        }
        let old = std::mem::replace(&mut self.buckets, vec![Vec::new(); new_size]);
        for chain in old {
            for id in chain {
                let hash = strings.get(id.0).expect("interned id out of pool").data.hash;
                let b = (hash as usize) & (new_size - 1);
                self.buckets[b].push(id);
            }
        }
    }

    /// Shrink when three quarters of the table is unused.
    pub fn maybe_shrink(&mut self, strings: &Arena<GcString>) {
        if self.nuse < self.buckets.len() / 4 && self.buckets.len() > MIN_STRTAB_SIZE {
            self.resize(strings, self.buckets.len() / 2);
        }
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}
