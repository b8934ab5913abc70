// Hybrid array + hash table.
//
// The array part stores keys 1..n densely. The hash part is a power-of-two
// node vector using main-position chaining: every entry lives either in the
// slot its hash names (its main position) or in a free slot linked from
// there. Colliding entries that sit in someone else's main position are
// relocated when that position's owner arrives. Free slots are found with a
// descending cursor; when it runs out the caller rehashes.
//
// A key whose value is nil is logically absent. Entries are never unlinked
// on removal: the GC may later mark the key slot dead (the key object can be
// collected) but the slot keeps its hash so chains stay walkable until the
// next rehash rebuilds the table.
//
// Hashes are supplied by the caller for arbitrary keys and cached per node,
// so rehashing never needs to look outside the table. Number keys hash
// through a pure mixer here (with -0 folded into +0).

use crate::gc::TableId;
use crate::lua_value::LuaValue;

/// Largest power-of-two exponent for either part. Beyond this the table
/// reports overflow and the caller raises "table overflow".
const MAXBITS: usize = 26;
const MAX_ASIZE: usize = 1 << MAXBITS;

#[derive(Debug)]
pub struct TableOverflow;

#[derive(Clone, Copy)]
struct Node {
    key: LuaValue,
    key_hash: u64,
    value: LuaValue,
    /// Index of the next node in this chain, or -1.
    next: i32,
    /// Key object may have been collected; slot kept only for the chain.
    dead: bool,
}

const FREE_NODE: Node = Node {
    key: LuaValue::Nil,
    key_hash: 0,
    value: LuaValue::Nil,
    next: -1,
    dead: false,
};

impl Node {
    #[inline(always)]
    fn is_free(&self) -> bool {
        self.key.is_nil() && !self.dead
    }

    #[inline(always)]
    fn has_key(&self) -> bool {
        !self.key.is_nil() || self.dead
    }
}

pub struct LuaTable {
    array: Vec<LuaValue>,
    nodes: Vec<Node>,
    /// All node positions at or above this cursor have been handed out.
    lastfree: usize,
    metatable: Option<TableId>,
    /// Bit i set means "tag method i known absent" (fast metamethods only).
    pub flags: u8,
}

/// Pure mixer for number keys; -0 and +0 must land in the same slot and
/// NaN never gets this far (rejected before insertion).
#[inline]
pub fn hash_number(n: f64) -> u64 {
    let n = if n == 0.0 { 0.0 } else { n };
    let mut h = n.to_bits();
    // splitmix64 finalizer
    h = (h ^ (h >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94d049bb133111eb);
    h ^ (h >> 31)
}

/// Pure mixer for non-number, non-string keys (identity-keyed).
#[inline]
pub fn hash_pointer(tag: u8, raw: u64) -> u64 {
    hash_number(f64::from_bits((raw << 8) | tag as u64))
}

/// If `n` is an exact integer, its value.
#[inline(always)]
pub fn exact_int(n: f64) -> Option<i64> {
    let i = n as i64;
    if i as f64 == n { Some(i) } else { None }
}

impl LuaTable {
    pub fn new(narray: usize, nhash: usize) -> Self {
        let mut t = LuaTable {
            array: Vec::new(),
            nodes: Vec::new(),
            lastfree: 0,
            metatable: None,
            flags: 0,
        };
        if narray > 0 {
            t.array = vec![LuaValue::Nil; narray.min(MAX_ASIZE)];
        }
        if nhash > 0 {
            t.set_node_vector(nhash);
        }
        t
    }

    #[inline(always)]
    pub fn metatable(&self) -> Option<TableId> {
        self.metatable
    }

    /// Replacing the metatable invalidates the absence cache.
    pub fn set_metatable(&mut self, mt: Option<TableId>) {
        self.metatable = mt;
        self.flags = 0;
    }

    #[inline(always)]
    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    #[inline(always)]
    pub fn node_len(&self) -> usize {
        self.nodes.len()
    }

    /// Accounted footprint in bytes, used for GC byte bookkeeping.
    pub fn footprint(&self) -> usize {
        std::mem::size_of::<LuaTable>()
            + self.array.capacity() * std::mem::size_of::<LuaValue>()
            + self.nodes.capacity() * std::mem::size_of::<Node>()
    }

    #[inline(always)]
    fn main_position(&self, hash: u64) -> usize {
        debug_assert!(!self.nodes.is_empty());
        (hash as usize) & (self.nodes.len() - 1)
    }

    fn set_node_vector(&mut self, size: usize) {
        let lsize = ceil_log2(size);
        let size = 1usize << lsize;
        self.nodes = vec![FREE_NODE; size];
        self.lastfree = size;
    }

    // ---- lookup ----

    /// Raw read; `hash` must be the caller's hash for `key` (ignored for
    /// array hits). Missing keys read as nil.
    pub fn raw_get(&self, key: &LuaValue, hash: u64) -> LuaValue {
        if let LuaValue::Number(n) = key {
            if let Some(i) = exact_int(*n) {
                if i >= 1 && (i as usize) <= self.array.len() {
                    return self.array[i as usize - 1];
                }
            }
        }
        match self.find_node(key, hash) {
            Some(i) => self.nodes[i].value,
            None => LuaValue::Nil,
        }
    }

    /// Integer-key read without the caller supplying a hash.
    pub fn raw_get_int(&self, i: i64) -> LuaValue {
        if i >= 1 && (i as usize) <= self.array.len() {
            return self.array[i as usize - 1];
        }
        let n = i as f64;
        let key = LuaValue::Number(n);
        match self.find_node(&key, hash_number(n)) {
            Some(j) => self.nodes[j].value,
            None => LuaValue::Nil,
        }
    }

    fn find_node(&self, key: &LuaValue, hash: u64) -> Option<usize> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut i = self.main_position(hash) as i32;
        while i >= 0 {
            let n = &self.nodes[i as usize];
            if !n.dead && n.key.raw_equals(key) {
                return Some(i as usize);
            }
            i = n.next;
        }
        None
    }

    // ---- insertion ----

    /// Raw write. Nil/NaN key validity is the caller's concern (checked at
    /// the VM layer so the error can carry source position). Returns
    /// `Err(TableFull)` when a new key finds no free node; the caller then
    /// rehashes and retries.
    pub fn raw_set(
        &mut self,
        key: LuaValue,
        hash: u64,
        value: LuaValue,
    ) -> Result<(), TableFull> {
        if let LuaValue::Number(n) = key {
            if let Some(i) = exact_int(n) {
                if i >= 1 && (i as usize) <= self.array.len() {
                    self.array[i as usize - 1] = value;
                    return Ok(());
                }
            }
        }
        if let Some(i) = self.find_node(&key, hash) {
            self.nodes[i].value = value;
            return Ok(());
        }
        // Writing nil to an absent key is a no-op; do not grow for it.
        if value.is_nil() {
            return Ok(());
        }
        self.insert_new_key(key, hash, value)
    }

    fn free_pos(&mut self) -> Option<usize> {
        while self.lastfree > 0 {
            self.lastfree -= 1;
            if self.nodes[self.lastfree].is_free() {
                return Some(self.lastfree);
            }
        }
        None
    }

    fn insert_new_key(
        &mut self,
        key: LuaValue,
        hash: u64,
        value: LuaValue,
    ) -> Result<(), TableFull> {
        if self.nodes.is_empty() {
            return Err(TableFull { key, hash, value });
        }
        let mp = self.main_position(hash);
        if self.nodes[mp].has_key() {
            let Some(free) = self.free_pos() else {
                return Err(TableFull { key, hash, value });
            };
            let colliding_main = self.main_position(self.nodes[mp].key_hash);
            if colliding_main != mp {
                // The occupant does not belong here: move it to the free
                // slot and take over its position. Its chain predecessor
                // sits somewhere on the chain starting at its own main
                // position.
                let mut prev = colliding_main;
                while self.nodes[prev].next != mp as i32 {
                    prev = self.nodes[prev].next as usize;
                }
                self.nodes[free] = self.nodes[mp];
                self.nodes[prev].next = free as i32;
                self.nodes[mp] = Node {
                    key,
                    key_hash: hash,
                    value,
                    next: -1,
                    dead: false,
                };
            } else {
                // The occupant owns this position; chain the new entry in
                // right behind it.
                self.nodes[free] = Node {
                    key,
                    key_hash: hash,
                    value,
                    next: self.nodes[mp].next,
                    dead: false,
                };
                self.nodes[mp].next = free as i32;
            }
        } else {
            self.nodes[mp] = Node {
                key,
                key_hash: hash,
                value,
                next: -1,
                dead: false,
            };
        }
        Ok(())
    }

    // ---- rehash ----

    /// Rebuild both parts sized for the current population plus one extra
    /// key about to be inserted. The array part takes the largest n such
    /// that more than half of the slots 1..n hold integer keys.
    pub fn rehash(&mut self, extra: &LuaValue) -> Result<(), TableOverflow> {
        let mut nums = [0usize; MAXBITS + 1];
        let mut nasize = self.count_array_keys(&mut nums);
        let mut total = nasize;
        total += self.count_hash_keys(&mut nums, &mut nasize);
        if count_int_key(extra, &mut nums) {
            nasize += 1;
        }
        total += 1;
        let (na, used_in_array) = compute_sizes(&nums, nasize);
        self.resize(na, total - used_in_array)
    }

    fn count_array_keys(&self, nums: &mut [usize; MAXBITS + 1]) -> usize {
        let mut total = 0;
        let mut lg = 0usize;
        let mut ttlg = 1usize; // 2^lg
        let mut i = 1usize; // first candidate of each slice
        while lg <= MAXBITS && i <= self.array.len() {
            let lim = ttlg.min(self.array.len());
            let mut count = 0;
            for k in i..=lim {
                if !self.array[k - 1].is_nil() {
                    count += 1;
                }
            }
            nums[lg] += count;
            total += count;
            i = lim + 1;
            lg += 1;
            ttlg = ttlg.saturating_mul(2);
        }
        total
    }

    fn count_hash_keys(&self, nums: &mut [usize; MAXBITS + 1], nasize: &mut usize) -> usize {
        let mut total = 0;
        for n in &self.nodes {
            if n.has_key() && !n.dead && !n.value.is_nil() {
                total += 1;
                if count_int_key(&n.key, nums) {
                    *nasize += 1;
                }
            }
        }
        total
    }

    fn resize(&mut self, nasize: usize, nhsize: usize) -> Result<(), TableOverflow> {
        if nasize > MAX_ASIZE || nhsize > MAX_ASIZE {
            return Err(TableOverflow);
        }
        let old_array = std::mem::take(&mut self.array);
        let old_nodes = std::mem::take(&mut self.nodes);

        self.array = vec![LuaValue::Nil; nasize];
        if nhsize > 0 {
            self.set_node_vector(nhsize);
        } else {
            self.lastfree = 0;
        }

        // Shorter array: keys past the new length fall through to the hash
        // part like any other entry.
        for (idx, v) in old_array.into_iter().enumerate() {
            if !v.is_nil() {
                let k = (idx + 1) as i64;
                if idx < self.array.len() {
                    self.array[idx] = v;
                } else {
                    self.reinsert(LuaValue::Number(k as f64), hash_number(k as f64), v);
                }
            }
        }
        for n in old_nodes {
            if n.has_key() && !n.dead && !n.value.is_nil() {
                self.reinsert(n.key, n.key_hash, n.value);
            }
        }
        Ok(())
    }

    fn reinsert(&mut self, key: LuaValue, hash: u64, value: LuaValue) {
        if let LuaValue::Number(n) = key {
            if let Some(i) = exact_int(n) {
                if i >= 1 && (i as usize) <= self.array.len() {
                    self.array[i as usize - 1] = value;
                    return;
                }
            }
        }
        if self.insert_new_key(key, hash, value).is_err() {
            // The new parts were sized from an exact population count, so
            // a free node always exists here.
            unreachable!("table resize lost capacity");
        }
    }

    /// Pre-size the array part (bulk constructors); keeps hash population.
    /// Array entries past the new length count toward the hash part.
    pub fn resize_array(&mut self, nasize: usize) -> Result<(), TableOverflow> {
        let mut nh = self
            .nodes
            .iter()
            .filter(|n| n.has_key() && !n.dead && !n.value.is_nil())
            .count();
        for (i, v) in self.array.iter().enumerate() {
            if i >= nasize && !v.is_nil() {
                nh += 1;
            }
        }
        self.resize(nasize, nh)
    }

    // ---- length ----

    /// A boundary: n with t[n] non-nil and t[n+1] nil (0 when t[1] is nil).
    /// Not unique when the table has holes.
    pub fn boundary(&self) -> usize {
        let alen = self.array.len();
        if alen > 0 && self.array[alen - 1].is_nil() {
            // Binary search inside the array part.
            let mut i = 0usize;
            let mut j = alen;
            while j - i > 1 {
                let m = (i + j) / 2;
                if self.array[m - 1].is_nil() {
                    j = m;
                } else {
                    i = m;
                }
            }
            return i;
        }
        if self.nodes.is_empty() {
            return alen;
        }
        // Unbound search over the hash part: widen until a nil cap is
        // found, then binary search.
        let mut i = alen as i64;
        let mut j = i + 1;
        while !self.raw_get_int(j).is_nil() {
            i = j;
            if j > i64::MAX / 2 {
                // Pathological table; fall back to a linear scan.
                let mut k = 1;
                while !self.raw_get_int(k).is_nil() {
                    k += 1;
                }
                return (k - 1) as usize;
            }
            j *= 2;
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if self.raw_get_int(m).is_nil() {
                j = m;
            } else {
                i = m;
            }
        }
        i as usize
    }

    // ---- iteration ----

    /// Find the entry following `key` in traversal order (array part then
    /// hash part). `None` means the traversal is finished; `Err` means the
    /// key was not in the table.
    pub fn next_entry(
        &self,
        key: &LuaValue,
        hash: u64,
    ) -> Result<Option<(LuaValue, LuaValue)>, InvalidKey> {
        let start = self.find_index(key, hash)?;
        for i in start..self.array.len() {
            if !self.array[i].is_nil() {
                return Ok(Some((LuaValue::Number((i + 1) as f64), self.array[i])));
            }
        }
        let hstart = start.saturating_sub(self.array.len());
        for i in hstart..self.nodes.len() {
            let n = &self.nodes[i];
            if !n.dead && !n.key.is_nil() && !n.value.is_nil() {
                return Ok(Some((n.key, n.value)));
            }
        }
        Ok(None)
    }

    /// Position just past `key` in the unified array+hash index space.
    fn find_index(&self, key: &LuaValue, hash: u64) -> Result<usize, InvalidKey> {
        if key.is_nil() {
            return Ok(0);
        }
        if let LuaValue::Number(n) = key {
            if let Some(i) = exact_int(*n) {
                if i >= 1 && (i as usize) <= self.array.len() {
                    return Ok(i as usize);
                }
            }
        }
        match self.find_node(key, hash) {
            Some(i) => Ok(self.array.len() + i + 1),
            None => Err(InvalidKey),
        }
    }

    /// Snapshot of all live entries; used by the GC when traversing (it
    /// cannot hold a borrow of the table while marking other objects).
    pub fn all_entries(&self) -> Vec<(LuaValue, LuaValue)> {
        let mut out = Vec::with_capacity(self.array.len() + self.nodes.len());
        for (i, v) in self.array.iter().enumerate() {
            if !v.is_nil() {
                out.push((LuaValue::Number((i + 1) as f64), *v));
            }
        }
        for n in &self.nodes {
            if n.has_key() && !n.dead && !n.value.is_nil() {
                out.push((n.key, n.value));
            }
        }
        out
    }

    // ---- GC hooks ----

    /// Live hash entries with their node index, for weak-table clearing.
    pub(crate) fn hash_entries_indexed(
        &self,
    ) -> impl Iterator<Item = (usize, LuaValue, LuaValue)> + '_ {
        self.nodes.iter().enumerate().filter_map(|(i, n)| {
            if n.has_key() && !n.dead && !n.value.is_nil() {
                Some((i, n.key, n.value))
            } else {
                None
            }
        })
    }

    pub(crate) fn array_entries_indexed(
        &self,
    ) -> impl Iterator<Item = (usize, LuaValue)> + '_ {
        self.array
            .iter()
            .enumerate()
            .filter_map(|(i, v)| if v.is_nil() { None } else { Some((i, *v)) })
    }

    /// Remove a hash entry, keeping the slot for chain integrity. The key
    /// is marked dead when it is collectable (the object may be freed).
    pub(crate) fn clear_hash_entry(&mut self, i: usize) {
        let n = &mut self.nodes[i];
        n.value = LuaValue::Nil;
        if n.key.is_collectable() {
            n.dead = true;
        }
    }

    pub(crate) fn clear_array_entry(&mut self, i: usize) {
        self.array[i] = LuaValue::Nil;
    }

    /// Turn entries whose value is nil into dead slots so the GC does not
    /// have to keep their keys alive.
    pub(crate) fn drop_vacant_keys(&mut self) {
        for n in &mut self.nodes {
            if !n.dead && !n.key.is_nil() && n.value.is_nil() && n.key.is_collectable() {
                n.dead = true;
            }
        }
    }
}

#[derive(Debug)]
pub struct TableFull {
    pub key: LuaValue,
    pub hash: u64,
    pub value: LuaValue,
}

#[derive(Debug)]
pub struct InvalidKey;

/// Does `key` count toward the array part, and into which log slice?
fn count_int_key(key: &LuaValue, nums: &mut [usize; MAXBITS + 1]) -> bool {
    if let LuaValue::Number(n) = key {
        if let Some(i) = exact_int(*n) {
            if i >= 1 && (i as usize) <= MAX_ASIZE {
                nums[ceil_log2(i as usize)] += 1;
                return true;
            }
        }
    }
    false
}

/// Largest n (a power of two) such that more than half of the slots 1..n
/// would be occupied; returns (n, number of keys that move into the array).
fn compute_sizes(nums: &[usize; MAXBITS + 1], total_int: usize) -> (usize, usize) {
    let mut best_n = 0usize;
    let mut best_used = 0usize;
    let mut accum = 0usize;
    let mut two_to_i = 1usize;
    for i in 0..=MAXBITS {
        accum += nums[i];
        if accum > two_to_i / 2 {
            best_n = two_to_i;
            best_used = accum;
        }
        if accum == total_int {
            break;
        }
        two_to_i = two_to_i.saturating_mul(2);
    }
    (best_n, best_used)
}

fn ceil_log2(x: usize) -> usize {
    debug_assert!(x > 0 || x == 0);
    if x <= 1 {
        return 0;
    }
    (usize::BITS - (x - 1).leading_zeros()) as usize
}
