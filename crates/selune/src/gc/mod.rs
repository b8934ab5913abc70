// Incremental tri-color mark & sweep.
//
// Phase machine: Pause -> Propagate -> (atomic burst) -> SweepString ->
// Sweep -> Finalize -> Pause. Work interleaves with the mutator at
// allocation check points; the budget per step scales with `gcstepmul`
// and overruns accumulate in `gcdept` so later steps catch up.
//
// Two white identities: objects born during a cycle carry the current
// white and survive it; after the atomic flip the old white means dead
// and the sweepers free it. The invariant "no black object points to a
// white one" holds everywhere outside the atomic burst, maintained by a
// forward barrier (mark the new value) on non-table holders and a
// backward barrier (repaint the table gray, revisit at atomic) on
// tables, where stores are too frequent to chase individually.
//
// Userdata with a `__gc` metamethod are separated at the end of marking:
// instead of dying they move to the finalization queue, get re-marked so
// the sweep spares them, and have their finalizer run one per Finalize
// step under protection with hooks off and the GC threshold parked out
// of reach. The object is then returned to the ordinary lists with the
// current white and dies for real on the next cycle unless resurrected.

mod gc_header;
mod gc_id;
mod object_pool;
mod string_interner;

pub use gc_header::*;
pub use gc_id::*;
pub use object_pool::*;
pub use string_interner::*;

use std::rc::Rc;

use crate::lua_value::{Closure, LuaValue, Proto, Upvalue};
use crate::lua_vm::LuaVM;
use crate::lua_vm::tag_method::Tm;

/// Basic step granularity in bytes.
pub const GCSTEPSIZE: usize = 1024;
/// Objects swept per sweep step.
pub const GCSWEEPMAX: usize = 40;
pub const GCSWEEPCOST: usize = 10;
pub const GCFINALIZECOST: usize = 100;

const DEFAULT_PAUSE: usize = 200;
const DEFAULT_STEPMUL: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    /// Between cycles.
    Pause,
    /// Draining the gray list.
    Propagate,
    /// Walking the intern table buckets.
    SweepString,
    /// Walking the allocation lists.
    Sweep,
    /// Draining the finalization queue.
    Finalize,
}

#[derive(Debug, Clone, Default)]
pub struct GcStats {
    pub collection_count: usize,
    pub objects_collected: usize,
    pub bytes_allocated: usize,
    pub bytes_freed: usize,
    pub finalizers_run: usize,
}

pub struct GC {
    pub phase: GcPhase,
    pub current_white: u8,
    /// Bytes currently accounted to live (or not-yet-swept) objects.
    pub total_bytes: usize,
    /// Next step triggers when `total_bytes` crosses this.
    pub threshold: usize,
    /// Live-byte estimate taken at the atomic flip; seeds the pause.
    pub estimate: usize,
    /// Accumulated overrun, paid back by doing extra work.
    pub gcdept: usize,
    /// Pause between cycles, percent of the estimate.
    pub gcpause: usize,
    /// Step speed relative to allocation, percent.
    pub gcstepmul: usize,
    pub running: bool,

    pub gray: Vec<GcId>,
    /// Revisited in the atomic burst: barrier-hit tables and all threads.
    pub grayagain: Vec<GcId>,
    /// Weak tables found during marking; cleaned at atomic.
    pub weak: Vec<TableId>,

    /// Remainder of the allocation list still to sweep this cycle.
    sweep_list: Vec<GcId>,
    udata_sweep: Vec<UserdataId>,
    string_sweep_pos: usize,

    pub stats: GcStats,
}

impl GC {
    pub fn new() -> Self {
        GC {
            phase: GcPhase::Pause,
            current_white: 0,
            total_bytes: 0,
            threshold: 4 * GCSTEPSIZE,
            estimate: 0,
            gcdept: 0,
            gcpause: DEFAULT_PAUSE,
            gcstepmul: DEFAULT_STEPMUL,
            running: true,
            gray: Vec::with_capacity(64),
            grayagain: Vec::with_capacity(16),
            weak: Vec::new(),
            sweep_list: Vec::new(),
            udata_sweep: Vec::new(),
            string_sweep_pos: 0,
            stats: GcStats::default(),
        }
    }

    #[inline(always)]
    pub fn record_alloc(&mut self, size: usize) {
        self.total_bytes += size;
        self.stats.bytes_allocated += size;
    }

    #[inline(always)]
    pub fn record_free(&mut self, size: usize) {
        self.total_bytes = self.total_bytes.saturating_sub(size);
        self.stats.bytes_freed += size;
    }

    /// Is the invariant being maintained (i.e. are we marking)?
    #[inline(always)]
    fn keep_invariant(&self) -> bool {
        matches!(self.phase, GcPhase::Propagate)
    }
}

impl Default for GC {
    fn default() -> Self {
        Self::new()
    }
}

impl LuaVM {
    /// Allocation check point: advance the collector when the accounting
    /// says a step is due. Placed where every live value is anchored.
    #[inline]
    pub(crate) fn check_gc(&mut self) {
        if self.gc.running && self.gc.total_bytes >= self.gc.threshold {
            self.gc_step_vm();
        }
    }

    /// One mutator-visible GC step: do `stepmul`-scaled work, then move
    /// the threshold so the next step lands after ~GCSTEPSIZE more bytes.
    pub(crate) fn gc_step_vm(&mut self) {
        let stepmul = self.gc.gcstepmul.max(1);
        let mut lim = ((GCSTEPSIZE / 100) * stepmul) as isize;
        if lim == 0 {
            lim = isize::MAX;
        }
        self.gc.gcdept += self.gc.total_bytes.saturating_sub(self.gc.threshold);
        loop {
            let work = self.gc_single_step();
            lim -= work as isize;
            if self.gc.phase == GcPhase::Pause || lim <= 0 {
                break;
            }
        }
        if self.gc.phase != GcPhase::Pause {
            if self.gc.gcdept < GCSTEPSIZE {
                self.gc.threshold = self.gc.total_bytes + GCSTEPSIZE;
            } else {
                self.gc.gcdept -= GCSTEPSIZE;
                self.gc.threshold = self.gc.total_bytes;
            }
        } else {
            self.set_gc_threshold();
        }
    }

    fn set_gc_threshold(&mut self) {
        self.gc.threshold = (self.gc.estimate / 100).saturating_mul(self.gc.gcpause);
    }

    /// Run a complete collection: finish the cycle in flight, then do a
    /// whole fresh one (so everything unreachable right now is swept, and
    /// pending finalizers run).
    pub fn gc_collect(&mut self) {
        while self.gc.phase != GcPhase::Pause {
            self.gc_single_step();
        }
        self.gc_single_step(); // leave Pause: mark roots
        while self.gc.phase != GcPhase::Pause {
            self.gc_single_step();
        }
        self.set_gc_threshold();
    }

    pub fn gc_stop(&mut self) {
        self.gc.running = false;
    }

    pub fn gc_restart(&mut self) {
        self.gc.running = true;
        self.gc.threshold = self.gc.total_bytes;
    }

    /// Bytes currently accounted to the heap.
    pub fn gc_count_bytes(&self) -> usize {
        self.gc.total_bytes
    }

    /// Perform one step's worth of collection; true when this step closed
    /// a cycle.
    pub fn gc_step_api(&mut self) -> bool {
        let before_pause = self.gc.phase == GcPhase::Pause;
        self.gc_step_vm();
        !before_pause && self.gc.phase == GcPhase::Pause
    }

    pub fn gc_set_pause(&mut self, pause: usize) -> usize {
        std::mem::replace(&mut self.gc.gcpause, pause)
    }

    pub fn gc_set_step_mul(&mut self, mul: usize) -> usize {
        std::mem::replace(&mut self.gc.gcstepmul, mul)
    }

    pub fn gc_stats(&self) -> &GcStats {
        &self.gc.stats
    }

    // ---- the state machine ----

    fn gc_single_step(&mut self) -> usize {
        match self.gc.phase {
            GcPhase::Pause => {
                self.restart_collection();
                self.gc.phase = GcPhase::Propagate;
                GCSWEEPCOST
            }
            GcPhase::Propagate => {
                if let Some(id) = self.gc.gray.pop() {
                    self.traverse_object(id, false)
                } else {
                    self.atomic();
                    GCSWEEPCOST
                }
            }
            GcPhase::SweepString => self.sweep_string_step(),
            GcPhase::Sweep => self.sweep_step(),
            GcPhase::Finalize => self.finalize_step(),
        }
    }

    /// Start a cycle: reset the work lists, then mark from the roots.
    fn restart_collection(&mut self) {
        self.gc.gray.clear();
        self.gc.grayagain.clear();
        self.gc.weak.clear();
        self.mark_roots();
    }

    fn mark_roots(&mut self) {
        let registry = self.registry;
        let main = self.main_thread;
        let current = self.current_thread;
        self.mark_object(GcId::Table(registry));
        self.mark_object(GcId::Thread(main));
        self.mark_object(GcId::Thread(current));
        for i in 0..self.type_mts.len() {
            if let Some(mt) = self.type_mts[i] {
                self.mark_object(GcId::Table(mt));
            }
        }
    }

    pub(crate) fn mark_value(&mut self, v: &LuaValue) {
        if let Some(id) = ObjectPool::value_id(v) {
            self.mark_object(id);
        }
    }

    /// White -> gray (or straight to black for leaf-like objects).
    pub(crate) fn mark_object(&mut self, id: GcId) {
        let Some(h) = self.pool.header(id) else {
            return;
        };
        if !h.is_white() {
            return;
        }
        match id {
            GcId::String(s) => {
                self.pool.string_mut(s).header.make_black();
            }
            GcId::Userdata(u) => {
                self.pool.userdata_mut(u).header.make_black();
                let (mt, env) = {
                    let d = &self.pool.userdata_ref(u).data;
                    (d.metatable, d.env)
                };
                if let Some(mt) = mt {
                    self.mark_object(GcId::Table(mt));
                }
                self.mark_object(GcId::Table(env));
            }
            _ => {
                if let Some(h) = self.pool.header_mut(id) {
                    h.make_gray();
                }
                self.gc.gray.push(id);
            }
        }
    }

    /// Scan one gray object; returns the work accounted for it.
    fn traverse_object(&mut self, id: GcId, atomic_pass: bool) -> usize {
        let work = self
            .pool
            .header(id)
            .map(|h| h.size as usize)
            .unwrap_or(GCSWEEPCOST);
        match id {
            GcId::Table(t) => self.traverse_table(t, atomic_pass),
            GcId::Closure(c) => self.traverse_closure(c),
            GcId::Upvalue(u) => self.traverse_upvalue(u),
            GcId::Thread(t) => self.traverse_thread(t, atomic_pass),
            GcId::String(_) | GcId::Userdata(_) => {}
        }
        work
    }

    fn table_weakness(&mut self, t: TableId) -> (bool, bool) {
        let Some(mt) = self.pool.table(t).data.metatable() else {
            return (false, false);
        };
        let mode = self.get_tm_from(mt, Tm::Mode);
        match self.get_str(&mode) {
            Some(s) => (s.contains('k'), s.contains('v')),
            None => (false, false),
        }
    }

    fn traverse_table(&mut self, t: TableId, atomic_pass: bool) {
        let (weak_k, weak_v) = self.table_weakness(t);
        let mt = self.pool.table(t).data.metatable();
        if let Some(mt) = mt {
            self.mark_object(GcId::Table(mt));
        }
        self.pool.table_mut(t).data.drop_vacant_keys();
        if weak_k || weak_v {
            self.pool.table_mut(t).header.make_gray();
            if !self.gc.weak.contains(&t) {
                self.gc.weak.push(t);
            }
            if weak_k && weak_v {
                return;
            }
        } else {
            self.pool.table_mut(t).header.make_black();
        }
        let entries = self.pool.table(t).data.all_entries();
        for (k, v) in entries {
            if !weak_k {
                self.mark_value(&k);
            }
            if !weak_v {
                self.mark_value(&v);
            }
        }
    }

    fn traverse_closure(&mut self, c: ClosureId) {
        self.pool.closure_mut(c).header.make_black();
        enum Parts {
            Lua(Vec<UpvalueId>, TableId, Rc<Proto>),
            C(Vec<LuaValue>, TableId),
        }
        let parts = match &self.pool.closure(c).data {
            Closure::Lua(cl) => Parts::Lua(cl.upvalues.clone(), cl.env, cl.proto.clone()),
            Closure::C(cc) => Parts::C(cc.upvalues.clone(), cc.env),
        };
        match parts {
            Parts::Lua(upvals, env, proto) => {
                for id in upvals {
                    self.mark_object(GcId::Upvalue(id));
                }
                self.mark_object(GcId::Table(env));
                self.mark_proto(&proto);
            }
            Parts::C(upvals, env) => {
                for v in &upvals {
                    self.mark_value(v);
                }
                self.mark_object(GcId::Table(env));
            }
        }
    }

    fn mark_proto(&mut self, proto: &Proto) {
        for i in 0..proto.k.len() {
            let k = proto.k[i];
            self.mark_value(&k);
        }
        for p in &proto.protos {
            let p = Rc::clone(p);
            self.mark_proto(&p);
        }
    }

    fn traverse_upvalue(&mut self, u: UpvalueId) {
        self.pool.upvalue_mut(u).header.make_black();
        let v = match &self.pool.upvalue(u).data {
            Upvalue::Closed(v) => *v,
            Upvalue::Open { thread, index } => match self.pool.threads.get(thread.0) {
                Some(th) => th.data.stack.get(*index).copied().unwrap_or(LuaValue::Nil),
                None => LuaValue::Nil,
            },
        };
        self.mark_value(&v);
    }

    fn traverse_thread(&mut self, t: ThreadId, atomic_pass: bool) {
        let (globals, values, hook_fn, err) = {
            let th = &self.pool.thread(t).data;
            let mut extent = th.top;
            if let Some(ci) = th.ci.last() {
                extent = extent.max(ci.top);
            }
            let extent = extent.min(th.stack.len());
            (
                th.globals,
                th.stack[..extent].to_vec(),
                th.hook.func,
                th.error_value,
            )
        };
        self.mark_object(GcId::Table(globals));
        for v in &values {
            self.mark_value(v);
        }
        self.mark_value(&hook_fn);
        self.mark_value(&err);
        // Slots past the live extent are stale; clear them so they cannot
        // keep garbage reachable through the next cycles.
        {
            let th = &mut self.pool.thread_mut(t).data;
            let mut extent = th.top;
            if let Some(ci) = th.ci.last() {
                extent = extent.max(ci.top);
            }
            for i in extent..th.stack.len() {
                th.stack[i] = LuaValue::Nil;
            }
        }
        if atomic_pass {
            self.pool.thread_mut(t).header.make_black();
        } else {
            // Stacks mutate without barriers; keep the thread gray and
            // rescan it in the atomic burst.
            self.pool.thread_mut(t).header.make_gray();
            let id = GcId::Thread(t);
            if !self.gc.grayagain.contains(&id) {
                self.gc.grayagain.push(id);
            }
        }
    }

    // ---- atomic burst ----

    fn atomic(&mut self) {
        // Roots may have changed since the cycle started.
        self.mark_roots();
        self.drain_gray();

        // Open upvalues: a live upvalue into a dead thread's stack must
        // capture its value now; one into a live stack re-marks the slot.
        self.remark_open_upvalues();
        self.drain_gray();

        let grayagain = std::mem::take(&mut self.gc.grayagain);
        for id in grayagain {
            self.traverse_object(id, true);
        }
        self.drain_gray();

        // Weak tables: re-mark their strong halves with final liveness.
        let weak = self.gc.weak.clone();
        for t in &weak {
            self.traverse_table(*t, true);
        }
        self.drain_gray();

        self.separate_userdata(false);
        self.drain_gray();

        // Clearing happens last, over every weak table found by any of
        // the passes above, once all liveness is final.
        let weak = std::mem::take(&mut self.gc.weak);
        for t in &weak {
            self.clear_weak_table(*t);
        }
        for t in &weak {
            self.pool.table_mut(*t).header.make_black();
        }

        self.purge_dead_open_upvalues();

        self.gc.estimate = self.gc.total_bytes;
        self.gc.current_white ^= 1;
        self.gc.string_sweep_pos = 0;
        self.gc.sweep_list = std::mem::take(&mut self.pool.allgc);
        self.gc.udata_sweep = std::mem::take(&mut self.pool.udata);
        self.gc.phase = GcPhase::SweepString;
    }

    fn drain_gray(&mut self) {
        while let Some(id) = self.gc.gray.pop() {
            self.traverse_object(id, true);
        }
    }

    fn remark_open_upvalues(&mut self) {
        let ids: Vec<u32> = self.pool.upvalues.iter().map(|(i, _)| i).collect();
        for i in ids {
            let slot = match self.pool.upvalues.get(i) {
                Some(obj) if !obj.header.is_white() => obj.data.open_slot(),
                _ => None,
            };
            let Some((thread, index)) = slot else {
                continue;
            };
            let thread_dead = self
                .pool
                .threads
                .get(thread.0)
                .map(|th| th.header.is_white())
                .unwrap_or(true);
            let value = self
                .pool
                .threads
                .get(thread.0)
                .and_then(|th| th.data.stack.get(index).copied())
                .unwrap_or(LuaValue::Nil);
            if thread_dead {
                if let Some(obj) = self.pool.upvalues.get_mut(i) {
                    obj.data = Upvalue::Closed(value);
                }
            }
            self.mark_value(&value);
        }
    }

    /// Open-upvalue lists of surviving threads must not keep ids of
    /// upvalues that are about to be swept.
    fn purge_dead_open_upvalues(&mut self) {
        let tids: Vec<u32> = self.pool.threads.iter().map(|(i, _)| i).collect();
        for ti in tids {
            let dead_list: Vec<UpvalueId> = {
                let Some(th) = self.pool.threads.get(ti) else {
                    continue;
                };
                th.data
                    .open_upvals
                    .iter()
                    .copied()
                    .filter(|u| {
                        self.pool
                            .upvalues
                            .get(u.0)
                            .map(|o| o.header.is_white())
                            .unwrap_or(true)
                    })
                    .collect()
            };
            if dead_list.is_empty() {
                continue;
            }
            if let Some(th) = self.pool.threads.get_mut(ti) {
                th.data.open_upvals.retain(|u| !dead_list.contains(u));
            }
        }
    }

    /// Userdata that would die but carry `__gc` move to the finalization
    /// queue and are resurrected for one cycle. Ones without `__gc` are
    /// flagged done on the spot and never enter the queue. `all` is the
    /// shutdown mode: reachability is ignored.
    fn separate_userdata(&mut self, all: bool) {
        let list = std::mem::take(&mut self.pool.udata);
        for id in list {
            let Some(obj) = self.pool.userdata.get(id.0) else {
                continue;
            };
            let dying = all || obj.header.is_white();
            if !dying || obj.header.is_finalized() {
                self.pool.udata.push(id);
                continue;
            }
            let has_gc = {
                let mt = obj.data.metatable;
                match mt {
                    Some(mt) => !self.get_tm_from(mt, Tm::Gc).is_nil(),
                    None => false,
                }
            };
            if let Some(obj) = self.pool.userdata.get_mut(id.0) {
                obj.header.set_finalized();
            }
            if has_gc {
                self.pool.tobefnz.push(id);
                if !all {
                    // Keep it and what it references alive through the
                    // coming sweep; it dies for real next cycle.
                    self.mark_object(GcId::Userdata(id));
                }
            } else {
                self.pool.udata.push(id);
            }
        }
    }

    fn clear_weak_table(&mut self, t: TableId) {
        let (weak_k, weak_v) = self.table_weakness(t);
        if !weak_k && !weak_v {
            return;
        }
        let hash_entries: Vec<(usize, LuaValue, LuaValue)> = self
            .pool
            .table(t)
            .data
            .hash_entries_indexed()
            .collect();
        let array_entries: Vec<(usize, LuaValue)> = if weak_v {
            self.pool.table(t).data.array_entries_indexed().collect()
        } else {
            Vec::new()
        };
        let mut dead_hash = Vec::new();
        let mut dead_array = Vec::new();
        for (i, k, v) in hash_entries {
            let key_dead = weak_k && self.value_is_dying(&k);
            let val_dead = weak_v && self.value_is_dying(&v);
            if key_dead || val_dead {
                dead_hash.push(i);
            }
        }
        for (i, v) in array_entries {
            if self.value_is_dying(&v) {
                dead_array.push(i);
            }
        }
        let table = &mut self.pool.table_mut(t).data;
        for i in dead_hash {
            table.clear_hash_entry(i);
        }
        for i in dead_array {
            table.clear_array_entry(i);
        }
    }

    /// Is this value's object still unreached at the end of marking?
    /// Strings do not count: a weak reference never clears a string.
    fn value_is_dying(&mut self, v: &LuaValue) -> bool {
        match ObjectPool::value_id(v) {
            Some(GcId::String(s)) => {
                self.pool.string_mut(s).header.make_black();
                false
            }
            Some(id) => self
                .pool
                .header(id)
                .map(|h| h.is_white() && !h.is_fixed())
                .unwrap_or(false),
            None => false,
        }
    }

    // ---- sweeping ----

    fn sweep_string_step(&mut self) -> usize {
        let white = self.gc.current_white;
        let pos = self.gc.string_sweep_pos;
        if pos >= self.strings.bucket_count() {
            // Bucket array resizes happen here, between steps, never mid-walk.
            self.strings.maybe_shrink(&self.pool.strings);
            self.enter_sweep();
            return GCSWEEPCOST;
        }
        let mut chain = std::mem::take(&mut self.strings.buckets[pos]);
        chain.retain(|id| {
            let Some(obj) = self.pool.strings.get_mut(id.0) else {
                return false;
            };
            if obj.header.is_dead(white) {
                let size = obj.header.size as usize;
                self.pool.strings.free(id.0);
                self.gc.record_free(size);
                self.gc.stats.objects_collected += 1;
                self.strings.nuse -= 1;
                false
            } else {
                obj.header.make_white(white);
                true
            }
        });
        self.strings.buckets[pos] = chain;
        self.gc.string_sweep_pos = pos + 1;
        GCSWEEPCOST
    }

    fn enter_sweep(&mut self) {
        self.gc.phase = GcPhase::Sweep;
    }

    fn sweep_step(&mut self) -> usize {
        let white = self.gc.current_white;
        let mut n = 0;
        while n < GCSWEEPMAX {
            let Some(id) = self.gc.sweep_list.pop() else {
                break;
            };
            n += 1;
            let Some(h) = self.pool.header(id) else {
                continue;
            };
            if h.is_dead(white) {
                self.free_object(id);
            } else {
                if let Some(h) = self.pool.header_mut(id) {
                    h.make_white(white);
                }
                self.pool.allgc.push(id);
            }
        }
        while n < GCSWEEPMAX {
            let Some(id) = self.gc.udata_sweep.pop() else {
                break;
            };
            n += 1;
            let Some(obj) = self.pool.userdata.get(id.0) else {
                continue;
            };
            if obj.header.is_dead(white) {
                self.free_object(GcId::Userdata(id));
            } else {
                if let Some(obj) = self.pool.userdata.get_mut(id.0) {
                    obj.header.make_white(white);
                }
                self.pool.udata.push(id);
            }
        }
        if self.gc.sweep_list.is_empty() && self.gc.udata_sweep.is_empty() {
            // End of sweep: give back oversized stacks before finalizers.
            self.shrink_stacks();
            self.gc.phase = GcPhase::Finalize;
        }
        GCSWEEPMAX * GCSWEEPCOST
    }

    fn shrink_stacks(&mut self) {
        let tids: Vec<u32> = self.pool.threads.iter().map(|(i, _)| i).collect();
        for i in tids {
            let (before, after) = {
                let Some(th) = self.pool.threads.get_mut(i) else {
                    continue;
                };
                let before = th.data.footprint();
                th.data.shrink_stack();
                (before, th.data.footprint())
            };
            self.resize_accounted(GcId::Thread(ThreadId(i)), before, after);
        }
    }

    fn free_object(&mut self, id: GcId) {
        let size = self
            .pool
            .header(id)
            .map(|h| h.size as usize)
            .unwrap_or(0);
        match id {
            GcId::String(i) => {
                self.pool.strings.free(i.0);
            }
            GcId::Table(i) => {
                self.pool.tables.free(i.0);
            }
            GcId::Closure(i) => {
                self.pool.closures.free(i.0);
            }
            GcId::Upvalue(i) => {
                self.pool.upvalues.free(i.0);
            }
            GcId::Userdata(i) => {
                self.pool.userdata.free(i.0);
            }
            GcId::Thread(i) => {
                self.pool.threads.free(i.0);
            }
        }
        self.gc.record_free(size);
        self.gc.stats.objects_collected += 1;
    }

    // ---- finalization ----

    fn finalize_step(&mut self) -> usize {
        // Reverse separation order: pop from the back.
        if let Some(id) = self.pool.tobefnz.pop() {
            // Back to the ordinary list, current-white: unless the
            // finalizer resurrects it, the next cycle frees it.
            if let Some(obj) = self.pool.userdata.get_mut(id.0) {
                obj.header.make_white(self.gc.current_white);
            }
            self.pool.udata.push(id);
            self.run_finalizer(id);
            GCFINALIZECOST
        } else {
            self.gc.stats.collection_count += 1;
            self.gc.phase = GcPhase::Pause;
            GCSWEEPCOST
        }
    }

    /// Call `__gc(u)` protected, with hooks off and the collector unable
    /// to start a nested collection. Errors inside a finalizer are
    /// discarded.
    fn run_finalizer(&mut self, id: UserdataId) {
        let tm = {
            let mt = self
                .pool
                .userdata
                .get(id.0)
                .and_then(|o| o.data.metatable);
            match mt {
                Some(mt) => self.get_tm_from(mt, Tm::Gc),
                None => LuaValue::Nil,
            }
        };
        if tm.is_nil() {
            return;
        }
        let t = self.current_thread;
        let saved_threshold = self.gc.threshold;
        self.gc.threshold = usize::MAX;
        let saved_mask = {
            let hook = &mut self.thread_mut(t).hook;
            std::mem::replace(&mut hook.mask, 0)
        };

        let top = self.thread(t).top;
        let ok = self.grow_stack(t, 2).is_ok();
        if ok {
            {
                let th = self.thread_mut(t);
                th.push(tm);
                th.push(LuaValue::Userdata(id));
            }
            let _ = self.protected_call(t, top, 1, 0, None);
            self.thread_mut(t).top = top;
        }

        self.thread_mut(t).hook.mask = saved_mask;
        self.gc.threshold = saved_threshold;
        self.gc.stats.finalizers_run += 1;
    }

    /// Shutdown path: every userdata is separated, reachable or not, and
    /// the queue drained before the pool is dropped.
    pub(crate) fn finalize_all_on_close(&mut self) {
        self.gc.running = false;
        self.separate_userdata(true);
        while let Some(id) = self.pool.tobefnz.pop() {
            self.pool.udata.push(id);
            self.run_finalizer(id);
        }
    }

    // ---- write barriers ----

    /// Forward barrier: a black holder was just pointed at `v`. During
    /// marking the invariant is restored by marking `v` now; during the
    /// sweep phases the holder is repainted white instead.
    pub(crate) fn gc_barrier(&mut self, holder: GcId, v: &LuaValue) {
        let Some(vid) = ObjectPool::value_id(v) else {
            return;
        };
        let holder_black = self
            .pool
            .header(holder)
            .map(|h| h.is_black())
            .unwrap_or(false);
        let v_white = self
            .pool
            .header(vid)
            .map(|h| h.is_white())
            .unwrap_or(false);
        if !holder_black || !v_white {
            return;
        }
        if self.gc.keep_invariant() {
            self.mark_object(vid);
        } else if !matches!(self.gc.phase, GcPhase::Pause) {
            if let Some(h) = self.pool.header_mut(holder) {
                h.make_white(self.gc.current_white);
            }
        }
    }

    /// Backward barrier for tables: repaint the table gray and revisit it
    /// in the atomic burst, amortizing the frequent-store case.
    pub(crate) fn gc_barrier_back(&mut self, t: TableId) {
        let black = self.pool.table(t).header.is_black();
        if !black {
            return;
        }
        self.pool.table_mut(t).header.make_gray();
        let id = GcId::Table(t);
        if !self.gc.grayagain.contains(&id) {
            self.gc.grayagain.push(id);
        }
    }
}

