// VM-global state and the operations every subsystem hangs off.
//
// One `LuaVM` owns the object pool, the string interner, the collector,
// the registry and all execution threads. Every core operation takes the
// VM by exclusive borrow; that is the whole concurrency story (one OS
// thread inside the VM at a time, enforced by the type system).

mod call_info;
mod const_string;
pub mod coroutine;
pub mod debug_info;
mod execute;
mod lua_error;
mod lua_ref;
pub mod opcode;
mod stack_api;
pub mod tag_method;
pub mod verifier;

pub use call_info::{CallInfo, call_status};
pub(crate) use execute::ArithOp;
pub use const_string::ConstStrings;
pub use lua_error::{LuaError, LuaFullError, LuaResult};
pub use opcode::OpCode;
pub use lua_ref::{NO_REF, REF_NIL};
pub use stack_api::{ENVIRONINDEX, GLOBALSINDEX, REGISTRYINDEX, upvalue_index};
pub use tag_method::Tm;

use std::rc::Rc;

use crate::gc::{
    GC, GcClosure, GcHeader, GcId, GcTable, GcThread, GcUpvalue, GcUserdata, ObjectPool, StringId,
    StringInterner, TableId, ThreadId, UpvalueId,
};
use crate::lua_value::{
    CClosure, ChunkDesc, Closure, ConstDesc, CoStatus, LocVar, LuaClosure, LuaTable, LuaThread,
    LuaUserdata, LuaValue, NUM_BASIC_TYPES, Proto, UpvalDesc, Upvalue, hash_number, hash_pointer,
};
use crate::stdlib::math::Rng;

/// Host function callable from Lua. Arguments sit between the frame base
/// and the stack top; results are pushed on top and their count returned.
pub type CFunction = fn(&mut LuaVM, ThreadId) -> LuaResult<usize>;

/// Invoked on an error no protected frame catches. The error object is on
/// top of the current thread's stack. Expected not to return control to
/// the VM (the reference behavior is to abort the process).
pub type PanicFn = fn(&mut LuaVM);

pub struct LuaVM {
    pub(crate) pool: ObjectPool,
    pub(crate) strings: StringInterner,
    pub(crate) gc: GC,
    pub(crate) registry: TableId,
    pub(crate) main_thread: ThreadId,
    pub(crate) current_thread: ThreadId,
    /// Default metatables for non-table, non-userdata types.
    pub(crate) type_mts: [Option<TableId>; NUM_BASIC_TYPES],
    pub(crate) consts: ConstStrings,
    pub(crate) panic: Option<PanicFn>,
    pub(crate) rng: Rng,
}

impl LuaVM {
    pub fn new() -> Box<Self> {
        let mut vm = Box::new(LuaVM {
            pool: ObjectPool::new(),
            strings: StringInterner::new(),
            gc: GC::new(),
            registry: TableId(0),
            main_thread: ThreadId(0),
            current_thread: ThreadId(0),
            type_mts: [None; NUM_BASIC_TYPES],
            consts: ConstStrings::unset(),
            panic: None,
            rng: Rng::from_clock(),
        });

        let globals = vm
            .create_table(0, 32)
            .as_table_id()
            .expect("fresh table value");
        vm.registry = vm
            .create_table(0, 8)
            .as_table_id()
            .expect("fresh table value");

        let main = vm.alloc_thread(LuaThread::new(globals));
        // The main thread is a permanent root.
        vm.pool.thread_mut(main).header.set_fixed();
        vm.pool.thread_mut(main).data.status = CoStatus::Running;
        vm.main_thread = main;
        vm.current_thread = main;

        vm.init_const_strings();
        vm
    }

    pub fn at_panic(&mut self, f: Option<PanicFn>) -> Option<PanicFn> {
        std::mem::replace(&mut self.panic, f)
    }

    // ---- thread plumbing ----

    #[inline(always)]
    pub(crate) fn thread(&self, t: ThreadId) -> &LuaThread {
        &self.pool.thread(t).data
    }

    #[inline(always)]
    pub(crate) fn thread_mut(&mut self, t: ThreadId) -> &mut LuaThread {
        &mut self.pool.thread_mut(t).data
    }

    pub fn main_thread(&self) -> ThreadId {
        self.main_thread
    }

    pub fn current_thread(&self) -> ThreadId {
        self.current_thread
    }

    pub fn globals_of(&self, t: ThreadId) -> TableId {
        self.thread(t).globals
    }

    /// Grow a thread's stack, keeping the byte accounting in step.
    /// Overflow raises through the regular error path.
    pub(crate) fn grow_stack(&mut self, t: ThreadId, needed: usize) -> LuaResult<()> {
        let obj = self.pool.thread_mut(t);
        let before = obj.data.footprint();
        if !obj.data.ensure_stack(needed) {
            return Err(self.throw_runtime_raw(t, "stack overflow".to_string()));
        }
        let after = self.pool.thread(t).data.footprint();
        self.resize_accounted(GcId::Thread(t), before, after);
        Ok(())
    }

    // ---- object creation ----
    //
    // Creation never runs a GC step itself; the collector advances only at
    // the explicit check points (call entry, the allocating opcodes, the
    // host-facing constructors), where everything live is anchored.

    pub fn new_string(&mut self, s: &str) -> LuaValue {
        let (id, added) = self
            .strings
            .intern(&mut self.pool.strings, self.gc.current_white, s);
        if added > 0 {
            self.gc.record_alloc(added);
            // The intern table may not be rebuilt while a string sweep is
            // walking it.
            if self.gc.phase != crate::gc::GcPhase::SweepString {
                self.strings.maybe_grow(&self.pool.strings);
            }
        }
        LuaValue::String(id)
    }

    pub fn create_table(&mut self, narray: usize, nhash: usize) -> LuaValue {
        let data = LuaTable::new(narray, nhash);
        let size = data.footprint();
        let header = GcHeader::with_white(self.gc.current_white, size as u32);
        let id = TableId(self.pool.tables.alloc(GcTable { header, data }));
        self.pool.allgc.push(GcId::Table(id));
        self.gc.record_alloc(size);
        LuaValue::Table(id)
    }

    pub fn create_c_closure(&mut self, func: CFunction, upvalues: Vec<LuaValue>) -> LuaValue {
        let env = self.globals_of(self.current_thread);
        self.create_closure(Closure::C(CClosure {
            func,
            upvalues,
            env,
        }))
    }

    pub(crate) fn create_lua_closure(
        &mut self,
        proto: Rc<Proto>,
        upvalues: Vec<UpvalueId>,
        env: TableId,
    ) -> LuaValue {
        self.create_closure(Closure::Lua(LuaClosure {
            proto,
            upvalues,
            env,
        }))
    }

    fn create_closure(&mut self, data: Closure) -> LuaValue {
        let size = data.footprint();
        let header = GcHeader::with_white(self.gc.current_white, size as u32);
        let id = crate::gc::ClosureId(self.pool.closures.alloc(GcClosure { header, data }));
        self.pool.allgc.push(GcId::Closure(id));
        self.gc.record_alloc(size);
        LuaValue::Function(id)
    }

    pub(crate) fn create_upvalue(&mut self, data: Upvalue) -> UpvalueId {
        let size = std::mem::size_of::<Upvalue>();
        let header = GcHeader::with_white(self.gc.current_white, size as u32);
        let id = UpvalueId(self.pool.upvalues.alloc(GcUpvalue { header, data }));
        self.pool.allgc.push(GcId::Upvalue(id));
        self.gc.record_alloc(size);
        id
    }

    pub fn new_userdata(&mut self, size: usize) -> LuaValue {
        self.check_gc();
        let env = self.globals_of(self.current_thread);
        let data = LuaUserdata::new(size, env);
        let bytes = data.footprint();
        let header = GcHeader::with_white(self.gc.current_white, bytes as u32);
        let id = crate::gc::UserdataId(self.pool.userdata.alloc(GcUserdata { header, data }));
        self.pool.udata.push(id);
        self.gc.record_alloc(bytes);
        LuaValue::Userdata(id)
    }

    pub fn new_thread(&mut self) -> LuaValue {
        self.check_gc();
        let globals = self.globals_of(self.current_thread);
        let id = self.alloc_thread(LuaThread::new(globals));
        LuaValue::Thread(id)
    }

    fn alloc_thread(&mut self, data: LuaThread) -> ThreadId {
        let size = data.footprint();
        let header = GcHeader::with_white(self.gc.current_white, size as u32);
        let id = ThreadId(self.pool.threads.alloc(GcThread { header, data }));
        self.pool.allgc.push(GcId::Thread(id));
        self.gc.record_alloc(size);
        id
    }

    pub(crate) fn resize_accounted(&mut self, id: GcId, before: usize, after: usize) {
        if before == after {
            return;
        }
        if let Some(h) = self.pool.header_mut(id) {
            h.size = after as u32;
        }
        if after > before {
            self.gc.record_alloc(after - before);
        } else {
            self.gc.record_free(before - after);
        }
    }

    // ---- string access ----

    pub fn get_str(&self, v: &LuaValue) -> Option<&str> {
        match v {
            LuaValue::String(id) => Some(self.pool.string(*id).data.as_str()),
            _ => None,
        }
    }

    pub(crate) fn str_of(&self, id: StringId) -> &str {
        self.pool.string(id).data.as_str()
    }

    // ---- hashing ----

    pub(crate) fn key_hash(&self, v: &LuaValue) -> u64 {
        match v {
            LuaValue::Nil => 0,
            LuaValue::Boolean(b) => hash_pointer(1, *b as u64),
            LuaValue::Number(n) => hash_number(*n),
            LuaValue::LightUserdata(p) => hash_pointer(2, *p as u64),
            LuaValue::String(id) => self.pool.string(*id).data.hash,
            LuaValue::Table(id) => hash_pointer(5, id.0 as u64),
            LuaValue::Function(id) => hash_pointer(6, id.0 as u64),
            LuaValue::Userdata(id) => hash_pointer(7, id.0 as u64),
            LuaValue::Thread(id) => hash_pointer(8, id.0 as u64),
        }
    }

    // ---- raw table access ----

    pub fn table_raw_get(&self, tid: TableId, key: &LuaValue) -> LuaValue {
        let hash = self.key_hash(key);
        self.pool.table(tid).data.raw_get(key, hash)
    }

    pub fn table_raw_get_int(&self, tid: TableId, i: i64) -> LuaValue {
        self.pool.table(tid).data.raw_get_int(i)
    }

    pub fn table_raw_get_str(&mut self, tid: TableId, key: &str) -> LuaValue {
        let k = self.new_string(key);
        self.table_raw_get(tid, &k)
    }

    /// Raw store with key validation, rehash-on-demand and the backward
    /// write barrier.
    pub fn table_raw_set(
        &mut self,
        t: ThreadId,
        tid: TableId,
        key: LuaValue,
        value: LuaValue,
    ) -> LuaResult<()> {
        let key = match key {
            LuaValue::Nil => {
                return Err(self.throw_runtime(t, "table index is nil".to_string()));
            }
            LuaValue::Number(n) if n.is_nan() => {
                return Err(self.throw_runtime(t, "table index is NaN".to_string()));
            }
            LuaValue::Number(n) if n == 0.0 => LuaValue::Number(0.0),
            k => k,
        };
        let hash = self.key_hash(&key);
        let before = self.pool.table(tid).data.footprint();
        let obj = self.pool.table_mut(tid);
        if let Err(full) = obj.data.raw_set(key, hash, value) {
            if obj.data.rehash(&full.key).is_err() {
                return Err(self.throw_runtime(t, "table overflow".to_string()));
            }
            let obj = self.pool.table_mut(tid);
            if obj.data.raw_set(full.key, full.hash, full.value).is_err() {
                unreachable!("rehashed table rejected its extra key");
            }
        }
        let after = self.pool.table(tid).data.footprint();
        self.resize_accounted(GcId::Table(tid), before, after);
        if value.is_collectable() || key.is_collectable() {
            self.gc_barrier_back(tid);
        }
        Ok(())
    }

    pub fn table_raw_set_int(
        &mut self,
        t: ThreadId,
        tid: TableId,
        i: i64,
        value: LuaValue,
    ) -> LuaResult<()> {
        self.table_raw_set(t, tid, LuaValue::Number(i as f64), value)
    }

    /// `#t` for tables.
    pub fn table_length(&self, tid: TableId) -> usize {
        self.pool.table(tid).data.boundary()
    }

    /// Traversal step for `next`.
    pub fn pool_table_next(
        &self,
        tid: TableId,
        key: &LuaValue,
        hash: u64,
    ) -> Result<Option<(LuaValue, LuaValue)>, crate::lua_value::InvalidKey> {
        self.pool.table(tid).data.next_entry(key, hash)
    }

    pub fn pool_table_metatable(&self, tid: TableId) -> Option<TableId> {
        self.pool.table(tid).data.metatable()
    }

    /// Snapshot of a table's live entries.
    pub fn pool_table_entries(&self, tid: TableId) -> Vec<(LuaValue, LuaValue)> {
        self.pool.table(tid).data.all_entries()
    }

    // ---- userdata payload access ----

    pub fn userdata_bytes(&self, id: crate::gc::UserdataId) -> &[u8] {
        &self.pool.userdata_ref(id).data.data
    }

    pub fn userdata_bytes_mut(&mut self, id: crate::gc::UserdataId) -> &mut [u8] {
        &mut self.pool.userdata_mut(id).data.data
    }

    // ---- globals and registry ----

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        let t = self.current_thread;
        let g = self.globals_of(t);
        let key = self.new_string(name);
        self.table_raw_set(t, g, key, value)
            .expect("string key is always valid");
    }

    pub fn get_global(&mut self, name: &str) -> LuaValue {
        let g = self.globals_of(self.current_thread);
        self.table_raw_get_str(g, name)
    }

    pub fn registry(&self) -> TableId {
        self.registry
    }

    pub fn registry_set(&mut self, key: &str, value: LuaValue) {
        let t = self.current_thread;
        let r = self.registry;
        let k = self.new_string(key);
        self.table_raw_set(t, r, k, value)
            .expect("string key is always valid");
    }

    pub fn registry_get(&mut self, key: &str) -> LuaValue {
        let r = self.registry;
        self.table_raw_get_str(r, key)
    }

    // ---- metatables ----

    pub fn set_metatable_of(&mut self, v: &LuaValue, mt: Option<TableId>) {
        match v {
            LuaValue::Table(id) => {
                self.pool.table_mut(*id).data.set_metatable(mt);
                if mt.is_some() {
                    self.gc_barrier_back(*id);
                }
            }
            LuaValue::Userdata(id) => {
                self.pool.userdata_mut(*id).data.metatable = mt;
                if let Some(m) = mt {
                    self.gc_barrier(GcId::Userdata(*id), &LuaValue::Table(m));
                }
            }
            _ => {
                self.type_mts[v.kind() as usize] = mt;
            }
        }
    }

    // ---- chunk loading ----

    /// Turn a VM-independent chunk tree into a runtime prototype: intern
    /// its strings, verify its bytecode, and wrap it in a closure whose
    /// environment is the current globals table. The closure is returned
    /// (not pushed); callers root it before the next collection point.
    pub fn load_chunk(&mut self, desc: &ChunkDesc) -> LuaResult<LuaValue> {
        self.check_gc();
        let proto = self.build_proto(desc);
        if let Err(msg) = crate::lua_vm::verifier::check_code(&proto) {
            let t = self.current_thread;
            let source = short_source(&proto.source);
            let obj = self.new_string(&format!("{}: {}", source, msg));
            self.thread_mut(t).error_value = obj;
            return Err(LuaError::Syntax);
        }
        let env = self.globals_of(self.current_thread);
        Ok(self.create_lua_closure(proto, Vec::new(), env))
    }

    fn build_proto(&mut self, desc: &ChunkDesc) -> Rc<Proto> {
        let k = desc
            .constants
            .iter()
            .map(|c| match c {
                ConstDesc::Nil => LuaValue::Nil,
                ConstDesc::Bool(b) => LuaValue::Boolean(*b),
                ConstDesc::Number(n) => LuaValue::Number(*n),
                ConstDesc::Str(s) => self.new_string(s),
            })
            .collect();
        let protos = desc.protos.iter().map(|p| self.build_proto(p)).collect();
        Rc::new(Proto {
            k,
            code: desc.code.clone(),
            protos,
            upvalues: desc
                .upvalues
                .iter()
                .map(|u| UpvalDesc {
                    name: u.name.clone(),
                    in_stack: u.in_stack,
                    index: u.index,
                })
                .collect(),
            source: desc.source.clone(),
            lineinfo: desc.lineinfo.clone(),
            locvars: desc
                .locvars
                .iter()
                .map(|l| LocVar {
                    name: l.name.clone(),
                    start_pc: l.start_pc,
                    end_pc: l.end_pc,
                })
                .collect(),
            linedefined: desc.linedefined,
            lastlinedefined: desc.lastlinedefined,
            nups: desc.upvalues.len() as u8,
            numparams: desc.numparams,
            is_vararg: desc.is_vararg,
            maxstacksize: desc.maxstacksize,
        })
    }

    // ---- errors ----

    /// Raise a runtime error, prefixing the current source position when
    /// a bytecode frame is running.
    pub(crate) fn throw_runtime(&mut self, t: ThreadId, msg: String) -> LuaError {
        let located = match self.current_location(t) {
            Some(loc) => format!("{}{}", loc, msg),
            None => msg,
        };
        self.throw_runtime_raw(t, located)
    }

    pub(crate) fn throw_runtime_raw(&mut self, t: ThreadId, msg: String) -> LuaError {
        let obj = self.new_string(&msg);
        self.thread_mut(t).error_value = obj;
        LuaError::Runtime
    }

    /// Memory errors use the preallocated message; nothing is allocated
    /// on this path. Public so hosts can signal exhaustion of their own
    /// resources through the same channel.
    pub fn throw_memory(&mut self, t: ThreadId) -> LuaError {
        let obj = self.consts.memerr;
        self.thread_mut(t).error_value = obj;
        LuaError::Memory
    }

    pub(crate) fn type_error(
        &mut self,
        t: ThreadId,
        op: &str,
        v: &LuaValue,
    ) -> LuaError {
        let msg = format!("attempt to {} a {} value", op, v.type_name());
        self.throw_runtime(t, msg)
    }

    pub(crate) fn order_error(&mut self, t: ThreadId, a: &LuaValue, b: &LuaValue) -> LuaError {
        let (ta, tb) = (a.type_name(), b.type_name());
        let msg = if ta == tb {
            format!("attempt to compare two {} values", ta)
        } else {
            format!("attempt to compare {} with {}", ta, tb)
        };
        self.throw_runtime(t, msg)
    }

    /// "chunkname:line: " of the running bytecode frame. When a host
    /// function is on top (a library routine raising a bad-argument
    /// error), its caller's position is used instead.
    pub(crate) fn current_location(&self, t: ThreadId) -> Option<String> {
        let th = self.thread(t);
        let mut ci = th.ci.last()?;
        if !ci.is_lua() {
            let depth = th.ci.len();
            if depth < 2 || !th.ci[depth - 2].is_lua() {
                return None;
            }
            ci = &th.ci[depth - 2];
        }
        let cl_id = th.stack[ci.func].as_closure_id()?;
        let closure = self.pool.closure(cl_id).data.as_lua()?;
        let line = closure.proto.line_at(ci.saved_pc.saturating_sub(1));
        Some(format!("{}:{}: ", short_source(&closure.proto.source), line))
    }

    /// Error object of the last failure on the current thread.
    pub fn error_value(&self) -> LuaValue {
        self.thread(self.current_thread).error_value
    }

    /// Render the pending error of the current thread into a message.
    pub fn error_message(&self) -> String {
        let v = self.thread(self.current_thread).error_value;
        match self.get_str(&v) {
            Some(s) => s.to_string(),
            None => format!("(error object is a {} value)", v.type_name()),
        }
    }

    pub fn into_full_error(&self, kind: LuaError) -> LuaFullError {
        LuaFullError {
            kind,
            message: self.error_message(),
        }
    }
}

impl Drop for LuaVM {
    fn drop(&mut self) {
        // Shutdown separates every userdata regardless of reachability and
        // drains the finalizers; errors inside a __gc are discarded here.
        self.finalize_all_on_close();
    }
}

/// Displayable chunk name: '=' sources verbatim, '@' file names with
/// front truncation, anything else quoted as [string "..."].
pub(crate) fn short_source(source: &str) -> String {
    const MAXLEN: usize = 60;
    if let Some(rest) = source.strip_prefix('=') {
        rest.chars().take(MAXLEN).collect()
    } else if let Some(file) = source.strip_prefix('@') {
        if file.len() <= MAXLEN {
            file.to_string()
        } else {
            let tail: String = file
                .chars()
                .rev()
                .take(MAXLEN - 3)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("...{}", tail)
        }
    } else {
        let first = source.lines().next().unwrap_or("");
        let mut s: String = first.chars().take(MAXLEN - 15).collect();
        if s.len() < first.len() {
            s.push_str("...");
        }
        format!("[string \"{}\"]", s)
    }
}
