// Lua 5.1 Runtime
// A compact register-based VM core with incremental GC and coroutines.
// The lexer/parser front end is external: chunks arrive as prototype
// trees (ChunkDesc) and are verified before they run.

#[cfg(test)]
mod test;

pub mod gc;
pub mod lib_registry;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;

pub use gc::{GC, GcPhase, GcStats, ObjectPool, StringId, TableId, ThreadId};
pub use lib_registry::LibraryRegistry;
pub use lua_value::{ChunkDesc, ConstDesc, LuaTable, LuaValue, LuaValueKind, Proto};
pub use lua_vm::coroutine::ResumeOutcome;
pub use lua_vm::{CFunction, LuaError, LuaFullError, LuaResult, LuaVM, OpCode};
pub use stdlib::Stdlib;

use std::rc::Rc;

/// Convenience entry: fresh VM with the standard libraries, running one
/// loaded chunk on the main thread and returning its results.
pub fn execute_chunk(desc: &ChunkDesc) -> LuaResult<Vec<LuaValue>> {
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All)?;
    let closure = vm.load_chunk(desc)?;
    vm.call_function(closure, &[])
}

impl LuaVM {
    /// Call any function value with arguments on the main thread,
    /// collecting all of its results.
    pub fn call_function(&mut self, func: LuaValue, args: &[LuaValue]) -> LuaResult<Vec<LuaValue>> {
        let t = self.main_thread();
        let func_idx = self.thread(t).top;
        self.push_value(t, func)?;
        for &a in args {
            self.push_value(t, a)?;
        }
        self.do_call(t, func_idx, -1)?;
        let th = self.thread(t);
        let results = th.stack[func_idx..th.top].to_vec();
        self.thread_mut(t).top = func_idx;
        Ok(results)
    }

    /// Protected variant of `call_function`.
    pub fn pcall_function(
        &mut self,
        func: LuaValue,
        args: &[LuaValue],
    ) -> Result<Vec<LuaValue>, (LuaError, LuaValue)> {
        let t = self.main_thread();
        let func_idx = self.thread(t).top;
        if self.push_value(t, func).is_err() {
            return Err((LuaError::Runtime, self.error_value()));
        }
        for &a in args {
            if self.push_value(t, a).is_err() {
                return Err((LuaError::Runtime, self.error_value()));
            }
        }
        match self.protected_call(t, func_idx, args.len(), -1, None) {
            Ok(()) => {
                let th = self.thread(t);
                let results = th.stack[func_idx..th.top].to_vec();
                self.thread_mut(t).top = func_idx;
                Ok(results)
            }
            Err(e) => {
                let err = self.thread(t).error_value;
                self.thread_mut(t).top = func_idx;
                Err((e, err))
            }
        }
    }

    /// Load a chunk and immediately run it.
    pub fn execute(&mut self, desc: &ChunkDesc) -> LuaResult<Vec<LuaValue>> {
        let closure = self.load_chunk(desc)?;
        self.call_function(closure, &[])
    }

    pub fn open_stdlib(&mut self, which: Stdlib) -> LuaResult<()> {
        lib_registry::standard_registry(which).load_all(self)
    }
}

/// Shared handle type for prototypes.
pub type ProtoRef = Rc<Proto>;
