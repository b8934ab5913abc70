// Host-facing stack API.
//
// A thin facade in the classic style: values travel through the current
// thread's stack, indexed positively from the base of the active host
// frame (or from the stack bottom outside any call), negatively from the
// top, or through the pseudo-indices for the registry, the globals table
// and the running host closure's environment and upvalues.

use crate::gc::ThreadId;
use crate::lua_value::{ChunkDesc, LuaValue, LuaValueKind, number_to_display};
use crate::lua_vm::{CFunction, LuaError, LuaResult, LuaVM};

pub const REGISTRYINDEX: i32 = -10000;
pub const ENVIRONINDEX: i32 = -10001;
pub const GLOBALSINDEX: i32 = -10002;

/// Pseudo-index of upvalue `i` (1-based) of the running host closure.
pub const fn upvalue_index(i: u32) -> i32 {
    GLOBALSINDEX - i as i32
}

impl LuaVM {
    /// Base the positive API indices count from.
    fn api_base(&self, t: ThreadId) -> usize {
        match self.thread(t).current_ci() {
            Some(ci) if !ci.is_lua() => ci.base,
            _ => 0,
        }
    }

    fn running_c_closure(&self, t: ThreadId) -> Option<&crate::lua_value::CClosure> {
        let ci = self.thread(t).current_ci()?;
        if ci.is_lua() {
            return None;
        }
        let id = self.thread(t).stack[ci.func].as_closure_id()?;
        self.pool.closure(id).data.as_c()
    }

    /// Resolve an acceptable index to a value.
    pub fn value_at(&self, t: ThreadId, idx: i32) -> LuaValue {
        if idx > 0 {
            let abs = self.api_base(t) + idx as usize - 1;
            if abs < self.thread(t).top {
                self.thread(t).stack[abs]
            } else {
                LuaValue::Nil
            }
        } else if idx > REGISTRYINDEX {
            let top = self.thread(t).top;
            let abs = top as i64 + idx as i64;
            if abs >= self.api_base(t) as i64 {
                self.thread(t).stack[abs as usize]
            } else {
                LuaValue::Nil
            }
        } else {
            match idx {
                REGISTRYINDEX => LuaValue::Table(self.registry),
                GLOBALSINDEX => LuaValue::Table(self.globals_of(t)),
                ENVIRONINDEX => match self.running_c_closure(t) {
                    Some(cc) => LuaValue::Table(cc.env),
                    None => LuaValue::Table(self.globals_of(t)),
                },
                _ => {
                    let n = (GLOBALSINDEX - idx) as usize;
                    match self.running_c_closure(t) {
                        Some(cc) => cc.upvalues.get(n - 1).copied().unwrap_or(LuaValue::Nil),
                        None => LuaValue::Nil,
                    }
                }
            }
        }
    }

    fn abs_stack_index(&self, t: ThreadId, idx: i32) -> Option<usize> {
        if idx > 0 {
            Some(self.api_base(t) + idx as usize - 1)
        } else if idx > REGISTRYINDEX {
            let abs = self.thread(t).top as i64 + idx as i64;
            if abs >= 0 { Some(abs as usize) } else { None }
        } else {
            None
        }
    }

    // ---- stack shape ----

    pub fn api_top(&self, t: ThreadId) -> usize {
        self.thread(t).top - self.api_base(t)
    }

    pub fn api_set_top(&mut self, t: ThreadId, n: usize) -> LuaResult<()> {
        let base = self.api_base(t);
        let new_top = base + n;
        let old_top = self.thread(t).top;
        if new_top > old_top {
            self.grow_stack(t, new_top - old_top)?;
            let th = self.thread_mut(t);
            for i in old_top..new_top {
                th.stack[i] = LuaValue::Nil;
            }
        }
        self.thread_mut(t).top = new_top;
        Ok(())
    }

    pub fn pop(&mut self, t: ThreadId, n: usize) {
        let th = self.thread_mut(t);
        th.top = th.top.saturating_sub(n);
    }

    // ---- pushing ----

    pub fn push_value(&mut self, t: ThreadId, v: LuaValue) -> LuaResult<()> {
        self.grow_stack(t, 1)?;
        self.thread_mut(t).push(v);
        Ok(())
    }

    pub fn push_nil(&mut self, t: ThreadId) -> LuaResult<()> {
        self.push_value(t, LuaValue::Nil)
    }

    pub fn push_boolean(&mut self, t: ThreadId, b: bool) -> LuaResult<()> {
        self.push_value(t, LuaValue::Boolean(b))
    }

    pub fn push_number(&mut self, t: ThreadId, n: f64) -> LuaResult<()> {
        self.push_value(t, LuaValue::Number(n))
    }

    pub fn push_string(&mut self, t: ThreadId, s: &str) -> LuaResult<()> {
        self.check_gc();
        let v = self.new_string(s);
        self.push_value(t, v)
    }

    pub fn push_cfunction(&mut self, t: ThreadId, f: CFunction) -> LuaResult<()> {
        self.check_gc();
        let v = self.create_c_closure(f, Vec::new());
        self.push_value(t, v)
    }

    /// Push an index's value back on top.
    pub fn push_index(&mut self, t: ThreadId, idx: i32) -> LuaResult<()> {
        let v = self.value_at(t, idx);
        self.push_value(t, v)
    }

    // ---- querying ----

    pub fn type_at(&self, t: ThreadId, idx: i32) -> LuaValueKind {
        self.value_at(t, idx).kind()
    }

    pub fn to_number(&self, t: ThreadId, idx: i32) -> Option<f64> {
        self.coerce_number(&self.value_at(t, idx))
    }

    /// String conversion as the API sees it (numbers convert, everything
    /// else does not).
    pub fn to_display_string(&self, t: ThreadId, idx: i32) -> Option<String> {
        match self.value_at(t, idx) {
            LuaValue::String(id) => Some(self.str_of(id).to_string()),
            LuaValue::Number(n) => Some(number_to_display(n)),
            _ => None,
        }
    }

    pub fn raw_equal(&self, t: ThreadId, a: i32, b: i32) -> bool {
        self.value_at(t, a).raw_equals(&self.value_at(t, b))
    }

    /// Primitive length: string bytes, table boundary, 0 elsewhere.
    pub fn obj_len(&self, t: ThreadId, idx: i32) -> usize {
        match self.value_at(t, idx) {
            LuaValue::String(id) => self.pool.string(id).data.len(),
            LuaValue::Table(tid) => self.table_length(tid),
            _ => 0,
        }
    }

    // ---- table access ----

    /// t[k] with metamethods: key on top is replaced by the result.
    pub fn get_table(&mut self, t: ThreadId, idx: i32) -> LuaResult<()> {
        let obj = self.value_at(t, idx);
        let key = self.value_at(t, -1);
        let v = self.vm_gettable(t, &obj, &key)?;
        let th = self.thread_mut(t);
        th.stack[th.top - 1] = v;
        Ok(())
    }

    /// t[k] = v with metamethods: key and value popped from the top.
    pub fn set_table(&mut self, t: ThreadId, idx: i32) -> LuaResult<()> {
        let obj = self.value_at(t, idx);
        let v = self.value_at(t, -1);
        let key = self.value_at(t, -2);
        self.pop(t, 2);
        self.vm_settable(t, &obj, key, v)
    }

    pub fn get_field(&mut self, t: ThreadId, idx: i32, name: &str) -> LuaResult<()> {
        let obj = self.value_at(t, idx);
        let key = self.new_string(name);
        let v = self.vm_gettable(t, &obj, &key)?;
        self.push_value(t, v)
    }

    pub fn set_field(&mut self, t: ThreadId, idx: i32, name: &str) -> LuaResult<()> {
        let obj = self.value_at(t, idx);
        let key = self.new_string(name);
        let v = self.value_at(t, -1);
        self.pop(t, 1);
        self.vm_settable(t, &obj, key, v)
    }

    /// Raw variants bypass tag methods; only meaningful on tables.
    pub fn raw_get(&mut self, t: ThreadId, idx: i32) -> LuaResult<()> {
        let obj = self.value_at(t, idx);
        let key = self.value_at(t, -1);
        let v = match obj.as_table_id() {
            Some(tid) => self.table_raw_get(tid, &key),
            None => return Err(self.type_error(t, "index", &obj)),
        };
        let th = self.thread_mut(t);
        th.stack[th.top - 1] = v;
        Ok(())
    }

    pub fn raw_set(&mut self, t: ThreadId, idx: i32) -> LuaResult<()> {
        let obj = self.value_at(t, idx);
        let v = self.value_at(t, -1);
        let key = self.value_at(t, -2);
        self.pop(t, 2);
        match obj.as_table_id() {
            Some(tid) => self.table_raw_set(t, tid, key, v),
            None => Err(self.type_error(t, "index", &obj)),
        }
    }

    // ---- calls ----

    /// Unprotected call: function and `nargs` arguments on top are
    /// consumed, `nresults` results (or all, for -1) take their place.
    /// An error here with no protected frame invokes the panic callback.
    pub fn call(&mut self, t: ThreadId, nargs: usize, nresults: i32) -> LuaResult<()> {
        let func = self.thread(t).top - nargs - 1;
        match self.do_call(t, func, nresults) {
            Ok(()) => Ok(()),
            Err(LuaError::Yield) => {
                let e = self.throw_runtime_raw(
                    t,
                    "attempt to yield across metamethod/C-call boundary".to_string(),
                );
                self.unprotected_error(t, e)
            }
            Err(e) => self.unprotected_error(t, e),
        }
    }

    fn unprotected_error(&mut self, t: ThreadId, e: LuaError) -> LuaResult<()> {
        let err = self.thread(t).error_value;
        let _ = self.push_value(t, err);
        if let Some(panic) = self.panic {
            panic(self);
        }
        Err(e)
    }

    /// Protected call; on error the status is returned and the error
    /// object is the single value left above the call position.
    pub fn pcall(
        &mut self,
        t: ThreadId,
        nargs: usize,
        nresults: i32,
        errfunc: Option<i32>,
    ) -> Result<(), LuaError> {
        let func = self.thread(t).top - nargs - 1;
        let ef = errfunc.and_then(|i| self.abs_stack_index(t, i));
        self.protected_call(t, func, nargs, nresults, ef)
    }

    /// Load a chunk and push the resulting closure (the `load` contract;
    /// parsing itself is the front end's job).
    pub fn load(&mut self, t: ThreadId, desc: &ChunkDesc) -> Result<(), LuaError> {
        match self.load_chunk(desc) {
            Ok(cl) => {
                self.push_value(t, cl)?;
                Ok(())
            }
            Err(e) => {
                let err = self.thread(t).error_value;
                self.push_value(t, err)?;
                Err(e)
            }
        }
    }

    // ---- host-function argument helpers ----

    /// Arguments of the running host function.
    pub fn arg_count(&self, t: ThreadId) -> usize {
        let base = self.api_base(t);
        self.thread(t).top - base
    }

    /// 1-based argument access.
    pub fn arg(&self, t: ThreadId, n: usize) -> Option<LuaValue> {
        let base = self.api_base(t);
        let abs = base + n - 1;
        if n >= 1 && abs < self.thread(t).top {
            Some(self.thread(t).stack[abs])
        } else {
            None
        }
    }

    pub fn arg_or_nil(&self, t: ThreadId, n: usize) -> LuaValue {
        self.arg(t, n).unwrap_or(LuaValue::Nil)
    }

    /// Typed argument errors in the standard format.
    pub fn check_arg_number(&mut self, t: ThreadId, n: usize, fname: &str) -> LuaResult<f64> {
        let v = self.arg_or_nil(t, n);
        match self.coerce_number(&v) {
            Some(x) => Ok(x),
            None => Err(self.throw_runtime(
                t,
                format!(
                    "bad argument #{} to '{}' (number expected, got {})",
                    n,
                    fname,
                    v.type_name()
                ),
            )),
        }
    }

    pub fn check_arg_string(&mut self, t: ThreadId, n: usize, fname: &str) -> LuaResult<String> {
        let v = self.arg_or_nil(t, n);
        match v {
            LuaValue::String(id) => Ok(self.str_of(id).to_string()),
            LuaValue::Number(x) => Ok(number_to_display(x)),
            _ => Err(self.throw_runtime(
                t,
                format!(
                    "bad argument #{} to '{}' (string expected, got {})",
                    n,
                    fname,
                    v.type_name()
                ),
            )),
        }
    }

    pub fn check_arg_table(
        &mut self,
        t: ThreadId,
        n: usize,
        fname: &str,
    ) -> LuaResult<crate::gc::TableId> {
        let v = self.arg_or_nil(t, n);
        match v.as_table_id() {
            Some(tid) => Ok(tid),
            None => Err(self.throw_runtime(
                t,
                format!(
                    "bad argument #{} to '{}' (table expected, got {})",
                    n,
                    fname,
                    v.type_name()
                ),
            )),
        }
    }
}
