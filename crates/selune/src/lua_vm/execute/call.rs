// The calling convention.
//
// `precall` builds a frame for the callable at a stack index: bytecode
// frames get their register window (vararg frames relocate the fixed
// parameters above the actuals), host frames run the function on the
// spot. `poscall` moves results into the caller's slots, negotiating the
// count the CALL instruction asked for. `do_call` is the synchronous
// entry used by metamethods, iterators and the host API; bytecode-to-
// bytecode calls never go through it, the dispatch loop switches frames
// in place instead.

use crate::gc::ThreadId;
use crate::lua_value::{CoStatus, LuaValue, LuaValueKind, MASK_CALL, MASK_RET, MAX_C_CALLS};
use crate::lua_vm::tag_method::Tm;
use crate::lua_vm::{CallInfo, LuaError, LuaResult, LuaVM};

/// Minimum register window for host functions.
pub const MIN_C_STACK: usize = 20;
/// Bound on CallInfo depth ("stack overflow" past this).
pub const MAX_CALL_DEPTH: usize = 20_000;

pub(crate) enum Callee {
    /// A bytecode frame was pushed; the dispatch loop takes over.
    Lua,
    /// A host function ran to completion; results are already in place.
    C,
}

impl LuaVM {
    /// Install a call to `stack[func]` with arguments func+1..top.
    pub(crate) fn precall(
        &mut self,
        t: ThreadId,
        func: usize,
        nresults: i32,
    ) -> LuaResult<Callee> {
        let mut fval = self.thread(t).stack[func];
        if fval.kind() != LuaValueKind::Function {
            // __call: shift the arguments up and put the handler first.
            let tm = self.get_tm(&fval, Tm::Call);
            if tm.kind() != LuaValueKind::Function {
                return Err(self.type_error(t, "call", &fval));
            }
            self.grow_stack(t, 1)?;
            let th = self.thread_mut(t);
            let top = th.top;
            for i in (func..top).rev() {
                th.stack[i + 1] = th.stack[i];
            }
            th.stack[func] = tm;
            th.top = top + 1;
            fval = tm;
        }
        if self.thread(t).ci.len() >= MAX_CALL_DEPTH {
            return Err(self.throw_runtime_raw(t, "stack overflow".to_string()));
        }
        let cl_id = fval.as_closure_id().expect("checked function value");
        let is_lua = self.pool.closure(cl_id).data.is_lua();
        if is_lua {
            let (numparams, maxstack, is_vararg) = {
                let proto = &self
                    .pool
                    .closure(cl_id)
                    .data
                    .as_lua()
                    .expect("lua closure")
                    .proto;
                (
                    proto.numparams as usize,
                    proto.maxstacksize as usize,
                    proto.is_vararg,
                )
            };
            let base;
            if !is_vararg {
                base = func + 1;
                let needed = (base + maxstack).saturating_sub(self.thread(t).top);
                self.grow_stack(t, needed)?;
                let th = self.thread_mut(t);
                if th.top > base + numparams {
                    th.top = base + numparams;
                }
                for i in th.top..base + maxstack {
                    th.stack[i] = LuaValue::Nil;
                }
                th.top = base + maxstack;
            } else {
                // Fixed parameters move above the actual arguments; the
                // actuals left below the new base are the varargs.
                let nargs = self.thread(t).top - func - 1;
                let nfix = nargs.min(numparams);
                self.grow_stack(t, maxstack)?;
                let th = self.thread_mut(t);
                let old_top = th.top;
                base = old_top;
                for i in 0..nfix {
                    th.stack[base + i] = th.stack[func + 1 + i];
                    th.stack[func + 1 + i] = LuaValue::Nil;
                }
                for i in nfix..maxstack {
                    th.stack[base + i] = LuaValue::Nil;
                }
                th.top = base + maxstack;
            }
            let ci = CallInfo::new_lua(func, base, base + maxstack, nresults);
            self.thread_mut(t).ci.push(ci);
            if self.thread(t).hook.mask & MASK_CALL != 0 {
                self.call_hook(t, "call", -1)?;
            }
            Ok(Callee::Lua)
        } else {
            self.grow_stack(t, MIN_C_STACK)?;
            let base = func + 1;
            let top = self.thread(t).top;
            let ci = CallInfo::new_c(func, base, top + MIN_C_STACK, nresults);
            self.thread_mut(t).ci.push(ci);
            if self.thread(t).hook.mask & MASK_CALL != 0 {
                self.call_hook(t, "call", -1)?;
            }
            let f = self
                .pool
                .closure(cl_id)
                .data
                .as_c()
                .expect("c closure")
                .func;
            {
                let th = self.thread_mut(t);
                th.nccalls += 1;
                if th.nccalls >= MAX_C_CALLS {
                    th.nccalls -= 1;
                    return Err(self.throw_runtime_raw(t, "C stack overflow".to_string()));
                }
            }
            let r = f(self, t);
            self.thread_mut(t).nccalls -= 1;
            let n = r?;
            let first = self.thread(t).top - n;
            self.poscall(t, first, n)?;
            Ok(Callee::C)
        }
    }

    /// Finish the current frame: fire the return hook, move `n` results
    /// from `first_result` down to the function slot, pad or truncate to
    /// the negotiated count, pop the frame.
    pub(crate) fn poscall(&mut self, t: ThreadId, first_result: usize, n: usize) -> LuaResult<()> {
        if self.thread(t).hook.mask & MASK_RET != 0 {
            self.call_hook(t, "return", -1)?;
        }
        let ci = self
            .thread_mut(t)
            .ci
            .pop()
            .expect("poscall without a frame");
        let res = ci.func;
        let wanted = ci.nresults;
        let th = self.thread_mut(t);
        if wanted < 0 {
            for i in 0..n {
                th.stack[res + i] = th.stack[first_result + i];
            }
            th.top = res + n;
        } else {
            let keep = n.min(wanted as usize);
            for i in 0..keep {
                th.stack[res + i] = th.stack[first_result + i];
            }
            for i in keep..wanted as usize {
                th.stack[res + i] = LuaValue::Nil;
            }
            th.top = res + wanted as usize;
        }
        Ok(())
    }

    /// Call `stack[func]` with the arguments above it and run it to
    /// completion (nested interpreter activation for bytecode callees).
    pub(crate) fn do_call(&mut self, t: ThreadId, func: usize, nresults: i32) -> LuaResult<()> {
        {
            let th = self.thread_mut(t);
            th.nccalls += 1;
            if th.nccalls >= MAX_C_CALLS {
                th.nccalls -= 1;
                return Err(self.throw_runtime_raw(t, "C stack overflow".to_string()));
            }
        }
        let result = (|| -> LuaResult<()> {
            match self.precall(t, func, nresults)? {
                Callee::Lua => {
                    let target = self.thread(t).ci.len() - 1;
                    self.execute_frames(t, target)
                }
                Callee::C => Ok(()),
            }
        })();
        self.thread_mut(t).nccalls -= 1;
        if result.is_ok() {
            self.check_gc();
        }
        result
    }

    /// Protected call: on any failure the stacks are rewound to the call
    /// boundary and the (possibly handler-filtered) error object is left
    /// as the single value at `func`.
    pub(crate) fn protected_call(
        &mut self,
        t: ThreadId,
        func: usize,
        _nargs: usize,
        nresults: i32,
        errfunc: Option<usize>,
    ) -> Result<(), LuaError> {
        let saved_ci = self.thread(t).ci.len();
        let saved_allowhook = self.thread(t).hook.allow;
        let saved_nccalls = self.thread(t).nccalls;
        match self.do_call(t, func, nresults) {
            Ok(()) => Ok(()),
            Err(e) => {
                // A yield cannot reach here: do_yield rejects suspension
                // across any host frame, and this is one.
                debug_assert!(e != LuaError::Yield);
                let mut kind = e;
                let mut err_obj = self.thread(t).error_value;
                if let Some(ef) = errfunc {
                    // The handler runs before unwinding, so it can still
                    // inspect the whole stack (tracebacks).
                    let handler = self.thread(t).stack[ef];
                    match self.call_handler(t, handler, err_obj) {
                        Ok(filtered) => err_obj = filtered,
                        Err(_) => {
                            kind = LuaError::ErrErr;
                            err_obj = self.new_string("error in error handling");
                        }
                    }
                }
                self.close_upvalues(t, func);
                let th = self.thread_mut(t);
                th.ci.truncate(saved_ci);
                th.stack[func] = err_obj;
                th.top = func + 1;
                th.hook.allow = saved_allowhook;
                th.nccalls = saved_nccalls;
                th.error_value = err_obj;
                Err(kind)
            }
        }
    }

    fn call_handler(
        &mut self,
        t: ThreadId,
        handler: LuaValue,
        err_obj: LuaValue,
    ) -> LuaResult<LuaValue> {
        if handler.kind() != LuaValueKind::Function {
            return Ok(err_obj);
        }
        let top = self.thread(t).top;
        self.grow_stack(t, 2)?;
        {
            let th = self.thread_mut(t);
            th.push(handler);
            th.push(err_obj);
        }
        self.do_call(t, top, 1)?;
        let th = self.thread_mut(t);
        let res = th.stack[top];
        th.top = top;
        Ok(res)
    }

    /// metamethod(a, b) -> one result.
    pub(crate) fn call_tm_res(
        &mut self,
        t: ThreadId,
        f: LuaValue,
        a: LuaValue,
        b: LuaValue,
    ) -> LuaResult<LuaValue> {
        let top = self.thread(t).top;
        self.grow_stack(t, 3)?;
        {
            let th = self.thread_mut(t);
            th.push(f);
            th.push(a);
            th.push(b);
        }
        self.do_call(t, top, 1)?;
        let th = self.thread_mut(t);
        let res = th.stack[top];
        th.top = top;
        Ok(res)
    }

    /// metamethod(a, b, c) -> no results (__newindex).
    pub(crate) fn call_tm_set(
        &mut self,
        t: ThreadId,
        f: LuaValue,
        a: LuaValue,
        b: LuaValue,
        c: LuaValue,
    ) -> LuaResult<()> {
        let top = self.thread(t).top;
        self.grow_stack(t, 4)?;
        {
            let th = self.thread_mut(t);
            th.push(f);
            th.push(a);
            th.push(b);
            th.push(c);
        }
        self.do_call(t, top, 0)?;
        self.thread_mut(t).top = top;
        Ok(())
    }

    /// Fire the installed hook for an event. Reentrancy is suppressed via
    /// the allow flag; a hook raising an error unwinds like any other
    /// runtime error, which is how hosts interrupt runaway code.
    pub(crate) fn call_hook(&mut self, t: ThreadId, event: &str, line: i32) -> LuaResult<()> {
        let (hook_fn, allow) = {
            let h = &self.thread(t).hook;
            (h.func, h.allow)
        };
        if !allow || hook_fn.kind() != LuaValueKind::Function {
            return Ok(());
        }
        self.thread_mut(t).hook.allow = false;
        let top = self.thread(t).top;
        let result = (|| -> LuaResult<()> {
            self.grow_stack(t, 3)?;
            let ev = self.new_string(event);
            {
                let th = self.thread_mut(t);
                th.push(hook_fn);
                th.push(ev);
                th.push(if line >= 0 {
                    LuaValue::Number(line as f64)
                } else {
                    LuaValue::Nil
                });
            }
            self.do_call(t, top, 0)
        })();
        let th = self.thread_mut(t);
        th.top = top;
        th.hook.allow = true;
        result
    }

    /// Coroutine suspension request, raised from `coroutine.yield`.
    pub(crate) fn do_yield(&mut self, t: ThreadId) -> LuaError {
        if t == self.main_thread || self.thread(t).status != CoStatus::Running {
            return self.throw_runtime(t, "attempt to yield from outside a coroutine".to_string());
        }
        // Only the yield call itself may sit between the bytecode frames
        // and us; anything deeper means a host frame would be cut.
        if self.thread(t).nccalls != 1 {
            return self.throw_runtime(
                t,
                "attempt to yield across metamethod/C-call boundary".to_string(),
            );
        }
        LuaError::Yield
    }
}
