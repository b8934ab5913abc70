// The bytecode interpreter.
//
// One Rust activation of `execute` runs any number of bytecode frames:
// CALL pushes a frame and jumps back to the frame-entry label, RETURN
// pops one and either resumes the caller or leaves the loop when the
// entry depth is reached, and TAILCALL splices the callee into the
// caller's CallInfo so deep tail recursion runs in constant frame depth.
// Only metamethods, iterator calls and host re-entries nest another
// activation, which is why a yield cannot cross them.

mod arith;
mod call;
mod table_ops;
mod upvalues;

pub(crate) use arith::ArithOp;
pub(crate) use call::Callee;

use std::rc::Rc;

use crate::gc::{ClosureId, TableId, ThreadId, UpvalueId};
use crate::lua_value::{LuaValue, MASK_COUNT, MASK_LINE, Proto};
use crate::lua_vm::opcode::{
    LFIELDS_PER_FLUSH, OpCode, fb_to_int, get_a, get_b, get_bx, get_c, get_opcode, get_sbx, is_k,
    rk_index,
};
use crate::lua_vm::{LuaResult, LuaVM, call_status};

impl LuaVM {
    #[inline(always)]
    fn reg(&self, t: ThreadId, i: usize) -> LuaValue {
        self.thread(t).stack[i]
    }

    #[inline(always)]
    fn set_reg(&mut self, t: ThreadId, i: usize, v: LuaValue) {
        self.thread_mut(t).stack[i] = v;
    }

    #[inline(always)]
    fn rk(&self, t: ThreadId, base: usize, k: &[LuaValue], x: usize) -> LuaValue {
        if is_k(x) {
            k[rk_index(x)]
        } else {
            self.reg(t, base + x)
        }
    }

    #[inline(always)]
    fn save_pc(&mut self, t: ThreadId, pc: usize) {
        self.thread_mut(t)
            .ci
            .last_mut()
            .expect("running frame")
            .saved_pc = pc;
    }

    fn lua_upvalue_id(&self, cl: ClosureId, idx: usize) -> UpvalueId {
        self.pool
            .closure(cl)
            .data
            .as_lua()
            .expect("bytecode frame closure")
            .upvalues[idx]
    }

    /// Run bytecode frames of `t` until the CallInfo depth returns to
    /// `target_depth`.
    pub(crate) fn execute_frames(&mut self, t: ThreadId, target_depth: usize) -> LuaResult<()> {
        'startfunc: loop {
            if self.thread(t).ci.len() <= target_depth {
                return Ok(());
            }
            let (func_idx, base, mut pc, frame_top) = {
                let ci = self.thread(t).current_ci().expect("frame present");
                debug_assert!(ci.is_lua());
                (ci.func, ci.base, ci.saved_pc, ci.top)
            };
            let cl_id = self
                .reg(t, func_idx)
                .as_closure_id()
                .expect("bytecode frame without closure");
            let (proto, env) = {
                let cl = self
                    .pool
                    .closure(cl_id)
                    .data
                    .as_lua()
                    .expect("bytecode frame closure");
                (Rc::clone(&cl.proto), cl.env)
            };
            let code: &[u32] = &proto.code;
            let k: &[LuaValue] = &proto.k;
            let numparams = proto.numparams as usize;

            loop {
                if self.thread(t).hook.mask & (MASK_COUNT | MASK_LINE) != 0 {
                    self.save_pc(t, pc);
                    self.trace_exec(t, &proto, pc)?;
                }
                let i = code[pc];
                pc += 1;
                let op = OpCode::from_u8(get_opcode(i)).expect("verified opcode");
                let a = get_a(i);
                let ra = base + a;
                match op {
                    OpCode::Move => {
                        let v = self.reg(t, base + get_b(i));
                        self.set_reg(t, ra, v);
                    }
                    OpCode::LoadK => {
                        self.set_reg(t, ra, k[get_bx(i)]);
                    }
                    OpCode::LoadBool => {
                        self.set_reg(t, ra, LuaValue::Boolean(get_b(i) != 0));
                        if get_c(i) != 0 {
                            pc += 1;
                        }
                    }
                    OpCode::LoadNil => {
                        let rb = base + get_b(i);
                        for r in ra..=rb {
                            self.set_reg(t, r, LuaValue::Nil);
                        }
                    }
                    OpCode::GetUpval => {
                        let uv = self.lua_upvalue_id(cl_id, get_b(i));
                        let v = self.upvalue_get(uv);
                        self.set_reg(t, ra, v);
                    }
                    OpCode::SetUpval => {
                        let uv = self.lua_upvalue_id(cl_id, get_b(i));
                        let v = self.reg(t, ra);
                        self.upvalue_set(uv, v);
                    }
                    OpCode::GetGlobal => {
                        let key = k[get_bx(i)];
                        self.save_pc(t, pc);
                        let v = self.vm_gettable(t, &LuaValue::Table(env), &key)?;
                        self.set_reg(t, ra, v);
                    }
                    OpCode::SetGlobal => {
                        let key = k[get_bx(i)];
                        let v = self.reg(t, ra);
                        self.save_pc(t, pc);
                        self.vm_settable(t, &LuaValue::Table(env), key, v)?;
                    }
                    OpCode::GetTable => {
                        let obj = self.reg(t, base + get_b(i));
                        let key = self.rk(t, base, k, get_c(i));
                        self.save_pc(t, pc);
                        let v = self.vm_gettable(t, &obj, &key)?;
                        self.set_reg(t, ra, v);
                    }
                    OpCode::SetTable => {
                        let obj = self.reg(t, ra);
                        let key = self.rk(t, base, k, get_b(i));
                        let v = self.rk(t, base, k, get_c(i));
                        self.save_pc(t, pc);
                        self.vm_settable(t, &obj, key, v)?;
                    }
                    OpCode::NewTable => {
                        self.save_pc(t, pc);
                        self.check_gc();
                        let v =
                            self.create_table(fb_to_int(get_b(i) as u8), fb_to_int(get_c(i) as u8));
                        self.set_reg(t, ra, v);
                    }
                    OpCode::SelfOp => {
                        let obj = self.reg(t, base + get_b(i));
                        self.set_reg(t, ra + 1, obj);
                        let key = self.rk(t, base, k, get_c(i));
                        self.save_pc(t, pc);
                        let v = self.vm_gettable(t, &obj, &key)?;
                        self.set_reg(t, ra, v);
                    }
                    OpCode::Add
                    | OpCode::Sub
                    | OpCode::Mul
                    | OpCode::Div
                    | OpCode::Mod
                    | OpCode::Pow => {
                        let rb = self.rk(t, base, k, get_b(i));
                        let rc = self.rk(t, base, k, get_c(i));
                        if let (LuaValue::Number(x), LuaValue::Number(y)) = (rb, rc) {
                            let aop = arith_of(op);
                            self.set_reg(t, ra, LuaValue::Number(apply_num(aop, x, y)));
                        } else {
                            self.save_pc(t, pc);
                            let v = self.vm_arith(t, arith_of(op), rb, rc)?;
                            self.set_reg(t, ra, v);
                        }
                    }
                    OpCode::Unm => {
                        let rb = self.reg(t, base + get_b(i));
                        if let LuaValue::Number(x) = rb {
                            self.set_reg(t, ra, LuaValue::Number(-x));
                        } else {
                            self.save_pc(t, pc);
                            let v = self.vm_arith(t, ArithOp::Unm, rb, rb)?;
                            self.set_reg(t, ra, v);
                        }
                    }
                    OpCode::Not => {
                        let rb = self.reg(t, base + get_b(i));
                        self.set_reg(t, ra, LuaValue::Boolean(!rb.is_truthy()));
                    }
                    OpCode::Len => {
                        let rb = self.reg(t, base + get_b(i));
                        self.save_pc(t, pc);
                        let v = self.vm_length(t, &rb)?;
                        self.set_reg(t, ra, v);
                    }
                    OpCode::Concat => {
                        let b = get_b(i);
                        let c = get_c(i);
                        self.save_pc(t, pc);
                        self.thread_mut(t).top = base + c + 1;
                        self.vm_concat(t, c - b + 1)?;
                        let v = self.reg(t, base + b);
                        self.set_reg(t, ra, v);
                        self.thread_mut(t).top = frame_top;
                    }
                    OpCode::Jmp => {
                        pc = offset_pc(pc, get_sbx(i));
                    }
                    OpCode::Eq => {
                        let rb = self.rk(t, base, k, get_b(i));
                        let rc = self.rk(t, base, k, get_c(i));
                        self.save_pc(t, pc);
                        let cond = self.vm_equal(t, &rb, &rc)?;
                        pc = cond_jump(code, pc, cond == (a != 0));
                    }
                    OpCode::Lt => {
                        let rb = self.rk(t, base, k, get_b(i));
                        let rc = self.rk(t, base, k, get_c(i));
                        self.save_pc(t, pc);
                        let cond = self.vm_less(t, &rb, &rc)?;
                        pc = cond_jump(code, pc, cond == (a != 0));
                    }
                    OpCode::Le => {
                        let rb = self.rk(t, base, k, get_b(i));
                        let rc = self.rk(t, base, k, get_c(i));
                        self.save_pc(t, pc);
                        let cond = self.vm_less_eq(t, &rb, &rc)?;
                        pc = cond_jump(code, pc, cond == (a != 0));
                    }
                    OpCode::Test => {
                        let cond = self.reg(t, ra).is_truthy();
                        pc = cond_jump(code, pc, cond == (get_c(i) != 0));
                    }
                    OpCode::TestSet => {
                        let rb = self.reg(t, base + get_b(i));
                        if rb.is_truthy() == (get_c(i) != 0) {
                            self.set_reg(t, ra, rb);
                            pc = cond_jump(code, pc, true);
                        } else {
                            pc = cond_jump(code, pc, false);
                        }
                    }
                    OpCode::Call => {
                        let b = get_b(i);
                        let c = get_c(i);
                        if b != 0 {
                            self.thread_mut(t).top = ra + b;
                        }
                        self.save_pc(t, pc);
                        match self.precall(t, ra, c as i32 - 1)? {
                            Callee::Lua => continue 'startfunc,
                            Callee::C => {
                                if c != 0 {
                                    self.thread_mut(t).top = frame_top;
                                }
                            }
                        }
                    }
                    OpCode::TailCall => {
                        let b = get_b(i);
                        if b != 0 {
                            self.thread_mut(t).top = ra + b;
                        }
                        self.save_pc(t, pc);
                        match self.precall(t, ra, -1)? {
                            Callee::Lua => {
                                // The caller's window is about to be
                                // overwritten by the splice; captured
                                // locals must be closed first, as on
                                // RETURN.
                                self.close_upvalues(t, base);
                                self.merge_tail_call(t);
                                continue 'startfunc;
                            }
                            Callee::C => {
                                // Already ran; the RETURN that follows
                                // forwards its results (and closes).
                            }
                        }
                    }
                    OpCode::Return => {
                        let b = get_b(i);
                        if b != 0 {
                            self.thread_mut(t).top = ra + b - 1;
                        }
                        self.close_upvalues(t, base);
                        self.save_pc(t, pc);
                        let first = ra;
                        let n = self.thread(t).top - first;
                        let wanted = self
                            .thread(t)
                            .current_ci()
                            .expect("returning frame")
                            .nresults;
                        self.poscall(t, first, n)?;
                        if self.thread(t).ci.len() <= target_depth {
                            return Ok(());
                        }
                        if wanted >= 0 {
                            let caller_top = self
                                .thread(t)
                                .current_ci()
                                .expect("caller frame")
                                .top;
                            self.thread_mut(t).top = caller_top;
                        }
                        continue 'startfunc;
                    }
                    OpCode::ForLoop => {
                        let step = self.for_number(t, ra + 2, "'for' step")?;
                        let idx = self.for_number(t, ra, "'for' initial value")? + step;
                        let limit = self.for_number(t, ra + 1, "'for' limit")?;
                        let keep_going = if step > 0.0 {
                            idx <= limit
                        } else {
                            limit <= idx
                        };
                        if keep_going {
                            pc = offset_pc(pc, get_sbx(i));
                            self.set_reg(t, ra, LuaValue::Number(idx));
                            self.set_reg(t, ra + 3, LuaValue::Number(idx));
                        }
                    }
                    OpCode::ForPrep => {
                        self.save_pc(t, pc);
                        let init = self.for_prep_number(t, ra, "'for' initial value")?;
                        self.for_prep_number(t, ra + 1, "'for' limit")?;
                        let step = self.for_prep_number(t, ra + 2, "'for' step")?;
                        self.set_reg(t, ra, LuaValue::Number(init - step));
                        pc = offset_pc(pc, get_sbx(i));
                    }
                    OpCode::TForLoop => {
                        let cb = ra + 3;
                        let f = self.reg(t, ra);
                        let s = self.reg(t, ra + 1);
                        let ctl = self.reg(t, ra + 2);
                        self.set_reg(t, cb, f);
                        self.set_reg(t, cb + 1, s);
                        self.set_reg(t, cb + 2, ctl);
                        self.thread_mut(t).top = cb + 3;
                        self.save_pc(t, pc);
                        self.do_call(t, cb, get_c(i) as i32)?;
                        self.thread_mut(t).top = frame_top;
                        let first = self.reg(t, cb);
                        if !first.is_nil() {
                            self.set_reg(t, cb - 1, first);
                            pc = cond_jump(code, pc, true);
                        } else {
                            pc = cond_jump(code, pc, false);
                        }
                    }
                    OpCode::SetList => {
                        let mut n = get_b(i);
                        let mut c = get_c(i);
                        if n == 0 {
                            n = self.thread(t).top - ra - 1;
                        }
                        if c == 0 {
                            c = code[pc] as usize;
                            pc += 1;
                        }
                        self.save_pc(t, pc);
                        let tid = match self.reg(t, ra) {
                            LuaValue::Table(id) => id,
                            other => return Err(self.type_error(t, "index", &other)),
                        };
                        let last = (c - 1) * LFIELDS_PER_FLUSH + n;
                        self.table_presize_array(t, tid, last)?;
                        for j in 1..=n {
                            let v = self.reg(t, ra + j);
                            let key = ((c - 1) * LFIELDS_PER_FLUSH + j) as i64;
                            self.table_raw_set_int(t, tid, key, v)?;
                        }
                        self.thread_mut(t).top = frame_top;
                    }
                    OpCode::Close => {
                        self.close_upvalues(t, ra);
                    }
                    OpCode::Closure => {
                        self.save_pc(t, pc);
                        self.check_gc();
                        let p = Rc::clone(&proto.protos[get_bx(i)]);
                        let nup = p.nups as usize;
                        let mut ups = Vec::with_capacity(nup);
                        for _ in 0..nup {
                            let pseudo = code[pc];
                            pc += 1;
                            match OpCode::from_u8(get_opcode(pseudo)).expect("verified opcode") {
                                OpCode::GetUpval => {
                                    ups.push(self.lua_upvalue_id(cl_id, get_b(pseudo)));
                                }
                                OpCode::Move => {
                                    ups.push(self.find_upvalue(t, base + get_b(pseudo)));
                                }
                                _ => unreachable!("closure pseudo-instruction"),
                            }
                        }
                        let v = self.create_lua_closure(p, ups, env);
                        self.set_reg(t, ra, v);
                    }
                    OpCode::Vararg => {
                        let nvar = (base - func_idx - 1).saturating_sub(numparams);
                        let want = get_b(i) as i32 - 1;
                        let n = if want < 0 {
                            self.save_pc(t, pc);
                            self.grow_stack(t, nvar)?;
                            self.thread_mut(t).top = ra + nvar;
                            nvar
                        } else {
                            want as usize
                        };
                        for j in 0..n {
                            let v = if j < nvar {
                                self.reg(t, base - nvar + j)
                            } else {
                                LuaValue::Nil
                            };
                            self.set_reg(t, ra + j, v);
                        }
                    }
                }
            }
        }
    }

    /// Splice the just-pushed callee frame over its caller: copy function
    /// and arguments down, reuse the caller's CallInfo, count the merge.
    fn merge_tail_call(&mut self, t: ThreadId) {
        let th = self.thread_mut(t);
        let callee = th.ci.pop().expect("tail-called frame");
        let caller_func = th
            .ci
            .last()
            .expect("frame performing the tail call")
            .func;
        let shift = callee.func - caller_func;
        for i in callee.func..callee.top {
            th.stack[i - shift] = th.stack[i];
        }
        let new_top = callee.top - shift;
        let caller = th.ci.last_mut().expect("frame performing the tail call");
        // The CallInfo is reused: nresults stays whatever the original
        // caller asked for, only the register window moves.
        caller.base = callee.base - shift;
        caller.top = new_top;
        caller.saved_pc = 0;
        caller.status |= call_status::CIST_TAIL;
        caller.tailcalls += 1;
        th.top = new_top;
    }

    fn for_number(&mut self, t: ThreadId, idx: usize, what: &str) -> LuaResult<f64> {
        match self.reg(t, idx) {
            LuaValue::Number(n) => Ok(n),
            _ => Err(self.throw_runtime(t, format!("{} must be a number", what))),
        }
    }

    /// Coerce a for-loop control slot in place (strings that look like
    /// numbers are accepted at loop entry).
    fn for_prep_number(&mut self, t: ThreadId, idx: usize, what: &str) -> LuaResult<f64> {
        let v = self.reg(t, idx);
        match self.coerce_number(&v) {
            Some(n) => {
                self.set_reg(t, idx, LuaValue::Number(n));
                Ok(n)
            }
            None => Err(self.throw_runtime(t, format!("{} must be a number", what))),
        }
    }

    fn table_presize_array(&mut self, t: ThreadId, tid: TableId, len: usize) -> LuaResult<()> {
        if len <= self.pool.table(tid).data.array_len() {
            return Ok(());
        }
        let before = self.pool.table(tid).data.footprint();
        if self.pool.table_mut(tid).data.resize_array(len).is_err() {
            return Err(self.throw_runtime(t, "table overflow".to_string()));
        }
        let after = self.pool.table(tid).data.footprint();
        self.resize_accounted(crate::gc::GcId::Table(tid), before, after);
        Ok(())
    }

    /// Per-instruction hook points: instruction counting and new-line
    /// detection (entering a function, jumping backwards, or changing
    /// source line).
    fn trace_exec(&mut self, t: ThreadId, proto: &Proto, pc: usize) -> LuaResult<()> {
        let mask = self.thread(t).hook.mask;
        if mask & MASK_COUNT != 0 {
            let fire = {
                let h = &mut self.thread_mut(t).hook;
                if h.count > 0 {
                    h.count -= 1;
                }
                if h.count == 0 {
                    h.count = h.basecount;
                    true
                } else {
                    false
                }
            };
            if fire {
                self.call_hook(t, "count", -1)?;
            }
        }
        if mask & MASK_LINE != 0 {
            let oldpc = self.thread(t).hook.oldpc;
            let newline = proto.line_at(pc);
            if pc == 0 || pc <= oldpc || newline != proto.line_at(oldpc) {
                self.call_hook(t, "line", newline as i32)?;
            }
            self.thread_mut(t).hook.oldpc = pc;
        }
        Ok(())
    }
}

#[inline(always)]
fn offset_pc(pc: usize, sbx: i32) -> usize {
    (pc as i64 + sbx as i64) as usize
}

/// Conditional instructions pair with the following Jmp: take it when the
/// condition holds, step over it otherwise.
#[inline(always)]
fn cond_jump(code: &[u32], pc: usize, take: bool) -> usize {
    if take {
        offset_pc(pc, get_sbx(code[pc])) + 1
    } else {
        pc + 1
    }
}

fn arith_of(op: OpCode) -> ArithOp {
    match op {
        OpCode::Add => ArithOp::Add,
        OpCode::Sub => ArithOp::Sub,
        OpCode::Mul => ArithOp::Mul,
        OpCode::Div => ArithOp::Div,
        OpCode::Mod => ArithOp::Mod,
        OpCode::Pow => ArithOp::Pow,
        _ => unreachable!("arithmetic opcode"),
    }
}

fn apply_num(op: ArithOp, x: f64, y: f64) -> f64 {
    match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Mod => x - (x / y).floor() * y,
        ArithOp::Pow => x.powf(y),
        ArithOp::Unm => -x,
    }
}
