// Arithmetic, comparison and concatenation, with tag-method fallback.
//
// Arithmetic first tries numeric coercion of both operands (strings that
// parse as numbers count); only when one stays non-numeric does the
// metamethod fire, first on the left operand, then on the right.

use crate::gc::ThreadId;
use crate::lua_value::{LuaValue, number_to_display, str_to_number};
use crate::lua_vm::tag_method::Tm;
use crate::lua_vm::{LuaResult, LuaVM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
}

impl ArithOp {
    pub fn event(self) -> Tm {
        match self {
            ArithOp::Add => Tm::Add,
            ArithOp::Sub => Tm::Sub,
            ArithOp::Mul => Tm::Mul,
            ArithOp::Div => Tm::Div,
            ArithOp::Mod => Tm::Mod,
            ArithOp::Pow => Tm::Pow,
            ArithOp::Unm => Tm::Unm,
        }
    }

    fn apply(self, x: f64, y: f64) -> f64 {
        match self {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
            // a - floor(a/b)*b, so the result takes the sign of b.
            ArithOp::Mod => x - (x / y).floor() * y,
            ArithOp::Pow => x.powf(y),
            ArithOp::Unm => -x,
        }
    }
}

impl LuaVM {
    /// Numeric coercion: numbers pass through, strings parse.
    pub(crate) fn coerce_number(&self, v: &LuaValue) -> Option<f64> {
        match v {
            LuaValue::Number(n) => Some(*n),
            LuaValue::String(id) => str_to_number(self.pool.string(*id).data.as_str()),
            _ => None,
        }
    }

    pub(crate) fn vm_arith(
        &mut self,
        t: ThreadId,
        op: ArithOp,
        a: LuaValue,
        b: LuaValue,
    ) -> LuaResult<LuaValue> {
        if let (Some(x), Some(y)) = (self.coerce_number(&a), self.coerce_number(&b)) {
            return Ok(LuaValue::Number(op.apply(x, y)));
        }
        let event = op.event();
        let mut tm = self.get_tm(&a, event);
        if tm.is_nil() {
            tm = self.get_tm(&b, event);
        }
        if tm.is_nil() {
            let culprit = if self.coerce_number(&a).is_none() { a } else { b };
            return Err(self.type_error(t, "perform arithmetic on", &culprit));
        }
        self.call_tm_res(t, tm, a, b)
    }

    /// Equality for `==`: primitive identity first, then __eq when both
    /// operands share a type and a metatable. The handler result coerces
    /// to boolean by truthiness.
    pub(crate) fn vm_equal(
        &mut self,
        t: ThreadId,
        a: &LuaValue,
        b: &LuaValue,
    ) -> LuaResult<bool> {
        if a.kind() != b.kind() {
            return Ok(false);
        }
        if a.raw_equals(b) {
            return Ok(true);
        }
        match self.get_eq_tm(a, b) {
            Some(tm) => {
                let r = self.call_tm_res(t, tm, *a, *b)?;
                Ok(r.is_truthy())
            }
            None => Ok(false),
        }
    }

    pub(crate) fn vm_less(&mut self, t: ThreadId, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        match (a, b) {
            (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x < y),
            (LuaValue::String(x), LuaValue::String(y)) => {
                Ok(self.str_of(*x) < self.str_of(*y))
            }
            _ => match self.order_tm(a, b, Tm::Lt) {
                Some(tm) => {
                    let r = self.call_tm_res(t, tm, *a, *b)?;
                    Ok(r.is_truthy())
                }
                None => Err(self.order_error(t, a, b)),
            },
        }
    }

    pub(crate) fn vm_less_eq(
        &mut self,
        t: ThreadId,
        a: &LuaValue,
        b: &LuaValue,
    ) -> LuaResult<bool> {
        match (a, b) {
            (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x <= y),
            (LuaValue::String(x), LuaValue::String(y)) => {
                Ok(self.str_of(*x) <= self.str_of(*y))
            }
            _ => {
                if let Some(tm) = self.order_tm(a, b, Tm::Le) {
                    let r = self.call_tm_res(t, tm, *a, *b)?;
                    return Ok(r.is_truthy());
                }
                // a <= b as not (b < a).
                if let Some(tm) = self.order_tm(b, a, Tm::Lt) {
                    let r = self.call_tm_res(t, tm, *b, *a)?;
                    return Ok(!r.is_truthy());
                }
                Err(self.order_error(t, a, b))
            }
        }
    }

    /// Order metamethod: both operands must resolve to the same handler.
    fn order_tm(&mut self, a: &LuaValue, b: &LuaValue, event: Tm) -> Option<LuaValue> {
        let tm1 = self.get_tm(a, event);
        if tm1.is_nil() {
            return None;
        }
        let tm2 = self.get_tm(b, event);
        if tm1.raw_equals(&tm2) { Some(tm1) } else { None }
    }

    /// Concatenate the top `total` stack values right to left, leaving
    /// the result in the leftmost slot. Runs of strings and numbers fold
    /// into one buffer; anything else goes through __concat pairwise.
    pub(crate) fn vm_concat(&mut self, t: ThreadId, mut total: usize) -> LuaResult<()> {
        while total > 1 {
            let top = self.thread(t).top;
            let v1 = self.thread(t).stack[top - 2];
            let v2 = self.thread(t).stack[top - 1];
            let n;
            if self.concat_coercible(&v1) && self.concat_coercible(&v2) {
                let mut run = 2;
                while run < total && self.concat_coercible(&self.thread(t).stack[top - run - 1]) {
                    run += 1;
                }
                let mut buf = String::new();
                for j in 0..run {
                    let v = self.thread(t).stack[top - run + j];
                    match v {
                        LuaValue::String(id) => buf.push_str(self.str_of(id)),
                        LuaValue::Number(x) => buf.push_str(&number_to_display(x)),
                        _ => unreachable!("run holds only strings and numbers"),
                    }
                }
                self.check_gc();
                let s = self.new_string(&buf);
                let top = self.thread(t).top;
                self.thread_mut(t).stack[top - run] = s;
                n = run;
            } else {
                let mut tm = self.get_tm(&v1, Tm::Concat);
                if tm.is_nil() {
                    tm = self.get_tm(&v2, Tm::Concat);
                }
                if tm.is_nil() {
                    let culprit = if self.concat_coercible(&v1) { v2 } else { v1 };
                    return Err(self.type_error(t, "concatenate", &culprit));
                }
                let r = self.call_tm_res(t, tm, v1, v2)?;
                let top = self.thread(t).top;
                self.thread_mut(t).stack[top - 2] = r;
                n = 2;
            }
            total -= n - 1;
            let top = self.thread(t).top;
            self.thread_mut(t).top = top - (n - 1);
        }
        Ok(())
    }

    fn concat_coercible(&self, v: &LuaValue) -> bool {
        matches!(v, LuaValue::String(_) | LuaValue::Number(_))
    }
}
