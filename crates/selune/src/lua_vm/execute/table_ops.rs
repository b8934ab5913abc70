// Indexing with metamethods: the __index / __newindex chains.

use crate::gc::ThreadId;
use crate::lua_value::{LuaValue, LuaValueKind};
use crate::lua_vm::tag_method::Tm;
use crate::lua_vm::{LuaResult, LuaVM};

/// Bound on __index/__newindex indirection, against metatable cycles.
pub const MAX_TAG_LOOP: usize = 100;

impl LuaVM {
    pub(crate) fn vm_gettable(
        &mut self,
        t: ThreadId,
        obj: &LuaValue,
        key: &LuaValue,
    ) -> LuaResult<LuaValue> {
        let mut cur = *obj;
        for _ in 0..MAX_TAG_LOOP {
            let tm = if let Some(tid) = cur.as_table_id() {
                let v = self.table_raw_get(tid, key);
                if !v.is_nil() {
                    return Ok(v);
                }
                let tm = match self.pool.table(tid).data.metatable() {
                    Some(mt) => self.get_tm_from(mt, Tm::Index),
                    None => LuaValue::Nil,
                };
                if tm.is_nil() {
                    return Ok(LuaValue::Nil);
                }
                tm
            } else {
                let tm = self.get_tm(&cur, Tm::Index);
                if tm.is_nil() {
                    return Err(self.type_error(t, "index", &cur));
                }
                tm
            };
            if tm.kind() == LuaValueKind::Function {
                return self.call_tm_res(t, tm, cur, *key);
            }
            cur = tm;
        }
        Err(self.throw_runtime(t, "loop in gettable".to_string()))
    }

    pub(crate) fn vm_settable(
        &mut self,
        t: ThreadId,
        obj: &LuaValue,
        key: LuaValue,
        value: LuaValue,
    ) -> LuaResult<()> {
        let mut cur = *obj;
        for _ in 0..MAX_TAG_LOOP {
            let tm = if let Some(tid) = cur.as_table_id() {
                let existing = self.table_raw_get(tid, &key);
                if !existing.is_nil() {
                    return self.table_raw_set(t, tid, key, value);
                }
                let tm = match self.pool.table(tid).data.metatable() {
                    Some(mt) => self.get_tm_from(mt, Tm::NewIndex),
                    None => LuaValue::Nil,
                };
                if tm.is_nil() {
                    return self.table_raw_set(t, tid, key, value);
                }
                tm
            } else {
                let tm = self.get_tm(&cur, Tm::NewIndex);
                if tm.is_nil() {
                    return Err(self.type_error(t, "index", &cur));
                }
                tm
            };
            if tm.kind() == LuaValueKind::Function {
                return self.call_tm_set(t, tm, cur, key, value);
            }
            cur = tm;
        }
        Err(self.throw_runtime(t, "loop in settable".to_string()))
    }

    /// `#v` with the table/string primitives first, then __len.
    pub(crate) fn vm_length(&mut self, t: ThreadId, v: &LuaValue) -> LuaResult<LuaValue> {
        match v {
            LuaValue::String(id) => Ok(LuaValue::Number(self.pool.string(*id).data.len() as f64)),
            LuaValue::Table(tid) => Ok(LuaValue::Number(self.table_length(*tid) as f64)),
            _ => {
                let tm = self.get_tm(v, Tm::Len);
                if tm.is_nil() {
                    Err(self.type_error(t, "get length of", v))
                } else {
                    self.call_tm_res(t, tm, *v, LuaValue::Nil)
                }
            }
        }
    }
}
