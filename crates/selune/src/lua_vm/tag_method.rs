// Tag-method (metamethod) events.
//
// The event names are interned once at VM startup and pinned, so lookup
// is a raw hash probe with a precomputed id. Events up to `Eq` get an
// absence bit in the table's `flags` byte: a miss is recorded and later
// probes for the same event skip the hash part entirely until the
// metatable is replaced.

use crate::gc::TableId;
use crate::lua_value::{LuaValue, LuaValueKind};
use crate::lua_vm::LuaVM;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tm {
    Index = 0,
    NewIndex,
    Gc,
    Mode,
    Eq, // last event with an absence cache bit
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Len,
    Lt,
    Le,
    Concat,
    Call,
}

pub const TM_N: usize = 17;

pub const TM_NAMES: [&str; TM_N] = [
    "__index",
    "__newindex",
    "__gc",
    "__mode",
    "__eq",
    "__add",
    "__sub",
    "__mul",
    "__div",
    "__mod",
    "__pow",
    "__unm",
    "__len",
    "__lt",
    "__le",
    "__concat",
    "__call",
];

impl Tm {
    #[inline(always)]
    pub fn has_fast_cache(self) -> bool {
        (self as u8) <= (Tm::Eq as u8)
    }

    pub fn name(self) -> &'static str {
        TM_NAMES[self as usize]
    }
}

impl LuaVM {
    /// Metatable of any value: tables and userdata carry their own, the
    /// other types share a per-type default.
    pub fn metatable_of(&self, v: &LuaValue) -> Option<TableId> {
        match v {
            LuaValue::Table(id) => self.pool.table(*id).data.metatable(),
            LuaValue::Userdata(id) => self.pool.userdata_ref(*id).data.metatable,
            _ => self.type_mts[v.kind() as usize],
        }
    }

    /// Raw probe of a metatable for an event, maintaining the absence
    /// cache for the fast events.
    pub(crate) fn get_tm_from(&mut self, mt: TableId, event: Tm) -> LuaValue {
        if event.has_fast_cache() && self.pool.table(mt).data.flags & (1 << event as u8) != 0 {
            return LuaValue::Nil;
        }
        let name = self.consts.tm_name_value(event);
        let hash = self.key_hash(&name);
        let res = self.pool.table(mt).data.raw_get(&name, hash);
        if res.is_nil() && event.has_fast_cache() {
            self.pool.table_mut(mt).data.flags |= 1 << event as u8;
        }
        res
    }

    /// Tag method of a value for an event, or nil.
    pub(crate) fn get_tm(&mut self, v: &LuaValue, event: Tm) -> LuaValue {
        match self.metatable_of(v) {
            Some(mt) => self.get_tm_from(mt, event),
            None => LuaValue::Nil,
        }
    }

    /// Shared handler for equality: same basic type, and per the reference
    /// behavior of this runtime, the same metatable on both operands.
    pub(crate) fn get_eq_tm(&mut self, a: &LuaValue, b: &LuaValue) -> Option<LuaValue> {
        if a.kind() != b.kind() {
            return None;
        }
        if !matches!(a.kind(), LuaValueKind::Table | LuaValueKind::Userdata) {
            return None;
        }
        let mt_a = self.metatable_of(a)?;
        let mt_b = self.metatable_of(b)?;
        if mt_a != mt_b {
            return None;
        }
        let tm = self.get_tm_from(mt_a, Tm::Eq);
        if tm.is_nil() { None } else { Some(tm) }
    }
}
