// Strings the VM needs at fixed cost: tag-method event names, type and
// coroutine-status names, and the preallocated out-of-memory message
// (allocated up front so raising a memory error never allocates).
// All of them are pinned so no sweep can reclaim them.

use crate::lua_value::LuaValue;
use crate::lua_vm::tag_method::{TM_N, TM_NAMES, Tm};
use crate::lua_vm::LuaVM;

pub struct ConstStrings {
    pub tmname: [LuaValue; TM_N],

    pub str_suspended: LuaValue,
    pub str_running: LuaValue,
    pub str_normal: LuaValue,
    pub str_dead: LuaValue,

    /// "not enough memory"
    pub memerr: LuaValue,
    pub empty: LuaValue,
}

impl ConstStrings {
    pub(crate) fn unset() -> Self {
        let nil = LuaValue::Nil;
        ConstStrings {
            tmname: [nil; TM_N],
            str_suspended: nil,
            str_running: nil,
            str_normal: nil,
            str_dead: nil,
            memerr: nil,
            empty: nil,
        }
    }

    #[inline(always)]
    pub fn tm_name_value(&self, tm: Tm) -> LuaValue {
        self.tmname[tm as usize]
    }
}

impl LuaVM {
    pub(crate) fn init_const_strings(&mut self) {
        let mut cs = ConstStrings::unset();
        for (i, name) in TM_NAMES.iter().enumerate() {
            cs.tmname[i] = self.new_string_pinned(name);
        }
        cs.str_suspended = self.new_string_pinned("suspended");
        cs.str_running = self.new_string_pinned("running");
        cs.str_normal = self.new_string_pinned("normal");
        cs.str_dead = self.new_string_pinned("dead");
        cs.memerr = self.new_string_pinned("not enough memory");
        cs.empty = self.new_string_pinned("");
        self.consts = cs;
    }

    fn new_string_pinned(&mut self, s: &str) -> LuaValue {
        let v = self.new_string(s);
        if let LuaValue::String(id) = v {
            self.pool.string_mut(id).header.set_fixed();
        }
        v
    }
}
