// The registry ref/unref system.
//
// References are integer registry slots starting at 1. Slot 0 heads a
// free list threaded through the freed slots themselves: unref stores
// the old head in the freed slot and the freed index at slot 0, so the
// registry needs no side table.

use crate::lua_value::LuaValue;
use crate::lua_vm::LuaVM;

/// Reference handed out for nil (nothing stored).
pub const REF_NIL: i32 = -1;
/// Never a valid reference.
pub const NO_REF: i32 = -2;

const FREELIST_HEAD: i64 = 0;

impl LuaVM {
    /// Pin a value in the registry; the returned slot keeps it alive
    /// until `registry_unref`.
    pub fn registry_ref(&mut self, v: LuaValue) -> i32 {
        if v.is_nil() {
            return REF_NIL;
        }
        let t = self.current_thread;
        let r = self.registry;
        let head = self.table_raw_get_int(r, FREELIST_HEAD);
        let slot = match head.as_number() {
            Some(n) if n > 0.0 => {
                let slot = n as i64;
                let next = self.table_raw_get_int(r, slot);
                let next = next.as_number().unwrap_or(0.0);
                self.table_raw_set_int(t, r, FREELIST_HEAD, LuaValue::Number(next))
                    .expect("integer registry key");
                slot
            }
            _ => self.table_length(r) as i64 + 1,
        };
        self.table_raw_set_int(t, r, slot, v)
            .expect("integer registry key");
        slot as i32
    }

    /// Release a reference, putting its slot on the free list.
    pub fn registry_unref(&mut self, r_id: i32) {
        if r_id <= 0 {
            return;
        }
        let t = self.current_thread;
        let r = self.registry;
        let head = self.table_raw_get_int(r, FREELIST_HEAD);
        let head = LuaValue::Number(head.as_number().unwrap_or(0.0));
        self.table_raw_set_int(t, r, r_id as i64, head)
            .expect("integer registry key");
        self.table_raw_set_int(t, r, FREELIST_HEAD, LuaValue::Number(r_id as f64))
            .expect("integer registry key");
    }

    pub fn registry_get_ref(&self, r_id: i32) -> LuaValue {
        if r_id == REF_NIL {
            return LuaValue::Nil;
        }
        if r_id <= 0 {
            return LuaValue::Nil;
        }
        self.table_raw_get_int(self.registry, r_id as i64)
    }
}
