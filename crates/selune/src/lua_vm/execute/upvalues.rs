// Open-upvalue management.
//
// The first capture of a stack slot creates an Upvalue cell and inserts
// it into the thread's open list, kept sorted descending by slot so
// closing a range is one pass from the front. A second capture of the
// same slot reuses the cell, which is what makes sibling closures share
// mutable state.

use crate::gc::{GcId, ThreadId, UpvalueId};
use crate::lua_value::{LuaValue, Upvalue};
use crate::lua_vm::LuaVM;

impl LuaVM {
    pub(crate) fn find_upvalue(&mut self, t: ThreadId, level: usize) -> UpvalueId {
        let mut insert_at = None;
        {
            let list = &self.thread(t).open_upvals;
            for (pos, &id) in list.iter().enumerate() {
                match self.pool.upvalue(id).data.open_slot() {
                    Some((_, idx)) if idx == level => return id,
                    Some((_, idx)) if idx < level => {
                        insert_at = Some(pos);
                        break;
                    }
                    _ => {}
                }
            }
        }
        let id = self.create_upvalue(Upvalue::Open {
            thread: t,
            index: level,
        });
        let list = &mut self.thread_mut(t).open_upvals;
        match insert_at {
            Some(pos) => list.insert(pos, id),
            None => list.push(id),
        }
        id
    }

    /// Close every open upvalue at or above `level`: copy the stack slot
    /// into the cell and unlink it. The forward barrier covers a black
    /// cell absorbing a white value mid-cycle.
    pub(crate) fn close_upvalues(&mut self, t: ThreadId, level: usize) {
        loop {
            let Some(&first) = self.thread(t).open_upvals.first() else {
                return;
            };
            let idx = match self.pool.upvalue(first).data.open_slot() {
                Some((_, idx)) => idx,
                None => {
                    // Already closed elsewhere; just unlink.
                    self.thread_mut(t).open_upvals.remove(0);
                    continue;
                }
            };
            if idx < level {
                return;
            }
            let v = self.thread(t).stack[idx];
            self.thread_mut(t).open_upvals.remove(0);
            self.pool.upvalue_mut(first).data = Upvalue::Closed(v);
            self.gc_barrier(GcId::Upvalue(first), &v);
        }
    }

    pub(crate) fn upvalue_get(&self, id: UpvalueId) -> LuaValue {
        match &self.pool.upvalue(id).data {
            Upvalue::Closed(v) => *v,
            Upvalue::Open { thread, index } => self.thread(*thread).stack[*index],
        }
    }

    pub(crate) fn upvalue_set(&mut self, id: UpvalueId, v: LuaValue) {
        let slot = self.pool.upvalue(id).data.open_slot();
        match slot {
            Some((t, idx)) => {
                self.thread_mut(t).stack[idx] = v;
            }
            None => {
                self.pool.upvalue_mut(id).data = Upvalue::Closed(v);
                self.gc_barrier(GcId::Upvalue(id), &v);
            }
        }
    }
}
