// Frame introspection and hook installation.

use crate::gc::ThreadId;
use crate::lua_value::{LuaValue, Proto};
use crate::lua_vm::{LuaVM, short_source, verifier};

#[derive(Debug, Clone)]
pub struct DebugInfo {
    /// Best-effort name of the function, from the caller's bytecode.
    pub name: Option<String>,
    pub name_what: &'static str,
    /// "Lua", "C" or "main".
    pub what: &'static str,
    pub source: String,
    pub short_src: String,
    pub currentline: i32,
    pub linedefined: i32,
    pub lastlinedefined: i32,
    pub nups: u8,
    /// The frame was reached through at least one merged tail call.
    pub is_tail: bool,
    pub tailcalls: u32,
    pub func: LuaValue,
}

impl LuaVM {
    /// Number of active frames on a thread.
    pub fn stack_depth(&self, t: ThreadId) -> usize {
        self.thread(t).ci.len()
    }

    /// Inspect the frame `level` calls below the top (level 0 is the
    /// running function).
    pub fn get_info(&self, t: ThreadId, level: usize) -> Option<DebugInfo> {
        let th = self.thread(t);
        if level >= th.ci.len() {
            return None;
        }
        let idx = th.ci.len() - 1 - level;
        let ci = &th.ci[idx];
        let func = th.stack[ci.func];
        let mut info = DebugInfo {
            name: None,
            name_what: "",
            what: "C",
            source: "=[C]".to_string(),
            short_src: "[C]".to_string(),
            currentline: -1,
            linedefined: -1,
            lastlinedefined: -1,
            nups: 0,
            is_tail: ci.is_tail(),
            tailcalls: ci.tailcalls,
            func,
        };
        if let Some(cl_id) = func.as_closure_id() {
            let cl = &self.pool.closure(cl_id).data;
            match cl {
                crate::lua_value::Closure::Lua(lc) => {
                    let proto = &lc.proto;
                    info.nups = proto.nups;
                    info.source = proto.source.clone();
                    info.short_src = short_source(&proto.source);
                    info.linedefined = proto.linedefined as i32;
                    info.lastlinedefined = proto.lastlinedefined as i32;
                    info.what = if proto.linedefined == 0 { "main" } else { "Lua" };
                    if ci.is_lua() {
                        info.currentline =
                            proto.line_at(ci.saved_pc.saturating_sub(1)) as i32;
                    }
                }
                crate::lua_value::Closure::C(cc) => {
                    info.nups = cc.upvalues.len() as u8;
                }
            }
        }
        // Name the function from the caller's call site.
        if idx > 0 {
            let caller = &th.ci[idx - 1];
            if caller.is_lua() && !ci.is_tail() {
                if let Some(cl_id) = th.stack[caller.func].as_closure_id() {
                    if let Some(lc) = self.pool.closure(cl_id).data.as_lua() {
                        let reg = ci.func - caller.base;
                        if let Some((what, name)) = verifier::register_origin(
                            &lc.proto,
                            caller.saved_pc,
                            reg,
                            |v| self.get_str(v).map(|s| s.to_string()),
                        ) {
                            info.name_what = what;
                            info.name = Some(name);
                        } else if let Some(local) =
                            verifier::local_name(&lc.proto, caller.saved_pc, reg)
                        {
                            info.name_what = "local";
                            info.name = Some(local.to_string());
                        }
                    }
                }
            }
        }
        Some(info)
    }

    /// Current source line of a frame, or -1 for host frames.
    pub fn current_line(&self, t: ThreadId, level: usize) -> i32 {
        self.get_info(t, level).map(|i| i.currentline).unwrap_or(-1)
    }

    /// Lines that carry code in a function, for breakpoint validity.
    pub fn valid_lines(&self, func: &LuaValue) -> Option<Vec<u32>> {
        let cl_id = func.as_closure_id()?;
        let lc = self.pool.closure(cl_id).data.as_lua()?;
        let mut lines: Vec<u32> = lc.proto.lineinfo.clone();
        lines.sort_unstable();
        lines.dedup();
        Some(lines)
    }

    /// Install (or clear, with a nil function) the hook for a thread.
    /// The mask combines MASK_CALL/MASK_RET/MASK_LINE/MASK_COUNT.
    pub fn set_hook(&mut self, t: ThreadId, func: LuaValue, mask: u8, count: u32) {
        let hook = &mut self.thread_mut(t).hook;
        if func.is_nil() {
            hook.func = LuaValue::Nil;
            hook.mask = 0;
            hook.count = 0;
            hook.basecount = 0;
        } else {
            hook.func = func;
            hook.mask = mask;
            hook.basecount = count;
            hook.count = count.max(1);
        }
    }

    pub fn get_hook(&self, t: ThreadId) -> (LuaValue, u8, u32) {
        let hook = &self.thread(t).hook;
        (hook.func, hook.mask, hook.basecount)
    }

    /// Local variable name in a frame, by 1-based index, with its value.
    pub fn get_local(&self, t: ThreadId, level: usize, n: usize) -> Option<(String, LuaValue)> {
        let th = self.thread(t);
        if level >= th.ci.len() || n == 0 {
            return None;
        }
        let idx = th.ci.len() - 1 - level;
        let ci = &th.ci[idx];
        if !ci.is_lua() {
            return None;
        }
        let cl_id = th.stack[ci.func].as_closure_id()?;
        let lc = self.pool.closure(cl_id).data.as_lua()?;
        let proto: &Proto = &lc.proto;
        let pc = ci.saved_pc.saturating_sub(1);
        let mut seen = 0;
        for lv in &proto.locvars {
            if (lv.start_pc as usize) <= pc && pc < lv.end_pc as usize {
                seen += 1;
                if seen == n {
                    let v = th.stack[ci.base + seen - 1];
                    return Some((lv.name.clone(), v));
                }
            }
        }
        None
    }
}
