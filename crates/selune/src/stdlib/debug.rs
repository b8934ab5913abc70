// Debug library: getinfo, sethook, gethook, traceback.

use crate::gc::ThreadId;
use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaValue, MASK_CALL, MASK_COUNT, MASK_LINE, MASK_RET};
use crate::lua_vm::{LuaResult, LuaVM};

pub fn create_debug_lib() -> LibraryModule {
    crate::lib_module!("debug", {
        "getinfo" => debug_getinfo,
        "sethook" => debug_sethook,
        "gethook" => debug_gethook,
        "traceback" => debug_traceback,
    })
}

fn debug_getinfo(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let level = match vm.arg_or_nil(t, 1).as_number() {
        Some(n) => n as usize,
        None => {
            return Err(vm.throw_runtime(
                t,
                "bad argument #1 to 'getinfo' (number expected)".to_string(),
            ));
        }
    };
    // Level is counted from the caller of getinfo, like the reference:
    // level 0 is getinfo itself.
    let info = match vm.get_info(t, level) {
        Some(info) => info,
        None => {
            vm.push_nil(t)?;
            return Ok(1);
        }
    };
    let out = vm.create_table(0, 10);
    let tid = out.as_table_id().expect("fresh table value");
    let mut set = |vm: &mut LuaVM, name: &str, v: LuaValue| -> LuaResult<()> {
        let key = vm.new_string(name);
        vm.table_raw_set(t, tid, key, v)
    };
    let source = vm.new_string(&info.source);
    set(vm, "source", source)?;
    let short = vm.new_string(&info.short_src);
    set(vm, "short_src", short)?;
    let what = vm.new_string(info.what);
    set(vm, "what", what)?;
    set(vm, "currentline", LuaValue::Number(info.currentline as f64))?;
    set(vm, "linedefined", LuaValue::Number(info.linedefined as f64))?;
    set(
        vm,
        "lastlinedefined",
        LuaValue::Number(info.lastlinedefined as f64),
    )?;
    set(vm, "nups", LuaValue::Number(info.nups as f64))?;
    set(vm, "istailcall", LuaValue::Boolean(info.is_tail))?;
    set(vm, "func", info.func)?;
    if let Some(name) = &info.name {
        let nv = vm.new_string(name);
        set(vm, "name", nv)?;
        let nw = vm.new_string(info.name_what);
        set(vm, "namewhat", nw)?;
    }
    vm.push_value(t, out)?;
    Ok(1)
}

fn mask_from_str(s: &str) -> u8 {
    let mut mask = 0;
    if s.contains('c') {
        mask |= MASK_CALL;
    }
    if s.contains('r') {
        mask |= MASK_RET;
    }
    if s.contains('l') {
        mask |= MASK_LINE;
    }
    mask
}

fn mask_to_string(mask: u8) -> String {
    let mut s = String::new();
    if mask & MASK_CALL != 0 {
        s.push('c');
    }
    if mask & MASK_RET != 0 {
        s.push('r');
    }
    if mask & MASK_LINE != 0 {
        s.push('l');
    }
    s
}

fn debug_sethook(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let func = vm.arg_or_nil(t, 1);
    if func.is_nil() {
        vm.set_hook(t, LuaValue::Nil, 0, 0);
        return Ok(0);
    }
    let mask_str = vm.check_arg_string(t, 2, "sethook").unwrap_or_default();
    let count = vm
        .arg(t, 3)
        .and_then(|v| v.as_number())
        .unwrap_or(0.0) as u32;
    let mut mask = mask_from_str(&mask_str);
    if count > 0 {
        mask |= MASK_COUNT;
    }
    vm.set_hook(t, func, mask, count);
    Ok(0)
}

fn debug_gethook(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let (func, mask, count) = vm.get_hook(t);
    if func.is_nil() {
        vm.push_nil(t)?;
        return Ok(1);
    }
    vm.push_value(t, func)?;
    let s = mask_to_string(mask);
    vm.push_string(t, &s)?;
    vm.push_number(t, count as f64)?;
    Ok(3)
}

fn debug_traceback(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let msg = match vm.arg(t, 1) {
        Some(v) if !v.is_nil() => match vm.get_str(&v) {
            Some(s) => Some(s.to_string()),
            // Non-string messages pass through untouched.
            None => {
                vm.push_value(t, v)?;
                return Ok(1);
            }
        },
        _ => None,
    };
    let mut out = String::new();
    if let Some(m) = msg {
        out.push_str(&m);
        out.push('\n');
    }
    out.push_str("stack traceback:");
    let depth = vm.stack_depth(t);
    for level in 1..depth {
        if let Some(info) = vm.get_info(t, level) {
            out.push_str("\n\t");
            out.push_str(&info.short_src);
            if info.currentline > 0 {
                out.push_str(&format!(":{}", info.currentline));
            }
            out.push_str(": in ");
            match (&info.name, info.what) {
                (Some(name), _) => out.push_str(&format!("function '{}'", name)),
                (None, "main") => out.push_str("main chunk"),
                (None, "C") => out.push('?'),
                (None, _) => out.push_str(&format!(
                    "function <{}:{}>",
                    info.short_src, info.linedefined
                )),
            }
            if info.is_tail {
                out.push_str("\n\t(tail call): ?");
            }
        }
    }
    vm.push_string(t, &out)?;
    Ok(1)
}
