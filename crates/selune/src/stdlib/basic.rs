// Basic library (_G global functions)
// print, type, tostring, tonumber, assert, error, select, next, pairs,
// ipairs, unpack, rawget, rawset, rawequal, pcall, xpcall, setmetatable,
// getmetatable, collectgarbage.

use crate::gc::ThreadId;
use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaValue, LuaValueKind, exact_int, number_to_display, str_to_number};
use crate::lua_vm::{LuaResult, LuaVM};

pub fn create_basic_lib() -> LibraryModule {
    crate::lib_module!("_G", {
        "print" => lua_print,
        "type" => lua_type,
        "tostring" => lua_tostring,
        "tonumber" => lua_tonumber,
        "assert" => lua_assert,
        "error" => lua_error,
        "select" => lua_select,
        "next" => lua_next,
        "pairs" => lua_pairs,
        "ipairs" => lua_ipairs,
        "unpack" => lua_unpack,
        "rawget" => lua_rawget,
        "rawset" => lua_rawset,
        "rawequal" => lua_rawequal,
        "pcall" => lua_pcall,
        "xpcall" => lua_xpcall,
        "setmetatable" => lua_setmetatable,
        "getmetatable" => lua_getmetatable,
        "collectgarbage" => lua_collectgarbage,
    })
    .with_value("_VERSION", |vm| vm.new_string("Lua 5.1"))
    .with_initializer(|vm| {
        let t = vm.current_thread();
        let g = LuaValue::Table(vm.globals_of(t));
        vm.set_global("_G", g);
        Ok(())
    })
}

/// `tostring` semantics: honor __tostring, then the primitive renderings.
pub fn tostring_value(vm: &mut LuaVM, t: ThreadId, v: &LuaValue) -> LuaResult<String> {
    if let Some(mt) = vm.metatable_of(v) {
        let key = vm.new_string("__tostring");
        let tm = vm.table_raw_get(mt, &key);
        if tm.kind() == LuaValueKind::Function {
            let r = vm.call_tm_res(t, tm, *v, LuaValue::Nil)?;
            return match vm.get_str(&r) {
                Some(s) => Ok(s.to_string()),
                None => Ok(display_fallback(vm, &r)),
            };
        }
    }
    Ok(display_fallback(vm, v))
}

fn display_fallback(vm: &LuaVM, v: &LuaValue) -> String {
    match v {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(true) => "true".to_string(),
        LuaValue::Boolean(false) => "false".to_string(),
        LuaValue::Number(n) => number_to_display(*n),
        LuaValue::String(_) => vm.get_str(v).unwrap_or_default().to_string(),
        LuaValue::LightUserdata(p) => format!("userdata: {:#010x}", p),
        LuaValue::Table(id) => format!("table: {:#010x}", id.0),
        LuaValue::Function(id) => format!("function: {:#010x}", id.0),
        LuaValue::Userdata(id) => format!("userdata: {:#010x}", id.0),
        LuaValue::Thread(id) => format!("thread: {:#010x}", id.0),
    }
}

fn lua_print(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let n = vm.arg_count(t);
    let mut out = String::new();
    for i in 1..=n {
        let v = vm.arg_or_nil(t, i);
        let s = tostring_value(vm, t, &v)?;
        if i > 1 {
            out.push('\t');
        }
        out.push_str(&s);
    }
    println!("{}", out);
    Ok(0)
}

fn lua_type(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let v = match vm.arg(t, 1) {
        Some(v) => v,
        None => {
            return Err(
                vm.throw_runtime(t, "bad argument #1 to 'type' (value expected)".to_string())
            );
        }
    };
    let name = vm.new_string(v.type_name());
    vm.push_value(t, name)?;
    Ok(1)
}

fn lua_tostring(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let v = vm.arg_or_nil(t, 1);
    let s = tostring_value(vm, t, &v)?;
    let sv = vm.new_string(&s);
    vm.push_value(t, sv)?;
    Ok(1)
}

fn lua_tonumber(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let v = vm.arg_or_nil(t, 1);
    let base = match vm.arg(t, 2) {
        Some(b) if !b.is_nil() => b.as_number().unwrap_or(10.0) as u32,
        _ => 10,
    };
    let result = if base == 10 {
        match &v {
            LuaValue::Number(_) => v,
            LuaValue::String(_) => match str_to_number(vm.get_str(&v).unwrap_or("")) {
                Some(n) => LuaValue::Number(n),
                None => LuaValue::Nil,
            },
            _ => LuaValue::Nil,
        }
    } else {
        if !(2..=36).contains(&base) {
            return Err(vm.throw_runtime(
                t,
                "bad argument #2 to 'tonumber' (base out of range)".to_string(),
            ));
        }
        match vm.get_str(&v) {
            Some(s) => match i64::from_str_radix(s.trim(), base) {
                Ok(i) => LuaValue::Number(i as f64),
                Err(_) => LuaValue::Nil,
            },
            None => LuaValue::Nil,
        }
    };
    vm.push_value(t, result)?;
    Ok(1)
}

fn lua_assert(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let n = vm.arg_count(t);
    let cond = vm.arg_or_nil(t, 1);
    if !cond.is_truthy() {
        let msg = vm.arg(t, 2);
        return match msg {
            Some(m) if !m.is_nil() => {
                vm.thread_mut(t).error_value = m;
                Err(crate::lua_vm::LuaError::Runtime)
            }
            _ => Err(vm.throw_runtime(t, "assertion failed!".to_string())),
        };
    }
    // All arguments pass through unchanged; they already sit on top.
    Ok(n)
}

fn lua_error(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let msg = vm.arg_or_nil(t, 1);
    let level = vm
        .arg(t, 2)
        .and_then(|v| v.as_number())
        .unwrap_or(1.0) as usize;
    // String errors at level > 0 get position information of the chosen
    // frame prepended.
    if let Some(s) = vm.get_str(&msg) {
        if level > 0 {
            let s = s.to_string();
            let located = match vm.get_info(t, level) {
                Some(info) if info.currentline >= 0 => {
                    format!("{}:{}: {}", info.short_src, info.currentline, s)
                }
                _ => s,
            };
            return Err(vm.throw_runtime_raw(t, located));
        }
    }
    vm.thread_mut(t).error_value = msg;
    Err(crate::lua_vm::LuaError::Runtime)
}

fn lua_select(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let n = vm.arg_count(t);
    let what = vm.arg_or_nil(t, 1);
    if vm.get_str(&what) == Some("#") {
        vm.push_number(t, (n - 1) as f64)?;
        return Ok(1);
    }
    let i = match what.as_number().and_then(exact_int) {
        Some(i) if i >= 1 => i as usize,
        _ => {
            return Err(vm.throw_runtime(
                t,
                "bad argument #1 to 'select' (number expected)".to_string(),
            ));
        }
    };
    if i >= n {
        return Ok(0);
    }
    // Arguments i+1.. are already the topmost n-i values.
    Ok(n - i)
}

fn lua_next(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let tid = vm.check_arg_table(t, 1, "next")?;
    let key = vm.arg_or_nil(t, 2);
    let hash = vm.key_hash(&key);
    match vm.pool_table_next(tid, &key, hash) {
        Ok(Some((k, v))) => {
            vm.push_value(t, k)?;
            vm.push_value(t, v)?;
            Ok(2)
        }
        Ok(None) => {
            vm.push_nil(t)?;
            Ok(1)
        }
        Err(_) => Err(vm.throw_runtime(t, "invalid key to 'next'".to_string())),
    }
}

fn lua_pairs(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let tv = vm.arg_or_nil(t, 1);
    vm.check_arg_table(t, 1, "pairs")?;
    let next_fn = vm.create_c_closure(lua_next, Vec::new());
    vm.push_value(t, next_fn)?;
    vm.push_value(t, tv)?;
    vm.push_nil(t)?;
    Ok(3)
}

fn ipairs_iter(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let tid = vm.check_arg_table(t, 1, "ipairs")?;
    let i = vm.arg_or_nil(t, 2).as_number().unwrap_or(0.0) as i64 + 1;
    let v = vm.table_raw_get_int(tid, i);
    if v.is_nil() {
        vm.push_nil(t)?;
        Ok(1)
    } else {
        vm.push_number(t, i as f64)?;
        vm.push_value(t, v)?;
        Ok(2)
    }
}

fn lua_ipairs(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let tv = vm.arg_or_nil(t, 1);
    vm.check_arg_table(t, 1, "ipairs")?;
    let iter = vm.create_c_closure(ipairs_iter, Vec::new());
    vm.push_value(t, iter)?;
    vm.push_value(t, tv)?;
    vm.push_number(t, 0.0)?;
    Ok(3)
}

fn lua_unpack(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let tid = vm.check_arg_table(t, 1, "unpack")?;
    let i = vm
        .arg(t, 2)
        .and_then(|v| v.as_number())
        .unwrap_or(1.0) as i64;
    let j = match vm.arg(t, 3).and_then(|v| v.as_number()) {
        Some(n) => n as i64,
        None => vm.table_length(tid) as i64,
    };
    if i > j {
        return Ok(0);
    }
    let count = (j - i + 1) as usize;
    for idx in i..=j {
        let v = vm.table_raw_get_int(tid, idx);
        vm.push_value(t, v)?;
    }
    Ok(count)
}

fn lua_rawget(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let tid = vm.check_arg_table(t, 1, "rawget")?;
    let key = vm.arg_or_nil(t, 2);
    let v = vm.table_raw_get(tid, &key);
    vm.push_value(t, v)?;
    Ok(1)
}

fn lua_rawset(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let tid = vm.check_arg_table(t, 1, "rawset")?;
    let key = vm.arg_or_nil(t, 2);
    let v = vm.arg_or_nil(t, 3);
    vm.table_raw_set(t, tid, key, v)?;
    // Returns the table itself.
    let tv = vm.arg_or_nil(t, 1);
    vm.push_value(t, tv)?;
    Ok(1)
}

fn lua_rawequal(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let a = vm.arg_or_nil(t, 1);
    let b = vm.arg_or_nil(t, 2);
    vm.push_boolean(t, a.raw_equals(&b))?;
    Ok(1)
}

fn shift_in_prefix(vm: &mut LuaVM, t: ThreadId, at: usize, prefix: LuaValue) -> LuaResult<usize> {
    // Insert `prefix` before the values at `at`..top, returning the new
    // value count from `at`.
    vm.grow_stack(t, 1)?;
    let th = vm.thread_mut(t);
    let top = th.top;
    for i in (at..top).rev() {
        th.stack[i + 1] = th.stack[i];
    }
    th.stack[at] = prefix;
    th.top = top + 1;
    Ok(th.top - at)
}

fn lua_pcall(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let nargs = vm.arg_count(t);
    if nargs == 0 {
        return Err(vm.throw_runtime(t, "bad argument #1 to 'pcall' (value expected)".to_string()));
    }
    let base = vm.thread(t).top - nargs;
    match vm.protected_call(t, base, nargs - 1, -1, None) {
        Ok(()) => shift_in_prefix(vm, t, base, LuaValue::Boolean(true)),
        Err(_) => {
            // Error object is the single value at `base`.
            shift_in_prefix(vm, t, base, LuaValue::Boolean(false))
        }
    }
}

fn lua_xpcall(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let nargs = vm.arg_count(t);
    if nargs < 2 {
        return Err(vm.throw_runtime(
            t,
            "bad argument #2 to 'xpcall' (value expected)".to_string(),
        ));
    }
    let base = vm.thread(t).top - nargs;
    let f = vm.arg_or_nil(t, 1);
    let fbase = vm.thread(t).top;
    vm.push_value(t, f)?;
    match vm.protected_call(t, fbase, 0, -1, Some(base + 1)) {
        Ok(()) => shift_in_prefix(vm, t, fbase, LuaValue::Boolean(true)),
        Err(_) => shift_in_prefix(vm, t, fbase, LuaValue::Boolean(false)),
    }
}

fn lua_setmetatable(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let tid = vm.check_arg_table(t, 1, "setmetatable")?;
    let mt = vm.arg_or_nil(t, 2);
    let mt_id = match mt {
        LuaValue::Nil => None,
        LuaValue::Table(id) => Some(id),
        _ => {
            return Err(vm.throw_runtime(
                t,
                "bad argument #2 to 'setmetatable' (nil or table expected)".to_string(),
            ));
        }
    };
    // A __metatable field protects the table from re-metatabling.
    if let Some(cur) = vm.pool_table_metatable(tid) {
        let key = vm.new_string("__metatable");
        if !vm.table_raw_get(cur, &key).is_nil() {
            return Err(vm.throw_runtime(t, "cannot change a protected metatable".to_string()));
        }
    }
    let tv = vm.arg_or_nil(t, 1);
    vm.set_metatable_of(&tv, mt_id);
    vm.push_value(t, tv)?;
    Ok(1)
}

fn lua_getmetatable(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let v = vm.arg_or_nil(t, 1);
    match vm.metatable_of(&v) {
        None => {
            vm.push_nil(t)?;
        }
        Some(mt) => {
            let key = vm.new_string("__metatable");
            let shield = vm.table_raw_get(mt, &key);
            if shield.is_nil() {
                vm.push_value(t, LuaValue::Table(mt))?;
            } else {
                vm.push_value(t, shield)?;
            }
        }
    }
    Ok(1)
}

fn lua_collectgarbage(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let opt = vm
        .arg(t, 1)
        .and_then(|v| vm.get_str(&v).map(|s| s.to_string()))
        .unwrap_or_else(|| "collect".to_string());
    let arg = vm.arg(t, 2).and_then(|v| v.as_number()).unwrap_or(0.0);
    match opt.as_str() {
        "collect" => {
            vm.gc_collect();
            vm.push_number(t, 0.0)?;
        }
        "stop" => {
            vm.gc_stop();
            vm.push_number(t, 0.0)?;
        }
        "restart" => {
            vm.gc_restart();
            vm.push_number(t, 0.0)?;
        }
        "count" => {
            vm.push_number(t, vm.gc_count_bytes() as f64 / 1024.0)?;
        }
        "step" => {
            let finished = vm.gc_step_api();
            vm.push_boolean(t, finished)?;
        }
        "setpause" => {
            let old = vm.gc_set_pause(arg as usize);
            vm.push_number(t, old as f64)?;
        }
        "setstepmul" => {
            let old = vm.gc_set_step_mul(arg as usize);
            vm.push_number(t, old as f64)?;
        }
        _ => {
            return Err(vm.throw_runtime(
                t,
                format!("bad argument #1 to 'collectgarbage' (invalid option '{}')", opt),
            ));
        }
    }
    Ok(1)
}
