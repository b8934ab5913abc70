// Table library: insert, remove, concat, getn, maxn, sort.

use crate::gc::{TableId, ThreadId};
use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaValue, LuaValueKind, number_to_display};
use crate::lua_vm::{LuaResult, LuaVM};

pub fn create_table_lib() -> LibraryModule {
    crate::lib_module!("table", {
        "insert" => table_insert,
        "remove" => table_remove,
        "concat" => table_concat,
        "getn" => table_getn,
        "maxn" => table_maxn,
        "sort" => table_sort,
    })
}

fn table_insert(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let tid = vm.check_arg_table(t, 1, "insert")?;
    let n = vm.table_length(tid) as i64;
    match vm.arg_count(t) {
        2 => {
            let v = vm.arg_or_nil(t, 2);
            vm.table_raw_set_int(t, tid, n + 1, v)?;
        }
        3 => {
            let pos = vm.check_arg_number(t, 2, "insert")? as i64;
            let v = vm.arg_or_nil(t, 3);
            let mut i = n;
            while i >= pos {
                let moved = vm.table_raw_get_int(tid, i);
                vm.table_raw_set_int(t, tid, i + 1, moved)?;
                i -= 1;
            }
            vm.table_raw_set_int(t, tid, pos, v)?;
        }
        _ => {
            return Err(vm.throw_runtime(t, "wrong number of arguments to 'insert'".to_string()));
        }
    }
    Ok(0)
}

fn table_remove(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let tid = vm.check_arg_table(t, 1, "remove")?;
    let n = vm.table_length(tid) as i64;
    let pos = match vm.arg(t, 2) {
        Some(v) if !v.is_nil() => vm.check_arg_number(t, 2, "remove")? as i64,
        _ => n,
    };
    if n == 0 {
        vm.push_nil(t)?;
        return Ok(1);
    }
    let removed = vm.table_raw_get_int(tid, pos);
    let mut i = pos;
    while i < n {
        let moved = vm.table_raw_get_int(tid, i + 1);
        vm.table_raw_set_int(t, tid, i, moved)?;
        i += 1;
    }
    vm.table_raw_set_int(t, tid, n, LuaValue::Nil)?;
    vm.push_value(t, removed)?;
    Ok(1)
}

fn table_concat(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let tid = vm.check_arg_table(t, 1, "concat")?;
    let sep = match vm.arg(t, 2) {
        Some(v) if !v.is_nil() => vm.check_arg_string(t, 2, "concat")?,
        _ => String::new(),
    };
    let i = match vm.arg(t, 3) {
        Some(v) if !v.is_nil() => vm.check_arg_number(t, 3, "concat")? as i64,
        _ => 1,
    };
    let j = match vm.arg(t, 4) {
        Some(v) if !v.is_nil() => vm.check_arg_number(t, 4, "concat")? as i64,
        _ => vm.table_length(tid) as i64,
    };
    let mut out = String::new();
    for k in i..=j {
        let v = vm.table_raw_get_int(tid, k);
        match v {
            LuaValue::String(id) => out.push_str(vm.str_of(id)),
            LuaValue::Number(n) => out.push_str(&number_to_display(n)),
            _ => {
                return Err(vm.throw_runtime(
                    t,
                    format!(
                        "invalid value (at index {}) in table for 'concat'",
                        k
                    ),
                ));
            }
        }
        if k < j {
            out.push_str(&sep);
        }
    }
    vm.push_string(t, &out)?;
    Ok(1)
}

fn table_getn(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let tid = vm.check_arg_table(t, 1, "getn")?;
    let n = vm.table_length(tid);
    vm.push_number(t, n as f64)?;
    Ok(1)
}

fn table_maxn(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let tid = vm.check_arg_table(t, 1, "maxn")?;
    let mut max = 0.0f64;
    let entries = vm.pool_table_entries(tid);
    for (k, _) in entries {
        if let LuaValue::Number(n) = k {
            if n > max {
                max = n;
            }
        }
    }
    vm.push_number(t, max)?;
    Ok(1)
}

/// Does sorting place `a` before `b`?
fn sort_less(
    vm: &mut LuaVM,
    t: ThreadId,
    comp: &LuaValue,
    a: &LuaValue,
    b: &LuaValue,
) -> LuaResult<bool> {
    if comp.kind() == LuaValueKind::Function {
        let r = vm.call_tm_res(t, *comp, *a, *b)?;
        Ok(r.is_truthy())
    } else {
        vm.vm_less(t, a, b)
    }
}

fn table_sort(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let tid = vm.check_arg_table(t, 1, "sort")?;
    let comp = vm.arg_or_nil(t, 2);
    let n = vm.table_length(tid) as i64;
    // Insertion sort over t[1..n]; the comparator may be a Lua function
    // and can observe the table mid-sort.
    let mut i = 2;
    while i <= n {
        let v = vm.table_raw_get_int(tid, i);
        let mut j = i - 1;
        while j >= 1 {
            let u = vm.table_raw_get_int(tid, j);
            if sort_less(vm, t, &comp, &v, &u)? {
                vm.table_raw_set_int(t, tid, j + 1, u)?;
                j -= 1;
            } else {
                break;
            }
        }
        vm.table_raw_set_int(t, tid, j + 1, v)?;
        i += 1;
    }
    Ok(0)
}
