// Standard library surface, driven through real calls.

use crate::lua_value::LuaValue;
use crate::lua_vm::LuaVM;
use crate::stdlib::Stdlib;

fn vm_with_libs() -> Box<LuaVM> {
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    vm
}

fn global_fn(vm: &mut LuaVM, name: &str) -> LuaValue {
    let v = vm.get_global(name);
    assert!(v.as_closure_id().is_some(), "global '{}' missing", name);
    v
}

fn lib_fn(vm: &mut LuaVM, lib: &str, name: &str) -> LuaValue {
    let l = vm.get_global(lib).as_table_id().expect("library table");
    let k = vm.new_string(name);
    let v = vm.table_raw_get(l, &k);
    assert!(v.as_closure_id().is_some(), "{}.{} missing", lib, name);
    v
}

fn call1(vm: &mut LuaVM, f: LuaValue, args: &[LuaValue]) -> LuaValue {
    let out = vm.call_function(f, args).unwrap();
    out.first().copied().unwrap_or(LuaValue::Nil)
}

#[test]
fn tostring_and_tonumber() {
    let mut vm = vm_with_libs();
    let tostring = global_fn(&mut vm, "tostring");
    let tonumber = global_fn(&mut vm, "tonumber");

    let s = call1(&mut vm, tostring, &[LuaValue::Number(42.0)]);
    assert_eq!(vm.get_str(&s), Some("42"));
    let s = call1(&mut vm, tostring, &[LuaValue::Boolean(true)]);
    assert_eq!(vm.get_str(&s), Some("true"));
    let s = call1(&mut vm, tostring, &[LuaValue::Nil]);
    assert_eq!(vm.get_str(&s), Some("nil"));

    let arg = vm.new_string("0x10");
    let n = call1(&mut vm, tonumber, &[arg]);
    assert_eq!(n, LuaValue::Number(16.0));
    let arg = vm.new_string("junk");
    let n = call1(&mut vm, tonumber, &[arg]);
    assert!(n.is_nil());
    let arg = vm.new_string("ff");
    let sixteen = LuaValue::Number(16.0);
    let n = call1(&mut vm, tonumber, &[arg, sixteen]);
    assert_eq!(n, LuaValue::Number(255.0));
}

#[test]
fn tonumber_tostring_round_trip() {
    let mut vm = vm_with_libs();
    let tostring = global_fn(&mut vm, "tostring");
    let tonumber = global_fn(&mut vm, "tonumber");
    for n in [0.0, -1.5, 1e10, 0.1, 123456.75] {
        let s = call1(&mut vm, tostring, &[LuaValue::Number(n)]);
        let back = call1(&mut vm, tonumber, &[s]);
        assert_eq!(back, LuaValue::Number(n));
    }
}

#[test]
fn select_counts_and_slices() {
    let mut vm = vm_with_libs();
    let select = global_fn(&mut vm, "select");
    let hash = vm.new_string("#");
    let n = call1(
        &mut vm,
        select,
        &[hash, LuaValue::Number(9.0), LuaValue::Nil, LuaValue::Number(7.0)],
    );
    assert_eq!(n, LuaValue::Number(3.0));
    let out = vm
        .call_function(
            select,
            &[
                LuaValue::Number(2.0),
                LuaValue::Number(10.0),
                LuaValue::Number(20.0),
                LuaValue::Number(30.0),
            ],
        )
        .unwrap();
    assert_eq!(out, vec![LuaValue::Number(20.0), LuaValue::Number(30.0)]);
}

#[test]
fn unpack_spreads_a_sequence() {
    let mut vm = vm_with_libs();
    let t = vm.main_thread();
    let unpack = global_fn(&mut vm, "unpack");
    let table = vm.create_table(3, 0);
    let tid = table.as_table_id().unwrap();
    for i in 1..=3 {
        vm.table_raw_set_int(t, tid, i, LuaValue::Number(i as f64 * 11.0))
            .unwrap();
    }
    let out = vm.call_function(unpack, &[table]).unwrap();
    assert_eq!(
        out,
        vec![
            LuaValue::Number(11.0),
            LuaValue::Number(22.0),
            LuaValue::Number(33.0)
        ]
    );
}

#[test]
fn setmetatable_and_getmetatable_pair_up() {
    let mut vm = vm_with_libs();
    let setmetatable = global_fn(&mut vm, "setmetatable");
    let getmetatable = global_fn(&mut vm, "getmetatable");
    let target = vm.create_table(0, 0);
    let mt = vm.create_table(0, 0);
    let back = call1(&mut vm, setmetatable, &[target, mt]);
    assert_eq!(back, target);
    let got = call1(&mut vm, getmetatable, &[target]);
    assert_eq!(got, mt);
}

#[test]
fn protected_metatables_resist_change() {
    let mut vm = vm_with_libs();
    let t = vm.main_thread();
    let setmetatable = global_fn(&mut vm, "setmetatable");
    let target = vm.create_table(0, 0);
    let mt = vm.create_table(0, 1);
    let mt_id = mt.as_table_id().unwrap();
    let key = vm.new_string("__metatable");
    let shield = vm.new_string("locked");
    vm.table_raw_set(t, mt_id, key, shield).unwrap();
    call1(&mut vm, setmetatable, &[target, mt]);
    let other = vm.create_table(0, 0);
    let err = vm.pcall_function(setmetatable, &[target, other]).unwrap_err();
    assert!(vm.get_str(&err.1).unwrap().contains("protected metatable"));
}

#[test]
fn math_basics() {
    let mut vm = vm_with_libs();
    let abs = lib_fn(&mut vm, "math", "abs");
    let floor = lib_fn(&mut vm, "math", "floor");
    let maxf = lib_fn(&mut vm, "math", "max");
    assert_eq!(
        call1(&mut vm, abs, &[LuaValue::Number(-3.5)]),
        LuaValue::Number(3.5)
    );
    assert_eq!(
        call1(&mut vm, floor, &[LuaValue::Number(2.9)]),
        LuaValue::Number(2.0)
    );
    assert_eq!(
        call1(
            &mut vm,
            maxf,
            &[
                LuaValue::Number(1.0),
                LuaValue::Number(9.0),
                LuaValue::Number(4.0)
            ]
        ),
        LuaValue::Number(9.0)
    );
    let pi = {
        let m = vm.get_global("math").as_table_id().unwrap();
        let k = vm.new_string("pi");
        vm.table_raw_get(m, &k)
    };
    assert_eq!(pi, LuaValue::Number(std::f64::consts::PI));
}

#[test]
fn math_random_respects_ranges() {
    let mut vm = vm_with_libs();
    let random = lib_fn(&mut vm, "math", "random");
    let randomseed = lib_fn(&mut vm, "math", "randomseed");
    call1(&mut vm, randomseed, &[LuaValue::Number(42.0)]);
    for _ in 0..100 {
        let x = call1(&mut vm, random, &[]).as_number().unwrap();
        assert!((0.0..1.0).contains(&x));
        let d = call1(&mut vm, random, &[LuaValue::Number(6.0)])
            .as_number()
            .unwrap();
        assert!((1.0..=6.0).contains(&d));
        assert_eq!(d, d.trunc());
    }
}

#[test]
fn string_basics() {
    let mut vm = vm_with_libs();
    let sub = lib_fn(&mut vm, "string", "sub");
    let rep = lib_fn(&mut vm, "string", "rep");
    let upper = lib_fn(&mut vm, "string", "upper");
    let byte = lib_fn(&mut vm, "string", "byte");
    let charf = lib_fn(&mut vm, "string", "char");

    let s = vm.new_string("hello world");
    let out = call1(
        &mut vm,
        sub,
        &[s, LuaValue::Number(1.0), LuaValue::Number(5.0)],
    );
    assert_eq!(vm.get_str(&out), Some("hello"));
    let out = call1(&mut vm, sub, &[s, LuaValue::Number(-5.0)]);
    assert_eq!(vm.get_str(&out), Some("world"));

    let ab = vm.new_string("ab");
    let out = call1(&mut vm, rep, &[ab, LuaValue::Number(3.0)]);
    assert_eq!(vm.get_str(&out), Some("ababab"));

    let mixed = vm.new_string("MiXeD");
    let out = call1(&mut vm, upper, &[mixed]);
    assert_eq!(vm.get_str(&out), Some("MIXED"));

    let a = vm.new_string("A");
    let out = call1(&mut vm, byte, &[a]);
    assert_eq!(out, LuaValue::Number(65.0));
    let out = call1(
        &mut vm,
        charf,
        &[LuaValue::Number(76.0), LuaValue::Number(117.0), LuaValue::Number(97.0)],
    );
    assert_eq!(vm.get_str(&out), Some("Lua"));
}

#[test]
fn string_format_core_conversions() {
    let mut vm = vm_with_libs();
    let format = lib_fn(&mut vm, "string", "format");
    let f = vm.new_string("%d + %d = %d");
    let out = call1(
        &mut vm,
        format,
        &[
            f,
            LuaValue::Number(2.0),
            LuaValue::Number(3.0),
            LuaValue::Number(5.0),
        ],
    );
    assert_eq!(vm.get_str(&out), Some("2 + 3 = 5"));

    let f = vm.new_string("[%5d] [%-5d] [%05d]");
    let out = call1(
        &mut vm,
        format,
        &[f, LuaValue::Number(42.0), LuaValue::Number(42.0), LuaValue::Number(42.0)],
    );
    assert_eq!(vm.get_str(&out), Some("[   42] [42   ] [00042]"));

    let f = vm.new_string("%s=%x");
    let name = vm.new_string("addr");
    let out = call1(&mut vm, format, &[f, name, LuaValue::Number(255.0)]);
    assert_eq!(vm.get_str(&out), Some("addr=ff"));

    let f = vm.new_string("%.2f");
    let out = call1(&mut vm, format, &[f, LuaValue::Number(1.005)]);
    assert_eq!(vm.get_str(&out), Some("1.00"));

    let f = vm.new_string("%q");
    let tricky = vm.new_string("say \"hi\"\n");
    let out = call1(&mut vm, format, &[f, tricky]);
    assert_eq!(vm.get_str(&out), Some("\"say \\\"hi\\\"\\n\""));
}

#[test]
fn table_insert_remove_concat() {
    let mut vm = vm_with_libs();
    let t = vm.main_thread();
    let insert = lib_fn(&mut vm, "table", "insert");
    let remove = lib_fn(&mut vm, "table", "remove");
    let concat = lib_fn(&mut vm, "table", "concat");

    let list = vm.create_table(4, 0);
    let lid = list.as_table_id().unwrap();
    for word in ["a", "c"] {
        let w = vm.new_string(word);
        vm.call_function(insert, &[list, w]).unwrap();
    }
    // Insert "b" at position 2, shifting "c" up.
    let b = vm.new_string("b");
    vm.call_function(insert, &[list, LuaValue::Number(2.0), b])
        .unwrap();
    assert_eq!(vm.table_length(lid), 3);
    let sep = vm.new_string("-");
    let joined = call1(&mut vm, concat, &[list, sep]);
    assert_eq!(vm.get_str(&joined), Some("a-b-c"));

    let popped = call1(&mut vm, remove, &[list, LuaValue::Number(1.0)]);
    assert_eq!(vm.get_str(&popped), Some("a"));
    assert_eq!(vm.table_length(lid), 2);
    let _ = t;
}

#[test]
fn table_sort_with_and_without_comparator() {
    let mut vm = vm_with_libs();
    let t = vm.main_thread();
    let sort = lib_fn(&mut vm, "table", "sort");
    let list = vm.create_table(6, 0);
    let lid = list.as_table_id().unwrap();
    for (i, n) in [5.0, 1.0, 4.0, 2.0, 3.0].iter().enumerate() {
        vm.table_raw_set_int(t, lid, i as i64 + 1, LuaValue::Number(*n))
            .unwrap();
    }
    vm.call_function(sort, &[list]).unwrap();
    for i in 1..=5 {
        assert_eq!(vm.table_raw_get_int(lid, i), LuaValue::Number(i as f64));
    }
}

#[test]
fn pairs_iterates_all_entries() {
    let mut vm = vm_with_libs();
    let t = vm.main_thread();
    let next = global_fn(&mut vm, "next");
    let table = vm.create_table(0, 4);
    let tid = table.as_table_id().unwrap();
    for i in 1..=5 {
        vm.table_raw_set_int(t, tid, i, LuaValue::Number(i as f64))
            .unwrap();
    }
    let skey = vm.new_string("extra");
    vm.table_raw_set(t, tid, skey, LuaValue::Boolean(true))
        .unwrap();

    let mut seen = 0;
    let mut key = LuaValue::Nil;
    loop {
        let out = vm.call_function(next, &[table, key]).unwrap();
        if out[0].is_nil() {
            break;
        }
        key = out[0];
        seen += 1;
        assert!(seen <= 6, "next looped past the table");
    }
    assert_eq!(seen, 6);
}

#[test]
fn os_time_and_clock_advance() {
    let mut vm = vm_with_libs();
    let time = lib_fn(&mut vm, "os", "time");
    let clock = lib_fn(&mut vm, "os", "clock");
    let stamp = call1(&mut vm, time, &[]).as_number().unwrap();
    assert!(stamp > 1_000_000_000.0);
    let c0 = call1(&mut vm, clock, &[]).as_number().unwrap();
    assert!(c0 >= 0.0);
}
