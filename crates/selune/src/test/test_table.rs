// Table semantics through the VM layer: assignment/readback, lengths,
// key normalization and rejection.

use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaVM};

fn table(vm: &mut LuaVM) -> crate::gc::TableId {
    vm.create_table(0, 0).as_table_id().unwrap()
}

#[test]
fn assignment_then_query_returns_the_value() {
    let mut vm = LuaVM::new();
    let t = vm.main_thread();
    let tid = table(&mut vm);
    let key = vm.new_string("alpha");
    vm.table_raw_set(t, tid, key, LuaValue::Number(7.0)).unwrap();
    assert_eq!(vm.table_raw_get(tid, &key), LuaValue::Number(7.0));
    // Overwrite with nil makes it absent again.
    vm.table_raw_set(t, tid, key, LuaValue::Nil).unwrap();
    assert!(vm.table_raw_get(tid, &key).is_nil());
}

#[test]
fn mixed_keys_coexist() {
    let mut vm = LuaVM::new();
    let t = vm.main_thread();
    let tid = table(&mut vm);
    for i in 1..=100 {
        vm.table_raw_set_int(t, tid, i, LuaValue::Number(i as f64 * 2.0))
            .unwrap();
    }
    let sk = vm.new_string("name");
    vm.table_raw_set(t, tid, sk, LuaValue::Boolean(true)).unwrap();
    vm.table_raw_set(t, tid, LuaValue::Number(0.5), LuaValue::Number(99.0))
        .unwrap();
    for i in 1..=100 {
        assert_eq!(
            vm.table_raw_get_int(tid, i),
            LuaValue::Number(i as f64 * 2.0)
        );
    }
    assert_eq!(vm.table_raw_get(tid, &sk), LuaValue::Boolean(true));
    assert_eq!(
        vm.table_raw_get(tid, &LuaValue::Number(0.5)),
        LuaValue::Number(99.0)
    );
}

#[test]
fn length_of_dense_prefix() {
    let mut vm = LuaVM::new();
    let t = vm.main_thread();
    let tid = table(&mut vm);
    assert_eq!(vm.table_length(tid), 0);
    for i in 1..=37 {
        vm.table_raw_set_int(t, tid, i, LuaValue::Number(1.0)).unwrap();
    }
    assert_eq!(vm.table_length(tid), 37);
    vm.table_raw_set_int(t, tid, 37, LuaValue::Nil).unwrap();
    let n = vm.table_length(tid);
    // With a hole the result is some boundary: t[n] ~= nil, t[n+1] == nil.
    assert!(!vm.table_raw_get_int(tid, n as i64).is_nil() || n == 0);
    assert!(vm.table_raw_get_int(tid, n as i64 + 1).is_nil());
}

#[test]
fn nil_key_is_rejected() {
    let mut vm = LuaVM::new();
    let t = vm.main_thread();
    let tid = table(&mut vm);
    let err = vm
        .table_raw_set(t, tid, LuaValue::Nil, LuaValue::Number(1.0))
        .unwrap_err();
    assert_eq!(err, LuaError::Runtime);
    assert!(vm.error_message().contains("table index is nil"));
}

#[test]
fn nan_key_is_rejected_but_reads_miss() {
    let mut vm = LuaVM::new();
    let t = vm.main_thread();
    let tid = table(&mut vm);
    let err = vm
        .table_raw_set(t, tid, LuaValue::Number(f64::NAN), LuaValue::Number(1.0))
        .unwrap_err();
    assert_eq!(err, LuaError::Runtime);
    assert!(vm.error_message().contains("table index is NaN"));
    assert!(vm.table_raw_get(tid, &LuaValue::Number(f64::NAN)).is_nil());
}

#[test]
fn zero_keys_share_one_slot() {
    let mut vm = LuaVM::new();
    let t = vm.main_thread();
    let tid = table(&mut vm);
    vm.table_raw_set(t, tid, LuaValue::Number(0.0), LuaValue::Number(1.0))
        .unwrap();
    vm.table_raw_set(t, tid, LuaValue::Number(-0.0), LuaValue::Number(2.0))
        .unwrap();
    assert_eq!(
        vm.table_raw_get(tid, &LuaValue::Number(0.0)),
        LuaValue::Number(2.0)
    );
}

#[test]
fn large_sparse_tables() {
    let mut vm = LuaVM::new();
    let t = vm.main_thread();
    let tid = table(&mut vm);
    for i in 0..200 {
        let k = (i * 1001) as i64;
        vm.table_raw_set_int(t, tid, k, LuaValue::Number(i as f64))
            .unwrap();
    }
    for i in 0..200 {
        let k = (i * 1001) as i64;
        assert_eq!(vm.table_raw_get_int(tid, k), LuaValue::Number(i as f64));
    }
}
