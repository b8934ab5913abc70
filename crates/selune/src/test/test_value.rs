// Value model and string interning.

use crate::lua_value::LuaValue;
use crate::lua_vm::LuaVM;

#[test]
fn equal_content_interns_to_the_same_object() {
    let mut vm = LuaVM::new();
    let a = vm.new_string("hello world");
    let b = vm.new_string("hello world");
    let c = vm.new_string("hello worlds");
    // Content equality is handle equality.
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.raw_equals(&b));
}

#[test]
fn interning_survives_many_inserts() {
    let mut vm = LuaVM::new();
    let first = vm.new_string("key-0");
    // Push the intern table through several growth steps.
    for i in 0..2000 {
        vm.new_string(&format!("key-{}", i));
    }
    let again = vm.new_string("key-0");
    assert_eq!(first, again);
}

#[test]
fn number_equality_is_ieee() {
    let nan = LuaValue::Number(f64::NAN);
    assert!(!nan.raw_equals(&nan));
    let zero = LuaValue::Number(0.0);
    let negzero = LuaValue::Number(-0.0);
    assert!(zero.raw_equals(&negzero));
}

#[test]
fn truthiness() {
    assert!(!LuaValue::Nil.is_truthy());
    assert!(!LuaValue::Boolean(false).is_truthy());
    assert!(LuaValue::Boolean(true).is_truthy());
    assert!(LuaValue::Number(0.0).is_truthy());
}

#[test]
fn type_names() {
    let mut vm = LuaVM::new();
    assert_eq!(LuaValue::Nil.type_name(), "nil");
    assert_eq!(LuaValue::Number(1.0).type_name(), "number");
    assert_eq!(vm.new_string("x").type_name(), "string");
    assert_eq!(vm.create_table(0, 0).type_name(), "table");
    assert_eq!(vm.new_thread().type_name(), "thread");
    assert_eq!(vm.new_userdata(16).type_name(), "userdata");
}
