// Host-facing stack API, registry references, GC control surface.

use crate::lua_value::{LuaValue, LuaValueKind};
use crate::lua_vm::{GLOBALSINDEX, LuaVM, REGISTRYINDEX};

#[test]
fn push_query_and_convert() {
    let mut vm = LuaVM::new();
    let t = vm.main_thread();
    vm.push_nil(t).unwrap();
    vm.push_boolean(t, true).unwrap();
    vm.push_number(t, 12.5).unwrap();
    vm.push_string(t, "451").unwrap();
    assert_eq!(vm.api_top(t), 4);

    assert_eq!(vm.type_at(t, 1), LuaValueKind::Nil);
    assert_eq!(vm.type_at(t, 2), LuaValueKind::Boolean);
    assert_eq!(vm.type_at(t, 3), LuaValueKind::Number);
    assert_eq!(vm.type_at(t, 4), LuaValueKind::String);
    // Negative indices count from the top.
    assert_eq!(vm.type_at(t, -1), LuaValueKind::String);
    assert_eq!(vm.to_number(t, -1), Some(451.0));
    assert_eq!(vm.to_number(t, 3), Some(12.5));
    assert_eq!(vm.to_display_string(t, 3).as_deref(), Some("12.5"));

    vm.pop(t, 4);
    assert_eq!(vm.api_top(t), 0);
}

#[test]
fn pseudo_indices_reach_registry_and_globals() {
    let mut vm = LuaVM::new();
    let t = vm.main_thread();
    assert_eq!(vm.type_at(t, REGISTRYINDEX), LuaValueKind::Table);
    assert_eq!(vm.type_at(t, GLOBALSINDEX), LuaValueKind::Table);

    // Write through the globals pseudo-index.
    vm.push_string(t, "from-api").unwrap();
    vm.set_field(t, GLOBALSINDEX, "marker").unwrap();
    let v = vm.get_global("marker");
    assert_eq!(vm.get_str(&v), Some("from-api"));
}

#[test]
fn table_roundtrip_through_the_stack() {
    let mut vm = LuaVM::new();
    let t = vm.main_thread();
    let table = vm.create_table(0, 4);
    vm.push_value(t, table).unwrap();
    vm.push_string(t, "greeting").unwrap();
    vm.push_string(t, "hello").unwrap();
    vm.set_table(t, -3).unwrap();
    vm.push_string(t, "greeting").unwrap();
    vm.get_table(t, -2).unwrap();
    assert_eq!(vm.to_display_string(t, -1).as_deref(), Some("hello"));
    vm.pop(t, 2);
}

#[test]
fn obj_len_matches_primitives() {
    let mut vm = LuaVM::new();
    let t = vm.main_thread();
    vm.push_string(t, "four").unwrap();
    assert_eq!(vm.obj_len(t, -1), 4);
    vm.pop(t, 1);
    let table = vm.create_table(0, 0);
    let tid = table.as_table_id().unwrap();
    for i in 1..=6 {
        vm.table_raw_set_int(t, tid, i, LuaValue::Number(0.0)).unwrap();
    }
    vm.push_value(t, table).unwrap();
    assert_eq!(vm.obj_len(t, -1), 6);
    vm.pop(t, 1);
}

#[test]
fn registry_refs_pin_and_release() {
    let mut vm = LuaVM::new();
    let v1 = vm.create_table(0, 0);
    let v2 = vm.new_string("pinned");
    let r1 = vm.registry_ref(v1);
    let r2 = vm.registry_ref(v2);
    assert!(r1 > 0 && r2 > 0 && r1 != r2);
    assert_eq!(vm.registry_get_ref(r1), v1);
    assert_eq!(vm.registry_get_ref(r2), v2);

    // Referenced objects survive collection with no other roots.
    vm.gc_collect();
    assert_eq!(vm.registry_get_ref(r2), v2);

    // Released slots go on the free list and get reused.
    vm.registry_unref(r1);
    let v3 = vm.create_table(0, 0);
    let r3 = vm.registry_ref(v3);
    assert_eq!(r3, r1);

    // Nil gets the sentinel ref.
    assert_eq!(vm.registry_ref(LuaValue::Nil), crate::lua_vm::REF_NIL);
    assert!(vm.registry_get_ref(crate::lua_vm::REF_NIL).is_nil());
}

#[test]
fn gc_control_surface() {
    let mut vm = LuaVM::new();
    let old_pause = vm.gc_set_pause(150);
    assert_eq!(vm.gc_set_pause(old_pause), 150);
    let old_mul = vm.gc_set_step_mul(300);
    assert_eq!(vm.gc_set_step_mul(old_mul), 300);
    assert!(vm.gc_count_bytes() > 0);
    // A stopped collector ignores automatic checks but still allows an
    // explicit full collection.
    vm.gc_stop();
    vm.gc_collect();
    vm.gc_restart();
}

#[test]
fn load_pushes_closure_or_error() {
    let mut vm = LuaVM::new();
    let t = vm.main_thread();
    let mut good = crate::test::Asm::new(0, 2);
    good.abc(crate::lua_vm::OpCode::Return, 0, 1, 0);
    assert!(vm.load(t, &good.done_raw()).is_ok());
    assert_eq!(vm.type_at(t, -1), LuaValueKind::Function);
    vm.pop(t, 1);

    let bad = crate::lua_value::ChunkDesc {
        source: "@broken".to_string(),
        maxstacksize: 2,
        code: vec![],
        ..Default::default()
    };
    assert!(vm.load(t, &bad).is_err());
    // The error message is pushed in place of the closure.
    assert_eq!(vm.type_at(t, -1), LuaValueKind::String);
    vm.pop(t, 1);
}
