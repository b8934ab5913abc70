// Protected calls, error objects, handlers, locations.

use crate::gc::ThreadId;
use crate::lua_value::LuaValue;
use crate::lua_vm::opcode::OpCode;
use crate::lua_vm::{LuaError, LuaResult, LuaVM};
use crate::stdlib::Stdlib;
use crate::test::Asm;

#[test]
fn error_carries_location_and_pcall_catches() {
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    // pcall(function() error("oops") end) via the host surface.
    let mut f = Asm::new(0, 3);
    let kerror = f.ks("error");
    let koops = f.ks("oops");
    f.abx(OpCode::GetGlobal, 0, kerror);
    f.abx(OpCode::LoadK, 1, koops);
    f.abc(OpCode::Call, 0, 2, 1);
    let cl = vm.load_chunk(&f.done()).unwrap();
    let (kind, obj) = vm.pcall_function(cl, &[]).unwrap_err();
    assert_eq!(kind, LuaError::Runtime);
    let msg = vm.get_str(&obj).unwrap();
    // "chunkname:line: oops"
    assert!(msg.contains(":1: oops"), "got: {}", msg);
    assert!(msg.starts_with("test"), "got: {}", msg);
}

#[test]
fn error_with_level_zero_keeps_message_bare() {
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    let mut f = Asm::new(0, 4);
    let kerror = f.ks("error");
    let kmsg = f.ks("plain");
    let k0 = f.kn(0.0);
    f.abx(OpCode::GetGlobal, 0, kerror);
    f.abx(OpCode::LoadK, 1, kmsg);
    f.abx(OpCode::LoadK, 2, k0);
    f.abc(OpCode::Call, 0, 3, 1);
    let cl = vm.load_chunk(&f.done()).unwrap();
    let (_, obj) = vm.pcall_function(cl, &[]).unwrap_err();
    assert_eq!(vm.get_str(&obj), Some("plain"));
}

#[test]
fn non_string_error_objects_pass_through() {
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    // error({}) -- the table itself is the error object
    let mut f = Asm::new(0, 3);
    let kerror = f.ks("error");
    f.abx(OpCode::GetGlobal, 0, kerror);
    f.abc(OpCode::NewTable, 1, 0, 0);
    f.abc(OpCode::Call, 0, 2, 1);
    let cl = vm.load_chunk(&f.done()).unwrap();
    let (_, obj) = vm.pcall_function(cl, &[]).unwrap_err();
    assert!(obj.as_table_id().is_some());
}

#[test]
fn runtime_type_errors_unwind_to_pcall() {
    // return 1 + {}  -- arithmetic on a table
    let mut f = Asm::new(0, 3);
    let k1 = f.kn(1.0);
    f.abc(OpCode::NewTable, 0, 0, 0);
    f.abc(OpCode::Add, 1, Asm::rk(k1), 0);
    f.abc(OpCode::Return, 1, 2, 0);
    let mut vm = LuaVM::new();
    let cl = vm.load_chunk(&f.done()).unwrap();
    let (kind, obj) = vm.pcall_function(cl, &[]).unwrap_err();
    assert_eq!(kind, LuaError::Runtime);
    let msg = vm.get_str(&obj).unwrap();
    assert!(msg.contains("attempt to perform arithmetic"), "got: {}", msg);
}

#[test]
fn call_of_non_function_reports_type() {
    let mut f = Asm::new(0, 2);
    f.abc(OpCode::LoadBool, 0, 1, 0);
    f.abc(OpCode::Call, 0, 1, 1);
    let mut vm = LuaVM::new();
    let cl = vm.load_chunk(&f.done()).unwrap();
    let (_, obj) = vm.pcall_function(cl, &[]).unwrap_err();
    assert!(
        vm.get_str(&obj).unwrap().contains("attempt to call a boolean value")
    );
}

fn failing_handler(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    Err(vm.throw_runtime(t, "handler exploded".to_string()))
}

fn tagging_handler(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let orig = vm.arg_or_nil(t, 1);
    let orig = vm.get_str(&orig).unwrap_or("").to_string();
    let tagged = vm.new_string(&format!("[handled] {}", orig));
    vm.push_value(t, tagged)?;
    Ok(1)
}

#[test]
fn xpcall_filters_through_the_handler() {
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    let handler = vm.create_c_closure(tagging_handler, Vec::new());
    vm.set_global("h", handler);

    // xpcall(function() error("boom") end, h)
    let mut inner = Asm::new(0, 3);
    let kerror = inner.ks("error");
    let kboom = inner.ks("boom");
    inner.abx(OpCode::GetGlobal, 0, kerror);
    inner.abx(OpCode::LoadK, 1, kboom);
    inner.abc(OpCode::Call, 0, 2, 1);
    let inner = inner.done();

    let mut m = Asm::new(0, 4);
    let kxpcall = m.ks("xpcall");
    let kh = m.ks("h");
    let child = m.child(inner);
    m.abx(OpCode::GetGlobal, 0, kxpcall);
    m.abx(OpCode::Closure, 1, child);
    m.abx(OpCode::GetGlobal, 2, kh);
    m.abc(OpCode::Call, 0, 3, 0);
    m.abc(OpCode::Return, 0, 0, 0);
    let results = vm.execute(&m.done()).unwrap();
    assert_eq!(results[0], LuaValue::Boolean(false));
    let msg = vm.get_str(&results[1]).unwrap();
    assert!(msg.starts_with("[handled] "), "got: {}", msg);
    assert!(msg.contains("boom"));
}

#[test]
fn error_inside_the_handler_reports_err_in_err() {
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    let handler = vm.create_c_closure(failing_handler, Vec::new());
    let t = vm.main_thread();

    // Protected call of a function that errors, with a handler that
    // errors too.
    let mut inner = Asm::new(0, 3);
    let kerror = inner.ks("error");
    let kboom = inner.ks("boom");
    inner.abx(OpCode::GetGlobal, 0, kerror);
    inner.abx(OpCode::LoadK, 1, kboom);
    inner.abc(OpCode::Call, 0, 2, 1);
    let cl = vm.load_chunk(&inner.done()).unwrap();

    vm.push_value(t, handler).unwrap();
    let handler_idx = vm.thread(t).top - 1;
    vm.push_value(t, cl).unwrap();
    let func_idx = vm.thread(t).top - 1;
    let err = vm
        .protected_call(t, func_idx, 0, 0, Some(handler_idx))
        .unwrap_err();
    assert_eq!(err, LuaError::ErrErr);
    assert!(vm.error_message().contains("error in error handling"));
}

#[test]
fn nested_pcall_restores_outer_protection() {
    // pcall(function() pcall(function() error("inner") end); error("outer") end)
    let mut innermost = Asm::new(0, 3);
    let kerror = innermost.ks("error");
    let kinner = innermost.ks("inner");
    innermost.abx(OpCode::GetGlobal, 0, kerror);
    innermost.abx(OpCode::LoadK, 1, kinner);
    innermost.abc(OpCode::Call, 0, 2, 1);
    let innermost = innermost.done();

    let mut middle = Asm::new(0, 4);
    let kpcall = middle.ks("pcall");
    let kerror = middle.ks("error");
    let kouter = middle.ks("outer");
    let child = middle.child(innermost);
    middle.abx(OpCode::GetGlobal, 0, kpcall);
    middle.abx(OpCode::Closure, 1, child);
    middle.abc(OpCode::Call, 0, 2, 1);
    middle.abx(OpCode::GetGlobal, 0, kerror);
    middle.abx(OpCode::LoadK, 1, kouter);
    middle.abc(OpCode::Call, 0, 2, 1);
    let middle = middle.done();

    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    let cl = vm.load_chunk(&middle).unwrap();
    let (_, obj) = vm.pcall_function(cl, &[]).unwrap_err();
    assert!(vm.get_str(&obj).unwrap().contains("outer"));
}
