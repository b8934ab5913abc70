// Hooks and introspection.

use crate::gc::ThreadId;
use crate::lua_value::{LuaValue, MASK_CALL, MASK_COUNT, MASK_LINE, MASK_RET};
use crate::lua_vm::opcode::OpCode;
use crate::lua_vm::{LuaResult, LuaVM};
use crate::stdlib::Stdlib;
use crate::test::{Asm, fib_main};

fn counting_hook(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let ev = vm.arg_or_nil(t, 1);
    let name = vm.get_str(&ev).unwrap_or("").to_string();
    let key = format!("hook_{}", name);
    let n = vm.get_global(&key).as_number().unwrap_or(0.0);
    vm.set_global(&key, LuaValue::Number(n + 1.0));
    Ok(0)
}

#[test]
fn call_and_return_hooks_fire() {
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    let t = vm.main_thread();
    let hook = vm.create_c_closure(counting_hook, Vec::new());
    vm.set_hook(t, hook, MASK_CALL | MASK_RET, 0);
    let _ = vm.execute(&fib_main(5.0)).unwrap();
    vm.set_hook(t, LuaValue::Nil, 0, 0);
    let calls = vm.get_global("hook_call").as_number().unwrap_or(0.0);
    let rets = vm.get_global("hook_return").as_number().unwrap_or(0.0);
    // fib(5) makes 15 recursive calls plus the chunk itself.
    assert!(calls >= 15.0, "calls = {}", calls);
    assert!(rets >= 15.0, "returns = {}", rets);
}

#[test]
fn count_hook_fires_every_n_instructions() {
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    let t = vm.main_thread();
    let hook = vm.create_c_closure(counting_hook, Vec::new());
    vm.set_hook(t, hook, MASK_COUNT, 10);
    let _ = vm.execute(&fib_main(10.0)).unwrap();
    vm.set_hook(t, LuaValue::Nil, 0, 0);
    let count = vm.get_global("hook_count").as_number().unwrap_or(0.0);
    assert!(count > 10.0, "count = {}", count);
}

#[test]
fn line_hook_sees_line_changes() {
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    let t = vm.main_thread();
    // Three "lines" of straight-line code.
    let mut m = Asm::new(0, 3);
    let k1 = m.kn(1.0);
    m.abx(OpCode::LoadK, 0, k1);
    m.line(1);
    m.abx(OpCode::LoadK, 1, k1);
    m.line(2);
    m.abc(OpCode::Add, 0, 0, 1);
    m.line(3);
    m.abc(OpCode::Return, 0, 2, 0);
    m.line(3);
    let desc = m.done();

    let hook = vm.create_c_closure(counting_hook, Vec::new());
    vm.set_hook(t, hook, MASK_LINE, 0);
    let _ = vm.execute(&desc).unwrap();
    vm.set_hook(t, LuaValue::Nil, 0, 0);
    let lines = vm.get_global("hook_line").as_number().unwrap_or(0.0);
    assert!(lines >= 3.0, "lines = {}", lines);
}

fn interrupting_hook(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    Err(vm.throw_runtime(t, "interrupted!".to_string()))
}

#[test]
fn count_hook_can_abort_runaway_code() {
    // An infinite loop, bounded by a hook that raises.
    let mut m = Asm::new(0, 2);
    m.asbx(OpCode::Jmp, 0, -1); // jump to itself forever
    m.abc(OpCode::Return, 0, 1, 0);
    let mut vm = LuaVM::new();
    let t = vm.main_thread();
    let hook = vm.create_c_closure(interrupting_hook, Vec::new());
    vm.set_hook(t, hook, MASK_COUNT, 1000);
    let cl = vm.load_chunk(&m.done_raw()).unwrap();
    let (_, obj) = vm.pcall_function(cl, &[]).unwrap_err();
    assert!(vm.get_str(&obj).unwrap().contains("interrupted!"));
}

#[test]
fn get_info_reports_frames() {
    // A host function that inspects its caller.
    fn inspect(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
        // Level 0: this host function, named from its call site.
        let me = vm.get_info(t, 0).expect("own frame");
        assert_eq!(me.what, "C");
        assert_eq!(me.name.as_deref(), Some("inspect"));
        assert_eq!(me.name_what, "global");
        // Level 1: the bytecode caller.
        let caller = vm.get_info(t, 1).expect("caller frame");
        assert_eq!(caller.what, "main");
        assert_eq!(caller.short_src, "test");
        assert!(caller.currentline >= 1);
        vm.push_boolean(t, true)?;
        Ok(1)
    }
    let mut vm = LuaVM::new();
    let f = vm.create_c_closure(inspect, Vec::new());
    vm.set_global("inspect", f);
    let mut m = Asm::new(0, 2);
    let kin = m.ks("inspect");
    m.abx(OpCode::GetGlobal, 0, kin);
    m.abc(OpCode::Call, 0, 1, 2);
    m.abc(OpCode::Return, 0, 2, 0);
    let out = vm.execute(&m.done()).unwrap();
    assert_eq!(out, vec![LuaValue::Boolean(true)]);
}

#[test]
fn tail_called_frames_are_flagged() {
    // helper() calls probe; body reaches helper through a tail call, so
    // probe sees a merged frame above it.
    let mut helper = Asm::new(0, 2);
    let kprobe = helper.ks("probe");
    helper.abx(OpCode::GetGlobal, 0, kprobe);
    helper.abc(OpCode::Call, 0, 1, 1);
    let helper = helper.done();

    let mut body = Asm::new(0, 2);
    let khelper = body.ks("helper");
    body.abx(OpCode::GetGlobal, 0, khelper);
    body.abc(OpCode::TailCall, 0, 1, 0);
    body.abc(OpCode::Return, 0, 0, 0);
    let body = body.done();

    fn probe(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
        let caller = vm.get_info(t, 1).expect("caller frame");
        assert!(caller.is_tail, "expected a merged tail-call frame");
        assert_eq!(caller.tailcalls, 1);
        Ok(0)
    }
    let mut vm = LuaVM::new();
    let f = vm.create_c_closure(probe, Vec::new());
    vm.set_global("probe", f);
    let helper_cl = {
        let mut h = Asm::new(0, 2);
        let child = h.child(helper);
        h.abx(OpCode::Closure, 0, child);
        h.abc(OpCode::Return, 0, 2, 0);
        vm.execute(&h.done()).unwrap()[0]
    };
    vm.set_global("helper", helper_cl);

    let mut m = Asm::new(0, 2);
    let child = m.child(body);
    m.abx(OpCode::Closure, 0, child);
    m.abc(OpCode::Call, 0, 1, 1);
    let _ = vm.execute(&m.done()).unwrap();
}

#[test]
fn valid_lines_come_from_the_line_table() {
    let mut vm = LuaVM::new();
    let mut m = Asm::new(0, 2);
    let k1 = m.kn(1.0);
    m.abx(OpCode::LoadK, 0, k1);
    m.line(10);
    m.abx(OpCode::LoadK, 1, k1);
    m.line(12);
    m.abc(OpCode::Return, 0, 1, 0);
    m.line(12);
    let cl = vm.load_chunk(&m.done()).unwrap();
    let lines = vm.valid_lines(&cl).expect("bytecode function");
    assert!(lines.contains(&10));
    assert!(lines.contains(&12));
}
