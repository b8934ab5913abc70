// Coroutines: producer/consumer, statuses, boundary errors, wrap.

use crate::lua_value::{CoStatus, LuaValue};
use crate::lua_vm::coroutine::ResumeOutcome;
use crate::lua_vm::opcode::OpCode;
use crate::lua_vm::LuaVM;
use crate::stdlib::Stdlib;
use crate::test::Asm;

/// function() for i = 1, 3 do coroutine.yield(i) end end
fn yield_three() -> crate::lua_value::ChunkDesc {
    let mut f = Asm::new(0, 7);
    let k1 = f.kn(1.0);
    let k3 = f.kn(3.0);
    let kco = f.ks("coroutine");
    let kyield = f.ks("yield");
    f.abx(OpCode::LoadK, 0, k1); // 0: init
    f.abx(OpCode::LoadK, 1, k3); // 1: limit
    f.abx(OpCode::LoadK, 2, k1); // 2: step
    f.asbx(OpCode::ForPrep, 0, 4); // 3: -> 8
    f.abx(OpCode::GetGlobal, 4, kco); // 4
    f.abc(OpCode::GetTable, 4, 4, Asm::rk(kyield)); // 5
    f.abc(OpCode::Move, 5, 3, 0); // 6: arg = i
    f.abc(OpCode::Call, 4, 2, 1); // 7
    f.asbx(OpCode::ForLoop, 0, -5); // 8: -> 4
    f.abc(OpCode::Return, 0, 1, 0); // 9
    f.done_raw()
}

#[test]
fn producer_consumer_resume_sequence() {
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    let body = vm.load_chunk(&yield_three()).unwrap();
    let co_v = vm.create_coroutine(body).unwrap();
    let co = co_v.as_thread_id().unwrap();
    // Keep the coroutine anchored while it runs.
    vm.set_global("co", co_v);

    for expect in 1..=3 {
        match vm.resume_thread(co, &[]) {
            ResumeOutcome::Yield(vals) => {
                assert_eq!(vals, vec![LuaValue::Number(expect as f64)]);
            }
            _ => panic!("expected a yield"),
        }
        assert_eq!(vm.coroutine_status(co), CoStatus::Suspended);
    }
    match vm.resume_thread(co, &[]) {
        ResumeOutcome::Return(vals) => assert!(vals.is_empty()),
        _ => panic!("expected the body to finish"),
    }
    assert_eq!(vm.coroutine_status(co), CoStatus::Dead);
    // A fifth resume reports the dead coroutine.
    match vm.resume_thread(co, &[]) {
        ResumeOutcome::Error(_, obj) => {
            assert_eq!(vm.get_str(&obj), Some("cannot resume dead coroutine"));
        }
        _ => panic!("expected an error"),
    }
}

/// function(a, b) local c = coroutine.yield(a + b); return c end
fn echo_once() -> crate::lua_value::ChunkDesc {
    let mut f = Asm::new(2, 6);
    let kco = f.ks("coroutine");
    let kyield = f.ks("yield");
    f.abx(OpCode::GetGlobal, 2, kco); // 0
    f.abc(OpCode::GetTable, 2, 2, Asm::rk(kyield)); // 1
    f.abc(OpCode::Add, 3, 0, 1); // 2: a + b
    f.abc(OpCode::Call, 2, 2, 2); // 3: R2 = yield(R3)
    f.abc(OpCode::Return, 2, 2, 0); // 4: return c
    f.done()
}

#[test]
fn values_shuttle_both_directions() {
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    let body = vm.load_chunk(&echo_once()).unwrap();
    let co_v = vm.create_coroutine(body).unwrap();
    let co = co_v.as_thread_id().unwrap();
    vm.set_global("co", co_v);

    match vm.resume_thread(co, &[LuaValue::Number(2.0), LuaValue::Number(5.0)]) {
        ResumeOutcome::Yield(vals) => assert_eq!(vals, vec![LuaValue::Number(7.0)]),
        _ => panic!("expected a yield of a+b"),
    }
    match vm.resume_thread(co, &[LuaValue::Number(99.0)]) {
        ResumeOutcome::Return(vals) => assert_eq!(vals, vec![LuaValue::Number(99.0)]),
        _ => panic!("expected the resume value back"),
    }
}

#[test]
fn yield_across_pcall_is_an_error() {
    // co body: pcall(function() coroutine.yield(1) end)
    let mut inner = Asm::new(0, 4);
    let kco = inner.ks("coroutine");
    let kyield = inner.ks("yield");
    let k1 = inner.kn(1.0);
    inner.abx(OpCode::GetGlobal, 0, kco);
    inner.abc(OpCode::GetTable, 0, 0, Asm::rk(kyield));
    inner.abx(OpCode::LoadK, 1, k1);
    inner.abc(OpCode::Call, 0, 2, 1);
    let inner = inner.done();

    let mut body = Asm::new(0, 4);
    let kpcall = body.ks("pcall");
    let child = body.child(inner);
    body.abx(OpCode::GetGlobal, 0, kpcall);
    body.abx(OpCode::Closure, 1, child);
    body.abc(OpCode::Call, 0, 2, 0);
    body.abc(OpCode::Return, 0, 0, 0);
    let body = body.done();

    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    let cl = vm.load_chunk(&body).unwrap();
    let co_v = vm.create_coroutine(cl).unwrap();
    let co = co_v.as_thread_id().unwrap();
    vm.set_global("co", co_v);

    // pcall catches the boundary violation, so the body completes with
    // (false, message).
    match vm.resume_thread(co, &[]) {
        ResumeOutcome::Return(vals) => {
            assert_eq!(vals[0], LuaValue::Boolean(false));
            let msg = vm.get_str(&vals[1]).unwrap_or("");
            assert!(msg.contains("yield across"));
        }
        _ => panic!("expected pcall to absorb the yield error"),
    }
}

#[test]
fn yield_from_main_thread_is_an_error() {
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    // coroutine.yield() on the main thread.
    let mut m = Asm::new(0, 3);
    let kco = m.ks("coroutine");
    let kyield = m.ks("yield");
    m.abx(OpCode::GetGlobal, 0, kco);
    m.abc(OpCode::GetTable, 0, 0, Asm::rk(kyield));
    m.abc(OpCode::Call, 0, 1, 1);
    let cl = vm.load_chunk(&m.done()).unwrap();
    let err = vm.pcall_function(cl, &[]).unwrap_err();
    let msg = vm.get_str(&err.1).unwrap_or("");
    assert!(msg.contains("outside a coroutine"));
}

#[test]
fn wrap_forwards_values_and_raises_errors() {
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    let body = vm.load_chunk(&yield_three()).unwrap();

    // coroutine.wrap through the library call surface.
    let wrap = {
        let co_lib = vm.get_global("coroutine").as_table_id().unwrap();
        let k = vm.new_string("wrap");
        vm.table_raw_get(co_lib, &k)
    };
    let wrapped = vm.call_function(wrap, &[body]).unwrap()[0];
    vm.set_global("w", wrapped);
    for expect in 1..=3 {
        let out = vm.call_function(wrapped, &[]).unwrap();
        assert_eq!(out, vec![LuaValue::Number(expect as f64)]);
    }
}

#[test]
fn nested_resume_marks_outer_normal() {
    // Observed from the host: while co runs, the main thread keeps
    // Running status; a coroutine resumed from inside another shows the
    // outer one as Normal. Here we check the visible half of that from
    // a host function invoked inside the coroutine.
    let mut vm = LuaVM::new();
    vm.open_stdlib(Stdlib::All).unwrap();
    let body = vm.load_chunk(&yield_three()).unwrap();
    let co_v = vm.create_coroutine(body).unwrap();
    let co = co_v.as_thread_id().unwrap();
    vm.set_global("co", co_v);
    assert_eq!(vm.coroutine_status(vm.main_thread()), CoStatus::Running);
    let _ = vm.resume_thread(co, &[]);
    assert_eq!(vm.coroutine_status(vm.main_thread()), CoStatus::Running);
    assert_eq!(vm.coroutine_status(co), CoStatus::Suspended);
}
