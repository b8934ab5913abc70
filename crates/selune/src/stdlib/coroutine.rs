// Coroutine library: create, resume, yield, status, wrap, running.

use crate::gc::ThreadId;
use crate::lib_registry::LibraryModule;
use crate::lua_value::{CoStatus, LuaValue};
use crate::lua_vm::coroutine::ResumeOutcome;
use crate::lua_vm::{LuaError, LuaResult, LuaVM, upvalue_index};

pub fn create_coroutine_lib() -> LibraryModule {
    crate::lib_module!("coroutine", {
        "create" => co_create,
        "resume" => co_resume,
        "yield" => co_yield,
        "status" => co_status,
        "wrap" => co_wrap,
        "running" => co_running,
    })
}

fn co_create(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let body = vm.arg_or_nil(t, 1);
    match vm.create_coroutine(body) {
        Some(co) => {
            vm.push_value(t, co)?;
            Ok(1)
        }
        None => Err(vm.throw_runtime(
            t,
            "bad argument #1 to 'create' (function expected)".to_string(),
        )),
    }
}

fn arg_thread(vm: &mut LuaVM, t: ThreadId, fname: &str) -> LuaResult<ThreadId> {
    match vm.arg_or_nil(t, 1).as_thread_id() {
        Some(co) => Ok(co),
        None => Err(vm.throw_runtime(
            t,
            format!("bad argument #1 to '{}' (coroutine expected)", fname),
        )),
    }
}

fn push_resume_outcome(
    vm: &mut LuaVM,
    t: ThreadId,
    outcome: ResumeOutcome,
) -> LuaResult<usize> {
    match outcome {
        ResumeOutcome::Return(vals) | ResumeOutcome::Yield(vals) => {
            vm.push_boolean(t, true)?;
            for v in &vals {
                vm.push_value(t, *v)?;
            }
            Ok(1 + vals.len())
        }
        ResumeOutcome::Error(_, obj) => {
            vm.push_boolean(t, false)?;
            vm.push_value(t, obj)?;
            Ok(2)
        }
    }
}

fn co_resume(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let co = arg_thread(vm, t, "resume")?;
    let n = vm.arg_count(t);
    let mut args = Vec::with_capacity(n.saturating_sub(1));
    for i in 2..=n {
        args.push(vm.arg_or_nil(t, i));
    }
    let outcome = vm.resume_thread(co, &args);
    push_resume_outcome(vm, t, outcome)
}

fn co_yield(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    Err(vm.do_yield(t))
}

fn co_status(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let co = arg_thread(vm, t, "status")?;
    let s = match vm.coroutine_status(co) {
        // The thread we are running on reports "running"; any other
        // Running thread is an ancestor in the resume chain.
        CoStatus::Running if co == t => vm.consts.str_running,
        CoStatus::Running | CoStatus::Normal => vm.consts.str_normal,
        CoStatus::Suspended => vm.consts.str_suspended,
        CoStatus::Dead => vm.consts.str_dead,
    };
    vm.push_value(t, s)?;
    Ok(1)
}

fn co_running(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    if t == vm.main_thread() {
        vm.push_nil(t)?;
    } else {
        vm.push_value(t, LuaValue::Thread(t))?;
    }
    Ok(1)
}

fn co_wrap(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let body = vm.arg_or_nil(t, 1);
    let co = match vm.create_coroutine(body) {
        Some(co) => co,
        None => {
            return Err(vm.throw_runtime(
                t,
                "bad argument #1 to 'wrap' (function expected)".to_string(),
            ));
        }
    };
    let wrapper = vm.create_c_closure(co_wrap_call, vec![co]);
    vm.push_value(t, wrapper)?;
    Ok(1)
}

/// The closure returned by wrap: resumes its coroutine upvalue and
/// either forwards the results or re-raises the error in the caller.
fn co_wrap_call(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let co = vm
        .value_at(t, upvalue_index(1))
        .as_thread_id()
        .expect("wrap closure carries its coroutine");
    let n = vm.arg_count(t);
    let mut args = Vec::with_capacity(n);
    for i in 1..=n {
        args.push(vm.arg_or_nil(t, i));
    }
    match vm.resume_thread(co, &args) {
        ResumeOutcome::Return(vals) | ResumeOutcome::Yield(vals) => {
            for v in &vals {
                vm.push_value(t, *v)?;
            }
            Ok(vals.len())
        }
        ResumeOutcome::Error(_, obj) => {
            vm.thread_mut(t).error_value = obj;
            Err(LuaError::Runtime)
        }
    }
}
