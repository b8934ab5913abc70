// Coroutine scheduling.
//
// A coroutine is an ordinary thread whose interpreter activation lives
// inside `resume_thread`. Suspension is plain control flow: the yield
// host function returns the Yield signal, it unwinds the Rust frames of
// this activation (bytecode frames stay on the coroutine's CallInfo
// stack), and the next resume completes the interrupted call with the
// resume arguments as the yield's results.

use crate::gc::ThreadId;
use crate::lua_value::{CoStatus, LuaValue, LuaValueKind};
use crate::lua_vm::execute::Callee;
use crate::lua_vm::{LuaError, LuaResult, LuaVM};

pub enum ResumeOutcome {
    /// The body returned; carries its results.
    Return(Vec<LuaValue>),
    /// Suspended at a yield; carries the yielded values.
    Yield(Vec<LuaValue>),
    /// The body raised; carries the error kind and object.
    Error(LuaError, LuaValue),
}

impl LuaVM {
    /// Make a coroutine from a callable body. The body parks at the
    /// bottom of the new thread's stack until the first resume.
    pub fn create_coroutine(&mut self, body: LuaValue) -> Option<LuaValue> {
        if body.kind() != LuaValueKind::Function {
            return None;
        }
        let co_value = self.new_thread();
        let co = co_value.as_thread_id().expect("fresh thread value");
        self.thread_mut(co).push(body);
        Some(co_value)
    }

    pub fn coroutine_status(&self, co: ThreadId) -> CoStatus {
        self.thread(co).status
    }

    pub fn resume_thread(&mut self, co: ThreadId, args: &[LuaValue]) -> ResumeOutcome {
        match self.thread(co).status {
            CoStatus::Dead => {
                return ResumeOutcome::Error(
                    LuaError::Runtime,
                    self.new_string("cannot resume dead coroutine"),
                );
            }
            CoStatus::Running | CoStatus::Normal => {
                return ResumeOutcome::Error(
                    LuaError::Runtime,
                    self.new_string("cannot resume non-suspended coroutine"),
                );
            }
            CoStatus::Suspended => {}
        }
        let prev = self.current_thread;
        if prev != co {
            self.thread_mut(prev).status = CoStatus::Normal;
        }
        self.current_thread = co;
        self.thread_mut(co).status = CoStatus::Running;

        let starting = self.thread(co).ci.is_empty();
        let run = (|| -> LuaResult<()> {
            self.grow_stack(co, args.len())?;
            for &a in args {
                self.thread_mut(co).push(a);
            }
            if starting {
                match self.precall(co, 0, -1)? {
                    Callee::Lua => self.execute_frames(co, 0),
                    Callee::C => Ok(()),
                }
            } else {
                // Complete the call interrupted by yield: the resume
                // arguments become that call's results.
                let n = args.len();
                let first = self.thread(co).top - n;
                let wanted = self
                    .thread(co)
                    .current_ci()
                    .expect("suspended frame")
                    .nresults;
                self.poscall(co, first, n)?;
                if wanted >= 0 {
                    if let Some(ci) = self.thread(co).current_ci() {
                        if ci.is_lua() {
                            let top = ci.top;
                            self.thread_mut(co).top = top;
                        }
                    }
                }
                if self.thread(co).ci.is_empty() {
                    Ok(())
                } else {
                    self.execute_frames(co, 0)
                }
            }
        })();

        self.current_thread = prev;
        self.thread_mut(prev).status = CoStatus::Running;

        match run {
            Ok(()) => {
                self.thread_mut(co).status = CoStatus::Dead;
                let th = self.thread(co);
                let results = th.stack[..th.top].to_vec();
                ResumeOutcome::Return(results)
            }
            Err(LuaError::Yield) => {
                self.thread_mut(co).status = CoStatus::Suspended;
                let th = self.thread(co);
                let yci = th.current_ci().expect("yield frame");
                let values = th.stack[yci.base..th.top].to_vec();
                ResumeOutcome::Yield(values)
            }
            Err(e) => {
                self.thread_mut(co).status = CoStatus::Dead;
                ResumeOutcome::Error(e, self.thread(co).error_value)
            }
        }
    }
}
