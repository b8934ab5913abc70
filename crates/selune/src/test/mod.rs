// Test support: a tiny bytecode assembler producing ChunkDesc trees the
// way the external front end would, so tests drive the core through its
// real loading path (verifier included).

mod test_api;
mod test_coroutine;
mod test_debug;
mod test_errors;
mod test_stdlib;
mod test_table;
mod test_value;
mod test_verifier;

use crate::lua_value::{ChunkDesc, ConstDesc};
use crate::lua_vm::opcode::{OpCode, abc, abx, asbx, rk_as_k};

pub struct Asm {
    desc: ChunkDesc,
}

impl Asm {
    pub fn new(numparams: u8, maxstack: u8) -> Self {
        let mut desc = ChunkDesc::default();
        desc.source = "@test".to_string();
        desc.numparams = numparams;
        desc.maxstacksize = maxstack;
        Asm { desc }
    }

    pub fn vararg(mut self) -> Self {
        self.desc.is_vararg = true;
        self
    }

    /// Add (or find) a numeric constant; returns its index.
    pub fn kn(&mut self, n: f64) -> u32 {
        for (i, c) in self.desc.constants.iter().enumerate() {
            if let ConstDesc::Number(x) = c {
                if *x == n {
                    return i as u32;
                }
            }
        }
        self.desc.constants.push(ConstDesc::Number(n));
        (self.desc.constants.len() - 1) as u32
    }

    pub fn ks(&mut self, s: &str) -> u32 {
        for (i, c) in self.desc.constants.iter().enumerate() {
            if let ConstDesc::Str(x) = c {
                if x == s {
                    return i as u32;
                }
            }
        }
        self.desc.constants.push(ConstDesc::Str(s.to_string()));
        (self.desc.constants.len() - 1) as u32
    }

    /// RK operand referencing constant `k`.
    pub fn rk(k: u32) -> u32 {
        rk_as_k(k as usize) as u32
    }

    pub fn emit(&mut self, instr: u32) -> &mut Self {
        self.desc.code.push(instr);
        self.desc.lineinfo.push(1);
        self
    }

    pub fn abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> &mut Self {
        self.emit(abc(op, a, b, c))
    }

    pub fn abx(&mut self, op: OpCode, a: u32, bx: u32) -> &mut Self {
        self.emit(abx(op, a, bx))
    }

    pub fn asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> &mut Self {
        self.emit(asbx(op, a, sbx))
    }

    /// Set the source line of the last emitted instruction.
    pub fn line(&mut self, line: u32) -> &mut Self {
        if let Some(l) = self.desc.lineinfo.last_mut() {
            *l = line;
        }
        self
    }

    pub fn child(&mut self, c: ChunkDesc) -> u32 {
        self.desc.protos.push(c);
        (self.desc.protos.len() - 1) as u32
    }

    pub fn done(mut self) -> ChunkDesc {
        // Every chunk ends in RETURN; add the implicit empty one the
        // code generator always appends.
        self.desc.code.push(abc(OpCode::Return, 0, 1, 0));
        self.desc.lineinfo.push(
            self.desc
                .lineinfo
                .last()
                .copied()
                .unwrap_or(1),
        );
        self.desc
    }

    /// Finish without the implicit trailing RETURN (for tests that lay
    /// out their own).
    pub fn done_raw(self) -> ChunkDesc {
        self.desc
    }
}

/// The fib chunk used by several tests:
/// function fib(n) if n < 2 then return n else return fib(n-1)+fib(n-2) end
pub fn fib_proto() -> ChunkDesc {
    let mut f = Asm::new(1, 4);
    let k2 = f.kn(2.0);
    let kfib = f.ks("fib");
    let k1 = f.kn(1.0);
    f.abc(OpCode::Lt, 1, 0, Asm::rk(k2)); // 0: R0 < 2 ?
    f.asbx(OpCode::Jmp, 0, 8); // 1: -> 10 (then branch)
    f.abx(OpCode::GetGlobal, 1, kfib); // 2
    f.abc(OpCode::Sub, 2, 0, Asm::rk(k1)); // 3: R2 = n-1
    f.abc(OpCode::Call, 1, 2, 2); // 4: R1 = fib(R2)
    f.abx(OpCode::GetGlobal, 2, kfib); // 5
    f.abc(OpCode::Sub, 3, 0, Asm::rk(k2)); // 6: R3 = n-2
    f.abc(OpCode::Call, 2, 2, 2); // 7: R2 = fib(R3)
    f.abc(OpCode::Add, 1, 1, 2); // 8
    f.abc(OpCode::Return, 1, 2, 0); // 9
    f.abc(OpCode::Return, 0, 2, 0); // 10: return n
    f.done()
}

/// Main chunk defining fib and returning fib(n).
pub fn fib_main(n: f64) -> ChunkDesc {
    let mut m = Asm::new(0, 2);
    let kfib = m.ks("fib");
    let kn = m.kn(n);
    let fib = m.child(fib_proto());
    m.abx(OpCode::Closure, 0, fib);
    m.abx(OpCode::SetGlobal, 0, kfib);
    m.abx(OpCode::GetGlobal, 0, kfib);
    m.abx(OpCode::LoadK, 1, kn);
    m.abc(OpCode::Call, 0, 2, 2);
    m.abc(OpCode::Return, 0, 2, 0);
    m.done()
}
