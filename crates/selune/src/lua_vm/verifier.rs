// Load-time bytecode verification.
//
// A freshly loaded prototype is walked symbolically once before it may
// run: opcodes must exist, operands must fit the instruction's mode,
// jumps must land on real instruction boundaries (not inside CLOSURE
// pseudo-instructions or a SETLIST payload word), conditional opcodes
// must be followed by their JMP, and the code must end in RETURN. The
// same walk powers `last_writer`, which names the instruction that
// produced a register when runtime errors want to blame an operand.

use crate::lua_value::{LuaValue, Proto};
use crate::lua_vm::opcode::{
    MAXARG_A, OpArgMask, OpCode, OpFormat, get_a, get_b, get_bx, get_c, get_opcode, get_sbx, is_k,
    rk_index,
};

type Check = Result<(), String>;

fn fail(pc: usize, msg: &str) -> Check {
    Err(format!("bytecode rejected at pc {}: {}", pc, msg))
}

/// Mark which code words begin an instruction, consuming CLOSURE upvalue
/// pseudo-instructions and SETLIST batch payloads.
fn instruction_starts(proto: &Proto) -> Result<Vec<bool>, String> {
    let reject = |pc: usize, msg: &str| -> Result<Vec<bool>, String> {
        Err(format!("bytecode rejected at pc {}: {}", pc, msg))
    };
    let n = proto.code.len();
    let mut starts = vec![false; n];
    let mut pc = 0;
    while pc < n {
        starts[pc] = true;
        let i = proto.code[pc];
        let op = match OpCode::from_u8(get_opcode(i)) {
            Some(op) => op,
            None => return reject(pc, "invalid opcode"),
        };
        pc += 1;
        match op {
            OpCode::Closure => {
                let bx = get_bx(i);
                if bx >= proto.protos.len() {
                    return reject(pc - 1, "closure prototype index out of range");
                }
                let nups = proto.protos[bx].nups as usize;
                for _ in 0..nups {
                    if pc >= n {
                        return reject(pc, "truncated closure upvalue list");
                    }
                    let pseudo = proto.code[pc];
                    match OpCode::from_u8(get_opcode(pseudo)) {
                        Some(OpCode::Move) | Some(OpCode::GetUpval) => {}
                        _ => {
                            return reject(pc, "closure upvalue wiring must be MOVE or GETUPVAL");
                        }
                    }
                    pc += 1;
                }
            }
            OpCode::SetList if get_c(i) == 0 => {
                if pc >= n {
                    return reject(pc, "SETLIST missing batch word");
                }
                pc += 1; // raw batch index, not an instruction
            }
            _ => {}
        }
    }
    Ok(starts)
}

/// Full verification; rejection is a load-time error.
pub fn check_code(proto: &Proto) -> Result<(), String> {
    let n = proto.code.len();
    if n == 0 {
        return Err("empty code".to_string());
    }
    let maxstack = proto.maxstacksize as usize;
    if maxstack > MAXARG_A as usize + 1 {
        return Err("maxstacksize out of range".to_string());
    }
    if (proto.numparams as usize) > maxstack {
        return Err("too many parameters for stack size".to_string());
    }
    if !proto.lineinfo.is_empty() && proto.lineinfo.len() != n {
        return Err("line table does not match code".to_string());
    }
    if proto.nups as usize != proto.upvalues.len() {
        return Err("upvalue count does not match descriptors".to_string());
    }

    let starts = instruction_starts(proto)?;
    let last = starts
        .iter()
        .rposition(|&s| s)
        .expect("non-empty code has a start");
    if OpCode::from_u8(get_opcode(proto.code[last])) != Some(OpCode::Return) {
        return Err("code does not end with RETURN".to_string());
    }

    let checkreg = |pc: usize, r: usize| -> Check {
        if r >= maxstack {
            fail(pc, "register out of range")
        } else {
            Ok(())
        }
    };
    let check_rk = |pc: usize, x: usize| -> Check {
        if is_k(x) {
            if rk_index(x) >= proto.k.len() {
                fail(pc, "constant index out of range")
            } else {
                Ok(())
            }
        } else {
            checkreg(pc, x)
        }
    };
    let check_jump_target = |pc: usize, dest: i64| -> Check {
        if dest < 0 || dest as usize >= n || !starts[dest as usize] {
            fail(pc, "jump target out of range")
        } else {
            Ok(())
        }
    };
    let next_is_jump = |pc: usize| -> Check {
        if pc + 1 < n && OpCode::from_u8(get_opcode(proto.code[pc + 1])) == Some(OpCode::Jmp) {
            Ok(())
        } else {
            fail(pc, "conditional instruction not followed by JMP")
        }
    };

    for pc in 0..n {
        if !starts[pc] {
            continue;
        }
        let i = proto.code[pc];
        let op = OpCode::from_u8(get_opcode(i)).expect("validated by instruction_starts");
        let mode = op.mode();
        let a = get_a(i);
        if mode.sets_a {
            checkreg(pc, a)?;
        }
        match mode.format {
            OpFormat::ABC => {
                let b = get_b(i);
                let c = get_c(i);
                match mode.b {
                    OpArgMask::NotUsed => {
                        if b != 0 {
                            return fail(pc, "unused B operand must be zero");
                        }
                    }
                    OpArgMask::RegOrJump => checkreg(pc, b)?,
                    OpArgMask::Constant => check_rk(pc, b)?,
                    OpArgMask::Used => {}
                }
                match mode.c {
                    OpArgMask::NotUsed => {
                        if c != 0 {
                            return fail(pc, "unused C operand must be zero");
                        }
                    }
                    OpArgMask::RegOrJump => checkreg(pc, c)?,
                    OpArgMask::Constant => check_rk(pc, c)?,
                    OpArgMask::Used => {}
                }
            }
            OpFormat::ABx => {
                let bx = get_bx(i);
                if mode.b == OpArgMask::Constant && bx >= proto.k.len() {
                    return fail(pc, "constant index out of range");
                }
            }
            OpFormat::AsBx => {
                let dest = pc as i64 + 1 + get_sbx(i) as i64;
                check_jump_target(pc, dest)?;
            }
        }
        if mode.test {
            next_is_jump(pc)?;
        }
        match op {
            OpCode::LoadBool => {
                if get_c(i) != 0 {
                    // The skipped word must be a real instruction (not a
                    // SETLIST payload) and something must follow it.
                    if pc + 2 >= n || !starts[pc + 1] {
                        return fail(pc, "LOADBOOL skips past the end of code");
                    }
                }
            }
            OpCode::LoadNil => {
                checkreg(pc, get_b(i))?;
            }
            OpCode::GetUpval | OpCode::SetUpval => {
                if get_b(i) >= proto.nups as usize {
                    return fail(pc, "upvalue index out of range");
                }
            }
            OpCode::GetGlobal | OpCode::SetGlobal => {
                let kv = proto.k.get(get_bx(i));
                if !matches!(kv, Some(LuaValue::String(_))) {
                    return fail(pc, "global name must be a string constant");
                }
            }
            OpCode::SelfOp => {
                checkreg(pc, a + 1)?;
            }
            OpCode::Concat => {
                if get_b(i) >= get_c(i) {
                    return fail(pc, "CONCAT needs an ascending register range");
                }
            }
            OpCode::Call | OpCode::TailCall => {
                let b = get_b(i);
                if b != 0 {
                    checkreg(pc, a + b - 1)?;
                }
                if op == OpCode::TailCall {
                    // Degenerates to CALL+RETURN otherwise; the pairing
                    // is part of the instruction's contract.
                    let next = pc + 1;
                    if next >= n
                        || !starts[next]
                        || OpCode::from_u8(get_opcode(proto.code[next])) != Some(OpCode::Return)
                    {
                        return fail(pc, "TAILCALL not followed by RETURN");
                    }
                }
            }
            OpCode::Return => {
                let b = get_b(i);
                if b > 1 {
                    checkreg(pc, a + b - 2)?;
                }
            }
            OpCode::ForLoop | OpCode::ForPrep => {
                checkreg(pc, a + 3)?;
            }
            OpCode::TForLoop => {
                let c = get_c(i);
                if c < 1 {
                    return fail(pc, "TFORLOOP must produce at least one value");
                }
                checkreg(pc, a + 2 + c)?;
            }
            OpCode::SetList => {
                let b = get_b(i);
                if b != 0 {
                    checkreg(pc, a + b)?;
                }
            }
            OpCode::Vararg => {
                if !proto.is_vararg {
                    return fail(pc, "VARARG outside a vararg function");
                }
                let b = get_b(i);
                if b > 1 {
                    checkreg(pc, a + b - 2)?;
                }
            }
            _ => {}
        }
    }

    for child in &proto.protos {
        check_code(child)?;
    }
    Ok(())
}

/// Last instruction before `lastpc` that definitely wrote `reg`; used to
/// name the operand in runtime error messages.
pub(crate) fn last_writer(proto: &Proto, lastpc: usize, reg: usize) -> Option<usize> {
    let starts = instruction_starts(proto).ok()?;
    let mut found = None;
    for pc in 0..lastpc.min(proto.code.len()) {
        if !starts[pc] {
            continue;
        }
        let i = proto.code[pc];
        let op = OpCode::from_u8(get_opcode(i))?;
        let a = get_a(i);
        let writes = match op {
            OpCode::LoadNil => reg >= a && reg <= get_b(i),
            OpCode::Call | OpCode::TailCall => reg >= a,
            OpCode::Vararg => {
                let b = get_b(i);
                b == 0 || (reg >= a && reg < a + b.saturating_sub(1))
            }
            _ => op.mode().sets_a && a == reg,
        };
        if writes {
            found = Some(pc);
        }
    }
    found
}

/// What kind of expression produced `reg`, with its name when derivable.
pub(crate) fn register_origin(
    proto: &Proto,
    lastpc: usize,
    reg: usize,
    k_str: impl Fn(&LuaValue) -> Option<String>,
) -> Option<(&'static str, String)> {
    let pc = last_writer(proto, lastpc, reg)?;
    let i = proto.code[pc];
    let op = OpCode::from_u8(get_opcode(i))?;
    match op {
        OpCode::GetGlobal => {
            let name = k_str(proto.k.get(get_bx(i))?)?;
            Some(("global", name))
        }
        OpCode::GetTable => {
            let c = get_c(i);
            if is_k(c) {
                let name = k_str(proto.k.get(rk_index(c))?)?;
                Some(("field", name))
            } else {
                None
            }
        }
        OpCode::SelfOp => {
            let c = get_c(i);
            if is_k(c) {
                let name = k_str(proto.k.get(rk_index(c))?)?;
                Some(("method", name))
            } else {
                None
            }
        }
        OpCode::GetUpval => {
            let name = proto
                .upvalues
                .get(get_b(i))
                .map(|u| u.name.clone())
                .unwrap_or_default();
            Some(("upvalue", name))
        }
        _ => None,
    }
}

/// Local variable active at `pc` occupying `reg`, from the debug ranges.
pub(crate) fn local_name(proto: &Proto, pc: usize, reg: usize) -> Option<&str> {
    let mut slot = 0;
    for lv in &proto.locvars {
        if (lv.start_pc as usize) <= pc && pc < lv.end_pc as usize {
            if slot == reg {
                return Some(&lv.name);
            }
            slot += 1;
        }
    }
    None
}

