// Bytecode verification: malformed chunks must be rejected at load time.

use crate::lua_value::{ChunkDesc, ConstDesc};
use crate::lua_vm::opcode::{OpCode, abc, abx, asbx};
use crate::lua_vm::{LuaError, LuaVM};
use crate::test::Asm;

fn load_err(desc: &ChunkDesc) -> LuaError {
    let mut vm = LuaVM::new();
    vm.load_chunk(desc).map(|_| ()).unwrap_err()
}

fn raw_chunk(code: Vec<u32>, maxstack: u8) -> ChunkDesc {
    let mut desc = ChunkDesc::default();
    desc.source = "@bad".to_string();
    desc.maxstacksize = maxstack;
    desc.code = code;
    desc
}

#[test]
fn valid_chunk_loads() {
    let mut vm = LuaVM::new();
    let mut m = Asm::new(0, 2);
    let k = m.kn(1.0);
    m.abx(OpCode::LoadK, 0, k);
    m.abc(OpCode::Return, 0, 2, 0);
    assert!(vm.load_chunk(&m.done()).is_ok());
}

#[test]
fn empty_code_is_rejected() {
    assert_eq!(load_err(&raw_chunk(vec![], 2)), LuaError::Syntax);
}

#[test]
fn invalid_opcode_is_rejected() {
    let bad = 0x3F; // opcode field beyond the instruction set
    assert_eq!(
        load_err(&raw_chunk(vec![bad, abc(OpCode::Return, 0, 1, 0)], 2)),
        LuaError::Syntax
    );
}

#[test]
fn missing_trailing_return_is_rejected() {
    let code = vec![abc(OpCode::Move, 0, 1, 0)];
    assert_eq!(load_err(&raw_chunk(code, 2)), LuaError::Syntax);
}

#[test]
fn register_out_of_range_is_rejected() {
    let code = vec![
        abc(OpCode::Move, 250, 0, 0),
        abc(OpCode::Return, 0, 1, 0),
    ];
    assert_eq!(load_err(&raw_chunk(code, 4)), LuaError::Syntax);
}

#[test]
fn constant_index_out_of_range_is_rejected() {
    let code = vec![abx(OpCode::LoadK, 0, 7), abc(OpCode::Return, 0, 1, 0)];
    // No constants in the pool at all.
    assert_eq!(load_err(&raw_chunk(code, 2)), LuaError::Syntax);
}

#[test]
fn jump_out_of_bounds_is_rejected() {
    let code = vec![
        asbx(OpCode::Jmp, 0, 100),
        abc(OpCode::Return, 0, 1, 0),
    ];
    assert_eq!(load_err(&raw_chunk(code, 2)), LuaError::Syntax);
}

#[test]
fn conditional_without_jump_is_rejected() {
    let mut desc = raw_chunk(
        vec![
            abc(OpCode::Eq, 0, 0, 0),
            abc(OpCode::Move, 0, 0, 0),
            abc(OpCode::Return, 0, 1, 0),
        ],
        2,
    );
    desc.constants.push(ConstDesc::Number(1.0));
    assert_eq!(load_err(&desc), LuaError::Syntax);
}

#[test]
fn vararg_outside_vararg_function_is_rejected() {
    let code = vec![
        abc(OpCode::Vararg, 0, 2, 0),
        abc(OpCode::Return, 0, 1, 0),
    ];
    assert_eq!(load_err(&raw_chunk(code, 3)), LuaError::Syntax);
}

#[test]
fn global_name_must_be_a_string_constant() {
    let mut desc = raw_chunk(
        vec![abx(OpCode::GetGlobal, 0, 0), abc(OpCode::Return, 0, 1, 0)],
        2,
    );
    desc.constants.push(ConstDesc::Number(3.0));
    assert_eq!(load_err(&desc), LuaError::Syntax);
}

#[test]
fn tailcall_must_be_followed_by_return() {
    let code = vec![
        abc(OpCode::TailCall, 0, 1, 0),
        abc(OpCode::Move, 0, 0, 0),
        abc(OpCode::Return, 0, 1, 0),
    ];
    assert_eq!(load_err(&raw_chunk(code, 3)), LuaError::Syntax);
}

#[test]
fn closure_pseudo_instructions_are_checked() {
    // A child with one upvalue wired by something other than
    // MOVE/GETUPVAL.
    let mut child = Asm::new(0, 2);
    child.abc(OpCode::Return, 0, 1, 0);
    let mut child = child.done_raw();
    child.upvalues.push(crate::lua_value::UpvalDesc {
        name: "x".to_string(),
        in_stack: true,
        index: 0,
    });
    let mut desc = raw_chunk(
        vec![
            abx(OpCode::Closure, 0, 0),
            abc(OpCode::Add, 0, 0, 0), // not a capture pseudo-instruction
            abc(OpCode::Return, 0, 1, 0),
        ],
        3,
    );
    desc.protos.push(child);
    assert_eq!(load_err(&desc), LuaError::Syntax);
}

#[test]
fn jump_into_closure_wiring_is_rejected() {
    let mut child = Asm::new(0, 2);
    child.abc(OpCode::Return, 0, 1, 0);
    let mut child = child.done_raw();
    child.upvalues.push(crate::lua_value::UpvalDesc {
        name: "x".to_string(),
        in_stack: true,
        index: 0,
    });
    let mut desc = raw_chunk(
        vec![
            asbx(OpCode::Jmp, 0, 1), // lands on the capture word
            abx(OpCode::Closure, 0, 0),
            abc(OpCode::Move, 0, 0, 0),
            abc(OpCode::Return, 0, 1, 0),
        ],
        3,
    );
    desc.protos.push(child);
    assert_eq!(load_err(&desc), LuaError::Syntax);
}

#[test]
fn line_table_must_match_code_length() {
    let mut desc = raw_chunk(vec![abc(OpCode::Return, 0, 1, 0)], 2);
    desc.lineinfo = vec![1, 2, 3];
    assert_eq!(load_err(&desc), LuaError::Syntax);
}

#[test]
fn rejection_message_names_the_offending_pc() {
    let mut vm = LuaVM::new();
    let code = vec![
        abc(OpCode::Move, 0, 0, 0),
        abc(OpCode::Move, 200, 0, 0),
        abc(OpCode::Return, 0, 1, 0),
    ];
    let err = vm.load_chunk(&raw_chunk(code, 4));
    assert!(err.is_err());
    assert!(vm.error_message().contains("pc 1"), "{}", vm.error_message());
}
