mod lua_closure;
mod lua_convert;
mod lua_string;
mod lua_table;
mod lua_thread;
mod lua_userdata;
mod lua_value;

pub use lua_closure::{
    CClosure, ChunkDesc, Closure, ConstDesc, LocVar, LuaClosure, Proto, UpvalDesc, Upvalue,
};
pub use lua_convert::{format_g, number_to_display, str_to_number};
pub use lua_string::LuaString;
pub use lua_table::{
    InvalidKey, LuaTable, TableFull, TableOverflow, exact_int, hash_number, hash_pointer,
};
pub use lua_thread::{
    BASIC_STACK_SIZE, CoStatus, EXTRA_STACK, HookState, LuaThread, MASK_CALL, MASK_COUNT,
    MASK_LINE, MASK_RET, MAX_C_CALLS, MAX_STACK,
};
pub use lua_userdata::LuaUserdata;
pub use lua_value::{LuaValue, LuaValueKind, NUM_BASIC_TYPES};
