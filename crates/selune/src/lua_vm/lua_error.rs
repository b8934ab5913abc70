// Lightweight error kind. The error object itself (any Lua value) rides
// in the faulting thread's `error_value`, keeping `Result` one word wide;
// hosts turn the pair into a `LuaFullError` when they want a message.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaError {
    /// Runtime error; error object stored in the thread.
    Runtime,
    /// Allocation limit hit; the error object is the preallocated
    /// "not enough memory" string (no allocation on this path).
    Memory,
    /// Bytecode verification or chunk loading failure.
    Syntax,
    /// The error handler itself raised.
    ErrErr,
    /// Not an error: a coroutine is suspending. Only `resume` absorbs
    /// this; anywhere else it turns into a "yield across C boundary"
    /// runtime error.
    Yield,
}

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaError::Runtime => write!(f, "runtime error"),
            LuaError::Memory => write!(f, "not enough memory"),
            LuaError::Syntax => write!(f, "syntax error"),
            LuaError::ErrErr => write!(f, "error in error handling"),
            LuaError::Yield => write!(f, "yield"),
        }
    }
}

impl std::error::Error for LuaError {}

pub type LuaResult<T> = Result<T, LuaError>;

/// Error kind plus the rendered error message, for host consumption.
#[derive(Debug, Clone)]
pub struct LuaFullError {
    pub kind: LuaError,
    pub message: String,
}

impl std::fmt::Display for LuaFullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for LuaFullError {}
