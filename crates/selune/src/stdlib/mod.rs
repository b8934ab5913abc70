pub mod basic;
pub mod coroutine;
pub mod debug;
pub mod math;
pub mod os;
pub mod string;
pub mod table;

use crate::lib_registry::LibraryRegistry;

/// Which standard libraries to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stdlib {
    /// base only
    Base,
    /// everything shipped with the core
    All,
}

pub fn build_registry(which: Stdlib) -> LibraryRegistry {
    let mut registry = LibraryRegistry::new();
    registry.register(basic::create_basic_lib());
    if which == Stdlib::All {
        registry.register(coroutine::create_coroutine_lib());
        registry.register(math::create_math_lib());
        registry.register(string::create_string_lib());
        registry.register(table::create_table_lib());
        registry.register(os::create_os_lib());
        registry.register(debug::create_debug_lib());
    }
    registry
}
