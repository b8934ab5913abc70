// Library registration.
//
// The registration contract between the core and the standard (or any
// host) libraries: a module is a named list of native functions plus an
// optional initializer. Loading creates the module table (or targets the
// globals table for "_G"), fills in the functions as C closures and runs
// the initializer.

use crate::lua_value::LuaValue;
use crate::lua_vm::{CFunction, LuaResult, LuaVM};

/// Creates a value at module-load time (for non-function fields such as
/// `math.pi`).
pub type ValueInitializer = fn(&mut LuaVM) -> LuaValue;

/// Runs after a module's entries are installed.
pub type ModuleInitializer = fn(&mut LuaVM) -> LuaResult<()>;

pub enum LibraryEntry {
    Function(CFunction),
    Value(ValueInitializer),
}

pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, LibraryEntry)>,
    pub initializer: Option<ModuleInitializer>,
}

impl LibraryModule {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
            initializer: None,
        }
    }

    pub fn with_function(mut self, name: &'static str, func: CFunction) -> Self {
        self.entries.push((name, LibraryEntry::Function(func)));
        self
    }

    pub fn with_value(mut self, name: &'static str, init: ValueInitializer) -> Self {
        self.entries.push((name, LibraryEntry::Value(init)));
        self
    }

    pub fn with_initializer(mut self, init: ModuleInitializer) -> Self {
        self.initializer = Some(init);
        self
    }
}

/// Build a module from `"name" => function` pairs.
#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($item_name:expr => $item:expr),* $(,)?
    }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push((
                $item_name,
                $crate::lib_registry::LibraryEntry::Function($item),
            ));
        )*
        module
    }};
}

pub struct LibraryRegistry {
    modules: Vec<LibraryModule>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn register(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    pub fn load_all(&self, vm: &mut LuaVM) -> LuaResult<()> {
        for module in &self.modules {
            self.load_module(vm, module)?;
        }
        Ok(())
    }

    fn load_module(&self, vm: &mut LuaVM, module: &LibraryModule) -> LuaResult<()> {
        let t = vm.current_thread();
        let target = if module.name == "_G" {
            vm.globals_of(t)
        } else {
            let existing = vm.get_global(module.name);
            match existing.as_table_id() {
                Some(tid) => tid,
                None => {
                    let table = vm.create_table(0, module.entries.len());
                    vm.set_global(module.name, table);
                    table.as_table_id().expect("fresh table value")
                }
            }
        };
        for (name, entry) in &module.entries {
            let value = match entry {
                LibraryEntry::Function(f) => vm.create_c_closure(*f, Vec::new()),
                LibraryEntry::Value(init) => init(vm),
            };
            let key = vm.new_string(name);
            vm.table_raw_set(t, target, key, value)?;
        }
        if let Some(init) = module.initializer {
            init(vm)?;
        }
        Ok(())
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with the requested standard libraries.
pub fn standard_registry(which: crate::stdlib::Stdlib) -> LibraryRegistry {
    crate::stdlib::build_registry(which)
}
