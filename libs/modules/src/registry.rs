use std::collections::HashMap;
use std::sync::Arc;

use imn_model::SchemaRegistry;

use crate::builtins::{EchoModule, FaultyModule, PingModule, TcpingModule, WorkingModule};
use crate::contract::ModuleSpec;

/// Fixed compile-time registry of loaded modules (spec.md §9 DESIGN NOTES,
/// option (a)): addressed by name, never by runtime code loading.
pub struct ModuleRegistry {
    modules: HashMap<&'static str, Arc<dyn ModuleSpec>>,
}

impl ModuleRegistry {
    /// Registers every built-in module named in spec.md §6.
    pub fn with_builtins() -> Self {
        let mut registry = Self { modules: HashMap::new() };
        registry.insert(Arc::new(PingModule));
        registry.insert(Arc::new(TcpingModule));
        registry.insert(Arc::new(EchoModule));
        registry.insert(Arc::new(WorkingModule));
        registry.insert(Arc::new(FaultyModule));
        registry
    }

    pub fn insert(&mut self, module: Arc<dyn ModuleSpec>) {
        self.modules.insert(module.name(), module);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModuleSpec>> {
        self.modules.get(name).cloned()
    }

    /// Whether `name` listens/responds on the module-scoped subject triple
    /// rather than the generic per-agent one. Unknown names default to the
    /// generic form.
    pub fn uses_module_scoped_subjects(&self, name: &str) -> bool {
        self.get(name).map(|m| m.uses_module_scoped_subjects()).unwrap_or(false)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modules.keys().copied()
    }

    /// Builds a [`SchemaRegistry`] from every currently loaded module, for
    /// the coordinator to validate requests before dispatch.
    pub fn schema_registry(&self) -> SchemaRegistry {
        let mut schemas = SchemaRegistry::new();
        for module in self.modules.values() {
            schemas.register(module.schema().clone());
        }
        schemas
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_builtins_registers_all_five_named_modules() {
        let registry = ModuleRegistry::with_builtins();
        for name in ["ping_module", "tcping", "echo_module", "working_module", "faulty_module"] {
            assert!(registry.get(name).is_some(), "missing builtin {name}");
        }
    }

    #[test]
    fn only_echo_working_and_faulty_use_module_scoped_subjects() {
        let registry = ModuleRegistry::with_builtins();
        assert!(!registry.uses_module_scoped_subjects("ping_module"));
        assert!(!registry.uses_module_scoped_subjects("tcping"));
        assert!(registry.uses_module_scoped_subjects("echo_module"));
        assert!(registry.uses_module_scoped_subjects("working_module"));
        assert!(registry.uses_module_scoped_subjects("faulty_module"));
    }

    #[test]
    fn schema_registry_reflects_loaded_modules() {
        let registry = ModuleRegistry::with_builtins();
        let schemas = registry.schema_registry();
        assert!(schemas.get("ping_module").is_some());
    }
}
