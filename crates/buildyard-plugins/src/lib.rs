//! Built-in buildyard plugins.
//!
//! | name             | hook          | effect                                          |
//! |------------------|---------------|-------------------------------------------------|
//! | `all-branches`   | `pre_project` | expands a `*` branch list to the remote's heads |
//! | `clean-branches` | `pre_branch`  | removes untracked files from the working copy   |
//! | `trace`          | every hook    | logs the lifecycle                              |

pub mod all_branches;
pub mod clean_branches;
pub mod trace;

use buildyard_core::PluginCatalog;

pub use all_branches::AllBranches;
pub use clean_branches::CleanBranches;
pub use trace::TracePlugin;

/// Catalog with every built-in plugin registered under its configured name.
pub fn builtin_catalog() -> PluginCatalog {
    let mut catalog = PluginCatalog::new();
    catalog
        .register(all_branches::NAME, || Box::new(AllBranches::new()))
        .register(clean_branches::NAME, || Box::new(CleanBranches::new()))
        .register(trace::NAME, || Box::new(TracePlugin::new()));
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_names() {
        let catalog = builtin_catalog();
        assert_eq!(catalog.names(), vec!["all-branches", "clean-branches", "trace"]);
        for name in catalog.names() {
            let plugin = catalog.construct(name).expect("construct");
            assert_eq!(plugin.name(), name);
        }
    }
}
