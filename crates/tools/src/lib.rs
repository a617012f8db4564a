//! Developer tooling: read-only inspection of a snapshot registry.
//!
//! # Invariants
//! - Tools never mutate the registry they inspect.

mod inspector;

pub use inspector::{ModelInfo, RegistryInspector, RegistrySummary};

pub fn crate_info() -> &'static str {
    concat!("snapreg-tools v", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("tools"));
    }
}
