//! Backend registry.
//!
//! Maps backend names to [`VolumeBackend`] instances.  It is built once at
//! startup and never mutated afterwards, so it can be shared freely behind
//! an [`Arc`].
//!
//! The reserved name [`DEFAULT_BACKEND`] always aliases the first configured
//! pool; requests that do not name a backend resolve to it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::backend::{BackendKind, FakeBackend, LvmBackend, VolumeBackend, lvm};
use crate::error::CsiError;
use crate::exec::Exec;
use crate::handle::HANDLE_SEPARATOR;

/// Name under which the default backend is registered.
pub const DEFAULT_BACKEND: &str = "default";

/// Immutable name → backend mapping.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn VolumeBackend>>,
    /// Distinct pools in configuration order (aliases excluded).
    pools: Vec<String>,
}

impl BackendRegistry {
    /// Build the registry for `kind` over the ordered `pools`.
    ///
    /// * `lvm`: one backend per volume group; the first is also `"default"`.
    /// * `fake`: a single stateless backend bound to `"default"`;
    ///   `pools` is ignored.
    pub fn new(
        kind: BackendKind,
        pools: &[String],
        exec: Arc<dyn Exec>,
        fake_capacity_bytes: u64,
    ) -> Result<Self, CsiError> {
        let registry = match kind {
            BackendKind::Lvm => {
                let entries = pools
                    .iter()
                    .map(|vg| {
                        let backend: Arc<dyn VolumeBackend> = Arc::new(LvmBackend::new(
                            vg.clone(),
                            lvm::DEFAULT_ROOT_PATH,
                            Arc::clone(&exec),
                        ));
                        (vg.clone(), backend)
                    })
                    .collect();
                Self::from_pools(entries)?
            }
            BackendKind::Fake => Self::single(Arc::new(FakeBackend::new(fake_capacity_bytes))),
        };
        info!(%kind, pools = ?registry.pools, "backend registry initialized");
        Ok(registry)
    }

    /// Build a registry from named pools; the first becomes the default.
    pub fn from_pools(entries: Vec<(String, Arc<dyn VolumeBackend>)>) -> Result<Self, CsiError> {
        if entries.is_empty() {
            return Err(CsiError::Configuration(
                "at least one storage pool is required".into(),
            ));
        }

        let mut backends: HashMap<String, Arc<dyn VolumeBackend>> = HashMap::new();
        let mut pools = Vec::with_capacity(entries.len());
        for (i, (name, backend)) in entries.into_iter().enumerate() {
            if name.is_empty() || name.contains(HANDLE_SEPARATOR) {
                return Err(CsiError::Configuration(format!(
                    "invalid pool name {name:?}"
                )));
            }
            // "default" may only name the first pool, where it is the alias anyway.
            if backends.contains_key(&name) || (i > 0 && name == DEFAULT_BACKEND) {
                return Err(CsiError::Configuration(format!(
                    "duplicate pool name {name:?}"
                )));
            }
            if i == 0 {
                backends.insert(DEFAULT_BACKEND.to_owned(), Arc::clone(&backend));
            }
            backends.insert(name.clone(), backend);
            pools.push(name);
        }
        Ok(Self { backends, pools })
    }

    /// A registry holding only `backend`, bound to `"default"`.
    pub fn single(backend: Arc<dyn VolumeBackend>) -> Self {
        Self {
            backends: HashMap::from([(DEFAULT_BACKEND.to_owned(), backend)]),
            pools: vec![DEFAULT_BACKEND.to_owned()],
        }
    }

    /// Resolve `name` (or the default when `None`).
    ///
    /// Returns the name the backend is registered under, which is what gets
    /// recorded in volume handles.
    pub fn resolve<'a>(
        &'a self,
        name: Option<&'a str>,
    ) -> Result<(&'a str, &'a Arc<dyn VolumeBackend>), CsiError> {
        let name = name.unwrap_or(DEFAULT_BACKEND);
        self.backends
            .get(name)
            .map(|backend| (name, backend))
            .ok_or_else(|| CsiError::BackendNotFound(name.to_owned()))
    }

    /// The pool `name` refers to: `"default"` resolves to the first
    /// configured pool, any other name to itself.
    ///
    /// Handles minted through the alias and through the pool name address
    /// the same volumes; use this to compare or lock on them.
    pub fn canonical_name<'a>(&'a self, name: &'a str) -> &'a str {
        match self.pools.first() {
            Some(first) if name == DEFAULT_BACKEND => first,
            _ => name,
        }
    }

    /// Distinct pools in configuration order, without the default alias
    /// (unless the default is the only entry).
    pub fn pools(&self) -> impl Iterator<Item = (&str, &Arc<dyn VolumeBackend>)> {
        self.pools
            .iter()
            .filter_map(|name| self.backends.get(name).map(|b| (name.as_str(), b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GIB;
    use crate::exec::HostExec;

    fn exec() -> Arc<dyn Exec> {
        Arc::new(HostExec)
    }

    fn names(pools: &[&str]) -> Vec<String> {
        pools.iter().map(|p| (*p).to_owned()).collect()
    }

    #[test]
    fn lvm_pools_alias_first_as_default() {
        let registry =
            BackendRegistry::new(BackendKind::Lvm, &names(&["vg0", "vg1"]), exec(), 0).unwrap();

        let (name, default) = registry.resolve(None).unwrap();
        assert_eq!(name, DEFAULT_BACKEND);
        let (_, vg0) = registry.resolve(Some("vg0")).unwrap();
        let (_, vg1) = registry.resolve(Some("vg1")).unwrap();
        assert!(Arc::ptr_eq(default, vg0));
        assert!(!Arc::ptr_eq(vg0, vg1));

        let pools: Vec<_> = registry.pools().map(|(n, _)| n).collect();
        assert_eq!(pools, vec!["vg0", "vg1"]);
    }

    #[test]
    fn default_canonicalizes_to_first_pool() {
        let registry =
            BackendRegistry::new(BackendKind::Lvm, &names(&["vg0", "vg1"]), exec(), 0).unwrap();
        assert_eq!(registry.canonical_name(DEFAULT_BACKEND), "vg0");
        assert_eq!(registry.canonical_name("vg0"), "vg0");
        assert_eq!(registry.canonical_name("vg1"), "vg1");

        let fake = BackendRegistry::new(BackendKind::Fake, &[], exec(), 0).unwrap();
        assert_eq!(fake.canonical_name(DEFAULT_BACKEND), DEFAULT_BACKEND);
    }

    #[test]
    fn unknown_backend_name() {
        let registry = BackendRegistry::new(BackendKind::Lvm, &names(&["vg0"]), exec(), 0).unwrap();
        let err = registry.resolve(Some("vg9")).err().unwrap();
        assert!(matches!(err, CsiError::BackendNotFound(n) if n == "vg9"));
    }

    #[tokio::test]
    async fn fake_kind_binds_default_only() {
        let registry =
            BackendRegistry::new(BackendKind::Fake, &names(&["ignored"]), exec(), 5 * GIB).unwrap();
        assert!(registry.resolve(Some("ignored")).is_err());
        let (name, backend) = registry.resolve(None).unwrap();
        assert_eq!(name, DEFAULT_BACKEND);
        assert_eq!(backend.capacity().await.unwrap(), 5 * GIB);
        assert_eq!(registry.pools().count(), 1);
    }

    #[test]
    fn lvm_without_pools_is_configuration_error() {
        let err = BackendRegistry::new(BackendKind::Lvm, &[], exec(), 0).err().unwrap();
        assert!(matches!(err, CsiError::Configuration(_)));
    }

    #[test]
    fn invalid_pool_names_rejected() {
        for pools in [&["vg0", "vg0"][..], &["vg/0"], &[""], &["vg0", "default"]] {
            let err = BackendRegistry::new(BackendKind::Lvm, &names(pools), exec(), 0)
                .err()
                .unwrap();
            assert!(matches!(err, CsiError::Configuration(_)), "{pools:?}");
        }
    }
}
