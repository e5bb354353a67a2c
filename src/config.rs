use std::{env, path::PathBuf};

pub const DEFAULT_CORLIB: &str = "mscorlib";

pub const CORLIB_ENV: &str = "DOTNET_EMBED_CORLIB";
pub const ASSEMBLY_ROOT_ENV: &str = "DOTNET_EMBED_ASSEMBLIES";
pub const NATIVE_LIBRARY_ROOT_ENV: &str = "DOTNET_EMBED_NATIVE_LIBS";

/// Host-supplied settings consumed by [`RuntimeBuilder`](crate::RuntimeBuilder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Assembly name loaded at initialization; its module answers `is_corlib`.
    pub corlib_name: String,
    /// Directory searched for `<name>.dll` when no custom resolver is supplied.
    pub assembly_root: Option<PathBuf>,
    /// Directory searched for P/Invoke target libraries.
    pub native_library_root: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            corlib_name: DEFAULT_CORLIB.to_string(),
            assembly_root: None,
            native_library_root: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `DOTNET_EMBED_CORLIB`, `DOTNET_EMBED_ASSEMBLIES` and
    /// `DOTNET_EMBED_NATIVE_LIBS` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(corlib) = env::var(CORLIB_ENV) {
            if !corlib.is_empty() {
                config.corlib_name = corlib;
            }
        }
        config.assembly_root = env::var_os(ASSEMBLY_ROOT_ENV).map(PathBuf::from);
        config.native_library_root = env::var_os(NATIVE_LIBRARY_ROOT_ENV).map(PathBuf::from);
        config
    }

    pub fn with_corlib(mut self, name: impl Into<String>) -> Self {
        self.corlib_name = name.into();
        self
    }

    pub fn with_assembly_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.assembly_root = Some(root.into());
        self
    }

    pub fn with_native_library_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.native_library_root = Some(root.into());
        self
    }
}
