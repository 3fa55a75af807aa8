use serde::Deserialize;

/// Configuration for the bucket storage backend.
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Which backend to use: `"local"` or `"memory"`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Root directory for the `local` backend. Each bucket is a
    /// subdirectory.
    #[serde(default = "default_storage_root")]
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            root: default_storage_root(),
        }
    }
}

fn default_storage_backend() -> String {
    "local".to_owned()
}

fn default_storage_root() -> String {
    "./buckets".to_owned()
}
