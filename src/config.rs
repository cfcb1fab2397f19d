use std::env;

const DEFAULT_CHUNK_BYTES: usize = 1024 * 1024;
const DEFAULT_STAGING_PREFIX: &str = "staging_";

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Runtime configuration for the COPY loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Encoded bytes buffered before each send on the COPY stream.
    pub copy_chunk_bytes: usize,
    /// Prefix of the per-load staging table name.
    pub staging_prefix: String,
}

impl LoaderConfig {
    /// Built-in defaults, ignoring the environment.
    pub fn new() -> Self {
        Self {
            copy_chunk_bytes: DEFAULT_CHUNK_BYTES,
            staging_prefix: DEFAULT_STAGING_PREFIX.to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self {
            copy_chunk_bytes: env_usize("COPY_LOADER_CHUNK_BYTES", DEFAULT_CHUNK_BYTES).max(1),
            staging_prefix: env_string("COPY_LOADER_STAGING_PREFIX", DEFAULT_STAGING_PREFIX),
        }
    }

    pub fn with_chunk_bytes(mut self, bytes: usize) -> Self {
        self.copy_chunk_bytes = bytes.max(1);
        self
    }

    pub fn with_staging_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.staging_prefix = prefix.into();
        self
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
