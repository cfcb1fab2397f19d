pub mod config;
pub mod copy;
pub mod encoder;
pub mod error;
pub mod models;
pub mod test_support;

pub use crate::config::LoaderConfig;
pub use crate::copy::{insert_with_copy, CopyLoader, LoadStats, TargetTable};
pub use crate::encoder::{encode_value, escape_text, Columns, RowEncoder, NULL_SENTINEL};
pub use crate::error::LoadError;
pub use crate::models::{Record, Value};

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Install the `env_logger` backend once; `RUST_LOG` overrides the default filter.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info,sqlx=warn")).init();
    });
}
