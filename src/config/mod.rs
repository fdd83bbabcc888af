//! Server configuration.
//!
//! Built-in defaults are deep-merged with an optional YAML file and then with
//! environment overrides:
//!
//! - `--config <path>` or `TW_CONFIG_PATH` selects the file (else `./config.yaml` if present)
//! - any leaf key can be overridden by `TW_` + its upper-cased path joined with `_`,
//!   e.g. `TW_SERVER_PORT=8080` or `TW_SCHEDULER_JOBS_DUE_FREQUENCY=1m`

mod loader;
mod merge;
mod types;

pub use loader::{CONFIG_PATH_ENV, ConfigLoader, ConfigTier, ENV_PREFIX, env_var_name};
pub use merge::{deep_merge, deep_merge_all};
pub use types::*;
