//! Layered configuration
//!
//! Merges four layers, later layers winning:
//! 1. Built-in defaults (zero-config local operation)
//! 2. Repository config file (`<REPO_DIR>/fdroid-repo.toml` or `--config`)
//! 3. Environment (`REPO_URL`, `REPO_NAME`, `KEYSTORE_PASS`, `KEY_PASS`,
//!    `REPO_DIR`, `REPO_BUCKET`, `REPO_BUCKET_PROVIDER`)
//! 4. CLI flags

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::{env_layer, BuiltinDefaults, CONFIG_FILE_NAME};
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers};
pub use settings::{
    BucketSettings, BuilderSettings, IdentitySettings, MirrorSettings, MirrorTarget,
    PublishSettings, ServeSettings, Settings, StoreProvider,
};
