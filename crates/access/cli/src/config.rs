use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use nexum_access::AccessConfig;

/// File read when no `--config` is given
const DEFAULT_CONFIG_FILE: &str = "nexum-access.toml";

/// Environment variable prefix; nested keys are separated by `__`
const ENV_PREFIX: &str = "NEXUM_ACCESS_";

/// Defaults, then the TOML file, then the environment
fn figment(path: Option<&Path>) -> Figment {
    Figment::from(Serialized::defaults(AccessConfig::default()))
        .merge(Toml::file(path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE))))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

pub(crate) fn load_config(path: Option<&Path>) -> eyre::Result<AccessConfig> {
    Ok(figment(path).extract()?)
}
