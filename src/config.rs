use serde::{Deserialize, Serialize};

use crate::logic::stitch::DEFAULT_MAX_DEPTH;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Recursion bound for relation stitching.
    pub max_depth: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            resolver: ResolverConfig::default(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `config` file and
    /// `STITCH_`-prefixed environment variables. Nesting in env vars uses a
    /// double underscore so multi-word field names survive: the stitch depth
    /// bound is `STITCH_RESOLVER__MAX_DEPTH`.
    pub fn load() -> anyhow::Result<Self> {
        // Load environment variables from .env file if it exists
        dotenvy::dotenv().ok();

        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("config").required(false));

        // Add environment variables with prefix "STITCH_"
        config = config.add_source(
            config::Environment::with_prefix("STITCH")
                .separator("__")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_the_stitch_depth_bound() {
        let config = AppConfig::default();
        assert_eq!(config.resolver.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn env_override_reaches_the_depth_bound() {
        std::env::set_var("STITCH_RESOLVER__MAX_DEPTH", "5");
        let config = AppConfig::load().unwrap();
        std::env::remove_var("STITCH_RESOLVER__MAX_DEPTH");
        assert_eq!(config.resolver.max_depth, 5);
    }
}
