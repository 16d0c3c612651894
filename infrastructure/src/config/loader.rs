//! Configuration file loader with multi-source merging

use super::file_config::FileConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::{Path, PathBuf};

/// Project-level config file names, checked in order.
const PROJECT_CONFIG_FILES: [&str; 2] = ["pilot.toml", ".pilot.toml"];

/// Prefix of environment overrides (`PILOT_POOL__MAX_SESSIONS=4`).
const ENV_PREFIX: &str = "PILOT_";

/// Configuration loader that handles file discovery and merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from all sources with proper priority
    ///
    /// Priority (highest to lowest):
    /// 1. `PILOT_*` environment variables (`__` separates nesting)
    /// 2. Explicit config path (if provided)
    /// 3. Project root: `./pilot.toml` or `./.pilot.toml`
    /// 4. Global: `$XDG_CONFIG_HOME/copilot-pilot/config.toml`
    /// 5. Default values
    pub fn load(config_path: Option<&Path>) -> Result<FileConfig, Box<figment::Error>> {
        Self::load_with_global(Self::global_config_path().as_deref(), config_path)
    }

    fn load_with_global(
        global_path: Option<&Path>,
        config_path: Option<&Path>,
    ) -> Result<FileConfig, Box<figment::Error>> {
        if let Some(path) = config_path
            && !path.exists()
        {
            return Err(Box::new(figment::Error::from(format!(
                "config file not found: {}",
                path.display()
            ))));
        }
        Self::figment(global_path, config_path)
            .extract()
            .map_err(Box::new)
    }

    fn figment(global_path: Option<&Path>, config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(FileConfig::default()));

        if let Some(global_path) = global_path
            && global_path.exists()
        {
            figment = figment.merge(Toml::file(global_path));
        }

        if let Some(path) = Self::project_config_path() {
            figment = figment.merge(Toml::file(path));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load only default configuration (for --no-config)
    pub fn load_defaults() -> FileConfig {
        FileConfig::default()
    }

    /// Get the global config file path
    ///
    /// Returns `$XDG_CONFIG_HOME/copilot-pilot/config.toml` if set,
    /// otherwise the platform config directory.
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("copilot-pilot").join("config.toml"))
    }

    /// Get the project-level config file path (if it exists)
    pub fn project_config_path() -> Option<PathBuf> {
        PROJECT_CONFIG_FILES
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// Describe every config source, highest priority first.
    pub fn describe_sources(config_path: Option<&Path>) -> Vec<String> {
        let mark = |found: bool| if found { "[FOUND]" } else { "[     ]" };
        let mut lines = Vec::new();

        lines.push(format!("  [     ] Env:      {}*", ENV_PREFIX));

        if let Some(path) = config_path {
            lines.push(format!(
                "  {} Explicit: {}",
                mark(path.exists()),
                path.display()
            ));
        }

        match Self::project_config_path() {
            Some(path) => lines.push(format!("  {} Project:  {}", mark(true), path.display())),
            None => lines.push(format!(
                "  {} Project:  ./{} or ./{}",
                mark(false),
                PROJECT_CONFIG_FILES[0],
                PROJECT_CONFIG_FILES[1]
            )),
        }

        if let Some(path) = Self::global_config_path() {
            lines.push(format!(
                "  {} Global:   {}",
                mark(path.exists()),
                path.display()
            ));
        }

        lines.push("  [     ] Default:  built-in defaults".to_string());
        lines
    }

    /// Print the config file locations being used (for --show-config)
    pub fn print_config_sources(config_path: Option<&Path>) {
        println!("Configuration sources (in priority order):");
        for line in Self::describe_sources(config_path) {
            println!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_load_defaults() {
        let config = ConfigLoader::load_defaults();
        assert_eq!(config.pool.max_sessions, 5);
        assert!(config.mcp.load_default_config);
    }

    #[test]
    fn test_global_config_path_returns_some() {
        let path = ConfigLoader::global_config_path().unwrap();
        assert!(path.to_string_lossy().contains("copilot-pilot"));
    }

    #[test]
    fn test_layers_merge_in_priority_order() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "global.toml",
                "[service]\ndefault_model = \"gpt-5\"\ngrace_period_ms = 100\n",
            )?;
            jail.create_file("pilot.toml", "[service]\ngrace_period_ms = 200\n")?;
            jail.create_file("explicit.toml", "[pool]\nmax_sessions = 2\n")?;
            jail.set_env("PILOT_POOL__MAX_SESSIONS", "4");

            let config = ConfigLoader::load_with_global(
                Some(Path::new("global.toml")),
                Some(Path::new("explicit.toml")),
            )
            .map_err(|e| *e)?;

            assert_eq!(config.service.default_model.as_deref(), Some("gpt-5"));
            assert_eq!(config.service.grace_period_ms, 200);
            assert_eq!(config.pool.max_sessions, 4);
            assert_eq!(config.pool.idle_timeout_ms, 300_000);
            Ok(())
        });
    }

    #[test]
    fn test_hidden_project_file_is_used() {
        Jail::expect_with(|jail| {
            jail.create_file(".pilot.toml", "[mcp]\nload_default_config = false\n")?;
            let config = ConfigLoader::load_with_global(None, None).map_err(|e| *e)?;
            assert!(!config.mcp.load_default_config);
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        Jail::expect_with(|_jail| {
            let result = ConfigLoader::load_with_global(None, Some(Path::new("nope.toml")));
            assert!(result.is_err());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        Jail::expect_with(|jail| {
            jail.create_file("pilot.toml", "[pool]\nmax_sessions = \"many\"\n")?;
            assert!(ConfigLoader::load_with_global(None, None).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_describe_sources_lists_explicit_file() {
        let lines = ConfigLoader::describe_sources(Some(Path::new("/no/such/pilot.toml")));
        assert!(lines.iter().any(|l| l.contains("Explicit: /no/such/pilot.toml")));
        assert!(lines.last().unwrap().contains("built-in defaults"));
    }
}
