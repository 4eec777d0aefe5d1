// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    discovery::ToolCommand,
    errors::{ConfigParseError, ConfigParseErrorKind},
    session::SessionCommand,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{
    Config, ConfigBuilder, ConfigError, Environment, File, FileFormat, builder::DefaultState,
};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{
    collections::BTreeSet,
    sync::{Arc, RwLock},
    time::Duration,
};
use suitelink_metadata::DiscoveryMode;
use swrite::{SWrite, swrite};
use tracing::{error, warn};

/// Trait for handling configuration warnings.
///
/// This trait allows for different warning handling strategies, such as logging warnings
/// (the default behavior) or collecting them for testing purposes.
pub trait ConfigWarnings {
    /// Handle unknown configuration keys found in a config source.
    fn unknown_config_keys(
        &mut self,
        source: &Utf8Path,
        workspace_root: &Utf8Path,
        unknown: &BTreeSet<String>,
    );
}

/// Default implementation of ConfigWarnings that logs warnings using the tracing crate.
pub struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(
        &mut self,
        source: &Utf8Path,
        workspace_root: &Utf8Path,
        unknown: &BTreeSet<String>,
    ) {
        let mut unknown_str = String::new();
        if let [single] = unknown.iter().collect::<Vec<_>>().as_slice() {
            // Print this on the same line.
            swrite!(unknown_str, "key: {single}");
        } else {
            unknown_str.push_str("keys:\n");
            for ignored_key in unknown {
                swrite!(unknown_str, "\n  - {ignored_key}");
            }
        }

        warn!(
            "in config {}, ignoring unknown configuration {unknown_str}",
            source.strip_prefix(workspace_root).unwrap_or(source),
        )
    }
}

/// Overall configuration for one workspace folder.
#[derive(Clone, Debug)]
pub struct SuitelinkConfig {
    workspace_root: Utf8PathBuf,
    inner: SuitelinkConfigImpl,
}

impl SuitelinkConfig {
    /// The default location of the config within the workspace folder.
    pub const CONFIG_PATH: &'static str = ".config/suitelink.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Workspace-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Environment configuration uses this prefix, plus `__`.
    pub const ENVIRONMENT_PREFIX: &'static str = "SUITELINK";

    /// The label used in warnings about environment variables.
    const ENVIRONMENT_LABEL: &'static str = "<environment>";

    /// Reads the config for the given workspace folder.
    ///
    /// `.config/suitelink.toml` is read if it exists. `config_file`, if specified, is layered on
    /// top and must exist. Environment variables are layered on top of both.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let env = std::env::vars().collect();
        Self::from_sources_with_warnings(
            workspace_root,
            config_file,
            env,
            &mut DefaultConfigWarnings,
        )
    }

    /// Load configuration from the given sources with custom warning handling.
    ///
    /// `env` stands in for the process environment.
    pub fn from_sources_with_warnings(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        env: config::Map<String, String>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let inner = Self::read_from_sources(&workspace_root, config_file, env, warnings)?;
        Ok(Self {
            workspace_root,
            inner,
        })
    }

    /// Returns the config consisting of only the embedded defaults.
    pub fn embedded_default(workspace_root: impl Into<Utf8PathBuf>) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config, _unknown) = Self::build_and_deserialize_config(&Self::make_default_config())
            .map_err(|kind| ConfigParseError::new("<default config>", kind))?;
        let inner = config.into_config_impl("<default config>")?;
        Ok(Self {
            workspace_root,
            inner,
        })
    }

    /// Returns the workspace folder this config applies to.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the command used to invoke the discovery tool.
    pub fn tool_command(&self) -> ToolCommand {
        ToolCommand {
            program: self.inner.tool.program.clone(),
            args: self.inner.tool.args.clone(),
            profiles: self.inner.discovery.profiles.clone(),
            default_paths: self.inner.discovery.default_paths.clone(),
        }
    }

    /// Returns the command used to host a run session.
    pub fn session_command(&self) -> SessionCommand {
        SessionCommand {
            program: self.inner.session.program.clone(),
            args: self.inner.session.args.clone(),
        }
    }

    /// Returns the debug-session type embedded in launch configurations.
    pub fn session_type(&self) -> &str {
        &self.inner.session.session_type
    }

    /// Returns the mode used for workspace-wide discovery.
    pub fn discovery_mode(&self) -> DiscoveryMode {
        self.inner.discovery.mode
    }

    /// Returns how long file and document changes are debounced.
    pub fn debounce(&self) -> Duration {
        self.inner.discovery.debounce
    }

    /// Returns the environment check command, split into words. Empty if no check is configured.
    pub fn environment_check(&self) -> &[String] {
        &self.inner.environment_check
    }

    /// Returns true if `path` is a test source, judged by its extension.
    pub fn is_test_source(&self, path: &Utf8Path) -> bool {
        path.extension()
            .is_some_and(|ext| self.inner.watch.extensions.iter().any(|e| e == ext))
    }

    /// Returns true if changes to `path` invalidate the whole workspace.
    pub fn is_project_file(&self, path: &Utf8Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.inner.watch.project_files.iter().any(|f| f == name))
    }

    /// Returns the configured run profiles, in definition order.
    pub fn run_profiles(&self) -> &IndexMap<String, RunProfileConfig> {
        &self.inner.run_profiles
    }

    // ---
    // Helper methods
    // ---

    fn read_from_sources(
        workspace_root: &Utf8Path,
        file: Option<&Utf8Path>,
        env: config::Map<String, String>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<SuitelinkConfigImpl, ConfigParseError> {
        // First, get the default config.
        let mut composite_builder = Self::make_default_config();

        // Next, the workspace config, then the explicit one.
        let workspace_file = workspace_root.join(Self::CONFIG_PATH);
        let workspace_source = File::new(workspace_file.as_str(), FileFormat::Toml).required(false);
        Self::check_individual_source(
            workspace_root,
            &workspace_file,
            workspace_source.clone(),
            warnings,
        )?;
        composite_builder = composite_builder.add_source(workspace_source);

        let mut last_file = workspace_file;
        if let Some(file) = file {
            let source = File::new(file.as_str(), FileFormat::Toml);
            Self::check_individual_source(workspace_root, file, source.clone(), warnings)?;
            composite_builder = composite_builder.add_source(source);
            last_file = file.to_owned();
        }

        // Finally, the environment.
        let env_source = Environment::with_prefix(Self::ENVIRONMENT_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .source(Some(env));
        Self::check_individual_source(
            workspace_root,
            Utf8Path::new(Self::ENVIRONMENT_LABEL),
            env_source.clone(),
            warnings,
        )?;
        composite_builder = composite_builder.add_source(env_source);

        // The unknown set is ignored here because any values in it have already been reported in
        // check_individual_source.
        let (config, _unknown) = Self::build_and_deserialize_config(&composite_builder)
            .map_err(|kind| ConfigParseError::new(&last_file, kind))?;
        config.into_config_impl(&last_file)
    }

    fn check_individual_source<S>(
        workspace_root: &Utf8Path,
        label: &Utf8Path,
        source: S,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<(), ConfigParseError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        // Build the default config plus this source alone, for good error attribution.
        let this_builder = Self::make_default_config().add_source(source);
        let (_config, unknown) = Self::build_and_deserialize_config(&this_builder)
            .map_err(|kind| ConfigParseError::new(label, kind))?;

        if !unknown.is_empty() {
            warnings.unknown_config_keys(label, workspace_root, &unknown);
        }
        Ok(())
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(SuitelinkConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: SuitelinkConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // Both serde_path_to_error and the config crate report the key. Drop the key from
                // the config error for consistency.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

/// Per-workspace configs, shared between the refresh and run paths.
#[derive(Debug)]
pub struct WorkspaceConfigs {
    config_file: Option<Utf8PathBuf>,
    configs: RwLock<IndexMap<Utf8PathBuf, Arc<SuitelinkConfig>>>,
}

impl WorkspaceConfigs {
    /// Creates an empty set of configs. `config_file` is layered on top of every workspace's own
    /// config.
    pub fn new(config_file: Option<Utf8PathBuf>) -> Self {
        Self {
            config_file,
            configs: RwLock::new(IndexMap::new()),
        }
    }

    /// Loads (or reloads) the config for a workspace folder.
    ///
    /// On failure the error is logged and the embedded defaults are used, so that a typo in a
    /// config file does not take the workspace offline.
    pub fn load(&self, workspace: &Utf8Path) -> Arc<SuitelinkConfig> {
        let config = match SuitelinkConfig::from_sources(workspace, self.config_file.as_deref()) {
            Ok(config) => config,
            Err(err) => {
                error!(
                    "{}, using default config for `{workspace}`",
                    crate::errors::DisplayErrorChain(&err)
                );
                match SuitelinkConfig::embedded_default(workspace) {
                    Ok(config) => config,
                    Err(err) => {
                        error!("{}", crate::errors::DisplayErrorChain(&err));
                        return self.get_or_insert_missing(workspace);
                    }
                }
            }
        };
        self.insert(Arc::new(config))
    }

    /// Inserts an already-parsed config, replacing any previous config for its workspace.
    pub fn insert(&self, config: Arc<SuitelinkConfig>) -> Arc<SuitelinkConfig> {
        let mut configs = self.configs.write().unwrap_or_else(|err| err.into_inner());
        configs.insert(config.workspace_root.clone(), config.clone());
        config
    }

    /// Reloads the config of every known workspace.
    pub fn reload_all(&self) {
        for workspace in self.workspaces() {
            self.load(&workspace);
        }
    }

    /// Removes the config for a workspace folder.
    pub fn remove(&self, workspace: &Utf8Path) {
        let mut configs = self.configs.write().unwrap_or_else(|err| err.into_inner());
        configs.shift_remove(workspace);
    }

    /// Returns the config for a workspace folder, if loaded.
    pub fn get(&self, workspace: &Utf8Path) -> Option<Arc<SuitelinkConfig>> {
        let configs = self.configs.read().unwrap_or_else(|err| err.into_inner());
        configs.get(workspace).cloned()
    }

    /// Returns the workspace folders with a loaded config.
    pub fn workspaces(&self) -> Vec<Utf8PathBuf> {
        let configs = self.configs.read().unwrap_or_else(|err| err.into_inner());
        configs.keys().cloned().collect()
    }

    fn get_or_insert_missing(&self, workspace: &Utf8Path) -> Arc<SuitelinkConfig> {
        // The embedded defaults failed to parse, which only happens with a broken build. Keep
        // whatever was loaded before.
        match self.get(workspace) {
            Some(config) => config,
            None => self.insert(Arc::new(SuitelinkConfig {
                workspace_root: workspace.to_owned(),
                inner: SuitelinkConfigImpl::minimal(),
            })),
        }
    }
}

#[derive(Clone, Debug)]
struct SuitelinkConfigImpl {
    tool: ToolConfig,
    discovery: DiscoveryConfig,
    session: SessionConfig,
    environment_check: Vec<String>,
    watch: WatchConfig,
    run_profiles: IndexMap<String, RunProfileConfig>,
}

impl SuitelinkConfigImpl {
    fn minimal() -> Self {
        Self {
            tool: ToolConfig {
                program: "robotcode".to_owned(),
                args: Vec::new(),
            },
            discovery: DiscoveryConfig {
                mode: DiscoveryMode::All,
                debounce: Duration::from_secs(1),
                default_paths: Vec::new(),
                profiles: Vec::new(),
            },
            session: SessionConfig {
                session_type: "robotcode".to_owned(),
                program: "robotcode".to_owned(),
                args: Vec::new(),
            },
            environment_check: Vec::new(),
            watch: WatchConfig {
                extensions: Vec::new(),
                project_files: Vec::new(),
            },
            run_profiles: IndexMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SuitelinkConfigDeserialize {
    tool: ToolConfig,
    discovery: DiscoveryConfig,
    session: SessionConfig,
    environment: EnvironmentConfig,
    watch: WatchConfig,
    #[serde(default)]
    run_profile: IndexMap<String, RunProfileConfig>,
}

impl SuitelinkConfigDeserialize {
    fn into_config_impl(
        self,
        config_file: impl AsRef<Utf8Path>,
    ) -> Result<SuitelinkConfigImpl, ConfigParseError> {
        let config_file = config_file.as_ref();
        let environment_check = shell_words::split(&self.environment.check).map_err(|err| {
            ConfigParseError::new(
                config_file,
                ConfigParseErrorKind::InvalidCommand {
                    key: "environment.check",
                    command: self.environment.check.clone(),
                    err,
                },
            )
        })?;

        let defaults: Vec<_> = self
            .run_profile
            .iter()
            .filter(|(_, profile)| profile.default)
            .map(|(name, _)| name.clone())
            .collect();
        if defaults.len() != 1 {
            return Err(ConfigParseError::new(
                config_file,
                ConfigParseErrorKind::DefaultRunProfile(defaults),
            ));
        }

        Ok(SuitelinkConfigImpl {
            tool: self.tool,
            discovery: self.discovery,
            session: self.session,
            environment_check,
            watch: self.watch,
            run_profiles: self.run_profile,
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ToolConfig {
    program: String,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DiscoveryConfig {
    mode: DiscoveryMode,
    #[serde(with = "humantime_serde")]
    debounce: Duration,
    #[serde(default)]
    default_paths: Vec<String>,
    #[serde(default)]
    profiles: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SessionConfig {
    #[serde(rename = "type")]
    session_type: String,
    program: String,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct EnvironmentConfig {
    #[serde(default)]
    check: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct WatchConfig {
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(default)]
    project_files: Vec<String>,
}

/// A run profile as written in configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunProfileConfig {
    /// A human-readable description.
    #[serde(default)]
    pub description: Option<String>,

    /// Run without attaching the debugger.
    #[serde(default)]
    pub no_debug: bool,

    /// True for the profile used when none is specified.
    #[serde(default)]
    pub default: bool,

    /// Only run tests carrying one of these tags.
    #[serde(default)]
    pub include_tags: Vec<String>,

    /// Skip tests carrying any of these tags.
    #[serde(default)]
    pub exclude_tags: Vec<String>,

    /// Extra arguments forwarded to the tool.
    #[serde(default)]
    pub args: Vec<String>,
}
