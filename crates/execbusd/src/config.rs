use serde::Deserialize;
use std::path::{Path, PathBuf};

use execbus::SupervisorConfig;

// ── config.toml ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct GlobalConfig {
	#[serde(default)]
	pub supervisor: SupervisorConfig,
	#[serde(default)]
	pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct DaemonConfig {
	/// Overrides the socket location under the state dir.
	pub socket: Option<PathBuf>,
}

pub fn parse_config(content: &str) -> Result<GlobalConfig, toml::de::Error> {
	toml::from_str(content)
}

/// Missing file means defaults. A file that can't be read or parsed is
/// reported and also falls back to defaults.
pub fn load_global_config(path: &Path) -> GlobalConfig {
	if path.exists() {
		match std::fs::read_to_string(path) {
			Ok(content) => match parse_config(&content) {
				Ok(config) => return config,
				Err(e) => tracing::warn!("failed to parse {}: {}", path.display(), e),
			},
			Err(e) => tracing::warn!("failed to read {}: {}", path.display(), e),
		}
	}
	GlobalConfig::default()
}
