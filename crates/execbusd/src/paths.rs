use std::path::PathBuf;

/// File locations for one daemon instance.
///
/// State (socket, pid file) lives under `$XDG_STATE_HOME/<app>`, config
/// under `$XDG_CONFIG_HOME/<app>`, with the usual `~/.local/state` and
/// `~/.config` fallbacks.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
	pub app_name: String,
	socket: Option<PathBuf>,
}

impl DaemonPaths {
	pub fn new(app_name: impl Into<String>) -> Self {
		Self {
			app_name: app_name.into(),
			socket: None,
		}
	}

	/// Uses `socket` instead of the state-dir default.
	pub fn with_socket(mut self, socket: impl Into<PathBuf>) -> Self {
		self.socket = Some(socket.into());
		self
	}

	pub fn state_dir(&self) -> PathBuf {
		if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
			PathBuf::from(dir).join(&self.app_name)
		} else if let Some(home) = home_dir() {
			home.join(".local").join("state").join(&self.app_name)
		} else {
			PathBuf::from("/tmp").join(&self.app_name)
		}
	}

	pub fn config_dir(&self) -> PathBuf {
		if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
			PathBuf::from(dir).join(&self.app_name)
		} else if let Some(home) = home_dir() {
			home.join(".config").join(&self.app_name)
		} else {
			PathBuf::from("/tmp").join(&self.app_name).join("config")
		}
	}

	pub fn config_path(&self) -> PathBuf {
		self.config_dir().join("config.toml")
	}

	pub fn socket_path(&self) -> PathBuf {
		match &self.socket {
			Some(path) => path.clone(),
			None => self.state_dir().join("daemon.sock"),
		}
	}

	pub fn pid_path(&self) -> PathBuf {
		self.state_dir().join("daemon.pid")
	}

	/// Pid written by a running daemon, if any.
	pub fn read_pid(&self) -> Option<i32> {
		std::fs::read_to_string(self.pid_path())
			.ok()
			.and_then(|s| s.trim().parse().ok())
	}
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}
