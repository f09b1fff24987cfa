use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};

use execbus::Supervisor;

use crate::config::GlobalConfig;
use crate::paths::DaemonPaths;
use crate::server;

pub struct Daemon {
	pub paths: DaemonPaths,
	pub config: GlobalConfig,
}

impl Daemon {
	/// A `[daemon] socket` entry in `config` wins over the default location.
	pub fn new(paths: DaemonPaths, config: GlobalConfig) -> Self {
		let paths = match &config.daemon.socket {
			Some(socket) => paths.with_socket(socket.clone()),
			None => paths,
		};
		Self { paths, config }
	}

	pub fn socket_path(&self) -> PathBuf {
		self.paths.socket_path()
	}

	/// Serves until SIGINT or SIGTERM, then stops every supervised process.
	pub async fn run(&self) -> io::Result<()> {
		std::fs::create_dir_all(self.paths.state_dir())?;
		if let Some(parent) = self.socket_path().parent() {
			std::fs::create_dir_all(parent)?;
		}

		std::fs::write(self.paths.pid_path(), std::process::id().to_string())?;

		let socket_path = self.socket_path();
		if socket_path.exists() {
			let _ = std::fs::remove_file(&socket_path);
		}

		let listener = UnixListener::bind(&socket_path)?;
		let mut terminate = signal(SignalKind::terminate())?;
		let supervisor = Supervisor::new(self.config.supervisor.clone());

		tracing::info!("daemon started (pid {})", std::process::id());
		tracing::info!("listening on {}", socket_path.display());

		let server_handle = tokio::spawn(server::serve(listener, Arc::clone(&supervisor)));

		tokio::select! {
			_ = server_handle => {},
			_ = tokio::signal::ctrl_c() => {
				tracing::info!("shutting down");
			}
			_ = terminate.recv() => {
				tracing::info!("terminated, shutting down");
			}
		}

		supervisor.shutdown();
		self.cleanup();
		Ok(())
	}

	pub fn cleanup(&self) {
		let _ = std::fs::remove_file(self.socket_path());
		let _ = std::fs::remove_file(self.paths.pid_path());
	}

	/// Sends SIGTERM to the daemon recorded in the pid file.
	pub fn stop(&self) -> Result<(), String> {
		use nix::sys::signal::{kill, Signal};
		use nix::unistd::Pid;

		let Some(pid) = self.paths.read_pid() else {
			return Err("daemon not running".to_string());
		};
		kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(|e| format!("failed to stop daemon: {}", e))?;
		Ok(())
	}
}
