use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorConfig {
	/// Events buffered per subscriber before the oldest is dropped.
	#[serde(default = "default_queue_capacity")]
	pub queue_capacity: usize,
	/// Largest chunk a single stdout/stderr event can carry.
	#[serde(default = "default_read_buffer_size")]
	pub read_buffer_size: usize,
	/// Interpreter that receives the command line via `-c`.
	#[serde(default = "default_shell")]
	pub shell: PathBuf,
	/// How long `process_died` waits for the output pipes to drain.
	#[serde(default = "default_output_drain_timeout_ms")]
	pub output_drain_timeout_ms: u64,
	/// Delay between SIGTERM and SIGKILL on kill.
	#[serde(default = "default_kill_grace_secs")]
	pub kill_grace_secs: u64,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			queue_capacity: default_queue_capacity(),
			read_buffer_size: default_read_buffer_size(),
			shell: default_shell(),
			output_drain_timeout_ms: default_output_drain_timeout_ms(),
			kill_grace_secs: default_kill_grace_secs(),
		}
	}
}

impl SupervisorConfig {
	pub fn output_drain_timeout(&self) -> Duration {
		Duration::from_millis(self.output_drain_timeout_ms)
	}

	pub fn kill_grace(&self) -> Duration {
		Duration::from_secs(self.kill_grace_secs)
	}
}

fn default_queue_capacity() -> usize { 1024 }
fn default_read_buffer_size() -> usize { 4096 }
fn default_shell() -> PathBuf { PathBuf::from("/bin/sh") }
fn default_output_drain_timeout_ms() -> u64 { 500 }
fn default_kill_grace_secs() -> u64 { 3 }
