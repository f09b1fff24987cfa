use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};

use crate::config::SupervisorConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::events::{EventKinds, ProcessSubscribedBody};
use crate::monitor::LifecycleMonitor;
use crate::output::{OutputCapture, OutputStream};
use crate::process::{ProcessRecord, ProcessTable};
use crate::queue::EventStream;
use crate::types::{IdAllocator, ProcessId, ProcessState, SubscriberId};

/// What to run. The command line goes to the configured shell via `-c`.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
	pub name: String,
	pub command_line: String,
	pub env: HashMap<String, String>,
	/// Subscription registered before the process starts, so the subscriber
	/// sees `process_started` and all output.
	pub subscribe: Option<(SubscriberId, EventKinds)>,
}

impl LaunchSpec {
	pub fn new(name: impl Into<String>, command_line: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			command_line: command_line.into(),
			..Default::default()
		}
	}

	pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env.insert(key.into(), value.into());
		self
	}

	pub fn subscribe(mut self, subscriber: SubscriberId, kinds: EventKinds) -> Self {
		self.subscribe = Some((subscriber, kinds));
		self
	}
}

/// Entry point of the event bus: owns the process table and the dispatcher.
///
/// Starts empty. [`Supervisor::shutdown`] terminates running processes and
/// drops every record, subscription and stream.
pub struct Supervisor {
	config: SupervisorConfig,
	pids: IdAllocator,
	table: Arc<ProcessTable>,
	dispatcher: Arc<Dispatcher>,
}

impl Supervisor {
	pub fn new(config: SupervisorConfig) -> Arc<Self> {
		let dispatcher = Arc::new(Dispatcher::new(config.queue_capacity));
		Arc::new(Self {
			config,
			pids: IdAllocator::new(),
			table: Arc::new(ProcessTable::new()),
			dispatcher,
		})
	}

	pub fn config(&self) -> &SupervisorConfig {
		&self.config
	}

	pub fn dispatcher(&self) -> &Dispatcher {
		&self.dispatcher
	}

	/// Registers a new subscriber. Its id is [`EventStream::subscriber`].
	pub fn connect(&self) -> EventStream {
		self.dispatcher.connect()
	}

	pub fn disconnect(&self, subscriber: SubscriberId) {
		self.dispatcher.disconnect(subscriber);
	}

	/// Starts a process and returns its id once the OS has created it.
	///
	/// A spawn failure is returned here and produces no events.
	pub async fn launch(&self, spec: LaunchSpec) -> Result<ProcessId> {
		if let Some((subscriber, _)) = spec.subscribe {
			if !self.dispatcher.is_connected(subscriber) {
				return Err(Error::UnknownSubscriber(subscriber));
			}
		}

		let pid: ProcessId = self.pids.allocate();
		self.table.insert(ProcessRecord::new(pid, &spec.name, &spec.command_line));

		let mut child = match self.spawn_process(&spec) {
			Ok(child) => child,
			Err(source) => {
				self.table.remove(pid);
				tracing::warn!(pid = %pid, name = %spec.name, "launch failed: {}", source);
				return Err(Error::Launch {
					name: spec.name,
					source,
				});
			}
		};

		if let Some((subscriber, kinds)) = spec.subscribe {
			// Subscriber may have gone away since the check above; the process runs regardless.
			if let Err(e) = self.dispatcher.subscribe(subscriber, pid, kinds) {
				tracing::debug!(pid = %pid, "launch subscription skipped: {}", e);
			}
		}

		let monitor = LifecycleMonitor::new(
			pid,
			Arc::clone(&self.table),
			Arc::clone(&self.dispatcher),
			self.config.output_drain_timeout(),
		);
		if let Err(e) = start_or_kill(&monitor, &mut child) {
			tokio::spawn(async move {
				let _ = child.wait().await;
			});
			return Err(e);
		}

		let mut capturers = Vec::with_capacity(2);
		if let Some(stdout) = child.stdout.take() {
			capturers.push(self.capture(pid, OutputStream::Stdout).spawn(stdout));
		}
		if let Some(stderr) = child.stderr.take() {
			capturers.push(self.capture(pid, OutputStream::Stderr).spawn(stderr));
		}

		tokio::spawn(monitor.watch(child, capturers));
		Ok(pid)
	}

	/// Subscribes to a known process, exited or not. Returns the body of the
	/// `subscribed` event that was queued for the subscriber.
	pub fn subscribe(
		&self,
		subscriber: SubscriberId,
		pid: ProcessId,
		kinds: EventKinds,
	) -> Result<ProcessSubscribedBody> {
		if !self.table.contains(pid) {
			return Err(Error::NotFound(pid));
		}
		let body = self.dispatcher.subscribe(subscriber, pid, kinds)?;
		// An exited process publishes nothing more; the acknowledgement stays queued.
		if self.table.get(pid).is_some_and(|r| r.state == ProcessState::Exited) {
			self.dispatcher.forget_process(pid);
		}
		Ok(body)
	}

	/// See [`Dispatcher::unsubscribe`]: unread events for `pid` are discarded.
	pub fn unsubscribe(&self, subscriber: SubscriberId, pid: ProcessId) {
		self.dispatcher.unsubscribe(subscriber, pid);
	}

	pub fn status(&self, pid: ProcessId) -> Result<ProcessRecord> {
		self.table.get(pid).ok_or(Error::NotFound(pid))
	}

	pub fn list(&self, include_exited: bool) -> Vec<ProcessRecord> {
		self.table.list(include_exited)
	}

	/// SIGTERM to the process group, SIGKILL after the grace period if it is
	/// still running. No-op for a process that already exited.
	pub async fn kill(&self, pid: ProcessId) -> Result<()> {
		let record = self.status(pid)?;
		let Some(native_pid) = record.native_pid.filter(|_| record.is_running()) else {
			return Ok(());
		};

		signal_group(pid, native_pid, nix::sys::signal::Signal::SIGTERM)?;
		tracing::info!(pid = %pid, native_pid, "sent SIGTERM");

		let table = Arc::clone(&self.table);
		let grace = self.config.kill_grace();
		tokio::spawn(async move {
			tokio::time::sleep(grace).await;
			if table.get(pid).is_some_and(|r| r.is_running()) {
				if let Err(e) = signal_group(pid, native_pid, nix::sys::signal::Signal::SIGKILL) {
					tracing::warn!("{}", e);
				}
			}
		});
		Ok(())
	}

	pub fn shutdown(&self) {
		for record in self.table.list(false) {
			if let (true, Some(native_pid)) = (record.is_running(), record.native_pid) {
				if let Err(e) = signal_group(record.pid, native_pid, nix::sys::signal::Signal::SIGTERM) {
					tracing::warn!("{}", e);
				}
			}
		}
		self.dispatcher.shutdown();
		self.table.clear();
		tracing::info!("supervisor shut down");
	}

	fn spawn_process(&self, spec: &LaunchSpec) -> std::io::Result<Child> {
		let mut cmd = Command::new(&self.config.shell);
		cmd.arg("-c")
			.arg(&spec.command_line)
			.envs(&spec.env)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.process_group(0);
		cmd.spawn()
	}

	fn capture(&self, pid: ProcessId, stream: OutputStream) -> OutputCapture {
		OutputCapture::new(
			pid,
			stream,
			Arc::clone(&self.dispatcher),
			self.config.read_buffer_size,
		)
	}
}

/// Marks the record Running and publishes `process_started`. On failure the
/// child is killed: nothing would capture its output or report its exit.
fn start_or_kill(monitor: &LifecycleMonitor, child: &mut Child) -> Result<()> {
	// `id()` is only `None` once the child has been reaped, which can't have happened yet.
	let native_pid = child.id().unwrap_or_default();
	let Err(e) = monitor.started(native_pid) else {
		return Ok(());
	};

	tracing::warn!(pid = %monitor.pid(), native_pid, "killing process that failed to start: {}", e);
	if native_pid != 0 {
		if let Err(e) = signal_group(monitor.pid(), native_pid, nix::sys::signal::Signal::SIGKILL) {
			tracing::warn!("{}", e);
		}
	}
	if let Err(e) = child.start_kill() {
		tracing::debug!(pid = %monitor.pid(), "start_kill: {}", e);
	}
	Err(e)
}

/// The child was started with `process_group(0)`, so its pid is its pgid.
/// A group that is already gone is not an error.
fn signal_group(pid: ProcessId, native_pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
	use nix::errno::Errno;
	use nix::unistd::Pid;

	match nix::sys::signal::killpg(Pid::from_raw(native_pid as i32), signal) {
		Ok(()) | Err(Errno::ESRCH) => Ok(()),
		Err(source) => Err(Error::Signal { pid, source }),
	}
}
