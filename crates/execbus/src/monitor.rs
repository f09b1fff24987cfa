use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::task::JoinHandle;

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::events::Event;
use crate::process::ProcessTable;
use crate::types::ProcessId;

/// Sole writer of a process record's lifecycle state.
///
/// Emits `process_started` on Starting → Running and `process_died` on
/// Running → Exited. Both transitions are guarded by the record, so each
/// event is published at most once per process. Subscriptions to the process
/// are dropped after `process_died`.
pub(crate) struct LifecycleMonitor {
	pid: ProcessId,
	table: Arc<ProcessTable>,
	dispatcher: Arc<Dispatcher>,
	drain_timeout: Duration,
}

impl LifecycleMonitor {
	pub(crate) fn new(
		pid: ProcessId,
		table: Arc<ProcessTable>,
		dispatcher: Arc<Dispatcher>,
		drain_timeout: Duration,
	) -> Self {
		Self {
			pid,
			table,
			dispatcher,
			drain_timeout,
		}
	}

	pub(crate) fn pid(&self) -> ProcessId {
		self.pid
	}

	pub(crate) fn started(&self, native_pid: u32) -> Result<()> {
		let record = self.table.update(self.pid, |r| r.mark_running(native_pid))?;
		tracing::info!(
			pid = %self.pid,
			native_pid,
			name = %record.name,
			"process started"
		);
		self.dispatcher.publish(Event::started(&record));
		Ok(())
	}

	/// Waits for the OS to reap `child`, then reports its death.
	///
	/// Output capturers get up to `drain_timeout` to reach end-of-stream first
	/// so that trailing output is published before `process_died`. A pipe kept
	/// open by a grandchild does not hold the event back past that.
	pub(crate) async fn watch(self, mut child: Child, capturers: Vec<JoinHandle<()>>) {
		let exit_code = match child.wait().await {
			Ok(status) => status.code(),
			Err(e) => {
				tracing::warn!(pid = %self.pid, "failed to wait for process: {}", e);
				None
			}
		};

		let drained = tokio::time::timeout(self.drain_timeout, async {
			for handle in capturers {
				let _ = handle.await;
			}
		})
		.await;
		if drained.is_err() {
			tracing::debug!(pid = %self.pid, "output still open after exit");
		}

		match self.table.update(self.pid, |r| r.mark_exited(exit_code)) {
			Ok(record) => {
				tracing::info!(pid = %self.pid, exit_code = ?exit_code, "process exited");
				self.dispatcher.publish(Event::died(&record));
				self.dispatcher.forget_process(self.pid);
			}
			// Record dropped by shutdown while we were waiting.
			Err(e) => tracing::debug!(pid = %self.pid, "not reporting exit: {}", e),
		}
	}
}
