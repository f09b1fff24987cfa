use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::types::{ProcessId, ProcessState};

/// Authoritative state of one supervised process.
///
/// Values handed out by [`ProcessTable`] are snapshots; the table's copy is
/// only ever changed through the lifecycle transitions below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
	pub pid: ProcessId,
	/// Set on the transition to `Running`, kept after exit.
	pub native_pid: Option<u32>,
	pub name: String,
	pub command_line: String,
	pub state: ProcessState,
	/// `None` while running, or when the process was ended by a signal.
	pub exit_code: Option<i32>,
}

impl ProcessRecord {
	pub fn new(pid: ProcessId, name: impl Into<String>, command_line: impl Into<String>) -> Self {
		Self {
			pid,
			native_pid: None,
			name: name.into(),
			command_line: command_line.into(),
			state: ProcessState::Starting,
			exit_code: None,
		}
	}

	pub fn is_running(&self) -> bool {
		self.state.is_running()
	}

	pub fn mark_running(&mut self, native_pid: u32) -> Result<()> {
		self.transition(ProcessState::Starting, ProcessState::Running)?;
		self.native_pid = Some(native_pid);
		Ok(())
	}

	pub fn mark_exited(&mut self, exit_code: Option<i32>) -> Result<()> {
		self.transition(ProcessState::Running, ProcessState::Exited)?;
		self.exit_code = exit_code;
		Ok(())
	}

	fn transition(&mut self, from: ProcessState, to: ProcessState) -> Result<()> {
		if self.state != from {
			return Err(Error::InvalidState {
				pid: self.pid,
				from: self.state,
				to,
			});
		}
		self.state = to;
		Ok(())
	}
}

/// Record store keyed by [`ProcessId`].
///
/// Reads return clones and never observe a half-applied transition.
#[derive(Debug, Default)]
pub struct ProcessTable {
	records: RwLock<BTreeMap<ProcessId, ProcessRecord>>,
}

impl ProcessTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, pid: ProcessId) -> Option<ProcessRecord> {
		let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
		records.get(&pid).cloned()
	}

	pub fn contains(&self, pid: ProcessId) -> bool {
		let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
		records.contains_key(&pid)
	}

	/// Snapshots ordered by id. Exited records are skipped unless `include_exited`.
	pub fn list(&self, include_exited: bool) -> Vec<ProcessRecord> {
		let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
		records
			.values()
			.filter(|r| include_exited || r.state != ProcessState::Exited)
			.cloned()
			.collect()
	}

	pub fn len(&self) -> usize {
		self.records.read().unwrap_or_else(PoisonError::into_inner).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub(crate) fn insert(&self, record: ProcessRecord) {
		let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
		records.insert(record.pid, record);
	}

	pub(crate) fn remove(&self, pid: ProcessId) -> Option<ProcessRecord> {
		let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
		records.remove(&pid)
	}

	/// Applies `f` to the stored record and returns the snapshot after it.
	pub(crate) fn update<F>(&self, pid: ProcessId, f: F) -> Result<ProcessRecord>
	where
		F: FnOnce(&mut ProcessRecord) -> Result<()>,
	{
		let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
		let record = records.get_mut(&pid).ok_or(Error::NotFound(pid))?;
		f(record)?;
		Ok(record.clone())
	}

	pub(crate) fn clear(&self) {
		self.records.write().unwrap_or_else(PoisonError::into_inner).clear();
	}
}
