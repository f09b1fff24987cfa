use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Logical identity of a supervised process.
///
/// Unrelated to the native OS pid. Issued once per launch by an
/// [`IdAllocator`] and never reused by the same [`Supervisor`](crate::Supervisor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u64);

/// Identity of one event consumer (one [`EventStream`](crate::EventStream)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub u64);

impl From<u64> for ProcessId {
	fn from(id: u64) -> Self {
		ProcessId(id)
	}
}

impl From<u64> for SubscriberId {
	fn from(id: u64) -> Self {
		SubscriberId(id)
	}
}

impl fmt::Display for ProcessId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl fmt::Display for SubscriberId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Monotonic id source. The first id handed out is 1.
#[derive(Debug, Default)]
pub struct IdAllocator {
	last: AtomicU64,
}

impl IdAllocator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn allocate<T: From<u64>>(&self) -> T {
		T::from(self.last.fetch_add(1, Ordering::Relaxed) + 1)
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
	Starting,
	Running,
	Exited,
}

impl ProcessState {
	pub fn is_running(&self) -> bool {
		matches!(self, ProcessState::Running)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			ProcessState::Starting => "starting",
			ProcessState::Running => "running",
			ProcessState::Exited => "exited",
		}
	}
}

impl fmt::Display for ProcessState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
