use thiserror::Error;

use crate::output::OutputStream;
use crate::types::{ProcessId, ProcessState, SubscriberId};

#[derive(Debug, Error)]
pub enum Error {
	/// The OS refused to create the process. Reported to the launch caller only.
	#[error("failed to launch {name}: {source}")]
	Launch {
		name: String,
		#[source]
		source: std::io::Error,
	},

	#[error("process {0} not found")]
	NotFound(ProcessId),

	#[error("subscriber {0} is not connected")]
	UnknownSubscriber(SubscriberId),

	#[error("unknown event type: {0:?}")]
	UnknownEventType(String),

	#[error("process {pid}: cannot move from {from} to {to}")]
	InvalidState {
		pid: ProcessId,
		from: ProcessState,
		to: ProcessState,
	},

	/// Logged by the capturer; stops that stream only.
	#[error("process {pid}: failed to read {stream}: {source}")]
	StreamRead {
		pid: ProcessId,
		stream: OutputStream,
		#[source]
		source: std::io::Error,
	},

	#[error("process {pid}: failed to signal: {source}")]
	Signal {
		pid: ProcessId,
		#[source]
		source: nix::errno::Errno,
	},
}

pub type Result<T> = std::result::Result<T, Error>;
