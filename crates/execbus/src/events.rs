//! Event model shared by producers, the dispatcher and consumers.
//!
//! On the wire every event is an adjacently tagged object:
//!
//! ```text
//! {"type": "process_started", "body": {"pid": 1, "nativePid": 4242, "name": "echo", "commandLine": "echo hello"}}
//! {"type": "stdout",          "body": {"pid": 1, "text": "hello\n"}}
//! {"type": "subscribed",      "body": {"pid": 1, "eventTypes": "stdout,stderr"}}
//! ```
//!
//! The five type strings and the body keys are relied on by existing callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::process::ProcessRecord;
use crate::types::ProcessId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
	ProcessStarted,
	ProcessDied,
	Stdout,
	Stderr,
	Subscribed,
}

impl EventKind {
	pub const ALL: [EventKind; 5] = [
		EventKind::ProcessStarted,
		EventKind::ProcessDied,
		EventKind::Stdout,
		EventKind::Stderr,
		EventKind::Subscribed,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			EventKind::ProcessStarted => "process_started",
			EventKind::ProcessDied => "process_died",
			EventKind::Stdout => "stdout",
			EventKind::Stderr => "stderr",
			EventKind::Subscribed => "subscribed",
		}
	}

	fn bit(self) -> u8 {
		match self {
			EventKind::ProcessStarted => 1 << 0,
			EventKind::ProcessDied => 1 << 1,
			EventKind::Stdout => 1 << 2,
			EventKind::Stderr => 1 << 3,
			EventKind::Subscribed => 1 << 4,
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EventKind {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		EventKind::ALL
			.into_iter()
			.find(|k| k.as_str() == s)
			.ok_or_else(|| Error::UnknownEventType(s.to_string()))
	}
}

/// Set of event kinds a subscriber wants for one process.
///
/// Serialized as a comma-separated list of type strings, e.g. `"stdout,stderr"`.
/// `process_status` is accepted on input as shorthand for both lifecycle kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventKinds(u8);

/// Alias for `process_started,process_died`.
pub const PROCESS_STATUS_ALIAS: &str = "process_status";

impl EventKinds {
	pub const fn empty() -> Self {
		EventKinds(0)
	}

	/// Lifecycle and output kinds. `subscribed` acks are always delivered and
	/// never need to be requested.
	pub fn all() -> Self {
		Self::lifecycle().union(Self::output())
	}

	pub fn lifecycle() -> Self {
		Self::empty().with(EventKind::ProcessStarted).with(EventKind::ProcessDied)
	}

	pub fn output() -> Self {
		Self::empty().with(EventKind::Stdout).with(EventKind::Stderr)
	}

	pub fn with(self, kind: EventKind) -> Self {
		EventKinds(self.0 | kind.bit())
	}

	pub fn union(self, other: EventKinds) -> Self {
		EventKinds(self.0 | other.0)
	}

	pub fn contains(&self, kind: EventKind) -> bool {
		self.0 & kind.bit() != 0
	}

	pub fn is_empty(&self) -> bool {
		self.0 == 0
	}

	/// An empty request means "everything".
	pub fn or_all(self) -> Self {
		if self.is_empty() {
			Self::all()
		} else {
			self
		}
	}

	pub fn iter(&self) -> impl Iterator<Item = EventKind> + '_ {
		EventKind::ALL.into_iter().filter(|k| self.contains(*k))
	}

	pub fn parse(s: &str) -> Result<Self, Error> {
		let mut kinds = EventKinds::empty();
		for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
			if part == PROCESS_STATUS_ALIAS {
				kinds = kinds.union(Self::lifecycle());
			} else {
				kinds = kinds.with(part.parse()?);
			}
		}
		Ok(kinds)
	}

	/// Canonical comma-separated form, as reported in `subscribed` events.
	pub fn describe(&self) -> String {
		self.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(",")
	}
}

impl FromIterator<EventKind> for EventKinds {
	fn from_iter<I: IntoIterator<Item = EventKind>>(iter: I) -> Self {
		iter.into_iter().fold(EventKinds::empty(), EventKinds::with)
	}
}

impl fmt::Display for EventKinds {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.describe())
	}
}

impl TryFrom<String> for EventKinds {
	type Error = Error;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		EventKinds::parse(&s)
	}
}

impl From<EventKinds> for String {
	fn from(kinds: EventKinds) -> Self {
		kinds.describe()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatusBody {
	pub pid: ProcessId,
	pub native_pid: u32,
	pub name: String,
	pub command_line: String,
}

impl From<&ProcessRecord> for ProcessStatusBody {
	fn from(record: &ProcessRecord) -> Self {
		Self {
			pid: record.pid,
			native_pid: record.native_pid.unwrap_or_default(),
			name: record.name.clone(),
			command_line: record.command_line.clone(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutputBody {
	pub pid: ProcessId,
	pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSubscribedBody {
	pub pid: ProcessId,
	pub event_types: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Event {
	ProcessStarted(ProcessStatusBody),
	ProcessDied(ProcessStatusBody),
	Stdout(ProcessOutputBody),
	Stderr(ProcessOutputBody),
	Subscribed(ProcessSubscribedBody),
}

impl Event {
	pub fn kind(&self) -> EventKind {
		match self {
			Event::ProcessStarted(_) => EventKind::ProcessStarted,
			Event::ProcessDied(_) => EventKind::ProcessDied,
			Event::Stdout(_) => EventKind::Stdout,
			Event::Stderr(_) => EventKind::Stderr,
			Event::Subscribed(_) => EventKind::Subscribed,
		}
	}

	pub fn pid(&self) -> ProcessId {
		match self {
			Event::ProcessStarted(b) | Event::ProcessDied(b) => b.pid,
			Event::Stdout(b) | Event::Stderr(b) => b.pid,
			Event::Subscribed(b) => b.pid,
		}
	}

	pub fn started(record: &ProcessRecord) -> Self {
		Event::ProcessStarted(record.into())
	}

	pub fn died(record: &ProcessRecord) -> Self {
		Event::ProcessDied(record.into())
	}

	pub fn subscribed(pid: ProcessId, kinds: EventKinds) -> Self {
		Event::Subscribed(ProcessSubscribedBody {
			pid,
			event_types: kinds.describe(),
		})
	}
}
