use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use execbus::{Event, EventKinds, ProcessId, ProcessRecord};

use crate::protocol::{Request, Response, ServerMessage};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	#[error("daemon not running")]
	NotRunning,
	#[error("daemon closed the connection")]
	Closed,
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("malformed message: {0}")]
	Json(#[from] serde_json::Error),
	/// The daemon answered with an error response.
	#[error("{0}")]
	Daemon(String),
	#[error("unexpected response: {0:?}")]
	Unexpected(Response),
}

/// Synchronous connection to a running daemon.
///
/// Events can arrive while a request is in flight; they are kept in order and
/// handed out by [`DaemonClient::next_event`].
pub struct DaemonClient {
	reader: BufReader<UnixStream>,
	writer: UnixStream,
	pending: VecDeque<Event>,
}

impl DaemonClient {
	/// Returns `Err(ClientError::NotRunning)` if nothing listens on `socket_path`.
	pub fn connect(socket_path: &Path) -> Result<Self, ClientError> {
		let stream = UnixStream::connect(socket_path).map_err(|_| ClientError::NotRunning)?;
		let writer = stream.try_clone()?;
		Ok(Self {
			reader: BufReader::new(stream),
			writer,
			pending: VecDeque::new(),
		})
	}

	/// Sends `request` and waits for its response.
	pub fn send(&mut self, request: &Request) -> Result<Response, ClientError> {
		let mut data = serde_json::to_vec(request)?;
		data.push(b'\n');
		self.writer.write_all(&data)?;

		loop {
			match self.recv()? {
				ServerMessage::Response(response) => return Ok(response),
				ServerMessage::Event(event) => self.pending.push_back(event),
			}
		}
	}

	/// Next event for this connection's subscriptions, blocking until one arrives.
	pub fn next_event(&mut self) -> Result<Event, ClientError> {
		if let Some(event) = self.pending.pop_front() {
			return Ok(event);
		}
		match self.recv()? {
			ServerMessage::Event(event) => Ok(event),
			ServerMessage::Response(response) => Err(ClientError::Unexpected(response)),
		}
	}

	pub fn ping(&mut self) -> Result<(), ClientError> {
		match self.send(&Request::Ping)? {
			Response::Pong => Ok(()),
			other => Err(unexpected(other)),
		}
	}

	/// Launches `command_line`; with `kinds`, this connection is subscribed
	/// before the process starts.
	pub fn launch(
		&mut self,
		name: Option<&str>,
		command_line: &str,
		kinds: Option<EventKinds>,
	) -> Result<ProcessId, ClientError> {
		let request = Request::Launch {
			name: name.map(str::to_string),
			command_line: command_line.to_string(),
			env: Default::default(),
			event_types: kinds,
		};
		match self.send(&request)? {
			Response::Launched { pid } => Ok(pid),
			other => Err(unexpected(other)),
		}
	}

	pub fn subscribe(&mut self, pid: ProcessId, kinds: EventKinds) -> Result<(), ClientError> {
		self.expect_ok(&Request::Subscribe {
			pid,
			event_types: kinds,
		})
	}

	pub fn unsubscribe(&mut self, pid: ProcessId) -> Result<(), ClientError> {
		self.expect_ok(&Request::Unsubscribe { pid })
	}

	pub fn kill(&mut self, pid: ProcessId) -> Result<(), ClientError> {
		self.expect_ok(&Request::Kill { pid })
	}

	pub fn status(&mut self, pid: ProcessId) -> Result<ProcessRecord, ClientError> {
		match self.send(&Request::Status { pid })? {
			Response::Status { process } => Ok(process),
			other => Err(unexpected(other)),
		}
	}

	pub fn list(&mut self, include_exited: bool) -> Result<Vec<ProcessRecord>, ClientError> {
		match self.send(&Request::List { include_exited })? {
			Response::Processes { processes } => Ok(processes),
			other => Err(unexpected(other)),
		}
	}

	fn expect_ok(&mut self, request: &Request) -> Result<(), ClientError> {
		match self.send(request)? {
			Response::Ok => Ok(()),
			other => Err(unexpected(other)),
		}
	}

	fn recv(&mut self) -> Result<ServerMessage, ClientError> {
		let mut line = String::new();
		if self.reader.read_line(&mut line)? == 0 {
			return Err(ClientError::Closed);
		}
		Ok(serde_json::from_str(&line)?)
	}
}

fn unexpected(response: Response) -> ClientError {
	match response {
		Response::Error { message } => ClientError::Daemon(message),
		other => ClientError::Unexpected(other),
	}
}

/// Whether something accepts connections on `socket_path`.
pub fn is_running(socket_path: &Path) -> bool {
	UnixStream::connect(socket_path).is_ok()
}
