use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::events::{Event, ProcessOutputBody};
use crate::types::ProcessId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
	Stdout,
	Stderr,
}

impl OutputStream {
	pub fn as_str(&self) -> &'static str {
		match self {
			OutputStream::Stdout => "stdout",
			OutputStream::Stderr => "stderr",
		}
	}

	fn event(self, pid: ProcessId, text: String) -> Event {
		let body = ProcessOutputBody { pid, text };
		match self {
			OutputStream::Stdout => Event::Stdout(body),
			OutputStream::Stderr => Event::Stderr(body),
		}
	}
}

impl fmt::Display for OutputStream {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Reader for one output stream of one process.
///
/// Every successful read becomes one event; nothing is line buffered.
pub struct OutputCapture {
	pid: ProcessId,
	stream: OutputStream,
	dispatcher: Arc<Dispatcher>,
	buffer_size: usize,
}

impl OutputCapture {
	pub fn new(
		pid: ProcessId,
		stream: OutputStream,
		dispatcher: Arc<Dispatcher>,
		buffer_size: usize,
	) -> Self {
		Self {
			pid,
			stream,
			dispatcher,
			buffer_size: buffer_size.max(1),
		}
	}

	pub fn spawn<R>(self, reader: R) -> JoinHandle<()>
	where
		R: AsyncRead + Unpin + Send + 'static,
	{
		tokio::spawn(self.run(reader))
	}

	/// Reads until end-of-stream. EOF ends the capture quietly; any other
	/// read error is logged and ends only this stream.
	pub async fn run<R>(self, mut reader: R)
	where
		R: AsyncRead + Unpin,
	{
		let mut buf = vec![0u8; self.buffer_size];
		let mut decoder = Utf8Decoder::default();

		loop {
			match reader.read(&mut buf).await {
				Ok(0) => break,
				Ok(n) => {
					let text = decoder.decode(&buf[..n]);
					self.emit(text);
				}
				Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
				Err(source) => {
					let err = Error::StreamRead {
						pid: self.pid,
						stream: self.stream,
						source,
					};
					tracing::warn!("{}", err);
					break;
				}
			}
		}

		if let Some(rest) = decoder.finish() {
			self.emit(rest);
		}
	}

	fn emit(&self, text: String) {
		if !text.is_empty() {
			self.dispatcher.publish(self.stream.event(self.pid, text));
		}
	}
}

/// Incremental UTF-8 decoding across read boundaries.
///
/// An incomplete multi-byte sequence at the end of a chunk is held back and
/// prefixed to the next one; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
	pending: Vec<u8>,
}

impl Utf8Decoder {
	pub fn decode(&mut self, chunk: &[u8]) -> String {
		let mut bytes = std::mem::take(&mut self.pending);
		bytes.extend_from_slice(chunk);

		let mut out = String::with_capacity(bytes.len());
		let mut rest = bytes.as_slice();
		loop {
			match std::str::from_utf8(rest) {
				Ok(s) => {
					out.push_str(s);
					break;
				}
				Err(e) => {
					let (valid, after) = rest.split_at(e.valid_up_to());
					out.push_str(&String::from_utf8_lossy(valid));
					match e.error_len() {
						Some(len) => {
							out.push(char::REPLACEMENT_CHARACTER);
							rest = &after[len..];
						}
						None => {
							self.pending = after.to_vec();
							break;
						}
					}
				}
			}
		}
		out
	}

	/// Flushes a dangling partial sequence at end-of-stream.
	pub fn finish(&mut self) -> Option<String> {
		if self.pending.is_empty() {
			return None;
		}
		let rest = std::mem::take(&mut self.pending);
		Some(String::from_utf8_lossy(&rest).into_owned())
	}
}
