use std::io;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use execbus::{LaunchSpec, SubscriberId, Supervisor};

use crate::protocol::{Request, Response};

/// Accepts connections forever; each one gets its own task.
pub async fn serve(listener: UnixListener, supervisor: Arc<Supervisor>) {
	loop {
		let (stream, _) = match listener.accept().await {
			Ok(s) => s,
			Err(e) => {
				tracing::error!("accept error: {}", e);
				continue;
			}
		};

		let supervisor = Arc::clone(&supervisor);
		tokio::spawn(async move {
			handle_connection(stream, supervisor).await;
		});
	}
}

/// One connection is one subscriber. Events for its subscriptions are
/// forwarded by a separate task and share the writer with responses.
async fn handle_connection(stream: UnixStream, supervisor: Arc<Supervisor>) {
	let (reader, writer) = stream.into_split();
	let writer = Arc::new(Mutex::new(writer));

	let mut events = supervisor.connect();
	let subscriber = events.subscriber();
	tracing::debug!(subscriber = %subscriber, "client connected");

	let forwarder = {
		let writer = Arc::clone(&writer);
		tokio::spawn(async move {
			while let Some(event) = events.next().await {
				if let Err(e) = write_line(&writer, &*event).await {
					tracing::debug!(subscriber = %subscriber, "stopped forwarding events: {}", e);
					break;
				}
			}
		})
	};

	let mut lines = BufReader::new(reader).lines();
	while let Ok(Some(line)) = lines.next_line().await {
		if line.trim().is_empty() {
			continue;
		}
		let response = match serde_json::from_str::<Request>(&line) {
			Ok(request) => handle_request(&supervisor, subscriber, request).await,
			Err(e) => {
				tracing::warn!("invalid request: {}", e);
				Response::Error {
					message: format!("invalid request: {}", e),
				}
			}
		};

		if write_line(&writer, &response).await.is_err() {
			break;
		}
	}

	supervisor.disconnect(subscriber);
	forwarder.abort();
	tracing::debug!(subscriber = %subscriber, "client disconnected");
}

pub async fn handle_request(
	supervisor: &Supervisor,
	subscriber: SubscriberId,
	request: Request,
) -> Response {
	match request {
		Request::Ping => Response::Pong,
		Request::Launch {
			name,
			command_line,
			env,
			event_types,
		} => {
			let name = name.unwrap_or_else(|| default_name(&command_line));
			let mut spec = LaunchSpec::new(name, command_line);
			spec.env = env;
			if let Some(kinds) = event_types {
				spec = spec.subscribe(subscriber, kinds);
			}
			match supervisor.launch(spec).await {
				Ok(pid) => Response::Launched { pid },
				Err(e) => error(e),
			}
		}
		Request::Subscribe { pid, event_types } => {
			match supervisor.subscribe(subscriber, pid, event_types) {
				Ok(_) => Response::Ok,
				Err(e) => error(e),
			}
		}
		Request::Unsubscribe { pid } => {
			supervisor.unsubscribe(subscriber, pid);
			Response::Ok
		}
		Request::Status { pid } => match supervisor.status(pid) {
			Ok(process) => Response::Status { process },
			Err(e) => error(e),
		},
		Request::List { include_exited } => Response::Processes {
			processes: supervisor.list(include_exited),
		},
		Request::Kill { pid } => match supervisor.kill(pid).await {
			Ok(()) => Response::Ok,
			Err(e) => error(e),
		},
	}
}

fn error(e: execbus::Error) -> Response {
	Response::Error {
		message: e.to_string(),
	}
}

/// First word of the command line, without its directory.
fn default_name(command_line: &str) -> String {
	command_line
		.split_whitespace()
		.next()
		.and_then(|word| word.rsplit('/').next())
		.unwrap_or("process")
		.to_string()
}

async fn write_line<T: Serialize + ?Sized>(writer: &Mutex<OwnedWriteHalf>, value: &T) -> io::Result<()> {
	let mut data = serde_json::to_vec(value).map_err(io::Error::other)?;
	data.push(b'\n');
	writer.lock().await.write_all(&data).await
}
