//! Socket protocol: one JSON object per line in each direction.
//!
//! The client sends [`Request`]s. The server answers each with exactly one
//! [`Response`], in request order, and interleaves [`Event`]s for the
//! connection's subscriptions at any point in between.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use execbus::{Event, EventKinds, ProcessId, ProcessRecord};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
	/// `eventTypes` subscribes this connection before the process starts.
	#[serde(rename_all = "camelCase")]
	Launch {
		#[serde(default)]
		name: Option<String>,
		command_line: String,
		#[serde(default)]
		env: HashMap<String, String>,
		#[serde(default)]
		event_types: Option<EventKinds>,
	},
	#[serde(rename_all = "camelCase")]
	Subscribe {
		pid: ProcessId,
		#[serde(default)]
		event_types: EventKinds,
	},
	Unsubscribe { pid: ProcessId },
	Status { pid: ProcessId },
	#[serde(rename_all = "camelCase")]
	List {
		#[serde(default)]
		include_exited: bool,
	},
	Kill { pid: ProcessId },
	Ping,
}

/// Type strings here never overlap with the event type strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
	Launched { pid: ProcessId },
	Status { process: ProcessRecord },
	Processes { processes: Vec<ProcessRecord> },
	Ok,
	Error { message: String },
	Pong,
}

/// Anything the server can write on a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ServerMessage {
	Event(Event),
	Response(Response),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn launch_request_wire_form() {
		let req: Request = serde_json::from_str(
			r#"{"cmd":"launch","name":"web","commandLine":"echo hi","eventTypes":"stdout,process_status"}"#,
		)
		.unwrap();
		match req {
			Request::Launch {
				name,
				command_line,
				env,
				event_types,
			} => {
				assert_eq!(name.as_deref(), Some("web"));
				assert_eq!(command_line, "echo hi");
				assert!(env.is_empty());
				assert_eq!(
					event_types.map(|k| k.describe()).as_deref(),
					Some("process_started,process_died,stdout")
				);
			}
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn subscribe_defaults_to_all_kinds() {
		let req: Request = serde_json::from_str(r#"{"cmd":"subscribe","pid":4}"#).unwrap();
		assert_eq!(
			req,
			Request::Subscribe {
				pid: ProcessId(4),
				event_types: EventKinds::empty(),
			}
		);
	}

	#[test]
	fn unknown_event_type_is_rejected() {
		let res = serde_json::from_str::<Request>(r#"{"cmd":"subscribe","pid":4,"eventTypes":"stdot"}"#);
		assert!(res.is_err());
	}

	#[test]
	fn server_messages_are_distinguishable() {
		let ev: ServerMessage =
			serde_json::from_str(r#"{"type":"stdout","body":{"pid":1,"text":"hi\n"}}"#).unwrap();
		assert!(matches!(ev, ServerMessage::Event(Event::Stdout(_))));

		let resp: ServerMessage = serde_json::from_str(r#"{"type":"launched","pid":1}"#).unwrap();
		assert_eq!(resp, ServerMessage::Response(Response::Launched { pid: ProcessId(1) }));

		let ok: ServerMessage = serde_json::from_str(r#"{"type":"ok"}"#).unwrap();
		assert_eq!(ok, ServerMessage::Response(Response::Ok));
	}
}
