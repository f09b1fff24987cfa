//! # execbus
//!
//! Process lifecycle event bus.
//!
//! Launch child processes through a shell, capture their stdout and stderr
//! as they are produced, and fan lifecycle and output events out to any
//! number of subscribers. Each subscriber picks, per process, which event
//! kinds it wants and reads them from its own bounded queue. A slow reader
//! loses its own oldest events and never holds back anyone else.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use execbus::{Event, EventKinds, LaunchSpec, Supervisor, SupervisorConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> execbus::Result<()> {
//! let sup = Supervisor::new(SupervisorConfig::default());
//! let mut events = sup.connect();
//!
//! let pid = sup
//!     .launch(LaunchSpec::new("greet", "echo hello").subscribe(events.subscriber(), EventKinds::all()))
//!     .await?;
//!
//! while let Some(event) = events.next().await {
//!     println!("{}", serde_json::to_string(&*event).unwrap());
//!     if matches!(&*event, Event::ProcessDied(b) if b.pid == pid) {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
mod monitor;
pub mod output;
pub mod process;
mod queue;
pub mod registry;
pub mod supervisor;
pub mod types;

pub use config::SupervisorConfig;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use events::{Event, EventKind, EventKinds, ProcessOutputBody, ProcessStatusBody, ProcessSubscribedBody};
pub use output::{OutputCapture, OutputStream, Utf8Decoder};
pub use process::{ProcessRecord, ProcessTable};
pub use queue::EventStream;
pub use supervisor::{LaunchSpec, Supervisor};
pub use types::*;
