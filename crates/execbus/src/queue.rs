//! Per-subscriber bounded delivery queue.
//!
//! ```text
//! Dispatcher::publish ──push──► [ ring of N events ] ──next().await──► EventStream
//!                                 full? pop_front, dropped += 1
//! ```
//!
//! `push` never waits: when the ring is full the oldest unread event is
//! discarded and the subscriber's overflow counter goes up. The consumer side
//! is a single [`EventStream`] per queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

use crate::events::Event;
use crate::types::{ProcessId, SubscriberId};

pub(crate) struct DeliveryQueue {
	subscriber: SubscriberId,
	capacity: usize,
	state: Mutex<QueueState>,
	notify: Notify,
	dropped: AtomicU64,
}

#[derive(Default)]
struct QueueState {
	events: VecDeque<Arc<Event>>,
	closed: bool,
}

impl DeliveryQueue {
	pub(crate) fn new(subscriber: SubscriberId, capacity: usize) -> Arc<Self> {
		let capacity = capacity.max(1);
		Arc::new(Self {
			subscriber,
			capacity,
			state: Mutex::new(QueueState {
				events: VecDeque::with_capacity(capacity.min(64)),
				closed: false,
			}),
			notify: Notify::new(),
			dropped: AtomicU64::new(0),
		})
	}

	pub(crate) fn subscriber(&self) -> SubscriberId {
		self.subscriber
	}

	/// Returns `false` if the consumer is gone.
	pub(crate) fn push(&self, event: Arc<Event>) -> bool {
		let overflowed = {
			let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
			if state.closed {
				return false;
			}
			let overflowed = state.events.len() >= self.capacity;
			if overflowed {
				state.events.pop_front();
			}
			state.events.push_back(event);
			overflowed
		};

		if overflowed {
			let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
			// warn on the 1st, 2nd, 4th, 8th... drop
			if total.is_power_of_two() {
				tracing::warn!(
					subscriber = %self.subscriber,
					dropped = total,
					"subscriber queue full, dropping oldest event"
				);
			}
		}

		self.notify.notify_one();
		true
	}

	/// Discards queued events for `pid`.
	pub(crate) fn purge(&self, pid: ProcessId) {
		let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
		state.events.retain(|ev| ev.pid() != pid);
	}

	pub(crate) fn close(&self) {
		{
			let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
			state.closed = true;
		}
		self.notify.notify_one();
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.state.lock().unwrap_or_else(PoisonError::into_inner).closed
	}

	fn pop(&self) -> Pop {
		let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
		match state.events.pop_front() {
			Some(ev) => Pop::Ready(ev),
			None if state.closed => Pop::Closed,
			None => Pop::Empty,
		}
	}

	fn len(&self) -> usize {
		self.state.lock().unwrap_or_else(PoisonError::into_inner).events.len()
	}
}

enum Pop {
	Ready(Arc<Event>),
	Empty,
	Closed,
}

/// Receiving end of one subscriber's queue.
///
/// Yields events in the order they were published for this subscriber and
/// returns `None` once the subscriber is disconnected (or the supervisor shut
/// down) and everything buffered has been read. Dropping the stream
/// disconnects the subscriber and drops all of its subscriptions.
pub struct EventStream {
	queue: Arc<DeliveryQueue>,
	on_drop: Option<Box<dyn FnOnce(SubscriberId) + Send + Sync>>,
}

impl EventStream {
	pub(crate) fn new(queue: Arc<DeliveryQueue>) -> Self {
		Self { queue, on_drop: None }
	}

	/// Runs `f` once, after the queue is closed, when the stream is dropped.
	pub(crate) fn on_drop(mut self, f: impl FnOnce(SubscriberId) + Send + Sync + 'static) -> Self {
		self.on_drop = Some(Box::new(f));
		self
	}

	pub fn subscriber(&self) -> SubscriberId {
		self.queue.subscriber()
	}

	pub async fn next(&mut self) -> Option<Arc<Event>> {
		loop {
			match self.queue.pop() {
				Pop::Ready(ev) => return Some(ev),
				Pop::Closed => return None,
				// Single consumer: a notify_one issued before we start waiting
				// leaves a permit, so no wakeup is lost here.
				Pop::Empty => self.queue.notify.notified().await,
			}
		}
	}

	/// Next buffered event without waiting.
	pub fn try_next(&mut self) -> Option<Arc<Event>> {
		match self.queue.pop() {
			Pop::Ready(ev) => Some(ev),
			Pop::Empty | Pop::Closed => None,
		}
	}

	/// Events discarded for this subscriber because its queue was full.
	pub fn dropped(&self) -> u64 {
		self.queue.dropped.load(Ordering::Relaxed)
	}

	/// Events currently buffered.
	pub fn pending(&self) -> usize {
		self.queue.len()
	}

	pub fn is_closed(&self) -> bool {
		self.queue.is_closed()
	}
}

impl Drop for EventStream {
	fn drop(&mut self) {
		self.queue.close();
		if let Some(f) = self.on_drop.take() {
			f(self.queue.subscriber());
		}
	}
}

impl std::fmt::Debug for EventStream {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventStream")
			.field("subscriber", &self.queue.subscriber)
			.field("pending", &self.pending())
			.field("dropped", &self.dropped())
			.finish()
	}
}
