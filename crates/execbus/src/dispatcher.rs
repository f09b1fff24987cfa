//! Fan-out of published events to subscriber queues.
//!
//! ```text
//! stdout capturer ──┐
//! stderr capturer ──┼──► Dispatcher::publish ──► registry lookup ──► [queue A] ──► EventStream A
//! lifecycle monitor ┘        (sync, never waits)                └──► [queue B] ──► EventStream B
//! ```
//!
//! ## Rules
//! - `publish` is synchronous and only ever `try`s: a full queue drops its oldest event.
//! - Events from one producer reach each subscriber in production order.
//! - Nothing is ordered across producers.
//! - After `unsubscribe` returns, no further event for that process reaches the subscriber.
//!
//! Lock order is queue map, then registry. Neither is held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::error::{Error, Result};
use crate::events::{Event, EventKinds, ProcessSubscribedBody};
use crate::queue::{DeliveryQueue, EventStream};
use crate::registry::SubscriptionRegistry;
use crate::types::{IdAllocator, ProcessId, SubscriberId};

pub struct Dispatcher {
	subscribers: Arc<Subscribers>,
	subscriber_ids: IdAllocator,
	queue_capacity: usize,
}

/// State shared with every [`EventStream`] so that dropping one can detach
/// its subscriber.
#[derive(Default)]
struct Subscribers {
	registry: SubscriptionRegistry,
	queues: RwLock<HashMap<SubscriberId, Arc<DeliveryQueue>>>,
}

impl Subscribers {
	fn detach(&self, subscriber: SubscriberId) -> usize {
		let removed = self.registry.unsubscribe_all(subscriber);
		let queue = self
			.queues
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(&subscriber);
		if let Some(queue) = queue {
			queue.close();
			tracing::debug!(subscriber = %subscriber, subscriptions = removed, "subscriber disconnected");
		}
		removed
	}
}

impl Dispatcher {
	pub fn new(queue_capacity: usize) -> Self {
		Self {
			subscribers: Arc::new(Subscribers::default()),
			subscriber_ids: IdAllocator::new(),
			queue_capacity,
		}
	}

	pub fn registry(&self) -> &SubscriptionRegistry {
		&self.subscribers.registry
	}

	/// Creates a new subscriber with its own queue. Dropping the returned
	/// stream disconnects the subscriber.
	pub fn connect(&self) -> EventStream {
		let id: SubscriberId = self.subscriber_ids.allocate();
		let queue = DeliveryQueue::new(id, self.queue_capacity);
		self.subscribers
			.queues
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(id, Arc::clone(&queue));
		tracing::debug!(subscriber = %id, "subscriber connected");

		let subscribers: Weak<Subscribers> = Arc::downgrade(&self.subscribers);
		EventStream::new(queue).on_drop(move |id| {
			if let Some(subscribers) = subscribers.upgrade() {
				subscribers.detach(id);
			}
		})
	}

	/// Removes every subscription of `subscriber` and ends its stream.
	pub fn disconnect(&self, subscriber: SubscriberId) {
		self.subscribers.detach(subscriber);
	}

	pub fn is_connected(&self, subscriber: SubscriberId) -> bool {
		self.queue(subscriber).is_some_and(|q| !q.is_closed())
	}

	/// Registers (or replaces) a subscription and queues the `subscribed`
	/// acknowledgement ahead of any event for `pid`.
	pub fn subscribe(
		&self,
		subscriber: SubscriberId,
		pid: ProcessId,
		kinds: EventKinds,
	) -> Result<ProcessSubscribedBody> {
		let queue = self
			.queue(subscriber)
			.filter(|q| !q.is_closed())
			.ok_or(Error::UnknownSubscriber(subscriber))?;

		let effective = self.registry().subscribe(subscriber, pid, kinds, |effective| {
			queue.push(Arc::new(Event::subscribed(pid, effective)));
		});
		tracing::debug!(subscriber = %subscriber, pid = %pid, kinds = %effective, "subscribed");

		Ok(ProcessSubscribedBody {
			pid,
			event_types: effective.describe(),
		})
	}

	/// Stops delivery of `pid`'s events to `subscriber`. Events for `pid`
	/// that are already queued but not yet read, the `subscribed`
	/// acknowledgement included, are discarded as well.
	pub fn unsubscribe(&self, subscriber: SubscriberId, pid: ProcessId) -> bool {
		let queue = self.queue(subscriber);
		let removed = self.registry().unsubscribe(subscriber, pid, || {
			if let Some(queue) = &queue {
				queue.purge(pid);
			}
		});
		if removed {
			tracing::debug!(subscriber = %subscriber, pid = %pid, "unsubscribed");
		}
		removed
	}

	/// Drops every subscription to `pid`. Events already queued stay readable.
	pub fn forget_process(&self, pid: ProcessId) {
		let removed = self.registry().remove_process(pid);
		if removed > 0 {
			tracing::debug!(pid = %pid, subscriptions = removed, "dropped subscriptions of exited process");
		}
	}

	/// Delivers `event` to every subscriber of its process that wants its kind.
	pub fn publish(&self, event: Event) {
		let event = Arc::new(event);
		let pid = event.pid();
		let kind = event.kind();

		let queues = self.subscribers.queues.read().unwrap_or_else(PoisonError::into_inner);
		self.subscribers.registry.for_each_matching(pid, kind, |subscriber| {
			if let Some(queue) = queues.get(&subscriber) {
				queue.push(Arc::clone(&event));
			}
		});
	}

	/// Ends every stream and forgets all subscriptions.
	pub fn shutdown(&self) {
		self.registry().clear();
		let queues: Vec<_> = self
			.subscribers
			.queues
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.drain()
			.map(|(_, q)| q)
			.collect();
		for queue in queues {
			queue.close();
		}
	}

	fn queue(&self, subscriber: SubscriberId) -> Option<Arc<DeliveryQueue>> {
		self.subscribers
			.queues
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(&subscriber)
			.cloned()
	}
}
