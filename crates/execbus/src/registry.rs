use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::events::{EventKind, EventKinds};
use crate::types::{ProcessId, SubscriberId};

/// Which subscribers want which event kinds, per process.
///
/// All mutations take the write lock, so calls touching the same
/// (subscriber, process) pair are serialized. Lookups see the state as of
/// the call, never a cached copy.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
	by_process: RwLock<HashMap<ProcessId, HashMap<SubscriberId, EventKinds>>>,
}

impl SubscriptionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers or replaces the kind set for `(subscriber, pid)` and returns
	/// the effective set. `on_subscribed` runs before the lock is released, so
	/// nothing published for `pid` can reach the subscriber ahead of it.
	pub fn subscribe<F>(
		&self,
		subscriber: SubscriberId,
		pid: ProcessId,
		kinds: EventKinds,
		on_subscribed: F,
	) -> EventKinds
	where
		F: FnOnce(EventKinds),
	{
		let effective = kinds.or_all();
		let mut by_process = self.by_process.write().unwrap_or_else(PoisonError::into_inner);
		by_process.entry(pid).or_default().insert(subscriber, effective);
		on_subscribed(effective);
		effective
	}

	/// Returns whether a subscription existed. `on_removed` runs under the lock.
	pub fn unsubscribe<F>(&self, subscriber: SubscriberId, pid: ProcessId, on_removed: F) -> bool
	where
		F: FnOnce(),
	{
		let mut by_process = self.by_process.write().unwrap_or_else(PoisonError::into_inner);
		let Some(subs) = by_process.get_mut(&pid) else {
			return false;
		};
		let removed = subs.remove(&subscriber).is_some();
		if subs.is_empty() {
			by_process.remove(&pid);
		}
		if removed {
			on_removed();
		}
		removed
	}

	/// Drops every subscription held by `subscriber`; returns how many.
	pub fn unsubscribe_all(&self, subscriber: SubscriberId) -> usize {
		let mut by_process = self.by_process.write().unwrap_or_else(PoisonError::into_inner);
		let mut removed = 0;
		by_process.retain(|_, subs| {
			if subs.remove(&subscriber).is_some() {
				removed += 1;
			}
			!subs.is_empty()
		});
		removed
	}

	/// Drops every subscription to `pid`; returns how many.
	pub(crate) fn remove_process(&self, pid: ProcessId) -> usize {
		let mut by_process = self.by_process.write().unwrap_or_else(PoisonError::into_inner);
		by_process.remove(&pid).map_or(0, |subs| subs.len())
	}

	pub fn kinds(&self, subscriber: SubscriberId, pid: ProcessId) -> Option<EventKinds> {
		let by_process = self.by_process.read().unwrap_or_else(PoisonError::into_inner);
		by_process.get(&pid).and_then(|subs| subs.get(&subscriber)).copied()
	}

	pub fn matching_subscribers(&self, pid: ProcessId, kind: EventKind) -> Vec<SubscriberId> {
		let mut out = Vec::new();
		self.for_each_matching(pid, kind, |sub| out.push(sub));
		out.sort_unstable();
		out
	}

	/// Calls `f` for each subscriber of `pid` that wants `kind`, holding the
	/// read lock for the whole walk so that a concurrent unsubscribe either
	/// happens entirely before or entirely after it.
	pub(crate) fn for_each_matching<F>(&self, pid: ProcessId, kind: EventKind, mut f: F)
	where
		F: FnMut(SubscriberId),
	{
		let by_process = self.by_process.read().unwrap_or_else(PoisonError::into_inner);
		if let Some(subs) = by_process.get(&pid) {
			for (sub, kinds) in subs {
				if kinds.contains(kind) {
					f(*sub);
				}
			}
		}
	}

	pub fn subscription_count(&self) -> usize {
		let by_process = self.by_process.read().unwrap_or_else(PoisonError::into_inner);
		by_process.values().map(HashMap::len).sum()
	}

	pub(crate) fn clear(&self) {
		self.by_process.write().unwrap_or_else(PoisonError::into_inner).clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const A: SubscriberId = SubscriberId(1);
	const B: SubscriberId = SubscriberId(2);
	const P: ProcessId = ProcessId(10);

	#[test]
	fn matching_respects_kind_sets() {
		let reg = SubscriptionRegistry::new();
		reg.subscribe(A, P, EventKinds::parse("stdout").unwrap(), |_| {});
		reg.subscribe(B, P, EventKinds::all(), |_| {});

		assert_eq!(reg.matching_subscribers(P, EventKind::Stdout), vec![A, B]);
		assert_eq!(reg.matching_subscribers(P, EventKind::Stderr), vec![B]);
		assert!(reg.matching_subscribers(ProcessId(11), EventKind::Stdout).is_empty());
	}

	#[test]
	fn resubscribe_replaces_kinds() {
		let reg = SubscriptionRegistry::new();
		reg.subscribe(A, P, EventKinds::parse("stdout").unwrap(), |_| {});
		let effective = reg.subscribe(A, P, EventKinds::parse("stderr").unwrap(), |_| {});

		assert_eq!(effective.describe(), "stderr");
		assert_eq!(reg.kinds(A, P), Some(effective));
		assert!(reg.matching_subscribers(P, EventKind::Stdout).is_empty());
		assert_eq!(reg.subscription_count(), 1);
	}

	#[test]
	fn empty_request_subscribes_to_everything() {
		let reg = SubscriptionRegistry::new();
		let mut acked = None;
		reg.subscribe(A, P, EventKinds::empty(), |k| acked = Some(k));
		assert_eq!(acked, Some(EventKinds::all()));
	}

	#[test]
	fn unsubscribe_is_a_noop_when_absent() {
		let reg = SubscriptionRegistry::new();
		let mut called = false;
		assert!(!reg.unsubscribe(A, P, || called = true));
		assert!(!called);

		reg.subscribe(A, P, EventKinds::all(), |_| {});
		assert!(reg.unsubscribe(A, P, || called = true));
		assert!(called);
		assert_eq!(reg.subscription_count(), 0);
	}

	#[test]
	fn unsubscribe_all_leaves_other_subscribers() {
		let reg = SubscriptionRegistry::new();
		reg.subscribe(A, P, EventKinds::all(), |_| {});
		reg.subscribe(A, ProcessId(11), EventKinds::all(), |_| {});
		reg.subscribe(B, P, EventKinds::all(), |_| {});

		assert_eq!(reg.unsubscribe_all(A), 2);
		assert_eq!(reg.matching_subscribers(P, EventKind::ProcessDied), vec![B]);
		assert_eq!(reg.subscription_count(), 1);
	}

	#[test]
	fn remove_process_drops_all_its_subscribers() {
		let reg = SubscriptionRegistry::new();
		reg.subscribe(A, P, EventKinds::all(), |_| {});
		reg.subscribe(B, P, EventKinds::output(), |_| {});
		reg.subscribe(A, ProcessId(11), EventKinds::all(), |_| {});

		assert_eq!(reg.remove_process(P), 2);
		assert_eq!(reg.remove_process(P), 0);
		assert_eq!(reg.kinds(A, P), None);
		assert_eq!(reg.kinds(A, ProcessId(11)), Some(EventKinds::all()));
		assert_eq!(reg.subscription_count(), 1);
	}
}
