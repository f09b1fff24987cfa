use std::sync::Arc;
use std::time::Duration;

use execbus::*;

const WAIT: Duration = Duration::from_secs(5);

fn test_supervisor() -> Arc<Supervisor> {
	Supervisor::new(SupervisorConfig::default())
}

async fn next_event(stream: &mut EventStream) -> Event {
	match tokio::time::timeout(WAIT, stream.next()).await {
		Ok(Some(ev)) => (*ev).clone(),
		Ok(None) => panic!("stream closed"),
		Err(_) => panic!("timed out waiting for event"),
	}
}

/// Reads until `process_died` for `pid`, inclusive.
async fn events_until_died(stream: &mut EventStream, pid: ProcessId) -> Vec<Event> {
	let mut out = Vec::new();
	loop {
		let ev = next_event(stream).await;
		let done = matches!(&ev, Event::ProcessDied(b) if b.pid == pid);
		out.push(ev);
		if done {
			return out;
		}
	}
}

async fn wait_exited(sup: &Supervisor, pid: ProcessId) -> ProcessRecord {
	let deadline = tokio::time::Instant::now() + WAIT;
	loop {
		let record = sup.status(pid).unwrap();
		if record.state == ProcessState::Exited {
			return record;
		}
		assert!(tokio::time::Instant::now() < deadline, "process {} never exited", pid);
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
}

fn drain(stream: &mut EventStream) -> Vec<Event> {
	std::iter::from_fn(|| stream.try_next()).map(|ev| (*ev).clone()).collect()
}

fn output_text(events: &[Event], kind: EventKind) -> String {
	events
		.iter()
		.filter(|ev| ev.kind() == kind)
		.map(|ev| match ev {
			Event::Stdout(b) | Event::Stderr(b) => b.text.as_str(),
			_ => unreachable!(),
		})
		.collect()
}

fn kinds_of(events: &[Event]) -> Vec<EventKind> {
	let mut kinds: Vec<EventKind> = events.iter().map(Event::kind).collect();
	kinds.dedup();
	kinds
}

// --- Launch and lifecycle ---

#[tokio::test]
async fn echo_hello_full_sequence() {
	let sup = test_supervisor();
	let mut stream = sup.connect();

	let pid = sup
		.launch(LaunchSpec::new("greet", "echo hello").subscribe(stream.subscriber(), EventKinds::all()))
		.await
		.unwrap();

	let events = events_until_died(&mut stream, pid).await;
	assert_eq!(
		kinds_of(&events),
		vec![
			EventKind::Subscribed,
			EventKind::ProcessStarted,
			EventKind::Stdout,
			EventKind::ProcessDied,
		]
	);
	assert_eq!(output_text(&events, EventKind::Stdout), "hello\n");

	match &events[1] {
		Event::ProcessStarted(b) => {
			assert_eq!(b.pid, pid);
			assert_eq!(b.name, "greet");
			assert_eq!(b.command_line, "echo hello");
			assert!(b.native_pid > 0);
		}
		other => panic!("expected process_started, got {:?}", other),
	}
	assert!(events.iter().all(|ev| ev.pid() == pid));
}

#[tokio::test]
async fn exit_code_is_recorded() {
	let sup = test_supervisor();
	let pid = sup.launch(LaunchSpec::new("fail", "exit 3")).await.unwrap();

	let record = wait_exited(&sup, pid).await;
	assert_eq!(record.exit_code, Some(3));
	assert!(record.native_pid.is_some());
	assert!(!record.is_running());
}

#[tokio::test]
async fn env_is_passed_to_child() {
	let sup = test_supervisor();
	let mut stream = sup.connect();

	let pid = sup
		.launch(
			LaunchSpec::new("env", "echo $EXECBUS_GREETING")
				.env("EXECBUS_GREETING", "hi there")
				.subscribe(stream.subscriber(), EventKinds::output()),
		)
		.await
		.unwrap();

	wait_exited(&sup, pid).await;
	let events = drain(&mut stream);
	assert_eq!(output_text(&events, EventKind::Stdout), "hi there\n");
}

#[tokio::test]
async fn launch_failure_reports_error_and_no_events() {
	let sup = Supervisor::new(SupervisorConfig {
		shell: "/nonexistent/execbus-shell".into(),
		..Default::default()
	});
	let mut stream = sup.connect();

	let result = sup
		.launch(LaunchSpec::new("broken", "echo never").subscribe(stream.subscriber(), EventKinds::all()))
		.await;

	match result {
		Err(Error::Launch { name, .. }) => assert_eq!(name, "broken"),
		other => panic!("expected launch error, got {:?}", other),
	}
	assert!(sup.list(true).is_empty());
	assert!(stream.try_next().is_none());
}

#[tokio::test]
async fn process_ids_increase() {
	let sup = test_supervisor();
	let mut last = ProcessId(0);
	for i in 0..3 {
		let pid = sup.launch(LaunchSpec::new(format!("p{}", i), "true")).await.unwrap();
		assert!(pid > last);
		last = pid;
	}
}

#[tokio::test]
async fn list_filters_exited() {
	let sup = test_supervisor();
	let done = sup.launch(LaunchSpec::new("done", "true")).await.unwrap();
	let running = sup.launch(LaunchSpec::new("running", "sleep 30")).await.unwrap();
	wait_exited(&sup, done).await;

	let live: Vec<_> = sup.list(false).into_iter().map(|r| r.pid).collect();
	assert_eq!(live, vec![running]);
	assert_eq!(sup.list(true).len(), 2);

	sup.kill(running).await.unwrap();
}

#[tokio::test]
async fn kill_terminates_process_group() {
	let sup = test_supervisor();
	let mut stream = sup.connect();

	let pid = sup
		.launch(LaunchSpec::new("sleeper", "sleep 30").subscribe(stream.subscriber(), EventKinds::lifecycle()))
		.await
		.unwrap();
	assert!(sup.status(pid).unwrap().is_running());

	sup.kill(pid).await.unwrap();
	let events = events_until_died(&mut stream, pid).await;
	assert_eq!(events.last().map(Event::kind), Some(EventKind::ProcessDied));

	let record = sup.status(pid).unwrap();
	assert_eq!(record.state, ProcessState::Exited);
	assert_eq!(record.exit_code, None);

	// already exited
	sup.kill(pid).await.unwrap();
}

// --- Subscriptions ---

#[tokio::test]
async fn kind_filter_only_delivers_requested_kinds() {
	let sup = test_supervisor();
	let mut stream = sup.connect();

	let pid = sup
		.launch(
			LaunchSpec::new("both", "echo out; echo err >&2")
				.subscribe(stream.subscriber(), EventKinds::parse("stdout").unwrap()),
		)
		.await
		.unwrap();

	wait_exited(&sup, pid).await;
	let events = drain(&mut stream);
	assert_eq!(kinds_of(&events), vec![EventKind::Subscribed, EventKind::Stdout]);
	assert_eq!(output_text(&events, EventKind::Stdout), "out\n");
}

#[tokio::test]
async fn stderr_is_captured_separately() {
	let sup = test_supervisor();
	let mut stream = sup.connect();

	let pid = sup
		.launch(LaunchSpec::new("oops", "echo oops >&2").subscribe(stream.subscriber(), EventKinds::all()))
		.await
		.unwrap();

	let events = events_until_died(&mut stream, pid).await;
	assert_eq!(output_text(&events, EventKind::Stderr), "oops\n");
	assert_eq!(output_text(&events, EventKind::Stdout), "");
}

#[tokio::test]
async fn subscribe_after_exit_only_acknowledges() {
	let sup = test_supervisor();
	let pid = sup.launch(LaunchSpec::new("quick", "echo gone")).await.unwrap();
	wait_exited(&sup, pid).await;

	let mut stream = sup.connect();
	let ack = sup.subscribe(stream.subscriber(), pid, EventKinds::all()).unwrap();
	assert_eq!(ack.pid, pid);
	assert_eq!(ack.event_types, "process_started,process_died,stdout,stderr");

	let events = drain(&mut stream);
	assert_eq!(events, vec![Event::Subscribed(ack)]);
	// nothing more can be published for it, so the subscription is not kept
	assert_eq!(sup.dispatcher().registry().kinds(stream.subscriber(), pid), None);
}

#[tokio::test]
async fn exited_process_releases_its_subscriptions() {
	let sup = test_supervisor();
	let mut a = sup.connect();
	let b = sup.connect();

	let pid = sup
		.launch(LaunchSpec::new("quick", "true").subscribe(a.subscriber(), EventKinds::all()))
		.await
		.unwrap();
	sup.subscribe(b.subscriber(), pid, EventKinds::lifecycle()).unwrap();

	let events = events_until_died(&mut a, pid).await;
	assert_eq!(events.last().map(Event::kind), Some(EventKind::ProcessDied));

	let deadline = tokio::time::Instant::now() + WAIT;
	while sup.dispatcher().registry().subscription_count() > 0 {
		assert!(tokio::time::Instant::now() < deadline, "subscriptions outlived the process");
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	assert!(sup.dispatcher().is_connected(a.subscriber()));
	assert!(sup.dispatcher().is_connected(b.subscriber()));
}

#[tokio::test]
async fn subscribe_errors() {
	let sup = test_supervisor();
	let stream = sup.connect();
	let pid = sup.launch(LaunchSpec::new("quick", "true")).await.unwrap();

	assert!(matches!(
		sup.subscribe(stream.subscriber(), ProcessId(9999), EventKinds::all()),
		Err(Error::NotFound(ProcessId(9999)))
	));
	assert!(matches!(
		sup.subscribe(SubscriberId(9999), pid, EventKinds::all()),
		Err(Error::UnknownSubscriber(SubscriberId(9999)))
	));
	assert!(matches!(sup.status(ProcessId(9999)), Err(Error::NotFound(_))));
	assert!(matches!(sup.kill(ProcessId(9999)).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn resubscribe_replaces_kind_set() {
	let sup = test_supervisor();
	let mut stream = sup.connect();
	let sub = stream.subscriber();

	let pid = sup
		.launch(
			LaunchSpec::new("late", "sleep 0.3; echo a; echo b >&2")
				.subscribe(sub, EventKinds::parse("stdout").unwrap()),
		)
		.await
		.unwrap();
	let ack = sup.subscribe(sub, pid, EventKinds::parse("stderr").unwrap()).unwrap();
	assert_eq!(ack.event_types, "stderr");

	wait_exited(&sup, pid).await;
	let events = drain(&mut stream);
	assert_eq!(
		kinds_of(&events),
		vec![EventKind::Subscribed, EventKind::Stderr]
	);
	assert_eq!(events.iter().filter(|ev| ev.kind() == EventKind::Subscribed).count(), 2);
	assert_eq!(output_text(&events, EventKind::Stderr), "b\n");
}

#[tokio::test]
async fn unsubscribe_stops_one_subscriber_only() {
	let sup = test_supervisor();
	let mut a = sup.connect();
	let mut b = sup.connect();

	let pid = sup
		.launch(LaunchSpec::new("late", "sleep 0.3; echo late").subscribe(a.subscriber(), EventKinds::all()))
		.await
		.unwrap();
	sup.subscribe(b.subscriber(), pid, EventKinds::all()).unwrap();

	sup.unsubscribe(a.subscriber(), pid);
	// unsubscribing twice is fine
	sup.unsubscribe(a.subscriber(), pid);

	let from_b = events_until_died(&mut b, pid).await;
	assert_eq!(output_text(&from_b, EventKind::Stdout), "late\n");
	assert!(drain(&mut a).is_empty());
}

// --- Delivery ---

#[tokio::test]
async fn output_arrives_in_order() {
	let sup = test_supervisor();
	let mut stream = sup.connect();

	let pid = sup
		.launch(LaunchSpec::new("seq", "seq 1 500").subscribe(stream.subscriber(), EventKinds::output()))
		.await
		.unwrap();

	let mut text = String::new();
	while !text.ends_with("500\n") {
		match next_event(&mut stream).await {
			Event::Stdout(b) => text.push_str(&b.text),
			Event::Subscribed(_) => {}
			other => panic!("unexpected {:?}", other),
		}
	}

	let expected: String = (1..=500).map(|i| format!("{}\n", i)).collect();
	assert_eq!(text, expected);
	wait_exited(&sup, pid).await;
}

#[tokio::test]
async fn slow_subscriber_does_not_hold_back_others() {
	let sup = Supervisor::new(SupervisorConfig {
		queue_capacity: 512,
		read_buffer_size: 8,
		..Default::default()
	});
	let mut slow = sup.connect();
	let mut fast = sup.connect();

	let pid = sup
		.launch(LaunchSpec::new("flood", "seq 1 2000").subscribe(fast.subscriber(), EventKinds::output()))
		.await
		.unwrap();
	sup.subscribe(slow.subscriber(), pid, EventKinds::output()).unwrap();

	let mut text = String::new();
	while !text.ends_with("2000\n") {
		match next_event(&mut fast).await {
			Event::Stdout(b) => text.push_str(&b.text),
			Event::Subscribed(_) => {}
			other => panic!("unexpected {:?}", other),
		}
	}
	let expected: String = (1..=2000).map(|i| format!("{}\n", i)).collect();
	assert_eq!(text, expected);
	assert_eq!(fast.dropped(), 0);

	wait_exited(&sup, pid).await;
	assert!(slow.dropped() > 0);
	assert!(slow.pending() <= 512);

	let tail = drain(&mut slow);
	assert!(output_text(&tail, EventKind::Stdout).ends_with("2000\n"));
}

#[tokio::test]
async fn wire_format_matches_contract() {
	let sup = test_supervisor();
	let mut stream = sup.connect();

	let pid = sup
		.launch(LaunchSpec::new("wire", "echo hi").subscribe(stream.subscriber(), EventKinds::all()))
		.await
		.unwrap();
	let events = events_until_died(&mut stream, pid).await;

	let json: Vec<serde_json::Value> = events.iter().map(|ev| serde_json::to_value(ev).unwrap()).collect();
	let types: Vec<&str> = json.iter().map(|v| v["type"].as_str().unwrap()).collect();
	assert_eq!(types.first(), Some(&"subscribed"));
	assert_eq!(types.last(), Some(&"process_died"));
	assert!(types.contains(&"process_started"));
	assert!(types.contains(&"stdout"));

	assert_eq!(json[0]["body"]["pid"], pid.0);
	assert_eq!(json[0]["body"]["eventTypes"], "process_started,process_died,stdout,stderr");

	let started = &json[1]["body"];
	assert_eq!(started["name"], "wire");
	assert_eq!(started["commandLine"], "echo hi");
	assert!(started["nativePid"].as_u64().unwrap() > 0);

	let back: Event = serde_json::from_value(json[1].clone()).unwrap();
	assert_eq!(back, events[1]);
}

#[tokio::test]
async fn shutdown_ends_streams_and_forgets_processes() {
	let sup = test_supervisor();
	let mut stream = sup.connect();
	sup.launch(LaunchSpec::new("sleeper", "sleep 30").subscribe(stream.subscriber(), EventKinds::all()))
		.await
		.unwrap();

	sup.shutdown();
	assert!(sup.list(true).is_empty());

	// buffered events are still readable, then the stream ends
	let ended = tokio::time::timeout(WAIT, async {
		while stream.next().await.is_some() {}
	})
	.await;
	assert!(ended.is_ok());
	assert!(stream.is_closed());
}

#[tokio::test]
async fn disconnect_drops_subscriptions() {
	let sup = test_supervisor();
	let stream = sup.connect();
	let sub = stream.subscriber();
	let pid = sup
		.launch(LaunchSpec::new("sleeper", "sleep 30").subscribe(sub, EventKinds::all()))
		.await
		.unwrap();
	assert_eq!(sup.dispatcher().registry().kinds(sub, pid), Some(EventKinds::all()));

	sup.disconnect(sub);
	assert_eq!(sup.dispatcher().registry().kinds(sub, pid), None);
	assert!(matches!(
		sup.subscribe(sub, pid, EventKinds::all()),
		Err(Error::UnknownSubscriber(_))
	));

	sup.kill(pid).await.unwrap();
}

#[tokio::test]
async fn dropped_streams_release_their_subscriptions() {
	let sup = test_supervisor();
	let mut pids = Vec::new();
	let mut streams = Vec::new();
	for _ in 0..20 {
		let stream = sup.connect();
		let pid = sup
			.launch(LaunchSpec::new("sleeper", "sleep 30").subscribe(stream.subscriber(), EventKinds::all()))
			.await
			.unwrap();
		pids.push(pid);
		streams.push(stream);
	}
	let subscribers: Vec<SubscriberId> = streams.iter().map(EventStream::subscriber).collect();
	assert_eq!(sup.dispatcher().registry().subscription_count(), 20);

	drop(streams);

	assert_eq!(sup.dispatcher().registry().subscription_count(), 0);
	assert!(subscribers.iter().all(|s| !sup.dispatcher().is_connected(*s)));

	for pid in pids {
		sup.kill(pid).await.unwrap();
	}
}
