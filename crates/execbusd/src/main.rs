use std::io::Write;
use std::path::PathBuf;

use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use execbus::{Event, EventKinds, ProcessId, ProcessRecord};
use execbusd::{load_global_config, ClientError, Daemon, DaemonClient, DaemonPaths, APP_NAME};

fn main() {
	let args: Vec<String> = std::env::args().skip(1).collect();
	let (socket, args) = take_socket_flag(args);

	let Some(command) = args.first() else {
		print_usage();
		return;
	};

	match command.as_str() {
		"help" | "--help" | "-h" => print_usage(),
		"version" | "--version" | "-V" => println!("execbusd {}", env!("CARGO_PKG_VERSION")),
		"serve" => cmd_serve(socket),
		"stop" => cmd_stop(socket),
		"run" => cmd_run(socket, &args[1..]),
		"ps" | "list" => cmd_ps(socket, &args[1..]),
		"kill" => cmd_kill(socket, &args[1..]),
		"ping" => cmd_ping(socket),
		other => {
			eprintln!("unknown command: {}", other);
			eprintln!("run 'execbusd help' for usage");
			std::process::exit(1);
		}
	}
}

fn print_usage() {
	eprintln!("{} {} - process lifecycle event bus", "execbusd".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} [--socket <path>] <command> [args]", "execbusd".bold());
	eprintln!();

	eprintln!("{}", "daemon".cyan().bold());
	eprintln!("  {}                       Run the daemon in the foreground", "serve".bold());
	eprintln!("  {}                        Stop a running daemon", "stop".bold());
	eprintln!("  {}                        Check the daemon answers", "ping".bold());
	eprintln!();

	eprintln!("{}", "processes".cyan().bold());
	eprintln!("  {} [--name <n>] <command>   Launch and stream output until exit", "run".bold());
	eprintln!("  {} [-a|--all]              List processes (--all includes exited)", "ps".bold());
	eprintln!("  {} <pid>                 Terminate a process group", "kill".bold());
	eprintln!();

	eprintln!("{}", "environment".cyan().bold());
	eprintln!("  RUST_LOG                   Log filter for the daemon (default: info)");
}

/// Pulls `--socket <path>` out of the argument list wherever it appears
/// before `--`.
fn take_socket_flag(args: Vec<String>) -> (Option<PathBuf>, Vec<String>) {
	let mut socket = None;
	let mut rest = Vec::with_capacity(args.len());
	let mut iter = args.into_iter();
	while let Some(arg) = iter.next() {
		if arg == "--" {
			rest.push(arg);
			rest.extend(iter.by_ref());
			break;
		}
		if arg == "--socket" {
			socket = iter.next().map(PathBuf::from);
		} else if let Some(path) = arg.strip_prefix("--socket=") {
			socket = Some(PathBuf::from(path));
		} else {
			rest.push(arg);
		}
	}
	(socket, rest)
}

fn daemon(socket: Option<PathBuf>) -> Daemon {
	let paths = DaemonPaths::new(APP_NAME);
	let config = load_global_config(&paths.config_path());
	let mut daemon = Daemon::new(paths, config);
	if let Some(socket) = socket {
		daemon.paths = daemon.paths.with_socket(socket);
	}
	daemon
}

fn connect(socket: Option<PathBuf>) -> DaemonClient {
	let socket_path = daemon(socket).socket_path();
	match DaemonClient::connect(&socket_path) {
		Ok(client) => client,
		Err(ClientError::NotRunning) => {
			eprintln!(
				"{} daemon not running at {} (start it with 'execbusd serve')",
				"error:".red().bold(),
				socket_path.display()
			);
			std::process::exit(1);
		}
		Err(e) => fail(e),
	}
}

fn fail(e: ClientError) -> ! {
	eprintln!("{} {}", "error:".red().bold(), e);
	std::process::exit(1);
}

// --- Daemon ---

fn cmd_serve(socket: Option<PathBuf>) {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let daemon = daemon(socket);
	let runtime = match tokio::runtime::Runtime::new() {
		Ok(rt) => rt,
		Err(e) => {
			eprintln!("{} failed to start runtime: {}", "error:".red().bold(), e);
			std::process::exit(1);
		}
	};
	if let Err(e) = runtime.block_on(daemon.run()) {
		tracing::error!("daemon failed: {}", e);
		daemon.cleanup();
		std::process::exit(1);
	}
}

fn cmd_stop(socket: Option<PathBuf>) {
	match daemon(socket).stop() {
		Ok(()) => eprintln!("{} daemon stopped", "✓".green()),
		Err(e) => {
			eprintln!("{} {}", "error:".red().bold(), e);
			std::process::exit(1);
		}
	}
}

fn cmd_ping(socket: Option<PathBuf>) {
	let mut client = connect(socket);
	match client.ping() {
		Ok(()) => println!("pong"),
		Err(e) => fail(e),
	}
}

// --- Processes ---

fn cmd_run(socket: Option<PathBuf>, args: &[String]) {
	let mut name = None;
	let mut words = Vec::new();
	let mut iter = args.iter();
	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"--name" | "-n" if words.is_empty() => name = iter.next().cloned(),
			"--" => {
				words.extend(iter.by_ref().cloned());
				break;
			}
			_ => words.push(arg.clone()),
		}
	}
	if words.is_empty() {
		eprintln!("usage: execbusd run [--name <name>] [--] <command...>");
		std::process::exit(1);
	}
	let command_line = words.join(" ");

	let mut client = connect(socket);
	let pid = match client.launch(name.as_deref(), &command_line, Some(EventKinds::all())) {
		Ok(pid) => pid,
		Err(e) => fail(e),
	};

	loop {
		let event = match client.next_event() {
			Ok(event) => event,
			Err(e) => fail(e),
		};
		if event.pid() != pid {
			continue;
		}
		match event {
			Event::Stdout(b) => {
				let mut out = std::io::stdout().lock();
				let _ = out.write_all(b.text.as_bytes());
				let _ = out.flush();
			}
			Event::Stderr(b) => {
				let mut err = std::io::stderr().lock();
				let _ = err.write_all(b.text.as_bytes());
				let _ = err.flush();
			}
			Event::ProcessStarted(b) => {
				eprintln!("{} {} {}", "▶".green(), b.name.bold(), format!("(pid {})", b.native_pid).dimmed());
			}
			Event::ProcessDied(_) => break,
			Event::Subscribed(_) => {}
		}
	}

	let record = match client.status(pid) {
		Ok(record) => record,
		Err(e) => fail(e),
	};
	match record.exit_code {
		Some(0) => eprintln!("{} {} exited", "■".dimmed(), record.name.bold()),
		Some(code) => eprintln!("{} {} exited with code {}", "■".red(), record.name.bold(), code),
		None => eprintln!("{} {} killed by signal", "■".red(), record.name.bold()),
	}
	std::process::exit(record.exit_code.unwrap_or(1));
}

fn cmd_ps(socket: Option<PathBuf>, args: &[String]) {
	let include_exited = args.iter().any(|a| a == "-a" || a == "--all");
	let mut client = connect(socket);
	let processes = match client.list(include_exited) {
		Ok(p) => p,
		Err(e) => fail(e),
	};

	if processes.is_empty() {
		eprintln!("{}", "no processes".dimmed());
		return;
	}
	for record in &processes {
		print_record(record);
	}
}

fn print_record(record: &ProcessRecord) {
	let native = record
		.native_pid
		.map(|p| p.to_string())
		.unwrap_or_else(|| "-".to_string());
	let state = match (record.is_running(), record.exit_code) {
		(true, _) => record.state.as_str().green().to_string(),
		(false, Some(0)) => "exited".dimmed().to_string(),
		(false, Some(code)) => format!("exited {}", code).red().to_string(),
		(false, None) => record.state.as_str().yellow().to_string(),
	};
	println!(
		"{:>4}  {:>7}  {:<16}  {:<10}  {}",
		record.pid.0,
		native,
		record.name.bold(),
		state,
		record.command_line.dimmed()
	);
}

fn cmd_kill(socket: Option<PathBuf>, args: &[String]) {
	let Some(pid) = args.first().and_then(|s| s.parse::<u64>().ok()) else {
		eprintln!("usage: execbusd kill <pid>");
		std::process::exit(1);
	};
	let mut client = connect(socket);
	match client.kill(ProcessId(pid)) {
		Ok(()) => eprintln!("{} sent SIGTERM to {}", "✓".green(), pid),
		Err(e) => fail(e),
	}
}
