use std::process::exit;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, LevelFilter};

use microbit_poll::config::{self, PollerConfig, PortConfig};
use microbit_poll::logging;
use microbit_poll::port;
use microbit_poll::{PollLoop, PortHandle, Session};

#[derive(Parser, Debug)]
#[command(
    name = "microbit-poll",
    about = "Poll micro:bit accelerometer nodes and print rolling magnitudes"
)]
struct Args {
    /// List serial ports with their USB ids and exit
    #[arg(long)]
    list_ports: bool,
    /// USB vendor id of the receiver
    #[arg(long, default_value_t = config::VID_MICROBIT)]
    vid: u16,
    /// USB product id of the receiver
    #[arg(long, default_value_t = config::PID_MICROBIT)]
    pid: u16,
    /// Serial device path; skips vid/pid discovery
    #[arg(long)]
    port: Option<String>,
    #[arg(long, default_value_t = config::BAUD_RATE)]
    baud: u32,
    /// Read timeout in milliseconds
    #[arg(long, default_value_t = 100)]
    timeout_ms: u64,
    /// Number of sensor nodes, polled as <prefix>0 .. <prefix>N-1
    #[arg(long, default_value_t = config::DEFAULT_DEVICE_COUNT)]
    devices: u8,
    /// Poll command prefix
    #[arg(long, default_value = config::POLL_PREFIX)]
    prefix: String,
    /// Time budget of one poll in milliseconds
    #[arg(long, default_value_t = 100)]
    scan_delay_ms: u64,
    /// Samples kept per node
    #[arg(long, default_value_t = config::MAX_HISTORY)]
    history: usize,
    /// Magnitudes per node in each printed snapshot
    #[arg(long, default_value_t = 20)]
    window: usize,
    /// Snapshot interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    refresh_ms: u64,
    /// Stop after this many seconds (runs forever if omitted)
    #[arg(long)]
    duration_secs: Option<u64>,
    /// Log level (overrides MICROBIT_LOG / RUST_LOG)
    #[arg(long)]
    log_level: Option<LevelFilter>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    logging::init_rust_logging_with(args.log_level);

    if args.list_ports {
        return list_ports();
    }
    if args.devices == 0 {
        bail!("--devices must be at least 1");
    }
    if args.history == 0 {
        bail!("--history must be at least 1");
    }

    let port_config = PortConfig {
        vid: args.vid,
        pid: args.pid,
        path: args.port.map(Into::into),
        baud_rate: args.baud,
        read_timeout: Duration::from_millis(args.timeout_ms),
    };
    let poller_config = PollerConfig {
        poll_prefix: args.prefix,
        scan_delay: Duration::from_millis(args.scan_delay_ms),
        max_history: args.history,
        ..PollerConfig::with_device_count(args.devices)
    };

    let handle = PortHandle::open(&port_config)
        .context("microbit not found connected to a serial port")?;

    let session = Session::new(&poller_config);
    let worker = PollLoop::new(handle, session.clone(), &poller_config)
        .spawn()
        .context("failed to start poll loop")?;

    // Consumer: pull a snapshot on its own cadence.
    let exchange = session.exchange();
    let refresh = Duration::from_millis(args.refresh_ms);
    let deadline = args
        .duration_secs
        .map(|s| Instant::now() + Duration::from_secs(s));
    loop {
        thread::sleep(refresh);

        let snapshot = exchange.request(args.window);
        println!("{}", serde_json::to_string(&snapshot)?);
        for (device, sample) in session.store().latest() {
            info!(
                "{} latest: count={:?} acc={:?} mag={:?} age={:?}",
                poller_config.label(device),
                sample.sequence,
                sample.acceleration,
                sample.magnitude,
                sample.captured_at.elapsed()
            );
        }

        if deadline.is_some_and(|d| Instant::now() >= d) || worker.is_finished() {
            break;
        }
    }

    session.cancel_token().cancel();
    let stats = worker
        .join()
        .map_err(|_| anyhow::anyhow!("poll loop panicked"))?;
    println!("{}", serde_json::to_string(&stats)?);
    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = port::list_ports()?;
    println!("Available serial ports:");
    if ports.is_empty() {
        println!("  (none)");
    }
    for p in ports {
        match (p.vid, p.pid) {
            (Some(vid), Some(pid)) => {
                println!("  {} - {} (VID: 0x{:04x}, PID: 0x{:04x})", p.name, p.kind, vid, pid)
            }
            _ => println!("  {} - {}", p.name, p.kind),
        }
    }
    Ok(())
}
