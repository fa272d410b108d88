use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sockbridge::{Bridge, BridgeConfig, Proto, RecvStatus, SocketBridge, Verdict};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Listening TCP port.
    #[clap(short, long, default_value_t = 8000)]
    port: u16,

    /// Protocol number stamped into headers.
    #[clap(long, default_value = "tcp")]
    proto: Proto,

    /// Number of preallocated packet descriptors.
    #[clap(long, default_value_t = 16)]
    pool_size: usize,

    /// Per-descriptor buffer capacity in bytes.
    #[clap(long, default_value_t = 65535)]
    snaplen: usize,

    /// Poll timeout in milliseconds.
    #[clap(long, default_value_t = 1000)]
    timeout: u64,

    /// Replicate traffic regardless of verdict.
    #[clap(long)]
    passive: bool,

    /// Maximum packets pulled per receive call.
    #[clap(long, default_value_t = 16)]
    batch: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = BridgeConfig {
        port: args.port,
        proto: args.proto,
        snaplen: args.snaplen,
        timeout: Duration::from_millis(args.timeout),
        pool_size: args.pool_size,
        passive: args.passive,
    };

    let mut bridge = SocketBridge::create(config)?;
    bridge.start()?;

    println!("Starting socket bridge:");
    println!("  port: {}", bridge.local_port().unwrap_or(args.port));
    println!("  pool: {} x {} bytes", args.pool_size, args.snaplen);
    println!("  passive: {}", if args.passive { "ON" } else { "OFF" });

    // Termination flag triggered on Ctrl-C; it also kicks the bridge out of
    // a blocked receive.
    let term = Arc::new(AtomicBool::new(false));
    {
        let term = term.clone();
        let interrupt = bridge.interrupt_handle();
        ctrlc::set_handler(move || {
            term.store(true, Ordering::SeqCst);
            interrupt.trigger();
        })
        .expect("Error setting Ctrl-C handler");
    }

    // Atomic counters for received and relayed packets.
    let total_rcv = Arc::new(AtomicU64::new(0));
    let total_fwd = Arc::new(AtomicU64::new(0));

    // Meter thread that prints packet rates every second.
    {
        let total_rcv = total_rcv.clone();
        let total_fwd = total_fwd.clone();
        let term_meter = term.clone();
        thread::spawn(move || {
            let mut prev_rcv = 0;
            let mut prev_fwd = 0;
            while !term_meter.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_secs(1));
                let curr_rcv = total_rcv.load(Ordering::SeqCst);
                let curr_fwd = total_fwd.load(Ordering::SeqCst);
                println!(
                    "pkt/sec: {} fwd/sec: {}",
                    curr_rcv.saturating_sub(prev_rcv),
                    curr_fwd.saturating_sub(prev_fwd)
                );
                prev_rcv = curr_rcv;
                prev_fwd = curr_fwd;
            }
        });
    }

    // Relay loop: everything that arrives is passed straight through.
    let mut batch = Vec::with_capacity(args.batch);
    while !term.load(Ordering::SeqCst) {
        match bridge.receive(args.batch, &mut batch) {
            RecvStatus::Interrupted => continue,
            RecvStatus::NoBuffer => {
                eprintln!("descriptor pool exhausted");
                continue;
            }
            RecvStatus::Ok => {}
        }
        total_rcv.fetch_add(batch.len() as u64, Ordering::SeqCst);
        for token in batch.drain(..) {
            match bridge.finalize(token, Verdict::Pass) {
                Ok(()) => {
                    total_fwd.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => eprintln!("Forward error: {e:?}"),
            }
        }
    }

    bridge.stop();
    let stats = bridge.stats();
    println!(
        "received: {} injected: {} passed: {}",
        stats.packets_received,
        stats.packets_injected,
        stats.verdicts[Verdict::Pass as usize]
    );
    Ok(())
}
