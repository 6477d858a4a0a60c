//! Demo binary: wires a `Stack` to a loopback pair device, runs the
//! fabric, and shuts down cleanly on Ctrl-C. Logging setup, CLI parsing,
//! and signal wiring live here — they are external collaborators to the
//! core, not part of the library.

use std::time::Duration;

use clap::Parser;
use tapstack::config::StackConfig;
use tapstack::device::{DeviceKind, Interface};
use tapstack::drivers::pair::PairDevice;
use tapstack::irq::{IrqRaiser, IRQ_BASE};
use tapstack::StackBuilder;

#[derive(Parser, Debug)]
#[command(name = "tapd", about = "Userspace packet pipeline demo")]
struct Cli {
    /// Periodic tick interval, in milliseconds.
    #[arg(long, default_value_t = 1)]
    tick_ms: u64,

    /// Protocol input FIFO depth.
    #[arg(long, default_value_t = 64)]
    fifo_depth: usize,

    /// Run for this many milliseconds, then shut down.
    #[arg(long, default_value_t = 200)]
    run_for_ms: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = StackConfig {
        tick_interval: Duration::from_millis(cli.tick_ms),
        protocol_fifo_depth: cli.fifo_depth,
        ..StackConfig::default()
    };

    let pair_a = PairDevice::new();
    let pair_b = PairDevice::new();
    PairDevice::link(&pair_a, &pair_b);

    let mut builder = StackBuilder::new(config);
    let dev_a_name = builder.devices_mut().register(DeviceKind::Ethernet, 1500, [0x02, 0, 0, 0, 0, 1], [0xff; 6], Box::new(pair_a));
    let dev_b_name = builder.devices_mut().register(DeviceKind::Ethernet, 1500, [0x02, 0, 0, 0, 0, 2], [0xff; 6], Box::new(pair_b));

    let stack = builder.build()?;

    let dev_a = stack.device(&dev_a_name).unwrap();
    let dev_b = stack.device(&dev_b_name).unwrap();
    dev_a.add_iface(Interface::new_ipv4([10, 0, 0, 1], [255, 255, 255, 0]))?;
    dev_b.add_iface(Interface::new_ipv4([10, 0, 0, 2], [255, 255, 255, 0]))?;
    dev_a.open()?;
    dev_b.open()?;

    let mut fabric = stack.fabric()?;
    fabric.register_device(IRQ_BASE, "net0", dev_a.clone(), None)?;
    fabric.register_device(IRQ_BASE + 1, "net1", dev_b.clone(), None)?;

    let raiser: IrqRaiser = fabric.raiser();
    let running = fabric.run()?;

    tracing::info!(net0 = %dev_a.name, net1 = %dev_b.name, "fabric armed");

    spawn_signal_thread(raiser.clone())?;

    match stack.arp.resolve(&dev_a, [10, 0, 0, 2]) {
        tapstack::arp::Resolution::Incomplete => {
            raiser.raise_irq(IRQ_BASE + 1);
            std::thread::sleep(Duration::from_millis(10));
            raiser.raise_irq(IRQ_BASE);
        }
        other => tracing::warn!(?other, "unexpected immediate resolution on empty cache"),
    }

    std::thread::sleep(Duration::from_millis(cli.run_for_ms));
    tracing::info!(cache = ?stack.arp.snapshot(), "final arp cache");

    running.shutdown();
    Ok(())
}

/// Ctrl-C / SIGTERM fold into the same IRQ_TERMINATE path `shutdown()` uses,
/// so an operator kill and a programmatic shutdown converge on one exit.
#[cfg(unix)]
fn spawn_signal_thread(raiser: IrqRaiser) -> Result<(), Box<dyn std::error::Error>> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    std::thread::Builder::new().name("tapd-signals".into()).spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::info!(signal = sig, "received shutdown signal");
            raiser.raise_irq(tapstack::irq::IRQ_TERMINATE);
        }
    })?;
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_thread(_raiser: IrqRaiser) -> Result<(), Box<dyn std::error::Error>> {
    Ok(())
}
