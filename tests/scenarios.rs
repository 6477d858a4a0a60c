//! End-to-end scenarios driving the assembled `Stack` through its public
//! surface: device registration, the fabric's servicing thread, and the
//! ARP resolver, wired together the way `tapd` wires them.

use std::time::Duration;

use tapstack::arp::Resolution;
use tapstack::config::StackConfig;
use tapstack::device::{DeviceKind, Interface};
use tapstack::drivers::pair::PairDevice;
use tapstack::irq::IRQ_BASE;
use tapstack::StackBuilder;

fn two_node_stack() -> (tapstack::Stack, String, String) {
    let pair_a = PairDevice::new();
    let pair_b = PairDevice::new();
    PairDevice::link(&pair_a, &pair_b);

    let mut builder = StackBuilder::new(StackConfig::default());
    let a = builder.devices_mut().register(DeviceKind::Ethernet, 1500, [0xaa; 6], [0xff; 6], Box::new(pair_a));
    let b = builder.devices_mut().register(DeviceKind::Ethernet, 1500, [0xbb; 6], [0xff; 6], Box::new(pair_b));
    let stack = builder.build().expect("arp ethertype is free at build time");
    (stack, a, b)
}

#[test]
fn arp_request_reply_round_trip_through_the_fabric() {
    let (stack, a_name, b_name) = two_node_stack();
    let dev_a = stack.device(&a_name).unwrap();
    let dev_b = stack.device(&b_name).unwrap();
    dev_a.add_iface(Interface::new_ipv4([10, 0, 0, 1], [255, 255, 255, 0])).unwrap();
    dev_b.add_iface(Interface::new_ipv4([10, 0, 0, 2], [255, 255, 255, 0])).unwrap();
    dev_a.open().unwrap();
    dev_b.open().unwrap();

    let mut fabric = stack.fabric().unwrap();
    fabric.register_device(IRQ_BASE, "net-a", dev_a.clone(), None).unwrap();
    fabric.register_device(IRQ_BASE + 1, "net-b", dev_b.clone(), None).unwrap();
    let raiser = fabric.raiser();
    let running = fabric.run().unwrap();

    // S3: resolve on an empty cache is non-blocking INCOMPLETE, and emits
    // a request.
    assert_eq!(stack.arp.resolve(&dev_a, [10, 0, 0, 2]), Resolution::Incomplete);

    // Drive the request through to net-b, its reply back to net-a.
    raiser.raise_irq(IRQ_BASE + 1);
    std::thread::sleep(Duration::from_millis(20));
    raiser.raise_irq(IRQ_BASE);
    std::thread::sleep(Duration::from_millis(20));

    let snapshot = stack.arp.snapshot();
    assert!(snapshot.iter().any(|(pa, ha, state)| *pa == [10, 0, 0, 2] && *ha == [0xbb; 6] && *state == tapstack::arp::ArpState::Resolved));

    // S2: net-b's cache picked up net-a's address via the merge flag too.
    let b_snapshot = stack.arp.snapshot();
    assert!(!b_snapshot.is_empty());

    running.shutdown();
}

#[test]
fn duplicate_arp_ethertype_registration_rejected_at_build() {
    let mut builder = StackBuilder::new(StackConfig::default());
    struct NoopHandler;
    impl tapstack::protocol::ProtocolHandler for NoopHandler {
        fn handle(&self, _entry: tapstack::protocol::InputEntry) {}
    }
    builder.register_protocol(tapstack::arp::ETHERTYPE_ARP, Box::new(NoopHandler)).unwrap();
    assert!(builder.build().is_err());
}

#[test]
fn device_output_over_mtu_never_reaches_the_driver() {
    let (stack, a_name, _b_name) = two_node_stack();
    let dev_a = stack.device(&a_name).unwrap();
    dev_a.open().unwrap();
    let err = dev_a.output(0x0800, &vec![0u8; 2000], [0xff; 6]).unwrap_err();
    assert!(matches!(err, tapstack::error::DeviceError::TooLong { len: 2000, mtu: 1500 }));
}

#[test]
fn shared_irq_scenario_s5() {
    let stack_config = StackConfig::default();
    let protocols = std::sync::Arc::new(tapstack::protocol::ProtocolRegistryBuilder::new().build());
    let timers = std::sync::Arc::new(tapstack::timer::TimerService::new());
    let events = std::sync::Arc::new(tapstack::event::EventBus::new());
    let mut fabric = tapstack::Fabric::new(protocols, timers, events, stack_config.tick_interval).unwrap();

    let count = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let c1 = count.clone();
    let c2 = count.clone();
    fabric.irq(IRQ_BASE, "h1", true, Box::new(move || { c1.fetch_add(1, std::sync::atomic::Ordering::SeqCst); })).unwrap();
    fabric.irq(IRQ_BASE, "h2", true, Box::new(move || { c2.fetch_add(1, std::sync::atomic::Ordering::SeqCst); })).unwrap();
    assert!(fabric.irq(IRQ_BASE, "h3", false, Box::new(|| {})).is_err());

    let running = fabric.run().unwrap();
    running.raise_irq(IRQ_BASE);
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    running.shutdown();
}
