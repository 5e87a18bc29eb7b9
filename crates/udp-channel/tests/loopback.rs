use std::sync::mpsc;

use socket2::Domain;
use udp_channel::{AdaptiveRecvAllocatorHandle, ChannelError, Config, DatagramChannel, Outbound, Payload, RecordingPipeline};
use udp_channel::pipeline::PipelineEvent;

/// Scenario 1 of the distilled spec: three `Addressed` packets queued
/// ahead of a single `on_writable()` invocation should go out in one
/// `sendmmsg` pass, queue empty, all three completions successful.
#[test]
fn batched_send_of_three_packets_completes_in_one_pass() {
    let mut sender = DatagramChannel::new(Domain::IPV4, Config::default()).unwrap();
    sender.bind("127.0.0.1:0".parse().unwrap()).unwrap();

    let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver.set_nonblocking(true).unwrap();
    let receiver_addr = receiver.local_addr().unwrap();

    let mut receipts = Vec::new();
    for byte in [b'A', b'B', b'C'] {
        let (tx, rx) = mpsc::channel();
        sender
            .write(
                Outbound::Addressed {
                    payload: Payload::Owned(vec![byte]),
                    recipient: Some(receiver_addr),
                },
                Box::new(move |r| {
                    let _ = tx.send(r);
                }),
            )
            .unwrap();
        receipts.push(rx);
    }

    let queue_empty = sender.on_writable();
    assert!(queue_empty);
    for rx in receipts {
        assert!(rx.recv().unwrap().is_ok());
    }
}

/// Scenario 5 (GRO fan-out), driven end-to-end: a GSO-segmented send
/// arrives on a GRO-aware channel as `k` equal-sized reads sharing one
/// sender address, in order.
#[test]
fn segmented_send_fans_out_on_receive_when_the_platform_supports_offloads() {
    if !udp_channel::platform::is_supporting_udp_segment() || !udp_channel::platform::is_supporting_udp_gro() {
        // Pure-portable fallback path is covered by the unit tests in
        // `read_path`/`write_path`; this test only exercises the kernel
        // offload when the running kernel actually has it.
        return;
    }

    let gro_config = Config::builder().udp_gro(true).build();
    let mut receiver = DatagramChannel::new(Domain::IPV4, gro_config).unwrap();
    receiver.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let receiver_addr = receiver.local_addr().unwrap();

    let mut sender = DatagramChannel::new(Domain::IPV4, Config::default()).unwrap();
    sender.bind("127.0.0.1:0".parse().unwrap()).unwrap();

    let segment_size = 500usize;
    let payload = vec![7u8; segment_size * 3];
    let (tx, rx) = mpsc::channel();
    sender
        .write(
            Outbound::Segmented {
                payload: Payload::Owned(payload),
                segment_size,
                recipient: Some(receiver_addr),
            },
            Box::new(move |r| {
                let _ = tx.send(r);
            }),
        )
        .unwrap();
    assert!(sender.on_writable());
    assert!(rx.recv().unwrap().is_ok());

    let mut allocator = AdaptiveRecvAllocatorHandle::new();
    let mut pipeline = RecordingPipeline::default();
    receiver.on_readable(&mut allocator, &mut pipeline);

    let reads: Vec<_> = pipeline
        .events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::Read(inbound) => Some(inbound),
            _ => None,
        })
        .collect();
    assert_eq!(reads.len(), 3);
    for read in &reads {
        assert_eq!(read.payload.len(), segment_size);
        assert_eq!(read.sender, sender.local_addr().unwrap());
    }
}

#[test]
fn closing_a_channel_fails_queued_writes_with_closed() {
    let mut sender = DatagramChannel::new(Domain::IPV4, Config::default()).unwrap();
    sender.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();

    let (tx, rx) = mpsc::channel();
    sender
        .write(
            Outbound::Addressed {
                payload: Payload::Owned(vec![1, 2, 3]),
                recipient: Some(peer.local_addr().unwrap()),
            },
            Box::new(move |r| {
                let _ = tx.send(r);
            }),
        )
        .unwrap();

    sender.close().unwrap();
    assert!(matches!(rx.recv().unwrap(), Err(ChannelError::Closed)));
}
