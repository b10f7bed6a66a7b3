// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

use codec::v5::{self, ReasonCode};
use codec::{ByteArray, DecodePacket, PacketId, QoS};
use kumo::{Client, ClientHandler, ConnectOptions, Message};
use tokio::time::timeout;

mod common;

struct Quiet;
impl ClientHandler for Quiet {}

async fn send_connack(stream: &mut tokio::net::TcpStream, session_present: bool) {
    common::expect_packet(stream, common::CONNECT).await;
    let connack = v5::ConnectAckPacket::new(session_present, ReasonCode::Success);
    common::send_packet(stream, &connack).await;
}

#[tokio::test]
async fn test_redelivery_after_timeout() {
    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        send_connack(&mut stream, false).await;

        // First attempt is ignored on purpose.
        let packet = common::expect_packet(&mut stream, common::PUBLISH).await;
        let mut ba = ByteArray::new(&packet);
        let first = v5::PublishPacket::decode(&mut ba).unwrap();
        assert!(!first.dup());

        // The unacknowledged publish comes back with the dup flag.
        let packet = common::expect_packet(&mut stream, common::PUBLISH).await;
        let mut ba = ByteArray::new(&packet);
        let second = v5::PublishPacket::decode(&mut ba).unwrap();
        assert!(second.dup());
        assert_eq!(second.packet_id(), first.packet_id());
        assert_eq!(second.message(), first.message());

        let puback = v5::PublishAckPacket::new(second.packet_id());
        common::send_packet(&mut stream, &puback).await;
    })
    .await;

    let mut options = ConnectOptions::new("127.0.0.1", addr.port());
    options
        .set_client_id("retry-client")
        .set_retry_deliver_timeout(Duration::from_millis(100))
        .set_reconnect_retries(0)
        .set_reconnect_delay(Duration::from_millis(50));

    let mut client = Client::new(options, Quiet);
    client.connect().await.unwrap();
    client
        .publish(&Message::new("r/a", b"try again", QoS::AtLeastOnce))
        .unwrap();

    let result = timeout(Duration::from_secs(10), client.run_loop()).await;
    assert!(result.expect("run loop should end").is_err());
    assert!(!client.has_pending_publishes());
    broker.await.unwrap();
}

#[tokio::test]
async fn test_redelivery_after_reconnect() {
    let (addr, broker) = common::start(|listener| async move {
        // First connection: swallow the publish and drop the link.
        let mut stream = common::accept(&listener).await;
        send_connack(&mut stream, false).await;
        let packet = common::expect_packet(&mut stream, common::PUBLISH).await;
        let mut ba = ByteArray::new(&packet);
        let first = v5::PublishPacket::decode(&mut ba).unwrap();
        assert!(!first.dup());
        drop(stream);

        // Second connection resumes the session and the publish is
        // replayed with the dup flag set.
        let mut stream = common::accept(&listener).await;
        let packet = common::expect_packet(&mut stream, common::CONNECT).await;
        let mut ba = ByteArray::new(&packet);
        let connect = v5::ConnectPacket::decode(&mut ba).unwrap();
        assert!(!connect.clean_session());
        let connack = v5::ConnectAckPacket::new(true, ReasonCode::Success);
        common::send_packet(&mut stream, &connack).await;

        let packet = common::expect_packet(&mut stream, common::PUBLISH).await;
        let mut ba = ByteArray::new(&packet);
        let replayed = v5::PublishPacket::decode(&mut ba).unwrap();
        assert!(replayed.dup());
        assert_eq!(replayed.packet_id(), PacketId::new(1));
        assert_eq!(replayed.message(), b"survives");

        let puback = v5::PublishAckPacket::new(replayed.packet_id());
        common::send_packet(&mut stream, &puback).await;
    })
    .await;

    let mut options = ConnectOptions::new("127.0.0.1", addr.port());
    options
        .set_client_id("resume-client")
        .set_clean_session(false)
        .set_retry_deliver_timeout(Duration::from_secs(30))
        .set_reconnect_retries(3)
        .set_reconnect_delay(Duration::from_millis(50));

    let mut client = Client::new(options, Quiet);
    client.connect().await.unwrap();
    client
        .publish(&Message::new("r/b", b"survives", QoS::AtLeastOnce))
        .unwrap();

    let result = timeout(Duration::from_secs(10), client.run_loop()).await;
    assert!(result.expect("run loop should end").is_err());
    assert!(!client.has_pending_publishes());
    broker.await.unwrap();
}
