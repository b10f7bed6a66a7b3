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

struct Recording {
    messages: common::Recorder<Message>,
}

impl ClientHandler for Recording {
    fn on_message(&mut self, _client: &mut Client<Self>, message: &Message) -> ReasonCode {
        self.messages.push(message.clone());
        ReasonCode::Success
    }
}

fn options(addr: std::net::SocketAddr) -> ConnectOptions {
    let mut options = ConnectOptions::new("127.0.0.1", addr.port());
    options
        .set_client_id("qos-client")
        .set_reconnect_retries(0)
        .set_reconnect_delay(Duration::from_millis(50));
    options
}

async fn send_connack(stream: &mut tokio::net::TcpStream) {
    common::expect_packet(stream, common::CONNECT).await;
    let connack = v5::ConnectAckPacket::new(false, ReasonCode::Success);
    common::send_packet(stream, &connack).await;
}

#[tokio::test]
async fn test_publish_qos0() {
    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        send_connack(&mut stream).await;

        let packet = common::expect_packet(&mut stream, common::PUBLISH).await;
        let mut ba = ByteArray::new(&packet);
        let publish = v5::PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(publish.qos(), QoS::AtMostOnce);
        assert_eq!(publish.topic(), "t/zero");
        assert_eq!(publish.message(), b"fire and forget");
    })
    .await;

    let mut client = Client::new(options(addr), Quiet);
    client.connect().await.unwrap();
    let packet_id = client
        .publish(&Message::new("t/zero", b"fire and forget", QoS::AtMostOnce))
        .unwrap();
    assert!(packet_id.is_none());

    let _ret = timeout(Duration::from_secs(3), client.run_loop()).await;
    broker.await.unwrap();
}

#[tokio::test]
async fn test_publish_qos1_acknowledged() {
    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        send_connack(&mut stream).await;

        let packet = common::expect_packet(&mut stream, common::PUBLISH).await;
        let mut ba = ByteArray::new(&packet);
        let publish = v5::PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(publish.qos(), QoS::AtLeastOnce);
        assert!(!publish.dup());
        assert_eq!(publish.packet_id(), PacketId::new(1));

        let puback = v5::PublishAckPacket::new(publish.packet_id());
        common::send_packet(&mut stream, &puback).await;
    })
    .await;

    let mut client = Client::new(options(addr), Quiet);
    client.connect().await.unwrap();
    let packet_id = client
        .publish(&Message::new("t/one", b"once", QoS::AtLeastOnce))
        .unwrap();
    assert_eq!(packet_id, Some(PacketId::new(1)));
    assert!(client.has_pending_publishes());

    let result = timeout(Duration::from_secs(5), client.run_loop()).await;
    // The broker closed the connection and the retry policy is zero.
    assert!(result.expect("run loop should end").is_err());
    assert!(!client.has_pending_publishes());
    broker.await.unwrap();
}

#[tokio::test]
async fn test_publish_qos2_handshake() {
    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        send_connack(&mut stream).await;

        let packet = common::expect_packet(&mut stream, common::PUBLISH).await;
        let mut ba = ByteArray::new(&packet);
        let publish = v5::PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(publish.qos(), QoS::ExactOnce);
        let packet_id = publish.packet_id();

        let pubrec = v5::PublishReceivedPacket::new(packet_id);
        common::send_packet(&mut stream, &pubrec).await;

        let packet = common::expect_packet(&mut stream, common::PUBREL).await;
        let mut ba = ByteArray::new(&packet);
        let pubrel = v5::PublishReleasePacket::decode(&mut ba).unwrap();
        assert_eq!(pubrel.packet_id(), packet_id);

        let pubcomp = v5::PublishCompletePacket::new(packet_id);
        common::send_packet(&mut stream, &pubcomp).await;
    })
    .await;

    let mut client = Client::new(options(addr), Quiet);
    client.connect().await.unwrap();
    client
        .publish(&Message::new("t/two", b"exactly once", QoS::ExactOnce))
        .unwrap();

    let result = timeout(Duration::from_secs(5), client.run_loop()).await;
    assert!(result.expect("run loop should end").is_err());
    assert!(!client.has_pending_publishes());
    broker.await.unwrap();
}

#[tokio::test]
async fn test_inbound_qos1_optimistic() {
    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        send_connack(&mut stream).await;

        let mut publish = v5::PublishPacket::new("in/a", QoS::AtLeastOnce, b"hello").unwrap();
        publish.set_packet_id(PacketId::new(9));
        common::send_packet(&mut stream, &publish).await;

        let packet = common::expect_packet(&mut stream, common::PUBACK).await;
        let mut ba = ByteArray::new(&packet);
        let puback = v5::PublishAckPacket::decode(&mut ba).unwrap();
        assert_eq!(puback.packet_id(), PacketId::new(9));
        assert_eq!(puback.reason_code(), ReasonCode::Success);
    })
    .await;

    let messages = common::Recorder::new();
    let handler = Recording {
        messages: messages.clone(),
    };
    let mut client = Client::new(options(addr), handler);
    client.connect().await.unwrap();

    let _ret = timeout(Duration::from_secs(5), client.run_loop()).await;
    broker.await.unwrap();

    let received = messages.items();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].topic(), "in/a");
    assert_eq!(received[0].payload(), b"hello");
    assert_eq!(received[0].qos(), QoS::AtLeastOnce);
}

#[tokio::test]
async fn test_inbound_qos1_callback_reason_code() {
    struct Refusing;
    impl ClientHandler for Refusing {
        fn on_message(&mut self, _client: &mut Client<Self>, _message: &Message) -> ReasonCode {
            ReasonCode::ImplementationSpecificError
        }
    }

    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        send_connack(&mut stream).await;

        let mut publish = v5::PublishPacket::new("in/b", QoS::AtLeastOnce, b"x").unwrap();
        publish.set_packet_id(PacketId::new(3));
        common::send_packet(&mut stream, &publish).await;

        // In non-optimistic mode the callback's code is sent back.
        let packet = common::expect_packet(&mut stream, common::PUBACK).await;
        let mut ba = ByteArray::new(&packet);
        let puback = v5::PublishAckPacket::decode(&mut ba).unwrap();
        assert_eq!(puback.reason_code(), ReasonCode::ImplementationSpecificError);
    })
    .await;

    let mut options = options(addr);
    options.set_optimistic_acknowledgement(false);
    let mut client = Client::new(options, Refusing);
    client.connect().await.unwrap();

    let _ret = timeout(Duration::from_secs(5), client.run_loop()).await;
    broker.await.unwrap();
}

#[tokio::test]
async fn test_inbound_qos2_exchange() {
    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        send_connack(&mut stream).await;

        let mut publish = v5::PublishPacket::new("in/c", QoS::ExactOnce, b"two").unwrap();
        publish.set_packet_id(PacketId::new(5));
        common::send_packet(&mut stream, &publish).await;

        let packet = common::expect_packet(&mut stream, common::PUBREC).await;
        let mut ba = ByteArray::new(&packet);
        assert_eq!(
            v5::PublishReceivedPacket::decode(&mut ba).unwrap().packet_id(),
            PacketId::new(5)
        );

        let pubrel = v5::PublishReleasePacket::new(PacketId::new(5));
        common::send_packet(&mut stream, &pubrel).await;

        let packet = common::expect_packet(&mut stream, common::PUBCOMP).await;
        let mut ba = ByteArray::new(&packet);
        assert_eq!(
            v5::PublishCompletePacket::decode(&mut ba).unwrap().packet_id(),
            PacketId::new(5)
        );
    })
    .await;

    let messages = common::Recorder::new();
    let handler = Recording {
        messages: messages.clone(),
    };
    let mut client = Client::new(options(addr), handler);
    client.connect().await.unwrap();

    let _ret = timeout(Duration::from_secs(5), client.run_loop()).await;
    broker.await.unwrap();

    let received = messages.items();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].qos(), QoS::ExactOnce);
    assert_eq!(received[0].payload(), b"two");
}
