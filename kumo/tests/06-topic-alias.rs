// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

use codec::v5::{self, Property, ReasonCode};
use codec::{QoS, U16Data};
use kumo::{Client, ClientHandler, ConnectOptions, ErrorKind, Message};
use tokio::time::timeout;

mod common;

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
        .set_client_id("alias-client")
        .set_topic_alias_maximum(10)
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
async fn test_alias_binding_and_resolution() {
    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        send_connack(&mut stream).await;

        // Bind alias 4 to the topic, then use the alias alone.
        let mut publish = v5::PublishPacket::new("device/a", QoS::AtMostOnce, b"one").unwrap();
        publish
            .properties_mut()
            .push(Property::TopicAlias(U16Data::new(4)));
        common::send_packet(&mut stream, &publish).await;

        let mut publish = v5::PublishPacket::new("", QoS::AtMostOnce, b"two").unwrap();
        publish
            .properties_mut()
            .push(Property::TopicAlias(U16Data::new(4)));
        common::send_packet(&mut stream, &publish).await;
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
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].topic(), "device/a");
    assert_eq!(received[0].payload(), b"one");
    // The aliased delivery resolves to the bound topic name.
    assert_eq!(received[1].topic(), "device/a");
    assert_eq!(received[1].payload(), b"two");
}

#[tokio::test]
async fn test_unknown_alias_is_protocol_error() {
    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        send_connack(&mut stream).await;

        // Alias 9 was never bound.
        let mut publish = v5::PublishPacket::new("", QoS::AtMostOnce, b"lost").unwrap();
        publish
            .properties_mut()
            .push(Property::TopicAlias(U16Data::new(9)));
        common::send_packet(&mut stream, &publish).await;

        // The client drops the connection without recovery.
        let _leftover = common::read_packet(&mut stream).await;
    })
    .await;

    let messages = common::Recorder::new();
    let handler = Recording {
        messages: messages.clone(),
    };
    let mut client = Client::new(options(addr), handler);
    client.connect().await.unwrap();

    let result = timeout(Duration::from_secs(5), client.run_loop()).await;
    let err = result.expect("run loop should end").unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::ProtocolError);
    assert_eq!(messages.len(), 0);
    broker.await.unwrap();
}
