// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

use codec::v5::{self, Property, ReasonCode};
use codec::{ByteArray, DecodePacket, PacketId, QoS, VarInt};
use kumo::{Client, ClientHandler, ConnectOptions, Message, Subscription};
use tokio::time::timeout;

mod common;

fn options(addr: std::net::SocketAddr) -> ConnectOptions {
    let mut options = ConnectOptions::new("127.0.0.1", addr.port());
    options
        .set_client_id("sub-client")
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
async fn test_subscribe_granted_qos_downgrade() {
    struct Subscriber {
        granted: common::Recorder<Vec<ReasonCode>>,
    }
    impl ClientHandler for Subscriber {
        fn on_connect(&mut self, client: &mut Client<Self>, _connack: &kumo::ConnackInfo) {
            let mut subscription = Subscription::new("sensor/+", QoS::ExactOnce).unwrap();
            subscription.set_no_local(true);
            client.subscribe(subscription).unwrap();
        }

        fn on_subscribe(
            &mut self,
            _client: &mut Client<Self>,
            _packet_id: PacketId,
            reasons: &[ReasonCode],
            _properties: &v5::Properties,
        ) {
            self.granted.push(reasons.to_vec());
        }
    }

    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        send_connack(&mut stream).await;

        let packet = common::expect_packet(&mut stream, common::SUBSCRIBE).await;
        let mut ba = ByteArray::new(&packet);
        let subscribe = v5::SubscribePacket::decode(&mut ba).unwrap();
        assert_eq!(subscribe.packet_id(), PacketId::new(1));
        assert_eq!(subscribe.topics().len(), 1);
        assert_eq!(subscribe.topics()[0].topic(), "sensor/+");
        assert_eq!(subscribe.topics()[0].qos(), QoS::ExactOnce);
        assert!(subscribe.topics()[0].no_local());

        // Grant only QoS 1.
        let suback =
            v5::SubscribeAckPacket::new(subscribe.packet_id(), ReasonCode::GrantedQoS1);
        common::send_packet(&mut stream, &suback).await;
    })
    .await;

    let granted = common::Recorder::new();
    let handler = Subscriber {
        granted: granted.clone(),
    };
    let mut client = Client::new(options(addr), handler);
    client.connect().await.unwrap();

    let _ret = timeout(Duration::from_secs(5), client.run_loop()).await;
    broker.await.unwrap();

    assert_eq!(granted.items(), [vec![ReasonCode::GrantedQoS1]]);
    let subscription = client.subscriptions().by_topic("sensor/+").unwrap();
    assert!(subscription.acknowledged());
    // The granted QoS never exceeds the requested one.
    assert_eq!(subscription.qos(), QoS::AtLeastOnce);
    assert!(subscription.packet_id().is_none());
}

#[tokio::test]
async fn test_subscription_identifier_delivery() {
    struct Subscriber {
        messages: common::Recorder<Message>,
    }
    impl ClientHandler for Subscriber {
        fn on_connect(&mut self, client: &mut Client<Self>, _connack: &kumo::ConnackInfo) {
            let subscriptions = vec![
                Subscription::new("a/d", QoS::ExactOnce).unwrap(),
                Subscription::new("a/#", QoS::AtMostOnce).unwrap(),
            ];
            client.subscribe_many(subscriptions, Some(21)).unwrap();
        }

        fn on_message(&mut self, _client: &mut Client<Self>, message: &Message) -> ReasonCode {
            self.messages.push(message.clone());
            ReasonCode::Success
        }
    }

    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        send_connack(&mut stream).await;

        let packet = common::expect_packet(&mut stream, common::SUBSCRIBE).await;
        let mut ba = ByteArray::new(&packet);
        let subscribe = v5::SubscribePacket::decode(&mut ba).unwrap();
        assert_eq!(subscribe.topics().len(), 2);
        assert_eq!(subscribe.properties().subscription_identifiers(), [21]);

        let suback = v5::SubscribeAckPacket::with_reasons(
            subscribe.packet_id(),
            vec![ReasonCode::GrantedQoS2, ReasonCode::Success],
        );
        common::send_packet(&mut stream, &suback).await;

        // One delivery matching both overlapping subscriptions.
        let mut publish = v5::PublishPacket::new("a/d", QoS::AtMostOnce, b"overlap").unwrap();
        publish
            .properties_mut()
            .push(Property::SubscriptionIdentifier(VarInt::from(21).unwrap()));
        publish
            .properties_mut()
            .push(Property::SubscriptionIdentifier(VarInt::from(42).unwrap()));
        common::send_packet(&mut stream, &publish).await;
    })
    .await;

    let messages = common::Recorder::new();
    let handler = Subscriber {
        messages: messages.clone(),
    };
    let mut client = Client::new(options(addr), handler);
    client.connect().await.unwrap();

    let _ret = timeout(Duration::from_secs(5), client.run_loop()).await;
    broker.await.unwrap();

    let received = messages.items();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].subscription_identifiers(), [21, 42]);
    // Both registry records share the identifier from the batch.
    assert_eq!(
        client
            .subscriptions()
            .by_subscription_identifier(21)
            .unwrap()
            .subscription_identifier(),
        Some(21)
    );
}

#[tokio::test]
async fn test_unsubscribe_removes_registration() {
    struct Churner {
        unsubacks: common::Recorder<Vec<ReasonCode>>,
    }
    impl ClientHandler for Churner {
        fn on_connect(&mut self, client: &mut Client<Self>, _connack: &kumo::ConnackInfo) {
            let subscription = Subscription::new("x/y", QoS::AtLeastOnce).unwrap();
            client.subscribe(subscription).unwrap();
        }

        fn on_subscribe(
            &mut self,
            client: &mut Client<Self>,
            _packet_id: PacketId,
            _reasons: &[ReasonCode],
            _properties: &v5::Properties,
        ) {
            client.unsubscribe(&["x/y"]).unwrap();
        }

        fn on_unsubscribe(
            &mut self,
            client: &mut Client<Self>,
            _packet_id: PacketId,
            reasons: &[ReasonCode],
        ) {
            self.unsubacks.push(reasons.to_vec());
            client.shutdown(ReasonCode::Success).unwrap();
        }
    }

    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        send_connack(&mut stream).await;

        let packet = common::expect_packet(&mut stream, common::SUBSCRIBE).await;
        let mut ba = ByteArray::new(&packet);
        let subscribe = v5::SubscribePacket::decode(&mut ba).unwrap();
        let suback = v5::SubscribeAckPacket::new(subscribe.packet_id(), ReasonCode::GrantedQoS1);
        common::send_packet(&mut stream, &suback).await;

        let packet = common::expect_packet(&mut stream, common::UNSUBSCRIBE).await;
        let mut ba = ByteArray::new(&packet);
        let unsubscribe = v5::UnsubscribePacket::decode(&mut ba).unwrap();
        assert_eq!(unsubscribe.packet_id(), PacketId::new(2));
        assert_eq!(unsubscribe.topics().len(), 1);

        let unsuback = v5::UnsubscribeAckPacket::with_reasons(
            unsubscribe.packet_id(),
            vec![ReasonCode::Success],
        );
        common::send_packet(&mut stream, &unsuback).await;

        common::expect_packet(&mut stream, common::DISCONNECT).await;
    })
    .await;

    let unsubacks = common::Recorder::new();
    let handler = Churner {
        unsubacks: unsubacks.clone(),
    };
    let mut client = Client::new(options(addr), handler);
    client.connect().await.unwrap();

    let result = timeout(Duration::from_secs(5), client.run_loop()).await;
    assert!(result.expect("run loop should end").is_ok());
    broker.await.unwrap();

    assert_eq!(unsubacks.items(), [vec![ReasonCode::Success]]);
    assert!(client.subscriptions().is_empty());
}
