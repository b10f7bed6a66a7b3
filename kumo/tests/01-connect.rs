// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

use codec::v5::{self, Property, ReasonCode};
use codec::{v3, ByteArray, DecodePacket, ProtocolLevel, U16Data};
use kumo::{Client, ClientHandler, ClientStatus, ConnectOptions, ErrorKind};

mod common;

struct Quiet;
impl ClientHandler for Quiet {}

fn options(addr: std::net::SocketAddr) -> ConnectOptions {
    let mut options = ConnectOptions::new("127.0.0.1", addr.port());
    options
        .set_client_id("test-client")
        .set_reconnect_retries(0)
        .set_reconnect_delay(Duration::from_millis(50))
        .set_connect_timeout(Duration::from_secs(5));
    options
}

#[tokio::test]
async fn test_connect_v5() {
    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;

        let packet = common::expect_packet(&mut stream, common::CONNECT).await;
        let mut ba = ByteArray::new(&packet);
        let connect = v5::ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(connect.client_id(), "test-client");
        assert!(connect.clean_session());

        let mut connack = v5::ConnectAckPacket::new(false, ReasonCode::Success);
        connack
            .properties_mut()
            .push(Property::ServerKeepAlive(U16Data::new(25)));
        common::send_packet(&mut stream, &connack).await;

        common::expect_packet(&mut stream, common::DISCONNECT).await;
    })
    .await;

    let mut client = Client::new(options(addr), Quiet);
    client.connect().await.unwrap();
    assert_eq!(client.status(), ClientStatus::Connected);

    let connack = client.connack().unwrap();
    assert!(!connack.session_present);
    assert_eq!(connack.reason_code, 0);
    assert_eq!(connack.server_keep_alive, Some(25));
    assert_eq!(connack.receive_maximum, u16::MAX);

    client.disconnect(ReasonCode::Success).await.unwrap();
    assert_eq!(client.status(), ClientStatus::Disconnected);
    broker.await.unwrap();
}

#[tokio::test]
async fn test_connect_v311() {
    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;

        let packet = common::expect_packet(&mut stream, common::CONNECT).await;
        let mut ba = ByteArray::new(&packet);
        let connect = v3::ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(connect.client_id(), "test-client");

        let connack = v3::ConnectAckPacket::new(false, v3::ConnectReturnCode::Accepted);
        common::send_packet(&mut stream, &connack).await;

        common::expect_packet(&mut stream, common::DISCONNECT).await;
    })
    .await;

    let mut options = options(addr);
    options.set_protocol_level(ProtocolLevel::V4);
    let mut client = Client::new(options, Quiet);
    client.connect().await.unwrap();
    assert_eq!(client.protocol_level(), ProtocolLevel::V4);

    client.disconnect(ReasonCode::Success).await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn test_connect_refused() {
    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        common::expect_packet(&mut stream, common::CONNECT).await;
        let connack = v5::ConnectAckPacket::new(false, ReasonCode::NotAuthorized);
        common::send_packet(&mut stream, &connack).await;
    })
    .await;

    let mut client = Client::new(options(addr), Quiet);
    let err = client.connect().await.unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::ConnectError(135));
    assert!(err.message().contains("Not authorized"));
    assert_eq!(client.status(), ClientStatus::Disconnected);
    assert!(client.connect_error().is_some());
    broker.await.unwrap();
}

#[tokio::test]
async fn test_connect_downgrade_to_v311() {
    let (addr, broker) = common::start(|listener| async move {
        // First attempt is 5.0 and gets refused with the version code.
        let mut stream = common::accept(&listener).await;
        let packet = common::expect_packet(&mut stream, common::CONNECT).await;
        let mut ba = ByteArray::new(&packet);
        let connect = v5::ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(connect.protocol_level(), ProtocolLevel::V5);
        let connack =
            v5::ConnectAckPacket::new(false, ReasonCode::UnsupportedProtocolVersion);
        common::send_packet(&mut stream, &connack).await;
        drop(stream);

        // Second attempt arrives as 3.1.1.
        let mut stream = common::accept(&listener).await;
        let packet = common::expect_packet(&mut stream, common::CONNECT).await;
        let mut ba = ByteArray::new(&packet);
        assert!(v3::ConnectPacket::decode(&mut ba).is_ok());
        let connack = v3::ConnectAckPacket::new(false, v3::ConnectReturnCode::Accepted);
        common::send_packet(&mut stream, &connack).await;

        common::expect_packet(&mut stream, common::DISCONNECT).await;
    })
    .await;

    let mut client = Client::new(options(addr), Quiet);
    client.connect().await.unwrap();
    assert_eq!(client.protocol_level(), ProtocolLevel::V4);
    assert_eq!(client.status(), ClientStatus::Connected);

    client.disconnect(ReasonCode::Success).await.unwrap();
    broker.await.unwrap();
}
