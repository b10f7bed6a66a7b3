// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

use codec::v5::{self, ReasonCode};
use kumo::{Client, ClientHandler, ConnectOptions};
use tokio::time::timeout;

mod common;

struct Quiet;
impl ClientHandler for Quiet {}

#[tokio::test]
async fn test_pingreq_on_quiet_link() {
    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        common::expect_packet(&mut stream, common::CONNECT).await;
        let connack = v5::ConnectAckPacket::new(false, ReasonCode::Success);
        common::send_packet(&mut stream, &connack).await;

        // With keepalive 1s a ping arrives within roughly a second of
        // silence, and again after the response.
        common::expect_packet(&mut stream, common::PINGREQ).await;
        common::send_packet(&mut stream, &v5::PingResponsePacket::new()).await;

        common::expect_packet(&mut stream, common::PINGREQ).await;
        common::send_packet(&mut stream, &v5::PingResponsePacket::new()).await;
    })
    .await;

    let mut options = ConnectOptions::new("127.0.0.1", addr.port());
    options
        .set_client_id("ping-client")
        .set_keep_alive(1)
        .set_reconnect_retries(0)
        .set_reconnect_delay(Duration::from_millis(50));

    let mut client = Client::new(options, Quiet);
    client.connect().await.unwrap();

    let result = timeout(Duration::from_secs(10), client.run_loop()).await;
    // The script ends by closing the socket; with zero retries the
    // engine surfaces the loss.
    assert!(result.expect("run loop should end").is_err());
    broker.await.unwrap();
}

#[tokio::test]
async fn test_server_keep_alive_is_used() {
    use codec::U16Data;

    let (addr, broker) = common::start(|listener| async move {
        let mut stream = common::accept(&listener).await;
        common::expect_packet(&mut stream, common::CONNECT).await;
        // Client asks for a long keepalive; the server overrides it
        // with one second.
        let mut connack = v5::ConnectAckPacket::new(false, ReasonCode::Success);
        connack
            .properties_mut()
            .push(v5::Property::ServerKeepAlive(U16Data::new(1)));
        common::send_packet(&mut stream, &connack).await;

        common::expect_packet(&mut stream, common::PINGREQ).await;
        common::send_packet(&mut stream, &v5::PingResponsePacket::new()).await;
    })
    .await;

    let mut options = ConnectOptions::new("127.0.0.1", addr.port());
    options
        .set_client_id("ping-client")
        .set_keep_alive(600)
        .set_reconnect_retries(0)
        .set_reconnect_delay(Duration::from_millis(50));

    let mut client = Client::new(options, Quiet);
    client.connect().await.unwrap();
    assert_eq!(client.connack().unwrap().server_keep_alive, Some(1));

    // Without honoring server_keep_alive no ping would be sent for
    // minutes; the script would then time out instead of completing.
    let result = timeout(Duration::from_secs(10), client.run_loop()).await;
    assert!(result.expect("run loop should end").is_err());
    broker.await.unwrap();
}
