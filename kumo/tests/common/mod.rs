// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Scripted broker fixtures.
//!
//! Each test spawns a loopback listener and a broker script that reads
//! and writes raw MQTT packets with the codec crate. Assertion failures
//! inside the script panic the broker task and surface when the test
//! joins it.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use codec::EncodePacket;

/// Bind a loopback listener and run `script` on it in a background
/// task.
pub async fn start<F, Fut>(script: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(TcpListener) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let _ret = env_logger::builder().is_test(true).try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(script(listener));
    (addr, handle)
}

pub async fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _addr) = listener.accept().await.unwrap();
    stream
}

/// Read exactly one MQTT packet: fixed header byte, remaining length
/// varint, body.
pub async fn read_packet(stream: &mut TcpStream) -> Vec<u8> {
    let mut packet = vec![stream.read_u8().await.unwrap()];

    let mut remaining: usize = 0;
    let mut multiplier: usize = 1;
    loop {
        let byte = stream.read_u8().await.unwrap();
        packet.push(byte);
        remaining += (byte as usize & 0x7f) * multiplier;
        if byte & 0x80 == 0 {
            break;
        }
        multiplier *= 128;
        assert!(multiplier <= 128 * 128 * 128, "malformed remaining length");
    }

    let body_start = packet.len();
    packet.resize(body_start + remaining, 0);
    stream.read_exact(&mut packet[body_start..]).await.unwrap();
    packet
}

/// Control packet type bits of a raw packet.
pub fn packet_type(packet: &[u8]) -> u8 {
    packet[0] >> 4
}

pub const CONNECT: u8 = 1;
pub const PUBLISH: u8 = 3;
pub const PUBACK: u8 = 4;
pub const PUBREC: u8 = 5;
pub const PUBREL: u8 = 6;
pub const PUBCOMP: u8 = 7;
pub const SUBSCRIBE: u8 = 8;
pub const UNSUBSCRIBE: u8 = 10;
pub const PINGREQ: u8 = 12;
pub const DISCONNECT: u8 = 14;

/// Read one packet and assert its type.
pub async fn expect_packet(stream: &mut TcpStream, expected: u8) -> Vec<u8> {
    let packet = read_packet(stream).await;
    assert_eq!(
        packet_type(&packet),
        expected,
        "unexpected packet: {packet:02x?}"
    );
    packet
}

/// Encode and send a packet built with the codec crate.
pub async fn send_packet<P: EncodePacket>(stream: &mut TcpStream, packet: &P) {
    let mut buf = Vec::new();
    packet.encode(&mut buf).unwrap();
    stream.write_all(&buf).await.unwrap();
}

/// Thread-safe recorder shared between a test and its handler.
#[derive(Clone, Default)]
pub struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, item: T) {
        self.items.lock().unwrap().push(item);
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}
