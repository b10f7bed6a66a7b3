// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Asynchronous MQTT client supporting protocol versions 3.1.1 and 5.0
//! over TCP, TLS and WebSocket transports.
//!
//! The engine is a single cooperative task: one event loop drives the
//! transport read loop, the keepalive timer and the QoS redelivery
//! timer. User code registers a [`ClientHandler`] and calls
//! [`Client::connect`], then hands control to [`Client::run_loop`].

mod client;
pub mod connect_options;
mod error;
mod id_pool;
mod keep_alive;
mod message;
mod status;
mod store;
mod stream;
mod subscription;
mod topic_alias;

pub use client::{Client, ClientHandler, ConnackInfo};
pub use connect_options::{ConnectOptions, ConnectType, MqttsConnect, TlsType, WsConnect,
    WssConnect, UNLIMITED_RECONNECT_RETRIES};
pub use error::{connect_error_message, Error, ErrorKind};
pub use id_pool::PacketIdPool;
pub use keep_alive::{KeepAliveDecision, KeepAliveState};
pub use message::Message;
pub use status::ClientStatus;
pub use store::{HeapPendingStore, PendingStore};
pub use subscription::{Subscription, SubscriptionRegistry};
pub use topic_alias::TopicAliasTable;

// Wire-level vocabulary shared with the codec crate.
pub use codec::v5::{Properties, ReasonCode, RetainHandling};
pub use codec::{PacketId, ProtocolLevel, QoS};
