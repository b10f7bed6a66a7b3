// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The client engine.
//!
//! A [`Client`] owns the transport, the packet id pool, the pending
//! publish store, the subscription registry and the topic alias table.
//! Everything runs on one cooperative task: [`Client::connect`] performs
//! the handshake inline and [`Client::run_loop`] multiplexes the
//! transport read loop, the keepalive timer and the redelivery timer
//! with `tokio::select!`.
//!
//! Outbound operations ([`publish`](Client::publish),
//! [`subscribe`](Client::subscribe), ...) are synchronous: they build
//! the packet, record the required state and place the bytes in an
//! outgoing queue, which the engine writes to the transport in call
//! order. This is what lets [`ClientHandler`] callbacks, which run on
//! the engine task, issue operations themselves.

mod handler;

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::time::{interval, sleep, timeout, Instant};

use codec::v5::{self, Properties, Property, ReasonCode};
use codec::{v3, BoolData, EncodePacket, PacketId, ProtocolLevel, QoS, U16Data, U32Data};

use crate::connect_options::{ConnectOptions, UNLIMITED_RECONNECT_RETRIES};
use crate::error::{Error, ErrorKind};
use crate::id_pool::PacketIdPool;
use crate::keep_alive::{KeepAliveDecision, KeepAliveState};
use crate::message::Message;
use crate::status::ClientStatus;
use crate::store::{HeapPendingStore, PendingStore};
use crate::stream::Stream;
use crate::subscription::{Subscription, SubscriptionRegistry};
use crate::topic_alias::TopicAliasTable;

/// How often the redelivery timer looks for expired entries in the
/// pending publish store.
const RETRY_CHECK_PERIOD: Duration = Duration::from_millis(500);

/// Dup flag bit in byte 1 of a PUBLISH packet.
const PUBLISH_DUP_BIT: u8 = 0b0000_1000;

/// Server view established by the CONNACK packet.
#[derive(Clone, Debug)]
pub struct ConnackInfo {
    pub session_present: bool,

    /// Raw code from the wire: a 3.1.1 return code or a 5.0 reason
    /// code. Zero is success in both.
    pub reason_code: u8,

    /// Identifier the server assigned when the client connected with an
    /// empty client id.
    pub assigned_client_id: Option<String>,

    /// Keepalive selected by the server, which overrides ours.
    pub server_keep_alive: Option<u16>,

    pub receive_maximum: u16,
    pub maximum_qos: QoS,
    pub retain_available: bool,
    pub wildcard_subscription_available: bool,
    pub subscription_identifier_available: bool,
    pub shared_subscription_available: bool,

    /// The full property list, empty on 3.1.1 connections.
    pub properties: Properties,
}

impl ConnackInfo {
    fn from_v3(packet: &v3::ConnectAckPacket) -> Self {
        Self {
            session_present: packet.session_present(),
            reason_code: packet.return_code() as u8,
            assigned_client_id: None,
            server_keep_alive: None,
            receive_maximum: u16::MAX,
            maximum_qos: QoS::ExactOnce,
            retain_available: true,
            wildcard_subscription_available: true,
            subscription_identifier_available: false,
            shared_subscription_available: false,
            properties: Properties::new(),
        }
    }

    fn from_v5(packet: &v5::ConnectAckPacket) -> Self {
        let properties = packet.properties().clone();
        Self {
            session_present: packet.session_present(),
            reason_code: packet.reason_code() as u8,
            assigned_client_id: properties
                .assigned_client_identifier()
                .map(str::to_string),
            server_keep_alive: properties.server_keep_alive(),
            receive_maximum: properties.receive_maximum().unwrap_or(u16::MAX),
            maximum_qos: properties.maximum_qos().unwrap_or(QoS::ExactOnce),
            retain_available: properties.available_flag(v5::PropertyType::RetainAvailable),
            wildcard_subscription_available: properties
                .available_flag(v5::PropertyType::WildcardSubscriptionAvailable),
            subscription_identifier_available: properties
                .available_flag(v5::PropertyType::SubscriptionIdentifierAvailable),
            shared_subscription_available: properties
                .available_flag(v5::PropertyType::SharedSubscriptionAvailable),
            properties,
        }
    }
}

/// Event callbacks of the client.
///
/// All methods have no-op defaults, so an implementation only overrides
/// what it cares about. Callbacks run on the engine task and receive
/// the client itself, so they can publish, subscribe or unsubscribe in
/// response to events. In non-optimistic mode the value returned by
/// [`on_message`](Self::on_message) becomes the reason code of the
/// PUBACK/PUBREC for that message.
#[allow(unused_variables)]
pub trait ClientHandler: Send + Sized {
    /// A CONNACK with reason 0 was received.
    fn on_connect(&mut self, client: &mut Client<Self>, connack: &ConnackInfo) {}

    /// An application message arrived.
    fn on_message(&mut self, client: &mut Client<Self>, message: &Message) -> ReasonCode {
        ReasonCode::Success
    }

    /// The connection was closed: by the broker (with its DISCONNECT
    /// reason code), by a transport error, or by a local `disconnect`.
    fn on_disconnect(&mut self, reason: Option<ReasonCode>, error: Option<&Error>) {}

    /// SUBACK arrived; one reason code per filter, in request order.
    fn on_subscribe(
        &mut self,
        client: &mut Client<Self>,
        packet_id: PacketId,
        reasons: &[ReasonCode],
        properties: &Properties,
    ) {
    }

    /// UNSUBACK arrived; the reason list is empty on 3.1.1.
    fn on_unsubscribe(&mut self, client: &mut Client<Self>, packet_id: PacketId, reasons: &[ReasonCode]) {
    }
}

/// Asynchronous MQTT client.
pub struct Client<H: ClientHandler> {
    options: ConnectOptions,

    /// Effective protocol version. Starts from the configured one and
    /// may be downgraded to 3.1.1 when the broker answers a 5.0
    /// CONNECT with return code 1.
    protocol_level: ProtocolLevel,

    stream: Stream,
    status: ClientStatus,

    /// `None` only while a callback borrows the handler.
    handler: Option<H>,

    keep_alive: KeepAliveState,
    id_pool: PacketIdPool,
    pending: Box<dyn PendingStore>,
    subscriptions: SubscriptionRegistry,
    topic_aliases: TopicAliasTable,

    /// Packets queued by the synchronous operations, flushed by the
    /// engine in call order.
    outgoing: VecDeque<Vec<u8>>,

    /// QoS 2 ids for which PUBREL was sent and PUBCOMP is awaited.
    releasing: HashSet<u16>,

    /// Topics of in-flight UNSUBSCRIBE packets, by packet id.
    unsubscribing: HashMap<u16, Vec<String>>,

    connack: Option<ConnackInfo>,
    connect_error: Option<Error>,
    failed_connections: usize,
    reconnecting_now: bool,

    /// True between `connect()` and `disconnect()`; a lost transport
    /// triggers reconnection only while active.
    is_active: bool,

    read_buf: Vec<u8>,
}

impl<H: ClientHandler> Client<H> {
    /// Create a client with the default in-memory pending store.
    #[must_use]
    pub fn new(options: ConnectOptions, handler: H) -> Self {
        let store = HeapPendingStore::new(options.retry_deliver_timeout());
        Self::with_store(options, handler, Box::new(store))
    }

    /// Create a client with a custom [`PendingStore`], e.g. a durable
    /// one.
    #[must_use]
    pub fn with_store(options: ConnectOptions, handler: H, store: Box<dyn PendingStore>) -> Self {
        let protocol_level = options.protocol_level();
        let keep_alive = KeepAliveState::new(options.keep_alive());
        Self {
            options,
            protocol_level,
            stream: Stream::None,
            status: ClientStatus::Initialized,
            handler: Some(handler),
            keep_alive,
            id_pool: PacketIdPool::new(),
            pending: store,
            subscriptions: SubscriptionRegistry::new(),
            topic_aliases: TopicAliasTable::new(),
            outgoing: VecDeque::new(),
            releasing: HashSet::new(),
            unsubscribing: HashMap::new(),
            connack: None,
            connect_error: None,
            failed_connections: 0,
            reconnecting_now: false,
            is_active: false,
            read_buf: Vec::with_capacity(4096),
        }
    }

    #[must_use]
    pub fn connect_options(&self) -> &ConnectOptions {
        &self.options
    }

    #[must_use]
    pub const fn status(&self) -> ClientStatus {
        self.status
    }

    #[must_use]
    pub const fn protocol_level(&self) -> ProtocolLevel {
        self.protocol_level
    }

    /// Server view from the last successful CONNACK.
    #[must_use]
    pub const fn connack(&self) -> Option<&ConnackInfo> {
        self.connack.as_ref()
    }

    /// Error stored from the last refused CONNACK.
    #[must_use]
    pub const fn connect_error(&self) -> Option<&Error> {
        self.connect_error.as_ref()
    }

    #[must_use]
    pub const fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Access the registered handler. `None` only while a callback of
    /// the handler itself is running.
    #[must_use]
    pub const fn handler(&self) -> Option<&H> {
        self.handler.as_ref()
    }

    /// Whether any QoS>0 publish is still awaiting its terminal
    /// acknowledgement.
    #[must_use]
    pub fn has_pending_publishes(&self) -> bool {
        !self.pending.is_empty()
    }

    #[must_use]
    pub const fn failed_connections(&self) -> usize {
        self.failed_connections
    }

    pub fn set_reconnect_retries(&mut self, retries: usize) {
        self.options.set_reconnect_retries(retries);
    }

    pub fn set_reconnect_delay(&mut self, delay: Duration) {
        self.options.set_reconnect_delay(delay);
    }

    /// Stop any future reconnection attempts.
    pub fn stop_reconnect(&mut self) {
        self.options.set_reconnect_retries(0);
    }

    /// Dial the broker and run the CONNECT/CONNACK handshake.
    ///
    /// Resolves once the session is established and the pending publish
    /// store is drained, so no unacknowledged QoS>0 publish from a
    /// previous session lingers across the handshake. When a 5.0
    /// CONNECT is answered with return code 1, the client downgrades to
    /// 3.1.1 and dials again.
    ///
    /// # Errors
    ///
    /// Returns error if the transport cannot be established or the
    /// broker refuses the connection.
    pub async fn connect(&mut self) -> Result<(), Error> {
        if matches!(
            self.status,
            ClientStatus::Connecting | ClientStatus::Authenticating | ClientStatus::Connected
        ) {
            return Err(Error::new(
                ErrorKind::InvalidClientStatus,
                "already connected or connecting",
            ));
        }

        self.is_active = true;
        let clean_session = self.options.clean_session();

        loop {
            match self.dial_and_handshake(clean_session).await {
                Ok(()) => break,
                Err(err) => {
                    self.failed_connections += 1;
                    if self.should_downgrade(&err) {
                        log::info!("connect: downgrading to MQTT 3.1.1");
                        self.protocol_level = ProtocolLevel::V4;
                        continue;
                    }
                    self.connect_error = Some(err.clone());
                    self.stream.close().await;
                    self.is_active = false;
                    self.status = ClientStatus::Disconnected;
                    return Err(err);
                }
            }
        }

        self.replay_session().await?;
        self.flush_outgoing().await?;

        // Drain the pending store before reporting the connect done.
        let deadline = Instant::now() + self.options.connect_timeout();
        while !self.pending.is_empty() {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| Error::new(ErrorKind::SocketError, "pending drain timed out"))?;
            self.read_and_handle_once(remaining).await?;
            self.flush_outgoing().await?;
        }

        Ok(())
    }

    /// Drive the engine: the transport read loop, the keepalive timer,
    /// the QoS redelivery timer and the outgoing queue.
    ///
    /// Returns `Ok(())` after a local [`disconnect`](Self::disconnect)
    /// or [`shutdown`](Self::shutdown); transport failures and broker
    /// disconnects are handled internally by the reconnect policy and
    /// only surface here once the policy gives up.
    ///
    /// # Errors
    ///
    /// Returns error on a malformed inbound packet, a protocol
    /// violation, or when the reconnect policy is exhausted.
    pub async fn run_loop(&mut self) -> Result<(), Error> {
        let mut keep_alive_period = self.keep_alive.period();
        let mut keep_alive_timer = interval(keep_alive_period);
        keep_alive_timer.reset();
        let mut retry_timer = interval(RETRY_CHECK_PERIOD);

        loop {
            self.flush_outgoing().await?;

            if !self.is_active {
                self.stream.close().await;
                self.status = ClientStatus::Disconnected;
                return Ok(());
            }

            // CONNACK may have replaced the keepalive value.
            if self.keep_alive.period() != keep_alive_period {
                keep_alive_period = self.keep_alive.period();
                keep_alive_timer = interval(keep_alive_period);
                keep_alive_timer.reset();
            }

            tokio::select! {
                ret = self.stream.read_buf(&mut self.read_buf) => {
                    match ret {
                        Ok(0) => {
                            log::warn!("run_loop: connection reset by peer");
                            self.handle_connection_lost(None).await?;
                        }
                        Ok(_n_recv) => {
                            if let Err(err) = self.process_buffer().await {
                                self.handle_engine_error(err).await?;
                            }
                        }
                        Err(err) => {
                            log::warn!("run_loop: transport error: {err}");
                            self.handle_connection_lost(Some(err)).await?;
                        }
                    }
                }
                _ = keep_alive_timer.tick() => {
                    self.on_keep_alive_tick().await?;
                }
                _ = retry_timer.tick() => {
                    self.on_retry_tick().await?;
                }
            }

            if self.status == ClientStatus::Reconnecting {
                self.reconnect().await?;
            }
        }
    }

    /// Send DISCONNECT and close the transport.
    ///
    /// Cancels reconnection; never fails when the transport is already
    /// gone.
    ///
    /// # Errors
    ///
    /// Returns error if encoding the DISCONNECT packet fails.
    pub async fn disconnect(&mut self, reason_code: ReasonCode) -> Result<(), Error> {
        self.disconnect_with(reason_code, Properties::new()).await
    }

    /// Like [`disconnect`](Self::disconnect), with DISCONNECT
    /// properties (e.g. a session expiry interval). The properties are
    /// dropped on a 3.1.1 connection.
    ///
    /// # Errors
    ///
    /// Returns error if encoding the DISCONNECT packet fails.
    pub async fn disconnect_with(
        &mut self,
        reason_code: ReasonCode,
        properties: Properties,
    ) -> Result<(), Error> {
        self.is_active = false;

        if self.status == ClientStatus::Connected && !self.stream.is_closing() {
            self.status = ClientStatus::Disconnecting;
            let _ret = self.flush_outgoing().await;
            let buf = self.build_disconnect_packet(reason_code, properties)?;
            // The socket may already be dead; disconnect still succeeds.
            if let Err(err) = self.send_raw(&buf).await {
                log::warn!("disconnect: failed to send packet: {err}");
            }
        }

        self.stream.close().await;
        self.topic_aliases.clear();
        self.status = ClientStatus::Disconnected;
        if let Some(mut handler) = self.handler.take() {
            handler.on_disconnect(None, None);
            self.handler = Some(handler);
        }
        Ok(())
    }

    /// Queue a DISCONNECT and stop the engine. The callback-side
    /// counterpart of [`disconnect`](Self::disconnect): the packet goes
    /// out with the next flush and `run_loop` returns afterwards.
    ///
    /// # Errors
    ///
    /// Returns error if encoding the DISCONNECT packet fails.
    pub fn shutdown(&mut self, reason_code: ReasonCode) -> Result<(), Error> {
        if self.status == ClientStatus::Connected {
            self.status = ClientStatus::Disconnecting;
            let buf = self.build_disconnect_packet(reason_code, Properties::new())?;
            self.outgoing.push_back(buf);
        }
        self.is_active = false;
        Ok(())
    }

    /// Publish an application message.
    ///
    /// The packet is written by the engine in call order. For QoS>0 a
    /// packet id is allocated and the serialized packet is kept in the
    /// pending store until the terminal acknowledgement; the id is
    /// returned for correlation.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is too large, the topic is invalid,
    /// or all packet ids are in use.
    pub fn publish(&mut self, message: &Message) -> Result<Option<PacketId>, Error> {
        message.validate()?;

        let packet_id = if message.qos() == QoS::AtMostOnce {
            None
        } else {
            Some(self.id_pool.next_id()?)
        };

        let buf = match self.protocol_level {
            ProtocolLevel::V5 => {
                let mut packet =
                    v5::PublishPacket::new(message.topic(), message.qos(), message.payload())?;
                packet.set_retain(message.retain());
                if let Some(packet_id) = packet_id {
                    packet.set_packet_id(packet_id);
                }
                *packet.properties_mut() = message.to_properties()?;
                encode_packet(&packet)?
            }
            _ => {
                let mut packet =
                    v3::PublishPacket::new(message.topic(), message.qos(), message.payload())?;
                packet.set_retain(message.retain());
                if let Some(packet_id) = packet_id {
                    packet.set_packet_id(packet_id);
                }
                encode_packet(&packet)?
            }
        };

        log::debug!(
            "send publish on {:?}, qos {:?}, {} bytes",
            message.topic(),
            message.qos(),
            message.payload().len()
        );
        if let Some(packet_id) = packet_id {
            self.pending.push(packet_id, buf.clone());
        }
        self.outgoing.push_back(buf);
        Ok(packet_id)
    }

    /// Subscribe to a single topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if no packet id is free.
    pub fn subscribe(&mut self, subscription: Subscription) -> Result<PacketId, Error> {
        let identifier = subscription.subscription_identifier();
        self.subscribe_many(vec![subscription], identifier)
    }

    /// Subscribe to several filters with one SUBSCRIBE packet; all of
    /// them share one packet id, and `subscription_identifier` is
    /// propagated to every entry.
    ///
    /// # Errors
    ///
    /// Returns error if `subscriptions` is empty or no packet id is
    /// free.
    pub fn subscribe_many(
        &mut self,
        mut subscriptions: Vec<Subscription>,
        subscription_identifier: Option<usize>,
    ) -> Result<PacketId, Error> {
        if subscriptions.is_empty() {
            return Err(Error::new(ErrorKind::ConfigError, "no topic filters given"));
        }

        let packet_id = self.id_pool.next_id()?;
        for subscription in &mut subscriptions {
            if let Some(identifier) = subscription_identifier {
                subscription.set_subscription_identifier(identifier);
            }
            subscription.set_packet_id(Some(packet_id));
            subscription.set_acknowledged(false);
        }

        let buf = match self.protocol_level {
            ProtocolLevel::V5 => {
                let mut topics = Vec::with_capacity(subscriptions.len());
                for subscription in &subscriptions {
                    let mut topic =
                        v5::SubscribeTopic::new(subscription.topic(), subscription.qos())?;
                    topic
                        .set_no_local(subscription.no_local())
                        .set_retain_as_published(subscription.retain_as_published())
                        .set_retain_handling(subscription.retain_handling());
                    topics.push(topic);
                }
                let mut packet = v5::SubscribePacket::with_topics(packet_id, topics)?;
                if let Some(identifier) = subscription_identifier {
                    let identifier =
                        codec::VarInt::from(identifier).map_err(codec::EncodeError::from)?;
                    packet
                        .properties_mut()
                        .push(Property::SubscriptionIdentifier(identifier));
                }
                encode_packet(&packet)?
            }
            _ => {
                let mut topics = Vec::with_capacity(subscriptions.len());
                for subscription in &subscriptions {
                    topics.push(v3::SubscribeTopic::new(
                        subscription.topic(),
                        subscription.qos(),
                    )?);
                }
                let packet = v3::SubscribePacket::with_topics(packet_id, topics)?;
                encode_packet(&packet)?
            }
        };

        for subscription in subscriptions {
            log::info!("subscribe to: {}", subscription.topic());
            self.subscriptions.add(subscription);
        }
        self.outgoing.push_back(buf);
        Ok(packet_id)
    }

    /// Re-send a SUBSCRIBE for an already registered filter, e.g. after
    /// a partial SUBACK failure.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is unknown or no packet id is free.
    pub fn resubscribe(&mut self, topic: &str) -> Result<PacketId, Error> {
        let subscription = self.subscriptions.by_topic(topic).cloned().ok_or_else(|| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("no subscription for topic: {topic}"),
            )
        })?;
        let identifier = subscription.subscription_identifier();
        self.subscribe_many(vec![subscription], identifier)
    }

    /// Remove one or more topic filters.
    ///
    /// # Errors
    ///
    /// Returns error if `topics` is empty or invalid, or no packet id
    /// is free.
    pub fn unsubscribe(&mut self, topics: &[&str]) -> Result<PacketId, Error> {
        if topics.is_empty() {
            return Err(Error::new(ErrorKind::ConfigError, "no topic filters given"));
        }
        log::info!("unsubscribe from: {topics:?}");

        let mut filters = Vec::with_capacity(topics.len());
        for topic in topics {
            filters.push(codec::SubTopic::new(topic)?);
        }

        let packet_id = self.id_pool.next_id()?;
        let buf = match self.protocol_level {
            ProtocolLevel::V5 => {
                encode_packet(&v5::UnsubscribePacket::with_topics(packet_id, filters)?)?
            }
            _ => encode_packet(&v3::UnsubscribePacket::with_topics(packet_id, filters)?)?,
        };

        self.unsubscribing.insert(
            packet_id.value(),
            topics.iter().map(|t| (*t).to_string()).collect(),
        );
        self.outgoing.push_back(buf);
        Ok(packet_id)
    }

    // ---- connection internals ----

    fn should_downgrade(&self, err: &Error) -> bool {
        self.protocol_level == ProtocolLevel::V5
            && matches!(err.kind(), ErrorKind::ConnectError(1 | 132))
    }

    async fn dial_and_handshake(&mut self, clean_session: bool) -> Result<(), Error> {
        self.read_buf.clear();
        self.topic_aliases.clear();
        self.stream = Stream::connect(&self.options).await?;
        self.status = ClientStatus::Connecting;
        self.keep_alive = KeepAliveState::new(self.options.keep_alive());

        let buf = self.build_connect_packet(clean_session)?;
        self.send_raw(&buf).await?;
        self.status = ClientStatus::Authenticating;

        // Wait for CONNACK.
        let deadline = Instant::now() + self.options.connect_timeout();
        while self.status != ClientStatus::Connected {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| Error::new(ErrorKind::SocketError, "handshake timed out"))?;
            self.read_and_handle_once(remaining).await?;
        }
        Ok(())
    }

    fn build_connect_packet(&self, clean_session: bool) -> Result<Vec<u8>, Error> {
        let options = &self.options;
        match self.protocol_level {
            ProtocolLevel::V5 => {
                let mut packet = v5::ConnectPacket::new(options.client_id())?;
                packet
                    .set_clean_session(clean_session)
                    .set_keep_alive(options.keep_alive());
                if let Some(username) = options.username() {
                    packet.set_username(username)?;
                }
                if let Some(password) = options.password() {
                    packet.set_password(password)?;
                }
                if let Some(will) = options.will() {
                    packet.set_will(will.topic(), will.payload(), will.qos(), will.retain())?;
                    *packet.will_properties_mut() = will.to_properties()?;
                }

                let properties = packet.properties_mut();
                if let Some(seconds) = options.session_expiry_interval() {
                    properties.push(Property::SessionExpiryInterval(U32Data::new(seconds)));
                }
                if let Some(maximum) = options.receive_maximum() {
                    properties.push(Property::ReceiveMaximum(U16Data::new(maximum)));
                }
                if let Some(bytes) = options.maximum_packet_size() {
                    properties.push(Property::MaximumPacketSize(U32Data::new(bytes)));
                }
                if let Some(maximum) = options.topic_alias_maximum() {
                    properties.push(Property::TopicAliasMaximum(U16Data::new(maximum)));
                }
                if let Some(on) = options.request_problem_information() {
                    properties.push(Property::RequestProblemInformation(BoolData::new(on)));
                }
                if let Some(on) = options.request_response_information() {
                    properties.push(Property::RequestResponseInformation(BoolData::new(on)));
                }

                encode_packet(&packet)
            }
            _ => {
                let mut packet = v3::ConnectPacket::new(options.client_id())?;
                packet
                    .set_clean_session(clean_session)
                    .set_keep_alive(options.keep_alive());
                if let Some(username) = options.username() {
                    packet.set_username(username)?;
                }
                if let Some(password) = options.password() {
                    packet.set_password(password)?;
                }
                if let Some(will) = options.will() {
                    packet.set_will(will.topic(), will.payload(), will.qos(), will.retain())?;
                }
                encode_packet(&packet)
            }
        }
    }

    fn build_disconnect_packet(
        &self,
        reason_code: ReasonCode,
        properties: Properties,
    ) -> Result<Vec<u8>, Error> {
        match self.protocol_level {
            ProtocolLevel::V5 => {
                let mut packet = v5::DisconnectPacket::new();
                packet.set_reason_code(reason_code)?;
                *packet.properties_mut() = properties;
                encode_packet(&packet)
            }
            _ => encode_packet(&v3::DisconnectPacket::new()),
        }
    }

    /// Re-send the in-flight state of the previous session: every
    /// pending QoS>0 publish with the dup bit set, and a PUBREL for
    /// every QoS 2 exchange that had already progressed past PUBREC.
    async fn replay_session(&mut self) -> Result<(), Error> {
        for (packet_id, mut packet) in self.pending.take_all() {
            packet[0] |= PUBLISH_DUP_BIT;
            log::info!("replay pending publish: {packet_id}");
            self.send_raw(&packet).await?;
            self.pending.push(packet_id, packet);
        }

        let releasing: Vec<u16> = self.releasing.iter().copied().collect();
        for id in releasing {
            self.send_pubrel(PacketId::new(id)).await?;
        }
        Ok(())
    }

    /// Read once from the transport with a timeout and feed the parser.
    async fn read_and_handle_once(&mut self, wait: Duration) -> Result<(), Error> {
        let n_recv = timeout(wait, self.stream.read_buf(&mut self.read_buf))
            .await
            .map_err(|_| Error::new(ErrorKind::SocketError, "read timed out"))??;
        if n_recv == 0 {
            return Err(Error::new(ErrorKind::SocketError, "connection reset"));
        }
        self.process_buffer().await
    }

    async fn flush_outgoing(&mut self) -> Result<(), Error> {
        if self.stream.is_closing() {
            return Ok(());
        }
        if !matches!(
            self.status,
            ClientStatus::Connected | ClientStatus::Disconnecting
        ) {
            return Ok(());
        }
        while let Some(buf) = self.outgoing.pop_front() {
            self.send_raw(&buf).await?;
        }
        Ok(())
    }

    async fn on_keep_alive_tick(&mut self) -> Result<(), Error> {
        if self.stream.is_closing() || self.status != ClientStatus::Connected {
            return Ok(());
        }
        match self.keep_alive.check() {
            KeepAliveDecision::Noop => Ok(()),
            KeepAliveDecision::SendPing => self.send_ping_request().await,
            KeepAliveDecision::LinkDead => {
                log::warn!("keepalive: no data for two periods, closing connection");
                self.handle_connection_lost(None).await
            }
        }
    }

    async fn on_retry_tick(&mut self) -> Result<(), Error> {
        if self.status != ClientStatus::Connected || self.stream.is_closing() {
            return Ok(());
        }
        while let Some((packet_id, mut packet)) = self.pending.pop_expired() {
            packet[0] |= PUBLISH_DUP_BIT;
            log::info!("redeliver publish: {packet_id}");
            self.send_raw(&packet).await?;
            // Re-pushed with a fresh stamp: the next retry is one full
            // timeout after this send.
            self.pending.push(packet_id, packet);
        }
        Ok(())
    }

    async fn send_ping_request(&mut self) -> Result<(), Error> {
        log::debug!("send ping request");
        let buf = match self.protocol_level {
            ProtocolLevel::V5 => encode_packet(&v5::PingRequestPacket::new())?,
            _ => encode_packet(&v3::PingRequestPacket::new())?,
        };
        self.send_raw(&buf).await
    }

    /// The transport died or the broker closed the session; decide
    /// between reconnecting and giving up.
    async fn handle_connection_lost(&mut self, error: Option<Error>) -> Result<(), Error> {
        self.stream.close().await;
        self.topic_aliases.clear();

        if !self.is_active {
            self.status = ClientStatus::Disconnected;
            return Ok(());
        }

        if let Some(mut handler) = self.handler.take() {
            handler.on_disconnect(None, error.as_ref());
            self.handler = Some(handler);
        }
        self.status = ClientStatus::Reconnecting;
        Ok(())
    }

    /// Malformed packets and protocol violations drop the connection
    /// without recovery.
    async fn handle_engine_error(&mut self, err: Error) -> Result<(), Error> {
        log::error!("engine error: {err}");
        let reason = match err.kind() {
            ErrorKind::DecodeError => ReasonCode::MalformedPacket,
            _ => ReasonCode::ProtocolError,
        };
        if self.protocol_level == ProtocolLevel::V5
            && self.status == ClientStatus::Connected
            && !self.stream.is_closing()
        {
            let packet = v5::DisconnectPacket::with_reason(reason);
            if let Ok(buf) = encode_packet(&packet) {
                let _ret = self.send_raw(&buf).await;
            }
        }
        self.stream.close().await;
        self.topic_aliases.clear();
        self.is_active = false;
        self.status = ClientStatus::Disconnected;
        if let Some(mut handler) = self.handler.take() {
            handler.on_disconnect(None, Some(&err));
            self.handler = Some(handler);
        }
        Err(err)
    }

    /// Dial again until connected or the retry policy is exhausted.
    /// Attempts are mutually exclusive; a nested call is a no-op.
    async fn reconnect(&mut self) -> Result<(), Error> {
        if self.reconnecting_now {
            return Ok(());
        }
        self.reconnecting_now = true;
        let result = self.reconnect_inner().await;
        self.reconnecting_now = false;
        result
    }

    async fn reconnect_inner(&mut self) -> Result<(), Error> {
        loop {
            let retries = self.options.reconnect_retries();
            if retries != UNLIMITED_RECONNECT_RETRIES && self.failed_connections > retries {
                let err = self
                    .connect_error
                    .clone()
                    .unwrap_or_else(|| Error::new(ErrorKind::SocketError, "reconnect failed"));
                self.is_active = false;
                self.status = ClientStatus::Disconnected;
                return Err(err);
            }

            sleep(self.options.reconnect_delay()).await;
            log::info!("reconnecting, attempt {}", self.failed_connections + 1);

            // Session state is resumed, so never ask for a clean start.
            match self.dial_and_handshake(false).await {
                Ok(()) => {
                    self.replay_session().await?;
                    return Ok(());
                }
                Err(err) => {
                    log::warn!("reconnect failed: {err}");
                    self.failed_connections += 1;
                    if self.should_downgrade(&err) {
                        log::info!("reconnect: downgrading to MQTT 3.1.1");
                        self.protocol_level = ProtocolLevel::V4;
                    }
                    self.connect_error = Some(err);
                    self.stream.close().await;
                }
            }
        }
    }

    pub(crate) async fn send_raw(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.stream.write(buf).await?;
        self.keep_alive.mark_out();
        Ok(())
    }
}

pub(crate) fn encode_packet<P: EncodePacket>(packet: &P) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    packet.encode(&mut buf)?;
    Ok(buf)
}
