// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Connection configuration. The options value is owned by the client
//! and persists across reconnects.

use std::time::Duration;

use codec::utils::random_string;
use codec::ProtocolLevel;

use crate::message::Message;

/// Sentinel for [`ConnectOptions::set_reconnect_retries`]: never stop
/// reconnecting.
pub const UNLIMITED_RECONNECT_RETRIES: usize = usize::MAX;

const RANDOM_CLIENT_ID_LEN: usize = 8;

#[derive(Clone, Debug)]
pub struct SelfSignedTls {
    /// Path to the root CA file in PEM format.
    pub root_ca_pem: String,
}

#[derive(Clone, Debug)]
pub enum TlsType {
    /// Signed by a public root CA, like `Let's Encrypt`.
    CASigned,

    /// Self signed CA generated with `openssl` or other tools.
    SelfSigned(SelfSignedTls),
}

#[derive(Clone, Debug)]
pub struct MqttsConnect {
    /// Server name used both for SNI and certificate validation.
    pub domain: String,
    pub tls_type: TlsType,
}

#[derive(Clone, Debug)]
pub struct WsConnect {
    /// URL path of the MQTT endpoint, usually `/mqtt`.
    pub path: String,
}

#[derive(Clone, Debug)]
pub struct WssConnect {
    pub domain: String,
    pub path: String,
    pub tls_type: TlsType,
}

/// Transport used to reach the broker.
#[derive(Clone, Debug)]
pub enum ConnectType {
    /// Plain TCP.
    Mqtt,

    /// TLS over TCP.
    Mqtts(MqttsConnect),

    /// MQTT packets in binary WebSocket frames.
    Ws(WsConnect),

    /// WebSocket over TLS.
    Wss(WssConnect),
}

/// All knobs of a client connection.
///
/// Most fields have sensible defaults; a plain
/// `ConnectOptions::new("localhost", 1883)` speaks MQTT 5.0 over TCP
/// with a random client id.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    host: String,
    port: u16,
    connect_type: ConnectType,
    protocol_level: ProtocolLevel,
    client_id: String,
    keep_alive: u16,
    connect_timeout: Duration,
    clean_session: bool,
    username: Option<String>,
    password: Option<Vec<u8>>,
    will: Option<Message>,

    // CONNECT properties, 5.0 only.
    session_expiry_interval: Option<u32>,
    receive_maximum: Option<u16>,
    maximum_packet_size: Option<u32>,
    topic_alias_maximum: Option<u16>,
    request_problem_information: Option<bool>,
    request_response_information: Option<bool>,

    /// When set, inbound QoS>0 messages are acknowledged before the
    /// message callback runs; otherwise the callback's returned reason
    /// code is sent in the acknowledgement.
    optimistic_acknowledgement: bool,

    reconnect_retries: usize,
    reconnect_delay: Duration,

    /// Unacknowledged QoS>0 publishes are re-sent after this timeout.
    retry_deliver_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            connect_type: ConnectType::Mqtt,
            protocol_level: ProtocolLevel::V5,
            client_id: random_string(RANDOM_CLIENT_ID_LEN),
            keep_alive: 60,
            connect_timeout: Duration::from_secs(10),
            clean_session: true,
            username: None,
            password: None,
            will: None,
            session_expiry_interval: None,
            receive_maximum: None,
            maximum_packet_size: None,
            topic_alias_maximum: None,
            request_problem_information: None,
            request_response_information: None,
            optimistic_acknowledgement: true,
            reconnect_retries: UNLIMITED_RECONNECT_RETRIES,
            reconnect_delay: Duration::from_secs(6),
            retry_deliver_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn set_connect_type(&mut self, connect_type: ConnectType) -> &mut Self {
        self.connect_type = connect_type;
        self
    }

    #[must_use]
    pub const fn connect_type(&self) -> &ConnectType {
        &self.connect_type
    }

    pub fn set_protocol_level(&mut self, level: ProtocolLevel) -> &mut Self {
        self.protocol_level = level;
        self
    }

    #[must_use]
    pub const fn protocol_level(&self) -> ProtocolLevel {
        self.protocol_level
    }

    /// Update client id. An empty id asks the server to assign one
    /// (5.0 only).
    pub fn set_client_id(&mut self, client_id: &str) -> &mut Self {
        self.client_id = client_id.to_string();
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn set_connect_timeout(&mut self, connect_timeout: Duration) -> &mut Self {
        self.connect_timeout = connect_timeout;
        self
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    /// Set credentials sent in the CONNECT packet.
    pub fn set_auth_credentials(&mut self, username: &str, password: Option<&[u8]>) -> &mut Self {
        self.username = Some(username.to_string());
        self.password = password.map(<[u8]>::to_vec);
        self
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    #[must_use]
    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_deref()
    }

    /// Set the will message the server publishes if this client goes
    /// away ungracefully.
    pub fn set_will(&mut self, will: Message) -> &mut Self {
        self.will = Some(will);
        self
    }

    #[must_use]
    pub const fn will(&self) -> Option<&Message> {
        self.will.as_ref()
    }

    pub fn set_session_expiry_interval(&mut self, seconds: u32) -> &mut Self {
        self.session_expiry_interval = Some(seconds);
        self
    }

    #[must_use]
    pub const fn session_expiry_interval(&self) -> Option<u32> {
        self.session_expiry_interval
    }

    pub fn set_receive_maximum(&mut self, receive_maximum: u16) -> &mut Self {
        self.receive_maximum = Some(receive_maximum);
        self
    }

    #[must_use]
    pub const fn receive_maximum(&self) -> Option<u16> {
        self.receive_maximum
    }

    pub fn set_maximum_packet_size(&mut self, bytes: u32) -> &mut Self {
        self.maximum_packet_size = Some(bytes);
        self
    }

    #[must_use]
    pub const fn maximum_packet_size(&self) -> Option<u32> {
        self.maximum_packet_size
    }

    pub fn set_topic_alias_maximum(&mut self, maximum: u16) -> &mut Self {
        self.topic_alias_maximum = Some(maximum);
        self
    }

    #[must_use]
    pub const fn topic_alias_maximum(&self) -> Option<u16> {
        self.topic_alias_maximum
    }

    pub fn set_request_problem_information(&mut self, on: bool) -> &mut Self {
        self.request_problem_information = Some(on);
        self
    }

    #[must_use]
    pub const fn request_problem_information(&self) -> Option<bool> {
        self.request_problem_information
    }

    pub fn set_request_response_information(&mut self, on: bool) -> &mut Self {
        self.request_response_information = Some(on);
        self
    }

    #[must_use]
    pub const fn request_response_information(&self) -> Option<bool> {
        self.request_response_information
    }

    pub fn set_optimistic_acknowledgement(&mut self, on: bool) -> &mut Self {
        self.optimistic_acknowledgement = on;
        self
    }

    #[must_use]
    pub const fn optimistic_acknowledgement(&self) -> bool {
        self.optimistic_acknowledgement
    }

    /// Set how often to reconnect before giving up.
    /// [`UNLIMITED_RECONNECT_RETRIES`] means retry forever.
    pub fn set_reconnect_retries(&mut self, retries: usize) -> &mut Self {
        self.reconnect_retries = retries;
        self
    }

    #[must_use]
    pub const fn reconnect_retries(&self) -> usize {
        self.reconnect_retries
    }

    pub fn set_reconnect_delay(&mut self, delay: Duration) -> &mut Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn set_retry_deliver_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.retry_deliver_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn retry_deliver_timeout(&self) -> Duration {
        self.retry_deliver_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectOptions::new("localhost", 1883);
        assert_eq!(options.client_id().len(), RANDOM_CLIENT_ID_LEN);
        assert_eq!(options.protocol_level(), ProtocolLevel::V5);
        assert!(options.clean_session());
        assert!(options.optimistic_acknowledgement());
        assert_eq!(options.reconnect_retries(), UNLIMITED_RECONNECT_RETRIES);
    }

    #[test]
    fn test_setters() {
        let mut options = ConnectOptions::new("broker.local", 8883);
        options
            .set_client_id("c1")
            .set_keep_alive(25)
            .set_auth_credentials("user", Some(b"pass"))
            .set_reconnect_retries(3)
            .set_reconnect_delay(Duration::from_millis(100));
        assert_eq!(options.client_id(), "c1");
        assert_eq!(options.keep_alive(), 25);
        assert_eq!(options.username(), Some("user"));
        assert_eq!(options.password(), Some(&b"pass"[..]));
        assert_eq!(options.reconnect_retries(), 3);
    }
}
