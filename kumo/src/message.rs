// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::v5::{Properties, Property};
use codec::{BinaryData, BoolData, PubTopic, QoS, StringData, StringPairData, U16Data, U32Data};

use crate::error::{Error, ErrorKind};

/// An application level message: what the user publishes and what the
/// message callback receives.
///
/// The typed property fields map onto the MQTT 5.0 PUBLISH properties;
/// they are ignored on the wire when the connection speaks 3.1.1.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    topic: String,
    payload: Vec<u8>,
    qos: QoS,
    retain: bool,
    dup: bool,

    payload_format_indicator: Option<bool>,
    message_expiry_interval: Option<u32>,
    content_type: Option<String>,
    response_topic: Option<String>,
    correlation_data: Option<Vec<u8>>,
    user_properties: Vec<(String, String)>,

    /// Inbound only: identifiers of the overlapping subscriptions this
    /// message matched.
    subscription_identifiers: Vec<usize>,

    topic_alias: Option<u16>,
}

impl Message {
    #[must_use]
    pub fn new(topic: &str, payload: &[u8], qos: QoS) -> Self {
        Self {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    pub fn set_payload_format_indicator(&mut self, utf8: bool) -> &mut Self {
        self.payload_format_indicator = Some(utf8);
        self
    }

    #[must_use]
    pub const fn payload_format_indicator(&self) -> Option<bool> {
        self.payload_format_indicator
    }

    pub fn set_message_expiry_interval(&mut self, seconds: u32) -> &mut Self {
        self.message_expiry_interval = Some(seconds);
        self
    }

    #[must_use]
    pub const fn message_expiry_interval(&self) -> Option<u32> {
        self.message_expiry_interval
    }

    pub fn set_content_type(&mut self, content_type: &str) -> &mut Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_response_topic(&mut self, topic: &str) -> &mut Self {
        self.response_topic = Some(topic.to_string());
        self
    }

    #[must_use]
    pub fn response_topic(&self) -> Option<&str> {
        self.response_topic.as_deref()
    }

    pub fn set_correlation_data(&mut self, data: &[u8]) -> &mut Self {
        self.correlation_data = Some(data.to_vec());
        self
    }

    #[must_use]
    pub fn correlation_data(&self) -> Option<&[u8]> {
        self.correlation_data.as_deref()
    }

    pub fn add_user_property(&mut self, key: &str, value: &str) -> &mut Self {
        self.user_properties.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn user_properties(&self) -> &[(String, String)] {
        &self.user_properties
    }

    #[must_use]
    pub fn subscription_identifiers(&self) -> &[usize] {
        &self.subscription_identifiers
    }

    #[must_use]
    pub const fn topic_alias(&self) -> Option<u16> {
        self.topic_alias
    }

    /// Check payload size against the remaining-length limit.
    ///
    /// # Errors
    ///
    /// Returns error if the payload alone exceeds 268,435,455 bytes.
    pub fn validate(&self) -> Result<(), Error> {
        if self.payload.len() > codec::MAX_PACKET_LEN {
            return Err(Error::new(
                ErrorKind::PayloadTooLarge,
                "payload exceeds maximum packet length",
            ));
        }
        Ok(())
    }

    /// Build the 5.0 property list for an outbound PUBLISH.
    ///
    /// # Errors
    ///
    /// Returns error if a property value fails validation.
    pub fn to_properties(&self) -> Result<Properties, Error> {
        let mut properties = Properties::new();
        if let Some(utf8) = self.payload_format_indicator {
            properties.push(Property::PayloadFormatIndicator(BoolData::new(utf8)));
        }
        if let Some(seconds) = self.message_expiry_interval {
            properties.push(Property::MessageExpiryInterval(U32Data::new(seconds)));
        }
        if let Some(content_type) = &self.content_type {
            properties.push(Property::ContentType(
                StringData::from(content_type).map_err(codec::EncodeError::from)?,
            ));
        }
        if let Some(topic) = &self.response_topic {
            properties.push(Property::ResponseTopic(PubTopic::new(topic)?));
        }
        if let Some(data) = &self.correlation_data {
            properties.push(Property::CorrelationData(BinaryData::from_slice(data)?));
        }
        if let Some(alias) = self.topic_alias {
            properties.push(Property::TopicAlias(U16Data::new(alias)));
        }
        for (key, value) in &self.user_properties {
            properties.push(Property::UserProperty(StringPairData::new(key, value)?));
        }
        Ok(properties)
    }

    /// Rebuild a message from a decoded inbound PUBLISH.
    ///
    /// `topic` is passed separately because it may have been resolved
    /// through the topic alias table.
    #[must_use]
    pub(crate) fn from_publish(
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
        dup: bool,
        properties: &Properties,
    ) -> Self {
        let mut message = Self::new(topic, payload, qos);
        message.retain = retain;
        message.dup = dup;
        message.payload_format_indicator = properties.payload_format_indicator();
        message.message_expiry_interval = properties.message_expiry_interval();
        message.content_type = properties.content_type().map(str::to_string);
        message.response_topic = properties.response_topic().map(str::to_string);
        message.correlation_data = properties.correlation_data().map(<[u8]>::to_vec);
        message.topic_alias = properties.topic_alias();
        message.subscription_identifiers = properties.subscription_identifiers();
        message.user_properties = properties
            .user_properties()
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        message
    }

    /// Rebuild a message from a decoded 3.1.1 inbound PUBLISH.
    #[must_use]
    pub(crate) fn from_v3_publish(
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
        dup: bool,
    ) -> Self {
        let mut message = Self::new(topic, payload, qos);
        message.retain = retain;
        message.dup = dup;
        message
    }
}
