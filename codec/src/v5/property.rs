// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{
    BinaryData, BoolData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket,
    PubTopic, QoS, StringData, StringPairData, U16Data, U32Data, VarInt,
};

/// Property identifiers that may legally appear more than once in one
/// property block.
///
/// `UserProperty` repeats freely; `SubscriptionIdentifier` repeats on an
/// inbound PUBLISH, once per matching overlapping subscription.
pub const MULTIPLE_PROPERTIES: &[PropertyType] = &[
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
];

/// Check that every property in `properties` is allowed by `types` and
/// that non-repeatable properties appear at most once.
///
/// # Errors
///
/// Returns the offending property type.
pub fn check_property_type_list(
    properties: &[Property],
    types: &[PropertyType],
) -> Result<(), PropertyType> {
    for property in properties {
        if !types.contains(&property.property_type()) {
            return Err(property.property_type());
        }
    }

    for property_type in types {
        let count = properties
            .iter()
            .filter(|p| p.property_type() == *property_type)
            .count();
        if count > 1 && !MULTIPLE_PROPERTIES.contains(property_type) {
            return Err(*property_type);
        }
    }

    Ok(())
}

/// Check that at most one subscription identifier is present.
///
/// Outbound SUBSCRIBE packets may carry only one; it is inbound PUBLISH
/// packets that collect several.
///
/// # Errors
///
/// Returns the offending property type.
pub fn check_multiple_subscription_identifiers(
    properties: &[Property],
) -> Result<(), PropertyType> {
    let count = properties
        .iter()
        .filter(|p| p.property_type() == PropertyType::SubscriptionIdentifier)
        .count();
    if count > 1 {
        return Err(PropertyType::SubscriptionIdentifier);
    }
    Ok(())
}

/// One-byte property identifier.
#[allow(clippy::module_name_repetitions)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0b,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1a,
    ServerReference = 0x1c,
    ReasonString = 0x1f,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2a,
}

impl PropertyType {
    /// Byte length in packet.
    #[must_use]
    #[inline]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for PropertyType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::PayloadFormatIndicator),
            0x02 => Ok(Self::MessageExpiryInterval),
            0x03 => Ok(Self::ContentType),
            0x08 => Ok(Self::ResponseTopic),
            0x09 => Ok(Self::CorrelationData),
            0x0b => Ok(Self::SubscriptionIdentifier),
            0x11 => Ok(Self::SessionExpiryInterval),
            0x12 => Ok(Self::AssignedClientIdentifier),
            0x13 => Ok(Self::ServerKeepAlive),
            0x15 => Ok(Self::AuthenticationMethod),
            0x16 => Ok(Self::AuthenticationData),
            0x17 => Ok(Self::RequestProblemInformation),
            0x18 => Ok(Self::WillDelayInterval),
            0x19 => Ok(Self::RequestResponseInformation),
            0x1a => Ok(Self::ResponseInformation),
            0x1c => Ok(Self::ServerReference),
            0x1f => Ok(Self::ReasonString),
            0x21 => Ok(Self::ReceiveMaximum),
            0x22 => Ok(Self::TopicAliasMaximum),
            0x23 => Ok(Self::TopicAlias),
            0x24 => Ok(Self::MaximumQoS),
            0x25 => Ok(Self::RetainAvailable),
            0x26 => Ok(Self::UserProperty),
            0x27 => Ok(Self::MaximumPacketSize),
            0x28 => Ok(Self::WildcardSubscriptionAvailable),
            0x29 => Ok(Self::SubscriptionIdentifierAvailable),
            0x2a => Ok(Self::SharedSubscriptionAvailable),
            _ => Err(DecodeError::InvalidPropertyType),
        }
    }
}

/// A single property: identifier plus typed payload.
///
/// The wire format of each payload is fixed by the identifier: byte,
/// two/four byte integer, variable byte integer, UTF-8 string, UTF-8
/// string pair or binary data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// Byte. PUBLISH, Will properties. 0 = unspecified bytes,
    /// 1 = UTF-8 encoded character data.
    PayloadFormatIndicator(BoolData),

    /// Four byte integer. PUBLISH, Will properties. Lifetime of the
    /// message in seconds; if absent the message does not expire.
    MessageExpiryInterval(U32Data),

    /// UTF-8 string. PUBLISH, Will properties. Content description,
    /// defined by the sending and receiving application.
    ContentType(StringData),

    /// UTF-8 string. PUBLISH, Will properties. Topic name for the
    /// response message of a request/response exchange.
    ResponseTopic(PubTopic),

    /// Binary data. PUBLISH, Will properties. Used by the requester to
    /// match a response to its request.
    CorrelationData(BinaryData),

    /// Variable byte integer, 1..=268,435,455; zero is a protocol error.
    /// SUBSCRIBE and inbound PUBLISH.
    SubscriptionIdentifier(VarInt),

    /// Four byte integer. CONNECT, CONNACK, DISCONNECT. Seconds the
    /// session survives after the network connection closes;
    /// 0xFFFF_FFFF means the session does not expire.
    SessionExpiryInterval(U32Data),

    /// UTF-8 string. CONNACK. Identifier assigned by the server when the
    /// client connected with a zero length client id.
    AssignedClientIdentifier(StringData),

    /// Two byte integer. CONNACK. Keep alive time assigned by the
    /// server; the client MUST use it instead of its own value
    /// [MQTT-3.2.2-21].
    ServerKeepAlive(U16Data),

    /// UTF-8 string. CONNECT, CONNACK, AUTH. Name of the extended
    /// authentication method.
    AuthenticationMethod(StringData),

    /// Binary data. CONNECT, CONNACK, AUTH. Contents defined by the
    /// authentication method.
    AuthenticationData(BinaryData),

    /// Byte, 0 or 1. CONNECT. Whether reason strings and user
    /// properties may be sent on failures beyond PUBLISH, CONNACK and
    /// DISCONNECT.
    RequestProblemInformation(BoolData),

    /// Four byte integer. Will properties. Seconds the server delays
    /// publishing the will message.
    WillDelayInterval(U32Data),

    /// Byte, 0 or 1. CONNECT. Whether the server may return response
    /// information in CONNACK.
    RequestResponseInformation(BoolData),

    /// UTF-8 string. CONNACK. Basis for creating a response topic.
    ResponseInformation(StringData),

    /// UTF-8 string. CONNACK, DISCONNECT. Another server to use, sent
    /// with reason codes 0x9C and 0x9D.
    ServerReference(StringData),

    /// UTF-8 string. CONNACK, acks, SUBACK, UNSUBACK, DISCONNECT, AUTH.
    /// Human readable diagnostic; not to be parsed by the client.
    ReasonString(StringData),

    /// Two byte integer, non-zero. CONNECT, CONNACK. Number of QoS>0
    /// publications the sender is willing to process concurrently.
    /// Defaults to 65,535 when absent.
    ReceiveMaximum(U16Data),

    /// Two byte integer. CONNECT, CONNACK. Highest topic alias value
    /// the sender accepts; 0 (the default) forbids aliases.
    TopicAliasMaximum(U16Data),

    /// Two byte integer, non-zero. PUBLISH. Alias standing in for the
    /// topic name on this network connection [MQTT-3.3.2-7].
    TopicAlias(U16Data),

    /// Byte, 0 or 1. CONNACK. Highest QoS the server supports; absent
    /// means QoS 2.
    MaximumQoS(QoS),

    /// Byte, 0 or 1. CONNACK. Whether the server supports retained
    /// messages; absent means supported.
    RetainAvailable(BoolData),

    /// UTF-8 string pair. All packets with properties. May appear many
    /// times; order is preserved end to end [MQTT-3.3.2-18].
    UserProperty(StringPairData),

    /// Four byte integer, non-zero. CONNECT, CONNACK. Largest packet
    /// the sender is willing to accept.
    MaximumPacketSize(U32Data),

    /// Byte, 0 or 1. CONNACK. Whether wildcard subscriptions are
    /// supported; absent means supported.
    WildcardSubscriptionAvailable(BoolData),

    /// Byte, 0 or 1. CONNACK. Whether subscription identifiers are
    /// supported; absent means supported.
    SubscriptionIdentifierAvailable(BoolData),

    /// Byte, 0 or 1. CONNACK. Whether shared subscriptions are
    /// supported; absent means supported.
    SharedSubscriptionAvailable(BoolData),
}

impl Property {
    /// Get the identifier of this property.
    #[must_use]
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::PayloadFormatIndicator(_) => PropertyType::PayloadFormatIndicator,
            Self::MessageExpiryInterval(_) => PropertyType::MessageExpiryInterval,
            Self::ContentType(_) => PropertyType::ContentType,
            Self::ResponseTopic(_) => PropertyType::ResponseTopic,
            Self::CorrelationData(_) => PropertyType::CorrelationData,
            Self::SubscriptionIdentifier(_) => PropertyType::SubscriptionIdentifier,
            Self::SessionExpiryInterval(_) => PropertyType::SessionExpiryInterval,
            Self::AssignedClientIdentifier(_) => PropertyType::AssignedClientIdentifier,
            Self::ServerKeepAlive(_) => PropertyType::ServerKeepAlive,
            Self::AuthenticationMethod(_) => PropertyType::AuthenticationMethod,
            Self::AuthenticationData(_) => PropertyType::AuthenticationData,
            Self::RequestProblemInformation(_) => PropertyType::RequestProblemInformation,
            Self::WillDelayInterval(_) => PropertyType::WillDelayInterval,
            Self::RequestResponseInformation(_) => PropertyType::RequestResponseInformation,
            Self::ResponseInformation(_) => PropertyType::ResponseInformation,
            Self::ServerReference(_) => PropertyType::ServerReference,
            Self::ReasonString(_) => PropertyType::ReasonString,
            Self::ReceiveMaximum(_) => PropertyType::ReceiveMaximum,
            Self::TopicAliasMaximum(_) => PropertyType::TopicAliasMaximum,
            Self::TopicAlias(_) => PropertyType::TopicAlias,
            Self::MaximumQoS(_) => PropertyType::MaximumQoS,
            Self::RetainAvailable(_) => PropertyType::RetainAvailable,
            Self::UserProperty(_) => PropertyType::UserProperty,
            Self::MaximumPacketSize(_) => PropertyType::MaximumPacketSize,
            Self::WildcardSubscriptionAvailable(_) => PropertyType::WildcardSubscriptionAvailable,
            Self::SubscriptionIdentifierAvailable(_) => {
                PropertyType::SubscriptionIdentifierAvailable
            }
            Self::SharedSubscriptionAvailable(_) => PropertyType::SharedSubscriptionAvailable,
        }
    }

    /// Byte length in packet, identifier byte included.
    #[allow(clippy::match_same_arms)]
    #[must_use]
    pub fn bytes(&self) -> usize {
        let value_bytes = match self {
            Self::PayloadFormatIndicator(..) => BoolData::bytes(),
            Self::MessageExpiryInterval(..) => U32Data::bytes(),
            Self::ContentType(value) => value.bytes(),
            Self::ResponseTopic(value) => value.bytes(),
            Self::CorrelationData(value) => value.bytes(),
            Self::SubscriptionIdentifier(value) => value.bytes(),
            Self::SessionExpiryInterval(..) => U32Data::bytes(),
            Self::AssignedClientIdentifier(value) => value.bytes(),
            Self::ServerKeepAlive(..) => U16Data::bytes(),
            Self::AuthenticationMethod(value) => value.bytes(),
            Self::AuthenticationData(value) => value.bytes(),
            Self::RequestProblemInformation(..) => BoolData::bytes(),
            Self::WillDelayInterval(..) => U32Data::bytes(),
            Self::RequestResponseInformation(..) => BoolData::bytes(),
            Self::ResponseInformation(value) => value.bytes(),
            Self::ServerReference(value) => value.bytes(),
            Self::ReasonString(value) => value.bytes(),
            Self::ReceiveMaximum(..) => U16Data::bytes(),
            Self::TopicAliasMaximum(..) => U16Data::bytes(),
            Self::TopicAlias(..) => U16Data::bytes(),
            Self::MaximumQoS(..) => QoS::bytes(),
            Self::RetainAvailable(..) => BoolData::bytes(),
            Self::UserProperty(value) => value.bytes(),
            Self::MaximumPacketSize(..) => U32Data::bytes(),
            Self::WildcardSubscriptionAvailable(..) => BoolData::bytes(),
            Self::SubscriptionIdentifierAvailable(..) => BoolData::bytes(),
            Self::SharedSubscriptionAvailable(..) => BoolData::bytes(),
        };

        PropertyType::bytes() + value_bytes
    }
}

impl DecodePacket for Property {
    #[allow(clippy::too_many_lines)]
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let property_type_byte = ba.read_byte()?;
        let property_type = PropertyType::try_from(property_type_byte)?;
        match property_type {
            PropertyType::PayloadFormatIndicator => {
                let on = BoolData::decode(ba)?;
                Ok(Self::PayloadFormatIndicator(on))
            }
            PropertyType::MessageExpiryInterval => {
                let interval = U32Data::decode(ba)?;
                Ok(Self::MessageExpiryInterval(interval))
            }
            PropertyType::ContentType => {
                let content_type = StringData::decode(ba)?;
                Ok(Self::ContentType(content_type))
            }
            PropertyType::ResponseTopic => {
                let topic = PubTopic::decode(ba)?;
                Ok(Self::ResponseTopic(topic))
            }
            PropertyType::CorrelationData => {
                let data = BinaryData::decode(ba)?;
                Ok(Self::CorrelationData(data))
            }
            PropertyType::SubscriptionIdentifier => {
                let id = VarInt::decode(ba)?;
                if id.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::SubscriptionIdentifier(id))
            }
            PropertyType::SessionExpiryInterval => {
                let interval = U32Data::decode(ba)?;
                Ok(Self::SessionExpiryInterval(interval))
            }
            PropertyType::AssignedClientIdentifier => {
                let client_id = StringData::decode(ba)?;
                Ok(Self::AssignedClientIdentifier(client_id))
            }
            PropertyType::ServerKeepAlive => {
                let keep_alive = U16Data::decode(ba)?;
                Ok(Self::ServerKeepAlive(keep_alive))
            }
            PropertyType::AuthenticationMethod => {
                let method = StringData::decode(ba)?;
                Ok(Self::AuthenticationMethod(method))
            }
            PropertyType::AuthenticationData => {
                let data = BinaryData::decode(ba)?;
                Ok(Self::AuthenticationData(data))
            }
            PropertyType::RequestProblemInformation => {
                let on = BoolData::decode(ba)?;
                Ok(Self::RequestProblemInformation(on))
            }
            PropertyType::WillDelayInterval => {
                let interval = U32Data::decode(ba)?;
                Ok(Self::WillDelayInterval(interval))
            }
            PropertyType::RequestResponseInformation => {
                let on = BoolData::decode(ba)?;
                Ok(Self::RequestResponseInformation(on))
            }
            PropertyType::ResponseInformation => {
                let info = StringData::decode(ba)?;
                Ok(Self::ResponseInformation(info))
            }
            PropertyType::ServerReference => {
                let reference = StringData::decode(ba)?;
                Ok(Self::ServerReference(reference))
            }
            PropertyType::ReasonString => {
                let reason = StringData::decode(ba)?;
                Ok(Self::ReasonString(reason))
            }
            PropertyType::ReceiveMaximum => {
                let max = U16Data::decode(ba)?;
                if max.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::ReceiveMaximum(max))
            }
            PropertyType::TopicAliasMaximum => {
                let max = U16Data::decode(ba)?;
                Ok(Self::TopicAliasMaximum(max))
            }
            PropertyType::TopicAlias => {
                let alias = U16Data::decode(ba)?;
                if alias.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::TopicAlias(alias))
            }
            PropertyType::MaximumQoS => {
                let qos = QoS::decode(ba)?;
                if qos == QoS::ExactOnce {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::MaximumQoS(qos))
            }
            PropertyType::RetainAvailable => {
                let available = BoolData::decode(ba)?;
                Ok(Self::RetainAvailable(available))
            }
            PropertyType::UserProperty => {
                let pair = StringPairData::decode(ba)?;
                Ok(Self::UserProperty(pair))
            }
            PropertyType::MaximumPacketSize => {
                let max = U32Data::decode(ba)?;
                if max.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::MaximumPacketSize(max))
            }
            PropertyType::WildcardSubscriptionAvailable => {
                let available = BoolData::decode(ba)?;
                Ok(Self::WildcardSubscriptionAvailable(available))
            }
            PropertyType::SubscriptionIdentifierAvailable => {
                let available = BoolData::decode(ba)?;
                Ok(Self::SubscriptionIdentifierAvailable(available))
            }
            PropertyType::SharedSubscriptionAvailable => {
                let available = BoolData::decode(ba)?;
                Ok(Self::SharedSubscriptionAvailable(available))
            }
        }
    }
}

impl EncodePacket for Property {
    #[allow(clippy::match_same_arms)]
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(self.property_type() as u8);
        let value_bytes = match self {
            Self::PayloadFormatIndicator(on) => on.encode(buf)?,
            Self::MessageExpiryInterval(interval) => interval.encode(buf)?,
            Self::ContentType(content_type) => content_type.encode(buf)?,
            Self::ResponseTopic(topic) => topic.encode(buf)?,
            Self::CorrelationData(data) => data.encode(buf)?,
            Self::SubscriptionIdentifier(id) => id.encode(buf)?,
            Self::SessionExpiryInterval(interval) => interval.encode(buf)?,
            Self::AssignedClientIdentifier(client_id) => client_id.encode(buf)?,
            Self::ServerKeepAlive(keep_alive) => keep_alive.encode(buf)?,
            Self::AuthenticationMethod(method) => method.encode(buf)?,
            Self::AuthenticationData(data) => data.encode(buf)?,
            Self::RequestProblemInformation(on) => on.encode(buf)?,
            Self::WillDelayInterval(interval) => interval.encode(buf)?,
            Self::RequestResponseInformation(on) => on.encode(buf)?,
            Self::ResponseInformation(info) => info.encode(buf)?,
            Self::ServerReference(reference) => reference.encode(buf)?,
            Self::ReasonString(reason) => reason.encode(buf)?,
            Self::ReceiveMaximum(max) => max.encode(buf)?,
            Self::TopicAliasMaximum(max) => max.encode(buf)?,
            Self::TopicAlias(alias) => alias.encode(buf)?,
            Self::MaximumQoS(qos) => qos.encode(buf)?,
            Self::RetainAvailable(available) => available.encode(buf)?,
            Self::UserProperty(pair) => pair.encode(buf)?,
            Self::MaximumPacketSize(max) => max.encode(buf)?,
            Self::WildcardSubscriptionAvailable(available) => available.encode(buf)?,
            Self::SubscriptionIdentifierAvailable(available) => available.encode(buf)?,
            Self::SharedSubscriptionAvailable(available) => available.encode(buf)?,
        };
        Ok(PropertyType::bytes() + value_bytes)
    }
}

/// Ordered list of properties, encoded as a variable byte integer holding
/// the total byte length of the encoded properties followed by the
/// properties themselves.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Properties(Vec<Property>);

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte length in packet, length prefix included.
    #[must_use]
    pub fn bytes(&self) -> usize {
        let payload = self.payload_bytes();
        length_bytes(payload) + payload
    }

    /// Number of properties in the list.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get a reference to the property list.
    #[must_use]
    pub fn props(&self) -> &[Property] {
        &self.0
    }

    /// Append a property.
    pub fn push(&mut self, property: Property) {
        self.0.push(property);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Find the first property with the given type.
    #[must_use]
    pub fn find(&self, property_type: PropertyType) -> Option<&Property> {
        self.0
            .iter()
            .find(|p| p.property_type() == property_type)
    }

    /// Server keep alive value from CONNACK, if present.
    #[must_use]
    pub fn server_keep_alive(&self) -> Option<u16> {
        match self.find(PropertyType::ServerKeepAlive) {
            Some(Property::ServerKeepAlive(v)) => Some(v.value()),
            _ => None,
        }
    }

    /// Assigned client identifier from CONNACK, if present.
    #[must_use]
    pub fn assigned_client_identifier(&self) -> Option<&str> {
        match self.find(PropertyType::AssignedClientIdentifier) {
            Some(Property::AssignedClientIdentifier(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    /// Receive maximum, if present.
    #[must_use]
    pub fn receive_maximum(&self) -> Option<u16> {
        match self.find(PropertyType::ReceiveMaximum) {
            Some(Property::ReceiveMaximum(v)) => Some(v.value()),
            _ => None,
        }
    }

    /// Maximum QoS from CONNACK, if present.
    #[must_use]
    pub fn maximum_qos(&self) -> Option<QoS> {
        match self.find(PropertyType::MaximumQoS) {
            Some(Property::MaximumQoS(v)) => Some(*v),
            _ => None,
        }
    }

    /// Session expiry interval, if present.
    #[must_use]
    pub fn session_expiry_interval(&self) -> Option<u32> {
        match self.find(PropertyType::SessionExpiryInterval) {
            Some(Property::SessionExpiryInterval(v)) => Some(v.value()),
            _ => None,
        }
    }

    /// Topic alias from a PUBLISH, if present.
    #[must_use]
    pub fn topic_alias(&self) -> Option<u16> {
        match self.find(PropertyType::TopicAlias) {
            Some(Property::TopicAlias(v)) => Some(v.value()),
            _ => None,
        }
    }

    /// Message expiry interval, if present.
    #[must_use]
    pub fn message_expiry_interval(&self) -> Option<u32> {
        match self.find(PropertyType::MessageExpiryInterval) {
            Some(Property::MessageExpiryInterval(v)) => Some(v.value()),
            _ => None,
        }
    }

    /// Response topic of a request message, if present.
    #[must_use]
    pub fn response_topic(&self) -> Option<&str> {
        match self.find(PropertyType::ResponseTopic) {
            Some(Property::ResponseTopic(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    /// Correlation data of a request message, if present.
    #[must_use]
    pub fn correlation_data(&self) -> Option<&[u8]> {
        match self.find(PropertyType::CorrelationData) {
            Some(Property::CorrelationData(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    /// Content type, if present.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        match self.find(PropertyType::ContentType) {
            Some(Property::ContentType(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    /// Payload format indicator, if present.
    #[must_use]
    pub fn payload_format_indicator(&self) -> Option<bool> {
        match self.find(PropertyType::PayloadFormatIndicator) {
            Some(Property::PayloadFormatIndicator(v)) => Some(v.value()),
            _ => None,
        }
    }

    /// Availability flag helper for the CONNACK boolean properties.
    ///
    /// Absent flags default to available per the specification.
    #[must_use]
    pub fn available_flag(&self, property_type: PropertyType) -> bool {
        match self.find(property_type) {
            Some(Property::RetainAvailable(v))
            | Some(Property::WildcardSubscriptionAvailable(v))
            | Some(Property::SubscriptionIdentifierAvailable(v))
            | Some(Property::SharedSubscriptionAvailable(v)) => v.value(),
            _ => true,
        }
    }

    /// All subscription identifiers in list order.
    #[must_use]
    pub fn subscription_identifiers(&self) -> Vec<usize> {
        self.0
            .iter()
            .filter_map(|p| match p {
                Property::SubscriptionIdentifier(id) => Some(id.value()),
                _ => None,
            })
            .collect()
    }

    /// All user properties in list order.
    #[must_use]
    pub fn user_properties(&self) -> Vec<(&str, &str)> {
        self.0
            .iter()
            .filter_map(|p| match p {
                Property::UserProperty(pair) => {
                    Some((pair.key().as_ref(), pair.value().as_ref()))
                }
                _ => None,
            })
            .collect()
    }

    fn payload_bytes(&self) -> usize {
        self.0.iter().map(Property::bytes).sum()
    }
}

impl AsRef<[Property]> for Properties {
    fn as_ref(&self) -> &[Property] {
        self.0.as_ref()
    }
}

/// Encoded size of a variable byte integer holding `n`.
const fn length_bytes(n: usize) -> usize {
    if n > 0x001f_ffff {
        4
    } else if n > 0x3fff {
        3
    } else if n > 0x7f {
        2
    } else {
        1
    }
}

impl DecodePacket for Properties {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        // Acknowledgement packets may omit the property length entirely.
        if ba.remaining_bytes() == 0 {
            return Ok(Self::new());
        }

        let payload_len = VarInt::decode(ba)?.value();
        let end = ba.offset() + payload_len;
        let mut properties = Vec::new();
        while ba.offset() < end {
            properties.push(Property::decode(ba)?);
        }
        if ba.offset() != end {
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(Self(properties))
    }
}

impl EncodePacket for Properties {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let payload_len = VarInt::from(self.payload_bytes())?;
        let mut bytes_written = payload_len.encode(buf)?;
        for property in &self.0 {
            bytes_written += property.encode(buf)?;
        }

        Ok(bytes_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_round_trip() {
        let props = Properties::new();
        let mut buf = Vec::new();
        assert_eq!(props.encode(&mut buf).unwrap(), 1);
        assert_eq!(&buf, &[0x00]);
        let mut ba = ByteArray::new(&buf);
        assert_eq!(Properties::decode(&mut ba).unwrap(), props);
    }

    #[test]
    fn test_round_trip() {
        let mut props = Properties::new();
        props.push(Property::TopicAlias(U16Data::new(11)));
        props.push(Property::MessageExpiryInterval(U32Data::new(3600)));
        props.push(Property::UserProperty(
            StringPairData::new("k1", "v1").unwrap(),
        ));
        props.push(Property::UserProperty(
            StringPairData::new("k2", "v2").unwrap(),
        ));

        let mut buf = Vec::new();
        let written = props.encode(&mut buf).unwrap();
        assert_eq!(written, props.bytes());

        let mut ba = ByteArray::new(&buf);
        let decoded = Properties::decode(&mut ba).unwrap();
        assert_eq!(decoded, props);
        // User property order is preserved.
        assert_eq!(decoded.user_properties(), [("k1", "v1"), ("k2", "v2")]);
    }

    #[test]
    fn test_byte_length_prefix() {
        let mut props = Properties::new();
        props.push(Property::TopicAlias(U16Data::new(2)));
        let mut buf = Vec::new();
        props.encode(&mut buf).unwrap();
        // Prefix counts bytes (3), not properties (1).
        assert_eq!(&buf, &[0x03, 0x23, 0x00, 0x02]);
    }

    #[test]
    fn test_unknown_property_id() {
        let buf = [0x02, 0x7b, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba),
            Err(DecodeError::InvalidPropertyType)
        );
    }

    #[test]
    fn test_zero_subscription_identifier() {
        let buf = [0x02, 0x0b, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba),
            Err(DecodeError::InvalidPropertyValue)
        );
    }

    #[test]
    fn test_check_property_type_list() {
        let mut props = Properties::new();
        props.push(Property::TopicAlias(U16Data::new(1)));
        props.push(Property::TopicAlias(U16Data::new(2)));
        // TopicAlias may not repeat.
        assert_eq!(
            check_property_type_list(props.props(), &[PropertyType::TopicAlias]),
            Err(PropertyType::TopicAlias)
        );

        let mut props = Properties::new();
        props.push(Property::SubscriptionIdentifier(VarInt::from(21).unwrap()));
        props.push(Property::SubscriptionIdentifier(VarInt::from(42).unwrap()));
        // SubscriptionIdentifier may repeat on inbound PUBLISH.
        assert!(check_property_type_list(
            props.props(),
            &[PropertyType::SubscriptionIdentifier]
        )
        .is_ok());
        // But not in an outbound SUBSCRIBE.
        assert!(check_multiple_subscription_identifiers(props.props()).is_err());
    }

    #[test]
    fn test_subscription_identifiers() {
        let mut props = Properties::new();
        props.push(Property::SubscriptionIdentifier(VarInt::from(21).unwrap()));
        props.push(Property::SubscriptionIdentifier(VarInt::from(42).unwrap()));
        assert_eq!(props.subscription_identifiers(), [21, 42]);
    }
}
