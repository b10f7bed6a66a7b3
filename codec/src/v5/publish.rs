// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io::Write;

use super::property::check_property_type_list;
use super::{Properties, PropertyType};
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, PubTopic, QoS, VarIntError,
};

/// Properties available in PUBLISH packets.
pub const PUBLISH_PROPERTIES: &[PropertyType] = &[
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::TopicAlias,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
    // Carried only server-to-client; one per matching overlapping
    // subscription [MQTT-3.3.4-4].
    PropertyType::SubscriptionIdentifier,
    PropertyType::ContentType,
];

/// PUBLISH transports an application message in either direction.
///
/// Basic packet structure:
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// +-----------------------+
/// | Topic name            |
/// +-----------------------+
/// | Packet id (QoS > 0)   |
/// +-----------------------+
/// | Properties ...        |
/// +-----------------------+
/// | Payload ...           |
/// +-----------------------+
/// ```
///
/// The payload is whatever remains of the packet after the properties.
/// Expected response: none for QoS 0, PUBACK for QoS 1, PUBREC for QoS 2.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PublishPacket {
    /// Set when this packet might be a re-delivery of an earlier attempt
    /// [MQTT-3.3.1-1]. MUST be unset for QoS 0 [MQTT-3.3.1-2].
    dup: bool,

    qos: QoS,

    /// Ask the server to keep this message as the retained message for
    /// the topic [MQTT-3.3.1-5].
    retain: bool,

    /// May be empty only when a topic alias property is present
    /// [MQTT-3.3.2-x].
    topic: PubTopic,

    /// Present only when QoS is 1 or 2 [MQTT-2.2.1-2].
    packet_id: PacketId,

    properties: Properties,

    msg: Vec<u8>,
}

impl PublishPacket {
    /// Create a new PUBLISH packet.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn new(topic: &str, qos: QoS, msg: &[u8]) -> Result<Self, EncodeError> {
        let topic = PubTopic::new(topic)?;
        Ok(Self {
            qos,
            topic,
            msg: msg.to_vec(),
            ..Self::default()
        })
    }

    /// Update the `dup` flag.
    ///
    /// # Errors
    ///
    /// Returns error when setting `dup` on a QoS 0 packet
    /// [MQTT-3.3.1-2].
    pub fn set_dup(&mut self, dup: bool) -> Result<&mut Self, EncodeError> {
        if dup && self.qos == QoS::AtMostOnce {
            return Err(EncodeError::InvalidPacketType);
        }
        self.dup = dup;
        Ok(self)
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        if qos == QoS::AtMostOnce {
            self.packet_id = PacketId::new(0);
            self.dup = false;
        }
        self.qos = qos;
        self
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

    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Update topic.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn set_topic(&mut self, topic: &str) -> Result<&mut Self, EncodeError> {
        self.topic = PubTopic::new(topic)?;
        Ok(self)
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    #[must_use]
    pub fn message(&self) -> &[u8] {
        &self.msg
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let mut remaining_length = self.topic.bytes() + self.properties.bytes() + self.msg.len();
        if self.qos != QoS::AtMostOnce {
            remaining_length += PacketId::bytes();
        }

        let packet_type = PacketType::Publish {
            dup: self.dup,
            retain: self.retain,
            qos: self.qos,
        };
        FixedHeader::new(packet_type, remaining_length)
    }
}

impl DecodePacket for PublishPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;

        let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() else {
            return Err(DecodeError::InvalidPacketType);
        };

        let body_start = ba.offset();

        let topic = PubTopic::decode(ba)?;

        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            let packet_id = PacketId::decode(ba)?;
            // A non-zero identifier is required for QoS>0 [MQTT-2.2.1-3].
            if packet_id.value() == 0 {
                return Err(DecodeError::InvalidPacketId);
            }
            packet_id
        };

        let properties = Properties::decode(ba)?;
        if let Err(property_type) = check_property_type_list(properties.props(), PUBLISH_PROPERTIES)
        {
            log::error!("v5/PublishPacket: invalid property type {property_type:?}");
            return Err(DecodeError::InvalidPropertyType);
        }

        // The payload is the remainder of the packet; a zero length
        // payload is valid.
        let header_len = ba.offset() - body_start;
        let msg_len = fixed_header
            .remaining_length()
            .checked_sub(header_len)
            .ok_or(DecodeError::InvalidRemainingLength)?;
        let msg = ba.read_bytes(msg_len)?.to_vec();

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            properties,
            msg,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(buf)?;

        self.topic.encode(buf)?;
        if self.qos != QoS::AtMostOnce {
            self.packet_id.encode(buf)?;
        }
        self.properties.encode(buf)?;
        buf.write_all(&self.msg)?;

        Ok(buf.len() - old_len)
    }
}

impl Packet for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish {
            dup: self.dup,
            retain: self.retain,
            qos: self.qos,
        }
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = self.get_fixed_header()?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v5::Property;
    use crate::U16Data;

    #[test]
    fn test_encode_qos0() {
        let packet = PublishPacket::new("hello", QoS::AtMostOnce, b"msg").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(
            &buf,
            &[
                0x30, 0x0b, // fixed header
                0x00, 0x05, b'h', b'e', b'l', b'l', b'o', // topic
                0x00, // property length
                b'm', b's', b'g', // payload
            ]
        );
    }

    #[test]
    fn test_round_trip_qos2() {
        let mut packet = PublishPacket::new("a/b", QoS::ExactOnce, b"payload").unwrap();
        packet.set_packet_id(PacketId::new(257));
        packet.set_retain(true);
        packet.set_dup(true).unwrap();

        let mut buf = Vec::new();
        let written = packet.encode(&mut buf).unwrap();
        assert_eq!(written, packet.bytes().unwrap());

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.packet_id(), PacketId::new(257));
        assert!(decoded.dup());
        assert!(decoded.retain());
        assert_eq!(decoded.message(), b"payload");
    }

    #[test]
    fn test_round_trip_with_alias_and_empty_topic() {
        let mut packet = PublishPacket::new("", QoS::AtMostOnce, b"x").unwrap();
        packet
            .properties_mut()
            .push(Property::TopicAlias(U16Data::new(4)));

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert!(decoded.topic().is_empty());
        assert_eq!(decoded.properties().topic_alias(), Some(4));
    }

    #[test]
    fn test_dup_on_qos0_rejected() {
        let mut packet = PublishPacket::new("t", QoS::AtMostOnce, b"").unwrap();
        assert!(packet.set_dup(true).is_err());
    }

    #[test]
    fn test_decode_zero_packet_id() {
        let buf = [
            0x32, 0x08, // QoS 1
            0x00, 0x01, b't', // topic
            0x00, 0x00, // packet id 0
            0x00, // property length
            b'h', b'i',
        ];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut ba),
            Err(DecodeError::InvalidPacketId)
        );
    }
}
