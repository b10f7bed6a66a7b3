// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use super::property::{check_multiple_subscription_identifiers, check_property_type_list};
use super::{Properties, PropertyType};
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, QoS, SubTopic, VarIntError,
};

/// Properties available in SUBSCRIBE packets.
pub const SUBSCRIBE_PROPERTIES: &[PropertyType] = &[
    PropertyType::SubscriptionIdentifier,
    PropertyType::UserProperty,
];

/// Retain handling option of a subscription, bits 4 and 5 of the
/// subscription options byte.
///
/// Controls whether retained messages are sent when the subscription is
/// established. A value of 3 is a protocol error.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetainHandling {
    /// Send retained messages at the time of the subscribe.
    #[default]
    Send = 0,

    /// Send retained messages only if the subscription does not
    /// currently exist.
    SendFirst = 1,

    /// Do not send retained messages.
    NoSend = 2,
}

impl TryFrom<u8> for RetainHandling {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Send),
            1 => Ok(Self::SendFirst),
            2 => Ok(Self::NoSend),
            _ => Err(DecodeError::InvalidSubscriptionOptions),
        }
    }
}

/// One topic filter with its subscription options byte.
///
/// Options byte layout: QoS bits 0-1, no-local bit 2, retain-as-published
/// bit 3, retain-handling bits 4-5; bits 6-7 are reserved and MUST be
/// zero [MQTT-3.8.3-5].
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscribeTopic {
    topic: SubTopic,

    /// Maximum QoS at which the server may send messages to the client.
    qos: QoS,

    /// When set, messages MUST NOT be forwarded to a connection with a
    /// client id equal to the publishing connection [MQTT-3.8.3-3].
    no_local: bool,

    /// When set, forwarded messages keep the RETAIN flag they were
    /// published with.
    retain_as_published: bool,

    retain_handling: RetainHandling,
}

impl SubscribeTopic {
    /// Create a new subscription entry.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is not a valid filter.
    pub fn new(topic: &str, qos: QoS) -> Result<Self, EncodeError> {
        let topic = SubTopic::new(topic)?;
        Ok(Self {
            topic,
            qos,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_no_local(&mut self, no_local: bool) -> &mut Self {
        self.no_local = no_local;
        self
    }

    #[must_use]
    pub const fn no_local(&self) -> bool {
        self.no_local
    }

    pub fn set_retain_as_published(&mut self, retain_as_published: bool) -> &mut Self {
        self.retain_as_published = retain_as_published;
        self
    }

    #[must_use]
    pub const fn retain_as_published(&self) -> bool {
        self.retain_as_published
    }

    pub fn set_retain_handling(&mut self, retain_handling: RetainHandling) -> &mut Self {
        self.retain_handling = retain_handling;
        self
    }

    #[must_use]
    pub const fn retain_handling(&self) -> RetainHandling {
        self.retain_handling
    }

    /// Byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.topic.bytes() + 1
    }
}

impl EncodePacket for SubscribeTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        self.topic.encode(buf)?;

        let mut options: u8 = self.qos as u8;
        if self.no_local {
            options |= 0b0000_0100;
        }
        if self.retain_as_published {
            options |= 0b0000_1000;
        }
        options |= (self.retain_handling as u8) << 4;
        buf.push(options);

        Ok(self.bytes())
    }
}

impl DecodePacket for SubscribeTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let topic = SubTopic::decode(ba)?;

        let options = ba.read_byte()?;
        let qos = QoS::try_from(options & 0b0000_0011)?;
        let no_local = (options & 0b0000_0100) != 0;
        let retain_as_published = (options & 0b0000_1000) != 0;
        let retain_handling = RetainHandling::try_from((options & 0b0011_0000) >> 4)?;

        // Reserved bits 6 and 7 MUST be zero [MQTT-3.8.3-5].
        if options & 0b1100_0000 != 0 {
            return Err(DecodeError::InvalidSubscriptionOptions);
        }

        Ok(Self {
            topic,
            qos,
            no_local,
            retain_as_published,
            retain_handling,
        })
    }
}

/// SUBSCRIBE registers one or more topic filters with the server.
///
/// Basic packet structure:
/// ```txt
/// +----------------------------+
/// | Fixed header               |
/// +----------------------------+
/// | Packet id                  |
/// +----------------------------+
/// | Properties ...             |
/// +----------------------------+
/// | Topic 0, options byte      |
/// +----------------------------+
/// | Topic 1, options byte      |
/// +----------------------------+
/// | ...                        |
/// +----------------------------+
/// ```
///
/// At least one filter is required [MQTT-3.8.3-2]; fixed-header flag bits
/// MUST be 0b0010.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscribePacket {
    packet_id: PacketId,
    properties: Properties,
    topics: Vec<SubscribeTopic>,
}

impl SubscribePacket {
    /// Create a packet subscribing to a single topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is not a valid filter.
    pub fn new(topic: &str, qos: QoS, packet_id: PacketId) -> Result<Self, EncodeError> {
        let topic = SubscribeTopic::new(topic, qos)?;
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics: vec![topic],
        })
    }

    /// Create a packet carrying several filters that share one packet id.
    ///
    /// # Errors
    ///
    /// Returns error if `topics` is empty.
    pub fn with_topics(
        packet_id: PacketId,
        topics: Vec<SubscribeTopic>,
    ) -> Result<Self, EncodeError> {
        if topics.is_empty() {
            return Err(EncodeError::InvalidData);
        }
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics,
        })
    }

    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn topics(&self) -> &[SubscribeTopic] {
        &self.topics
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let remaining_length = PacketId::bytes()
            + self.properties.bytes()
            + self.topics.iter().map(SubscribeTopic::bytes).sum::<usize>();
        FixedHeader::new(PacketType::Subscribe, remaining_length)
    }
}

impl DecodePacket for SubscribePacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Subscribe {
            return Err(DecodeError::InvalidPacketType);
        }

        let body_start = ba.offset();
        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }

        let properties = Properties::decode(ba)?;
        if let Err(property_type) =
            check_property_type_list(properties.props(), SUBSCRIBE_PROPERTIES)
        {
            log::error!("v5/SubscribePacket: invalid property type {property_type:?}");
            return Err(DecodeError::InvalidPropertyType);
        }
        if check_multiple_subscription_identifiers(properties.props()).is_err() {
            log::error!("v5/SubscribePacket: repeated subscription identifier");
            return Err(DecodeError::InvalidPropertyType);
        }

        let mut topics = Vec::new();
        while ba.offset() - body_start < fixed_header.remaining_length() {
            topics.push(SubscribeTopic::decode(ba)?);
        }
        // A SUBSCRIBE with no payload is a protocol error [MQTT-3.8.3-2].
        if topics.is_empty() {
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(Self {
            packet_id,
            properties,
            topics,
        })
    }
}

impl EncodePacket for SubscribePacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        self.properties.encode(buf)?;
        for topic in &self.topics {
            topic.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl Packet for SubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Subscribe
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
    use crate::VarInt;

    #[test]
    fn test_encode_single() {
        let packet = SubscribePacket::new("sensor/+", QoS::AtLeastOnce, PacketId::new(2)).unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(
            &buf,
            &[
                0x82, 0x0e, // fixed header
                0x00, 0x02, // packet id
                0x00, // property length
                0x00, 0x08, b's', b'e', b'n', b's', b'o', b'r', b'/', b'+',
                0x01, // options: QoS 1
            ]
        );
    }

    #[test]
    fn test_round_trip_batch() {
        let mut first = SubscribeTopic::new("a/d", QoS::ExactOnce).unwrap();
        first.set_no_local(true).set_retain_as_published(true);
        let mut second = SubscribeTopic::new("a/#", QoS::AtMostOnce).unwrap();
        second.set_retain_handling(RetainHandling::NoSend);
        let mut packet =
            SubscribePacket::with_topics(PacketId::new(17), vec![first, second]).unwrap();
        packet
            .properties_mut()
            .push(Property::SubscriptionIdentifier(VarInt::from(21).unwrap()));

        let mut buf = Vec::new();
        let written = packet.encode(&mut buf).unwrap();
        assert_eq!(written, packet.bytes().unwrap());

        let mut ba = ByteArray::new(&buf);
        let decoded = SubscribePacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.topics().len(), 2);
        assert!(decoded.topics()[0].no_local());
        assert_eq!(decoded.topics()[1].retain_handling(), RetainHandling::NoSend);
    }

    #[test]
    fn test_decode_reserved_option_bits() {
        let buf = [
            0x82, 0x07, 0x00, 0x02, 0x00, 0x00, 0x01, b't', 0x40, // reserved bit set
        ];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            SubscribePacket::decode(&mut ba),
            Err(DecodeError::InvalidSubscriptionOptions)
        );
    }
}
