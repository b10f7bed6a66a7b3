// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use super::property::check_property_type_list;
use super::{Properties, PropertyType};
use crate::utils::validate_client_id;
use crate::{
    BinaryData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    Packet, PacketType, ProtocolLevel, PubTopic, QoS, StringData, VarIntError,
};

/// Properties available in the CONNECT variable header.
pub const CONNECT_PROPERTIES: &[PropertyType] = &[
    PropertyType::SessionExpiryInterval,
    PropertyType::ReceiveMaximum,
    PropertyType::MaximumPacketSize,
    PropertyType::TopicAliasMaximum,
    PropertyType::RequestResponseInformation,
    PropertyType::RequestProblemInformation,
    PropertyType::UserProperty,
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
];

/// Properties available in the will block of a CONNECT packet.
pub const WILL_PROPERTIES: &[PropertyType] = &[
    PropertyType::WillDelayInterval,
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::ContentType,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
];

/// CONNECT is the first packet sent from the client after the network
/// connection is established, and must be sent exactly once.
///
/// Basic packet structure:
/// ```txt
///  7                          0
/// +----------------------------+
/// | Fixed header               |
/// +----------------------------+
/// | Protocol name length       |
/// +----------------------------+
/// | Protocol name "MQTT"       |
/// +----------------------------+
/// | Protocol level             |
/// +----------------------------+
/// | Connect flags              |
/// +----------------------------+
/// | Keep alive                 |
/// +----------------------------+
/// | Properties ...             |
/// +----------------------------+
/// | Client id                  |
/// +----------------------------+
/// | Will properties ...        |
/// +----------------------------+
/// | Will topic, will payload   |
/// +----------------------------+
/// | Username, password         |
/// +----------------------------+
/// ```
///
/// The will block is present only when the will flag is set; username and
/// password are present only when their flags are set.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectPacket {
    protocol_name: StringData,
    protocol_level: ProtocolLevel,

    /// When set, the server discards any existing session for this client
    /// id and starts a new one.
    clean_session: bool,

    /// Time interval in seconds between two control packets the client
    /// commits to. Zero disables the keep alive mechanism.
    keep_alive: u16,

    properties: Properties,

    /// The first field of the payload. May be empty, in which case the
    /// server assigns an identifier and returns it in CONNACK.
    client_id: StringData,

    will_qos: QoS,
    will_retain: bool,
    will_properties: Properties,
    will_topic: Option<PubTopic>,
    will_message: BinaryData,

    username: StringData,
    password: BinaryData,
}

impl Default for ConnectPacket {
    fn default() -> Self {
        Self {
            protocol_name: StringData::from("MQTT").expect("protocol name"),
            protocol_level: ProtocolLevel::V5,
            clean_session: true,
            keep_alive: 60,
            properties: Properties::new(),
            client_id: StringData::new(),
            will_qos: QoS::AtMostOnce,
            will_retain: false,
            will_properties: Properties::new(),
            will_topic: None,
            will_message: BinaryData::new(),
            username: StringData::new(),
            password: BinaryData::new(),
        }
    }
}

impl ConnectPacket {
    /// Create a new CONNECT packet with the given client id.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` contains invalid characters.
    pub fn new(client_id: &str) -> Result<Self, EncodeError> {
        validate_client_id(client_id).map_err(|_| EncodeError::InvalidData)?;
        let client_id = StringData::from(client_id)?;
        Ok(Self {
            client_id,
            ..Self::default()
        })
    }

    pub fn set_protocol_level(&mut self, level: ProtocolLevel) -> &mut Self {
        self.protocol_level = level;
        self
    }

    #[must_use]
    pub const fn protocol_level(&self) -> ProtocolLevel {
        self.protocol_level
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    /// Update client id.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` contains invalid characters.
    pub fn set_client_id(&mut self, client_id: &str) -> Result<&mut Self, EncodeError> {
        validate_client_id(client_id).map_err(|_| EncodeError::InvalidData)?;
        self.client_id = StringData::from(client_id)?;
        Ok(self)
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_ref()
    }

    /// Set the will message published by the server when this client
    /// disconnects ungracefully.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid or `message` exceeds 64k.
    pub fn set_will(
        &mut self,
        topic: &str,
        message: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<&mut Self, EncodeError> {
        self.will_topic = Some(PubTopic::new(topic)?);
        self.will_message = BinaryData::from_slice(message)?;
        self.will_qos = qos;
        self.will_retain = retain;
        Ok(self)
    }

    #[must_use]
    pub fn will_topic(&self) -> Option<&str> {
        self.will_topic.as_ref().map(AsRef::as_ref)
    }

    #[must_use]
    pub fn will_message(&self) -> &[u8] {
        self.will_message.as_ref()
    }

    #[must_use]
    pub const fn will_qos(&self) -> QoS {
        self.will_qos
    }

    #[must_use]
    pub const fn will_retain(&self) -> bool {
        self.will_retain
    }

    pub fn will_properties_mut(&mut self) -> &mut Properties {
        &mut self.will_properties
    }

    #[must_use]
    pub const fn will_properties(&self) -> &Properties {
        &self.will_properties
    }

    /// Set username used in authentication.
    ///
    /// # Errors
    ///
    /// Returns error if `username` contains invalid characters.
    pub fn set_username(&mut self, username: &str) -> Result<&mut Self, EncodeError> {
        self.username = StringData::from(username)?;
        Ok(self)
    }

    #[must_use]
    pub fn username(&self) -> &str {
        self.username.as_ref()
    }

    /// Set password used in authentication.
    ///
    /// # Errors
    ///
    /// Returns error if `password` exceeds 64k bytes.
    pub fn set_password(&mut self, password: &[u8]) -> Result<&mut Self, EncodeError> {
        self.password = BinaryData::from_slice(password)?;
        Ok(self)
    }

    #[must_use]
    pub fn password(&self) -> &[u8] {
        self.password.as_ref()
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    fn connect_flags(&self) -> u8 {
        let mut flags = 0b0000_0000;
        if self.clean_session {
            flags |= 0b0000_0010;
        }
        if self.will_topic.is_some() {
            flags |= 0b0000_0100;
            flags |= (self.will_qos as u8) << 3;
            if self.will_retain {
                flags |= 0b0010_0000;
            }
        }
        if !self.password.is_empty() {
            flags |= 0b0100_0000;
        }
        if !self.username.is_empty() {
            flags |= 0b1000_0000;
        }
        flags
    }

    fn remaining_length(&self) -> usize {
        let mut len = self.protocol_name.bytes()
            + ProtocolLevel::bytes()
            + 1 // connect flags
            + 2 // keep alive
            + self.properties.bytes()
            + self.client_id.bytes();

        if let Some(will_topic) = &self.will_topic {
            len += self.will_properties.bytes();
            len += will_topic.bytes();
            len += self.will_message.bytes();
        }
        if !self.username.is_empty() {
            len += self.username.bytes();
        }
        if !self.password.is_empty() {
            len += self.password.bytes();
        }
        len
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        FixedHeader::new(PacketType::Connect, self.remaining_length())
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        let protocol_name = StringData::decode(ba)?;
        if protocol_name.as_ref() != "MQTT" {
            return Err(DecodeError::InvalidProtocolName);
        }
        let protocol_level = ProtocolLevel::decode(ba)?;

        let connect_flags = ba.read_byte()?;
        // Bit 0 is reserved and MUST be zero [MQTT-3.1.2-3].
        if connect_flags & 0b0000_0001 != 0 {
            return Err(DecodeError::InvalidPacketFlags);
        }
        let clean_session = connect_flags & 0b0000_0010 != 0;
        let has_will = connect_flags & 0b0000_0100 != 0;
        let will_qos = QoS::try_from((connect_flags & 0b0001_1000) >> 3)?;
        let will_retain = connect_flags & 0b0010_0000 != 0;
        let has_password = connect_flags & 0b0100_0000 != 0;
        let has_username = connect_flags & 0b1000_0000 != 0;

        // Will QoS and retain MUST be zero when the will flag is unset
        // [MQTT-3.1.2-11].
        if !has_will && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(DecodeError::InvalidPacketFlags);
        }

        let keep_alive = ba.read_u16()?;

        let properties = Properties::decode(ba)?;
        if let Err(property_type) = check_property_type_list(properties.props(), CONNECT_PROPERTIES)
        {
            log::error!("v5/ConnectPacket: invalid property type {property_type:?}");
            return Err(DecodeError::InvalidPropertyType);
        }

        let client_id = StringData::decode(ba)?;
        validate_client_id(client_id.as_ref()).map_err(|_| DecodeError::InvalidClientId)?;

        let mut will_properties = Properties::new();
        let mut will_topic = None;
        let mut will_message = BinaryData::new();
        if has_will {
            will_properties = Properties::decode(ba)?;
            if let Err(property_type) =
                check_property_type_list(will_properties.props(), WILL_PROPERTIES)
            {
                log::error!("v5/ConnectPacket: invalid will property type {property_type:?}");
                return Err(DecodeError::InvalidPropertyType);
            }
            will_topic = Some(PubTopic::decode(ba)?);
            will_message = BinaryData::decode(ba)?;
        }

        let username = if has_username {
            StringData::decode(ba)?
        } else {
            StringData::new()
        };
        let password = if has_password {
            BinaryData::decode(ba)?
        } else {
            BinaryData::new()
        };

        Ok(Self {
            protocol_name,
            protocol_level,
            clean_session,
            keep_alive,
            properties,
            client_id,
            will_qos,
            will_retain,
            will_properties,
            will_topic,
            will_message,
            username,
            password,
        })
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(buf)?;

        self.protocol_name.encode(buf)?;
        self.protocol_level.encode(buf)?;
        buf.push(self.connect_flags());
        buf.push((self.keep_alive >> 8) as u8);
        buf.push((self.keep_alive & 0xff) as u8);
        self.properties.encode(buf)?;

        self.client_id.encode(buf)?;

        if let Some(will_topic) = &self.will_topic {
            self.will_properties.encode(buf)?;
            will_topic.encode(buf)?;
            self.will_message.encode(buf)?;
        }
        if !self.username.is_empty() {
            self.username.encode(buf)?;
        }
        if !self.password.is_empty() {
            self.password.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl Packet for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = self.get_fixed_header()?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}
