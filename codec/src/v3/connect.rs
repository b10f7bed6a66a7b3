// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::utils::validate_client_id;
use crate::{
    BinaryData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    Packet, PacketType, ProtocolLevel, PubTopic, QoS, StringData, VarIntError,
};

/// CONNECT packet of MQTT 3.1.1.
///
/// Same layout as the 5.0 variant minus the property blocks:
/// ```txt
/// +----------------------------+
/// | Fixed header               |
/// +----------------------------+
/// | Protocol name "MQTT"       |
/// +----------------------------+
/// | Protocol level (4)         |
/// +----------------------------+
/// | Connect flags              |
/// +----------------------------+
/// | Keep alive                 |
/// +----------------------------+
/// | Client id                  |
/// +----------------------------+
/// | Will topic, will payload   |
/// +----------------------------+
/// | Username, password         |
/// +----------------------------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectPacket {
    protocol_name: StringData,
    protocol_level: ProtocolLevel,
    clean_session: bool,
    keep_alive: u16,
    client_id: StringData,
    will_qos: QoS,
    will_retain: bool,
    will_topic: Option<PubTopic>,
    will_message: BinaryData,
    username: StringData,
    password: BinaryData,
}

impl Default for ConnectPacket {
    fn default() -> Self {
        Self {
            protocol_name: StringData::from("MQTT").expect("protocol name"),
            protocol_level: ProtocolLevel::V4,
            clean_session: true,
            keep_alive: 60,
            client_id: StringData::new(),
            will_qos: QoS::AtMostOnce,
            will_retain: false,
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

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_ref()
    }

    /// Set the will message.
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
            + self.client_id.bytes();
        if let Some(will_topic) = &self.will_topic {
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
        if protocol_level != ProtocolLevel::V4 {
            return Err(DecodeError::InvalidProtocolLevel);
        }

        let connect_flags = ba.read_byte()?;
        if connect_flags & 0b0000_0001 != 0 {
            return Err(DecodeError::InvalidPacketFlags);
        }
        let clean_session = connect_flags & 0b0000_0010 != 0;
        let has_will = connect_flags & 0b0000_0100 != 0;
        let will_qos = QoS::try_from((connect_flags & 0b0001_1000) >> 3)?;
        let will_retain = connect_flags & 0b0010_0000 != 0;
        let has_password = connect_flags & 0b0100_0000 != 0;
        let has_username = connect_flags & 0b1000_0000 != 0;

        if !has_will && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(DecodeError::InvalidPacketFlags);
        }
        // In 3.1.1 a password requires a username [MQTT-3.1.2-22].
        if has_password && !has_username {
            return Err(DecodeError::InvalidPacketFlags);
        }

        let keep_alive = ba.read_u16()?;

        let client_id = StringData::decode(ba)?;
        validate_client_id(client_id.as_ref()).map_err(|_| DecodeError::InvalidClientId)?;

        let mut will_topic = None;
        let mut will_message = BinaryData::new();
        if has_will {
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
            client_id,
            will_qos,
            will_retain,
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

        self.client_id.encode(buf)?;
        if let Some(will_topic) = &self.will_topic {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_minimal() {
        let packet = ConnectPacket::new("id").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(
            &buf,
            &[
                0x10, 0x0e, // fixed header
                0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
                0x04, // protocol level
                0x02, // connect flags: clean session
                0x00, 0x3c, // keep alive 60
                0x00, 0x02, b'i', b'd', // client id
            ]
        );
    }

    #[test]
    fn test_round_trip_with_will_and_auth() {
        let mut packet = ConnectPacket::new("c3").unwrap();
        packet.set_clean_session(false).set_keep_alive(10);
        packet
            .set_will("will/topic", b"bye", QoS::ExactOnce, false)
            .unwrap();
        packet.set_username("user").unwrap();
        packet.set_password(b"secret").unwrap();

        let mut buf = Vec::new();
        let written = packet.encode(&mut buf).unwrap();
        assert_eq!(written, packet.bytes().unwrap());

        let mut ba = ByteArray::new(&buf);
        assert_eq!(ConnectPacket::decode(&mut ba).unwrap(), packet);
    }

    #[test]
    fn test_password_requires_username() {
        // Connect flags with password bit but no username bit.
        let buf = [
            0x10, 0x0e, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x42, 0x00, 0x3c, 0x00, 0x02,
            b'i', b'd',
        ];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidPacketFlags)
        );
    }
}
