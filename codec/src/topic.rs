// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt;

use crate::utils::validate_utf8_string;
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, StringData};

/// Topic name carried in a PUBLISH packet.
///
/// A topic name MUST NOT contain the wildcard characters `+` or `#`
/// [MQTT-3.3.2-2]. An empty topic name is accepted because a 5.0 PUBLISH
/// may carry a topic alias in place of the name; it is a protocol error
/// everywhere else.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PubTopic(StringData);

impl PubTopic {
    /// Create a new topic name.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` contains wildcard characters or fails
    /// string validation.
    pub fn new(topic: &str) -> Result<Self, EncodeError> {
        validate_pub_topic(topic)?;
        let data = StringData::from(topic)?;
        Ok(Self(data))
    }

    /// Byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.0.bytes()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<str> for PubTopic {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl fmt::Display for PubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecodePacket for PubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let data = StringData::decode(ba)?;
        validate_pub_topic(data.as_ref()).map_err(|_| DecodeError::InvalidTopic)?;
        Ok(Self(data))
    }
}

impl EncodePacket for PubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        self.0.encode(buf)
    }
}

/// Topic filter carried in SUBSCRIBE and UNSUBSCRIBE packets.
///
/// Filters may contain the `+` single-level wildcard (alone in its level)
/// and the `#` multi-level wildcard (alone in the last level) [MQTT-4.7.1].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubTopic(StringData);

impl SubTopic {
    /// Create a new topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is empty or wildcards are misplaced.
    pub fn new(topic: &str) -> Result<Self, EncodeError> {
        validate_sub_topic(topic).map_err(|_| EncodeError::InvalidData)?;
        let data = StringData::from(topic)?;
        Ok(Self(data))
    }

    /// Byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.0.bytes()
    }
}

impl AsRef<str> for SubTopic {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl fmt::Display for SubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecodePacket for SubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let data = StringData::decode(ba)?;
        validate_sub_topic(data.as_ref())?;
        Ok(Self(data))
    }
}

impl EncodePacket for SubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        self.0.encode(buf)
    }
}

fn validate_pub_topic(topic: &str) -> Result<(), EncodeError> {
    validate_utf8_string(topic).map_err(|_| EncodeError::InvalidString)?;
    if topic.contains(['+', '#']) {
        return Err(EncodeError::InvalidData);
    }
    Ok(())
}

fn validate_sub_topic(topic: &str) -> Result<(), DecodeError> {
    validate_utf8_string(topic).map_err(|_| DecodeError::InvalidString)?;
    if topic.is_empty() {
        return Err(DecodeError::InvalidTopic);
    }

    let levels: Vec<&str> = topic.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') {
            // `#` must occupy an entire level and must be the last one.
            if *level != "#" || index != levels.len() - 1 {
                return Err(DecodeError::InvalidTopic);
            }
        }
        if level.contains('+') && *level != "+" {
            return Err(DecodeError::InvalidTopic);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pub_topic() {
        assert!(PubTopic::new("sensor/temperature").is_ok());
        assert!(PubTopic::new("").is_ok());
        assert!(PubTopic::new("sensor/+").is_err());
        assert!(PubTopic::new("sensor/#").is_err());
    }

    #[test]
    fn test_sub_topic() {
        assert!(SubTopic::new("sensor/temperature").is_ok());
        assert!(SubTopic::new("sensor/+/state").is_ok());
        assert!(SubTopic::new("sensor/#").is_ok());
        assert!(SubTopic::new("#").is_ok());
        assert!(SubTopic::new("$share/group/sensor/#").is_ok());
        assert!(SubTopic::new("").is_err());
        assert!(SubTopic::new("sensor/#/state").is_err());
        assert!(SubTopic::new("sensor/a+").is_err());
        assert!(SubTopic::new("sensor/a#").is_err());
    }

    #[test]
    fn test_round_trip() {
        let topic = SubTopic::new("a/+/#").unwrap();
        let mut buf = Vec::new();
        topic.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(SubTopic::decode(&mut ba).unwrap(), topic);
    }
}
