// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Generate a random alphanumeric string, used as default client id.
#[must_use]
pub fn random_string(len: usize) -> String {
    String::from_utf8(
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .collect::<Vec<u8>>(),
    )
    .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// More than 64k bytes.
    TooManyData,

    /// Contains disallowed control characters.
    InvalidChar,

    /// Not well formed UTF-8, or contains U+0000.
    SeriousError,
}

impl From<std::string::FromUtf8Error> for StringError {
    fn from(_e: std::string::FromUtf8Error) -> StringError {
        StringError::SeriousError
    }
}

/// Check that binary data fits a two-byte length prefix.
///
/// # Errors
///
/// Returns error if `data` exceeds 64k bytes.
#[inline]
pub fn validate_two_bytes_data(data: &[u8]) -> Result<(), StringError> {
    if data.len() > u16::MAX as usize {
        Err(StringError::TooManyData)
    } else {
        Ok(())
    }
}

/// Check string characters and length against MQTT-1.5.4.
///
/// The null character U+0000 and the C0/C1 control ranges are rejected.
/// An empty string is valid.
///
/// # Errors
///
/// Returns error if `s` is too long or contains forbidden code points.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > u16::MAX as usize {
        return Err(StringError::TooManyData);
    }

    for c in s.chars() {
        if c == '\u{0000}' {
            return Err(StringError::SeriousError);
        }

        if ('\u{0001}'..='\u{001f}').contains(&c) || ('\u{007f}'..='\u{009f}').contains(&c) {
            return Err(StringError::InvalidChar);
        }
    }

    Ok(())
}

/// Convert a range of bytes into a validated UTF-8 string.
///
/// # Errors
///
/// Returns error if bytes are not well formed UTF-8 or fail
/// [`validate_utf8_string`].
pub fn to_utf8_string(buf: &[u8]) -> Result<String, StringError> {
    let s = String::from_utf8(buf.to_vec())?;
    validate_utf8_string(&s)?;
    Ok(s)
}

/// Check client id characters.
///
/// The server MAY allow more than the 1.5.3 minimal charset; this client
/// only rejects ids that fail UTF-8 string validation.
///
/// # Errors
///
/// Returns error if `id` is not a valid UTF-8 string field.
pub fn validate_client_id(id: &str) -> Result<(), StringError> {
    validate_utf8_string(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string() {
        let s = random_string(8);
        assert_eq!(s.len(), 8);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_validate_utf8_string() {
        assert!(validate_utf8_string("").is_ok());
        assert!(validate_utf8_string("topic/level").is_ok());
        assert!(validate_utf8_string("\u{0000}").is_err());
        assert!(validate_utf8_string("a\u{0001}b").is_err());
        assert!(validate_utf8_string("a\u{009f}").is_err());
    }

    #[test]
    fn test_to_utf8_string() {
        assert_eq!(to_utf8_string(b"hello").unwrap(), "hello");
        assert!(to_utf8_string(&[0xff, 0xfe]).is_err());
    }
}
