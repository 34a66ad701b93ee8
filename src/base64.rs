//! Base64 marshalling for raw values.
//!
//! Raw byte parameters are rendered as base64 on shell command lines and
//! the advanced value conversion uses the same codec for raw↔string.
//! RFC 4648 standard alphabet with `=` padding; a single invalid
//! character fails the whole decode.

use ::base64::engine::general_purpose::STANDARD;
use ::base64::Engine;

use crate::status::Status;

/// Encode `data` with padding.
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode `text`; any character outside the alphabet (other than valid
/// `=` padding) fails the whole decode with `ParseError`.
pub fn decode(text: &str) -> Result<Vec<u8>, Status> {
    STANDARD.decode(text).map_err(|_| Status::ParseError)
}

/// Upper bound on the encoded length of `n` input bytes: 4·⌈n/3⌉.
pub fn encoded_size(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        4 * (1 + (n - 1) / 3)
    }
}

/// Upper bound on the decoded length of `n` encoded bytes: 3·⌈n/4⌉.
pub fn decoded_size(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        3 * (1 + (n - 1) / 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(encode(b"Man"), "TWFu");
        assert_eq!(encode(b"Ma"), "TWE=");
        assert_eq!(encode(b"M"), "TQ==");
        assert_eq!(decode("TWFu").unwrap(), b"Man");
        assert_eq!(decode("TWE=").unwrap(), b"Ma");
        assert_eq!(decode("TQ==").unwrap(), b"M");
    }

    #[test]
    fn round_trips_arbitrary_bytes() {
        let data: Vec<u8> = (0u16..=255).map(|b| b as u8).collect();
        for len in [0, 1, 2, 3, 4, 57, 255, 256] {
            let slice = &data[..len];
            assert_eq!(decode(&encode(slice)).unwrap(), slice);
        }
    }

    #[test]
    fn invalid_character_fails_whole_decode() {
        let mut text = encode(b"hello world");
        text.replace_range(2..3, "*");
        assert_eq!(decode(&text), Err(Status::ParseError));
    }

    #[test]
    fn size_bounds() {
        assert_eq!(encoded_size(0), 0);
        assert_eq!(encoded_size(1), 4);
        assert_eq!(encoded_size(3), 4);
        assert_eq!(encoded_size(4), 8);
        assert_eq!(decoded_size(4), 3);
        assert_eq!(decoded_size(5), 6);
        for n in 0..100usize {
            assert!(encode(&vec![0u8; n]).len() <= encoded_size(n));
        }
    }
}
