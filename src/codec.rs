//! Memcomparable key encoding.
//!
//! Storage nodes report region boundaries to the placement service in
//! memcomparable format: the key is split into 8-byte groups, each group is
//! zero-padded and followed by a marker byte of `0xFF - pad_count`. Region
//! statistics queries must encode their range keys the same way.

use crate::error::{QuiesceError, Result};

const GROUP_SIZE: usize = 8;
const MARKER: u8 = 0xFF;
const PAD: u8 = 0x00;

/// Encode a raw key into memcomparable format.
pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity((data.len() / GROUP_SIZE + 1) * (GROUP_SIZE + 1));
    let mut idx = 0;
    loop {
        let remain = data.len() - idx;
        let pad = GROUP_SIZE.saturating_sub(remain);
        let end = idx + GROUP_SIZE.min(remain);
        out.extend_from_slice(&data[idx..end]);
        out.extend(std::iter::repeat(PAD).take(pad));
        out.push(MARKER - pad as u8);
        if pad > 0 {
            break;
        }
        idx += GROUP_SIZE;
    }
    out
}

/// Decode a memcomparable-encoded key back into raw bytes.
pub fn decode_bytes(encoded: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded.len() / (GROUP_SIZE + 1) * GROUP_SIZE);
    for group in encoded.chunks(GROUP_SIZE + 1) {
        if group.len() != GROUP_SIZE + 1 {
            return Err(QuiesceError::Internal(format!(
                "truncated memcomparable group of {} bytes",
                group.len()
            )));
        }
        let marker = group[GROUP_SIZE];
        let pad = (MARKER - marker) as usize;
        if pad > GROUP_SIZE {
            return Err(QuiesceError::Internal(format!(
                "invalid memcomparable marker {marker:#04x}"
            )));
        }
        let real = GROUP_SIZE - pad;
        if group[real..GROUP_SIZE].iter().any(|&b| b != PAD) {
            return Err(QuiesceError::Internal(
                "non-zero padding in memcomparable group".into(),
            ));
        }
        out.extend_from_slice(&group[..real]);
        if pad > 0 {
            break;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_empty_key() {
        assert_eq!(encode_bytes(b""), vec![0, 0, 0, 0, 0, 0, 0, 0, 0xF7]);
    }

    #[test]
    fn test_encode_short_key() {
        assert_eq!(
            encode_bytes(b"abc"),
            vec![b'a', b'b', b'c', 0, 0, 0, 0, 0, 0xFA]
        );
    }

    #[test]
    fn test_encode_full_group_appends_empty_group() {
        let encoded = encode_bytes(b"12345678");
        assert_eq!(encoded.len(), 18);
        assert_eq!(&encoded[..8], b"12345678");
        assert_eq!(encoded[8], 0xFF);
        assert_eq!(&encoded[9..17], &[0u8; 8]);
        assert_eq!(encoded[17], 0xF7);
    }

    #[test]
    fn test_round_trip() {
        for key in [
            b"".as_slice(),
            b"a",
            b"12345678",
            b"123456789",
            b"\x00\x01\xff\xfe",
        ] {
            assert_eq!(decode_bytes(&encode_bytes(key)).unwrap(), key);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_bytes(&[1, 2, 3]).is_err());
        assert!(decode_bytes(&[1, 2, 3, 4, 5, 6, 7, 8, 0x00]).is_err());
    }
}
