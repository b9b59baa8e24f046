//! Minimal FLV framing for piping RTMP media into the segmenter.

use bytes::{BufMut, Bytes, BytesMut};

const HEADER_LEN: usize = 13;
const TAG_HEADER_LEN: usize = 11;

/// Largest payload the 24-bit `DataSize` field can describe
pub const MAX_TAG_PAYLOAD: usize = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TagType {
    Audio = 8,
    Video = 9,
    ScriptData = 18,
}

/// File header announcing audio and video, followed by `PreviousTagSize0`
#[must_use]
pub fn header() -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    buf.put_slice(b"FLV");
    buf.put_u8(1);
    buf.put_u8(0x05);
    buf.put_u32(9);
    buf.put_u32(0);
    buf.freeze()
}

/// One tag plus its trailing `PreviousTagSize`, or `None` when the payload
/// does not fit the 24-bit size field.
#[must_use]
pub fn tag(tag_type: TagType, timestamp: u32, payload: &[u8]) -> Option<Bytes> {
    if payload.len() > MAX_TAG_PAYLOAD {
        return None;
    }
    let size = u32::try_from(payload.len()).ok()?;
    let mut buf = BytesMut::with_capacity(TAG_HEADER_LEN + payload.len() + 4);

    buf.put_u8(tag_type as u8);
    buf.put_slice(&size.to_be_bytes()[1..]);
    buf.put_slice(&timestamp.to_be_bytes()[1..]);
    buf.put_u8(timestamp.to_be_bytes()[0]);
    buf.put_slice(&[0, 0, 0]);
    buf.put_slice(payload);
    buf.put_u32(size + TAG_HEADER_LEN as u32);
    Some(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        assert_eq!(
            header().as_ref(),
            &[b'F', b'L', b'V', 1, 0x05, 0, 0, 0, 9, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_video_tag_layout() {
        let tag = tag(TagType::Video, 0x0102_0304, &[0xAA, 0xBB]).unwrap();

        assert_eq!(tag.len(), 11 + 2 + 4);
        assert_eq!(tag[0], 9);
        assert_eq!(&tag[1..4], &[0, 0, 2]);
        // lower 24 bits first, then the extension byte
        assert_eq!(&tag[4..8], &[0x02, 0x03, 0x04, 0x01]);
        assert_eq!(&tag[8..11], &[0, 0, 0]);
        assert_eq!(&tag[11..13], &[0xAA, 0xBB]);
        assert_eq!(&tag[13..], &13u32.to_be_bytes());
    }

    #[test]
    fn test_empty_script_tag() {
        let tag = tag(TagType::ScriptData, 0, &[]).unwrap();
        assert_eq!(tag[0], 18);
        assert_eq!(&tag[11..], &11u32.to_be_bytes());
    }

    #[test]
    fn test_oversized_payload_is_refused() {
        let largest = vec![0u8; MAX_TAG_PAYLOAD];
        let tag = tag(TagType::Video, 0, &largest).unwrap();
        assert_eq!(&tag[1..4], &[0xFF, 0xFF, 0xFF]);

        let too_large = vec![0u8; MAX_TAG_PAYLOAD + 1];
        assert!(super::tag(TagType::Video, 0, &too_large).is_none());
    }
}
