//! Frame encoding and recovery.

use super::record::JournalRecord;
use crate::error::{CoreError, CoreResult};

/// Magic bytes opening every frame.
pub(crate) const FRAME_MAGIC: [u8; 4] = *b"DWJ1";

const HEADER_LEN: usize = 8;
const TRAILER_LEN: usize = 4;

/// Records recovered from a journal.
#[derive(Debug, Default)]
pub(crate) struct DecodedJournal {
    /// Complete records, in append order.
    pub records: Vec<JournalRecord>,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// True if bytes after `valid_len` were discarded.
    pub torn_tail: bool,
}

/// Encodes one record as a frame.
pub(crate) fn encode_frame(record: &JournalRecord) -> CoreResult<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::into_writer(record, &mut body).map_err(|e| CoreError::codec(e.to_string()))?;

    let len = u32::try_from(body.len())
        .map_err(|_| CoreError::codec(format!("record too large: {} bytes", body.len())))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len() + TRAILER_LEN);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&compute_crc32(&body).to_le_bytes());
    Ok(frame)
}

/// Decodes every complete frame in `bytes`.
///
/// An incomplete final frame, or a final frame failing its checksum, ends
/// recovery without error. Any other damage is corruption.
pub(crate) fn decode_frames(bytes: &[u8]) -> CoreResult<DecodedJournal> {
    let mut decoded = DecodedJournal::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < HEADER_LEN {
            decoded.torn_tail = true;
            break;
        }
        if rest[..4] != FRAME_MAGIC {
            return Err(CoreError::journal_corruption(format!(
                "bad frame magic at offset {offset}"
            )));
        }

        let len = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let frame_len = HEADER_LEN + len + TRAILER_LEN;
        if rest.len() < frame_len {
            decoded.torn_tail = true;
            break;
        }

        let body = &rest[HEADER_LEN..HEADER_LEN + len];
        let trailer = &rest[HEADER_LEN + len..frame_len];
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if stored != compute_crc32(body) {
            if rest.len() == frame_len {
                decoded.torn_tail = true;
                break;
            }
            return Err(CoreError::journal_corruption(format!(
                "checksum mismatch at offset {offset}"
            )));
        }

        let record: JournalRecord = ciborium::from_reader(body)
            .map_err(|e| CoreError::journal_corruption(format!("offset {offset}: {e}")))?;
        decoded.records.push(record);
        offset += frame_len;
        decoded.valid_len = offset as u64;
    }

    Ok(decoded)
}

/// Computes the IEEE CRC32 of `data`.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftwood_protocol::QueueEntryId;

    fn frames(n: usize) -> (Vec<u8>, Vec<QueueEntryId>) {
        let ids: Vec<_> = (0..n).map(|_| QueueEntryId::new()).collect();
        let mut bytes = Vec::new();
        for id in &ids {
            bytes.extend(encode_frame(&JournalRecord::Dequeue(*id)).unwrap());
        }
        (bytes, ids)
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn decodes_in_order() {
        let (bytes, ids) = frames(3);
        let decoded = decode_frames(&bytes).unwrap();
        assert!(!decoded.torn_tail);
        assert_eq!(decoded.valid_len, bytes.len() as u64);
        let got: Vec<_> = decoded
            .records
            .iter()
            .map(|r| match r {
                JournalRecord::Dequeue(id) => *id,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(got, ids);
    }

    #[test]
    fn every_truncation_point_recovers_a_prefix() {
        let (bytes, _) = frames(2);
        let first_len = encode_frame(&JournalRecord::Dequeue(QueueEntryId::new()))
            .unwrap()
            .len();
        for cut in 0..bytes.len() {
            let decoded = decode_frames(&bytes[..cut]).unwrap();
            let expected = usize::from(cut >= first_len);
            assert_eq!(decoded.records.len(), expected, "cut at {cut}");
            assert_eq!(decoded.torn_tail, cut != 0 && cut != first_len);
        }
    }

    #[test]
    fn damaged_last_frame_is_torn() {
        let (mut bytes, _) = frames(2);
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        let decoded = decode_frames(&bytes).unwrap();
        assert_eq!(decoded.records.len(), 1);
        assert!(decoded.torn_tail);
    }

    #[test]
    fn damaged_middle_frame_is_corruption() {
        let (mut bytes, _) = frames(2);
        bytes[HEADER_LEN + 1] ^= 0xFF;
        let err = decode_frames(&bytes).unwrap_err();
        assert!(matches!(err, CoreError::JournalCorruption { .. }));

        let (mut bytes, _) = frames(2);
        bytes[0] = b'X';
        assert!(decode_frames(&bytes).is_err());
    }
}
