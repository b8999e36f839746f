//! Framing for the event journal.
//!
//! Each frame is:
//!
//! ```text
//! magic "SEVJ" (4) | version (2) | type (1) | payload len (4) | payload | crc32 (4)
//! ```
//!
//! The CRC covers the header and the payload. All integers are little-endian.

use crate::error::{StoreError, StoreResult};

/// Magic bytes opening every frame.
pub(crate) const JOURNAL_MAGIC: [u8; 4] = *b"SEVJ";

/// Current frame format version.
pub(crate) const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
const HEADER_SIZE: usize = 11;
const CRC_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum FrameType {
    Append = 1,
    BundleUpdate = 2,
    Ack = 3,
    Checkpoint = 4,
}

impl FrameType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Append),
            2 => Some(Self::BundleUpdate),
            3 => Some(Self::Ack),
            4 => Some(Self::Checkpoint),
            _ => None,
        }
    }
}

/// A logical journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JournalRecord {
    /// A new event and its JSON encoding.
    Append { index: u64, event_json: Vec<u8> },
    /// Bundle metadata for an existing event, as JSON.
    BundleUpdate { index: u64, metadata_json: Vec<u8> },
    /// Indices removed from the queue.
    Ack { indices: Vec<u64> },
    /// Written after compaction so the index counter survives.
    Checkpoint { next_index: u64 },
}

impl JournalRecord {
    fn frame_type(&self) -> FrameType {
        match self {
            Self::Append { .. } => FrameType::Append,
            Self::BundleUpdate { .. } => FrameType::BundleUpdate,
            Self::Ack { .. } => FrameType::Ack,
            Self::Checkpoint { .. } => FrameType::Checkpoint,
        }
    }

    fn encode_payload(&self) -> StoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Append { index, event_json: bytes }
            | Self::BundleUpdate {
                index,
                metadata_json: bytes,
            } => {
                buf.extend_from_slice(&index.to_le_bytes());
                buf.extend_from_slice(bytes);
            }
            Self::Ack { indices } => {
                let count = u32::try_from(indices.len())
                    .map_err(|_| StoreError::corrupted(0, "ack frame too large"))?;
                buf.extend_from_slice(&count.to_le_bytes());
                for index in indices {
                    buf.extend_from_slice(&index.to_le_bytes());
                }
            }
            Self::Checkpoint { next_index } => {
                buf.extend_from_slice(&next_index.to_le_bytes());
            }
        }
        Ok(buf)
    }

    fn decode_payload(frame_type: FrameType, payload: &[u8], offset: u64) -> StoreResult<Self> {
        let read_u64 = |at: usize| -> StoreResult<u64> {
            payload
                .get(at..at + 8)
                .and_then(|b| b.try_into().ok())
                .map(u64::from_le_bytes)
                .ok_or_else(|| StoreError::corrupted(offset, "unexpected end of payload"))
        };

        match frame_type {
            FrameType::Append => Ok(Self::Append {
                index: read_u64(0)?,
                event_json: payload[8..].to_vec(),
            }),
            FrameType::BundleUpdate => Ok(Self::BundleUpdate {
                index: read_u64(0)?,
                metadata_json: payload[8..].to_vec(),
            }),
            FrameType::Ack => {
                let count = payload
                    .get(0..4)
                    .and_then(|b| b.try_into().ok())
                    .map(u32::from_le_bytes)
                    .ok_or_else(|| StoreError::corrupted(offset, "missing ack count"))?
                    as usize;
                if payload.len() != 4 + count * 8 {
                    return Err(StoreError::corrupted(
                        offset,
                        format!("ack frame length {} does not match count {count}", payload.len()),
                    ));
                }
                let indices = (0..count)
                    .map(|i| read_u64(4 + i * 8))
                    .collect::<StoreResult<Vec<_>>>()?;
                Ok(Self::Ack { indices })
            }
            FrameType::Checkpoint => {
                if payload.len() != 8 {
                    return Err(StoreError::corrupted(offset, "checkpoint frame has trailing bytes"));
                }
                Ok(Self::Checkpoint {
                    next_index: read_u64(0)?,
                })
            }
        }
    }

    /// Encodes the record as a complete frame.
    pub(crate) fn to_frame(&self) -> StoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| StoreError::corrupted(0, "journal payload too large"))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&JOURNAL_MAGIC);
        frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        frame.push(self.frame_type() as u8);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}

/// Result of scanning a journal image.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    /// Records with the offset they start at.
    pub records: Vec<(u64, JournalRecord)>,
    /// Length of the well-formed prefix. Anything after it is a torn tail.
    pub valid_len: u64,
}

/// Parses every complete frame in `data`.
///
/// A frame cut short by the end of the data is a torn write and ends the
/// scan. A complete frame with a bad magic, version, type or checksum is
/// corruption and fails the whole replay, since skipping it could drop
/// queued events.
pub(crate) fn replay(data: &[u8]) -> StoreResult<Replay> {
    let mut out = Replay::default();
    let mut pos = 0usize;

    while pos < data.len() {
        let offset = pos as u64;
        let Some(header) = data.get(pos..pos + HEADER_SIZE) else {
            break;
        };

        if header[0..4] != JOURNAL_MAGIC {
            return Err(StoreError::corrupted(offset, "invalid magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > JOURNAL_VERSION {
            return Err(StoreError::corrupted(
                offset,
                format!("unsupported version {version}"),
            ));
        }
        let frame_type = FrameType::from_byte(header[6]).ok_or_else(|| {
            StoreError::corrupted(offset, format!("unknown frame type {}", header[6]))
        })?;
        let payload_len =
            u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let total = HEADER_SIZE + payload_len + CRC_SIZE;
        if pos + total > data.len() {
            break;
        }

        let body_end = pos + HEADER_SIZE + payload_len;
        let stored_crc = u32::from_le_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        let computed_crc = compute_crc32(&data[pos..body_end]);
        if stored_crc != computed_crc {
            return Err(StoreError::corrupted(
                offset,
                format!("checksum mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"),
            ));
        }

        let payload = &data[pos + HEADER_SIZE..body_end];
        let record = JournalRecord::decode_payload(frame_type, payload, offset)?;
        out.records.push((offset, record));
        pos += total;
        out.valid_len = pos as u64;
    }

    Ok(out)
}

/// CRC-32 (IEEE polynomial).
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
