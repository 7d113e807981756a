//! Binary wire encoding of a [`Reading`].
//!
//! Frame layout, all integers little-endian:
//!
//! | field        | size          |
//! |--------------|---------------|
//! | id length    | u16           |
//! | source id    | UTF-8 bytes   |
//! | value        | f64           |
//! | timestamp    | i64 (ms)      |
//! | sequence num | u32           |

use byteorder::{ByteOrder, LittleEndian};

use crate::error::CodecError;
use crate::reading::Reading;

const ID_LEN_SIZE: usize = 2;
const BODY_SIZE: usize = 8 + 8 + 4;

pub const MAX_SOURCE_ID_LEN: usize = u16::MAX as usize;

pub fn encoded_len(reading: &Reading) -> usize {
    ID_LEN_SIZE + reading.source_id().len() + BODY_SIZE
}

pub fn encode(reading: &Reading) -> Result<Vec<u8>, CodecError> {
    let id = reading.source_id().as_bytes();
    if id.len() > MAX_SOURCE_ID_LEN {
        return Err(CodecError::SourceIdTooLong {
            len: id.len(),
            max: MAX_SOURCE_ID_LEN,
        });
    }

    let mut frame = vec![0u8; encoded_len(reading)];
    LittleEndian::write_u16(&mut frame[..ID_LEN_SIZE], id.len() as u16);
    let body = ID_LEN_SIZE + id.len();
    frame[ID_LEN_SIZE..body].copy_from_slice(id);
    LittleEndian::write_f64(&mut frame[body..body + 8], reading.value());
    LittleEndian::write_i64(&mut frame[body + 8..body + 16], reading.origin_timestamp());
    LittleEndian::write_u32(&mut frame[body + 16..body + 20], reading.sequence_num());
    Ok(frame)
}

pub fn decode(data: &[u8]) -> Result<Reading, CodecError> {
    if data.len() < ID_LEN_SIZE {
        return Err(CodecError::Truncated {
            needed: ID_LEN_SIZE,
            available: data.len(),
        });
    }

    let id_len = LittleEndian::read_u16(&data[..ID_LEN_SIZE]) as usize;
    let needed = ID_LEN_SIZE + id_len + BODY_SIZE;
    if data.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: data.len(),
        });
    }
    if data.len() > needed {
        return Err(CodecError::TrailingBytes(data.len() - needed));
    }

    let body = ID_LEN_SIZE + id_len;
    let source_id = String::from_utf8(data[ID_LEN_SIZE..body].to_vec())?;
    let value = LittleEndian::read_f64(&data[body..body + 8]);
    let timestamp = LittleEndian::read_i64(&data[body + 8..body + 16]);
    let sequence_num = LittleEndian::read_u32(&data[body + 16..body + 20]);

    Ok(Reading::new(source_id, value, timestamp, sequence_num))
}
