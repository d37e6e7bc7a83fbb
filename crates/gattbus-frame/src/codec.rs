use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::function::{WRITE_MULTIPLE_REGISTERS, WRITE_SINGLE_REGISTER};

/// Trailing checksum size in bytes.
pub const CRC_SIZE: usize = 2;

/// Smallest frame that can carry a checksum: slave + function + CRC.
pub const MIN_FRAME_SIZE: usize = 4;

/// Modbus limit for a single write-multiple request.
pub const MAX_WRITE_REGISTERS: usize = 123;

const CRC_POLY: u16 = 0xA001;
const CRC_SEED: u16 = 0xFFFF;

/// Compute the CRC-16/Modbus checksum of `data`.
///
/// Reflected polynomial 0xA001, seed 0xFFFF, processed one bit at a time.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC_SEED;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Return `payload` followed by its checksum, low byte first.
///
/// Wire format:
/// ```text
/// ┌───────────────────────┬──────────┬──────────┐
/// │ Payload (N bytes)     │ CRC lo   │ CRC hi   │
/// └───────────────────────┴──────────┴──────────┘
/// ```
pub fn append_crc(payload: &[u8]) -> Bytes {
    let mut dst = BytesMut::with_capacity(payload.len() + CRC_SIZE);
    dst.put_slice(payload);
    dst.put_u16_le(crc16(payload));
    dst.freeze()
}

/// Check the trailing checksum of a complete frame.
pub fn is_valid(frame: &[u8]) -> bool {
    verify(frame).is_ok()
}

/// Like [`is_valid`], but reports why a frame was rejected.
pub fn verify(frame: &[u8]) -> Result<()> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(FrameError::TooShort {
            len: frame.len(),
            min: MIN_FRAME_SIZE,
        });
    }
    let split = frame.len() - CRC_SIZE;
    let computed = crc16(&frame[..split]);
    let received = u16::from_le_bytes([frame[split], frame[split + 1]]);
    if computed != received {
        return Err(FrameError::ChecksumMismatch { computed, received });
    }
    Ok(())
}

/// Build a register read request (function 0x03 or 0x04).
pub fn build_read_request(slave: u8, function: u8, start: u16, quantity: u16) -> Bytes {
    let mut payload = BytesMut::with_capacity(6);
    payload.put_u8(slave);
    payload.put_u8(function);
    payload.put_u16(start);
    payload.put_u16(quantity);
    append_crc(&payload)
}

/// Build a write-single-register request (function 0x06).
pub fn build_write_single_register(slave: u8, address: u16, value: u16) -> Bytes {
    let mut payload = BytesMut::with_capacity(6);
    payload.put_u8(slave);
    payload.put_u8(WRITE_SINGLE_REGISTER);
    payload.put_u16(address);
    payload.put_u16(value);
    append_crc(&payload)
}

/// Build a write-multiple-registers request (function 0x10).
///
/// Wire format:
/// ```text
/// ┌───────┬──────┬──────────┬──────────┬───────────┬──────────────────┬─────┐
/// │ Slave │ 0x10 │ Start BE │ Count BE │ Byte count│ Values (BE words)│ CRC │
/// └───────┴──────┴──────────┴──────────┴───────────┴──────────────────┴─────┘
/// ```
pub fn build_write_multiple_registers(slave: u8, start: u16, values: &[u16]) -> Result<Bytes> {
    if values.is_empty() || values.len() > MAX_WRITE_REGISTERS {
        return Err(FrameError::RegisterCount {
            count: values.len(),
            max: MAX_WRITE_REGISTERS,
        });
    }

    let byte_count = values.len() * 2;
    let mut payload = BytesMut::with_capacity(7 + byte_count);
    payload.put_u8(slave);
    payload.put_u8(WRITE_MULTIPLE_REGISTERS);
    payload.put_u16(start);
    payload.put_u16(values.len() as u16);
    payload.put_u8(byte_count as u8);
    for &value in values {
        payload.put_u16(value);
    }
    Ok(append_crc(&payload))
}

/// Decode `byte_count / 2` big-endian registers starting at `offset`.
pub fn parse_registers(data: &[u8], offset: usize, byte_count: usize) -> Result<Vec<u16>> {
    let words = byte_count / 2;
    let end = offset + words * 2;
    if end > data.len() {
        return Err(FrameError::Truncated {
            needed: end,
            available: data.len(),
        });
    }
    Ok(data[offset..end]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::READ_HOLDING_REGISTERS;

    #[test]
    fn crc_matches_reference_vectors() {
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]), 0x0BC4);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn append_places_low_byte_first() {
        let frame = append_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(frame.as_ref(), &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
    }

    #[test]
    fn appended_frames_validate() {
        let payloads: [&[u8]; 4] = [&[0x00, 0x00], &[0x01, 0x03, 0x02, 0x12, 0x34], &[0xFF; 40], &[0x7E]];
        for payload in payloads {
            let frame = append_crc(payload);
            if frame.len() >= MIN_FRAME_SIZE {
                assert!(is_valid(&frame), "payload {payload:02X?}");
            }
        }
    }

    #[test]
    fn single_byte_flip_invalidates() {
        let frame = build_read_request(0x01, READ_HOLDING_REGISTERS, 0x0010, 8);
        for index in 0..frame.len() {
            let mut corrupted = frame.to_vec();
            corrupted[index] ^= 0x5A;
            assert!(!is_valid(&corrupted), "flip at {index} went undetected");
        }
    }

    #[test]
    fn short_frames_are_invalid() {
        assert!(!is_valid(&[]));
        assert!(!is_valid(&[0x01, 0x03, 0xFF]));
        assert!(matches!(
            verify(&[0x01]),
            Err(FrameError::TooShort { len: 1, min: 4 })
        ));
    }

    #[test]
    fn captured_request_checksum() {
        let frame = build_read_request(0x01, READ_HOLDING_REGISTERS, 0xD000, 0x0026);
        assert_eq!(frame.as_ref(), &[0x01, 0x03, 0xD0, 0x00, 0x00, 0x26, 0xFC, 0xD0]);
    }

    #[test]
    fn write_single_layout() {
        let frame = build_write_single_register(0x01, 0x0021, 0x0105);
        assert_eq!(&frame[..6], &[0x01, 0x06, 0x00, 0x21, 0x01, 0x05]);
        assert_eq!(frame.len(), 8);
        assert!(is_valid(&frame));
    }

    #[test]
    fn write_multiple_layout() {
        let frame = build_write_multiple_registers(0x01, 0x0010, &[0x0102, 0x0304]).unwrap();
        assert_eq!(
            &frame[..11],
            &[0x01, 0x10, 0x00, 0x10, 0x00, 0x02, 0x04, 0x01, 0x02, 0x03, 0x04]
        );
        assert!(is_valid(&frame));
    }

    #[test]
    fn write_multiple_rejects_bad_counts() {
        assert!(matches!(
            build_write_multiple_registers(0x01, 0, &[]),
            Err(FrameError::RegisterCount { count: 0, .. })
        ));
        let too_many = vec![0u16; MAX_WRITE_REGISTERS + 1];
        assert!(build_write_multiple_registers(0x01, 0, &too_many).is_err());
    }

    #[test]
    fn parse_registers_reads_big_endian_words() {
        let data = [0x01, 0x03, 0x04, 0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(parse_registers(&data, 3, 4).unwrap(), vec![0x1234, 0xABCD]);
        assert_eq!(parse_registers(&data, 3, 0).unwrap(), Vec::<u16>::new());
    }

    #[test]
    fn parse_registers_ignores_odd_trailing_byte_count() {
        let data = [0x00, 0x01, 0x00, 0x02, 0x00];
        assert_eq!(parse_registers(&data, 0, 3).unwrap(), vec![0x0001]);
    }

    #[test]
    fn parse_registers_reports_truncation() {
        let data = [0x00, 0x01];
        assert_eq!(
            parse_registers(&data, 0, 4),
            Err(FrameError::Truncated {
                needed: 4,
                available: 2
            })
        );
    }
}
