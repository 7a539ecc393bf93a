//! Server-side Modbus TCP framing.
//!
//! Only the two functions the rig traffic consists of are understood: read
//! holding registers (3) and write single register (6). Anything else is
//! surfaced as [`Operation::Unsupported`] so the serving loop can answer with
//! an illegal-function exception instead of dropping the frame.

use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

pub const EXC_ILLEGAL_FUNCTION: u8 = 1;
pub const EXC_ILLEGAL_DATA_ADDRESS: u8 = 2;
pub const EXC_ILLEGAL_DATA_VALUE: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub device_id: u8,
    pub transaction_id: u16,
    pub operation: Operation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetHoldings { address: u16, count: u16 },
    SetHolding { address: u16, value: u16 },
    Unsupported { function: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub device_id: u8,
    pub transaction_id: u16,
    pub kind: ResponseKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    Holdings { values: Vec<u16> },
    SetHolding { address: u16, value: u16 },
    Exception { function: u8, code: u8 },
}

pub struct ModbusTcpCodec {}

impl Decoder for ModbusTcpCodec {
    type Item = Request;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message = "attempt at decoding", buffer = ?src);
            if src.len() < 8 {
                return Ok(None);
            }
            let Some((tr_id_buffer, remainder)) = src.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let transaction_id = u16::from_be_bytes(*tr_id_buffer);
            let Some((proto_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            if u16::from_be_bytes(*proto_buffer) != 0 {
                // Not a MBAP header. Resynchronize one byte at a time.
                src.advance(1);
                continue;
            }
            let Some((length_buffer, remainder)) = remainder.split_first_chunk::<2>() else {
                return Ok(None);
            };
            let required_length = u16::from_be_bytes(*length_buffer);
            let Some((data, _)) = remainder.split_at_checked(required_length.into()) else {
                return Ok(None);
            };
            let [device_id, function, payload @ ..] = data else {
                src.advance(1);
                continue;
            };
            let (device_id, function) = (*device_id, *function);
            let operation = match (function, payload) {
                (3, [a_hi, a_lo, c_hi, c_lo]) => Operation::GetHoldings {
                    address: u16::from_be_bytes([*a_hi, *a_lo]),
                    count: u16::from_be_bytes([*c_hi, *c_lo]),
                },
                (6, [a_hi, a_lo, v_hi, v_lo]) => Operation::SetHolding {
                    address: u16::from_be_bytes([*a_hi, *a_lo]),
                    value: u16::from_be_bytes([*v_hi, *v_lo]),
                },
                _ => Operation::Unsupported { function },
            };
            src.advance(usize::from(required_length) + 6);
            return Ok(Some(Request {
                device_id,
                transaction_id,
                operation,
            }));
        }
    }
}

impl Encoder<&Response> for ModbusTcpCodec {
    type Error = std::io::Error;

    fn encode(&mut self, resp: &Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend(resp.transaction_id.to_be_bytes());
        dst.extend([0, 0]);
        match &resp.kind {
            ResponseKind::Holdings { values } => {
                let byte_count = values.len() * 2;
                let length = u16::try_from(3 + byte_count)
                    .map_err(|_| std::io::Error::other("holdings response too large"))?;
                dst.extend(length.to_be_bytes());
                dst.extend([resp.device_id, 3, byte_count as u8]);
                for value in values {
                    dst.extend(value.to_be_bytes());
                }
            }
            ResponseKind::SetHolding { address, value } => {
                dst.extend(6u16.to_be_bytes());
                dst.extend([resp.device_id, 6]);
                dst.extend(address.to_be_bytes());
                dst.extend(value.to_be_bytes());
            }
            ResponseKind::Exception { function, code } => {
                dst.extend(3u16.to_be_bytes());
                dst.extend([resp.device_id, function | 0x80, *code]);
            }
        }
        trace!(message = "sending encoded", buffer = ?dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8]) -> Option<Request> {
        let mut buffer = BytesMut::from(bytes);
        ModbusTcpCodec {}.decode(&mut buffer).unwrap()
    }

    #[test]
    fn decodes_read_holdings() {
        let req = decode_one(&[0x00, 0x2A, 0, 0, 0, 6, 0x11, 3, 0x01, 0xF5, 0x00, 0x04]);
        assert_eq!(
            req,
            Some(Request {
                device_id: 0x11,
                transaction_id: 0x2A,
                operation: Operation::GetHoldings { address: 501, count: 4 },
            })
        );
    }

    #[test]
    fn decodes_write_single() {
        let req = decode_one(&[0x00, 0x01, 0, 0, 0, 6, 0x11, 6, 0x00, 0x65, 0x12, 0x34]);
        assert_eq!(
            req,
            Some(Request {
                device_id: 0x11,
                transaction_id: 1,
                operation: Operation::SetHolding { address: 101, value: 0x1234 },
            })
        );
    }

    #[test]
    fn unknown_function_is_reported_not_dropped() {
        let req = decode_one(&[0x00, 0x02, 0, 0, 0, 6, 0x11, 16, 0x00, 0x65, 0x00, 0x01]);
        assert_eq!(
            req.map(|r| r.operation),
            Some(Operation::Unsupported { function: 16 })
        );
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let full = [0x00, 0x2A, 0, 0, 0, 6, 0x11, 3, 0x01, 0xF5, 0x00, 0x04];
        let mut buffer = BytesMut::new();
        let mut codec = ModbusTcpCodec {};
        for &byte in &full[..full.len() - 1] {
            buffer.extend([byte]);
            assert_eq!(codec.decode(&mut buffer).unwrap(), None);
        }
        buffer.extend([full[full.len() - 1]]);
        assert!(codec.decode(&mut buffer).unwrap().is_some());
        assert!(buffer.is_empty());
    }

    #[test]
    fn encodes_holdings_response() {
        let mut buffer = BytesMut::new();
        let response = Response {
            device_id: 0x11,
            transaction_id: 0x2A,
            kind: ResponseKind::Holdings { values: vec![0xAAAA, 0x0008] },
        };
        ModbusTcpCodec {}.encode(&response, &mut buffer).unwrap();
        assert_eq!(
            &buffer[..],
            &[0x00, 0x2A, 0, 0, 0, 7, 0x11, 3, 4, 0xAA, 0xAA, 0x00, 0x08]
        );
    }

    #[test]
    fn encodes_exception_response() {
        let mut buffer = BytesMut::new();
        let response = Response {
            device_id: 0x11,
            transaction_id: 3,
            kind: ResponseKind::Exception { function: 3, code: EXC_ILLEGAL_DATA_ADDRESS },
        };
        ModbusTcpCodec {}.encode(&response, &mut buffer).unwrap();
        assert_eq!(&buffer[..], &[0x00, 0x03, 0, 0, 0, 3, 0x11, 0x83, 2]);
    }

    #[test]
    fn write_echo_round_trips_through_both_directions() {
        let mut buffer = BytesMut::new();
        let response = Response {
            device_id: 1,
            transaction_id: 7,
            kind: ResponseKind::SetHolding { address: 202, value: 0x000F },
        };
        ModbusTcpCodec {}.encode(&response, &mut buffer).unwrap();
        assert_eq!(buffer.len(), 12);
        assert_eq!(&buffer[..8], &[0x00, 0x07, 0, 0, 0, 6, 1, 6]);
    }
}
