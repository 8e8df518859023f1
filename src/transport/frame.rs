use crate::error::{Error, Result};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use nom::{
    multi::count,
    number::complete::{be_u16, be_u8},
    IResult,
};
use nom_derive::{Nom, Parse};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tokio_util::codec::{Decoder, Encoder};

pub const HEADER_LEN: usize = 7;
pub const MAX_READ_COUNT: u16 = 125;
pub const MAX_WRITE_COUNT: u16 = 123;

const EXCEPTION_BIT: u8 = 0x80;
// unit id + largest Modbus PDU
const MAX_LENGTH: u16 = 254;

// {{{ FunctionCode
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHolding = 0x03,
    WriteSingle = 0x06,
    WriteMultiple = 0x10,
}
// }}}

// {{{ MbapHeader
#[derive(Clone, Copy, Debug, Eq, PartialEq, Nom)]
#[nom(BigEndian)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Byte count of everything after this field, unit id included.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    fn write(&self, dst: &mut BytesMut) {
        dst.put_u16(self.transaction_id);
        dst.put_u16(self.protocol_id);
        dst.put_u16(self.length);
        dst.put_u8(self.unit_id);
    }
}
// }}}

/// One MBAP frame in either direction. The PDU is left undecoded so a
/// malformed body does not poison the stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub header: MbapHeader,
    pub pdu: Bytes,
}

impl Frame {
    pub fn new(transaction_id: u16, unit_id: u8, pdu: Bytes) -> Self {
        Self {
            header: MbapHeader {
                transaction_id,
                protocol_id: 0,
                length: pdu.len() as u16 + 1,
                unit_id,
            },
            pdu,
        }
    }

    pub fn transaction_id(&self) -> u16 {
        self.header.transaction_id
    }
}

// {{{ Request
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    ReadHolding { address: u16, count: u16 },
    WriteSingle { address: u16, value: u16 },
    WriteMultiple { address: u16, values: Vec<u16> },
}

impl Request {
    pub fn function(&self) -> FunctionCode {
        match self {
            Request::ReadHolding { .. } => FunctionCode::ReadHolding,
            Request::WriteSingle { .. } => FunctionCode::WriteSingle,
            Request::WriteMultiple { .. } => FunctionCode::WriteMultiple,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Request::ReadHolding { count, .. } if *count == 0 || *count > MAX_READ_COUNT => Err(
                Error::validation(format!("read of {} registers outside 1..={}", count, MAX_READ_COUNT)),
            ),
            Request::WriteMultiple { values, .. }
                if values.is_empty() || values.len() > usize::from(MAX_WRITE_COUNT) =>
            {
                Err(Error::validation(format!(
                    "write of {} registers outside 1..={}",
                    values.len(),
                    MAX_WRITE_COUNT
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn to_pdu(&self) -> Bytes {
        let mut pdu = BytesMut::with_capacity(6);
        pdu.put_u8(self.function().into());

        match self {
            Request::ReadHolding { address, count } => {
                pdu.put_u16(*address);
                pdu.put_u16(*count);
            }
            Request::WriteSingle { address, value } => {
                pdu.put_u16(*address);
                pdu.put_u16(*value);
            }
            Request::WriteMultiple { address, values } => {
                pdu.put_u16(*address);
                pdu.put_u16(values.len() as u16);
                pdu.put_u8((values.len() * 2) as u8);
                for value in values {
                    pdu.put_u16(*value);
                }
            }
        }

        pdu.freeze()
    }

    /// Server side of [`Request::to_pdu`].
    pub fn parse(pdu: &[u8]) -> Result<Self> {
        let (rest, function) = be_u8::<_, nom::error::Error<&[u8]>>(pdu)
            .map_err(|_| Error::protocol("empty request"))?;
        let function = FunctionCode::try_from(function)
            .map_err(|_| Error::protocol(format!("unsupported function {:#04x}", function)))?;

        let parsed = match function {
            FunctionCode::ReadHolding => AddressPair::parse(rest)
                .map(|(i, p)| (i, Request::ReadHolding { address: p.address, count: p.value })),
            FunctionCode::WriteSingle => AddressPair::parse(rest)
                .map(|(i, p)| (i, Request::WriteSingle { address: p.address, value: p.value })),
            FunctionCode::WriteMultiple => write_multiple_body(rest),
        };

        match parsed {
            Ok((rest, request)) if rest.is_empty() => Ok(request),
            Ok((rest, _)) => Err(Error::protocol(format!("{} trailing bytes in request", rest.len()))),
            Err(_) => Err(Error::protocol(format!("truncated {:?} request", function))),
        }
    }
}
// }}}

// {{{ Response
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    ReadHolding(Vec<u16>),
    WriteSingle { address: u16, value: u16 },
    WriteMultiple { address: u16, count: u16 },
}

#[derive(Debug, Nom)]
#[nom(BigEndian)]
struct AddressPair {
    address: u16,
    value: u16,
}

fn read_holding_body(i: &[u8]) -> IResult<&[u8], Vec<u16>> {
    let (i, byte_count) = be_u8(i)?;
    count(be_u16, usize::from(byte_count) / 2)(i)
}

fn write_multiple_body(i: &[u8]) -> IResult<&[u8], Request> {
    let (i, pair) = AddressPair::parse(i)?;
    let (i, _byte_count) = be_u8(i)?;
    let (i, values) = count(be_u16, usize::from(pair.value))(i)?;
    Ok((
        i,
        Request::WriteMultiple {
            address: pair.address,
            values,
        },
    ))
}

impl Response {
    pub fn function(&self) -> FunctionCode {
        match self {
            Response::ReadHolding(_) => FunctionCode::ReadHolding,
            Response::WriteSingle { .. } => FunctionCode::WriteSingle,
            Response::WriteMultiple { .. } => FunctionCode::WriteMultiple,
        }
    }

    /// Decodes the reply PDU to `request` and checks it actually answers it.
    ///
    /// Device exceptions come back as [`Error::Exception`]; anything that does
    /// not match the request is an [`Error::Protocol`].
    pub fn parse(request: &Request, pdu: &[u8]) -> Result<Self> {
        let expected = u8::from(request.function());

        let Some((&function, body)) = pdu.split_first() else {
            return Err(Error::protocol("empty response"));
        };

        if function == expected | EXCEPTION_BIT {
            return match body.first() {
                Some(&code) => Err(Error::Exception {
                    function: expected,
                    code,
                }),
                None => Err(Error::protocol("exception reply without a code")),
            };
        }
        if function != expected {
            return Err(Error::protocol(format!(
                "reply function {:#04x} does not answer {:#04x}",
                function, expected
            )));
        }

        match request {
            Request::ReadHolding { count, .. } => {
                let declared = body.first().copied().unwrap_or(0);
                if usize::from(declared) != usize::from(*count) * 2 || body.len() != usize::from(declared) + 1 {
                    return Err(Error::protocol(format!(
                        "byte count {} (payload {}) for {} registers",
                        declared,
                        body.len().saturating_sub(1),
                        count
                    )));
                }
                let (_, words) = read_holding_body(body)
                    .map_err(|_| Error::protocol("truncated read reply"))?;
                Ok(Response::ReadHolding(words))
            }
            Request::WriteSingle { address, value } => {
                let echo = parse_echo(body)?;
                if echo.address != *address || echo.value != *value {
                    return Err(Error::protocol(format!(
                        "write echo {}={} does not match {}={}",
                        echo.address, echo.value, address, value
                    )));
                }
                Ok(Response::WriteSingle {
                    address: echo.address,
                    value: echo.value,
                })
            }
            Request::WriteMultiple { address, values } => {
                let echo = parse_echo(body)?;
                if echo.address != *address || usize::from(echo.value) != values.len() {
                    return Err(Error::protocol(format!(
                        "write echo {}x{} does not match {}x{}",
                        echo.address,
                        echo.value,
                        address,
                        values.len()
                    )));
                }
                Ok(Response::WriteMultiple {
                    address: echo.address,
                    count: echo.value,
                })
            }
        }
    }

    pub fn to_pdu(&self) -> Bytes {
        let mut pdu = BytesMut::new();
        pdu.put_u8(self.function().into());

        match self {
            Response::ReadHolding(words) => {
                pdu.put_u8((words.len() * 2) as u8);
                for word in words {
                    pdu.put_u16(*word);
                }
            }
            Response::WriteSingle { address, value } => {
                pdu.put_u16(*address);
                pdu.put_u16(*value);
            }
            Response::WriteMultiple { address, count } => {
                pdu.put_u16(*address);
                pdu.put_u16(*count);
            }
        }

        pdu.freeze()
    }

    pub fn exception_pdu(function: FunctionCode, code: u8) -> Bytes {
        Bytes::from(vec![u8::from(function) | EXCEPTION_BIT, code])
    }
}

fn parse_echo(body: &[u8]) -> Result<AddressPair> {
    match AddressPair::parse(body) {
        Ok((rest, echo)) if rest.is_empty() => Ok(echo),
        _ => Err(Error::protocol(format!("write echo of {} bytes", body.len()))),
    }
}
// }}}

/// Splits a byte stream into MBAP frames.
///
/// A header that cannot belong to a Modbus TCP stream is a transport error:
/// once framing is lost there is no way to find the next frame boundary.
#[derive(Debug, Default)]
pub struct MbapCodec;

impl Decoder for MbapCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = match MbapHeader::parse(&src[..HEADER_LEN]) {
            Ok((_, header)) => header,
            Err(e) => return Err(Error::transport(format!("unreadable MBAP header: {}", e))),
        };

        if header.protocol_id != 0 {
            return Err(Error::transport(format!(
                "protocol id {} in MBAP header",
                header.protocol_id
            )));
        }
        if header.length < 2 || header.length > MAX_LENGTH {
            return Err(Error::transport(format!(
                "MBAP length {} out of range",
                header.length
            )));
        }

        let frame_len = HEADER_LEN - 1 + usize::from(header.length);
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_len);
        frame.advance(HEADER_LEN);

        Ok(Some(Frame {
            header,
            pdu: frame.freeze(),
        }))
    }
}

impl Encoder<Frame> for MbapCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(HEADER_LEN + frame.pdu.len());
        frame.header.write(dst);
        dst.extend_from_slice(&frame.pdu);
        Ok(())
    }
}
