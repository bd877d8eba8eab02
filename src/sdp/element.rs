//! SDP data elements: a type/size header byte followed by big-endian data.

use crate::bluetooth::BtError;
use enum_primitive::FromPrimitive;
use uuid::Uuid;

/// `00000000-0000-1000-8000-00805F9B34FB`, the base of all 16- and 32-bit UUIDs.
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;
/// Deepest sequence/alternative nesting accepted from a remote server.
pub const MAX_NESTING: usize = 32;

enum_from_primitive! {
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Nil = 0,
    Uint = 1,
    Int = 2,
    Uuid = 3,
    Text = 4,
    Bool = 5,
    Sequence = 6,
    Alternative = 7,
    Url = 8
}
}

/// Expands a 16- or 32-bit Bluetooth UUID over the base UUID.
pub fn uuid_from_short(short: u32) -> Uuid {
    Uuid::from_u128(BASE_UUID | (u128::from(short) << 96))
}

/// Returns the 32-bit alias of `uuid` if it is derived from the base UUID.
pub fn short_from_uuid(uuid: &Uuid) -> Option<u32> {
    let value = uuid.as_u128();
    if value & ((1u128 << 96) - 1) == BASE_UUID {
        Some((value >> 96) as u32)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataElement {
    Nil,
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    I128(i128),
    Uuid(Uuid),
    Text(String),
    Bool(bool),
    Sequence(Vec<DataElement>),
    Alternative(Vec<DataElement>),
    Url(String),
}

impl DataElement {
    /// Decodes one element from the front of `bytes`, returning it and the remaining input.
    pub fn parse(bytes: &[u8]) -> Result<(DataElement, &[u8]), BtError> {
        let mut reader = Reader {
            buf: bytes,
            depth: 0,
        };
        let element = reader.element()?;
        Ok((element, reader.buf))
    }

    /// Decodes `bytes`, which must hold exactly one element.
    pub fn parse_exact(bytes: &[u8]) -> Result<DataElement, BtError> {
        match DataElement::parse(bytes)? {
            (element, []) => Ok(element),
            (_, rest) => Err(BtError::Sdp(format!(
                "{} trailing bytes after data element",
                rest.len()
            ))),
        }
    }

    pub fn as_unsigned(&self) -> Option<u128> {
        match *self {
            DataElement::U8(v) => Some(v.into()),
            DataElement::U16(v) => Some(v.into()),
            DataElement::U32(v) => Some(v.into()),
            DataElement::U64(v) => Some(v.into()),
            DataElement::U128(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<&Uuid> {
        match self {
            DataElement::Uuid(uuid) => Some(uuid),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DataElement::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Members of a sequence or alternative.
    pub fn as_sequence(&self) -> Option<&[DataElement]> {
        match self {
            DataElement::Sequence(items) | DataElement::Alternative(items) => Some(items),
            _ => None,
        }
    }

    /// Appends the encoding of this element to `out`, using the shortest size descriptor.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            DataElement::Nil => out.push(header(ElementType::Nil, 0)),
            DataElement::U8(v) => fixed(out, ElementType::Uint, &v.to_be_bytes()),
            DataElement::U16(v) => fixed(out, ElementType::Uint, &v.to_be_bytes()),
            DataElement::U32(v) => fixed(out, ElementType::Uint, &v.to_be_bytes()),
            DataElement::U64(v) => fixed(out, ElementType::Uint, &v.to_be_bytes()),
            DataElement::U128(v) => fixed(out, ElementType::Uint, &v.to_be_bytes()),
            DataElement::I8(v) => fixed(out, ElementType::Int, &v.to_be_bytes()),
            DataElement::I16(v) => fixed(out, ElementType::Int, &v.to_be_bytes()),
            DataElement::I32(v) => fixed(out, ElementType::Int, &v.to_be_bytes()),
            DataElement::I64(v) => fixed(out, ElementType::Int, &v.to_be_bytes()),
            DataElement::I128(v) => fixed(out, ElementType::Int, &v.to_be_bytes()),
            DataElement::Uuid(uuid) => match short_from_uuid(uuid) {
                Some(short) if short <= 0xffff => {
                    fixed(out, ElementType::Uuid, &(short as u16).to_be_bytes())
                }
                Some(short) => fixed(out, ElementType::Uuid, &short.to_be_bytes()),
                None => fixed(out, ElementType::Uuid, uuid.as_bytes()),
            },
            DataElement::Text(text) => variable(out, ElementType::Text, text.as_bytes()),
            DataElement::Bool(v) => fixed(out, ElementType::Bool, &[*v as u8]),
            DataElement::Sequence(items) | DataElement::Alternative(items) => {
                let mut body = Vec::new();
                for item in items {
                    item.encode(&mut body);
                }
                let kind = match self {
                    DataElement::Sequence(_) => ElementType::Sequence,
                    _ => ElementType::Alternative,
                };
                variable(out, kind, &body);
            }
            DataElement::Url(url) => variable(out, ElementType::Url, url.as_bytes()),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

fn header(kind: ElementType, size_index: u8) -> u8 {
    (kind as u8) << 3 | size_index
}

fn fixed(out: &mut Vec<u8>, kind: ElementType, data: &[u8]) {
    let size_index = match data.len() {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => 4,
    };
    out.push(header(kind, size_index));
    out.extend_from_slice(data);
}

fn variable(out: &mut Vec<u8>, kind: ElementType, data: &[u8]) {
    let len = data.len();
    if len <= u8::MAX as usize {
        out.push(header(kind, 5));
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(header(kind, 6));
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(header(kind, 7));
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
    out.extend_from_slice(data);
}

struct Reader<'a> {
    buf: &'a [u8],
    depth: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], BtError> {
        if self.buf.len() < n {
            return Err(BtError::Sdp(format!(
                "data element truncated: need {} bytes, have {}",
                n,
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn uint(&mut self, n: usize) -> Result<u128, BtError> {
        Ok(self
            .take(n)?
            .iter()
            .fold(0u128, |acc, &b| acc << 8 | u128::from(b)))
    }

    fn element(&mut self) -> Result<DataElement, BtError> {
        let descriptor = self.take(1)?[0];
        let kind = ElementType::from_u8(descriptor >> 3)
            .ok_or_else(|| BtError::Sdp(format!("unknown data element type {}", descriptor >> 3)))?;
        let size_index = descriptor & 0x07;

        let len = match size_index {
            0 if kind == ElementType::Nil => 0,
            0..=4 => 1usize << size_index,
            5 => self.uint(1)? as usize,
            6 => self.uint(2)? as usize,
            _ => self.uint(4)? as usize,
        };
        let variable_sized = size_index >= 5;

        let bad_size = || {
            BtError::Sdp(format!(
                "invalid size index {} for {:?} element",
                size_index, kind
            ))
        };

        match kind {
            ElementType::Nil => {
                if size_index != 0 {
                    return Err(bad_size());
                }
                Ok(DataElement::Nil)
            }
            ElementType::Uint | ElementType::Int if variable_sized => Err(bad_size()),
            ElementType::Uint => {
                let v = self.uint(len)?;
                Ok(match len {
                    1 => DataElement::U8(v as u8),
                    2 => DataElement::U16(v as u16),
                    4 => DataElement::U32(v as u32),
                    8 => DataElement::U64(v as u64),
                    _ => DataElement::U128(v),
                })
            }
            ElementType::Int => {
                let v = self.uint(len)?;
                Ok(match len {
                    1 => DataElement::I8(v as u8 as i8),
                    2 => DataElement::I16(v as u16 as i16),
                    4 => DataElement::I32(v as u32 as i32),
                    8 => DataElement::I64(v as u64 as i64),
                    _ => DataElement::I128(v as i128),
                })
            }
            ElementType::Uuid => match len {
                2 | 4 if !variable_sized => {
                    Ok(DataElement::Uuid(uuid_from_short(self.uint(len)? as u32)))
                }
                16 if !variable_sized => Ok(DataElement::Uuid(Uuid::from_u128(self.uint(16)?))),
                _ => Err(bad_size()),
            },
            ElementType::Bool => {
                if size_index != 0 {
                    return Err(bad_size());
                }
                Ok(DataElement::Bool(self.take(1)?[0] != 0))
            }
            ElementType::Text | ElementType::Url => {
                if !variable_sized {
                    return Err(bad_size());
                }
                let raw = self.take(len)?;
                let trimmed = match raw.iter().rposition(|&b| b != 0) {
                    Some(last) => &raw[..=last],
                    None => &[][..],
                };
                let text = String::from_utf8_lossy(trimmed).into_owned();
                Ok(if kind == ElementType::Text {
                    DataElement::Text(text)
                } else {
                    DataElement::Url(text)
                })
            }
            ElementType::Sequence | ElementType::Alternative => {
                if !variable_sized {
                    return Err(bad_size());
                }
                if self.depth >= MAX_NESTING {
                    return Err(BtError::Sdp("data element nesting too deep".to_owned()));
                }
                let mut inner = Reader {
                    buf: self.take(len)?,
                    depth: self.depth + 1,
                };
                let mut items = Vec::new();
                while !inner.buf.is_empty() {
                    items.push(inner.element()?);
                }
                Ok(if kind == ElementType::Sequence {
                    DataElement::Sequence(items)
                } else {
                    DataElement::Alternative(items)
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_uuids_expand_over_base() {
        let (element, rest) = DataElement::parse(&[0x19, 0x00, 0x03, 0xff]).unwrap();
        assert_eq!(
            element,
            DataElement::Uuid("00000003-0000-1000-8000-00805f9b34fb".parse().unwrap())
        );
        assert_eq!(rest, &[0xff]);
        assert_eq!(short_from_uuid(element.as_uuid().unwrap()), Some(0x0003));

        let custom: Uuid = "ce025ea4-00d6-44f3-ae1c-a5cba97381fd".parse().unwrap();
        assert_eq!(short_from_uuid(&custom), None);
    }

    #[test]
    fn decodes_integers_of_each_width() {
        assert_eq!(DataElement::parse_exact(&[0x08, 0x0b]).unwrap(), DataElement::U8(11));
        assert_eq!(
            DataElement::parse_exact(&[0x0a, 0x00, 0x01, 0x00, 0x02]).unwrap(),
            DataElement::U32(0x0001_0002)
        );
        assert_eq!(DataElement::parse_exact(&[0x11, 0xff, 0xfe]).unwrap(), DataElement::I16(-2));
        assert_eq!(DataElement::parse_exact(&[0x28, 0x01]).unwrap(), DataElement::Bool(true));
        assert_eq!(DataElement::parse_exact(&[0x00]).unwrap(), DataElement::Nil);
    }

    #[test]
    fn text_drops_trailing_nul() {
        let mut bytes = vec![0x25, 19];
        bytes.extend_from_slice(b"DMG Turret Control\0");
        assert_eq!(
            DataElement::parse_exact(&bytes).unwrap().as_text(),
            Some("DMG Turret Control")
        );
    }

    #[test]
    fn nested_sequences_decode_in_order() {
        // (( L2CAP ), ( RFCOMM, 11 ))
        let bytes = [
            0x35, 0x0c, 0x35, 0x03, 0x19, 0x01, 0x00, 0x35, 0x05, 0x19, 0x00, 0x03, 0x08, 0x0b,
        ];
        let element = DataElement::parse_exact(&bytes).unwrap();
        let outer = element.as_sequence().unwrap();
        assert_eq!(outer.len(), 2);
        let rfcomm = outer[1].as_sequence().unwrap();
        assert_eq!(rfcomm[0].as_uuid(), Some(&uuid_from_short(0x0003)));
        assert_eq!(rfcomm[1].as_unsigned(), Some(11));
        assert_eq!(element.to_bytes(), bytes);
    }

    #[test]
    fn long_text_uses_sixteen_bit_length() {
        let text = "x".repeat(300);
        let bytes = DataElement::Text(text.clone()).to_bytes();
        assert_eq!(&bytes[..3], &[0x26, 0x01, 0x2c]);
        assert_eq!(DataElement::parse_exact(&bytes).unwrap().as_text(), Some(text.as_str()));
    }

    #[test]
    fn truncated_input_is_an_error() {
        let cases: &[&[u8]] = &[
            &[],
            &[0x09, 0x01],
            &[0x35, 0x05, 0x19, 0x00],
            &[0x1c, 0x00, 0x01],
            &[0x25, 0x04, b'a'],
        ];
        for bytes in cases {
            assert!(
                matches!(DataElement::parse(bytes), Err(BtError::Sdp(_))),
                "{:02x?} should not decode",
                bytes
            );
        }
    }

    #[test]
    fn deep_nesting_is_an_error() {
        fn nested(levels: usize) -> Vec<u8> {
            // 16-bit lengths keep each level's header at three bytes
            let mut bytes = Vec::new();
            for level in 0..levels {
                let inner = 3 * (levels - level - 1);
                bytes.push(0x36);
                bytes.extend_from_slice(&(inner as u16).to_be_bytes());
            }
            bytes
        }

        let accepted = DataElement::parse_exact(&nested(MAX_NESTING)).unwrap();
        assert!(accepted.as_sequence().is_some());

        match DataElement::parse_exact(&nested(MAX_NESTING + 1)) {
            Err(BtError::Sdp(message)) => assert!(message.contains("nesting too deep")),
            other => panic!("unexpected {:?}", other),
        }
        // Large enough to exhaust the stack without the limit.
        assert!(DataElement::parse(&nested(21_000)).is_err());
    }

    #[test]
    fn rejects_bad_headers() {
        // type 9 is reserved
        assert!(DataElement::parse(&[0x48]).is_err());
        // 3-byte uuid does not exist, text needs a length field
        assert!(DataElement::parse(&[0x1d, 0x03, 0, 0, 0]).is_err());
        assert!(DataElement::parse(&[0x20, b'a']).is_err());
        assert!(matches!(
            DataElement::parse_exact(&[0x08, 0x01, 0x08]),
            Err(BtError::Sdp(_))
        ));
    }
}
