//! Binary wire format primitives.

use crate::{Error, Result};

/// Largest valid field number.
pub const MAX_FIELDNUMBER: u32 = (1 << 29) - 1;

/// Longest encoding of a 64-bit varint.
pub const MAX_VARINT_LEN: usize = 10;

/// How a field value is laid out on the wire.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum WireType
{
    Varint          = 0,
    Fixed64         = 1,
    LengthDelimited = 2,
    StartGroup      = 3,
    EndGroup        = 4,
    Fixed32         = 5,
}

impl WireType
{
    /// Wire type from its number, if valid.
    pub fn from_u8(n: u8) -> Option<Self>
    {
        match n {
            0 => Some(WireType::Varint),
            1 => Some(WireType::Fixed64),
            2 => Some(WireType::LengthDelimited),
            3 => Some(WireType::StartGroup),
            4 => Some(WireType::EndGroup),
            5 => Some(WireType::Fixed32),
            _ => None,
        }
    }
}

/// Field type as declared in a schema, including its encoding.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum DescriptorType
{
    Double   = 1,
    Float    = 2,
    Int64    = 3,
    UInt64   = 4,
    Int32    = 5,
    Fixed64  = 6,
    Fixed32  = 7,
    Bool     = 8,
    String   = 9,
    Group    = 10,
    Message  = 11,
    Bytes    = 12,
    UInt32   = 13,
    Enum     = 14,
    SFixed32 = 15,
    SFixed64 = 16,
    SInt32   = 17,
    SInt64   = 18,
}

impl DescriptorType
{
    /// All descriptor types, in numeric order.
    pub const ALL: [DescriptorType; 18] = {
        use DescriptorType::*;
        [Double, Float, Int64, UInt64, Int32, Fixed64, Fixed32, Bool, String,
         Group, Message, Bytes, UInt32, Enum, SFixed32, SFixed64, SInt32, SInt64]
    };

    /// Descriptor type from its number, if valid.
    pub fn from_u8(n: u8) -> Option<Self>
    {
        Self::ALL.get(usize::from(n).checked_sub(1)?).copied()
    }

    /// Wire type of a single, unpacked value.
    pub fn wire_type(self) -> WireType
    {
        use DescriptorType::*;
        match self {
            Double | Fixed64 | SFixed64 => WireType::Fixed64,
            Float | Fixed32 | SFixed32  => WireType::Fixed32,
            Int64 | UInt64 | Int32 | Bool | UInt32 | Enum | SInt32 | SInt64
                => WireType::Varint,
            String | Bytes | Message => WireType::LengthDelimited,
            Group => WireType::StartGroup,
        }
    }

    /// Whether repeated values of this type may be packed.
    pub fn is_packable(self) -> bool
    {
        matches!(
            self.wire_type(),
            WireType::Varint | WireType::Fixed64 | WireType::Fixed32,
        )
    }
}

/// Tag of a field.
pub fn make_tag(number: u32, wire_type: WireType) -> u32
{
    number << 3 | wire_type as u32
}

/// Split a tag into field number and wire type.
///
/// Fails with [`Error::InvalidTag`] on field number 0,
/// reserved wire types, and tags that do not fit 32 bits.
pub fn split_tag(tag: u64) -> Result<(u32, WireType)>
{
    let wire_type = WireType::from_u8((tag & 7) as u8)
        .ok_or(Error::InvalidTag)?;
    let number = u32::try_from(tag >> 3)
        .map_err(|_| Error::InvalidTag)?;
    if number == 0 || number > MAX_FIELDNUMBER {
        return Err(Error::InvalidTag);
    }
    Ok((number, wire_type))
}

/// Append the varint encoding of `value`.
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>)
{
    while value >= 0x80 {
        out.push(value as u8 | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Number of bytes in the varint encoding of `value`.
pub fn varint_len(value: u64) -> usize
{
    let bits = 64 - (value | 1).leading_zeros() as usize;
    (bits + 6) / 7
}

/// Decode a varint from the start of `buf`.
///
/// Returns the value and the number of bytes read,
/// or [`None`] if `buf` ends before the varint does.
/// Fails with [`Error::MalformedVarint`] if the varint is longer
/// than [`MAX_VARINT_LEN`] bytes or overflows 64 bits.
pub fn decode_varint(buf: &[u8]) -> Result<Option<(u64, usize)>>
{
    let mut value = 0u64;
    for (i, &byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(Error::MalformedVarint);
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    match buf.len() >= MAX_VARINT_LEN {
        true => Err(Error::MalformedVarint),
        false => Ok(None),
    }
}

/// Zig-zag encode a signed 32-bit integer.
pub fn zigzag_encode32(n: i32) -> u32
{
    ((n << 1) ^ (n >> 31)) as u32
}

/// Zig-zag encode a signed 64-bit integer.
pub fn zigzag_encode64(n: i64) -> u64
{
    ((n << 1) ^ (n >> 63)) as u64
}

/// Inverse of [`zigzag_encode32`].
pub fn zigzag_decode32(n: u32) -> i32
{
    (n >> 1) as i32 ^ -((n & 1) as i32)
}

/// Inverse of [`zigzag_encode64`].
pub fn zigzag_decode64(n: u64) -> i64
{
    (n >> 1) as i64 ^ -((n & 1) as i64)
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest};

    #[test]
    fn overlong_varint()
    {
        assert_eq!(decode_varint(&[0xFF; 11]), Err(Error::MalformedVarint));
        assert_eq!(decode_varint(&[0xFF; 9]), Ok(None));
        let mut max = vec![0xFF; 9];
        max.push(0x01);
        assert_eq!(decode_varint(&max), Ok(Some((u64::MAX, 10))));
        max[9] = 0x02;
        assert_eq!(decode_varint(&max), Err(Error::MalformedVarint));
    }

    #[test]
    fn tags()
    {
        assert_eq!(split_tag(0x12), Ok((2, WireType::LengthDelimited)));
        assert_eq!(split_tag(0x06), Err(Error::InvalidTag));
        assert_eq!(split_tag(0x0F), Err(Error::InvalidTag));
        assert_eq!(split_tag(0x07), Err(Error::InvalidTag));
    }

    proptest!
    {
        #[test]
        fn varint_decodes_encoding(value: u64, tail: Vec<u8>)
        {
            let mut buf = Vec::new();
            encode_varint(value, &mut buf);
            assert_eq!(buf.len(), varint_len(value));
            let n = buf.len();
            buf.extend(tail);
            assert_eq!(decode_varint(&buf), Ok(Some((value, n))));
            assert_eq!(decode_varint(&buf[.. n - 1]), Ok(None));
        }

        #[test]
        fn zigzag_inverse(a: i32, b: i64)
        {
            assert_eq!(zigzag_decode32(zigzag_encode32(a)), a);
            assert_eq!(zigzag_decode64(zigzag_encode64(b)), b);
            assert_eq!(zigzag_encode32(-1), 1);
        }
    }
}
