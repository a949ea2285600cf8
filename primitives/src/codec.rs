//! Binary encoding shared by the capping token and the selector snapshot.
//!
//! Integers are big-endian, strings and sequences carry a `u32` length prefix
//! and maps are written in key order.
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::{
    collections::{BTreeMap, BTreeSet},
    io::{self, Read, Write},
};
use thiserror::Error;

/// Upper bound for pre-allocating sequences read from untrusted input.
const PREALLOCATE_LIMIT: usize = 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Reading or writing binary data: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid UTF-8 string: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Unsupported {kind} format version {version}")]
    UnsupportedVersion { kind: &'static str, version: u32 },
    #[error("Unknown creative injection type {0}")]
    UnknownInjection(u32),
}

pub trait Encode {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), Error>;
}

pub trait Decode: Sized {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, Error>;
}

/// Encodes `value` into a freshly allocated buffer.
pub fn to_bytes<T: Encode + ?Sized>(value: &T) -> Result<Vec<u8>, Error> {
    let mut buffer = Vec::new();
    value.encode(&mut buffer)?;

    Ok(buffer)
}

pub fn from_bytes<T: Decode>(mut bytes: &[u8]) -> Result<T, Error> {
    T::decode(&mut bytes)
}

/// Reads the leading version tag and fails unless it equals `expected`.
pub fn expect_version<R: Read>(
    reader: &mut R,
    kind: &'static str,
    expected: u32,
) -> Result<(), Error> {
    let version = reader.read_u32::<BigEndian>()?;

    if version == expected {
        Ok(())
    } else {
        Err(Error::UnsupportedVersion { kind, version })
    }
}

pub fn write_len<W: Write>(writer: &mut W, len: usize) -> Result<(), Error> {
    let len = u32::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "sequence too long"))?;
    writer.write_u32::<BigEndian>(len)?;

    Ok(())
}

pub fn read_len<R: Read>(reader: &mut R) -> Result<usize, Error> {
    Ok(reader.read_u32::<BigEndian>()? as usize)
}

impl Encode for u8 {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        Ok(writer.write_u8(*self)?)
    }
}

impl Decode for u8 {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, Error> {
        Ok(reader.read_u8()?)
    }
}

impl Encode for bool {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        Ok(writer.write_u8(u8::from(*self))?)
    }
}

impl Decode for bool {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, Error> {
        Ok(reader.read_u8()? != 0)
    }
}

macro_rules! impl_codec_number {
    ($($ty:ty => $write:ident, $read:ident;)*) => {
        $(
            impl Encode for $ty {
                fn encode<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
                    Ok(writer.$write::<BigEndian>(*self)?)
                }
            }

            impl Decode for $ty {
                fn decode<R: Read>(reader: &mut R) -> Result<Self, Error> {
                    Ok(reader.$read::<BigEndian>()?)
                }
            }
        )*
    };
}

impl_codec_number! {
    u32 => write_u32, read_u32;
    u64 => write_u64, read_u64;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
}

impl Encode for str {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        write_len(writer, self.len())?;
        writer.write_all(self.as_bytes())?;

        Ok(())
    }
}

impl Encode for String {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        self.as_str().encode(writer)
    }
}

impl Decode for String {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let len = read_len(reader)?;
        let mut bytes = Vec::with_capacity(len.min(PREALLOCATE_LIMIT));
        Read::take(&mut *reader, len as u64).read_to_end(&mut bytes)?;

        if bytes.len() != len {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        Ok(String::from_utf8(bytes)?)
    }
}

impl<T: Encode> Encode for [T] {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        write_len(writer, self.len())?;
        self.iter().try_for_each(|item| item.encode(writer))
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        self.as_slice().encode(writer)
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let len = read_len(reader)?;
        let mut items = Vec::with_capacity(len.min(PREALLOCATE_LIMIT));
        for _ in 0..len {
            items.push(T::decode(reader)?);
        }

        Ok(items)
    }
}

impl<T: Encode> Encode for BTreeSet<T> {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        write_len(writer, self.len())?;
        self.iter().try_for_each(|item| item.encode(writer))
    }
}

impl<T: Decode + Ord> Decode for BTreeSet<T> {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, Error> {
        Ok(Vec::<T>::decode(reader)?.into_iter().collect())
    }
}

impl<K: Encode, V: Encode> Encode for BTreeMap<K, V> {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        write_len(writer, self.len())?;
        self.iter().try_for_each(|(key, value)| {
            key.encode(writer)?;
            value.encode(writer)
        })
    }
}

impl<K: Decode + Ord, V: Decode> Decode for BTreeMap<K, V> {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, Error> {
        let len = read_len(reader)?;
        let mut map = BTreeMap::new();
        for _ in 0..len {
            let key = K::decode(reader)?;
            let value = V::decode(reader)?;
            map.insert(key, value);
        }

        Ok(map)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn integers_are_big_endian() {
        let bytes = to_bytes(&0x0102_0304_u32).expect("Should encode");
        assert_eq!(vec![1, 2, 3, 4], bytes);
    }

    #[test]
    fn strings_are_length_prefixed() {
        let bytes = to_bytes("ab").expect("Should encode");
        assert_eq!(vec![0, 0, 0, 2, b'a', b'b'], bytes);

        let decoded: String = from_bytes(&bytes).expect("Should decode");
        assert_eq!("ab", decoded);
    }

    #[test]
    fn truncated_string_is_an_error() {
        let result = from_bytes::<String>(&[0, 0, 0, 5, b'a']);
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn version_mismatch_is_reported() {
        let bytes = to_bytes(&7_u32).expect("Should encode");
        let error = expect_version(&mut bytes.as_slice(), "caps", 1).expect_err("Should fail");

        assert!(matches!(
            error,
            Error::UnsupportedVersion {
                kind: "caps",
                version: 7
            }
        ));
    }
}
