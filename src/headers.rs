//! Fixed binary header layouts carried next to a packed CFGDATA blob.
//!
//! Three records are defined, all little-endian:
//! - public key: `tag[4] | key_size:u16 | key_type:u8 | reserved[1] | key_bytes[key_size]`
//! - signature: `tag[4] | sig_size:u16 | sig_scheme:u8 | hash_alg:u8 | signature_bytes[sig_size]`
//! - compression: `tag[4] | compressed_len:u32 | uncompressed_len:u32 | reserved:u32`
//!
//! Size fields are computed from the payload when a header is constructed and cannot be changed
//! afterwards.

use std::io::{Cursor, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::err::HeaderError;

pub const PUBKEY_TAG: [u8; 4] = *b"PUBK";
pub const SIGNATURE_TAG: [u8; 4] = *b"SIGN";
pub const LZ4_TAG: [u8; 4] = *b"LZ4 ";
pub const LZMA_TAG: [u8; 4] = *b"LZMA";
pub const STORED_TAG: [u8; 4] = *b"LZDM";

fn ensure_len(buf: &[u8], need: usize, what: &'static str) -> Result<(), HeaderError> {
    if buf.len() < need {
        return Err(HeaderError::Truncated {
            what,
            offset: 0,
            need,
            have: buf.len(),
        });
    }
    Ok(())
}

fn payload_size_u16(what: &'static str, payload: &[u8]) -> Result<u16, HeaderError> {
    u16::try_from(payload.len()).map_err(|_| HeaderError::PayloadTooLarge {
        what,
        len: payload.len(),
        bits: 16,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyType {
    Rsa = 1,
}

impl TryFrom<u8> for KeyType {
    type Error = HeaderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(KeyType::Rsa),
            other => Err(HeaderError::UnknownCode {
                what: "key type",
                value: other,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignatureScheme {
    RsaPkcs1 = 1,
    RsaPss = 2,
}

impl TryFrom<u8> for SignatureScheme {
    type Error = HeaderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SignatureScheme::RsaPkcs1),
            2 => Ok(SignatureScheme::RsaPss),
            other => Err(HeaderError::UnknownCode {
                what: "signature scheme",
                value: other,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HashAlgorithm {
    Sha256 = 1,
    Sha384 = 2,
    Sha512 = 3,
    Sm3 = 4,
}

impl HashAlgorithm {
    /// Digest size in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 | HashAlgorithm::Sm3 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

impl TryFrom<u8> for HashAlgorithm {
    type Error = HeaderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(HashAlgorithm::Sha256),
            2 => Ok(HashAlgorithm::Sha384),
            3 => Ok(HashAlgorithm::Sha512),
            4 => Ok(HashAlgorithm::Sm3),
            other => Err(HeaderError::UnknownCode {
                what: "hash algorithm",
                value: other,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyHeader {
    key_size: u16,
    key_type: KeyType,
    key: Vec<u8>,
}

impl PublicKeyHeader {
    /// Bytes preceding the key material.
    pub const FIXED_SIZE: usize = 8;

    pub fn new(key_type: KeyType, key: Vec<u8>) -> Result<Self, HeaderError> {
        let key_size = payload_size_u16("public key", &key)?;
        Ok(PublicKeyHeader {
            key_size,
            key_type,
            key,
        })
    }

    pub fn key_size(&self) -> u16 {
        self.key_size
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Serialized size, header plus key bytes.
    pub fn len(&self) -> usize {
        Self::FIXED_SIZE + self.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), HeaderError> {
        try_write!(writer, 0, bytes, &PUBKEY_TAG);
        try_write!(writer, 4, u16, self.key_size);
        try_write!(writer, 6, u8, self.key_type as u8);
        try_write!(writer, 7, u8, 0);
        try_write!(writer, 8, bytes, &self.key);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HeaderError> {
        let mut out = Vec::with_capacity(self.len());
        self.write_to(&mut out)?;
        Ok(out)
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, HeaderError> {
        ensure_len(buf, Self::FIXED_SIZE, "public key header")?;
        let mut cursor = Cursor::new(buf);

        let tag = try_read!(cursor, [u8; 4]);
        if tag != PUBKEY_TAG {
            return Err(HeaderError::InvalidTag {
                what: "public key",
                expected: &[PUBKEY_TAG],
                found: tag,
            });
        }

        let key_size = try_read!(cursor, u16);
        let key_type = KeyType::try_from(try_read!(cursor, u8))?;
        // reserved
        let _ = try_read!(cursor, u8);

        ensure_len(buf, Self::FIXED_SIZE + key_size as usize, "public key")?;
        let key = buf[Self::FIXED_SIZE..Self::FIXED_SIZE + key_size as usize].to_vec();

        Ok(PublicKeyHeader {
            key_size,
            key_type,
            key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    sig_size: u16,
    scheme: SignatureScheme,
    hash_alg: HashAlgorithm,
    signature: Vec<u8>,
}

impl SignatureHeader {
    /// Bytes preceding the signature.
    pub const FIXED_SIZE: usize = 8;

    pub fn new(
        scheme: SignatureScheme,
        hash_alg: HashAlgorithm,
        signature: Vec<u8>,
    ) -> Result<Self, HeaderError> {
        let sig_size = payload_size_u16("signature", &signature)?;
        Ok(SignatureHeader {
            sig_size,
            scheme,
            hash_alg,
            signature,
        })
    }

    pub fn sig_size(&self) -> u16 {
        self.sig_size
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn hash_alg(&self) -> HashAlgorithm {
        self.hash_alg
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn len(&self) -> usize {
        Self::FIXED_SIZE + self.signature.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signature.is_empty()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), HeaderError> {
        try_write!(writer, 0, bytes, &SIGNATURE_TAG);
        try_write!(writer, 4, u16, self.sig_size);
        try_write!(writer, 6, u8, self.scheme as u8);
        try_write!(writer, 7, u8, self.hash_alg as u8);
        try_write!(writer, 8, bytes, &self.signature);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HeaderError> {
        let mut out = Vec::with_capacity(self.len());
        self.write_to(&mut out)?;
        Ok(out)
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, HeaderError> {
        ensure_len(buf, Self::FIXED_SIZE, "signature header")?;
        let mut cursor = Cursor::new(buf);

        let tag = try_read!(cursor, [u8; 4]);
        if tag != SIGNATURE_TAG {
            return Err(HeaderError::InvalidTag {
                what: "signature",
                expected: &[SIGNATURE_TAG],
                found: tag,
            });
        }

        let sig_size = try_read!(cursor, u16);
        let scheme = SignatureScheme::try_from(try_read!(cursor, u8))?;
        let hash_alg = HashAlgorithm::try_from(try_read!(cursor, u8))?;

        ensure_len(buf, Self::FIXED_SIZE + sig_size as usize, "signature")?;
        let signature = buf[Self::FIXED_SIZE..Self::FIXED_SIZE + sig_size as usize].to_vec();

        Ok(SignatureHeader {
            sig_size,
            scheme,
            hash_alg,
            signature,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    Lz4,
    Lzma,
    /// Payload stored uncompressed behind a compression header.
    Stored,
}

impl CompressionAlgorithm {
    pub fn tag(self) -> [u8; 4] {
        match self {
            CompressionAlgorithm::Lz4 => LZ4_TAG,
            CompressionAlgorithm::Lzma => LZMA_TAG,
            CompressionAlgorithm::Stored => STORED_TAG,
        }
    }

    pub fn from_tag(tag: [u8; 4]) -> Result<Self, HeaderError> {
        match &tag {
            b"LZ4 " => Ok(CompressionAlgorithm::Lz4),
            b"LZMA" => Ok(CompressionAlgorithm::Lzma),
            b"LZDM" => Ok(CompressionAlgorithm::Stored),
            _ => Err(HeaderError::InvalidTag {
                what: "compression",
                expected: &[LZ4_TAG, LZMA_TAG, STORED_TAG],
                found: tag,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionHeader {
    pub algorithm: CompressionAlgorithm,
    pub compressed_len: u32,
    pub uncompressed_len: u32,
}

impl CompressionHeader {
    pub const SIZE: usize = 16;

    pub fn new(
        algorithm: CompressionAlgorithm,
        compressed_len: usize,
        uncompressed_len: usize,
    ) -> Result<Self, HeaderError> {
        let to_u32 = |len: usize| {
            u32::try_from(len).map_err(|_| HeaderError::PayloadTooLarge {
                what: "compressed image",
                len,
                bits: 32,
            })
        };
        Ok(CompressionHeader {
            algorithm,
            compressed_len: to_u32(compressed_len)?,
            uncompressed_len: to_u32(uncompressed_len)?,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), HeaderError> {
        try_write!(writer, 0, bytes, &self.algorithm.tag());
        try_write!(writer, 4, u32, self.compressed_len);
        try_write!(writer, 8, u32, self.uncompressed_len);
        try_write!(writer, 12, u32, 0);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HeaderError> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.write_to(&mut out)?;
        Ok(out)
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, HeaderError> {
        ensure_len(buf, Self::SIZE, "compression header")?;
        let mut cursor = Cursor::new(buf);

        let algorithm = CompressionAlgorithm::from_tag(try_read!(cursor, [u8; 4]))?;
        let compressed_len = try_read!(cursor, u32);
        let uncompressed_len = try_read!(cursor, u32);

        Ok(CompressionHeader {
            algorithm,
            compressed_len,
            uncompressed_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_public_key_header_layout() {
        let key: Vec<u8> = (0..=255u8).cycle().take(260).collect();
        let header = PublicKeyHeader::new(KeyType::Rsa, key.clone()).unwrap();
        let bytes = header.to_bytes().unwrap();

        assert_eq!(&bytes[..4], b"PUBK");
        assert_eq!(&bytes[4..6], &[0x04, 0x01]);
        assert_eq!(bytes[6], 1);
        assert_eq!(bytes[7], 0);
        assert_eq!(bytes.len(), 8 + 260);

        let parsed = PublicKeyHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.key_size(), 260);
        assert_eq!(parsed.key_type(), KeyType::Rsa);
        assert_eq!(parsed.key(), key.as_slice());
    }

    #[test]
    fn test_signature_header_layout() {
        let header = SignatureHeader::new(
            SignatureScheme::RsaPss,
            HashAlgorithm::Sha384,
            vec![0xAB; 384],
        )
        .unwrap();
        let bytes = header.to_bytes().unwrap();

        assert_eq!(&bytes[..8], &[b'S', b'I', b'G', b'N', 0x80, 0x01, 2, 2]);
        assert_eq!(SignatureHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_compression_header_layout() {
        let header = CompressionHeader::new(CompressionAlgorithm::Lz4, 0x120, 0x400).unwrap();
        let bytes = header.to_bytes().unwrap();

        assert_eq!(
            bytes,
            vec![
                b'L', b'Z', b'4', b' ', 0x20, 0x01, 0, 0, 0x00, 0x04, 0, 0, 0, 0, 0, 0
            ]
        );
        assert_eq!(CompressionHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_rejects_bad_tag_and_truncation() {
        let mut bytes = PublicKeyHeader::new(KeyType::Rsa, vec![1, 2, 3])
            .unwrap()
            .to_bytes()
            .unwrap();

        let truncated = PublicKeyHeader::from_bytes(&bytes[..9]).unwrap_err();
        assert!(matches!(
            truncated,
            HeaderError::Truncated { need: 11, have: 9, .. }
        ));

        bytes[0] = b'X';
        assert!(matches!(
            PublicKeyHeader::from_bytes(&bytes).unwrap_err(),
            HeaderError::InvalidTag { found, .. } if &found == b"XUBK"
        ));

        assert!(matches!(
            CompressionHeader::from_bytes(b"ZSTD\0\0\0\0\0\0\0\0\0\0\0\0").unwrap_err(),
            HeaderError::InvalidTag { .. }
        ));
    }

    #[test]
    fn test_payload_size_is_bounded() {
        let err = PublicKeyHeader::new(KeyType::Rsa, vec![0; 0x1_0000]).unwrap_err();
        assert!(matches!(err, HeaderError::PayloadTooLarge { bits: 16, .. }));
    }
}
