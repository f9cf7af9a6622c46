//! Content digests, grounded on `original_source/src/digestgenerator.cpp`.
//!
//! A `Digest` is a `(hash, size)` pair. The hash function is selected once
//! at startup (spec §3); unlike the source, which hardcodes SHA-256, this
//! implementation supports the full set the REAPI allows a server to
//! advertise in its capabilities.

use prost::Message;
use sha2::Digest as _;

pub use crate::reapi_proto::build::bazel::remote::execution::v2::Digest as DigestProto;
pub use crate::reapi_proto::build::bazel::remote::execution::v2::DigestFunction as DigestFunctionProto;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestFunction {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "MD5" => Some(DigestFunction::Md5),
            "SHA1" | "SHA-1" => Some(DigestFunction::Sha1),
            "SHA256" | "SHA-256" => Some(DigestFunction::Sha256),
            "SHA384" | "SHA-384" => Some(DigestFunction::Sha384),
            "SHA512" | "SHA-512" => Some(DigestFunction::Sha512),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DigestFunction::Md5 => "MD5",
            DigestFunction::Sha1 => "SHA1",
            DigestFunction::Sha256 => "SHA256",
            DigestFunction::Sha384 => "SHA384",
            DigestFunction::Sha512 => "SHA512",
        }
    }

    pub fn to_proto(self) -> DigestFunctionProto {
        match self {
            DigestFunction::Md5 => DigestFunctionProto::Md5,
            DigestFunction::Sha1 => DigestFunctionProto::Sha1,
            DigestFunction::Sha256 => DigestFunctionProto::Sha256,
            DigestFunction::Sha384 => DigestFunctionProto::Sha384,
            DigestFunction::Sha512 => DigestFunctionProto::Sha512,
        }
    }

    fn hash_hex(self, blob: &[u8]) -> String {
        match self {
            DigestFunction::Md5 => hex::encode(md5::Md5::digest(blob)),
            DigestFunction::Sha1 => hex::encode(sha1::Sha1::digest(blob)),
            DigestFunction::Sha256 => hex::encode(sha2::Sha256::digest(blob)),
            DigestFunction::Sha384 => hex::encode(sha2::Sha384::digest(blob)),
            DigestFunction::Sha512 => hex::encode(sha2::Sha512::digest(blob)),
        }
    }
}

/// Create a `Digest` message from a raw blob, using `function`.
pub fn make_digest(blob: &[u8], function: DigestFunction) -> DigestProto {
    DigestProto {
        hash: function.hash_hex(blob),
        size_bytes: blob.len() as i64,
    }
}

/// Create a `Digest` message from a serialized proto message.
pub fn make_message_digest(message: &impl Message, function: DigestFunction) -> DigestProto {
    make_digest(&message.encode_to_vec(), function)
}

/// Render a digest in the `<hex-hash>/<size>` human form used in resource
/// names.
pub fn human_form(digest: &DigestProto) -> String {
    format!("{}/{}", digest.hash, digest.size_bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_digest_equality_is_hash_and_size() {
        let a = make_digest(b"hello", DigestFunction::Sha256);
        let b = make_digest(b"hello", DigestFunction::Sha256);
        assert_eq!(a, b);
    }

    #[test]
    fn test_digest_differs_by_function() {
        let sha = make_digest(b"hello", DigestFunction::Sha256);
        let md5 = make_digest(b"hello", DigestFunction::Md5);
        assert_ne!(sha.hash, md5.hash);
        assert_eq!(sha.size_bytes, md5.size_bytes);
    }

    #[test]
    fn test_human_form() {
        let d = DigestProto {
            hash: "abcd".to_string(),
            size_bytes: 4,
        };
        assert_eq!(human_form(&d), "abcd/4");
    }
}
