// Copyright 2023 The Subvert Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::{Debug, Display, Error, Formatter};

use digest::Digest;
use md5::Md5;
use sha1::Sha1;
use thiserror::Error as ThisError;

/// The digest algorithms a working copy may address pristine content by.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Default)]
pub enum ChecksumKind {
    Md5,
    #[default]
    Sha1,
}

impl ChecksumKind {
    pub fn token(self) -> &'static str {
        match self {
            ChecksumKind::Md5 => "md5",
            ChecksumKind::Sha1 => "sha1",
        }
    }

    pub fn from_token(token: &str) -> Option<ChecksumKind> {
        match token {
            "md5" => Some(ChecksumKind::Md5),
            "sha1" => Some(ChecksumKind::Sha1),
            _ => None,
        }
    }

    pub fn digest_size(self) -> usize {
        match self {
            ChecksumKind::Md5 => 16,
            ChecksumKind::Sha1 => 20,
        }
    }
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ChecksumParseError {
    #[error("unknown checksum kind in '{0}'")]
    UnknownKind(String),
    #[error("invalid hex digest in '{0}'")]
    InvalidHex(String),
    #[error("digest length mismatch in '{0}'")]
    BadLength(String),
}

/// A digest of some byte stream, together with the algorithm that produced
/// it. The canonical textual form is `<kind>$<lowercase-hex>`, which is
/// also what gets stored in `checksum` database columns and used as the
/// pristine store file name (hex part only).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checksum {
    kind: ChecksumKind,
    bytes: Vec<u8>,
}

impl Debug for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.debug_tuple("Checksum").field(&self.to_string()).finish()
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}${}", self.kind.token(), self.hex())
    }
}

impl Checksum {
    pub fn new(kind: ChecksumKind, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len(), kind.digest_size());
        Checksum { kind, bytes }
    }

    pub fn kind(&self) -> ChecksumKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Parses the canonical `<kind>$<hex>` form.
    pub fn parse(s: &str) -> Result<Checksum, ChecksumParseError> {
        let (kind_str, hex_str) = s
            .split_once('$')
            .ok_or_else(|| ChecksumParseError::UnknownKind(s.to_owned()))?;
        let kind = ChecksumKind::from_token(kind_str)
            .ok_or_else(|| ChecksumParseError::UnknownKind(s.to_owned()))?;
        let bytes = hex::decode(hex_str)
            .map_err(|_| ChecksumParseError::InvalidHex(s.to_owned()))?;
        if bytes.len() != kind.digest_size() {
            return Err(ChecksumParseError::BadLength(s.to_owned()));
        }
        Ok(Checksum { kind, bytes })
    }

    pub fn of_bytes(kind: ChecksumKind, data: &[u8]) -> Checksum {
        let bytes = match kind {
            ChecksumKind::Md5 => Md5::digest(data).to_vec(),
            ChecksumKind::Sha1 => Sha1::digest(data).to_vec(),
        };
        Checksum { kind, bytes }
    }
}

/// Incremental digest matching a [`ChecksumKind`], for hashing content as
/// it streams through a writer.
pub enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
}

impl Hasher {
    pub fn new(kind: ChecksumKind) -> Hasher {
        match kind {
            ChecksumKind::Md5 => Hasher::Md5(Md5::new()),
            ChecksumKind::Sha1 => Hasher::Sha1(Sha1::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Checksum {
        match self {
            Hasher::Md5(h) => Checksum {
                kind: ChecksumKind::Md5,
                bytes: h.finalize().to_vec(),
            },
            Hasher::Sha1(h) => Checksum {
                kind: ChecksumKind::Sha1,
                bytes: h.finalize().to_vec(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_round_trips() {
        let checksum = Checksum::of_bytes(ChecksumKind::Sha1, b"");
        assert_eq!(
            checksum.to_string(),
            "sha1$da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(Checksum::parse(&checksum.to_string()), Ok(checksum));

        let checksum = Checksum::of_bytes(ChecksumKind::Md5, b"abc");
        assert_eq!(
            checksum.to_string(),
            "md5$900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(Checksum::parse(&checksum.to_string()), Ok(checksum));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_matches::assert_matches!(
            Checksum::parse("da39a3ee"),
            Err(ChecksumParseError::UnknownKind(_))
        );
        assert_matches::assert_matches!(
            Checksum::parse("sha256$00"),
            Err(ChecksumParseError::UnknownKind(_))
        );
        assert_matches::assert_matches!(
            Checksum::parse("sha1$zzzz"),
            Err(ChecksumParseError::InvalidHex(_))
        );
        assert_matches::assert_matches!(
            Checksum::parse("sha1$0011"),
            Err(ChecksumParseError::BadLength(_))
        );
    }

    #[test]
    fn streaming_matches_oneshot() {
        let mut hasher = Hasher::new(ChecksumKind::Sha1);
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(
            hasher.finalize(),
            Checksum::of_bytes(ChecksumKind::Sha1, b"hello world")
        );
    }
}
