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

//! The length-prefixed "skeleton" encoding used for property maps, tree
//! conflict descriptors and work queue items.
//!
//! An atom is `<decimal-length> <space> <bytes>`; a list is a parenthesized
//! sequence of items separated by whitespace. A property map is a single
//! list of alternating key and value atoms.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SkelError {
    #[error("unexpected end of skeleton data")]
    UnexpectedEnd,
    #[error("malformed skeleton at offset {0}")]
    Malformed(usize),
    #[error("trailing data after skeleton at offset {0}")]
    TrailingData(usize),
    #[error("skeleton atom is not valid UTF-8")]
    NotUtf8,
    #[error("property list has an odd number of atoms")]
    OddPropList,
    #[error("expected an atom")]
    ExpectedAtom,
    #[error("expected a list")]
    ExpectedList,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Skel {
    Atom(Vec<u8>),
    List(Vec<Skel>),
}

impl Skel {
    pub fn atom(data: impl Into<Vec<u8>>) -> Skel {
        Skel::Atom(data.into())
    }

    pub fn list(items: Vec<Skel>) -> Skel {
        Skel::List(items)
    }

    pub fn as_atom(&self) -> Result<&[u8], SkelError> {
        match self {
            Skel::Atom(data) => Ok(data),
            Skel::List(_) => Err(SkelError::ExpectedAtom),
        }
    }

    pub fn as_str(&self) -> Result<&str, SkelError> {
        std::str::from_utf8(self.as_atom()?).map_err(|_| SkelError::NotUtf8)
    }

    pub fn as_list(&self) -> Result<&[Skel], SkelError> {
        match self {
            Skel::Atom(_) => Err(SkelError::ExpectedList),
            Skel::List(items) => Ok(items),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Skel, SkelError> {
        let mut parser = Parser { data, pos: 0 };
        parser.skip_whitespace();
        let skel = parser.parse_value()?;
        parser.skip_whitespace();
        if parser.pos != data.len() {
            return Err(SkelError::TrailingData(parser.pos));
        }
        Ok(skel)
    }

    pub fn unparse(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Skel::Atom(data) => {
                out.extend_from_slice(data.len().to_string().as_bytes());
                out.push(b' ');
                out.extend_from_slice(data);
            }
            Skel::List(items) => {
                out.push(b'(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(b' ');
                    }
                    item.write_to(out);
                }
                out.push(b')');
            }
        }
    }
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn skip_whitespace(&mut self) {
        while self.pos < self.data.len()
            && self.data[self.pos].is_ascii_whitespace()
        {
            self.pos += 1;
        }
    }

    fn parse_value(&mut self) -> Result<Skel, SkelError> {
        match self.data.get(self.pos) {
            None => Err(SkelError::UnexpectedEnd),
            Some(b'(') => self.parse_list(),
            Some(c) if c.is_ascii_digit() => self.parse_atom(),
            Some(_) => Err(SkelError::Malformed(self.pos)),
        }
    }

    fn parse_list(&mut self) -> Result<Skel, SkelError> {
        self.pos += 1; // '('
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.data.get(self.pos) {
                None => return Err(SkelError::UnexpectedEnd),
                Some(b')') => {
                    self.pos += 1;
                    return Ok(Skel::List(items));
                }
                Some(_) => items.push(self.parse_value()?),
            }
        }
    }

    fn parse_atom(&mut self) -> Result<Skel, SkelError> {
        let start = self.pos;
        while self
            .data
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_digit())
        {
            self.pos += 1;
        }
        let len: usize = std::str::from_utf8(&self.data[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(SkelError::Malformed(start))?;
        if self.data.get(self.pos) != Some(&b' ') {
            return Err(SkelError::Malformed(self.pos));
        }
        self.pos += 1; // the separating space
        if self.pos + len > self.data.len() {
            return Err(SkelError::UnexpectedEnd);
        }
        let atom = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(Skel::Atom(atom))
    }
}

/// Serializes a property map: a list of alternating key and value atoms,
/// keys in sorted order.
pub fn write_proplist(props: &BTreeMap<String, String>) -> Vec<u8> {
    let items = props
        .iter()
        .flat_map(|(k, v)| {
            [Skel::atom(k.as_bytes()), Skel::atom(v.as_bytes())]
        })
        .collect();
    Skel::List(items).unparse()
}

pub fn parse_proplist(
    data: &[u8],
) -> Result<BTreeMap<String, String>, SkelError> {
    let skel = Skel::parse(data)?;
    let items = skel.as_list()?;
    if items.len() % 2 != 0 {
        return Err(SkelError::OddPropList);
    }
    let mut props = BTreeMap::new();
    for pair in items.chunks(2) {
        props.insert(pair[0].as_str()?.to_owned(), pair[1].as_str()?.to_owned());
    }
    Ok(props)
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;

    use super::*;

    #[test]
    fn atom_round_trip() {
        let skel = Skel::atom(&b"hello world"[..]);
        assert_eq!(skel.unparse(), b"11 hello world");
        assert_eq!(Skel::parse(&skel.unparse()), Ok(skel));
    }

    #[test]
    fn empty_atom() {
        let skel = Skel::atom(&b""[..]);
        assert_eq!(skel.unparse(), b"0 ");
        assert_eq!(Skel::parse(b"0 "), Ok(skel));
    }

    #[test]
    fn nested_lists() {
        let skel = Skel::list(vec![
            Skel::atom(&b"a"[..]),
            Skel::list(vec![Skel::atom(&b"bc"[..]), Skel::list(vec![])]),
        ]);
        let data = skel.unparse();
        assert_eq!(data, b"(1 a (2 bc ()))");
        assert_eq!(Skel::parse(&data), Ok(skel));
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_matches::assert_matches!(
            Skel::parse(b"(1 a"),
            Err(SkelError::UnexpectedEnd)
        );
        assert_matches::assert_matches!(
            Skel::parse(b"5 ab"),
            Err(SkelError::UnexpectedEnd)
        );
        assert_matches::assert_matches!(
            Skel::parse(b"x"),
            Err(SkelError::Malformed(0))
        );
        assert_matches::assert_matches!(
            Skel::parse(b"1 a 1 b"),
            Err(SkelError::TrailingData(_))
        );
    }

    #[test]
    fn proplist_round_trip() {
        let props = btreemap! {
            "svt:eol-style".to_owned() => "native".to_owned(),
            "owner".to_owned() => "bob".to_owned(),
        };
        let data = write_proplist(&props);
        assert_eq!(parse_proplist(&data), Ok(props));
    }

    #[test]
    fn empty_proplist() {
        let props = BTreeMap::new();
        let data = write_proplist(&props);
        assert_eq!(data, b"()");
        assert_eq!(parse_proplist(&data), Ok(props));
    }

    #[test]
    fn proplist_rejects_odd_atom_count() {
        assert_eq!(
            parse_proplist(b"(1 a)"),
            Err(SkelError::OddPropList)
        );
    }
}
