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

use std::io::Read;
use std::io::Write;

use assert_matches::assert_matches;
use subvert_lib::checksum::{Checksum, ChecksumKind};
use subvert_lib::testutils;
use subvert_lib::wc_db::DbError;

#[test]
fn write_then_read_back() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    let contents = b"pristine text";
    let checksum = Checksum::of_bytes(ChecksumKind::Sha1, contents);
    db.pristine_write(&root, &checksum, &mut &contents[..]).unwrap();

    assert!(db.pristine_check(&root, &checksum).unwrap());
    let (mut stream, size) = db.pristine_read(&root, &checksum).unwrap();
    let mut read_back = Vec::new();
    stream.read_to_end(&mut read_back).unwrap();
    assert_eq!(read_back, contents);
    assert_eq!(size, read_back.len() as u64);
}

#[test]
fn install_from_staged_tempfile() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    let contents = b"hello world!";
    let checksum = Checksum::of_bytes(ChecksumKind::Sha1, contents);
    let staging_dir = db.pristine_get_tempdir(&root).unwrap();
    let mut temp_file = tempfile::NamedTempFile::new_in(staging_dir).unwrap();
    temp_file.write_all(contents).unwrap();
    let (_, temp_path) = temp_file.keep().unwrap();

    db.pristine_install(&temp_path, &checksum).unwrap();
    assert!(!temp_path.exists());

    let (mut stream, size) = db.pristine_read(&root, &checksum).unwrap();
    let mut read_back = Vec::new();
    stream.read_to_end(&mut read_back).unwrap();
    assert_eq!(size, contents.len() as u64);
    assert_eq!(read_back, contents);
}

#[test]
fn duplicate_write_is_deduplicated() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    let contents = b"same bytes";
    let checksum = Checksum::of_bytes(ChecksumKind::Sha1, contents);
    db.pristine_write(&root, &checksum, &mut &contents[..]).unwrap();
    db.pristine_write(&root, &checksum, &mut &contents[..]).unwrap();

    assert!(db.pristine_check(&root, &checksum).unwrap());
}

#[test]
fn unknown_checksum_fails() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    let checksum = Checksum::of_bytes(ChecksumKind::Sha1, b"never stored");
    assert!(!db.pristine_check(&root, &checksum).unwrap());
    assert!(matches!(
        db.pristine_read(&root, &checksum),
        Err(DbError::ChecksumUnknown(_))
    ));
}

#[test]
fn wrong_checksum_kind_is_rejected() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    // The working copy is keyed by SHA-1; an MD5 checksum has no business
    // in its pristine store.
    let md5 = Checksum::of_bytes(ChecksumKind::Md5, b"x");
    assert!(matches!(
        db.pristine_read(&root, &md5),
        Err(DbError::BadChecksumKind { .. })
    ));
    assert_matches!(
        db.pristine_write(&root, &md5, &mut &b"x"[..]),
        Err(DbError::BadChecksumKind { .. })
    );
}

#[test]
fn repair_is_reserved() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    let checksum = Checksum::of_bytes(ChecksumKind::Sha1, b"x");
    assert_matches!(
        db.pristine_repair(&root, &checksum),
        Err(DbError::NotImplemented(_))
    );
}

#[test]
fn sharded_layout_on_disk() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    let contents = b"sharded";
    let checksum = Checksum::of_bytes(ChecksumKind::Sha1, contents);
    db.pristine_write(&root, &checksum, &mut &contents[..]).unwrap();

    let hex = checksum.hex();
    let expected = root
        .join(".svt")
        .join("pristine")
        .join(&hex[..2])
        .join(&hex);
    assert!(expected.is_file());
}
