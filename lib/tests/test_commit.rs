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

use std::io::Write;

use maplit::btreemap;
use subvert_lib::checksum::{Checksum, ChecksumKind};
use subvert_lib::node::{NodeKind, Presence, Status};
use subvert_lib::testutils;

fn install_pristine(
    db: &subvert_lib::wc_db::WcDb,
    root: &std::path::Path,
    contents: &[u8],
) -> Checksum {
    let checksum = Checksum::of_bytes(ChecksumKind::Sha1, contents);
    let temp_dir = db.pristine_get_tempdir(root).unwrap();
    let mut temp_file = tempfile::NamedTempFile::new_in(temp_dir).unwrap();
    temp_file.write_all(contents).unwrap();
    let (_, temp_path) = temp_file.keep().unwrap();
    db.pristine_install(&temp_path, &checksum).unwrap();
    checksum
}

#[test]
fn commit_replaces_base_with_new_state() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);
    testutils::add_base_file(&db, &root, "a.txt");
    let file = root.join("a.txt");

    let checksum = install_pristine(&db, &root, b"hello world!");
    db.op_set_props(
        &file,
        Some(&btreemap! { "svt:eol-style".to_owned() => "native".to_owned() }),
    )
    .unwrap();

    db.global_commit(
        &file,
        8,
        Some(1_234_567),
        Some("carol"),
        Some(&checksum),
        None,
        None,
        false,
    )
    .unwrap();

    let base = db.base_get_info(&file).unwrap();
    assert_eq!(base.status, Status::Normal);
    assert_eq!(base.revision, Some(8));
    assert_eq!(base.changed_rev, Some(8));
    assert_eq!(base.changed_date, Some(1_234_567));
    assert_eq!(base.changed_author.as_deref(), Some("carol"));
    assert_eq!(base.checksum, Some(checksum));
    assert_eq!(base.translated_size, Some(12));

    // The ACTUAL property override became the committed properties.
    assert_eq!(
        db.read_props(&file).unwrap(),
        btreemap! { "svt:eol-style".to_owned() => "native".to_owned() }
    );
    let info = db.read_info(&file).unwrap();
    assert_eq!(info.status, Status::Normal);
    assert_eq!(info.changelist, None);
    assert!(!info.base_shadowed);
}

#[test]
fn commit_of_added_file_consumes_working_row() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);
    testutils::add_base_file(&db, &root, "a.txt");
    let added = root.join("new.txt");

    testutils::insert_working_node(
        &db,
        &added,
        Presence::Normal,
        NodeKind::File,
        None,
        None,
        None,
    )
    .unwrap();
    assert_eq!(db.read_info(&added).unwrap().status, Status::Added);

    let checksum = install_pristine(&db, &root, b"fresh");
    db.global_commit(
        &added,
        9,
        Some(2_000_000),
        Some("dave"),
        Some(&checksum),
        None,
        None,
        false,
    )
    .unwrap();

    let info = db.read_info(&added).unwrap();
    assert_eq!(info.status, Status::Normal);
    assert_eq!(info.revision, Some(9));
    assert!(!info.base_shadowed);

    // The repository location was reconstructed from the parent.
    let base = db.base_get_info(&added).unwrap();
    assert_eq!(base.repos_relpath.as_deref(), Some("trunk/new.txt"));
    assert_eq!(base.translated_size, Some(5));
}

#[test]
fn commit_can_keep_the_changelist() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);
    testutils::add_base_file(&db, &root, "a.txt");
    let file = root.join("a.txt");

    db.op_set_changelist(&file, Some("my-change")).unwrap();
    db.op_set_props(
        &file,
        Some(&btreemap! { "k".to_owned() => "v".to_owned() }),
    )
    .unwrap();

    db.global_commit(
        &file,
        8,
        Some(1),
        Some("carol"),
        None,
        None,
        None,
        true,
    )
    .unwrap();

    let info = db.read_info(&file).unwrap();
    assert_eq!(info.changelist.as_deref(), Some("my-change"));
    // Only the changelist survived in ACTUAL; the properties moved into
    // BASE.
    assert_eq!(
        db.base_get_props(&file).unwrap(),
        btreemap! { "k".to_owned() => "v".to_owned() }
    );
    assert_eq!(
        db.read_props(&file).unwrap(),
        btreemap! { "k".to_owned() => "v".to_owned() }
    );
}

#[test]
fn commit_preserves_symlink_target() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);
    db.base_add_symlink(
        &root.join("link"),
        "trunk/link",
        testutils::REPOS_ROOT_URL,
        testutils::REPOS_UUID,
        7,
        &btreemap! {},
        Some(7),
        Some(0),
        Some("bob"),
        "a.txt",
    )
    .unwrap();

    db.global_commit(
        &root.join("link"),
        8,
        Some(1),
        Some("carol"),
        None,
        None,
        None,
        false,
    )
    .unwrap();

    let base = db.base_get_info(&root.join("link")).unwrap();
    assert_eq!(base.kind, NodeKind::Symlink);
    assert_eq!(base.target.as_deref(), Some("a.txt"));
    assert_eq!(base.revision, Some(8));
}
