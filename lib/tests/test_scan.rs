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

use std::collections::BTreeMap;
use std::path::Path;

use assert_matches::assert_matches;
use subvert_lib::node::{Depth, NodeKind, Presence, Status};
use subvert_lib::testutils::{self, Copyfrom};
use subvert_lib::wc_db::{DbError, WcDb};

fn add_base_dir(db: &WcDb, root: &Path, relpath: &str) {
    db.base_add_directory(
        &root.join(relpath),
        &format!("trunk/{relpath}"),
        testutils::REPOS_ROOT_URL,
        testutils::REPOS_UUID,
        7,
        &BTreeMap::new(),
        Some(7),
        Some(0),
        Some("bob"),
        &[],
        Depth::Infinity,
    )
    .unwrap();
}

#[test]
fn scan_addition_of_plain_add() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    testutils::insert_working_node(
        &db,
        &root.join("B"),
        Presence::Normal,
        NodeKind::Dir,
        None,
        None,
        None,
    )
    .unwrap();
    testutils::insert_working_node(
        &db,
        &root.join("B").join("g"),
        Presence::Normal,
        NodeKind::File,
        None,
        None,
        None,
    )
    .unwrap();

    let addition = db.scan_addition(&root.join("B").join("g")).unwrap();
    assert_eq!(addition.status, Status::Added);
    assert_eq!(addition.op_root_abspath, root.join("B"));
    assert_eq!(addition.repos_relpath, "trunk/B/g");
    assert_eq!(addition.repos_root_url, testutils::REPOS_ROOT_URL);
    assert_eq!(addition.repos_uuid, testutils::REPOS_UUID);
    assert_eq!(addition.original_repos_relpath, None);
    assert_eq!(addition.original_revision, None);
}

#[test]
fn scan_addition_of_copy() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    testutils::insert_working_node(
        &db,
        &root.join("A"),
        Presence::Normal,
        NodeKind::Dir,
        Some(Copyfrom {
            repos_relpath: "trunk/X",
            revision: 5,
            moved_here: false,
        }),
        None,
        None,
    )
    .unwrap();
    testutils::insert_working_node(
        &db,
        &root.join("A").join("f"),
        Presence::Normal,
        NodeKind::File,
        None,
        None,
        None,
    )
    .unwrap();

    let addition = db.scan_addition(&root.join("A").join("f")).unwrap();
    assert_eq!(addition.status, Status::Copied);
    assert_eq!(addition.op_root_abspath, root.join("A"));
    assert_eq!(addition.repos_relpath, "trunk/A/f");
    assert_eq!(addition.original_repos_relpath.as_deref(), Some("trunk/X"));
    assert_eq!(
        addition.original_root_url.as_deref(),
        Some(testutils::REPOS_ROOT_URL)
    );
    assert_eq!(addition.original_uuid.as_deref(), Some(testutils::REPOS_UUID));
    assert_eq!(addition.original_revision, Some(5));
}

#[test]
fn scan_addition_of_move_destination() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    testutils::insert_working_node(
        &db,
        &root.join("C"),
        Presence::Normal,
        NodeKind::Dir,
        Some(Copyfrom {
            repos_relpath: "trunk/old",
            revision: 6,
            moved_here: true,
        }),
        None,
        None,
    )
    .unwrap();

    let addition = db.scan_addition(&root.join("C")).unwrap();
    assert_eq!(addition.status, Status::MovedHere);
    assert_eq!(addition.op_root_abspath, root.join("C"));
    assert_eq!(addition.original_repos_relpath.as_deref(), Some("trunk/old"));
}

#[test]
fn scan_addition_rejects_unexpected_status() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);
    add_base_dir(&db, &root, "A");

    // No WORKING row at all.
    assert_matches!(
        db.scan_addition(&root.join("A")),
        Err(DbError::PathNotFound(_))
    );

    // A deleted WORKING row is not an addition.
    testutils::insert_working_node(
        &db,
        &root.join("A"),
        Presence::BaseDeleted,
        NodeKind::Dir,
        None,
        None,
        None,
    )
    .unwrap();
    assert_matches!(
        db.scan_addition(&root.join("A")),
        Err(DbError::PathUnexpectedStatus { .. })
    );
}

#[test]
fn scan_deletion_of_plain_delete() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);
    add_base_dir(&db, &root, "A");
    testutils::add_base_file(&db, &root.join("A"), "f");

    for (relpath, kind) in [("A", NodeKind::Dir), ("A/f", NodeKind::File)] {
        testutils::insert_working_node(
            &db,
            &root.join(relpath),
            Presence::BaseDeleted,
            kind,
            None,
            None,
            None,
        )
        .unwrap();
    }

    let deletion = db.scan_deletion(&root.join("A").join("f")).unwrap();
    assert_eq!(deletion.base_del_abspath, Some(root.join("A")));
    assert!(!deletion.base_replaced);
    assert_eq!(deletion.moved_to_abspath, None);
    assert_eq!(deletion.work_del_abspath, None);

    assert_eq!(
        db.read_info(&root.join("A").join("f")).unwrap().status,
        Status::Deleted
    );
}

#[test]
fn scan_deletion_of_replacement() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);
    add_base_dir(&db, &root, "A");
    testutils::add_base_file(&db, &root.join("A"), "f");

    // The directory is replaced by a new WORKING dir; the child file is
    // deleted within that replacement.
    testutils::insert_working_node(
        &db,
        &root.join("A"),
        Presence::Normal,
        NodeKind::Dir,
        None,
        None,
        None,
    )
    .unwrap();
    testutils::insert_working_node(
        &db,
        &root.join("A").join("f"),
        Presence::NotPresent,
        NodeKind::File,
        None,
        None,
        None,
    )
    .unwrap();

    let deletion = db.scan_deletion(&root.join("A").join("f")).unwrap();
    assert!(deletion.base_replaced);
    assert_eq!(deletion.base_del_abspath, Some(root.join("A")));
    assert_eq!(deletion.work_del_abspath, Some(root.join("A").join("f")));
}

#[test]
fn scan_deletion_of_move_away() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);
    add_base_dir(&db, &root, "A");
    testutils::add_base_file(&db, &root.join("A"), "f");

    testutils::insert_working_node(
        &db,
        &root.join("A"),
        Presence::BaseDeleted,
        NodeKind::Dir,
        None,
        Some("A2"),
        None,
    )
    .unwrap();
    testutils::insert_working_node(
        &db,
        &root.join("A").join("f"),
        Presence::BaseDeleted,
        NodeKind::File,
        None,
        None,
        None,
    )
    .unwrap();

    let deletion = db.scan_deletion(&root.join("A").join("f")).unwrap();
    assert_eq!(deletion.base_del_abspath, Some(root.join("A")));
    assert_eq!(deletion.moved_to_abspath, Some(root.join("A2")));
}

#[test]
fn scan_deletion_rejects_undeleted_node() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);
    add_base_dir(&db, &root, "A");

    testutils::insert_working_node(
        &db,
        &root.join("A"),
        Presence::Normal,
        NodeKind::Dir,
        None,
        None,
        None,
    )
    .unwrap();
    assert_matches!(
        db.scan_deletion(&root.join("A")),
        Err(DbError::PathUnexpectedStatus { .. })
    );
}
