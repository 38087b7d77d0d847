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

use assert_matches::assert_matches;
use subvert_lib::node::{Depth, NodeKind, Status};
use subvert_lib::testutils;
use subvert_lib::wc_db::DbError;

#[test]
fn init_creates_incomplete_root() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    let info = db.read_info(&root).unwrap();
    assert_eq!(info.status, Status::Incomplete);
    assert_eq!(info.kind, NodeKind::Dir);
    assert_eq!(info.revision, Some(7));
    assert_eq!(info.repos_relpath.as_deref(), Some("trunk"));
    assert_eq!(
        info.repos_root_url.as_deref(),
        Some(testutils::REPOS_ROOT_URL)
    );
    assert_eq!(info.repos_uuid.as_deref(), Some(testutils::REPOS_UUID));
    assert_eq!(info.depth, Depth::Infinity);
    assert!(!info.conflicted);
}

#[test]
fn init_at_revision_zero_is_complete() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::empty_db();
    db.init(
        &root,
        "trunk",
        testutils::REPOS_ROOT_URL,
        testutils::REPOS_UUID,
        0,
        Depth::Infinity,
    )
    .unwrap();

    let info = db.read_info(&root).unwrap();
    assert_eq!(info.status, Status::Normal);
    assert_eq!(info.revision, Some(0));
}

#[test]
fn resolves_paths_below_the_root() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    // The path does not exist on disk and has no rows, but it resolves
    // to this working copy.
    assert_matches!(
        db.read_info(&root.join("sub").join("file")),
        Err(DbError::PathNotFound(_))
    );
}

#[test]
fn not_a_working_copy() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::empty_db();

    assert_matches!(
        db.read_info(&root.join("anything")),
        Err(DbError::NotWorkingCopy(_))
    );
}

#[test]
fn reopen_existing_working_copy() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    {
        let db = testutils::simple_checkout(&root);
        testutils::add_base_file(&db, &root, "a.txt");
    }

    // A second engine discovers the root by climbing from the file path.
    let db = testutils::empty_db();
    let info = db.read_info(&root.join("a.txt")).unwrap();
    assert_eq!(info.status, Status::Normal);
    assert_eq!(info.kind, NodeKind::File);
}

#[test]
fn actual_without_base_or_working_is_corrupt() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    let ghost = root.join("ghost");
    db.op_set_props(&ghost, Some(&maplit::btreemap! {}))
        .unwrap();
    assert_matches!(db.read_info(&ghost), Err(DbError::Corrupt(_)));
}
