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

use maplit::btreemap;
use subvert_lib::locks::LockInfo;
use subvert_lib::node::{NodeKind, Presence};
use subvert_lib::testutils::{self, Copyfrom};

#[test]
fn relocate_rewrites_repository_root() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);
    testutils::add_base_file(&db, &root, "a.txt");

    db.global_relocate(&root, "https://x/", true).unwrap();

    let base = db.base_get_info(&root.join("a.txt")).unwrap();
    assert_eq!(base.repos_root_url.as_deref(), Some("https://x/"));
    // The uuid identifies the repository and does not change.
    assert_eq!(base.repos_uuid.as_deref(), Some(testutils::REPOS_UUID));

    let info = db.read_info(&root).unwrap();
    assert_eq!(info.repos_root_url.as_deref(), Some("https://x/"));
}

#[test]
fn relocate_clears_dav_caches() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);
    testutils::add_base_file(&db, &root, "a.txt");
    db.base_set_dav_cache(
        &root.join("a.txt"),
        &btreemap! { "url".to_owned() => "http://x/trunk/a.txt".to_owned() },
    )
    .unwrap();

    db.global_relocate(&root, "https://x/", true).unwrap();

    // Cached URLs embed the old root and are stale now.
    assert_eq!(db.base_get_dav_cache(&root.join("a.txt")).unwrap(), None);
}

#[test]
fn relocate_rewrites_locks_and_copyfrom() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);
    testutils::add_base_file(&db, &root, "a.txt");
    db.lock_add(
        &root.join("a.txt"),
        &LockInfo {
            token: "opaquelocktoken:1".to_owned(),
            owner: Some("bob".to_owned()),
            comment: None,
            date: Some(1),
        },
    )
    .unwrap();
    testutils::insert_working_node(
        &db,
        &root.join("copied"),
        Presence::Normal,
        NodeKind::File,
        Some(Copyfrom {
            repos_relpath: "trunk/a.txt",
            revision: 7,
            moved_here: false,
        }),
        None,
        None,
    )
    .unwrap();

    db.global_relocate(&root, "https://x/", true).unwrap();

    // The lock row followed the repository id rewrite and is still
    // reported for the node.
    let base = db.base_get_info(&root.join("a.txt")).unwrap();
    assert_eq!(
        base.lock.as_ref().map(|lock| lock.token.as_str()),
        Some("opaquelocktoken:1")
    );

    // The copy source now reports the new root URL.
    let addition = db.scan_addition(&root.join("copied")).unwrap();
    assert_eq!(addition.original_root_url.as_deref(), Some("https://x/"));
}
