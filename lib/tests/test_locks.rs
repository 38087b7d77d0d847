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
use subvert_lib::locks::LockInfo;
use subvert_lib::testutils;
use subvert_lib::wc_db::DbError;

#[test]
fn repository_lock_round_trip() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);
    testutils::add_base_file(&db, &root, "a.txt");
    let file = root.join("a.txt");

    assert_eq!(db.base_get_info(&file).unwrap().lock, None);

    let lock = LockInfo {
        token: "opaquelocktoken:42".to_owned(),
        owner: Some("bob".to_owned()),
        comment: Some("editing".to_owned()),
        date: Some(1_234_567),
    };
    db.lock_add(&file, &lock).unwrap();
    assert_eq!(db.base_get_info(&file).unwrap().lock, Some(lock.clone()));
    assert_eq!(db.read_info(&file).unwrap().lock, Some(lock));

    db.lock_remove(&file).unwrap();
    assert_eq!(db.base_get_info(&file).unwrap().lock, None);
}

#[test]
fn wclock_excludes_second_taker() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    assert!(!db.wclocked(&root).unwrap());
    db.wclock_set(&root).unwrap();
    assert!(db.wclocked(&root).unwrap());

    // Taking the same lock again fails, even within one engine.
    assert_matches!(db.wclock_set(&root), Err(DbError::Locked(_)));

    db.wclock_remove(&root).unwrap();
    assert!(!db.wclocked(&root).unwrap());
    db.wclock_set(&root).unwrap();
}

#[test]
fn wclock_is_visible_across_engines() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);
    db.wclock_set(&root).unwrap();

    let other = testutils::empty_db();
    assert!(other.wclocked(&root).unwrap());
    assert_matches!(other.wclock_set(&root), Err(DbError::Locked(_)));
}

#[test]
fn own_lock_is_engine_local_state() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    db.wclock_set(&root).unwrap();
    assert!(!db.own_lock(&root).unwrap());
    db.mark_locked(&root).unwrap();
    assert!(db.own_lock(&root).unwrap());

    // Dropping the database row also drops the in-memory ownership.
    db.wclock_remove(&root).unwrap();
    assert!(!db.own_lock(&root).unwrap());
}
