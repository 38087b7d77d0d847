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
use subvert_lib::skel::Skel;
use subvert_lib::testutils;
use subvert_lib::wc_db::{DbConfig, DbError, OpenMode, WcDb};

fn work_item(name: &str) -> Skel {
    Skel::list(vec![
        Skel::atom(name.as_bytes()),
        Skel::atom(&b"argument"[..]),
    ])
}

#[test]
fn items_come_back_in_insertion_order() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let db = testutils::simple_checkout(&root);

    assert_eq!(db.wq_fetch(&root).unwrap(), None);

    db.wq_add(&root, &work_item("file-install")).unwrap();
    db.wq_add(&root, &work_item("sync-file-flags")).unwrap();

    let (first_id, first) = db.wq_fetch(&root).unwrap().unwrap();
    assert_eq!(first, work_item("file-install"));

    // Fetch without completion returns the same item again.
    let (again_id, again) = db.wq_fetch(&root).unwrap().unwrap();
    assert_eq!(again_id, first_id);
    assert_eq!(again, work_item("file-install"));

    db.wq_completed(&root, first_id).unwrap();
    let (second_id, second) = db.wq_fetch(&root).unwrap().unwrap();
    assert_ne!(second_id, first_id);
    assert_eq!(second, work_item("sync-file-flags"));

    db.wq_completed(&root, second_id).unwrap();
    assert_eq!(db.wq_fetch(&root).unwrap(), None);
}

#[test]
fn nonempty_queue_blocks_strict_open() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    {
        let db = testutils::simple_checkout(&root);
        db.wq_add(&root, &work_item("file-install")).unwrap();
    }

    // An engine that demands a clean queue refuses the working copy.
    let strict = WcDb::open(OpenMode::ReadWrite, DbConfig::default(), true, true);
    assert_matches!(
        strict.read_info(&root),
        Err(DbError::CleanupRequired(_))
    );

    // A cleanup-style engine can replay and drain the queue.
    let lenient =
        WcDb::open(OpenMode::ReadWrite, DbConfig::default(), true, false);
    let (id, _) = lenient.wq_fetch(&root).unwrap().unwrap();
    lenient.wq_completed(&root, id).unwrap();
    drop(lenient);

    let strict = WcDb::open(OpenMode::ReadWrite, DbConfig::default(), true, true);
    assert!(strict.read_info(&root).is_ok());
}
