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
use subvert_lib::node::Status;
use subvert_lib::schema::FORMAT_CURRENT;
use subvert_lib::testutils;
use subvert_lib::wc_db::{DbConfig, DbError, OpenMode, WcDb};

#[test]
fn future_format_is_rejected() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    {
        let _db = testutils::simple_checkout(&root);
    }
    testutils::set_schema_version(&root, FORMAT_CURRENT + 1);

    let db = testutils::empty_db();
    assert_matches!(
        db.read_info(&root),
        Err(DbError::UnsupportedFormat { format, .. })
            if format == FORMAT_CURRENT + 1
    );
}

#[test]
fn pre_modern_format_is_rejected() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    {
        let _db = testutils::simple_checkout(&root);
    }
    testutils::set_schema_version(&root, 3);

    let db = testutils::empty_db();
    assert_matches!(
        db.read_info(&root),
        Err(DbError::UnsupportedFormat { format: 3, .. })
    );
}

#[test]
fn old_format_upgrades_automatically() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    testutils::init_checkout_at_format(&root, 13);

    let db = testutils::empty_db();
    let info = db.read_info(&root).unwrap();
    assert_eq!(info.status, Status::Normal);
    assert_eq!(info.repos_relpath.as_deref(), Some("trunk"));

    // The upgrade is persistent: a non-upgrading engine accepts the
    // database now.
    drop(db);
    let db = WcDb::open(OpenMode::ReadWrite, DbConfig::default(), false, false);
    assert_eq!(db.read_info(&root).unwrap().status, Status::Normal);
}

#[test]
fn old_format_without_auto_upgrade_is_rejected() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    testutils::init_checkout_at_format(&root, 13);

    let db = WcDb::open(OpenMode::ReadWrite, DbConfig::default(), false, false);
    assert_matches!(
        db.read_info(&root),
        Err(DbError::UnsupportedFormat { format: 13, .. })
    );
}

#[test]
fn legacy_marker_working_copy_requires_upgrade() {
    let temp_dir = testutils::new_temp_dir();
    let root = temp_dir.path().canonicalize().unwrap();
    let admin_dir = root.join(".svt");
    std::fs::create_dir_all(&admin_dir).unwrap();
    std::fs::write(admin_dir.join("entries"), "8\n").unwrap();

    let db = testutils::empty_db();
    assert_matches!(
        db.read_info(&root.join("a.txt")),
        Err(DbError::UnsupportedFormat { format: 8, .. })
    );
}
