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

//! The on-disk schema and its forward-only upgrade ladder.
//!
//! The schema version lives in `PRAGMA user_version`. Version 12 is the
//! first relational format; versions below that used the legacy marker
//! files and per-directory layout. A fresh database is created at the
//! baseline and upgraded through the same ladder that an old database
//! takes, so upgraded and fresh databases are identical by construction.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::sqlite::set_schema_version;
use crate::wc_db::DbResult;

/// The first supported relational format.
pub(crate) const FORMAT_BASELINE: i32 = 12;

/// The format this code reads and writes.
pub const FORMAT_CURRENT: i32 = 15;

/// Formats below this are pre-modern; such working copies must be checked
/// out again.
pub(crate) const FORMAT_OLDEST: i32 = 4;

/// Format 13 introduced the persistent work queue.
pub(crate) const FORMAT_HAS_WORK_QUEUE: i32 = 13;

const BASELINE_DDL: &str = "
    CREATE TABLE REPOSITORY (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        root TEXT UNIQUE NOT NULL,
        uuid TEXT NOT NULL
    );

    CREATE INDEX I_UUID ON REPOSITORY (uuid);
    CREATE INDEX I_ROOT ON REPOSITORY (root);

    CREATE TABLE WCROOT (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        local_abspath TEXT UNIQUE
    );

    CREATE UNIQUE INDEX I_LOCAL_ABSPATH ON WCROOT (local_abspath);

    CREATE TABLE BASE_NODE (
        wc_id INTEGER NOT NULL,
        local_relpath TEXT NOT NULL,
        repos_id INTEGER,
        repos_relpath TEXT,
        parent_relpath TEXT,
        presence TEXT NOT NULL,
        kind TEXT NOT NULL,
        revnum INTEGER,
        checksum TEXT,
        translated_size INTEGER,
        changed_rev INTEGER,
        changed_date INTEGER,
        changed_author TEXT,
        depth TEXT,
        symlink_target TEXT,
        last_mod_time INTEGER,
        properties BLOB,
        dav_cache BLOB,
        PRIMARY KEY (wc_id, local_relpath)
    );

    CREATE INDEX I_PARENT ON BASE_NODE (wc_id, parent_relpath);

    CREATE TABLE WORKING_NODE (
        wc_id INTEGER NOT NULL,
        local_relpath TEXT NOT NULL,
        parent_relpath TEXT,
        presence TEXT NOT NULL,
        kind TEXT NOT NULL,
        checksum TEXT,
        translated_size INTEGER,
        changed_rev INTEGER,
        changed_date INTEGER,
        changed_author TEXT,
        depth TEXT,
        symlink_target TEXT,
        copyfrom_repos_id INTEGER,
        copyfrom_repos_path TEXT,
        copyfrom_revnum INTEGER,
        last_mod_time INTEGER,
        properties BLOB,
        PRIMARY KEY (wc_id, local_relpath)
    );

    CREATE INDEX I_WORKING_PARENT ON WORKING_NODE (wc_id, parent_relpath);

    CREATE TABLE ACTUAL_NODE (
        wc_id INTEGER NOT NULL,
        local_relpath TEXT NOT NULL,
        parent_relpath TEXT,
        properties BLOB,
        conflict_old TEXT,
        conflict_new TEXT,
        conflict_working TEXT,
        prop_reject TEXT,
        changelist TEXT,
        tree_conflict_data TEXT,
        PRIMARY KEY (wc_id, local_relpath)
    );

    CREATE INDEX I_ACTUAL_PARENT ON ACTUAL_NODE (wc_id, parent_relpath);
    CREATE INDEX I_ACTUAL_CHANGELIST ON ACTUAL_NODE (changelist);

    CREATE TABLE PRISTINE (
        checksum TEXT NOT NULL PRIMARY KEY,
        size INTEGER NOT NULL,
        refcount INTEGER NOT NULL
    );

    CREATE TABLE LOCK (
        repos_id INTEGER NOT NULL,
        repos_relpath TEXT NOT NULL,
        lock_token TEXT NOT NULL,
        lock_owner TEXT,
        lock_comment TEXT,
        lock_date INTEGER,
        PRIMARY KEY (repos_id, repos_relpath)
    );
";

const DDL_13: &str = "
    CREATE TABLE WORK_QUEUE (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        work BLOB NOT NULL
    );
";

const DDL_14: &str = "
    CREATE TABLE WC_LOCK (
        wc_id INTEGER NOT NULL,
        local_dir_relpath TEXT NOT NULL,
        PRIMARY KEY (wc_id, local_dir_relpath)
    );
";

const DDL_15: &str = "
    ALTER TABLE WORKING_NODE ADD COLUMN moved_here INTEGER;
    ALTER TABLE WORKING_NODE ADD COLUMN moved_to TEXT;
";

fn migration_ddl(version: i32) -> &'static str {
    match version {
        13 => DDL_13,
        14 => DDL_14,
        15 => DDL_15,
        _ => unreachable!("no migration script for format {version}"),
    }
}

/// Creates the full schema in an empty database: baseline plus every
/// migration script, leaving `user_version` at [`FORMAT_CURRENT`].
pub(crate) fn create_schema(conn: &mut Connection) -> DbResult<()> {
    create_schema_to(conn, FORMAT_CURRENT)
}

/// Creates the schema as it was at format `target`. Beyond its use in
/// [`create_schema`], this is how tests fabricate old working copies for
/// the upgrade ladder.
pub(crate) fn create_schema_to(
    conn: &mut Connection,
    target: i32,
) -> DbResult<()> {
    debug_assert!((FORMAT_BASELINE..=FORMAT_CURRENT).contains(&target));
    let tx = conn.transaction()?;
    tx.execute_batch(BASELINE_DDL)?;
    set_schema_version(&tx, FORMAT_BASELINE)?;
    tx.commit()?;
    for version in (FORMAT_BASELINE + 1)..=target {
        let tx = conn.transaction()?;
        tx.execute_batch(migration_ddl(version))?;
        set_schema_version(&tx, version)?;
        tx.commit()?;
    }
    Ok(())
}

/// Applies the migration scripts for `from + 1 ..= FORMAT_CURRENT`, one
/// transaction per step. Returns the resulting format.
pub(crate) fn upgrade(conn: &mut Connection, from: i32) -> DbResult<i32> {
    debug_assert!((FORMAT_BASELINE..=FORMAT_CURRENT).contains(&from));
    for version in (from + 1)..=FORMAT_CURRENT {
        debug!("upgrading working copy schema to format {version}");
        let tx = conn.transaction()?;
        tx.execute_batch(migration_ddl(version))?;
        set_schema_version(&tx, version)?;
        tx.commit()?;
    }
    if from < FORMAT_CURRENT {
        info!(
            from_format = from,
            to_format = FORMAT_CURRENT,
            "working copy schema upgraded"
        );
    }
    Ok(FORMAT_CURRENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap()
    }

    #[test]
    fn create_produces_current_format() {
        let mut conn = Connection::open_in_memory().unwrap();
        create_schema(&mut conn).unwrap();
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, FORMAT_CURRENT);
        assert_eq!(
            table_names(&conn),
            [
                "ACTUAL_NODE",
                "BASE_NODE",
                "LOCK",
                "PRISTINE",
                "REPOSITORY",
                "WCROOT",
                "WC_LOCK",
                "WORKING_NODE",
                "WORK_QUEUE",
            ]
        );
    }

    #[test]
    fn ladder_from_baseline_matches_fresh() {
        let mut old = Connection::open_in_memory().unwrap();
        let tx = old.transaction().unwrap();
        tx.execute_batch(BASELINE_DDL).unwrap();
        set_schema_version(&tx, FORMAT_BASELINE).unwrap();
        tx.commit().unwrap();
        assert_eq!(upgrade(&mut old, FORMAT_BASELINE).unwrap(), FORMAT_CURRENT);

        let mut fresh = Connection::open_in_memory().unwrap();
        create_schema(&mut fresh).unwrap();

        assert_eq!(table_names(&old), table_names(&fresh));
        // The move-tracking columns arrive with format 15.
        old.prepare("SELECT moved_here, moved_to FROM WORKING_NODE")
            .unwrap();
    }

    #[test]
    fn upgrade_is_stepwise() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        tx.execute_batch(BASELINE_DDL).unwrap();
        set_schema_version(&tx, FORMAT_BASELINE).unwrap();
        tx.commit().unwrap();

        // 12 -> 13 only adds the work queue.
        let tx = conn.transaction().unwrap();
        tx.execute_batch(migration_ddl(13)).unwrap();
        set_schema_version(&tx, 13).unwrap();
        tx.commit().unwrap();
        assert!(table_names(&conn).contains(&"WORK_QUEUE".to_owned()));
        assert!(!table_names(&conn).contains(&"WC_LOCK".to_owned()));

        assert_eq!(upgrade(&mut conn, 13).unwrap(), FORMAT_CURRENT);
        assert!(table_names(&conn).contains(&"WC_LOCK".to_owned()));
    }
}
