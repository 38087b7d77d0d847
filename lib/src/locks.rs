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

//! Two unrelated kinds of lock share this module: repository locks
//! (server-side lock tokens mirrored into the working copy, keyed by
//! repository location) and advisory wc-locks (cooperative exclusion
//! between processes operating on the same checkout). The engine stores
//! and reports wc-locks but does not enforce them.

use std::path::Path;

use rusqlite::params;
use rusqlite::OptionalExtension;

use crate::sqlite::{self, Stmt};
use crate::wc_db::{scan_upwards_for_repos, DbError, DbResult, WcDb};

/// A repository lock attached to a BASE node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockInfo {
    pub token: String,
    pub owner: Option<String>,
    pub comment: Option<String>,
    pub date: Option<i64>,
}

impl WcDb {
    /// Records a repository lock for the node at `local_abspath`.
    pub fn lock_add(
        &self,
        local_abspath: &Path,
        lock: &LockInfo,
    ) -> DbResult<()> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        {
            let sdb = parsed.wcroot.sdb()?.borrow();
            let (repos_id, repos_relpath) = scan_upwards_for_repos(
                &sdb.conn,
                parsed.wcroot.wc_id(),
                &parsed.relpath,
                local_abspath,
            )?;
            sqlite::prepare(&sdb.conn, Stmt::InsertLock)?.execute(params![
                repos_id,
                repos_relpath,
                lock.token,
                lock.owner,
                lock.comment,
                lock.date.filter(|date| *date != 0),
            ])?;
        }
        // Cached entries now carry stale lock info.
        self.flush_entries(&parsed);
        Ok(())
    }

    /// Removes the repository lock recorded for the node at
    /// `local_abspath`.
    pub fn lock_remove(&self, local_abspath: &Path) -> DbResult<()> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        {
            let sdb = parsed.wcroot.sdb()?.borrow();
            let (repos_id, repos_relpath) = scan_upwards_for_repos(
                &sdb.conn,
                parsed.wcroot.wc_id(),
                &parsed.relpath,
                local_abspath,
            )?;
            sqlite::prepare(&sdb.conn, Stmt::DeleteLock)?
                .execute(params![repos_id, repos_relpath])?;
        }
        self.flush_entries(&parsed);
        Ok(())
    }

    /// Takes the advisory wc-lock on a directory. A second take, by this
    /// engine or any other process, fails with `wc_locked`.
    pub fn wclock_set(&self, local_abspath: &Path) -> DbResult<()> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let sdb = parsed.wcroot.sdb()?.borrow();
        let result = sqlite::prepare(&sdb.conn, Stmt::InsertWcLock)?
            .execute(params![
                parsed.wcroot.wc_id(),
                parsed.relpath.as_str(),
            ]);
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(DbError::Locked(local_abspath.to_path_buf()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Whether a wc-lock is recorded on the directory, no matter who took
    /// it.
    pub fn wclocked(&self, local_abspath: &Path) -> DbResult<bool> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let sdb = parsed.wcroot.sdb()?.borrow();
        let have_row = sqlite::prepare(&sdb.conn, Stmt::SelectWcLock)?
            .query_row(
                params![parsed.wcroot.wc_id(), parsed.relpath.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        Ok(have_row)
    }

    /// Drops the advisory wc-lock, and with it this engine's belief that
    /// it owns the lock.
    pub fn wclock_remove(&self, local_abspath: &Path) -> DbResult<()> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        {
            let sdb = parsed.wcroot.sdb()?.borrow();
            sqlite::prepare(&sdb.conn, Stmt::DeleteWcLock)?.execute(
                params![parsed.wcroot.wc_id(), parsed.relpath.as_str()],
            )?;
        }
        self.set_handle_locked(parsed.handle, false);
        Ok(())
    }
}
