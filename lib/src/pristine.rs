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

//! The pristine store: deduplicated, content-addressed storage for
//! untranslated historical file texts, below
//! `<wcroot>/.svt/pristine/<xx>/<digest>` with a two-character shard to
//! bound directory fan-out.
//!
//! Installation is atomic: content is staged in the wcroot's tempdir,
//! fsynced, renamed into place, and only then recorded in the PRISTINE
//! table. A crash between rename and insert leaves an orphaned file that
//! garbage collection can reclaim, never a row pointing at nothing.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use rusqlite::params;
use rusqlite::OptionalExtension;
use tempfile::NamedTempFile;

use crate::checksum::Checksum;
use crate::file_util::persist_content_addressed_temp_file;
use crate::sqlite::{self, Stmt};
use crate::wc_db::{DbError, DbResult, WcDb, ADMIN_DIR, PRISTINE_DIR, TEMP_DIR};

/// The path a pristine text lives at:
/// `<wcroot>/.svt/pristine/<xx>/<digest>`.
fn pristine_path(
    wcroot_abspath: &Path,
    checksum: &Checksum,
    create_subdir: bool,
) -> DbResult<PathBuf> {
    let base_dir = wcroot_abspath.join(ADMIN_DIR).join(PRISTINE_DIR);
    let hexdigest = checksum.hex();
    let subdir = base_dir.join(&hexdigest[..2]);
    if create_subdir {
        // Typically the directory already exists; any *other* failure
        // will resurface when the file inside it is accessed.
        std::fs::create_dir(&subdir).ok();
    }
    Ok(subdir.join(hexdigest))
}

impl WcDb {
    fn verify_pristine_checksum_kind(
        &self,
        checksum: &Checksum,
    ) -> DbResult<()> {
        let expected = self.pristine_checksum_kind();
        if checksum.kind() != expected {
            return Err(DbError::BadChecksumKind {
                expected,
                found: checksum.kind(),
            });
        }
        Ok(())
    }

    /// The staging directory for files that will be renamed into the
    /// pristine store or elsewhere under the administrative area.
    pub fn pristine_get_tempdir(
        &self,
        wri_abspath: &Path,
    ) -> DbResult<PathBuf> {
        let parsed = self.parse_local_abspath(wri_abspath)?;
        Ok(parsed.wcroot.abspath().join(ADMIN_DIR).join(TEMP_DIR))
    }

    /// Opens a pristine text for reading. Returns the stream and the byte
    /// count recorded when the text was installed.
    pub fn pristine_read(
        &self,
        wri_abspath: &Path,
        checksum: &Checksum,
    ) -> DbResult<(Box<dyn Read>, u64)> {
        self.verify_pristine_checksum_kind(checksum)?;
        let parsed = self.parse_local_abspath(wri_abspath)?;

        let size: Option<i64> = {
            let sdb = parsed.wcroot.sdb()?.borrow();
            let result = sqlite::prepare(&sdb.conn, Stmt::SelectPristine)?
                .query_row(params![checksum.to_string()], |row| {
                    row.get("size")
                })
                .optional()?;
            result
        };
        let Some(size) = size else {
            return Err(DbError::ChecksumUnknown(checksum.clone()));
        };

        let path = pristine_path(parsed.wcroot.abspath(), checksum, false)?;
        let file = File::open(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                DbError::ChecksumUnknown(checksum.clone())
            } else {
                DbError::io("failed to open pristine text", path.clone(), err)
            }
        })?;
        Ok((Box::new(file), size as u64))
    }

    /// Stores a byte stream under its declared checksum: staged in the
    /// tempdir, fsynced, renamed into the store (tolerating an existing
    /// identical file), then recorded in the PRISTINE table with the
    /// exact byte count.
    pub fn pristine_write(
        &self,
        wri_abspath: &Path,
        checksum: &Checksum,
        contents: &mut dyn Read,
    ) -> DbResult<()> {
        self.verify_pristine_checksum_kind(checksum)?;
        let parsed = self.parse_local_abspath(wri_abspath)?;
        let wcroot_abspath = parsed.wcroot.abspath().to_path_buf();
        let temp_dir = wcroot_abspath.join(ADMIN_DIR).join(TEMP_DIR);

        let mut temp_file = NamedTempFile::new_in(&temp_dir).map_err(|err| {
            DbError::io("failed to create tempfile", &temp_dir, err)
        })?;
        let size = std::io::copy(contents, temp_file.as_file_mut())
            .map_err(|err| {
                DbError::io(
                    "failed to stage pristine text",
                    temp_file.path().to_path_buf(),
                    err,
                )
            })?;
        temp_file.as_file().sync_all().map_err(|err| {
            DbError::io(
                "failed to sync pristine text",
                temp_file.path().to_path_buf(),
                err,
            )
        })?;

        let pristine_abspath =
            pristine_path(&wcroot_abspath, checksum, true)?;
        persist_content_addressed_temp_file(temp_file, &pristine_abspath)
            .map_err(|err| {
                DbError::io(
                    "failed to install pristine text",
                    pristine_abspath.clone(),
                    err.error,
                )
            })?;

        // The file is in place before the row exists; see the module
        // docs for the crash ordering.
        let sdb = parsed.wcroot.sdb()?.borrow();
        sqlite::prepare(&sdb.conn, Stmt::InsertPristine)?
            .execute(params![checksum.to_string(), size as i64])?;
        Ok(())
    }

    /// Moves an already-staged tempfile into the store under `checksum`
    /// and records it. The tempfile must live in the wcroot's tempdir
    /// (see [`WcDb::pristine_get_tempdir`]).
    pub fn pristine_install(
        &self,
        tempfile_abspath: &Path,
        checksum: &Checksum,
    ) -> DbResult<()> {
        debug_assert!(tempfile_abspath.is_absolute());
        self.verify_pristine_checksum_kind(checksum)?;

        // The tempfile lives in `<wcroot>/.svt/tmp/`; resolving its
        // directory finds the owning wcroot.
        let wri_abspath = tempfile_abspath.parent().ok_or_else(|| {
            DbError::NotWorkingCopy(tempfile_abspath.to_path_buf())
        })?;
        let parsed = self.parse_local_abspath(wri_abspath)?;
        let wcroot_abspath = parsed.wcroot.abspath().to_path_buf();

        let pristine_abspath =
            pristine_path(&wcroot_abspath, checksum, true)?;
        std::fs::rename(tempfile_abspath, &pristine_abspath).map_err(
            |err| {
                DbError::io(
                    "failed to install pristine text",
                    pristine_abspath.clone(),
                    err,
                )
            },
        )?;
        let size = std::fs::metadata(&pristine_abspath)
            .map_err(|err| {
                DbError::io(
                    "failed to examine pristine text",
                    pristine_abspath.clone(),
                    err,
                )
            })?
            .len();

        let sdb = parsed.wcroot.sdb()?.borrow();
        sqlite::prepare(&sdb.conn, Stmt::InsertPristine)?
            .execute(params![checksum.to_string(), size as i64])?;
        Ok(())
    }

    /// Whether the store holds this text: the PRISTINE row and the file
    /// must both exist.
    pub fn pristine_check(
        &self,
        wri_abspath: &Path,
        checksum: &Checksum,
    ) -> DbResult<bool> {
        self.verify_pristine_checksum_kind(checksum)?;
        let parsed = self.parse_local_abspath(wri_abspath)?;

        let have_row = {
            let sdb = parsed.wcroot.sdb()?.borrow();
            let result = sqlite::prepare(&sdb.conn, Stmt::SelectPristine)?
                .query_row(params![checksum.to_string()], |row| {
                    row.get::<_, i64>("size")
                })
                .optional()?
                .is_some();
            result
        };
        if !have_row {
            return Ok(false);
        }
        let path = pristine_path(parsed.wcroot.abspath(), checksum, false)?;
        Ok(path.is_file())
    }

    /// Re-fetches a pristine text whose row exists but whose file has
    /// gone missing. Reserved in this engine revision.
    pub fn pristine_repair(
        &self,
        _wri_abspath: &Path,
        checksum: &Checksum,
    ) -> DbResult<()> {
        self.verify_pristine_checksum_kind(checksum)?;
        Err(DbError::NotImplemented("pristine_repair"))
    }
}
