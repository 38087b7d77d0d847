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

use std::fs::File;
use std::io;
use std::path::Path;

use tempfile::{NamedTempFile, PersistError};

// Like NamedTempFile::persist(), but also succeeds if the target already
// exists. Pristine files are content-addressed, so an existing target has
// the same content and the staged copy can simply be discarded.
pub fn persist_content_addressed_temp_file<P: AsRef<Path>>(
    temp_file: NamedTempFile,
    new_path: P,
) -> Result<File, PersistError> {
    match temp_file.persist(&new_path) {
        Ok(file) => Ok(file),
        Err(PersistError { error, file }) => {
            if let Ok(existing_file) = File::open(new_path) {
                Ok(existing_file)
            } else {
                Err(PersistError { error, file })
            }
        }
    }
}

/// Reads a legacy version-marker file: the leading decimal integer of its
/// first line. Returns `None` when the file does not exist or does not
/// start with a number, which signals "not a marker file" to the caller.
pub fn read_version_file(path: &Path) -> io::Result<Option<i32>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        // A non-directory ancestor also just means "no marker here".
        Err(err) if err.raw_os_error() == Some(20) => return Ok(None),
        Err(err) => return Err(err),
    };
    let digits: String = contents
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    Ok(digits.parse().ok())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn persist_no_existing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().join("file");
        let mut temp_file = NamedTempFile::new_in(&temp_dir).unwrap();
        temp_file.write_all(b"contents").unwrap();
        persist_content_addressed_temp_file(temp_file, &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"contents");
    }

    #[test]
    fn persist_target_exists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().join("file");
        std::fs::write(&target, b"contents").unwrap();
        let mut temp_file = NamedTempFile::new_in(&temp_dir).unwrap();
        temp_file.write_all(b"contents").unwrap();
        persist_content_addressed_temp_file(temp_file, &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"contents");
    }

    #[test]
    fn version_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("format");
        assert_eq!(read_version_file(&path).unwrap(), None);
        std::fs::write(&path, "8\n").unwrap();
        assert_eq!(read_version_file(&path).unwrap(), Some(8));
        std::fs::write(&path, "<?xml").unwrap();
        assert_eq!(read_version_file(&path).unwrap(), None);
    }
}
