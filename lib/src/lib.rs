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

#![deny(unused_must_use)]

pub mod base;
pub mod checksum;
pub mod commit;
pub mod conflict;
pub mod file_util;
pub mod locks;
pub mod node;
pub mod ops;
pub mod pristine;
pub mod read;
pub mod relpath;
pub mod schema;
pub mod skel;
mod sqlite;
pub mod testutils;
pub mod wc_db;
pub mod work_queue;
