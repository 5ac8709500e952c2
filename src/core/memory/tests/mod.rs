// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Memory controller tests
//!
//! - `basic`: reads, writes, endianness, bounds
//! - `alignment`: misaligned accesses (property based)
//! - `protection`: page flags, `update_area_flags`, dirty tracking
//! - `allocation`: segments and pages
//! - `atomic`: compare-and-swap, including contention across threads
//! - `mmap`: file-backed regions
//! - `program`: program image loading
//! - `state`: state capture and restore

use super::*;

mod helpers;
