// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// Declares a per-thread scratch value that is kept across encoder calls.
///
/// The value is created with [`Default::default`] on first access from each
/// thread, and lives in a [`RefCell`] so that [`reuse!`] can lend it mutably.
/// Scratch buffers declared this way must not hold state that affects the
/// next call; callers always clear or resize them before use.
///
/// [`RefCell`]: std::cell::RefCell
#[macro_export]
macro_rules! reusable {
    ($key:ident: $t:ty) => {
        thread_local! {
            static $key: std::cell::RefCell<$t> = std::cell::RefCell::new(Default::default());
        }
    };
}

/// Lends the scratch value declared by [`reusable!`] to a closure.
///
/// Returns the closure's return value. Nested `reuse!` on the same key
/// panics because of the double borrow.
#[macro_export]
macro_rules! reuse {
    ($key:ident, $fn:expr) => {{
        #[allow(clippy::redundant_closure_call)]
        $key.with(|cell| $fn(&mut cell.borrow_mut()))
    }};
}
