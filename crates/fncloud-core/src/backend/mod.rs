// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution backends.

pub mod http;
pub mod local;
mod traits;

pub use http::HttpBackend;
pub use local::LocalBackend;
pub use traits::*;
