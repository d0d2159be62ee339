// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod memory;
mod store;
mod types;

pub use memory::MemoryStore;
pub use store::{Store, StoreError};
pub use types::{MessageRecord, TaskPhase, TaskRecord, TokenRecord};
