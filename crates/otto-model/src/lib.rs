// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
mod anthropic;
mod error;
mod mock;
mod provider;
pub mod translate;
mod types;

pub use anthropic::AnthropicProvider;
pub use error::{ErrorKind, ProviderError};
pub use mock::{text_script, MockProvider, ScriptedCall, ScriptedProvider};
pub use provider::{DeltaStream, ModelProvider};
pub use types::*;
