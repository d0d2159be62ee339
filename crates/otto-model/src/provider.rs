// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{CompletionRequest, ProviderError, StreamDelta};

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, ProviderError>> + Send>>;

/// Contract between the engine and a model backend.
///
/// Implementations translate the request into their wire format, issue the
/// streaming call, and map wire events into [`StreamDelta`]s.  Failures are
/// classified into the closed [`crate::ErrorKind`] set so the resilient call
/// path can decide what to retry.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider id for status display and logging.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Issue one streaming completion call.
    async fn stream(&self, req: CompletionRequest) -> Result<DeltaStream, ProviderError>;
}
