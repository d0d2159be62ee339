// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use crate::{
    provider::DeltaStream,
    translate::{parse_anthropic_event, AnthropicTranslator, WireTranslator},
    CompletionRequest, ErrorKind, ModelProvider, ProviderError,
};

pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
    translator: AnthropicTranslator,
}

impl AnthropicProvider {
    pub fn new(model: String, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            client: reqwest::Client::new(),
            translator: AnthropicTranslator,
        }
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, mut req: CompletionRequest) -> Result<DeltaStream, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::invalid_request("no API key configured"))?;

        if req.model.is_empty() {
            req.model = self.model.clone();
        }
        let body = self.translator.build_body(&req, true);
        debug!(model = %req.model, tools = req.tools.len(), "sending anthropic request");

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = parse_retry_after(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            let mut err = ProviderError::from_status(status, format!("anthropic error {status}: {text}"));
            if let Some(h) = retry_after {
                err = err.with_retry_after(h);
            }
            return Err(err);
        }

        // SSE lines can be split across TCP chunks, so a remainder buffer is
        // carried forward.  Only complete lines (terminated by '\n') are
        // parsed; anything left over is prepended to the next chunk.
        let byte_stream = resp.bytes_stream();
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let text = match chunk {
                    Ok(b) => String::from_utf8_lossy(&b).to_string(),
                    Err(e) => {
                        let err = ProviderError::new(ErrorKind::Internal, e.to_string());
                        return futures::future::ready(Some(vec![Err(err)]));
                    }
                };
                buf.push_str(&text);
                let mut deltas = Vec::new();
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim_end_matches('\r').to_string();
                    buf.drain(..=pos);
                    if let Some(data) = line.strip_prefix("data: ") {
                        if let Ok(v) = serde_json::from_str::<Value>(data.trim()) {
                            deltas.push(Ok(parse_anthropic_event(&v)));
                        }
                    }
                }
                futures::future::ready(Some(deltas))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Parse a `Retry-After` header.  Only the delta-seconds form is honoured;
/// the HTTP-date form is rare from model providers and falls through to the
/// policy's own backoff.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_name_and_model() {
        let p = AnthropicProvider::new("claude-sonnet-4-5".into(), None, None);
        assert_eq!(p.name(), "anthropic");
        assert_eq!(p.model_name(), "claude-sonnet-4-5");
    }

    #[tokio::test]
    async fn missing_key_is_invalid_request() {
        let p = AnthropicProvider::new("m".into(), None, None);
        let err = p.stream(CompletionRequest::default()).await.err().unwrap();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn retry_after_seconds_parses() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
    }

    #[test]
    fn retry_after_date_form_is_ignored() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }
}
