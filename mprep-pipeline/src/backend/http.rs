//! HTTP implementation of the backend API
//!
//! Thin JSON client over reqwest. AI-backed routes (formula suggestion and
//! cleanup batches) are paced through a governor rate limiter so a large
//! worker pool cannot stampede the backend's AI budget.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use mprep_common::config::PipelineConfig;
use mprep_common::manifest::{ManifestRow, OrderSummary};

use super::types::*;
use super::{BackendApi, BackendError};

const USER_AGENT: &str = concat!("mprep/", env!("CARGO_PKG_VERSION"));

type DirectLimiter = governor::RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Backend client speaking the REST surface described in [`BackendApi`].
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    ai_limiter: Option<DirectLimiter>,
}

impl HttpBackend {
    pub fn new(config: &PipelineConfig) -> Result<Self, BackendError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout());
        if let Some(token) = &config.api_token {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| BackendError::Parse("api_token contains invalid characters".into()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }
        let client = builder.build()?;

        let ai_limiter = std::num::NonZeroU32::new(config.requests_per_second)
            .map(|rps| governor::RateLimiter::direct(governor::Quota::per_second(rps)));

        Ok(Self {
            client,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            ai_limiter,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Wait for AI-route budget. No-op when pacing is disabled.
    async fn pace_ai(&self) {
        if let Some(limiter) = &self.ai_limiter {
            limiter.until_ready().await;
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        tracing::debug!(path = %path, "GET");
        let response = self.client.get(self.url(path)).send().await?;
        decode(response).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, BackendError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        tracing::debug!(path = %path, "POST");
        let response = self.client.post(self.url(path)).json(body).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BackendError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()));
    }
    let code = status.as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body);
    Err(match code {
        404 => BackendError::NotFound(message),
        409 => BackendError::Conflict(message),
        429 | 503 => BackendError::Busy(code),
        _ => BackendError::Api { status: code, message },
    })
}

/// Pull a human-readable message out of an error body. The backend uses
/// `{"error": "..."}`; DRF-style `{"detail": "..."}` appears on auth
/// failures. Anything else is passed through truncated.
fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "detail"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "(empty response body)".to_string();
    }
    let mut message: String = trimmed.chars().take(200).collect();
    if message.len() < trimmed.len() {
        message.push_str("...");
    }
    message
}

#[derive(serde::Deserialize)]
struct RowsCleared {
    rows_cleared: u64,
}

#[derive(serde::Deserialize)]
struct RowsUpdated {
    rows_updated: u64,
}

#[derive(serde::Deserialize)]
struct Suggestions {
    suggestions: Vec<FormulaSuggestion>,
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn fetch_order(&self, order_id: i64) -> Result<OrderSummary, BackendError> {
        self.get_json(&format!("/api/orders/{}/", order_id)).await
    }

    async fn fetch_rows(&self, order_id: i64) -> Result<Vec<ManifestRow>, BackendError> {
        self.get_json(&format!("/api/orders/{}/manifest-rows/", order_id))
            .await
    }

    async fn suggest_formulas(
        &self,
        order_id: i64,
        template: Option<&str>,
    ) -> Result<Vec<FormulaSuggestion>, BackendError> {
        self.pace_ai().await;
        let body = json!({ "template": template });
        let out: Suggestions = self
            .post_json(&format!("/api/orders/{}/suggest-formulas/", order_id), &body)
            .await?;
        Ok(out.suggestions)
    }

    async fn commit_standardize(
        &self,
        order_id: i64,
        formulas: &FormulaSet,
        save_template: bool,
    ) -> Result<CommitOutcome, BackendError> {
        let body = json!({ "formulas": formulas, "save_template": save_template });
        self.post_json(&format!("/api/orders/{}/process-manifest/", order_id), &body)
            .await
    }

    async fn clear_manifest_rows(&self, order_id: i64) -> Result<u64, BackendError> {
        let out: RowsCleared = self
            .post_json(&format!("/api/orders/{}/clear-manifest/", order_id), &json!({}))
            .await?;
        Ok(out.rows_cleared)
    }

    async fn ai_cleanup_batch(
        &self,
        order_id: i64,
        offset: u64,
        batch_size: u64,
        model: Option<&str>,
    ) -> Result<CleanupBatchOutcome, BackendError> {
        self.pace_ai().await;
        let body = json!({
            "offset": offset,
            "batch_size": batch_size,
            "model": model,
        });
        self.post_json(&format!("/api/orders/{}/ai-cleanup-batch/", order_id), &body)
            .await
    }

    async fn cleanup_status(&self, order_id: i64) -> Result<CleanupStatus, BackendError> {
        self.get_json(&format!("/api/orders/{}/ai-cleanup-status/", order_id))
            .await
    }

    async fn cancel_cleanup(&self, order_id: i64) -> Result<CancelOutcome, BackendError> {
        self.post_json(&format!("/api/orders/{}/ai-cleanup-cancel/", order_id), &json!({}))
            .await
    }

    async fn run_matching(
        &self,
        order_id: i64,
        use_ai: bool,
    ) -> Result<MatchRunOutcome, BackendError> {
        let body = json!({ "use_ai": use_ai });
        self.post_json(&format!("/api/orders/{}/run-matching/", order_id), &body)
            .await
    }

    async fn get_match_results(&self, order_id: i64) -> Result<MatchResults, BackendError> {
        self.get_json(&format!("/api/orders/{}/match-results/", order_id))
            .await
    }

    async fn review_matches(
        &self,
        order_id: i64,
        decisions: &[RowDecision],
    ) -> Result<ReviewOutcome, BackendError> {
        let body = json!({ "decisions": decisions });
        self.post_json(&format!("/api/orders/{}/review-matches/", order_id), &body)
            .await
    }

    async fn undo_matching(&self, order_id: i64) -> Result<u64, BackendError> {
        let out: RowsCleared = self
            .post_json(&format!("/api/orders/{}/undo-matching/", order_id), &json!({}))
            .await?;
        Ok(out.rows_cleared)
    }

    async fn update_pricing(
        &self,
        order_id: i64,
        updates: &[PriceUpdate],
    ) -> Result<u64, BackendError> {
        let body = json!({ "rows": updates });
        let out: RowsUpdated = self
            .post_json(&format!("/api/orders/{}/update-pricing/", order_id), &body)
            .await?;
        Ok(out.rows_updated)
    }

    async fn clear_pricing(&self, order_id: i64) -> Result<u64, BackendError> {
        let out: RowsCleared = self
            .post_json(&format!("/api/orders/{}/clear-pricing/", order_id), &json!({}))
            .await?;
        Ok(out.rows_cleared)
    }

    async fn finalize_rows(
        &self,
        order_id: i64,
        rows: &[FinalizeRow],
    ) -> Result<FinalizeOutcome, BackendError> {
        let body = json!({ "rows": rows });
        self.post_json(&format!("/api/orders/{}/finalize-rows/", order_id), &body)
            .await
    }

    async fn list_models(&self) -> Result<ModelCatalog, BackendError> {
        self.get_json("/api/ai/models/").await
    }
}
