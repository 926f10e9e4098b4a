//! Client for the external clinical-records lookup API.
//!
//! Two endpoints: identity by phone number, and visit history by patient
//! number. Calls go through a [`LookupTransport`] seam so the pipeline
//! can be exercised without a live endpoint; the retry/backoff policy
//! and inter-request pacing live in [`EnrichmentClient`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use recon_core::{filter_recent_visits, Candidate, EnrichedContact, IdentityDetail, VisitRecord};

pub const CRATE_NAME: &str = "recon-enrich";

pub const IDENTITY_ENDPOINT: &str = "/userDetailWithPhoneNumber.php";
pub const HISTORY_ENDPOINT: &str = "/findPatientTransactions.php";

/// Per-tenant credentials for the lookup API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    pub app_id: i64,
    pub country_code: String,
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup request timed out")]
    Timeout,
    #[error("could not connect to lookup endpoint")]
    Connect,
    #[error("lookup endpoint returned http {status}")]
    Status { status: u16 },
    #[error("lookup transport failed: {0}")]
    Transport(String),
    #[error("lookup reply could not be decoded: {0}")]
    Body(String),
}

impl LookupError {
    /// Timeouts, connection failures and server-side statuses warrant a
    /// retry; 4xx statuses and malformed bodies never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Connect => true,
            Self::Status { status } => *status >= 500 || *status == 429,
            Self::Transport(_) | Self::Body(_) => false,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect
        } else if err.is_decode() {
            Self::Body(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Linear backoff: the wait before attempt `n + 1` is `base_delay * n`.
/// With a zero base delay retries fire immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(0),
        }
    }
}

impl BackoffPolicy {
    /// Delay after the failed attempt with 1-based index `attempt`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        self.base_delay.saturating_mul(attempt as u32)
    }
}

#[derive(Debug, Serialize)]
struct IdentityRequest<'a> {
    #[serde(rename = "appId")]
    app_id: String,
    country_code: &'a str,
    phone_number: &'a str,
}

#[derive(Debug, Serialize)]
struct HistoryRequest {
    #[serde(rename = "appId")]
    app_id: i64,
    upn: i64,
}

/// The endpoints signal failure in-band with `{"error": true, ...}`
/// instead of an http status, so replies are decoded untagged.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdentityReply {
    Failure { error: bool, message: String },
    Success { patients: Vec<IdentityDetail> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryReply {
    Failure {
        error: bool,
        message: String,
    },
    Success {
        transactions: Vec<VisitRecord>,
        #[serde(default)]
        total_count: i64,
    },
}

#[async_trait]
pub trait LookupTransport: Send + Sync {
    async fn identity_by_phone(
        &self,
        ctx: &TenantContext,
        phone_number: &str,
    ) -> Result<Vec<IdentityDetail>, LookupError>;

    async fn visit_history(
        &self,
        ctx: &TenantContext,
        upn: i64,
    ) -> Result<Vec<VisitRecord>, LookupError>;
}

/// Production transport backed by reqwest.
#[derive(Debug)]
pub struct HttpLookupTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLookupTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<R, LookupError> {
        let url = format!("{}{endpoint}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(LookupError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LookupError::Status {
                status: status.as_u16(),
            });
        }

        resp.json::<R>().await.map_err(LookupError::from_reqwest)
    }
}

#[async_trait]
impl LookupTransport for HttpLookupTransport {
    async fn identity_by_phone(
        &self,
        ctx: &TenantContext,
        phone_number: &str,
    ) -> Result<Vec<IdentityDetail>, LookupError> {
        let request = IdentityRequest {
            app_id: ctx.app_id.to_string(),
            country_code: &ctx.country_code,
            phone_number,
        };
        match self.post_json(IDENTITY_ENDPOINT, &request).await? {
            // A structured error reply means "no such patient", which
            // is an ordinary business outcome, not a failure.
            IdentityReply::Failure { error: _, message } => {
                debug!(%message, "identity endpoint reported no match");
                Ok(Vec::new())
            }
            IdentityReply::Success { patients } => Ok(patients),
        }
    }

    async fn visit_history(
        &self,
        ctx: &TenantContext,
        upn: i64,
    ) -> Result<Vec<VisitRecord>, LookupError> {
        let request = HistoryRequest {
            app_id: ctx.app_id,
            upn,
        };
        match self.post_json(HISTORY_ENDPOINT, &request).await? {
            HistoryReply::Failure { error: _, message } => {
                debug!(%message, "history endpoint reported no transactions");
                Ok(Vec::new())
            }
            HistoryReply::Success {
                transactions,
                total_count: _,
            } => Ok(transactions),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Pause after every successful call, and the base of the retry
    /// backoff.
    pub request_delay: Duration,
    pub backoff: BackoffPolicy,
    /// Candidates per chunk in [`EnrichmentClient::enrich_all`].
    pub chunk_size: usize,
    /// Width of the visit recency window in days.
    pub recency_days: i64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(0),
            backoff: BackoffPolicy::default(),
            chunk_size: 10,
            recency_days: 90,
        }
    }
}

/// Outcome of enriching a candidate list. Every candidate yields a
/// contact; the ones whose lookups failed outright come back
/// un-enriched and are tallied in `lookup_failures`.
#[derive(Debug, Default)]
pub struct EnrichReport {
    pub contacts: Vec<EnrichedContact>,
    pub lookup_failures: u64,
}

pub struct EnrichmentClient {
    transport: Box<dyn LookupTransport>,
    config: EnrichmentConfig,
}

impl EnrichmentClient {
    pub fn new(transport: Box<dyn LookupTransport>, config: EnrichmentConfig) -> Self {
        Self { transport, config }
    }

    async fn call_with_retry<T, F, Fut>(&self, mut call: F) -> Result<T, LookupError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, LookupError>>,
    {
        let max_attempts = self.config.backoff.max_attempts.max(1);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => {
                    tokio::time::sleep(self.config.request_delay).await;
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.backoff.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, error = %err, "lookup attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Enrich one candidate: identity lookup, then visit history when
    /// an identity with a numeric patient number came back, then the
    /// recency-window filter.
    ///
    /// `identity_found` and `history_found` describe what survives the
    /// filter, not the raw replies.
    pub async fn enrich(
        &self,
        candidate: &Candidate,
        ctx: &TenantContext,
        first_contact: Option<NaiveDateTime>,
        now: NaiveDateTime,
    ) -> Result<EnrichedContact, LookupError> {
        let patients = self
            .call_with_retry(|| {
                self.transport
                    .identity_by_phone(ctx, &candidate.phone_number)
            })
            .await?;
        let identity = patients.into_iter().next();

        let mut visits = Vec::new();
        if let Some(identity) = &identity {
            match identity.external_id.trim().parse::<i64>() {
                Ok(upn) => {
                    let history = self
                        .call_with_retry(|| self.transport.visit_history(ctx, upn))
                        .await?;
                    visits =
                        filter_recent_visits(&history, self.config.recency_days, first_contact, now);
                }
                Err(_) => {
                    warn!(
                        contact_id = candidate.contact_id,
                        external_id = %identity.external_id,
                        "patient number is not numeric, skipping history lookup"
                    );
                }
            }
        }

        let identity_found = identity.is_some();
        let history_found = !visits.is_empty();
        Ok(EnrichedContact {
            contact_id: candidate.contact_id,
            channel_type: candidate.channel_type.clone(),
            language: candidate.language.clone(),
            phone_number: candidate.phone_number.clone(),
            tenant_id: candidate.tenant_id.clone(),
            identity,
            visits,
            identity_found,
            history_found,
            first_contact_at: first_contact,
        })
    }

    /// Enrich a full candidate list in chunks, pausing between chunks.
    ///
    /// A candidate whose lookups fail after retries resolves to an
    /// un-enriched contact, the same shape as a no-match reply; the
    /// failure is counted but never aborts the chunk.
    pub async fn enrich_all(
        &self,
        candidates: &[Candidate],
        ctx: &TenantContext,
        first_contacts: impl Fn(i64) -> Option<NaiveDateTime>,
        now: NaiveDateTime,
    ) -> EnrichReport {
        let chunk_size = self.config.chunk_size.max(1);
        let mut report = EnrichReport::default();

        for (index, chunk) in candidates.chunks(chunk_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.request_delay.saturating_mul(5)).await;
            }
            for candidate in chunk {
                let first_contact = first_contacts(candidate.contact_id);
                match self.enrich(candidate, ctx, first_contact, now).await {
                    Ok(contact) => report.contacts.push(contact),
                    Err(err) => {
                        warn!(
                            contact_id = candidate.contact_id,
                            tenant_id = %ctx.tenant_id,
                            error = %err,
                            "enrichment failed for contact"
                        );
                        report.lookup_failures += 1;
                        report.contacts.push(EnrichedContact {
                            contact_id: candidate.contact_id,
                            channel_type: candidate.channel_type.clone(),
                            language: candidate.language.clone(),
                            phone_number: candidate.phone_number.clone(),
                            tenant_id: candidate.tenant_id.clone(),
                            identity: None,
                            visits: Vec::new(),
                            identity_found: false,
                            history_found: false,
                            first_contact_at: first_contact,
                        });
                    }
                }
            }
        }

        report
    }
}
