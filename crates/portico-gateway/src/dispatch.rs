use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use portico_catalog::{BindingPolicy, Catalog, ProviderBinding, ProviderId};
use portico_config::DispatchConfig;
use portico_core::{
    AssistantMessage, Attempt, ChatRequest, ChatResponse, Choice, CostBreakdown, FinishReason,
    GatewayError, LogRecord, ResponseMetadata, Result, SseFrame, Usage,
};
use portico_providers::{
    AdapterRegistry, CredentialMode, CredentialResolver, OrgContext, ParsedResponse,
    ProviderAdapter, UpstreamBody, UpstreamClient, UpstreamReply,
};

use crate::breaker::ProviderBreakers;
use crate::cache::ResponseCache;
use crate::cost::{compute_cost, estimate_cost};
use crate::ledger::CreditLedger;
use crate::logpipe::LogHandle;

/// What the ingress handler gets back: a finished response or a stream
/// to relay.
#[derive(Debug)]
pub enum DispatchOutcome {
    Buffered(ChatResponse),
    Stream {
        request_id: String,
        /// The resolved model id, echoed in stream chunks.
        model: String,
        created: i64,
        frames: mpsc::Receiver<SseFrame>,
    },
}

/// One runnable (binding, adapter) pair.
#[derive(Clone)]
struct Candidate {
    binding: ProviderBinding,
    adapter: Arc<dyn ProviderAdapter>,
}

type Attempts = Arc<Mutex<Vec<Attempt>>>;

/// The request-dispatch engine. Owns candidate selection, the
/// retry/fallback loop, streaming relay, and all accounting around one
/// upstream call per attempt. Cheap to clone; every request is handled
/// on the caller's task except stream relays, which move to their own.
#[derive(Clone)]
pub struct Dispatcher {
    catalog: Arc<Catalog>,
    adapters: AdapterRegistry,
    upstream: Arc<dyn UpstreamClient>,
    credentials: CredentialResolver,
    cache: ResponseCache,
    ledger: Arc<dyn CreditLedger>,
    logs: LogHandle,
    breakers: ProviderBreakers,
    cfg: DispatchConfig,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<Catalog>,
        adapters: AdapterRegistry,
        upstream: Arc<dyn UpstreamClient>,
        credentials: CredentialResolver,
        cache: ResponseCache,
        ledger: Arc<dyn CreditLedger>,
        logs: LogHandle,
        cfg: DispatchConfig,
    ) -> Self {
        let breakers = ProviderBreakers::new(
            cfg.circuit_failure_threshold,
            Duration::from_secs(cfg.circuit_open_secs),
        );
        Self {
            catalog,
            adapters,
            upstream,
            credentials,
            cache,
            ledger,
            logs,
            breakers,
            cfg,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Dispatch one authenticated request. Every outcome — success,
    /// rejection, or upstream failure — yields exactly one log record;
    /// for streams the relay task writes it when the stream ends.
    pub async fn dispatch(&self, org: &OrgContext, req: ChatRequest) -> Result<DispatchOutcome> {
        let request_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
        let started = Instant::now();
        let attempts: Attempts = Arc::new(Mutex::new(Vec::new()));

        match self
            .dispatch_inner(org, &req, &request_id, started, &attempts)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let mut rec = LogRecord::rejected(
                    &request_id,
                    &org.org_id,
                    &req.model,
                    e.kind(),
                    e.http_status(),
                );
                rec.project_id = org.project_id.clone();
                rec.duration_ms = started.elapsed().as_millis() as u64;
                rec.attempts = attempts.lock().clone();
                self.logs.enqueue(rec);
                Err(e)
            }
        }
    }

    async fn dispatch_inner(
        &self,
        org: &OrgContext,
        req: &ChatRequest,
        request_id: &str,
        started: Instant,
        attempts: &Attempts,
    ) -> Result<DispatchOutcome> {
        req.validate()?;

        let (entry, pinned_from_model) = self.catalog.lookup(&req.model)?;
        let pinned = match &req.provider {
            Some(p) => Some(ProviderId::parse(p).ok_or_else(|| {
                GatewayError::BadRequest(format!("unknown provider: {p}"))
            })?),
            None => pinned_from_model,
        };
        if let Some(p) = pinned {
            let binding = entry.binding_for(p).ok_or_else(|| {
                GatewayError::BadRequest(format!("{} has no {p} binding", entry.id))
            })?;
            if binding.is_deactivated() {
                return Err(GatewayError::BadRequest(format!(
                    "the {p} binding for {} is deactivated",
                    entry.id
                )));
            }
        }

        let mut bindings =
            self.catalog
                .list_bindings(entry, pinned, &BindingPolicy::default());
        if let Some(p) = pinned {
            bindings.retain(|b| b.provider == p);
        }
        let total_active = bindings.len();
        bindings.retain(|b| org.provider_allowed(b.provider));
        if bindings.is_empty() && total_active > 0 {
            return Err(GatewayError::Forbidden(format!(
                "no allowed provider serves {}",
                entry.id
            )));
        }

        // Streaming downgrade: when no candidate can stream, serve
        // buffered or fail per policy.
        let stream_possible = bindings.iter().any(|b| b.caps.streaming);
        let effective_stream = if req.stream && !stream_possible {
            if self.cfg.stream_downgrade {
                debug!(model = %entry.id, "no streaming binding, downgrading to buffered");
                false
            } else {
                return Err(GatewayError::BadRequest(format!(
                    "streaming is not available for {}",
                    entry.id
                )));
            }
        } else {
            req.stream
        };

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut last_caps_err: Option<GatewayError> = None;
        for binding in bindings {
            let Some(adapter) = self.adapters.get(binding.provider) else {
                continue;
            };
            if effective_stream && !binding.caps.streaming {
                continue;
            }
            match adapter.check_capabilities(req, binding) {
                Ok(()) => candidates.push(Candidate {
                    binding: binding.clone(),
                    adapter,
                }),
                Err(e) => last_caps_err = Some(e),
            }
        }
        if candidates.is_empty() {
            return Err(last_caps_err.unwrap_or(GatewayError::UpstreamUnavailable {
                model: entry.id.clone(),
                attempts: 0,
            }));
        }

        // Credit pre-check with an upper bound across candidates.
        let prompt_estimate = req.estimate_prompt_tokens();
        let output_budget = req.max_tokens.unwrap_or(self.cfg.default_max_tokens);
        let estimate = candidates
            .iter()
            .map(|c| estimate_cost(&c.binding, prompt_estimate, output_budget))
            .fold(0.0_f64, f64::max);
        self.ledger.precheck(&org.org_id, estimate).await?;

        if effective_stream {
            return Ok(self.start_stream(
                org,
                req,
                request_id,
                started,
                attempts,
                entry.id.clone(),
                candidates,
            ));
        }

        // Buffered path, cached when deterministic.
        if self.cache.enabled() && req.is_deterministic() {
            let key = ResponseCache::fingerprint(&entry.id, req);
            let structured = req.wants_json_output();
            let entry_id = entry.id.clone();
            let (response, hit) = self
                .cache
                .get_or_compute(&key, structured, || {
                    self.execute_buffered(
                        org, req, request_id, started, attempts, &entry_id, pinned, &candidates,
                    )
                })
                .await?;
            if hit {
                let mut response = (*response).clone();
                response.metadata.cache_hit = true;
                self.log_completion(
                    org,
                    req,
                    request_id,
                    started,
                    &response.usage,
                    Some(&response),
                    CostBreakdown::zero(),
                    "ok",
                    200,
                    None,
                    Vec::new(),
                    true,
                    false,
                );
                return Ok(DispatchOutcome::Buffered(response));
            }
            return Ok(DispatchOutcome::Buffered((*response).clone()));
        }

        let response = self
            .execute_buffered(
                org, req, request_id, started, attempts, &entry.id, pinned, &candidates,
            )
            .await?;
        Ok(DispatchOutcome::Buffered(response))
    }

    /// The buffered attempt loop: walk candidates, retrying transient
    /// failures per candidate, then settle usage, cost, debit, and log.
    #[allow(clippy::too_many_arguments)]
    async fn execute_buffered(
        &self,
        org: &OrgContext,
        req: &ChatRequest,
        request_id: &str,
        started: Instant,
        attempts: &Attempts,
        entry_id: &str,
        pinned: Option<ProviderId>,
        candidates: &[Candidate],
    ) -> Result<ChatResponse> {
        let mut suspect_auth: Vec<ProviderId> = Vec::new();

        for candidate in candidates {
            let provider = candidate.binding.provider;
            if suspect_auth.contains(&provider) {
                continue;
            }
            if !self.breakers.allow(provider) {
                attempts.lock().push(Attempt {
                    provider: provider.to_string(),
                    outcome: "circuit_open".into(),
                    status: None,
                });
                continue;
            }
            let cred = match self.credentials.resolve(org, provider) {
                Ok(c) => c,
                Err(e @ GatewayError::ProviderNotConfigured(_)) => {
                    debug!(provider = %provider, error = %e, "skipping unconfigured candidate");
                    attempts.lock().push(Attempt {
                        provider: provider.to_string(),
                        outcome: e.kind().into(),
                        status: None,
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let reply = match self
                .send_with_retry(&*candidate.adapter, req, &candidate.binding, &cred, false, attempts, request_id)
                .await
            {
                Ok(reply) => reply,
                Err(e) if should_advance(&e) => {
                    if matches!(e, GatewayError::UpstreamAuth { .. }) {
                        suspect_auth.push(provider);
                    }
                    debug!(provider = %provider, error = %e, "candidate failed, advancing");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let status = reply.status;
            let UpstreamBody::Buffered(bytes) = reply.body else {
                return Err(GatewayError::Internal(
                    "buffered call returned a streaming body".into(),
                ));
            };

            let parsed = match candidate.adapter.parse_response(&bytes) {
                Ok(p) => p,
                Err(e) => {
                    warn!(provider = %provider, error = %e, "unparseable upstream response");
                    self.breakers.record_failure(provider);
                    attempts.lock().push(Attempt {
                        provider: provider.to_string(),
                        outcome: "unparseable_response".into(),
                        status: Some(status),
                    });
                    continue;
                }
            };

            self.breakers.record_success(provider);
            attempts.lock().push(Attempt {
                provider: provider.to_string(),
                outcome: "ok".into(),
                status: Some(status),
            });

            let byok = cred.mode == CredentialMode::Byok;
            let response = assemble_response(
                request_id,
                req,
                entry_id,
                &candidate.binding,
                pinned,
                parsed,
            );
            let cost = compute_cost(&candidate.binding, &response.usage);
            if !byok && cost.total > 0.0 {
                if let Err(e) = self
                    .ledger
                    .debit(&org.org_id, request_id, cost.total)
                    .await
                {
                    warn!(error = %e, request_id, "post-usage debit failed");
                }
            }
            self.log_completion(
                org,
                req,
                request_id,
                started,
                &response.usage,
                Some(&response),
                cost,
                "ok",
                200,
                None,
                attempts.lock().clone(),
                false,
                byok,
            );
            return Ok(response);
        }

        Err(GatewayError::UpstreamUnavailable {
            model: entry_id.to_string(),
            attempts: attempts.lock().len(),
        })
    }

    /// Send one candidate's request, retrying transient failures with
    /// bounded exponential backoff. Honors upstream Retry-After hints.
    #[allow(clippy::too_many_arguments)]
    async fn send_with_retry(
        &self,
        adapter: &dyn ProviderAdapter,
        req: &ChatRequest,
        binding: &ProviderBinding,
        cred: &portico_providers::Credential,
        stream: bool,
        attempts: &Attempts,
        request_id: &str,
    ) -> Result<UpstreamReply> {
        let deadline = Duration::from_secs(self.cfg.upstream_timeout_secs);
        let provider = binding.provider;

        for attempt in 0..=self.cfg.max_retries {
            let upstream_req = adapter.build_request(req, binding, cred)?;
            let translated = upstream_req.translated;
            let (err, status) = match self.upstream.execute(upstream_req, deadline, stream).await
            {
                Ok(reply) if (200..300).contains(&reply.status) => return Ok(reply),
                Ok(reply) => {
                    let status = reply.status;
                    (classify_reply(provider, &reply, translated), Some(status))
                }
                Err(e) => (e, None),
            };

            attempts.lock().push(Attempt {
                provider: provider.to_string(),
                outcome: err.kind().into(),
                status,
            });
            self.breakers.record_failure(provider);

            if is_retryable(&err) && attempt < self.cfg.max_retries {
                let delay = retry_delay(&err, attempt, self.cfg.base_delay_ms, request_id);
                warn!(
                    provider = %provider,
                    attempt = attempt + 1,
                    max = self.cfg.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            } else {
                return Err(err);
            }
        }

        unreachable!("send_with_retry loop always returns before exhausting attempts")
    }

    /// Hand the streaming attempt loop to its own task and return the
    /// outbound frame channel immediately.
    #[allow(clippy::too_many_arguments)]
    fn start_stream(
        &self,
        org: &OrgContext,
        req: &ChatRequest,
        request_id: &str,
        started: Instant,
        attempts: &Attempts,
        entry_id: String,
        candidates: Vec<Candidate>,
    ) -> DispatchOutcome {
        let (tx, rx) = mpsc::channel::<SseFrame>(256);
        let this = self.clone();
        let org = org.clone();
        let req = req.clone();
        let rid = request_id.to_string();
        let attempts = Arc::clone(attempts);
        let model = entry_id.clone();

        tokio::spawn(async move {
            this.run_stream(org, req, rid, started, attempts, entry_id, candidates, tx)
                .await;
        });

        DispatchOutcome::Stream {
            request_id: request_id.to_string(),
            model,
            created: chrono::Utc::now().timestamp(),
            frames: rx,
        }
    }

    /// The streaming attempt loop and relay. A candidate may be retried
    /// or advanced only while nothing has been delivered; the first
    /// forwarded delta seals the request to its provider.
    #[allow(clippy::too_many_arguments)]
    async fn run_stream(
        self,
        org: OrgContext,
        req: ChatRequest,
        request_id: String,
        started: Instant,
        attempts: Attempts,
        entry_id: String,
        candidates: Vec<Candidate>,
        tx: mpsc::Sender<SseFrame>,
    ) {
        let mut delivered = false;
        let mut delivered_chars = 0usize;
        let mut ttft_ms: Option<u64> = None;
        let mut suspect_auth: Vec<ProviderId> = Vec::new();

        'candidates: for candidate in &candidates {
            let provider = candidate.binding.provider;
            if suspect_auth.contains(&provider) {
                continue;
            }
            if !self.breakers.allow(provider) {
                attempts.lock().push(Attempt {
                    provider: provider.to_string(),
                    outcome: "circuit_open".into(),
                    status: None,
                });
                continue;
            }
            let cred = match self.credentials.resolve(&org, provider) {
                Ok(c) => c,
                Err(e @ GatewayError::ProviderNotConfigured(_)) => {
                    attempts.lock().push(Attempt {
                        provider: provider.to_string(),
                        outcome: e.kind().into(),
                        status: None,
                    });
                    continue;
                }
                Err(e) => {
                    self.seal_stream_error(&org, &req, &request_id, started, &attempts, e, &tx)
                        .await;
                    return;
                }
            };

            let reply = match self
                .send_with_retry(
                    &*candidate.adapter,
                    &req,
                    &candidate.binding,
                    &cred,
                    true,
                    &attempts,
                    &request_id,
                )
                .await
            {
                Ok(reply) => reply,
                Err(e) if should_advance(&e) => {
                    if matches!(e, GatewayError::UpstreamAuth { .. }) {
                        suspect_auth.push(provider);
                    }
                    continue;
                }
                Err(e) => {
                    self.seal_stream_error(&org, &req, &request_id, started, &attempts, e, &tx)
                        .await;
                    return;
                }
            };

            let mut frames = match reply.body {
                UpstreamBody::Stream(bytes) => candidate.adapter.parse_stream(bytes),
                UpstreamBody::Buffered(bytes) => {
                    // Upstream served the request buffered anyway —
                    // synthesize the canonical frames.
                    match candidate.adapter.parse_response(&bytes) {
                        Ok(parsed) => frames_from_parsed(parsed),
                        Err(e) => {
                            warn!(provider = %provider, error = %e, "unparseable upstream response");
                            self.breakers.record_failure(provider);
                            attempts.lock().push(Attempt {
                                provider: provider.to_string(),
                                outcome: "unparseable_response".into(),
                                status: Some(reply.status),
                            });
                            continue;
                        }
                    }
                }
            };

            let byok = cred.mode == CredentialMode::Byok;
            while let Some(frame) = frames.recv().await {
                match frame {
                    SseFrame::Delta(delta) => {
                        if ttft_ms.is_none() {
                            ttft_ms = Some(started.elapsed().as_millis() as u64);
                        }
                        delivered_chars += delta.content.as_deref().map_or(0, str::len)
                            + delta.reasoning.as_deref().map_or(0, str::len);
                        if tx.send(SseFrame::Delta(delta)).await.is_err() {
                            // Client went away; release upstream and log
                            // what was delivered.
                            let usage = self.estimated_usage(&req, delivered_chars);
                            self.log_completion(
                                &org,
                                &req,
                                &request_id,
                                started,
                                &usage,
                                None,
                                CostBreakdown::zero(),
                                "client_disconnect",
                                200,
                                ttft_ms,
                                attempts.lock().clone(),
                                false,
                                byok,
                            );
                            return;
                        }
                        delivered = true;
                    }
                    SseFrame::Done {
                        finish_reason,
                        usage,
                    } => {
                        self.breakers.record_success(provider);
                        attempts.lock().push(Attempt {
                            provider: provider.to_string(),
                            outcome: "ok".into(),
                            status: Some(200),
                        });
                        let cost = compute_cost(&candidate.binding, &usage);
                        if !byok && cost.total > 0.0 {
                            if let Err(e) = self
                                .ledger
                                .debit(&org.org_id, &request_id, cost.total)
                                .await
                            {
                                warn!(error = %e, request_id = %request_id, "post-usage debit failed");
                            }
                        }
                        let done_delivered = tx
                            .send(SseFrame::Done {
                                finish_reason,
                                usage: usage.clone(),
                            })
                            .await
                            .is_ok();
                        if !done_delivered && !byok && cost.total > 0.0 {
                            // Debited but the terminal frame never reached
                            // the client — undo the charge.
                            if let Err(e) = self.ledger.refund(&org.org_id, &request_id).await {
                                warn!(error = %e, request_id = %request_id, "refund failed");
                            }
                        }
                        let outcome = if done_delivered { "ok" } else { "client_disconnect" };
                        self.log_completion(
                            &org,
                            &req,
                            &request_id,
                            started,
                            &usage,
                            None,
                            cost,
                            outcome,
                            200,
                            ttft_ms,
                            attempts.lock().clone(),
                            false,
                            byok,
                        );
                        return;
                    }
                    SseFrame::Error { message, kind } => {
                        self.breakers.record_failure(provider);
                        attempts.lock().push(Attempt {
                            provider: provider.to_string(),
                            outcome: kind.clone(),
                            status: None,
                        });
                        let retryable =
                            matches!(kind.as_str(), "transient" | "rate_limited");
                        if !delivered && retryable {
                            continue 'candidates;
                        }
                        // Bytes are out — the request is sealed.
                        let _ = tx
                            .send(SseFrame::Error {
                                message,
                                kind: "stream_mid_flight".into(),
                            })
                            .await;
                        let usage = self.estimated_usage(&req, delivered_chars);
                        self.log_completion(
                            &org,
                            &req,
                            &request_id,
                            started,
                            &usage,
                            None,
                            CostBreakdown::zero(),
                            "stream_mid_flight",
                            200,
                            ttft_ms,
                            attempts.lock().clone(),
                            false,
                            byok,
                        );
                        return;
                    }
                }
            }

            // Frame source closed without a terminal frame.
            self.breakers.record_failure(provider);
            attempts.lock().push(Attempt {
                provider: provider.to_string(),
                outcome: "truncated_stream".into(),
                status: None,
            });
            if delivered {
                let _ = tx
                    .send(SseFrame::Error {
                        message: "upstream stream ended unexpectedly".into(),
                        kind: "stream_mid_flight".into(),
                    })
                    .await;
                let usage = self.estimated_usage(&req, delivered_chars);
                self.log_completion(
                    &org,
                    &req,
                    &request_id,
                    started,
                    &usage,
                    None,
                    CostBreakdown::zero(),
                    "stream_mid_flight",
                    200,
                    ttft_ms,
                    attempts.lock().clone(),
                    false,
                    byok,
                );
                return;
            }
        }

        // All candidates exhausted before anything was delivered.
        let err = GatewayError::UpstreamUnavailable {
            model: entry_id,
            attempts: attempts.lock().len(),
        };
        let _ = tx
            .send(SseFrame::Error {
                message: err.to_string(),
                kind: err.kind().into(),
            })
            .await;
        let mut rec = LogRecord::rejected(
            &request_id,
            &org.org_id,
            &req.model,
            err.kind(),
            err.http_status(),
        );
        rec.project_id = org.project_id.clone();
        rec.duration_ms = started.elapsed().as_millis() as u64;
        rec.attempts = attempts.lock().clone();
        self.logs.enqueue(rec);
    }

    async fn seal_stream_error(
        &self,
        org: &OrgContext,
        req: &ChatRequest,
        request_id: &str,
        started: Instant,
        attempts: &Attempts,
        err: GatewayError,
        tx: &mpsc::Sender<SseFrame>,
    ) {
        let _ = tx
            .send(SseFrame::Error {
                message: err.to_string(),
                kind: err.kind().into(),
            })
            .await;
        let mut rec = LogRecord::rejected(
            request_id,
            &org.org_id,
            &req.model,
            err.kind(),
            err.http_status(),
        );
        rec.project_id = org.project_id.clone();
        rec.duration_ms = started.elapsed().as_millis() as u64;
        rec.attempts = attempts.lock().clone();
        self.logs.enqueue(rec);
    }

    /// Best-effort usage for streams that never reached a terminal frame.
    fn estimated_usage(&self, req: &ChatRequest, delivered_chars: usize) -> Usage {
        Usage::from_counts(
            req.estimate_prompt_tokens(),
            ((delivered_chars / 4) as u32).max(u32::from(delivered_chars > 0)),
            None,
            None,
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn log_completion(
        &self,
        org: &OrgContext,
        req: &ChatRequest,
        request_id: &str,
        started: Instant,
        usage: &Usage,
        response: Option<&ChatResponse>,
        cost: CostBreakdown,
        outcome: &str,
        http_status: u16,
        ttft_ms: Option<u64>,
        attempts: Vec<Attempt>,
        cache_hit: bool,
        byok: bool,
    ) {
        let (used_model, used_provider) = match response {
            Some(r) => (
                Some(r.metadata.used_model.clone()),
                Some(r.metadata.used_provider.clone()),
            ),
            None => {
                let used = attempts
                    .iter()
                    .rev()
                    .find(|a| a.outcome == "ok")
                    .or_else(|| attempts.last())
                    .map(|a| a.provider.clone());
                (None, used)
            }
        };
        let (prompt, response_body) = if org.log_bodies {
            (
                serde_json::to_string(&req.messages).ok(),
                response.and_then(|r| {
                    r.choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                }),
            )
        } else {
            (None, None)
        };
        self.logs.enqueue(LogRecord {
            request_id: request_id.to_string(),
            org_id: org.org_id.clone(),
            project_id: org.project_id.clone(),
            requested_model: req.model.clone(),
            used_model,
            used_provider,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            reasoning_tokens: usage.reasoning_tokens.unwrap_or(0),
            cached_tokens: usage.cached_tokens(),
            cost,
            ttft_ms,
            duration_ms: started.elapsed().as_millis() as u64,
            outcome: outcome.to_string(),
            http_status,
            attempts,
            cache_hit,
            byok,
            prompt,
            response: response_body,
            created_at: chrono::Utc::now(),
        });
    }
}

/// Assemble the normalized response around a parsed upstream reply.
fn assemble_response(
    request_id: &str,
    req: &ChatRequest,
    entry_id: &str,
    binding: &ProviderBinding,
    pinned: Option<ProviderId>,
    parsed: ParsedResponse,
) -> ChatResponse {
    let mut choices: Vec<Choice> = parsed
        .choices
        .into_iter()
        .enumerate()
        .map(|(i, c)| Choice {
            index: i as u32,
            message: AssistantMessage {
                role: "assistant".into(),
                content: c.content,
                reasoning: c.reasoning,
                tool_calls: c.tool_calls,
                images: c.images,
            },
            finish_reason: c.finish_reason.unwrap_or(FinishReason::Stop),
        })
        .collect();
    if choices.is_empty() {
        choices.push(Choice {
            index: 0,
            message: AssistantMessage::text(""),
            finish_reason: FinishReason::Stop,
        });
    }

    ChatResponse {
        id: parsed.id.unwrap_or_else(|| request_id.to_string()),
        object: "chat.completion".into(),
        created: chrono::Utc::now().timestamp(),
        model: format!("{}/{entry_id}", binding.provider),
        choices,
        usage: parsed.usage,
        metadata: ResponseMetadata {
            requested_model: req.model.clone(),
            requested_provider: pinned.map(|p| p.to_string()),
            used_model: entry_id.to_string(),
            used_provider: binding.provider.to_string(),
            underlying_used_model: parsed
                .model
                .unwrap_or_else(|| binding.provider_model.clone()),
            cache_hit: false,
        },
    }
}

/// Synthesize canonical frames from a buffered parse, for upstreams that
/// ignored the stream flag.
fn frames_from_parsed(parsed: ParsedResponse) -> mpsc::Receiver<SseFrame> {
    let (tx, rx) = mpsc::channel(4);
    let first = parsed.choices.into_iter().next().unwrap_or_default();
    let finish_reason = first.finish_reason.unwrap_or(FinishReason::Stop);
    let delta = portico_core::StreamDelta {
        content: first.content,
        reasoning: first.reasoning,
        tool_calls: first
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, tc)| portico_core::ToolCallChunk {
                index: i as u32,
                id: Some(tc.id),
                name: Some(tc.function.name),
                arguments: Some(tc.function.arguments),
            })
            .collect(),
    };
    let usage = parsed.usage;
    tokio::spawn(async move {
        if !delta.is_empty() {
            let _ = tx.send(SseFrame::Delta(delta)).await;
        }
        let _ = tx
            .send(SseFrame::Done {
                finish_reason,
                usage,
            })
            .await;
    });
    rx
}

/// Errors that move the attempt loop to the next candidate instead of
/// failing the request. An upstream rejection advances only when the
/// adapter translated the body — a passthrough request the provider
/// called malformed would be rejected everywhere, so it fails
/// immediately.
fn should_advance(e: &GatewayError) -> bool {
    matches!(
        e,
        GatewayError::Transient { .. }
            | GatewayError::RateLimited { .. }
            | GatewayError::UpstreamAuth { .. }
            | GatewayError::CapabilityRefusal { .. }
            | GatewayError::ProviderNotConfigured(_)
            | GatewayError::UpstreamBadRequest {
                translated: true,
                ..
            }
    )
}

fn is_retryable(e: &GatewayError) -> bool {
    matches!(
        e,
        GatewayError::Transient { .. } | GatewayError::RateLimited { .. }
    )
}

/// Map a non-2xx upstream reply onto the dispatch error taxonomy.
/// `translated` is the adapter's marker for whether the body was
/// rewritten; only a 400 consults it — other odd statuses (404 wrong
/// deployment, 413, …) reflect this provider's binding, not the caller,
/// and stay advanceable.
fn classify_reply(provider: ProviderId, reply: &UpstreamReply, translated: bool) -> GatewayError {
    let detail: String = reply.body_text().chars().take(300).collect();
    match reply.status {
        401 | 403 => GatewayError::UpstreamAuth {
            provider: provider.to_string(),
            status: reply.status,
        },
        429 => GatewayError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs: reply.retry_after,
        },
        408 => GatewayError::Transient {
            provider: provider.to_string(),
            detail: format!("HTTP 408: {detail}"),
        },
        422 => GatewayError::CapabilityRefusal {
            provider: provider.to_string(),
            reason: detail,
        },
        400 => GatewayError::UpstreamBadRequest {
            provider: provider.to_string(),
            detail: format!("HTTP 400: {detail}"),
            translated,
        },
        s if s >= 500 => GatewayError::Transient {
            provider: provider.to_string(),
            detail: format!("HTTP {s}: {detail}"),
        },
        s => GatewayError::UpstreamBadRequest {
            provider: provider.to_string(),
            detail: format!("HTTP {s}: {detail}"),
            translated: true,
        },
    }
}

/// Backoff for one retry: Retry-After hint first, else exponential with
/// a deterministic ±12.5% jitter derived from the request id so tests
/// stay reproducible.
fn retry_delay(
    e: &GatewayError,
    attempt: u32,
    base_delay_ms: u64,
    request_id: &str,
) -> Duration {
    if let GatewayError::RateLimited {
        retry_after_secs: Some(secs),
        ..
    } = e
    {
        return Duration::from_secs(*secs);
    }
    let exp = base_delay_ms.saturating_mul(1 << attempt.min(10));
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in request_id.bytes() {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h ^= u64::from(attempt);
    h = h.wrapping_mul(0x0000_0100_0000_01b3);
    let per_mille = 875 + (h % 251); // [0.875, 1.125]
    Duration::from_millis(exp.saturating_mul(per_mille) / 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_statuses() {
        let reply = |status| UpstreamReply::buffered(status, "detail");
        assert!(matches!(
            classify_reply(ProviderId::Openai, &reply(401), false),
            GatewayError::UpstreamAuth { .. }
        ));
        assert!(matches!(
            classify_reply(ProviderId::Openai, &reply(429), false),
            GatewayError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_reply(ProviderId::Openai, &reply(422), false),
            GatewayError::CapabilityRefusal { .. }
        ));
        assert!(matches!(
            classify_reply(ProviderId::Openai, &reply(503), false),
            GatewayError::Transient { .. }
        ));
    }

    #[test]
    fn test_classify_400_carries_translation_marker() {
        let reply = |status| UpstreamReply::buffered(status, "detail");
        assert!(matches!(
            classify_reply(ProviderId::Openai, &reply(400), false),
            GatewayError::UpstreamBadRequest {
                translated: false,
                ..
            }
        ));
        assert!(matches!(
            classify_reply(ProviderId::Anthropic, &reply(400), true),
            GatewayError::UpstreamBadRequest {
                translated: true,
                ..
            }
        ));
        // A 404 is this binding's problem regardless of translation.
        assert!(matches!(
            classify_reply(ProviderId::Openai, &reply(404), false),
            GatewayError::UpstreamBadRequest {
                translated: true,
                ..
            }
        ));
    }

    #[test]
    fn test_retry_delay_honors_hint_and_is_deterministic() {
        let hinted = GatewayError::RateLimited {
            provider: "openai".into(),
            retry_after_secs: Some(7),
        };
        assert_eq!(retry_delay(&hinted, 0, 500, "rid"), Duration::from_secs(7));

        let transient = GatewayError::Transient {
            provider: "openai".into(),
            detail: "x".into(),
        };
        let d1 = retry_delay(&transient, 1, 500, "rid");
        let d2 = retry_delay(&transient, 1, 500, "rid");
        assert_eq!(d1, d2);
        // Exponential base for attempt 1 is 1000ms; jitter stays within
        // ±12.5%.
        assert!(d1 >= Duration::from_millis(875));
        assert!(d1 <= Duration::from_millis(1125));
    }

    #[test]
    fn test_advance_policy() {
        assert!(should_advance(&GatewayError::Transient {
            provider: "x".into(),
            detail: String::new(),
        }));
        assert!(should_advance(&GatewayError::ProviderNotConfigured(
            "x".into()
        )));
        assert!(!should_advance(&GatewayError::BadRequest("x".into())));
        assert!(!should_advance(&GatewayError::InsufficientCredits {
            estimated: 1.0,
            available: 0.0,
        }));
    }

    #[test]
    fn test_upstream_rejection_advances_only_when_translated() {
        assert!(should_advance(&GatewayError::UpstreamBadRequest {
            provider: "anthropic".into(),
            detail: String::new(),
            translated: true,
        }));
        assert!(!should_advance(&GatewayError::UpstreamBadRequest {
            provider: "openai".into(),
            detail: String::new(),
            translated: false,
        }));
    }
}
