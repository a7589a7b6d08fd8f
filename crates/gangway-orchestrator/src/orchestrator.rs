// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider orchestration behind a unified event contract.
//!
//! The orchestrator hides provider identity: it selects the primary
//! backend, retries transient failures with exponential backoff, falls
//! back to the configured secondary on permanent failure, and delivers
//! every event to the consumer strictly in provider order, wrapped in an
//! envelope carrying provider id, query id, and timestamp.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use gangway_core::{EventEnvelope, EventSink, GangwayError, ProviderBackend, ProviderInput};
use tracing::{debug, warn};

use crate::policy::{PolicyTable, classify};

/// One orchestrated query.
pub struct OrchestratorQuery {
    pub primary_provider_id: String,
    pub fallback_provider_id: Option<String>,
    pub input: ProviderInput,
}

/// Dispatch outcome: which provider answered and how many attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDispatch {
    pub provider_id: String,
    pub attempts: u32,
    pub query_id: uuid::Uuid,
}

/// Registry of provider backends plus the retry policy table.
pub struct ProviderOrchestrator {
    backends: HashMap<String, Arc<dyn ProviderBackend>>,
    policies: PolicyTable,
}

impl ProviderOrchestrator {
    pub fn new(policies: PolicyTable) -> Self {
        Self {
            backends: HashMap::new(),
            policies,
        }
    }

    /// Registers a backend under its own id. Later registrations replace
    /// earlier ones with the same id.
    pub fn register(&mut self, backend: Arc<dyn ProviderBackend>) {
        self.backends.insert(backend.id().to_string(), backend);
    }

    pub fn backend(&self, id: &str) -> Option<&Arc<dyn ProviderBackend>> {
        self.backends.get(id)
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Executes one query, delivering events to `sink` sequentially.
    ///
    /// Emission stops when the sink returns an error or the input's abort
    /// token is raised; both surface as the corresponding `GangwayError`.
    pub async fn execute(
        &self,
        query: OrchestratorQuery,
        sink: &mut dyn EventSink,
    ) -> Result<QueryDispatch, GangwayError> {
        let query_id = uuid::Uuid::new_v4();
        let mut chain = vec![query.primary_provider_id.clone()];
        if let Some(ref fallback) = query.fallback_provider_id {
            chain.push(fallback.clone());
        }

        let mut total_attempts = 0u32;
        let mut last_error: Option<GangwayError> = None;

        for provider_id in &chain {
            let Some(backend) = self.backends.get(provider_id) else {
                last_error = Some(GangwayError::Provider {
                    message: format!("unknown provider backend '{provider_id}'"),
                    source: None,
                });
                continue;
            };
            let policy = self.policies.for_provider(provider_id);

            for attempt in 0..=policy.max_retries {
                if query.input.abort.is_cancelled() {
                    return Err(GangwayError::Aborted);
                }
                if attempt > 0 {
                    let backoff = policy.backoff(attempt);
                    warn!(
                        provider = provider_id.as_str(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying provider query after transient error"
                    );
                    tokio::time::sleep(backoff).await;
                }
                total_attempts += 1;

                match self
                    .run_once(backend.as_ref(), provider_id, query_id, &query.input, sink)
                    .await
                {
                    Ok(AttemptOutcome::Finished) => {
                        return Ok(QueryDispatch {
                            provider_id: provider_id.clone(),
                            attempts: total_attempts,
                            query_id,
                        });
                    }
                    Ok(AttemptOutcome::Failed { error, delivered }) => {
                        let transient = classify(&error).is_transient();
                        debug!(
                            provider = provider_id.as_str(),
                            attempt,
                            delivered,
                            transient,
                            error = %error,
                            "provider attempt failed"
                        );
                        // A stream that already delivered events cannot be
                        // retried or failed over without duplicating them.
                        if delivered {
                            return Err(error);
                        }
                        last_error = Some(error);
                        if !transient {
                            break;
                        }
                    }
                    // Sink refusal and abort end the whole query.
                    Err(e) => return Err(e),
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GangwayError::Provider {
            message: "no provider backends configured".to_string(),
            source: None,
        }))
    }

    async fn run_once(
        &self,
        backend: &dyn ProviderBackend,
        provider_id: &str,
        query_id: uuid::Uuid,
        input: &ProviderInput,
        sink: &mut dyn EventSink,
    ) -> Result<AttemptOutcome, GangwayError> {
        let mut stream = match backend.run(input.clone()).await {
            Ok(stream) => stream,
            Err(error) => {
                return Ok(AttemptOutcome::Failed {
                    error,
                    delivered: false,
                });
            }
        };

        let mut delivered = false;
        while let Some(item) = stream.next().await {
            if input.abort.is_cancelled() {
                return Err(GangwayError::Aborted);
            }
            match item {
                Ok(event) => {
                    delivered = true;
                    sink.deliver(EventEnvelope::new(provider_id, query_id, event))
                        .await?;
                }
                Err(error) => {
                    return Ok(AttemptOutcome::Failed { error, delivered });
                }
            }
        }
        Ok(AttemptOutcome::Finished)
    }
}

enum AttemptOutcome {
    Finished,
    Failed {
        error: GangwayError,
        delivered: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gangway_core::{
        DoneReason, ProviderCapabilities, ProviderEvent, ProviderEventStream,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    /// Backend that fails `failures` times at connect, then streams `events`.
    struct FlakyBackend {
        id: String,
        failures: AtomicU32,
        error_message: String,
        events: Vec<ProviderEvent>,
    }

    impl FlakyBackend {
        fn new(id: &str, failures: u32, error_message: &str) -> Self {
            Self {
                id: id.to_string(),
                failures: AtomicU32::new(failures),
                error_message: error_message.to_string(),
                events: vec![
                    ProviderEvent::Text {
                        delta: format!("hello from {id}"),
                    },
                    ProviderEvent::Done {
                        reason: DoneReason::Completed,
                    },
                ],
            }
        }
    }

    #[async_trait]
    impl ProviderBackend for FlakyBackend {
        fn id(&self) -> &str {
            &self.id
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                streaming: true,
                tool_use: true,
                session_resume: true,
            }
        }

        async fn run(&self, _input: ProviderInput) -> Result<ProviderEventStream, GangwayError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(GangwayError::Provider {
                    message: self.error_message.clone(),
                    source: None,
                });
            }
            let events: Vec<Result<ProviderEvent, GangwayError>> =
                self.events.iter().cloned().map(Ok).collect();
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    struct CollectingSink {
        events: Vec<EventEnvelope>,
    }

    #[async_trait]
    impl EventSink for CollectingSink {
        async fn deliver(&mut self, envelope: EventEnvelope) -> Result<(), GangwayError> {
            self.events.push(envelope);
            Ok(())
        }
    }

    fn query(primary: &str, fallback: Option<&str>) -> OrchestratorQuery {
        OrchestratorQuery {
            primary_provider_id: primary.to_string(),
            fallback_provider_id: fallback.map(String::from),
            input: ProviderInput {
                prompt: "hi".into(),
                options: Default::default(),
                abort: CancellationToken::new(),
                hooks: None,
            },
        }
    }

    fn fast_policies() -> PolicyTable {
        PolicyTable::from_json(
            r#"{"flaky": {"max_retries": 2, "base_backoff_ms": 1},
                "dead": {"max_retries": 1, "base_backoff_ms": 1}}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let mut orch = ProviderOrchestrator::new(fast_policies());
        orch.register(Arc::new(FlakyBackend::new("flaky", 2, "503 unavailable")));

        let mut sink = CollectingSink { events: Vec::new() };
        let dispatch = orch.execute(query("flaky", None), &mut sink).await.unwrap();

        assert_eq!(dispatch.provider_id, "flaky");
        assert_eq!(dispatch.attempts, 3);
        assert_eq!(sink.events.len(), 2);
        assert!(sink.events.iter().all(|e| e.provider_id == "flaky"));
        assert!(
            sink.events
                .iter()
                .all(|e| e.query_id == dispatch.query_id)
        );
    }

    #[tokio::test]
    async fn permanent_failure_falls_back() {
        let mut orch = ProviderOrchestrator::new(fast_policies());
        orch.register(Arc::new(FlakyBackend::new("dead", 99, "invalid model id")));
        orch.register(Arc::new(FlakyBackend::new("flaky", 0, "")));

        let mut sink = CollectingSink { events: Vec::new() };
        let dispatch = orch
            .execute(query("dead", Some("flaky")), &mut sink)
            .await
            .unwrap();

        assert_eq!(dispatch.provider_id, "flaky");
        // One permanent attempt on the primary, one success on the fallback.
        assert_eq!(dispatch.attempts, 2);
        assert!(sink.events[0].provider_id == "flaky");
    }

    #[tokio::test]
    async fn exhausted_retries_propagate_without_fallback() {
        let mut orch = ProviderOrchestrator::new(fast_policies());
        orch.register(Arc::new(FlakyBackend::new("flaky", 99, "503 unavailable")));

        let mut sink = CollectingSink { events: Vec::new() };
        let err = orch.execute(query("flaky", None), &mut sink).await.unwrap_err();
        assert!(err.to_string().contains("503"));
        assert!(sink.events.is_empty());
    }

    #[tokio::test]
    async fn unknown_primary_with_working_fallback() {
        let mut orch = ProviderOrchestrator::new(fast_policies());
        orch.register(Arc::new(FlakyBackend::new("flaky", 0, "")));

        let mut sink = CollectingSink { events: Vec::new() };
        let dispatch = orch
            .execute(query("missing", Some("flaky")), &mut sink)
            .await
            .unwrap();
        assert_eq!(dispatch.provider_id, "flaky");
    }

    #[tokio::test]
    async fn aborted_input_stops_before_dispatch() {
        let mut orch = ProviderOrchestrator::new(PolicyTable::default());
        orch.register(Arc::new(FlakyBackend::new("flaky", 0, "")));

        let q = query("flaky", None);
        q.input.abort.cancel();

        let mut sink = CollectingSink { events: Vec::new() };
        let err = orch.execute(q, &mut sink).await.unwrap_err();
        assert!(matches!(err, GangwayError::Aborted));
    }

    #[tokio::test]
    async fn sink_error_stops_emission() {
        struct RefusingSink;

        #[async_trait]
        impl EventSink for RefusingSink {
            async fn deliver(&mut self, _envelope: EventEnvelope) -> Result<(), GangwayError> {
                Err(GangwayError::GenerationMismatch)
            }
        }

        let mut orch = ProviderOrchestrator::new(PolicyTable::default());
        orch.register(Arc::new(FlakyBackend::new("flaky", 0, "")));

        let err = orch
            .execute(query("flaky", None), &mut RefusingSink)
            .await
            .unwrap_err();
        assert!(matches!(err, GangwayError::GenerationMismatch));
    }
}
