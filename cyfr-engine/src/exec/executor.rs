//! The execution orchestrator.
//!
//! [`Executor::run`] drives one `(reference, input)` pair through the full
//! pipeline: reference extraction → record construction → policy
//! evaluation → input-size check → rate limit → binary fetch + digest →
//! signature verification → `started` write → secret resolution → the
//! sandboxed run under a cancellable wall-clock deadline → output masking
//! → `completed` write → telemetry.
//!
//! Failures at any step take a single failure path that guarantees both a
//! `started` and a `failed` record exist (auditors never observe a
//! dangling `running`), and no panic from the runtime crosses this
//! boundary. Formula sub-invocations recurse through
//! [`FormulaInvoker::invoke_child`] with a shared request id and a depth
//! cap.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::{error, warn};

// Layer 3: Internal module imports
use crate::core::config::EngineConfig;
use crate::core::context::Context;
use crate::core::error::{EngineError, EngineResult};
use crate::core::record::{ExecutionRecord, ExecutionResult};
use crate::core::reference::{ComponentRef, ComponentType, Reference};
use crate::core::storage::Storage;
use crate::core::telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetry};
use crate::host::formula::{FormulaHost, FormulaInvoker, ParentInfo};
use crate::host::http::HttpHost;
use crate::host::mcp::{McpHost, McpToolRegistry};
use crate::host::secrets::SecretsHost;
use crate::host::stream::{StreamHost, StreamRegistry};
use crate::runtime::engine::{HostImports, RuntimeOpts, WasmRuntime};
use crate::runtime::ComponentRuntime;
use crate::security::masker::mask_output;
use crate::security::policy_cache::PolicyCache;
use crate::security::rate_limiter::{RateDecision, RateLimiter};
use crate::security::secrets::{ResolvedSecrets, SecretResolver};
use crate::security::signature::{SignatureVerifier, StaticVerifier};

use super::fetcher::{BinaryFetcher, RegistryClient};
use super::opts::{ExecutionOpts, PolicyEnforcer};

/// Caller-supplied options for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Expected binary digest; a mismatch fails before execution
    pub expected_digest: Option<String>,
    /// Expected component type; a mismatch fails validation
    pub expected_type: Option<ComponentType>,
}

/// The execution engine.
///
/// Cheap to clone (`Arc<Inner>`); the long-lived services (policy cache,
/// rate limiter, stream registry, runtime) are constructed once at build
/// time and shared across executions.
#[derive(Clone)]
pub struct Executor {
    pub(crate) inner: Arc<ExecutorInner>,
}

pub(crate) struct ExecutorInner {
    pub(crate) config: EngineConfig,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) policy_cache: Arc<PolicyCache>,
    enforcer: PolicyEnforcer,
    rate_limiter: Arc<RateLimiter>,
    secret_resolver: SecretResolver,
    pub(crate) fetcher: BinaryFetcher,
    verifier: Arc<dyn SignatureVerifier>,
    pub(crate) runtime: Arc<dyn ComponentRuntime>,
    telemetry: Arc<dyn TelemetrySink>,
    streams: Arc<StreamRegistry>,
    mcp_registry: Arc<McpToolRegistry>,
    running: DashMap<String, AbortHandle>,
}

/// Builder for [`Executor`].
pub struct ExecutorBuilder {
    storage: Arc<dyn Storage>,
    config: EngineConfig,
    runtime: Option<Arc<dyn ComponentRuntime>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    registry_client: Option<Arc<dyn RegistryClient>>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    mcp_registry: Option<Arc<McpToolRegistry>>,
}

impl ExecutorBuilder {
    /// Override the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the component runtime (tests use a mock here).
    pub fn runtime(mut self, runtime: Arc<dyn ComponentRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Override the telemetry sink.
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Attach a registry client for `registry:` references.
    pub fn registry_client(mut self, client: Arc<dyn RegistryClient>) -> Self {
        self.registry_client = Some(client);
        self
    }

    /// Override the signature verifier.
    pub fn verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Attach the mediated tool handlers formulas may call.
    pub fn mcp_tools(mut self, registry: Arc<McpToolRegistry>) -> Self {
        self.mcp_registry = Some(registry);
        self
    }

    /// Construct the executor and its long-lived services.
    pub fn build(self) -> EngineResult<Executor> {
        let config = self.config;
        let policy_cache = Arc::new(PolicyCache::new(
            Arc::clone(&self.storage),
            Duration::from_millis(config.policy_cache_ttl_ms),
            config.policy_cache_capacity,
        ));
        let runtime: Arc<dyn ComponentRuntime> = match self.runtime {
            Some(runtime) => runtime,
            None => Arc::new(WasmRuntime::new()?),
        };
        let verifier = self
            .verifier
            .unwrap_or_else(|| Arc::new(StaticVerifier::new(config.enforce_signatures)));

        Ok(Executor {
            inner: Arc::new(ExecutorInner {
                enforcer: PolicyEnforcer::new(Arc::clone(&policy_cache), config.clone()),
                policy_cache,
                rate_limiter: Arc::new(RateLimiter::new()),
                secret_resolver: SecretResolver::new(Arc::clone(&self.storage)),
                fetcher: BinaryFetcher::new(&config, self.registry_client),
                verifier,
                runtime,
                telemetry: self
                    .telemetry
                    .unwrap_or_else(|| Arc::new(TracingTelemetry)),
                streams: Arc::new(StreamRegistry::new()),
                mcp_registry: self.mcp_registry.unwrap_or_default(),
                running: DashMap::new(),
                storage: self.storage,
                config,
            }),
        })
    }
}

impl Executor {
    /// Start building an executor over the metadata store.
    pub fn builder(storage: Arc<dyn Storage>) -> ExecutorBuilder {
        ExecutorBuilder {
            storage,
            config: EngineConfig::default(),
            runtime: None,
            telemetry: None,
            registry_client: None,
            verifier: None,
            mcp_registry: None,
        }
    }

    /// Execute a component.
    pub async fn run(
        &self,
        ctx: &Context,
        reference: Reference,
        input: serde_json::Value,
    ) -> EngineResult<ExecutionResult> {
        self.run_with(ctx, reference, input, RunOptions::default()).await
    }

    /// Execute a component with caller-supplied options.
    pub async fn run_with(
        &self,
        ctx: &Context,
        reference: Reference,
        input: serde_json::Value,
        options: RunOptions,
    ) -> EngineResult<ExecutionResult> {
        self.run_internal(ctx, reference, input, None, None, options).await
    }

    /// Cancel a running execution. Returns whether a runtime task was
    /// found and aborted; the pipeline finalizes the record as
    /// `cancelled`.
    pub fn cancel(&self, exec_id: &str) -> bool {
        match self.inner.running.remove(exec_id) {
            Some((_, abort)) => {
                abort.abort();
                true
            }
            None => false,
        }
    }

    /// Invalidate the cached policy for a component (call on any
    /// administrator-visible policy change).
    pub fn invalidate_policy(&self, component_ref: &ComponentRef) {
        self.inner.policy_cache.invalidate(component_ref);
    }

    /// The rate limiter, for administrative `status`/`reset` calls.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate_limiter
    }

    pub(crate) async fn run_internal(
        &self,
        ctx: &Context,
        reference: Reference,
        input: serde_json::Value,
        request_id: Option<String>,
        parent: Option<ParentInfo>,
        options: RunOptions,
    ) -> EngineResult<ExecutionResult> {
        // Reference extraction precedes the record: without a type there
        // is nothing auditable to write.
        let component_ref = reference.component_ref()?;
        let component_type = component_ref.component_type;
        if let Some(expected) = options.expected_type {
            if expected != component_type {
                return Err(EngineError::malformed_reference(
                    component_ref.to_string(),
                    format!("expected a {expected}, reference is a {component_type}"),
                ));
            }
        }

        let (parent_id, depth) = match &parent {
            Some(p) => (Some(p.execution_id.clone()), p.depth),
            None => (None, 0),
        };
        let mut record = ExecutionRecord::new(
            &ctx.user_id,
            reference,
            component_type,
            input,
            request_id,
            parent_id,
        );

        let started = Instant::now();
        let mut started_written = false;
        let result = self
            .pipeline(ctx, &mut record, &component_ref, depth, &options, started, &mut started_written)
            .await;

        if let Err(err) = &result {
            self.finalize_failure(&mut record, started_written, err, started).await;
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn pipeline(
        &self,
        ctx: &Context,
        record: &mut ExecutionRecord,
        component_ref: &ComponentRef,
        depth: u32,
        options: &RunOptions,
        started: Instant,
        started_written: &mut bool,
    ) -> EngineResult<ExecutionResult> {
        let inner = &self.inner;

        // Policy evaluation; catalysts are rejected here before any fetch.
        let exec_opts = inner
            .enforcer
            .build_execution_opts(component_ref, record.component_type)
            .await?;

        // Input-size cap.
        let input_json = serde_json::to_string(&record.input)
            .map_err(|e| EngineError::encode_error(format!("unserializable input: {e}")))?;
        if input_json.len() > exec_opts.max_request_size {
            return Err(EngineError::request_too_large(
                input_json.len(),
                exec_opts.max_request_size,
            ));
        }

        // Rate limit, fail fast.
        match inner
            .rate_limiter
            .check(&ctx.user_id, component_ref, &exec_opts.policy)?
        {
            RateDecision::Limited { retry_after_ms } => {
                return Err(EngineError::rate_limited(retry_after_ms));
            }
            RateDecision::Unlimited | RateDecision::Allowed { .. } => {}
        }

        // Binary fetch + digest (+ caller digest pin) + signature.
        let fetched = inner
            .fetcher
            .fetch(&record.reference, options.expected_digest.as_deref())
            .await?;
        inner
            .verifier
            .verify(&record.reference, component_ref, &fetched.bytes)?;

        // Persist `started` before anything can run.
        record.mark_started(Some(fetched.digest.clone()), Some(exec_opts.policy.clone()));
        inner.storage.put_execution_started(record).await?;
        *started_written = true;
        inner.telemetry.emit(TelemetryEvent::ExecuteStart {
            exec_id: record.id.clone(),
            component: component_ref.to_string(),
            component_type: record.component_type,
            user_id: ctx.user_id.clone(),
        });

        // Secrets, once, before the runtime starts.
        let secrets = inner.secret_resolver.resolve(ctx, component_ref).await?;

        // Assemble imports and run under the wall-clock deadline.
        let imports = self.build_imports(ctx, record, component_ref, &exec_opts, &secrets, depth)?;
        let runtime_opts = RuntimeOpts {
            component_type: record.component_type,
            max_memory_bytes: exec_opts.max_memory_bytes,
            max_fuel: inner.config.max_fuel,
            fuel_yield_interval: inner.config.fuel_yield_interval,
            imports,
        };

        let runtime = Arc::clone(&inner.runtime);
        let bytes = fetched.bytes;
        let handle = tokio::spawn(async move {
            runtime.execute(&bytes, &input_json, runtime_opts).await
        });
        let abort = handle.abort_handle();
        inner.running.insert(record.id.clone(), abort.clone());

        let joined = tokio::time::timeout(
            Duration::from_millis(exec_opts.timeout_ms),
            handle,
        )
        .await;

        inner.running.remove(&record.id);
        inner.streams.finalize_execution(&record.id);

        let output = match joined {
            Err(_elapsed) => {
                abort.abort();
                return Err(EngineError::timeout(exec_opts.timeout_ms));
            }
            Ok(Err(join_err)) if join_err.is_cancelled() => {
                record.mark_cancelled()?;
                inner.storage.put_execution_failed(record).await?;
                inner.telemetry.emit(TelemetryEvent::ExecuteException {
                    exec_id: record.id.clone(),
                    component: component_ref.to_string(),
                    component_type: record.component_type,
                    user_id: ctx.user_id.clone(),
                    duration_ns: started.elapsed().as_nanos() as u64,
                    error: "Execution cancelled".to_string(),
                });
                return Err(EngineError::Cancelled);
            }
            Ok(Err(join_err)) => {
                // A panic inside the runtime task stops here.
                return Err(EngineError::unexpected(format!(
                    "runtime task failed: {join_err}"
                )));
            }
            Ok(Ok(result)) => result?,
        };

        // Mask and finalize.
        let masked = mask_output(output, &secrets);
        let duration_ms = started.elapsed().as_millis() as u64;
        record.mark_completed(masked.clone(), duration_ms)?;
        inner.storage.put_execution_completed(record).await?;
        inner.telemetry.emit(TelemetryEvent::ExecuteStop {
            exec_id: record.id.clone(),
            component: component_ref.to_string(),
            component_type: record.component_type,
            user_id: ctx.user_id.clone(),
            duration_ns: started.elapsed().as_nanos() as u64,
            memory_bytes: 0,
        });

        Ok(ExecutionResult {
            execution_id: record.id.clone(),
            output: masked,
            component_digest: record.component_digest.clone(),
            duration_ms,
            host_policy_snapshot: record.host_policy_snapshot.clone(),
        })
    }

    fn build_imports(
        &self,
        ctx: &Context,
        record: &ExecutionRecord,
        component_ref: &ComponentRef,
        exec_opts: &ExecutionOpts,
        secrets: &ResolvedSecrets,
        depth: u32,
    ) -> EngineResult<HostImports> {
        let inner = &self.inner;
        let mut imports = HostImports::default();

        match record.component_type {
            ComponentType::Reagent => {}
            ComponentType::Catalyst => {
                let http = Arc::new(HttpHost::new(
                    component_ref.clone(),
                    ctx.user_id.clone(),
                    exec_opts.policy.clone(),
                    &inner.config,
                    Arc::clone(&inner.rate_limiter),
                    Arc::clone(&inner.telemetry),
                )?);
                imports.stream = Some(Arc::new(StreamHost::new(
                    record.id.clone(),
                    Arc::clone(&http),
                    Arc::clone(&inner.streams),
                    &inner.config,
                )));
                imports.http = Some(http);
                imports.secrets = Some(Arc::new(SecretsHost::new(
                    component_ref.clone(),
                    secrets.clone(),
                    Arc::clone(&inner.telemetry),
                )));
            }
            ComponentType::Formula => {
                let parent = ParentInfo {
                    execution_id: record.id.clone(),
                    request_id: record.request_id.clone(),
                    depth,
                };
                imports.formula = Some(Arc::new(FormulaHost::new(
                    ctx.clone(),
                    parent,
                    inner.config.max_formula_depth,
                    Arc::new(self.clone()),
                    Arc::clone(&inner.telemetry),
                )));
                if !exec_opts.policy.allowed_tools.is_empty() {
                    imports.mcp = Some(Arc::new(McpHost::new(
                        record.id.clone(),
                        exec_opts.policy.clone(),
                        Arc::clone(&inner.mcp_registry),
                        Arc::clone(&inner.telemetry),
                    )));
                }
            }
        }
        Ok(imports)
    }

    /// Failure path: guarantee both `started` and `failed` records exist.
    async fn finalize_failure(
        &self,
        record: &mut ExecutionRecord,
        started_written: bool,
        err: &EngineError,
        started: Instant,
    ) {
        // Cancellation already finalized the record in the pipeline.
        if record.status.is_terminal() {
            return;
        }

        let inner = &self.inner;
        if !started_written {
            if record.started_at.is_none() {
                record.mark_started(None, None);
            }
            if let Err(write_err) = inner.storage.put_execution_started(record).await {
                warn!(
                    exec_id = %record.id,
                    error = %write_err,
                    "failed to backfill started record"
                );
            }
        }

        if record.mark_failed(err.to_string()).is_ok() {
            if let Err(write_err) = inner.storage.put_execution_failed(record).await {
                error!(
                    exec_id = %record.id,
                    error = %write_err,
                    "failed to persist failure record"
                );
            }
        }

        let component = record
            .reference
            .component_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|_| record.reference.to_string());
        inner.telemetry.emit(TelemetryEvent::ExecuteException {
            exec_id: record.id.clone(),
            component,
            component_type: record.component_type,
            user_id: record.user_id.clone(),
            duration_ns: started.elapsed().as_nanos() as u64,
            error: err.to_string(),
        });
    }
}

#[async_trait]
impl FormulaInvoker for Executor {
    async fn invoke_child(
        &self,
        ctx: &Context,
        reference: Reference,
        input: serde_json::Value,
        parent: ParentInfo,
    ) -> EngineResult<ExecutionResult> {
        // Sub-invocations share the request id and record their parent.
        self.run_internal(
            ctx,
            reference,
            input,
            Some(parent.request_id.clone()),
            Some(parent),
            RunOptions::default(),
        )
        .await
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("running", &self.inner.running.len())
            .finish()
    }
}
