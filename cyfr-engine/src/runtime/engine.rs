//! Wasmtime-based component runtime.
//!
//! Configures Wasmtime with Component Model support, async execution, and
//! fuel metering; instantiates components with WASI P2 (stdio only) plus
//! the per-type host imports; and calls the canonical export:
//!
//! | type     | interface                      | function            |
//! |----------|--------------------------------|---------------------|
//! | catalyst | `cyfr:catalyst/run@0.1.0`      | `run(string)→string`    |
//! | reagent  | `cyfr:reagent/compute@0.1.0`   | `compute(string)→string`|
//! | formula  | `cyfr:formula/run@0.1.0`       | `run(string)→string`    |
//!
//! Input is serialized JSON; output is parsed JSON, with non-JSON output
//! wrapped as `{"raw": ...}`. Memory and fuel caps apply before the call;
//! the wall-clock deadline is the caller's job (the executor runs this in
//! a cancellable task).

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use wasmtime::component::Component;
use wasmtime::{Config, Engine, Store, StoreLimits, Trap};
use wasmtime_wasi::{ResourceTable, WasiCtx, WasiCtxBuilder, WasiView};

// Layer 3: Internal module imports
use crate::core::error::{EngineError, EngineResult};
use crate::core::reference::ComponentType;
use crate::host::formula::FormulaHost;
use crate::host::http::HttpHost;
use crate::host::mcp::McpHost;
use crate::host::protocol;
use crate::host::secrets::SecretsHost;
use crate::host::stream::StreamHost;

use super::limiter::{apply_limits_to_store, build_store_limits};
use super::linker::build_linker;
use super::ComponentRuntime;

/// Host-function handles for one execution.
///
/// Presence of a handle is what grants the capability: the linker only
/// wires interfaces whose type allows them, and `mcp/tools` additionally
/// requires a handle (i.e. non-empty tool grants).
#[derive(Default, Clone)]
pub struct HostImports {
    /// `http/fetch` (catalyst)
    pub http: Option<Arc<HttpHost>>,
    /// `http/stream` (catalyst)
    pub stream: Option<Arc<StreamHost>>,
    /// `secrets/read` (catalyst)
    pub secrets: Option<Arc<SecretsHost>>,
    /// `formula/invoke` (formula)
    pub formula: Option<Arc<FormulaHost>>,
    /// `mcp/tools` (formula with tool grants)
    pub mcp: Option<Arc<McpHost>>,
}

/// Execution options handed to the runtime.
#[derive(Clone)]
pub struct RuntimeOpts {
    /// Component type, selects imports and the canonical export
    pub component_type: ComponentType,
    /// Linear-memory cap in bytes
    pub max_memory_bytes: u64,
    /// Fuel budget
    pub max_fuel: u64,
    /// Fuel between async yield points
    pub fuel_yield_interval: u64,
    /// Host-function handles
    pub imports: HostImports,
}

/// Per-store host state: WASI context plus the import handles.
pub struct HostState {
    wasi: WasiCtx,
    table: ResourceTable,
    pub(crate) limits: StoreLimits,
    pub(crate) imports: HostImports,
}

impl HostState {
    /// Build host state with stdio-only WASI.
    pub fn new(imports: HostImports) -> Self {
        Self {
            wasi: WasiCtxBuilder::new().inherit_stdio().build(),
            table: ResourceTable::new(),
            limits: build_store_limits(crate::core::config::DEFAULT_MAX_MEMORY_BYTES),
            imports,
        }
    }
}

impl WasiView for HostState {
    fn table(&mut self) -> &mut ResourceTable {
        &mut self.table
    }

    fn ctx(&mut self) -> &mut WasiCtx {
        &mut self.wasi
    }
}

/// Wasmtime-backed [`ComponentRuntime`].
///
/// Uses the `Arc<Inner>` pattern: clones share one compiled-code cache and
/// engine across threads.
#[derive(Clone)]
pub struct WasmRuntime {
    inner: Arc<WasmRuntimeInner>,
}

struct WasmRuntimeInner {
    engine: Engine,
}

impl WasmRuntime {
    /// Create a runtime with production configuration: Component Model,
    /// async support, Cranelift, fuel metering.
    pub fn new() -> EngineResult<Self> {
        let mut config = Config::new();
        config.wasm_component_model(true);
        config.async_support(true);
        config.consume_fuel(true);

        let engine = Engine::new(&config)
            .map_err(|e| EngineError::unexpected(format!("failed to create Wasmtime engine: {e}")))?;

        Ok(Self {
            inner: Arc::new(WasmRuntimeInner { engine }),
        })
    }

    /// The underlying Wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    fn map_call_error(&self, err: anyhow::Error, opts: &RuntimeOpts) -> EngineError {
        if let Some(trap) = err.downcast_ref::<Trap>() {
            return match trap {
                Trap::OutOfFuel => EngineError::fuel_exhausted(opts.max_fuel),
                Trap::UnreachableCodeReached => {
                    // Memory-growth denial surfaces to most guests as an
                    // unreachable after a failed allocation.
                    EngineError::unexpected(format!("component trapped: {trap}"))
                }
                other => EngineError::unexpected(format!("component trapped: {other}")),
            };
        }
        EngineError::unexpected(format!("component call failed: {err}"))
    }
}

impl std::fmt::Debug for WasmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmRuntime")
            .field("engine", &"wasmtime::Engine")
            .finish()
    }
}

#[async_trait]
impl ComponentRuntime for WasmRuntime {
    async fn execute(
        &self,
        binary: &[u8],
        input: &str,
        opts: RuntimeOpts,
    ) -> EngineResult<serde_json::Value> {
        let component = Component::new(&self.inner.engine, binary).map_err(|e| {
            EngineError::decode_error(format!("invalid WebAssembly component: {e}"))
        })?;

        let linker = build_linker(&self.inner.engine, opts.component_type, &opts.imports)?;
        let mut store = Store::new(&self.inner.engine, HostState::new(opts.imports.clone()));
        apply_limits_to_store(&mut store, &opts)?;

        let instance = linker
            .instantiate_async(&mut store, &component)
            .await
            .map_err(|e| EngineError::unexpected(format!("failed to instantiate component: {e}")))?;

        let interface = opts.component_type.export_interface();
        let function = opts.component_type.export_function();

        let interface_idx = instance
            .get_export(&mut store, None, interface)
            .ok_or_else(|| {
                EngineError::not_found(format!("component does not export {interface}"))
            })?;
        let function_idx = instance
            .get_export(&mut store, Some(&interface_idx), function)
            .ok_or_else(|| {
                EngineError::not_found(format!("{interface} does not export {function}"))
            })?;

        let func = instance
            .get_typed_func::<(String,), (String,)>(&mut store, function_idx)
            .map_err(|e| {
                EngineError::unexpected(format!("{interface}#{function} has the wrong type: {e}"))
            })?;

        let (output,) = func
            .call_async(&mut store, (input.to_string(),))
            .await
            .map_err(|e| self.map_call_error(e, &opts))?;
        func.post_return_async(&mut store)
            .await
            .map_err(|e| EngineError::unexpected(format!("post-return failed: {e}")))?;

        Ok(protocol::json_or_raw(&output))
    }
}
