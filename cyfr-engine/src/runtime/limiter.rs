//! Resource limiting for WASM execution.
//!
//! Bridges the execution's caps onto Wasmtime's concrete mechanisms:
//! memory and tables through `StoreLimits`, CPU through fuel. The fuel
//! yield interval makes a busy instance yield periodically so the caller's
//! wall-clock deadline can cancel it.

// Layer 2: Third-party crate imports
use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};

// Layer 3: Internal module imports
use crate::core::error::{EngineError, EngineResult};

use super::engine::{HostState, RuntimeOpts};

/// Table-element ceiling; components have no business growing tables
/// unboundedly.
const MAX_TABLE_ELEMENTS: u32 = 10_000;

/// Build Wasmtime store limits from the execution's caps.
pub(crate) fn build_store_limits(max_memory_bytes: u64) -> StoreLimits {
    StoreLimitsBuilder::new()
        .memory_size(max_memory_bytes as usize)
        .table_elements(MAX_TABLE_ELEMENTS)
        .build()
}

/// Apply memory and fuel limits to a store.
///
/// 1. Installs `StoreLimits` in the host state and points the store's
///    limiter callback at it (enforced on `memory.grow`).
/// 2. Sets the fuel budget (enforced per instruction).
/// 3. Sets the fuel yield interval so execution periodically suspends.
pub fn apply_limits_to_store(
    store: &mut Store<HostState>,
    opts: &RuntimeOpts,
) -> EngineResult<()> {
    store.data_mut().limits = build_store_limits(opts.max_memory_bytes);
    store.limiter(|state| &mut state.limits);

    store
        .set_fuel(opts.max_fuel)
        .map_err(|e| EngineError::unexpected(format!("failed to set fuel: {e}")))?;
    store
        .fuel_async_yield_interval(Some(opts.fuel_yield_interval))
        .map_err(|e| EngineError::unexpected(format!("failed to set fuel yield interval: {e}")))?;

    Ok(())
}
