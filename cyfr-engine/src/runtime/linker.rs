//! Per-type import assembly.
//!
//! The linker is the capability boundary: an import that is never linked
//! cannot be called, so a reagent physically has no route to the network
//! and a formula without tool grants has no `mcp/tools` import.
//!
//! | Type     | Imports                                    | WASI |
//! |----------|--------------------------------------------|------|
//! | Reagent  | none                                       | P2   |
//! | Catalyst | http/fetch, http/stream, secrets/read      | P2   |
//! | Formula  | formula/invoke, mcp/tools (iff tool grants)| P2   |
//!
//! Host interfaces are versioned WIT instance names (`cyfr:host/...@0.1.0`)
//! with a single JSON-string function each, mirroring the guest-side
//! protocol documented in `host::protocol`.

// Layer 2: Third-party crate imports
use wasmtime::component::Linker;
use wasmtime::StoreContextMut;

// Layer 3: Internal module imports
use crate::core::error::{EngineError, EngineResult};
use crate::core::reference::ComponentType;
use crate::host::protocol;

use super::engine::{HostImports, HostState};

/// Instance name of the `http/fetch` interface.
pub const HTTP_FETCH_INTERFACE: &str = "cyfr:host/http-fetch@0.1.0";

/// Instance name of the `http/stream` interface.
pub const HTTP_STREAM_INTERFACE: &str = "cyfr:host/http-stream@0.1.0";

/// Instance name of the `secrets/read` interface.
pub const SECRETS_READ_INTERFACE: &str = "cyfr:host/secrets-read@0.1.0";

/// Instance name of the `formula/invoke` interface.
pub const FORMULA_INVOKE_INTERFACE: &str = "cyfr:host/formula-invoke@0.1.0";

/// Instance name of the `mcp/tools` interface.
pub const MCP_TOOLS_INTERFACE: &str = "cyfr:host/mcp-tools@0.1.0";

/// Assemble the linker for one execution.
///
/// WASI P2 (stdio only) is always present; everything else depends on the
/// component type and, for `mcp/tools`, on the presence of tool grants.
pub fn build_linker(
    engine: &wasmtime::Engine,
    component_type: ComponentType,
    imports: &HostImports,
) -> EngineResult<Linker<HostState>> {
    let mut linker: Linker<HostState> = Linker::new(engine);
    wasmtime_wasi::add_to_linker_async(&mut linker)
        .map_err(|e| EngineError::unexpected(format!("failed to link WASI: {e}")))?;

    match component_type {
        ComponentType::Reagent => {}
        ComponentType::Catalyst => {
            add_http_fetch(&mut linker)?;
            add_http_stream(&mut linker)?;
            add_secrets_read(&mut linker)?;
        }
        ComponentType::Formula => {
            add_formula_invoke(&mut linker)?;
            if imports.mcp.is_some() {
                add_mcp_tools(&mut linker)?;
            }
        }
    }
    Ok(linker)
}

fn wire_err(e: anyhow::Error) -> EngineError {
    EngineError::unexpected(format!("failed to wire host import: {e}"))
}

/// Error body returned if a call arrives on an import whose handle was
/// never installed. Unreachable by construction, but never panics.
fn missing_import(what: &str) -> String {
    protocol::encode_error(&EngineError::access_denied(format!(
        "{what} host is not available to this component"
    )))
}

fn add_http_fetch(linker: &mut Linker<HostState>) -> EngineResult<()> {
    let mut iface = linker.instance(HTTP_FETCH_INTERFACE).map_err(wire_err)?;
    iface
        .func_wrap_async(
            "request",
            |store: StoreContextMut<'_, HostState>, (payload,): (String,)| {
                let http = store.data().imports.http.clone();
                Box::new(async move {
                    let response = match http {
                        Some(host) => host.fetch(&payload).await,
                        None => missing_import("http/fetch"),
                    };
                    Ok((response,))
                })
            },
        )
        .map_err(wire_err)?;
    Ok(())
}

fn add_http_stream(linker: &mut Linker<HostState>) -> EngineResult<()> {
    let mut iface = linker.instance(HTTP_STREAM_INTERFACE).map_err(wire_err)?;
    iface
        .func_wrap_async(
            "request",
            |store: StoreContextMut<'_, HostState>, (payload,): (String,)| {
                let stream = store.data().imports.stream.clone();
                Box::new(async move {
                    let response = match stream {
                        Some(host) => host.open(&payload).await,
                        None => missing_import("http/stream"),
                    };
                    Ok((response,))
                })
            },
        )
        .map_err(wire_err)?;
    iface
        .func_wrap_async(
            "read",
            |store: StoreContextMut<'_, HostState>, (payload,): (String,)| {
                let stream = store.data().imports.stream.clone();
                Box::new(async move {
                    let response = match stream {
                        Some(host) => host.read(&payload).await,
                        None => missing_import("http/stream"),
                    };
                    Ok((response,))
                })
            },
        )
        .map_err(wire_err)?;
    iface
        .func_wrap_async(
            "close",
            |store: StoreContextMut<'_, HostState>, (payload,): (String,)| {
                let stream = store.data().imports.stream.clone();
                Box::new(async move {
                    let response = match stream {
                        Some(host) => host.close(&payload).await,
                        None => missing_import("http/stream"),
                    };
                    Ok((response,))
                })
            },
        )
        .map_err(wire_err)?;
    Ok(())
}

fn add_secrets_read(linker: &mut Linker<HostState>) -> EngineResult<()> {
    let mut iface = linker.instance(SECRETS_READ_INTERFACE).map_err(wire_err)?;
    iface
        .func_wrap_async(
            "get",
            |store: StoreContextMut<'_, HostState>, (name,): (String,)| {
                let secrets = store.data().imports.secrets.clone();
                Box::new(async move {
                    let response = match secrets {
                        Some(host) => host.get(&name),
                        None => format!("access-denied: {name} (no secrets host)"),
                    };
                    Ok((response,))
                })
            },
        )
        .map_err(wire_err)?;
    Ok(())
}

fn add_formula_invoke(linker: &mut Linker<HostState>) -> EngineResult<()> {
    let mut iface = linker.instance(FORMULA_INVOKE_INTERFACE).map_err(wire_err)?;
    iface
        .func_wrap_async(
            "call",
            |store: StoreContextMut<'_, HostState>, (payload,): (String,)| {
                let formula = store.data().imports.formula.clone();
                Box::new(async move {
                    let response = match formula {
                        Some(host) => host.call(&payload).await,
                        None => missing_import("formula/invoke"),
                    };
                    Ok((response,))
                })
            },
        )
        .map_err(wire_err)?;
    Ok(())
}

fn add_mcp_tools(linker: &mut Linker<HostState>) -> EngineResult<()> {
    let mut iface = linker.instance(MCP_TOOLS_INTERFACE).map_err(wire_err)?;
    iface
        .func_wrap_async(
            "call",
            |store: StoreContextMut<'_, HostState>, (payload,): (String,)| {
                let mcp = store.data().imports.mcp.clone();
                Box::new(async move {
                    let response = match mcp {
                        Some(host) => host.call(&payload).await,
                        None => missing_import("mcp/tools"),
                    };
                    Ok((response,))
                })
            },
        )
        .map_err(wire_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use wasmtime::component::Component;
    use wasmtime::Store;

    use super::*;
    use crate::runtime::engine::WasmRuntime;

    /// A component that imports the `http/fetch` interface.
    fn http_importing_component(runtime: &WasmRuntime) -> Component {
        let wasm = wat::parse_str(format!(
            r#"(component
                (import "{HTTP_FETCH_INTERFACE}" (instance
                    (export "request" (func (param "payload" string) (result string)))
                )))"#,
        ))
        .unwrap();
        Component::new(runtime.engine(), &wasm).unwrap()
    }

    /// A component that imports the `mcp/tools` interface.
    fn mcp_importing_component(runtime: &WasmRuntime) -> Component {
        let wasm = wat::parse_str(format!(
            r#"(component
                (import "{MCP_TOOLS_INTERFACE}" (instance
                    (export "call" (func (param "payload" string) (result string)))
                )))"#,
        ))
        .unwrap();
        Component::new(runtime.engine(), &wasm).unwrap()
    }

    async fn instantiate(
        runtime: &WasmRuntime,
        component: &Component,
        component_type: ComponentType,
        imports: HostImports,
    ) -> anyhow::Result<()> {
        let linker = build_linker(runtime.engine(), component_type, &imports).unwrap();
        let mut store = Store::new(runtime.engine(), HostState::new(imports));
        linker.instantiate_async(&mut store, component).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_catalyst_linker_satisfies_http_import() {
        let runtime = WasmRuntime::new().unwrap();
        let component = http_importing_component(&runtime);
        let result = instantiate(
            &runtime,
            &component,
            ComponentType::Catalyst,
            HostImports::default(),
        )
        .await;
        assert!(result.is_ok(), "catalyst should link http: {result:?}");
    }

    #[tokio::test]
    async fn test_reagent_linker_rejects_http_import() {
        let runtime = WasmRuntime::new().unwrap();
        let component = http_importing_component(&runtime);
        let result = instantiate(
            &runtime,
            &component,
            ComponentType::Reagent,
            HostImports::default(),
        )
        .await;
        assert!(result.is_err(), "reagent must not receive http imports");
    }

    #[tokio::test]
    async fn test_formula_linker_rejects_http_import() {
        let runtime = WasmRuntime::new().unwrap();
        let component = http_importing_component(&runtime);
        let result = instantiate(
            &runtime,
            &component,
            ComponentType::Formula,
            HostImports::default(),
        )
        .await;
        assert!(result.is_err(), "formula must not receive http imports");
    }

    #[tokio::test]
    async fn test_mcp_import_present_only_with_tool_grants() {
        let runtime = WasmRuntime::new().unwrap();
        let component = mcp_importing_component(&runtime);

        // Without an mcp host handle (no tool grants), the import is absent.
        let result = instantiate(
            &runtime,
            &component,
            ComponentType::Formula,
            HostImports::default(),
        )
        .await;
        assert!(result.is_err(), "mcp import must be absent without grants");
    }

    #[tokio::test]
    async fn test_plain_wasi_component_links_for_every_type() {
        let runtime = WasmRuntime::new().unwrap();
        let wasm = wat::parse_str("(component)").unwrap();
        let component = Component::new(runtime.engine(), &wasm).unwrap();

        for component_type in [
            ComponentType::Reagent,
            ComponentType::Catalyst,
            ComponentType::Formula,
        ] {
            let result = instantiate(&runtime, &component, component_type, HostImports::default())
                .await;
            assert!(result.is_ok(), "{component_type} failed: {result:?}");
        }
    }
}
