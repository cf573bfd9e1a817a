//! Binary resolution per reference kind.
//!
//! | kind     | strategy                                             |
//! |----------|------------------------------------------------------|
//! | local    | filesystem read, confined to allowlisted roots       |
//! | arca     | read under the user object store's `artifacts/` tree |
//! | registry | pull through the [`RegistryClient`] collaborator     |
//! | oci      | not implemented; clear error                         |
//!
//! Every fetch computes the `sha256:<hex>` digest of the bytes. For
//! registry references, the digest reported by the (cached) inspect is
//! compared against the digest of the pulled bytes, closing the TOCTOU
//! window between inspect and fetch; callers can pass their own expected
//! digest for the same purpose.

// Layer 1: Standard library imports
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, EngineResult};
use crate::core::record::hash_bytes;
use crate::core::reference::{ComponentRef, Reference};

/// Prefix every arca artifact path must carry.
const ARCA_ARTIFACT_PREFIX: &str = "artifacts/";

/// Inspect result for a registry reference.
#[derive(Debug, Clone)]
pub struct RegistryInspect {
    /// Canonical ref the registry resolved (`latest` pinned to a version)
    pub component_ref: ComponentRef,
    /// Digest the registry advertises for the artifact, when known
    pub digest: Option<String>,
}

/// The OCI/component registry surface the engine consumes.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Resolve a canonical ref to its metadata. Implementations cache this.
    async fn inspect(&self, canonical: &str) -> EngineResult<RegistryInspect>;

    /// Pull the artifact bytes.
    async fn fetch(&self, canonical: &str) -> EngineResult<Vec<u8>>;
}

/// A resolved component binary.
#[derive(Debug, Clone)]
pub struct FetchedBinary {
    /// Raw component bytes
    pub bytes: Vec<u8>,
    /// `sha256:<hex>` of `bytes`
    pub digest: String,
    /// Identity recovered from the reference
    pub component_ref: ComponentRef,
}

/// Resolves references to binaries.
pub struct BinaryFetcher {
    local_roots: Vec<PathBuf>,
    arca_root: Option<PathBuf>,
    registry: Option<Arc<dyn RegistryClient>>,
}

impl BinaryFetcher {
    /// Build a fetcher from engine configuration and an optional registry.
    pub fn new(config: &EngineConfig, registry: Option<Arc<dyn RegistryClient>>) -> Self {
        Self {
            local_roots: config.local_roots.clone(),
            arca_root: config.arca_root.clone(),
            registry,
        }
    }

    /// Fetch the binary for `reference` and digest it.
    ///
    /// `expected_digest`, when supplied, is compared against the computed
    /// digest and a mismatch fails the fetch.
    pub async fn fetch(
        &self,
        reference: &Reference,
        expected_digest: Option<&str>,
    ) -> EngineResult<FetchedBinary> {
        let fetched = match reference {
            Reference::Local(path) => self.fetch_local(path).await?,
            Reference::Arca(path) => self.fetch_arca(path).await?,
            Reference::Registry(canonical) => self.fetch_registry(canonical).await?,
            Reference::Oci(_) => {
                return Err(EngineError::unsupported_reference(
                    "oci references are not implemented yet; push the artifact to the \
                     component registry and use a registry reference",
                ));
            }
        };

        if let Some(expected) = expected_digest {
            if fetched.digest != expected {
                return Err(EngineError::digest_mismatch(expected, &fetched.digest));
            }
        }
        Ok(fetched)
    }

    async fn fetch_local(&self, path: &Path) -> EngineResult<FetchedBinary> {
        if !self.local_roots.is_empty()
            && !self.local_roots.iter().any(|root| path.starts_with(root))
        {
            return Err(EngineError::access_denied(format!(
                "path {} is outside the allowed local roots",
                path.display()
            )));
        }

        let component_ref = ComponentRef::from_path(path)?;
        let bytes = read_file(path).await?;
        let digest = hash_bytes(&bytes);
        Ok(FetchedBinary {
            bytes,
            digest,
            component_ref,
        })
    }

    async fn fetch_arca(&self, path: &str) -> EngineResult<FetchedBinary> {
        let root = self.arca_root.as_ref().ok_or_else(|| {
            EngineError::unsupported_reference("no arca object store is configured")
        })?;
        if !path.starts_with(ARCA_ARTIFACT_PREFIX) || path.contains("..") {
            return Err(EngineError::access_denied(format!(
                "arca path must sit under {ARCA_ARTIFACT_PREFIX}: {path}"
            )));
        }

        let full = root.join(path);
        let component_ref = ComponentRef::from_path(&full)?;
        let bytes = read_file(&full).await?;
        let digest = hash_bytes(&bytes);
        Ok(FetchedBinary {
            bytes,
            digest,
            component_ref,
        })
    }

    async fn fetch_registry(&self, canonical: &str) -> EngineResult<FetchedBinary> {
        let registry = self.registry.as_ref().ok_or_else(|| {
            EngineError::unsupported_reference("no registry client is configured")
        })?;

        let inspect = registry.inspect(canonical).await?;
        let bytes = registry.fetch(canonical).await?;
        let digest = hash_bytes(&bytes);

        // The inspect result may be stale relative to the pull; recompute
        // and compare to close the window.
        if let Some(expected) = &inspect.digest {
            if *expected != digest {
                return Err(EngineError::digest_mismatch(expected, &digest));
            }
        }

        Ok(FetchedBinary {
            bytes,
            digest,
            component_ref: inspect.component_ref,
        })
    }
}

async fn read_file(path: &Path) -> EngineResult<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(EngineError::not_found(
            format!("component binary {}", path.display()),
        )),
        Err(e) => Err(EngineError::io_error(format!("read {}", path.display()), e)),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;

    fn layout_path(root: &Path) -> PathBuf {
        root.join("components/reagents/local/sum/1.0.0/reagent.wasm")
    }

    async fn write_fixture(root: &Path, bytes: &[u8]) -> PathBuf {
        let path = layout_path(root);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, bytes).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_local_fetch_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), b"fake-wasm").await;

        let fetcher = BinaryFetcher::new(&EngineConfig::default(), None);
        let fetched = fetcher.fetch(&Reference::Local(path), None).await.unwrap();

        assert_eq!(fetched.bytes, b"fake-wasm");
        assert_eq!(fetched.digest, hash_bytes(b"fake-wasm"));
        assert_eq!(fetched.component_ref.to_string(), "reagent:local.sum:1.0.0");
    }

    #[tokio::test]
    async fn test_local_roots_confine_paths() {
        let allowed = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let path = write_fixture(outside.path(), b"fake-wasm").await;

        let config = EngineConfig {
            local_roots: vec![allowed.path().to_path_buf()],
            ..EngineConfig::default()
        };
        let fetcher = BinaryFetcher::new(&config, None);
        let err = fetcher.fetch(&Reference::Local(path), None).await.unwrap_err();
        assert_eq!(err.kind(), "access_denied");
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_found() {
        let fetcher = BinaryFetcher::new(&EngineConfig::default(), None);
        let err = fetcher
            .fetch(
                &Reference::Local(PathBuf::from(
                    "/nonexistent/components/reagents/local/sum/1.0.0/reagent.wasm",
                )),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_expected_digest_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), b"fake-wasm").await;

        let fetcher = BinaryFetcher::new(&EngineConfig::default(), None);
        let err = fetcher
            .fetch(&Reference::Local(path), Some("sha256:deadbeef"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "digest_mismatch");
    }

    #[tokio::test]
    async fn test_arca_requires_artifact_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            arca_root: Some(dir.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let fetcher = BinaryFetcher::new(&config, None);

        let err = fetcher
            .fetch(&Reference::Arca("secrets/stolen".to_string()), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "access_denied");

        let err = fetcher
            .fetch(&Reference::Arca("artifacts/../../etc/passwd".to_string()), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "access_denied");
    }

    #[tokio::test]
    async fn test_arca_fetch_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let rel = "artifacts/components/reagents/local/sum/1.0.0/reagent.wasm";
        let full = dir.path().join(rel);
        tokio::fs::create_dir_all(full.parent().unwrap()).await.unwrap();
        tokio::fs::write(&full, b"arca-wasm").await.unwrap();

        let config = EngineConfig {
            arca_root: Some(dir.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let fetcher = BinaryFetcher::new(&config, None);
        let fetched = fetcher
            .fetch(&Reference::Arca(rel.to_string()), None)
            .await
            .unwrap();
        assert_eq!(fetched.bytes, b"arca-wasm");
    }

    #[tokio::test]
    async fn test_oci_is_a_clear_error() {
        let fetcher = BinaryFetcher::new(&EngineConfig::default(), None);
        let err = fetcher
            .fetch(&Reference::Oci("catalyst:local.probe:1.0.0".to_string()), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported_reference");
        assert!(err.to_string().contains("not implemented"));
    }

    #[tokio::test]
    async fn test_registry_digest_toctou_check() {
        struct StaleRegistry;

        #[async_trait]
        impl RegistryClient for StaleRegistry {
            async fn inspect(&self, canonical: &str) -> EngineResult<RegistryInspect> {
                Ok(RegistryInspect {
                    component_ref: ComponentRef::parse(canonical)?,
                    digest: Some(hash_bytes(b"old-bytes")),
                })
            }

            async fn fetch(&self, _canonical: &str) -> EngineResult<Vec<u8>> {
                Ok(b"new-bytes".to_vec())
            }
        }

        let fetcher = BinaryFetcher::new(&EngineConfig::default(), Some(Arc::new(StaleRegistry)));
        let err = fetcher
            .fetch(
                &Reference::Registry("reagent:local.sum:1.0.0".to_string()),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "digest_mismatch");
    }

    #[tokio::test]
    async fn test_registry_requires_client() {
        let fetcher = BinaryFetcher::new(&EngineConfig::default(), None);
        let err = fetcher
            .fetch(
                &Reference::Registry("reagent:local.sum:1.0.0".to_string()),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported_reference");
    }
}
