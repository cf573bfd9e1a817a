//! Typed component references.
//!
//! A component is identified by a [`ComponentRef`] with canonical form
//! `type:namespace.name:version`, e.g. `catalyst:local.http-probe:1.0.0`.
//! The reference grammar is:
//!
//! ```text
//! ref := type ":" [namespace "."] name [":" version]
//! type ∈ {catalyst | reagent | formula | c | r | f}
//! ```
//!
//! `c`/`r`/`f` are shorthands that expand to the full type names. The
//! namespace defaults to `local` and the version defaults to `latest`.
//! Parse/format round-trips are idempotent: `parse(format(parse(s)))`
//! equals `parse(s)` for every legal `s`.
//!
//! [`Reference`] is the resolution address: where the binary for a
//! component actually lives (local filesystem, the user's object store, the
//! component registry, or an OCI registry).

// Layer 1: Standard library imports
use std::fmt;
use std::path::{Path, PathBuf};

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::core::error::{EngineError, EngineResult};

/// Maximum length of a component name.
pub const MAX_NAME_LEN: usize = 64;

/// Default namespace when a reference omits one.
pub const DEFAULT_NAMESPACE: &str = "local";

/// Default version when a reference omits one.
pub const DEFAULT_VERSION: &str = "latest";

/// The three executable component types.
///
/// The type determines which host imports an instance receives:
/// reagents get none, catalysts get HTTP and secrets, formulas get
/// sub-invocation and (optionally) mediated tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    /// Network-capable component; requires a policy with allowed domains.
    Catalyst,
    /// Pure compute component; stdio only.
    Reagent,
    /// Orchestration component; can invoke other components.
    Formula,
}

impl ComponentType {
    /// Parse a type token, accepting the `c`/`r`/`f` shorthands.
    pub fn parse(token: &str) -> EngineResult<Self> {
        match token {
            "catalyst" | "c" => Ok(Self::Catalyst),
            "reagent" | "r" => Ok(Self::Reagent),
            "formula" | "f" => Ok(Self::Formula),
            other => Err(EngineError::unknown_component_type(other)),
        }
    }

    /// Full lowercase type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catalyst => "catalyst",
            Self::Reagent => "reagent",
            Self::Formula => "formula",
        }
    }

    /// Plural directory name used in the on-disk component layout.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Catalyst => "catalysts",
            Self::Reagent => "reagents",
            Self::Formula => "formulas",
        }
    }

    /// Canonical export interface called on instances of this type.
    pub fn export_interface(&self) -> &'static str {
        match self {
            Self::Catalyst => "cyfr:catalyst/run@0.1.0",
            Self::Reagent => "cyfr:reagent/compute@0.1.0",
            Self::Formula => "cyfr:formula/run@0.1.0",
        }
    }

    /// Name of the exported function inside [`export_interface`](Self::export_interface).
    pub fn export_function(&self) -> &'static str {
        match self {
            Self::Reagent => "compute",
            Self::Catalyst | Self::Formula => "run",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a component: type, namespace, name, and version.
///
/// Equality is structural and the value is immutable after construction.
///
/// # Examples
///
/// ```
/// use cyfr_engine::core::reference::{ComponentRef, ComponentType};
///
/// let r = ComponentRef::parse("c:sum").unwrap();
/// assert_eq!(r.component_type, ComponentType::Catalyst);
/// assert_eq!(r.to_string(), "catalyst:local.sum:latest");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentRef {
    /// Component type (always present on a normalized ref)
    pub component_type: ComponentType,
    /// Namespace, `local` by default
    pub namespace: String,
    /// Component name
    pub name: String,
    /// `latest` or a valid semver version
    pub version: String,
}

impl ComponentRef {
    /// Construct a reference, validating every part.
    pub fn new(
        component_type: ComponentType,
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> EngineResult<Self> {
        let namespace = namespace.into();
        let name = name.into();
        let version = version.into();

        validate_segment(&namespace, "namespace")?;
        validate_segment(&name, "name")?;
        validate_version(&version)?;

        Ok(Self {
            component_type,
            namespace,
            name,
            version,
        })
    }

    /// Parse a reference string.
    ///
    /// The type is required: a plain `namespace.name:version` fails with a
    /// message suggesting the `catalyst:`/`reagent:`/`formula:` prefixes.
    pub fn parse(input: &str) -> EngineResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(EngineError::malformed_reference(input, "empty reference"));
        }

        let parts: Vec<&str> = trimmed.split(':').collect();
        let (type_token, middle, version) = match parts.as_slice() {
            [t, m, v] => (*t, *m, *v),
            [t, m] => (*t, *m, DEFAULT_VERSION),
            [_] => {
                return Err(EngineError::malformed_reference(
                    input,
                    "missing component type; prefix with catalyst:, reagent:, or formula:",
                ));
            }
            _ => {
                return Err(EngineError::malformed_reference(input, "too many ':' separators"));
            }
        };

        let component_type = ComponentType::parse(type_token).map_err(|_| {
            EngineError::malformed_reference(
                input,
                format!(
                    "unknown type '{type_token}'; prefix with catalyst:, reagent:, or formula:"
                ),
            )
        })?;

        let (namespace, name) = split_middle(input, middle)?;
        Self::new(component_type, namespace, name, version)
    }

    /// Parse and re-format, yielding the canonical string.
    ///
    /// Shorthand types expand, defaults fill in: `normalize("c:sum")` is
    /// `"catalyst:local.sum:latest"`.
    pub fn normalize(input: &str) -> EngineResult<String> {
        Ok(Self::parse(input)?.to_string())
    }

    /// Recover a reference from a component-layout path
    /// `components/<types>/<namespace>/<name>/<version>/<file>.wasm`.
    pub fn from_path(path: &Path) -> EngineResult<Self> {
        let segments: Vec<&str> = path
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect();

        let anchor = segments.iter().rposition(|s| *s == "components").ok_or_else(|| {
            EngineError::malformed_reference(
                path.display().to_string(),
                "path does not contain a components/ directory",
            )
        })?;

        let rest = &segments[anchor + 1..];
        if rest.len() < 4 {
            return Err(EngineError::malformed_reference(
                path.display().to_string(),
                "expected components/<type>/<namespace>/<name>/<version>/<file>.wasm",
            ));
        }

        let component_type = match rest[0] {
            "catalysts" | "catalyst" => ComponentType::Catalyst,
            "reagents" | "reagent" => ComponentType::Reagent,
            "formulas" | "formula" => ComponentType::Formula,
            other => return Err(EngineError::unknown_component_type(other)),
        };

        Self::new(component_type, rest[1], rest[2], rest[3])
    }

    /// Relative component-layout path for this reference.
    pub fn layout_path(&self) -> PathBuf {
        PathBuf::from("components")
            .join(self.component_type.dir_name())
            .join(&self.namespace)
            .join(&self.name)
            .join(&self.version)
            .join(format!("{}.wasm", self.component_type.as_str()))
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}.{}:{}",
            self.component_type, self.namespace, self.name, self.version
        )
    }
}

impl std::str::FromStr for ComponentRef {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn split_middle(input: &str, middle: &str) -> EngineResult<(String, String)> {
    let mut pieces = middle.split('.');
    match (pieces.next(), pieces.next(), pieces.next()) {
        (Some(name), None, None) => Ok((DEFAULT_NAMESPACE.to_string(), name.to_string())),
        (Some(ns), Some(name), None) => Ok((ns.to_string(), name.to_string())),
        _ => Err(EngineError::malformed_reference(
            input,
            "expected at most one '.' in namespace.name",
        )),
    }
}

fn validate_segment(segment: &str, what: &str) -> EngineResult<()> {
    if segment.is_empty() {
        return Err(EngineError::malformed_reference(segment, format!("empty {what}")));
    }
    if segment.len() > MAX_NAME_LEN {
        return Err(EngineError::malformed_reference(
            segment,
            format!("{what} exceeds {MAX_NAME_LEN} characters"),
        ));
    }
    let mut chars = segment.chars();
    // First char must be alphanumeric; the rest also allow '-' and '_'.
    let lead_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !lead_ok || !rest_ok {
        return Err(EngineError::malformed_reference(
            segment,
            format!("{what} must match [A-Za-z0-9][A-Za-z0-9_-]*"),
        ));
    }
    Ok(())
}

fn validate_version(version: &str) -> EngineResult<()> {
    if version == DEFAULT_VERSION {
        return Ok(());
    }
    semver::Version::parse(version).map_err(|e| {
        EngineError::malformed_reference(version, format!("version must be 'latest' or semver: {e}"))
    })?;
    Ok(())
}

/// Resolution address for a component binary.
///
/// A tagged value with exactly one of `local`, `arca`, `registry`, `oci`.
/// The JSON shape is a single-key map, e.g. `{"registry":
/// "reagent:local.sum:1.0.0"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reference {
    /// Absolute or allowlisted filesystem path
    Local(PathBuf),
    /// Path inside the user's object store (`artifacts/...`)
    Arca(String),
    /// Normalized canonical ref resolved through the component registry
    Registry(String),
    /// Canonical OCI reference (not yet implemented)
    Oci(String),
}

impl Reference {
    /// Extract the [`ComponentRef`] this address points at.
    ///
    /// Registry and OCI addresses carry a canonical ref; local and arca
    /// addresses recover the ref from the component-layout path.
    pub fn component_ref(&self) -> EngineResult<ComponentRef> {
        match self {
            Self::Registry(canonical) | Self::Oci(canonical) => ComponentRef::parse(canonical),
            Self::Local(path) => ComponentRef::from_path(path),
            Self::Arca(path) => ComponentRef::from_path(Path::new(path)),
        }
    }

    /// Short tag for telemetry and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Arca(_) => "arca",
            Self::Registry(_) => "registry",
            Self::Oci(_) => "oci",
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "local:{}", path.display()),
            Self::Arca(path) => write!(f, "arca:{path}"),
            Self::Registry(canonical) => write!(f, "registry:{canonical}"),
            Self::Oci(canonical) => write!(f, "oci:{canonical}"),
        }
    }
}
