//! Per-request context.
//!
//! Tenant identity travels through an explicit context object with a typed
//! getter rather than ambient task-local state. The transport layer builds
//! one of these per request from its own headers or metadata; everything
//! below the transport only sees the context.

/// Metadata key under which transports propagate the originating source
/// address (first entry of the forwarded chain). Used for telemetry only.
pub const SOURCE_METADATA_KEY: &str = "x-forwarded-for";

/// Context attached to every request entering a Tephra service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    tenant_id: Option<String>,
    source: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for the given tenant. The usual constructor in tests.
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            source: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Attaches the request's source tag. Empty sources are dropped, matching
    /// the forwarding convention where an absent entry means "unknown".
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        if !source.is_empty() {
            self.source = Some(source);
        }
        self
    }

    /// The tenant this request acts on behalf of, if the transport supplied
    /// one. Callers that require a tenant decide how to fail.
    pub fn tenant(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// The source tag extracted from the forwarded chain, for telemetry.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}
