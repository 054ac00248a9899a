//! Tenant resolution from the request host.
//!
//! Provides [`TenantResolver`], which maps a request's host onto a tenant
//! through a [`TenantDirectory`]. In development, an explicit query
//! parameter can override the host lookup.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use switchyard_core::TenantId;
use tracing::debug;

use crate::config::ResolverConfig;
use crate::error::ResolutionError;

/// Source of tenant records. Persistence lives outside this crate.
pub trait TenantDirectory: Send + Sync {
    /// Tenant registered for a normalized (lowercase, portless) domain.
    fn lookup_domain(&self, domain: &str) -> Option<TenantId>;

    /// Whether `tenant` exists at all.
    fn contains(&self, tenant: &TenantId) -> bool;
}

/// Directory held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    domains: DashMap<String, TenantId>,
    tenants: DashSet<TenantId>,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `domain` to `tenant`, replacing any previous mapping.
    pub fn insert(&self, domain: &str, tenant: TenantId) {
        self.tenants.insert(tenant.clone());
        self.domains.insert(normalize_host(domain), tenant);
    }

    /// Registers a tenant without a domain (reachable by override only).
    pub fn add_tenant(&self, tenant: TenantId) {
        self.tenants.insert(tenant);
    }

    pub fn remove_domain(&self, domain: &str) -> Option<TenantId> {
        self.domains
            .remove(&normalize_host(domain))
            .map(|(_, tenant)| tenant)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl TenantDirectory for InMemoryDirectory {
    fn lookup_domain(&self, domain: &str) -> Option<TenantId> {
        self.domains.get(domain).map(|entry| entry.value().clone())
    }

    fn contains(&self, tenant: &TenantId) -> bool {
        self.tenants.contains(tenant)
    }
}

/// Lowercases `host` and strips the port and any trailing dot.
#[must_use]
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        // Bracketed IPv6 literal, optional port after the bracket.
        match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

/// Resolves tenants for inbound requests.
pub struct TenantResolver {
    directory: Arc<dyn TenantDirectory>,
    config: ResolverConfig,
}

impl TenantResolver {
    #[must_use]
    pub fn new(directory: Arc<dyn TenantDirectory>, config: ResolverConfig) -> Self {
        Self { directory, config }
    }

    /// Extracts and percent-decodes the override parameter from a raw query
    /// string, if overrides are enabled.
    #[must_use]
    pub fn override_from_query(&self, query: Option<&str>) -> Option<String> {
        if !self.config.dev_override {
            return None;
        }
        url::form_urlencoded::parse(query?.as_bytes())
            .find(|(name, _)| *name == self.config.override_param)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    }

    /// Resolves the tenant for `host`, honoring `query_override` when
    /// overrides are enabled.
    ///
    /// # Errors
    ///
    /// - [`ResolutionError::NotFound`] if no tenant is mapped to the host.
    /// - [`ResolutionError::InvalidOverride`] / [`ResolutionError::UnknownOverride`]
    ///   if an enabled override does not name a known tenant.
    pub fn resolve(&self, host: &str, query_override: Option<&str>) -> Result<TenantId, ResolutionError> {
        if self.config.dev_override {
            if let Some(raw) = query_override {
                let tenant = TenantId::new(raw)?;
                if !self.directory.contains(&tenant) {
                    return Err(ResolutionError::UnknownOverride {
                        tenant: raw.to_string(),
                    });
                }
                debug!(tenant = %tenant, "tenant resolved from override");
                return Ok(tenant);
            }
        }

        let domain = normalize_host(host);
        let tenant = self
            .directory
            .lookup_domain(&domain)
            .ok_or(ResolutionError::NotFound { host: domain })?;
        debug!(tenant = %tenant, host, "tenant resolved from host");
        Ok(tenant)
    }
}

impl std::fmt::Debug for TenantResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    fn resolver(dev_override: bool) -> TenantResolver {
        let directory = InMemoryDirectory::new();
        directory.insert("acme.example.com", tenant("acme"));
        directory.insert("globex.example.com", tenant("globex"));
        directory.add_tenant(tenant("initech"));
        TenantResolver::new(
            Arc::new(directory),
            ResolverConfig {
                dev_override,
                ..ResolverConfig::default()
            },
        )
    }

    #[test]
    fn normalize_strips_port_dot_and_case() {
        assert_eq!(normalize_host("ACME.Example.com:8443"), "acme.example.com");
        assert_eq!(normalize_host("acme.example.com."), "acme.example.com");
        assert_eq!(normalize_host(" acme.example.com "), "acme.example.com");
        assert_eq!(normalize_host("[::1]:8080"), "[::1]");
        assert_eq!(normalize_host("[::1]"), "[::1]");
    }

    #[test]
    fn resolves_case_insensitively() {
        let resolver = resolver(false);
        assert_eq!(resolver.resolve("ACME.example.com:443", None), Ok(tenant("acme")));
        assert_eq!(resolver.resolve("globex.example.com", None), Ok(tenant("globex")));
    }

    #[test]
    fn unknown_host_is_not_found() {
        let resolver = resolver(false);
        assert_eq!(
            resolver.resolve("Nope.example.com", None),
            Err(ResolutionError::NotFound {
                host: "nope.example.com".to_string()
            })
        );
    }

    #[test]
    fn override_ignored_when_disabled() {
        let resolver = resolver(false);
        assert_eq!(resolver.override_from_query(Some("tenant=globex")), None);
        assert_eq!(
            resolver.resolve("acme.example.com", Some("globex")),
            Ok(tenant("acme"))
        );
    }

    #[test]
    fn override_supersedes_host_when_enabled() {
        let resolver = resolver(true);
        let raw = resolver.override_from_query(Some("page=2&tenant=initech"));
        assert_eq!(raw.as_deref(), Some("initech"));
        assert_eq!(
            resolver.resolve("acme.example.com", raw.as_deref()),
            Ok(tenant("initech"))
        );
    }

    #[test]
    fn override_is_percent_decoded() {
        let resolver = resolver(true);
        assert_eq!(
            resolver.override_from_query(Some("tenant=acme%2Dco&x=1")).as_deref(),
            Some("acme-co")
        );
        let raw = resolver.override_from_query(Some("x=1&tenant=glob%65x"));
        assert_eq!(
            resolver.resolve("acme.example.com", raw.as_deref()),
            Ok(tenant("globex"))
        );
        // `+` decodes to a space, which no tenant id accepts.
        let raw = resolver.override_from_query(Some("tenant=bad+id"));
        assert!(matches!(
            resolver.resolve("acme.example.com", raw.as_deref()),
            Err(ResolutionError::InvalidOverride(_))
        ));
    }

    #[test]
    fn override_must_name_known_tenant() {
        let resolver = resolver(true);
        assert!(matches!(
            resolver.resolve("acme.example.com", Some("umbrella")),
            Err(ResolutionError::UnknownOverride { .. })
        ));
        assert!(matches!(
            resolver.resolve("acme.example.com", Some("bad tenant")),
            Err(ResolutionError::InvalidOverride(_))
        ));
    }

    #[test]
    fn empty_override_falls_back_to_host() {
        let resolver = resolver(true);
        assert_eq!(resolver.override_from_query(Some("tenant=")), None);
        assert_eq!(resolver.override_from_query(None), None);
    }

    #[test]
    fn remove_domain() {
        let directory = InMemoryDirectory::new();
        directory.insert("Acme.example.com", tenant("acme"));
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.remove_domain("acme.example.com"), Some(tenant("acme")));
        assert!(directory.is_empty());
        // Tenant is still known for overrides.
        assert!(directory.contains(&tenant("acme")));
    }
}
