//! Tenant-to-table routing.
//!
//! Reads go to every table a tenant has at any retention class; writes go to
//! exactly one table chosen by tenant and TTL.

use std::collections::{HashMap, HashSet};

use tracekeep_core::config::TenantConfigProvider;
use tracekeep_core::context::RequestContext;
use tracekeep_core::error::{RepoError, TableKind};
use tracekeep_core::ttl::Ttl;
use tracing::error;

/// Physical tables a tenant set can be read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTables {
    pub span_tables: Vec<String>,
    pub anno_tables: Vec<String>,
    pub anno_table_map: HashMap<String, String>,
    /// At least one requested tenant stores annotations.
    pub needs_annotation_join: bool,
}

pub struct TableResolver<'a> {
    provider: &'a dyn TenantConfigProvider,
}

impl<'a> TableResolver<'a> {
    pub fn new(provider: &'a dyn TenantConfigProvider) -> Self {
        Self { provider }
    }

    pub fn resolve_query_tables(
        &self,
        ctx: &RequestContext,
        tenants: &[String],
    ) -> Result<QueryTables, RepoError> {
        if tenants.is_empty() {
            return Err(RepoError::invalid_param("no tenants configured"));
        }
        let config = self.provider.tenant_config(ctx).map_err(|e| {
            error!("fail to get tenant table config: {e}");
            RepoError::from(e)
        })?;

        let mut span_tables = Vec::new();
        let mut anno_tables = Vec::new();
        let mut anno_table_map = HashMap::new();
        for tenant in tenants {
            let Some(tables) = config.tenant_tables.get(tenant) else {
                continue;
            };
            for table in tables.values() {
                if table.span_table.is_empty() {
                    continue;
                }
                span_tables.push(table.span_table.clone());
                if !table.anno_table.is_empty() {
                    anno_tables.push(table.anno_table.clone());
                    anno_table_map.insert(table.span_table.clone(), table.anno_table.clone());
                }
            }
        }

        Ok(QueryTables {
            span_tables: uniq(span_tables),
            anno_tables: uniq(anno_tables),
            anno_table_map,
            needs_annotation_join: tenants.iter().any(|t| config.supports_annotation(t)),
        })
    }

    /// Resolves the single table a write for `tenant` at `ttl` lands in. A
    /// missing entry or an empty table name is a configuration defect and is
    /// never defaulted.
    pub fn resolve_write_table(
        &self,
        ctx: &RequestContext,
        tenant: &str,
        ttl: Ttl,
        kind: TableKind,
    ) -> Result<String, RepoError> {
        let config = self.provider.tenant_config(ctx).map_err(|e| {
            error!("fail to get tenant config: {e}");
            RepoError::from(e)
        })?;
        let table = config
            .tenant_tables
            .get(tenant)
            .and_then(|tables| tables.get(&ttl))
            .map(|cfg| match kind {
                TableKind::Span => cfg.span_table.as_str(),
                TableKind::Annotation => cfg.anno_table.as_str(),
            })
            .unwrap_or_default();
        if table.is_empty() {
            return Err(RepoError::Configuration {
                tenant: tenant.to_string(),
                ttl,
                kind,
            });
        }
        Ok(table.to_string())
    }
}

fn uniq(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|s| seen.insert(s.clone())).collect()
}

#[cfg(test)]
mod tests {
    use tracekeep_core::config::{StaticTenantConfig, TenantConfig};
    use tracekeep_core::error::ConfigError;

    use super::*;

    struct BrokenConfig;

    impl TenantConfigProvider for BrokenConfig {
        fn tenant_config(
            &self,
            _ctx: &RequestContext,
        ) -> Result<tracekeep_core::config::TenantConfig, ConfigError> {
            Err(ConfigError::Read("config center unavailable".into()))
        }
    }

    fn tenants(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn provider() -> StaticTenantConfig {
        StaticTenantConfig(
            TenantConfig::default()
                .with_tables("a", Ttl::ThreeDays, "spans_3d", "annos_3d")
                .with_tables("a", Ttl::ThirtyDays, "spans_30d", "")
                .with_tables("b", Ttl::ThreeDays, "spans_3d", "annos_3d")
                .with_tables("b", Ttl::Year, "spans_b_365d", "annos_b_365d")
                .with_tables("c", Ttl::SevenDays, "", "annos_c_7d")
                .with_annotation_support("b", true),
        )
    }

    #[test]
    fn test_query_tables_union_is_deduplicated() {
        let provider = provider();
        let resolver = TableResolver::new(&provider);
        let tables = resolver
            .resolve_query_tables(&RequestContext::new(), &tenants(&["a", "b"]))
            .unwrap();
        assert_eq!(tables.span_tables, ["spans_3d", "spans_30d", "spans_b_365d"]);
        assert_eq!(tables.anno_tables, ["annos_3d", "annos_b_365d"]);
        assert_eq!(tables.anno_table_map["spans_3d"], "annos_3d");
        assert!(!tables.anno_table_map.contains_key("spans_30d"));
        assert!(tables.needs_annotation_join);
    }

    #[test]
    fn test_query_tables_annotation_flag_needs_flagged_tenant() {
        let provider = provider();
        let resolver = TableResolver::new(&provider);
        let tables = resolver
            .resolve_query_tables(&RequestContext::new(), &tenants(&["a", "unknown"]))
            .unwrap();
        assert!(!tables.needs_annotation_join);
        assert_eq!(tables.span_tables, ["spans_3d", "spans_30d"]);
    }

    #[test]
    fn test_query_tables_empty_tenants_is_invalid() {
        let resolver = TableResolver::new(&BrokenConfig);
        let err = resolver
            .resolve_query_tables(&RequestContext::new(), &[])
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidParam(_)));
    }

    #[test]
    fn test_provider_failure_is_internal() {
        let resolver = TableResolver::new(&BrokenConfig);
        let err = resolver
            .resolve_query_tables(&RequestContext::new(), &tenants(&["a"]))
            .unwrap_err();
        assert!(matches!(err, RepoError::Internal(_)));
        let err = resolver
            .resolve_write_table(&RequestContext::new(), "a", Ttl::ThreeDays, TableKind::Span)
            .unwrap_err();
        assert!(matches!(err, RepoError::Internal(_)));
    }

    #[test]
    fn test_write_table_resolution() {
        let provider = provider();
        let resolver = TableResolver::new(&provider);
        let ctx = RequestContext::new();
        assert_eq!(
            resolver
                .resolve_write_table(&ctx, "b", Ttl::Year, TableKind::Span)
                .unwrap(),
            "spans_b_365d"
        );
        assert_eq!(
            resolver
                .resolve_write_table(&ctx, "b", Ttl::Year, TableKind::Annotation)
                .unwrap(),
            "annos_b_365d"
        );
    }

    #[test]
    fn test_write_table_never_defaults() {
        let provider = provider();
        let resolver = TableResolver::new(&provider);
        let ctx = RequestContext::new();
        let cases = [
            ("a", Ttl::SevenDays, TableKind::Span),
            ("a", Ttl::ThirtyDays, TableKind::Annotation),
            ("c", Ttl::SevenDays, TableKind::Span),
            ("missing", Ttl::ThreeDays, TableKind::Span),
        ];
        for (tenant, ttl, kind) in cases {
            let err = resolver.resolve_write_table(&ctx, tenant, ttl, kind).unwrap_err();
            match err {
                RepoError::Configuration {
                    tenant: t,
                    ttl: got_ttl,
                    kind: got_kind,
                } => {
                    assert_eq!(t, tenant);
                    assert_eq!(got_ttl, ttl);
                    assert_eq!(got_kind, kind);
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
    }
}
