use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::ConfigError;
use crate::ttl::Ttl;

/// Physical tables backing one tenant at one retention class. An empty
/// `anno_table` means the class has no annotation storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(default)]
    pub span_table: String,
    #[serde(default)]
    pub anno_table: String,
}

/// Tenant-to-table topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    #[serde(default)]
    pub tenant_tables: HashMap<String, BTreeMap<Ttl, TableConfig>>,
    #[serde(default)]
    pub tenants_support_annotation: HashMap<String, bool>,
}

impl TenantConfig {
    pub fn with_tables(
        mut self,
        tenant: impl Into<String>,
        ttl: Ttl,
        span_table: impl Into<String>,
        anno_table: impl Into<String>,
    ) -> Self {
        self.tenant_tables.entry(tenant.into()).or_default().insert(
            ttl,
            TableConfig {
                span_table: span_table.into(),
                anno_table: anno_table.into(),
            },
        );
        self
    }

    pub fn with_annotation_support(mut self, tenant: impl Into<String>, supported: bool) -> Self {
        self.tenants_support_annotation.insert(tenant.into(), supported);
        self
    }

    pub fn supports_annotation(&self, tenant: &str) -> bool {
        self.tenants_support_annotation.get(tenant).copied().unwrap_or(false)
    }
}

/// Source of the tenant-table topology. Implementations may refresh in the
/// background; callers fetch on every request and do not cache.
pub trait TenantConfigProvider: Send + Sync {
    fn tenant_config(&self, ctx: &RequestContext) -> Result<TenantConfig, ConfigError>;
}

/// A fixed topology, mostly useful for wiring tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTenantConfig(pub TenantConfig);

impl TenantConfigProvider for StaticTenantConfig {
    fn tenant_config(&self, _ctx: &RequestContext) -> Result<TenantConfig, ConfigError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_json() {
        let json = r#"{
            "tenant_tables": {
                "acme": {
                    "3d": {"span_table": "spans_3d", "anno_table": "annos_3d"},
                    "30d": {"span_table": "spans_30d"}
                }
            },
            "tenants_support_annotation": {"acme": true}
        }"#;
        let cfg: TenantConfig = serde_json::from_str(json).unwrap();
        let tables = &cfg.tenant_tables["acme"];
        assert_eq!(tables[&Ttl::ThreeDays].anno_table, "annos_3d");
        assert_eq!(tables[&Ttl::ThirtyDays].anno_table, "");
        assert!(cfg.supports_annotation("acme"));
        assert!(!cfg.supports_annotation("other"));
    }

    #[test]
    fn test_builder_helpers() {
        let cfg = TenantConfig::default()
            .with_tables("t", Ttl::SevenDays, "s7", "a7")
            .with_annotation_support("t", true);
        let provider = StaticTenantConfig(cfg.clone());
        assert_eq!(provider.tenant_config(&RequestContext::new()).unwrap(), cfg);
    }
}
