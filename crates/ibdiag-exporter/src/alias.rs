//! Device alias resolution
//!
//! ibdiagnet describes adapter neighbors as `"<hostname> <alias>"`, where the
//! alias is whatever the node description carries (`HCA-3`, `mlx5_10`, ...).
//! The resolver maps such aliases to one canonical device id and, for
//! canonical ids that are cabled to a known leaf switch, yields that leaf's
//! name.
//!
//! Both tables are plain configuration values so fabrics with a different
//! naming convention can supply their own.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Alias tables injected into [`AliasResolver`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTable {
    /// Device alias → canonical device id
    #[serde(default = "default_device_aliases")]
    pub devices: BTreeMap<String, String>,

    /// Canonical device id → leaf switch name
    #[serde(default)]
    pub leaf_names: BTreeMap<String, String>,
}

/// HCA ordinal to mlx5 device index as enumerated on the reference hosts.
fn default_device_aliases() -> BTreeMap<String, String> {
    [
        ("HCA-1", "mlx5_0"),
        ("HCA-2", "mlx5_1"),
        ("HCA-3", "mlx5_10"),
        ("HCA-4", "mlx5_11"),
        ("HCA-5", "mlx5_2"),
        ("HCA-6", "mlx5_3"),
        ("HCA-11", "mlx5_8"),
        ("HCA-12", "mlx5_8"),
    ]
    .into_iter()
    .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
    .collect()
}

impl Default for AliasTable {
    fn default() -> Self {
        Self {
            devices: default_device_aliases(),
            leaf_names: BTreeMap::new(),
        }
    }
}

/// Read-only alias lookups, safe to share between scrapes
#[derive(Debug, Clone, Default)]
pub struct AliasResolver {
    table: AliasTable,
}

impl AliasResolver {
    pub fn new(table: AliasTable) -> Self {
        Self { table }
    }

    /// Canonical id for `alias`; unknown aliases pass through unchanged.
    pub fn resolve<'a>(&'a self, alias: &'a str) -> &'a str {
        self.table
            .devices
            .get(alias)
            .map(String::as_str)
            .unwrap_or(alias)
    }

    /// Leaf switch name for a canonical id, if the fabric map knows one.
    pub fn leaf_name(&self, canonical: &str) -> Option<&str> {
        self.table.leaf_names.get(canonical).map(String::as_str)
    }

    pub fn table(&self) -> &AliasTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_alias() {
        let resolver = AliasResolver::default();
        assert_eq!(resolver.resolve("HCA-3"), "mlx5_10");
        assert_eq!(resolver.resolve("HCA-1"), "mlx5_0");
    }

    #[test]
    fn test_resolve_unknown_alias_is_identity() {
        let resolver = AliasResolver::default();
        assert_eq!(resolver.resolve("unknown-token"), "unknown-token");
        assert_eq!(resolver.resolve("mlx5_4"), "mlx5_4");
    }

    #[test]
    fn test_two_aliases_may_share_a_device() {
        let resolver = AliasResolver::default();
        assert_eq!(resolver.resolve("HCA-11"), resolver.resolve("HCA-12"));
    }

    #[test]
    fn test_leaf_name_miss_is_none() {
        let resolver = AliasResolver::default();
        assert_eq!(resolver.leaf_name("mlx5_0"), None);
    }

    #[test]
    fn test_injected_tables() {
        let mut table = AliasTable::default();
        table
            .devices
            .insert("PORT-A".to_string(), "mlx5_7".to_string());
        table
            .leaf_names
            .insert("mlx5_7".to_string(), "leaf-07".to_string());
        let resolver = AliasResolver::new(table);

        let canonical = resolver.resolve("PORT-A");
        assert_eq!(canonical, "mlx5_7");
        assert_eq!(resolver.leaf_name(canonical), Some("leaf-07"));
    }

    #[test]
    fn test_toml_deserialization_keeps_default_devices() {
        let table: AliasTable = toml::from_str(
            r#"
[leaf_names]
mlx5_0 = "leaf-01"
"#,
        )
        .unwrap();
        assert_eq!(table.devices.get("HCA-3").map(String::as_str), Some("mlx5_10"));
        assert_eq!(table.leaf_names.get("mlx5_0").map(String::as_str), Some("leaf-01"));
    }
}
