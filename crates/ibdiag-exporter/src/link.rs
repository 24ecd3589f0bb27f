//! Link and switch records produced by a net-dump scrape

use serde::{Deserialize, Serialize};

/// Link state token ibdiagnet prints for an active port
pub const STATE_ACTIVE: &str = "ACT";

/// One observed or inferred link for a scrape.
///
/// "Remote" is the switch whose block the line came from, "local" is the
/// neighbor on the other end of the cable. The same shape is persisted in the
/// baseline snapshot, hence the camelCase field names on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkRecord {
    pub remote_guid: String,
    pub remote_name: String,
    pub remote_port: String,
    /// Vendor state token, kept verbatim (`ACT`, `DOWN`, `INI`, ...)
    pub state: String,
    pub local_guid: String,
    pub local_name: String,
    pub local_port: String,
}

impl LinkRecord {
    /// Baseline key, `"{remoteGuid}_{remotePort}"`
    pub fn cache_key(&self) -> String {
        cache_key(&self.remote_guid, &self.remote_port)
    }

    pub fn is_active(&self) -> bool {
        self.state == STATE_ACTIVE
    }
}

/// Baseline key for a switch guid and port number
pub fn cache_key(guid: &str, port: &str) -> String {
    format!("{}_{}", guid, port)
}

/// Guid part of a baseline key
pub fn guid_of_key(key: &str) -> &str {
    key.split('_').next().unwrap_or(key)
}

/// Whether a switch is present in the current scrape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchPresence {
    pub guid: String,
    pub name: String,
    pub up: bool,
}

impl SwitchPresence {
    pub fn up(guid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            up: true,
        }
    }

    pub fn down(guid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            up: false,
        }
    }

    pub fn state(&self) -> &'static str {
        if self.up {
            "UP"
        } else {
            "DOWN"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_format() {
        let record = LinkRecord {
            remote_guid: "0x0c42a10300a1b2c3".to_string(),
            remote_port: "17".to_string(),
            ..Default::default()
        };
        assert_eq!(record.cache_key(), "0x0c42a10300a1b2c3_17");
        assert_eq!(guid_of_key(&record.cache_key()), "0x0c42a10300a1b2c3");
    }

    #[test]
    fn test_guid_of_key_without_separator() {
        assert_eq!(guid_of_key("0x0c42a10300a1b2c3"), "0x0c42a10300a1b2c3");
    }

    #[test]
    fn test_is_active() {
        let mut record = LinkRecord {
            state: "ACT".to_string(),
            ..Default::default()
        };
        assert!(record.is_active());
        record.state = "DOWN".to_string();
        assert!(!record.is_active());
    }

    #[test]
    fn test_wire_names_are_camel_case() {
        let record = LinkRecord {
            remote_guid: "0x1".to_string(),
            local_name: "node01 mlx5_0".to_string(),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&record).unwrap();
        assert!(yaml.contains("remoteGuid:"));
        assert!(!yaml.contains("remote_guid"));
        assert!(yaml.contains("localName: node01 mlx5_0"));
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let record: LinkRecord = serde_yaml::from_str("remoteName: spine-01\n").unwrap();
        assert_eq!(record.remote_name, "spine-01");
        assert!(record.local_guid.is_empty());
        assert!(record.local_port.is_empty());
    }

    #[test]
    fn test_switch_presence_state() {
        assert_eq!(SwitchPresence::up("0x1", "a").state(), "UP");
        assert_eq!(SwitchPresence::down("0x1", "a").state(), "DOWN");
    }
}
