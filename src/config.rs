// Client configuration
//
// The settings record mirrors the option names the host fleet's own
// configuration uses (camelCase on the wire), so one JSON document can
// drive both sides of a deployment.

use crate::error::{CacheError, Result};
use crate::transport::{HostEndpoint, TransportOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// Cache client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientSettings {
    /// Initial fleet of cache hosts
    pub cache_hosts: Vec<HostEndpoint>,

    /// Extra replicas per bucket; bucket width is `1 + layers`
    pub host_redundancy_layers: usize,

    /// Seconds a host connection waits between reconnect attempts
    pub host_reconnect_interval_seconds: u64,

    /// Seconds before an in-flight RPC times out in the transport
    pub communication_timeout_seconds: u64,

    /// Socket receive buffer size in bytes
    pub message_buffer_size: usize,

    /// Largest message the transport will accept, in kilobytes
    #[serde(rename = "maximumMessageSizeKB")]
    pub maximum_message_size_kb: usize,

    /// Listen for multicast host beacons and grow the fleet at runtime
    pub auto_detect_cache_hosts: bool,

    /// Multicast group the host fleet announces itself on
    pub udp_multicast_ip: String,

    /// Port of the multicast group
    pub udp_multicast_port: u16,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            cache_hosts: Vec::new(),
            host_redundancy_layers: 0,
            host_reconnect_interval_seconds: 10,
            communication_timeout_seconds: 10,
            message_buffer_size: 4096,
            maximum_message_size_kb: 1024,
            auto_detect_cache_hosts: false,
            udp_multicast_ip: String::new(),
            udp_multicast_port: 0,
        }
    }
}

impl ClientSettings {
    /// Load settings from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| CacheError::Configuration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject settings a client cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.host_reconnect_interval_seconds == 0 {
            return Err(CacheError::Configuration(
                "hostReconnectIntervalSeconds must be at least 1".to_string(),
            ));
        }
        if self.communication_timeout_seconds == 0 {
            return Err(CacheError::Configuration(
                "communicationTimeoutSeconds must be at least 1".to_string(),
            ));
        }
        if self.message_buffer_size == 0 {
            return Err(CacheError::Configuration(
                "messageBufferSize must be at least 1".to_string(),
            ));
        }
        if self.maximum_message_size_kb == 0 {
            return Err(CacheError::Configuration(
                "maximumMessageSizeKB must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for endpoint in &self.cache_hosts {
            if !seen.insert(endpoint) {
                return Err(CacheError::Configuration(format!(
                    "duplicate cache host {}",
                    endpoint
                )));
            }
        }

        if self.auto_detect_cache_hosts {
            self.multicast_group()?;
        }

        Ok(())
    }

    /// The multicast group discovery listens on, validated
    pub fn multicast_group(&self) -> Result<(Ipv4Addr, u16)> {
        if self.udp_multicast_ip.trim().is_empty() {
            return Err(CacheError::Configuration(
                "udpMulticastIp is required when autoDetectCacheHosts is enabled".to_string(),
            ));
        }

        let group: Ipv4Addr = self.udp_multicast_ip.parse().map_err(|_| {
            CacheError::Configuration(format!(
                "udpMulticastIp \"{}\" is not a valid IPv4 address",
                self.udp_multicast_ip
            ))
        })?;
        if !group.is_multicast() {
            return Err(CacheError::Configuration(format!(
                "udpMulticastIp \"{}\" is not a multicast group",
                group
            )));
        }

        if self.udp_multicast_port == 0 {
            return Err(CacheError::Configuration(
                "udpMulticastPort is required when autoDetectCacheHosts is enabled".to_string(),
            ));
        }

        Ok((group, self.udp_multicast_port))
    }

    /// Transport tuning derived from these settings
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            reconnect_interval: Duration::from_secs(self.host_reconnect_interval_seconds),
            communication_timeout: Duration::from_secs(self.communication_timeout_seconds),
            message_buffer_size: self.message_buffer_size,
            maximum_message_size: self.maximum_message_size_kb * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        ClientSettings::default().validate().unwrap();
    }

    #[test]
    fn test_json_loading_uses_the_fleet_option_names() {
        let settings = ClientSettings::from_json_str(
            r#"{
                "cacheHosts": [{"address": "10.0.0.1", "port": 6969}],
                "hostRedundancyLayers": 1,
                "communicationTimeoutSeconds": 5
            }"#,
        )
        .unwrap();

        assert_eq!(settings.cache_hosts, vec![HostEndpoint::new("10.0.0.1", 6969)]);
        assert_eq!(settings.host_redundancy_layers, 1);
        assert_eq!(settings.communication_timeout_seconds, 5);
        assert_eq!(settings.host_reconnect_interval_seconds, 10);
    }

    #[test]
    fn test_duplicate_hosts_are_rejected() {
        let settings = ClientSettings {
            cache_hosts: vec![
                HostEndpoint::new("10.0.0.1", 1),
                HostEndpoint::new("10.0.0.1", 1),
            ],
            ..ClientSettings::default()
        };

        assert!(matches!(
            settings.validate(),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn test_auto_detect_requires_a_multicast_group() {
        let mut settings = ClientSettings {
            auto_detect_cache_hosts: true,
            ..ClientSettings::default()
        };
        assert!(settings.validate().is_err());

        settings.udp_multicast_ip = "10.0.0.1".to_string();
        settings.udp_multicast_port = 6970;
        assert!(settings.validate().is_err());

        settings.udp_multicast_ip = "224.0.0.251".to_string();
        settings.validate().unwrap();
        assert_eq!(
            settings.multicast_group().unwrap(),
            ("224.0.0.251".parse().unwrap(), 6970)
        );
    }

    #[test]
    fn test_zero_timeouts_are_rejected() {
        let settings = ClientSettings {
            communication_timeout_seconds: 0,
            ..ClientSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = ClientSettings {
            host_reconnect_interval_seconds: 0,
            ..ClientSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_transport_options_convert_units() {
        let options = ClientSettings {
            communication_timeout_seconds: 5,
            maximum_message_size_kb: 2,
            ..ClientSettings::default()
        }
        .transport_options();

        assert_eq!(options.communication_timeout, Duration::from_secs(5));
        assert_eq!(options.maximum_message_size, 2048);
    }
}
