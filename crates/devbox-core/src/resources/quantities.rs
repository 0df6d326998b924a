use crate::error::{DevboxError, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// CPU and memory amounts in canonical units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceQuantities {
    /// CPU in millicores (1000 = 1 core)
    pub cpu_millicores: i64,
    /// Memory in bytes
    pub memory_bytes: i64,
}

impl ResourceQuantities {
    /// Parse CPU string (e.g., "2", "1000m", "0.5")
    pub fn parse_cpu(s: &str) -> Result<i64> {
        if let Some(m) = s.strip_suffix('m') {
            m.parse::<i64>()
                .map_err(|_| DevboxError::invalid_quantity("cpu", s))
        } else if let Ok(cores) = s.parse::<f64>() {
            Ok((cores * 1000.0).round() as i64)
        } else {
            Err(DevboxError::invalid_quantity("cpu", s))
        }
    }

    /// Parse a byte quantity (e.g., "128Mi", "1Gi", "10G", "1024")
    pub fn parse_memory(s: &str) -> Result<i64> {
        const SUFFIXES: [(&str, i64); 8] = [
            ("Ki", 1 << 10),
            ("Mi", 1 << 20),
            ("Gi", 1 << 30),
            ("Ti", 1 << 40),
            ("k", 1_000),
            ("M", 1_000_000),
            ("G", 1_000_000_000),
            ("T", 1_000_000_000_000),
        ];

        let invalid = || DevboxError::invalid_quantity("memory", s);

        for (suffix, multiplier) in SUFFIXES {
            if let Some(num) = s.strip_suffix(suffix) {
                let value = num.parse::<f64>().map_err(|_| invalid())?;
                return Ok((value * multiplier as f64).round() as i64);
            }
        }

        s.parse::<i64>().map_err(|_| invalid())
    }

    /// Render millicores the way the API server would ("500m", "2")
    pub fn format_cpu(millicores: i64) -> String {
        if millicores % 1000 == 0 {
            format!("{}", millicores / 1000)
        } else {
            format!("{}m", millicores)
        }
    }

    /// Render bytes with the largest clean binary suffix
    pub fn format_memory(bytes: i64) -> String {
        const GIB: i64 = 1024 * 1024 * 1024;
        const MIB: i64 = 1024 * 1024;
        const KIB: i64 = 1024;

        if bytes > 0 && bytes % GIB == 0 {
            format!("{}Gi", bytes / GIB)
        } else if bytes > 0 && bytes % MIB == 0 {
            format!("{}Mi", bytes / MIB)
        } else if bytes > 0 && bytes % KIB == 0 {
            format!("{}Ki", bytes / KIB)
        } else {
            format!("{}", bytes)
        }
    }

    /// Get CPU and memory from a resource map (k8s-openapi format)
    pub fn from_k8s_resource_map(resources: &BTreeMap<String, Quantity>) -> Result<Self> {
        let cpu_millicores = match resources.get("cpu") {
            Some(q) => Self::parse_cpu(&q.0)?,
            None => 0,
        };

        let memory_bytes = match resources.get("memory") {
            Some(q) => Self::parse_memory(&q.0)?,
            None => 0,
        };

        Ok(Self {
            cpu_millicores,
            memory_bytes,
        })
    }

    /// Compare two quantities of the same resource by value, not spelling
    pub fn same_quantity(resource: &str, a: &Quantity, b: &Quantity) -> bool {
        if a.0 == b.0 {
            return true;
        }
        let parsed = if resource == "cpu" {
            Self::parse_cpu(&a.0).ok().zip(Self::parse_cpu(&b.0).ok())
        } else {
            Self::parse_memory(&a.0).ok().zip(Self::parse_memory(&b.0).ok())
        };
        matches!(parsed, Some((x, y)) if x == y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu() {
        assert_eq!(ResourceQuantities::parse_cpu("1").unwrap(), 1000);
        assert_eq!(ResourceQuantities::parse_cpu("0.5").unwrap(), 500);
        assert_eq!(ResourceQuantities::parse_cpu("100m").unwrap(), 100);
        assert!(ResourceQuantities::parse_cpu("lots").is_err());
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(ResourceQuantities::parse_memory("1024").unwrap(), 1024);
        assert_eq!(ResourceQuantities::parse_memory("1Ki").unwrap(), 1024);
        assert_eq!(
            ResourceQuantities::parse_memory("128Mi").unwrap(),
            128 * 1024 * 1024
        );
        assert_eq!(
            ResourceQuantities::parse_memory("10G").unwrap(),
            10_000_000_000
        );
        assert!(ResourceQuantities::parse_memory("Gi").is_err());
    }

    #[test]
    fn test_format_round_trips_common_values() {
        assert_eq!(ResourceQuantities::format_cpu(2000), "2");
        assert_eq!(ResourceQuantities::format_cpu(250), "250m");
        assert_eq!(ResourceQuantities::format_memory(4 * 1024 * 1024 * 1024), "4Gi");
        assert_eq!(ResourceQuantities::format_memory(512 * 1024 * 1024), "512Mi");
        assert_eq!(ResourceQuantities::format_memory(1023), "1023");
    }

    #[test]
    fn test_same_quantity() {
        assert!(ResourceQuantities::same_quantity(
            "cpu",
            &Quantity("1000m".to_string()),
            &Quantity("1".to_string())
        ));
        assert!(ResourceQuantities::same_quantity(
            "memory",
            &Quantity("1024Mi".to_string()),
            &Quantity("1Gi".to_string())
        ));
        assert!(!ResourceQuantities::same_quantity(
            "memory",
            &Quantity("1Gi".to_string()),
            &Quantity("2Gi".to_string())
        ));
    }

    #[test]
    fn test_from_k8s_resource_map() {
        let map = BTreeMap::from([
            ("cpu".to_string(), Quantity("2".to_string())),
            ("memory".to_string(), Quantity("4Gi".to_string())),
        ]);
        let q = ResourceQuantities::from_k8s_resource_map(&map).unwrap();
        assert_eq!(q.cpu_millicores, 2000);
        assert_eq!(q.memory_bytes, 4 * 1024 * 1024 * 1024);
    }
}
