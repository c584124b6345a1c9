//! IDENT frame payload assembly (§4.6/§6): a snapshot of who is docking and
//! what it is running on. Field order in the emitted JSON matches the wire
//! contract exactly (`uuid, version, service, binary?, tag?,
//! update_time_taken?, arch, physical_ram, cpu_features, devices, net`);
//! `serde_json`'s struct serialization already walks fields in declaration
//! order, so that order lives here, once, as the struct layout.
//!
//! Host facts (`arch`, `physical_ram`, `cpu_features`, `net`) are gathered
//! from Linux procfs, `/sys/class/net`, and `local-ip-address`, best-effort
//! rather than exhaustive. Every `net` entry still carries all seven
//! contracted fields (§6); ones this host can't answer are empty strings
//! rather than omitted.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NetInterface {
    pub name: String,
    pub addr: IpAddr,
    pub netmask: String,
    pub gateway: String,
    pub dns: String,
    pub mac: String,
    pub driver: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub uuid: Uuid,
    pub version: &'static str,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time_taken: Option<f64>,
    pub arch: &'static str,
    pub physical_ram: Option<u64>,
    pub cpu_features: Vec<String>,
    pub devices: Vec<String>,
    pub net: Vec<NetInterface>,
}

/// Read (or create and persist) the stable per-node UUID this agent
/// identifies itself with across restarts. Ground truth lives in a single
/// file next to the configured certs directory; a missing or unreadable
/// file is treated as "first boot" rather than an error.
pub fn load_or_create_uuid(path: &Path) -> Uuid {
    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(uuid) = Uuid::parse_str(raw.trim()) {
            return uuid;
        }
    }
    let uuid = Uuid::new_v4();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let _ = fs::write(path, uuid.to_string());
    uuid
}

pub fn default_uuid_path(certs_path: &str) -> PathBuf {
    Path::new(certs_path).join("uplink-node-id")
}

/// Build the identity snapshot sent in the IDENT frame right after docking.
pub fn gather(uuid: Uuid, service: String, tag: Option<String>) -> Identity {
    Identity {
        uuid,
        version: env!("CARGO_PKG_VERSION"),
        service,
        binary: current_binary_path(),
        tag,
        update_time_taken: None,
        arch: std::env::consts::ARCH,
        physical_ram: read_physical_ram_bytes(),
        cpu_features: read_cpu_features(),
        devices: Vec::new(),
        net: read_net_interfaces(),
    }
}

fn current_binary_path() -> Option<String> {
    std::env::current_exe().ok().map(|p| p.display().to_string())
}

/// `MemTotal` out of `/proc/meminfo`, in bytes. `None` off Linux or when the
/// file can't be read, since there is no portable alternative in the
/// ecosystem's stack for this crate.
fn read_physical_ram_bytes() -> Option<u64> {
    let contents = fs::read_to_string("/proc/meminfo").ok()?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kib: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kib * 1024);
        }
    }
    None
}

/// The `flags` line of the first logical CPU in `/proc/cpuinfo`, split into
/// individual feature names. Empty off Linux.
fn read_cpu_features() -> Vec<String> {
    let contents = match fs::read_to_string("/proc/cpuinfo") {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("flags").or_else(|| line.strip_prefix("Features")) {
            if let Some(rest) = rest.trim_start().strip_prefix(':') {
                return rest.split_whitespace().map(str::to_string).collect();
            }
        }
    }
    Vec::new()
}

/// Name+address pairs for every interface `local-ip-address` can see,
/// enriched with whatever `/sys/class/net/<name>` reveals about that
/// interface. Netmask, gateway, and DNS have no single per-interface source
/// on Linux without either an ioctl or parsing the routing table, so they
/// are emitted as empty strings rather than left out of the schema.
fn read_net_interfaces() -> Vec<NetInterface> {
    local_ip_address::list_afinet_netifas()
        .unwrap_or_default()
        .into_iter()
        .map(|(name, addr)| {
            let mac = read_sysfs_field(&name, "address").unwrap_or_default();
            let driver = read_driver_name(&name).unwrap_or_default();
            NetInterface {
                name,
                addr,
                netmask: String::new(),
                gateway: String::new(),
                dns: String::new(),
                mac,
                driver,
            }
        })
        .collect()
}

/// Reads `/sys/class/net/<name>/<field>`, trimmed. `None` off Linux, for a
/// virtual interface without that file, or when the process lacks
/// permission to read it.
fn read_sysfs_field(name: &str, field: &str) -> Option<String> {
    let contents = fs::read_to_string(format!("/sys/class/net/{name}/{field}")).ok()?;
    let value = contents.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// The driver bound to `name`, read from the basename of the
/// `/sys/class/net/<name>/device/driver` symlink.
fn read_driver_name(name: &str) -> Option<String> {
    let link = fs::read_link(format!("/sys/class/net/{name}/device/driver")).ok()?;
    link.file_name().map(|f| f.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_round_trips_through_the_persisted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uplink-node-id");
        let first = load_or_create_uuid(&path);
        let second = load_or_create_uuid(&path);
        assert_eq!(first, second);
    }

    #[test]
    fn gather_carries_through_service_and_tag() {
        let identity = gather(Uuid::nil(), "uplink".to_string(), Some("canary".to_string()));
        assert_eq!(identity.service, "uplink");
        assert_eq!(identity.tag.as_deref(), Some("canary"));
        assert_eq!(identity.arch, std::env::consts::ARCH);
    }

    #[test]
    fn serializes_optional_fields_only_when_present() {
        let identity = gather(Uuid::nil(), "uplink".to_string(), None);
        let json = serde_json::to_string(&identity).unwrap();
        assert!(!json.contains("\"tag\""));
        assert!(!json.contains("\"update_time_taken\""));
        assert!(json.starts_with("{\"uuid\":"));
    }

    #[test]
    fn net_interfaces_always_carry_every_contracted_field() {
        let iface = NetInterface {
            name: "eth0".to_string(),
            addr: "127.0.0.1".parse().unwrap(),
            netmask: String::new(),
            gateway: String::new(),
            dns: String::new(),
            mac: String::new(),
            driver: String::new(),
        };
        let json = serde_json::to_value(&iface).unwrap();
        for field in ["name", "addr", "netmask", "gateway", "dns", "mac", "driver"] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
    }
}
