//! Static NAT entry model and dataplane expansion.
//!
//! Config shape (`STATIC_NAT|<global_ip>`): `local_ip` is required,
//! `nat_type` defaults to `dnat`, and static entries always carry
//! `entry_type = static`. Each published app entry expands to exactly
//! three dataplane entries: a forward DNAT entry and a DNAT pool entry
//! keyed by the global address, plus the reverse SNAT entry keyed by the
//! local address.

use statesync_common::{fvs, fvs_get, FieldValues};

/// Config store table carrying static NAT intent.
pub const CFG_STATIC_NAT_TABLE: &str = "STATIC_NAT";
/// App table this daemon publishes.
pub const APP_NAT_TABLE: &str = "NAT_TABLE";
/// Downstream dataplane table fed from published app entries.
pub const DATAPLANE_NAT_TABLE: &str = "DATAPLANE_NAT_TABLE";

/// Warm restart app name.
pub const APP_NAME: &str = "natsyncd";

const FIELD_LOCAL_IP: &str = "local_ip";
const FIELD_TRANSLATED_IP: &str = "translated_ip";
const FIELD_NAT_TYPE: &str = "nat_type";

/// One validated static NAT mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatEntry {
    /// Public-facing address, the config entry key
    pub global_ip: String,
    /// Internal address the global one translates to
    pub local_ip: String,
    /// `dnat` unless configured otherwise
    pub nat_type: String,
}

impl NatEntry {
    /// Parses a config entry; `None` if `local_ip` is missing.
    pub fn from_config(global_ip: &str, entry: &FieldValues) -> Option<Self> {
        let local_ip = fvs_get(entry, FIELD_LOCAL_IP)?;
        let nat_type = fvs_get(entry, FIELD_NAT_TYPE).unwrap_or("dnat");
        Some(Self {
            global_ip: global_ip.to_string(),
            local_ip: local_ip.to_string(),
            nat_type: nat_type.to_string(),
        })
    }

    /// The app table entry published for this mapping.
    pub fn app_entry(&self) -> FieldValues {
        fvs(&[
            (FIELD_TRANSLATED_IP, &self.local_ip),
            (FIELD_NAT_TYPE, &self.nat_type),
            ("entry_type", "static"),
        ])
    }
}

/// Local address recorded in a published app entry.
pub fn translated_ip(app_entry: &FieldValues) -> Option<&str> {
    fvs_get(app_entry, FIELD_TRANSLATED_IP)
}

/// Dataplane key of the reverse SNAT entry for `local_ip`.
pub fn snat_key(local_ip: &str) -> String {
    format!("snat:{local_ip}")
}

/// Dataplane key of the forward DNAT entry for `global_ip`.
pub fn dnat_key(global_ip: &str) -> String {
    format!("dnat:{global_ip}")
}

/// Dataplane key of the DNAT pool entry for `global_ip`.
pub fn dnat_pool_key(global_ip: &str) -> String {
    format!("dnat_pool:{global_ip}")
}

/// The three dataplane entries one app entry expands to.
pub fn dataplane_entries(global_ip: &str, local_ip: &str) -> Vec<(String, FieldValues)> {
    vec![
        (
            snat_key(local_ip),
            fvs(&[
                (FIELD_TRANSLATED_IP, global_ip),
                (FIELD_NAT_TYPE, "snat"),
                ("entry_type", "static"),
            ]),
        ),
        (
            dnat_key(global_ip),
            fvs(&[
                (FIELD_TRANSLATED_IP, local_ip),
                (FIELD_NAT_TYPE, "dnat"),
                ("entry_type", "static"),
            ]),
        ),
        (dnat_pool_key(global_ip), fvs(&[("ip", global_ip)])),
    ]
}
