//! Route feed records and ECMP canonicalization.
//!
//! The feed carries already-decoded route announcements as JSON objects,
//! one per line: `{"prefix": "...", "nexthops": [...], "ifnames": [...]}`
//! announces, `{"prefix": "...", "op": "del"}` withdraws. Path sets are
//! canonicalized before publication so that any permutation of the same
//! paths produces a byte-identical entry.

use serde::Deserialize;
use statesync_common::{fvs, FieldValues};
use statesync_core::{ChangeRecord, EngineError, Result};

/// App table this daemon publishes.
pub const APP_ROUTE_TABLE: &str = "ROUTE_TABLE";
/// Warm restart app name.
pub const APP_NAME: &str = "routesyncd";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedOp {
    #[default]
    Set,
    Del,
}

/// One decoded line of the route feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedRecord {
    pub prefix: String,
    #[serde(default)]
    pub op: FeedOp,
    #[serde(default)]
    pub nexthops: Vec<String>,
    #[serde(default)]
    pub ifnames: Vec<String>,
}

impl FeedRecord {
    /// Parses one feed line.
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| EngineError::source(e.to_string()))
    }
}

/// Canonical published form of a path set: pairs sorted by
/// (nexthop, ifname), comma-joined into the two fields.
pub fn canonical_route_entry(nexthops: &[String], ifnames: &[String]) -> Result<FieldValues> {
    if nexthops.len() != ifnames.len() {
        return Err(EngineError::source(format!(
            "{} nexthops but {} ifnames",
            nexthops.len(),
            ifnames.len()
        )));
    }

    let mut paths: Vec<(&str, &str)> = nexthops
        .iter()
        .map(String::as_str)
        .zip(ifnames.iter().map(String::as_str))
        .collect();
    paths.sort_unstable();
    paths.dedup();

    let nexthop = paths.iter().map(|(nh, _)| *nh).collect::<Vec<_>>().join(",");
    let ifname = paths.iter().map(|(_, ifn)| *ifn).collect::<Vec<_>>().join(",");
    Ok(fvs(&[("nexthop", &nexthop), ("ifname", &ifname)]))
}

/// Converts a feed record into an engine change record.
pub fn feed_to_change(record: FeedRecord) -> Result<ChangeRecord> {
    if record.prefix.is_empty() {
        return Err(EngineError::source("feed record without prefix"));
    }
    Ok(match record.op {
        FeedOp::Del => ChangeRecord::del(record.prefix),
        FeedOp::Set => ChangeRecord::set(
            record.prefix,
            canonical_route_entry(&record.nexthops, &record.ifnames)?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(pairs: &[(&str, &str)]) -> (Vec<String>, Vec<String>) {
        (
            pairs.iter().map(|(nh, _)| nh.to_string()).collect(),
            pairs.iter().map(|(_, ifn)| ifn.to_string()).collect(),
        )
    }

    #[test]
    fn permuted_path_sets_canonicalize_identically() {
        let (nh1, if1) = paths(&[
            ("10.0.0.1", "Ethernet0"),
            ("10.0.0.5", "Ethernet4"),
            ("10.0.0.9", "Ethernet8"),
        ]);
        let (nh2, if2) = paths(&[
            ("10.0.0.9", "Ethernet8"),
            ("10.0.0.1", "Ethernet0"),
            ("10.0.0.5", "Ethernet4"),
        ]);

        assert_eq!(
            canonical_route_entry(&nh1, &if1).unwrap(),
            canonical_route_entry(&nh2, &if2).unwrap()
        );
        assert_eq!(
            canonical_route_entry(&nh1, &if1).unwrap(),
            fvs(&[
                ("nexthop", "10.0.0.1,10.0.0.5,10.0.0.9"),
                ("ifname", "Ethernet0,Ethernet4,Ethernet8"),
            ])
        );
    }

    #[test]
    fn duplicate_paths_collapse() {
        let (nh, ifn) = paths(&[
            ("10.0.0.1", "Ethernet0"),
            ("10.0.0.1", "Ethernet0"),
        ]);
        assert_eq!(
            canonical_route_entry(&nh, &ifn).unwrap(),
            fvs(&[("nexthop", "10.0.0.1"), ("ifname", "Ethernet0")])
        );
    }

    #[test]
    fn mismatched_path_arrays_are_rejected() {
        let nh = vec!["10.0.0.1".to_string()];
        let ifn: Vec<String> = vec![];
        assert!(canonical_route_entry(&nh, &ifn).is_err());
    }

    #[test]
    fn feed_lines_parse() {
        let rec = FeedRecord::parse(
            r#"{"prefix": "10.1.0.0/24", "nexthops": ["10.0.0.1"], "ifnames": ["Ethernet0"]}"#,
        )
        .unwrap();
        assert_eq!(rec.op, FeedOp::Set);
        assert_eq!(rec.prefix, "10.1.0.0/24");

        let rec = FeedRecord::parse(r#"{"prefix": "10.1.0.0/24", "op": "del"}"#).unwrap();
        assert_eq!(rec.op, FeedOp::Del);

        assert!(FeedRecord::parse("not json").is_err());
    }
}
