//! Command builders for fault injection inside node containers.
//!
//! Partitions are `iptables` DROP rules installed in every affected node;
//! clock drift is a libfaketime offset file. Requires `iptables` and
//! `NET_ADMIN` in the container for partitions, and a service started with
//! libfaketime preloaded for drift.

use std::collections::BTreeMap;
use std::path::Path;

/// One direction-pair of DROP rules between a node and an unreachable peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRule {
    /// Node the rule is installed in.
    pub node: String,
    /// Address of the peer the node must not reach.
    pub peer_address: String,
    /// Interface the rule applies to.
    pub interface: String,
}

impl PartitionRule {
    /// Build the `iptables -I` command lines installing this rule.
    ///
    /// Returns two argument vectors: inbound from the peer, outbound to it.
    pub fn to_insert_args(&self) -> [Vec<String>; 2] {
        self.args("-I")
    }

    /// Build the `iptables -D` command lines removing this rule.
    pub fn to_delete_args(&self) -> [Vec<String>; 2] {
        self.args("-D")
    }

    fn args(&self, action: &str) -> [Vec<String>; 2] {
        [
            vec![
                "iptables".into(),
                action.into(),
                "INPUT".into(),
                "-i".into(),
                self.interface.clone(),
                "-s".into(),
                self.peer_address.clone(),
                "-j".into(),
                "DROP".into(),
            ],
            vec![
                "iptables".into(),
                action.into(),
                "OUTPUT".into(),
                "-o".into(),
                self.interface.clone(),
                "-d".into(),
                self.peer_address.clone(),
                "-j".into(),
                "DROP".into(),
            ],
        ]
    }

    /// Full command string (for logging).
    pub fn to_command(&self) -> String {
        self.to_insert_args()
            .iter()
            .map(|args| args.join(" "))
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

/// Rules isolating `groups` from each other.
///
/// Every node gets a rule for every node address in every other group.
/// Nodes missing from `addresses` are skipped as peers.
pub fn partition_rules(
    groups: &[Vec<String>],
    addresses: &BTreeMap<String, String>,
    interface: &str,
) -> Vec<PartitionRule> {
    let mut rules = Vec::new();
    for (index, group) in groups.iter().enumerate() {
        for node in group {
            for (other_index, other) in groups.iter().enumerate() {
                if other_index == index {
                    continue;
                }
                for peer in other {
                    if let Some(address) = addresses.get(peer) {
                        rules.push(PartitionRule {
                            node: node.clone(),
                            peer_address: address.clone(),
                            interface: interface.to_string(),
                        });
                    }
                }
            }
        }
    }
    rules
}

/// Format a millisecond offset the way libfaketime reads it (`+1.500`).
pub fn faketime_offset(offset_ms: i64) -> String {
    let sign = if offset_ms < 0 { '-' } else { '+' };
    let abs = offset_ms.unsigned_abs();
    format!("{}{}.{:03}", sign, abs / 1000, abs % 1000)
}

/// Build the command writing `offset_ms` into the libfaketime file.
pub fn clock_drift_args(offset_ms: i64, file: &Path) -> Vec<String> {
    vec![
        "sh".into(),
        "-c".into(),
        format!(
            "printf '%s\\n' '{}' > {}",
            faketime_offset(offset_ms),
            file.display()
        ),
    ]
}
