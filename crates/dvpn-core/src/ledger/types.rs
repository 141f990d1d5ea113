//! Ledger data model as seen by the node.
//!
//! Integer amounts travel as decimal strings, matching the ledger's JSON
//! encoding of 64-bit values.

use serde::{Deserialize, Serialize};

/// Activity status of a ledger object (node, subscription).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "STATUS_ACTIVE", alias = "Active")]
    Active,
    #[serde(rename = "STATUS_INACTIVE", alias = "Inactive")]
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    #[serde(default, with = "amount")]
    pub account_number: u64,
    #[serde(default, with = "amount")]
    pub sequence: u64,
}

/// Node record registered on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerNode {
    pub address: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub remote_url: String,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(with = "amount")]
    pub id: u64,
    pub owner: String,
    /// Node the subscription is bound to (direct node subscriptions).
    #[serde(default)]
    pub node: String,
    /// Plan the subscription belongs to, zero for node subscriptions.
    #[serde(default, with = "amount")]
    pub plan: u64,
    pub status: Status,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }
}

/// Byte allowance of one address under a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub address: String,
    #[serde(with = "amount")]
    pub allocated: u64,
    #[serde(with = "amount")]
    pub consumed: u64,
}

impl Quota {
    /// Whether consuming `delta` more bytes would go past the allowance.
    pub fn exceeded_by(&self, delta: u64) -> bool {
        u128::from(self.consumed) + u128::from(delta) > u128::from(self.allocated)
    }
}

/// Liveness report pushed by the status job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub address: String,
    pub status: Status,
    pub peers: u64,
}

/// Per-peer usage delta for one reconciliation tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUsage {
    pub identity: String,
    #[serde(with = "amount")]
    pub subscription_id: u64,
    pub address: String,
    #[serde(with = "amount")]
    pub upload: u64,
    #[serde(with = "amount")]
    pub download: u64,
    /// Connected time in nanoseconds.
    #[serde(with = "amount")]
    pub duration: u64,
}

impl SessionUsage {
    pub fn bytes(&self) -> u64 {
        self.upload.saturating_add(self.download)
    }
}

/// Serde module for u64 values encoded as decimal strings.
///
/// Plain JSON numbers are accepted on input as well.
pub(crate) mod amount {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.parse().map_err(de::Error::custom),
            Repr::Number(number) => Ok(number),
        }
    }
}
