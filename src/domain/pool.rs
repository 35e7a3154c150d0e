use serde::{Deserialize, Serialize};

/// Pool-level distribution intent, set by the sponsor and the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    Pending,
    Failed,
    Distributed,
}

/// A prize-granting event whose winners share one escrow pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrizePool {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// The host has confirmed that payouts may proceed.
    #[serde(default)]
    pub host_confirmed: bool,
    pub distribution_status: DistributionStatus,
}

impl PrizePool {
    pub fn new(id: impl Into<String>, host_confirmed: bool) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            host_confirmed,
            distribution_status: DistributionStatus::Pending,
        }
    }

    /// Whether the sweep should look at this pool at all.
    pub fn awaits_distribution(&self) -> bool {
        self.host_confirmed
            && matches!(
                self.distribution_status,
                DistributionStatus::Pending | DistributionStatus::Failed
            )
    }
}
