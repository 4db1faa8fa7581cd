//! Core data models for the cycle ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Loosely typed request body. Scalars may arrive as JSON numbers or as text
/// (possibly with a decimal comma); the repository normalizes them.
pub type Payload = serde_json::Map<String, Value>;

/// Wire names of the cycle and release input fields
pub mod fields {
    pub const CYCLE_ID: &str = "cycleId";
    pub const INVESTED_AMOUNT: &str = "investedAmount";
    pub const EXCHANGE_RATE_1: &str = "exchangeRate1";
    pub const FEE_1: &str = "fee1";
    pub const INTERMEDIATE_AMOUNT: &str = "intermediateAmount";
    pub const EXCHANGE_RATE_2: &str = "exchangeRate2";
    pub const GROSS_DESTINATION: &str = "grossDestination";
    pub const FEE_2: &str = "fee2";
    pub const AVAILABLE_DESTINATION: &str = "availableDestination";

    pub const RELEASED_AMOUNT: &str = "releasedAmount";
    pub const CONVERSION_RATE: &str = "conversionRate";
    pub const RECEIVED_ORIGIN_AMOUNT: &str = "receivedOriginAmount";
    pub const NOTE: &str = "note";

    /// Inputs that must be present to create a cycle, in prompt order
    pub const REQUIRED: [&str; 7] = [
        CYCLE_ID,
        INVESTED_AMOUNT,
        EXCHANGE_RATE_1,
        FEE_1,
        INTERMEDIATE_AMOUNT,
        EXCHANGE_RATE_2,
        FEE_2,
    ];

    /// The only keys `update` will overwrite; everything else is ignored.
    pub const UPDATABLE: [&str; 8] = [
        INVESTED_AMOUNT,
        EXCHANGE_RATE_1,
        FEE_1,
        INTERMEDIATE_AMOUNT,
        EXCHANGE_RATE_2,
        FEE_2,
        AVAILABLE_DESTINATION,
        GROSS_DESTINATION,
    ];
}

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Available destination amount is not known yet
    #[default]
    Pending,
    InProgress,
    Closed,
}

//
// ================= Cycle =================
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub cycle_id: u64,

    // Stored inputs
    pub invested_amount: Option<f64>,
    pub exchange_rate1: Option<f64>,
    pub fee1: Option<f64>,
    pub intermediate_amount: Option<f64>,
    pub exchange_rate2: Option<f64>,
    pub gross_destination: Option<f64>,
    pub fee2: Option<f64>,
    pub available_destination: Option<f64>,

    // Derived by the recalculation engine, never hand-set
    #[serde(default)]
    pub released_destination: f64,
    #[serde(default)]
    pub received_origin: f64,
    #[serde(default)]
    pub pending_destination: Option<f64>,
    #[serde(default)]
    pub profit_origin: Option<f64>,
    #[serde(default)]
    pub profit_percent: Option<f64>,
    #[serde(default)]
    pub status: CycleStatus,
    #[serde(default)]
    pub alerts: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cycle {
    /// A cycle with no inputs and derived fields in their unset state
    pub fn new(cycle_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            invested_amount: None,
            exchange_rate1: None,
            fee1: None,
            intermediate_amount: None,
            exchange_rate2: None,
            gross_destination: None,
            fee2: None,
            available_destination: None,
            released_destination: 0.0,
            received_origin: 0.0,
            pending_destination: None,
            profit_origin: None,
            profit_percent: None,
            status: CycleStatus::Pending,
            alerts: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Mutable access to a stored input by its wire name
    pub(crate) fn input_mut(&mut self, name: &str) -> Option<&mut Option<f64>> {
        match name {
            fields::INVESTED_AMOUNT => Some(&mut self.invested_amount),
            fields::EXCHANGE_RATE_1 => Some(&mut self.exchange_rate1),
            fields::FEE_1 => Some(&mut self.fee1),
            fields::INTERMEDIATE_AMOUNT => Some(&mut self.intermediate_amount),
            fields::EXCHANGE_RATE_2 => Some(&mut self.exchange_rate2),
            fields::GROSS_DESTINATION => Some(&mut self.gross_destination),
            fields::FEE_2 => Some(&mut self.fee2),
            fields::AVAILABLE_DESTINATION => Some(&mut self.available_destination),
            _ => None,
        }
    }
}

//
// ================= Release =================
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub id: Uuid,
    pub cycle_id: u64,
    pub released_amount: f64,
    pub conversion_rate: Option<f64>,
    /// Frozen at creation; not recomputed when the cycle changes later
    pub received_origin_amount: Option<f64>,
    #[serde(default)]
    pub note: String,
    pub created_at: DateTime<Utc>,
}

//
// ================= Ledger =================
//

/// Whole persisted state: every cycle keyed by id plus the release journal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerState {
    #[serde(default)]
    pub cycles: BTreeMap<u64, Cycle>,
    #[serde(default)]
    pub releases: Vec<Release>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl LedgerState {
    pub fn releases_for(&self, cycle_id: u64) -> impl Iterator<Item = &Release> {
        self.releases.iter().filter(move |r| r.cycle_id == cycle_id)
    }
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleStatus::Pending => "Pending",
            CycleStatus::InProgress => "In progress",
            CycleStatus::Closed => "Closed",
        };
        write!(f, "{}", s)
    }
}
