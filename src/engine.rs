//! Recalculation engine
//!
//! Derives a cycle's computed fields from its stored inputs and the release
//! journal. Deterministic and idempotent; the only write is to the named
//! cycle's derived fields.

use crate::error::LedgerError;
use crate::models::{fields, Cycle, CycleStatus, LedgerState, Release};
use crate::numeric::round2;
use crate::Result;
use tracing::{debug, warn};

/// Negative pending/profit beyond this is reported as an alert
pub const ALERT_TOLERANCE: f64 = 1.0;

/// Derived values for one cycle, computed without touching the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub released_destination: f64,
    pub received_origin: f64,
    pub pending_destination: Option<f64>,
    pub profit_origin: Option<f64>,
    pub profit_percent: Option<f64>,
    pub status: CycleStatus,
    pub alerts: Vec<String>,
}

/// Absent or NaN terms count as zero
fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

pub fn derive<'a>(cycle: &Cycle, releases: impl IntoIterator<Item = &'a Release>) -> Derived {
    let (released, received) = releases
        .into_iter()
        .fold((0.0, 0.0), |(released, received), r| {
            (
                released + finite_or_zero(Some(r.released_amount)),
                received + finite_or_zero(r.received_origin_amount),
            )
        });

    let released_destination = round2(released);
    let received_origin = round2(received);

    let pending_destination = cycle
        .available_destination
        .map(|available| round2(available - released_destination));

    let profit_origin = cycle
        .invested_amount
        .map(|invested| round2(received_origin - invested));

    let profit_percent = match (profit_origin, cycle.invested_amount) {
        (Some(profit), Some(invested)) if invested != 0.0 => {
            Some(round2(profit / invested * 100.0))
        }
        _ => None,
    };

    let status = status_for(pending_destination);

    let mut alerts = Vec::new();
    if let Some(pending) = pending_destination.filter(|p| *p < -ALERT_TOLERANCE) {
        alerts.push(format!(
            "Pending destination is negative ({:.2}): more was released than was available",
            pending
        ));
    }
    if let Some(profit) = profit_origin.filter(|p| *p < -ALERT_TOLERANCE) {
        alerts.push(format!(
            "Profit is negative ({:.2}): proceeds received are below the investment",
            profit
        ));
    }

    Derived {
        released_destination,
        received_origin,
        pending_destination,
        profit_origin,
        profit_percent,
        status,
        alerts,
    }
}

pub fn status_for(pending_destination: Option<f64>) -> CycleStatus {
    match pending_destination {
        None => CycleStatus::Pending,
        Some(pending) if pending <= 0.0 => CycleStatus::Closed,
        Some(_) => CycleStatus::InProgress,
    }
}

/// Recompute and overwrite the derived fields of `cycle_id` in place
pub fn recalculate(state: &mut LedgerState, cycle_id: u64) -> Result<&Cycle> {
    let derived = {
        let cycle = state
            .cycles
            .get(&cycle_id)
            .ok_or(LedgerError::NotFound(cycle_id))?;
        derive(cycle, state.releases_for(cycle_id))
    };

    let cycle = state
        .cycles
        .get_mut(&cycle_id)
        .ok_or(LedgerError::NotFound(cycle_id))?;

    cycle.released_destination = derived.released_destination;
    cycle.received_origin = derived.received_origin;
    cycle.pending_destination = derived.pending_destination;
    cycle.profit_origin = derived.profit_origin;
    cycle.profit_percent = derived.profit_percent;
    cycle.status = derived.status;
    cycle.alerts = derived.alerts;

    debug!(
        cycle_id,
        status = ?cycle.status,
        released = cycle.released_destination,
        received = cycle.received_origin,
        "Cycle recalculated"
    );

    Ok(cycle)
}

/// Recalculate every cycle, e.g. after loading a file edited by hand
pub fn recalculate_all(state: &mut LedgerState) {
    let ids: Vec<u64> = state.cycles.keys().copied().collect();
    for id in ids {
        if let Err(e) = recalculate(state, id) {
            warn!(cycle_id = id, error = %e, "Cycle recalculation skipped");
        }
    }
}

/// Reject a cycle holding a value JSON cannot carry (`inf`/`NaN` serialize
/// as `null` and would make the saved ledger unreadable).
pub fn ensure_finite(cycle: &Cycle) -> Result<()> {
    let values = [
        (fields::INVESTED_AMOUNT, cycle.invested_amount),
        (fields::EXCHANGE_RATE_1, cycle.exchange_rate1),
        (fields::FEE_1, cycle.fee1),
        (fields::INTERMEDIATE_AMOUNT, cycle.intermediate_amount),
        (fields::EXCHANGE_RATE_2, cycle.exchange_rate2),
        (fields::GROSS_DESTINATION, cycle.gross_destination),
        (fields::FEE_2, cycle.fee2),
        (fields::AVAILABLE_DESTINATION, cycle.available_destination),
        ("releasedDestination", Some(cycle.released_destination)),
        ("receivedOrigin", Some(cycle.received_origin)),
        ("pendingDestination", cycle.pending_destination),
        ("profitOrigin", cycle.profit_origin),
        ("profitPercent", cycle.profit_percent),
    ];

    match values
        .into_iter()
        .find(|(_, value)| value.map_or(false, |v| !v.is_finite()))
    {
        Some((field, _)) => Err(LedgerError::validation(field, "result is out of range")),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn cycle(id: u64, invested: Option<f64>, available: Option<f64>) -> Cycle {
        let mut c = Cycle::new(id, Utc::now());
        c.invested_amount = invested;
        c.available_destination = available;
        c
    }

    fn release(cycle_id: u64, amount: f64, received: Option<f64>) -> Release {
        Release {
            id: Uuid::new_v4(),
            cycle_id,
            released_amount: amount,
            conversion_rate: None,
            received_origin_amount: received,
            note: String::new(),
            created_at: Utc::now(),
        }
    }

    fn ledger(cycles: Vec<Cycle>, releases: Vec<Release>) -> LedgerState {
        LedgerState {
            cycles: cycles.into_iter().map(|c| (c.cycle_id, c)).collect(),
            releases,
            updated_at: None,
        }
    }

    #[test]
    fn test_not_found() {
        let mut state = LedgerState::default();
        let err = recalculate(&mut state, 9).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(9)));
    }

    #[test]
    fn test_sums_only_matching_releases() {
        let mut state = ledger(
            vec![cycle(1, Some(1000.0), Some(500.0)), cycle(2, None, None)],
            vec![
                release(1, 100.0, Some(10.0)),
                release(2, 999.0, Some(99.0)),
                release(1, 50.5, None),
                release(1, 0.25, Some(0.5)),
            ],
        );

        let c = recalculate(&mut state, 1).unwrap();
        assert_eq!(c.released_destination, 150.75);
        assert_eq!(c.received_origin, 10.5);
        assert_eq!(c.pending_destination, Some(349.25));
        assert_eq!(c.profit_origin, Some(-989.5));
        assert_eq!(c.profit_percent, Some(-98.95));
        assert_eq!(c.status, CycleStatus::InProgress);
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let releases = vec![
            release(3, 0.1, Some(0.2)),
            release(3, 0.2, Some(0.1)),
            release(3, 1234.56, Some(15.43)),
            release(3, 7.77, None),
        ];
        let mut reversed = releases.clone();
        reversed.reverse();

        let mut forward = ledger(vec![cycle(3, Some(100.0), Some(2000.0))], releases);
        let mut backward = ledger(vec![cycle(3, Some(100.0), Some(2000.0))], reversed);

        let a = recalculate(&mut forward, 3).unwrap().clone();
        let b = recalculate(&mut backward, 3).unwrap().clone();

        assert_eq!(a.released_destination, b.released_destination);
        assert_eq!(a.received_origin, b.received_origin);
        assert_eq!(a.released_destination, 1242.63);
        assert_eq!(a.received_origin, 15.73);
    }

    #[test]
    fn test_nan_terms_count_as_zero() {
        let mut state = ledger(
            vec![cycle(1, None, None)],
            vec![release(1, f64::NAN, Some(f64::NAN)), release(1, 5.0, Some(1.0))],
        );
        let c = recalculate(&mut state, 1).unwrap();
        assert_eq!(c.released_destination, 5.0);
        assert_eq!(c.received_origin, 1.0);
    }

    #[test]
    fn test_idempotent() {
        let mut state = ledger(
            vec![cycle(4, Some(11000.0), Some(74419.06))],
            vec![release(4, 50000.0, Some(625.0))],
        );

        let first = recalculate(&mut state, 4).unwrap().clone();
        let second = recalculate(&mut state, 4).unwrap().clone();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_status_boundaries() {
        assert_eq!(status_for(None), CycleStatus::Pending);
        assert_eq!(status_for(Some(0.0)), CycleStatus::Closed);
        assert_eq!(status_for(Some(-0.01)), CycleStatus::Closed);
        assert_eq!(status_for(Some(0.01)), CycleStatus::InProgress);

        let cases = vec![
            (None, vec![], CycleStatus::Pending),
            (Some(100.0), vec![], CycleStatus::InProgress),
            (Some(100.0), vec![100.0], CycleStatus::Closed),
            (Some(100.0), vec![60.0, 50.0], CycleStatus::Closed),
            (None, vec![60.0], CycleStatus::Pending),
        ];

        for (available, amounts, expected) in cases {
            let releases = amounts.into_iter().map(|a| release(1, a, None)).collect();
            let mut state = ledger(vec![cycle(1, None, available)], releases);
            assert_eq!(recalculate(&mut state, 1).unwrap().status, expected);
        }
    }

    #[test]
    fn test_alerts_beyond_tolerance_only() {
        let mut within = ledger(
            vec![cycle(1, Some(10.0), Some(100.0))],
            vec![release(1, 100.5, Some(9.5))],
        );
        let c = recalculate(&mut within, 1).unwrap();
        assert_eq!(c.pending_destination, Some(-0.5));
        assert_eq!(c.profit_origin, Some(-0.5));
        assert!(c.alerts.is_empty());

        let mut beyond = ledger(
            vec![cycle(1, Some(10.0), Some(100.0))],
            vec![release(1, 102.0, Some(5.0))],
        );
        let c = recalculate(&mut beyond, 1).unwrap();
        assert_eq!(c.alerts.len(), 2);
        assert!(c.alerts[0].starts_with("Pending destination is negative"));
        assert!(c.alerts[1].starts_with("Profit is negative"));
    }

    #[test]
    fn test_zero_investment_has_no_percentage() {
        let mut state = ledger(vec![cycle(1, Some(0.0), None)], vec![]);
        let c = recalculate(&mut state, 1).unwrap();
        assert_eq!(c.profit_origin, Some(0.0));
        assert_eq!(c.profit_percent, None);
    }

    #[test]
    fn test_overflowing_sums_are_rejected() {
        let mut state = ledger(
            vec![cycle(1, Some(10.0), Some(100.0))],
            vec![release(1, 1e307, Some(1.0))],
        );
        let c = recalculate(&mut state, 1).unwrap();
        assert!(c.released_destination.is_infinite());

        match ensure_finite(c) {
            Err(LedgerError::ValidationFailed { field, .. }) => {
                assert_eq!(field, "releasedDestination")
            }
            other => panic!("expected out of range, got {:?}", other),
        }

        let mut fine = ledger(vec![cycle(1, Some(10.0), Some(100.0))], vec![]);
        assert!(ensure_finite(recalculate(&mut fine, 1).unwrap()).is_ok());
    }

    #[test]
    fn test_recalculate_all_touches_every_cycle() {
        let mut state = ledger(
            vec![cycle(1, Some(10.0), Some(100.0)), cycle(2, None, None)],
            vec![release(1, 100.0, Some(12.0))],
        );
        recalculate_all(&mut state);
        assert_eq!(state.cycles[&1].status, CycleStatus::Closed);
        assert_eq!(state.cycles[&2].status, CycleStatus::Pending);
    }
}
