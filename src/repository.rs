//! Cycle repository
//!
//! CRUD-style operations over a loaded [`LedgerState`]. Every mutation is
//! followed by a recalculation of the affected cycle, so derived fields are
//! never stale when the state is handed back for saving.

use crate::engine::{ensure_finite, recalculate, recalculate_all};
use crate::error::LedgerError;
use crate::models::{fields, Cycle, LedgerState, Payload, Release};
use crate::numeric::{parse_number, round2};
use crate::Result;
use chrono::Utc;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// Null, missing or whitespace-only
fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Positive integer id; fractional input is truncated
pub fn cycle_id_from(payload: &Payload) -> Result<u64> {
    payload
        .get(fields::CYCLE_ID)
        .and_then(parse_number)
        .map(f64::trunc)
        .filter(|id| *id >= 1.0 && *id <= u64::MAX as f64)
        .map(|id| id as u64)
        .ok_or(LedgerError::InvalidId)
}

fn parse_field(field: &'static str, value: &Value) -> Result<f64> {
    parse_number(value).ok_or_else(|| LedgerError::validation(field, "not a number"))
}

fn required_number(payload: &Payload, field: &'static str) -> Result<f64> {
    let value = payload.get(field);
    if is_blank(value) {
        return Err(LedgerError::MissingField(field));
    }
    value
        .map(|v| parse_field(field, v))
        .unwrap_or(Err(LedgerError::MissingField(field)))
}

fn optional_number(payload: &Payload, field: &'static str) -> Result<Option<f64>> {
    let value = payload.get(field);
    if is_blank(value) {
        return Ok(None);
    }
    value.map(|v| parse_field(field, v)).transpose()
}

/// `availableDestination = grossDestination - fee2` when it is not known yet
fn derive_available(cycle: &mut Cycle) {
    if cycle.available_destination.is_some() {
        return;
    }
    if let (Some(gross), Some(fee2)) = (cycle.gross_destination, cycle.fee2) {
        cycle.available_destination = Some(round2(gross - fee2));
    }
}

/// Recalculate and refuse results JSON cannot represent
fn settle(state: &mut LedgerState, cycle_id: u64) -> Result<Cycle> {
    let cycle = recalculate(state, cycle_id)?;
    ensure_finite(cycle)?;
    Ok(cycle.clone())
}

/// Repository operations. Callers own exclusive access to the state.
pub struct CycleRepository;

impl CycleRepository {
    pub fn create(state: &mut LedgerState, payload: &Payload) -> Result<Cycle> {
        let cycle_id = cycle_id_from(payload)?;
        if state.cycles.contains_key(&cycle_id) {
            return Err(LedgerError::AlreadyExists(cycle_id));
        }

        let mut cycle = Cycle::new(cycle_id, Utc::now());
        cycle.invested_amount = Some(required_number(payload, fields::INVESTED_AMOUNT)?);
        cycle.exchange_rate1 = Some(required_number(payload, fields::EXCHANGE_RATE_1)?);
        cycle.fee1 = Some(required_number(payload, fields::FEE_1)?);
        cycle.intermediate_amount = Some(required_number(payload, fields::INTERMEDIATE_AMOUNT)?);
        cycle.exchange_rate2 = Some(required_number(payload, fields::EXCHANGE_RATE_2)?);
        cycle.fee2 = Some(required_number(payload, fields::FEE_2)?);
        cycle.gross_destination = optional_number(payload, fields::GROSS_DESTINATION)?;
        cycle.available_destination = optional_number(payload, fields::AVAILABLE_DESTINATION)?;
        derive_available(&mut cycle);

        state.cycles.insert(cycle_id, cycle);
        let cycle = match settle(state, cycle_id) {
            Ok(cycle) => cycle,
            Err(e) => {
                state.cycles.remove(&cycle_id);
                return Err(e);
            }
        };

        info!(cycle_id, status = ?cycle.status, "Cycle created");
        Ok(cycle)
    }

    /// Overwrite whitelisted inputs only; unknown keys are ignored.
    pub fn update(state: &mut LedgerState, payload: &Payload) -> Result<Cycle> {
        let cycle_id = cycle_id_from(payload)?;
        if !state.cycles.contains_key(&cycle_id) {
            return Err(LedgerError::NotFound(cycle_id));
        }

        // Validate everything before touching the cycle
        let mut changes = Vec::with_capacity(fields::UPDATABLE.len());
        for field in fields::UPDATABLE {
            if payload.contains_key(field) {
                changes.push((field, optional_number(payload, field)?));
            }
        }

        let cycle = state
            .cycles
            .get_mut(&cycle_id)
            .ok_or(LedgerError::NotFound(cycle_id))?;
        let previous = cycle.clone();

        for (field, value) in &changes {
            if let Some(slot) = cycle.input_mut(field) {
                *slot = *value;
            }
        }
        derive_available(cycle);
        cycle.updated_at = Utc::now();

        let cycle = match settle(state, cycle_id) {
            Ok(cycle) => cycle,
            Err(e) => {
                state.cycles.insert(cycle_id, previous);
                return Err(e);
            }
        };

        info!(cycle_id, changed = changes.len(), "Cycle updated");
        Ok(cycle)
    }

    /// Append a release and return it together with the recalculated cycle
    pub fn add_release(state: &mut LedgerState, payload: &Payload) -> Result<(Release, Cycle)> {
        let cycle_id = cycle_id_from(payload)?;
        if !state.cycles.contains_key(&cycle_id) {
            return Err(LedgerError::NotFound(cycle_id));
        }

        let released_amount = payload
            .get(fields::RELEASED_AMOUNT)
            .and_then(parse_number)
            .ok_or(LedgerError::MissingField(fields::RELEASED_AMOUNT))?;
        let conversion_rate = optional_number(payload, fields::CONVERSION_RATE)?;
        let received_origin_amount =
            match optional_number(payload, fields::RECEIVED_ORIGIN_AMOUNT)? {
                Some(received) => Some(received),
                None => conversion_rate
                    .filter(|rate| *rate != 0.0)
                    .map(|rate| round2(released_amount / rate)),
            };
        if received_origin_amount.map_or(false, |v| !v.is_finite()) {
            return Err(LedgerError::validation(
                fields::RECEIVED_ORIGIN_AMOUNT,
                "result is out of range",
            ));
        }
        let note = payload
            .get(fields::NOTE)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        let now = Utc::now();
        let release = Release {
            id: Uuid::new_v4(),
            cycle_id,
            released_amount,
            conversion_rate,
            received_origin_amount,
            note,
            created_at: now,
        };
        let previous = state.cycles.get(&cycle_id).cloned();
        state.releases.push(release.clone());

        if let Some(cycle) = state.cycles.get_mut(&cycle_id) {
            cycle.updated_at = now;
        }
        let cycle = match settle(state, cycle_id) {
            Ok(cycle) => cycle,
            Err(e) => {
                state.releases.pop();
                if let Some(previous) = previous {
                    state.cycles.insert(cycle_id, previous);
                }
                return Err(e);
            }
        };

        info!(
            cycle_id,
            release_id = %release.id,
            released_amount,
            pending = ?cycle.pending_destination,
            "Release recorded"
        );
        Ok((release, cycle))
    }

    /// All cycles, ascending by id
    pub fn list(state: &mut LedgerState) -> Vec<Cycle> {
        recalculate_all(state);
        state.cycles.values().cloned().collect()
    }

    pub fn get(state: &mut LedgerState, cycle_id: u64) -> Result<Cycle> {
        recalculate(state, cycle_id).cloned()
    }
}
