//! Guided intake state machine
//!
//! One field per turn, in a fixed order. A rejected answer never moves the
//! machine or touches the draft, so the user only has to repeat the one value
//! that failed.

use crate::classifier::{Intent, IntentClassifier};
use crate::error::LedgerError;
use crate::models::{fields, Payload};
use crate::numeric::{parse_text, round2};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IntakeStep {
    #[default]
    Idle,
    AwaitingCycleId,
    AwaitingInvested,
    AwaitingRate1,
    AwaitingFee1,
    AwaitingIntermediateAmount,
    AwaitingRate2,
    AwaitingFee2,
}

impl IntakeStep {
    /// 0 when idle, 1..=7 for the awaited field
    pub fn index(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::AwaitingCycleId => 1,
            Self::AwaitingInvested => 2,
            Self::AwaitingRate1 => 3,
            Self::AwaitingFee1 => 4,
            Self::AwaitingIntermediateAmount => 5,
            Self::AwaitingRate2 => 6,
            Self::AwaitingFee2 => 7,
        }
    }

    /// Wire name of the awaited field
    pub fn field(self) -> Option<&'static str> {
        match self {
            Self::Idle => None,
            Self::AwaitingCycleId => Some(fields::CYCLE_ID),
            Self::AwaitingInvested => Some(fields::INVESTED_AMOUNT),
            Self::AwaitingRate1 => Some(fields::EXCHANGE_RATE_1),
            Self::AwaitingFee1 => Some(fields::FEE_1),
            Self::AwaitingIntermediateAmount => Some(fields::INTERMEDIATE_AMOUNT),
            Self::AwaitingRate2 => Some(fields::EXCHANGE_RATE_2),
            Self::AwaitingFee2 => Some(fields::FEE_2),
        }
    }

    fn next(self) -> Self {
        match self {
            Self::Idle => Self::AwaitingCycleId,
            Self::AwaitingCycleId => Self::AwaitingInvested,
            Self::AwaitingInvested => Self::AwaitingRate1,
            Self::AwaitingRate1 => Self::AwaitingFee1,
            Self::AwaitingFee1 => Self::AwaitingIntermediateAmount,
            Self::AwaitingIntermediateAmount => Self::AwaitingRate2,
            Self::AwaitingRate2 => Self::AwaitingFee2,
            Self::AwaitingFee2 => Self::Idle,
        }
    }
}

/// Partial cycle collected so far
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeDraft {
    pub cycle_id: Option<u64>,
    pub invested_amount: Option<f64>,
    pub exchange_rate1: Option<f64>,
    pub fee1: Option<f64>,
    pub intermediate_amount: Option<f64>,
    pub exchange_rate2: Option<f64>,
    pub gross_destination: Option<f64>,
    pub fee2: Option<f64>,
}

impl IntakeDraft {
    fn slot(&mut self, step: IntakeStep) -> Option<&mut Option<f64>> {
        match step {
            IntakeStep::AwaitingInvested => Some(&mut self.invested_amount),
            IntakeStep::AwaitingRate1 => Some(&mut self.exchange_rate1),
            IntakeStep::AwaitingFee1 => Some(&mut self.fee1),
            IntakeStep::AwaitingIntermediateAmount => Some(&mut self.intermediate_amount),
            IntakeStep::AwaitingRate2 => Some(&mut self.exchange_rate2),
            IntakeStep::AwaitingFee2 => Some(&mut self.fee2),
            IntakeStep::Idle | IntakeStep::AwaitingCycleId => None,
        }
    }

    /// Repository payload for `create`
    pub fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        if let Some(id) = self.cycle_id {
            payload.insert(fields::CYCLE_ID.into(), json!(id));
        }
        let values = [
            (fields::INVESTED_AMOUNT, self.invested_amount),
            (fields::EXCHANGE_RATE_1, self.exchange_rate1),
            (fields::FEE_1, self.fee1),
            (fields::INTERMEDIATE_AMOUNT, self.intermediate_amount),
            (fields::EXCHANGE_RATE_2, self.exchange_rate2),
            (fields::GROSS_DESTINATION, self.gross_destination),
            (fields::FEE_2, self.fee2),
        ];
        for (name, value) in values {
            if let Some(v) = value {
                payload.insert(name.into(), json!(v));
            }
        }
        payload
    }

    /// `investedAmount / exchangeRate1 - fee1`, fee defaulting to zero
    fn estimate_intermediate(&self) -> Result<f64, LedgerError> {
        let mut missing = Vec::new();
        if self.invested_amount.is_none() {
            missing.push(fields::INVESTED_AMOUNT);
        }
        match self.exchange_rate1 {
            Some(rate) if rate != 0.0 => {}
            _ => missing.push(fields::EXCHANGE_RATE_1),
        }

        match (self.invested_amount, self.exchange_rate1) {
            (Some(invested), Some(rate)) if missing.is_empty() => {
                let estimate = round2(invested / rate - self.fee1.unwrap_or(0.0));
                if !estimate.is_finite() {
                    return Err(LedgerError::validation(
                        fields::INTERMEDIATE_AMOUNT,
                        "result is out of range",
                    ));
                }
                Ok(estimate)
            }
            _ => Err(LedgerError::PrerequisiteMissing(missing)),
        }
    }
}

/// What a single utterance did to the session
#[derive(Debug)]
pub enum Advance {
    /// No wizard running and the utterance was not a request to start one
    Ignored,
    Started,
    Cancelled,
    Accepted {
        field: &'static str,
        value: f64,
        estimated: bool,
    },
    /// State unchanged; the same field is asked again
    Rejected(LedgerError),
    /// Every field is known. The session is already back to idle; the
    /// draft is handed over for committing.
    Complete(IntakeDraft),
}

#[derive(Clone, Copy)]
enum Bound {
    Any,
    Positive,
    NonNegative,
}

fn read_value(utterance: &str, field: &'static str, bound: Bound) -> Result<f64, LedgerError> {
    let value = parse_text(utterance)
        .ok_or_else(|| LedgerError::validation(field, "not a number"))?;

    match bound {
        Bound::Positive if value <= 0.0 => {
            Err(LedgerError::validation(field, "must be greater than zero"))
        }
        Bound::NonNegative if value < 0.0 => {
            Err(LedgerError::validation(field, "must not be negative"))
        }
        _ => Ok(value),
    }
}

/// Per-conversation wizard state
#[derive(Debug, Clone, Default)]
pub struct IntakeSession {
    step: IntakeStep,
    draft: IntakeDraft,
}

impl IntakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> IntakeStep {
        self.step
    }

    pub fn draft(&self) -> &IntakeDraft {
        &self.draft
    }

    pub fn is_active(&self) -> bool {
        self.step != IntakeStep::Idle
    }

    fn reset(&mut self) -> IntakeDraft {
        self.step = IntakeStep::Idle;
        std::mem::take(&mut self.draft)
    }

    pub fn advance(&mut self, utterance: &str) -> Advance {
        let intent = IntentClassifier::classify(utterance);

        if self.step == IntakeStep::Idle {
            if intent == Intent::Create {
                self.draft = IntakeDraft::default();
                self.step = IntakeStep::AwaitingCycleId;
                return Advance::Started;
            }
            return Advance::Ignored;
        }

        if intent == Intent::Cancel {
            self.reset();
            return Advance::Cancelled;
        }

        match self.resolve(utterance, intent) {
            Ok((value, estimated)) => self.accept(value, estimated),
            Err(e) => Advance::Rejected(e),
        }
    }

    /// Value for the awaited field, or why the utterance does not give one
    fn resolve(&mut self, utterance: &str, intent: Intent) -> Result<(f64, bool), LedgerError> {
        let step = self.step;
        let field = step.field().unwrap_or(fields::CYCLE_ID);

        match step {
            IntakeStep::AwaitingCycleId => {
                let id = read_value(utterance, field, Bound::Any)?.trunc();
                if id < 1.0 {
                    return Err(LedgerError::validation(field, "must be a positive integer"));
                }
                Ok((id, false))
            }
            IntakeStep::AwaitingInvested => Ok((read_value(utterance, field, Bound::Any)?, false)),
            IntakeStep::AwaitingRate1 | IntakeStep::AwaitingRate2 => {
                Ok((read_value(utterance, field, Bound::Positive)?, false))
            }
            IntakeStep::AwaitingFee1 => Ok((read_value(utterance, field, Bound::NonNegative)?, false)),
            IntakeStep::AwaitingIntermediateAmount => {
                if intent == Intent::Delegate {
                    return Ok((self.draft.estimate_intermediate()?, true));
                }
                Ok((read_value(utterance, field, Bound::Positive)?, false))
            }
            IntakeStep::AwaitingFee2 => {
                if let Intent::Percent(percent) = intent {
                    let (Some(intermediate), Some(rate2)) =
                        (self.draft.intermediate_amount, self.draft.exchange_rate2)
                    else {
                        return Err(LedgerError::validation(
                            field,
                            "a percentage needs intermediateAmount and exchangeRate2 first",
                        ));
                    };
                    let product = intermediate * rate2;
                    let gross = round2(product);
                    let fee2 = round2(product * percent / 100.0);
                    if !gross.is_finite() || !fee2.is_finite() {
                        return Err(LedgerError::validation(field, "result is out of range"));
                    }
                    self.draft.gross_destination = Some(gross);
                    return Ok((fee2, true));
                }
                Ok((read_value(utterance, field, Bound::NonNegative)?, false))
            }
            IntakeStep::Idle => Err(LedgerError::validation(field, "no intake in progress")),
        }
    }

    fn accept(&mut self, value: f64, estimated: bool) -> Advance {
        let step = self.step;
        let field = step.field().unwrap_or(fields::CYCLE_ID);

        if step == IntakeStep::AwaitingCycleId {
            self.draft.cycle_id = Some(value as u64);
        } else if let Some(slot) = self.draft.slot(step) {
            *slot = Some(value);
        }

        self.step = step.next();
        if self.step == IntakeStep::Idle {
            return Advance::Complete(self.reset());
        }

        Advance::Accepted {
            field,
            value,
            estimated,
        }
    }
}
