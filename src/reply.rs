//! Reply composition
//!
//! Turns structured intake outcomes into the prose shown to the user. The
//! wizard never produces text itself, so an LLM-backed composer can replace
//! the template one without touching ledger code.

use crate::intake::{IntakeOutcome, IntakeStatus};
use crate::models::{fields, Cycle};

pub trait ReplyComposer: Send + Sync {
    fn compose(&self, outcome: &IntakeOutcome) -> String;
}

/// Deterministic, template based replies
pub struct TemplateComposer;

impl TemplateComposer {
    fn prompt(field: &str) -> &'static str {
        match field {
            fields::CYCLE_ID => "Which cycle number is this? (a positive whole number)",
            fields::INVESTED_AMOUNT => "How much did you invest, in the origin currency?",
            fields::EXCHANGE_RATE_1 => {
                "What was the first exchange rate (units of the intermediate asset per unit invested)?"
            }
            fields::FEE_1 => "What fee did you pay to acquire the intermediate asset?",
            fields::INTERMEDIATE_AMOUNT => {
                "How much of the intermediate asset did you get? Say \"calculate\" and I will estimate it."
            }
            fields::EXCHANGE_RATE_2 => {
                "What is the second exchange rate (destination currency per unit of intermediate asset)?"
            }
            fields::FEE_2 => {
                "What is the destination-currency fee? You can also give it as a percentage, e.g. 1.5%."
            }
            _ => "Please give me the next value.",
        }
    }

    fn cycle_summary(cycle: &Cycle) -> String {
        let mut out = format!("Cycle {} saved. Status: {}.", cycle.cycle_id, cycle.status);
        if let Some(available) = cycle.available_destination {
            out.push_str(&format!(" Available to release: {:.2}.", available));
        }
        for alert in &cycle.alerts {
            out.push_str(&format!(" ⚠️ {}.", alert));
        }
        out
    }
}

impl ReplyComposer for TemplateComposer {
    fn compose(&self, outcome: &IntakeOutcome) -> String {
        let next = outcome.awaiting_field.map(Self::prompt).unwrap_or_default();

        match outcome.status {
            IntakeStatus::Idle => {
                "Say \"create a new cycle\" to register a cycle step by step.".to_string()
            }
            IntakeStatus::Started => format!("Let's create a new cycle. {}", next),
            IntakeStatus::Cancelled => "Cycle creation cancelled. Nothing was saved.".to_string(),
            IntakeStatus::Accepted => match &outcome.accepted {
                Some(accepted) if accepted.estimated => {
                    format!("I estimated {} at {:.2}. {}", accepted.field, accepted.value, next)
                }
                _ => format!("Got it. {}", next),
            },
            IntakeStatus::Rejected => {
                let reason = outcome
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or("That answer was not valid");
                format!("{}. {}", reason, next)
            }
            IntakeStatus::Committed => match &outcome.cycle {
                Some(cycle) => Self::cycle_summary(cycle),
                None => "Cycle saved.".to_string(),
            },
            IntakeStatus::CommitFailed => {
                let reason = outcome
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or("unknown error");
                format!("I could not save the cycle: {}. Start again when ready.", reason)
            }
        }
    }
}
