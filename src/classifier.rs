//! Intent Classifier
//!
//! Turns a raw chat utterance into one tagged intent for the intake wizard:
//! - Create: "create a new cycle", "start cycle", "nuevo ciclo"
//! - Cancel: "cancel", "stop", "salir"
//! - Delegate: "calculate", "you do it", "calcúlalo"
//! - Percent: "15%", "la comisión es 1,5%"
//! - Plain: anything else (usually a value for the awaited field)

use crate::numeric::extract_percent;
use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intent {
    Create,
    Cancel,
    Delegate,
    Percent(f64),
    Plain,
}

lazy_static! {
    static ref CANCEL: Regex =
        Regex::new(r"(?i)\b(cancel|exit|stop|end|cancelar|salir|terminar)\b")
            .expect("valid cancel regex");
    static ref CREATE: Regex = Regex::new(
        r"(?i)\b(create|new|start|open|crear|crea|nuevo|nueva)\b(\s+(a|an|the|new|un|una|el|nuevo))?(\s+(cycle|ciclo))?"
    )
    .expect("valid create regex");
    static ref DELEGATE: Regex = Regex::new(
        r"(?i)\b(calculate|calculate it|estimate|estimate it|you do it|calcula|calcúlalo|calculalo|estima|estímalo|hazlo tú|hazlo tu)\b"
    )
    .expect("valid delegate regex");
}

/// Intent classifier
pub struct IntentClassifier;

impl IntentClassifier {
    /// Precedence: Cancel > Create > Delegate > Percent > Plain
    pub fn classify(utterance: &str) -> Intent {
        let text = utterance.trim();

        if CANCEL.is_match(text) {
            Intent::Cancel
        } else if CREATE.is_match(text) {
            Intent::Create
        } else if DELEGATE.is_match(text) {
            Intent::Delegate
        } else if let Some(percent) = extract_percent(text) {
            Intent::Percent(percent)
        } else {
            Intent::Plain
        }
    }
}
