use cycle_ledger::{
    config::AppConfig,
    intake::{IntakeCoordinator, SessionCache},
    reply::{ReplyComposer, TemplateComposer},
    state::{JsonFileLedgerStore, LedgerService},
    Cycle,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SESSION_ID: &str = "terminal";

fn money(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string())
}

fn print_cycles(cycles: &[Cycle]) {
    if cycles.is_empty() {
        println!("No cycles yet.");
        return;
    }
    println!(
        "{:>6}  {:<12} {:>14} {:>14} {:>14}",
        "id", "status", "released", "pending", "profit"
    );
    for cycle in cycles {
        println!(
            "{:>6}  {:<12} {:>14.2} {:>14} {:>14}",
            cycle.cycle_id,
            cycle.status.to_string(),
            cycle.released_destination,
            money(cycle.pending_destination),
            money(cycle.profit_origin),
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Logs go to stderr so they do not interleave with the conversation
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env()?;
    let store = JsonFileLedgerStore::new(&config.ledger_path);
    let ledger = Arc::new(LedgerService::new(Box::new(store)));
    let intake = IntakeCoordinator::new(ledger.clone(), SessionCache::with_config(config.sessions));
    let composer = TemplateComposer;

    info!(ledger = %config.ledger_path.display(), "Terminal intake started");
    println!("Cycle ledger at {}", config.ledger_path.display());
    println!("Type \"new cycle\" to register one, \"list\" to show cycles, Ctrl-D to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("list") {
            match ledger.list_cycles().await {
                Ok(cycles) => print_cycles(&cycles),
                Err(e) => eprintln!("Could not read the ledger: {}", e),
            }
            continue;
        }

        let outcome = intake.advance(SESSION_ID, line).await;
        println!("{}", composer.compose(&outcome));
    }

    Ok(())
}
