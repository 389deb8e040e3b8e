//! Example moving money between two banks with two-phase commit
//!
//! Each bank is an in-memory participant. The first transfer commits on
//! both sides; the second is refused by the receiving bank and rolls back.
//!
//! Run with: cargo run --example bank_transfer

use std::sync::Arc;
use std::time::Duration;
use twophase_coordinator::{Coordinator, CoordinatorConfig, Participant, TransactionId};
use twophase_participant::{Behavior, MemoryParticipant};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Bank Transfer Example ===\n");

    let alpha = Arc::new(MemoryParticipant::new("bank-alpha"));
    let beta = Arc::new(MemoryParticipant::new("bank-beta"));
    let banks: Vec<Arc<dyn Participant>> = vec![alpha.clone(), beta.clone()];
    println!("✓ Opened accounts at bank-alpha and bank-beta");

    let config = CoordinatorConfig::default().with_ack_retries(2, Duration::from_millis(20));
    let coordinator = Coordinator::new(config);

    // 1. Transfer 25 from alice to bob
    let first = TransactionId::new();
    alpha.stage(first, "alice", "75")?;
    beta.stage(first, "bob", "25")?;

    let outcome = coordinator
        .execute_with_id(first, &banks, Duration::from_secs(1), Duration::from_secs(1))
        .await?;
    println!("\n1. Transfer {} -> {}", first, outcome.decision());
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    println!(
        "   alice = {:?}, bob = {:?}",
        alpha.get("alice"),
        beta.get("bob")
    );

    // 2. bank-beta refuses the next transfer
    beta.set_behavior(Behavior::refusing());
    let second = TransactionId::new();
    alpha.stage(second, "alice", "0")?;
    beta.stage(second, "bob", "100")?;

    let outcome = coordinator
        .execute_with_id(second, &banks, Duration::from_secs(1), Duration::from_secs(1))
        .await?;
    println!("\n2. Transfer {} -> {}", second, outcome.decision());
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    println!(
        "   alice = {:?}, bob = {:?}",
        alpha.get("alice"),
        beta.get("bob")
    );

    println!("\n=== Done ===");
    Ok(())
}
