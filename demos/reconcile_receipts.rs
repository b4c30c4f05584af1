//! Receipt reconciliation walkthrough with in-memory storage and ledger

use bigdecimal::BigDecimal;
use fee_clearance::{
    AdminService, FeeSchedule, MemoryLedger, MemoryStorage, NewUser, ProfileStore,
    ReconciliationEngine, ReconciliationSettings, Registrar,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🎓 Fee Clearance - Receipt Reconciliation Example\n");

    let storage = MemoryStorage::new();
    let ledger = MemoryLedger::with_header();

    // 1. Register students
    println!("👤 Registering students...");
    let registrar = Registrar::new(storage.clone());
    for (email, username) in [("alice@uni.edu", "alice"), ("bob@uni.edu", "bob")] {
        let (_, profile) = registrar.register(NewUser::new(email, username, "change-me")).await?;
        println!(
            "  ✓ {} owes {}",
            profile.username,
            profile.net_amount_due()
        );
    }
    println!();

    // 2. The bank ledger as exported to the spreadsheet
    ledger.push_row("UBA-1001", "200,000", "alice");
    ledger.push_row("UBA-1002", "180000", "Alice");
    ledger.push_row("UBA-1003", "365000", "bob");

    let admin = AdminService::new(storage.clone());
    admin
        .update_fees(
            "alice",
            &FeeSchedule {
                school_fee_due: BigDecimal::from(365000),
                penalty_fee: BigDecimal::from(10000),
                excess_fee: BigDecimal::from(0),
            },
        )
        .await?;

    let engine = ReconciliationEngine::new(
        storage.clone(),
        ledger,
        ReconciliationSettings::new("demo-sheet"),
    );

    // 3. Alice submits one receipt: not enough yet
    println!("🧾 alice submits UBA-1001...");
    let report = engine.reconcile("alice", &["UBA-1001".to_string()]).await?;
    print_report(&report);

    // 4. Alice submits both receipts plus bob's
    println!("🧾 alice submits UBA-1001, UBA-1002 and UBA-1003...");
    let ids = ["UBA-1001", "UBA-1002", "UBA-1003"].map(String::from);
    let report = engine.reconcile("alice", &ids).await?;
    print_report(&report);

    let profile = storage.get_profile("alice").await?.ok_or("alice has no profile")?;
    println!(
        "  ✓ alice: penalty {} excess {} amount due {}",
        profile.penalty_fee,
        profile.excess_fee,
        profile.net_amount_due()
    );
    println!();

    // 5. Reuse is refused
    println!("🔁 alice resubmits UBA-1001...");
    let report = engine.reconcile("alice", &["UBA-1001".to_string()]).await?;
    print_report(&report);

    // 6. Admin view
    println!("📋 Used receipts:");
    for receipt in admin.used_receipts(None).await? {
        println!("  • {} used by {}", receipt.receipt_id, receipt.receipt_user);
    }

    Ok(())
}

fn print_report(report: &fee_clearance::ReconciliationReport) {
    let banner = if report.success { "✅" } else { "❌" };
    println!("  {} {}", banner, report.message);
    for detail in &report.details {
        println!("    - {}: {}", detail.receipt_id, detail.message);
    }
    println!();
}
