//! Reconcile a small bank statement against ledger documents

use chrono::NaiveDate;
use reconciliation_core::utils::MemoryStorage;
use reconciliation_core::{
    AccountingCalendar, AccountingPeriod, Document, DocumentKind, EngineConfig, Movement,
    MovementFilter, ReconciliationStatus, Reconciler,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("🏦 Reconciliation Core - Statement Example\n");

    let config = EngineConfig::load(None)?;
    let calendar = AccountingCalendar::new();
    calendar.add_period(AccountingPeriod::new(
        "2024-03".to_string(),
        "acme".to_string(),
        "March 2024".to_string(),
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
    ))?;

    let reconciler = Reconciler::with_config(MemoryStorage::new(), config.clone())
        .with_period_guard(calendar.clone());

    // 1. Statement lines from the bank, amounts as the bank exports them
    println!("📥 Importing statement...");
    let statement = [
        ("mov-001", 4, "250000", "0", "Abono cliente Los Andes"),
        ("mov-002", 8, "0", "89990", "Pago proveedor Ferreteria Sur"),
        ("mov-003", 15, "120000", "0", "Transferencia recibida"),
    ];
    for (id, d, debit, credit, description) in statement {
        let movement = Movement::new(
            id.to_string(),
            "acme".to_string(),
            NaiveDate::from_ymd_opt(2024, 3, d).unwrap(),
            "BancoEstado 0041".to_string(),
            config.parse_amount(debit)?,
            config.parse_amount(credit)?,
        )
        .with_description(description);
        let net = config.format_amount(movement.net());
        reconciler.import_movement(movement).await?;
        println!("  ✓ {} {:>10} {}", id, net, description);
    }
    println!();

    // 2. Documents from the ledger
    println!("📄 Importing documents...");
    let documents = [
        ("fv-1001", DocumentKind::SalesInvoice, "150000", "0"),
        ("fv-1002", DocumentKind::SalesInvoice, "100000", "0"),
        ("fc-7781", DocumentKind::PurchaseInvoice, "0", "89990"),
        ("in-0003", DocumentKind::Income, "70000", "0"),
    ];
    for (id, kind, debit, credit) in documents {
        let document = Document::new(
            id.to_string(),
            "acme".to_string(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            kind,
            "76.086.428-5".to_string(),
            "Comercial Los Andes".to_string(),
            id.to_uppercase(),
            config.parse_amount(debit)?,
            config.parse_amount(credit)?,
        );
        reconciler.import_document(document).await?;
        println!("  ✓ {} ({})", id, kind.as_str());
    }
    println!();

    // 3. Propose, then confirm
    println!("🔗 Matching...");
    let group = vec!["fv-1001".to_string(), "fv-1002".to_string()];
    let proposal = reconciler.propose_match("mov-001", &group).await?;
    println!(
        "  • mov-001 would become {} (pending {})",
        proposal.projected.status,
        config.format_amount(proposal.projected.pending_amount)
    );

    let outcome = reconciler.confirm_match("mov-001", &group).await?;
    println!("  ✓ mov-001 is {}", outcome.status);

    let outcome = reconciler
        .confirm_match("mov-002", &["fc-7781".to_string()])
        .await?;
    println!("  ✓ mov-002 is {}", outcome.status);
    for warning in &outcome.warnings {
        println!("    ⚠ {:?}", warning);
    }

    let outcome = reconciler
        .confirm_match("mov-003", &["in-0003".to_string()])
        .await?;
    println!(
        "  ✓ mov-003 is {} with {} still pending",
        outcome.status,
        config.format_amount(outcome.pending_amount)
    );

    // A document can only back one movement
    if let Err(err) = reconciler
        .confirm_match("mov-003", &["fv-1002".to_string()])
        .await
    {
        println!("  ✗ {}", err);
    }
    println!();

    // 4. Post and close the month
    reconciler
        .mark_posted("mov-001", Some("JE-2024-0311".to_string()))
        .await?;
    calendar.close_period("2024-03")?;
    if let Err(err) = reconciler.unlink_document("mov-001", "fv-1002").await {
        println!("🔒 {}\n", err);
    }

    // 5. Reconciliation table
    println!("📊 Conciliation table:");
    for view in reconciler
        .list_movements("acme", &MovementFilter::new())
        .await?
    {
        let linked: Vec<&str> = view.documents.iter().map(|d| d.id.as_str()).collect();
        println!(
            "  {} {:<8} pending {:>8} posted {:<5} [{}]",
            view.movement.id,
            view.derivation.status.to_string(),
            config.format_amount(view.derivation.pending_amount),
            view.is_posted(),
            linked.join(", ")
        );
    }

    let summary = reconciler.summary("acme", &MovementFilter::new()).await?;
    println!(
        "\n  {} movements: {} full, {} partial, {} unmatched, {} posted",
        summary.total_movements, summary.full, summary.partial, summary.no_match, summary.posted
    );
    println!("  Total pending: {}", config.format_amount(summary.total_pending));

    let open = reconciler
        .list_movements(
            "acme",
            &MovementFilter::new().with_status(ReconciliationStatus::Partial),
        )
        .await?;
    println!("  Movements needing attention: {}", open.len());

    Ok(())
}
