//! # Seed Data Generator
//!
//! Loads a demo market-stall catalog into the authoritative store.
//!
//! ## Usage
//! ```bash
//! cargo run -p stall-db --bin seed
//! cargo run -p stall-db --bin seed -- --tenant demo --db ./data/authority.db
//! ```
//!
//! Produce is sold by weight with tracked stock; bags and services are
//! untracked.

use std::env;
use stall_core::{Location, Money, Quantity, Supplier, Variety};
use stall_db::{Database, DbConfig};

/// (sku, name, price in minor units, stock in thousandths; None = untracked)
const VARIETIES: &[(&str, &str, i64, Option<i64>)] = &[
    ("TOM-RND", "Tomato, round", 180, Some(25_000)),
    ("TOM-CHR", "Tomato, cherry", 420, Some(8_000)),
    ("ONI-RED", "Onion, red", 90, Some(30_000)),
    ("POT-WHT", "Potato, white", 70, Some(50_000)),
    ("CAR-ORG", "Carrot", 110, Some(20_000)),
    ("LET-ICE", "Lettuce, iceberg", 150, Some(40_000)),
    ("APL-RED", "Apple, red", 250, Some(30_000)),
    ("BAN-CAV", "Banana", 160, Some(35_000)),
    ("AVO-HAS", "Avocado", 399, Some(15_000)),
    ("LEM-EUR", "Lemon", 60, Some(60_000)),
    ("HRB-COR", "Coriander bunch", 100, Some(12_000)),
    ("EGG-DOZ", "Eggs, dozen", 450, Some(20_000)),
    ("BAG-PAP", "Paper bag", 10, None),
    ("SRV-DLV", "Home delivery", 500, None),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./stall_dev.db");
    let mut tenant = String::from("demo");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--tenant" | "-t" => {
                if i + 1 < args.len() {
                    tenant = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stall POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>       Database file path (default: ./stall_dev.db)");
                println!("  -t, --tenant <ID>     Tenant to seed (default: demo)");
                println!("  -h, --help            Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Stall POS Seed Data Generator");
    println!("=============================");
    println!("Database: {}", db_path);
    println!("Tenant:   {}", tenant);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected, migrations applied");

    let existing = db.catalog().count_varieties(&tenant).await?;
    if existing > 0 {
        println!("⚠ Tenant already has {} varieties, skipping.", existing);
        return Ok(());
    }

    let supplier = Supplier {
        id: format!("{}-sup-1", tenant),
        tenant_id: tenant.clone(),
        name: "Valley Growers Co-op".to_string(),
        contact: Some("orders@valley.example".to_string()),
    };
    db.catalog().upsert_supplier(&supplier).await?;

    let location = Location {
        id: format!("{}-loc-1", tenant),
        tenant_id: tenant.clone(),
        name: "Central market, stall 14".to_string(),
        address: None,
    };
    db.catalog().upsert_location(&location).await?;

    let start = std::time::Instant::now();
    for (sku, name, price, stock) in VARIETIES {
        let variety = Variety {
            id: format!("{}-{}", tenant, sku.to_lowercase()),
            tenant_id: tenant.clone(),
            name: name.to_string(),
            sku: Some(sku.to_string()),
            price: Money::from_minor(*price),
            stock: stock.map(Quantity::from_milli),
            supplier_id: stock.map(|_| supplier.id.clone()),
            location_id: Some(location.id.clone()),
            is_active: true,
        };

        if let Err(e) = db.catalog().upsert_variety(&variety).await {
            eprintln!("Failed to insert {}: {}", sku, e);
        }
    }

    let snapshot = db.catalog().snapshot(&tenant).await?;
    println!(
        "✓ Seeded {} varieties in {:?}",
        snapshot.varieties.len(),
        start.elapsed()
    );

    db.close().await;
    Ok(())
}
