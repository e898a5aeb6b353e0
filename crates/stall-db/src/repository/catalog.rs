//! # Catalog Repository
//!
//! Read access to varieties, suppliers and locations, plus upserts used by
//! the seed binary and tests. Catalog editing itself happens elsewhere.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use stall_core::{CatalogSnapshot, Location, Money, Quantity, Supplier, Variety};

use crate::error::DbResult;
use crate::repository::begin_write;

#[derive(Debug, sqlx::FromRow)]
struct VarietyRow {
    id: String,
    tenant_id: String,
    name: String,
    sku: Option<String>,
    price: Money,
    stock_milli: Option<Quantity>,
    supplier_id: Option<String>,
    location_id: Option<String>,
    is_active: bool,
}

impl From<VarietyRow> for Variety {
    fn from(row: VarietyRow) -> Self {
        Variety {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            sku: row.sku,
            price: row.price,
            stock: row.stock_milli,
            supplier_id: row.supplier_id,
            location_id: row.location_id,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SupplierRow {
    id: String,
    tenant_id: String,
    name: String,
    contact: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct LocationRow {
    id: String,
    tenant_id: String,
    name: String,
    address: Option<String>,
}

/// Repository for catalog reads.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    /// Everything a device needs to sell offline, read in one transaction so
    /// the three lists are consistent with each other.
    pub async fn snapshot(&self, tenant_id: &str) -> DbResult<CatalogSnapshot> {
        let mut tx = begin_write(&self.pool).await?;

        let varieties: Vec<VarietyRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, name, sku, price, stock_milli,
                   supplier_id, location_id, is_active
            FROM varieties
            WHERE tenant_id = ?1 AND is_active = 1
            ORDER BY name, id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&mut *tx)
        .await?;

        let suppliers: Vec<SupplierRow> = sqlx::query_as(
            "SELECT id, tenant_id, name, contact FROM suppliers WHERE tenant_id = ?1 ORDER BY name, id",
        )
        .bind(tenant_id)
        .fetch_all(&mut *tx)
        .await?;

        let locations: Vec<LocationRow> = sqlx::query_as(
            "SELECT id, tenant_id, name, address FROM locations WHERE tenant_id = ?1 ORDER BY name, id",
        )
        .bind(tenant_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            tenant_id = %tenant_id,
            varieties = varieties.len(),
            suppliers = suppliers.len(),
            locations = locations.len(),
            "Catalog snapshot read"
        );

        Ok(CatalogSnapshot {
            tenant_id: tenant_id.to_string(),
            varieties: varieties.into_iter().map(Variety::from).collect(),
            suppliers: suppliers
                .into_iter()
                .map(|r| Supplier {
                    id: r.id,
                    tenant_id: r.tenant_id,
                    name: r.name,
                    contact: r.contact,
                })
                .collect(),
            locations: locations
                .into_iter()
                .map(|r| Location {
                    id: r.id,
                    tenant_id: r.tenant_id,
                    name: r.name,
                    address: r.address,
                })
                .collect(),
            fetched_at: Utc::now(),
        })
    }

    /// Gets one variety, active or not.
    pub async fn variety(&self, tenant_id: &str, id: &str) -> DbResult<Option<Variety>> {
        let row: Option<VarietyRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, name, sku, price, stock_milli,
                   supplier_id, location_id, is_active
            FROM varieties
            WHERE tenant_id = ?1 AND id = ?2
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Variety::from))
    }

    pub async fn count_varieties(&self, tenant_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM varieties WHERE tenant_id = ?1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn upsert_variety(&self, variety: &Variety) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO varieties (
                id, tenant_id, name, sku, price, stock_milli,
                supplier_id, location_id, is_active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                sku = excluded.sku,
                price = excluded.price,
                stock_milli = excluded.stock_milli,
                supplier_id = excluded.supplier_id,
                location_id = excluded.location_id,
                is_active = excluded.is_active
            "#,
        )
        .bind(&variety.id)
        .bind(&variety.tenant_id)
        .bind(&variety.name)
        .bind(&variety.sku)
        .bind(variety.price)
        .bind(variety.stock)
        .bind(&variety.supplier_id)
        .bind(&variety.location_id)
        .bind(variety.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_supplier(&self, supplier: &Supplier) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO suppliers (id, tenant_id, name, contact)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (id) DO UPDATE SET name = excluded.name, contact = excluded.contact
            "#,
        )
        .bind(&supplier.id)
        .bind(&supplier.tenant_id)
        .bind(&supplier.name)
        .bind(&supplier.contact)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_location(&self, location: &Location) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO locations (id, tenant_id, name, address)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (id) DO UPDATE SET name = excluded.name, address = excluded.address
            "#,
        )
        .bind(&location.id)
        .bind(&location.tenant_id)
        .bind(&location.name)
        .bind(&location.address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_snapshot_is_tenant_scoped_and_skips_inactive() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();

        catalog
            .upsert_supplier(&Supplier {
                id: "s1".into(),
                tenant_id: "t1".into(),
                name: "Green Farm".into(),
                contact: None,
            })
            .await
            .unwrap();
        catalog
            .upsert_location(&Location {
                id: "l1".into(),
                tenant_id: "t1".into(),
                name: "Saturday market".into(),
                address: Some("Plaza 1".into()),
            })
            .await
            .unwrap();

        let mut apple = Variety {
            id: "v1".into(),
            tenant_id: "t1".into(),
            name: "Apple".into(),
            sku: Some("APL".into()),
            price: Money::from_minor(250),
            stock: Some(Quantity::from_units(10)),
            supplier_id: Some("s1".into()),
            location_id: Some("l1".into()),
            is_active: true,
        };
        catalog.upsert_variety(&apple).await.unwrap();

        let mut retired = apple.clone();
        retired.id = "v2".into();
        retired.is_active = false;
        catalog.upsert_variety(&retired).await.unwrap();

        let mut foreign = apple.clone();
        foreign.id = "v3".into();
        foreign.tenant_id = "t2".into();
        foreign.supplier_id = None;
        foreign.location_id = None;
        catalog.upsert_variety(&foreign).await.unwrap();

        let snapshot = catalog.snapshot("t1").await.unwrap();
        assert_eq!(snapshot.varieties.len(), 1);
        assert_eq!(snapshot.suppliers.len(), 1);
        assert_eq!(snapshot.locations.len(), 1);
        assert_eq!(snapshot.variety("v1").unwrap().stock, Some(Quantity::from_units(10)));

        // Upsert replaces
        apple.price = Money::from_minor(300);
        catalog.upsert_variety(&apple).await.unwrap();
        let stored = catalog.variety("t1", "v1").await.unwrap().unwrap();
        assert_eq!(stored.price, Money::from_minor(300));
        assert_eq!(catalog.count_varieties("t1").await.unwrap(), 2);
    }
}
