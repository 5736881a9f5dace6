//! Database setup / 数据库初始化
//!
//! Pool creation with WAL mode and busy_timeout, `CREATE TABLE IF NOT
//! EXISTS` migrations, and the product row mapping. `model_lower` and
//! `price_value` are derived columns kept in sync by the upsert so text
//! and range predicates never re-normalize per row.

use anyhow::Result;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::models::{parse_price, Product, SupplierRef};

/// Connect and apply the pragmas this service runs with / 连接并设置PRAGMA
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(database_url)
        .await?;

    // WAL mode for concurrent readers, bounded lock waits
    sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout=5000").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL").execute(&pool).await?;

    tracing::info!("Database connected: {} (WAL mode)", database_url);
    Ok(pool)
}

/// Run database migrations / 运行数据库迁移
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            model_lower TEXT NOT NULL,
            brand TEXT,
            category TEXT,
            storage TEXT,
            region TEXT,
            color TEXT,
            price TEXT NOT NULL,
            price_value REAL,
            supplier_id INTEGER,
            supplier_name TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL,
            available INTEGER NOT NULL DEFAULT 1,
            lowest_price INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_model ON products(model_lower)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_date ON products(date)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_price ON products(price_value)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_brand ON products(brand)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Batch upsert from the ingestion boundary, one transaction / 批量写入
pub async fn upsert_products(pool: &SqlitePool, products: &[Product]) -> Result<usize> {
    if products.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    for p in products {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO products
                (id, model, model_lower, brand, category, storage, region, color,
                 price, price_value, supplier_id, supplier_name, date, available, lowest_price)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&p.id)
        .bind(&p.model)
        .bind(p.model.to_lowercase())
        .bind(&p.brand)
        .bind(&p.category)
        .bind(&p.storage)
        .bind(&p.region)
        .bind(&p.color)
        .bind(&p.price)
        .bind(parse_price(&p.price))
        .bind(p.supplier.id())
        .bind(p.supplier.name())
        .bind(&p.date)
        .bind(p.available as i32)
        .bind(p.lowest_price as i32)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::debug!(count = products.len(), "products upserted");
    Ok(products.len())
}

/// Map a products row back to the model / 行到模型的映射
pub fn product_from_row(row: &SqliteRow) -> Product {
    let supplier_id: Option<i64> = row.get("supplier_id");
    let supplier_name: String = row.get("supplier_name");
    let supplier = match supplier_id {
        Some(id) => SupplierRef::Id { id, name: supplier_name },
        None => SupplierRef::Name(supplier_name),
    };

    Product {
        id: row.get("id"),
        model: row.get("model"),
        brand: row.get("brand"),
        category: row.get("category"),
        storage: row.get("storage"),
        region: row.get("region"),
        color: row.get("color"),
        price: row.get("price"),
        supplier,
        date: row.get("date"),
        available: row.get::<i32, _>("available") == 1,
        lowest_price: row.get::<i32, _>("lowest_price") == 1,
    }
}
