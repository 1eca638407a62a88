use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, Row, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use catalog_core::types::{NewProduct, Product, Seller};

const SQLITE_CONSTRAINT_NOTNULL: &str = "1299";
const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle to interact with the product table.
    pub fn products(&self) -> ProductRepository {
        ProductRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for seller lookups.
    pub fn sellers(&self) -> SellerRepository {
        SellerRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of a write addressed by UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    Missing,
}

impl WriteOutcome {
    fn from_rows(rows_affected: u64) -> Self {
        if rows_affected == 0 {
            Self::Missing
        } else {
            Self::Applied
        }
    }

    pub fn is_missing(self) -> bool {
        matches!(self, Self::Missing)
    }
}

const PRODUCT_SELECT: &str = "SELECT p.id_product, p.name, p.brand, p.stock, s.uuid AS seller_uuid, p.uuid \
     FROM product AS p \
     INNER JOIN seller AS s ON s.id_seller = p.fk_seller";

/// Repository responsible for the `product` table.
#[derive(Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Returns a page of products in storage order.
    pub async fn list(&self, offset: u32, limit: u32) -> Result<Vec<Product>, ProductError> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!("{PRODUCT_SELECT} LIMIT ? OFFSET ?"))
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ProductRow::into_domain).collect()
    }

    /// Loads a product by its external identifier.
    pub async fn find_by_uuid(&self, uuid: &str) -> Result<Option<Product>, ProductError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!("{PRODUCT_SELECT} WHERE p.uuid = ?"))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ProductRow::into_domain).transpose()
    }

    /// Inserts a product, resolving the seller key from its UUID.
    pub async fn insert(&self, record: &NewProductRecord<'_>) -> Result<Product, ProductError> {
        let row = sqlx::query(
            "INSERT INTO product (name, brand, stock, fk_seller, uuid) \
             VALUES (?, ?, ?, (SELECT id_seller FROM seller WHERE uuid = ?), ?) \
             RETURNING id_product",
        )
        .bind(record.name)
        .bind(record.brand)
        .bind(i64::from(record.stock))
        .bind(record.seller_uuid)
        .bind(&record.uuid)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) => {
                let missing_seller = matches!(
                    db_err.code().as_deref(),
                    Some(SQLITE_CONSTRAINT_NOTNULL) | Some(SQLITE_CONSTRAINT_FOREIGNKEY)
                );
                if missing_seller {
                    ProductError::MissingSeller
                } else {
                    ProductError::Database(sqlx::Error::Database(db_err))
                }
            }
            other => ProductError::Database(other),
        })?;

        Ok(Product {
            id: row.get("id_product"),
            uuid: record.uuid.clone(),
            name: record.name.to_string(),
            brand: record.brand.to_string(),
            stock: record.stock,
            seller_uuid: record.seller_uuid.to_string(),
        })
    }

    /// Overwrites name, brand and stock of the product with the same UUID.
    pub async fn update(&self, product: &Product) -> Result<WriteOutcome, ProductError> {
        let result =
            sqlx::query("UPDATE product SET name = ?, brand = ?, stock = ? WHERE uuid = ?")
                .bind(&product.name)
                .bind(&product.brand)
                .bind(i64::from(product.stock))
                .bind(&product.uuid)
                .execute(&self.pool)
                .await?;

        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }

    pub async fn delete(&self, uuid: &str) -> Result<WriteOutcome, ProductError> {
        let result = sqlx::query("DELETE FROM product WHERE uuid = ?")
            .bind(uuid)
            .execute(&self.pool)
            .await?;

        Ok(WriteOutcome::from_rows(result.rows_affected()))
    }
}

/// Product about to be inserted, with its freshly generated UUID.
#[derive(Debug, Clone)]
pub struct NewProductRecord<'a> {
    pub uuid: String,
    pub name: &'a str,
    pub brand: &'a str,
    pub stock: u32,
    pub seller_uuid: &'a str,
}

impl<'a> NewProductRecord<'a> {
    pub fn with_generated_uuid(input: &'a NewProduct) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: &input.name,
            brand: &input.brand,
            stock: input.stock,
            seller_uuid: &input.seller_uuid,
        }
    }
}

/// Product joined with its seller UUID.
#[derive(Debug, sqlx::FromRow)]
pub struct ProductRow {
    pub id_product: i64,
    pub name: String,
    pub brand: String,
    pub stock: i64,
    pub seller_uuid: String,
    pub uuid: String,
}

impl ProductRow {
    /// Converts the database row into a domain product. Stock levels that do
    /// not fit the domain range are rejected rather than clamped.
    pub fn into_domain(self) -> Result<Product, ProductError> {
        let stock = u32::try_from(self.stock).map_err(|_| ProductError::InvalidStock {
            uuid: self.uuid.clone(),
            stock: self.stock,
        })?;
        Ok(Product {
            id: self.id_product,
            uuid: self.uuid,
            name: self.name,
            brand: self.brand,
            stock,
            seller_uuid: self.seller_uuid,
        })
    }
}

/// Errors that can occur while reading or writing products.
#[derive(Debug, Error)]
pub enum ProductError {
    #[error("seller referenced by the product does not exist")]
    MissingSeller,
    #[error("product {uuid} has out of range stock {stock}")]
    InvalidStock { uuid: String, stock: i64 },
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for ProductError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

const SELLER_SELECT: &str = "SELECT s.id_seller, s.name, s.email, s.phone, s.uuid FROM seller AS s";

/// Read-only repository over the `seller` table.
#[derive(Clone)]
pub struct SellerRepository {
    pool: SqlitePool,
}

impl SellerRepository {
    pub async fn find_by_uuid(&self, uuid: &str) -> Result<Option<Seller>, SellerError> {
        let row = sqlx::query_as::<_, SellerRow>(&format!("{SELLER_SELECT} WHERE s.uuid = ?"))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(SellerRow::into_domain))
    }

    pub async fn list(&self) -> Result<Vec<Seller>, SellerError> {
        let rows = sqlx::query_as::<_, SellerRow>(SELLER_SELECT)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(SellerRow::into_domain).collect())
    }

    /// Ranks sellers by the number of products they own, most first.
    ///
    /// Sellers without products are not ranked. Ties keep whatever order
    /// SQLite produces.
    pub async fn top_by_product_count(&self, limit: u32) -> Result<Vec<Seller>, SellerError> {
        let rows = sqlx::query_as::<_, SellerRow>(&format!(
            "{SELLER_SELECT} \
             INNER JOIN (SELECT fk_seller, COUNT(*) AS product_count FROM product GROUP BY fk_seller) AS p \
             ON p.fk_seller = s.id_seller \
             ORDER BY p.product_count DESC \
             LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SellerRow::into_domain).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SellerRow {
    pub id_seller: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub uuid: String,
}

impl SellerRow {
    pub fn into_domain(self) -> Seller {
        Seller {
            id: self.id_seller,
            uuid: self.uuid,
            name: self.name,
            email: self.email,
            phone: self.phone,
        }
    }
}

/// Errors that can occur while reading sellers.
#[derive(Debug, Error)]
pub enum SellerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
