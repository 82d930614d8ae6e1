use chrono::{NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        inventory_transaction::{self, ReferenceType, TransactionType},
        product,
        stock_batch::{self, BatchStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{checked_sum, ensure_storable},
};

/// The document and user behind a ledger movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSource {
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,
    pub reference_number: String,
    pub performed_by: Uuid,
    pub notes: Option<String>,
}

/// Goods entering a batch, identified by product and batch code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCredit {
    pub product_id: Uuid,
    pub batch_number: String,
    /// Quantity in the product's primary unit
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub received_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
}

/// Result of one credit or debit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPosting {
    pub batch: stock_batch::Model,
    pub transaction: inventory_transaction::Model,
    /// Product balance after this movement
    pub balance: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StockStatus {
    OutOfStock,
    LowStock,
    InStock,
}

impl StockStatus {
    pub fn classify(balance: Decimal, reorder_level: Decimal) -> Self {
        if balance <= Decimal::ZERO {
            StockStatus::OutOfStock
        } else if balance <= reorder_level {
            StockStatus::LowStock
        } else {
            StockStatus::InStock
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub balance: Decimal,
    pub reorder_level: Decimal,
    pub status: StockStatus,
}

/// Batch-level stock ledger. Owns every write to on-hand quantities.
#[derive(Clone)]
pub struct StockLedger {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
    low_stock_alerts: bool,
}

impl StockLedger {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self {
            db,
            event_sender,
            low_stock_alerts: true,
        }
    }

    pub fn with_low_stock_alerts(mut self, enabled: bool) -> Self {
        self.low_stock_alerts = enabled;
        self
    }

    /// Credits goods into a batch in its own transaction.
    #[instrument(skip(self, source), fields(product_id = %credit.product_id, batch = %credit.batch_number))]
    pub async fn credit(
        &self,
        credit: StockCredit,
        source: StockSource,
    ) -> Result<LedgerPosting, ServiceError> {
        let txn = self.db.begin().await?;
        let posting = Self::credit_in_txn(&txn, credit, &source, TransactionType::Inward).await?;
        txn.commit().await?;

        self.publish(std::slice::from_ref(&posting)).await;
        Ok(posting)
    }

    /// Debits a batch in its own transaction.
    #[instrument(skip(self, source))]
    pub async fn debit(
        &self,
        product_id: Uuid,
        batch_id: Uuid,
        quantity: Decimal,
        source: StockSource,
    ) -> Result<LedgerPosting, ServiceError> {
        let txn = self.db.begin().await?;
        let posting = Self::debit_in_txn(&txn, product_id, batch_id, quantity, &source).await?;
        txn.commit().await?;

        self.publish(std::slice::from_ref(&posting)).await;
        Ok(posting)
    }

    /// Creates the batch on first receipt, tops it up afterwards, and appends
    /// one ledger row of `transaction_type`.
    pub async fn credit_in_txn<C: ConnectionTrait>(
        conn: &C,
        credit: StockCredit,
        source: &StockSource,
        transaction_type: TransactionType,
    ) -> Result<LedgerPosting, ServiceError> {
        if credit.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "credit quantity must be positive, got {}",
                credit.quantity
            )));
        }
        let batch_number = credit.batch_number.trim();
        if batch_number.is_empty() {
            return Err(ServiceError::ValidationError(
                "batch number must not be empty".to_string(),
            ));
        }
        ensure_storable(batch_number, "credit quantity", credit.quantity)?;

        let today = Utc::now().date_naive();
        let now = Utc::now();

        let existing = stock_batch::Entity::find()
            .filter(stock_batch::Column::ProductId.eq(credit.product_id))
            .filter(stock_batch::Column::BatchNumber.eq(batch_number))
            .one(conn)
            .await?;

        let batch = match existing {
            Some(batch) => {
                if batch.is_expired_on(today) {
                    return Err(ServiceError::InvalidOperation(format!(
                        "batch {} of product {} has expired",
                        batch.batch_number, batch.product_id
                    )));
                }
                warn!(
                    batch_id = %batch.id,
                    batch_number = %batch.batch_number,
                    "Credit merges into an existing batch"
                );
                let label = format!("batch {}", batch.batch_number);
                let quantity = checked_sum(&label, "received quantity", batch.quantity, credit.quantity)?;
                let updated = stock_batch::Model {
                    quantity: ensure_storable(&label, "received quantity", quantity)?,
                    remaining_quantity: batch.remaining_quantity + credit.quantity,
                    status: BatchStatus::Active,
                    expiry_date: batch.expiry_date.or(credit.expiry_date),
                    version: batch.version + 1,
                    updated_at: now,
                    ..batch.clone()
                };
                Self::write_batch(conn, &batch, &updated).await?;
                updated
            }
            None => {
                stock_batch::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    product_id: Set(credit.product_id),
                    batch_number: Set(batch_number.to_string()),
                    quantity: Set(credit.quantity),
                    remaining_quantity: Set(credit.quantity),
                    purchase_price: Set(credit.unit_cost),
                    received_date: Set(credit.received_date),
                    expiry_date: Set(credit.expiry_date),
                    status: Set(BatchStatus::Active),
                    version: Set(0),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(conn)
                .await?
            }
        };

        let balance = Self::balance_in(conn, credit.product_id, today).await?;
        let transaction =
            Self::append(conn, transaction_type, &batch, credit.quantity, balance, source).await?;

        Ok(LedgerPosting {
            batch,
            transaction,
            balance,
        })
    }

    /// Puts returned goods back into the batch they left from.
    pub async fn restore_in_txn<C: ConnectionTrait>(
        conn: &C,
        batch_id: Uuid,
        quantity: Decimal,
        source: &StockSource,
    ) -> Result<LedgerPosting, ServiceError> {
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "return quantity must be positive, got {}",
                quantity
            )));
        }

        let batch = Self::find_batch(conn, batch_id).await?;
        let today = Utc::now().date_naive();
        if batch.is_expired_on(today) {
            return Err(ServiceError::InvalidOperation(format!(
                "batch {} of product {} has expired",
                batch.batch_number, batch.product_id
            )));
        }
        let label = format!("batch {}", batch.batch_number);
        let remaining = checked_sum(&label, "remaining quantity", batch.remaining_quantity, quantity)?;
        let updated = stock_batch::Model {
            remaining_quantity: ensure_storable(&label, "remaining quantity", remaining)?,
            status: if batch.status == BatchStatus::Exhausted {
                BatchStatus::Active
            } else {
                batch.status
            },
            version: batch.version + 1,
            updated_at: Utc::now(),
            ..batch.clone()
        };
        Self::write_batch(conn, &batch, &updated).await?;

        let balance = Self::balance_in(conn, batch.product_id, today).await?;
        let transaction =
            Self::append(conn, TransactionType::Return, &updated, quantity, balance, source).await?;

        Ok(LedgerPosting {
            batch: updated,
            transaction,
            balance,
        })
    }

    /// Removes stock from one batch. The batch write is conditional on the
    /// version read here, so a concurrent debit fails instead of overselling.
    pub async fn debit_in_txn<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        batch_id: Uuid,
        quantity: Decimal,
        source: &StockSource,
    ) -> Result<LedgerPosting, ServiceError> {
        if quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "debit quantity must be positive, got {}",
                quantity
            )));
        }

        let batch = Self::find_batch(conn, batch_id).await?;
        if batch.product_id != product_id {
            return Err(ServiceError::ValidationError(format!(
                "batch {} does not belong to product {}",
                batch.batch_number, product_id
            )));
        }

        let today = Utc::now().date_naive();
        if batch.is_expired_on(today) {
            counter!("agrisupply.stock.debit_rejected", 1);
            return Err(ServiceError::InvalidOperation(format!(
                "batch {} has expired",
                batch.batch_number
            )));
        }
        if quantity > batch.remaining_quantity {
            counter!("agrisupply.stock.debit_rejected", 1);
            return Err(ServiceError::InsufficientStock(format!(
                "batch {}: requested {}, available {}",
                batch.batch_number, quantity, batch.remaining_quantity
            )));
        }

        let remaining = batch.remaining_quantity - quantity;
        let updated = stock_batch::Model {
            remaining_quantity: remaining,
            status: if remaining.is_zero() {
                BatchStatus::Exhausted
            } else {
                BatchStatus::Active
            },
            version: batch.version + 1,
            updated_at: Utc::now(),
            ..batch.clone()
        };
        Self::write_batch(conn, &batch, &updated).await?;

        let balance = Self::balance_in(conn, product_id, today).await?;
        let transaction = Self::append(
            conn,
            TransactionType::Outward,
            &updated,
            -quantity,
            balance,
            source,
        )
        .await?;

        Ok(LedgerPosting {
            batch: updated,
            transaction,
            balance,
        })
    }

    /// Σ remaining quantity over the product's batches that are usable on `today`.
    pub async fn balance_in<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
        today: NaiveDate,
    ) -> Result<Decimal, ServiceError> {
        let batches = stock_batch::Entity::find()
            .filter(stock_batch::Column::ProductId.eq(product_id))
            .all(conn)
            .await?;

        Ok(batches
            .iter()
            .filter(|b| !b.is_expired_on(today))
            .map(|b| b.remaining_quantity)
            .sum())
    }

    #[instrument(skip(self))]
    pub async fn current_balance(&self, product_id: Uuid) -> Result<Decimal, ServiceError> {
        Self::balance_in(&*self.db, product_id, Utc::now().date_naive()).await
    }

    #[instrument(skip(self))]
    pub async fn stock_status(&self, product_id: Uuid) -> Result<StockLevel, ServiceError> {
        let product = product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let balance = self.current_balance(product_id).await?;
        Ok(StockLevel {
            product_id,
            balance,
            reorder_level: product.reorder_level,
            status: StockStatus::classify(balance, product.reorder_level),
        })
    }

    /// Flags every active or exhausted batch whose expiry date is before `today`.
    #[instrument(skip(self))]
    pub async fn expire_batches(&self, today: NaiveDate) -> Result<u64, ServiceError> {
        let result = stock_batch::Entity::update_many()
            .set(stock_batch::ActiveModel {
                status: Set(BatchStatus::Expired),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .col_expr(
                stock_batch::Column::Version,
                Expr::col(stock_batch::Column::Version).add(1),
            )
            .filter(stock_batch::Column::ExpiryDate.lt(today))
            .filter(stock_batch::Column::Status.ne(BatchStatus::Expired))
            .exec(&*self.db)
            .await
            .map_err(|e| {
                error!("Failed to expire batches: {}", e);
                ServiceError::DatabaseError(e)
            })?;

        info!(count = result.rows_affected, %today, "Expired stock batches");
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::BatchesExpired {
                    count: result.rows_affected,
                })
                .await;
        }
        Ok(result.rows_affected)
    }

    pub async fn batches(&self, product_id: Uuid) -> Result<Vec<stock_batch::Model>, ServiceError> {
        Ok(stock_batch::Entity::find()
            .filter(stock_batch::Column::ProductId.eq(product_id))
            .order_by_asc(stock_batch::Column::ReceivedDate)
            .order_by_asc(stock_batch::Column::BatchNumber)
            .all(&*self.db)
            .await?)
    }

    pub async fn batch(&self, batch_id: Uuid) -> Result<stock_batch::Model, ServiceError> {
        Self::find_batch(&*self.db, batch_id).await
    }

    /// Audit trail for a product, newest first.
    pub async fn transactions(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<inventory_transaction::Model>, ServiceError> {
        Ok(inventory_transaction::Entity::find()
            .filter(inventory_transaction::Column::ProductId.eq(product_id))
            .order_by_desc(inventory_transaction::Column::TransactionDate)
            .all(&*self.db)
            .await?)
    }

    /// Emits stock events for committed postings, plus a low-stock alert for
    /// every product whose balance dropped to its reorder level.
    pub async fn publish(&self, postings: &[LedgerPosting]) {
        let Some(sender) = &self.event_sender else {
            return;
        };

        for posting in postings {
            let tx = &posting.transaction;
            let event = if tx.quantity.is_sign_negative() {
                Event::StockDebited {
                    product_id: tx.product_id,
                    batch_id: tx.batch_id,
                    quantity: -tx.quantity,
                    balance: posting.balance,
                }
            } else {
                Event::StockCredited {
                    product_id: tx.product_id,
                    batch_id: tx.batch_id,
                    quantity: tx.quantity,
                    balance: posting.balance,
                }
            };
            sender.send_or_log(event).await;

            if self.low_stock_alerts && tx.quantity.is_sign_negative() {
                match product::Entity::find_by_id(tx.product_id).one(&*self.db).await {
                    Ok(Some(product)) if posting.balance <= product.reorder_level => {
                        sender
                            .send_or_log(Event::LowStockDetected {
                                product_id: product.id,
                                balance: posting.balance,
                                reorder_level: product.reorder_level,
                            })
                            .await;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Skipping low-stock check"),
                }
            }
        }
    }

    async fn find_batch<C: ConnectionTrait>(
        conn: &C,
        batch_id: Uuid,
    ) -> Result<stock_batch::Model, ServiceError> {
        stock_batch::Entity::find_by_id(batch_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Stock batch {} not found", batch_id)))
    }

    async fn write_batch<C: ConnectionTrait>(
        conn: &C,
        current: &stock_batch::Model,
        updated: &stock_batch::Model,
    ) -> Result<(), ServiceError> {
        let result = stock_batch::Entity::update_many()
            .set(stock_batch::ActiveModel {
                quantity: Set(updated.quantity),
                remaining_quantity: Set(updated.remaining_quantity),
                status: Set(updated.status),
                expiry_date: Set(updated.expiry_date),
                version: Set(updated.version),
                updated_at: Set(updated.updated_at),
                ..Default::default()
            })
            .filter(stock_batch::Column::Id.eq(current.id))
            .filter(stock_batch::Column::Version.eq(current.version))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(batch_id = %current.id, version = current.version, "Stale batch write");
            return Err(ServiceError::ConcurrentModification(current.id));
        }
        Ok(())
    }

    async fn append<C: ConnectionTrait>(
        conn: &C,
        transaction_type: TransactionType,
        batch: &stock_batch::Model,
        quantity: Decimal,
        balance: Decimal,
        source: &StockSource,
    ) -> Result<inventory_transaction::Model, ServiceError> {
        let row = inventory_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            transaction_type: Set(transaction_type),
            product_id: Set(batch.product_id),
            batch_id: Set(batch.id),
            quantity: Set(quantity),
            balance_after_transaction: Set(balance),
            reference_type: Set(source.reference_type),
            reference_id: Set(source.reference_id),
            reference_number: Set(source.reference_number.clone()),
            performed_by: Set(source.performed_by),
            notes: Set(source.notes.clone()),
            transaction_date: Set(Utc::now()),
        }
        .insert(conn)
        .await?;

        Ok(row)
    }
}
