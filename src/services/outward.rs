use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::{
    document_number,
    stock_ledger::{StockLedger, StockSource},
    validate_positive_decimal,
};
use crate::{
    auth::{ensure_permitted, permissions, Actor, ApprovalAuthorizer},
    entities::{
        inventory_transaction::ReferenceType,
        outward_entry::{self, OutwardPurpose, OutwardStatus},
        outward_item, product, stock_batch,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewOutwardEntry {
    pub purpose: OutwardPurpose,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "an outward entry needs at least one item"))]
    pub items: Vec<NewOutwardItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewOutwardItem {
    pub product_id: Uuid,
    pub batch_id: Uuid,
    #[validate(custom = "validate_positive_decimal")]
    pub quantity: Decimal,
    /// Defaults to the product's primary unit
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutwardView {
    #[serde(flatten)]
    pub entry: outward_entry::Model,
    pub items: Vec<outward_item::Model>,
}

/// Issues stock out of specific batches. Nothing leaves the ledger until the
/// entry is approved; approval and issuance are one step.
#[derive(Clone)]
pub struct OutwardService {
    db: Arc<DatabaseConnection>,
    authorizer: Arc<dyn ApprovalAuthorizer>,
    ledger: StockLedger,
    event_sender: Option<EventSender>,
}

impl OutwardService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        authorizer: Arc<dyn ApprovalAuthorizer>,
        ledger: StockLedger,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            authorizer,
            ledger,
            event_sender,
        }
    }

    #[instrument(skip(self, request, actor), fields(actor_id = %actor.id))]
    pub async fn draft(
        &self,
        request: NewOutwardEntry,
        actor: &Actor,
    ) -> Result<OutwardView, ServiceError> {
        request.validate()?;
        ensure_permitted(self.authorizer.as_ref(), actor, permissions::OUTWARD_CREATE).await?;

        let now = Utc::now();
        let txn = self.db.begin().await?;
        let entry = outward_entry::ActiveModel {
            id: Set(Uuid::new_v4()),
            outward_number: Set(document_number("OUT")),
            status: Set(OutwardStatus::Draft),
            purpose: Set(request.purpose),
            notes: Set(request.notes),
            created_by: Set(actor.id),
            issued_by: Set(None),
            issued_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        let items = insert_items(&txn, entry.id, request.items).await?;
        txn.commit().await?;

        info!(outward_id = %entry.id, outward_number = %entry.outward_number, "Outward entry drafted");
        Ok(OutwardView { entry, items })
    }

    /// Moves a draft to `pending`.
    pub async fn submit(&self, outward_id: Uuid) -> Result<outward_entry::Model, ServiceError> {
        let db = &*self.db;
        let entry = find_entry(db, outward_id).await?;
        match entry.status {
            OutwardStatus::Draft => {}
            OutwardStatus::Pending => {
                return Err(ServiceError::AlreadyProcessed(format!(
                    "outward entry {} is already pending",
                    entry.outward_number
                )))
            }
            other => {
                return Err(ServiceError::InvalidStateTransition(format!(
                    "outward entry {} cannot be submitted from {}",
                    entry.outward_number, other
                )))
            }
        }

        let result = outward_entry::Entity::update_many()
            .set(outward_entry::ActiveModel {
                status: Set(OutwardStatus::Pending),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(outward_entry::Column::Id.eq(outward_id))
            .filter(outward_entry::Column::Status.eq(OutwardStatus::Draft))
            .exec(db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(outward_id));
        }
        find_entry(db, outward_id).await
    }

    /// Replaces the item list of an entry that has not been issued yet.
    #[instrument(skip(self, items, actor), fields(actor_id = %actor.id))]
    pub async fn replace_items(
        &self,
        outward_id: Uuid,
        items: Vec<NewOutwardItem>,
        actor: &Actor,
    ) -> Result<OutwardView, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "an outward entry needs at least one item".to_string(),
            ));
        }
        ensure_permitted(self.authorizer.as_ref(), actor, permissions::OUTWARD_CREATE).await?;

        let txn = self.db.begin().await?;
        let entry = find_entry(&txn, outward_id).await?;
        if !entry.status.is_open() {
            return Err(ServiceError::InvalidStateTransition(format!(
                "outward entry {} is {} and can no longer be edited",
                entry.outward_number, entry.status
            )));
        }
        outward_item::Entity::delete_many()
            .filter(outward_item::Column::OutwardEntryId.eq(outward_id))
            .exec(&txn)
            .await?;
        let items = insert_items(&txn, outward_id, items).await?;
        txn.commit().await?;

        Ok(OutwardView { entry, items })
    }

    /// Approves the entry and debits every item from its batch. Either all
    /// items are issued or none are.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn approve(&self, outward_id: Uuid, actor: &Actor) -> Result<OutwardView, ServiceError> {
        ensure_permitted(self.authorizer.as_ref(), actor, permissions::OUTWARD_APPROVE).await?;

        let txn = self.db.begin().await?;
        let entry = find_entry(&txn, outward_id).await?;
        if entry.status == OutwardStatus::Issued {
            return Err(ServiceError::AlreadyProcessed(format!(
                "outward entry {} is already issued",
                entry.outward_number
            )));
        }
        if !entry.status.is_open() {
            return Err(ServiceError::InvalidStateTransition(format!(
                "outward entry {} cannot be issued from {}",
                entry.outward_number, entry.status
            )));
        }

        let now = Utc::now();
        let flipped = outward_entry::Entity::update_many()
            .set(outward_entry::ActiveModel {
                status: Set(OutwardStatus::Issued),
                issued_by: Set(Some(actor.id)),
                issued_at: Set(Some(now)),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(outward_entry::Column::Id.eq(outward_id))
            .filter(outward_entry::Column::Status.is_in(OutwardStatus::OPEN))
            .exec(&txn)
            .await?;
        if flipped.rows_affected == 0 {
            info!(%outward_id, "Outward issue lost to a concurrent decision");
            return Err(ServiceError::AlreadyProcessed(format!(
                "outward entry {} was issued concurrently",
                entry.outward_number
            )));
        }

        let source = StockSource {
            reference_type: ReferenceType::Outward,
            reference_id: entry.id,
            reference_number: entry.outward_number.clone(),
            performed_by: actor.id,
            notes: entry.notes.clone(),
        };
        let mut postings = Vec::new();
        for item in entry_items(&txn, outward_id).await? {
            let product = find_product(&txn, item.product_id).await?;
            let quantity = product
                .to_primary_units(item.quantity, &item.unit)
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "{}: unit {} is not a unit of this product",
                        product.name, item.unit
                    ))
                })?;
            let posting =
                StockLedger::debit_in_txn(&txn, item.product_id, item.batch_id, quantity, &source)
                    .await?;
            postings.push(posting);
        }
        txn.commit().await?;

        counter!("agrisupply.outward.issued", 1);
        info!(%outward_id, outward_number = %entry.outward_number, items = postings.len(), "Outward entry issued");
        self.ledger.publish(&postings).await;
        self.notify(Event::OutwardIssued(outward_id)).await;

        self.get(outward_id).await
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn cancel(
        &self,
        outward_id: Uuid,
        actor: &Actor,
    ) -> Result<outward_entry::Model, ServiceError> {
        ensure_permitted(self.authorizer.as_ref(), actor, permissions::OUTWARD_CREATE).await?;

        let db = &*self.db;
        let result = outward_entry::Entity::update_many()
            .set(outward_entry::ActiveModel {
                status: Set(OutwardStatus::Cancelled),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(outward_entry::Column::Id.eq(outward_id))
            .filter(outward_entry::Column::Status.is_in(OutwardStatus::OPEN))
            .exec(db)
            .await?;

        let entry = find_entry(db, outward_id).await?;
        if result.rows_affected == 0 {
            return Err(if entry.status == OutwardStatus::Cancelled {
                ServiceError::AlreadyProcessed(format!(
                    "outward entry {} is already cancelled",
                    entry.outward_number
                ))
            } else {
                ServiceError::InvalidStateTransition(format!(
                    "outward entry {} cannot be cancelled from {}",
                    entry.outward_number, entry.status
                ))
            });
        }

        self.notify(Event::OutwardCancelled(outward_id)).await;
        Ok(entry)
    }

    pub async fn get(&self, outward_id: Uuid) -> Result<OutwardView, ServiceError> {
        let db = &*self.db;
        let entry = find_entry(db, outward_id).await?;
        let items = entry_items(db, outward_id).await?;
        Ok(OutwardView { entry, items })
    }

    async fn notify(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

/// Checks every item against the catalog and its batch, then inserts them.
async fn insert_items<C: ConnectionTrait>(
    conn: &C,
    outward_id: Uuid,
    items: Vec<NewOutwardItem>,
) -> Result<Vec<outward_item::Model>, ServiceError> {
    let now = Utc::now();
    let mut saved = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        item.validate()
            .map_err(|e| ServiceError::ValidationError(format!("item {}: {}", index + 1, e)))?;
        let product = find_product(conn, item.product_id).await?;
        let batch = stock_batch::Entity::find_by_id(item.batch_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("unknown batch {}", item.batch_id))
            })?;
        if batch.product_id != product.id {
            return Err(ServiceError::ValidationError(format!(
                "batch {} does not hold {}",
                batch.batch_number, product.name
            )));
        }
        let unit = item
            .unit
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(&product.primary_unit)
            .to_string();
        if product.to_primary_units(Decimal::ONE, &unit).is_none() {
            return Err(ServiceError::ValidationError(format!(
                "{} is not a unit of {}",
                unit, product.name
            )));
        }

        let row = outward_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            outward_entry_id: Set(outward_id),
            product_id: Set(product.id),
            batch_id: Set(batch.id),
            quantity: Set(item.quantity),
            unit: Set(unit),
            created_at: Set(now),
        }
        .insert(conn)
        .await?;
        saved.push(row);
    }
    Ok(saved)
}

async fn find_entry<C: ConnectionTrait>(
    conn: &C,
    outward_id: Uuid,
) -> Result<outward_entry::Model, ServiceError> {
    outward_entry::Entity::find_by_id(outward_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Outward entry {} not found", outward_id)))
}

async fn entry_items<C: ConnectionTrait>(
    conn: &C,
    outward_id: Uuid,
) -> Result<Vec<outward_item::Model>, ServiceError> {
    Ok(outward_item::Entity::find()
        .filter(outward_item::Column::OutwardEntryId.eq(outward_id))
        .order_by_asc(outward_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

async fn find_product<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<product::Model, ServiceError> {
    product::Entity::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::ValidationError(format!("unknown product {}", product_id)))
}
