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
        return_request::{self, ReturnStatus, ReturnType},
        stock_batch,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewReturnRequest {
    pub product_id: Uuid,
    pub batch_id: Uuid,
    /// In the product's primary unit
    #[validate(custom = "validate_positive_decimal")]
    pub quantity: Decimal,
    pub return_type: ReturnType,
    #[validate(length(max = 2000))]
    pub reason: Option<String>,
}

/// Requests to put goods back into the batch they were issued from.
#[derive(Clone)]
pub struct ReturnService {
    db: Arc<DatabaseConnection>,
    authorizer: Arc<dyn ApprovalAuthorizer>,
    ledger: StockLedger,
    event_sender: Option<EventSender>,
}

impl ReturnService {
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
    pub async fn create(
        &self,
        request: NewReturnRequest,
        actor: &Actor,
    ) -> Result<return_request::Model, ServiceError> {
        request.validate()?;
        ensure_permitted(self.authorizer.as_ref(), actor, permissions::RETURNS_CREATE).await?;

        let db = &*self.db;
        let batch = stock_batch::Entity::find_by_id(request.batch_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("unknown batch {}", request.batch_id))
            })?;
        if batch.product_id != request.product_id {
            return Err(ServiceError::ValidationError(format!(
                "batch {} does not hold product {}",
                batch.batch_number, request.product_id
            )));
        }

        let now = Utc::now();
        let created = return_request::ActiveModel {
            id: Set(Uuid::new_v4()),
            return_number: Set(document_number("RET")),
            status: Set(ReturnStatus::Pending),
            product_id: Set(request.product_id),
            batch_id: Set(batch.id),
            quantity: Set(request.quantity),
            return_type: Set(request.return_type),
            reason: Set(request.reason),
            rejection_reason: Set(None),
            created_by: Set(actor.id),
            decided_by: Set(None),
            decided_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;

        info!(return_id = %created.id, return_number = %created.return_number, "Return request created");
        self.notify(Event::ReturnCreated(created.id)).await;
        Ok(created)
    }

    /// Approves the request and restores the quantity to its batch.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn approve(
        &self,
        return_id: Uuid,
        actor: &Actor,
    ) -> Result<return_request::Model, ServiceError> {
        ensure_permitted(self.authorizer.as_ref(), actor, permissions::RETURNS_APPROVE).await?;

        let txn = self.db.begin().await?;
        let request = find_request(&txn, return_id).await?;
        Self::decide_in_txn(
            &txn,
            &request,
            ReturnStatus::Approved,
            return_request::ActiveModel {
                decided_by: Set(Some(actor.id)),
                ..Default::default()
            },
        )
        .await?;

        let posting = StockLedger::restore_in_txn(
            &txn,
            request.batch_id,
            request.quantity,
            &StockSource {
                reference_type: ReferenceType::ReturnRequest,
                reference_id: request.id,
                reference_number: request.return_number.clone(),
                performed_by: actor.id,
                notes: request.reason.clone(),
            },
        )
        .await?;
        txn.commit().await?;

        counter!("agrisupply.returns.approved", 1);
        info!(%return_id, quantity = %request.quantity, "Return request approved");
        self.ledger.publish(std::slice::from_ref(&posting)).await;
        self.notify(Event::ReturnApproved(return_id)).await;

        find_request(&*self.db, return_id).await
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn reject(
        &self,
        return_id: Uuid,
        actor: &Actor,
        reason: String,
    ) -> Result<return_request::Model, ServiceError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError(
                "a rejection reason is required".to_string(),
            ));
        }
        ensure_permitted(self.authorizer.as_ref(), actor, permissions::RETURNS_REJECT).await?;

        let db = &*self.db;
        let request = find_request(db, return_id).await?;
        Self::decide_in_txn(
            db,
            &request,
            ReturnStatus::Rejected,
            return_request::ActiveModel {
                decided_by: Set(Some(actor.id)),
                rejection_reason: Set(Some(reason)),
                ..Default::default()
            },
        )
        .await?;

        info!(%return_id, "Return request rejected");
        self.notify(Event::ReturnRejected(return_id)).await;
        find_request(db, return_id).await
    }

    /// Withdraws a pending request.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn cancel(
        &self,
        return_id: Uuid,
        actor: &Actor,
    ) -> Result<return_request::Model, ServiceError> {
        ensure_permitted(self.authorizer.as_ref(), actor, permissions::RETURNS_CREATE).await?;

        let db = &*self.db;
        let request = find_request(db, return_id).await?;
        Self::decide_in_txn(
            db,
            &request,
            ReturnStatus::Cancelled,
            <return_request::ActiveModel as Default>::default(),
        )
        .await?;

        self.notify(Event::ReturnCancelled(return_id)).await;
        find_request(db, return_id).await
    }

    pub async fn get(&self, return_id: Uuid) -> Result<return_request::Model, ServiceError> {
        find_request(&*self.db, return_id).await
    }

    pub async fn list(
        &self,
        status: Option<ReturnStatus>,
    ) -> Result<Vec<return_request::Model>, ServiceError> {
        let mut query = return_request::Entity::find();
        if let Some(status) = status {
            query = query.filter(return_request::Column::Status.eq(status));
        }
        Ok(query
            .order_by_desc(return_request::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Moves a pending request to `to`. Only `pending` requests can be decided.
    async fn decide_in_txn<C: ConnectionTrait>(
        conn: &C,
        request: &return_request::Model,
        to: ReturnStatus,
        mut changes: return_request::ActiveModel,
    ) -> Result<(), ServiceError> {
        if request.status == to {
            return Err(ServiceError::AlreadyProcessed(format!(
                "return {} is already {}",
                request.return_number, to
            )));
        }
        if request.status != ReturnStatus::Pending {
            return Err(ServiceError::InvalidStateTransition(format!(
                "return {} is {} and cannot become {}",
                request.return_number, request.status, to
            )));
        }

        let now = Utc::now();
        changes.status = Set(to);
        changes.updated_at = Set(now);
        if to != ReturnStatus::Cancelled {
            changes.decided_at = Set(Some(now));
        }
        let result = return_request::Entity::update_many()
            .set(changes)
            .filter(return_request::Column::Id.eq(request.id))
            .filter(return_request::Column::Status.eq(ReturnStatus::Pending))
            .exec(conn)
            .await?;
        if result.rows_affected == 0 {
            info!(return_id = %request.id, "Return decision lost to a concurrent decision");
            return Err(ServiceError::AlreadyProcessed(format!(
                "return {} was decided concurrently",
                request.return_number
            )));
        }
        Ok(())
    }

    async fn notify(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

async fn find_request<C: ConnectionTrait>(
    conn: &C,
    return_id: Uuid,
) -> Result<return_request::Model, ServiceError> {
    return_request::Entity::find_by_id(return_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Return request {} not found", return_id)))
}
