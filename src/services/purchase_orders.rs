use chrono::{NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::{
    checked_sum, document_number, ensure_storable,
    grn::{draft_from_purchase_order, product_names, GrnService, GrnView},
    line_amount, validate_non_negative_decimal, validate_positive_decimal,
};
use crate::{
    auth::{ensure_permitted, permissions, Actor, ApprovalAuthorizer},
    entities::{
        product,
        purchase_order::{self, PurchaseOrderStatus},
        purchase_order_line, supplier,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

const AUTO_GRN_REMARKS: &str = "Generated on purchase order approval";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPurchaseOrder {
    pub supplier_id: Option<Uuid>,
    pub expected_delivery_date: Option<NaiveDate>,
    #[serde(default)]
    pub auto_grn: bool,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    /// Create directly in `pending` instead of `draft`
    #[serde(default)]
    pub submit_for_approval: bool,
    #[validate(length(min = 1, message = "a purchase order needs at least one line"))]
    pub lines: Vec<NewPurchaseOrderLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPurchaseOrderLine {
    pub product_id: Option<Uuid>,
    /// Defaults to the product's primary unit
    #[serde(default)]
    pub unit: Option<String>,
    #[validate(custom = "validate_positive_decimal")]
    pub quantity: Decimal,
    #[validate(custom = "validate_non_negative_decimal")]
    pub rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderView {
    #[serde(flatten)]
    pub order: purchase_order::Model,
    pub lines: Vec<purchase_order_line::Model>,
}

/// Result of an approval; `grn` is set when the order auto-generated one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrderApproval {
    pub purchase_order: PurchaseOrderView,
    pub grn: Option<GrnView>,
}

/// Receipt stage implied by the line quantities. Orders outside the receipt
/// stages keep their status.
pub fn derive_receipt_status(
    current: PurchaseOrderStatus,
    lines: &[purchase_order_line::Model],
) -> PurchaseOrderStatus {
    if !matches!(
        current,
        PurchaseOrderStatus::Approved
            | PurchaseOrderStatus::PartialReceived
            | PurchaseOrderStatus::Received
    ) {
        return current;
    }

    if !lines.is_empty() && lines.iter().all(|line| line.is_fully_received()) {
        PurchaseOrderStatus::Received
    } else if lines.iter().any(|line| line.received_quantity > Decimal::ZERO) {
        PurchaseOrderStatus::PartialReceived
    } else {
        current
    }
}

/// Re-derives the receipt status of `po` from its lines and writes it back.
/// The write is conditional on the version of `po`, so a concurrent receipt
/// against the same order fails with `ConcurrentModification`.
pub async fn apply_receipt_status<C: ConnectionTrait>(
    conn: &C,
    po: &purchase_order::Model,
) -> Result<PurchaseOrderStatus, ServiceError> {
    let lines = order_lines(conn, po.id).await?;
    let status = derive_receipt_status(po.status, &lines);

    let result = purchase_order::Entity::update_many()
        .set(purchase_order::ActiveModel {
            status: Set(status),
            version: Set(po.version + 1),
            updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .filter(purchase_order::Column::Id.eq(po.id))
        .filter(purchase_order::Column::Version.eq(po.version))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        warn!(po_id = %po.id, "Purchase order changed while recording a receipt");
        return Err(ServiceError::ConcurrentModification(po.id));
    }
    Ok(status)
}

pub async fn recompute_receipt_status<C: ConnectionTrait>(
    conn: &C,
    po_id: Uuid,
) -> Result<PurchaseOrderStatus, ServiceError> {
    let po = find_order(conn, po_id).await?;
    apply_receipt_status(conn, &po).await
}

#[derive(Clone)]
pub struct PurchaseOrderService {
    db: Arc<DatabaseConnection>,
    authorizer: Arc<dyn ApprovalAuthorizer>,
    grn_service: Arc<GrnService>,
    event_sender: Option<EventSender>,
}

impl PurchaseOrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        authorizer: Arc<dyn ApprovalAuthorizer>,
        grn_service: Arc<GrnService>,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            authorizer,
            grn_service,
            event_sender,
        }
    }

    /// Creates a purchase order with its lines. Totals are computed here.
    #[instrument(skip(self, input, actor), fields(actor_id = %actor.id))]
    pub async fn create(
        &self,
        input: NewPurchaseOrder,
        actor: &Actor,
    ) -> Result<PurchaseOrderView, ServiceError> {
        input.validate()?;
        let db = &*self.db;

        let supplier_id = input
            .supplier_id
            .ok_or_else(|| ServiceError::ValidationError("a supplier is required".to_string()))?;
        let supplier = supplier::Entity::find_by_id(supplier_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::ValidationError(format!("unknown supplier {}", supplier_id)))?;
        if !supplier.is_active {
            return Err(ServiceError::ValidationError(format!(
                "supplier {} is inactive",
                supplier.name
            )));
        }
        let expected_delivery_date = input.expected_delivery_date.ok_or_else(|| {
            ServiceError::ValidationError("an expected delivery date is required".to_string())
        })?;

        let mut resolved = Vec::with_capacity(input.lines.len());
        let mut total = Decimal::ZERO;
        for (index, line) in input.lines.iter().enumerate() {
            let number = index + 1;
            line.validate()
                .map_err(|e| ServiceError::ValidationError(format!("line {}: {}", number, e)))?;
            let product_id = line.product_id.ok_or_else(|| {
                ServiceError::ValidationError(format!("line {}: a product is required", number))
            })?;
            let product = product::Entity::find_by_id(product_id)
                .one(db)
                .await?
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "line {}: unknown product {}",
                        number, product_id
                    ))
                })?;
            if !product.is_active {
                return Err(ServiceError::ValidationError(format!(
                    "line {}: product {} is inactive",
                    number, product.name
                )));
            }
            let unit = line
                .unit
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .unwrap_or(&product.primary_unit)
                .to_string();
            if product.to_primary_units(Decimal::ONE, &unit).is_none() {
                return Err(ServiceError::ValidationError(format!(
                    "line {}: {} is not a unit of {}",
                    number, unit, product.name
                )));
            }
            let label = format!("line {} ({})", number, product.name);
            let amount = line_amount(&label, line.quantity, line.rate)?;
            total = checked_sum(&label, "order total", total, amount)?;
            resolved.push((product.id, unit, line.quantity, line.rate));
        }
        ensure_storable("purchase order", "order total", total)?;
        let status = if input.submit_for_approval {
            PurchaseOrderStatus::Pending
        } else {
            PurchaseOrderStatus::Draft
        };

        let now = Utc::now();
        let txn = self.db.begin().await?;
        let order = purchase_order::ActiveModel {
            id: Set(Uuid::new_v4()),
            po_number: Set(document_number("PO")),
            supplier_id: Set(supplier.id),
            status: Set(status),
            expected_delivery_date: Set(expected_delivery_date),
            auto_grn: Set(input.auto_grn),
            notes: Set(input.notes),
            total_amount: Set(total),
            created_by: Set(actor.id),
            approved_by: Set(None),
            approved_at: Set(None),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut lines = Vec::with_capacity(resolved.len());
        for (index, (product_id, unit, quantity, rate)) in resolved.into_iter().enumerate() {
            let line = purchase_order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                purchase_order_id: Set(order.id),
                line_number: Set(index as i32 + 1),
                product_id: Set(product_id),
                unit: Set(unit),
                ordered_quantity: Set(quantity),
                rate: Set(rate),
                received_quantity: Set(Decimal::ZERO),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
            lines.push(line);
        }
        txn.commit().await?;

        counter!("agrisupply.purchase_orders.created", 1);
        info!(po_id = %order.id, po_number = %order.po_number, %total, "Purchase order created");
        self.notify(Event::PurchaseOrderCreated(order.id)).await;

        Ok(PurchaseOrderView { order, lines })
    }

    /// Sends a draft order for approval.
    #[instrument(skip(self))]
    pub async fn submit(&self, po_id: Uuid) -> Result<purchase_order::Model, ServiceError> {
        self.transition(
            po_id,
            &[PurchaseOrderStatus::Draft],
            PurchaseOrderStatus::Pending,
        )
        .await
    }

    /// Approves the order. With `auto_grn` a receipt accepting every line in
    /// full is created and approved in the same transaction; if that fails the
    /// order stays unapproved.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn approve(
        &self,
        po_id: Uuid,
        actor: &Actor,
    ) -> Result<PurchaseOrderApproval, ServiceError> {
        ensure_permitted(
            self.authorizer.as_ref(),
            actor,
            permissions::PURCHASE_ORDERS_APPROVE,
        )
        .await?;

        let txn = self.db.begin().await?;
        let po = find_order(&txn, po_id).await?;
        match po.status {
            PurchaseOrderStatus::Draft | PurchaseOrderStatus::Pending => {}
            PurchaseOrderStatus::Cancelled => {
                return Err(ServiceError::InvalidStateTransition(format!(
                    "purchase order {} is cancelled",
                    po.po_number
                )))
            }
            _ => {
                info!(%po_id, status = %po.status, "Purchase order already approved");
                return Err(ServiceError::AlreadyProcessed(format!(
                    "purchase order {} is already {}",
                    po.po_number, po.status
                )));
            }
        }

        let now = Utc::now();
        let result = purchase_order::Entity::update_many()
            .set(purchase_order::ActiveModel {
                status: Set(PurchaseOrderStatus::Approved),
                approved_by: Set(Some(actor.id)),
                approved_at: Set(Some(now)),
                version: Set(po.version + 1),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(purchase_order::Column::Id.eq(po_id))
            .filter(purchase_order::Column::Version.eq(po.version))
            .filter(
                purchase_order::Column::Status
                    .is_in([PurchaseOrderStatus::Draft, PurchaseOrderStatus::Pending]),
            )
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            info!(%po_id, "Purchase order approval lost to a concurrent decision");
            return Err(ServiceError::AlreadyProcessed(format!(
                "purchase order {} was approved concurrently",
                po.po_number
            )));
        }

        let approved = purchase_order::Model {
            status: PurchaseOrderStatus::Approved,
            approved_by: Some(actor.id),
            approved_at: Some(now),
            version: po.version + 1,
            updated_at: now,
            ..po
        };

        let auto_grn = if approved.auto_grn {
            let lines = order_lines(&txn, po_id).await?;
            let names = product_names(&txn, &lines).await?;
            let mut draft = draft_from_purchase_order(&approved, &lines, &names, now.date_naive());
            draft.remarks = Some(AUTO_GRN_REMARKS.to_string());
            let view = GrnService::persist_in_txn(&txn, draft, actor.id).await?;
            let outcome = GrnService::approve_in_txn(&txn, view.grn.id, actor.id, None).await?;
            Some((view.items, outcome))
        } else {
            None
        };

        txn.commit().await?;

        counter!("agrisupply.purchase_orders.approved", 1);
        info!(%po_id, po_number = %approved.po_number, auto_grn = approved.auto_grn, "Purchase order approved");

        let grn = match auto_grn {
            Some((items, outcome)) => {
                self.grn_service.announce_approval(&outcome).await;
                Some(GrnView {
                    grn: outcome.grn,
                    items,
                })
            }
            None => None,
        };
        self.notify(Event::PurchaseOrderApproved {
            purchase_order_id: po_id,
            auto_grn_id: grn.as_ref().map(|view| view.grn.id),
        })
        .await;

        Ok(PurchaseOrderApproval {
            purchase_order: self.get(po_id).await?,
            grn,
        })
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn cancel(
        &self,
        po_id: Uuid,
        actor: &Actor,
    ) -> Result<purchase_order::Model, ServiceError> {
        ensure_permitted(
            self.authorizer.as_ref(),
            actor,
            permissions::PURCHASE_ORDERS_CANCEL,
        )
        .await?;
        let order = self
            .transition(
                po_id,
                &[PurchaseOrderStatus::Draft, PurchaseOrderStatus::Pending],
                PurchaseOrderStatus::Cancelled,
            )
            .await?;
        self.notify(Event::PurchaseOrderCancelled(po_id)).await;
        Ok(order)
    }

    /// Re-derives the receipt status from the lines in its own transaction.
    pub async fn recompute_receipt_status(
        &self,
        po_id: Uuid,
    ) -> Result<PurchaseOrderStatus, ServiceError> {
        let txn = self.db.begin().await?;
        let status = recompute_receipt_status(&txn, po_id).await?;
        txn.commit().await?;
        Ok(status)
    }

    pub async fn get(&self, po_id: Uuid) -> Result<PurchaseOrderView, ServiceError> {
        let db = &*self.db;
        let order = find_order(db, po_id).await?;
        let lines = order_lines(db, po_id).await?;
        Ok(PurchaseOrderView { order, lines })
    }

    pub async fn list(
        &self,
        status: Option<PurchaseOrderStatus>,
    ) -> Result<Vec<purchase_order::Model>, ServiceError> {
        let mut query = purchase_order::Entity::find();
        if let Some(status) = status {
            query = query.filter(purchase_order::Column::Status.eq(status));
        }
        Ok(query
            .order_by_desc(purchase_order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    async fn transition(
        &self,
        po_id: Uuid,
        from: &[PurchaseOrderStatus],
        to: PurchaseOrderStatus,
    ) -> Result<purchase_order::Model, ServiceError> {
        let db = &*self.db;
        let po = find_order(db, po_id).await?;
        if po.status == to {
            return Err(ServiceError::AlreadyProcessed(format!(
                "purchase order {} is already {}",
                po.po_number, to
            )));
        }
        if !from.contains(&po.status) {
            return Err(ServiceError::InvalidStateTransition(format!(
                "purchase order {} cannot move from {} to {}",
                po.po_number, po.status, to
            )));
        }

        let result = purchase_order::Entity::update_many()
            .set(purchase_order::ActiveModel {
                status: Set(to),
                version: Set(po.version + 1),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(purchase_order::Column::Id.eq(po_id))
            .filter(purchase_order::Column::Version.eq(po.version))
            .exec(db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(po_id));
        }

        info!(%po_id, from = %po.status, %to, "Purchase order status changed");
        find_order(db, po_id).await
    }

    async fn notify(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

async fn find_order<C: ConnectionTrait>(
    conn: &C,
    po_id: Uuid,
) -> Result<purchase_order::Model, ServiceError> {
    purchase_order::Entity::find_by_id(po_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", po_id)))
}

async fn order_lines<C: ConnectionTrait>(
    conn: &C,
    po_id: Uuid,
) -> Result<Vec<purchase_order_line::Model>, ServiceError> {
    Ok(purchase_order_line::Entity::find()
        .filter(purchase_order_line::Column::PurchaseOrderId.eq(po_id))
        .order_by_asc(purchase_order_line::Column::LineNumber)
        .all(conn)
        .await?)
}
