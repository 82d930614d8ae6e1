use chrono::{NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{error, info, instrument};
use uuid::Uuid;

use super::{
    batch_number::ensure_batch_number,
    checked_sum, document_number, ensure_storable, line_amount,
    purchase_orders::apply_receipt_status,
    stock_ledger::{LedgerPosting, StockCredit, StockLedger, StockSource},
};
use crate::{
    auth::{ensure_permitted, permissions, Actor, ApprovalAuthorizer},
    entities::{
        grn::{self, GrnStatus},
        grn_item::{self, GrnItemDetail},
        inventory_transaction::{ReferenceType, TransactionType},
        product,
        purchase_order::{self, PurchaseOrderStatus},
        purchase_order_line, supplier,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Unsaved goods receipt, edited item by item before submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrnDraft {
    pub purchase_order_id: Option<Uuid>,
    pub supplier_id: Uuid,
    pub received_date: NaiveDate,
    pub remarks: Option<String>,
    pub items: Vec<GrnItemDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrnItemDraft {
    pub product_id: Uuid,
    #[serde(default)]
    pub product_name: String,
    pub po_line_id: Option<Uuid>,
    #[serde(default)]
    pub batch_number: String,
    pub expiry_date: Option<NaiveDate>,
    pub unit: String,
    pub ordered_quantity: Decimal,
    pub accepted_quantity: Decimal,
    #[serde(default)]
    pub rejected_quantity: Decimal,
    #[serde(default)]
    pub damage_quantity: Decimal,
    pub rate: Decimal,
    #[serde(default)]
    pub amount: Decimal,
    #[serde(default)]
    pub detail: GrnItemDetail,
}

/// A single field edit on a draft item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum ItemUpdate {
    AcceptedQuantity(Decimal),
    RejectedQuantity(Decimal),
    DamageQuantity(Decimal),
    Rate(Decimal),
    BatchNumber(String),
    ExpiryDate(Option<NaiveDate>),
    Detail(GrnItemDetail),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Persist in `draft` and wait for an explicit approval
    #[default]
    Draft,
    /// Persist and approve in the same transaction
    Approve,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrnView {
    #[serde(flatten)]
    pub grn: grn::Model,
    pub items: Vec<grn_item::Model>,
}

/// Everything an approval changed, for post-commit notification.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub grn: grn::Model,
    pub postings: Vec<LedgerPosting>,
    pub purchase_order_status: Option<PurchaseOrderStatus>,
}

/// Projects the not-yet-received part of every order line into a draft
/// receipt that accepts everything. Persists nothing.
pub fn draft_from_purchase_order(
    po: &purchase_order::Model,
    lines: &[purchase_order_line::Model],
    product_names: &HashMap<Uuid, String>,
    received_date: NaiveDate,
) -> GrnDraft {
    let mut ordered: Vec<&purchase_order_line::Model> = lines.iter().collect();
    ordered.sort_by_key(|line| line.line_number);

    let items = ordered
        .into_iter()
        .filter(|line| line.ordered_quantity > line.received_quantity)
        .map(|line| {
            let remaining = line.remaining_quantity();
            let product_name = product_names
                .get(&line.product_id)
                .cloned()
                .unwrap_or_default();
            GrnItemDraft {
                product_id: line.product_id,
                batch_number: ensure_batch_number("", &product_name, received_date),
                product_name,
                po_line_id: Some(line.id),
                expiry_date: None,
                unit: line.unit.clone(),
                ordered_quantity: remaining,
                accepted_quantity: remaining,
                rejected_quantity: Decimal::ZERO,
                damage_quantity: Decimal::ZERO,
                rate: line.rate,
                amount: remaining * line.rate,
                detail: GrnItemDetail::Standard,
            }
        })
        .collect();

    GrnDraft {
        purchase_order_id: Some(po.id),
        supplier_id: po.supplier_id,
        received_date,
        remarks: None,
        items,
    }
}

/// Applies one edit and re-derives the dependent fields of the item.
pub fn update_item(
    draft: &mut GrnDraft,
    index: usize,
    update: ItemUpdate,
) -> Result<(), ServiceError> {
    let received_date = draft.received_date;
    let count = draft.items.len();
    let item = draft.items.get_mut(index).ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "item index {} out of range (draft has {} items)",
            index, count
        ))
    })?;

    let label = item_label(item);
    let mut next = item.clone();
    match update {
        ItemUpdate::RejectedQuantity(quantity) => {
            next.rejected_quantity = ensure_storable(&label, "rejected quantity", quantity)?;
            next.accepted_quantity = reconciled_acceptance(&next, &label)?;
        }
        ItemUpdate::DamageQuantity(quantity) => {
            next.damage_quantity = ensure_storable(&label, "damage quantity", quantity)?;
            next.accepted_quantity = reconciled_acceptance(&next, &label)?;
        }
        ItemUpdate::AcceptedQuantity(quantity) => {
            next.accepted_quantity = ensure_storable(&label, "accepted quantity", quantity)?
        }
        ItemUpdate::Rate(rate) => next.rate = ensure_storable(&label, "rate", rate)?,
        ItemUpdate::BatchNumber(batch) => {
            next.batch_number = ensure_batch_number(&batch, &next.product_name, received_date)
        }
        ItemUpdate::ExpiryDate(date) => next.expiry_date = date,
        ItemUpdate::Detail(detail) => next.detail = detail,
    }
    next.amount = line_amount(&label, next.accepted_quantity, next.rate)?;
    *item = next;
    Ok(())
}

fn item_label(item: &GrnItemDraft) -> String {
    if item.product_name.is_empty() {
        item.product_id.to_string()
    } else {
        item.product_name.clone()
    }
}

fn reconciled_acceptance(item: &GrnItemDraft, label: &str) -> Result<Decimal, ServiceError> {
    let accepted = item
        .ordered_quantity
        .checked_sub(item.rejected_quantity)
        .and_then(|rest| rest.checked_sub(item.damage_quantity))
        .ok_or_else(|| {
            ServiceError::ValidationError(format!("{}: accepted quantity is out of range", label))
        })?;
    Ok(accepted.max(Decimal::ZERO))
}

/// Checks the per-item reconciliation rule:
/// accepted, rejected and damage are non-negative and together do not exceed ordered.
pub fn validate_item(item: &GrnItemDraft) -> Result<(), ServiceError> {
    let label = item_label(item);
    let fail = |reason: String| Err(ServiceError::ValidationError(format!("{}: {}", label, reason)));

    for (field, value) in [
        ("ordered quantity", item.ordered_quantity),
        ("accepted quantity", item.accepted_quantity),
        ("rejected quantity", item.rejected_quantity),
        ("damage quantity", item.damage_quantity),
        ("rate", item.rate),
    ] {
        if value < Decimal::ZERO {
            return fail(format!("{} must not be negative, got {}", field, value));
        }
        ensure_storable(&label, field, value)?;
    }
    line_amount(&label, item.accepted_quantity, item.rate)?;

    // Every term is within MAX_DECIMAL here
    let accounted = item.accepted_quantity + item.rejected_quantity + item.damage_quantity;
    if accounted > item.ordered_quantity {
        return fail(format!(
            "accepted + rejected + damage ({}) exceeds ordered quantity {}",
            accounted, item.ordered_quantity
        ));
    }

    if let GrnItemDetail::ReadyPlants {
        ready_from,
        ready_to,
    } = item.detail
    {
        if ready_from > ready_to {
            return fail(format!(
                "ready window starts {} after it ends {}",
                ready_from, ready_to
            ));
        }
    }
    Ok(())
}

/// Goods receipt manager. Approval is the only path by which received goods
/// reach the stock ledger.
#[derive(Clone)]
pub struct GrnService {
    db: Arc<DatabaseConnection>,
    authorizer: Arc<dyn ApprovalAuthorizer>,
    ledger: StockLedger,
    event_sender: Option<EventSender>,
}

impl GrnService {
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

    /// Loads an order and projects its outstanding lines into a draft.
    #[instrument(skip(self))]
    pub async fn draft_for_purchase_order(&self, po_id: Uuid) -> Result<GrnDraft, ServiceError> {
        let db = &*self.db;
        let po = purchase_order::Entity::find_by_id(po_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", po_id)))?;
        if !po.status.accepts_receipts() {
            return Err(ServiceError::InvalidStateTransition(format!(
                "purchase order {} is {} and cannot receive goods",
                po.po_number, po.status
            )));
        }

        let lines = purchase_order_line::Entity::find()
            .filter(purchase_order_line::Column::PurchaseOrderId.eq(po_id))
            .all(db)
            .await?;
        let names = product_names(db, &lines).await?;

        Ok(draft_from_purchase_order(
            &po,
            &lines,
            &names,
            Utc::now().date_naive(),
        ))
    }

    /// Validates and persists a draft; with [`SubmitMode::Approve`] the
    /// receipt is approved in the same transaction.
    #[instrument(skip(self, draft, actor), fields(actor_id = %actor.id, items = draft.items.len()))]
    pub async fn submit(
        &self,
        draft: GrnDraft,
        actor: &Actor,
        mode: SubmitMode,
    ) -> Result<GrnView, ServiceError> {
        if mode == SubmitMode::Approve {
            ensure_permitted(self.authorizer.as_ref(), actor, permissions::GRN_APPROVE).await?;
        }

        let txn = self.db.begin().await?;
        let view = Self::persist_in_txn(&txn, draft, actor.id).await?;
        let outcome = match mode {
            SubmitMode::Draft => None,
            SubmitMode::Approve => {
                Some(Self::approve_in_txn(&txn, view.grn.id, actor.id, None).await?)
            }
        };
        txn.commit().await.map_err(|e| {
            error!("Failed to commit GRN {}: {}", view.grn.grn_number, e);
            ServiceError::DatabaseError(e)
        })?;

        info!(grn_id = %view.grn.id, grn_number = %view.grn.grn_number, "GRN submitted");
        self.notify(Event::GrnSubmitted(view.grn.id)).await;

        match outcome {
            Some(outcome) => {
                let grn = outcome.grn.clone();
                self.announce_approval(&outcome).await;
                Ok(GrnView {
                    grn,
                    items: view.items,
                })
            }
            None => Ok(view),
        }
    }

    /// Approves a receipt and credits every accepted item to stock.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn approve(
        &self,
        grn_id: Uuid,
        actor: &Actor,
        remarks: Option<String>,
    ) -> Result<GrnView, ServiceError> {
        ensure_permitted(self.authorizer.as_ref(), actor, permissions::GRN_APPROVE).await?;

        let txn = self.db.begin().await?;
        let outcome = match Self::approve_in_txn(&txn, grn_id, actor.id, remarks).await {
            Ok(outcome) => outcome,
            Err(ServiceError::AlreadyProcessed(msg)) => {
                info!(%grn_id, "GRN approval skipped: {}", msg);
                return Err(ServiceError::AlreadyProcessed(msg));
            }
            Err(e) => return Err(e),
        };
        txn.commit().await?;

        self.announce_approval(&outcome).await;
        self.get(grn_id).await
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn hold_for_quality_check(
        &self,
        grn_id: Uuid,
        actor: &Actor,
    ) -> Result<grn::Model, ServiceError> {
        ensure_permitted(self.authorizer.as_ref(), actor, permissions::GRN_CREATE).await?;
        self.transition(
            grn_id,
            &[GrnStatus::Draft],
            GrnStatus::QualityCheck,
            <grn::ActiveModel as Default>::default(),
        )
        .await
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn reject(
        &self,
        grn_id: Uuid,
        actor: &Actor,
        reason: String,
    ) -> Result<grn::Model, ServiceError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError(
                "a rejection reason is required".to_string(),
            ));
        }
        ensure_permitted(self.authorizer.as_ref(), actor, permissions::GRN_REJECT).await?;

        self.transition(
            grn_id,
            &GrnStatus::DECIDABLE,
            GrnStatus::Rejected,
            grn::ActiveModel {
                rejection_reason: Set(Some(reason)),
                ..Default::default()
            },
        )
        .await
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn mark_partially_accepted(
        &self,
        grn_id: Uuid,
        actor: &Actor,
        remarks: Option<String>,
    ) -> Result<grn::Model, ServiceError> {
        ensure_permitted(self.authorizer.as_ref(), actor, permissions::GRN_APPROVE).await?;

        let mut changes = <grn::ActiveModel as Default>::default();
        if let Some(remarks) = remarks {
            changes.remarks = Set(Some(remarks));
        }
        self.transition(
            grn_id,
            &GrnStatus::DECIDABLE,
            GrnStatus::PartialAccepted,
            changes,
        )
        .await
    }

    pub async fn get(&self, grn_id: Uuid) -> Result<GrnView, ServiceError> {
        let db = &*self.db;
        let grn = grn::Entity::find_by_id(grn_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("GRN {} not found", grn_id)))?;
        let items = grn_items(db, grn_id).await?;
        Ok(GrnView { grn, items })
    }

    pub async fn list_for_purchase_order(
        &self,
        po_id: Uuid,
    ) -> Result<Vec<grn::Model>, ServiceError> {
        Ok(grn::Entity::find()
            .filter(grn::Column::PurchaseOrderId.eq(po_id))
            .order_by_asc(grn::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Validates a draft against the catalog and its order, then inserts the
    /// receipt in `draft`.
    pub(crate) async fn persist_in_txn<C: ConnectionTrait>(
        conn: &C,
        draft: GrnDraft,
        actor_id: Uuid,
    ) -> Result<GrnView, ServiceError> {
        if draft.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "a GRN needs at least one item".to_string(),
            ));
        }

        let supplier = supplier::Entity::find_by_id(draft.supplier_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("unknown supplier {}", draft.supplier_id))
            })?;
        if !supplier.is_active {
            return Err(ServiceError::ValidationError(format!(
                "supplier {} is inactive",
                supplier.name
            )));
        }

        let (po, lines) = match draft.purchase_order_id {
            Some(po_id) => {
                let po = purchase_order::Entity::find_by_id(po_id)
                    .one(conn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::ValidationError(format!("unknown purchase order {}", po_id))
                    })?;
                if !po.status.accepts_receipts() {
                    return Err(ServiceError::ValidationError(format!(
                        "purchase order {} is {} and cannot receive goods",
                        po.po_number, po.status
                    )));
                }
                if po.supplier_id != draft.supplier_id {
                    return Err(ServiceError::ValidationError(format!(
                        "purchase order {} belongs to a different supplier",
                        po.po_number
                    )));
                }
                let lines: HashMap<Uuid, purchase_order_line::Model> =
                    purchase_order_line::Entity::find()
                        .filter(purchase_order_line::Column::PurchaseOrderId.eq(po_id))
                        .all(conn)
                        .await?
                        .into_iter()
                        .map(|line| (line.id, line))
                        .collect();
                (Some(po), lines)
            }
            None => (None, HashMap::new()),
        };

        let mut claimed: HashMap<Uuid, Decimal> = HashMap::new();
        let mut items = Vec::with_capacity(draft.items.len());
        for mut item in draft.items {
            let product = product::Entity::find_by_id(item.product_id)
                .one(conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!("unknown product {}", item.product_id))
                })?;
            item.product_name = product.name.clone();
            validate_item(&item)?;

            if product.to_primary_units(Decimal::ONE, &item.unit).is_none() {
                return Err(ServiceError::ValidationError(format!(
                    "{}: unit {} is not a unit of this product",
                    product.name, item.unit
                )));
            }

            if let Some(line_id) = item.po_line_id {
                let po = po.as_ref().ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "{}: order line given without a purchase order",
                        product.name
                    ))
                })?;
                let line = lines.get(&line_id).ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "{}: line {} does not belong to purchase order {}",
                        product.name, line_id, po.po_number
                    ))
                })?;
                if line.product_id != item.product_id {
                    return Err(ServiceError::ValidationError(format!(
                        "{}: line {} orders a different product",
                        product.name, line.line_number
                    )));
                }
                if !line.unit.eq_ignore_ascii_case(&item.unit) {
                    return Err(ServiceError::ValidationError(format!(
                        "{}: received in {} but ordered in {}",
                        product.name, item.unit, line.unit
                    )));
                }
                let total = claimed.entry(line_id).or_insert(Decimal::ZERO);
                *total = checked_sum(&product.name, "ordered quantity", *total, item.ordered_quantity)?;
                if *total > line.remaining_quantity() {
                    return Err(ServiceError::ValidationError(format!(
                        "{}: ordered quantity {} exceeds the {} still open on line {}",
                        product.name,
                        total,
                        line.remaining_quantity(),
                        line.line_number
                    )));
                }
            }

            item.batch_number =
                ensure_batch_number(&item.batch_number, &product.name, draft.received_date);
            items.push(item);
        }

        let now = Utc::now();
        let grn = grn::ActiveModel {
            id: Set(Uuid::new_v4()),
            grn_number: Set(document_number("GRN")),
            purchase_order_id: Set(draft.purchase_order_id),
            supplier_id: Set(draft.supplier_id),
            status: Set(GrnStatus::Draft),
            received_date: Set(draft.received_date),
            remarks: Set(draft.remarks),
            rejection_reason: Set(None),
            created_by: Set(actor_id),
            approved_by: Set(None),
            approved_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;

        let mut saved = Vec::with_capacity(items.len());
        for item in items {
            let (ready_from, ready_to) = item.detail.ready_window();
            let row = grn_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                grn_id: Set(grn.id),
                product_id: Set(item.product_id),
                po_line_id: Set(item.po_line_id),
                batch_number: Set(item.batch_number),
                expiry_date: Set(item.expiry_date),
                unit: Set(item.unit),
                ordered_quantity: Set(item.ordered_quantity),
                accepted_quantity: Set(item.accepted_quantity),
                rejected_quantity: Set(item.rejected_quantity),
                damage_quantity: Set(item.damage_quantity),
                rate: Set(item.rate),
                amount: Set(line_amount(
                    &item.product_name,
                    item.accepted_quantity,
                    item.rate,
                )?),
                item_kind: Set(item.detail.kind()),
                ready_from: Set(ready_from),
                ready_to: Set(ready_to),
                created_at: Set(now),
            }
            .insert(conn)
            .await?;
            saved.push(row);
        }

        Ok(GrnView { grn, items: saved })
    }

    /// Flips the receipt to `approved` with a conditional update, credits
    /// accepted quantities (in primary units) to the ledger and advances the
    /// order's receipt status. Items with nothing accepted are skipped.
    pub(crate) async fn approve_in_txn<C: ConnectionTrait>(
        conn: &C,
        grn_id: Uuid,
        actor_id: Uuid,
        remarks: Option<String>,
    ) -> Result<ApprovalOutcome, ServiceError> {
        let grn = grn::Entity::find_by_id(grn_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("GRN {} not found", grn_id)))?;

        if grn.status == GrnStatus::Approved {
            return Err(ServiceError::AlreadyProcessed(format!(
                "GRN {} is already approved",
                grn.grn_number
            )));
        }
        if !grn.status.is_decidable() {
            return Err(ServiceError::InvalidStateTransition(format!(
                "GRN {} cannot be approved from {}",
                grn.grn_number, grn.status
            )));
        }

        // Read before the lines so the version check covers every line update below.
        let po = match grn.purchase_order_id {
            Some(po_id) => Some(
                purchase_order::Entity::find_by_id(po_id)
                    .one(conn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Purchase order {} not found", po_id))
                    })?,
            ),
            None => None,
        };

        let now = Utc::now();
        let mut changes = grn::ActiveModel {
            status: Set(GrnStatus::Approved),
            approved_by: Set(Some(actor_id)),
            approved_at: Set(Some(now)),
            updated_at: Set(now),
            ..Default::default()
        };
        if let Some(remarks) = remarks.clone() {
            changes.remarks = Set(Some(remarks));
        }
        let flipped = grn::Entity::update_many()
            .set(changes)
            .filter(grn::Column::Id.eq(grn_id))
            .filter(grn::Column::Status.is_in(GrnStatus::DECIDABLE))
            .exec(conn)
            .await?;
        if flipped.rows_affected == 0 {
            info!(%grn_id, "GRN approval lost to a concurrent decision");
            return Err(ServiceError::AlreadyProcessed(format!(
                "GRN {} was decided concurrently",
                grn.grn_number
            )));
        }

        let source = StockSource {
            reference_type: ReferenceType::Grn,
            reference_id: grn.id,
            reference_number: grn.grn_number.clone(),
            performed_by: actor_id,
            notes: None,
        };

        let mut postings = Vec::new();
        for item in grn_items(conn, grn_id).await? {
            if item.accepted_quantity <= Decimal::ZERO {
                continue;
            }

            let product = product::Entity::find_by_id(item.product_id)
                .one(conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!("unknown product {}", item.product_id))
                })?;
            let quantity = product
                .to_primary_units(item.accepted_quantity, &item.unit)
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "{}: unit {} is not a unit of this product",
                        product.name, item.unit
                    ))
                })?;

            let posting = StockLedger::credit_in_txn(
                conn,
                StockCredit {
                    product_id: item.product_id,
                    batch_number: item.batch_number.clone(),
                    quantity,
                    unit_cost: (item.amount / quantity).round_dp(4),
                    received_date: grn.received_date,
                    expiry_date: item.expiry_date,
                },
                &source,
                TransactionType::Inward,
            )
            .await?;
            postings.push(posting);

            if let Some(line_id) = item.po_line_id {
                let line = purchase_order_line::Entity::find_by_id(line_id)
                    .one(conn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Purchase order line {} not found", line_id))
                    })?;
                let received = checked_sum(
                    &product.name,
                    "received quantity",
                    line.received_quantity,
                    item.accepted_quantity,
                )?;
                if received > line.ordered_quantity {
                    return Err(ServiceError::ValidationError(format!(
                        "{}: receiving {} would exceed the ordered {} on line {}",
                        product.name, received, line.ordered_quantity, line.line_number
                    )));
                }
                let mut active: purchase_order_line::ActiveModel = line.into();
                active.received_quantity = Set(received);
                active.updated_at = Set(now);
                active.update(conn).await?;
            }
        }

        let purchase_order_status = match po {
            Some(po) => Some(apply_receipt_status(conn, &po).await?),
            None => None,
        };

        Ok(ApprovalOutcome {
            grn: grn::Model {
                status: GrnStatus::Approved,
                approved_by: Some(actor_id),
                approved_at: Some(now),
                remarks: remarks.or(grn.remarks.clone()),
                updated_at: now,
                ..grn
            },
            postings,
            purchase_order_status,
        })
    }

    /// Post-commit notifications for an approval.
    pub(crate) async fn announce_approval(&self, outcome: &ApprovalOutcome) {
        counter!("agrisupply.grn.approved", 1);
        info!(
            grn_id = %outcome.grn.id,
            grn_number = %outcome.grn.grn_number,
            items_credited = outcome.postings.len(),
            "GRN approved"
        );

        self.ledger.publish(&outcome.postings).await;
        self.notify(Event::GrnApproved {
            grn_id: outcome.grn.id,
            purchase_order_id: outcome.grn.purchase_order_id,
            items_credited: outcome.postings.len(),
        })
        .await;
        if let (Some(purchase_order_id), Some(status)) =
            (outcome.grn.purchase_order_id, outcome.purchase_order_status)
        {
            self.notify(Event::ReceiptStatusChanged {
                purchase_order_id,
                status,
            })
            .await;
        }
    }

    async fn transition(
        &self,
        grn_id: Uuid,
        from: &[GrnStatus],
        to: GrnStatus,
        mut changes: grn::ActiveModel,
    ) -> Result<grn::Model, ServiceError> {
        let db = &*self.db;
        changes.status = Set(to);
        changes.updated_at = Set(Utc::now());

        let result = grn::Entity::update_many()
            .set(changes)
            .filter(grn::Column::Id.eq(grn_id))
            .filter(grn::Column::Status.is_in(from.iter().copied()))
            .exec(db)
            .await?;

        let grn = grn::Entity::find_by_id(grn_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("GRN {} not found", grn_id)))?;

        if result.rows_affected == 0 {
            return Err(if grn.status == to {
                ServiceError::AlreadyProcessed(format!("GRN {} is already {}", grn.grn_number, to))
            } else {
                ServiceError::InvalidStateTransition(format!(
                    "GRN {} cannot move from {} to {}",
                    grn.grn_number, grn.status, to
                ))
            });
        }

        info!(%grn_id, status = %to, "GRN status changed");
        self.notify(Event::GrnStatusChanged { grn_id, status: to })
            .await;
        Ok(grn)
    }

    async fn notify(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

async fn grn_items<C: ConnectionTrait>(
    conn: &C,
    grn_id: Uuid,
) -> Result<Vec<grn_item::Model>, ServiceError> {
    Ok(grn_item::Entity::find()
        .filter(grn_item::Column::GrnId.eq(grn_id))
        .order_by_asc(grn_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

pub(crate) async fn product_names<C: ConnectionTrait>(
    conn: &C,
    lines: &[purchase_order_line::Model],
) -> Result<HashMap<Uuid, String>, ServiceError> {
    let ids: Vec<Uuid> = lines.iter().map(|line| line.product_id).collect();
    Ok(product::Entity::find()
        .filter(product::Column::Id.is_in(ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| (p.id, p.name))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    fn order(lines: &[(Decimal, Decimal)]) -> (purchase_order::Model, Vec<purchase_order_line::Model>) {
        let now = Utc::now();
        let po = purchase_order::Model {
            id: Uuid::new_v4(),
            po_number: "PO-1".into(),
            supplier_id: Uuid::new_v4(),
            status: PurchaseOrderStatus::Approved,
            expected_delivery_date: date(),
            auto_grn: false,
            notes: None,
            total_amount: Decimal::ZERO,
            created_by: Uuid::new_v4(),
            approved_by: None,
            approved_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let lines = lines
            .iter()
            .enumerate()
            .map(|(i, (ordered, received))| purchase_order_line::Model {
                id: Uuid::new_v4(),
                purchase_order_id: po.id,
                line_number: i as i32 + 1,
                product_id: Uuid::new_v4(),
                unit: "kg".into(),
                ordered_quantity: *ordered,
                rate: dec!(12.5),
                received_quantity: *received,
                created_at: now,
                updated_at: now,
            })
            .collect();
        (po, lines)
    }

    fn item(ordered: Decimal) -> GrnItemDraft {
        GrnItemDraft {
            product_id: Uuid::new_v4(),
            product_name: "Urea".into(),
            po_line_id: None,
            batch_number: "LOT-1".into(),
            expiry_date: None,
            unit: "kg".into(),
            ordered_quantity: ordered,
            accepted_quantity: ordered,
            rejected_quantity: Decimal::ZERO,
            damage_quantity: Decimal::ZERO,
            rate: dec!(2),
            amount: ordered * dec!(2),
            detail: GrnItemDetail::Standard,
        }
    }

    fn draft(items: Vec<GrnItemDraft>) -> GrnDraft {
        GrnDraft {
            purchase_order_id: None,
            supplier_id: Uuid::new_v4(),
            received_date: date(),
            remarks: None,
            items,
        }
    }

    #[test]
    fn draft_offers_only_outstanding_quantities() {
        let (po, lines) = order(&[(dec!(100), dec!(80)), (dec!(50), dec!(50)), (dec!(10), dec!(0))]);
        let mut names = HashMap::new();
        names.insert(lines[0].product_id, "Urea".to_string());

        let draft = draft_from_purchase_order(&po, &lines, &names, date());

        assert_eq!(draft.purchase_order_id, Some(po.id));
        assert_eq!(draft.supplier_id, po.supplier_id);
        assert_eq!(draft.items.len(), 2);
        let first = &draft.items[0];
        assert_eq!(first.po_line_id, Some(lines[0].id));
        assert_eq!(first.ordered_quantity, dec!(20));
        assert_eq!(first.accepted_quantity, dec!(20));
        assert_eq!(first.rejected_quantity, Decimal::ZERO);
        assert_eq!(first.amount, dec!(250));
        assert!(first.batch_number.starts_with("BATCHURE250301"));
        assert!(draft.items[1].batch_number.starts_with("BATCHXXX250301"));
    }

    #[test]
    fn rejection_and_damage_reduce_acceptance() {
        let mut draft = draft(vec![item(dec!(100))]);

        update_item(&mut draft, 0, ItemUpdate::RejectedQuantity(dec!(10))).unwrap();
        update_item(&mut draft, 0, ItemUpdate::DamageQuantity(dec!(5))).unwrap();
        assert_eq!(draft.items[0].accepted_quantity, dec!(85));
        assert_eq!(draft.items[0].amount, dec!(170));

        update_item(&mut draft, 0, ItemUpdate::RejectedQuantity(dec!(120))).unwrap();
        assert_eq!(draft.items[0].accepted_quantity, Decimal::ZERO);
        assert_eq!(draft.items[0].amount, Decimal::ZERO);
    }

    #[test]
    fn rate_and_acceptance_edits_recompute_amount() {
        let mut draft = draft(vec![item(dec!(100))]);

        update_item(&mut draft, 0, ItemUpdate::AcceptedQuantity(dec!(80))).unwrap();
        update_item(&mut draft, 0, ItemUpdate::Rate(dec!(3.5))).unwrap();
        assert_eq!(draft.items[0].amount, dec!(280));
    }

    #[test]
    fn blank_batch_is_regenerated() {
        let mut draft = draft(vec![item(dec!(1))]);

        update_item(&mut draft, 0, ItemUpdate::BatchNumber("  ".into())).unwrap();
        assert!(draft.items[0].batch_number.starts_with("BATCHURE250301"));

        update_item(&mut draft, 0, ItemUpdate::BatchNumber("SUPPLIER-9".into())).unwrap();
        assert_eq!(draft.items[0].batch_number, "SUPPLIER-9");
    }

    #[test]
    fn oversized_values_are_rejected_without_touching_the_item() {
        let mut huge = draft(vec![item(dec!(1))]);
        huge.items[0].ordered_quantity = Decimal::MAX;
        huge.items[0].accepted_quantity = Decimal::MAX;
        let before = huge.clone();

        assert_matches!(
            update_item(&mut huge, 0, ItemUpdate::Rate(dec!(2))),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("Urea")
        );
        assert_eq!(huge, before);

        let mut draft = draft(vec![item(dec!(10))]);
        assert_matches!(
            update_item(&mut draft, 0, ItemUpdate::RejectedQuantity(Decimal::MIN)),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            update_item(&mut draft, 0, ItemUpdate::Rate(Decimal::MAX)),
            Err(ServiceError::ValidationError(_))
        );
        assert_eq!(draft.items[0].rate, dec!(2));

        let mut over = item(dec!(1));
        over.ordered_quantity = Decimal::MAX;
        over.accepted_quantity = Decimal::MAX;
        over.rejected_quantity = Decimal::MAX;
        assert_matches!(validate_item(&over), Err(ServiceError::ValidationError(_)));

        // Both factors fit a column but their product does not
        let mut pricey = item(dec!(999999999999));
        pricey.rate = dec!(999999999999);
        assert_matches!(validate_item(&pricey), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut draft = draft(vec![item(dec!(1))]);
        assert_matches!(
            update_item(&mut draft, 3, ItemUpdate::Rate(dec!(1))),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn reconciliation_rule_names_the_product() {
        let mut over = item(dec!(100));
        over.accepted_quantity = dec!(90);
        over.rejected_quantity = dec!(5);
        over.damage_quantity = dec!(10);
        assert_matches!(validate_item(&over), Err(ServiceError::ValidationError(msg)) if msg.starts_with("Urea"));

        let mut negative = item(dec!(10));
        negative.damage_quantity = dec!(-1);
        assert_matches!(validate_item(&negative), Err(ServiceError::ValidationError(_)));

        let mut short = item(dec!(100));
        short.accepted_quantity = dec!(40);
        assert!(validate_item(&short).is_ok());
    }

    #[test]
    fn ready_window_must_be_ordered() {
        let mut plants = item(dec!(10));
        plants.detail = GrnItemDetail::ReadyPlants {
            ready_from: date(),
            ready_to: date() - chrono::Duration::days(1),
        };
        assert_matches!(validate_item(&plants), Err(ServiceError::ValidationError(_)));

        plants.detail = GrnItemDetail::ReadyPlants {
            ready_from: date(),
            ready_to: date(),
        };
        assert!(validate_item(&plants).is_ok());
    }
}
