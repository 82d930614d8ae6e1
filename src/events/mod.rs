use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::{grn::GrnStatus, purchase_order::PurchaseOrderStatus};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event after a committed change. Delivery failures are logged
    /// and never surface to the caller, whose work is already durable.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping notification event");
        }
    }
}

/// Notifications emitted once a workflow step has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    PurchaseOrderCreated(Uuid),
    PurchaseOrderApproved {
        purchase_order_id: Uuid,
        auto_grn_id: Option<Uuid>,
    },
    PurchaseOrderCancelled(Uuid),
    ReceiptStatusChanged {
        purchase_order_id: Uuid,
        status: PurchaseOrderStatus,
    },

    GrnSubmitted(Uuid),
    GrnStatusChanged {
        grn_id: Uuid,
        status: GrnStatus,
    },
    GrnApproved {
        grn_id: Uuid,
        purchase_order_id: Option<Uuid>,
        items_credited: usize,
    },

    StockCredited {
        product_id: Uuid,
        batch_id: Uuid,
        quantity: Decimal,
        balance: Decimal,
    },
    StockDebited {
        product_id: Uuid,
        batch_id: Uuid,
        quantity: Decimal,
        balance: Decimal,
    },
    LowStockDetected {
        product_id: Uuid,
        balance: Decimal,
        reorder_level: Decimal,
    },
    BatchesExpired {
        count: u64,
    },

    OutwardIssued(Uuid),
    OutwardCancelled(Uuid),

    ReturnCreated(Uuid),
    ReturnApproved(Uuid),
    ReturnRejected(Uuid),
    ReturnCancelled(Uuid),
}

/// Consumes events until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::LowStockDetected {
                product_id,
                balance,
                reorder_level,
            } => {
                warn!(
                    %product_id,
                    %balance,
                    %reorder_level,
                    "Low stock: balance at or below reorder level"
                );
            }
            Event::ReceiptStatusChanged {
                purchase_order_id,
                status,
            } => {
                info!(%purchase_order_id, %status, "Purchase order receipt status changed");
            }
            Event::GrnApproved {
                grn_id,
                purchase_order_id,
                items_credited,
            } => {
                info!(
                    %grn_id,
                    purchase_order_id = ?purchase_order_id,
                    items_credited,
                    "GRN approved and stock credited"
                );
            }
            Event::BatchesExpired { count } if count > 0 => {
                warn!(count, "Stock batches expired");
            }
            other => {
                info!(event = ?other, "Received event");
            }
        }
    }

    warn!("Event processing loop has ended");
}
