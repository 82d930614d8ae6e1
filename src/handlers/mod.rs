pub mod catalog;
pub mod common;
pub mod grn;
pub mod outward;
pub mod purchase_orders;
pub mod returns;
pub mod stock;

use std::sync::Arc;

use crate::{
    auth::ApprovalAuthorizer,
    db::DbPool,
    events::EventSender,
    services::{
        catalog::CatalogService, grn::GrnService, outward::OutwardService,
        purchase_orders::PurchaseOrderService, returns::ReturnService, stock_ledger::StockLedger,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub authorizer: Arc<dyn ApprovalAuthorizer>,
    pub catalog: Arc<CatalogService>,
    pub stock_ledger: Arc<StockLedger>,
    pub grn: Arc<GrnService>,
    pub purchase_orders: Arc<PurchaseOrderService>,
    pub outward: Arc<OutwardService>,
    pub returns: Arc<ReturnService>,
}

impl AppServices {
    /// Wires every service over one pool, one authorizer and one event channel.
    pub fn new(
        db_pool: Arc<DbPool>,
        authorizer: Arc<dyn ApprovalAuthorizer>,
        event_sender: Option<EventSender>,
        low_stock_alerts: bool,
    ) -> Self {
        let ledger =
            StockLedger::new(db_pool.clone(), event_sender.clone()).with_low_stock_alerts(low_stock_alerts);

        let grn = Arc::new(GrnService::new(
            db_pool.clone(),
            authorizer.clone(),
            ledger.clone(),
            event_sender.clone(),
        ));
        let purchase_orders = Arc::new(PurchaseOrderService::new(
            db_pool.clone(),
            authorizer.clone(),
            grn.clone(),
            event_sender.clone(),
        ));
        let outward = Arc::new(OutwardService::new(
            db_pool.clone(),
            authorizer.clone(),
            ledger.clone(),
            event_sender.clone(),
        ));
        let returns = Arc::new(ReturnService::new(
            db_pool.clone(),
            authorizer.clone(),
            ledger.clone(),
            event_sender,
        ));

        Self {
            authorizer,
            catalog: Arc::new(CatalogService::new(db_pool)),
            stock_ledger: Arc::new(ledger),
            grn,
            purchase_orders,
            outward,
            returns,
        }
    }
}
