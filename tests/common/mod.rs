#![allow(dead_code)]

use std::sync::Arc;

use agrisupply_api::{
    auth::{Actor, ApprovalAuthorizer, PermissionAuthorizer},
    build_router,
    config::AppConfig,
    db,
    entities::{product, supplier, supplier::SupplierKind},
    events::{Event, EventSender},
    handlers::AppServices,
    services::{
        catalog::{NewProduct, NewSupplier},
        grn::{GrnDraft, GrnItemDraft, SubmitMode},
        purchase_orders::{NewPurchaseOrder, NewPurchaseOrderLine, PurchaseOrderView},
    },
    AppState,
};
use axum::Router;
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::DatabaseConnection;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Application services over a fresh in-memory SQLite database.
pub struct TestContext {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub services: AppServices,
    events: mpsc::Receiver<Event>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_authorizer(Arc::new(PermissionAuthorizer)).await
    }

    /// Same as [`TestContext::new`] but with a custom approval gate.
    pub async fn with_authorizer(authorizer: Arc<dyn ApprovalAuthorizer>) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);
        let (tx, rx) = mpsc::channel(1024);
        let services = AppServices::new(db.clone(), authorizer, Some(EventSender::new(tx)), true);

        Self {
            db,
            config: cfg,
            services,
            events: rx,
        }
    }

    pub fn router(&self) -> Router {
        build_router(AppState {
            db: self.db.clone(),
            config: self.config.clone(),
            services: self.services.clone(),
        })
    }

    /// Everything emitted so far, oldest first.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Fertilizer counted in kg and also sold in 50 kg bags.
    pub async fn seed_product(&self, name: &str) -> product::Model {
        self.seed_product_with(name, dec!(10)).await
    }

    pub async fn seed_product_with(&self, name: &str, reorder_level: Decimal) -> product::Model {
        self.services
            .catalog
            .register_product(NewProduct {
                sku: format!("SKU-{}", Uuid::new_v4().simple()),
                name: name.to_string(),
                category: "fertilizer".to_string(),
                primary_unit: "kg".to_string(),
                secondary_unit: Some("bag".to_string()),
                conversion_factor: dec!(50),
                reorder_level,
            })
            .await
            .expect("seed product")
    }

    pub async fn seed_supplier(&self, name: &str) -> supplier::Model {
        self.services
            .catalog
            .register_supplier(NewSupplier {
                name: name.to_string(),
                kind: SupplierKind::Supplier,
                phone: Some("+91 98450 12345".to_string()),
                email: Some("orders@greenfields.example".to_string()),
            })
            .await
            .expect("seed supplier")
    }

    /// Creates a purchase order for `lines` of (product, quantity, rate) in kg.
    pub async fn seed_purchase_order(
        &self,
        supplier_id: Uuid,
        lines: &[(Uuid, Decimal, Decimal)],
        auto_grn: bool,
    ) -> PurchaseOrderView {
        self.services
            .purchase_orders
            .create(
                NewPurchaseOrder {
                    supplier_id: Some(supplier_id),
                    expected_delivery_date: Some(today() + Duration::days(7)),
                    auto_grn,
                    notes: None,
                    submit_for_approval: true,
                    lines: lines
                        .iter()
                        .map(|(product_id, quantity, rate)| NewPurchaseOrderLine {
                            product_id: Some(*product_id),
                            unit: None,
                            quantity: *quantity,
                            rate: *rate,
                        })
                        .collect(),
                },
                &admin(),
            )
            .await
            .expect("seed purchase order")
    }

    /// Receives `quantity` kg of `product` into a new lot with a fresh
    /// supplier and no order. Returns the credited batch id.
    pub async fn seed_stock(
        &self,
        product: &product::Model,
        quantity: Decimal,
        expiry_date: Option<NaiveDate>,
    ) -> Uuid {
        let supplier = self.seed_supplier("Walk-in Supplier").await;
        let draft = GrnDraft {
            purchase_order_id: None,
            supplier_id: supplier.id,
            received_date: today(),
            remarks: None,
            items: vec![GrnItemDraft {
                product_id: product.id,
                product_name: product.name.clone(),
                po_line_id: None,
                batch_number: format!("LOT-{}", Uuid::new_v4().simple()),
                expiry_date,
                unit: "kg".to_string(),
                ordered_quantity: quantity,
                accepted_quantity: quantity,
                rejected_quantity: Decimal::ZERO,
                damage_quantity: Decimal::ZERO,
                rate: dec!(20),
                amount: quantity * dec!(20),
                detail: Default::default(),
            }],
        };

        let view = self
            .services
            .grn
            .submit(draft, &admin(), SubmitMode::Approve)
            .await
            .expect("seed stock");

        self.services
            .stock_ledger
            .batches(product.id)
            .await
            .expect("list batches")
            .into_iter()
            .find(|batch| batch.batch_number == view.items[0].batch_number)
            .expect("credited batch")
            .id
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Holds every permission.
pub fn admin() -> Actor {
    Actor::new(Uuid::new_v4(), ["*"])
}

/// May draft documents but approve nothing.
pub fn clerk() -> Actor {
    Actor::new(
        Uuid::new_v4(),
        [
            "purchaseorders:create",
            "grn:create",
            "outward:create",
            "returns:create",
        ],
    )
}
