mod common;

use agrisupply_api::{
    entities::{
        grn::GrnStatus, inventory_transaction::TransactionType,
        purchase_order::PurchaseOrderStatus,
    },
    errors::ServiceError,
    events::Event,
    services::{
        grn::{update_item, ItemUpdate, SubmitMode},
        purchase_orders::{NewPurchaseOrder, NewPurchaseOrderLine},
    },
};
use assert_matches::assert_matches;
use chrono::Duration;
use common::{admin, clerk, today, TestContext};
use rust_decimal_macros::dec;

#[tokio::test]
async fn partial_then_full_receipt_against_one_order() {
    let mut ctx = TestContext::new().await;
    let product = ctx.seed_product("Urea").await;
    let supplier = ctx.seed_supplier("Green Fields Agro").await;
    let po = ctx
        .seed_purchase_order(supplier.id, &[(product.id, dec!(100), dec!(25))], false)
        .await;
    let po_id = po.order.id;
    ctx.services
        .purchase_orders
        .approve(po_id, &admin())
        .await
        .expect("approve order");

    // First delivery: 80 accepted, 10 rejected, 5 damaged, 5 still outstanding
    let mut draft = ctx.services.grn.draft_for_purchase_order(po_id).await.unwrap();
    assert_eq!(draft.items.len(), 1);
    assert_eq!(draft.items[0].ordered_quantity, dec!(100));
    update_item(&mut draft, 0, ItemUpdate::RejectedQuantity(dec!(10))).unwrap();
    update_item(&mut draft, 0, ItemUpdate::DamageQuantity(dec!(5))).unwrap();
    assert_eq!(draft.items[0].accepted_quantity, dec!(85));
    update_item(&mut draft, 0, ItemUpdate::AcceptedQuantity(dec!(80))).unwrap();
    assert_eq!(draft.items[0].amount, dec!(2000));

    let grn = ctx
        .services
        .grn
        .submit(draft, &clerk(), SubmitMode::Draft)
        .await
        .expect("submit draft");
    assert_eq!(grn.grn.status, GrnStatus::Draft);
    assert!(ctx
        .services
        .stock_ledger
        .transactions(product.id)
        .await
        .unwrap()
        .is_empty());

    let approved = ctx
        .services
        .grn
        .approve(grn.grn.id, &admin(), Some("checked at gate".into()))
        .await
        .expect("approve grn");
    assert_eq!(approved.grn.status, GrnStatus::Approved);
    assert!(approved.grn.approved_by.is_some());

    let batches = ctx.services.stock_ledger.batches(product.id).await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].remaining_quantity, dec!(80));
    assert!(batches[0].batch_number.starts_with("BATCHURE"));

    let transactions = ctx.services.stock_ledger.transactions(product.id).await.unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].transaction_type, TransactionType::Inward);
    assert_eq!(transactions[0].quantity, dec!(80));
    assert_eq!(transactions[0].reference_number, approved.grn.grn_number);

    let order = ctx.services.purchase_orders.get(po_id).await.unwrap();
    assert_eq!(order.order.status, PurchaseOrderStatus::PartialReceived);
    assert_eq!(order.lines[0].received_quantity, dec!(80));

    // Second delivery closes the line
    let draft = ctx.services.grn.draft_for_purchase_order(po_id).await.unwrap();
    assert_eq!(draft.items[0].ordered_quantity, dec!(20));
    assert_eq!(draft.items[0].accepted_quantity, dec!(20));
    ctx.services
        .grn
        .submit(draft, &admin(), SubmitMode::Approve)
        .await
        .expect("submit and approve");

    let order = ctx.services.purchase_orders.get(po_id).await.unwrap();
    assert_eq!(order.order.status, PurchaseOrderStatus::Received);
    assert_eq!(
        ctx.services.stock_ledger.current_balance(product.id).await.unwrap(),
        dec!(100)
    );
    assert_eq!(
        ctx.services.grn.list_for_purchase_order(po_id).await.unwrap().len(),
        2
    );

    let events = ctx.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ReceiptStatusChanged {
            status: PurchaseOrderStatus::Received,
            ..
        }
    )));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::GrnApproved { .. }))
            .count(),
        2
    );
}

#[tokio::test]
async fn over_reconciled_item_is_rejected_without_side_effects() {
    let ctx = TestContext::new().await;
    let product = ctx.seed_product("Potash").await;
    let supplier = ctx.seed_supplier("Deccan Inputs").await;
    let po = ctx
        .seed_purchase_order(supplier.id, &[(product.id, dec!(100), dec!(30))], false)
        .await;
    ctx.services
        .purchase_orders
        .approve(po.order.id, &admin())
        .await
        .unwrap();

    let mut draft = ctx
        .services
        .grn
        .draft_for_purchase_order(po.order.id)
        .await
        .unwrap();
    draft.items[0].accepted_quantity = dec!(90);
    draft.items[0].rejected_quantity = dec!(5);
    draft.items[0].damage_quantity = dec!(10);

    let err = ctx
        .services
        .grn
        .submit(draft, &admin(), SubmitMode::Approve)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(msg) if msg.contains("Potash"));

    assert!(ctx
        .services
        .grn
        .list_for_purchase_order(po.order.id)
        .await
        .unwrap()
        .is_empty());
    assert!(ctx
        .services
        .stock_ledger
        .transactions(product.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn approving_twice_credits_stock_once() {
    let ctx = TestContext::new().await;
    let product = ctx.seed_product("DAP").await;
    let supplier = ctx.seed_supplier("Green Fields Agro").await;
    let po = ctx
        .seed_purchase_order(supplier.id, &[(product.id, dec!(40), dec!(27))], false)
        .await;
    ctx.services
        .purchase_orders
        .approve(po.order.id, &admin())
        .await
        .unwrap();

    let draft = ctx
        .services
        .grn
        .draft_for_purchase_order(po.order.id)
        .await
        .unwrap();
    let grn = ctx
        .services
        .grn
        .submit(draft, &admin(), SubmitMode::Draft)
        .await
        .unwrap();

    ctx.services
        .grn
        .approve(grn.grn.id, &admin(), None)
        .await
        .expect("first approval");
    let second = ctx.services.grn.approve(grn.grn.id, &admin(), None).await;
    assert_matches!(second, Err(ServiceError::AlreadyProcessed(_)));

    assert_eq!(
        ctx.services.stock_ledger.current_balance(product.id).await.unwrap(),
        dec!(40)
    );
    assert_eq!(
        ctx.services
            .stock_ledger
            .transactions(product.id)
            .await
            .unwrap()
            .len(),
        1
    );

    let again = ctx.services.purchase_orders.approve(po.order.id, &admin()).await;
    assert_matches!(again, Err(ServiceError::AlreadyProcessed(_)));
}

#[tokio::test]
async fn auto_grn_receives_the_whole_order_on_approval() {
    let mut ctx = TestContext::new().await;
    let urea = ctx.seed_product("Urea").await;
    let potash = ctx.seed_product("Potash").await;
    let supplier = ctx.seed_supplier("Green Fields Agro").await;
    let po = ctx
        .seed_purchase_order(
            supplier.id,
            &[
                (urea.id, dec!(100), dec!(25)),
                (potash.id, dec!(60), dec!(32)),
            ],
            true,
        )
        .await;
    assert_eq!(po.order.total_amount, dec!(4420));

    let approval = ctx
        .services
        .purchase_orders
        .approve(po.order.id, &admin())
        .await
        .expect("approve with auto grn");

    let grn = approval.grn.expect("auto grn created");
    assert_eq!(grn.grn.status, GrnStatus::Approved);
    assert_eq!(grn.items.len(), 2);
    assert_eq!(
        grn.grn.remarks.as_deref(),
        Some("Generated on purchase order approval")
    );
    assert_eq!(
        approval.purchase_order.order.status,
        PurchaseOrderStatus::Received
    );
    assert_eq!(
        ctx.services.stock_ledger.current_balance(urea.id).await.unwrap(),
        dec!(100)
    );
    assert_eq!(
        ctx.services.stock_ledger.current_balance(potash.id).await.unwrap(),
        dec!(60)
    );

    let events = ctx.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::PurchaseOrderApproved { auto_grn_id: Some(id), .. } if *id == grn.grn.id
    )));
}

#[tokio::test]
async fn failed_auto_grn_leaves_order_unapproved() {
    let ctx = TestContext::new().await;
    let product = ctx.seed_product("Urea").await;
    let supplier = ctx.seed_supplier("Green Fields Agro").await;
    let po = ctx
        .seed_purchase_order(supplier.id, &[(product.id, dec!(100), dec!(25))], true)
        .await;

    ctx.services
        .catalog
        .set_supplier_active(supplier.id, false)
        .await
        .unwrap();

    let err = ctx
        .services
        .purchase_orders
        .approve(po.order.id, &admin())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let order = ctx.services.purchase_orders.get(po.order.id).await.unwrap();
    assert_eq!(order.order.status, PurchaseOrderStatus::Pending);
    assert!(order.order.approved_by.is_none());
    assert_eq!(order.order.version, 1);
    assert!(ctx
        .services
        .grn
        .list_for_purchase_order(po.order.id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        ctx.services.stock_ledger.current_balance(product.id).await.unwrap(),
        dec!(0)
    );
}

#[tokio::test]
async fn receipt_in_secondary_unit_is_credited_in_primary_unit() {
    let ctx = TestContext::new().await;
    let product = ctx.seed_product("Urea").await;
    let supplier = ctx.seed_supplier("Green Fields Agro").await;
    let po = ctx
        .services
        .purchase_orders
        .create(
            NewPurchaseOrder {
                supplier_id: Some(supplier.id),
                expected_delivery_date: Some(today() + Duration::days(3)),
                auto_grn: false,
                notes: Some("bagged urea".into()),
                submit_for_approval: false,
                lines: vec![NewPurchaseOrderLine {
                    product_id: Some(product.id),
                    unit: Some("bag".into()),
                    quantity: dec!(4),
                    rate: dec!(1250),
                }],
            },
            &clerk(),
        )
        .await
        .unwrap();
    assert_eq!(po.order.status, PurchaseOrderStatus::Draft);
    assert_eq!(po.lines[0].unit, "bag");

    ctx.services.purchase_orders.submit(po.order.id).await.unwrap();
    ctx.services
        .purchase_orders
        .approve(po.order.id, &admin())
        .await
        .unwrap();

    let draft = ctx
        .services
        .grn
        .draft_for_purchase_order(po.order.id)
        .await
        .unwrap();
    assert_eq!(draft.items[0].unit, "bag");
    ctx.services
        .grn
        .submit(draft, &admin(), SubmitMode::Approve)
        .await
        .unwrap();

    let batches = ctx.services.stock_ledger.batches(product.id).await.unwrap();
    assert_eq!(batches[0].remaining_quantity, dec!(200));
    assert_eq!(batches[0].purchase_price, dec!(25));

    let order = ctx.services.purchase_orders.get(po.order.id).await.unwrap();
    assert_eq!(order.lines[0].received_quantity, dec!(4));
    assert_eq!(order.order.status, PurchaseOrderStatus::Received);
}

#[tokio::test]
async fn quality_check_and_rejection_paths() {
    let ctx = TestContext::new().await;
    let product = ctx.seed_product("Neem Cake").await;
    let supplier = ctx.seed_supplier("Deccan Inputs").await;
    let po = ctx
        .seed_purchase_order(supplier.id, &[(product.id, dec!(50), dec!(18))], false)
        .await;
    ctx.services
        .purchase_orders
        .approve(po.order.id, &admin())
        .await
        .unwrap();

    let draft = ctx
        .services
        .grn
        .draft_for_purchase_order(po.order.id)
        .await
        .unwrap();
    let grn = ctx
        .services
        .grn
        .submit(draft, &clerk(), SubmitMode::Draft)
        .await
        .unwrap();

    let held = ctx
        .services
        .grn
        .hold_for_quality_check(grn.grn.id, &clerk())
        .await
        .unwrap();
    assert_eq!(held.status, GrnStatus::QualityCheck);

    let blank = ctx.services.grn.reject(grn.grn.id, &admin(), "  ".into()).await;
    assert_matches!(blank, Err(ServiceError::ValidationError(_)));

    let rejected = ctx
        .services
        .grn
        .reject(grn.grn.id, &admin(), "moisture above limit".into())
        .await
        .unwrap();
    assert_eq!(rejected.status, GrnStatus::Rejected);
    assert_eq!(
        rejected.rejection_reason.as_deref(),
        Some("moisture above limit")
    );

    let approve = ctx.services.grn.approve(grn.grn.id, &admin(), None).await;
    assert_matches!(approve, Err(ServiceError::InvalidStateTransition(_)));
    assert_eq!(
        ctx.services.stock_ledger.current_balance(product.id).await.unwrap(),
        dec!(0)
    );

    let order = ctx.services.purchase_orders.get(po.order.id).await.unwrap();
    assert_eq!(order.order.status, PurchaseOrderStatus::Approved);
}

#[tokio::test]
async fn cancelled_order_cannot_receive_goods() {
    let ctx = TestContext::new().await;
    let product = ctx.seed_product("Urea").await;
    let supplier = ctx.seed_supplier("Green Fields Agro").await;
    let po = ctx
        .seed_purchase_order(supplier.id, &[(product.id, dec!(10), dec!(25))], false)
        .await;

    let cancelled = ctx
        .services
        .purchase_orders
        .cancel(po.order.id, &admin())
        .await
        .unwrap();
    assert_eq!(cancelled.status, PurchaseOrderStatus::Cancelled);

    let draft = ctx.services.grn.draft_for_purchase_order(po.order.id).await;
    assert_matches!(draft, Err(ServiceError::InvalidStateTransition(_)));

    let approve = ctx.services.purchase_orders.approve(po.order.id, &admin()).await;
    assert_matches!(approve, Err(ServiceError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn order_requires_supplier_and_delivery_date() {
    let ctx = TestContext::new().await;
    let product = ctx.seed_product("Urea").await;

    let err = ctx
        .services
        .purchase_orders
        .create(
            NewPurchaseOrder {
                supplier_id: None,
                expected_delivery_date: Some(today()),
                auto_grn: false,
                notes: None,
                submit_for_approval: false,
                lines: vec![NewPurchaseOrderLine {
                    product_id: Some(product.id),
                    unit: None,
                    quantity: dec!(1),
                    rate: dec!(1),
                }],
            },
            &clerk(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(msg) if msg.contains("supplier"));
}
