mod common;

use agrisupply_api::{
    entities::{
        inventory_transaction::TransactionType,
        outward_entry::{OutwardPurpose, OutwardStatus},
        return_request::{ReturnStatus, ReturnType},
        stock_batch::BatchStatus,
    },
    errors::ServiceError,
    services::{
        outward::{NewOutwardEntry, NewOutwardItem},
        returns::NewReturnRequest,
    },
};
use assert_matches::assert_matches;
use chrono::Duration;
use common::{admin, clerk, today, TestContext};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn item(product_id: Uuid, batch_id: Uuid, quantity: Decimal) -> NewOutwardItem {
    NewOutwardItem {
        product_id,
        batch_id,
        quantity,
        unit: None,
    }
}

fn return_of(product_id: Uuid, batch_id: Uuid, quantity: Decimal) -> NewReturnRequest {
    NewReturnRequest {
        product_id,
        batch_id,
        quantity,
        return_type: ReturnType::IssueReturn,
        reason: Some("unused after field trial".into()),
    }
}

#[tokio::test]
async fn outward_entry_is_debited_only_on_approval() {
    let ctx = TestContext::new().await;
    let product = ctx.seed_product("Urea").await;
    let batch_id = ctx.seed_stock(&product, dec!(60), None).await;

    let draft = ctx
        .services
        .outward
        .draft(
            NewOutwardEntry {
                purpose: OutwardPurpose::Production,
                notes: Some("nursery block B".into()),
                items: vec![NewOutwardItem {
                    unit: Some("bag".into()),
                    ..item(product.id, batch_id, dec!(1))
                }],
            },
            &clerk(),
        )
        .await
        .unwrap();
    assert_eq!(draft.entry.status, OutwardStatus::Draft);
    assert!(draft.entry.outward_number.starts_with("OUT"));
    assert_eq!(
        ctx.services.stock_ledger.current_balance(product.id).await.unwrap(),
        dec!(60)
    );

    let pending = ctx.services.outward.submit(draft.entry.id).await.unwrap();
    assert_eq!(pending.status, OutwardStatus::Pending);

    let denied = ctx.services.outward.approve(draft.entry.id, &clerk()).await;
    assert_matches!(denied, Err(ServiceError::Forbidden(_)));

    let issued = ctx
        .services
        .outward
        .approve(draft.entry.id, &admin())
        .await
        .unwrap();
    assert_eq!(issued.entry.status, OutwardStatus::Issued);
    assert!(issued.entry.issued_by.is_some());

    // One bag is 50 kg
    let batch = ctx.services.stock_ledger.batch(batch_id).await.unwrap();
    assert_eq!(batch.remaining_quantity, dec!(10));

    let again = ctx.services.outward.approve(draft.entry.id, &admin()).await;
    assert_matches!(again, Err(ServiceError::AlreadyProcessed(_)));
    let cancel = ctx.services.outward.cancel(draft.entry.id, &admin()).await;
    assert_matches!(cancel, Err(ServiceError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn failing_item_rolls_back_the_whole_issue() {
    let ctx = TestContext::new().await;
    let urea = ctx.seed_product("Urea").await;
    let potash = ctx.seed_product("Potash").await;
    let urea_batch = ctx.seed_stock(&urea, dec!(40), None).await;
    let potash_batch = ctx.seed_stock(&potash, dec!(20), None).await;

    let entry = ctx
        .services
        .outward
        .draft(
            NewOutwardEntry {
                purpose: OutwardPurpose::Transfer,
                notes: None,
                items: vec![
                    item(urea.id, urea_batch, dec!(25)),
                    item(potash.id, potash_batch, dec!(30)),
                ],
            },
            &admin(),
        )
        .await
        .unwrap();

    let err = ctx
        .services
        .outward
        .approve(entry.entry.id, &admin())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    let urea_left = ctx.services.stock_ledger.batch(urea_batch).await.unwrap();
    assert_eq!(urea_left.remaining_quantity, dec!(40));
    let view = ctx.services.outward.get(entry.entry.id).await.unwrap();
    assert_eq!(view.entry.status, OutwardStatus::Draft);
    assert!(view.entry.issued_at.is_none());

    // Fix the quantity and retry
    let view = ctx
        .services
        .outward
        .replace_items(
            entry.entry.id,
            vec![
                item(urea.id, urea_batch, dec!(25)),
                item(potash.id, potash_batch, dec!(20)),
            ],
            &admin(),
        )
        .await
        .unwrap();
    assert_eq!(view.items.len(), 2);
    ctx.services
        .outward
        .approve(entry.entry.id, &admin())
        .await
        .unwrap();

    let potash_left = ctx.services.stock_ledger.batch(potash_batch).await.unwrap();
    assert_eq!(potash_left.remaining_quantity, dec!(0));
    assert_eq!(potash_left.status, BatchStatus::Exhausted);
}

#[tokio::test]
async fn outward_item_must_come_from_its_products_batch() {
    let ctx = TestContext::new().await;
    let urea = ctx.seed_product("Urea").await;
    let potash = ctx.seed_product("Potash").await;
    let urea_batch = ctx.seed_stock(&urea, dec!(40), None).await;

    let err = ctx
        .services
        .outward
        .draft(
            NewOutwardEntry {
                purpose: OutwardPurpose::Sample,
                notes: None,
                items: vec![item(potash.id, urea_batch, dec!(1))],
            },
            &admin(),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let empty = ctx
        .services
        .outward
        .draft(
            NewOutwardEntry {
                purpose: OutwardPurpose::Sample,
                notes: None,
                items: vec![],
            },
            &admin(),
        )
        .await;
    assert_matches!(empty, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn approved_return_restores_the_batch() {
    let ctx = TestContext::new().await;
    let product = ctx.seed_product("Urea").await;
    let batch_id = ctx.seed_stock(&product, dec!(50), None).await;

    let entry = ctx
        .services
        .outward
        .draft(
            NewOutwardEntry {
                purpose: OutwardPurpose::Production,
                notes: None,
                items: vec![item(product.id, batch_id, dec!(50))],
            },
            &admin(),
        )
        .await
        .unwrap();
    ctx.services
        .outward
        .approve(entry.entry.id, &admin())
        .await
        .unwrap();
    assert_eq!(
        ctx.services.stock_ledger.batch(batch_id).await.unwrap().status,
        BatchStatus::Exhausted
    );

    let request = ctx
        .services
        .returns
        .create(return_of(product.id, batch_id, dec!(15)), &clerk())
        .await
        .unwrap();
    assert_eq!(request.status, ReturnStatus::Pending);
    assert!(request.return_number.starts_with("RET"));

    let approved = ctx
        .services
        .returns
        .approve(request.id, &admin())
        .await
        .unwrap();
    assert_eq!(approved.status, ReturnStatus::Approved);
    assert!(approved.decided_at.is_some());

    let batch = ctx.services.stock_ledger.batch(batch_id).await.unwrap();
    assert_eq!(batch.remaining_quantity, dec!(15));
    assert_eq!(batch.status, BatchStatus::Active);

    let returns: Vec<_> = ctx
        .services
        .stock_ledger
        .transactions(product.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.transaction_type == TransactionType::Return)
        .collect();
    assert_eq!(returns.len(), 1);
    assert_eq!(returns[0].quantity, dec!(15));
    assert_eq!(returns[0].reference_number, request.return_number);

    let twice = ctx.services.returns.approve(request.id, &admin()).await;
    assert_matches!(twice, Err(ServiceError::AlreadyProcessed(_)));
    let reject = ctx
        .services
        .returns
        .reject(request.id, &admin(), "too late".into())
        .await;
    assert_matches!(reject, Err(ServiceError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn rejected_return_needs_a_reason_and_moves_no_stock() {
    let ctx = TestContext::new().await;
    let product = ctx.seed_product("Urea").await;
    let batch_id = ctx.seed_stock(&product, dec!(50), None).await;

    let request = ctx
        .services
        .returns
        .create(return_of(product.id, batch_id, dec!(15)), &clerk())
        .await
        .unwrap();

    let blank = ctx
        .services
        .returns
        .reject(request.id, &admin(), "".into())
        .await;
    assert_matches!(blank, Err(ServiceError::ValidationError(_)));

    let rejected = ctx
        .services
        .returns
        .reject(request.id, &admin(), "packaging opened".into())
        .await
        .unwrap();
    assert_eq!(rejected.status, ReturnStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("packaging opened"));

    let batch = ctx.services.stock_ledger.batch(batch_id).await.unwrap();
    assert_eq!(batch.remaining_quantity, dec!(50));

    let approve = ctx.services.returns.approve(request.id, &admin()).await;
    assert_matches!(approve, Err(ServiceError::InvalidStateTransition(_)));

    let rejected_list = ctx
        .services
        .returns
        .list(Some(ReturnStatus::Rejected))
        .await
        .unwrap();
    assert_eq!(rejected_list.len(), 1);
}

#[tokio::test]
async fn return_must_name_the_batch_of_its_product() {
    let ctx = TestContext::new().await;
    let urea = ctx.seed_product("Urea").await;
    let potash = ctx.seed_product("Potash").await;
    let urea_batch = ctx.seed_stock(&urea, dec!(10), None).await;

    let err = ctx
        .services
        .returns
        .create(return_of(potash.id, urea_batch, dec!(1)), &clerk())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let zero = ctx
        .services
        .returns
        .create(return_of(urea.id, urea_batch, dec!(0)), &clerk())
        .await;
    assert_matches!(zero, Err(ServiceError::ValidationError(_)));

    let request = ctx
        .services
        .returns
        .create(return_of(urea.id, urea_batch, dec!(2)), &clerk())
        .await
        .unwrap();
    let cancelled = ctx
        .services
        .returns
        .cancel(request.id, &clerk())
        .await
        .unwrap();
    assert_eq!(cancelled.status, ReturnStatus::Cancelled);
}

#[tokio::test]
async fn return_into_expired_batch_is_refused() {
    let ctx = TestContext::new().await;
    let product = ctx.seed_product("Urea").await;
    let batch_id = ctx
        .seed_stock(&product, dec!(10), Some(today() - Duration::days(2)))
        .await;

    let request = ctx
        .services
        .returns
        .create(return_of(product.id, batch_id, dec!(4)), &clerk())
        .await
        .unwrap();

    let err = ctx
        .services
        .returns
        .approve(request.id, &admin())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));

    assert_eq!(
        ctx.services.returns.get(request.id).await.unwrap().status,
        ReturnStatus::Pending
    );
    let batch = ctx.services.stock_ledger.batch(batch_id).await.unwrap();
    assert_eq!(batch.remaining_quantity, dec!(10));
}
