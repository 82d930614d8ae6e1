//! Property-based tests for the receiving reconciliation rules, batch codes
//! and ledger balances.

mod common;

use agrisupply_api::{
    entities::{grn_item::GrnItemDetail, inventory_transaction::ReferenceType},
    errors::ServiceError,
    services::{
        batch_number::{format_batch_number, generate_with_rng, product_prefix},
        grn::{update_item, validate_item, GrnDraft, GrnItemDraft, ItemUpdate},
        stock_ledger::{StockCredit, StockLedger, StockSource, StockStatus},
        MAX_DECIMAL,
    },
};
use assert_matches::assert_matches;
use chrono::NaiveDate;
use common::{today, TestContext};
use proptest::prelude::*;
use rand::{rngs::StdRng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn quantity_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..100_000, 0u32..3).prop_map(|(units, scale)| Decimal::new(units, scale))
}

fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (2000i32..2099, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).expect("valid date"))
}

fn draft_with(ordered: Decimal, rate: Decimal) -> GrnDraft {
    GrnDraft {
        purchase_order_id: None,
        supplier_id: Uuid::nil(),
        received_date: NaiveDate::from_ymd_opt(2025, 3, 1).expect("valid date"),
        remarks: None,
        items: vec![GrnItemDraft {
            product_id: Uuid::nil(),
            product_name: "Urea".to_string(),
            po_line_id: None,
            batch_number: "BATCHURE250301001".to_string(),
            expiry_date: None,
            unit: "kg".to_string(),
            ordered_quantity: ordered,
            accepted_quantity: ordered,
            rejected_quantity: Decimal::ZERO,
            damage_quantity: Decimal::ZERO,
            rate,
            amount: ordered * rate,
            detail: GrnItemDetail::Standard,
        }],
    }
}

/// One ledger movement against batch slot `0..3` of a single product.
#[derive(Debug, Clone)]
enum LedgerOp {
    Credit(usize, Decimal),
    Debit(usize, Decimal),
    Restore(usize, Decimal),
}

fn ledger_op_strategy() -> impl Strategy<Value = LedgerOp> {
    let quantity = || (1i64..5_000, 0u32..3).prop_map(|(units, scale)| Decimal::new(units, scale));
    prop_oneof![
        (0usize..3, quantity()).prop_map(|(slot, q)| LedgerOp::Credit(slot, q)),
        (0usize..3, quantity()).prop_map(|(slot, q)| LedgerOp::Debit(slot, q)),
        (0usize..3, quantity()).prop_map(|(slot, q)| LedgerOp::Restore(slot, q)),
    ]
}

fn movement() -> StockSource {
    StockSource {
        reference_type: ReferenceType::Manual,
        reference_id: Uuid::new_v4(),
        reference_number: "MAN-PROP".to_string(),
        performed_by: Uuid::new_v4(),
        notes: None,
    }
}

/// Replays `ops` and checks after every step that the balance, the batch
/// remainders, the ledger rows and a simple model all agree.
async fn replay_ledger(ops: Vec<LedgerOp>) {
    let ctx = TestContext::new().await;
    let product = ctx.seed_product("Urea").await;
    let ledger = &ctx.services.stock_ledger;

    let mut batch_ids: [Option<Uuid>; 3] = [None; 3];
    let mut expected = [Decimal::ZERO; 3];

    for op in ops {
        match op {
            LedgerOp::Credit(slot, quantity) => {
                let posting = ledger
                    .credit(
                        StockCredit {
                            product_id: product.id,
                            batch_number: format!("LOT-{}", slot),
                            quantity,
                            unit_cost: dec!(10),
                            received_date: today(),
                            expiry_date: None,
                        },
                        movement(),
                    )
                    .await
                    .unwrap();
                batch_ids[slot] = Some(posting.batch.id);
                expected[slot] += quantity;
            }
            LedgerOp::Debit(slot, quantity) => {
                let Some(batch_id) = batch_ids[slot] else {
                    continue;
                };
                match ledger.debit(product.id, batch_id, quantity, movement()).await {
                    Ok(posting) => {
                        assert!(quantity <= expected[slot]);
                        expected[slot] -= quantity;
                        assert_eq!(posting.batch.remaining_quantity, expected[slot]);
                    }
                    Err(e) => {
                        assert_matches!(e, ServiceError::InsufficientStock(_));
                        assert!(quantity > expected[slot]);
                    }
                }
            }
            LedgerOp::Restore(slot, quantity) => {
                let Some(batch_id) = batch_ids[slot] else {
                    continue;
                };
                StockLedger::restore_in_txn(ctx.db.as_ref(), batch_id, quantity, &movement())
                    .await
                    .unwrap();
                expected[slot] += quantity;
            }
        }

        let batches = ledger.batches(product.id).await.unwrap();
        assert!(batches.iter().all(|b| b.remaining_quantity >= Decimal::ZERO));
        let remaining: Decimal = batches.iter().map(|b| b.remaining_quantity).sum();
        assert_eq!(remaining, expected.iter().copied().sum::<Decimal>());
        assert_eq!(ledger.current_balance(product.id).await.unwrap(), remaining);

        let moved: Decimal = ledger
            .transactions(product.id)
            .await
            .unwrap()
            .iter()
            .map(|tx| tx.quantity)
            .sum();
        assert_eq!(moved, remaining);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn ledger_balance_is_additive_across_interleavings(
        ops in prop::collection::vec(ledger_op_strategy(), 1..25),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(replay_ledger(ops));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn recomputed_acceptance_always_reconciles(
        ordered in quantity_strategy(),
        rejected in quantity_strategy(),
        damage in quantity_strategy(),
        rate in quantity_strategy(),
    ) {
        let mut draft = draft_with(ordered, rate);
        update_item(&mut draft, 0, ItemUpdate::RejectedQuantity(rejected)).unwrap();
        update_item(&mut draft, 0, ItemUpdate::DamageQuantity(damage)).unwrap();
        let item = &draft.items[0];

        prop_assert!(item.accepted_quantity >= Decimal::ZERO);
        prop_assert_eq!(item.amount, item.accepted_quantity * item.rate);
        if rejected + damage <= ordered {
            prop_assert_eq!(item.accepted_quantity, ordered - rejected - damage);
            prop_assert!(validate_item(item).is_ok());
        } else {
            prop_assert_eq!(item.accepted_quantity, Decimal::ZERO);
            prop_assert!(validate_item(item).is_err());
        }
    }

    #[test]
    fn validation_matches_the_reconciliation_rule(
        ordered in quantity_strategy(),
        accepted in quantity_strategy(),
        rejected in quantity_strategy(),
        damage in quantity_strategy(),
    ) {
        let mut draft = draft_with(ordered, Decimal::ONE);
        let item = &mut draft.items[0];
        item.accepted_quantity = accepted;
        item.rejected_quantity = rejected;
        item.damage_quantity = damage;

        prop_assert_eq!(
            validate_item(item).is_ok(),
            accepted + rejected + damage <= ordered
        );
    }

    #[test]
    fn batch_codes_have_a_fixed_shape(
        name in "[ -~]{0,24}",
        date in date_strategy(),
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let code = generate_with_rng(&mut rng, &name, date);

        prop_assert_eq!(code.len(), 17);
        prop_assert!(code.starts_with("BATCH"));
        let prefix = product_prefix(&name);
        prop_assert_eq!(&code[5..8], prefix.as_str());
        prop_assert!(code[8..].chars().all(|c| c.is_ascii_digit()));
        prop_assert_eq!(&code[..14], &format_batch_number(&name, date, 0)[..14]);
    }

    #[test]
    fn stock_status_follows_the_reorder_level(
        balance in quantity_strategy(),
        reorder in quantity_strategy(),
    ) {
        let status = StockStatus::classify(balance, reorder);
        if balance.is_zero() {
            prop_assert_eq!(status, StockStatus::OutOfStock);
        } else if balance <= reorder {
            prop_assert_eq!(status, StockStatus::LowStock);
        } else {
            prop_assert_eq!(status, StockStatus::InStock);
        }
    }
}

proptest! {
    #[test]
    fn oversized_edits_fail_instead_of_overflowing(
        ordered in prop_oneof![Just(Decimal::MAX), Just(Decimal::MIN), quantity_strategy()],
        rate in prop_oneof![Just(Decimal::MAX), Just(dec!(2)), quantity_strategy()],
        rejected in prop_oneof![Just(Decimal::MIN), Just(Decimal::MAX), quantity_strategy()],
    ) {
        let mut draft = draft_with(Decimal::ZERO, Decimal::ZERO);
        {
            let item = &mut draft.items[0];
            item.ordered_quantity = ordered;
            item.accepted_quantity = ordered;
        }

        // Every outcome is a value or a validation error; nothing panics
        for update in [ItemUpdate::Rate(rate), ItemUpdate::RejectedQuantity(rejected)] {
            match update_item(&mut draft, 0, update) {
                Ok(()) => prop_assert_eq!(
                    draft.items[0].amount,
                    draft.items[0].accepted_quantity * draft.items[0].rate
                ),
                Err(e) => prop_assert!(matches!(e, ServiceError::ValidationError(_))),
            }
        }
        if ordered.abs() > MAX_DECIMAL {
            prop_assert!(matches!(
                validate_item(&draft.items[0]),
                Err(ServiceError::ValidationError(_))
            ));
        }
    }
}
