use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Types of stock movements recorded in the ledger.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionType {
    #[sea_orm(string_value = "inward")]
    Inward,
    #[sea_orm(string_value = "outward")]
    Outward,
    #[sea_orm(string_value = "adjustment")]
    Adjustment,
    #[sea_orm(string_value = "transfer")]
    Transfer,
    #[sea_orm(string_value = "return")]
    Return,
}

/// Kind of document a ledger row points back to.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReferenceType {
    #[sea_orm(string_value = "grn")]
    Grn,
    #[sea_orm(string_value = "outward")]
    Outward,
    #[sea_orm(string_value = "return_request")]
    ReturnRequest,
    #[sea_orm(string_value = "manual")]
    Manual,
}

/// Append-only ledger row. `quantity` is signed: positive for inward and
/// return, negative for outward.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub transaction_type: TransactionType,
    pub product_id: Uuid,
    pub batch_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub balance_after_transaction: Decimal,
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,
    pub reference_number: String,
    pub performed_by: Uuid,
    pub notes: Option<String>,
    pub transaction_date: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
