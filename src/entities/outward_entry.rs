use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutwardStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "issued")]
    Issued,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OutwardStatus {
    /// Entries in these states have not touched stock yet.
    pub const OPEN: [OutwardStatus; 2] = [OutwardStatus::Draft, OutwardStatus::Pending];

    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutwardPurpose {
    #[sea_orm(string_value = "production")]
    Production,
    #[sea_orm(string_value = "transfer")]
    Transfer,
    #[sea_orm(string_value = "wastage")]
    Wastage,
    #[sea_orm(string_value = "sample")]
    Sample,
    #[sea_orm(string_value = "other")]
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "outward_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub outward_number: String,
    pub status: OutwardStatus,
    pub purpose: OutwardPurpose,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub issued_by: Option<Uuid>,
    pub issued_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::outward_item::Entity")]
    Items,
}

impl Related<super::outward_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
