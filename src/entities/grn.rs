use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GrnStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "quality_check")]
    QualityCheck,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "partial_accepted")]
    PartialAccepted,
}

impl GrnStatus {
    /// States from which a decision (approve, reject, partial accept) may be taken.
    pub const DECIDABLE: [GrnStatus; 2] = [GrnStatus::Draft, GrnStatus::QualityCheck];

    pub fn is_decidable(&self) -> bool {
        Self::DECIDABLE.contains(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "grns")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub grn_number: String,
    pub purchase_order_id: Option<Uuid>,
    pub supplier_id: Uuid,
    pub status: GrnStatus,
    pub received_date: NaiveDate,
    pub remarks: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::grn_item::Entity")]
    Items,
}

impl Related<super::grn_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
