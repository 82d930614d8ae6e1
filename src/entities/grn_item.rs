use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminator column backing [`GrnItemDetail`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[sea_orm(string_value = "standard")]
    Standard,
    #[sea_orm(string_value = "ready_plants")]
    ReadyPlants,
}

/// Per-item variant data. Nursery stock carries the window in which the plants
/// become saleable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrnItemDetail {
    #[default]
    Standard,
    ReadyPlants {
        ready_from: NaiveDate,
        ready_to: NaiveDate,
    },
}

impl GrnItemDetail {
    pub fn kind(&self) -> ItemKind {
        match self {
            GrnItemDetail::Standard => ItemKind::Standard,
            GrnItemDetail::ReadyPlants { .. } => ItemKind::ReadyPlants,
        }
    }

    pub fn ready_window(&self) -> (Option<NaiveDate>, Option<NaiveDate>) {
        match self {
            GrnItemDetail::Standard => (None, None),
            GrnItemDetail::ReadyPlants {
                ready_from,
                ready_to,
            } => (Some(*ready_from), Some(*ready_to)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "grn_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub grn_id: Uuid,
    pub product_id: Uuid,
    pub po_line_id: Option<Uuid>,
    pub batch_number: String,
    pub expiry_date: Option<NaiveDate>,
    pub unit: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub ordered_quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub accepted_quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub rejected_quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub damage_quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub rate: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub amount: Decimal,
    pub item_kind: ItemKind,
    pub ready_from: Option<NaiveDate>,
    pub ready_to: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// Rebuilds the variant from its persisted columns. A `ready_plants` row
    /// with a missing date degrades to `Standard`.
    pub fn detail(&self) -> GrnItemDetail {
        match (self.item_kind, self.ready_from, self.ready_to) {
            (ItemKind::ReadyPlants, Some(ready_from), Some(ready_to)) => {
                GrnItemDetail::ReadyPlants {
                    ready_from,
                    ready_to,
                }
            }
            _ => GrnItemDetail::Standard,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::grn::Entity",
        from = "Column::GrnId",
        to = "super::grn::Column::Id",
        on_delete = "Cascade"
    )]
    Grn,
}

impl Related<super::grn::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Grn.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
