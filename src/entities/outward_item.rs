use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "outward_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub outward_entry_id: Uuid,
    pub product_id: Uuid,
    pub batch_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity: Decimal,
    pub unit: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::outward_entry::Entity",
        from = "Column::OutwardEntryId",
        to = "super::outward_entry::Column::Id",
        on_delete = "Cascade"
    )]
    OutwardEntry,
}

impl Related<super::outward_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OutwardEntry.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
