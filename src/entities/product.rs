use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog product. Quantities on stock rows are always kept in `primary_unit`;
/// `conversion_factor` is the number of primary units in one `secondary_unit`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub sku: String,
    pub name: String,
    pub category: String,
    pub primary_unit: String,
    pub secondary_unit: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub conversion_factor: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub reorder_level: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Converts a quantity expressed in `unit` into primary units.
    ///
    /// Returns `None` when the unit is neither the primary nor the secondary unit.
    pub fn to_primary_units(&self, quantity: Decimal, unit: &str) -> Option<Decimal> {
        if unit.eq_ignore_ascii_case(&self.primary_unit) {
            return Some(quantity);
        }
        match &self.secondary_unit {
            Some(secondary) if unit.eq_ignore_ascii_case(secondary) => {
                Some(quantity * self.conversion_factor)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fertilizer() -> Model {
        let now = Utc::now();
        Model {
            id: Uuid::new_v4(),
            sku: "UREA-50".into(),
            name: "Urea".into(),
            category: "fertilizer".into(),
            primary_unit: "kg".into(),
            secondary_unit: Some("bag".into()),
            conversion_factor: dec!(50),
            reorder_level: dec!(100),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn converts_secondary_units_into_primary() {
        let product = fertilizer();
        assert_eq!(product.to_primary_units(dec!(3), "bag"), Some(dec!(150)));
        assert_eq!(product.to_primary_units(dec!(3), "KG"), Some(dec!(3)));
        assert_eq!(product.to_primary_units(dec!(3), "litre"), None);
    }
}
