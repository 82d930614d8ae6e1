use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::{validate_non_negative_decimal, validate_positive_decimal};
use crate::{
    entities::{
        product,
        supplier::{self, SupplierKind},
    },
    errors::ServiceError,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewProduct {
    #[validate(length(min = 1, max = 100))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    #[validate(length(min = 1, max = 32))]
    pub primary_unit: String,
    #[validate(length(min = 1, max = 32))]
    pub secondary_unit: Option<String>,
    #[validate(custom = "validate_positive_decimal")]
    pub conversion_factor: Decimal,
    #[validate(custom = "validate_non_negative_decimal")]
    pub reorder_level: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewSupplier {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub kind: SupplierKind,
    #[validate(length(min = 5, max = 32))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
}

/// Reference data consulted by the receiving workflow.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn register_product(&self, input: NewProduct) -> Result<product::Model, ServiceError> {
        input.validate()?;

        let duplicate = product::Entity::find()
            .filter(product::Column::Sku.eq(input.sku.as_str()))
            .one(&*self.db)
            .await?;
        if duplicate.is_some() {
            return Err(ServiceError::ValidationError(format!(
                "SKU {} already exists",
                input.sku
            )));
        }

        let now = Utc::now();
        let created = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(input.sku),
            name: Set(input.name),
            category: Set(input.category),
            primary_unit: Set(input.primary_unit),
            secondary_unit: Set(input.secondary_unit),
            conversion_factor: Set(input.conversion_factor),
            reorder_level: Set(input.reorder_level),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = %created.id, sku = %created.sku, "Product registered");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn register_supplier(
        &self,
        input: NewSupplier,
    ) -> Result<supplier::Model, ServiceError> {
        input.validate()?;

        let now = Utc::now();
        let created = supplier::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            kind: Set(input.kind),
            phone: Set(input.phone),
            email: Set(input.email),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(supplier_id = %created.id, kind = %created.kind, "Supplier registered");
        Ok(created)
    }

    pub async fn set_supplier_active(
        &self,
        supplier_id: Uuid,
        is_active: bool,
    ) -> Result<supplier::Model, ServiceError> {
        let supplier = self.supplier(supplier_id).await?;
        let mut active: supplier::ActiveModel = supplier.into();
        active.is_active = Set(is_active);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    pub async fn product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    pub async fn supplier(&self, supplier_id: Uuid) -> Result<supplier::Model, ServiceError> {
        supplier::Entity::find_by_id(supplier_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Supplier {} not found", supplier_id)))
    }

    pub async fn products(&self) -> Result<Vec<product::Model>, ServiceError> {
        Ok(product::Entity::find()
            .filter(product::Column::IsActive.eq(true))
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await?)
    }

    pub async fn suppliers(&self, kind: Option<SupplierKind>) -> Result<Vec<supplier::Model>, ServiceError> {
        let mut query = supplier::Entity::find().filter(supplier::Column::IsActive.eq(true));
        if let Some(kind) = kind {
            query = query.filter(supplier::Column::Kind.eq(kind));
        }
        Ok(query
            .order_by_asc(supplier::Column::Name)
            .all(&*self.db)
            .await?)
    }
}
