use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000003_create_grn_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Grns::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Grns::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Grns::GrnNumber)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Grns::PurchaseOrderId).uuid().null())
                    .col(ColumnDef::new(Grns::SupplierId).uuid().not_null())
                    .col(ColumnDef::new(Grns::Status).string_len(32).not_null())
                    .col(ColumnDef::new(Grns::ReceivedDate).date().not_null())
                    .col(ColumnDef::new(Grns::Remarks).text().null())
                    .col(ColumnDef::new(Grns::RejectionReason).text().null())
                    .col(ColumnDef::new(Grns::CreatedBy).uuid().not_null())
                    .col(ColumnDef::new(Grns::ApprovedBy).uuid().null())
                    .col(
                        ColumnDef::new(Grns::ApprovedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Grns::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Grns::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(GrnItems::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(GrnItems::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(GrnItems::GrnId).uuid().not_null())
                    .col(ColumnDef::new(GrnItems::ProductId).uuid().not_null())
                    .col(ColumnDef::new(GrnItems::PoLineId).uuid().null())
                    .col(ColumnDef::new(GrnItems::BatchNumber).string_len(64).not_null())
                    .col(ColumnDef::new(GrnItems::ExpiryDate).date().null())
                    .col(ColumnDef::new(GrnItems::Unit).string_len(32).not_null())
                    .col(
                        ColumnDef::new(GrnItems::OrderedQuantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GrnItems::AcceptedQuantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GrnItems::RejectedQuantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GrnItems::DamageQuantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(ColumnDef::new(GrnItems::Rate).decimal_len(16, 4).not_null())
                    .col(
                        ColumnDef::new(GrnItems::Amount)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(ColumnDef::new(GrnItems::ItemKind).string_len(32).not_null())
                    .col(ColumnDef::new(GrnItems::ReadyFrom).date().null())
                    .col(ColumnDef::new(GrnItems::ReadyTo).date().null())
                    .col(
                        ColumnDef::new(GrnItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_grn_items_grn")
                            .from(GrnItems::Table, GrnItems::GrnId)
                            .to(Grns::Table, Grns::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_grns_purchase_order")
                    .table(Grns::Table)
                    .col(Grns::PurchaseOrderId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_grn_items_grn")
                    .table(GrnItems::Table)
                    .col(GrnItems::GrnId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(GrnItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Grns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Grns {
    Table,
    Id,
    GrnNumber,
    PurchaseOrderId,
    SupplierId,
    Status,
    ReceivedDate,
    Remarks,
    RejectionReason,
    CreatedBy,
    ApprovedBy,
    ApprovedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum GrnItems {
    Table,
    Id,
    GrnId,
    ProductId,
    PoLineId,
    BatchNumber,
    ExpiryDate,
    Unit,
    OrderedQuantity,
    AcceptedQuantity,
    RejectedQuantity,
    DamageQuantity,
    Rate,
    Amount,
    ItemKind,
    ReadyFrom,
    ReadyTo,
    CreatedAt,
}
