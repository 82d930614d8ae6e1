use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000005_create_outward_and_return_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OutwardEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OutwardEntries::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OutwardEntries::OutwardNumber)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(OutwardEntries::Status)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutwardEntries::Purpose)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(OutwardEntries::Notes).text().null())
                    .col(ColumnDef::new(OutwardEntries::CreatedBy).uuid().not_null())
                    .col(ColumnDef::new(OutwardEntries::IssuedBy).uuid().null())
                    .col(
                        ColumnDef::new(OutwardEntries::IssuedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OutwardEntries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutwardEntries::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OutwardItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OutwardItems::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OutwardItems::OutwardEntryId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OutwardItems::ProductId).uuid().not_null())
                    .col(ColumnDef::new(OutwardItems::BatchId).uuid().not_null())
                    .col(
                        ColumnDef::new(OutwardItems::Quantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(ColumnDef::new(OutwardItems::Unit).string_len(32).not_null())
                    .col(
                        ColumnDef::new(OutwardItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_outward_items_entry")
                            .from(OutwardItems::Table, OutwardItems::OutwardEntryId)
                            .to(OutwardEntries::Table, OutwardEntries::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ReturnRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReturnRequests::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ReturnRequests::ReturnNumber)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(ReturnRequests::Status)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ReturnRequests::ProductId).uuid().not_null())
                    .col(ColumnDef::new(ReturnRequests::BatchId).uuid().not_null())
                    .col(
                        ColumnDef::new(ReturnRequests::Quantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReturnRequests::ReturnType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ReturnRequests::Reason).text().null())
                    .col(ColumnDef::new(ReturnRequests::RejectionReason).text().null())
                    .col(ColumnDef::new(ReturnRequests::CreatedBy).uuid().not_null())
                    .col(ColumnDef::new(ReturnRequests::DecidedBy).uuid().null())
                    .col(
                        ColumnDef::new(ReturnRequests::DecidedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReturnRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ReturnRequests::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ReturnRequests::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OutwardItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OutwardEntries::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum OutwardEntries {
    Table,
    Id,
    OutwardNumber,
    Status,
    Purpose,
    Notes,
    CreatedBy,
    IssuedBy,
    IssuedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum OutwardItems {
    Table,
    Id,
    OutwardEntryId,
    ProductId,
    BatchId,
    Quantity,
    Unit,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum ReturnRequests {
    Table,
    Id,
    ReturnNumber,
    Status,
    ProductId,
    BatchId,
    Quantity,
    ReturnType,
    Reason,
    RejectionReason,
    CreatedBy,
    DecidedBy,
    DecidedAt,
    CreatedAt,
    UpdatedAt,
}
