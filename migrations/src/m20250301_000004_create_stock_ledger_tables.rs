use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000004_create_stock_ledger_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StockBatches::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StockBatches::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(StockBatches::ProductId).uuid().not_null())
                    .col(
                        ColumnDef::new(StockBatches::BatchNumber)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockBatches::Quantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockBatches::RemainingQuantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockBatches::PurchasePrice)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(ColumnDef::new(StockBatches::ReceivedDate).date().not_null())
                    .col(ColumnDef::new(StockBatches::ExpiryDate).date().null())
                    .col(
                        ColumnDef::new(StockBatches::Status)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockBatches::Version)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(StockBatches::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockBatches::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stock_batches_product_batch")
                    .table(StockBatches::Table)
                    .col(StockBatches::ProductId)
                    .col(StockBatches::BatchNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(InventoryTransactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InventoryTransactions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(InventoryTransactions::TransactionType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryTransactions::ProductId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryTransactions::BatchId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryTransactions::Quantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryTransactions::BalanceAfterTransaction)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryTransactions::ReferenceType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryTransactions::ReferenceId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryTransactions::ReferenceNumber)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryTransactions::PerformedBy)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(InventoryTransactions::Notes).text().null())
                    .col(
                        ColumnDef::new(InventoryTransactions::TransactionDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_inventory_transactions_product_date")
                    .table(InventoryTransactions::Table)
                    .col(InventoryTransactions::ProductId)
                    .col((InventoryTransactions::TransactionDate, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(InventoryTransactions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(StockBatches::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum StockBatches {
    Table,
    Id,
    ProductId,
    BatchNumber,
    Quantity,
    RemainingQuantity,
    PurchasePrice,
    ReceivedDate,
    ExpiryDate,
    Status,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum InventoryTransactions {
    Table,
    Id,
    TransactionType,
    ProductId,
    BatchId,
    Quantity,
    BalanceAfterTransaction,
    ReferenceType,
    ReferenceId,
    ReferenceNumber,
    PerformedBy,
    Notes,
    TransactionDate,
}
