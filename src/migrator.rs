use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240401_000001_create_books_table::Migration),
            Box::new(m20240401_000002_create_transactions_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240401_000001_create_books_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240401_000001_create_books_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create books table aligned with entities::book Model
            manager
                .create_table(
                    Table::create()
                        .table(Books::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Books::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Books::Title).string().not_null())
                        .col(ColumnDef::new(Books::Author).string())
                        .col(ColumnDef::new(Books::Price).decimal_len(12, 2).not_null())
                        .col(
                            ColumnDef::new(Books::Currency)
                                .string()
                                .not_null()
                                .default("INR"),
                        )
                        .col(ColumnDef::new(Books::IsPaid).boolean().not_null())
                        .col(ColumnDef::new(Books::FileKey).string().not_null())
                        .col(
                            ColumnDef::new(Books::DownloadCount)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Books::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Books::UpdatedAt).timestamp_with_time_zone())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Books::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Books {
        Table,
        Id,
        Title,
        Author,
        Price,
        Currency,
        IsPaid,
        FileKey,
        DownloadCount,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240401_000002_create_transactions_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240401_000002_create_transactions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Transactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Transactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transactions::UserId).uuid().not_null())
                        .col(ColumnDef::new(Transactions::BookId).uuid().not_null())
                        .col(
                            ColumnDef::new(Transactions::Amount)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transactions::Currency).string().not_null())
                        .col(
                            ColumnDef::new(Transactions::PaymentStatus)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::PaymentGateway)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::GatewayOrderId)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transactions::GatewayTransactionId).string())
                        .col(ColumnDef::new(Transactions::PaymentMethod).string())
                        .col(ColumnDef::new(Transactions::DownloadToken).string())
                        .col(
                            ColumnDef::new(Transactions::DownloadCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Transactions::MaxDownloads)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Transactions::DownloadExpiresAt)
                                .timestamp_with_time_zone(),
                        )
                        .col(ColumnDef::new(Transactions::PurchasedAt).timestamp_with_time_zone())
                        .col(ColumnDef::new(Transactions::FailureReason).string())
                        .col(
                            ColumnDef::new(Transactions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transactions::UpdatedAt).timestamp_with_time_zone())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx-transactions-gateway-order-id")
                        .table(Transactions::Table)
                        .col(Transactions::GatewayOrderId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx-transactions-download-token")
                        .table(Transactions::Table)
                        .col(Transactions::DownloadToken)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx-transactions-user-book")
                        .table(Transactions::Table)
                        .col(Transactions::UserId)
                        .col(Transactions::BookId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Transactions::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Transactions {
        Table,
        Id,
        UserId,
        BookId,
        Amount,
        Currency,
        PaymentStatus,
        PaymentGateway,
        GatewayOrderId,
        GatewayTransactionId,
        PaymentMethod,
        DownloadToken,
        DownloadCount,
        MaxDownloads,
        DownloadExpiresAt,
        PurchasedAt,
        FailureReason,
        CreatedAt,
        UpdatedAt,
    }
}
