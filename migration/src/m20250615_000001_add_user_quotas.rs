use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Per-user subscription quota overrides; users without a row get the configured default
        manager
            .create_table(
                Table::create()
                    .table(UserQuotas::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserQuotas::UserId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UserQuotas::MaxSubscriptions)
                            .integer()
                            .not_null()
                            .default(10),
                    )
                    .col(
                        ColumnDef::new(UserQuotas::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserQuotas::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserQuotas {
    Table,
    UserId,
    MaxSubscriptions,
    UpdatedAt,
}
