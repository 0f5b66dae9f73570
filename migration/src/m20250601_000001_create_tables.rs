use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create email_configs table
        manager
            .create_table(
                Table::create()
                    .table(EmailConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EmailConfigs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EmailConfigs::OwnerId).big_integer().not_null())
                    .col(ColumnDef::new(EmailConfigs::Name).string().not_null())
                    .col(ColumnDef::new(EmailConfigs::SmtpServer).string().not_null())
                    .col(
                        ColumnDef::new(EmailConfigs::SmtpPort)
                            .integer()
                            .not_null()
                            .default(465),
                    )
                    .col(ColumnDef::new(EmailConfigs::SmtpUser).string().not_null())
                    .col(ColumnDef::new(EmailConfigs::SmtpPassword).string().not_null())
                    .col(ColumnDef::new(EmailConfigs::ReceiverEmail).string().not_null())
                    .col(
                        ColumnDef::new(EmailConfigs::IsSsl)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(EmailConfigs::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(EmailConfigs::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(EmailConfigs::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_email_configs_owner")
                    .table(EmailConfigs::Table)
                    .col(EmailConfigs::OwnerId)
                    .to_owned(),
            )
            .await?;

        // Create monitor_tasks table
        manager
            .create_table(
                Table::create()
                    .table(MonitorTasks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MonitorTasks::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MonitorTasks::OwnerId).big_integer().not_null())
                    .col(ColumnDef::new(MonitorTasks::OwnerName).string())
                    .col(ColumnDef::new(MonitorTasks::Name).string().not_null())
                    .col(ColumnDef::new(MonitorTasks::Url).string().not_null())
                    .col(ColumnDef::new(MonitorTasks::Selector).string().not_null())
                    .col(
                        ColumnDef::new(MonitorTasks::IntervalSeconds)
                            .integer()
                            .not_null()
                            .default(300),
                    )
                    .col(
                        ColumnDef::new(MonitorTasks::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(MonitorTasks::IsPublic)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(MonitorTasks::EmailConfigId).integer())
                    .col(ColumnDef::new(MonitorTasks::LastCheck).timestamp())
                    .col(ColumnDef::new(MonitorTasks::LastContentHash).string())
                    .col(ColumnDef::new(MonitorTasks::LastContent).text())
                    .col(
                        ColumnDef::new(MonitorTasks::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MonitorTasks::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_monitor_tasks_email_config")
                            .from(MonitorTasks::Table, MonitorTasks::EmailConfigId)
                            .to(EmailConfigs::Table, EmailConfigs::Id)
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::NoAction),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_monitor_tasks_owner")
                    .table(MonitorTasks::Table)
                    .col(MonitorTasks::OwnerId)
                    .to_owned(),
            )
            .await?;

        // Create monitor_logs table
        manager
            .create_table(
                Table::create()
                    .table(MonitorLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MonitorLogs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MonitorLogs::TaskId).integer().not_null())
                    .col(
                        ColumnDef::new(MonitorLogs::CheckTime)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(MonitorLogs::IsChanged)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(MonitorLogs::OldContent).text())
                    .col(ColumnDef::new(MonitorLogs::NewContent).text())
                    .col(ColumnDef::new(MonitorLogs::ErrorMessage).text())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_monitor_logs_task")
                            .from(MonitorLogs::Table, MonitorLogs::TaskId)
                            .to(MonitorTasks::Table, MonitorTasks::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Log listing is always per task, newest first
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_monitor_logs_task_time")
                    .table(MonitorLogs::Table)
                    .col(MonitorLogs::TaskId)
                    .col(MonitorLogs::CheckTime)
                    .to_owned(),
            )
            .await?;

        // Create subscriptions table
        manager
            .create_table(
                Table::create()
                    .table(Subscriptions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Subscriptions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Subscriptions::SubscriberId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Subscriptions::TaskId).integer().not_null())
                    .col(
                        ColumnDef::new(Subscriptions::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Subscriptions::EmailConfigId).integer())
                    .col(
                        ColumnDef::new(Subscriptions::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscriptions_task")
                            .from(Subscriptions::Table, Subscriptions::TaskId)
                            .to(MonitorTasks::Table, MonitorTasks::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscriptions_email_config")
                            .from(Subscriptions::Table, Subscriptions::EmailConfigId)
                            .to(EmailConfigs::Table, EmailConfigs::Id)
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::NoAction),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_subscriptions_subscriber_task")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::SubscriberId)
                    .col(Subscriptions::TaskId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create blacklist_domains table
        manager
            .create_table(
                Table::create()
                    .table(BlacklistDomains::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BlacklistDomains::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(BlacklistDomains::Domain)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(BlacklistDomains::Description).string())
                    .col(
                        ColumnDef::new(BlacklistDomains::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(BlacklistDomains::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BlacklistDomains::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Subscriptions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MonitorLogs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MonitorTasks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EmailConfigs::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum EmailConfigs {
    Table,
    Id,
    OwnerId,
    Name,
    SmtpServer,
    SmtpPort,
    SmtpUser,
    SmtpPassword,
    ReceiverEmail,
    IsSsl,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MonitorTasks {
    Table,
    Id,
    OwnerId,
    OwnerName,
    Name,
    Url,
    Selector,
    IntervalSeconds,
    IsActive,
    IsPublic,
    EmailConfigId,
    LastCheck,
    LastContentHash,
    LastContent,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MonitorLogs {
    Table,
    Id,
    TaskId,
    CheckTime,
    IsChanged,
    OldContent,
    NewContent,
    ErrorMessage,
}

#[derive(DeriveIden)]
enum Subscriptions {
    Table,
    Id,
    SubscriberId,
    TaskId,
    IsActive,
    EmailConfigId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum BlacklistDomains {
    Table,
    Id,
    Domain,
    Description,
    IsActive,
    CreatedAt,
}
