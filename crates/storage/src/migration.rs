use sea_orm::sea_query::{ColumnDef, Index, IndexCreateStatement, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::{alerts, fraud_activities};
use fraud_watch_domain::storage::{StorageError, StorageResult};

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let alerts_table = Table::create()
        .if_not_exists()
        .table(alerts::Entity)
        .col(
            ColumnDef::new(alerts::Column::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(alerts::Column::UserId)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(alerts::Column::AlertName)
                .string_len(255)
                .not_null(),
        )
        .col(
            ColumnDef::new(alerts::Column::RuleType)
                .string_len(50)
                .not_null(),
        )
        .col(
            ColumnDef::new(alerts::Column::WalletId)
                .string_len(255)
                .not_null(),
        )
        .col(
            ColumnDef::new(alerts::Column::NotificationPreferences)
                .text()
                .null(),
        )
        .col(
            ColumnDef::new(alerts::Column::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(alerts::Column::DeletedAt)
                .timestamp_with_time_zone()
                .null(),
        )
        .to_owned();
    create_table(db, backend, alerts_table).await?;

    let wallet_index = Index::create()
        .if_not_exists()
        .name("idx_alerts_wallet_id")
        .table(alerts::Entity)
        .col(alerts::Column::WalletId)
        .to_owned();
    create_index(db, backend, wallet_index).await?;

    let fraud_table = Table::create()
        .if_not_exists()
        .table(fraud_activities::Entity)
        .col(
            ColumnDef::new(fraud_activities::Column::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(fraud_activities::Column::Account)
                .string_len(100)
                .not_null(),
        )
        .col(
            ColumnDef::new(fraud_activities::Column::Kind)
                .string_len(50)
                .not_null(),
        )
        .col(
            ColumnDef::new(fraud_activities::Column::FailureCount)
                .integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(fraud_activities::Column::TransactionHashes)
                .text()
                .not_null(),
        )
        .col(
            ColumnDef::new(fraud_activities::Column::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, fraud_table).await?;

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}

async fn create_index(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    statement: IndexCreateStatement,
) -> StorageResult<()> {
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}
