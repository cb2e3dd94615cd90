use fraud_watch_domain::model::{FraudFinding, FraudFindingRecord};
use fraud_watch_domain::storage::{FindingStore, StorageError, StorageResult};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::entity::fraud_activities;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl FindingStore for SeaOrmStorage {
    async fn create_fraud_finding(
        &self,
        finding: &FraudFinding,
    ) -> StorageResult<FraudFindingRecord> {
        let hashes =
            serde_json::to_string(&finding.transaction_hashes).map_err(StorageError::from_source)?;
        let failure_count =
            i32::try_from(finding.failure_count).map_err(StorageError::from_source)?;
        let model = fraud_activities::ActiveModel {
            account: Set(finding.account.clone()),
            kind: Set(finding.kind.to_string()),
            failure_count: Set(failure_count),
            transaction_hashes: Set(hashes),
            created_at: Set(finding.created_at),
            ..Default::default()
        };
        let created = model
            .insert(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        finding_to_record(created)
    }

    async fn list_fraud_findings(&self, account: &str) -> StorageResult<Vec<FraudFindingRecord>> {
        let models = fraud_activities::Entity::find()
            .filter(fraud_activities::Column::Account.eq(account))
            .order_by_asc(fraud_activities::Column::Id)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        models.into_iter().map(finding_to_record).collect()
    }
}

fn finding_to_record(model: fraud_activities::Model) -> StorageResult<FraudFindingRecord> {
    let transaction_hashes: Vec<String> =
        serde_json::from_str(&model.transaction_hashes).map_err(StorageError::from_source)?;
    let failure_count = u32::try_from(model.failure_count).map_err(StorageError::from_source)?;

    Ok(FraudFindingRecord {
        id: i64::from(model.id),
        account: model.account,
        kind: model.kind,
        failure_count,
        transaction_hashes,
        created_at: model.created_at,
    })
}
