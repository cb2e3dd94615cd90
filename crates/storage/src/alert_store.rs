use chrono::Utc;
use fraud_watch_domain::model::{AlertRule, NewAlertRule};
use fraud_watch_domain::storage::{AlertRuleStore, StorageError, StorageResult};
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::entity::alerts;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl AlertRuleStore for SeaOrmStorage {
    async fn list_active_alert_rules(&self) -> StorageResult<Vec<AlertRule>> {
        let models = alerts::Entity::find()
            .filter(alerts::Column::DeletedAt.is_null())
            .order_by_asc(alerts::Column::Id)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(models.into_iter().map(alert_to_rule).collect())
    }

    async fn lookup_owner_user_id(&self, address: &str) -> StorageResult<Option<i64>> {
        let maybe = alerts::Entity::find()
            .filter(alerts::Column::WalletId.eq(address))
            .filter(alerts::Column::DeletedAt.is_null())
            .order_by_asc(alerts::Column::Id)
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(|model| model.user_id))
    }

    async fn insert_alert_rule(&self, rule: NewAlertRule) -> StorageResult<AlertRule> {
        let model = alerts::ActiveModel {
            user_id: Set(rule.user_id),
            alert_name: Set(rule.alert_name),
            rule_type: Set(rule.rule_type),
            wallet_id: Set(rule.wallet_id),
            notification_preferences: Set(rule.notification_preferences),
            created_at: Set(Utc::now()),
            deleted_at: Set(None),
            ..Default::default()
        };
        let created = model
            .insert(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(alert_to_rule(created))
    }

    async fn deactivate_alert_rule(&self, id: i64) -> StorageResult<bool> {
        let id = i32::try_from(id).map_err(StorageError::from_source)?;
        let result = alerts::Entity::update_many()
            .col_expr(alerts::Column::DeletedAt, Expr::value(Utc::now()))
            .filter(alerts::Column::Id.eq(id))
            .filter(alerts::Column::DeletedAt.is_null())
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(result.rows_affected > 0)
    }
}

fn alert_to_rule(model: alerts::Model) -> AlertRule {
    AlertRule {
        id: i64::from(model.id),
        user_id: model.user_id,
        alert_name: model.alert_name,
        wallet_id: model.wallet_id,
        rule_type: model.rule_type,
        created_at: model.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> SeaOrmStorage {
        SeaOrmStorage::connect("sqlite::memory:")
            .await
            .expect("storage inits")
    }

    fn rule(user_id: i64, wallet: &str, rule_type: &str) -> NewAlertRule {
        NewAlertRule {
            user_id,
            alert_name: format!("{rule_type} on {wallet}"),
            wallet_id: wallet.to_string(),
            rule_type: rule_type.to_string(),
            notification_preferences: Some(r#"["ops@example.com"]"#.to_string()),
        }
    }

    #[tokio::test]
    async fn lists_only_active_rules_in_creation_order() {
        let storage = storage().await;
        let first = storage
            .insert_alert_rule(rule(1, "GA", "highFailureRate"))
            .await
            .unwrap();
        let second = storage
            .insert_alert_rule(rule(2, "GB", "doubleSpend"))
            .await
            .unwrap();

        assert!(storage.deactivate_alert_rule(first.id).await.unwrap());
        assert!(!storage.deactivate_alert_rule(first.id).await.unwrap());

        let active = storage.list_active_alert_rules().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
        assert_eq!(active[0].wallet_id, "GB");
        assert_eq!(active[0].rule_type, "doubleSpend");
    }

    #[tokio::test]
    async fn owner_lookup_uses_oldest_active_rule() {
        let storage = storage().await;
        let oldest = storage
            .insert_alert_rule(rule(10, "GA", "highFailureRate"))
            .await
            .unwrap();
        storage
            .insert_alert_rule(rule(20, "GA", "doubleSpend"))
            .await
            .unwrap();

        assert_eq!(storage.lookup_owner_user_id("GA").await.unwrap(), Some(10));
        storage.deactivate_alert_rule(oldest.id).await.unwrap();
        assert_eq!(storage.lookup_owner_user_id("GA").await.unwrap(), Some(20));
        assert_eq!(storage.lookup_owner_user_id("GZ").await.unwrap(), None);
    }
}
