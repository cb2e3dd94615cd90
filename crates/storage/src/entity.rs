pub mod alerts {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "alerts")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub user_id: i64,
        pub alert_name: String,
        pub rule_type: String,
        pub wallet_id: String,
        pub notification_preferences: Option<String>,
        pub created_at: DateTimeUtc,
        /// Soft-delete marker; rules with a value here are inactive.
        pub deleted_at: Option<DateTimeUtc>,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod fraud_activities {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "fraud_activities")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub account: String,
        #[sea_orm(column_name = "type")]
        pub kind: String,
        pub failure_count: i32,
        /// JSON array of the contributing transaction hashes.
        pub transaction_hashes: String,
        pub created_at: DateTimeUtc,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
