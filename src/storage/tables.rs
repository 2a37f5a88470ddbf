use redb::TableDefinition;

/// Durable tokens: storage key (`access_token`, `refresh_token`) -> token value
pub const TOKENS: TableDefinition<&str, &str> = TableDefinition::new("tokens");
