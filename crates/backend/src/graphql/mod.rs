use std::sync::Arc;

use async_graphql::{Context, Json, Object, SimpleObject, ID};
use mapstate_shared::models::{MapState, SavedMapState};
use serde_json::{Map, Value};

use crate::storage::Storage;

// GraphQL output types

#[derive(SimpleObject)]
pub struct GqlSavedMapState {
    pub id: ID,
    pub created_at: String,
}

impl From<&SavedMapState> for GqlSavedMapState {
    fn from(s: &SavedMapState) -> Self {
        GqlSavedMapState {
            id: ID(s.id.to_string()),
            created_at: s.created_at.clone(),
        }
    }
}

#[derive(SimpleObject)]
pub struct GqlStats {
    pub total_states: u64,
    pub db_size_bytes: u64,
}

/// Normalize an incoming record into the canonical stored form.
fn canonical_record(state: Value) -> async_graphql::Result<Map<String, Value>> {
    let Value::Object(record) = state else {
        return Err(async_graphql::Error::new("Map state must be a JSON object"));
    };
    let normalized = MapState::from_record(&record);
    if normalized.is_empty() {
        return Err(async_graphql::Error::new("Map state is empty"));
    }
    Ok(normalized.to_record())
}

// Query root

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// The stored record, or null for an unknown id.
    async fn map_state(
        &self,
        ctx: &Context<'_>,
        id: ID,
    ) -> async_graphql::Result<Option<Json<Map<String, Value>>>> {
        let storage = ctx.data::<Arc<Storage>>()?;
        let state = storage.get_state(&id).map_err(async_graphql::Error::new)?;
        Ok(state.map(|s| Json(s.record)))
    }

    async fn stats(&self, ctx: &Context<'_>) -> async_graphql::Result<GqlStats> {
        let storage = ctx.data::<Arc<Storage>>()?;
        let total_states = storage.count_states().map_err(async_graphql::Error::new)?;
        let db_size_bytes = storage.db_size_bytes().map_err(async_graphql::Error::new)?;

        Ok(GqlStats {
            total_states,
            db_size_bytes,
        })
    }
}

// Mutation root

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn save_map_state(
        &self,
        ctx: &Context<'_>,
        state: Json<Value>,
    ) -> async_graphql::Result<GqlSavedMapState> {
        let storage = ctx.data::<Arc<Storage>>()?;
        let saved = SavedMapState {
            id: uuid::Uuid::new_v4(),
            record: canonical_record(state.0)?,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        storage
            .save_state(&saved)
            .map_err(async_graphql::Error::new)?;
        tracing::info!(id = %saved.id, "Saved map state");

        Ok(GqlSavedMapState::from(&saved))
    }

    async fn delete_map_state(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<bool> {
        let storage = ctx.data::<Arc<Storage>>()?;
        storage.delete_state(&id).map_err(async_graphql::Error::new)
    }
}

pub type Schema = async_graphql::Schema<QueryRoot, MutationRoot, async_graphql::EmptySubscription>;

pub fn build_schema(storage: Arc<Storage>) -> Schema {
    async_graphql::Schema::build(QueryRoot, MutationRoot, async_graphql::EmptySubscription)
        .data(storage)
        .finish()
}
