use mapstate_shared::models::SourceCapabilities;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::capabilities::CapabilityFetcher;
use crate::error::FetchError;
use crate::params::MAP_STATE_ID;
use crate::reconcile::StateFetcher;

/// Build the variables JSON for a map state lookup.
pub fn build_map_state_variables(id: &str) -> Value {
    serde_json::json!({ "id": id })
}

/// Build the variables JSON for a save mutation.
pub fn build_save_variables(record: &Map<String, Value>) -> Value {
    serde_json::json!({ "state": record })
}

/// Shareable link to a persisted state: `base` with `mapStateId` as its only
/// query parameter and no fragment.
pub fn build_share_url(base: &Url, id: &str) -> Url {
    let mut url = base.clone();
    url.set_fragment(None);
    url.query_pairs_mut().clear().append_pair(MAP_STATE_ID, id);
    url
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQLResponse<T> {
    pub data: Option<T>,
    pub errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQLError {
    pub message: String,
}

/// Client for the persisted map state service.
#[derive(Debug, Clone)]
pub struct GraphQlClient {
    endpoint: String,
    http: reqwest::Client,
}

impl GraphQlClient {
    pub fn new(endpoint: &str) -> Self {
        GraphQlClient {
            endpoint: endpoint.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn query<T: DeserializeOwned>(
        &self,
        query_str: &str,
        variables: Option<Value>,
    ) -> Result<T, FetchError> {
        let req = GraphQLRequest {
            query: query_str.to_string(),
            variables,
        };

        let resp = self.http.post(&self.endpoint).json(&req).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }

        let gql_resp: GraphQLResponse<T> = resp.json().await?;

        if let Some(errors) = gql_resp.errors {
            if let Some(first) = errors.into_iter().next() {
                return Err(FetchError::GraphQl(first.message));
            }
        }

        gql_resp.data.ok_or(FetchError::NoData)
    }

    /// The stored record for `id`, or `None` when the server has none.
    pub async fn fetch_map_state(&self, id: &str) -> Result<Option<Map<String, Value>>, FetchError> {
        let resp: MapStateResponse = self
            .query(
                r#"query FetchMapState($id: ID!) { mapState(id: $id) }"#,
                Some(build_map_state_variables(id)),
            )
            .await?;
        resp.into_record()
    }

    /// Persist a record, returning its new id.
    pub async fn save_map_state(&self, record: &Map<String, Value>) -> Result<String, FetchError> {
        let resp: SaveMapStateResponse = self
            .query(
                r#"mutation SaveMapState($state: JSON!) {
                    saveMapState(state: $state) { id createdAt }
                }"#,
                Some(build_save_variables(record)),
            )
            .await?;
        tracing::info!(id = %resp.save_map_state.id, "Saved map state");
        Ok(resp.save_map_state.id)
    }
}

impl StateFetcher for GraphQlClient {
    async fn fetch_state(&self, id: &str) -> Result<Option<Map<String, Value>>, FetchError> {
        self.fetch_map_state(id).await
    }
}

// Types mirroring the GraphQL schema

#[derive(Debug, Deserialize)]
pub struct MapStateResponse {
    #[serde(rename = "mapState")]
    pub map_state: Option<Value>,
}

impl MapStateResponse {
    fn into_record(self) -> Result<Option<Map<String, Value>>, FetchError> {
        match self.map_state {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(record)) => Ok(Some(record)),
            Some(other) => Err(FetchError::Payload(format!(
                "expected an object, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedMapStateData {
    pub id: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveMapStateResponse {
    #[serde(rename = "saveMapState")]
    pub save_map_state: SavedMapStateData,
}

/// Shapes a capabilities endpoint may answer with.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CapabilityPayload {
    Listed { capabilities: Vec<String> },
    Layers { layers: Vec<String> },
    Bare(Vec<String>),
}

impl CapabilityPayload {
    /// The result is always keyed by the requested source, whatever name the
    /// endpoint reports.
    fn into_capabilities(self, source: &str) -> SourceCapabilities {
        let capabilities = match self {
            CapabilityPayload::Listed { capabilities } => capabilities,
            CapabilityPayload::Layers { layers } => layers,
            CapabilityPayload::Bare(layers) => layers,
        };
        SourceCapabilities {
            name: source.to_string(),
            capabilities,
        }
    }
}

/// Fetches capability lists over plain HTTP GET.
#[derive(Debug, Clone, Default)]
pub struct HttpCapabilityFetcher {
    http: reqwest::Client,
}

impl HttpCapabilityFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CapabilityFetcher for HttpCapabilityFetcher {
    async fn fetch_capabilities(
        &self,
        source: &str,
        url: &str,
    ) -> Result<SourceCapabilities, FetchError> {
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        let payload: CapabilityPayload = resp.json().await?;
        Ok(payload.into_capabilities(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::UrlParams;

    // --- GraphQL request serialization ---

    #[test]
    fn test_graphql_request_serializes_with_variables() {
        let req = GraphQLRequest {
            query: "query { mapState(id: $id) }".to_string(),
            variables: Some(build_map_state_variables("abc")),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["query"], "query { mapState(id: $id) }");
        assert_eq!(json["variables"]["id"], "abc");
    }

    #[test]
    fn test_graphql_request_omits_null_variables() {
        let req = GraphQLRequest {
            query: "query { stats { totalStates } }".to_string(),
            variables: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("variables").is_none());
    }

    // --- Response deserialization ---

    #[test]
    fn test_map_state_response_deserializes() {
        let json = r#"{"mapState":{"center":[1,2],"zoom":3}}"#;
        let resp: MapStateResponse = serde_json::from_str(json).unwrap();
        let record = resp.into_record().unwrap().unwrap();
        assert_eq!(record["zoom"], 3);
    }

    #[test]
    fn test_map_state_null() {
        let resp: MapStateResponse = serde_json::from_str(r#"{"mapState":null}"#).unwrap();
        assert!(resp.into_record().unwrap().is_none());
    }

    #[test]
    fn test_map_state_not_an_object() {
        let resp: MapStateResponse = serde_json::from_str(r#"{"mapState":"center=1,2"}"#).unwrap();
        assert!(matches!(resp.into_record(), Err(FetchError::Payload(_))));
    }

    #[test]
    fn test_save_response_deserializes() {
        let json = r#"{"saveMapState":{"id":"abc-123","createdAt":"2024-01-01T00:00:00Z"}}"#;
        let resp: SaveMapStateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.save_map_state.id, "abc-123");
    }

    #[test]
    fn test_graphql_error_response() {
        let json = r#"{"data":null,"errors":[{"message":"Invalid map state id"}]}"#;
        let resp: GraphQLResponse<MapStateResponse> = serde_json::from_str(json).unwrap();
        assert!(resp.data.is_none());
        assert_eq!(resp.errors.unwrap()[0].message, "Invalid map state id");
    }

    // --- Capability payloads ---

    #[test]
    fn test_capability_payload_shapes() {
        for json in [
            r#"{"name":"other","capabilities":["roads","rivers"]}"#,
            r#"{"layers":["roads","rivers"]}"#,
            r#"["roads","rivers"]"#,
        ] {
            let payload: CapabilityPayload = serde_json::from_str(json).unwrap();
            let caps = payload.into_capabilities("geoserver");
            assert_eq!(caps.name, "geoserver");
            assert_eq!(caps.capabilities, vec!["roads", "rivers"]);
        }
    }

    #[test]
    fn test_capability_payload_rejects_garbage() {
        assert!(serde_json::from_str::<CapabilityPayload>(r#"{"ok":true}"#).is_err());
    }

    // --- Variable builders ---

    #[test]
    fn test_build_save_variables() {
        let mut record = Map::new();
        record.insert("zoom".to_string(), serde_json::json!(4));
        let vars = build_save_variables(&record);
        assert_eq!(vars["state"]["zoom"], 4);
    }

    // --- URL builder ---

    #[test]
    fn test_build_share_url() {
        let base = Url::parse("http://localhost:3000").unwrap();
        assert_eq!(
            build_share_url(&base, "abc-123").as_str(),
            "http://localhost:3000/?mapStateId=abc-123"
        );

        let base = Url::parse("https://maps.example.com/viewer/?lang=sv#zoom=3").unwrap();
        assert_eq!(
            build_share_url(&base, "abc").as_str(),
            "https://maps.example.com/viewer/?mapStateId=abc"
        );
    }

    #[test]
    fn test_share_url_id_survives_parsing() {
        let base = Url::parse("https://maps.example.com/").unwrap();
        let shared = build_share_url(&base, "a b&c");
        let params = UrlParams::from_url(shared.as_str());
        assert_eq!(params.map_state_id.as_deref(), Some("a b&c"));
        assert!(params.state.is_empty());
    }
}
