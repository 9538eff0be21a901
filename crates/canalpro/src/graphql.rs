//! GraphQL documents and response envelope of the Gandalf API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CanalProError;

const LISTING_FIELDS: &str = "id status updatedAt externalCode title description businessType \
unitType usageType publicationType \
address { street streetNumber complement neighborhood city state zipCode latitude longitude visibility } \
pricingInfos { businessType price monthlyCondoFee yearlyIptu } \
bedrooms suites bathrooms parkingSpaces usableAreas totalAreas floor amenities \
images { url caption order } floorPlans { url caption order } videoUrls";

pub const LOGIN: &str = "mutation Login($email: String!, $password: String!) { \
login(email: $email, password: $password) { accessToken refreshToken expiresIn } }";

pub const REFRESH_TOKEN: &str = "mutation RefreshToken($refreshToken: String!) { \
refreshToken(refreshToken: $refreshToken) { accessToken refreshToken expiresIn } }";

pub const CREATE_LISTING: &str = "mutation CreateListing($input: ListingInput!) { \
createListing(input: $input) { id } }";

pub const UPDATE_LISTING: &str = "mutation UpdateListing($id: ID!, $input: ListingInput!) { \
updateListing(id: $id, input: $input) { id } }";

pub const DELETE_LISTING: &str = "mutation DeleteListing($id: ID!) { deleteListing(id: $id) }";

pub const REPUBLISH_LISTING: &str = "mutation RepublishListing($id: ID!) { \
republishListing(id: $id) { id updatedAt } }";

pub fn get_listing() -> String {
    format!("query Listing($id: ID!) {{ listing(id: $id) {{ {LISTING_FIELDS} }} }}")
}

pub fn list_listings() -> String {
    format!(
        "query Listings($page: Int!, $pageSize: Int!) {{ listings(page: $page, pageSize: $pageSize) \
{{ page pageSize totalCount items {{ {LISTING_FIELDS} }} }} }}"
    )
}

/// Request body: `{ "query": ..., "variables": ... }`.
#[derive(Debug, Serialize)]
pub struct GraphQlRequest<'a> {
    pub query: &'a str,
    pub variables: Value,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default)]
    pub extensions: Option<GraphQlErrorExtensions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlErrorExtensions {
    #[serde(default)]
    pub code: Option<String>,
}

/// Token payload returned by `login` / `refreshToken`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds.
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
pub struct IdPayload {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepublishPayload {
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const UNAUTHENTICATED_CODES: &[&str] = &["UNAUTHENTICATED", "UNAUTHORIZED", "FORBIDDEN", "TOKEN_EXPIRED"];

impl GraphQlError {
    fn code(&self) -> Option<&str> {
        self.extensions.as_ref().and_then(|e| e.code.as_deref())
    }

    pub fn is_unauthenticated(&self) -> bool {
        if let Some(code) = self.code() {
            return UNAUTHENTICATED_CODES.contains(&code);
        }
        let msg = self.message.to_ascii_lowercase();
        msg.contains("unauthorized") || msg.contains("unauthenticated") || msg.contains("token expired")
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some("NOT_FOUND")
    }
}

impl GraphQlResponse {
    /// Extract `data.<field>` or map `errors[]` to a client error.
    pub fn into_field(self, field: &str) -> Result<Value, CanalProError> {
        if !self.errors.is_empty() {
            let message = self
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            if self.errors.iter().any(GraphQlError::is_unauthenticated) {
                return Err(CanalProError::Unauthorized(message));
            }
            if self.errors.iter().any(GraphQlError::is_not_found) {
                return Err(CanalProError::NotFound(message));
            }
            return Err(CanalProError::GraphQl(message));
        }
        self.data
            .and_then(|mut d| d.get_mut(field).map(Value::take))
            .ok_or_else(|| CanalProError::Decode(format!("missing data.{field}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> GraphQlResponse {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn extracts_field() {
        let r = parse(json!({"data": {"createListing": {"id": "L1"}}}));
        assert_eq!(r.into_field("createListing").unwrap(), json!({"id": "L1"}));
    }

    #[test]
    fn unauthenticated_code_maps_to_unauthorized() {
        let r = parse(json!({"errors": [{"message": "jwt expired", "extensions": {"code": "UNAUTHENTICATED"}}]}));
        assert!(matches!(r.into_field("x"), Err(CanalProError::Unauthorized(_))));

        let r = parse(json!({"errors": [{"message": "Unauthorized"}]}));
        assert!(matches!(r.into_field("x"), Err(CanalProError::Unauthorized(_))));
    }

    #[test]
    fn other_errors_are_graphql_or_not_found() {
        let r = parse(json!({"errors": [{"message": "no such listing", "extensions": {"code": "NOT_FOUND"}}]}));
        assert!(matches!(r.into_field("x"), Err(CanalProError::NotFound(_))));

        let r = parse(json!({"errors": [{"message": "a"}, {"message": "b"}], "data": null}));
        assert_eq!(r.into_field("x"), Err(CanalProError::GraphQl("a; b".into())));

        let r = parse(json!({"data": {}}));
        assert!(matches!(r.into_field("x"), Err(CanalProError::Decode(_))));
    }
}
