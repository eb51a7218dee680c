//! Wire types of the moim API.
//!
//! Only the fields this layer reads are declared; anything else the server
//! sends is ignored. Timestamps are kept as the server's ISO 8601 strings.

use moim_http::QueryParams;
use moim_query::Page;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: u64,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SigninBody {
    pub email: String,
    pub password: String,
}

/// Sign-in response. Deployments disagree on the field name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigninResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}
impl SigninResponse {
    pub fn token(&self) -> Option<&str> {
        [&self.token, &self.access_token].into_iter().flatten().map(String::as_str).find(|token| !token.is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupBody {
    pub email: String,
    pub password: String,
    pub name: String,
    pub company_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gathering {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub date_time: String,
    #[serde(default)]
    pub registration_end: Option<String>,
    pub location: String,
    pub participant_count: u32,
    pub capacity: u32,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub created_by: Option<u64>,
    #[serde(default)]
    pub canceled_at: Option<String>,
}

/// Filters of `GET /gatherings`. Unset fields are left out of the query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatheringsQuery {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}
impl GatheringsQuery {
    pub fn to_params(&self) -> QueryParams {
        QueryParams::new()
            .param("type", self.kind.as_ref())
            .param("location", self.location.as_ref())
            .param("date", self.date.as_ref())
            .param("createdBy", self.created_by)
            .param("sortBy", self.sort_by.as_ref())
            .param("sortOrder", self.sort_order.as_ref())
            .param("limit", self.limit)
            .param("offset", self.offset)
    }

    /// Key segment identifying this filter.
    pub fn key_segment(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewUser {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewGathering {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub date_time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: u64,
    pub score: u8,
    pub comment: String,
    pub created_at: String,
    #[serde(rename = "Gathering", default)]
    pub gathering: Option<ReviewGathering>,
    #[serde(rename = "User", default)]
    pub user: Option<ReviewUser>,
}

/// One page of `GET /reviews`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPage {
    pub data: Vec<Review>,
    pub total_item_count: usize,
    #[serde(default)]
    pub current_page: Option<usize>,
    #[serde(default)]
    pub total_pages: Option<usize>,
}
impl Page for ReviewPage {
    fn item_count(&self) -> usize {
        self.data.len()
    }

    fn total(&self) -> Option<usize> {
        Some(self.total_item_count)
    }
}

/// Filters of `GET /reviews`. Paging is added per page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gathering_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}
impl ReviewsQuery {
    pub fn to_params(&self) -> QueryParams {
        QueryParams::new()
            .param("gatheringId", self.gathering_id)
            .param("userId", self.user_id)
            .param("type", self.kind.as_ref())
            .param("location", self.location.as_ref())
            .param("sortBy", self.sort_by.as_ref())
            .param("sortOrder", self.sort_order.as_ref())
    }

    pub fn key_segment(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

/// Filters of `GET /reviews/scores`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewScoresQuery {
    pub gathering_ids: Vec<u64>,
    pub kind: Option<String>,
}
impl ReviewScoresQuery {
    fn gathering_id(&self) -> Option<String> {
        (!self.gathering_ids.is_empty())
            .then(|| self.gathering_ids.iter().map(u64::to_string).collect::<Vec<_>>().join(","))
    }

    pub fn to_params(&self) -> QueryParams {
        QueryParams::new().param("gatheringId", self.gathering_id()).param("type", self.kind.as_ref())
    }

    pub fn key_segment(&self) -> Value {
        let mut segment = serde_json::Map::new();
        if let Some(ids) = self.gathering_id() {
            segment.insert("gatheringId".into(), Value::String(ids));
        }
        if let Some(kind) = &self.kind {
            segment.insert("type".into(), Value::String(kind.clone()));
        }
        Value::Object(segment)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewScore {
    #[serde(default)]
    pub gathering_id: Option<u64>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub average_score: f64,
    #[serde(default)]
    pub one_star: u32,
    #[serde(default)]
    pub two_stars: u32,
    #[serde(default)]
    pub three_stars: u32,
    #[serde(default)]
    pub four_stars: u32,
    #[serde(default)]
    pub five_stars: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewBody {
    pub gathering_id: u64,
    pub score: u8,
    pub comment: String,
}
