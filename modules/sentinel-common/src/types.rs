use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A scraped post. `comment_count` and `last_comment_at` are the API's own
/// claims and are known to drift from reality — they are freshness hints,
/// never ground truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub submolt_name: Option<String>,
    pub author_name: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
    pub upvotes: i64,
    pub downvotes: i64,
    pub comment_count: i64,
    pub last_comment_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub raw: Value,
}

/// A scraped comment. `parent_id` always refers to a comment under the same
/// post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub parent_id: Option<String>,
    pub author_name: Option<String>,
    pub content: Option<String>,
    pub upvotes: i64,
    pub downvotes: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub raw: Value,
}

/// An agent profile. Created lazily on first observation as an author.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub description: Option<String>,
    pub karma: i64,
    pub follower_count: i64,
    pub following_count: i64,
    pub is_claimed: bool,
    pub is_active: bool,
    pub owner_x_handle: Option<String>,
    pub owner_x_name: Option<String>,
    pub owner_x_avatar: Option<String>,
    pub owner_x_bio: Option<String>,
    pub owner_x_follower_count: Option<i64>,
    pub owner_x_following_count: Option<i64>,
    pub owner_x_verified: bool,
    pub last_active_at: Option<DateTime<Utc>>,
    pub raw: Value,
}

/// Durable per-source resumption state. One row per logical stream, e.g.
/// `feed:hot` or `comments:<post-id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestCursor {
    pub source: String,
    pub cursor: Option<String>,
    pub last_seen_id: Option<String>,
    pub last_seen_created_at: Option<DateTime<Utc>>,
}

impl IngestCursor {
    pub fn comments_source(post_id: &str) -> String {
        format!("comments:{post_id}")
    }

    pub fn feed_source(feed_type: &str) -> String {
        format!("feed:{feed_type}")
    }
}

/// Authors arrive either as a bare string or an object with name/username.
pub fn parse_author_name(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("name")
            .or_else(|| map.get("username"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

pub fn parse_timestamp(v: Option<&Value>) -> Option<DateTime<Utc>> {
    v.and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn int_or_zero(v: Option<&Value>) -> i64 {
    v.and_then(Value::as_i64).unwrap_or(0)
}

fn opt_str(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str).map(str::to_string)
}

impl Post {
    /// Build a post row from a detail payload. The id comes from the feed,
    /// never from the payload.
    pub fn from_api(post_id: &str, data: &Value) -> Self {
        let submolt_name = data
            .get("submolt")
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| opt_str(data.get("submolt_name")));

        Self {
            id: post_id.to_string(),
            submolt_name,
            author_name: parse_author_name(data.get("author").or_else(|| data.get("author_name"))),
            title: opt_str(data.get("title")),
            content: opt_str(data.get("content")),
            url: opt_str(data.get("url")),
            upvotes: int_or_zero(data.get("upvotes")),
            downvotes: int_or_zero(data.get("downvotes")),
            comment_count: int_or_zero(data.get("comment_count")),
            last_comment_at: parse_timestamp(data.get("last_comment_at")),
            created_at: parse_timestamp(data.get("created_at")),
            updated_at: parse_timestamp(data.get("updated_at")),
            raw: data.clone(),
        }
    }
}

impl Comment {
    /// Build a comment row from one node of the reply tree. Nodes without
    /// an id cannot be keyed and yield `None`.
    pub fn from_node(node: &Value, post_id: &str) -> Option<Self> {
        let id = node.get("id").and_then(Value::as_str)?;
        Some(Self {
            id: id.to_string(),
            post_id: post_id.to_string(),
            parent_id: opt_str(node.get("parent_id")),
            author_name: parse_author_name(node.get("author").or_else(|| node.get("author_name"))),
            content: opt_str(node.get("content")),
            upvotes: int_or_zero(node.get("upvotes")),
            downvotes: int_or_zero(node.get("downvotes")),
            created_at: parse_timestamp(node.get("created_at")),
            updated_at: parse_timestamp(node.get("updated_at")),
            raw: node.clone(),
        })
    }
}

impl Agent {
    /// Build an agent row from a profile payload. Profiles without a name
    /// cannot be keyed and yield `None`.
    pub fn from_profile(data: &Value) -> Option<Self> {
        let name = data.get("name").and_then(Value::as_str)?;
        if name.is_empty() {
            return None;
        }
        let owner = data.get("owner").cloned().unwrap_or(Value::Null);

        Some(Self {
            name: name.to_string(),
            description: opt_str(data.get("description")),
            karma: int_or_zero(data.get("karma")),
            follower_count: int_or_zero(data.get("follower_count")),
            following_count: int_or_zero(data.get("following_count")),
            is_claimed: data
                .get("is_claimed")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            is_active: data
                .get("is_active")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            owner_x_handle: opt_str(owner.get("x_handle")),
            owner_x_name: opt_str(owner.get("x_name")),
            owner_x_avatar: opt_str(owner.get("x_avatar")),
            owner_x_bio: opt_str(owner.get("x_bio")),
            owner_x_follower_count: owner.get("x_follower_count").and_then(Value::as_i64),
            owner_x_following_count: owner.get("x_following_count").and_then(Value::as_i64),
            owner_x_verified: owner
                .get("x_verified")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            last_active_at: parse_timestamp(
                data.get("last_active_at").or_else(|| data.get("last_active")),
            ),
            raw: data.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn author_name_from_string_or_object() {
        assert_eq!(
            parse_author_name(Some(&json!("molty"))),
            Some("molty".to_string())
        );
        assert_eq!(
            parse_author_name(Some(&json!({"name": "molty"}))),
            Some("molty".to_string())
        );
        assert_eq!(
            parse_author_name(Some(&json!({"username": "molty"}))),
            Some("molty".to_string())
        );
        assert_eq!(parse_author_name(Some(&json!({"karma": 3}))), None);
        assert_eq!(parse_author_name(Some(&json!(""))), None);
        assert_eq!(parse_author_name(None), None);
    }

    #[test]
    fn post_keeps_raw_payload_and_defaults_counters() {
        let data = json!({
            "title": "hello",
            "submolt": {"name": "general"},
            "author": {"name": "molty", "karma": 10},
            "extra_field_we_do_not_model": {"x": 1},
        });
        let post = Post::from_api("p1", &data);
        assert_eq!(post.id, "p1");
        assert_eq!(post.submolt_name, Some("general".to_string()));
        assert_eq!(post.author_name, Some("molty".to_string()));
        assert_eq!(post.upvotes, 0);
        assert_eq!(post.raw, data);
    }

    #[test]
    fn comment_without_id_is_dropped() {
        assert!(Comment::from_node(&json!({"content": "orphan"}), "p1").is_none());
    }

    #[test]
    fn agent_parses_owner_identity() {
        let agent = Agent::from_profile(&json!({
            "name": "molty",
            "karma": 42,
            "owner": {"x_handle": "@m", "x_verified": true},
        }))
        .unwrap();
        assert_eq!(agent.karma, 42);
        assert_eq!(agent.owner_x_handle, Some("@m".to_string()));
        assert!(agent.owner_x_verified);
        assert!(Agent::from_profile(&json!({"karma": 42})).is_none());
    }
}
