use serde_json::Value;

use crate::error::{ClientError, Result};

/// One page of a ranked feed, in server order.
#[derive(Debug)]
pub struct FeedPage {
    pub entries: Vec<FeedEntry>,
    pub has_more: bool,
    pub next_offset: Option<u64>,
}

/// A single feed listing entry. The raw payload is retained verbatim for
/// snapshotting; only the fields the engine routes on are extracted.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub id: String,
    pub comment_count: i64,
    pub raw: Value,
}

/// A post detail response: the post record plus its complete nested reply
/// forest. There is no separate paged comment endpoint.
#[derive(Debug)]
pub struct PostDetail {
    pub post: Value,
    pub comments: Vec<Value>,
}

impl FeedPage {
    pub(crate) fn from_value(body: Value) -> Result<Self> {
        let posts = body
            .get("posts")
            .or_else(|| body.get("data"))
            .and_then(Value::as_array)
            .ok_or_else(|| ClientError::Malformed("feed response missing posts array".into()))?;

        // Entries without an id cannot be fetched or keyed; drop them.
        let entries = posts
            .iter()
            .filter_map(|p| {
                let id = p.get("id").and_then(Value::as_str)?;
                Some(FeedEntry {
                    id: id.to_string(),
                    comment_count: p.get("comment_count").and_then(Value::as_i64).unwrap_or(0),
                    raw: p.clone(),
                })
            })
            .collect();

        Ok(FeedPage {
            entries,
            has_more: body.get("has_more").and_then(Value::as_bool).unwrap_or(false),
            next_offset: body.get("next_offset").and_then(Value::as_u64),
        })
    }
}

impl PostDetail {
    pub(crate) fn from_value(body: Value) -> Result<Self> {
        // Shape: {"success": true, "post": {...}, "comments": [...]} — but the
        // post object has been observed at top level too.
        let post = body.get("post").cloned().unwrap_or_else(|| body.clone());
        if post.get("id").and_then(Value::as_str).is_none() {
            return Err(ClientError::Malformed(
                "post detail missing post object with id".into(),
            ));
        }

        let comments = body
            .get("comments")
            .or_else(|| post.get("comments"))
            .or_else(|| post.get("comment_tree"));
        let comments = match comments {
            Some(Value::Array(nodes)) => nodes.clone(),
            // A lone reply object arrives unwrapped on single-comment posts.
            Some(node @ Value::Object(_)) => vec![node.clone()],
            _ => Vec::new(),
        };

        Ok(PostDetail { post, comments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn feed_page_parses_posts_and_paging() {
        let page = FeedPage::from_value(json!({
            "posts": [
                {"id": "p1", "comment_count": 5, "title": "one"},
                {"title": "no id, dropped"},
                {"id": "p2"},
            ],
            "has_more": true,
            "next_offset": 50,
        }))
        .unwrap();

        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].id, "p1");
        assert_eq!(page.entries[0].comment_count, 5);
        assert_eq!(page.entries[1].comment_count, 0);
        assert!(page.has_more);
        assert_eq!(page.next_offset, Some(50));
    }

    #[test]
    fn feed_page_without_posts_array_is_malformed() {
        let err = FeedPage::from_value(json!({"error": "nope"})).unwrap_err();
        assert!(matches!(err, ClientError::Malformed(_)));
    }

    #[test]
    fn post_detail_unwraps_envelope() {
        let detail = PostDetail::from_value(json!({
            "success": true,
            "post": {"id": "p1", "title": "t"},
            "comments": [{"id": "c1"}],
        }))
        .unwrap();

        assert_eq!(detail.post["id"], "p1");
        assert_eq!(detail.comments.len(), 1);
    }

    #[test]
    fn post_detail_accepts_top_level_post() {
        let detail =
            PostDetail::from_value(json!({"id": "p1", "comment_tree": {"id": "c1"}})).unwrap();
        assert_eq!(detail.post["id"], "p1");
        assert_eq!(detail.comments.len(), 1);
    }

    #[test]
    fn post_detail_without_id_is_malformed() {
        let err = PostDetail::from_value(json!({"post": {"title": "no id"}})).unwrap_err();
        assert!(matches!(err, ClientError::Malformed(_)));
    }
}
