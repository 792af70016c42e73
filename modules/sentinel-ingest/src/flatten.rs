//! Flattening of nested comment forests into persistence-ready rows.
//!
//! The API returns each post's comments as a forest of nested reply trees.
//! Flattening walks every root in feed order, pre-order within each tree,
//! and supports early termination at a previously-seen comment id so repeat
//! visits stop at already-ingested content instead of re-walking the whole
//! thread.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use sentinel_common::{parse_timestamp, Comment};

/// Result of one flatten pass over a post's comment forest.
#[derive(Debug, Default)]
pub struct FlattenedComments {
    /// Rows in traversal order, deduplicated by id.
    pub comments: Vec<Comment>,
    /// Id of the first node observed in traversal, i.e. the newest
    /// top-of-thread comment. Recorded even when it equals the stop id.
    pub newest_id: Option<String>,
    pub newest_created_at: Option<DateTime<Utc>>,
}

/// Flatten a comment forest for `post_id`, halting a branch when `stop_id`
/// is reached.
///
/// Hitting the stop id abandons that root's remaining subtree but keeps
/// walking the other roots: sibling threads may hold replies newer than the
/// cursor. Nodes without an id are skipped, their children with them.
/// Duplicate ids keep the first occurrence.
pub fn flatten_comments(
    nodes: &[Value],
    post_id: &str,
    stop_id: Option<&str>,
) -> FlattenedComments {
    let mut out = FlattenedComments::default();
    let mut seen: HashSet<String> = HashSet::new();

    for root in nodes {
        // LIFO work list per root; children pushed reversed for pre-order.
        let mut work: Vec<(&Value, Option<String>)> = vec![(root, None)];

        'branch: while let Some((node, parent_id)) = work.pop() {
            let Some(id) = node.get("id").and_then(Value::as_str) else {
                continue;
            };

            if out.newest_id.is_none() {
                out.newest_id = Some(id.to_string());
                out.newest_created_at = parse_timestamp(node.get("created_at"));
            }

            if stop_id == Some(id) {
                break 'branch;
            }

            if seen.insert(id.to_string()) {
                if let Some(mut comment) = Comment::from_node(node, post_id) {
                    comment.parent_id = parent_id.clone();
                    out.comments.push(comment);
                }
            }

            for child in replies(node).iter().rev() {
                work.push((child, Some(id.to_string())));
            }
        }
    }

    out
}

/// Nested replies live under `replies` on most endpoints and `children` on
/// older ones.
fn replies(node: &Value) -> &[Value] {
    node.get("replies")
        .or_else(|| node.get("children"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, created_at: &str, replies: Vec<Value>) -> Value {
        json!({
            "id": id,
            "author": format!("agent-{id}"),
            "content": format!("body of {id}"),
            "created_at": created_at,
            "replies": replies,
        })
    }

    fn forest() -> Vec<Value> {
        // c5 (newest root)
        //   c4
        // c3
        //   c2
        // c1 (oldest root)
        vec![
            node("c5", "2026-02-01T10:00:00Z", vec![node("c4", "2026-02-01T10:05:00Z", vec![])]),
            node("c3", "2026-01-31T09:00:00Z", vec![node("c2", "2026-01-31T09:30:00Z", vec![])]),
            node("c1", "2026-01-30T08:00:00Z", vec![]),
        ]
    }

    #[test]
    fn full_flatten_is_preorder_across_roots() {
        let out = flatten_comments(&forest(), "p1", None);
        let ids: Vec<&str> = out.comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c5", "c4", "c3", "c2", "c1"]);
        assert_eq!(out.newest_id.as_deref(), Some("c5"));
        assert_eq!(
            out.newest_created_at,
            parse_timestamp(Some(&json!("2026-02-01T10:00:00Z")))
        );
    }

    #[test]
    fn stop_id_halts_its_branch_but_later_roots_continue() {
        // Stopping at c3 must drop c3 and its reply c2, yet still reach c1.
        let out = flatten_comments(&forest(), "p1", Some("c3"));
        let ids: Vec<&str> = out.comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c5", "c4", "c1"]);
    }

    #[test]
    fn newest_id_recorded_even_when_it_is_the_stop_id() {
        let out = flatten_comments(&forest(), "p1", Some("c5"));
        assert!(out.comments.iter().all(|c| c.id != "c5" && c.id != "c4"));
        assert_eq!(out.newest_id.as_deref(), Some("c5"));
    }

    #[test]
    fn stop_inside_subtree_abandons_rest_of_that_root() {
        let nodes = vec![node(
            "r1",
            "2026-02-01T10:00:00Z",
            vec![
                node("a", "2026-02-01T10:01:00Z", vec![node("a1", "2026-02-01T10:02:00Z", vec![])]),
                node("b", "2026-02-01T10:03:00Z", vec![]),
            ],
        )];
        // Stop at "a": its subtree (a1) and the rest of r1's queued branch
        // (b) are abandoned together.
        let out = flatten_comments(&nodes, "p1", Some("a"));
        let ids: Vec<&str> = out.comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["r1"]);
    }

    #[test]
    fn duplicate_ids_keep_first_occurrence() {
        let nodes = vec![
            node("c1", "2026-02-01T10:00:00Z", vec![]),
            node("c1", "2026-02-01T11:00:00Z", vec![]),
        ];
        let out = flatten_comments(&nodes, "p1", None);
        assert_eq!(out.comments.len(), 1);
    }

    #[test]
    fn idless_nodes_and_their_children_are_skipped() {
        let nodes = vec![
            json!({"content": "no id", "replies": [node("orphan", "2026-02-01T10:00:00Z", vec![])]}),
            node("c1", "2026-02-01T09:00:00Z", vec![]),
        ];
        let out = flatten_comments(&nodes, "p1", None);
        let ids: Vec<&str> = out.comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1"]);
    }

    #[test]
    fn children_alias_is_honored() {
        let nodes = vec![json!({
            "id": "r1",
            "created_at": "2026-02-01T10:00:00Z",
            "children": [node("c1", "2026-02-01T10:01:00Z", vec![])],
        })];
        let out = flatten_comments(&nodes, "p1", None);
        let ids: Vec<&str> = out.comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "c1"]);
        assert_eq!(out.comments[1].parent_id.as_deref(), Some("r1"));
    }

    #[test]
    fn parent_ids_follow_nesting_not_payload() {
        let mut child = node("c2", "2026-02-01T10:01:00Z", vec![]);
        child["parent_id"] = json!("bogus");
        let nodes = vec![node("c1", "2026-02-01T10:00:00Z", vec![child])];
        let out = flatten_comments(&nodes, "p1", None);
        assert_eq!(out.comments[0].parent_id, None);
        assert_eq!(out.comments[1].parent_id.as_deref(), Some("c1"));
    }
}
