//! Node identity resolution.
//!
//! Nodes are discovered incidentally through traffic: the first position,
//! message, telemetry, or traceroute that mentions an id creates a minimal
//! row (numeric identity only), and a later node-info announcement
//! enriches that same row in place. Lookup order is `long_id` first, then
//! `short_id` — a zero `long_id` is treated as unknown and never looked up
//! or stored.
//!
//! Resolution is race-free because the dispatcher processes one event at a
//! time; the UNIQUE constraints on `long_id`/`short_id` make any future
//! concurrent caller fail closed instead of duplicating.

use crate::store::{self, NewNode, Node};
use crate::Result;
use sqlx::SqliteConnection;
use tracing::info;

/// Look up a node by numeric identity, falling back to the short id.
pub async fn find_by_identity(
    conn: &mut SqliteConnection,
    long_id: i64,
    short_id: Option<&str>,
) -> Result<Option<Node>> {
    if long_id != 0 {
        if let Some(node) = store::find_node_by_long_id(conn, long_id).await? {
            return Ok(Some(node));
        }
    }
    if let Some(short_id) = short_id {
        if let Some(node) = store::find_node_by_short_id(conn, short_id).await? {
            return Ok(Some(node));
        }
    }
    Ok(None)
}

/// Find the node for the given identity fragments, creating a minimal row
/// when nothing matches. The insert happens inside the caller's
/// transaction, so the returned surrogate id is immediately usable by
/// dependent inserts.
pub async fn resolve_or_create(
    conn: &mut SqliteConnection,
    long_id: i64,
    short_id: Option<&str>,
) -> Result<Node> {
    if let Some(node) = find_by_identity(conn, long_id, short_id).await? {
        return Ok(node);
    }
    let new = NewNode {
        long_id: (long_id != 0).then_some(long_id),
        short_id,
        ..NewNode::default()
    };
    let node = store::insert_node(conn, &new).await?;
    info!("Created minimal node entry for long_id {}", long_id);
    Ok(node)
}

/// Announced identity fields from a node-info event.
#[derive(Debug, Clone, Copy)]
pub struct NodeFields<'a> {
    pub short_id: Option<&'a str>,
    pub long_name: Option<&'a str>,
    pub short_name: Option<&'a str>,
    pub role: &'a str,
    pub hw_model: Option<&'a str>,
    pub is_unmessagable: bool,
}

/// Compare announced fields against the stored row, persisting a single
/// update when anything differs. Returns whether a write happened —
/// repeated identical announcements cause none.
pub async fn reconcile(
    conn: &mut SqliteConnection,
    node: &mut Node,
    fields: &NodeFields<'_>,
) -> Result<bool> {
    let mut changed = false;

    if node.long_name.as_deref() != fields.long_name {
        node.long_name = fields.long_name.map(str::to_owned);
        changed = true;
    }
    if node.short_name.as_deref() != fields.short_name {
        node.short_name = fields.short_name.map(str::to_owned);
        changed = true;
    }
    if node.short_id.as_deref() != fields.short_id {
        node.short_id = fields.short_id.map(str::to_owned);
        changed = true;
    }
    if node.role.as_deref() != Some(fields.role) {
        node.role = Some(fields.role.to_owned());
        changed = true;
    }
    if node.hw_model.as_deref() != fields.hw_model {
        node.hw_model = fields.hw_model.map(str::to_owned);
        changed = true;
    }
    if node.is_unmessagable != fields.is_unmessagable {
        node.is_unmessagable = fields.is_unmessagable;
        changed = true;
    }

    if changed {
        store::update_node(conn, node).await?;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use sqlx::Row;

    async fn test_db() -> Database {
        let db = Database::open("sqlite::memory:").await.unwrap();
        db.init_schema().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_resolve_creates_then_reuses() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let first = resolve_or_create(&mut conn, 42, None).await.unwrap();
        let second = resolve_or_create(&mut conn, 42, None).await.unwrap();
        assert_eq!(first.id, second.id);

        // Release the single pooled connection before counting through it.
        drop(conn);
        let row = sqlx::query("SELECT COUNT(*) AS n FROM nodes")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 1);
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_short_id() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let created = store::insert_node(
            &mut conn,
            &crate::store::NewNode {
                short_id: Some("!cafe0001"),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // No long_id on file: the numeric lookup misses, the short id hits.
        let resolved = resolve_or_create(&mut conn, 77, Some("!cafe0001"))
            .await
            .unwrap();
        assert_eq!(resolved.id, created.id);
    }

    #[tokio::test]
    async fn test_resolve_ignores_zero_long_id() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let node = resolve_or_create(&mut conn, 0, Some("!cafe0002"))
            .await
            .unwrap();
        assert_eq!(node.long_id, None);
        assert_eq!(node.short_id.as_deref(), Some("!cafe0002"));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let mut node = resolve_or_create(&mut conn, 42, None).await.unwrap();
        let fields = NodeFields {
            short_id: Some("!deadbeef"),
            long_name: Some("Base Station"),
            short_name: Some("BASE"),
            role: "CLIENT",
            hw_model: Some("TBEAM"),
            is_unmessagable: false,
        };

        assert!(reconcile(&mut conn, &mut node, &fields).await.unwrap());
        assert!(!reconcile(&mut conn, &mut node, &fields).await.unwrap());

        let stored = store::find_node_by_long_id(&mut conn, 42)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.long_name.as_deref(), Some("Base Station"));
        assert_eq!(stored.role.as_deref(), Some("CLIENT"));
    }

    #[tokio::test]
    async fn test_reconcile_updates_single_field() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let mut node = resolve_or_create(&mut conn, 42, None).await.unwrap();
        let mut fields = NodeFields {
            short_id: None,
            long_name: Some("North Repeater"),
            short_name: None,
            role: "REPEATER",
            hw_model: None,
            is_unmessagable: false,
        };
        assert!(reconcile(&mut conn, &mut node, &fields).await.unwrap());

        fields.is_unmessagable = true;
        assert!(reconcile(&mut conn, &mut node, &fields).await.unwrap());

        let stored = store::find_node_by_long_id(&mut conn, 42)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_unmessagable);
        assert_eq!(stored.long_name.as_deref(), Some("North Repeater"));
    }
}
