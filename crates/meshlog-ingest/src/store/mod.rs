//! SQLite persistence layer.
//!
//! The store is deliberately thin: typed row records in, rows out. All
//! per-entity operations take `&mut SqliteConnection` so that every write
//! belonging to one event can share that event's transaction — the
//! normalizers call `pool.begin()`, thread the transaction through these
//! functions, and commit (or drop, rolling back) before returning.
//!
//! Schema notes:
//! - `nodes` is the ownership root; every dependent table cascades on
//!   delete/update of its node foreign key.
//! - `nodes.short_id` and `nodes.long_id` are UNIQUE, which makes
//!   find-or-create fail closed (constraint violation) rather than
//!   duplicate under redelivery.
//! - The pool holds a single connection: the pipeline is sequential by
//!   design, and it keeps `sqlite::memory:` databases coherent in tests.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::str::FromStr;
use tracing::info;

/// Schema statements executed on startup, in order.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        short_id TEXT UNIQUE,
        long_id INTEGER UNIQUE,
        long_name TEXT,
        short_name TEXT,
        role TEXT,
        hw_model TEXT,
        is_unmessagable INTEGER NOT NULL DEFAULT 0,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS positions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE ON UPDATE CASCADE,
        latitude REAL,
        longitude REAL,
        altitude INTEGER,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE ON UPDATE CASCADE,
        text TEXT,
        rx_rssi INTEGER,
        rx_snr INTEGER,
        rx_time INTEGER,
        via_mqtt INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS telemetry (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE ON UPDATE CASCADE,
        battery INTEGER,
        uptime INTEGER,
        voltage REAL,
        channel_util REAL,
        air_util_tx REAL,
        temperature REAL,
        humidity REAL,
        pressure REAL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS traceroutes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE ON UPDATE CASCADE,
        to_node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE ON UPDATE CASCADE,
        hops TEXT,
        via_mqtt INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_from_time ON messages(from_node_id, rx_time)",
    "CREATE INDEX IF NOT EXISTS idx_telemetry_node_time ON telemetry(node_id, created_at)",
];

/// Database connection pool and schema management.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at the given URL with WAL
    /// journaling and foreign keys enforced.
    pub async fn open(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create tables and indexes. Idempotent; a failure here is a startup
    /// failure, not a per-event one.
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema initialized");
        Ok(())
    }

    /// The underlying pool, for beginning per-event transactions.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// One canonical node row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: i64,
    pub short_id: Option<String>,
    pub long_id: Option<i64>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub role: Option<String>,
    pub hw_model: Option<String>,
    pub is_unmessagable: bool,
}

/// Fields for a node row about to be created.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewNode<'a> {
    pub short_id: Option<&'a str>,
    pub long_id: Option<i64>,
    pub long_name: Option<&'a str>,
    pub short_name: Option<&'a str>,
    pub role: Option<&'a str>,
    pub hw_model: Option<&'a str>,
    pub is_unmessagable: bool,
}

impl NewNode<'_> {
    /// A minimal record: only the numeric identity, pending enrichment.
    pub fn minimal(long_id: i64) -> NewNode<'static> {
        NewNode {
            long_id: Some(long_id),
            ..NewNode::default()
        }
    }
}

/// One position row about to be created.
#[derive(Debug, Clone, Copy)]
pub struct NewPosition {
    pub node_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<i64>,
}

/// One message row about to be created.
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
    pub from_node_id: i64,
    pub text: &'a str,
    pub rx_rssi: i64,
    pub rx_snr: i64,
    pub rx_time: i64,
    pub via_mqtt: bool,
}

/// One telemetry row about to be created.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewTelemetry {
    pub node_id: i64,
    pub battery: Option<i64>,
    pub uptime: Option<i64>,
    pub voltage: Option<f64>,
    pub channel_util: Option<f64>,
    pub air_util_tx: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
}

/// One traceroute row about to be created.
#[derive(Debug, Clone)]
pub struct NewTraceroute {
    pub from_node_id: i64,
    pub to_node_id: i64,
    pub hops: String,
    pub via_mqtt: bool,
}

fn node_from_row(row: &SqliteRow) -> Node {
    Node {
        id: row.get("id"),
        short_id: row.get("short_id"),
        long_id: row.get("long_id"),
        long_name: row.get("long_name"),
        short_name: row.get("short_name"),
        role: row.get("role"),
        hw_model: row.get("hw_model"),
        is_unmessagable: row.get("is_unmessagable"),
    }
}

/// Look up a node by its numeric identity.
pub async fn find_node_by_long_id(
    conn: &mut SqliteConnection,
    long_id: i64,
) -> Result<Option<Node>> {
    let row = sqlx::query(
        "SELECT id, short_id, long_id, long_name, short_name, role, hw_model, is_unmessagable
         FROM nodes WHERE long_id = ?",
    )
    .bind(long_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(node_from_row))
}

/// Look up a node by its short textual identity.
pub async fn find_node_by_short_id(
    conn: &mut SqliteConnection,
    short_id: &str,
) -> Result<Option<Node>> {
    let row = sqlx::query(
        "SELECT id, short_id, long_id, long_name, short_name, role, hw_model, is_unmessagable
         FROM nodes WHERE short_id = ?",
    )
    .bind(short_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(node_from_row))
}

/// Insert a node row and return it with its surrogate id. The id is
/// visible to subsequent statements inside the same transaction.
pub async fn insert_node(conn: &mut SqliteConnection, node: &NewNode<'_>) -> Result<Node> {
    let result = sqlx::query(
        "INSERT INTO nodes (short_id, long_id, long_name, short_name, role, hw_model, is_unmessagable)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(node.short_id)
    .bind(node.long_id)
    .bind(node.long_name)
    .bind(node.short_name)
    .bind(node.role)
    .bind(node.hw_model)
    .bind(node.is_unmessagable)
    .execute(&mut *conn)
    .await?;

    Ok(Node {
        id: result.last_insert_rowid(),
        short_id: node.short_id.map(str::to_owned),
        long_id: node.long_id,
        long_name: node.long_name.map(str::to_owned),
        short_name: node.short_name.map(str::to_owned),
        role: node.role.map(str::to_owned),
        hw_model: node.hw_model.map(str::to_owned),
        is_unmessagable: node.is_unmessagable,
    })
}

/// Persist the mutable fields of an existing node row.
pub async fn update_node(conn: &mut SqliteConnection, node: &Node) -> Result<()> {
    sqlx::query(
        "UPDATE nodes SET short_id = ?, long_name = ?, short_name = ?, role = ?, hw_model = ?,
         is_unmessagable = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(&node.short_id)
    .bind(&node.long_name)
    .bind(&node.short_name)
    .bind(&node.role)
    .bind(&node.hw_model)
    .bind(node.is_unmessagable)
    .bind(node.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Insert a position row.
pub async fn insert_position(conn: &mut SqliteConnection, position: &NewPosition) -> Result<()> {
    sqlx::query("INSERT INTO positions (node_id, latitude, longitude, altitude) VALUES (?, ?, ?, ?)")
        .bind(position.node_id)
        .bind(position.latitude)
        .bind(position.longitude)
        .bind(position.altitude)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Insert a message row.
pub async fn insert_message(conn: &mut SqliteConnection, message: &NewMessage<'_>) -> Result<()> {
    sqlx::query(
        "INSERT INTO messages (from_node_id, text, rx_rssi, rx_snr, rx_time, via_mqtt)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(message.from_node_id)
    .bind(message.text)
    .bind(message.rx_rssi)
    .bind(message.rx_snr)
    .bind(message.rx_time)
    .bind(message.via_mqtt)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Insert a telemetry row.
pub async fn insert_telemetry(conn: &mut SqliteConnection, sample: &NewTelemetry) -> Result<()> {
    sqlx::query(
        "INSERT INTO telemetry (node_id, battery, uptime, voltage, channel_util, air_util_tx,
         temperature, humidity, pressure) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(sample.node_id)
    .bind(sample.battery)
    .bind(sample.uptime)
    .bind(sample.voltage)
    .bind(sample.channel_util)
    .bind(sample.air_util_tx)
    .bind(sample.temperature)
    .bind(sample.humidity)
    .bind(sample.pressure)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Insert a traceroute row.
pub async fn insert_traceroute(
    conn: &mut SqliteConnection,
    traceroute: &NewTraceroute,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO traceroutes (from_node_id, to_node_id, hops, via_mqtt) VALUES (?, ?, ?, ?)",
    )
    .bind(traceroute.from_node_id)
    .bind(traceroute.to_node_id)
    .bind(&traceroute.hops)
    .bind(traceroute.via_mqtt)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        let db = Database::open("sqlite::memory:").await.unwrap();
        db.init_schema().await.unwrap();
        db
    }

    async fn count(db: &Database, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) AS n FROM {table}");
        let row = sqlx::query(&sql).fetch_one(db.pool()).await.unwrap();
        row.get("n")
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let db = test_db().await;
        db.init_schema().await.unwrap();
        assert_eq!(count(&db, "nodes").await, 0);
    }

    #[tokio::test]
    async fn test_insert_and_find_node() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let created = insert_node(&mut conn, &NewNode::minimal(42)).await.unwrap();
        assert_eq!(created.long_id, Some(42));
        assert!(created.short_id.is_none());

        let found = find_node_by_long_id(&mut conn, 42).await.unwrap().unwrap();
        assert_eq!(found, created);
        assert!(find_node_by_long_id(&mut conn, 43).await.unwrap().is_none());

        let full = insert_node(
            &mut conn,
            &NewNode {
                short_id: Some("!a1b2c3d4"),
                long_id: Some(99),
                long_name: Some("Base Station"),
                short_name: Some("BASE"),
                role: Some("ROUTER"),
                hw_model: Some("TBEAM"),
                is_unmessagable: true,
            },
        )
        .await
        .unwrap();

        let found = find_node_by_short_id(&mut conn, "!a1b2c3d4")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, full);
        assert!(found.is_unmessagable);
    }

    #[tokio::test]
    async fn test_long_id_unique_constraint() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        insert_node(&mut conn, &NewNode::minimal(7)).await.unwrap();
        let err = insert_node(&mut conn, &NewNode::minimal(7)).await;
        assert!(err.is_err());

        // Release the single pooled connection before counting through it.
        drop(conn);
        assert_eq!(count(&db, "nodes").await, 1);
    }

    #[tokio::test]
    async fn test_update_node() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let mut node = insert_node(&mut conn, &NewNode::minimal(42)).await.unwrap();
        node.long_name = Some("Repeater North".to_string());
        node.role = Some("REPEATER".to_string());
        update_node(&mut conn, &node).await.unwrap();

        let found = find_node_by_long_id(&mut conn, 42).await.unwrap().unwrap();
        assert_eq!(found.long_name.as_deref(), Some("Repeater North"));
        assert_eq!(found.role.as_deref(), Some("REPEATER"));
    }

    #[tokio::test]
    async fn test_cascade_delete_from_node() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let node = insert_node(&mut conn, &NewNode::minimal(42)).await.unwrap();
        let peer = insert_node(&mut conn, &NewNode::minimal(43)).await.unwrap();

        insert_position(
            &mut conn,
            &NewPosition {
                node_id: node.id,
                latitude: 52.5200066,
                longitude: 13.4049540,
                altitude: Some(34),
            },
        )
        .await
        .unwrap();
        insert_telemetry(
            &mut conn,
            &NewTelemetry {
                node_id: node.id,
                battery: Some(87),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        insert_message(
            &mut conn,
            &NewMessage {
                from_node_id: node.id,
                text: "hello mesh",
                rx_rssi: -80,
                rx_snr: 11,
                rx_time: 1700000000,
                via_mqtt: false,
            },
        )
        .await
        .unwrap();
        insert_traceroute(
            &mut conn,
            &NewTraceroute {
                from_node_id: node.id,
                to_node_id: peer.id,
                hops: r#"{"route":[],"snrTowards":[9]}"#.to_string(),
                via_mqtt: false,
            },
        )
        .await
        .unwrap();

        sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(node.id)
            .execute(&mut *conn)
            .await
            .unwrap();

        // Release the single pooled connection before counting through it.
        drop(conn);
        assert_eq!(count(&db, "positions").await, 0);
        assert_eq!(count(&db, "telemetry").await, 0);
        assert_eq!(count(&db, "messages").await, 0);
        assert_eq!(count(&db, "traceroutes").await, 0);
        assert_eq!(count(&db, "nodes").await, 1); // the peer survives
    }

    #[tokio::test]
    async fn test_foreign_key_enforced() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let err = insert_position(
            &mut conn,
            &NewPosition {
                node_id: 9999,
                latitude: 1.0,
                longitude: 1.0,
                altitude: None,
            },
        )
        .await;
        assert!(err.is_err());
    }
}
