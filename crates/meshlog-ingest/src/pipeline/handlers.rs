//! Per-kind event normalizers.
//!
//! Each handler is the full lifecycle of one event: extract and validate
//! the payload, resolve node identity, derive secondary records, persist.
//! All database effects for one event run inside a single transaction
//! opened here and committed on success; on any error the transaction is
//! dropped (rolled back) as it unwinds to the dispatcher, so no partial
//! writes survive a failure.
//!
//! Business-rule declines return [`Disposition::Rejected`] — they are not
//! errors and leave no trace beyond a log line.

use crate::store::{
    self, Database, NewMessage, NewNode, NewPosition, NewTelemetry, NewTraceroute, Node,
};
use crate::Result;
use meshlog_core::{RawPacket, RouteDiscovery, RouteHops, DEFAULT_ROLE};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::nodes::{find_by_identity, reconcile, resolve_or_create, NodeFields};

/// What a normalizer decided to do with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The event's records were written and committed.
    Persisted,
    /// A business rule declined persistence; nothing was written.
    Rejected(&'static str),
}

/// Round a coordinate to the store's 7-decimal fixed-point precision.
fn round7(value: f64) -> f64 {
    (value * 1e7).round() / 1e7
}

/// Node identity announcement: enrich the existing row in place, or
/// register a full (not minimal) record on first contact.
pub async fn handle_node_info(db: &Database, packet: &RawPacket) -> Result<Disposition> {
    let Some(user) = packet.decoded.as_ref().and_then(|d| d.user.as_ref()) else {
        return Ok(Disposition::Rejected("node-info without user payload"));
    };

    let long_id = packet.sender();
    let short_id = user.id.as_deref();
    let fields = NodeFields {
        short_id,
        long_name: user.long_name.as_deref(),
        short_name: user.short_name.as_deref(),
        role: user.role.as_deref().unwrap_or(DEFAULT_ROLE),
        hw_model: user.hw_model.as_deref(),
        is_unmessagable: user.is_unmessagable.unwrap_or(false),
    };

    let mut tx = db.pool().begin().await?;

    match find_by_identity(&mut tx, long_id, short_id).await? {
        Some(mut node) => {
            let changed = reconcile(&mut tx, &mut node, &fields).await?;
            tx.commit().await?;
            if changed {
                info!(
                    "Node info updated for {} ({})",
                    long_id,
                    fields.long_name.unwrap_or("?")
                );
            } else {
                debug!("Node info for {} already up to date", long_id);
            }
        }
        None => {
            store::insert_node(
                &mut tx,
                &NewNode {
                    short_id,
                    long_id: (long_id != 0).then_some(long_id),
                    long_name: fields.long_name,
                    short_name: fields.short_name,
                    role: Some(fields.role),
                    hw_model: fields.hw_model,
                    is_unmessagable: fields.is_unmessagable,
                },
            )
            .await?;
            tx.commit().await?;
            info!(
                "New node {} ({}) registered",
                long_id,
                fields.long_name.unwrap_or("?")
            );
        }
    }

    Ok(Disposition::Persisted)
}

/// Location fix: reject no-fix and unresolvable senders, synthesize a
/// direct traceroute for zero-hop packets, persist the position.
pub async fn handle_position(
    db: &Database,
    packet: &RawPacket,
    direct_dest_id: i64,
) -> Result<Disposition> {
    let Some(position) = packet.decoded.as_ref().and_then(|d| d.position.as_ref()) else {
        return Ok(Disposition::Rejected("position without payload"));
    };

    let long_id = packet.sender();
    if long_id == 0 {
        return Ok(Disposition::Rejected("position from unresolvable sender"));
    }

    let latitude = position.latitude.unwrap_or(0.0);
    let longitude = position.longitude.unwrap_or(0.0);
    if latitude == 0.0 && longitude == 0.0 {
        return Ok(Disposition::Rejected("position without a fix"));
    }

    let mut tx = db.pool().begin().await?;

    let node = resolve_or_create(&mut tx, long_id, None).await?;
    if packet.is_direct() {
        synthesize_direct_traceroute(&mut tx, &node, packet, direct_dest_id).await?;
    }
    store::insert_position(
        &mut tx,
        &NewPosition {
            node_id: node.id,
            latitude: round7(latitude),
            longitude: round7(longitude),
            altitude: position.altitude,
        },
    )
    .await?;

    tx.commit().await?;
    info!(
        "Position from {}: {}, {} (alt {:?})",
        long_id, latitude, longitude, position.altitude
    );
    Ok(Disposition::Persisted)
}

/// Metrics sample: reject when no field carries a reading, synthesize a
/// direct traceroute for zero-hop packets, persist the sample.
pub async fn handle_telemetry(
    db: &Database,
    packet: &RawPacket,
    direct_dest_id: i64,
) -> Result<Disposition> {
    let Some(telemetry) = packet.decoded.as_ref().and_then(|d| d.telemetry.as_ref()) else {
        return Ok(Disposition::Rejected("telemetry without payload"));
    };

    let long_id = packet.sender();
    if long_id == 0 {
        return Ok(Disposition::Rejected("telemetry from unresolvable sender"));
    }

    let device = telemetry.device_metrics.clone().unwrap_or_default();
    let environment = telemetry.environment_metrics.clone().unwrap_or_default();
    if device.is_empty() && environment.is_empty() {
        return Ok(Disposition::Rejected("telemetry without measurable fields"));
    }

    let mut tx = db.pool().begin().await?;

    let node = resolve_or_create(&mut tx, long_id, None).await?;
    if packet.is_direct() {
        synthesize_direct_traceroute(&mut tx, &node, packet, direct_dest_id).await?;
    }
    store::insert_telemetry(
        &mut tx,
        &NewTelemetry {
            node_id: node.id,
            battery: device.battery_level,
            uptime: device.uptime_seconds,
            voltage: device.voltage,
            channel_util: device.channel_utilization,
            air_util_tx: device.air_util_tx,
            temperature: environment.temperature,
            humidity: environment.relative_humidity,
            pressure: environment.barometric_pressure,
        },
    )
    .await?;

    tx.commit().await?;
    info!(
        "Telemetry from {}: battery={:?} voltage={:?}",
        long_id, device.battery_level, device.voltage
    );
    Ok(Disposition::Persisted)
}

/// Text message: reject empty bodies, unresolvable senders, and messages
/// addressed to the local node itself.
pub async fn handle_text_message(
    db: &Database,
    packet: &RawPacket,
    local_node: Option<i64>,
) -> Result<Disposition> {
    let text = packet
        .decoded
        .as_ref()
        .and_then(|d| d.text.as_deref())
        .unwrap_or("");
    if text.is_empty() {
        return Ok(Disposition::Rejected("message without text body"));
    }

    let long_id = packet.sender();
    if long_id == 0 {
        return Ok(Disposition::Rejected("message from unresolvable sender"));
    }

    if local_node.is_some() && packet.to == local_node {
        return Ok(Disposition::Rejected("message addressed to local node"));
    }

    let mut tx = db.pool().begin().await?;

    let node = resolve_or_create(&mut tx, long_id, None).await?;
    store::insert_message(
        &mut tx,
        &NewMessage {
            from_node_id: node.id,
            text,
            rx_rssi: packet.rx_rssi.unwrap_or(0),
            rx_snr: i64::from(packet.rx_snr_trunc()),
            rx_time: packet.rx_time.unwrap_or(0),
            via_mqtt: packet.via_mqtt.unwrap_or(false),
        },
    )
    .await?;

    tx.commit().await?;
    info!("Message from {}: {}", long_id, text);
    Ok(Disposition::Persisted)
}

/// Discovered route: resolve both endpoints, drop sentinel entries,
/// persist the filtered hop data as JSON text.
pub async fn handle_traceroute(db: &Database, packet: &RawPacket) -> Result<Disposition> {
    let (Some(from_id), Some(to_id)) = (packet.from, packet.to) else {
        return Ok(Disposition::Rejected("traceroute without both endpoints"));
    };
    if from_id == 0 || to_id == 0 {
        return Ok(Disposition::Rejected("traceroute with unresolvable endpoint"));
    }

    // An undecodable payload still records the (empty) path observation.
    let empty = RouteDiscovery::default();
    let discovery = packet
        .decoded
        .as_ref()
        .and_then(|d| d.traceroute.as_ref())
        .unwrap_or(&empty);
    let hops = RouteHops::filtered(&discovery.route, &discovery.snr_towards);

    let mut tx = db.pool().begin().await?;

    let from_node = resolve_or_create(&mut tx, from_id, None).await?;
    let to_node = resolve_or_create(&mut tx, to_id, None).await?;
    store::insert_traceroute(
        &mut tx,
        &NewTraceroute {
            from_node_id: from_node.id,
            to_node_id: to_node.id,
            hops: hops.to_json()?,
            via_mqtt: packet.via_mqtt.unwrap_or(false),
        },
    )
    .await?;

    tx.commit().await?;
    info!(
        "Traceroute from {} to {}: {} hops, {} readings",
        from_id,
        to_id,
        hops.route.len(),
        hops.snr_towards.len()
    );
    Ok(Disposition::Persisted)
}

/// Record a zero-hop observation as a traceroute to the configured
/// listener id. The destination resolves through the normal registry so
/// the foreign key always references a real row.
async fn synthesize_direct_traceroute(
    conn: &mut SqliteConnection,
    from: &Node,
    packet: &RawPacket,
    direct_dest_id: i64,
) -> Result<()> {
    let dest = resolve_or_create(conn, direct_dest_id, None).await?;
    let hops = RouteHops::direct(packet.rx_snr_trunc());
    store::insert_traceroute(
        conn,
        &NewTraceroute {
            from_node_id: from.id,
            to_node_id: dest.id,
            hops: hops.to_json()?,
            via_mqtt: packet.via_mqtt.unwrap_or(false),
        },
    )
    .await?;
    debug!(
        "Synthesized direct traceroute from {} to listener {}",
        packet.sender(),
        direct_dest_id
    );
    Ok(())
}
