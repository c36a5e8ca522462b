//! Raw device packet model and event-kind classification.
//!
//! The device emits one JSON object per frame: an envelope (`from`, `to`,
//! `rxSnr`, `hopStart`, ...) around a `decoded` sub-record whose `portnum`
//! field announces the payload kind. Every field is optional on the wire,
//! so the model is all-`Option` and validation happens in the normalizers.
//!
//! Classification happens first: [`RawPacket::kind`] maps the announced
//! `portnum` onto the closed [`PortKind`] enum, and each normalizer then
//! reads only the payload sub-record for its kind.

use crate::{Error, Result, ROUTE_NO_NODE, SNR_UNKNOWN};
use serde::{Deserialize, Serialize};

/// Event kind announced by a packet's `decoded.portnum` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// Node identity announcement (`NODEINFO_APP`).
    NodeInfo,
    /// Location fix (`POSITION_APP`).
    Position,
    /// Device/environment metrics sample (`TELEMETRY_APP`).
    Telemetry,
    /// Plain text message (`TEXT_MESSAGE_APP`).
    TextMessage,
    /// Discovered route between two nodes (`TRACEROUTE_APP`).
    Traceroute,
    /// Mesh routing control traffic; logged, never persisted.
    Routing,
    /// Anything else; surfaced for observability, never persisted.
    Unknown,
}

impl PortKind {
    /// Map a `portnum` discriminator onto the closed kind enum.
    pub fn classify(portnum: &str) -> Self {
        match portnum {
            "NODEINFO_APP" => Self::NodeInfo,
            "POSITION_APP" => Self::Position,
            "TELEMETRY_APP" => Self::Telemetry,
            "TEXT_MESSAGE_APP" => Self::TextMessage,
            "TRACEROUTE_APP" => Self::Traceroute,
            "ROUTING_APP" => Self::Routing,
            _ => Self::Unknown,
        }
    }
}

/// One raw event frame from the device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPacket {
    /// Numeric id of the sending node.
    pub from: Option<i64>,

    /// Numeric id of the addressed node.
    pub to: Option<i64>,

    /// Received signal strength (dBm).
    pub rx_rssi: Option<i64>,

    /// Received signal-to-noise ratio; fractional on the wire.
    pub rx_snr: Option<f64>,

    /// Receive timestamp, device epoch seconds.
    pub rx_time: Option<i64>,

    /// Whether the packet was relayed over the secondary (MQTT) transport.
    pub via_mqtt: Option<bool>,

    /// Hop budget the sender started with.
    pub hop_start: Option<i64>,

    /// Hop budget remaining at receive time.
    pub hop_limit: Option<i64>,

    /// Decoded payload, when the device could decrypt/decode the frame.
    pub decoded: Option<Decoded>,
}

impl RawPacket {
    /// Parse a single frame. Frames must be JSON objects; scalars and
    /// arrays on the stream are rejected rather than mapped onto an
    /// all-`None` packet.
    pub fn parse(line: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        if !value.is_object() {
            return Err(Error::InvalidFrame {
                reason: "frame is not a JSON object".to_string(),
            });
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Classify this packet by its announced `portnum`.
    ///
    /// A packet without a `decoded` record or without a discriminator is
    /// `Unknown` — surfaced in logs but never an error.
    pub fn kind(&self) -> PortKind {
        self.decoded
            .as_ref()
            .and_then(|d| d.portnum.as_deref())
            .map_or(PortKind::Unknown, PortKind::classify)
    }

    /// The announced `portnum` discriminator, for logging unknown kinds.
    pub fn portnum(&self) -> Option<&str> {
        self.decoded.as_ref().and_then(|d| d.portnum.as_deref())
    }

    /// Sender id, 0 when the envelope carries none.
    pub fn sender(&self) -> i64 {
        self.from.unwrap_or(0)
    }

    /// True when the packet traveled zero hops: `hopStart` and `hopLimit`
    /// are both present and equal. Packets missing either field are never
    /// considered direct.
    pub fn is_direct(&self) -> bool {
        matches!((self.hop_start, self.hop_limit), (Some(start), Some(limit)) if start == limit)
    }

    /// SNR truncated toward zero, 0 when absent.
    pub fn rx_snr_trunc(&self) -> i32 {
        self.rx_snr.unwrap_or(0.0) as i32
    }
}

/// The decoded payload of a frame, discriminated by `portnum`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Decoded {
    /// Payload kind discriminator (e.g. `POSITION_APP`).
    pub portnum: Option<String>,

    /// Node identity payload (`NODEINFO_APP`).
    pub user: Option<UserInfo>,

    /// Location payload (`POSITION_APP`).
    pub position: Option<PositionInfo>,

    /// Metrics payload (`TELEMETRY_APP`).
    pub telemetry: Option<TelemetryInfo>,

    /// Route discovery payload (`TRACEROUTE_APP`).
    pub traceroute: Option<RouteDiscovery>,

    /// Message body (`TEXT_MESSAGE_APP`).
    pub text: Option<String>,
}

/// Identity and display fields from a node announcement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserInfo {
    /// Short textual id (e.g. `!a1b2c3d4`).
    pub id: Option<String>,

    /// Long display name.
    pub long_name: Option<String>,

    /// Short display name.
    pub short_name: Option<String>,

    /// Announced role; absent means `CLIENT`.
    pub role: Option<String>,

    /// Hardware model string.
    pub hw_model: Option<String>,

    /// Whether the node refuses direct messages.
    pub is_unmessagable: Option<bool>,
}

/// One reported location fix.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PositionInfo {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<i64>,
    /// Parsed for completeness; the store has no column for it.
    pub sats_in_view: Option<i64>,
}

/// Metrics payload wrapper: two optional sub-groups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetryInfo {
    pub device_metrics: Option<DeviceMetrics>,
    pub environment_metrics: Option<EnvironmentMetrics>,
}

/// Device health metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceMetrics {
    pub battery_level: Option<i64>,
    pub uptime_seconds: Option<i64>,
    pub voltage: Option<f64>,
    pub channel_utilization: Option<f64>,
    pub air_util_tx: Option<f64>,
}

impl DeviceMetrics {
    /// True when no field carries a reading.
    pub fn is_empty(&self) -> bool {
        self.battery_level.is_none()
            && self.uptime_seconds.is_none()
            && self.voltage.is_none()
            && self.channel_utilization.is_none()
            && self.air_util_tx.is_none()
    }
}

/// Environmental sensor metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentMetrics {
    pub temperature: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub barometric_pressure: Option<f64>,
}

impl EnvironmentMetrics {
    /// True when no field carries a reading.
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.relative_humidity.is_none()
            && self.barometric_pressure.is_none()
    }
}

/// Route discovery payload: intermediate hops plus per-hop SNR readings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteDiscovery {
    pub route: Vec<u32>,
    pub snr_towards: Vec<i32>,
}

/// The stored form of a traceroute's hop data, serialized as JSON text.
///
/// The on-disk key casing (`snrTowards`) matches the wire payload so the
/// stored text can be fed back through the same model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHops {
    pub route: Vec<u32>,
    #[serde(rename = "snrTowards")]
    pub snr_towards: Vec<i32>,
}

impl RouteHops {
    /// Build hop data with sentinel entries removed: route entries equal to
    /// [`ROUTE_NO_NODE`] and SNR entries equal to [`SNR_UNKNOWN`] are dropped.
    pub fn filtered(route: &[u32], snr_towards: &[i32]) -> Self {
        Self {
            route: route.iter().copied().filter(|&h| h != ROUTE_NO_NODE).collect(),
            snr_towards: snr_towards
                .iter()
                .copied()
                .filter(|&s| s != SNR_UNKNOWN)
                .collect(),
        }
    }

    /// Hop data for a synthesized zero-hop record: empty route, the
    /// implied SNR as the sole reading.
    pub fn direct(snr: i32) -> Self {
        Self {
            route: Vec::new(),
            snr_towards: vec![snr],
        }
    }

    /// Serialize for storage.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(value: serde_json::Value) -> RawPacket {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_classify_known_ports() {
        assert_eq!(PortKind::classify("NODEINFO_APP"), PortKind::NodeInfo);
        assert_eq!(PortKind::classify("POSITION_APP"), PortKind::Position);
        assert_eq!(PortKind::classify("TELEMETRY_APP"), PortKind::Telemetry);
        assert_eq!(PortKind::classify("TEXT_MESSAGE_APP"), PortKind::TextMessage);
        assert_eq!(PortKind::classify("TRACEROUTE_APP"), PortKind::Traceroute);
        assert_eq!(PortKind::classify("ROUTING_APP"), PortKind::Routing);
    }

    #[test]
    fn test_classify_unknown_port() {
        assert_eq!(PortKind::classify("ADMIN_APP"), PortKind::Unknown);
        assert_eq!(PortKind::classify(""), PortKind::Unknown);
    }

    #[test]
    fn test_kind_without_decoded() {
        let p = packet(serde_json::json!({ "from": 1 }));
        assert_eq!(p.kind(), PortKind::Unknown);
    }

    #[test]
    fn test_parse_camel_case_envelope() {
        let p = RawPacket::parse(
            r#"{"from":123,"to":456,"rxSnr":11.25,"rxRssi":-80,"rxTime":1700000000,"viaMqtt":true,"hopStart":3,"hopLimit":2,"decoded":{"portnum":"TEXT_MESSAGE_APP","text":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(p.from, Some(123));
        assert_eq!(p.rx_snr, Some(11.25));
        assert_eq!(p.rx_rssi, Some(-80));
        assert_eq!(p.via_mqtt, Some(true));
        assert_eq!(p.hop_start, Some(3));
        assert_eq!(p.kind(), PortKind::TextMessage);
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            RawPacket::parse("42"),
            Err(Error::InvalidFrame { .. })
        ));
        assert!(matches!(
            RawPacket::parse("[1,2]"),
            Err(Error::InvalidFrame { .. })
        ));
        assert!(matches!(RawPacket::parse("{not json"), Err(Error::Json(_))));
    }

    #[test]
    fn test_is_direct() {
        let direct = packet(serde_json::json!({ "hopStart": 3, "hopLimit": 3 }));
        assert!(direct.is_direct());

        let relayed = packet(serde_json::json!({ "hopStart": 3, "hopLimit": 1 }));
        assert!(!relayed.is_direct());

        // Missing hop fields never count as direct.
        let bare = packet(serde_json::json!({}));
        assert!(!bare.is_direct());
        let half = packet(serde_json::json!({ "hopLimit": 3 }));
        assert!(!half.is_direct());
    }

    #[test]
    fn test_rx_snr_truncates_toward_zero() {
        assert_eq!(packet(serde_json::json!({ "rxSnr": 12.75 })).rx_snr_trunc(), 12);
        assert_eq!(packet(serde_json::json!({ "rxSnr": -3.5 })).rx_snr_trunc(), -3);
        assert_eq!(packet(serde_json::json!({})).rx_snr_trunc(), 0);
    }

    #[test]
    fn test_route_hops_filters_sentinels() {
        let hops = RouteHops::filtered(&[4294967295, 7], &[-128, 12]);
        assert_eq!(hops.route, vec![7]);
        assert_eq!(hops.snr_towards, vec![12]);
    }

    #[test]
    fn test_route_hops_keeps_ordinary_entries() {
        let hops = RouteHops::filtered(&[1, 2, 3], &[4, -12, 0]);
        assert_eq!(hops.route, vec![1, 2, 3]);
        assert_eq!(hops.snr_towards, vec![4, -12, 0]);
    }

    #[test]
    fn test_route_hops_direct() {
        let hops = RouteHops::direct(9);
        assert!(hops.route.is_empty());
        assert_eq!(hops.snr_towards, vec![9]);
    }

    #[test]
    fn test_route_hops_json_key_casing() {
        let json = RouteHops::filtered(&[7], &[12]).to_json().unwrap();
        assert_eq!(json, r#"{"route":[7],"snrTowards":[12]}"#);

        let back: RouteHops = serde_json::from_str(&json).unwrap();
        assert_eq!(back.route, vec![7]);
        assert_eq!(back.snr_towards, vec![12]);
    }

    #[test]
    fn test_metrics_is_empty() {
        assert!(DeviceMetrics::default().is_empty());
        assert!(EnvironmentMetrics::default().is_empty());

        let dm = DeviceMetrics {
            voltage: Some(3.7),
            ..Default::default()
        };
        assert!(!dm.is_empty());

        let em = EnvironmentMetrics {
            temperature: Some(21.5),
            ..Default::default()
        };
        assert!(!em.is_empty());
    }

    #[test]
    fn test_user_payload_decoding() {
        let p = packet(serde_json::json!({
            "from": 99,
            "decoded": {
                "portnum": "NODEINFO_APP",
                "user": {
                    "id": "!deadbeef",
                    "longName": "Base Station",
                    "shortName": "BASE",
                    "hwModel": "TBEAM",
                    "isUnmessagable": true
                }
            }
        }));
        let user = p.decoded.unwrap().user.unwrap();
        assert_eq!(user.id.as_deref(), Some("!deadbeef"));
        assert_eq!(user.long_name.as_deref(), Some("Base Station"));
        assert_eq!(user.hw_model.as_deref(), Some("TBEAM"));
        assert_eq!(user.role, None);
        assert_eq!(user.is_unmessagable, Some(true));
    }
}
