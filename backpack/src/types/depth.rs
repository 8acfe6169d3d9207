use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{BackpackError, Result};

/// One aggregated price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

impl PriceLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }
}

/// Full depth returned by `GET /api/v1/depth`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    /// Each entry is `[price, quantity]` as decimal strings.
    #[serde(default)]
    pub asks: Vec<[String; 2]>,
    /// Each entry is `[price, quantity]` as decimal strings.
    #[serde(default)]
    pub bids: Vec<[String; 2]>,
    /// Sequence id the snapshot is consistent with. Sent as a string.
    #[serde(deserialize_with = "u64_from_str_or_num")]
    pub last_update_id: u64,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// Parse `[price, quantity]` string pairs into levels.
///
/// # Errors
///
/// Returns [`BackpackError::InvalidNumber`] on the first value that is not a
/// finite decimal number.
pub fn parse_levels(raw: &[[String; 2]]) -> Result<Vec<PriceLevel>> {
    raw.iter()
        .map(|[price, quantity]| Ok(PriceLevel::new(parse_f64(price)?, parse_f64(quantity)?)))
        .collect()
}

/// Parse a decimal string into a finite `f64`.
pub fn parse_f64(s: &str) -> Result<f64> {
    match s.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(BackpackError::InvalidNumber(s.to_string())),
    }
}

pub(crate) fn u64_from_str_or_num<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Str(String),
        Num(u64),
    }

    match StrOrNum::deserialize(deserializer)? {
        StrOrNum::Num(n) => Ok(n),
        StrOrNum::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_accepts_string_update_id() {
        let json = r#"{
            "asks": [["18.70", "1.5"], ["18.71", "0"]],
            "bids": [["18.67", "0.832"]],
            "lastUpdateId": "94978271",
            "timestamp": 1694687965941000
        }"#;
        let snap: DepthSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.last_update_id, 94978271);
        assert_eq!(snap.asks.len(), 2);
        assert_eq!(snap.bids[0][0], "18.67");
    }

    #[test]
    fn snapshot_accepts_numeric_update_id() {
        let json = r#"{"asks": [], "bids": [], "lastUpdateId": 42}"#;
        let snap: DepthSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.last_update_id, 42);
        assert!(snap.timestamp.is_none());
    }

    #[test]
    fn snapshot_rejects_missing_update_id() {
        let json = r#"{"asks": [], "bids": []}"#;
        assert!(serde_json::from_str::<DepthSnapshot>(json).is_err());
    }

    #[test]
    fn parse_levels_reads_pairs() {
        let raw = vec![
            ["100.5".to_string(), "2".to_string()],
            ["101".to_string(), "0.25".to_string()],
        ];
        let levels = parse_levels(&raw).unwrap();
        assert_eq!(levels, vec![PriceLevel::new(100.5, 2.0), PriceLevel::new(101.0, 0.25)]);
    }

    #[test]
    fn parse_levels_rejects_garbage() {
        let raw = vec![["abc".to_string(), "1".to_string()]];
        assert!(matches!(parse_levels(&raw), Err(BackpackError::InvalidNumber(_))));

        let raw = vec![["1".to_string(), "NaN".to_string()]];
        assert!(parse_levels(&raw).is_err());
    }
}
