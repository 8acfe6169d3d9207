use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Direction of a hypothetical market order.
///
/// `Buy` consumes asks from the lowest price up; `Sell` consumes bids from
/// the highest price down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(format!("invalid side: {other} (expected buy or sell)")),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

/// Side of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Order side that closes this position: longs sell into bids, shorts
    /// buy from asks.
    pub fn exit_side(self) -> Side {
        match self {
            PositionSide::Long => Side::Sell,
            PositionSide::Short => Side::Buy,
        }
    }
}

impl FromStr for PositionSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Ok(PositionSide::Long),
            "short" => Ok(PositionSide::Short),
            other => Err(format!("invalid position side: {other} (expected long or short)")),
        }
    }
}

/// Update cadence of the depth stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DepthGranularity {
    #[default]
    #[serde(rename = "realtime")]
    Realtime,
    #[serde(rename = "200ms")]
    Ms200,
    #[serde(rename = "600ms")]
    Ms600,
    #[serde(rename = "1000ms")]
    Ms1000,
}

impl DepthGranularity {
    /// Stream name for `symbol`, e.g. `depth.SOL_USDC` or
    /// `depth.200ms.SOL_USDC`.
    pub fn stream_name(self, symbol: &str) -> String {
        match self {
            DepthGranularity::Realtime => format!("depth.{symbol}"),
            DepthGranularity::Ms200 => format!("depth.200ms.{symbol}"),
            DepthGranularity::Ms600 => format!("depth.600ms.{symbol}"),
            DepthGranularity::Ms1000 => format!("depth.1000ms.{symbol}"),
        }
    }
}

impl FromStr for DepthGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "realtime" => Ok(DepthGranularity::Realtime),
            "200ms" => Ok(DepthGranularity::Ms200),
            "600ms" => Ok(DepthGranularity::Ms600),
            "1000ms" => Ok(DepthGranularity::Ms1000),
            other => Err(format!(
                "invalid granularity: {other} (expected realtime, 200ms, 600ms or 1000ms)"
            )),
        }
    }
}

impl fmt::Display for DepthGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DepthGranularity::Realtime => "realtime",
            DepthGranularity::Ms200 => "200ms",
            DepthGranularity::Ms600 => "600ms",
            DepthGranularity::Ms1000 => "1000ms",
        };
        f.write_str(s)
    }
}
