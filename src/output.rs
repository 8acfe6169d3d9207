use std::io::{self, Write};

use backpack::{BookSnapshot, ExecutionEstimate, OrderbookStream, PriceLevel, Side};

/// What gets printed for one book change.
#[derive(Debug, Clone)]
pub struct Quote {
    pub book: BookSnapshot,
    pub mid: Option<f64>,
    pub spread_pct: Option<f64>,
    pub buy: Option<ExecutionEstimate>,
    pub sell: Option<ExecutionEstimate>,
}

impl Quote {
    /// Read the current book. Each query locks separately, so an update
    /// landing in between can make fields disagree by one diff.
    pub fn capture(stream: &OrderbookStream, levels: usize, estimate_qty: Option<f64>) -> Self {
        let estimate = |side: Side| estimate_qty.and_then(|q| stream.get_average_execution_price(q, side));
        Self {
            book: stream.get_order_book(Some(levels.max(1))),
            mid: stream.get_mid_price(),
            spread_pct: stream.get_spread().map(|s| s.percentage),
            buy: estimate(Side::Buy),
            sell: estimate(Side::Sell),
        }
    }
}

/// Format `quote` as one line (TSV or JSON) into `buf` and write it.
pub fn write_quote<W: Write>(
    quote: &Quote,
    json_mode: bool,
    buf: &mut String,
    writer: &mut W,
) -> io::Result<()> {
    buf.clear();
    let book = &quote.book;
    let bid = book.bids.first();
    let ask = book.asks.first();

    if json_mode {
        // Manual JSON construction keeps the hot path allocation-free.
        buf.push_str("{\"symbol\":");
        push_json_str(buf, &book.symbol);
        buf.push_str(",\"update_id\":");
        opt_u64(buf, book.last_update_id, "null");
        buf.push_str(",\"mid\":");
        opt_f64(buf, quote.mid, "null");
        buf.push_str(",\"spread_pct\":");
        opt_f64(buf, quote.spread_pct, "null");
        buf.push_str(",\"bids\":");
        levels_json(buf, &book.bids);
        buf.push_str(",\"asks\":");
        levels_json(buf, &book.asks);
        if quote.buy.is_some() || quote.sell.is_some() {
            buf.push_str(",\"buy_avg\":");
            opt_f64(buf, quote.buy.as_ref().map(|e| e.average_price), "null");
            buf.push_str(",\"buy_partial\":");
            buf.push_str(if quote.buy.as_ref().is_some_and(|e| e.partial_fill) { "true" } else { "false" });
            buf.push_str(",\"sell_avg\":");
            opt_f64(buf, quote.sell.as_ref().map(|e| e.average_price), "null");
            buf.push_str(",\"sell_partial\":");
            buf.push_str(if quote.sell.as_ref().is_some_and(|e| e.partial_fill) { "true" } else { "false" });
        }
        buf.push_str(",\"timestamp\":");
        itoa_u64(buf, book.timestamp);
        buf.push('}');
    } else {
        // TSV: symbol update_id bid bid_qty ask ask_qty mid spread_pct [buy_avg sell_avg]
        buf.push_str(&book.symbol);
        buf.push('\t');
        opt_u64(buf, book.last_update_id, "-");
        buf.push('\t');
        opt_f64(buf, bid.map(|l| l.price), "-");
        buf.push('\t');
        opt_f64(buf, bid.map(|l| l.quantity), "-");
        buf.push('\t');
        opt_f64(buf, ask.map(|l| l.price), "-");
        buf.push('\t');
        opt_f64(buf, ask.map(|l| l.quantity), "-");
        buf.push('\t');
        opt_f64(buf, quote.mid, "-");
        buf.push('\t');
        opt_f64(buf, quote.spread_pct, "-");
        if quote.buy.is_some() || quote.sell.is_some() {
            buf.push('\t');
            opt_f64(buf, quote.buy.as_ref().map(|e| e.average_price), "-");
            buf.push('\t');
            opt_f64(buf, quote.sell.as_ref().map(|e| e.average_price), "-");
        }
    }

    buf.push('\n');
    writer.write_all(buf.as_bytes())?;
    writer.flush()
}

fn levels_json(buf: &mut String, levels: &[PriceLevel]) {
    buf.push('[');
    for (i, level) in levels.iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        buf.push('[');
        opt_f64(buf, Some(level.price), "null");
        buf.push(',');
        opt_f64(buf, Some(level.quantity), "null");
        buf.push(']');
    }
    buf.push(']');
}

/// Non-finite values (e.g. a spread over a zero bid) count as missing.
fn opt_f64(buf: &mut String, val: Option<f64>, missing: &str) {
    match val {
        Some(v) if v.is_finite() => format_f64(buf, v),
        _ => buf.push_str(missing),
    }
}

/// Quoted JSON string with the mandatory escapes.
fn push_json_str(buf: &mut String, s: &str) {
    use std::fmt::Write as _;
    buf.push('"');
    for c in s.chars() {
        match c {
            '"' => buf.push_str("\\\""),
            '\\' => buf.push_str("\\\\"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            '\t' => buf.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(buf, "\\u{:04x}", c as u32);
            }
            c => buf.push(c),
        }
    }
    buf.push('"');
}

fn opt_u64(buf: &mut String, val: Option<u64>, missing: &str) {
    match val {
        Some(v) => itoa_u64(buf, v),
        None => buf.push_str(missing),
    }
}

/// Fast f64 formatting via `ryu`.
fn format_f64(buf: &mut String, val: f64) {
    let mut b = ryu::Buffer::new();
    buf.push_str(b.format(val));
}

fn itoa_u64(buf: &mut String, val: u64) {
    use std::fmt::Write as _;
    let _ = write!(buf, "{val}");
}
