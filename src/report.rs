//! Channel message rendering and the log-backed price sink
//!
//! Renders the per-channel update text and emits it through `tracing`
//! instead of posting it anywhere.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::scheduler::PriceSink;
use crate::types::{AggregatedPrice, ChannelRequest, Ticker};

const NO_PRICES: &str = "❌ Unable to fetch prices for any tickers";

/// `$65,000.123`, `$0.5000`, `$0.04200`, `$0.004200`
pub fn format_price(price: f64) -> String {
    let decimals = if price >= 1.0 {
        3
    } else if price >= 0.10 {
        4
    } else if price >= 0.01 {
        5
    } else {
        6
    };
    let formatted = format!("{:.*}", decimals, price.abs());
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), ""));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if price < 0.0 { "-" } else { "" };
    if frac_part.is_empty() {
        format!("{}${}", sign, grouped)
    } else {
        format!("{}${}.{}", sign, grouped, frac_part)
    }
}

/// `+1.23%`, `-0.50%`, `0.00%`, or `N/A`
pub fn format_percent_change(change: Option<f64>) -> String {
    match change {
        None => "N/A".to_string(),
        Some(c) if c > 0.0 => format!("+{:.2}%", c),
        Some(c) => format!("{:.2}%", c),
    }
}

/// `$1.53B`, `$88.00M`, `$950.00K`, `$12.50`
pub fn format_volume(volume: f64) -> String {
    const UNITS: [(f64, &str); 3] = [(1e9, "B"), (1e6, "M"), (1e3, "K")];
    UNITS
        .iter()
        .find(|(scale, _)| volume >= *scale)
        .map(|(scale, unit)| format!("${:.2}{}", volume / scale, unit))
        .unwrap_or_else(|| format!("${:.2}", volume))
}

fn headline(price: &AggregatedPrice) -> String {
    let symbol = price.indicator.symbol();
    let body = format!(
        "{} [{}]",
        format_price(price.price),
        format_percent_change(price.change_24h)
    );
    if symbol.is_empty() {
        body
    } else {
        format!("{} {}", symbol, body)
    }
}

/// Detailed message for a channel that follows one ticker
pub fn render_single(price: &AggregatedPrice, show_individual_sources: bool) -> String {
    let mut lines = vec![format!("{} {}", price.ticker, headline(price))];
    if let Some(volume) = price.volume_24h {
        lines.push(format!("24h volume: {}", format_volume(volume)));
    }
    if show_individual_sources && !price.quotes.is_empty() {
        lines.push("Sources:".to_string());
        for quote in &price.quotes {
            lines.push(format!(
                "• {}: {} [{}]",
                quote.source,
                format_price(quote.price),
                format_percent_change(quote.change_24h)
            ));
        }
    }
    lines.join("\n")
}

/// One line per ticker, shortest symbols first, then highest price first
pub fn render_consolidated(prices: &[&AggregatedPrice]) -> String {
    if prices.is_empty() {
        return NO_PRICES.to_string();
    }
    let mut sorted: Vec<&AggregatedPrice> = prices.to_vec();
    sorted.sort_by(|a, b| {
        a.ticker
            .len()
            .cmp(&b.ticker.len())
            .then_with(|| b.price.total_cmp(&a.price))
    });
    sorted
        .iter()
        .map(|p| format!("{} {}", p.ticker, headline(p)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Message for one channel, or `None` if a single-ticker channel has nothing
pub fn render_channel(
    channel: &ChannelRequest,
    prices: &BTreeMap<Ticker, AggregatedPrice>,
    show_individual_sources: bool,
) -> Option<String> {
    match channel.tickers.as_slice() {
        [ticker] => prices
            .get(ticker)
            .map(|p| render_single(p, show_individual_sources)),
        tickers => {
            let available: Vec<&AggregatedPrice> =
                tickers.iter().filter_map(|t| prices.get(t)).collect();
            Some(render_consolidated(&available))
        }
    }
}

/// Sink that logs each channel's rendered update
pub struct LogSink {
    channels: Vec<ChannelRequest>,
    show_individual_sources: bool,
}

impl LogSink {
    pub fn new(channels: Vec<ChannelRequest>, show_individual_sources: bool) -> Self {
        Self {
            channels,
            show_individual_sources,
        }
    }
}

#[async_trait]
impl PriceSink for LogSink {
    async fn publish(&self, prices: &BTreeMap<Ticker, AggregatedPrice>) -> anyhow::Result<()> {
        for channel in &self.channels {
            match render_channel(channel, prices, self.show_individual_sources) {
                Some(text) => info!(
                    channel = %channel.channel_id,
                    tickers = channel.tickers.len(),
                    "📨 Channel update\n{}",
                    text
                ),
                None => warn!(channel = %channel.channel_id, "No price to send"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeIndicator, Quote, SourceId};
    use chrono::Utc;

    fn aggregated(symbol: &str, price: f64, indicator: ChangeIndicator) -> AggregatedPrice {
        let ticker = Ticker::parse(symbol).unwrap();
        AggregatedPrice {
            ticker: ticker.clone(),
            price,
            change_24h: Some(1.234),
            volume_24h: None,
            indicator,
            quotes: vec![
                Quote::new(SourceId::Binance, ticker.clone(), price, Some(1.0)),
                Quote::new(SourceId::Kraken, ticker, price, None),
            ],
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn price_formatting_tiers() {
        assert_eq!(format_price(65000.1234), "$65,000.123");
        assert_eq!(format_price(1234567.0), "$1,234,567.000");
        assert_eq!(format_price(1.5), "$1.500");
        assert_eq!(format_price(0.5), "$0.5000");
        assert_eq!(format_price(0.042), "$0.04200");
        assert_eq!(format_price(0.0042), "$0.004200");
        assert_eq!(format_price(999.9999), "$1,000.000");
    }

    #[test]
    fn percent_formatting() {
        assert_eq!(format_percent_change(Some(1.234)), "+1.23%");
        assert_eq!(format_percent_change(Some(-0.5)), "-0.50%");
        assert_eq!(format_percent_change(Some(0.0)), "0.00%");
        assert_eq!(format_percent_change(None), "N/A");
    }

    #[test]
    fn single_message_lists_sources() {
        let btc = aggregated("BTC", 65000.0, ChangeIndicator::Up);
        let text = render_single(&btc, true);
        assert_eq!(
            text,
            "BTC 📈 $65,000.000 [+1.23%]\nSources:\n• Binance: $65,000.000 [+1.00%]\n• Kraken: $65,000.000 [N/A]"
        );
        assert_eq!(render_single(&btc, false), "BTC 📈 $65,000.000 [+1.23%]");
    }

    #[test]
    fn volume_formatting_and_single_line() {
        assert_eq!(format_volume(1_530_000_000.0), "$1.53B");
        assert_eq!(format_volume(88_000_000.0), "$88.00M");
        assert_eq!(format_volume(950_000.0), "$950.00K");
        assert_eq!(format_volume(12.5), "$12.50");

        let mut eth = aggregated("ETH", 3000.0, ChangeIndicator::Unknown);
        eth.volume_24h = Some(2_500_000_000.0);
        assert_eq!(
            render_single(&eth, false),
            "ETH $3,000.000 [+1.23%]\n24h volume: $2.50B"
        );
    }

    #[test]
    fn consolidated_sorts_by_length_then_price() {
        let doge = aggregated("DOGE", 0.1, ChangeIndicator::Unknown);
        let eth = aggregated("ETH", 3000.0, ChangeIndicator::Down);
        let btc = aggregated("BTC", 65000.0, ChangeIndicator::Flat);
        let op = aggregated("OP", 2.0, ChangeIndicator::Unknown);

        let text = render_consolidated(&[&doge, &eth, &btc, &op]);
        let order: Vec<&str> = text
            .lines()
            .map(|l| l.split(' ').next().unwrap())
            .collect();
        assert_eq!(order, vec!["OP", "BTC", "ETH", "DOGE"]);
        assert!(text.contains("BTC ➖ $65,000.000"));
        assert!(text.contains("OP $2.000 [+1.23%]"));
    }

    #[test]
    fn channel_rendering_handles_missing_prices() {
        let mut prices = BTreeMap::new();
        let btc = aggregated("BTC", 10.0, ChangeIndicator::Unknown);
        prices.insert(btc.ticker.clone(), btc);

        let single_missing = ChannelRequest {
            channel_id: "@eth".into(),
            tickers: vec![Ticker::parse("ETH").unwrap()],
        };
        assert_eq!(render_channel(&single_missing, &prices, true), None);

        let multi_missing = ChannelRequest {
            channel_id: "@alts".into(),
            tickers: vec![Ticker::parse("SOL").unwrap(), Ticker::parse("ADA").unwrap()],
        };
        assert_eq!(
            render_channel(&multi_missing, &prices, true).as_deref(),
            Some(NO_PRICES)
        );

        let multi = ChannelRequest {
            channel_id: "@main".into(),
            tickers: vec![Ticker::parse("BTC").unwrap(), Ticker::parse("ETH").unwrap()],
        };
        assert_eq!(
            render_channel(&multi, &prices, true).as_deref(),
            Some("BTC $10.000 [+1.23%]")
        );
    }
}
