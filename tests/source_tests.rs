//! Source adapters against a local mock HTTP server

#[cfg(test)]
mod tests {
    use pricebot::error::{AggregateError, SourceError};
    use pricebot::oracle::sources::{
        BinanceSource, CoinGeckoSource, FxRatesSource, GateIoSource, KrakenSource, KuCoinSource,
        OkxSource,
    };
    use pricebot::oracle::{
        AggregatorSettings, HttpFetcher, PriceAggregator, PriceSource, QuoteCache, RateLimiter,
        UnsupportedPairs,
    };
    use pricebot::types::{SourceId, Ticker};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn http() -> HttpFetcher {
        HttpFetcher::new(TIMEOUT, "pricebot-test").expect("http client")
    }

    fn ticker(s: &str) -> Ticker {
        Ticker::parse(s).unwrap()
    }

    fn domain_of(server: &MockServer) -> String {
        server.address().to_string()
    }

    // ============================================================================
    // Shared HTTP status mapping
    // ============================================================================

    #[tokio::test]
    async fn test_binance_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/24hr"))
            .and(query_param("symbol", "BTCUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "symbol": "BTCUSDT",
                "lastPrice": "65000.00",
                "priceChangePercent": "2.000"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = BinanceSource::new(http(), &server.uri()).unwrap();
        assert_eq!(source.domains(), vec![domain_of(&server)]);

        let quote = source.fetch(&ticker("btc"), TIMEOUT).await.unwrap();
        assert_eq!(quote.source, SourceId::Binance);
        assert_eq!(quote.price, 65000.0);
        assert_eq!(quote.change_24h, Some(2.0));
    }

    #[tokio::test]
    async fn test_429_with_retry_after_seconds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/24hr"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let source = BinanceSource::new(http(), &server.uri()).unwrap();
        let err = source.fetch(&ticker("BTC"), TIMEOUT).await.unwrap_err();
        assert_eq!(
            err,
            SourceError::RateLimited {
                domain: domain_of(&server),
                retry_after: Some(Duration::from_secs(30)),
            }
        );
    }

    #[tokio::test]
    async fn test_418_without_header_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(418))
            .mount(&server)
            .await;

        let source = BinanceSource::new(http(), &server.uri()).unwrap();
        let err = source.fetch(&ticker("BTC"), TIMEOUT).await.unwrap_err();
        assert_eq!(
            err,
            SourceError::RateLimited {
                domain: domain_of(&server),
                retry_after: None,
            }
        );
    }

    #[tokio::test]
    async fn test_400_invalid_symbol_is_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"code": -1121, "msg": "Invalid symbol."})),
            )
            .mount(&server)
            .await;

        let source = BinanceSource::new(http(), &server.uri()).unwrap();
        let err = source.fetch(&ticker("NOPE"), TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), "unsupported");
    }

    #[tokio::test]
    async fn test_server_error_is_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = GateIoSource::new(http(), &server.uri()).unwrap();
        let err = source.fetch(&ticker("BTC"), TIMEOUT).await.unwrap_err();
        assert!(matches!(err, SourceError::Network(ref msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let source = OkxSource::new(http(), &server.uri()).unwrap();
        let err = source.fetch(&ticker("BTC"), TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"last": "1.0"}]))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let source = GateIoSource::new(http(), &server.uri()).unwrap();
        let err = source
            .fetch(&ticker("BTC"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err, SourceError::Timeout);
    }

    // ============================================================================
    // Exchange-specific request shapes
    // ============================================================================

    #[tokio::test]
    async fn test_kraken_maps_btc_to_xbt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .and(query_param("pair", "XBTUSD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": {"XXBTZUSD": {"c": ["64000.5", "0.1"], "o": "64000.5"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = KrakenSource::new(http(), &server.uri()).unwrap();
        let quote = source.fetch(&ticker("BTC"), TIMEOUT).await.unwrap();
        assert_eq!(quote.price, 64000.5);
        assert_eq!(quote.change_24h, Some(0.0));
    }

    #[tokio::test]
    async fn test_coingecko_uses_coin_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .and(query_param("ids", "the-open-network"))
            .and(query_param("vs_currencies", "usd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "the-open-network": {"usd": 5.5, "usd_24h_change": -1.0}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = CoinGeckoSource::new(http(), &server.uri()).unwrap();
        assert!(!source.supports(&ticker("ZZZ")));
        let quote = source.fetch(&ticker("TON"), TIMEOUT).await.unwrap();
        assert_eq!(quote.price, 5.5);
    }

    #[tokio::test]
    async fn test_kucoin_unknown_symbol() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/market/stats"))
            .and(query_param("symbol", "NOPE-USDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "200000",
                "data": {"symbol": "NOPE-USDT", "last": null}
            })))
            .mount(&server)
            .await;

        let source = KuCoinSource::new(http(), &server.uri()).unwrap();
        let err = source.fetch(&ticker("NOPE"), TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), "unsupported");
    }

    #[tokio::test]
    async fn test_fxrates_skips_network_for_unlisted_coin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "rates": {"ETH": 0.0005}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = FxRatesSource::new(http(), &server.uri()).unwrap();
        let err = source.fetch(&ticker("TON"), TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), "unsupported");

        let quote = source.fetch(&ticker("ETH"), TIMEOUT).await.unwrap();
        assert!((quote.price - 2000.0).abs() < 1e-9);
    }

    // ============================================================================
    // End to end through the aggregator
    // ============================================================================

    #[tokio::test]
    async fn test_rate_limited_domain_receives_no_further_requests() {
        let limited = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .expect(1)
            .mount(&limited)
            .await;

        let healthy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v5/market/ticker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "0",
                "data": [{"last": "105", "open24h": "100"}]
            })))
            .expect(1)
            .mount(&healthy)
            .await;

        let sources: Vec<Arc<dyn PriceSource>> = vec![
            Arc::new(BinanceSource::new(http(), &limited.uri()).unwrap()),
            Arc::new(OkxSource::new(http(), &healthy.uri()).unwrap()),
        ];
        let limiter = Arc::new(RateLimiter::new());
        let aggregator = PriceAggregator::new(
            sources,
            Arc::clone(&limiter),
            Arc::new(QuoteCache::new(Duration::from_secs(60))),
            Arc::new(UnsupportedPairs::new()),
            AggregatorSettings::default(),
        );

        let first = aggregator.get_price(&ticker("BTC")).await.unwrap();
        assert_eq!(first.price, 105.0);
        assert_eq!(first.sources(), vec![SourceId::Okx]);
        assert!(!limiter.is_available(&domain_of(&limited)));

        // OKX served from cache, Binance skipped while its domain is blocked
        let second = aggregator.get_price(&ticker("BTC")).await.unwrap();
        assert_eq!(second.source_count(), 1);

        // Other tickers are blocked on that domain too
        let err = {
            let only_limited = PriceAggregator::new(
                vec![Arc::new(BinanceSource::new(http(), &limited.uri()).unwrap())
                    as Arc<dyn PriceSource>],
                Arc::clone(&limiter),
                Arc::new(QuoteCache::new(Duration::from_secs(60))),
                Arc::new(UnsupportedPairs::new()),
                AggregatorSettings::default(),
            );
            only_limited.get_price(&ticker("ETH")).await.unwrap_err()
        };
        assert_eq!(
            err,
            AggregateError::NoSourcesAvailable {
                ticker: ticker("ETH")
            }
        );
    }
}
