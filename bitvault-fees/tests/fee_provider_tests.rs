use async_trait::async_trait;
use bitvault_fees::circuit_breaker::BreakerRegistry;
use bitvault_fees::config::EngineConfig;
use bitvault_fees::fee_provider::{MempoolFees, RawFeeResponse, SmartFeeResponse, StaticSource};
use bitvault_fees::logging::{self, LogConfig, LogLevel};
use bitvault_fees::{
    CircuitBreakerConfig, CircuitState, FeeConfidence, FeeProviderChain, FeeSource, ProviderError,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static INIT: Once = Once::new();

fn setup() {
    INIT.call_once(|| {
        let config = LogConfig {
            level: LogLevel::Error,
            include_timestamps: false,
            ..LogConfig::default()
        };
        let _ = logging::init(&config);
    });
}

type Reply = Result<RawFeeResponse, ProviderError>;

/// Source answering from a script, repeating the last reply once exhausted
struct ScriptedSource {
    name: String,
    replies: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<Reply>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(name: &str, replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(name: &str, delay: Duration, reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            replies: Mutex::new(vec![reply].into()),
            last: Mutex::new(None),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeeSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<RawFeeResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(reply) => {
                *self.last.lock().unwrap() = Some(reply.clone());
                reply
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(ProviderError::Transport("script exhausted".to_string()))),
        }
    }
}

fn mempool(fastest: f64, half_hour: f64, hour: f64) -> Reply {
    Ok(RawFeeResponse::Mempool(MempoolFees {
        fastest_fee: Some(fastest),
        half_hour_fee: Some(half_hour),
        hour_fee: Some(hour),
        economy_fee: Some(1.0),
        minimum_fee: Some(1.0),
        timestamp: None,
    }))
}

fn quicknode(btc_per_kvb: f64, blocks: u32) -> Reply {
    Ok(RawFeeResponse::QuickNode(SmartFeeResponse {
        feerate: Some(btc_per_kvb),
        blocks: Some(blocks),
        errors: Vec::new(),
    }))
}

fn transport_error() -> Reply {
    Err(ProviderError::Transport("connection refused".to_string()))
}

fn chain_of(config: &EngineConfig, sources: Vec<Arc<ScriptedSource>>) -> FeeProviderChain {
    let registry = Arc::new(BreakerRegistry::from_engine_config(config));
    sources
        .into_iter()
        .fold(FeeProviderChain::new(config, registry), |chain, source| {
            chain.with_source(source)
        })
}

#[tokio::test]
async fn test_first_provider_wins() {
    setup();
    let primary = ScriptedSource::new("mempool", vec![mempool(25.0, 20.0, 15.0)]);
    let secondary = ScriptedSource::new("quicknode", vec![quicknode(0.0001, 2)]);
    let chain = chain_of(&EngineConfig::default(), vec![primary.clone(), secondary.clone()]);

    let estimate = chain.get_fee_estimate().await;
    assert_eq!(estimate.recommended_fee, 25);
    assert_eq!(estimate.half_hour_fee, Some(20));
    assert_eq!(estimate.source, "mempool");
    assert_eq!(estimate.confidence, FeeConfidence::High);
    assert!(!estimate.fallback_used);
    assert!(estimate.errors.is_empty());
    assert_eq!(secondary.calls(), 0);
}

#[tokio::test]
async fn test_inverted_tiers_fall_through_to_next_provider() {
    setup();
    let primary = ScriptedSource::new("mempool", vec![mempool(5.0, 10.0, 4.0)]);
    // 0.0001 BTC/kvB is 10 sat/vB
    let secondary = ScriptedSource::new("quicknode", vec![quicknode(0.0001, 6)]);
    let chain = chain_of(&EngineConfig::default(), vec![primary, secondary]);

    let estimate = chain.get_fee_estimate().await;
    assert_eq!(estimate.source, "quicknode");
    assert_eq!(estimate.recommended_fee, 10);
    assert_eq!(estimate.confidence, FeeConfidence::Medium);
    assert!(estimate.fallback_used);
    assert_eq!(estimate.errors.len(), 1);
    assert!(estimate.errors[0].starts_with("mempool: Invalid fee data"));
}

#[tokio::test]
async fn test_out_of_range_rate_is_rejected() {
    setup();
    let primary = ScriptedSource::new("mempool", vec![mempool(5000.0, 4000.0, 3000.0)]);
    let chain = chain_of(&EngineConfig::default(), vec![primary]);

    let estimate = chain.get_fee_estimate().await;
    assert!(estimate.is_static());
    assert!(estimate.errors[0].contains("exceeds the maximum"));
    assert!(chain.last_known_estimate().is_none());
}

#[tokio::test]
async fn test_all_providers_failing_yields_static_rates() {
    setup();
    let primary = ScriptedSource::new("mempool", vec![transport_error()]);
    let secondary = ScriptedSource::new(
        "quicknode",
        vec![Err(ProviderError::Rpc {
            code: -32601,
            message: "Method not found".to_string(),
        })],
    );
    let chain = chain_of(&EngineConfig::default(), vec![primary, secondary]);

    let estimate = chain.get_fee_estimate().await;
    assert!(estimate.is_static());
    assert_eq!(estimate.recommended_fee, 10);
    assert_eq!(estimate.half_hour_fee, Some(6));
    assert_eq!(estimate.minimum_fee, Some(1));
    assert_eq!(estimate.confidence, FeeConfidence::Low);
    assert!(estimate.fallback_used);
    assert_eq!(
        estimate.errors,
        vec![
            "mempool: Transport error: connection refused".to_string(),
            "quicknode: RPC error -32601: Method not found".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_static_source_is_capped_at_low_confidence() {
    setup();
    let config = EngineConfig::default();
    let chain = FeeProviderChain::new(&config, Arc::new(BreakerRegistry::default()))
        .with_source(Arc::new(StaticSource::default()));

    let estimate = chain.get_fee_estimate().await;
    assert_eq!(estimate.confidence, FeeConfidence::Low);
    assert_eq!(estimate.source, "static");
}

#[tokio::test(start_paused = true)]
async fn test_breaker_stops_calling_a_failing_provider() {
    setup();
    let primary = ScriptedSource::new("mempool", vec![transport_error()]);
    let chain = chain_of(&EngineConfig::default(), vec![primary.clone()]);

    for _ in 0..3 {
        assert!(chain.get_fee_estimate().await.is_static());
    }
    assert_eq!(primary.calls(), 3);

    let estimate = chain.get_fee_estimate().await;
    assert_eq!(primary.calls(), 3);
    assert!(estimate.errors[0].contains("is open"));

    let metrics = chain.breaker_metrics();
    assert_eq!(metrics[0].state, CircuitState::Open);
    assert_eq!(metrics[0].total_rejections, 1);

    // A trial call is let through after the recovery timeout
    tokio::time::advance(Duration::from_secs(30)).await;
    chain.get_fee_estimate().await;
    assert_eq!(primary.calls(), 4);
}

#[tokio::test]
async fn test_legal_block_disables_provider_permanently() {
    setup();
    let primary = ScriptedSource::new(
        "mempool",
        vec![
            Err(ProviderError::LegalRestriction("HTTP 451".to_string())),
            mempool(20.0, 10.0, 5.0),
        ],
    );
    let chain = chain_of(&EngineConfig::default(), vec![primary.clone()]);

    assert!(chain.get_fee_estimate().await.is_static());
    assert_eq!(chain.breaker_metrics()[0].state, CircuitState::PermanentlyOpen);

    let estimate = chain.get_fee_estimate().await;
    assert!(estimate.is_static());
    assert!(estimate.errors[0].contains("permanently open"));
    assert_eq!(primary.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_before_moving_on() {
    setup();
    let mut config = EngineConfig::default();
    config.provider_chain.max_retries = 2;

    let primary = ScriptedSource::new(
        "mempool",
        vec![transport_error(), transport_error(), mempool(12.0, 8.0, 6.0)],
    );
    let chain = chain_of(&config, vec![primary.clone()]);

    let estimate = chain.get_fee_estimate().await;
    assert_eq!(estimate.recommended_fee, 12);
    assert_eq!(primary.calls(), 3);
    assert!(!estimate.fallback_used);
    assert_eq!(chain.breaker_metrics()[0].state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_once_breaker_opens() {
    setup();
    let mut config = EngineConfig::default();
    config.provider_chain.max_retries = 5;

    let primary = ScriptedSource::new("mempool", vec![transport_error()]);
    let chain = chain_of(&config, vec![primary.clone()]);

    let estimate = chain.get_fee_estimate().await;
    assert!(estimate.is_static());
    // The third failure opens the breaker; the next attempt is rejected
    assert_eq!(primary.calls(), 3);
    assert!(estimate.errors[0].contains("is open"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_provider_times_out() {
    setup();
    let primary = ScriptedSource::slow("mempool", Duration::from_secs(20), mempool(20.0, 10.0, 5.0));
    let chain = chain_of(&EngineConfig::default(), vec![primary]);

    let estimate = chain.get_fee_estimate().await;
    assert!(estimate.is_static());
    assert!(estimate.errors[0].contains("timed out"));
    assert_eq!(chain.breaker_metrics()[0].total_timeouts, 1);
}

#[tokio::test]
async fn test_breaker_overrides_from_config() {
    setup();
    let mut config = EngineConfig::default();
    config.breakers.insert(
        "mempool".to_string(),
        CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::api()
        },
    );
    let primary = ScriptedSource::new("mempool", vec![transport_error()]);
    let chain = chain_of(&config, vec![primary.clone()]);

    chain.get_fee_estimate().await;
    chain.get_fee_estimate().await;
    assert_eq!(primary.calls(), 1);
}

#[tokio::test]
async fn test_dramatic_change_is_still_accepted() {
    setup();
    let primary = ScriptedSource::new(
        "mempool",
        vec![mempool(10.0, 8.0, 5.0), mempool(200.0, 150.0, 100.0)],
    );
    let chain = chain_of(&EngineConfig::default(), vec![primary]);

    assert_eq!(chain.get_fee_estimate().await.recommended_fee, 10);
    assert_eq!(chain.get_fee_estimate().await.recommended_fee, 200);
    assert_eq!(
        chain.last_known_estimate().map(|e| e.recommended_fee),
        Some(200)
    );
}

#[tokio::test]
async fn test_half_hour_used_when_fastest_is_zero() {
    setup();
    let primary = ScriptedSource::new(
        "mempool",
        vec![Ok(RawFeeResponse::Mempool(MempoolFees {
            fastest_fee: Some(0.0),
            half_hour_fee: Some(0.0),
            ..MempoolFees::default()
        }))],
    );
    let secondary = ScriptedSource::new("quicknode", vec![quicknode(0.00002, 12)]);
    let chain = chain_of(&EngineConfig::default(), vec![primary, secondary]);

    let estimate = chain.get_fee_estimate().await;
    assert_eq!(estimate.source, "quicknode");
    assert_eq!(estimate.recommended_fee, 2);
    assert_eq!(estimate.confidence, FeeConfidence::Low);
}

#[test]
fn test_estimate_wire_format() {
    let json = r#"{"provider":"mempool","data":{"fastestFee":12,"halfHourFee":9.5,"hourFee":7}}"#;
    let raw: RawFeeResponse = serde_json::from_str(json).unwrap();
    let estimate = raw.into_estimate("mempool").unwrap();
    assert_eq!(estimate.recommended_fee, 12);
    assert_eq!(estimate.half_hour_fee, Some(10));
    assert_eq!(estimate.economy_fee, None);

    let value = serde_json::to_value(&estimate).unwrap();
    assert_eq!(value["recommendedFee"], 12);
    assert_eq!(value["confidence"], "high");
    assert!(value.get("economyFee").is_none());
}
