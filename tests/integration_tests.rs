//! Integration tests for the decision-and-risk loop
//!
//! These drive the full cycle (snapshot -> signal -> governance -> stake ->
//! trade -> settlement) against scripted collaborators, with time passed in
//! explicitly so settlement ordering is deterministic.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ai_binary_trader::analyzer::SignalAnalyzer;
use ai_binary_trader::bot::{DecisionLoop, TickOutcome};
use ai_binary_trader::broker::Broker;
use ai_binary_trader::config::TradingSettings;
use ai_binary_trader::engine::TradingEngine;
use ai_binary_trader::governor::RejectReason;
use ai_binary_trader::inference::Inference;
use ai_binary_trader::market::MarketData;
use ai_binary_trader::state_manager::StateStore;
use ai_binary_trader::{
    Account, AccountKind, ContractRef, Direction, MacdBias, MarketSnapshot, Money, Outcome,
    PricePoint, Stats, Symbol, TradeId, Trend,
};

// =============================================================================
// Scripted collaborators
// =============================================================================

/// Inference that always returns the same reply (or error).
struct ScriptedInference {
    reply: Result<String, String>,
}

#[async_trait]
impl Inference for ScriptedInference {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(msg) => anyhow::bail!("{msg}"),
        }
    }
}

/// Fixed snapshot feed that counts how often it is consulted.
struct FixedFeed {
    snapshot: MarketSnapshot,
    calls: AtomicUsize,
}

impl FixedFeed {
    fn new(snapshot: MarketSnapshot) -> Arc<Self> {
        Arc::new(FixedFeed {
            snapshot,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketData for FixedFeed {
    async fn snapshot(&self) -> Result<MarketSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.clone())
    }
}

/// Broker that settles from a scripted outcome sequence (default: lost).
struct ScriptedBroker {
    outcomes: Mutex<VecDeque<Outcome>>,
    next_ref: AtomicUsize,
}

impl ScriptedBroker {
    fn new(outcomes: impl IntoIterator<Item = Outcome>) -> Arc<Self> {
        Arc::new(ScriptedBroker {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            next_ref: AtomicUsize::new(1),
        })
    }
}

/// Broker whose resolution backend is down.
struct FailingBroker;

#[async_trait]
impl Broker for FailingBroker {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(vec![demo_account(1000.0)])
    }

    async fn submit_contract(
        &self,
        _symbol: &Symbol,
        _direction: Direction,
        _stake: Money,
        _duration_minutes: u32,
    ) -> Result<ContractRef> {
        Ok(ContractRef("TEST-1".to_string()))
    }

    async fn resolve(&self, _contract: &ContractRef) -> Result<Outcome> {
        anyhow::bail!("resolution backend down")
    }
}

#[async_trait]
impl Broker for ScriptedBroker {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(vec![demo_account(1000.0)])
    }

    async fn submit_contract(
        &self,
        _symbol: &Symbol,
        _direction: Direction,
        _stake: Money,
        _duration_minutes: u32,
    ) -> Result<ContractRef> {
        let n = self.next_ref.fetch_add(1, Ordering::SeqCst);
        Ok(ContractRef(format!("TEST-{n}")))
    }

    async fn resolve(&self, _contract: &ContractRef) -> Result<Outcome> {
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Lost))
    }
}

// =============================================================================
// Test fixtures
// =============================================================================

fn demo_account(balance: f64) -> Account {
    Account {
        id: "VRTC-1001".to_string(),
        name: "Demo".to_string(),
        kind: AccountKind::Demo,
        currency: "USD".to_string(),
        balance: Money::from_f64(balance),
    }
}

fn uptrend_snapshot() -> MarketSnapshot {
    MarketSnapshot {
        symbol: Symbol::new("MATCH_EURUSD"),
        display: "EURUSD Match".to_string(),
        current_price: 1.0812,
        volatility: 0.45,
        trend: Trend::Uptrend,
        rsi: 62.0,
        macd: MacdBias::Bullish,
        history: vec![PricePoint {
            timestamp: Utc::now(),
            price: 1.0800,
        }],
    }
}

fn settings() -> TradingSettings {
    TradingSettings {
        max_stake: Money::from_f64(50.0),
        confidence_threshold: 80,
        max_consecutive_losses: 3,
        trade_duration_minutes: 1,
        risk_limit: 0.02,
    }
}

fn confident_reply(confidence: u8) -> String {
    format!(
        "{{\"signal\": \"BUY\", \"confidence\": {confidence}, \"riskLevel\": \"LOW\", \
          \"reasoning\": \"test\", \"positionSize\": 1.0}}"
    )
}

fn make_loop(
    reply: Result<String, String>,
    broker: Arc<ScriptedBroker>,
    feed: Arc<FixedFeed>,
    with_account: bool,
) -> DecisionLoop {
    let mut engine = TradingEngine::new();
    if with_account {
        engine.select_account(demo_account(1000.0));
    }
    DecisionLoop::new(
        settings(),
        feed,
        SignalAnalyzer::new(Arc::new(ScriptedInference { reply })),
        broker,
        engine,
    )
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_missing_account_skips_without_consulting_collaborators() {
    let feed = FixedFeed::new(uptrend_snapshot());
    let broker = ScriptedBroker::new([]);
    let mut bot = make_loop(Ok(confident_reply(95)), broker, feed.clone(), false);

    let outcome = bot.tick(Utc::now()).await.unwrap();
    assert_eq!(outcome, TickOutcome::NoAccount);
    assert_eq!(feed.calls(), 0);
    assert_eq!(bot.unsettled_count(), 0);
}

#[tokio::test]
async fn test_confident_signal_opens_pending_trade() {
    let feed = FixedFeed::new(uptrend_snapshot());
    let broker = ScriptedBroker::new([]);
    let mut bot = make_loop(Ok(confident_reply(90)), broker, feed, true);

    let t0 = Utc::now();
    let outcome = bot.tick(t0).await.unwrap();

    let TickOutcome::Opened(id) = outcome else {
        panic!("expected a trade, got {outcome:?}");
    };
    let trade = bot.engine().trade(id).unwrap();
    assert_eq!(trade.direction, Direction::Higher);
    assert_eq!(trade.confidence, 90);
    // opening must not touch the ledger
    assert_eq!(bot.engine().stats().total_trades, 0);
    // settlement scheduled one contract duration out
    assert_eq!(bot.next_settlement_due(), Some(t0 + Duration::minutes(1)));
}

#[tokio::test]
async fn test_no_history_sizes_against_coin_flip() {
    // win_rate unknown -> sized as 0.5: kelly floor 0.01, factor 0.72,
    // 1000 * 0.01 * 0.72 = 7.2
    let feed = FixedFeed::new(uptrend_snapshot());
    let broker = ScriptedBroker::new([]);
    let mut bot = make_loop(Ok(confident_reply(90)), broker, feed, true);

    let TickOutcome::Opened(id) = bot.tick(Utc::now()).await.unwrap() else {
        panic!("expected a trade");
    };
    assert_eq!(bot.engine().trade(id).unwrap().stake, Money::from_f64(7.2));
}

#[tokio::test]
async fn test_stake_clamped_to_max_stake_with_history() {
    // win_rate 0.55, balance 1000, confidence 90 -> raw 72,
    // clamped to max_stake 50
    let feed = FixedFeed::new(uptrend_snapshot());
    let broker = ScriptedBroker::new([]);
    let mut bot = make_loop(Ok(confident_reply(90)), broker, feed, true);
    bot.engine_mut().restore_stats(
        Stats {
            total_trades: 20,
            wins: 11,
            losses: 9,
            win_rate: 0.55,
            total_pnl: Money::ZERO,
            balance: Money::from_f64(1000.0),
        },
        0,
    );

    let TickOutcome::Opened(id) = bot.tick(Utc::now()).await.unwrap() else {
        panic!("expected a trade");
    };
    assert_eq!(bot.engine().trade(id).unwrap().stake, Money::from_f64(50.0));
}

#[tokio::test]
async fn test_low_confidence_rejected_before_any_trade() {
    let feed = FixedFeed::new(uptrend_snapshot());
    let broker = ScriptedBroker::new([]);
    let mut bot = make_loop(Ok(confident_reply(79)), broker, feed, true);

    let outcome = bot.tick(Utc::now()).await.unwrap();
    assert_eq!(
        outcome,
        TickOutcome::Rejected(RejectReason::LowConfidence {
            confidence: 79,
            threshold: 80
        })
    );
    assert_eq!(bot.engine().stats().total_trades, 0);
    assert_eq!(bot.unsettled_count(), 0);
}

#[tokio::test]
async fn test_inference_failure_falls_back_and_gets_gated() {
    // fallback confidence is capped at 50, always below the 80 threshold
    let feed = FixedFeed::new(uptrend_snapshot());
    let broker = ScriptedBroker::new([]);
    let mut bot = make_loop(Err("boom".to_string()), broker, feed, true);

    let outcome = bot.tick(Utc::now()).await.unwrap();
    assert!(matches!(
        outcome,
        TickOutcome::Rejected(RejectReason::LowConfidence { .. })
    ));
}

#[tokio::test]
async fn test_circuit_breaker_scenario_three_losses() {
    // three consecutive loss settlements, then a perfect signal: the 4th
    // cycle must be refused by the breaker
    let feed = FixedFeed::new(uptrend_snapshot());
    let broker = ScriptedBroker::new([Outcome::Lost, Outcome::Lost, Outcome::Lost]);
    let mut bot = make_loop(Ok(confident_reply(100)), broker, feed, true);

    let mut now = Utc::now();
    for _ in 0..3 {
        let outcome = bot.tick(now).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Opened(_)));
        now += Duration::minutes(1);
        let settled = bot.settle_due(now).await;
        assert_eq!(settled.len(), 1);
    }
    assert_eq!(bot.engine().consecutive_losses(), 3);

    let outcome = bot.tick(now).await.unwrap();
    assert_eq!(
        outcome,
        TickOutcome::Rejected(RejectReason::CircuitBreakerOpen {
            consecutive_losses: 3
        })
    );
}

#[tokio::test]
async fn test_win_closes_the_breaker_again() {
    let feed = FixedFeed::new(uptrend_snapshot());
    let broker = ScriptedBroker::new([
        Outcome::Lost,
        Outcome::Lost,
        Outcome::Lost,
        Outcome::Won,
    ]);
    let mut bot = make_loop(Ok(confident_reply(95)), broker, feed, true);

    let mut now = Utc::now();
    for _ in 0..3 {
        bot.tick(now).await.unwrap();
        now += Duration::minutes(1);
        bot.settle_due(now).await;
    }
    assert!(matches!(
        bot.tick(now).await.unwrap(),
        TickOutcome::Rejected(RejectReason::CircuitBreakerOpen { .. })
    ));

    // a settlement cannot come from a rejected tick, so hand the engine a
    // winning trade directly: settlement order rules the breaker
    let id = bot.engine_mut().open_trade(
        Symbol::new("MATCH_EURUSD"),
        Direction::Higher,
        Money::from_f64(5.0),
        95,
        now,
    );
    bot.engine_mut().settle(id, Outcome::Won).unwrap();
    assert_eq!(bot.engine().consecutive_losses(), 0);

    assert!(matches!(
        bot.tick(now).await.unwrap(),
        TickOutcome::Opened(_)
    ));
}

#[tokio::test]
async fn test_concurrent_pending_trades_and_ledger_consistency() {
    // several ticks before any settlement, then a drain: the ledger must
    // add up exactly
    let feed = FixedFeed::new(uptrend_snapshot());
    let broker = ScriptedBroker::new([Outcome::Won, Outcome::Lost, Outcome::Won]);
    let mut bot = make_loop(Ok(confident_reply(88)), broker, feed, true);

    let t0 = Utc::now();
    for i in 0..3 {
        let outcome = bot.tick(t0 + Duration::seconds(i * 10)).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Opened(_)));
    }
    assert_eq!(bot.unsettled_count(), 3);
    assert_eq!(bot.engine().pending_count(), 3);

    let settled = bot.settle_due(t0 + Duration::minutes(2)).await;
    assert_eq!(settled.len(), 3);

    let stats = bot.engine().stats();
    assert_eq!(stats.total_trades, 3);
    assert_eq!(stats.wins, 2);
    assert_eq!(stats.losses, 1);
    assert_eq!(stats.wins + stats.losses, stats.total_trades);

    let pnl_sum: Money = bot.engine().trades().filter_map(|t| t.pnl).sum();
    assert_eq!(stats.total_pnl, pnl_sum);
    assert_eq!(stats.balance, Money::from_f64(1000.0) + pnl_sum);
    assert_eq!(bot.engine().pending_count(), 0);
}

#[tokio::test]
async fn test_failed_resolution_stays_queued_for_retry() {
    let feed = FixedFeed::new(uptrend_snapshot());
    let mut engine = TradingEngine::new();
    engine.select_account(demo_account(1000.0));
    let mut bot = DecisionLoop::new(
        settings(),
        feed,
        SignalAnalyzer::new(Arc::new(ScriptedInference {
            reply: Ok(confident_reply(90)),
        })),
        Arc::new(FailingBroker),
        engine,
    );

    let t0 = Utc::now();
    bot.tick(t0).await.unwrap();
    let due = bot.next_settlement_due().unwrap();

    // resolution fails: nothing settles, the entry keeps its fire time
    let settled = bot.settle_due(t0 + Duration::minutes(2)).await;
    assert!(settled.is_empty());
    assert_eq!(bot.unsettled_count(), 1);
    assert_eq!(bot.next_settlement_due(), Some(due));
    assert_eq!(bot.engine().stats().total_trades, 0);
}

#[test]
fn test_session_resume_appends_to_audit_trail() {
    let store = StateStore::in_memory().unwrap();

    // first session: two settled trades recorded
    let mut engine = TradingEngine::new();
    engine.select_account(demo_account(1000.0));
    for outcome in [Outcome::Won, Outcome::Lost] {
        let id = engine.open_trade(
            Symbol::new("MATCH_EURUSD"),
            Direction::Higher,
            Money::from_f64(10.0),
            90,
            Utc::now(),
        );
        engine.settle(id, outcome).unwrap();
        store.record_trade(engine.trade(id).unwrap()).unwrap();
    }
    store
        .save_checkpoint(engine.stats(), engine.consecutive_losses())
        .unwrap();
    assert_eq!(store.trade_count().unwrap(), 2);

    // second session resumes from the same store
    let mut resumed = TradingEngine::new();
    resumed.select_account(demo_account(1000.0));
    let (stats, streak) = store.load_checkpoint().unwrap().unwrap();
    resumed.restore_stats(stats, streak);
    resumed.resume_trade_ids(store.last_trade_id().unwrap().unwrap());

    let id = resumed.open_trade(
        Symbol::new("MATCH_EURUSD"),
        Direction::Lower,
        Money::from_f64(10.0),
        90,
        Utc::now(),
    );
    assert_eq!(id, TradeId(3));
    resumed.settle(id, Outcome::Won).unwrap();
    store.record_trade(resumed.trade(id).unwrap()).unwrap();

    // the new row appends; the first session's rows survive
    assert_eq!(store.trade_count().unwrap(), 3);
    assert_eq!(store.last_trade_id().unwrap(), Some(TradeId(3)));
    assert_eq!(resumed.stats().total_trades, 3);
}

#[tokio::test]
async fn test_settlements_only_fire_when_due() {
    let feed = FixedFeed::new(uptrend_snapshot());
    let broker = ScriptedBroker::new([Outcome::Won]);
    let mut bot = make_loop(Ok(confident_reply(90)), broker, feed, true);

    let t0 = Utc::now();
    bot.tick(t0).await.unwrap();

    // half the contract duration: nothing matures
    let settled = bot.settle_due(t0 + Duration::seconds(30)).await;
    assert!(settled.is_empty());
    assert_eq!(bot.engine().stats().total_trades, 0);

    let settled = bot.settle_due(t0 + Duration::minutes(1)).await;
    assert_eq!(settled.len(), 1);
    assert_eq!(bot.engine().stats().total_trades, 1);
}
