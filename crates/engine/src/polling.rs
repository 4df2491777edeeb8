use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use common::{Broker, Error, Ledger, Quote, QuoteSource, TradeIntent};
use strategy::{DecisionEngine, IndicatorBank, SignalSource};

/// Bounded fixed-delay retry for one quote fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per cycle, including the first.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollingSettings {
    pub interval: Duration,
    pub retry: RetryPolicy,
    /// Upper bound on a single fetch attempt.
    pub fetch_timeout: Duration,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of one polling cycle for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A quote arrived and was fed to the engine. `intent` is the intent the
    /// broker filled, if any.
    Processed {
        attempts: u32,
        intent: Option<TradeIntent>,
    },
    /// Every attempt failed, or shutdown interrupted the retries. The engine
    /// was not touched.
    Skipped { attempts: u32 },
}

/// One symbol's polling loop. Owns its decision engine exclusively.
pub struct SymbolWorker<S = IndicatorBank> {
    engine: DecisionEngine<S>,
    source: Arc<dyn QuoteSource>,
    broker: Arc<dyn Broker>,
    ledger: Arc<dyn Ledger>,
    settings: PollingSettings,
}

impl<S: SignalSource> SymbolWorker<S> {
    pub fn new(
        engine: DecisionEngine<S>,
        source: Arc<dyn QuoteSource>,
        broker: Arc<dyn Broker>,
        ledger: Arc<dyn Ledger>,
        settings: PollingSettings,
    ) -> Self {
        Self {
            engine,
            source,
            broker,
            ledger,
            settings,
        }
    }

    /// Fetch with retry, then step the engine and forward any intent.
    pub async fn run_cycle(&mut self, shutdown: &mut watch::Receiver<bool>) -> CycleOutcome {
        let (quote, attempts) = match self.fetch_with_retry(shutdown).await {
            Ok(fetched) => fetched,
            Err(attempts) => return CycleOutcome::Skipped { attempts },
        };

        let bar = quote.to_bar();
        let cash = self.broker.available_cash().await;
        let intent = match self.engine.next(&bar, cash) {
            Some(intent) => self.dispatch(intent).await,
            None => None,
        };
        CycleOutcome::Processed { attempts, intent }
    }

    async fn fetch_with_retry(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(Quote, u32), u32> {
        let symbol = self.engine.symbol();
        let max_attempts = self.settings.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let result = tokio::time::timeout(self.settings.fetch_timeout, self.source.quote(symbol))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::DataUnavailable(format!(
                        "quote fetch timed out after {:?}",
                        self.settings.fetch_timeout
                    )))
                });

            match result {
                Ok(quote) => {
                    debug!(symbol = %symbol, price = quote.price, attempt, "Quote received");
                    return Ok((quote, attempt));
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        symbol = %symbol,
                        attempt,
                        max_attempts,
                        delay = ?self.settings.retry.delay,
                        error = %e,
                        "Quote fetch failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.retry.delay) => {}
                        _ = shutdown.changed() => {
                            info!(symbol = %symbol, "Shutdown during retry delay");
                            return Err(attempt);
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        symbol = %symbol,
                        attempts = attempt,
                        error = %e,
                        "Quote unavailable, skipping this cycle"
                    );
                    return Err(attempt);
                }
            }
        }
        Err(max_attempts)
    }

    /// Execute, then record. A rejected intent is rolled back in the engine
    /// and not recorded.
    async fn dispatch(&mut self, intent: TradeIntent) -> Option<TradeIntent> {
        match self.broker.execute(&intent).await {
            Ok(fill) => info!(
                symbol = %fill.symbol,
                action = %fill.action,
                price = fill.fill_price,
                qty = fill.quantity,
                fee = fill.fee,
                "Paper fill"
            ),
            Err(e) => {
                error!(symbol = %intent.symbol, action = %intent.action, error = %e, "Broker rejected intent");
                self.engine.reject(&intent);
                return None;
            }
        }
        if let Err(e) = self.ledger.record(&intent).await {
            error!(symbol = %intent.symbol, id = %intent.id, error = %e, "Failed to record intent");
        }
        Some(intent)
    }

    /// Poll on a fixed cadence until `shutdown` flips to `true`. A cycle in
    /// progress is finished before exiting.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let symbol = self.engine.symbol().to_string();
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(symbol = %symbol, interval = ?self.settings.interval, "Polling worker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            if let CycleOutcome::Processed { intent: Some(intent), .. } =
                self.run_cycle(&mut shutdown).await
            {
                debug!(symbol = %symbol, action = %intent.action, "Cycle produced an intent");
            }
            if *shutdown.borrow() {
                break;
            }
        }

        info!(
            symbol = %symbol,
            position = %self.engine.position().status,
            "Polling worker stopped"
        );
    }
}

/// Drives live polling: one task per symbol, each with its own engine.
/// A failure for one symbol never delays or affects another.
pub struct PollingController<S = IndicatorBank> {
    workers: Vec<SymbolWorker<S>>,
    source: Arc<dyn QuoteSource>,
    broker: Arc<dyn Broker>,
    ledger: Arc<dyn Ledger>,
    settings: PollingSettings,
}

impl<S: SignalSource + Sync + 'static> PollingController<S> {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        broker: Arc<dyn Broker>,
        ledger: Arc<dyn Ledger>,
        settings: PollingSettings,
    ) -> Self {
        Self {
            workers: Vec::new(),
            source,
            broker,
            ledger,
            settings,
        }
    }

    pub fn add_engine(&mut self, engine: DecisionEngine<S>) {
        self.workers.push(SymbolWorker::new(
            engine,
            self.source.clone(),
            self.broker.clone(),
            self.ledger.clone(),
            self.settings,
        ));
    }

    pub fn symbols(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.engine.symbol().to_string()).collect()
    }

    /// Spawn one task per symbol.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.workers
            .into_iter()
            .map(|w| tokio::spawn(w.run(shutdown.clone())))
            .collect()
    }

    /// Spawn every worker and wait for all of them to stop.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(symbols = ?self.symbols(), "PollingController starting");
        for handle in self.spawn(shutdown) {
            if let Err(e) = handle.await {
                error!(error = %e, "Polling worker panicked");
            }
        }
        info!("PollingController stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use common::{Action, Fill, PriceBar, Result};
    use risk::RiskConfig;
    use strategy::IndicatorSnapshot;
    use tokio::time::Instant;

    /// Fails the first `failures[symbol]` calls for a symbol, then quotes 100.
    #[derive(Default)]
    struct FlakySource {
        failures: HashMap<String, u32>,
        calls: Mutex<HashMap<String, u32>>,
    }

    impl FlakySource {
        fn failing(symbol: &str, times: u32) -> Self {
            Self {
                failures: HashMap::from([(symbol.to_string(), times)]),
                ..Default::default()
            }
        }

        fn calls(&self, symbol: &str) -> u32 {
            self.calls.lock().unwrap().get(symbol).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl QuoteSource for FlakySource {
        async fn quote(&self, symbol: &str) -> Result<Quote> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(symbol.to_string()).or_insert(0);
                *n += 1;
                *n
            };
            if n <= self.failures.get(symbol).copied().unwrap_or(0) {
                return Err(Error::DataUnavailable(format!("{symbol} down")));
            }
            Ok(Quote {
                timestamp: Utc::now(),
                symbol: symbol.to_string(),
                price: 100.0,
                volume: 1.0,
            })
        }
    }

    /// Counts updates and always reports a bullish, valid snapshot.
    struct Counting {
        updates: Arc<AtomicUsize>,
    }

    impl SignalSource for Counting {
        fn update(&mut self, _bar: &PriceBar) -> IndicatorSnapshot {
            self.updates.fetch_add(1, Ordering::SeqCst);
            IndicatorSnapshot {
                valid: true,
                tsi: Some(10.0),
                macd_line: Some(1.0),
                macd_signal: Some(0.5),
                atr: Some(1.0),
                prev_atr: Some(1.0),
            }
        }

        fn warmup_len(&self) -> usize {
            0
        }
    }

    struct FixedBroker;

    #[async_trait]
    impl Broker for FixedBroker {
        async fn available_cash(&self) -> f64 {
            1000.0
        }

        async fn execute(&self, intent: &TradeIntent) -> Result<Fill> {
            Ok(Fill {
                intent_id: intent.id.clone(),
                symbol: intent.symbol.clone(),
                action: intent.action,
                fill_price: intent.price,
                quantity: intent.quantity,
                fee: 0.0,
                timestamp: Utc::now(),
            })
        }
    }

    /// Refuses every order, like a broker whose cash another worker just spent.
    struct RejectingBroker;

    #[async_trait]
    impl Broker for RejectingBroker {
        async fn available_cash(&self) -> f64 {
            1000.0
        }

        async fn execute(&self, intent: &TradeIntent) -> Result<Fill> {
            Err(Error::Broker(format!("Insufficient cash for {}", intent.symbol)))
        }
    }

    #[derive(Default)]
    struct MemoryLedger {
        rows: Mutex<Vec<TradeIntent>>,
    }

    #[async_trait]
    impl Ledger for MemoryLedger {
        async fn record(&self, intent: &TradeIntent) -> Result<()> {
            self.rows.lock().unwrap().push(intent.clone());
            Ok(())
        }
    }

    struct BrokenLedger;

    #[async_trait]
    impl Ledger for BrokenLedger {
        async fn record(&self, _intent: &TradeIntent) -> Result<()> {
            Err(Error::Ledger("disk full".into()))
        }
    }

    fn counting_engine(symbol: &str) -> (DecisionEngine<Counting>, Arc<AtomicUsize>) {
        let updates = Arc::new(AtomicUsize::new(0));
        let engine = DecisionEngine::with_source(
            symbol,
            Counting {
                updates: updates.clone(),
            },
            Arc::new(RiskConfig::default()),
        );
        (engine, updates)
    }

    fn worker(
        symbol: &str,
        source: Arc<dyn QuoteSource>,
        ledger: Arc<dyn Ledger>,
    ) -> (SymbolWorker<Counting>, Arc<AtomicUsize>) {
        let (engine, updates) = counting_engine(symbol);
        let w = SymbolWorker::new(engine, source, Arc::new(FixedBroker), ledger, PollingSettings::default());
        (w, updates)
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_then_success_takes_three_attempts() {
        let source = Arc::new(FlakySource::failing("BTC", 2));
        let ledger = Arc::new(MemoryLedger::default());
        let (mut w, updates) = worker("BTC", source.clone(), ledger.clone());
        let (_tx, mut rx) = watch::channel(false);

        let started = Instant::now();
        let outcome = w.run_cycle(&mut rx).await;

        let CycleOutcome::Processed { attempts, intent } = outcome else {
            panic!("expected a processed cycle, got {outcome:?}");
        };
        assert_eq!(attempts, 3);
        assert_eq!(source.calls("BTC"), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10), "two 5s delays");
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        let intent = intent.expect("bullish snapshot with cash enters");
        assert_eq!(intent.action, Action::Buy);
        assert_eq!(ledger.rows.lock().unwrap().len(), 1);
        assert!(w.engine.position().is_long());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_skip_without_touching_engine() {
        let source = Arc::new(FlakySource::failing("BTC", 3));
        let (mut w, updates) = worker("BTC", source.clone(), Arc::new(MemoryLedger::default()));
        let (_tx, mut rx) = watch::channel(false);

        let started = Instant::now();
        assert_eq!(w.run_cycle(&mut rx).await, CycleOutcome::Skipped { attempts: 3 });
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert_eq!(updates.load(Ordering::SeqCst), 0);
        assert!(!w.engine.position().is_long());

        // The next cycle starts fresh.
        assert!(matches!(
            w.run_cycle(&mut rx).await,
            CycleOutcome::Processed { attempts: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn ledger_failure_keeps_the_decision() {
        let (mut w, _) = worker("BTC", Arc::new(FlakySource::default()), Arc::new(BrokenLedger));
        let (_tx, mut rx) = watch::channel(false);

        let outcome = w.run_cycle(&mut rx).await;
        assert!(matches!(outcome, CycleOutcome::Processed { intent: Some(_), .. }));
        assert!(w.engine.position().is_long());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_buy_is_rolled_back_and_not_recorded() {
        let ledger = Arc::new(MemoryLedger::default());
        let (engine, updates) = counting_engine("BTC");
        let mut w = SymbolWorker::new(
            engine,
            Arc::new(FlakySource::default()),
            Arc::new(RejectingBroker),
            ledger.clone(),
            PollingSettings::default(),
        );
        let (_tx, mut rx) = watch::channel(false);

        for _ in 0..2 {
            let outcome = w.run_cycle(&mut rx).await;
            assert_eq!(outcome, CycleOutcome::Processed { attempts: 1, intent: None });
            assert!(!w.engine.position().is_long());
        }
        assert_eq!(updates.load(Ordering::SeqCst), 2);
        assert!(ledger.rows.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_retry_delay() {
        let source = Arc::new(FlakySource::failing("BTC", u32::MAX));
        let (mut w, _) = worker("BTC", source.clone(), Arc::new(MemoryLedger::default()));
        let (tx, mut rx) = watch::channel(false);

        let started = Instant::now();
        let cycle = async { w.run_cycle(&mut rx).await };
        let stop = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(true).unwrap();
        };
        let (outcome, ()) = tokio::join!(cycle, stop);

        assert_eq!(outcome, CycleOutcome::Skipped { attempts: 1 });
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(source.calls("BTC"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_symbol_does_not_affect_others() {
        let source = Arc::new(FlakySource::failing("BAD", u32::MAX));
        let ledger = Arc::new(MemoryLedger::default());
        let mut controller: PollingController<Counting> = PollingController::new(
            source.clone(),
            Arc::new(FixedBroker),
            ledger.clone(),
            PollingSettings::default(),
        );
        let (bad, bad_updates) = counting_engine("BAD");
        let (good, good_updates) = counting_engine("GOOD");
        controller.add_engine(bad);
        controller.add_engine(good);
        assert_eq!(controller.symbols(), vec!["BAD", "GOOD"]);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(controller.run(rx));

        // Ticks at 0s, 5s, 10s, 15s, 20s for GOOD.
        tokio::time::sleep(Duration::from_secs(22)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(bad_updates.load(Ordering::SeqCst), 0);
        assert!(source.calls("BAD") >= 3);
        assert!(good_updates.load(Ordering::SeqCst) >= 4);
        assert!(ledger.rows.lock().unwrap().iter().all(|i| i.symbol == "GOOD"));
    }
}
