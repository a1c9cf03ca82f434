//! Transaction sources and the producer task
//!
//! [`SyntheticSource`] simulates one bank's card traffic: normal transactions
//! carry a weakened bank-specific behavioural signature, fraudulent ones carry
//! a shared fraud signature so they look alike across banks.

use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use effin_common::time::now_seconds;
use effin_common::Transaction;

use crate::pipeline::QueueSender;

/// Shared fraud signature carried by fraudulent traffic on every bank
pub const FRAUD_SIGNATURE: [f64; 4] = [0.25, 0.22, 0.31, 0.45];

const NORMAL_SIGNATURE_WEIGHT: f64 = 0.3;
const NORMAL_NOISE_STD: f64 = 0.05;
const FRAUD_NOISE_STD: f64 = 0.01;
const MIN_TPS: f64 = 0.1;

const MERCHANTS_NORMAL: &[&str] = &[
    "GroceryMart",
    "GasStation",
    "OnlineStore",
    "CafeLux",
    "ElectronicsHub",
    "TravelDesk",
];
const MERCHANTS_FRAUD: &[&str] = &["EvilMuleNetwork", "SuspiciousShop", "CardTestingBot"];
const LOCATIONS_NORMAL: &[&str] = &["Mumbai", "Delhi", "Bengaluru", "Hyderabad", "Pune"];
const LOCATIONS_FRAUD: &[&str] = &["Unknown", "ProxyServer", "DarkWebNode"];
const DEVICES_NORMAL: &[&str] = &["devA", "devB", "devC", "devD"];
const DEVICES_FRAUD: &[&str] = &["fraudDevice001", "fraudDevice002"];

/// Known banks' normal signatures
pub fn bank_signature(bank_id: &str) -> Option<[f64; 4]> {
    match bank_id {
        "bank1" => Some([0.10, 0.20, 0.30, 0.40]),
        "bank2" => Some([0.55, 0.42, 0.28, 0.15]),
        "bank3" => Some([0.90, 0.10, 0.10, 0.30]),
        _ => None,
    }
}

/// Lazy stream of transactions
#[async_trait]
pub trait TransactionSource: Send {
    /// Next transaction, or `None` when the source is exhausted
    async fn next(&mut self) -> Option<Transaction>;
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate-limited synthetic bank traffic
pub struct SyntheticSource {
    bank_id: String,
    signature: [f64; 4],
    fraud_probability: f64,
    rng: StdRng,
    limiter: Option<DirectLimiter>,
}

impl SyntheticSource {
    /// Source emitting about `tps` transactions per second
    pub fn new(bank_id: impl Into<String>, tps: f64, fraud_probability: f64) -> Self {
        let period = Duration::from_secs_f64(1.0 / tps.max(MIN_TPS));
        let limiter = Quota::with_period(period).map(RateLimiter::direct);
        Self::build(bank_id.into(), fraud_probability, StdRng::from_entropy(), limiter)
    }

    /// Unthrottled, seeded source for tests and benchmarks
    pub fn unthrottled(bank_id: impl Into<String>, fraud_probability: f64, seed: u64) -> Self {
        Self::build(bank_id.into(), fraud_probability, StdRng::seed_from_u64(seed), None)
    }

    fn build(bank_id: String, fraud_probability: f64, mut rng: StdRng, limiter: Option<DirectLimiter>) -> Self {
        let signature = bank_signature(&bank_id).unwrap_or_else(|| {
            let random: [f64; 4] = [rng.gen(), rng.gen(), rng.gen(), rng.gen()];
            warn!(bank = %bank_id, signature = ?random, "Unknown bank, using a random signature");
            random
        });
        Self {
            bank_id,
            signature,
            fraud_probability: fraud_probability.clamp(0.0, 1.0),
            rng,
            limiter,
        }
    }

    fn gaussian(&mut self, std_dev: f64) -> f64 {
        // Box-Muller
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        std_dev * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    fn pick(&mut self, pool: &[&str]) -> String {
        pool.choose(&mut self.rng).copied().unwrap_or_default().to_string()
    }

    /// Generate one transaction without waiting on the rate limit
    pub fn generate(&mut self) -> Transaction {
        let is_fraud = self.rng.gen_bool(self.fraud_probability);

        let (base, weight, noise_std) = if is_fraud {
            (FRAUD_SIGNATURE, 1.0, FRAUD_NOISE_STD)
        } else {
            (self.signature, NORMAL_SIGNATURE_WEIGHT, NORMAL_NOISE_STD)
        };
        let mut signature = Vec::with_capacity(base.len());
        for b in base {
            signature.push(b * weight + self.gaussian(noise_std));
        }

        let (merchant, location, device, amount) = if is_fraud {
            (
                self.pick(MERCHANTS_FRAUD),
                self.pick(LOCATIONS_FRAUD),
                self.pick(DEVICES_FRAUD),
                self.rng.gen_range(4500.0..=5000.0),
            )
        } else {
            (
                self.pick(MERCHANTS_NORMAL),
                self.pick(LOCATIONS_NORMAL),
                self.pick(DEVICES_NORMAL),
                self.rng.gen_range(50.0..=3000.0),
            )
        };

        Transaction {
            id: Uuid::new_v4().to_string(),
            timestamp: now_seconds(),
            amount: (amount * 100.0f64).round() / 100.0,
            merchant_category: merchant,
            location,
            device_fingerprint: device,
            signature,
            origin: self.bank_id.clone(),
            is_fraud,
        }
    }
}

#[async_trait]
impl TransactionSource for SyntheticSource {
    async fn next(&mut self) -> Option<Transaction> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        Some(self.generate())
    }
}

/// Fixed list of transactions, yielded in order
#[derive(Debug, Default)]
pub struct ReplaySource {
    items: VecDeque<Transaction>,
}

impl ReplaySource {
    pub fn new(items: impl IntoIterator<Item = Transaction>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }
}

#[async_trait]
impl TransactionSource for ReplaySource {
    async fn next(&mut self) -> Option<Transaction> {
        self.items.pop_front()
    }
}

/// Move transactions from `source` into the queue until cancelled
///
/// Blocks on a full queue. Returns the number of transactions enqueued.
pub async fn run_producer<S>(mut source: S, queue: QueueSender, cancel: CancellationToken) -> u64
where
    S: TransactionSource,
{
    info!(capacity = queue.capacity(), "Producer started");
    let mut produced = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            tx = source.next() => tx,
        };
        let Some(tx) = next else {
            info!(produced, "Source exhausted");
            break;
        };

        let tx_id = tx.id.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(tx_id = %tx_id, "Dropping in-flight transaction on shutdown");
                break;
            }
            result = queue.enqueue(tx) => {
                if result.is_err() {
                    warn!(tx_id = %tx_id, "Queue closed, producer stopping");
                    break;
                }
                produced += 1;
            }
        }
    }

    info!(produced, "Producer stopped");
    produced
}
