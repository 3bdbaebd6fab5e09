//! Click-counter drain.
//!
//! The hot path only runs an atomic `INCR` against the fast KV; this module
//! moves the buffered counts into the durable store. A single long-lived
//! actor per process receives dirty codes over a bounded channel and drains
//! them opportunistically; a 60-second sweep over `clicks:*` guarantees
//! forward progress even when writes quiesce or touches get dropped.
//!
//! Each drain takes the `clicks_sync:<code>` advisory lock so at most one
//! drainer per code runs across processes, applies a single aggregate
//! `clicks = clicks + n` update, then subtracts exactly `n` from the counter.

use anyhow::{anyhow, Context, Result};
use deadpool_redis::redis::{cmd, AsyncCommands};
use deadpool_redis::{Connection, Pool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::storage::cached::{clicks_key, sync_key};
use crate::storage::LinkStore;

const QUEUE_CAPACITY: usize = 4096;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const LOCK_TTL_SECS: u64 = 10;
/// Deadline for one drain attempt or one sweep scan.
const OP_DEADLINE: Duration = Duration::from_secs(10);

enum DrainerMessage {
    Touch(String),
    Shutdown,
}

enum DrainOutcome {
    /// Counter was zero or absent.
    Empty,
    /// Another drainer holds the advisory lock.
    LockHeld,
    Applied(i64),
}

pub struct ClickDrainer {
    tx: mpsc::Sender<DrainerMessage>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ClickDrainer {
    pub fn spawn(store: Arc<dyn LinkStore>, redis: Pool) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let actor = DrainerActor { rx, redis, store };
        let handle = tokio::spawn(actor.run());
        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Mark a code dirty. Never blocks: a dropped touch is caught by the
    /// periodic sweep.
    pub fn touch(&self, code: &str) {
        if self
            .tx
            .try_send(DrainerMessage::Touch(code.to_string()))
            .is_err()
        {
            debug!(code, "drain queue full, deferring to periodic sweep");
        }
    }

    /// Final sweep, then stop the actor.
    pub async fn shutdown(&self) {
        if self.tx.send(DrainerMessage::Shutdown).await.is_err() {
            return;
        }
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "click drainer task failed to join");
            }
        }
    }
}

struct DrainerActor {
    rx: mpsc::Receiver<DrainerMessage>,
    redis: Pool,
    store: Arc<dyn LinkStore>,
}

impl DrainerActor {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(DrainerMessage::Touch(code)) => self.drain_one(&code).await,
                    Some(DrainerMessage::Shutdown) | None => {
                        self.sweep().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.sweep().await,
            }
        }
        info!("click drainer stopped");
    }

    /// Drain every code with a pending counter.
    async fn sweep(&self) {
        let codes = match tokio::time::timeout(OP_DEADLINE, self.pending_codes()).await {
            Ok(Ok(codes)) => codes,
            Ok(Err(err)) => {
                warn!(error = %err, "click sweep scan failed");
                return;
            }
            Err(_) => {
                warn!("click sweep scan deadline exceeded");
                return;
            }
        };
        for code in codes {
            self.drain_one(&code).await;
        }
    }

    async fn pending_codes(&self) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut iter = conn
            .scan_match::<_, String>("clicks:*")
            .await
            .context("scan click counters")?;
        let mut codes = Vec::new();
        while let Some(key) = iter.next_item().await {
            if let Some(code) = key.strip_prefix("clicks:") {
                codes.push(code.to_string());
            }
        }
        Ok(codes)
    }

    async fn drain_one(&self, code: &str) {
        match tokio::time::timeout(OP_DEADLINE, self.try_drain(code)).await {
            Ok(Ok(DrainOutcome::Applied(count))) => debug!(code, count, "drained clicks"),
            Ok(Ok(DrainOutcome::Empty | DrainOutcome::LockHeld)) => {}
            // Give up; the next touch or sweep retries.
            Ok(Err(err)) => warn!(code, error = %err, "click drain failed"),
            Err(_) => warn!(code, "click drain deadline exceeded"),
        }
    }

    async fn try_drain(&self, code: &str) -> Result<DrainOutcome> {
        let mut conn = self.conn().await?;

        // Elect a single drainer per code across processes.
        let acquired: Option<String> = cmd("SET")
            .arg(sync_key(code))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(LOCK_TTL_SECS)
            .query_async(&mut conn)
            .await
            .context("acquire drain lock")?;
        if acquired.is_none() {
            return Ok(DrainOutcome::LockHeld);
        }

        let outcome = self.apply(code, &mut conn).await;

        // Release the lock; its TTL is the backstop when this fails.
        let _: std::result::Result<(), _> = conn.del::<_, ()>(sync_key(code)).await;

        outcome
    }

    async fn apply(&self, code: &str, conn: &mut Connection) -> Result<DrainOutcome> {
        let count: i64 = conn
            .get::<_, Option<i64>>(clicks_key(code))
            .await
            .context("read click counter")?
            .unwrap_or(0);
        if count <= 0 {
            return Ok(DrainOutcome::Empty);
        }

        self.store
            .add_clicks(code, count)
            .await
            .context("apply click delta to durable store")?;

        // Subtract exactly the applied amount; increments that raced in since
        // the read stay in the counter for the next drain.
        conn.decr::<_, _, i64>(clicks_key(code), count)
            .await
            .context("subtract drained clicks")?;

        Ok(DrainOutcome::Applied(count))
    }

    async fn conn(&self) -> Result<Connection> {
        self.redis
            .get()
            .await
            .map_err(|err| anyhow!("redis pool: {err}"))
    }
}
