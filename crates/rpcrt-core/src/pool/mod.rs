//! Self-resizing pool of transport channels.
//!
//! New calls are spread round-robin across the active entries. Each entry
//! counts its in-flight calls; a periodic resize compares the peak load with
//! the per-channel bounds and grows or shrinks the pool, and an optional
//! refresh swaps every channel for a fresh one. Entries removed by either
//! path keep serving their in-flight calls and are shut down once idle.

mod call;
mod callable;
mod entry;
mod resize;
mod settings;


use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::error::{Code, Result, RpcError};
use crate::transport::{CallOptions, Channel, ChannelFactory, ChannelPrimer, MethodDescriptor};

pub use call::PooledCall;
pub use callable::{ChannelCallable, ChannelStreamingCallable};
pub use entry::{Entry, EntryState};
pub use settings::{ChannelPoolSettings, ResizePolicy};

use call::ReleaseGuard;

/// Attempts to find an active entry before `new_call` gives up. Only
/// exhausted when every pick races with a concurrent resize or refresh.
const NEW_CALL_ATTEMPTS: usize = 5;

/// Cheap-to-clone handle to a shared channel pool.
#[derive(Clone)]
pub struct ChannelPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    settings: ChannelPoolSettings,
    factory: Arc<dyn ChannelFactory>,
    primer: Option<Arc<dyn ChannelPrimer>>,
    entries: RwLock<Arc<Vec<Arc<Entry>>>>,
    cursor: AtomicUsize,
    next_entry_id: AtomicU64,
    /// Summed peak load of the last `peak_window` resize cycles.
    peaks: Mutex<VecDeque<usize>>,
    /// Serializes resize, refresh and shutdown.
    structure: Mutex<()>,
    closed: AtomicBool,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.maintenance).take() {
            handle.abort();
        }
    }
}

impl ChannelPool {
    /// Build a pool with `initial_channel_count` primed channels.
    ///
    /// Fails with [`RpcError::Configuration`] on invalid settings and with
    /// [`RpcError::ChannelCreation`] if the factory fails.
    pub fn create(
        settings: ChannelPoolSettings,
        factory: Arc<dyn ChannelFactory>,
        primer: Option<Arc<dyn ChannelPrimer>>,
    ) -> Result<Self> {
        settings.validate()?;
        let inner = Arc::new(PoolInner {
            settings,
            factory,
            primer,
            entries: RwLock::new(Arc::new(Vec::new())),
            cursor: AtomicUsize::new(0),
            next_entry_id: AtomicU64::new(0),
            peaks: Mutex::new(VecDeque::new()),
            structure: Mutex::new(()),
            closed: AtomicBool::new(false),
            maintenance: Mutex::new(None),
        });
        let initial = inner.create_entries(inner.settings.initial_channel_count)?;
        *inner.entries.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(initial);
        tracing::info!(
            channels = inner.settings.initial_channel_count,
            static_size = inner.settings.is_static_size(),
            "channel pool created"
        );
        Ok(Self { inner })
    }

    pub fn settings(&self) -> &ChannelPoolSettings {
        &self.inner.settings
    }

    /// Current entries, in routing order.
    pub fn entries(&self) -> Arc<Vec<Arc<Entry>>> {
        self.inner.snapshot()
    }

    pub fn size(&self) -> usize {
        self.inner.snapshot().len()
    }

    /// Calls in flight across the current entries.
    pub fn outstanding_rpcs(&self) -> usize {
        self.inner.snapshot().iter().map(|e| e.outstanding()).sum()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Create a call on the next entry in round-robin order.
    pub fn new_call(&self, method: &MethodDescriptor, options: &CallOptions) -> Result<PooledCall> {
        for _ in 0..NEW_CALL_ATTEMPTS {
            if self.is_closed() {
                return Err(RpcError::PoolClosed);
            }
            let snapshot = self.inner.snapshot();
            if snapshot.is_empty() {
                break;
            }
            let index = self.inner.cursor.fetch_add(1, Ordering::Relaxed) % snapshot.len();
            let entry = &snapshot[index];
            if !entry.retain() {
                continue;
            }
            let call = entry.channel().new_call(method, options);
            return Ok(PooledCall::new(call, ReleaseGuard::new(Arc::clone(entry))));
        }
        if self.is_closed() {
            return Err(RpcError::PoolClosed);
        }
        Err(RpcError::status(Code::Unavailable, "no active channel available"))
    }

    /// Run one resize cycle. Static pools never resize.
    pub fn resize(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.settings.is_static_size() {
            return Ok(());
        }
        let _structure = lock(&inner.structure);
        if self.is_closed() {
            return Ok(());
        }
        let snapshot = inner.snapshot();
        let cycle_peak: usize = snapshot.iter().map(|e| e.take_peak()).sum();
        let peak = {
            let mut peaks = lock(&inner.peaks);
            peaks.push_back(cycle_peak);
            while peaks.len() > inner.settings.resize.peak_window {
                peaks.pop_front();
            }
            peaks.iter().copied().max().unwrap_or(0)
        };

        let current = snapshot.len();
        let Some(target) = resize::target_size(current, peak, &inner.settings) else {
            return Ok(());
        };
        tracing::debug!(current, target, peak, "resizing channel pool");
        if target > current {
            let added = inner.create_entries(target - current)?;
            let mut grown = Vec::with_capacity(target);
            grown.extend(snapshot.iter().cloned());
            grown.extend(added);
            inner.publish(grown);
        } else {
            let kept = snapshot[..target].to_vec();
            inner.publish(kept);
            for entry in &snapshot[target..] {
                entry.request_shutdown();
            }
        }
        Ok(())
    }

    /// Replace every channel with a freshly created and primed one, then
    /// drain the old entries.
    pub fn refresh(&self) -> Result<()> {
        let inner = &self.inner;
        let _structure = lock(&inner.structure);
        if self.is_closed() {
            return Ok(());
        }
        let old = inner.snapshot();
        let fresh = inner.create_entries(old.len())?;
        inner.publish(fresh);
        for entry in old.iter() {
            entry.request_shutdown();
        }
        tracing::info!(channels = old.len(), "refreshed channel pool");
        Ok(())
    }

    /// Stop maintenance, drain every entry and reject further calls.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if let Some(handle) = lock(&inner.maintenance).take() {
            handle.abort();
        }
        let _structure = lock(&inner.structure);
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let old = inner.snapshot();
        inner.publish(Vec::new());
        for entry in old.iter() {
            entry.request_shutdown();
        }
        tracing::info!(channels = old.len(), "channel pool shut down");
    }

    /// Spawn the periodic resize and refresh task on the current tokio
    /// runtime. A no-op for a static pool without preemptive refresh, or if
    /// the task is already running.
    pub fn start_maintenance(&self) -> Result<()> {
        let settings = &self.inner.settings;
        let resizing = !settings.is_static_size();
        let refreshing = settings.preemptive_refresh_enabled;
        if !resizing && !refreshing {
            return Ok(());
        }
        let mut slot = lock(&self.inner.maintenance);
        if slot.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| RpcError::config("channel pool maintenance requires a tokio runtime"))?;
        let mut resize_tick = resizing.then(|| ticker(settings.resize.resize_interval));
        let mut refresh_tick = refreshing.then(|| ticker(settings.refresh_interval));
        let weak = Arc::downgrade(&self.inner);
        *slot = Some(runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = next_tick(&mut resize_tick) => {
                        let Some(pool) = upgrade(&weak) else { break };
                        if let Err(e) = pool.resize() {
                            tracing::warn!(error = %e, "channel pool resize failed");
                        }
                    }
                    _ = next_tick(&mut refresh_tick) => {
                        let Some(pool) = upgrade(&weak) else { break };
                        if let Err(e) = pool.refresh() {
                            tracing::warn!(error = %e, "channel pool refresh failed");
                        }
                    }
                }
            }
        }));
        Ok(())
    }
}

/// First tick one `period` from now.
fn ticker(period: Duration) -> Interval {
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}

/// Completes on the next tick; never completes for a disabled schedule.
async fn next_tick(tick: &mut Option<Interval>) {
    match tick {
        Some(tick) => {
            tick.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn upgrade(weak: &Weak<PoolInner>) -> Option<ChannelPool> {
    weak.upgrade().map(|inner| ChannelPool { inner })
}

impl PoolInner {
    fn snapshot(&self) -> Arc<Vec<Arc<Entry>>> {
        Arc::clone(&self.entries.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, entries: Vec<Arc<Entry>>) {
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(entries);
    }

    /// Create and prime `count` channels. On failure the channels created so
    /// far are shut down and nothing is published.
    fn create_entries(&self, count: usize) -> Result<Vec<Arc<Entry>>> {
        let mut created: Vec<Arc<dyn Channel>> = Vec::with_capacity(count);
        for _ in 0..count {
            match self.factory.create_channel() {
                Ok(channel) => created.push(channel),
                Err(e) => {
                    for channel in &created {
                        channel.shutdown();
                    }
                    return Err(match e {
                        RpcError::ChannelCreation(_) => e,
                        other => RpcError::ChannelCreation(other.to_string()),
                    });
                }
            }
        }
        Ok(created
            .into_iter()
            .map(|channel| {
                if let Some(primer) = &self.primer {
                    primer.prime_channel(channel.as_ref());
                }
                let id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);
                Arc::new(Entry::new(id, channel))
            })
            .collect())
    }
}
