//! The dispatch engine: routes jobs to provider adapters, drives the
//! bounded retry loop, and post-processes errors and canonical-id updates.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadence::{Counted, CountedExt, StatsdClient};
use futures::future::BoxFuture;
use tokio::sync::Notify;

use crate::notification::Notification;
use crate::routers::apns::router::ApnsRouter;
use crate::routers::c2dm::router::C2dmRouter;
use crate::routers::gcm::router::GcmRouter;
use crate::routers::{Router, RouterType, Routers};
use crate::settings::Settings;

/// Resend attempts before a job is dropped.
const MAX_RETRIES: u32 = 10;

/// Per-provider delivery counters, updated from concurrently running jobs.
#[derive(Debug, Default)]
pub struct Stats {
    pub running: AtomicI64,
    pub apns: AtomicU64,
    pub apns_errors: AtomicU64,
    pub gcm: AtomicU64,
    pub gcm_errors: AtomicU64,
    pub c2dm: AtomicU64,
    pub c2dm_errors: AtomicU64,
}

impl Stats {
    fn sent(&self, provider: RouterType) -> &AtomicU64 {
        match provider {
            RouterType::Apns => &self.apns,
            RouterType::Gcm => &self.gcm,
            RouterType::C2dm => &self.c2dm,
        }
    }

    fn errors(&self, provider: RouterType) -> &AtomicU64 {
        match provider {
            RouterType::Apns => &self.apns_errors,
            RouterType::Gcm => &self.gcm_errors,
            RouterType::C2dm => &self.c2dm_errors,
        }
    }
}

/// Routes every job to the adapter its provider tag names and owns the
/// retry scheduler tying the adapters together.
pub struct Dispatcher {
    routers: Routers,
    pub stats: Stats,
    metrics: Arc<StatsdClient>,
    quitting: AtomicBool,
    shutdown: Notify,
}

impl Dispatcher {
    pub fn new(settings: &Settings, metrics: Arc<StatsdClient>) -> Self {
        let http = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_millis(settings.connection_timeout_millis))
            .timeout(Duration::from_millis(settings.request_timeout_millis))
            .build()
            .expect("Could not generate request client");
        Self::with_routers(
            Routers {
                apns: Box::new(ApnsRouter::new(settings.apns.clone())),
                gcm: Box::new(GcmRouter::new(settings.gcm.clone(), http.clone())),
                c2dm: Box::new(C2dmRouter::new(settings.c2dm.clone(), http)),
            },
            metrics,
        )
    }

    pub fn with_routers(routers: Routers, metrics: Arc<StatsdClient>) -> Self {
        Self {
            routers,
            stats: Stats::default(),
            metrics,
            quitting: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Run a job on a fresh task.
    pub fn spawn_work(self: &Arc<Self>, job: Notification, auth: String) {
        let this = Arc::clone(self);
        // Type-erased so the work → resend → work cycle stays finite.
        let work: BoxFuture<'static, ()> = Box::pin(async move { this.work(job, auth).await });
        tokio::spawn(work);
    }

    /// Route one job to its provider adapter and post-process the outcome.
    pub async fn work(self: Arc<Self>, mut job: Notification, auth: String) {
        let Ok(provider) = RouterType::from_str(&job.provider) else {
            debug!("Dropping job for unknown provider {:?}", job.provider);
            return;
        };

        job.init();
        self.stats.running.fetch_add(1, Ordering::Relaxed);
        self.stats.sent(provider).fetch_add(1, Ordering::Relaxed);

        let status = self.routers.get(provider).push(&job, &auth).await;
        self.stats.running.fetch_sub(1, Ordering::Relaxed);

        if status.retry {
            debug!("Retrying job {} in {} seconds", job.guid, status.delay);
            let delay = status.delay;
            job.status = Some(status);
            self.resend(&mut job, &auth, delay).await;
            return;
        }

        if !status.ok() {
            warn!("Push errors for job {}: {}", job.guid, status);
            self.stats
                .errors(provider)
                .fetch_add(status.errors.len() as u64, Ordering::Relaxed);
            self.incr_error_metric(provider, status.errors.len());
            job.status = Some(status);
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.process_errors(job, auth).await });
            return;
        }

        debug!("Push ok for job {}: {}", job.guid, status);
        self.incr_sent_metric(provider);
        if !status.updates.is_empty() {
            job.status = Some(status);
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.process_updates(&job) });
        }
    }

    /// Bounded retry: wait out the provider's delay hint, else back off
    /// linearly on the retry counter, then re-enqueue with the same
    /// credential. The job is cloned at the spawn so the caller's retry
    /// counter keeps accumulating across further resends.
    async fn resend(self: &Arc<Self>, job: &mut Notification, auth: &str, delay: u64) {
        job.retries += 1;
        if job.retries > MAX_RETRIES {
            debug!(
                "Giving up on job {} (created {:?}) after {} retries",
                job.guid, job.created_at, MAX_RETRIES
            );
            return;
        }

        let wait = if delay == 0 {
            u64::from(job.retries)
        } else {
            delay
        };
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(wait)) => {}
            _ = self.shutdown.notified() => {}
        }

        if self.quitting() {
            return;
        }
        self.spawn_work(job.clone(), auth.to_string());
    }

    /// Classify recorded errors: registration failures signal the removal
    /// hook, each transient failure re-enqueues the job through the retry
    /// scheduler, caller errors are dropped.
    async fn process_errors(self: Arc<Self>, mut job: Notification, auth: String) {
        let Some(status) = job.status.take() else {
            return;
        };

        for (device_token, error) in &status.errors {
            warn!("{} {}", error, device_token);
            if error.is_removal() {
                self.remove_token(device_token, None);
            } else if error.is_transient() {
                self.resend(&mut job, &auth, status.delay).await;
            }
        }
    }

    /// Canonical-id updates reported by the provider.
    fn process_updates(&self, job: &Notification) {
        let Some(status) = job.status.as_ref() else {
            return;
        };
        for (device_token, canonical_id) in &status.updates {
            self.remove_token(device_token, Some(canonical_id));
        }
    }

    /// Upstream-registry hook for dead or superseded tokens. The registry
    /// lives outside this service; the signal is logged.
    fn remove_token(&self, device_token: &str, replacement: Option<&str>) {
        match replacement {
            Some(canonical_id) => info!("Updating token {} -> {}", device_token, canonical_id),
            None => info!("Removing token {}", device_token),
        }
    }

    /// Stop future retry re-enqueues and wake sleeping schedulers. Safe to
    /// call more than once, including concurrently.
    pub fn close(&self) {
        if self.quitting.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Dispatcher closing");
        self.shutdown.notify_waiters();
    }

    pub fn quitting(&self) -> bool {
        self.quitting.load(Ordering::SeqCst)
    }

    fn incr_sent_metric(&self, provider: RouterType) {
        self.metrics
            .incr_with_tags("notification.bridge.sent")
            .with_tag("platform", provider.as_str())
            .send();
    }

    fn incr_error_metric(&self, provider: RouterType, count: usize) {
        self.metrics
            .count_with_tags("notification.bridge.error", count as i64)
            .with_tag("platform", provider.as_str())
            .send();
    }
}
