use chrono::Utc;
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::ServiceError;
use crate::identity::{extract_owner_email, make_identity_email, sanitize_email};
use crate::inbound::ClientStat;
use crate::logger::log;
use crate::panel::{PanelApi, PanelPool};
use crate::store::{LedgerStore, Subscription, SubscriptionStore, TrafficUsage, UsageSample};

/// Outcome of one panel's sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelSyncReport {
    pub panel: String,
    pub inbounds: usize,
    pub matched: usize,
    pub skipped: usize,
    /// Bytes across matched identities
    pub up: u64,
    pub down: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnlineStatus {
    pub online: bool,
    pub online_emails: Vec<String>,
    /// Identities the subscriber holds on the panel
    pub identities: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundUsage {
    pub inbound_id: i64,
    pub email: String,
    pub up: u64,
    pub down: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageReport {
    pub inbounds: Vec<InboundUsage>,
    pub up: u64,
    pub down: u64,
    pub total: u64,
}

pub struct TrafficReconciliationService {
    panels: Arc<PanelPool>,
    subscriptions: Arc<dyn SubscriptionStore>,
    ledger: Arc<dyn LedgerStore>,
    sync_guard: Mutex<()>,
}

/// Resolve identity emails to subscriptions: stored email first, then the
/// owner email behind the inbound prefix. Identities carry the sanitized
/// owner email, so that is the key.
struct Resolver<'a> {
    by_client_email: HashMap<&'a str, usize>,
    by_owner_email: HashMap<String, usize>,
}

impl<'a> Resolver<'a> {
    fn new(subscriptions: &'a [Subscription]) -> Self {
        let mut by_client_email = HashMap::new();
        let mut by_owner_email = HashMap::new();
        for (i, s) in subscriptions.iter().enumerate() {
            if let Some(email) = s.client_email.as_deref() {
                by_client_email.insert(email, i);
            }
            by_owner_email.entry(sanitize_email(&s.owner_email)).or_insert(i);
        }
        Self {
            by_client_email,
            by_owner_email,
        }
    }

    fn resolve(&self, email: &str) -> Option<usize> {
        self.by_client_email.get(email).copied().or_else(|| {
            extract_owner_email(email).and_then(|owner| self.by_owner_email.get(owner).copied())
        })
    }
}

fn sample_total(stat: &ClientStat) -> u64 {
    if stat.total > 0 {
        stat.total
    } else {
        stat.up + stat.down
    }
}

impl TrafficReconciliationService {
    pub fn new(
        panels: Arc<PanelPool>,
        subscriptions: Arc<dyn SubscriptionStore>,
        ledger: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            panels,
            subscriptions,
            ledger,
            sync_guard: Mutex::new(()),
        }
    }

    fn panel(&self, panel_id: &str) -> Result<Arc<dyn PanelApi>, ServiceError> {
        self.panels
            .get(panel_id)
            .ok_or_else(|| ServiceError::UnknownPanel(panel_id.to_string()))
    }

    /// Sync one panel. Fails fast with `SyncInProgress` when another pass is
    /// already running in this process.
    pub async fn sync_one(&self, panel_id: &str) -> Result<PanelSyncReport, ServiceError> {
        let _guard = self
            .sync_guard
            .try_lock()
            .map_err(|_| ServiceError::SyncInProgress)?;
        self.sync_panel(panel_id).await
    }

    /// Sync every configured panel concurrently; each panel reports its own
    /// outcome
    pub async fn sync_all(
        &self,
    ) -> Result<Vec<(String, Result<PanelSyncReport, ServiceError>)>, ServiceError> {
        let _guard = self
            .sync_guard
            .try_lock()
            .map_err(|_| ServiceError::SyncInProgress)?;

        let ids: Vec<String> = self.panels.iter().map(|(id, _)| id.clone()).collect();
        let results = join_all(ids.iter().map(|id| self.sync_panel(id))).await;

        let mut outcomes = Vec::with_capacity(ids.len());
        for (id, result) in ids.into_iter().zip(results) {
            if let Err(e) = &result {
                log::warn!(panel = %id, error = %e, "Panel sync failed");
            }
            outcomes.push((id, result));
        }
        Ok(outcomes)
    }

    async fn sync_panel(&self, panel_id: &str) -> Result<PanelSyncReport, ServiceError> {
        let panel = self.panel(panel_id)?;
        let inbounds = panel.list_inbounds(false).await?;
        let subscriptions = self.subscriptions.active_subscriptions(panel_id).await?;

        let mut report = PanelSyncReport {
            panel: panel_id.to_string(),
            inbounds: inbounds.len(),
            ..Default::default()
        };

        let now = Utc::now();
        let mut totals: HashMap<usize, TrafficUsage> = HashMap::new();
        let mut samples = Vec::new();
        {
            let resolver = Resolver::new(&subscriptions);
            for inbound in &inbounds {
                for stat in inbound.client_stats.iter().filter(|s| !s.email.is_empty()) {
                    let Some(index) = resolver.resolve(&stat.email) else {
                        log::debug!(
                            panel = %panel_id,
                            inbound_id = inbound.id,
                            email = %stat.email,
                            "Unmatched identity skipped"
                        );
                        report.skipped += 1;
                        continue;
                    };
                    report.matched += 1;
                    report.up += stat.up;
                    report.down += stat.down;

                    let usage = totals.entry(index).or_default();
                    usage.up += stat.up;
                    usage.down += stat.down;
                    usage.total = usage.up + usage.down;

                    samples.push(UsageSample {
                        subscription_id: subscriptions[index].id.clone(),
                        inbound_id: inbound.id,
                        email: stat.email.clone(),
                        up: stat.up,
                        down: stat.down,
                        total: sample_total(stat),
                        reset_count: stat.reset,
                        recorded_at: now,
                    });
                }
            }
        }

        let mut updated = Vec::with_capacity(totals.len());
        for (index, usage) in totals {
            let mut subscription = subscriptions[index].clone();
            subscription.usage = usage;
            subscription.last_traffic_sync = Some(now);
            updated.push(subscription);
        }
        self.subscriptions.save_subscriptions(&updated).await?;
        self.ledger.append_samples(samples).await?;

        log::info!(
            panel = %panel_id,
            inbounds = report.inbounds,
            matched = report.matched,
            skipped = report.skipped,
            "Traffic synced"
        );
        Ok(report)
    }

    /// Identity emails the subscriber holds, one per holding inbound
    async fn identities(
        &self,
        panel: &dyn PanelApi,
        subscription: &Subscription,
    ) -> Result<Vec<(i64, String)>, ServiceError> {
        let inbounds = panel.list_inbounds(true).await?;
        Ok(inbounds
            .iter()
            .filter_map(|inbound| {
                let email = make_identity_email(inbound.id, &subscription.owner_email);
                inbound
                    .find_client(subscription.client_id.as_deref(), &email)
                    .map(|c| (inbound.id, c.email.clone()))
            })
            .collect())
    }

    pub async fn online_status(
        &self,
        subscription: &Subscription,
    ) -> Result<OnlineStatus, ServiceError> {
        let panel = self.panel(&subscription.panel_id)?;
        let identities = self.identities(panel.as_ref(), subscription).await?;
        let online: HashSet<String> = panel
            .online_clients()
            .await?
            .into_iter()
            .map(|c| c.email)
            .collect();

        let online_emails: Vec<String> = identities
            .iter()
            .filter(|(_, email)| online.contains(email))
            .map(|(_, email)| email.clone())
            .collect();

        Ok(OnlineStatus {
            online: !online_emails.is_empty(),
            online_emails,
            identities: identities.len(),
        })
    }

    /// Live per-inbound counters for the subscriber; an inbound whose stats
    /// cannot be read is left out
    pub async fn usage_report(
        &self,
        subscription: &Subscription,
    ) -> Result<UsageReport, ServiceError> {
        let panel = self.panel(&subscription.panel_id)?;
        let identities = self.identities(panel.as_ref(), subscription).await?;

        let lookups = identities.iter().map(|(inbound_id, email)| {
            let panel = Arc::clone(&panel);
            async move { (*inbound_id, email, panel.client_stats(email).await) }
        });

        let mut report = UsageReport::default();
        for (inbound_id, email, result) in join_all(lookups).await {
            match result {
                Ok(Some(stat)) => {
                    report.up += stat.up;
                    report.down += stat.down;
                    report.inbounds.push(InboundUsage {
                        inbound_id,
                        email: email.clone(),
                        up: stat.up,
                        down: stat.down,
                        total: stat.up + stat.down,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!(
                        inbound_id = inbound_id,
                        email = %email,
                        error = %e,
                        "Failed to read client stats"
                    );
                }
            }
        }
        report.total = report.up + report.down;
        Ok(report)
    }
}
