//! Ensure, update, remove and reset a subscriber on every eligible inbound

use futures_util::future::join_all;
use std::sync::Arc;
use uuid::Uuid;

use super::limits::{build_client, ClientLimits};
use super::IdDriftPolicy;
use crate::config::ProvisioningConfig;
use crate::error::ServiceError;
use crate::identity::make_identity_email;
use crate::inbound::{Client, Inbound};
use crate::logger::log;
use crate::panel::{PanelApi, PanelPool};
use crate::store::{Subscription, SubscriptionStore};

/// Panel holds a different client id than the one stored locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdDrift {
    pub inbound_id: i64,
    pub email: String,
    pub stored_id: Option<String>,
    pub panel_id: String,
    /// Stored id was overwritten with the panel's
    pub healed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFailure {
    pub inbound_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipReport {
    /// Client id now in effect for new clients
    pub client_id: String,
    pub eligible: usize,
    pub already_present: usize,
    pub created: usize,
    pub errors: Vec<InboundFailure>,
    pub drift: Vec<IdDrift>,
}

impl MembershipReport {
    /// At least one inbound holds the identity
    pub fn success(&self) -> bool {
        self.already_present + self.created > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitsReport {
    pub holding: usize,
    pub updated: usize,
    pub errors: Vec<InboundFailure>,
    /// Set when nothing held the identity and membership was ensured instead
    pub fell_back: Option<MembershipReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub holding: usize,
    pub removed: usize,
    pub errors: Vec<InboundFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub holding: usize,
    pub reset: usize,
    pub errors: Vec<InboundFailure>,
}

/// Inbound currently holding the subscriber, with the client found there
struct Holding {
    inbound_id: i64,
    client: Client,
}

pub struct ProvisioningService {
    panels: Arc<PanelPool>,
    subscriptions: Arc<dyn SubscriptionStore>,
    config: ProvisioningConfig,
}

impl ProvisioningService {
    pub fn new(
        panels: Arc<PanelPool>,
        subscriptions: Arc<dyn SubscriptionStore>,
        config: ProvisioningConfig,
    ) -> Self {
        Self {
            panels,
            subscriptions,
            config,
        }
    }

    pub fn drift_policy(&self) -> IdDriftPolicy {
        self.config.drift_policy
    }

    async fn load(&self, subscription_id: &str) -> Result<Subscription, ServiceError> {
        self.subscriptions
            .subscription(subscription_id)
            .await?
            .ok_or_else(|| ServiceError::UnknownSubscription(subscription_id.to_string()))
    }

    fn panel(&self, subscription: &Subscription) -> Result<Arc<dyn PanelApi>, ServiceError> {
        self.panels
            .get(&subscription.panel_id)
            .ok_or_else(|| ServiceError::UnknownPanel(subscription.panel_id.clone()))
    }

    /// Enabled inbounds speaking a supported protocol, read fresh
    async fn eligible_inbounds(&self, panel: &dyn PanelApi) -> Result<Vec<Inbound>, ServiceError> {
        let inbounds = panel.list_inbounds(false).await?;
        Ok(inbounds
            .into_iter()
            .filter(|i| i.is_eligible(&self.config.protocols))
            .collect())
    }

    fn holdings(inbounds: &[Inbound], subscription: &Subscription) -> Vec<Holding> {
        inbounds
            .iter()
            .filter_map(|inbound| {
                let email = make_identity_email(inbound.id, &subscription.owner_email);
                inbound
                    .find_client(subscription.client_id.as_deref(), &email)
                    .map(|client| Holding {
                        inbound_id: inbound.id,
                        client: client.clone(),
                    })
            })
            .collect()
    }

    pub async fn ensure_membership_by_id(
        &self,
        subscription_id: &str,
    ) -> Result<MembershipReport, ServiceError> {
        let subscription = self.load(subscription_id).await?;
        let limits = ClientLimits::from_subscription(&subscription);
        self.ensure_membership(&subscription, limits).await
    }

    /// Attach the subscriber to every eligible inbound that does not hold it
    /// yet. Lookup runs before any create, so repeating the call against an
    /// unchanged panel creates nothing.
    pub async fn ensure_membership(
        &self,
        subscription: &Subscription,
        limits: ClientLimits,
    ) -> Result<MembershipReport, ServiceError> {
        let panel = self.panel(subscription)?;
        let inbounds = self.eligible_inbounds(panel.as_ref()).await?;

        let stored_id = subscription.client_id.clone().filter(|id| !id.is_empty());
        let mut effective_id = stored_id.clone();
        let mut report = MembershipReport {
            eligible: inbounds.len(),
            ..Default::default()
        };
        let mut first_email: Option<String> = None;
        let mut missing = Vec::new();

        for inbound in &inbounds {
            let email = make_identity_email(inbound.id, &subscription.owner_email);
            match inbound.find_client(stored_id.as_deref(), &email) {
                Some(existing) => {
                    report.already_present += 1;
                    first_email.get_or_insert_with(|| existing.email.clone());
                    match &stored_id {
                        Some(stored) if *stored != existing.id => {
                            let healed = self.config.drift_policy == IdDriftPolicy::SelfHeal;
                            if healed && effective_id == stored_id {
                                effective_id = Some(existing.id.clone());
                            }
                            report.drift.push(IdDrift {
                                inbound_id: inbound.id,
                                email: email.clone(),
                                stored_id: Some(stored.clone()),
                                panel_id: existing.id.clone(),
                                healed,
                            });
                        }
                        None => {
                            effective_id.get_or_insert_with(|| existing.id.clone());
                        }
                        _ => {}
                    }
                }
                None => missing.push((inbound, email)),
            }
        }

        let client_id = effective_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let creates = missing.iter().map(|(inbound, email)| {
            let mut client = build_client(subscription, &client_id, email, inbound.protocol);
            limits.apply(&mut client);
            let panel = Arc::clone(&panel);
            async move {
                let result = panel.add_client(inbound.id, &client).await;
                (inbound.id, client.email, result)
            }
        });

        for (inbound_id, email, result) in join_all(creates).await {
            match result {
                Ok(()) => {
                    log::info!(
                        panel = %panel.name(),
                        inbound_id = inbound_id,
                        email = %email,
                        "Client created"
                    );
                    report.created += 1;
                    first_email.get_or_insert(email);
                }
                Err(e) => {
                    log::warn!(
                        panel = %panel.name(),
                        inbound_id = inbound_id,
                        error = %e,
                        "Failed to create client"
                    );
                    report.errors.push(InboundFailure {
                        inbound_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        for drift in &report.drift {
            log::warn!(
                subscription = %subscription.id,
                inbound_id = drift.inbound_id,
                stored_id = ?drift.stored_id,
                panel_id = %drift.panel_id,
                healed = drift.healed,
                "Client id drift"
            );
        }

        report.client_id = client_id;
        if report.success() {
            let mut updated = subscription.clone();
            updated.client_id = Some(report.client_id.clone());
            updated.client_email = first_email;
            if updated != *subscription {
                self.subscriptions.save_subscription(&updated).await?;
            }
        }

        log::info!(
            subscription = %subscription.id,
            eligible = report.eligible,
            already_present = report.already_present,
            created = report.created,
            errors = report.errors.len(),
            "Membership ensured"
        );
        Ok(report)
    }

    /// Rewrite the limit fields on every inbound holding the subscriber,
    /// falling back to `ensure_membership` when nothing holds it
    pub async fn push_limits(&self, subscription_id: &str) -> Result<LimitsReport, ServiceError> {
        let subscription = self.load(subscription_id).await?;
        let limits = ClientLimits::from_subscription(&subscription);
        let panel = self.panel(&subscription)?;
        let inbounds = self.eligible_inbounds(panel.as_ref()).await?;
        let holdings = Self::holdings(&inbounds, &subscription);

        if holdings.is_empty() {
            log::info!(
                subscription = %subscription.id,
                "No inbound holds the subscriber, ensuring membership"
            );
            let membership = self.ensure_membership(&subscription, limits).await?;
            return Ok(LimitsReport {
                fell_back: Some(membership),
                ..Default::default()
            });
        }

        let updates = holdings.iter().map(|holding| {
            let mut client = holding.client.clone();
            limits.apply(&mut client);
            let panel = Arc::clone(&panel);
            async move {
                let result = panel
                    .update_client(holding.inbound_id, &holding.client.id, &client)
                    .await;
                (holding.inbound_id, result)
            }
        });

        let mut report = LimitsReport {
            holding: holdings.len(),
            ..Default::default()
        };
        for (inbound_id, result) in join_all(updates).await {
            match result {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    log::warn!(inbound_id = inbound_id, error = %e, "Failed to update client limits");
                    report.errors.push(InboundFailure {
                        inbound_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            subscription = %subscription.id,
            holding = report.holding,
            updated = report.updated,
            "Limits pushed"
        );
        Ok(report)
    }

    /// Delete the subscriber from every inbound holding it
    pub async fn remove_identity(
        &self,
        subscription_id: &str,
    ) -> Result<RemovalReport, ServiceError> {
        let mut subscription = self.load(subscription_id).await?;
        let panel = self.panel(&subscription)?;
        let inbounds = self.eligible_inbounds(panel.as_ref()).await?;
        let holdings = Self::holdings(&inbounds, &subscription);

        let deletes = holdings.iter().map(|holding| {
            let panel = Arc::clone(&panel);
            async move {
                let result = panel
                    .delete_client(holding.inbound_id, &holding.client.id)
                    .await;
                (holding.inbound_id, result)
            }
        });

        let mut report = RemovalReport {
            holding: holdings.len(),
            ..Default::default()
        };
        for (inbound_id, result) in join_all(deletes).await {
            match result {
                Ok(()) => report.removed += 1,
                Err(e) => report.errors.push(InboundFailure {
                    inbound_id,
                    error: e.to_string(),
                }),
            }
        }

        if report.errors.is_empty() && subscription.client_email.is_some() {
            subscription.client_email = None;
            self.subscriptions.save_subscription(&subscription).await?;
        }

        log::info!(
            subscription = %subscription.id,
            removed = report.removed,
            errors = report.errors.len(),
            "Identity removed"
        );
        Ok(report)
    }

    /// Reset panel counters for the subscriber and zero the local snapshot
    /// once at least one inbound was reset
    pub async fn reset_traffic(&self, subscription_id: &str) -> Result<ResetReport, ServiceError> {
        let mut subscription = self.load(subscription_id).await?;
        let panel = self.panel(&subscription)?;
        let inbounds = self.eligible_inbounds(panel.as_ref()).await?;
        let holdings = Self::holdings(&inbounds, &subscription);

        let resets = holdings.iter().map(|holding| {
            let panel = Arc::clone(&panel);
            async move {
                let result = panel
                    .reset_client_traffic(holding.inbound_id, &holding.client.email)
                    .await;
                (holding.inbound_id, result)
            }
        });

        let mut report = ResetReport {
            holding: holdings.len(),
            ..Default::default()
        };
        for (inbound_id, result) in join_all(resets).await {
            match result {
                Ok(()) => report.reset += 1,
                Err(e) => report.errors.push(InboundFailure {
                    inbound_id,
                    error: e.to_string(),
                }),
            }
        }

        if report.reset > 0 {
            subscription.usage = Default::default();
            self.subscriptions.save_subscription(&subscription).await?;
        }

        log::info!(
            subscription = %subscription.id,
            reset = report.reset,
            errors = report.errors.len(),
            "Traffic reset"
        );
        Ok(report)
    }
}
