//! Ingress reconciliation.
//!
//! Every pass re-derives the full desired state from the Ingress, its
//! ProxyGroup and its sibling Ingresses. Nothing is remembered between
//! passes; a failed pass is simply retried.

use super::hostname;
use super::phase::{IngressPhase, PhaseEvent};
use super::serve_config::ServiceConfig;
use super::status::load_balancer_ingress;
use super::validate::{parse_intent, target_proxy_group, validate_ingress, LiveSet, ValidationError};
use super::vip_service::vip_ports;
use super::{Reconciler, FINALIZER};
use crate::error::{ControllerError, ErrorClass};
use crds::PROXY_GROUP_TYPE_INGRESS;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Event reason for Ingress-level validation failures.
pub const REASON_INVALID_INGRESS: &str = "InvalidIngressConfiguration";
/// Event reason for ProxyGroup-level validation failures.
pub const REASON_PROXY_GROUP_NOT_READY: &str = "ProxyGroupNotReady";

fn ingress_key(ing: &Ingress) -> String {
    format!("{}/{}", ing.namespace().unwrap_or_default(), ing.name_any())
}

fn has_finalizer(ing: &Ingress) -> bool {
    ing.finalizers().iter().any(|f| f == FINALIZER)
}

impl Reconciler {
    /// Reconcile one Ingress and decide when to look at it again.
    pub async fn reconcile_ingress(&self, ing: &Ingress) -> Result<Action, ControllerError> {
        let key = ingress_key(ing);
        debug!("Reconciling Ingress {}", key);
        match self.converge(ing).await {
            Ok(phase) => {
                self.reset_error(&key);
                info!("Ingress {} reconciled, phase {}", key, phase);
                Ok(phase.requeue_action())
            }
            Err(e) => {
                if e.class() == ErrorClass::Validation {
                    self.store
                        .publish_warning(ing, REASON_INVALID_INGRESS, e.to_string())
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Drive the Ingress as far through its lifecycle as observed state allows.
    pub(crate) async fn converge(&self, ing: &Ingress) -> Result<IngressPhase, ControllerError> {
        let key = ingress_key(ing);
        let phase = IngressPhase::Unvalidated;

        let Some(pg_name) = target_proxy_group(ing, &self.config.ingress_class).map(str::to_string) else {
            if !has_finalizer(ing) {
                debug!("Ingress {} is not served by a ProxyGroup, ignoring", key);
                return Ok(IngressPhase::Gone);
            }
            // Was ours before the class or ProxyGroup annotation was removed.
            info!("Ingress {} no longer targets a ProxyGroup, cleaning up", key);
            let phase = phase.on(PhaseEvent::DeletionRequested)?;
            self.cleanup_all_proxy_groups().await?;
            self.remove_finalizer(ing).await?;
            return phase.on(PhaseEvent::Released);
        };

        if ing.metadata.deletion_timestamp.is_some() {
            if !has_finalizer(ing) {
                return Ok(IngressPhase::Gone);
            }
            let phase = phase.on(PhaseEvent::DeletionRequested)?;
            info!("Ingress {} is being deleted, releasing its resources on ProxyGroup {}", key, pg_name);
            self.cleanup(ing, &pg_name).await?;
            self.remove_finalizer(ing).await?;
            return phase.on(PhaseEvent::Released);
        }

        let suffix = self.dns_suffix().await?;
        let pg = self.store.get_proxy_group(&pg_name).await?;
        let claimants = self.claimants().await?;

        let intent = match validate_ingress(ing, &pg_name, pg.as_ref(), &claimants) {
            Ok(intent) => intent,
            Err(ValidationError::ProxyGroup(msg)) => {
                info!("Ingress {} waiting for ProxyGroup: {}", key, msg);
                self.store
                    .publish_warning(ing, REASON_PROXY_GROUP_NOT_READY, msg)
                    .await;
                return phase.on(PhaseEvent::ProxyGroupNotReady);
            }
            Err(ValidationError::Ingress(msg)) => {
                warn!("Ingress {} is invalid: {}", key, msg);
                self.store.publish_warning(ing, REASON_INVALID_INGRESS, msg).await;
                let phase = phase.on(PhaseEvent::ValidationFailed)?;
                let cluster = LiveSet::cluster(&claimants, &suffix);
                self.collect_orphans(&pg_name, &cluster).await?;
                self.update_load_balancer_status(ing, Vec::new()).await?;
                return Ok(phase);
            }
        };
        let phase = phase.on(PhaseEvent::Validated)?;

        self.ensure_finalizer(ing).await?;

        let service = intent.service_name();
        let fqdn = hostname::fqdn(&intent.host, &suffix);
        let handlers = self.resolve_handlers(ing, &intent.host).await?;
        let entry = ServiceConfig::for_ingress(&fqdn, intent.http_endpoint, &handlers);
        self.ensure_serve_entry(&pg_name, &service, entry.clone()).await?;

        let tags = intent
            .tags
            .clone()
            .unwrap_or_else(|| self.config.default_tags.clone());
        self.upsert_vip_service(&service, &tags, &vip_ports(intent.http_endpoint))
            .await?;

        self.ensure_cert_resources(&pg_name, &fqdn).await?;

        let cluster = LiveSet::cluster(&claimants, &suffix);
        self.collect_orphans(&pg_name, &cluster).await?;
        self.sync_replica_configs(&pg_name, &BTreeSet::new()).await?;
        let phase = phase.on(PhaseEvent::ResourcesEnsured)?;

        if !self.is_serving(&pg_name, &service).await? {
            debug!("Ingress {}: {} is not advertised by any replica yet", key, service);
            self.update_load_balancer_status(ing, Vec::new()).await?;
            return Ok(phase);
        }
        self.update_load_balancer_status(ing, load_balancer_ingress(&fqdn, &entry))
            .await?;
        phase.on(PhaseEvent::ServingObserved)
    }

    async fn dns_suffix(&self) -> Result<String, ControllerError> {
        self.bounded("get MagicDNS suffix", self.tailnet.magic_dns_suffix())
            .await
    }

    /// Ingresses of our class assigned to some ProxyGroup.
    async fn claimants(&self) -> Result<Vec<Ingress>, ControllerError> {
        let all = self.store.list_ingresses().await?;
        Ok(all
            .into_iter()
            .filter(|i| target_proxy_group(i, &self.config.ingress_class).is_some())
            .collect())
    }

    /// Release everything only `ing` was keeping alive on `proxy_group`.
    async fn cleanup(&self, ing: &Ingress, proxy_group: &str) -> Result<(), ControllerError> {
        let suffix = self.dns_suffix().await?;
        let cluster = LiveSet::cluster(&self.claimants().await?, &suffix);

        self.collect_orphans(proxy_group, &cluster).await?;

        // Covers resources provisioned before the serve entry was written.
        if let Ok(intent) = parse_intent(ing, proxy_group) {
            let service = intent.service_name();
            let fqdn = hostname::fqdn(&intent.host, &suffix);
            if !cluster.contains(&service) {
                self.release_vip_service(&service).await?;
                self.release_cert_resources(proxy_group, &fqdn, &cluster).await?;
            }
        }
        Ok(())
    }

    /// Orphan collection for every ingress ProxyGroup in the cluster.
    async fn cleanup_all_proxy_groups(&self) -> Result<(), ControllerError> {
        let suffix = self.dns_suffix().await?;
        let cluster = LiveSet::cluster(&self.claimants().await?, &suffix);
        for pg in self.store.list_proxy_groups().await? {
            if pg.spec.proxy_group_type != PROXY_GROUP_TYPE_INGRESS {
                continue;
            }
            self.collect_orphans(&pg.name_any(), &cluster).await?;
        }
        Ok(())
    }

    /// Release every Service Name in the ProxyGroup's serve config that no
    /// live Ingress on it resolves to. Returns the number of names released.
    ///
    /// Replicas stop advertising the names first, then the VIP claims and
    /// certificate resources go, and the serve entries are dropped last.
    /// A name or hostname that is live on another ProxyGroup keeps its VIP
    /// claim and certificate resources.
    pub(crate) async fn collect_orphans(
        &self,
        proxy_group: &str,
        cluster: &LiveSet,
    ) -> Result<usize, ControllerError> {
        let live = cluster.on_proxy_group(proxy_group);
        let cfg = match self.load_serve_config(proxy_group).await {
            Ok((_, cfg)) => cfg,
            Err(ControllerError::NotFound(msg)) => {
                debug!("No serve config to collect on ProxyGroup {}: {}", proxy_group, msg);
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let orphans: BTreeMap<String, Option<String>> = cfg
            .services
            .iter()
            .filter(|(name, _)| !live.contains(name))
            .map(|(name, entry)| (name.clone(), entry.fqdn()))
            .collect();
        if orphans.is_empty() {
            return Ok(0);
        }
        let names: BTreeSet<String> = orphans.keys().cloned().collect();
        info!("Releasing {:?} from ProxyGroup {}", names, proxy_group);

        self.sync_replica_configs(proxy_group, &names).await?;

        for (name, fqdn) in &orphans {
            if cluster.contains(name) {
                debug!("{} is still served by another ProxyGroup, keeping its VIP service", name);
            } else {
                self.release_vip_service(name).await?;
            }
            match fqdn {
                Some(fqdn) if cluster.references_fqdn(fqdn) => {
                    debug!("{} is still served by another ProxyGroup, keeping its certificate", fqdn);
                }
                Some(fqdn) => self.release_cert_resources(proxy_group, fqdn, cluster).await?,
                None => {}
            }
        }

        self.remove_serve_entries(proxy_group, &names).await?;
        Ok(orphans.len())
    }

    async fn ensure_finalizer(&self, ing: &Ingress) -> Result<(), ControllerError> {
        if has_finalizer(ing) {
            return Ok(());
        }
        let mut finalizers = ing.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        self.store.set_ingress_finalizers(ing, finalizers).await?;
        debug!("Added finalizer to Ingress {}", ingress_key(ing));
        Ok(())
    }

    async fn remove_finalizer(&self, ing: &Ingress) -> Result<(), ControllerError> {
        if !has_finalizer(ing) {
            return Ok(());
        }
        let finalizers: Vec<String> = ing
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != FINALIZER)
            .cloned()
            .collect();
        self.store.set_ingress_finalizers(ing, finalizers).await?;
        debug!("Removed finalizer from Ingress {}", ingress_key(ing));
        Ok(())
    }
}
