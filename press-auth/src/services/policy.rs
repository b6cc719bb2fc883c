//! RBAC policy enforcement.
//!
//! The enforcer keeps an immutable [`PolicyModel`] behind an `ArcSwap`.
//! Every write goes to the [`PolicyStore`] first; only after it commits is a
//! modified copy of the model swapped in. Decisions are a pure function of
//! the model in place when the call starts.

use super::clock::Clock;
use super::error::ServiceError;
use super::metrics;
use super::store::{bounded, PolicyStore};
use crate::models::{
    normalize_action, normalize_resource, policy::WILDCARD, Policy, PolicyRule, PolicySnapshot,
    PolicyStats, RoleAssignment, RuleFilter,
};
use arc_swap::ArcSwap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Default)]
pub struct PolicyModel {
    loaded: bool,
    rules: BTreeSet<PolicyRule>,
    policies_by_role: BTreeMap<String, Vec<Policy>>,
    roles_by_subject: BTreeMap<Uuid, BTreeSet<(String, Option<String>)>>,
}

impl PolicyModel {
    fn from_rules(rules: BTreeSet<PolicyRule>) -> Self {
        let mut policies_by_role: BTreeMap<String, Vec<Policy>> = BTreeMap::new();
        let mut roles_by_subject: BTreeMap<Uuid, BTreeSet<(String, Option<String>)>> =
            BTreeMap::new();

        for rule in &rules {
            match rule {
                PolicyRule::Policy(p) => policies_by_role
                    .entry(p.role.clone())
                    .or_default()
                    .push(p.clone()),
                PolicyRule::RoleAssignment(a) => {
                    roles_by_subject
                        .entry(a.subject_id)
                        .or_default()
                        .insert((a.role.clone(), a.domain.clone()));
                }
            }
        }

        Self {
            loaded: true,
            rules,
            policies_by_role,
            roles_by_subject,
        }
    }

    /// Copy-on-write: clone the rule set, edit the clone, rebuild.
    fn with(&self, edit: impl FnOnce(&mut BTreeSet<PolicyRule>)) -> Self {
        let mut rules = self.rules.clone();
        edit(&mut rules);
        Self::from_rules(rules)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// A global policy applies in every domain; a scoped one only in its own.
    pub fn allows(&self, role: &str, resource: &str, action: &str, domain: Option<&str>) -> bool {
        let resource = normalize_resource(resource);
        let action = normalize_action(action);

        self.policies_by_role
            .get(role)
            .map(|policies| {
                policies.iter().any(|p| {
                    (p.resource == resource || p.resource == WILDCARD)
                        && (p.action == action || p.action == WILDCARD)
                        && (p.domain.is_none() || p.domain.as_deref() == domain)
                })
            })
            .unwrap_or(false)
    }

    pub fn roles_for(&self, subject_id: Uuid, domain: Option<&str>) -> Vec<String> {
        let roles: BTreeSet<String> = self
            .roles_by_subject
            .get(&subject_id)
            .into_iter()
            .flatten()
            .filter(|(_, d)| d.is_none() || d.as_deref() == domain)
            .map(|(role, _)| role.clone())
            .collect();
        roles.into_iter().collect()
    }

    pub fn rules(&self) -> impl Iterator<Item = &PolicyRule> {
        self.rules.iter()
    }
}

#[derive(Clone)]
pub struct PolicyEnforcer {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn PolicyStore>,
    clock: Arc<dyn Clock>,
    model: ArcSwap<PolicyModel>,
    writer: tokio::sync::Mutex<()>,
    timeout: std::time::Duration,
}

impl PolicyEnforcer {
    pub fn new(
        store: Arc<dyn PolicyStore>,
        clock: Arc<dyn Clock>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                model: ArcSwap::from_pointee(PolicyModel::default()),
                writer: tokio::sync::Mutex::new(()),
                timeout,
            }),
        }
    }

    pub fn model(&self) -> Arc<PolicyModel> {
        self.inner.model.load_full()
    }

    /// Replace the model with the store's current contents.
    pub async fn load_policy(&self) -> Result<usize, ServiceError> {
        let _guard = self.inner.writer.lock().await;
        let rules = bounded(self.inner.timeout, self.inner.store.load_rules()).await?;
        let model = PolicyModel::from_rules(rules.iter().map(PolicyRule::normalized).collect());
        let count = model.rules.len();
        self.inner.model.store(Arc::new(model));
        tracing::debug!(rules = count, "Policy model loaded");
        Ok(count)
    }

    /// Seed `admin` with full access when the store holds no rules at all.
    pub async fn seed_defaults(&self) -> Result<bool, ServiceError> {
        let stats = self.stats().await?;
        if stats.total_rules > 0 {
            return Ok(false);
        }
        tracing::info!("Policy store empty, seeding default admin policy");
        self.add_policy(Policy::new(ADMIN_ROLE, WILDCARD, WILDCARD))
            .await?;
        Ok(true)
    }

    /// Allow/deny for one role. Fails when no model has been loaded yet.
    pub fn enforce(
        &self,
        role: &str,
        resource: &str,
        action: &str,
        domain: Option<&str>,
    ) -> Result<bool, ServiceError> {
        let model = self.loaded_model()?;
        Ok(model.allows(role, resource, action, domain))
    }

    /// Allow when any role held by `subject_id` allows. The roles and the
    /// policies come from the same snapshot.
    pub fn enforce_subject(
        &self,
        subject_id: Uuid,
        resource: &str,
        action: &str,
        domain: Option<&str>,
    ) -> Result<bool, ServiceError> {
        let model = self.loaded_model()?;
        let allowed = model
            .roles_for(subject_id, domain)
            .iter()
            .any(|role| model.allows(role, resource, action, domain));
        metrics::record_authz_decision(allowed);
        Ok(allowed)
    }

    pub fn roles_for_user(
        &self,
        subject_id: Uuid,
        domain: Option<&str>,
    ) -> Result<Vec<String>, ServiceError> {
        Ok(self.loaded_model()?.roles_for(subject_id, domain))
    }

    /// Role assignments of a subject, domain included.
    pub fn assignments_for_user(&self, subject_id: Uuid) -> Result<Vec<RoleAssignment>, ServiceError> {
        let model = self.loaded_model()?;
        Ok(model
            .rules()
            .filter_map(|rule| match rule {
                PolicyRule::RoleAssignment(a) if a.subject_id == subject_id => Some(a.clone()),
                _ => None,
            })
            .collect())
    }

    pub fn policies(&self, role: Option<&str>) -> Result<Vec<Policy>, ServiceError> {
        let model = self.loaded_model()?;
        Ok(model
            .rules()
            .filter_map(|rule| match rule {
                PolicyRule::Policy(p) if role.map_or(true, |r| p.role == r) => Some(p.clone()),
                _ => None,
            })
            .collect())
    }

    pub async fn add_policy(&self, policy: Policy) -> Result<bool, ServiceError> {
        self.add_rule(PolicyRule::Policy(policy)).await
    }

    pub async fn remove_policy(&self, policy: Policy) -> Result<bool, ServiceError> {
        self.remove_rule(PolicyRule::Policy(policy)).await
    }

    pub async fn update_policy(&self, old: Policy, new: Policy) -> Result<bool, ServiceError> {
        let old = PolicyRule::Policy(old.normalized());
        let new = PolicyRule::Policy(new.normalized());

        let _guard = self.inner.writer.lock().await;
        let updated = bounded(self.inner.timeout, self.inner.store.update_rule(&old, &new)).await?;
        if updated {
            self.swap(|rules| {
                rules.remove(&old);
                rules.insert(new.clone());
            });
            tracing::info!(old = ?old, new = ?new, "Policy updated");
        }
        Ok(updated)
    }

    pub async fn add_role_for_user(&self, assignment: RoleAssignment) -> Result<bool, ServiceError> {
        self.add_rule(PolicyRule::RoleAssignment(assignment)).await
    }

    pub async fn delete_role_for_user(
        &self,
        assignment: RoleAssignment,
    ) -> Result<bool, ServiceError> {
        self.remove_rule(PolicyRule::RoleAssignment(assignment)).await
    }

    /// Bulk removal of every rule matching `filter`.
    pub async fn remove_filtered(&self, filter: RuleFilter) -> Result<u64, ServiceError> {
        let _guard = self.inner.writer.lock().await;
        let removed = bounded(
            self.inner.timeout,
            self.inner.store.remove_filtered_rules(&filter),
        )
        .await?;
        self.swap(|rules| rules.retain(|rule| !filter.matches(rule)));
        tracing::info!(filter = ?filter, removed, "Policy rules removed by filter");
        Ok(removed)
    }

    /// Delete a role: its policies first, then every assignment of it.
    pub async fn delete_role(&self, role: &str) -> Result<u64, ServiceError> {
        let policies = self.remove_filtered(RuleFilter::policies_for_role(role)).await?;
        let assignments = self
            .remove_filtered(RuleFilter::assignments_for_role(role))
            .await?;
        Ok(policies + assignments)
    }

    /// Durable copy of every rule, taken from the store.
    pub async fn backup(&self) -> Result<PolicySnapshot, ServiceError> {
        let rules = bounded(self.inner.timeout, self.inner.store.load_rules()).await?;
        Ok(PolicySnapshot::from_rules(rules, self.inner.clock.now()))
    }

    /// Replace every rule with the snapshot's contents in one transaction.
    pub async fn restore(&self, snapshot: PolicySnapshot) -> Result<usize, ServiceError> {
        let rules: BTreeSet<PolicyRule> = snapshot
            .into_rules()
            .iter()
            .map(PolicyRule::normalized)
            .collect();
        let ordered: Vec<PolicyRule> = rules.iter().cloned().collect();

        let _guard = self.inner.writer.lock().await;
        bounded(
            self.inner.timeout,
            self.inner.store.replace_all_rules(&ordered),
        )
        .await?;

        let count = rules.len();
        self.inner
            .model
            .store(Arc::new(PolicyModel::from_rules(rules)));
        tracing::warn!(rules = count, "Policy store restored from snapshot");
        Ok(count)
    }

    pub async fn stats(&self) -> Result<PolicyStats, ServiceError> {
        bounded(self.inner.timeout, self.inner.store.rule_stats()).await
    }

    async fn add_rule(&self, rule: PolicyRule) -> Result<bool, ServiceError> {
        let rule = rule.normalized();
        let _guard = self.inner.writer.lock().await;
        let added = bounded(self.inner.timeout, self.inner.store.add_rule(&rule)).await?;
        self.swap(|rules| {
            rules.insert(rule.clone());
        });
        if added {
            tracing::info!(rule = ?rule, "Policy rule added");
        }
        Ok(added)
    }

    async fn remove_rule(&self, rule: PolicyRule) -> Result<bool, ServiceError> {
        let rule = rule.normalized();
        let _guard = self.inner.writer.lock().await;
        let removed = bounded(self.inner.timeout, self.inner.store.remove_rule(&rule)).await?;
        self.swap(|rules| {
            rules.remove(&rule);
        });
        if removed {
            tracing::info!(rule = ?rule, "Policy rule removed");
        }
        Ok(removed)
    }

    /// Caller holds the writer lock.
    fn swap(&self, edit: impl FnOnce(&mut BTreeSet<PolicyRule>)) {
        let next = self.inner.model.load().with(edit);
        self.inner.model.store(Arc::new(next));
    }

    fn loaded_model(&self) -> Result<Arc<PolicyModel>, ServiceError> {
        let model = self.inner.model.load_full();
        if !model.is_loaded() {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "policy model has not been loaded"
            )));
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::MockClock;
    use crate::services::memory::MemoryStore;

    async fn enforcer() -> Result<(PolicyEnforcer, Arc<MemoryStore>), ServiceError> {
        let store = Arc::new(MemoryStore::new());
        let enforcer = PolicyEnforcer::new(
            store.clone(),
            Arc::new(MockClock::default()),
            std::time::Duration::from_secs(2),
        );
        enforcer.load_policy().await?;
        Ok((enforcer, store))
    }

    #[tokio::test]
    async fn unloaded_model_fails_closed() {
        let enforcer = PolicyEnforcer::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MockClock::default()),
            std::time::Duration::from_secs(2),
        );
        assert!(enforcer.enforce("admin", "/posts", "GET", None).is_err());
        assert!(enforcer
            .enforce_subject(Uuid::new_v4(), "/posts", "GET", None)
            .is_err());
    }

    #[tokio::test]
    async fn added_policy_allows() -> Result<(), anyhow::Error> {
        let (enforcer, _) = enforcer().await?;

        assert!(!enforcer.enforce("editor", "/posts", "DELETE", None)?);
        assert!(enforcer.add_policy(Policy::new("editor", "/posts", "DELETE")).await?);
        assert!(enforcer.enforce("editor", "/posts", "DELETE", None)?);
        assert!(!enforcer.enforce("editor", "/posts", "PUT", None)?);
        Ok(())
    }

    #[tokio::test]
    async fn path_parameters_are_ignored() -> Result<(), anyhow::Error> {
        let (enforcer, _) = enforcer().await?;
        enforcer
            .add_policy(Policy::new("editor", "/posts/:id", "put"))
            .await?;

        assert!(enforcer.enforce("editor", "/posts/{id}", "PUT", None)?);
        assert!(enforcer.enforce("editor", "/posts", "PUT", None)?);
        Ok(())
    }

    #[tokio::test]
    async fn domain_scoping() -> Result<(), anyhow::Error> {
        let (enforcer, _) = enforcer().await?;
        let subject = Uuid::new_v4();
        enforcer
            .add_policy(Policy::new("editor", "/posts", "POST").in_domain("blog"))
            .await?;
        enforcer
            .add_policy(Policy::new("editor", "/posts", "GET"))
            .await?;
        enforcer
            .add_role_for_user(RoleAssignment::new(subject, "editor"))
            .await?;

        assert!(enforcer.enforce_subject(subject, "/posts", "POST", Some("blog"))?);
        assert!(!enforcer.enforce_subject(subject, "/posts", "POST", Some("shop"))?);
        assert!(!enforcer.enforce_subject(subject, "/posts", "POST", None)?);
        assert!(enforcer.enforce_subject(subject, "/posts", "GET", Some("shop"))?);
        Ok(())
    }

    #[tokio::test]
    async fn store_is_written_before_model() -> Result<(), anyhow::Error> {
        let (enforcer, store) = enforcer().await?;
        enforcer
            .add_policy(Policy::new("editor", "/posts", "GET"))
            .await?;

        let persisted = store.load_rules().await?;
        assert_eq!(persisted.len(), 1);

        // A fresh enforcer over the same store sees the same decision.
        let replica = PolicyEnforcer::new(
            store,
            Arc::new(MockClock::default()),
            std::time::Duration::from_secs(2),
        );
        replica.load_policy().await?;
        assert!(replica.enforce("editor", "/posts", "GET", None)?);
        Ok(())
    }

    #[tokio::test]
    async fn delete_role_cascades_to_assignments() -> Result<(), anyhow::Error> {
        let (enforcer, _) = enforcer().await?;
        let subject = Uuid::new_v4();
        enforcer
            .add_policy(Policy::new("editor", "/posts", "GET"))
            .await?;
        enforcer
            .add_role_for_user(RoleAssignment::new(subject, "editor"))
            .await?;
        enforcer
            .add_role_for_user(RoleAssignment::new(subject, "user"))
            .await?;

        assert_eq!(enforcer.delete_role("editor").await?, 2);
        assert_eq!(enforcer.roles_for_user(subject, None)?, vec!["user".to_string()]);
        assert!(!enforcer.enforce_subject(subject, "/posts", "GET", None)?);
        Ok(())
    }

    #[tokio::test]
    async fn update_replaces_rule() -> Result<(), anyhow::Error> {
        let (enforcer, _) = enforcer().await?;
        enforcer
            .add_policy(Policy::new("editor", "/posts", "GET"))
            .await?;

        assert!(
            enforcer
                .update_policy(
                    Policy::new("editor", "/posts", "GET"),
                    Policy::new("editor", "/posts", "POST"),
                )
                .await?
        );
        assert!(!enforcer.enforce("editor", "/posts", "GET", None)?);
        assert!(enforcer.enforce("editor", "/posts", "POST", None)?);

        assert!(
            !enforcer
                .update_policy(
                    Policy::new("editor", "/missing", "GET"),
                    Policy::new("editor", "/other", "GET"),
                )
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn backup_and_restore_round_trip() -> Result<(), anyhow::Error> {
        let (enforcer, _) = enforcer().await?;
        let subject = Uuid::new_v4();
        enforcer
            .add_policy(Policy::new("editor", "/posts", "GET"))
            .await?;
        enforcer
            .add_role_for_user(RoleAssignment::new(subject, "editor"))
            .await?;

        let snapshot = enforcer.backup().await?;
        enforcer.delete_role("editor").await?;
        assert!(!enforcer.enforce_subject(subject, "/posts", "GET", None)?);

        assert_eq!(enforcer.restore(snapshot).await?, 2);
        assert!(enforcer.enforce_subject(subject, "/posts", "GET", None)?);
        Ok(())
    }

    #[tokio::test]
    async fn seeding_only_happens_on_empty_store() -> Result<(), anyhow::Error> {
        let (enforcer, _) = enforcer().await?;

        assert!(enforcer.seed_defaults().await?);
        assert!(!enforcer.seed_defaults().await?);
        assert!(enforcer.enforce(ADMIN_ROLE, "/policies", "DELETE", None)?);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn decisions_are_stable_under_concurrency() -> Result<(), anyhow::Error> {
        let (enforcer, _) = enforcer().await?;
        let subject = Uuid::new_v4();
        enforcer
            .add_policy(Policy::new("editor", "/posts", "GET"))
            .await?;
        enforcer
            .add_role_for_user(RoleAssignment::new(subject, "editor"))
            .await?;

        let checks = (0..64).map(|i| {
            let enforcer = enforcer.clone();
            tokio::spawn(async move {
                let action = if i % 2 == 0 { "GET" } else { "DELETE" };
                (i, enforcer.enforce_subject(subject, "/posts", action, None))
            })
        });

        for joined in futures::future::join_all(checks).await {
            let (i, decision) = joined?;
            assert_eq!(decision?, i % 2 == 0);
        }
        Ok(())
    }
}
