use crate::{
    dtos::admin::{PolicyRequest, RoleAssignmentRequest, UpdatePolicyRequest, UserRolesResponse},
    models::{Policy, PolicySnapshot, PolicyStats, SigningAlgorithm, SigningKeyInfo},
    services::{
        error::ServiceError,
        jwt::TokenIssuer,
        policy::PolicyEnforcer,
        store::{bounded, IdentityStore},
    },
    utils::validation::validate_role_name,
};
use std::sync::Arc;
use uuid::Uuid;

/// Policy, role and signing-key administration.
#[derive(Clone)]
pub struct AdminService {
    identities: Arc<dyn IdentityStore>,
    policy: PolicyEnforcer,
    tokens: TokenIssuer,
    default_algorithm: SigningAlgorithm,
    timeout: std::time::Duration,
}

impl AdminService {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        policy: PolicyEnforcer,
        tokens: TokenIssuer,
        default_algorithm: SigningAlgorithm,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            identities,
            policy,
            tokens,
            default_algorithm,
            timeout,
        }
    }

    pub fn list_policies(&self, role: Option<&str>) -> Result<Vec<Policy>, ServiceError> {
        self.policy.policies(role)
    }

    pub async fn add_policy(&self, req: PolicyRequest) -> Result<bool, ServiceError> {
        self.policy.add_policy(req.into()).await
    }

    pub async fn remove_policy(&self, req: PolicyRequest) -> Result<bool, ServiceError> {
        self.policy.remove_policy(req.into()).await
    }

    pub async fn update_policy(&self, req: UpdatePolicyRequest) -> Result<(), ServiceError> {
        if !self.policy.update_policy(req.old.into(), req.new.into()).await? {
            return Err(ServiceError::NotFound("Policy".to_string()));
        }
        Ok(())
    }

    /// Removes the role's policies and every assignment of it.
    pub async fn delete_role(&self, role: &str) -> Result<u64, ServiceError> {
        if let Err(e) = validate_role_name(role) {
            let message = e.message.map(|m| m.to_string()).unwrap_or_default();
            return Err(ServiceError::validation("role", e.code.to_string(), message));
        }
        let removed = self.policy.delete_role(role).await?;
        tracing::warn!(role = %role, removed, "Role deleted");
        Ok(removed)
    }

    pub async fn policy_stats(&self) -> Result<PolicyStats, ServiceError> {
        self.policy.stats().await
    }

    pub async fn backup_policies(&self) -> Result<PolicySnapshot, ServiceError> {
        self.policy.backup().await
    }

    pub async fn restore_policies(&self, snapshot: PolicySnapshot) -> Result<usize, ServiceError> {
        self.policy.restore(snapshot).await
    }

    pub async fn user_roles(&self, user_id: Uuid) -> Result<UserRolesResponse, ServiceError> {
        self.ensure_user(user_id).await?;
        Ok(UserRolesResponse {
            user_id,
            assignments: self.policy.assignments_for_user(user_id)?,
        })
    }

    pub async fn assign_role(
        &self,
        user_id: Uuid,
        req: RoleAssignmentRequest,
    ) -> Result<bool, ServiceError> {
        self.ensure_user(user_id).await?;
        self.policy.add_role_for_user(req.for_subject(user_id)).await
    }

    pub async fn revoke_role(
        &self,
        user_id: Uuid,
        req: RoleAssignmentRequest,
    ) -> Result<bool, ServiceError> {
        self.policy.delete_role_for_user(req.for_subject(user_id)).await
    }

    /// Revokes every refresh token of the user. Outstanding access tokens
    /// stay valid until they expire.
    pub async fn force_logout(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        self.ensure_user(user_id).await?;
        let revoked = self.tokens.revoke_all(user_id).await?;
        tracing::warn!(subject_id = %user_id, revoked, "Forced logout");
        Ok(revoked)
    }

    pub async fn list_signing_keys(&self) -> Result<Vec<SigningKeyInfo>, ServiceError> {
        self.tokens.keys().list().await
    }

    pub async fn rotate_signing_key(
        &self,
        algorithm: Option<SigningAlgorithm>,
    ) -> Result<SigningKeyInfo, ServiceError> {
        self.tokens
            .keys()
            .rotate(algorithm.unwrap_or(self.default_algorithm))
            .await
    }

    /// Refuses to deactivate the last active key, which would stop all issuance.
    pub async fn deactivate_signing_key(&self, key_id: Uuid) -> Result<(), ServiceError> {
        self.tokens.keys().deactivate(key_id).await
    }

    async fn ensure_user(&self, user_id: Uuid) -> Result<(), ServiceError> {
        bounded(self.timeout, self.identities.find_credential_by_id(user_id))
            .await?
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))
    }
}
