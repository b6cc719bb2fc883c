//! Registration, login, refresh and the verification/reset flows.

use crate::{
    dtos::auth::{
        LoginRequest, LogoutRequest, MeResponse, MessageResponse, PasswordResetConfirm,
        PasswordResetRequest, RefreshRequest, RegisterRequest, RegisterResponse,
    },
    models::{Credential, RoleAssignment, SigningAlgorithm, TokenPurpose},
    services::{
        clock::Clock,
        error::{ServiceError, StoreError},
        jwt::{TokenIssuer, TokenResponse},
        metrics,
        notifier::{Channel, Notification, Notifier},
        policy::{PolicyEnforcer, ADMIN_ROLE},
        rate_limiter::RateLimiter,
        store::{bounded, IdentityStore},
        verification::VerificationTokenService,
    },
    utils::{Password, PasswordHashString, PasswordHasher, ValidateRequest},
};
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Verified against when the login identity is unknown, so both failure
/// paths pay for one hash verification.
const DUMMY_PASSWORD: &str = "press-auth-dummy-password-0";

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub default_role: String,
    pub self_assignable: Vec<String>,
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub bootstrap_admin_username: Option<String>,
    pub signing_algorithm: SigningAlgorithm,
}

#[derive(Clone)]
pub struct AuthService {
    identities: Arc<dyn IdentityStore>,
    tokens: TokenIssuer,
    verification: VerificationTokenService,
    limiter: RateLimiter,
    policy: PolicyEnforcer,
    hasher: Arc<dyn PasswordHasher>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: Arc<AuthSettings>,
    timeout: std::time::Duration,
    dummy_hash: Arc<OnceCell<PasswordHashString>>,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        tokens: TokenIssuer,
        verification: VerificationTokenService,
        limiter: RateLimiter,
        policy: PolicyEnforcer,
        hasher: Arc<dyn PasswordHasher>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: AuthSettings,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            identities,
            tokens,
            verification,
            limiter,
            policy,
            hasher,
            notifier,
            clock,
            settings: Arc::new(settings),
            timeout,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Startup: make sure a signing key exists, load the policy model, seed
    /// the default admin policy into an empty store and grant the configured
    /// bootstrap admin its role.
    pub async fn bootstrap(&self) -> Result<(), ServiceError> {
        self.tokens
            .keys()
            .ensure_active_key(self.settings.signing_algorithm)
            .await?;
        self.policy.load_policy().await?;
        self.policy.seed_defaults().await?;

        if let Some(username) = self.settings.bootstrap_admin_username.as_deref() {
            let found = bounded(
                self.timeout,
                self.identities.find_credential_by_username(username),
            )
            .await?;
            match found {
                Some(credential) => self.grant_bootstrap_admin(credential.user_id).await?,
                None => tracing::info!(
                    username = %username,
                    "Bootstrap admin not registered yet, role will be granted at registration"
                ),
            }
        }
        Ok(())
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<RegisterResponse, ServiceError> {
        req.validate_request().map_err(ServiceError::Validation)?;

        let role = req
            .role
            .as_deref()
            .map(str::trim)
            .unwrap_or(self.settings.default_role.as_str())
            .to_string();
        if !self.settings.self_assignable.iter().any(|r| *r == role) {
            return Err(ServiceError::validation(
                "role",
                "self_assignable",
                "Role cannot be chosen at registration",
            ));
        }

        let username = req.username.trim().to_string();
        let email = req.email.trim().to_string();

        if bounded(
            self.timeout,
            self.identities.find_credential_by_username(&username),
        )
        .await?
        .is_some()
        {
            return Err(ServiceError::Conflict("Username already taken".to_string()));
        }
        if bounded(self.timeout, self.identities.find_credential_by_email(&email))
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict("Email already registered".to_string()));
        }

        let password_hash = self.hash_password(Password::new(req.password)).await?;
        let credential = Credential::new(
            username,
            email,
            req.phone,
            password_hash.into_string(),
            self.clock.now(),
        );

        bounded(self.timeout, self.identities.insert_credential(&credential))
            .await
            .map_err(|e| match e {
                // Lost a race with a concurrent registration.
                ServiceError::Storage(StoreError::Conflict(msg)) => ServiceError::Conflict(msg),
                other => other,
            })?;

        if let Err(e) = self.assign_initial_roles(&credential, &role).await {
            self.discard_registration(credential.user_id, &role).await;
            return Err(e);
        }

        tracing::info!(subject_id = %credential.user_id, "User registered");

        // Best effort: the user can ask for another token later.
        match self
            .verification
            .create_verification_token(credential.user_id, TokenPurpose::Email)
            .await
        {
            Ok(token) => {
                self.notify(Channel::Email, &credential.email, TokenPurpose::Email, token)
                    .await
            }
            Err(e) => tracing::warn!(
                subject_id = %credential.user_id,
                error = %e,
                "Failed to issue email verification token at registration"
            ),
        }

        Ok(RegisterResponse {
            user_id: credential.user_id,
            username: credential.username,
            roles: self.policy.roles_for_user(credential.user_id, None)?,
            message: "Registration successful. Please check your email to verify your account."
                .to_string(),
        })
    }

    /// The attempt is counted before any password work, so a throttled
    /// caller never reaches the hasher. Known accounts are counted by subject
    /// id, so username and email share one budget.
    pub async fn login(&self, req: LoginRequest) -> Result<TokenResponse, ServiceError> {
        let identity = req.username.trim();
        let found = if identity.contains('@') {
            bounded(self.timeout, self.identities.find_credential_by_email(identity)).await?
        } else {
            bounded(
                self.timeout,
                self.identities.find_credential_by_username(identity),
            )
            .await?
        };

        let limit_key = match &found {
            Some(credential) => format!("login:{}", credential.user_id),
            None => format!("login:{}", identity.to_lowercase()),
        };
        self.limiter
            .enforce(
                "login",
                &limit_key,
                self.settings.login_attempts,
                self.settings.login_window_seconds,
            )
            .await?;

        let password = Password::new(req.password);
        let credential = match found {
            Some(credential) => {
                let hash = PasswordHashString::new(credential.password_hash.clone());
                if self.verify_password(password, hash).await? {
                    Some(credential)
                } else {
                    None
                }
            }
            None => {
                let hash = self.dummy_hash().await?;
                self.verify_password(password, hash).await?;
                None
            }
        };

        let Some(credential) = credential else {
            metrics::record_login("failure");
            tracing::warn!("Login failed: invalid credentials");
            return Err(ServiceError::InvalidCredentials);
        };

        let tokens = self.tokens.issue_token_pair(credential.user_id).await?;
        metrics::record_login("success");
        tracing::info!(subject_id = %credential.user_id, "User logged in");
        Ok(tokens)
    }

    pub async fn refresh(&self, req: RefreshRequest) -> Result<TokenResponse, ServiceError> {
        self.tokens.refresh_tokens(&req.refresh_token).await
    }

    /// Revokes the presented refresh token. Unknown or already revoked tokens
    /// are not an error.
    pub async fn logout(&self, req: LogoutRequest) -> Result<(), ServiceError> {
        if let Some(subject_id) = self.tokens.revoke_refresh_token(&req.refresh_token).await? {
            tracing::info!(subject_id = %subject_id, "User logged out");
        }
        Ok(())
    }

    pub async fn me(&self, subject_id: Uuid) -> Result<MeResponse, ServiceError> {
        let credential = self.credential(subject_id).await?;
        Ok(MeResponse {
            user_id: credential.user_id,
            email_verified: credential.is_email_verified(),
            phone_verified: credential.is_phone_verified(),
            username: credential.username,
            email: credential.email,
            phone: credential.phone,
            roles: self.policy.roles_for_user(subject_id, None)?,
        })
    }

    pub async fn request_email_verification(
        &self,
        subject_id: Uuid,
    ) -> Result<MessageResponse, ServiceError> {
        let credential = self.credential(subject_id).await?;
        if credential.is_email_verified() {
            return Ok(MessageResponse::new("Email already verified"));
        }

        let token = self
            .verification
            .create_verification_token(subject_id, TokenPurpose::Email)
            .await?;
        self.notify(Channel::Email, &credential.email, TokenPurpose::Email, token)
            .await;
        Ok(MessageResponse::new("Verification email sent"))
    }

    pub async fn verify_email(&self, token: &str) -> Result<MessageResponse, ServiceError> {
        let subject_id = self
            .verification
            .validate_and_consume(token, TokenPurpose::Email)
            .await?;
        let marked = bounded(
            self.timeout,
            self.identities.mark_email_verified(subject_id, self.clock.now()),
        )
        .await?;
        if !marked {
            return Err(ServiceError::InvalidOrExpired);
        }
        Ok(MessageResponse::new("Email verified successfully"))
    }

    pub async fn request_phone_verification(
        &self,
        subject_id: Uuid,
    ) -> Result<MessageResponse, ServiceError> {
        let credential = self.credential(subject_id).await?;
        let Some(phone) = credential.phone.as_deref() else {
            return Err(ServiceError::validation(
                "phone",
                "required",
                "No phone number on file",
            ));
        };
        if credential.is_phone_verified() {
            return Ok(MessageResponse::new("Phone already verified"));
        }

        let token = self
            .verification
            .create_verification_token(subject_id, TokenPurpose::Phone)
            .await?;
        self.notify(Channel::Sms, phone, TokenPurpose::Phone, token)
            .await;
        Ok(MessageResponse::new("Verification code sent"))
    }

    pub async fn verify_phone(&self, token: &str) -> Result<MessageResponse, ServiceError> {
        let subject_id = self
            .verification
            .validate_and_consume(token, TokenPurpose::Phone)
            .await?;
        let marked = bounded(
            self.timeout,
            self.identities.mark_phone_verified(subject_id, self.clock.now()),
        )
        .await?;
        if !marked {
            return Err(ServiceError::InvalidOrExpired);
        }
        Ok(MessageResponse::new("Phone verified successfully"))
    }

    /// Always answers the same way, whether or not the email is registered.
    pub async fn request_password_reset(
        &self,
        req: PasswordResetRequest,
    ) -> Result<MessageResponse, ServiceError> {
        req.validate_request().map_err(ServiceError::Validation)?;
        let response = MessageResponse::new(
            "If that email is registered, a password reset link has been sent",
        );

        let found = bounded(
            self.timeout,
            self.identities.find_credential_by_email(req.email.trim()),
        )
        .await?;
        let Some(credential) = found else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(response);
        };

        match self
            .verification
            .create_verification_token(credential.user_id, TokenPurpose::PasswordReset)
            .await
        {
            Ok(token) => {
                self.notify(
                    Channel::Email,
                    &credential.email,
                    TokenPurpose::PasswordReset,
                    token,
                )
                .await
            }
            // Surfacing this would reveal that the account exists.
            Err(e) => tracing::warn!(
                subject_id = %credential.user_id,
                error = %e,
                "Password reset token not issued"
            ),
        }
        Ok(response)
    }

    /// The new password is validated before the token is consumed, so a
    /// rejected password leaves the token usable.
    pub async fn reset_password(
        &self,
        req: PasswordResetConfirm,
    ) -> Result<MessageResponse, ServiceError> {
        req.validate_request().map_err(ServiceError::Validation)?;

        let subject_id = self
            .verification
            .validate_and_consume(&req.token, TokenPurpose::PasswordReset)
            .await?;
        let password_hash = self.hash_password(Password::new(req.new_password)).await?;

        let updated = bounded(
            self.timeout,
            self.identities
                .update_password_hash(subject_id, password_hash.as_str(), self.clock.now()),
        )
        .await?;
        if !updated {
            return Err(ServiceError::InvalidOrExpired);
        }

        let revoked = self.tokens.revoke_all(subject_id).await?;
        tracing::info!(subject_id = %subject_id, revoked, "Password reset, sessions revoked");
        Ok(MessageResponse::new("Password has been reset"))
    }

    async fn credential(&self, subject_id: Uuid) -> Result<Credential, ServiceError> {
        bounded(self.timeout, self.identities.find_credential_by_id(subject_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))
    }

    async fn assign_initial_roles(
        &self,
        credential: &Credential,
        role: &str,
    ) -> Result<(), ServiceError> {
        self.policy
            .add_role_for_user(RoleAssignment::new(credential.user_id, role))
            .await?;
        let is_bootstrap_admin = self
            .settings
            .bootstrap_admin_username
            .as_deref()
            .is_some_and(|admin| admin.eq_ignore_ascii_case(&credential.username));
        if is_bootstrap_admin {
            self.grant_bootstrap_admin(credential.user_id).await?;
        }
        Ok(())
    }

    /// Undo a registration whose role assignment failed, so the user can retry
    /// with the same username and email.
    async fn discard_registration(&self, subject_id: Uuid, role: &str) {
        for assignment in [
            RoleAssignment::new(subject_id, role),
            RoleAssignment::new(subject_id, ADMIN_ROLE),
        ] {
            if let Err(e) = self.policy.delete_role_for_user(assignment).await {
                tracing::warn!(
                    subject_id = %subject_id,
                    error = %e,
                    "Failed to remove role of discarded registration"
                );
            }
        }
        match bounded(self.timeout, self.identities.delete_credential(subject_id)).await {
            Ok(_) => tracing::warn!(subject_id = %subject_id, "Registration rolled back"),
            Err(e) => tracing::error!(
                subject_id = %subject_id,
                error = %e,
                "Failed to roll back registration, credential has no role"
            ),
        }
    }

    async fn grant_bootstrap_admin(&self, subject_id: Uuid) -> Result<(), ServiceError> {
        if self
            .policy
            .add_role_for_user(RoleAssignment::new(subject_id, ADMIN_ROLE))
            .await?
        {
            tracing::warn!(subject_id = %subject_id, "Bootstrap admin role granted");
        }
        Ok(())
    }

    async fn notify(&self, channel: Channel, recipient: &str, purpose: TokenPurpose, token: String) {
        let notification = Notification {
            channel,
            recipient: recipient.to_string(),
            purpose,
            token,
            ttl_minutes: self.verification.ttl().num_minutes(),
        };
        if let Err(e) = self.notifier.deliver(&notification).await {
            tracing::warn!(purpose = %purpose, error = %e, "Notification delivery failed");
        }
    }

    async fn hash_password(&self, password: Password) -> Result<PasswordHashString, ServiceError> {
        let hasher = self.hasher.clone();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| anyhow::anyhow!("Password hashing task failed: {}", e))??;
        Ok(hash)
    }

    async fn verify_password(
        &self,
        password: Password,
        hash: PasswordHashString,
    ) -> Result<bool, ServiceError> {
        let hasher = self.hasher.clone();
        let matches = tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| anyhow::anyhow!("Password verification task failed: {}", e))??;
        Ok(matches)
    }

    async fn dummy_hash(&self) -> Result<PasswordHashString, ServiceError> {
        self.dummy_hash
            .get_or_try_init(|| self.hash_password(Password::new(DUMMY_PASSWORD.to_string())))
            .await
            .cloned()
    }
}
