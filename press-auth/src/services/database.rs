//! PostgreSQL implementation of the store traits.
//!
//! Every operation whose correctness depends on atomicity is a single
//! conditional statement or a transaction that rolls back when dropped.

use super::error::StoreError;
use super::store::{
    IdentityStore, KeyDeactivation, KeyStore, PolicyStore, RateLimitStore, RefreshTokenStore,
    VerificationTokenStore,
};
use crate::models::{
    policy::{ASSIGNMENT_PTYPE, POLICY_PTYPE},
    Credential, PolicyRule, PolicyStats, RefreshToken, RuleFilter, SigningKey, TokenPurpose,
    VerificationToken,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

const RULE_COLUMNS: [&str; 6] = ["v0", "v1", "v2", "v3", "v4", "v5"];

type RuleRow = (String, String, String, String, String, String, String);

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                StoreError::Database(e)
            })?;
        Ok(())
    }
}

/// Unique violations become conflicts, everything else stays a database error.
fn store_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::Conflict(
                db.constraint()
                    .map(|c| format!("unique constraint {} violated", c))
                    .unwrap_or_else(|| "unique constraint violated".to_string()),
            );
        }
    }
    StoreError::Database(e)
}

fn rule_from_row(row: RuleRow) -> Result<PolicyRule, StoreError> {
    let (ptype, v0, v1, v2, v3, v4, v5) = row;
    PolicyRule::from_values(&ptype, &[v0, v1, v2, v3, v4, v5]).map_err(StoreError::Corrupt)
}

#[async_trait]
impl IdentityStore for Database {
    async fn insert_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO credentials (user_id, username, email, phone, password_hash,
                email_verified_utc, phone_verified_utc, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(credential.user_id)
        .bind(&credential.username)
        .bind(&credential.email)
        .bind(&credential.phone)
        .bind(&credential.password_hash)
        .bind(credential.email_verified_utc)
        .bind(credential.phone_verified_utc)
        .bind(credential.created_utc)
        .bind(credential.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn find_credential_by_id(&self, user_id: Uuid) -> Result<Option<Credential>, StoreError> {
        sqlx::query_as::<_, Credential>("SELECT * FROM credentials WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn find_credential_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Credential>, StoreError> {
        sqlx::query_as::<_, Credential>(
            "SELECT * FROM credentials WHERE LOWER(username) = LOWER($1)",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)
    }

    async fn find_credential_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Credential>, StoreError> {
        sqlx::query_as::<_, Credential>("SELECT * FROM credentials WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE credentials SET password_hash = $2, updated_utc = $3 WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(password_hash)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_email_verified(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET email_verified_utc = COALESCE(email_verified_utc, $2), updated_utc = $2
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_phone_verified(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET phone_verified_utc = COALESCE(phone_verified_utc, $2), updated_utc = $2
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }
    async fn delete_credential(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM credentials WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl KeyStore for Database {
    async fn active_signing_keys(&self) -> Result<Vec<SigningKey>, StoreError> {
        sqlx::query_as::<_, SigningKey>(
            "SELECT * FROM signing_keys WHERE is_active = TRUE ORDER BY created_utc DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)
    }

    async fn all_signing_keys(&self) -> Result<Vec<SigningKey>, StoreError> {
        sqlx::query_as::<_, SigningKey>("SELECT * FROM signing_keys ORDER BY created_utc DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn insert_signing_key(&self, key: &SigningKey) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO signing_keys (key_id, key_material, algorithm, is_active, created_utc, deactivated_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(key.key_id)
        .bind(&key.key_material)
        .bind(&key.algorithm)
        .bind(key.is_active)
        .bind(key.created_utc)
        .bind(key.deactivated_utc)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn deactivate_signing_key(
        &self,
        key_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<KeyDeactivation, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // Locking every active row serializes concurrent deactivations; the
        // loser re-reads the set without the key the winner just retired.
        let active: Vec<(Uuid,)> =
            sqlx::query_as("SELECT key_id FROM signing_keys WHERE is_active = TRUE FOR UPDATE")
                .fetch_all(&mut *tx)
                .await
                .map_err(store_err)?;

        let outcome = if !active.iter().any(|(id,)| *id == key_id) {
            KeyDeactivation::NotActive
        } else if active.len() <= 1 {
            KeyDeactivation::LastActiveKey
        } else {
            sqlx::query(
                "UPDATE signing_keys SET is_active = FALSE, deactivated_utc = $2 WHERE key_id = $1",
            )
            .bind(key_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
            KeyDeactivation::Deactivated
        };

        tx.commit().await.map_err(store_err)?;
        Ok(outcome)
    }
}

#[async_trait]
impl RefreshTokenStore for Database {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token_id, subject_id, token_hash, expiry_utc, revoked_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.token_id)
        .bind(token.subject_id)
        .bind(&token.token_hash)
        .bind(token.expiry_utc)
        .bind(token.revoked_utc)
        .bind(token.created_utc)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
        new_expiry_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // The row lock taken here serializes concurrent rotations of the same
        // token; the loser re-evaluates the predicate and matches nothing.
        let revoked: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE refresh_tokens SET revoked_utc = $2
            WHERE token_hash = $1 AND revoked_utc IS NULL AND expiry_utc > $2
            RETURNING subject_id
            "#,
        )
        .bind(old_hash)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        let Some((subject_id,)) = revoked else {
            return Ok(None);
        };

        let successor = RefreshToken::new(subject_id, new_hash.to_string(), new_expiry_utc, now);
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token_id, subject_id, token_hash, expiry_utc, revoked_utc, created_utc)
            VALUES ($1, $2, $3, $4, NULL, $5)
            "#,
        )
        .bind(successor.token_id)
        .bind(successor.subject_id)
        .bind(&successor.token_hash)
        .bind(successor.expiry_utc)
        .bind(successor.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(Some(successor))
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StoreError> {
        let revoked: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE refresh_tokens SET revoked_utc = $2
            WHERE token_hash = $1 AND revoked_utc IS NULL AND expiry_utc > $2
            RETURNING subject_id
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(revoked.map(|(id,)| id))
    }

    async fn revoke_all_refresh_tokens(
        &self,
        subject_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens SET revoked_utc = $2
            WHERE subject_id = $1 AND revoked_utc IS NULL AND expiry_utc > $2
            "#,
        )
        .bind(subject_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn purge_refresh_tokens(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM refresh_tokens WHERE expiry_utc < $1 OR revoked_utc < $1")
                .bind(before)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl VerificationTokenStore for Database {
    async fn insert_verification_token(
        &self,
        token: &VerificationToken,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO verification_tokens (token_id, subject_id, token_hash, purpose, used, expiry_utc, created_utc, used_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(token.token_id)
        .bind(token.subject_id)
        .bind(&token.token_hash)
        .bind(&token.purpose)
        .bind(token.used)
        .bind(token.expiry_utc)
        .bind(token.created_utc)
        .bind(token.used_utc)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token_hash: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StoreError> {
        let consumed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE verification_tokens SET used = TRUE, used_utc = $3
            WHERE token_hash = $1 AND purpose = $2 AND used = FALSE AND expiry_utc > $3
            RETURNING subject_id
            "#,
        )
        .bind(token_hash)
        .bind(purpose.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(consumed.map(|(id,)| id))
    }

    async fn purge_verification_tokens(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM verification_tokens WHERE expiry_utc < $1 OR used_utc < $1")
                .bind(before)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RateLimitStore for Database {
    async fn increment_within_limit(
        &self,
        key: &str,
        window_start: DateTime<Utc>,
        limit: u32,
    ) -> Result<Option<u32>, StoreError> {
        if limit == 0 {
            return Ok(None);
        }

        // No row returned means the conflict branch's WHERE rejected the
        // update: same window and already at the limit.
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            INSERT INTO rate_limit_counters (key, window_start, count)
            VALUES ($1, $2, 1)
            ON CONFLICT (key) DO UPDATE
            SET count = CASE
                    WHEN rate_limit_counters.window_start = EXCLUDED.window_start
                    THEN rate_limit_counters.count + 1
                    ELSE 1
                END,
                window_start = EXCLUDED.window_start
            WHERE rate_limit_counters.window_start <> EXCLUDED.window_start
               OR rate_limit_counters.count < $3
            RETURNING count
            "#,
        )
        .bind(key)
        .bind(window_start)
        .bind(i32::try_from(limit).unwrap_or(i32::MAX))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(|(count,)| count.max(0) as u32))
    }

    async fn purge_rate_limit_counters(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM rate_limit_counters WHERE window_start < $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PolicyStore for Database {
    async fn load_rules(&self) -> Result<Vec<PolicyRule>, StoreError> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            "SELECT ptype, v0, v1, v2, v3, v4, v5 FROM policy_rules ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(rule_from_row).collect()
    }

    async fn add_rule(&self, rule: &PolicyRule) -> Result<bool, StoreError> {
        let [v0, v1, v2, v3, v4, v5] = rule.to_values();
        let result = sqlx::query(
            r#"
            INSERT INTO policy_rules (ptype, v0, v1, v2, v3, v4, v5)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT ON CONSTRAINT policy_rules_unique DO NOTHING
            "#,
        )
        .bind(rule.ptype())
        .bind(v0)
        .bind(v1)
        .bind(v2)
        .bind(v3)
        .bind(v4)
        .bind(v5)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_rule(&self, rule: &PolicyRule) -> Result<bool, StoreError> {
        let [v0, v1, v2, v3, v4, v5] = rule.to_values();
        let result = sqlx::query(
            r#"
            DELETE FROM policy_rules
            WHERE ptype = $1 AND v0 = $2 AND v1 = $3 AND v2 = $4 AND v3 = $5 AND v4 = $6 AND v5 = $7
            "#,
        )
        .bind(rule.ptype())
        .bind(v0)
        .bind(v1)
        .bind(v2)
        .bind(v3)
        .bind(v4)
        .bind(v5)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_filtered_rules(&self, filter: &RuleFilter) -> Result<u64, StoreError> {
        let constraints = filter.constraints();
        let mut sql = String::from("DELETE FROM policy_rules WHERE ptype = $1");
        for (n, (index, _)) in constraints.iter().enumerate() {
            sql.push_str(&format!(" AND {} = ${}", RULE_COLUMNS[*index], n + 2));
        }

        let mut query = sqlx::query(&sql).bind(filter.ptype());
        for (_, value) in &constraints {
            query = query.bind(value);
        }

        let result = query.execute(&self.pool).await.map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn update_rule(&self, old: &PolicyRule, new: &PolicyRule) -> Result<bool, StoreError> {
        let [o0, o1, o2, o3, o4, o5] = old.to_values();
        let [n0, n1, n2, n3, n4, n5] = new.to_values();
        let result = sqlx::query(
            r#"
            UPDATE policy_rules
            SET ptype = $8, v0 = $9, v1 = $10, v2 = $11, v3 = $12, v4 = $13, v5 = $14
            WHERE ptype = $1 AND v0 = $2 AND v1 = $3 AND v2 = $4 AND v3 = $5 AND v4 = $6 AND v5 = $7
            "#,
        )
        .bind(old.ptype())
        .bind(o0)
        .bind(o1)
        .bind(o2)
        .bind(o3)
        .bind(o4)
        .bind(o5)
        .bind(new.ptype())
        .bind(n0)
        .bind(n1)
        .bind(n2)
        .bind(n3)
        .bind(n4)
        .bind(n5)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_all_rules(&self, rules: &[PolicyRule]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query("DELETE FROM policy_rules")
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        for rule in rules {
            let [v0, v1, v2, v3, v4, v5] = rule.to_values();
            sqlx::query(
                r#"
                INSERT INTO policy_rules (ptype, v0, v1, v2, v3, v4, v5)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT ON CONSTRAINT policy_rules_unique DO NOTHING
                "#,
            )
            .bind(rule.ptype())
            .bind(v0)
            .bind(v1)
            .bind(v2)
            .bind(v3)
            .bind(v4)
            .bind(v5)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn rule_stats(&self) -> Result<PolicyStats, StoreError> {
        let grouped: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT ptype, CASE WHEN ptype = $1 THEN v0 ELSE v1 END AS role, COUNT(*)
            FROM policy_rules
            GROUP BY ptype, role
            "#,
        )
        .bind(POLICY_PTYPE)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let by_subject: Vec<(String, i64)> = sqlx::query_as(
            "SELECT v0, COUNT(*) FROM policy_rules WHERE ptype = $1 GROUP BY v0",
        )
        .bind(ASSIGNMENT_PTYPE)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut stats = PolicyStats::default();
        for (ptype, role, count) in grouped {
            let count = count.max(0) as u64;
            stats.total_rules += count;
            if ptype == POLICY_PTYPE {
                stats.total_policies += count;
                stats.policies_by_role.insert(role, count);
            } else {
                stats.total_assignments += count;
                stats.assignments_by_role.insert(role, count);
            }
        }
        stats.assignments_by_subject = by_subject
            .into_iter()
            .map(|(subject, count)| (subject, count.max(0) as u64))
            .collect();

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Policy;
    use chrono::Duration;

    async fn connect() -> Database {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/press_auth_test".to_string());
        let pool = PgPool::connect(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        Database::new(pool)
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn rate_limit_upsert_stops_at_limit() {
        let db = connect().await;
        let key = format!("test:{}", Uuid::new_v4());
        let window = Utc::now();

        assert_eq!(db.increment_within_limit(&key, window, 2).await.unwrap(), Some(1));
        assert_eq!(db.increment_within_limit(&key, window, 2).await.unwrap(), Some(2));
        assert_eq!(db.increment_within_limit(&key, window, 2).await.unwrap(), None);
        assert_eq!(
            db.increment_within_limit(&key, window + Duration::hours(1), 2)
                .await
                .unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn verification_token_is_consumed_once() {
        let db = connect().await;
        let now = Utc::now();
        let hash = RefreshToken::hash_token(&Uuid::new_v4().to_string());
        let token = VerificationToken::new(
            Uuid::new_v4(),
            TokenPurpose::Email,
            hash.clone(),
            Duration::minutes(30),
            now,
        );
        db.insert_verification_token(&token).await.unwrap();

        assert_eq!(
            db.consume_verification_token(&hash, TokenPurpose::Email, now)
                .await
                .unwrap(),
            Some(token.subject_id)
        );
        assert!(db
            .consume_verification_token(&hash, TokenPurpose::Email, now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn duplicate_rule_is_not_added_twice() {
        let db = connect().await;
        let rule = PolicyRule::from(Policy::new(
            format!("role-{}", Uuid::new_v4()),
            "/posts",
            "GET",
        ));

        assert!(db.add_rule(&rule).await.unwrap());
        assert!(!db.add_rule(&rule).await.unwrap());
        assert!(db.remove_rule(&rule).await.unwrap());
    }
}
