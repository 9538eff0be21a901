//! Tenants, users and subscriptions.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use imobcrm_auth::{Role, User};
use imobcrm_core::{SubscriptionId, TenantId, UserId};
use imobcrm_tenancy::{Subscription, Tenant};

use super::{get_text, map_sqlx_error};
use crate::store::{StoreError, StoreResult, SubscriptionRepository, TenantRepository, UserRepository};

// ─────────────────────────────────────────────────────────────────────────────
// Tenants
// ─────────────────────────────────────────────────────────────────────────────

struct TenantRow(Tenant);

impl<'r> sqlx::FromRow<'r, PgRow> for TenantRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TenantRow(Tenant {
            id: TenantId::from_uuid(row.try_get("id")?),
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            status: get_text(row, "status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

pub struct PostgresTenantRepository {
    pool: Arc<PgPool>,
}

impl PostgresTenantRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantRepository for PostgresTenantRepository {
    async fn insert(&self, tenant: &Tenant) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tenants (id, name, slug, status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(*tenant.id.as_uuid())
        .bind(&tenant.name)
        .bind(&tenant.slug)
        .bind(tenant.status.as_str())
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("inserting tenant", e))?;
        Ok(())
    }

    async fn update(&self, tenant: &Tenant) -> StoreResult<()> {
        let result = sqlx::query("UPDATE tenants SET name = $2, status = $3, updated_at = $4 WHERE id = $1")
            .bind(*tenant.id.as_uuid())
            .bind(&tenant.name)
            .bind(tenant.status.as_str())
            .bind(tenant.updated_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("updating tenant", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("tenant"));
        }
        Ok(())
    }

    async fn get(&self, id: TenantId) -> StoreResult<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(
            "SELECT id, name, slug, status, created_at, updated_at FROM tenants WHERE id = $1",
        )
        .bind(*id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("loading tenant", e))?;
        Ok(row.map(|r| r.0))
    }

    async fn find_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(
            "SELECT id, name, slug, status, created_at, updated_at FROM tenants WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("loading tenant by slug", e))?;
        Ok(row.map(|r| r.0))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

const USER_COLUMNS: &str = "id, tenant_id, email, display_name, password_hash, roles, status, \
                            created_at, updated_at, last_login_at";

struct UserRow(User);

impl<'r> sqlx::FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let roles: Vec<String> = row.try_get("roles")?;
        Ok(UserRow(User {
            id: UserId::from_uuid(row.try_get("id")?),
            tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
            email: row.try_get("email")?,
            display_name: row.try_get("display_name")?,
            password_hash: row.try_get("password_hash")?,
            roles: roles.into_iter().map(Role::new).collect(),
            status: get_text(row, "status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_login_at: row.try_get("last_login_at")?,
        }))
    }
}

fn role_names(user: &User) -> Vec<String> {
    user.roles.iter().map(|r| r.as_str().to_string()).collect()
}

pub struct PostgresUserRepository {
    pool: Arc<PgPool>,
}

impl PostgresUserRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn insert(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, tenant_id, email, display_name, password_hash, roles, status,
                created_at, updated_at, last_login_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(*user.id.as_uuid())
        .bind(*user.tenant_id.as_uuid())
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(role_names(user))
        .bind(user.status.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.last_login_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("inserting user", e))?;
        Ok(())
    }

    async fn update(&self, user: &User) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                email = $3, display_name = $4, password_hash = $5, roles = $6, status = $7,
                updated_at = $8, last_login_at = $9
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(*user.tenant_id.as_uuid())
        .bind(*user.id.as_uuid())
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(role_names(user))
        .bind(user.status.as_str())
        .bind(user.updated_at)
        .bind(user.last_login_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("updating user", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("user"));
        }
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, id: UserId) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE tenant_id = $1 AND id = $2");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(*tenant_id.as_uuid())
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("loading user", e))?;
        Ok(row.map(|r| r.0))
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("loading user by email", e))?;
        Ok(row.map(|r| r.0))
    }

    async fn list(&self, tenant_id: TenantId) -> StoreResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE tenant_id = $1 ORDER BY created_at, id");
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(*tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("listing users", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn delete(&self, tenant_id: TenantId, id: UserId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE tenant_id = $1 AND id = $2")
            .bind(*tenant_id.as_uuid())
            .bind(*id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("deleting user", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, tenant_id: TenantId) -> StoreResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM users WHERE tenant_id = $1")
            .bind(*tenant_id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("counting users", e))?;
        let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("counting users", e))?;
        Ok(n.max(0) as u64)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscriptions
// ─────────────────────────────────────────────────────────────────────────────

struct SubscriptionRow(Subscription);

impl<'r> sqlx::FromRow<'r, PgRow> for SubscriptionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SubscriptionRow(Subscription {
            id: SubscriptionId::from_uuid(row.try_get("id")?),
            tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
            plan: get_text(row, "plan")?,
            status: get_text(row, "status")?,
            trial_ends_at: row.try_get("trial_ends_at")?,
            current_period_start: row.try_get("current_period_start")?,
            current_period_end: row.try_get("current_period_end")?,
            past_due_since: row.try_get("past_due_since")?,
            canceled_at: row.try_get("canceled_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

pub struct PostgresSubscriptionRepository {
    pool: Arc<PgPool>,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn upsert(&self, s: &Subscription) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, tenant_id, plan, status, trial_ends_at, current_period_start,
                current_period_end, past_due_since, canceled_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (tenant_id) DO UPDATE SET
                plan = EXCLUDED.plan,
                status = EXCLUDED.status,
                trial_ends_at = EXCLUDED.trial_ends_at,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                past_due_since = EXCLUDED.past_due_since,
                canceled_at = EXCLUDED.canceled_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(*s.id.as_uuid())
        .bind(*s.tenant_id.as_uuid())
        .bind(s.plan.as_str())
        .bind(s.status.as_str())
        .bind(s.trial_ends_at)
        .bind(s.current_period_start)
        .bind(s.current_period_end)
        .bind(s.past_due_since)
        .bind(s.canceled_at)
        .bind(s.created_at)
        .bind(s.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("saving subscription", e))?;
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId) -> StoreResult<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, tenant_id, plan, status, trial_ends_at, current_period_start,
                   current_period_end, past_due_since, canceled_at, created_at, updated_at
            FROM subscriptions
            WHERE tenant_id = $1
            "#,
        )
        .bind(*tenant_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("loading subscription", e))?;
        Ok(row.map(|r| r.0))
    }
}
