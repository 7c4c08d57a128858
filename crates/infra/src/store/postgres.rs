//! Postgres-backed access store.
//!
//! ## Transactions
//!
//! Snapshots are read inside a `REPEATABLE READ, READ ONLY` transaction so all
//! tables are observed at one instant. Writes lock the organization row first,
//! which serializes structural changes per organization, then plan against a
//! snapshot taken inside the same transaction.
//!
//! Every transaction sets a local `statement_timeout`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | AccessError |
//! |------------|----------------------|-------------|
//! | Database (unique violation) | `23505` | `InvalidArgument` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (check constraint violation) | `23514` | `InvalidArgument` |
//! | Database (query canceled, statement timeout) | `57014` | `Storage` |
//! | RowNotFound | N/A | `NotFound` |
//! | Other | N/A | `Storage` |

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use formgate_access::{
    AccessSnapshot, ActionSet, DesiredChild, Form, Grant, GrantKey, GrantWrite, Module,
    Organization, OrganizationUnit, Role, Subject, SystemCapability, Target, UnitRoleAssignment,
    User, UserStatus, UserUnitAssignment, plan_child_replacement,
};
use formgate_core::{
    AccessError, AccessResult, FormId, GrantId, ModuleId, OrganizationId, RoleId, UnitId, UserId,
};

use super::cascade::{self, ModuleRemoval};
use super::{AccessStore, NewModule, NewUnit, UnitUpdate};

const SCHEMA: &str = include_str!("schema.sql");

/// Postgres-backed access store.
#[derive(Debug, Clone)]
pub struct PostgresAccessStore {
    pool: Arc<PgPool>,
    statement_timeout_ms: u64,
}

impl PostgresAccessStore {
    pub fn new(pool: PgPool, statement_timeout_ms: u64) -> Self {
        Self {
            pool: Arc::new(pool),
            statement_timeout_ms,
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        statement_timeout_ms: u64,
    ) -> AccessResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_millis(statement_timeout_ms))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, statement_timeout_ms))
    }

    /// Apply the bundled schema. Safe to run on every start.
    pub async fn migrate(&self) -> AccessResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn begin_read(&self) -> AccessResult<Transaction<'_, Postgres>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;
        self.set_timeout(&mut tx).await?;
        Ok(tx)
    }

    /// Start a write transaction holding the organization's row lock.
    async fn begin_write(
        &self,
        organization_id: OrganizationId,
    ) -> AccessResult<Transaction<'_, Postgres>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        self.set_timeout(&mut tx).await?;

        let locked = sqlx::query("SELECT id FROM organizations WHERE id = $1 FOR UPDATE")
            .bind(organization_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_organization", e))?;
        if locked.is_none() {
            return Err(AccessError::not_found(format!("organization {organization_id}")));
        }
        Ok(tx)
    }

    async fn set_timeout(&self, tx: &mut Transaction<'_, Postgres>) -> AccessResult<()> {
        // SET does not take bind parameters; the value is a plain integer.
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout_ms
        ))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("set_statement_timeout", e))?;
        Ok(())
    }

    async fn commit(tx: Transaction<'_, Postgres>) -> AccessResult<()> {
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot loading
// ─────────────────────────────────────────────────────────────────────────────

async fn snapshot_in(
    conn: &mut PgConnection,
    organization_id: OrganizationId,
) -> AccessResult<AccessSnapshot> {
    let org = organization_id.as_uuid();

    let organization = sqlx::query_as::<_, OrganizationRow>(
        "SELECT id, name, owner_user_id FROM organizations WHERE id = $1",
    )
    .bind(org)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_organization", e))?
    .ok_or_else(|| AccessError::not_found(format!("organization {organization_id}")))?;

    let roles = sqlx::query_as::<_, RoleRow>(
        r#"
        SELECT id, organization_id, name, is_admin, capabilities
        FROM roles
        WHERE organization_id = $1
        ORDER BY name, id
        "#,
    )
    .bind(org)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_roles", e))?;

    let units = sqlx::query_as::<_, UnitRow>(
        r#"
        SELECT id, organization_id, name, level, sort_order, parent_id
        FROM organization_units
        WHERE organization_id = $1
        ORDER BY level, sort_order, name, id
        "#,
    )
    .bind(org)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_units", e))?;

    let unit_roles = sqlx::query(
        r#"
        SELECT ur.unit_id, ur.role_id
        FROM unit_roles ur
        JOIN organization_units u ON u.id = ur.unit_id
        WHERE u.organization_id = $1
        "#,
    )
    .bind(org)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_unit_roles", e))?;

    let user_units = sqlx::query(
        r#"
        SELECT uu.user_id, uu.unit_id, uu.role_id
        FROM user_units uu
        JOIN organization_units u ON u.id = uu.unit_id
        WHERE u.organization_id = $1
        "#,
    )
    .bind(org)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_user_units", e))?;

    let modules = sqlx::query_as::<_, ModuleRow>(
        r#"
        SELECT id, organization_id, name, icon, level, sort_order, active, parent_id
        FROM modules
        WHERE organization_id = $1
        ORDER BY level, sort_order, name, id
        "#,
    )
    .bind(org)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_modules", e))?;

    let forms = sqlx::query_as::<_, FormRow>(
        r#"
        SELECT f.id, f.module_id, f.name, f.sort_order, f.published
        FROM forms f
        JOIN modules m ON m.id = f.module_id
        WHERE m.organization_id = $1
        ORDER BY f.sort_order, f.name, f.id
        "#,
    )
    .bind(org)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_forms", e))?;

    let grants = sqlx::query_as::<_, GrantRow>(
        r#"
        SELECT id, organization_id, subject_type, subject_id, target_type, target_id,
               granted, can_view, can_create, can_edit, can_delete, can_manage,
               reason, granted_by, granted_at, expires_at
        FROM grants
        WHERE organization_id = $1
        "#,
    )
    .bind(org)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_grants", e))?;

    Ok(AccessSnapshot {
        organization: organization.into(),
        roles: roles.into_iter().map(Role::from).collect(),
        units: units
            .into_iter()
            .map(OrganizationUnit::try_from)
            .collect::<AccessResult<_>>()?,
        unit_roles: unit_roles
            .iter()
            .map(|r| {
                Ok(UnitRoleAssignment {
                    unit_id: UnitId::from_uuid(get(r, "unit_id")?),
                    role_id: RoleId::from_uuid(get(r, "role_id")?),
                })
            })
            .collect::<AccessResult<_>>()?,
        user_units: user_units
            .iter()
            .map(|r| {
                Ok(UserUnitAssignment {
                    user_id: UserId::from_uuid(get(r, "user_id")?),
                    unit_id: UnitId::from_uuid(get(r, "unit_id")?),
                    role_id: RoleId::from_uuid(get(r, "role_id")?),
                })
            })
            .collect::<AccessResult<_>>()?,
        modules: modules
            .into_iter()
            .map(Module::try_from)
            .collect::<AccessResult<_>>()?,
        forms: forms.into_iter().map(Form::from).collect(),
        grants: grants
            .into_iter()
            .map(Grant::try_from)
            .collect::<AccessResult<_>>()?,
    })
}

async fn member_ids(
    conn: &mut PgConnection,
    organization_id: OrganizationId,
) -> AccessResult<HashSet<UserId>> {
    let rows = sqlx::query("SELECT id FROM users WHERE organization_id = $1")
        .bind(organization_id.as_uuid())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_members", e))?;
    rows.iter()
        .map(|r| Ok(UserId::from_uuid(get(r, "id")?)))
        .collect()
}

async fn ensure_subject_in(
    conn: &mut PgConnection,
    organization_id: OrganizationId,
    subject: Subject,
) -> AccessResult<()> {
    let query = match subject {
        Subject::Role(_) => "SELECT 1 FROM roles WHERE id = $1 AND organization_id = $2",
        Subject::User(_) => "SELECT 1 FROM users WHERE id = $1 AND organization_id = $2",
    };
    let (_, subject_id) = subject_columns(subject);
    let found = sqlx::query(query)
        .bind(subject_id)
        .bind(organization_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("check_subject", e))?;
    if found.is_some() {
        return Ok(());
    }
    Err(match subject {
        Subject::Role(id) => AccessError::not_found(format!("role {id}")),
        Subject::User(id) => AccessError::not_found(format!("user {id}")),
    })
}

async fn ensure_target_in(
    conn: &mut PgConnection,
    organization_id: OrganizationId,
    target: Target,
) -> AccessResult<()> {
    let query = match target {
        Target::Module(_) => "SELECT 1 FROM modules WHERE id = $1 AND organization_id = $2",
        Target::Form(_) => {
            r#"
            SELECT 1 FROM forms f JOIN modules m ON m.id = f.module_id
            WHERE f.id = $1 AND m.organization_id = $2
            "#
        }
    };
    let (_, target_id) = target_columns(target);
    let found = sqlx::query(query)
        .bind(target_id)
        .bind(organization_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("check_target", e))?;
    if found.is_some() {
        return Ok(());
    }
    Err(match target {
        Target::Module(id) => AccessError::not_found(format!("module {id}")),
        Target::Form(id) => AccessError::not_found(format!("form {id}")),
    })
}

/// Current row for `key`, locked until the transaction ends.
async fn lock_grant(
    conn: &mut PgConnection,
    organization_id: OrganizationId,
    key: GrantKey,
) -> AccessResult<Option<Grant>> {
    let (subject_type, subject_id) = subject_columns(key.subject);
    let (target_type, target_id) = target_columns(key.target);
    let row = sqlx::query_as::<_, GrantRow>(
        r#"
        SELECT id, organization_id, subject_type, subject_id, target_type, target_id,
               granted, can_view, can_create, can_edit, can_delete, can_manage,
               reason, granted_by, granted_at, expires_at
        FROM grants
        WHERE organization_id = $1
          AND subject_type = $2 AND subject_id = $3
          AND target_type = $4 AND target_id = $5
        FOR UPDATE
        "#,
    )
    .bind(organization_id.as_uuid())
    .bind(subject_type)
    .bind(subject_id)
    .bind(target_type)
    .bind(target_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("lock_grant", e))?;
    row.map(Grant::try_from).transpose()
}

async fn store_grant(conn: &mut PgConnection, mut grant: Grant) -> AccessResult<Grant> {
    let (subject_type, subject_id) = subject_columns(grant.key.subject);
    let (target_type, target_id) = target_columns(grant.key.target);

    let row = sqlx::query(
        r#"
        INSERT INTO grants (
            id, organization_id, subject_type, subject_id, target_type, target_id,
            granted, can_view, can_create, can_edit, can_delete, can_manage,
            reason, granted_by, granted_at, expires_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (subject_type, subject_id, target_type, target_id)
        DO UPDATE SET
            granted = EXCLUDED.granted,
            can_view = EXCLUDED.can_view,
            can_create = EXCLUDED.can_create,
            can_edit = EXCLUDED.can_edit,
            can_delete = EXCLUDED.can_delete,
            can_manage = EXCLUDED.can_manage,
            reason = EXCLUDED.reason,
            granted_by = EXCLUDED.granted_by,
            granted_at = EXCLUDED.granted_at,
            expires_at = EXCLUDED.expires_at
        RETURNING id
        "#,
    )
    .bind(grant.id.as_uuid())
    .bind(grant.organization_id.as_uuid())
    .bind(subject_type)
    .bind(subject_id)
    .bind(target_type)
    .bind(target_id)
    .bind(grant.granted)
    .bind(grant.actions.view)
    .bind(grant.actions.create)
    .bind(grant.actions.edit)
    .bind(grant.actions.delete)
    .bind(grant.actions.manage)
    .bind(&grant.reason)
    .bind(grant.granted_by.as_uuid())
    .bind(grant.granted_at)
    .bind(grant.expires_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("upsert_grant", e))?;

    grant.id = GrantId::from_uuid(get(&row, "id")?);
    Ok(grant)
}

async fn remove_modules(conn: &mut PgConnection, plan: &ModuleRemoval) -> AccessResult<()> {
    let modules = uuids(&plan.modules);
    let forms = uuids(&plan.forms);

    sqlx::query(
        r#"
        DELETE FROM grants
        WHERE (target_type = 'module' AND target_id = ANY($1))
           OR (target_type = 'form' AND target_id = ANY($2))
        "#,
    )
    .bind(&modules)
    .bind(&forms)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("delete_module_grants", e))?;

    sqlx::query("DELETE FROM forms WHERE id = ANY($1)")
        .bind(&forms)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("delete_forms", e))?;

    for id in &modules {
        sqlx::query("DELETE FROM modules WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("delete_module", e))?;
    }
    Ok(())
}

async fn insert_module(conn: &mut PgConnection, module: &Module) -> AccessResult<()> {
    sqlx::query(
        r#"
        INSERT INTO modules (id, organization_id, name, icon, level, sort_order, active, parent_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(module.id.as_uuid())
    .bind(module.organization_id.as_uuid())
    .bind(&module.name)
    .bind(&module.icon)
    .bind(level_column(module.level)?)
    .bind(module.sort_order)
    .bind(module.active)
    .bind(module.parent_id.map(Uuid::from))
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_module", e))?;
    Ok(())
}

#[async_trait::async_trait]
impl AccessStore for PostgresAccessStore {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn find_user(&self, user_id: UserId) -> AccessResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, organization_id, email, status FROM users WHERE id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user", e))?;
        row.map(User::try_from).transpose()
    }

    #[instrument(skip(self), fields(organization_id = %organization_id), err)]
    async fn find_organization(
        &self,
        organization_id: OrganizationId,
    ) -> AccessResult<Option<Organization>> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            "SELECT id, name, owner_user_id FROM organizations WHERE id = $1",
        )
        .bind(organization_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_organization", e))?;
        Ok(row.map(Organization::from))
    }

    #[instrument(skip(self), fields(organization_id = %organization_id), err)]
    async fn load_snapshot(&self, organization_id: OrganizationId) -> AccessResult<AccessSnapshot> {
        let mut tx = self.begin_read().await?;
        let snapshot = snapshot_in(&mut tx, organization_id).await?;
        Self::commit(tx).await?;
        Ok(snapshot)
    }

    #[instrument(
        skip(self, writes),
        fields(organization_id = %organization_id, writes = writes.len()),
        err
    )]
    async fn write_grants(
        &self,
        organization_id: OrganizationId,
        writes: Vec<GrantWrite>,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<Grant>> {
        let mut tx = self.begin_write(organization_id).await?;

        let mut written = Vec::with_capacity(writes.len());
        for write in writes {
            let key = write.key;
            ensure_subject_in(&mut tx, organization_id, key.subject).await?;
            ensure_target_in(&mut tx, organization_id, key.target).await?;

            let existing = lock_grant(&mut tx, organization_id, key).await?;
            let grant = write
                .into_request(existing.as_ref())
                .into_grant(organization_id, existing.as_ref(), now);
            written.push(store_grant(&mut tx, grant).await?);
        }

        // Dropping `tx` on any earlier error rolls the whole batch back.
        Self::commit(tx).await?;
        tracing::info!(count = written.len(), "grant batch written");
        Ok(written)
    }

    #[instrument(skip(self), fields(organization_id = %organization_id), err)]
    async fn revoke_grant(
        &self,
        organization_id: OrganizationId,
        key: GrantKey,
    ) -> AccessResult<()> {
        let mut tx = self.begin_write(organization_id).await?;
        let (subject_type, subject_id) = subject_columns(key.subject);
        let (target_type, target_id) = target_columns(key.target);

        let result = sqlx::query(
            r#"
            DELETE FROM grants
            WHERE organization_id = $1
              AND subject_type = $2 AND subject_id = $3
              AND target_type = $4 AND target_id = $5
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(subject_type)
        .bind(subject_id)
        .bind(target_type)
        .bind(target_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("revoke_grant", e))?;

        if result.rows_affected() == 0 {
            return Err(AccessError::not_found("grant"));
        }
        Self::commit(tx).await?;
        tracing::info!("grant revoked");
        Ok(())
    }

    #[instrument(skip(self, unit), fields(organization_id = %organization_id), err)]
    async fn create_unit(
        &self,
        organization_id: OrganizationId,
        unit: NewUnit,
    ) -> AccessResult<OrganizationUnit> {
        let mut tx = self.begin_write(organization_id).await?;
        let snapshot = snapshot_in(&mut tx, organization_id).await?;
        let unit = cascade::build_unit(&snapshot, unit)?;

        sqlx::query(
            r#"
            INSERT INTO organization_units (id, organization_id, name, level, sort_order, parent_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(unit.id.as_uuid())
        .bind(unit.organization_id.as_uuid())
        .bind(&unit.name)
        .bind(level_column(unit.level)?)
        .bind(unit.sort_order)
        .bind(unit.parent_id.map(Uuid::from))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_unit", e))?;

        Self::commit(tx).await?;
        Ok(unit)
    }

    #[instrument(skip(self, update), fields(organization_id = %organization_id, unit_id = %unit_id), err)]
    async fn update_unit(
        &self,
        organization_id: OrganizationId,
        unit_id: UnitId,
        update: UnitUpdate,
    ) -> AccessResult<OrganizationUnit> {
        let mut tx = self.begin_write(organization_id).await?;
        let snapshot = snapshot_in(&mut tx, organization_id).await?;
        let members = member_ids(&mut tx, organization_id).await?;
        let (unit, unit_roles, user_units) =
            cascade::check_unit_update(&snapshot, unit_id, &update, |u| members.contains(&u))?;

        sqlx::query("UPDATE organization_units SET name = $2, sort_order = $3 WHERE id = $1")
            .bind(unit.id.as_uuid())
            .bind(&unit.name)
            .bind(unit.sort_order)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_unit", e))?;

        sqlx::query("DELETE FROM unit_roles WHERE unit_id = $1")
            .bind(unit_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_unit_roles", e))?;
        for a in &unit_roles {
            sqlx::query("INSERT INTO unit_roles (unit_id, role_id) VALUES ($1, $2)")
                .bind(a.unit_id.as_uuid())
                .bind(a.role_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_unit_role", e))?;
        }

        sqlx::query("DELETE FROM user_units WHERE unit_id = $1")
            .bind(unit_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_user_units", e))?;
        for a in &user_units {
            sqlx::query("INSERT INTO user_units (user_id, unit_id, role_id) VALUES ($1, $2, $3)")
                .bind(a.user_id.as_uuid())
                .bind(a.unit_id.as_uuid())
                .bind(a.role_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_user_unit", e))?;
        }

        Self::commit(tx).await?;
        Ok(unit)
    }

    #[instrument(skip(self), fields(organization_id = %organization_id, unit_id = %unit_id), err)]
    async fn delete_unit(
        &self,
        organization_id: OrganizationId,
        unit_id: UnitId,
    ) -> AccessResult<Vec<UnitId>> {
        let mut tx = self.begin_write(organization_id).await?;
        let snapshot = snapshot_in(&mut tx, organization_id).await?;
        let order = cascade::plan_unit_removal(&snapshot, unit_id)?;
        let ids = uuids(&order);

        sqlx::query("DELETE FROM user_units WHERE unit_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_user_units", e))?;
        sqlx::query("DELETE FROM unit_roles WHERE unit_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_unit_roles", e))?;
        for id in &ids {
            sqlx::query("DELETE FROM organization_units WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_unit", e))?;
        }

        Self::commit(tx).await?;
        tracing::info!(removed = order.len(), "unit subtree deleted");
        Ok(order)
    }

    #[instrument(skip(self, module), fields(organization_id = %organization_id), err)]
    async fn create_module(
        &self,
        organization_id: OrganizationId,
        module: NewModule,
    ) -> AccessResult<Module> {
        let mut tx = self.begin_write(organization_id).await?;
        let snapshot = snapshot_in(&mut tx, organization_id).await?;
        let module = cascade::build_module(&snapshot, module)?;
        insert_module(&mut tx, &module).await?;
        Self::commit(tx).await?;
        Ok(module)
    }

    #[instrument(skip(self), fields(organization_id = %organization_id, module_id = %module_id), err)]
    async fn delete_module(
        &self,
        organization_id: OrganizationId,
        module_id: ModuleId,
    ) -> AccessResult<Vec<ModuleId>> {
        let mut tx = self.begin_write(organization_id).await?;
        let snapshot = snapshot_in(&mut tx, organization_id).await?;
        let plan = cascade::plan_module_removal(&snapshot, module_id)?;
        remove_modules(&mut tx, &plan).await?;
        Self::commit(tx).await?;
        tracing::info!(removed = plan.modules.len(), "module subtree deleted");
        Ok(plan.modules)
    }

    #[instrument(
        skip(self, desired),
        fields(organization_id = %organization_id, parent_id = %parent_id, desired = desired.len()),
        err
    )]
    async fn replace_submodules(
        &self,
        organization_id: OrganizationId,
        parent_id: ModuleId,
        desired: Vec<DesiredChild>,
    ) -> AccessResult<Vec<Module>> {
        let mut tx = self.begin_write(organization_id).await?;
        let mut snapshot = snapshot_in(&mut tx, organization_id).await?;
        let plan = plan_child_replacement(&snapshot, parent_id, desired)?;

        remove_modules(
            &mut tx,
            &ModuleRemoval {
                modules: plan.removed_modules.clone(),
                forms: plan.removed_forms.clone(),
            },
        )
        .await?;
        for module in &plan.updated {
            sqlx::query(
                "UPDATE modules SET name = $2, icon = $3, sort_order = $4, active = $5 WHERE id = $1",
            )
            .bind(module.id.as_uuid())
            .bind(&module.name)
            .bind(&module.icon)
            .bind(module.sort_order)
            .bind(module.active)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_module", e))?;
        }
        for module in &plan.created {
            insert_module(&mut tx, module).await?;
        }

        Self::commit(tx).await?;
        tracing::info!(
            created = plan.created.len(),
            updated = plan.updated.len(),
            removed = plan.removed_modules.len(),
            "submodules replaced"
        );

        cascade::apply_replacement(&mut snapshot, &plan);
        Ok(cascade::children_in_order(&snapshot, parent_id))
    }

    #[instrument(skip(self), fields(organization_id = %organization_id, role_id = %role_id), err)]
    async fn delete_role(
        &self,
        organization_id: OrganizationId,
        role_id: RoleId,
    ) -> AccessResult<()> {
        let mut tx = self.begin_write(organization_id).await?;
        let exists = sqlx::query("SELECT 1 FROM roles WHERE id = $1 AND organization_id = $2")
            .bind(role_id.as_uuid())
            .bind(organization_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_role", e))?;
        if exists.is_none() {
            return Err(AccessError::not_found(format!("role {role_id}")));
        }

        for statement in [
            "DELETE FROM grants WHERE subject_type = 'role' AND subject_id = $1",
            "DELETE FROM unit_roles WHERE role_id = $1",
            "DELETE FROM user_units WHERE role_id = $1",
            "DELETE FROM roles WHERE id = $1",
        ] {
            sqlx::query(statement)
                .bind(role_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_role", e))?;
        }

        Self::commit(tx).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error mapping & column helpers
// ─────────────────────────────────────────────────────────────────────────────

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> AccessError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => AccessError::invalid_argument(format!("duplicate value in {operation}")),
                Some("23503") => AccessError::not_found(format!("referenced row in {operation}")),
                Some("23514") => AccessError::invalid_argument(format!("check failed in {operation}")),
                _ => {
                    tracing::error!(operation, error = %msg, "database error");
                    AccessError::storage(msg)
                }
            }
        }
        sqlx::Error::RowNotFound => AccessError::not_found(format!("row in {operation}")),
        other => {
            tracing::error!(operation, error = %other, "storage failure");
            AccessError::storage(format!("{operation}: {other}"))
        }
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> AccessResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| AccessError::storage(format!("failed to decode column {column}: {e}")))
}

fn uuids<T: Copy + Into<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(|id| (*id).into()).collect()
}

fn level_column(level: u32) -> AccessResult<i32> {
    i32::try_from(level).map_err(|_| AccessError::invalid_argument(format!("level {level} out of range")))
}

fn level_value(level: i32) -> AccessResult<u32> {
    u32::try_from(level).map_err(|_| AccessError::integrity(format!("negative level {level}")))
}

fn subject_columns(subject: Subject) -> (&'static str, Uuid) {
    match subject {
        Subject::Role(id) => ("role", id.into()),
        Subject::User(id) => ("user", id.into()),
    }
}

fn target_columns(target: Target) -> (&'static str, Uuid) {
    match target {
        Target::Module(id) => ("module", id.into()),
        Target::Form(id) => ("form", id.into()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    owner_user_id: Option<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for OrganizationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            owner_user_id: row.try_get("owner_user_id")?,
        })
    }
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Organization {
            id: OrganizationId::from_uuid(row.id),
            name: row.name,
            owner_user_id: row.owner_user_id.map(UserId::from_uuid),
        }
    }
}

#[derive(Debug)]
struct UserRow {
    id: Uuid,
    organization_id: Option<Uuid>,
    email: String,
    status: String,
}

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            email: row.try_get("email")?,
            status: row.try_get("status")?,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = AccessError;

    fn try_from(row: UserRow) -> AccessResult<Self> {
        let status = match row.status.as_str() {
            "active" => UserStatus::Active,
            "inactive" => UserStatus::Inactive,
            other => {
                return Err(AccessError::integrity(format!(
                    "user {} has unknown status '{other}'",
                    row.id
                )));
            }
        };
        Ok(User {
            id: UserId::from_uuid(row.id),
            organization_id: row.organization_id.map(OrganizationId::from_uuid),
            email: row.email,
            status,
        })
    }
}

#[derive(Debug)]
struct RoleRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    is_admin: bool,
    capabilities: Vec<String>,
}

impl<'r> FromRow<'r, PgRow> for RoleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            name: row.try_get("name")?,
            is_admin: row.try_get("is_admin")?,
            capabilities: row.try_get("capabilities")?,
        })
    }
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        let mut capabilities = BTreeSet::new();
        for key in &row.capabilities {
            match SystemCapability::from_key(key) {
                Ok(c) => {
                    capabilities.insert(c);
                }
                Err(_) => tracing::warn!(role_id = %row.id, key = %key, "ignoring unknown capability"),
            }
        }
        Role {
            id: RoleId::from_uuid(row.id),
            organization_id: OrganizationId::from_uuid(row.organization_id),
            name: row.name,
            is_admin: row.is_admin,
            capabilities,
        }
    }
}

#[derive(Debug)]
struct UnitRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    level: i32,
    sort_order: i32,
    parent_id: Option<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for UnitRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            name: row.try_get("name")?,
            level: row.try_get("level")?,
            sort_order: row.try_get("sort_order")?,
            parent_id: row.try_get("parent_id")?,
        })
    }
}

impl TryFrom<UnitRow> for OrganizationUnit {
    type Error = AccessError;

    fn try_from(row: UnitRow) -> AccessResult<Self> {
        Ok(OrganizationUnit {
            id: UnitId::from_uuid(row.id),
            organization_id: OrganizationId::from_uuid(row.organization_id),
            name: row.name,
            level: level_value(row.level)?,
            sort_order: row.sort_order,
            parent_id: row.parent_id.map(UnitId::from_uuid),
        })
    }
}

#[derive(Debug)]
struct ModuleRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    icon: Option<String>,
    level: i32,
    sort_order: i32,
    active: bool,
    parent_id: Option<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for ModuleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            name: row.try_get("name")?,
            icon: row.try_get("icon")?,
            level: row.try_get("level")?,
            sort_order: row.try_get("sort_order")?,
            active: row.try_get("active")?,
            parent_id: row.try_get("parent_id")?,
        })
    }
}

impl TryFrom<ModuleRow> for Module {
    type Error = AccessError;

    fn try_from(row: ModuleRow) -> AccessResult<Self> {
        Ok(Module {
            id: ModuleId::from_uuid(row.id),
            organization_id: OrganizationId::from_uuid(row.organization_id),
            name: row.name,
            icon: row.icon,
            level: level_value(row.level)?,
            sort_order: row.sort_order,
            active: row.active,
            parent_id: row.parent_id.map(ModuleId::from_uuid),
        })
    }
}

#[derive(Debug)]
struct FormRow {
    id: Uuid,
    module_id: Uuid,
    name: String,
    sort_order: i32,
    published: bool,
}

impl<'r> FromRow<'r, PgRow> for FormRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            module_id: row.try_get("module_id")?,
            name: row.try_get("name")?,
            sort_order: row.try_get("sort_order")?,
            published: row.try_get("published")?,
        })
    }
}

impl From<FormRow> for Form {
    fn from(row: FormRow) -> Self {
        Form {
            id: FormId::from_uuid(row.id),
            module_id: ModuleId::from_uuid(row.module_id),
            name: row.name,
            sort_order: row.sort_order,
            published: row.published,
        }
    }
}

#[derive(Debug)]
struct GrantRow {
    id: Uuid,
    organization_id: Uuid,
    subject_type: String,
    subject_id: Uuid,
    target_type: String,
    target_id: Uuid,
    granted: bool,
    actions: ActionSet,
    reason: Option<String>,
    granted_by: Uuid,
    granted_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for GrantRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            subject_type: row.try_get("subject_type")?,
            subject_id: row.try_get("subject_id")?,
            target_type: row.try_get("target_type")?,
            target_id: row.try_get("target_id")?,
            granted: row.try_get("granted")?,
            actions: ActionSet {
                view: row.try_get("can_view")?,
                create: row.try_get("can_create")?,
                edit: row.try_get("can_edit")?,
                delete: row.try_get("can_delete")?,
                manage: row.try_get("can_manage")?,
            },
            reason: row.try_get("reason")?,
            granted_by: row.try_get("granted_by")?,
            granted_at: row.try_get("granted_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl TryFrom<GrantRow> for Grant {
    type Error = AccessError;

    fn try_from(row: GrantRow) -> AccessResult<Self> {
        let subject = match row.subject_type.as_str() {
            "role" => Subject::Role(RoleId::from_uuid(row.subject_id)),
            "user" => Subject::User(UserId::from_uuid(row.subject_id)),
            other => {
                return Err(AccessError::integrity(format!(
                    "grant {} has unknown subject type '{other}'",
                    row.id
                )));
            }
        };
        let target = match row.target_type.as_str() {
            "module" => Target::Module(ModuleId::from_uuid(row.target_id)),
            "form" => Target::Form(FormId::from_uuid(row.target_id)),
            other => {
                return Err(AccessError::integrity(format!(
                    "grant {} has unknown target type '{other}'",
                    row.id
                )));
            }
        };
        Ok(Grant {
            id: GrantId::from_uuid(row.id),
            organization_id: OrganizationId::from_uuid(row.organization_id),
            key: GrantKey { subject, target },
            granted: row.granted,
            actions: row.actions,
            reason: row.reason,
            granted_by: UserId::from_uuid(row.granted_by),
            granted_at: row.granted_at,
            expires_at: row.expires_at,
        })
    }
}
