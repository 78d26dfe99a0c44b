//! PostgreSQL-backed registry.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{RegistryError, RegistryResult, RegistryStore};
use crate::models::{Plugin, PluginRegistration, PluginSetting, RegisterOutcome, TeamId};

/// Plugin columns with capability names folded into arrays.
const SELECT_PLUGIN: &str = r#"
    SELECT p.id, p.name, p.description, p.url, p.instances,
           COALESCE((SELECT array_agg(a.name ORDER BY a.name)
                     FROM plugin_action a WHERE a.plugin_id = p.id), '{}') AS actions,
           COALESCE((SELECT array_agg(e.name ORDER BY e.name)
                     FROM plugin_event e WHERE e.plugin_id = p.id), '{}') AS events
    FROM plugin p
"#;

/// Registry store backed by the `plugin*` tables.
#[derive(Clone)]
pub struct PgRegistry {
    pool: PgPool,
}

impl PgRegistry {
    /// Create a new registry over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl std::fmt::Debug for PgRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgRegistry").finish()
    }
}

/// Map a foreign key violation on `plugin_setting.plugin_id` to NotFound.
fn setting_error(plugin_id: Uuid, e: sqlx::Error) -> RegistryError {
    match &e {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            RegistryError::PluginNotFound(plugin_id)
        }
        _ => RegistryError::Database(e),
    }
}

#[async_trait]
impl RegistryStore for PgRegistry {
    async fn register(&self, reg: &PluginRegistration) -> RegistryResult<RegisterOutcome> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO plugin (id, name, description, url, instances, created, changed) \
             VALUES ($1, $2, $3, $4, 1, $5, $5) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(reg.id)
        .bind(&reg.name)
        .bind(&reg.description)
        .bind(&reg.url)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            let existing = self
                .get_plugin(reg.id)
                .await?
                .ok_or(RegistryError::PluginNotFound(reg.id))?;
            return Ok(RegisterOutcome::AlreadyRegistered(existing));
        }

        sqlx::query(
            "INSERT INTO plugin_action (plugin_id, name) \
             SELECT $1, UNNEST($2::text[]) \
             ON CONFLICT DO NOTHING",
        )
        .bind(reg.id)
        .bind(reg.actions.as_slice())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO plugin_event (plugin_id, name) \
             SELECT $1, UNNEST($2::text[]) \
             ON CONFLICT DO NOTHING",
        )
        .bind(reg.id)
        .bind(reg.events.as_slice())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(plugin_id = %reg.id, name = %reg.name, "plugin registered");
        Ok(RegisterOutcome::Created(Plugin::from_registration(reg)))
    }

    async fn list_plugins(&self) -> RegistryResult<Vec<Plugin>> {
        let sql = format!("{SELECT_PLUGIN} ORDER BY p.name");
        let plugins = sqlx::query_as::<_, Plugin>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(plugins)
    }

    async fn get_plugin(&self, id: Uuid) -> RegistryResult<Option<Plugin>> {
        let sql = format!("{SELECT_PLUGIN} WHERE p.id = $1");
        let plugin = sqlx::query_as::<_, Plugin>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(plugin)
    }

    async fn subscribers(&self, event: &str) -> RegistryResult<Vec<Plugin>> {
        let sql = format!(
            "{SELECT_PLUGIN} WHERE p.instances > 0 \
             AND EXISTS (SELECT 1 FROM plugin_event s WHERE s.plugin_id = p.id AND s.name = $1) \
             ORDER BY p.name"
        );
        let plugins = sqlx::query_as::<_, Plugin>(&sql)
            .bind(event)
            .fetch_all(&self.pool)
            .await?;
        Ok(plugins)
    }

    async fn find_setting(
        &self,
        plugin_id: Uuid,
        team_id: TeamId,
    ) -> RegistryResult<Option<PluginSetting>> {
        let setting = sqlx::query_as::<_, PluginSetting>(
            "SELECT plugin_id, team_id, enabled FROM plugin_setting \
             WHERE plugin_id = $1 AND team_id = $2",
        )
        .bind(plugin_id)
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(setting)
    }

    async fn get_or_create_setting(
        &self,
        plugin_id: Uuid,
        team_id: TeamId,
    ) -> RegistryResult<PluginSetting> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO plugin_setting (plugin_id, team_id, enabled, changed) \
             VALUES ($1, $2, false, $3) \
             ON CONFLICT (plugin_id, team_id) DO NOTHING",
        )
        .bind(plugin_id)
        .bind(team_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| setting_error(plugin_id, e))?;

        self.find_setting(plugin_id, team_id)
            .await?
            .ok_or(RegistryError::PluginNotFound(plugin_id))
    }

    async fn set_enabled(
        &self,
        plugin_id: Uuid,
        team_id: TeamId,
        enabled: bool,
    ) -> RegistryResult<PluginSetting> {
        let now = chrono::Utc::now().timestamp();

        let setting = sqlx::query_as::<_, PluginSetting>(
            "INSERT INTO plugin_setting (plugin_id, team_id, enabled, changed) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (plugin_id, team_id) \
             DO UPDATE SET enabled = EXCLUDED.enabled, changed = EXCLUDED.changed \
             RETURNING plugin_id, team_id, enabled",
        )
        .bind(plugin_id)
        .bind(team_id)
        .bind(enabled)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| setting_error(plugin_id, e))?;

        tracing::info!(plugin_id = %plugin_id, team_id, enabled, "plugin setting updated");
        Ok(setting)
    }

    async fn set_instances(&self, plugin_id: Uuid, instances: i32) -> RegistryResult<()> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query("UPDATE plugin SET instances = $1, changed = $2 WHERE id = $3")
            .bind(instances.max(0))
            .bind(now)
            .bind(plugin_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::PluginNotFound(plugin_id));
        }
        Ok(())
    }

    async fn ping(&self) -> bool {
        crate::db::check_health(&self.pool).await
    }
}
