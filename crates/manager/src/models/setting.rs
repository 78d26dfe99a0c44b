//! Per-tenant plugin enablement.

use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Tenant identifier as stored (`BIGINT`).
///
/// Team ids are unsigned on the wire; values above `i64::MAX` are rejected at
/// the edges before they reach the store.
pub type TeamId = i64;

/// A row from the `plugin_setting` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct PluginSetting {
    pub plugin_id: Uuid,
    pub team_id: TeamId,
    pub enabled: bool,
}

/// Convert a wire team id into a stored one.
pub fn team_id_from_wire(team_id: u64) -> Option<TeamId> {
    TeamId::try_from(team_id).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_team_ids_above_i64_are_rejected() {
        assert_eq!(team_id_from_wire(7), Some(7));
        assert_eq!(team_id_from_wire(i64::MAX as u64), Some(i64::MAX));
        assert_eq!(team_id_from_wire(u64::MAX), None);
    }
}
