//! Live-reloadable launch-control flags (spec.md §6).
//!
//! Generalizes the teacher's `config_watcher::config_watcher` hot-reload loop
//! (which polls CSV symbol config into an `RwLock<SymbolManager>`) into a
//! poller over a `launch_flags` table, feeding an `RwLock<LaunchFlags>` that
//! command dispatch consults on every call without any I/O of its own.

use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchFlags {
    /// Refuse all commands outright.
    pub emergency_stop: bool,
    /// Refuse any command that would write state.
    pub readonly_mode: bool,
    /// Refuse non-admin commands.
    pub maintenance_mode: bool,
    /// Per-order maximum line-item count; `None` means unbounded.
    pub max_items_per_order: Option<i32>,
}

impl Default for LaunchFlags {
    fn default() -> Self {
        Self {
            emergency_stop: false,
            readonly_mode: false,
            maintenance_mode: false,
            max_items_per_order: None,
        }
    }
}

impl LaunchFlags {
    async fn load(pool: &PgPool) -> Result<Self, EngineError> {
        let row = sqlx::query(
            "SELECT emergency_stop, readonly_mode, maintenance_mode, max_items_per_order \
             FROM launch_flags WHERE id = 1",
        )
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            return Ok(Self::default());
        };

        Ok(Self {
            emergency_stop: row.get("emergency_stop"),
            readonly_mode: row.get("readonly_mode"),
            maintenance_mode: row.get("maintenance_mode"),
            max_items_per_order: row.get("max_items_per_order"),
        })
    }

    /// Returns `Err` the way a command handler would reject a call under the
    /// current flag state, or `Ok(())` if the command may proceed.
    pub fn check_command_allowed(&self, is_admin: bool) -> Result<(), EngineError> {
        if self.emergency_stop {
            return Err(EngineError::InvalidInput("emergency stop is active".into()));
        }
        if self.readonly_mode {
            return Err(EngineError::InvalidInput("system is in read-only mode".into()));
        }
        if self.maintenance_mode && !is_admin {
            return Err(EngineError::InvalidInput("system is in maintenance mode".into()));
        }
        Ok(())
    }
}

/// Shared, live-reloaded flag snapshot. Cheaply cloned (`Arc`-backed).
#[derive(Clone)]
pub struct FlagsHandle(Arc<RwLock<LaunchFlags>>);

impl FlagsHandle {
    pub async fn snapshot(&self) -> LaunchFlags {
        *self.0.read().await
    }
}

/// Poll `launch_flags` on `interval`, refreshing the shared handle. Never
/// crashes on a read failure — it logs and keeps serving the last-known-good
/// snapshot, the same "never crash on config errors, keep old config" policy
/// as the teacher's `config_watcher`.
pub async fn watch_flags(pool: PgPool, interval: Duration) -> FlagsHandle {
    let initial = LaunchFlags::load(&pool).await.unwrap_or_default();
    let handle = Arc::new(RwLock::new(initial));

    let poll_handle = Arc::clone(&handle);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match LaunchFlags::load(&pool).await {
                Ok(flags) => *poll_handle.write().await = flags,
                Err(err) => {
                    tracing::error!(error = %err, "failed to reload launch flags, keeping prior snapshot");
                }
            }
        }
    });

    FlagsHandle(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags_allow_everything() {
        let flags = LaunchFlags::default();
        assert!(flags.check_command_allowed(false).is_ok());
    }

    #[test]
    fn emergency_stop_blocks_everyone() {
        let flags = LaunchFlags { emergency_stop: true, ..Default::default() };
        assert!(flags.check_command_allowed(true).is_err());
    }

    #[test]
    fn maintenance_mode_allows_admin_only() {
        let flags = LaunchFlags { maintenance_mode: true, ..Default::default() };
        assert!(flags.check_command_allowed(true).is_ok());
        assert!(flags.check_command_allowed(false).is_err());
    }
}
