//! Transactional entry points
//!
//! Each method runs one transaction: the change, then the fix of every line
//! or trunk it touches, then commit. Any error rolls the whole thing back.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sqlx::SqlitePool;
use tracing::info;

use crate::association;
use crate::endpoint::{Endpoint, EndpointRef};
use crate::error::Result;
use crate::fix::{FixReport, LineFixes, TrunkFixes};
use crate::model::{Extension, Line, RegisterRef, Trunk, User};
use crate::store::{self, NewCustomEndpoint, NewLine, NewSccpEndpoint, NewSipEndpoint};

/// Summary of a full resync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    pub lines_checked: usize,
    pub lines_changed: usize,
    pub trunks_checked: usize,
    pub trunks_changed: usize,
}

pub struct LineService<R = StdRng> {
    pool: SqlitePool,
    rng: R,
}

impl LineService<StdRng> {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_rng(pool, StdRng::from_entropy())
    }
}

impl<R: Rng> LineService<R> {
    /// Use `rng` for provisioning codes and generated endpoint names.
    pub fn with_rng(pool: SqlitePool, rng: R) -> Self {
        Self { pool, rng }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_line(&mut self, request: NewLine) -> Result<Line> {
        let mut tx = self.pool.begin().await?;
        let line = store::create_line(&mut tx, &mut self.rng, request).await?;
        tx.commit().await?;
        info!("Created line {}", line.id);
        Ok(line)
    }

    pub async fn create_sip_endpoint(&mut self, request: NewSipEndpoint) -> Result<Endpoint> {
        let mut tx = self.pool.begin().await?;
        let endpoint = store::create_sip_endpoint(&mut tx, &mut self.rng, request).await?;
        tx.commit().await?;
        Ok(Endpoint::Sip(endpoint))
    }

    pub async fn create_sccp_endpoint(&mut self, request: NewSccpEndpoint) -> Result<Endpoint> {
        let mut tx = self.pool.begin().await?;
        let endpoint = store::create_sccp_endpoint(&mut tx, &mut self.rng, request).await?;
        tx.commit().await?;
        Ok(Endpoint::Sccp(endpoint))
    }

    pub async fn create_custom_endpoint(&mut self, request: NewCustomEndpoint) -> Result<Endpoint> {
        let mut tx = self.pool.begin().await?;
        let endpoint = store::create_custom_endpoint(&mut tx, &mut self.rng, request).await?;
        tx.commit().await?;
        Ok(Endpoint::Custom(endpoint))
    }

    pub async fn get_line(&self, line_id: i64) -> Result<Line> {
        let mut conn = self.pool.acquire().await?;
        store::get_line(&mut conn, line_id).await
    }

    pub async fn bind_line_endpoint(&self, line_id: i64, endpoint: EndpointRef) -> Result<Line> {
        let mut tx = self.pool.begin().await?;
        association::associate_line_endpoint(&mut tx, line_id, endpoint).await?;
        LineFixes::new(&mut tx).fix(line_id).await?;
        let line = store::get_line(&mut tx, line_id).await?;
        tx.commit().await?;
        info!("Line {} bound to {}", line_id, endpoint);
        Ok(line)
    }

    pub async fn unbind_line_endpoint(&self, line_id: i64, endpoint: EndpointRef) -> Result<Line> {
        let mut tx = self.pool.begin().await?;
        association::dissociate_line_endpoint(&mut tx, line_id, endpoint).await?;
        LineFixes::new(&mut tx).fix(line_id).await?;
        let line = store::get_line(&mut tx, line_id).await?;
        tx.commit().await?;
        info!("Line {} unbound from {}", line_id, endpoint);
        Ok(line)
    }

    pub async fn link_extension(&self, line_id: i64, extension_id: i64) -> Result<Line> {
        let mut tx = self.pool.begin().await?;
        association::associate_line_extension(&mut tx, line_id, extension_id).await?;
        LineFixes::new(&mut tx).fix(line_id).await?;
        let line = store::get_line(&mut tx, line_id).await?;
        tx.commit().await?;
        info!("Extension {} linked to line {}", extension_id, line_id);
        Ok(line)
    }

    pub async fn unlink_extension(&self, line_id: i64, extension_id: i64) -> Result<Line> {
        let mut tx = self.pool.begin().await?;
        association::dissociate_line_extension(&mut tx, line_id, extension_id).await?;
        LineFixes::new(&mut tx).fix(line_id).await?;
        let line = store::get_line(&mut tx, line_id).await?;
        tx.commit().await?;
        info!("Extension {} unlinked from line {}", extension_id, line_id);
        Ok(line)
    }

    /// Link a user to a line and re-fix the line.
    ///
    /// Only the line's main user is fixed. A user linked to a line that
    /// already has another main user keeps its queue member interfaces until
    /// one of its own main lines is fixed.
    pub async fn link_user(&self, line_id: i64, user_id: i64) -> Result<Line> {
        let mut tx = self.pool.begin().await?;
        association::associate_line_user(&mut tx, line_id, user_id).await?;
        LineFixes::new(&mut tx).fix(line_id).await?;
        let line = store::get_line(&mut tx, line_id).await?;
        tx.commit().await?;
        info!("User {} linked to line {}", user_id, line_id);
        Ok(line)
    }

    /// Unlink the line's main user. The user's other lines are re-fixed too,
    /// since one of them may have become the primary line.
    pub async fn unlink_user(&self, line_id: i64, user_id: i64) -> Result<Line> {
        let mut tx = self.pool.begin().await?;
        association::dissociate_line_user(&mut tx, line_id, user_id).await?;
        LineFixes::new(&mut tx).fix(line_id).await?;
        for other in store::line_ids_for_user(&mut tx, user_id).await? {
            LineFixes::new(&mut tx).fix(other).await?;
        }
        let line = store::get_line(&mut tx, line_id).await?;
        tx.commit().await?;
        info!("User {} unlinked from line {}", user_id, line_id);
        Ok(line)
    }

    pub async fn bind_trunk_endpoint(&self, trunk_id: i64, endpoint: EndpointRef) -> Result<Trunk> {
        let mut tx = self.pool.begin().await?;
        let trunk = association::associate_trunk_endpoint(&mut tx, trunk_id, endpoint).await?;
        TrunkFixes::new(&mut tx).fix(trunk_id).await?;
        tx.commit().await?;
        info!("Trunk {} bound to {}", trunk_id, endpoint);
        Ok(trunk)
    }

    pub async fn unbind_trunk_endpoint(
        &self,
        trunk_id: i64,
        endpoint: EndpointRef,
    ) -> Result<Trunk> {
        let mut tx = self.pool.begin().await?;
        let trunk = association::dissociate_trunk_endpoint(&mut tx, trunk_id, endpoint).await?;
        TrunkFixes::new(&mut tx).fix(trunk_id).await?;
        tx.commit().await?;
        Ok(trunk)
    }

    pub async fn bind_trunk_register(&self, trunk_id: i64, register: RegisterRef) -> Result<Trunk> {
        let mut tx = self.pool.begin().await?;
        let trunk = association::associate_trunk_register(&mut tx, trunk_id, register).await?;
        TrunkFixes::new(&mut tx).fix(trunk_id).await?;
        tx.commit().await?;
        Ok(trunk)
    }

    pub async fn unbind_trunk_register(
        &self,
        trunk_id: i64,
        register: RegisterRef,
    ) -> Result<Trunk> {
        let mut tx = self.pool.begin().await?;
        let trunk = association::dissociate_trunk_register(&mut tx, trunk_id, register).await?;
        TrunkFixes::new(&mut tx).fix(trunk_id).await?;
        tx.commit().await?;
        Ok(trunk)
    }

    /// Change a trunk's context and restamp its endpoint.
    pub async fn set_trunk_context(&self, trunk_id: i64, context: Option<&str>) -> Result<Trunk> {
        let mut tx = self.pool.begin().await?;
        store::set_trunk_context(&mut tx, trunk_id, context).await?;
        TrunkFixes::new(&mut tx).fix(trunk_id).await?;
        let trunk = store::get_trunk(&mut tx, trunk_id).await?;
        tx.commit().await?;
        Ok(trunk)
    }

    /// Save a user's name and caller-id override and re-fix all its lines.
    pub async fn update_user(&self, user: &User) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        store::update_user(&mut tx, user).await?;
        for line_id in store::line_ids_for_user(&mut tx, user.id).await? {
            LineFixes::new(&mut tx).fix(line_id).await?;
        }
        tx.commit().await?;
        info!("User {} updated", user.id);
        Ok(())
    }

    /// Save an extension and re-fix every line it is linked to.
    pub async fn update_extension(&self, extension: &Extension) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        store::update_extension(&mut tx, extension).await?;
        for line_id in store::line_ids_for_extension(&mut tx, extension.id).await? {
            LineFixes::new(&mut tx).fix(line_id).await?;
        }
        tx.commit().await?;
        info!("Extension {} updated", extension.id);
        Ok(())
    }

    /// Delete an extension and re-fix the lines it was linked to.
    pub async fn delete_extension(&self, extension_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let line_ids = store::delete_extension(&mut tx, extension_id).await?;
        for line_id in line_ids {
            LineFixes::new(&mut tx).fix(line_id).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn fix_line(&self, line_id: i64) -> Result<FixReport> {
        let mut tx = self.pool.begin().await?;
        let report = LineFixes::new(&mut tx).fix(line_id).await?;
        tx.commit().await?;
        Ok(report)
    }

    pub async fn fix_trunk(&self, trunk_id: i64) -> Result<FixReport> {
        let mut tx = self.pool.begin().await?;
        let report = TrunkFixes::new(&mut tx).fix(trunk_id).await?;
        tx.commit().await?;
        Ok(report)
    }

    /// Re-fix every line and trunk in one transaction.
    pub async fn fix_all(&self) -> Result<ResyncSummary> {
        let mut tx = self.pool.begin().await?;
        let mut summary = ResyncSummary::default();

        for line_id in store::list_line_ids(&mut tx).await? {
            let report = LineFixes::new(&mut tx).fix(line_id).await?;
            summary.lines_checked += 1;
            if !report.is_noop() {
                summary.lines_changed += 1;
            }
        }
        for trunk_id in store::list_trunk_ids(&mut tx).await? {
            let report = TrunkFixes::new(&mut tx).fix(trunk_id).await?;
            summary.trunks_checked += 1;
            if !report.is_noop() {
                summary.trunks_changed += 1;
            }
        }

        tx.commit().await?;
        info!(
            "Resynced {} lines ({} changed) and {} trunks ({} changed)",
            summary.lines_checked,
            summary.lines_changed,
            summary.trunks_checked,
            summary.trunks_changed
        );
        Ok(summary)
    }
}
