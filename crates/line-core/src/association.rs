//! Binding endpoints, extensions, users and registers to lines and trunks
//!
//! These calls only change references. The caller runs the matching fix
//! ([`crate::fix::LineFixes`] / [`crate::fix::TrunkFixes`]) in the same
//! transaction right after.

use sqlx::SqliteConnection;
use tracing::debug;

use crate::endpoint::EndpointRef;
use crate::error::Result;
use crate::model::{Line, RegisterRef, Trunk};
use crate::store;

pub async fn associate_line_endpoint(
    conn: &mut SqliteConnection,
    line_id: i64,
    endpoint: EndpointRef,
) -> Result<Line> {
    let mut line = store::get_line(conn, line_id).await?;
    store::get_endpoint(conn, endpoint).await?;
    line.associate_endpoint(endpoint)?;
    store::save_line_endpoint(conn, &line).await?;
    debug!("Line {} bound to endpoint {}", line_id, endpoint);
    Ok(line)
}

/// Unbind `endpoint` from the line. A stale endpoint is ignored.
pub async fn dissociate_line_endpoint(
    conn: &mut SqliteConnection,
    line_id: i64,
    endpoint: EndpointRef,
) -> Result<Line> {
    let mut line = store::get_line(conn, line_id).await?;
    if line.dissociate_endpoint(endpoint) {
        store::save_line_endpoint(conn, &line).await?;
        debug!("Line {} unbound from endpoint {}", line_id, endpoint);
    }
    Ok(line)
}

pub async fn associate_trunk_endpoint(
    conn: &mut SqliteConnection,
    trunk_id: i64,
    endpoint: EndpointRef,
) -> Result<Trunk> {
    let mut trunk = store::get_trunk(conn, trunk_id).await?;
    store::get_endpoint(conn, endpoint).await?;
    trunk.associate_endpoint(endpoint)?;
    store::save_trunk_references(conn, &trunk).await?;
    debug!("Trunk {} bound to endpoint {}", trunk_id, endpoint);
    Ok(trunk)
}

pub async fn dissociate_trunk_endpoint(
    conn: &mut SqliteConnection,
    trunk_id: i64,
    endpoint: EndpointRef,
) -> Result<Trunk> {
    let mut trunk = store::get_trunk(conn, trunk_id).await?;
    if trunk.dissociate_endpoint(endpoint) {
        store::save_trunk_references(conn, &trunk).await?;
        debug!("Trunk {} unbound from endpoint {}", trunk_id, endpoint);
    }
    Ok(trunk)
}

pub async fn associate_trunk_register(
    conn: &mut SqliteConnection,
    trunk_id: i64,
    register: RegisterRef,
) -> Result<Trunk> {
    let mut trunk = store::get_trunk(conn, trunk_id).await?;
    trunk.associate_register(register)?;
    store::save_trunk_references(conn, &trunk).await?;
    Ok(trunk)
}

pub async fn dissociate_trunk_register(
    conn: &mut SqliteConnection,
    trunk_id: i64,
    register: RegisterRef,
) -> Result<Trunk> {
    let mut trunk = store::get_trunk(conn, trunk_id).await?;
    if trunk.dissociate_register(register) {
        store::save_trunk_references(conn, &trunk).await?;
    }
    Ok(trunk)
}

/// The main extension linked to a line, if any.
pub async fn main_extension_id(conn: &mut SqliteConnection, line_id: i64) -> Result<Option<i64>> {
    let id = sqlx::query_scalar(
        "SELECT extension_id FROM line_extension WHERE line_id = ? AND main_extension = 1",
    )
    .bind(line_id)
    .fetch_optional(conn)
    .await?;
    Ok(id)
}

/// The main user linked to a line, if any.
pub async fn main_user_id(conn: &mut SqliteConnection, line_id: i64) -> Result<Option<i64>> {
    let id = sqlx::query_scalar("SELECT user_id FROM user_line WHERE line_id = ? AND main_user = 1")
        .bind(line_id)
        .fetch_optional(conn)
        .await?;
    Ok(id)
}

/// Link an extension to a line. The first extension linked becomes the
/// line's main extension; linking an already linked extension does nothing.
///
/// Returns whether a link was created.
pub async fn associate_line_extension(
    conn: &mut SqliteConnection,
    line_id: i64,
    extension_id: i64,
) -> Result<bool> {
    store::get_line(conn, line_id).await?;
    store::get_extension(conn, extension_id).await?;

    let main = main_extension_id(conn, line_id).await?.is_none();
    let result = sqlx::query(
        "INSERT OR IGNORE INTO line_extension (line_id, extension_id, main_extension) \
         VALUES (?, ?, ?)",
    )
    .bind(line_id)
    .bind(extension_id)
    .bind(main)
    .execute(conn)
    .await?;

    let created = result.rows_affected() > 0;
    if created {
        debug!(
            "Extension {} linked to line {} (main: {})",
            extension_id, line_id, main
        );
    }
    Ok(created)
}

/// Unlink the line's main extension. Does nothing unless `extension_id` is
/// the current main extension; the next remaining link, if any, is promoted.
///
/// Returns whether a link was removed.
pub async fn dissociate_line_extension(
    conn: &mut SqliteConnection,
    line_id: i64,
    extension_id: i64,
) -> Result<bool> {
    if main_extension_id(conn, line_id).await? != Some(extension_id) {
        return Ok(false);
    }
    sqlx::query("DELETE FROM line_extension WHERE line_id = ? AND extension_id = ?")
        .bind(line_id)
        .bind(extension_id)
        .execute(&mut *conn)
        .await?;
    promote_main_extension(conn, line_id).await?;
    debug!("Extension {} unlinked from line {}", extension_id, line_id);
    Ok(true)
}

/// Make the remaining link with the lowest extension id the line's main
/// extension. Does nothing while a main link exists or no link is left.
pub(crate) async fn promote_main_extension(
    conn: &mut SqliteConnection,
    line_id: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE line_extension SET main_extension = 1 \
         WHERE line_id = ? AND extension_id = \
             (SELECT MIN(extension_id) FROM line_extension WHERE line_id = ?) \
         AND NOT EXISTS \
             (SELECT 1 FROM line_extension WHERE line_id = ? AND main_extension = 1)",
    )
    .bind(line_id)
    .bind(line_id)
    .bind(line_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Link a user to a line. The first user linked becomes the line's main
/// user; the line is appended to the end of the user's line list.
///
/// Returns whether a link was created.
pub async fn associate_line_user(
    conn: &mut SqliteConnection,
    line_id: i64,
    user_id: i64,
) -> Result<bool> {
    store::get_line(conn, line_id).await?;
    store::get_user(conn, user_id).await?;

    let main = main_user_id(conn, line_id).await?.is_none();
    let result = sqlx::query(
        "INSERT OR IGNORE INTO user_line (user_id, line_id, main_user, position) \
         VALUES (?, ?, ?, \
             (SELECT COALESCE(MAX(position) + 1, 0) FROM user_line WHERE user_id = ?))",
    )
    .bind(user_id)
    .bind(line_id)
    .bind(main)
    .bind(user_id)
    .execute(conn)
    .await?;

    let created = result.rows_affected() > 0;
    if created {
        debug!("User {} linked to line {} (main: {})", user_id, line_id, main);
    }
    Ok(created)
}

/// Unlink the line's main user. Does nothing unless `user_id` is the current
/// main user; the next remaining user link, if any, is promoted.
///
/// Returns whether a link was removed.
pub async fn dissociate_line_user(
    conn: &mut SqliteConnection,
    line_id: i64,
    user_id: i64,
) -> Result<bool> {
    if main_user_id(conn, line_id).await? != Some(user_id) {
        return Ok(false);
    }
    sqlx::query("DELETE FROM user_line WHERE line_id = ? AND user_id = ?")
        .bind(line_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        "UPDATE user_line SET main_user = 1 \
         WHERE line_id = ? AND user_id = \
             (SELECT MIN(user_id) FROM user_line WHERE line_id = ?)",
    )
    .bind(line_id)
    .bind(line_id)
    .execute(conn)
    .await?;
    debug!("User {} unlinked from line {}", user_id, line_id);
    Ok(true)
}
