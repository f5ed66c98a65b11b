//! # Consistency fixes
//!
//! Lines and trunks carry copies of data that lives on their endpoint, main
//! extension and main user. After any change to those associations the
//! caller runs [`LineFixes::fix`] or [`TrunkFixes::fix`] on the owning id,
//! inside the same transaction as the change.
//!
//! A fix loads the whole association graph in one query, computes every
//! denormalized value in memory and then writes only the rows whose values
//! differ. Running it twice in a row writes nothing the second time.
//!
//! Fixes never report a missing id: the id was just mutated by the caller,
//! and an unknown one loads an empty graph and changes nothing.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use crate::endpoint::{
    CustomEndpoint, Endpoint, EndpointProtocol, EndpointRef, IaxEndpoint, SccpEndpoint,
    SipEndpoint,
};
use crate::error::Result;

mod line;
mod trunk;

pub use line::LineFixes;
pub use trunk::TrunkFixes;

/// What a fix wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixReport {
    pub line_updated: bool,
    pub endpoint_updated: bool,
    pub queue_members_updated: u64,
}

impl FixReport {
    pub fn is_noop(&self) -> bool {
        !self.line_updated && !self.endpoint_updated && self.queue_members_updated == 0
    }
}

/// Decode the joined endpoint columns for `endpoint`.
///
/// Columns are expected under `sip_*`, `sccp_*`, `iax_*` and `custom_*`
/// aliases. A reference whose row is gone decodes to `None`.
pub(crate) fn endpoint_from_row(
    row: &SqliteRow,
    endpoint: Option<EndpointRef>,
) -> sqlx::Result<Option<Endpoint>> {
    let endpoint = match endpoint {
        Some(endpoint) => endpoint,
        None => return Ok(None),
    };
    let id = endpoint.id();
    let decoded = match endpoint {
        EndpointRef::Sip(_) => row
            .try_get::<Option<String>, _>("sip_name")?
            .map(|name| -> sqlx::Result<Endpoint> {
                Ok(Endpoint::Sip(SipEndpoint {
                    id,
                    name,
                    secret: row.try_get::<Option<String>, _>("sip_secret")?.unwrap_or_default(),
                    callerid: row.try_get("sip_callerid")?,
                }))
            })
            .transpose()?,
        EndpointRef::Sccp(_) => row
            .try_get::<Option<String>, _>("sccp_name")?
            .map(|name| -> sqlx::Result<Endpoint> {
                Ok(Endpoint::Sccp(SccpEndpoint {
                    id,
                    name,
                    context: row.try_get::<Option<String>, _>("sccp_context")?.unwrap_or_default(),
                    cid_name: row.try_get::<Option<String>, _>("sccp_cid_name")?.unwrap_or_default(),
                    cid_num: row.try_get::<Option<String>, _>("sccp_cid_num")?.unwrap_or_default(),
                }))
            })
            .transpose()?,
        EndpointRef::Iax(_) => row
            .try_get::<Option<String>, _>("iax_name")?
            .map(|name| -> sqlx::Result<Endpoint> {
                Ok(Endpoint::Iax(IaxEndpoint {
                    id,
                    name,
                    secret: row.try_get::<Option<String>, _>("iax_secret")?.unwrap_or_default(),
                    context: row.try_get("iax_context")?,
                    category: row.try_get::<Option<String>, _>("iax_category")?.unwrap_or_default(),
                    callerid: row.try_get("iax_callerid")?,
                }))
            })
            .transpose()?,
        EndpointRef::Custom(_) => row
            .try_get::<Option<String>, _>("custom_interface")?
            .map(|interface| -> sqlx::Result<Endpoint> {
                Ok(Endpoint::Custom(CustomEndpoint {
                    id,
                    interface,
                    context: row.try_get("custom_context")?,
                    category: row.try_get::<Option<String>, _>("custom_category")?.unwrap_or_default(),
                }))
            })
            .transpose()?,
    };
    Ok(decoded)
}

/// Write the denormalized columns of an endpoint row.
pub(crate) async fn write_endpoint(conn: &mut SqliteConnection, endpoint: &Endpoint) -> Result<()> {
    match endpoint {
        Endpoint::Sip(sip) => {
            sqlx::query("UPDATE endpoint_sip SET callerid = ? WHERE id = ?")
                .bind(&sip.callerid)
                .bind(sip.id)
                .execute(conn)
                .await?;
        }
        Endpoint::Sccp(sccp) => {
            sqlx::query(
                "UPDATE endpoint_sccp SET context = ?, cid_name = ?, cid_num = ? WHERE id = ?",
            )
            .bind(&sccp.context)
            .bind(&sccp.cid_name)
            .bind(&sccp.cid_num)
            .bind(sccp.id)
            .execute(conn)
            .await?;
        }
        Endpoint::Iax(iax) => {
            sqlx::query("UPDATE endpoint_iax SET context = ?, category = ? WHERE id = ?")
                .bind(&iax.context)
                .bind(&iax.category)
                .bind(iax.id)
                .execute(conn)
                .await?;
        }
        Endpoint::Custom(custom) => {
            sqlx::query("UPDATE endpoint_custom SET context = ?, category = ? WHERE id = ?")
                .bind(&custom.context)
                .bind(&custom.category)
                .bind(custom.id)
                .execute(conn)
                .await?;
        }
    }
    debug!("Fixed endpoint {}", endpoint.endpoint_ref());
    Ok(())
}
