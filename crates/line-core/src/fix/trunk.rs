use sqlx::{FromRow, SqliteConnection};
use tracing::debug;

use super::{endpoint_from_row, write_endpoint, FixReport};
use crate::endpoint::{Endpoint, Protocol, CATEGORY_TRUNK};
use crate::error::Result;
use crate::model::Trunk;

const TRUNK_GRAPH_QUERY: &str = "
SELECT
    t.id AS id, t.context AS context,
    t.endpoint_sip_id AS endpoint_sip_id, t.endpoint_iax_id AS endpoint_iax_id,
    t.endpoint_custom_id AS endpoint_custom_id,
    t.register_sip_id AS register_sip_id, t.register_iax_id AS register_iax_id,
    iax.name AS iax_name, iax.secret AS iax_secret, iax.context AS iax_context,
    iax.category AS iax_category, iax.callerid AS iax_callerid,
    custom.interface AS custom_interface, custom.context AS custom_context,
    custom.category AS custom_category
FROM trunks t
LEFT JOIN endpoint_iax iax ON iax.id = t.endpoint_iax_id
LEFT JOIN endpoint_custom custom ON custom.id = t.endpoint_custom_id
WHERE t.id = ?";

/// Stamps a trunk's category and context onto its IAX or Custom endpoint.
///
/// SIP trunk endpoints carry neither column and are left alone.
pub struct TrunkFixes<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> TrunkFixes<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    pub async fn fix(&mut self, trunk_id: i64) -> Result<FixReport> {
        let row = sqlx::query(TRUNK_GRAPH_QUERY)
            .bind(trunk_id)
            .fetch_optional(&mut *self.conn)
            .await?;
        let row = match row {
            Some(row) => row,
            None => {
                debug!("Trunk {} has no row, nothing to fix", trunk_id);
                return Ok(FixReport::default());
            }
        };

        let trunk = Trunk::from_row(&row)?;
        let original = match trunk.endpoint {
            // Only the IAX and Custom columns are joined.
            Some(endpoint) if endpoint.protocol() != Protocol::Sip => {
                endpoint_from_row(&row, Some(endpoint))?
            }
            _ => None,
        };

        let mut endpoint = original.clone();
        match endpoint.as_mut() {
            Some(Endpoint::Iax(iax)) => {
                iax.category = CATEGORY_TRUNK.to_string();
                iax.context = trunk.context.clone();
            }
            Some(Endpoint::Custom(custom)) => {
                custom.category = CATEGORY_TRUNK.to_string();
                custom.context = trunk.context.clone();
            }
            _ => {}
        }

        let mut report = FixReport::default();
        if let Some(endpoint) = endpoint.as_ref() {
            if original.as_ref() != Some(endpoint) {
                write_endpoint(&mut *self.conn, endpoint).await?;
                report.endpoint_updated = true;
            }
        }
        Ok(report)
    }
}
