use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use tracing::debug;

use super::{endpoint_from_row, write_endpoint, FixReport};
use crate::caller_id::CallerId;
use crate::endpoint::{Endpoint, EndpointProtocol};
use crate::error::Result;
use crate::model::{local_interface, Extension, Line, User, LOCAL_CHANNEL};

// At most one row: line_extension and user_line each allow a single main
// link per line.
const LINE_GRAPH_QUERY: &str = "
SELECT
    l.id AS id, l.name AS name, l.number AS number, l.context AS context,
    l.provisioning_code AS provisioning_code, l.device AS device,
    l.application_uuid AS application_uuid, l.endpoint_sip_id AS endpoint_sip_id,
    l.endpoint_sccp_id AS endpoint_sccp_id, l.endpoint_custom_id AS endpoint_custom_id,
    sip.name AS sip_name, sip.secret AS sip_secret, sip.callerid AS sip_callerid,
    sccp.name AS sccp_name, sccp.context AS sccp_context,
    sccp.cid_name AS sccp_cid_name, sccp.cid_num AS sccp_cid_num,
    custom.interface AS custom_interface, custom.context AS custom_context,
    custom.category AS custom_category,
    e.id AS extension_id, e.exten AS extension_exten, e.context AS extension_context,
    u.id AS user_id, u.fullname AS user_fullname, u.callerid AS user_callerid,
    (SELECT pl.line_id FROM user_line pl
      WHERE pl.user_id = u.id
      ORDER BY pl.position, pl.line_id
      LIMIT 1) AS primary_line_id
FROM lines l
LEFT JOIN endpoint_sip sip ON sip.id = l.endpoint_sip_id
LEFT JOIN endpoint_sccp sccp ON sccp.id = l.endpoint_sccp_id
LEFT JOIN endpoint_custom custom ON custom.id = l.endpoint_custom_id
LEFT JOIN line_extension le ON le.line_id = l.id AND le.main_extension = 1
LEFT JOIN extensions e ON e.id = le.extension_id
LEFT JOIN user_line ul ON ul.line_id = l.id AND ul.main_user = 1
LEFT JOIN users u ON u.id = ul.user_id
WHERE l.id = ?";

/// Everything a line's denormalized fields derive from.
#[derive(Debug, Clone)]
struct LineGraph {
    line: Line,
    endpoint: Option<Endpoint>,
    extension: Option<Extension>,
    user: Option<User>,
    primary_line_id: Option<i64>,
}

impl LineGraph {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let line = Line::from_row(row)?;
        let endpoint = endpoint_from_row(row, line.endpoint)?;

        let extension = match row.try_get::<Option<i64>, _>("extension_id")? {
            Some(id) => Some(Extension {
                id,
                exten: row.try_get("extension_exten")?,
                context: row.try_get("extension_context")?,
            }),
            None => None,
        };

        let user = match row.try_get::<Option<i64>, _>("user_id")? {
            Some(id) => Some(User {
                id,
                fullname: row.try_get("user_fullname")?,
                callerid: row.try_get("user_callerid")?,
            }),
            None => None,
        };

        Ok(Self {
            line,
            endpoint,
            extension,
            user,
            primary_line_id: row.try_get("primary_line_id")?,
        })
    }

    fn is_primary_line_of_user(&self) -> bool {
        self.user.is_some() && self.primary_line_id == Some(self.line.id)
    }
}

/// Recomputes a line's denormalized fields and the rows that copy from it.
pub struct LineFixes<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> LineFixes<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    pub async fn fix(&mut self, line_id: i64) -> Result<FixReport> {
        let graph = match self.load(line_id).await? {
            Some(graph) => graph,
            None => {
                debug!("Line {} has no row, nothing to fix", line_id);
                return Ok(FixReport::default());
            }
        };

        let mut line = graph.line.clone();
        let mut endpoint = graph.endpoint.clone();

        fix_number(&mut line, graph.extension.as_ref());
        let interface = fix_protocol(&line, endpoint.as_mut(), graph.extension.as_ref());
        fix_name(&mut line, endpoint.as_ref());
        if let (Some(user), Some(endpoint)) = (graph.user.as_ref(), endpoint.as_mut()) {
            fix_caller_id(endpoint, user, graph.extension.as_ref())?;
        }

        let mut report = FixReport::default();

        if line != graph.line {
            self.write_line(&line).await?;
            report.line_updated = true;
        }

        if let Some(endpoint) = endpoint.as_ref() {
            if graph.endpoint.as_ref() != Some(endpoint) {
                write_endpoint(&mut *self.conn, endpoint).await?;
                report.endpoint_updated = true;
            }
        }

        if let (Some(interface), Some(user)) = (interface, graph.user.as_ref()) {
            if graph.is_primary_line_of_user() {
                report.queue_members_updated = self
                    .fix_queue_members(user.id, &interface, graph.extension.as_ref())
                    .await?;
            }
        }

        Ok(report)
    }

    async fn load(&mut self, line_id: i64) -> Result<Option<LineGraph>> {
        let row = sqlx::query(LINE_GRAPH_QUERY)
            .bind(line_id)
            .fetch_optional(&mut *self.conn)
            .await?;
        let graph = row.as_ref().map(LineGraph::from_row).transpose()?;
        Ok(graph)
    }

    async fn write_line(&mut self, line: &Line) -> Result<()> {
        sqlx::query("UPDATE lines SET name = ?, number = ?, context = ? WHERE id = ?")
            .bind(&line.name)
            .bind(&line.number)
            .bind(&line.context)
            .bind(line.id)
            .execute(&mut *self.conn)
            .await?;
        debug!(
            "Fixed line {}: name={:?} number={:?} context={}",
            line.id, line.name, line.number, line.context
        );
        Ok(())
    }

    /// Point the user's queue memberships at `interface`.
    ///
    /// Local-channel memberships dial the main extension instead and are
    /// left alone when the line has none.
    async fn fix_queue_members(
        &mut self,
        user_id: i64,
        interface: &str,
        extension: Option<&Extension>,
    ) -> Result<u64> {
        let mut updated = sqlx::query(
            "UPDATE queue_members SET interface = ? \
             WHERE usertype = 'user' AND userid = ? AND channel != ? AND interface != ?",
        )
        .bind(interface)
        .bind(user_id)
        .bind(LOCAL_CHANNEL)
        .bind(interface)
        .execute(&mut *self.conn)
        .await?
        .rows_affected();

        if let Some(extension) = extension {
            let local = local_interface(extension);
            updated += sqlx::query(
                "UPDATE queue_members SET interface = ? \
                 WHERE usertype = 'user' AND userid = ? AND channel = ? AND interface != ?",
            )
            .bind(&local)
            .bind(user_id)
            .bind(LOCAL_CHANNEL)
            .bind(&local)
            .execute(&mut *self.conn)
            .await?
            .rows_affected();
        }

        if updated > 0 {
            debug!("Fixed {} queue members of user {}", updated, user_id);
        }
        Ok(updated)
    }
}

fn fix_number(line: &mut Line, extension: Option<&Extension>) {
    match extension {
        Some(extension) => {
            line.number = Some(extension.exten.clone());
            line.context = extension.context.clone();
        }
        None => line.number = None,
    }
}

/// Apply protocol-specific copies and return the interface queue members dial.
fn fix_protocol(
    line: &Line,
    endpoint: Option<&mut Endpoint>,
    extension: Option<&Extension>,
) -> Option<String> {
    match endpoint? {
        Endpoint::Sip(sip) => Some(sip.interface()),
        Endpoint::Sccp(sccp) => {
            if let Some(extension) = extension {
                sccp.context = extension.context.clone();
            }
            Some(sccp.interface())
        }
        Endpoint::Custom(custom) => {
            custom.context = Some(line.context.clone());
            Some(custom.interface())
        }
        Endpoint::Iax(_) => None,
    }
}

fn fix_name(line: &mut Line, endpoint: Option<&Endpoint>) {
    line.name = endpoint
        .and_then(|endpoint| endpoint.display_name())
        .map(str::to_string);
}

fn fix_caller_id(endpoint: &mut Endpoint, user: &User, extension: Option<&Extension>) -> Result<()> {
    match endpoint {
        Endpoint::Sip(_) | Endpoint::Sccp(_) => {
            endpoint.set_caller_id(&CallerId::for_user(user, extension))
        }
        Endpoint::Custom(_) | Endpoint::Iax(_) => Ok(()),
    }
}
