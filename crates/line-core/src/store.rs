//! Row-level persistence for the records the fix engine reads and writes
//!
//! Only what creating, wiring and editing lines needs lives here. Every
//! function takes the caller's connection; run them inside the caller's
//! transaction alongside the association and fix calls.

use rand::Rng;
use serde::Deserialize;
use sqlx::SqliteConnection;
use tracing::debug;

use crate::association::promote_main_extension;
use crate::caller_id::CallerId;
use crate::endpoint::{
    CustomEndpoint, Endpoint, EndpointProtocol, EndpointRef, IaxEndpoint, Protocol, SccpEndpoint,
    SipEndpoint, CATEGORY_USER,
};
use crate::error::{Error, Result};
use crate::fix::write_endpoint;
use crate::generators::{find_unused_endpoint_name, generate_provisioning_code, random_secret};
use crate::model::{Extension, Line, QueueMember, RegisterRef, Trunk, User};

const LINE_COLUMNS: &str = "id, name, number, context, provisioning_code, device, \
     application_uuid, endpoint_sip_id, endpoint_sccp_id, endpoint_custom_id";

const TRUNK_COLUMNS: &str = "id, context, endpoint_sip_id, endpoint_iax_id, \
     endpoint_custom_id, register_sip_id, register_iax_id";

/// Request to create a line
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLine {
    pub context: String,
    /// Generated when absent.
    pub provisioning_code: Option<String>,
    pub device: Option<String>,
    pub application_uuid: Option<String>,
}

/// Request to create a SIP endpoint; name and secret are generated when absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSipEndpoint {
    pub name: Option<String>,
    pub secret: Option<String>,
    pub callerid: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSccpEndpoint {
    pub name: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewIaxEndpoint {
    pub name: Option<String>,
    pub secret: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCustomEndpoint {
    pub interface: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewQueueMember {
    pub queue_name: String,
    pub usertype: String,
    pub userid: i64,
    pub channel: String,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub penalty: i64,
}

// Lines

pub async fn create_line<R: Rng + ?Sized>(
    conn: &mut SqliteConnection,
    rng: &mut R,
    request: NewLine,
) -> Result<Line> {
    let provisioning_code = match request.provisioning_code {
        Some(code) => code,
        None => generate_provisioning_code(conn, rng).await?,
    };
    let id = sqlx::query(
        "INSERT INTO lines (context, provisioning_code, device, application_uuid) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(&request.context)
    .bind(&provisioning_code)
    .bind(&request.device)
    .bind(&request.application_uuid)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    debug!("Created line {} with provisioning code {}", id, provisioning_code);
    get_line(conn, id).await
}

pub async fn find_line(conn: &mut SqliteConnection, id: i64) -> Result<Option<Line>> {
    let line = sqlx::query_as::<_, Line>(&format!("SELECT {} FROM lines WHERE id = ?", LINE_COLUMNS))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(line)
}

pub async fn get_line(conn: &mut SqliteConnection, id: i64) -> Result<Line> {
    find_line(conn, id)
        .await?
        .ok_or_else(|| Error::not_found("Line", id))
}

pub async fn list_line_ids(conn: &mut SqliteConnection) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar("SELECT id FROM lines ORDER BY id")
        .fetch_all(conn)
        .await?;
    Ok(ids)
}

/// Persist the line's endpoint reference.
pub async fn save_line_endpoint(conn: &mut SqliteConnection, line: &Line) -> Result<()> {
    let (sip, sccp, custom) = line.endpoint_columns();
    let result = sqlx::query(
        "UPDATE lines SET endpoint_sip_id = ?, endpoint_sccp_id = ?, endpoint_custom_id = ? \
         WHERE id = ?",
    )
    .bind(sip)
    .bind(sccp)
    .bind(custom)
    .bind(line.id)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found("Line", line.id));
    }
    Ok(())
}

/// The caller-id presented by the line's bound endpoint.
pub async fn line_caller_id(conn: &mut SqliteConnection, line_id: i64) -> Result<CallerId> {
    let endpoint = line_endpoint(conn, line_id).await?;
    endpoint.caller_id()
}

/// Overwrite the caller-id on the line's bound endpoint.
///
/// The next fix recomputes it from the main user, if the line has one.
pub async fn set_line_caller_id(
    conn: &mut SqliteConnection,
    line_id: i64,
    caller_id: &CallerId,
) -> Result<()> {
    let mut endpoint = line_endpoint(conn, line_id).await?;
    endpoint.set_caller_id(caller_id)?;
    write_endpoint(conn, &endpoint).await
}

async fn line_endpoint(conn: &mut SqliteConnection, line_id: i64) -> Result<Endpoint> {
    let line = get_line(conn, line_id).await?;
    let endpoint = line.endpoint.ok_or_else(|| {
        Error::UnsupportedOperation(format!("line {} has no endpoint associated", line_id))
    })?;
    get_endpoint(conn, endpoint).await
}

pub async fn delete_line(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM lines WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found("Line", id));
    }
    Ok(())
}

// Trunks

pub async fn create_trunk(conn: &mut SqliteConnection, context: Option<&str>) -> Result<Trunk> {
    let id = sqlx::query("INSERT INTO trunks (context) VALUES (?)")
        .bind(context)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
    get_trunk(conn, id).await
}

pub async fn get_trunk(conn: &mut SqliteConnection, id: i64) -> Result<Trunk> {
    sqlx::query_as::<_, Trunk>(&format!("SELECT {} FROM trunks WHERE id = ?", TRUNK_COLUMNS))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| Error::not_found("Trunk", id))
}

pub async fn delete_trunk(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM trunks WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found("Trunk", id));
    }
    Ok(())
}

pub async fn list_trunk_ids(conn: &mut SqliteConnection) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar("SELECT id FROM trunks ORDER BY id")
        .fetch_all(conn)
        .await?;
    Ok(ids)
}

/// Persist the trunk's endpoint and register references.
pub async fn save_trunk_references(conn: &mut SqliteConnection, trunk: &Trunk) -> Result<()> {
    let (sip, iax, custom) = trunk.endpoint_columns();
    let (register_sip, register_iax) = trunk.register_columns();
    let result = sqlx::query(
        "UPDATE trunks SET endpoint_sip_id = ?, endpoint_iax_id = ?, endpoint_custom_id = ?, \
         register_sip_id = ?, register_iax_id = ? WHERE id = ?",
    )
    .bind(sip)
    .bind(iax)
    .bind(custom)
    .bind(register_sip)
    .bind(register_iax)
    .bind(trunk.id)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found("Trunk", trunk.id));
    }
    Ok(())
}

pub async fn set_trunk_context(
    conn: &mut SqliteConnection,
    id: i64,
    context: Option<&str>,
) -> Result<()> {
    let result = sqlx::query("UPDATE trunks SET context = ? WHERE id = ?")
        .bind(context)
        .bind(id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found("Trunk", id));
    }
    Ok(())
}

pub async fn create_register(
    conn: &mut SqliteConnection,
    protocol: Protocol,
    remote: &str,
) -> Result<RegisterRef> {
    let (query, wrap): (&str, fn(i64) -> RegisterRef) = match protocol {
        Protocol::Sip => ("INSERT INTO register_sip (remote) VALUES (?)", RegisterRef::Sip),
        Protocol::Iax => ("INSERT INTO register_iax (remote) VALUES (?)", RegisterRef::Iax),
        other => {
            return Err(Error::UnsupportedOperation(format!(
                "{} has no outbound register",
                other
            )))
        }
    };
    let id = sqlx::query(query)
        .bind(remote)
        .execute(conn)
        .await?
        .last_insert_rowid();
    Ok(wrap(id))
}

// Endpoints

pub async fn create_sip_endpoint<R: Rng + ?Sized>(
    conn: &mut SqliteConnection,
    rng: &mut R,
    request: NewSipEndpoint,
) -> Result<SipEndpoint> {
    let name = match request.name {
        Some(name) => name,
        None => find_unused_endpoint_name(conn, rng, Protocol::Sip).await?,
    };
    let secret = request.secret.unwrap_or_else(|| random_secret(rng));
    let id = sqlx::query("INSERT INTO endpoint_sip (name, secret, callerid) VALUES (?, ?, ?)")
        .bind(&name)
        .bind(&secret)
        .bind(&request.callerid)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
    debug!("Created sip endpoint {} ({})", id, name);
    Ok(SipEndpoint {
        id,
        name,
        secret,
        callerid: request.callerid,
    })
}

pub async fn create_sccp_endpoint<R: Rng + ?Sized>(
    conn: &mut SqliteConnection,
    rng: &mut R,
    request: NewSccpEndpoint,
) -> Result<SccpEndpoint> {
    let name = match request.name {
        Some(name) => name,
        None => find_unused_endpoint_name(conn, rng, Protocol::Sccp).await?,
    };
    let context = request.context.unwrap_or_default();
    let id = sqlx::query("INSERT INTO endpoint_sccp (name, context) VALUES (?, ?)")
        .bind(&name)
        .bind(&context)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
    debug!("Created sccp endpoint {} ({})", id, name);
    Ok(SccpEndpoint {
        id,
        name,
        context,
        cid_name: String::new(),
        cid_num: String::new(),
    })
}

pub async fn create_iax_endpoint<R: Rng + ?Sized>(
    conn: &mut SqliteConnection,
    rng: &mut R,
    request: NewIaxEndpoint,
) -> Result<IaxEndpoint> {
    let name = match request.name {
        Some(name) => name,
        None => find_unused_endpoint_name(conn, rng, Protocol::Iax).await?,
    };
    let secret = request.secret.unwrap_or_else(|| random_secret(rng));
    let id = sqlx::query(
        "INSERT INTO endpoint_iax (name, secret, context, category) VALUES (?, ?, ?, ?)",
    )
    .bind(&name)
    .bind(&secret)
    .bind(&request.context)
    .bind(CATEGORY_USER)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    debug!("Created iax endpoint {} ({})", id, name);
    Ok(IaxEndpoint {
        id,
        name,
        secret,
        context: request.context,
        category: CATEGORY_USER.to_string(),
        callerid: None,
    })
}

pub async fn create_custom_endpoint<R: Rng + ?Sized>(
    conn: &mut SqliteConnection,
    rng: &mut R,
    request: NewCustomEndpoint,
) -> Result<CustomEndpoint> {
    let interface = match request.interface {
        Some(interface) => interface,
        None => find_unused_endpoint_name(conn, rng, Protocol::Custom).await?,
    };
    let id = sqlx::query("INSERT INTO endpoint_custom (interface, context, category) VALUES (?, ?, ?)")
        .bind(&interface)
        .bind(&request.context)
        .bind(CATEGORY_USER)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
    debug!("Created custom endpoint {} ({})", id, interface);
    Ok(CustomEndpoint {
        id,
        interface,
        context: request.context,
        category: CATEGORY_USER.to_string(),
    })
}

pub async fn get_endpoint(conn: &mut SqliteConnection, endpoint: EndpointRef) -> Result<Endpoint> {
    let id = endpoint.id();
    let found = match endpoint {
        EndpointRef::Sip(_) => sqlx::query_as::<_, SipEndpoint>(
            "SELECT id, name, secret, callerid FROM endpoint_sip WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(conn)
        .await?
        .map(Endpoint::Sip),
        EndpointRef::Sccp(_) => sqlx::query_as::<_, SccpEndpoint>(
            "SELECT id, name, context, cid_name, cid_num FROM endpoint_sccp WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(conn)
        .await?
        .map(Endpoint::Sccp),
        EndpointRef::Iax(_) => sqlx::query_as::<_, IaxEndpoint>(
            "SELECT id, name, secret, context, category, callerid FROM endpoint_iax WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(conn)
        .await?
        .map(Endpoint::Iax),
        EndpointRef::Custom(_) => sqlx::query_as::<_, CustomEndpoint>(
            "SELECT id, interface, context, category FROM endpoint_custom WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(conn)
        .await?
        .map(Endpoint::Custom),
    };
    found.ok_or_else(|| Error::not_found("Endpoint", endpoint))
}

/// Delete an endpoint row; lines and trunks referencing it are unlinked.
pub async fn delete_endpoint(conn: &mut SqliteConnection, endpoint: EndpointRef) -> Result<()> {
    let query = match endpoint {
        EndpointRef::Sip(_) => "DELETE FROM endpoint_sip WHERE id = ?",
        EndpointRef::Sccp(_) => "DELETE FROM endpoint_sccp WHERE id = ?",
        EndpointRef::Iax(_) => "DELETE FROM endpoint_iax WHERE id = ?",
        EndpointRef::Custom(_) => "DELETE FROM endpoint_custom WHERE id = ?",
    };
    let result = sqlx::query(query)
        .bind(endpoint.id())
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found("Endpoint", endpoint));
    }
    Ok(())
}

// Extensions

pub async fn create_extension(
    conn: &mut SqliteConnection,
    exten: &str,
    context: &str,
) -> Result<Extension> {
    let id = sqlx::query("INSERT INTO extensions (exten, context) VALUES (?, ?)")
        .bind(exten)
        .bind(context)
        .execute(conn)
        .await?
        .last_insert_rowid();
    Ok(Extension {
        id,
        exten: exten.to_string(),
        context: context.to_string(),
    })
}

pub async fn get_extension(conn: &mut SqliteConnection, id: i64) -> Result<Extension> {
    sqlx::query_as::<_, Extension>("SELECT id, exten, context FROM extensions WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| Error::not_found("Extension", id))
}

pub async fn update_extension(conn: &mut SqliteConnection, extension: &Extension) -> Result<()> {
    let result = sqlx::query("UPDATE extensions SET exten = ?, context = ? WHERE id = ?")
        .bind(&extension.exten)
        .bind(&extension.context)
        .bind(extension.id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found("Extension", extension.id));
    }
    Ok(())
}

/// Delete an extension; its line links go with it. Lines that lose their
/// main extension get the next remaining link promoted.
///
/// Returns the ids of the lines that were linked to it.
pub async fn delete_extension(conn: &mut SqliteConnection, id: i64) -> Result<Vec<i64>> {
    let line_ids = line_ids_for_extension(conn, id).await?;
    let result = sqlx::query("DELETE FROM extensions WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found("Extension", id));
    }
    for line_id in &line_ids {
        promote_main_extension(conn, *line_id).await?;
    }
    Ok(line_ids)
}

pub async fn line_ids_for_extension(
    conn: &mut SqliteConnection,
    extension_id: i64,
) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT line_id FROM line_extension WHERE extension_id = ? ORDER BY line_id",
    )
    .bind(extension_id)
    .fetch_all(conn)
    .await?;
    Ok(ids)
}

// Users

pub async fn create_user(
    conn: &mut SqliteConnection,
    fullname: &str,
    callerid: Option<&str>,
) -> Result<User> {
    let id = sqlx::query("INSERT INTO users (fullname, callerid) VALUES (?, ?)")
        .bind(fullname)
        .bind(callerid)
        .execute(conn)
        .await?
        .last_insert_rowid();
    Ok(User {
        id,
        fullname: fullname.to_string(),
        callerid: callerid.map(str::to_string),
    })
}

pub async fn get_user(conn: &mut SqliteConnection, id: i64) -> Result<User> {
    sqlx::query_as::<_, User>("SELECT id, fullname, callerid FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| Error::not_found("User", id))
}

pub async fn update_user(conn: &mut SqliteConnection, user: &User) -> Result<()> {
    let result = sqlx::query("UPDATE users SET fullname = ?, callerid = ? WHERE id = ?")
        .bind(&user.fullname)
        .bind(&user.callerid)
        .bind(user.id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found("User", user.id));
    }
    Ok(())
}

/// The user's lines, primary first.
pub async fn line_ids_for_user(conn: &mut SqliteConnection, user_id: i64) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT line_id FROM user_line WHERE user_id = ? ORDER BY position, line_id",
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;
    Ok(ids)
}

// Queue members

pub async fn create_queue_member(
    conn: &mut SqliteConnection,
    request: NewQueueMember,
) -> Result<QueueMember> {
    let id = sqlx::query(
        "INSERT INTO queue_members (queue_name, usertype, userid, interface, channel, penalty) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&request.queue_name)
    .bind(&request.usertype)
    .bind(request.userid)
    .bind(&request.interface)
    .bind(&request.channel)
    .bind(request.penalty)
    .execute(conn)
    .await?
    .last_insert_rowid();
    Ok(QueueMember {
        id,
        queue_name: request.queue_name,
        usertype: request.usertype,
        userid: request.userid,
        interface: request.interface,
        channel: request.channel,
        penalty: request.penalty,
    })
}

pub async fn queue_members_for_user(
    conn: &mut SqliteConnection,
    user_id: i64,
) -> Result<Vec<QueueMember>> {
    let members = sqlx::query_as::<_, QueueMember>(
        "SELECT id, queue_name, usertype, userid, interface, channel, penalty \
         FROM queue_members WHERE usertype = 'user' AND userid = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;
    Ok(members)
}
