//! Core records: lines, trunks, extensions, users and queue members

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use crate::endpoint::{EndpointRef, Protocol};
use crate::error::{Error, Result};

/// Queue member channel for members dialed through a Local channel.
pub const LOCAL_CHANNEL: &str = "Local";

/// A dialable internal line.
///
/// `name`, `number` and `context` are denormalized from the bound endpoint and
/// the main extension; the fix engine keeps them current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub id: i64,
    pub name: Option<String>,
    pub number: Option<String>,
    pub context: String,
    pub provisioning_code: String,
    pub device: Option<String>,
    pub application_uuid: Option<String>,
    pub endpoint: Option<EndpointRef>,
}

impl Line {
    /// Bind `endpoint` to this line.
    ///
    /// Rebinding within the protocol already in place overwrites the
    /// reference; a bound endpoint of another protocol is a conflict.
    pub fn associate_endpoint(&mut self, endpoint: EndpointRef) -> Result<()> {
        if endpoint.protocol() == Protocol::Iax {
            return Err(Error::UnsupportedOperation(
                "lines cannot use iax endpoints".to_string(),
            ));
        }
        check_endpoint_conflict("line", self.id, self.endpoint, endpoint)?;
        self.endpoint = Some(endpoint);
        Ok(())
    }

    /// Unbind `endpoint` if it is the one bound. Returns whether anything changed.
    pub fn dissociate_endpoint(&mut self, endpoint: EndpointRef) -> bool {
        if self.endpoint == Some(endpoint) {
            self.endpoint = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn endpoint_columns(&self) -> (Option<i64>, Option<i64>, Option<i64>) {
        match self.endpoint {
            Some(EndpointRef::Sip(id)) => (Some(id), None, None),
            Some(EndpointRef::Sccp(id)) => (None, Some(id), None),
            Some(EndpointRef::Custom(id)) => (None, None, Some(id)),
            Some(EndpointRef::Iax(_)) | None => (None, None, None),
        }
    }
}

impl<'r> FromRow<'r, SqliteRow> for Line {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let id: i64 = row.try_get("id")?;
        let endpoint = single_endpoint(
            "line",
            id,
            &[
                (Protocol::Sip, row.try_get("endpoint_sip_id")?),
                (Protocol::Sccp, row.try_get("endpoint_sccp_id")?),
                (Protocol::Custom, row.try_get("endpoint_custom_id")?),
            ],
        )?;
        Ok(Line {
            id,
            name: row.try_get("name")?,
            number: row.try_get("number")?,
            context: row.try_get("context")?,
            provisioning_code: row.try_get("provisioning_code")?,
            device: row.try_get("device")?,
            application_uuid: row.try_get("application_uuid")?,
            endpoint,
        })
    }
}

/// Outbound registration attached to a trunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "protocol", content = "id", rename_all = "lowercase")]
pub enum RegisterRef {
    Sip(i64),
    Iax(i64),
}

impl RegisterRef {
    fn compatible_with(&self, endpoint: EndpointRef) -> bool {
        matches!(
            (self, endpoint),
            (RegisterRef::Sip(_), EndpointRef::Sip(_)) | (RegisterRef::Iax(_), EndpointRef::Iax(_))
        )
    }
}

/// A carrier-facing trunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trunk {
    pub id: i64,
    pub context: Option<String>,
    pub endpoint: Option<EndpointRef>,
    pub register: Option<RegisterRef>,
}

impl Trunk {
    pub fn associate_endpoint(&mut self, endpoint: EndpointRef) -> Result<()> {
        if endpoint.protocol() == Protocol::Sccp {
            return Err(Error::UnsupportedOperation(
                "trunks cannot use sccp endpoints".to_string(),
            ));
        }
        check_endpoint_conflict("trunk", self.id, self.endpoint, endpoint)?;
        if let Some(register) = self.register {
            if !register.compatible_with(endpoint) {
                return Err(Error::AlreadyAssociated(format!(
                    "trunk {} has a register incompatible with a {} endpoint",
                    self.id,
                    endpoint.protocol()
                )));
            }
        }
        self.endpoint = Some(endpoint);
        Ok(())
    }

    pub fn dissociate_endpoint(&mut self, endpoint: EndpointRef) -> bool {
        if self.endpoint == Some(endpoint) {
            self.endpoint = None;
            true
        } else {
            false
        }
    }

    pub fn associate_register(&mut self, register: RegisterRef) -> Result<()> {
        if let Some(current) = self.register {
            if current != register {
                return Err(Error::AlreadyAssociated(format!(
                    "trunk {} already has a register",
                    self.id
                )));
            }
        }
        if let Some(endpoint) = self.endpoint {
            if !register.compatible_with(endpoint) {
                return Err(Error::AlreadyAssociated(format!(
                    "trunk {} already has an endpoint of a different protocol ({})",
                    self.id,
                    endpoint.protocol()
                )));
            }
        }
        self.register = Some(register);
        Ok(())
    }

    pub fn dissociate_register(&mut self, register: RegisterRef) -> bool {
        if self.register == Some(register) {
            self.register = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn endpoint_columns(&self) -> (Option<i64>, Option<i64>, Option<i64>) {
        match self.endpoint {
            Some(EndpointRef::Sip(id)) => (Some(id), None, None),
            Some(EndpointRef::Iax(id)) => (None, Some(id), None),
            Some(EndpointRef::Custom(id)) => (None, None, Some(id)),
            Some(EndpointRef::Sccp(_)) | None => (None, None, None),
        }
    }

    pub(crate) fn register_columns(&self) -> (Option<i64>, Option<i64>) {
        match self.register {
            Some(RegisterRef::Sip(id)) => (Some(id), None),
            Some(RegisterRef::Iax(id)) => (None, Some(id)),
            None => (None, None),
        }
    }
}

impl<'r> FromRow<'r, SqliteRow> for Trunk {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let id: i64 = row.try_get("id")?;
        let endpoint = single_endpoint(
            "trunk",
            id,
            &[
                (Protocol::Sip, row.try_get("endpoint_sip_id")?),
                (Protocol::Iax, row.try_get("endpoint_iax_id")?),
                (Protocol::Custom, row.try_get("endpoint_custom_id")?),
            ],
        )?;
        let register_sip: Option<i64> = row.try_get("register_sip_id")?;
        let register_iax: Option<i64> = row.try_get("register_iax_id")?;
        let register = match (register_sip, register_iax) {
            (Some(id), None) => Some(RegisterRef::Sip(id)),
            (None, Some(id)) => Some(RegisterRef::Iax(id)),
            (None, None) => None,
            (Some(_), Some(_)) => {
                return Err(sqlx::Error::Decode(
                    format!("trunk {} references two registers", id).into(),
                ))
            }
        };
        Ok(Trunk {
            id,
            context: row.try_get("context")?,
            endpoint,
            register,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Extension {
    pub id: i64,
    pub exten: String,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub fullname: String,
    /// Caller-id override, `"Name"` or `"Name" <number>`.
    pub callerid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueMember {
    pub id: i64,
    pub queue_name: String,
    pub usertype: String,
    pub userid: i64,
    pub interface: String,
    pub channel: String,
    pub penalty: i64,
}

impl QueueMember {
    pub fn is_local(&self) -> bool {
        self.channel == LOCAL_CHANNEL
    }
}

/// Dial string for members reached through a Local channel.
pub fn local_interface(extension: &Extension) -> String {
    format!("{}/{}@{}", LOCAL_CHANNEL, extension.exten, extension.context)
}

fn check_endpoint_conflict(
    kind: &str,
    id: i64,
    current: Option<EndpointRef>,
    requested: EndpointRef,
) -> Result<()> {
    match current {
        Some(current) if current.protocol() != requested.protocol() => {
            Err(Error::AlreadyAssociated(format!(
                "{} {} already has an endpoint of a different protocol ({})",
                kind,
                id,
                current.protocol()
            )))
        }
        _ => Ok(()),
    }
}

fn single_endpoint(
    kind: &str,
    id: i64,
    columns: &[(Protocol, Option<i64>)],
) -> sqlx::Result<Option<EndpointRef>> {
    let mut set = columns
        .iter()
        .filter_map(|(protocol, value)| value.map(|v| EndpointRef::new(*protocol, v)));
    let first = set.next();
    if set.next().is_some() {
        return Err(sqlx::Error::Decode(
            format!("{} {} references more than one endpoint", kind, id).into(),
        ));
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> Line {
        Line {
            id: 1,
            name: None,
            number: None,
            context: "default".to_string(),
            provisioning_code: "123456".to_string(),
            device: None,
            application_uuid: None,
            endpoint: None,
        }
    }

    fn trunk() -> Trunk {
        Trunk {
            id: 1,
            context: Some("from-extern".to_string()),
            endpoint: None,
            register: None,
        }
    }

    #[test]
    fn test_line_associate_endpoint_is_idempotent() {
        let mut line = line();
        line.associate_endpoint(EndpointRef::Sip(4)).unwrap();
        line.associate_endpoint(EndpointRef::Sip(4)).unwrap();
        assert_eq!(line.endpoint, Some(EndpointRef::Sip(4)));
        assert_eq!(line.endpoint_columns(), (Some(4), None, None));

        line.associate_endpoint(EndpointRef::Sip(5)).unwrap();
        assert_eq!(line.endpoint, Some(EndpointRef::Sip(5)));
    }

    #[test]
    fn test_line_rejects_other_protocol() {
        let mut line = line();
        line.associate_endpoint(EndpointRef::Sccp(2)).unwrap();
        let err = line.associate_endpoint(EndpointRef::Sip(4)).unwrap_err();
        assert!(matches!(err, Error::AlreadyAssociated(_)));
        assert_eq!(line.endpoint, Some(EndpointRef::Sccp(2)));
    }

    #[test]
    fn test_line_rejects_iax() {
        let err = line().associate_endpoint(EndpointRef::Iax(1)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(_)));
    }

    #[test]
    fn test_stale_dissociate_is_ignored() {
        let mut line = line();
        line.associate_endpoint(EndpointRef::Custom(9)).unwrap();
        assert!(!line.dissociate_endpoint(EndpointRef::Custom(8)));
        assert_eq!(line.endpoint, Some(EndpointRef::Custom(9)));
        assert!(line.dissociate_endpoint(EndpointRef::Custom(9)));
        assert_eq!(line.endpoint, None);
    }

    #[test]
    fn test_trunk_register_exclusivity() {
        let mut trunk = trunk();
        trunk.associate_endpoint(EndpointRef::Iax(3)).unwrap();
        assert!(trunk.associate_register(RegisterRef::Sip(1)).is_err());
        trunk.associate_register(RegisterRef::Iax(1)).unwrap();
        assert_eq!(trunk.register_columns(), (None, Some(1)));

        let mut trunk = self::trunk();
        trunk.associate_register(RegisterRef::Sip(5)).unwrap();
        assert!(trunk.associate_endpoint(EndpointRef::Custom(2)).is_err());
        trunk.associate_endpoint(EndpointRef::Sip(2)).unwrap();
    }

    #[test]
    fn test_local_interface() {
        let extension = Extension {
            id: 1,
            exten: "1000".to_string(),
            context: "default".to_string(),
        };
        assert_eq!(local_interface(&extension), "Local/1000@default");
    }
}
