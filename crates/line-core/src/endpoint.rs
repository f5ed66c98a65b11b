//! Protocol-specific endpoint records
//!
//! A line or trunk binds to at most one endpoint. Each protocol keeps its own
//! table; [`EndpointRef`] names a row and [`Endpoint`] carries a loaded one.
//! Every variant answers the same [`EndpointProtocol`] surface so the fix
//! engine never has to know which table a row came from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::caller_id::CallerId;
use crate::error::{Error, Result};

/// Endpoint category stamped on IAX and Custom rows.
pub const CATEGORY_USER: &str = "user";
pub const CATEGORY_TRUNK: &str = "trunk";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Sip,
    Sccp,
    Iax,
    Custom,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Sip => "sip",
            Protocol::Sccp => "sccp",
            Protocol::Iax => "iax",
            Protocol::Custom => "custom",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sip" => Ok(Protocol::Sip),
            "sccp" => Ok(Protocol::Sccp),
            "iax" => Ok(Protocol::Iax),
            "custom" => Ok(Protocol::Custom),
            other => Err(Error::UnsupportedOperation(format!("unknown protocol '{}'", other))),
        }
    }
}

/// Reference to one endpoint row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "protocol", content = "id", rename_all = "lowercase")]
pub enum EndpointRef {
    Sip(i64),
    Sccp(i64),
    Iax(i64),
    Custom(i64),
}

impl EndpointRef {
    pub fn protocol(&self) -> Protocol {
        match self {
            EndpointRef::Sip(_) => Protocol::Sip,
            EndpointRef::Sccp(_) => Protocol::Sccp,
            EndpointRef::Iax(_) => Protocol::Iax,
            EndpointRef::Custom(_) => Protocol::Custom,
        }
    }

    pub fn id(&self) -> i64 {
        match *self {
            EndpointRef::Sip(id)
            | EndpointRef::Sccp(id)
            | EndpointRef::Iax(id)
            | EndpointRef::Custom(id) => id,
        }
    }

    pub fn new(protocol: Protocol, id: i64) -> Self {
        match protocol {
            Protocol::Sip => EndpointRef::Sip(id),
            Protocol::Sccp => EndpointRef::Sccp(id),
            Protocol::Iax => EndpointRef::Iax(id),
            Protocol::Custom => EndpointRef::Custom(id),
        }
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol(), self.id())
    }
}

/// The identity and capability surface shared by every endpoint kind.
pub trait EndpointProtocol {
    fn protocol(&self) -> Protocol;

    fn id(&self) -> i64;

    /// Legacy identity check on a `(protocol, id)` pair.
    fn matches(&self, protocol: Protocol, id: i64) -> bool {
        self.protocol() == protocol && self.id() == id
    }

    /// The name mirrored into `Line.name`.
    fn display_name(&self) -> Option<&str>;

    /// The dial string used to ring this endpoint.
    fn interface(&self) -> String;

    fn caller_id(&self) -> Result<CallerId> {
        Err(Error::UnsupportedOperation(format!(
            "{} endpoints have no caller id",
            self.protocol()
        )))
    }

    fn set_caller_id(&mut self, _caller_id: &CallerId) -> Result<()> {
        Err(Error::UnsupportedOperation(format!(
            "{} endpoints have no caller id",
            self.protocol()
        )))
    }

    fn endpoint_ref(&self) -> EndpointRef {
        EndpointRef::new(self.protocol(), self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SipEndpoint {
    pub id: i64,
    pub name: String,
    pub secret: String,
    pub callerid: Option<String>,
}

impl EndpointProtocol for SipEndpoint {
    fn protocol(&self) -> Protocol {
        Protocol::Sip
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn display_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn interface(&self) -> String {
        format!("PJSIP/{}", self.name)
    }

    fn caller_id(&self) -> Result<CallerId> {
        Ok(self
            .callerid
            .as_deref()
            .map(CallerId::parse)
            .unwrap_or_else(|| CallerId::new("", None)))
    }

    fn set_caller_id(&mut self, caller_id: &CallerId) -> Result<()> {
        self.callerid = Some(caller_id.to_composite());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SccpEndpoint {
    pub id: i64,
    pub name: String,
    pub context: String,
    pub cid_name: String,
    pub cid_num: String,
}

impl EndpointProtocol for SccpEndpoint {
    fn protocol(&self) -> Protocol {
        Protocol::Sccp
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn display_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn interface(&self) -> String {
        format!("SCCP/{}", self.name)
    }

    fn caller_id(&self) -> Result<CallerId> {
        Ok(CallerId::from_columns(&self.cid_name, &self.cid_num))
    }

    fn set_caller_id(&mut self, caller_id: &CallerId) -> Result<()> {
        let (name, number) = caller_id.to_columns();
        self.cid_name = name;
        self.cid_num = number;
        Ok(())
    }
}

/// IAX endpoints only ever serve trunks here and expose no caller id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IaxEndpoint {
    pub id: i64,
    pub name: String,
    pub secret: String,
    pub context: Option<String>,
    pub category: String,
    pub callerid: Option<String>,
}

impl EndpointProtocol for IaxEndpoint {
    fn protocol(&self) -> Protocol {
        Protocol::Iax
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn display_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn interface(&self) -> String {
        format!("IAX2/{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CustomEndpoint {
    pub id: i64,
    pub interface: String,
    pub context: Option<String>,
    pub category: String,
}

impl EndpointProtocol for CustomEndpoint {
    fn protocol(&self) -> Protocol {
        Protocol::Custom
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn display_name(&self) -> Option<&str> {
        Some(&self.interface)
    }

    // The configured interface is already a dial string.
    fn interface(&self) -> String {
        self.interface.clone()
    }
}

/// A loaded endpoint row of any protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum Endpoint {
    Sip(SipEndpoint),
    Sccp(SccpEndpoint),
    Iax(IaxEndpoint),
    Custom(CustomEndpoint),
}

impl Endpoint {
    fn inner(&self) -> &dyn EndpointProtocol {
        match self {
            Endpoint::Sip(e) => e,
            Endpoint::Sccp(e) => e,
            Endpoint::Iax(e) => e,
            Endpoint::Custom(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn EndpointProtocol {
        match self {
            Endpoint::Sip(e) => e,
            Endpoint::Sccp(e) => e,
            Endpoint::Iax(e) => e,
            Endpoint::Custom(e) => e,
        }
    }
}

impl EndpointProtocol for Endpoint {
    fn protocol(&self) -> Protocol {
        self.inner().protocol()
    }

    fn id(&self) -> i64 {
        self.inner().id()
    }

    fn display_name(&self) -> Option<&str> {
        self.inner().display_name()
    }

    fn interface(&self) -> String {
        self.inner().interface()
    }

    fn caller_id(&self) -> Result<CallerId> {
        self.inner().caller_id()
    }

    fn set_caller_id(&mut self, caller_id: &CallerId) -> Result<()> {
        self.inner_mut().set_caller_id(caller_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sip(name: &str) -> SipEndpoint {
        SipEndpoint {
            id: 7,
            name: name.to_string(),
            secret: "s3cr3t".to_string(),
            callerid: None,
        }
    }

    #[test]
    fn test_protocol_tags() {
        assert_eq!(Protocol::Sip.as_str(), "sip");
        assert_eq!("SCCP".parse::<Protocol>().unwrap(), Protocol::Sccp);
        assert!("dahdi".parse::<Protocol>().is_err());
        assert_eq!(EndpointRef::Custom(3).to_string(), "custom/3");
    }

    #[test]
    fn test_matches_checks_protocol_and_id() {
        let endpoint = sip("alice");
        assert!(endpoint.matches(Protocol::Sip, 7));
        assert!(!endpoint.matches(Protocol::Sccp, 7));
        assert!(!endpoint.matches(Protocol::Sip, 8));
    }

    #[test]
    fn test_interfaces() {
        assert_eq!(sip("alice").interface(), "PJSIP/alice");
        let sccp = Endpoint::Sccp(SccpEndpoint {
            id: 1,
            name: "SEP001122334455".to_string(),
            context: String::new(),
            cid_name: String::new(),
            cid_num: String::new(),
        });
        assert_eq!(sccp.interface(), "SCCP/SEP001122334455");
        let custom = Endpoint::Custom(CustomEndpoint {
            id: 1,
            interface: "dahdi/i1/12345".to_string(),
            context: None,
            category: CATEGORY_USER.to_string(),
        });
        assert_eq!(custom.interface(), "dahdi/i1/12345");
        assert_eq!(custom.display_name(), Some("dahdi/i1/12345"));
    }

    #[test]
    fn test_sip_caller_id_is_composite() {
        let mut endpoint = Endpoint::Sip(sip("alice"));
        let cid = CallerId::new("Alice", Some("1000".to_string()));
        endpoint.set_caller_id(&cid).unwrap();
        match &endpoint {
            Endpoint::Sip(e) => assert_eq!(e.callerid.as_deref(), Some("\"Alice\" <1000>")),
            _ => unreachable!(),
        }
        assert_eq!(endpoint.caller_id().unwrap(), cid);
    }

    #[test]
    fn test_sccp_caller_id_is_two_columns() {
        let mut endpoint = SccpEndpoint {
            id: 1,
            name: "SEP1".to_string(),
            context: String::new(),
            cid_name: String::new(),
            cid_num: String::new(),
        };
        endpoint
            .set_caller_id(&CallerId::new("Bob", None))
            .unwrap();
        assert_eq!(endpoint.cid_name, "Bob");
        assert_eq!(endpoint.cid_num, "");
    }

    #[test]
    fn test_custom_and_iax_caller_id_unsupported() {
        let mut custom = CustomEndpoint {
            id: 1,
            interface: "dahdi/i1".to_string(),
            context: None,
            category: CATEGORY_USER.to_string(),
        };
        let err = custom.set_caller_id(&CallerId::new("x", None)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(_)));

        let iax = IaxEndpoint {
            id: 1,
            name: "carrier".to_string(),
            secret: String::new(),
            context: None,
            category: CATEGORY_TRUNK.to_string(),
            callerid: None,
        };
        assert!(iax.caller_id().is_err());
    }
}
