//! Caller-id composition and parsing
//!
//! SIP and IAX endpoints keep caller-id as a single `"NAME" <NUM>` string,
//! SCCP keeps name and number in two columns. [`CallerId`] is the pair both
//! representations are converted through.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Extension, User};

static CALLER_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^"(?P<name>[^"]*)"(?:\s*<(?P<num>\+?[0-9A-Za-z]+)>)?"#).unwrap());
static NUMBER_SEGMENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<(?P<num>\+?[0-9A-Za-z]+)>").unwrap());

/// A caller-id name with an optional number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId {
    pub name: String,
    pub number: Option<String>,
}

impl CallerId {
    pub fn new(name: impl Into<String>, number: Option<String>) -> Self {
        Self {
            name: name.into(),
            number: number.filter(|n| !n.is_empty()),
        }
    }

    /// Parse a composite caller-id.
    ///
    /// A missing or malformed `<...>` segment yields no number. A string that
    /// is not quoted is a bare name; anything from its first `<` on is never
    /// part of the name.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match CALLER_ID_REGEX.captures(raw) {
            Some(caps) => Self::new(
                caps.name("name").map_or("", |m| m.as_str()),
                caps.name("num").map(|m| m.as_str().to_string()),
            ),
            None => Self::parse_bare(raw),
        }
    }

    fn parse_bare(raw: &str) -> Self {
        let (name, rest) = raw.split_at(raw.find('<').unwrap_or(raw.len()));
        let number = NUMBER_SEGMENT_REGEX
            .captures(rest)
            .and_then(|caps| caps.name("num"))
            .map(|m| m.as_str().to_string());
        Self::new(name.trim().trim_matches('"').trim(), number)
    }

    /// Compose the single-string form: `"name" <number>`, or `"name"` when
    /// there is no number.
    pub fn to_composite(&self) -> String {
        match self.number.as_deref() {
            Some(number) => format!("\"{}\" <{}>", self.name, number),
            None => format!("\"{}\"", self.name),
        }
    }

    /// The SCCP column pair, empty strings standing in for missing values.
    pub fn to_columns(&self) -> (String, String) {
        (self.name.clone(), self.number.clone().unwrap_or_default())
    }

    pub fn from_columns(name: &str, number: &str) -> Self {
        Self::new(name, Some(number.to_string()))
    }

    /// The caller-id a user presents on a line.
    ///
    /// The user's override supplies the name and possibly a number; otherwise
    /// the fullname is used. A number embedded in the override wins over the
    /// main extension's exten.
    pub fn for_user(user: &User, extension: Option<&Extension>) -> Self {
        let base = match user.callerid.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Self::parse(raw),
            _ => Self::new(user.fullname.clone(), None),
        };
        let number = base
            .number
            .or_else(|| extension.map(|e| e.exten.clone()));
        Self::new(base.name, number)
    }
}

impl std::fmt::Display for CallerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_composite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn user(callerid: Option<&str>) -> User {
        User {
            id: 1,
            fullname: "John Doe".to_string(),
            callerid: callerid.map(str::to_string),
        }
    }

    fn extension(exten: &str) -> Extension {
        Extension {
            id: 1,
            exten: exten.to_string(),
            context: "default".to_string(),
        }
    }

    #[test]
    fn test_compose_and_parse_round_trip() {
        let cid = CallerId::new("Jôhn Smith", Some("1000".to_string()));
        assert_eq!(cid.to_composite(), "\"Jôhn Smith\" <1000>");
        assert_eq!(CallerId::parse("\"Jôhn Smith\" <1000>"), cid);
    }

    #[test]
    fn test_compose_without_number() {
        let cid = CallerId::new("Jôhn Smith", None);
        assert_eq!(cid.to_composite(), "\"Jôhn Smith\"");
        assert_eq!(cid.to_columns(), ("Jôhn Smith".to_string(), String::new()));
    }

    #[test]
    fn test_parse_malformed_number_is_no_number() {
        let cid = CallerId::parse("\"Alice\" <10 00>");
        assert_eq!(cid.name, "Alice");
        assert_eq!(cid.number, None);

        let cid = CallerId::parse("\"Alice\" <>");
        assert_eq!(cid.number, None);
    }

    #[test]
    fn test_parse_unquoted_is_bare_name() {
        let cid = CallerId::parse("Alice");
        assert_eq!(cid.name, "Alice");
        assert_eq!(cid.number, None);
    }

    #[test]
    fn test_parse_unquoted_keeps_angle_segment_out_of_name() {
        let cid = CallerId::parse("Alice <1000>");
        assert_eq!(cid, CallerId::new("Alice", Some("1000".to_string())));

        let cid = CallerId::parse("Alice <10 00>");
        assert_eq!(cid, CallerId::new("Alice", None));
    }

    #[test]
    fn test_unquoted_override_number_beats_extension() {
        let cid = CallerId::for_user(&user(Some("Alice <1000>")), Some(&extension("3000")));
        assert_eq!(cid.to_composite(), "\"Alice\" <1000>");
    }

    #[test]
    fn test_user_override_without_number_takes_extension() {
        let cid = CallerId::for_user(&user(Some("\"Jôhn Smith\"")), Some(&extension("3000")));
        assert_eq!(cid.to_composite(), "\"Jôhn Smith\" <3000>");
    }

    #[test]
    fn test_user_override_number_beats_extension() {
        let cid = CallerId::for_user(&user(Some("\"Jôhn Smith\" <1000>")), Some(&extension("3000")));
        assert_eq!(cid.to_composite(), "\"Jôhn Smith\" <1000>");
    }

    #[test]
    fn test_user_without_override_uses_fullname() {
        let cid = CallerId::for_user(&user(None), None);
        assert_eq!(cid.to_composite(), "\"John Doe\"");

        let cid = CallerId::for_user(&user(None), Some(&extension("1001")));
        assert_eq!(cid.to_composite(), "\"John Doe\" <1001>");
    }

    proptest! {
        #[test]
        fn prop_composite_round_trip(
            name in "[^\"]{0,40}",
            number in proptest::option::of("\\+?[0-9A-Za-z]{1,16}"),
        ) {
            let cid = CallerId::new(name.trim().to_string(), number);
            prop_assert_eq!(CallerId::parse(&cid.to_composite()), cid);
        }
    }
}
