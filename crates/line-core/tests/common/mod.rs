//! Shared fixtures for line-core integration tests

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::{Connection, SqliteConnection};

use line_core::db;
use line_core::endpoint::{EndpointRef, SccpEndpoint, SipEndpoint};
use line_core::store::{self, NewLine, NewSccpEndpoint, NewSipEndpoint};
use line_core::{Extension, Line, User};

/// A fresh in-memory database with the schema applied.
pub async fn create_test_db() -> SqliteConnection {
    let mut conn = SqliteConnection::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut conn)
        .await
        .unwrap();
    db::migrate(&mut conn).await.expect("Failed to migrate");
    conn
}

pub fn rng() -> StdRng {
    StdRng::seed_from_u64(0x5eed)
}

pub async fn line(conn: &mut SqliteConnection, context: &str) -> Line {
    store::create_line(
        conn,
        &mut rng(),
        NewLine {
            context: context.to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

pub async fn sip(conn: &mut SqliteConnection, name: &str) -> SipEndpoint {
    store::create_sip_endpoint(
        conn,
        &mut rng(),
        NewSipEndpoint {
            name: Some(name.to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

pub async fn sccp(conn: &mut SqliteConnection, name: &str) -> SccpEndpoint {
    store::create_sccp_endpoint(
        conn,
        &mut rng(),
        NewSccpEndpoint {
            name: Some(name.to_string()),
            context: None,
        },
    )
    .await
    .unwrap()
}

pub async fn extension(conn: &mut SqliteConnection, exten: &str, context: &str) -> Extension {
    store::create_extension(conn, exten, context).await.unwrap()
}

pub async fn user(conn: &mut SqliteConnection, fullname: &str, callerid: Option<&str>) -> User {
    store::create_user(conn, fullname, callerid).await.unwrap()
}

pub fn sip_ref(endpoint: &SipEndpoint) -> EndpointRef {
    EndpointRef::Sip(endpoint.id)
}
