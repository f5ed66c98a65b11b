//! Tests for the transactional service facade

use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

use line_core::config::DatabaseConfig;
use line_core::endpoint::{Endpoint, EndpointProtocol, EndpointRef};
use line_core::store::{self, NewLine, NewSipEndpoint};
use line_core::{association, db, Error, LineService, User};

/// Helper to create a service over a fresh file database
async fn create_test_service() -> (LineService<StdRng>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("lines.db");
    let config = DatabaseConfig {
        url: format!("sqlite://{}?mode=rwc", db_path.display()),
        max_connections: 1,
        run_migrations: true,
    };

    let pool = db::connect(&config)
        .await
        .expect("Failed to create test database");
    (
        LineService::with_rng(pool, StdRng::seed_from_u64(17)),
        temp_dir,
    )
}

async fn new_line(service: &mut LineService<StdRng>) -> i64 {
    service
        .create_line(NewLine {
            context: "default".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .id
}

async fn new_sip(service: &mut LineService<StdRng>, name: &str) -> EndpointRef {
    service
        .create_sip_endpoint(NewSipEndpoint {
            name: Some(name.to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
        .endpoint_ref()
}

#[tokio::test]
async fn test_bind_and_link_fix_in_one_step() {
    let (mut service, _temp_dir) = create_test_service().await;

    let line_id = new_line(&mut service).await;
    let endpoint = new_sip(&mut service, "desk").await;
    let (extension, user) = {
        let mut conn = service.pool().acquire().await.unwrap();
        (
            store::create_extension(&mut conn, "1000", "default").await.unwrap(),
            store::create_user(&mut conn, "John Doe", None).await.unwrap(),
        )
    };

    let line = service.bind_line_endpoint(line_id, endpoint).await.unwrap();
    assert_eq!(line.name.as_deref(), Some("desk"));

    let line = service.link_extension(line_id, extension.id).await.unwrap();
    assert_eq!(line.number.as_deref(), Some("1000"));

    service.link_user(line_id, user.id).await.unwrap();

    let mut conn = service.pool().acquire().await.unwrap();
    match store::get_endpoint(&mut conn, endpoint).await.unwrap() {
        Endpoint::Sip(sip) => assert_eq!(sip.callerid.as_deref(), Some("\"John Doe\" <1000>")),
        other => panic!("Expected sip endpoint, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_bind_rolls_back() {
    let (mut service, _temp_dir) = create_test_service().await;

    let line_id = new_line(&mut service).await;
    let endpoint = new_sip(&mut service, "first").await;
    service.bind_line_endpoint(line_id, endpoint).await.unwrap();

    let phone = {
        let mut conn = service.pool().acquire().await.unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        store::create_sccp_endpoint(&mut conn, &mut rng, Default::default())
            .await
            .unwrap()
    };

    let result = service
        .bind_line_endpoint(line_id, EndpointRef::Sccp(phone.id))
        .await;
    assert!(matches!(result, Err(Error::AlreadyAssociated(_))));

    let line = service.get_line(line_id).await.unwrap();
    assert_eq!(line.endpoint, Some(endpoint));
    assert_eq!(line.name.as_deref(), Some("first"));
}

#[tokio::test]
async fn test_update_user_refixes_all_lines() {
    let (mut service, _temp_dir) = create_test_service().await;

    let first = new_line(&mut service).await;
    let second = new_line(&mut service).await;
    let first_sip = new_sip(&mut service, "one").await;
    let second_sip = new_sip(&mut service, "two").await;
    let user = {
        let mut conn = service.pool().acquire().await.unwrap();
        store::create_user(&mut conn, "Alice", None).await.unwrap()
    };

    service.bind_line_endpoint(first, first_sip).await.unwrap();
    service.bind_line_endpoint(second, second_sip).await.unwrap();
    service.link_user(first, user.id).await.unwrap();
    service.link_user(second, user.id).await.unwrap();

    service
        .update_user(&User {
            callerid: Some("\"Alice B\" <777>".to_string()),
            ..user
        })
        .await
        .unwrap();

    let mut conn = service.pool().acquire().await.unwrap();
    for endpoint in [first_sip, second_sip] {
        match store::get_endpoint(&mut conn, endpoint).await.unwrap() {
            Endpoint::Sip(sip) => assert_eq!(sip.callerid.as_deref(), Some("\"Alice B\" <777>")),
            other => panic!("Expected sip endpoint, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_update_extension_refixes_lines() {
    let (mut service, _temp_dir) = create_test_service().await;

    let line_id = new_line(&mut service).await;
    let extension = {
        let mut conn = service.pool().acquire().await.unwrap();
        store::create_extension(&mut conn, "1000", "default").await.unwrap()
    };
    service.link_extension(line_id, extension.id).await.unwrap();

    let mut moved = extension.clone();
    moved.exten = "2000".to_string();
    moved.context = "office".to_string();
    service.update_extension(&moved).await.unwrap();

    let line = service.get_line(line_id).await.unwrap();
    assert_eq!(line.number.as_deref(), Some("2000"));
    assert_eq!(line.context, "office");

    service.delete_extension(extension.id).await.unwrap();
    let line = service.get_line(line_id).await.unwrap();
    assert_eq!(line.number, None);
}

#[tokio::test]
async fn test_fix_all_repairs_hand_edits() {
    let (mut service, _temp_dir) = create_test_service().await;

    let line_id = new_line(&mut service).await;
    let endpoint = new_sip(&mut service, "drift").await;
    service.bind_line_endpoint(line_id, endpoint).await.unwrap();

    sqlx::query("UPDATE lines SET name = NULL WHERE id = ?")
        .bind(line_id)
        .execute(service.pool())
        .await
        .unwrap();

    let summary = service.fix_all().await.unwrap();
    assert_eq!(summary.lines_checked, 1);
    assert_eq!(summary.lines_changed, 1);
    assert_eq!(summary.trunks_checked, 0);

    let line = service.get_line(line_id).await.unwrap();
    assert_eq!(line.name.as_deref(), Some("drift"));

    let summary = service.fix_all().await.unwrap();
    assert_eq!(summary.lines_changed, 0);
}

#[tokio::test]
async fn test_unlink_user_refixes_new_primary_line() {
    let (mut service, _temp_dir) = create_test_service().await;

    let first = new_line(&mut service).await;
    let second = new_line(&mut service).await;
    let first_sip = new_sip(&mut service, "old-primary").await;
    let second_sip = new_sip(&mut service, "new-primary").await;
    let user = {
        let mut conn = service.pool().acquire().await.unwrap();
        let user = store::create_user(&mut conn, "Grace", None).await.unwrap();
        store::create_queue_member(
            &mut conn,
            store::NewQueueMember {
                queue_name: "sales".to_string(),
                usertype: "user".to_string(),
                userid: user.id,
                channel: "SIP".to_string(),
                interface: String::new(),
                penalty: 0,
            },
        )
        .await
        .unwrap();
        user
    };

    service.bind_line_endpoint(first, first_sip).await.unwrap();
    service.bind_line_endpoint(second, second_sip).await.unwrap();
    service.link_user(first, user.id).await.unwrap();
    service.link_user(second, user.id).await.unwrap();

    service.unlink_user(first, user.id).await.unwrap();

    let mut conn = service.pool().acquire().await.unwrap();
    let members = store::queue_members_for_user(&mut conn, user.id).await.unwrap();
    assert_eq!(members[0].interface, "PJSIP/new-primary");
}

#[tokio::test]
async fn test_delete_main_extension_promotes_next_link() {
    let (mut service, _temp_dir) = create_test_service().await;

    let line_id = new_line(&mut service).await;
    let (main, other) = {
        let mut conn = service.pool().acquire().await.unwrap();
        (
            store::create_extension(&mut conn, "1000", "default").await.unwrap(),
            store::create_extension(&mut conn, "2000", "office").await.unwrap(),
        )
    };
    service.link_extension(line_id, main.id).await.unwrap();
    service.link_extension(line_id, other.id).await.unwrap();

    service.delete_extension(main.id).await.unwrap();

    let line = service.get_line(line_id).await.unwrap();
    assert_eq!(line.number.as_deref(), Some("2000"));
    assert_eq!(line.context, "office");

    let mut conn = service.pool().acquire().await.unwrap();
    assert_eq!(
        association::main_extension_id(&mut conn, line_id).await.unwrap(),
        Some(other.id)
    );
}

#[tokio::test]
async fn test_link_user_fixes_main_user_only() {
    let (mut service, _temp_dir) = create_test_service().await;

    let line_id = new_line(&mut service).await;
    let endpoint = new_sip(&mut service, "shared").await;
    let (owner, guest) = {
        let mut conn = service.pool().acquire().await.unwrap();
        let owner = store::create_user(&mut conn, "Owner", None).await.unwrap();
        let guest = store::create_user(&mut conn, "Guest", None).await.unwrap();
        for user in [&owner, &guest] {
            store::create_queue_member(
                &mut conn,
                store::NewQueueMember {
                    queue_name: "support".to_string(),
                    usertype: "user".to_string(),
                    userid: user.id,
                    channel: "SIP".to_string(),
                    interface: String::new(),
                    penalty: 0,
                },
            )
            .await
            .unwrap();
        }
        (owner, guest)
    };

    service.bind_line_endpoint(line_id, endpoint).await.unwrap();
    service.link_user(line_id, owner.id).await.unwrap();
    service.link_user(line_id, guest.id).await.unwrap();

    let mut conn = service.pool().acquire().await.unwrap();
    let owner_members = store::queue_members_for_user(&mut conn, owner.id).await.unwrap();
    assert_eq!(owner_members[0].interface, "PJSIP/shared");
    let guest_members = store::queue_members_for_user(&mut conn, guest.id).await.unwrap();
    assert_eq!(guest_members[0].interface, "");
}
