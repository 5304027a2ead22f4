//! End-to-end test of the JSON-lines event source.

use std::sync::Arc;
use std::time::Duration;

use rollcall_auth::Janitor;
use rollcall_core::{GroupId, RoleId, UserId};
use rollcall_daemon::dispatch::Dispatcher;
use rollcall_daemon::interaction::{InteractionResponse, InteractionToken};
use rollcall_daemon::platform::Platform;
use rollcall_daemon::services::{AdminService, RegistrationService};
use rollcall_daemon::stdio::{self, JsonLinesPlatform, Outbound};
use rollcall_daemon::store::{EphemeralSettings, MemoryStore, RegistrationStore, Store};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const INPUT: &str = r#"
{"token":"t1","group_id":1,"user_id":1,"is_admin":true,"kind":{"type":"command","command":"init_registration","channel_id":10,"role_id":20}}
not json
{"token":"t2","group_id":1,"user_id":42,"kind":{"type":"ping"}}
"#;

const REGISTER: &str = r#"{"token":"t3","group_id":1,"user_id":42,"kind":{"type":"registration_form","email":"ada@csu.edu","first_name":"Ada","pronouns":"they/them"}}
{"token":"t4","group_id":99,"user_id":42,"kind":{"type":"register_button"}}
"#;

fn dispatcher(platform: &JsonLinesPlatform) -> Dispatcher {
    let janitor = Janitor::start(Duration::from_secs(60));
    let store: Arc<dyn Store> = Arc::new(RegistrationStore::new(
        Arc::new(MemoryStore::new()),
        &janitor,
        EphemeralSettings::default(),
    ));
    let platform: Arc<dyn Platform> = Arc::new(platform.clone());

    Dispatcher::new(
        RegistrationService::new(Arc::clone(&store), Arc::clone(&platform)),
        AdminService::new(store, Arc::clone(&platform)),
        platform,
    )
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut records = Vec::new();
    while let Ok(record) = rx.try_recv() {
        records.push(record);
    }
    records
}

fn response_for<'a>(records: &'a [Outbound], token: &str) -> Option<&'a Option<InteractionResponse>> {
    records.iter().find_map(|record| match record {
        Outbound::Response { token: t, response } if t.as_str() == token => Some(response),
        _ => None,
    })
}

#[tokio::test]
async fn test_serve_json_lines() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let platform = JsonLinesPlatform::new(tx);
    let dispatcher = dispatcher(&platform);

    let accepted = stdio::serve(INPUT.as_bytes(), dispatcher.clone(), platform.clone(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(accepted, 2);

    let records = drain(&mut rx);
    assert!(records
        .iter()
        .any(|r| matches!(r, Outbound::Error { error } if error.starts_with("invalid interaction"))));
    assert!(records
        .iter()
        .any(|r| matches!(r, Outbound::ChannelMessage { channel_id, .. } if channel_id.get() == 10)));
    assert_eq!(response_for(&records, "t2"), Some(&Some(InteractionResponse::Pong)));

    // Registration is enabled now
    let accepted = stdio::serve(REGISTER.as_bytes(), dispatcher, platform, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(accepted, 2);

    let records = drain(&mut rx);
    assert!(records.contains(&Outbound::RoleGranted {
        group_id: GroupId(1),
        user_id: UserId(42),
        role_id: RoleId(20),
    }));
    assert!(records.contains(&Outbound::DisplayNameSet {
        group_id: GroupId(1),
        user_id: UserId(42),
        name: "Ada (they/them)".into(),
    }));
    match response_for(&records, "t3") {
        Some(Some(InteractionResponse::Message(message))) => {
            assert_eq!(message.content, "You're all set!")
        }
        other => panic!("unexpected response {other:?}"),
    }

    // Unknown guild: answered with null
    assert_eq!(response_for(&records, "t4"), Some(&None));
}

#[tokio::test]
async fn test_serve_stops_on_shutdown() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let platform = JsonLinesPlatform::new(tx);
    let dispatcher = dispatcher(&platform);

    // Input that never ends
    let (reader, _writer) = tokio::io::duplex(64);
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let accepted = stdio::serve(tokio::io::BufReader::new(reader), dispatcher, platform, shutdown)
        .await
        .unwrap();
    assert_eq!(accepted, 0);
}

#[test]
fn test_outbound_record_format() {
    let record = Outbound::FollowUp {
        token: InteractionToken::new("t9"),
        message: rollcall_daemon::interaction::Message::verify_prompt(),
    };
    let json = serde_json::to_value(&record).unwrap();

    assert_eq!(json["type"], "follow_up");
    assert_eq!(json["token"], "t9");
    assert_eq!(json["message"]["buttons"][0]["id"], "verify_pin");
}
