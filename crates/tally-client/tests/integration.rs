//! `UnreadClient` against a real server on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use tally_client::{ClientConfig, UnreadClient, UnreadView};
use tally_core::retry::BackoffConfig;
use tally_core::{Conversation, ConversationId, MessageCreated, SessionState, TallyError};
use tally_server::config::ServerConfig;
use tally_server::metrics::detached_handle;
use tally_server::server::TallyServer;
use tally_store::{ConversationRegistry, MemoryCounterStore};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn boot_server() -> (Arc<TallyServer>, String) {
    let conversations = Arc::new(ConversationRegistry::new());
    let _ = conversations
        .register(Conversation::new("c1", "buyer", "seller"))
        .unwrap();
    let server = Arc::new(TallyServer::new(
        ServerConfig::default(),
        Arc::new(MemoryCounterStore::new()),
        conversations,
        detached_handle(),
    ));
    let (addr, _handle) = server.listen().await.unwrap();
    (server, format!("http://{addr}"))
}

fn client_config(server_url: &str) -> ClientConfig {
    ClientConfig {
        server_url: server_url.into(),
        reconnect: BackoffConfig {
            base_delay_ms: 20,
            max_delay_ms: 200,
            jitter_factor: 0.2,
        },
        mark_read_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    }
}

async fn send_message(server: &TallyServer, sender: &str) {
    let _ = server
        .ingestor()
        .on_message_created(MessageCreated {
            conversation: "c1".into(),
            sender: sender.into(),
            sequence: None,
        })
        .await
        .unwrap();
}

async fn wait_for(
    view: &mut watch::Receiver<UnreadView>,
    what: &str,
    pred: impl Fn(&UnreadView) -> bool,
) -> UnreadView {
    let waited = timeout(TIMEOUT, async {
        loop {
            {
                let current = view.borrow_and_update();
                if pred(&current) {
                    return current.clone();
                }
            }
            view.changed().await.unwrap();
        }
    })
    .await;
    match waited {
        Ok(view) => view,
        Err(_) => panic!("timed out waiting for {what}: {:?}", view.borrow()),
    }
}

async fn wait_open(view: &mut watch::Receiver<UnreadView>) -> UnreadView {
    wait_for(view, "open session", |v| {
        v.channel_state == SessionState::Open && v.session.is_some()
    })
    .await
}

#[tokio::test]
async fn deltas_then_mark_read() {
    let (server, url) = boot_server().await;
    let client = UnreadClient::connect_http("seller".into(), client_config(&url)).unwrap();
    let mut view = client.view();
    let _ = wait_open(&mut view).await;

    for _ in 0..3 {
        send_message(&server, "buyer").await;
    }
    let v = wait_for(&mut view, "three unread", |v| v.total == 3).await;
    assert_eq!(v.per_conversation.get(&ConversationId::from("c1")).copied(), Some(3));
    assert_eq!(v.conversations_with_unread, 1);

    let receipt = client.mark_read(&"c1".into()).await.unwrap();
    assert_eq!(receipt.marked_count, 3);
    assert_eq!(receipt.through_sequence, 3);
    let v = wait_for(&mut view, "cleared", |v| v.total == 0).await;
    assert_eq!(v.conversations_with_unread, 0);

    send_message(&server, "buyer").await;
    let _ = wait_for(&mut view, "new message after read", |v| v.total == 1).await;

    client.shutdown().await;
}

#[tokio::test]
async fn receipt_reaches_other_client_of_same_user() {
    let (server, url) = boot_server().await;
    let phone = UnreadClient::connect_http("seller".into(), client_config(&url)).unwrap();
    let laptop = UnreadClient::connect_http("seller".into(), client_config(&url)).unwrap();
    let mut phone_view = phone.view();
    let mut laptop_view = laptop.view();
    let _ = wait_open(&mut phone_view).await;
    let _ = wait_open(&mut laptop_view).await;

    send_message(&server, "buyer").await;
    send_message(&server, "buyer").await;
    let _ = wait_for(&mut laptop_view, "two unread", |v| v.total == 2).await;
    let _ = wait_for(&mut phone_view, "two unread", |v| v.total == 2).await;

    let _ = phone.mark_read(&"c1".into()).await.unwrap();
    let _ = wait_for(&mut laptop_view, "receipt from phone", |v| v.total == 0).await;

    phone.shutdown().await;
    laptop.shutdown().await;
}

#[tokio::test]
async fn unknown_conversation_rolls_back() {
    let (server, url) = boot_server().await;
    let client = UnreadClient::connect_http("seller".into(), client_config(&url)).unwrap();
    let mut view = client.view();
    let _ = wait_open(&mut view).await;
    send_message(&server, "buyer").await;
    let _ = wait_for(&mut view, "one unread", |v| v.total == 1).await;

    let err = client.mark_read(&"ghost".into()).await.unwrap_err();
    assert!(matches!(err, TallyError::NotFound(_)), "{err:?}");
    assert!(!err.is_retryable());
    assert_eq!(client.current().total, 1);

    client.shutdown().await;
}

#[tokio::test]
async fn reconnects_and_resyncs_after_server_drop() {
    let (server, url) = boot_server().await;
    let client = UnreadClient::connect_http("seller".into(), client_config(&url)).unwrap();
    let mut view = client.view();
    let first = wait_open(&mut view).await;

    server.hub().close_all().await;
    // Lands either as a delta on the old session or in the reconnect snapshot.
    send_message(&server, "buyer").await;

    let second = wait_for(&mut view, "new session with message", |v| {
        v.channel_state == SessionState::Open
            && v.session.is_some()
            && v.session != first.session
            && v.total == 1
    })
    .await;
    assert_eq!(second.per_conversation.get(&ConversationId::from("c1")).copied(), Some(1));

    client.shutdown().await;
    let drained = timeout(TIMEOUT, async {
        while server.hub().connection_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok());
}

#[tokio::test]
async fn close_is_immediate_and_final() {
    let (_server, url) = boot_server().await;
    let mut client = UnreadClient::connect_http("seller".into(), client_config(&url)).unwrap();
    let mut view = client.view();
    let _ = wait_open(&mut view).await;

    client.close();
    assert!(client.is_closed());
    assert!(matches!(
        client.mark_read(&"c1".into()).await,
        Err(TallyError::Cancelled)
    ));
}
