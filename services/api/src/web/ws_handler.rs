//! services/api/src/web/ws_handler.rs
//!
//! This is the entry point and control loop for a live lesson WebSocket
//! connection. A connection holds at most one subscription at a time; a new
//! subscribe request replaces it. An administrator feed stops as soon as the
//! client's session ends.

use crate::web::{
    middleware::session_token,
    protocol::{ClientMessage, ServerMessage},
    rest::{lesson_dtos, parse_group},
    state::AppState,
};
use crate::error::HttpError;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use course_catalog_core::{ActiveSession, CatalogError, LessonFilter, SnapshotEvent, Subscription};
use futures::{
    future,
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A running subscription and, for administrator feeds, the session that
/// authorized it.
pub struct Feed {
    pub subscription: Subscription,
    pub session: Option<ActiveSession>,
}

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let token = session_token(&headers).map(str::to_string);
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, token))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, token: Option<String>) {
    info!("New live lessons connection established");
    let (mut sender, mut receiver) = socket.split();

    // --- 1. Initialization Phase ---
    let first = match receiver.next().await {
        Some(Ok(Message::Text(text))) => {
            match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(msg @ (ClientMessage::Subscribe { .. } | ClientMessage::SubscribeAdmin)) => {
                    open_subscription(&app_state, msg, token.as_deref()).await
                }
                _ => {
                    error!("First message was not a subscribe message.");
                    let _ = send_message(&mut sender, &protocol_error("first message must be subscribe or subscribe_admin")).await;
                    return;
                }
            }
        }
        _ => {
            error!("Client disconnected before subscribing.");
            return;
        }
    };
    let Feed {
        subscription: first_subscription,
        session: first_session,
    } = match first {
        Ok(feed) => feed,
        Err(err_msg) => {
            let _ = send_message(&mut sender, &err_msg).await;
            return;
        }
    };
    let mut subscription = Some(first_subscription);
    let mut admin_session = first_session;

    // --- 2. Main Message Loop ---
    loop {
        let next_event = async {
            match subscription.as_mut() {
                Some(active) => active.next_event().await,
                None => future::pending().await,
            }
        };
        let session_ended = async {
            match admin_session.as_ref() {
                Some(session) => session.ended().await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client closed the live lessons connection.");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                };

                let reply = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(ClientMessage::Unsubscribe) => {
                        if let Some(active) = subscription.take() {
                            active.cancel();
                        }
                        admin_session = None;
                        Some(ServerMessage::Unsubscribed)
                    }
                    Ok(msg) => match open_subscription(&app_state, msg, token.as_deref()).await {
                        Ok(replacement) => {
                            // Dropping the previous subscription cancels it.
                            subscription = Some(replacement.subscription);
                            admin_session = replacement.session;
                            None
                        }
                        Err(err_msg) => Some(err_msg),
                    },
                    Err(e) => {
                        warn!("Unparsable client message: {}", e);
                        Some(protocol_error(&e.to_string()))
                    }
                };
                if let Some(reply) = reply {
                    if !send_message(&mut sender, &reply).await {
                        break;
                    }
                }
            }
            event = next_event => {
                let Some(event) = event else {
                    debug!("Subscription ended.");
                    subscription = None;
                    continue;
                };
                if !send_message(&mut sender, &event_message(event)).await {
                    break;
                }
            }
            _ = session_ended => {
                info!("Administrator session ended; stopping its live feed.");
                if let Some(active) = subscription.take() {
                    active.cancel();
                }
                admin_session = None;
                if !send_message(&mut sender, &ServerMessage::Unsubscribed).await {
                    break;
                }
            }
        }
    }
    // `subscription` is dropped here, which releases the live query.
}

/// Turns a subscribe request into a running feed, or into the error message
/// to send back. Administrator feeds need `token` to name a live session.
pub async fn open_subscription(
    app_state: &AppState,
    msg: ClientMessage,
    token: Option<&str>,
) -> Result<Feed, ServerMessage> {
    let not_authenticated = || error_message(CatalogError::NotAuthenticated.into());
    let (filter, session) = match msg {
        ClientMessage::Subscribe {
            chapter_id,
            subject_id,
            group,
        } => {
            let group = parse_group(&group).map_err(error_message)?;
            if !app_state.catalog.contains(&chapter_id, &subject_id) {
                return Err(error_message(
                    CatalogError::UnknownScope {
                        chapter_id,
                        subject_id,
                    }
                    .into(),
                ));
            }
            (LessonFilter::scoped(&chapter_id, &subject_id, group), None)
        }
        ClientMessage::SubscribeAdmin => {
            let token = token.ok_or_else(not_authenticated)?;
            let session = app_state
                .sessions
                .resolve(token)
                .await
                .ok_or_else(not_authenticated)?;
            (LessonFilter::whole_group(Some(session.group)), Some(session))
        }
        ClientMessage::Unsubscribe => {
            return Err(protocol_error("nothing to subscribe to"));
        }
    };

    let subscription = app_state
        .queries
        .subscribe(&filter)
        .ok_or_else(not_authenticated)?;
    Ok(Feed {
        subscription,
        session,
    })
}

pub fn event_message(event: SnapshotEvent) -> ServerMessage {
    match event {
        SnapshotEvent::Snapshot(lessons) => ServerMessage::Snapshot {
            lessons: lesson_dtos(lessons),
        },
        SnapshotEvent::Unavailable(reason) => {
            warn!("Live lessons unavailable: {}", reason);
            ServerMessage::Unavailable {
                message: CatalogError::Unavailable(reason).user_message(),
            }
        }
    }
}

fn error_message(err: HttpError) -> ServerMessage {
    match err {
        HttpError::Catalog(err) => ServerMessage::Error {
            kind: err.kind().to_string(),
            message: err.user_message(),
        },
        HttpError::Request { kind, message, .. } => ServerMessage::Error {
            kind: kind.to_string(),
            message,
        },
    }
}

fn protocol_error(message: &str) -> ServerMessage {
    ServerMessage::Error {
        kind: "protocol".to_string(),
        message: message.to_string(),
    }
}

/// Sends one message. Returns false once the client is gone.
async fn send_message(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize {:?}: {}", msg, e);
            return true;
        }
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::web::state::Backends;
    use bytes::Bytes;
    use course_catalog_core::{
        memory::{MemoryBlobStore, MemoryLocalStorage, MemoryMetadataStore},
        Catalog, CredentialStore, Group, LessonMutationService, NewLesson,
    };

    async fn memory_state() -> (AppState, Arc<MemoryMetadataStore>) {
        let config = Config::from_lookup(|key| {
            (key == "STORE_BACKEND").then(|| "memory".to_string())
        })
        .unwrap();
        let metadata = Arc::new(MemoryMetadataStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let credentials = CredentialStore::from_passwords([(Group::G1, "secret")]).unwrap();
        let state = AppState::build(
            Arc::new(config),
            Arc::new(Catalog::standard()),
            credentials,
            Backends {
                metadata: metadata.clone(),
                blobs: blobs.clone(),
                local_storage: Arc::new(MemoryLocalStorage::new()),
                fetcher: blobs,
                rasterizer: None,
            },
        )
        .await;
        (state, metadata)
    }

    async fn add(mutations: &LessonMutationService, subject_id: &str, name: &str) {
        mutations
            .add_lesson(NewLesson {
                chapter_id: "chapter5".to_string(),
                subject_id: subject_id.to_string(),
                group: Group::G1,
                file_name: name.to_string(),
                bytes: Bytes::from_static(b"%PDF-1.4"),
            })
            .await
            .unwrap();
    }

    fn subscribe(chapter_id: &str, subject_id: &str, group: &str) -> ClientMessage {
        ClientMessage::Subscribe {
            chapter_id: chapter_id.to_string(),
            subject_id: subject_id.to_string(),
            group: group.to_string(),
        }
    }

    fn error_kind(msg: ServerMessage) -> String {
        match msg {
            ServerMessage::Error { kind, .. } => kind,
            other => panic!("expected an error message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn subscribe_rejects_bad_requests() {
        let (state, _) = memory_state().await;

        let err = open_subscription(&state, subscribe("chapter5", "civ", "G9"), None).await.err().unwrap();
        assert_eq!(error_kind(err), "invalid_group");

        let err = open_subscription(&state, subscribe("chapter7", "civ", "G1"), None).await.err().unwrap();
        assert_eq!(error_kind(err), "unknown_scope");

        let err = open_subscription(&state, ClientMessage::SubscribeAdmin, None).await.err().unwrap();
        assert_eq!(error_kind(err), "not_authenticated");

        let err = open_subscription(&state, ClientMessage::SubscribeAdmin, Some("forged")).await.err().unwrap();
        assert_eq!(error_kind(err), "not_authenticated");

        let err = open_subscription(&state, ClientMessage::Unsubscribe, None).await.err().unwrap();
        assert_eq!(error_kind(err), "protocol");
    }

    #[tokio::test]
    async fn subscription_pushes_snapshots_after_changes() {
        let (state, _) = memory_state().await;
        let mut feed = open_subscription(&state, subscribe("chapter5", "civ", "G1"), None)
            .await
            .unwrap();
        assert!(feed.session.is_none());

        let first = event_message(feed.subscription.next_event().await.unwrap());
        assert_eq!(first, ServerMessage::Snapshot { lessons: vec![] });

        add(&state.mutations, "civ", "cours1.pdf").await;
        let lessons = loop {
            match event_message(feed.subscription.next_event().await.unwrap()) {
                ServerMessage::Snapshot { lessons } if !lessons.is_empty() => break lessons,
                _ => continue,
            }
        };
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0].name, "cours1.pdf");
    }

    #[tokio::test]
    async fn admin_feed_follows_the_client_session() {
        let (state, _) = memory_state().await;
        add(&state.mutations, "civ", "a.pdf").await;
        add(&state.mutations, "mrs", "b.pdf").await;
        let session = state.sessions.login(Group::G1, "secret").await.unwrap();

        let mut feed = open_subscription(&state, ClientMessage::SubscribeAdmin, Some(&session.token))
            .await
            .unwrap();
        match event_message(feed.subscription.next_event().await.unwrap()) {
            ServerMessage::Snapshot { lessons } => {
                let names: Vec<&str> = lessons.iter().map(|l| l.name.as_str()).collect();
                assert_eq!(names, vec!["b.pdf", "a.pdf"]);
            }
            other => panic!("expected a snapshot, got {:?}", other),
        }

        let feed_session = feed.session.clone().unwrap();
        assert!(!feed_session.is_ended());
        state.sessions.logout(&session.token).await;
        assert!(feed_session.is_ended());
        let err = open_subscription(&state, ClientMessage::SubscribeAdmin, Some(&session.token))
            .await
            .err()
            .unwrap();
        assert_eq!(error_kind(err), "not_authenticated");
    }

    #[tokio::test]
    async fn broken_store_is_reported_as_unavailable() {
        let (state, metadata) = memory_state().await;
        metadata.break_live_queries("connection lost");
        let mut feed = open_subscription(&state, subscribe("chapter5", "civ", "G1"), None)
            .await
            .unwrap();

        match event_message(feed.subscription.next_event().await.unwrap()) {
            ServerMessage::Unavailable { message } => {
                assert_eq!(message, "فشل في تحميل الدروس.")
            }
            other => panic!("expected unavailable, got {:?}", other),
        }
    }
}
