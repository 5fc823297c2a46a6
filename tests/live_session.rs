//! End-to-end flow of a live session through the socket service layer, with virtual time.

use std::{sync::Arc, time::Duration};

use live_quiz_back::{
    config::AppConfig,
    dao::{
        job_journal::MemoryJobJournal,
        live_store::MemoryLiveStore,
        models::{Role, SessionStatus},
        session_store::MemorySessionStore,
    },
    dto::{
        events::ServerEvent,
        session::{CreateSessionRequest, CreateSessionResponse, QuestionInput},
        ws::{ClientMessage, JoinRequest, SubmitAnswerMessage},
    },
    services::{
        room_events::{
            EVENT_ANSWER_ACCEPTED, EVENT_ANSWER_RECEIVED, EVENT_ANSWER_UPDATE, EVENT_FINISHED,
            EVENT_JOINED, EVENT_LEADERBOARD_UPDATE, EVENT_QUESTION, EVENT_QUESTION_EXPIRED,
            EVENT_QUESTION_LIST, EVENT_RESULT_UPDATE, EVENT_STATUS_UPDATE, EVENT_STUDENT_RESULT,
        },
        session_service,
        websocket_service::{self, JoinedConnection},
    },
    state::{AppState, SharedState},
};
use serde_json::json;
use tokio::{sync::mpsc, time::sleep};
use uuid::Uuid;

struct Client {
    joined: JoinedConnection,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Client {
    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

fn names(events: &[ServerEvent]) -> Vec<&str> {
    events.iter().map(|event| event.event.as_str()).collect()
}

/// Events pushed by the background result jobs arrive whenever those jobs get scheduled.
fn without_results(events: Vec<ServerEvent>) -> Vec<ServerEvent> {
    events
        .into_iter()
        .filter(|event| event.event != EVENT_STUDENT_RESULT && event.event != EVENT_RESULT_UPDATE)
        .collect()
}

fn named<'a>(events: &'a [ServerEvent], name: &str) -> Vec<&'a ServerEvent> {
    events.iter().filter(|event| event.event == name).collect()
}

fn state() -> SharedState {
    AppState::new(
        AppConfig::default(),
        Arc::new(MemorySessionStore::new()),
        Arc::new(MemoryLiveStore::new(Duration::from_secs(3_600))),
    )
}

async fn create(state: &SharedState) -> CreateSessionResponse {
    let question = |id: &str, correct_index| QuestionInput {
        id: Some(id.into()),
        text: format!("{id}?"),
        options: vec!["a".into(), "b".into(), "c".into()],
        correct_index: Some(correct_index),
    };
    session_service::create_session(
        state,
        CreateSessionRequest {
            title: "Live".into(),
            questions: vec![question("q1", 0), question("q2", 2)],
            duration_seconds: Some(600),
        },
    )
    .await
    .unwrap()
}

async fn join(state: &SharedState, request: JoinRequest) -> Client {
    let connection = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    state.rooms().connect(connection, tx);
    let joined = websocket_service::handle_join(state, connection, request)
        .await
        .unwrap();
    Client { joined, rx }
}

async fn presenter(state: &SharedState, created: &CreateSessionResponse) -> Client {
    join(
        state,
        JoinRequest {
            session_id: Some(created.session_id),
            join_code: None,
            role: Role::Presenter,
            display_name: None,
            participant_id: None,
            presenter_token: Some(created.presenter_token.clone()),
        },
    )
    .await
}

async fn participant(state: &SharedState, code: &str, id: &str, name: &str) -> Client {
    join(
        state,
        JoinRequest {
            session_id: None,
            join_code: Some(code.to_owned()),
            role: Role::Participant,
            display_name: Some(name.into()),
            participant_id: Some(id.into()),
            presenter_token: None,
        },
    )
    .await
}

async fn send(state: &SharedState, client: &Client, message: ClientMessage) {
    websocket_service::handle_message(state, &client.joined, message)
        .await
        .unwrap();
}

fn answer(selected_index: u32) -> ClientMessage {
    ClientMessage::SubmitAnswer(SubmitAnswerMessage {
        question_id: None,
        selected_index,
        participant_id: None,
        display_name: None,
    })
}

#[tokio::test(start_paused = true)]
async fn question_round_reaches_every_room_once() {
    let state = state();
    let created = create(&state).await;
    let mut host = presenter(&state, &created).await;
    let mut ada = participant(&state, &created.join_code.to_lowercase(), "p1", "Ada").await;

    assert_eq!(names(&host.drain()), [EVENT_JOINED, EVENT_STATUS_UPDATE]);
    assert_eq!(names(&ada.drain()), [EVENT_JOINED, EVENT_STATUS_UPDATE]);

    send(&state, &host, ClientMessage::ChangeStatus { status: SessionStatus::Live }).await;
    send(
        &state,
        &host,
        ClientMessage::OpenQuestion {
            question_id: "q1".into(),
            duration_seconds: Some(5),
        },
    )
    .await;
    send(&state, &ada, answer(0)).await;

    let host_events = without_results(host.drain());
    assert_eq!(
        names(&host_events),
        [EVENT_STATUS_UPDATE, EVENT_QUESTION, EVENT_ANSWER_UPDATE, EVENT_ANSWER_RECEIVED]
    );
    assert_eq!(host_events[2].data["counts"], json!([1, 0, 0]));
    assert_eq!(host_events[2].data["last"], 0);
    assert_eq!(host_events[3].data["correct"], true);

    let ada_events = ada.drain();
    assert!(names(&ada_events).contains(&EVENT_ANSWER_ACCEPTED));

    // The same connection answering again is a duplicate and leaves the tally alone.
    let duplicate = websocket_service::handle_message(&state, &ada.joined, answer(1)).await;
    assert!(duplicate.is_err());
    assert!(without_results(host.drain()).is_empty());

    // Score job and the debounced leaderboard broadcast run in the background.
    sleep(Duration::from_secs(2)).await;
    let background = host.drain();
    let leaderboard = named(&background, EVENT_LEADERBOARD_UPDATE);
    assert_eq!(leaderboard.len(), 1);
    assert_eq!(leaderboard[0].data["leaderboard"][0]["score"], 10);
    assert_eq!(leaderboard[0].data["leaderboard"][0]["display_name"], "Ada");
    let results = named(&background, EVENT_RESULT_UPDATE);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].data["results"]["total_submissions"], 1);
    assert_eq!(results[0].data["results"]["questions"][0]["counts"], json!([1, 0, 0]));
    let student = named(&background, EVENT_STUDENT_RESULT);
    assert_eq!(student.len(), 1);
    assert_eq!(student[0].data["participant_key"], "id:p1");
    assert_eq!(student[0].data["score"], 10);
    assert_eq!(student[0].data["answers"][0]["correct"], true);

    // A late joiner catches up on status, question, tally and ranking in that order.
    let mut late = participant(&state, &created.join_code, "p2", "Grace").await;
    let catch_up = late.drain();
    assert_eq!(
        names(&catch_up),
        [
            EVENT_JOINED,
            EVENT_STATUS_UPDATE,
            EVENT_QUESTION,
            EVENT_ANSWER_UPDATE,
            EVENT_LEADERBOARD_UPDATE
        ]
    );
    assert_eq!(catch_up[1].data["status"], "live");
    assert_eq!(catch_up[3].data["counts"], json!([1, 0, 0]));
    assert!(catch_up[2].data["question"].get("correct_index").is_none());

    sleep(Duration::from_secs(5)).await;
    for client in [&mut host, &mut ada, &mut late] {
        let expired: Vec<_> = client
            .drain()
            .into_iter()
            .filter(|event| event.event == EVENT_QUESTION_EXPIRED)
            .collect();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].data["question_id"], "q1");
    }

    send(&state, &host, ClientMessage::ChangeStatus { status: SessionStatus::Finished }).await;
    assert_eq!(names(&ada.drain()), [EVENT_STATUS_UPDATE, EVENT_FINISHED]);
    let rejected = websocket_service::handle_message(
        &state,
        &late.joined,
        ClientMessage::SubmitAnswer(SubmitAnswerMessage {
            question_id: Some("q2".into()),
            selected_index: 2,
            participant_id: None,
            display_name: None,
        }),
    )
    .await;
    assert!(rejected.is_err());
}

#[tokio::test(start_paused = true)]
async fn disconnect_withdraws_the_vote_from_the_open_round() {
    let state = state();
    let created = create(&state).await;
    let mut host = presenter(&state, &created).await;
    let ada = participant(&state, &created.join_code, "p1", "Ada").await;

    send(
        &state,
        &host,
        ClientMessage::OpenQuestion {
            question_id: "q2".into(),
            duration_seconds: None,
        },
    )
    .await;
    send(&state, &ada, answer(2)).await;
    sleep(Duration::from_secs(2)).await;
    host.drain();

    websocket_service::cleanup_connection(&state, &ada.joined).await;
    state.rooms().disconnect(ada.joined.connection);

    let events = host.drain();
    assert_eq!(names(&events), [EVENT_ANSWER_UPDATE]);
    assert_eq!(events[0].data["counts"], json!([0, 0, 0]));
    assert!(events[0].data["last"].is_null());

    // The durable answer survives the disconnect.
    let stats = session_service::results(&state, created.session_id).await.unwrap();
    assert_eq!(stats.total_submissions, 1);
    assert_eq!(stats.questions[1].counts, [0, 0, 1]);
}

#[tokio::test]
async fn participants_cannot_drive_the_session() {
    let state = state();
    let created = create(&state).await;
    let ada = participant(&state, &created.join_code, "p1", "Ada").await;

    let result = websocket_service::handle_message(
        &state,
        &ada.joined,
        ClientMessage::PublishQuestionList,
    )
    .await;
    assert!(result.is_err());

    let forged = websocket_service::handle_join(
        &state,
        Uuid::new_v4(),
        JoinRequest {
            session_id: Some(created.session_id),
            join_code: None,
            role: Role::Presenter,
            display_name: None,
            participant_id: None,
            presenter_token: Some("guess".into()),
        },
    )
    .await;
    assert!(forged.is_err());
}

#[tokio::test]
async fn late_joiner_in_list_mode_sees_questions_added_later() {
    let state = state();
    let created = create(&state).await;
    let host = presenter(&state, &created).await;
    send(&state, &host, ClientMessage::PublishQuestionList).await;

    let session = session_service::find_session(&state, created.session_id)
        .await
        .unwrap();
    session_service::add_question(
        &state,
        &session,
        QuestionInput {
            id: Some("q3".into()),
            text: "q3?".into(),
            options: vec!["a".into(), "b".into()],
            correct_index: Some(1),
        },
    )
    .await
    .unwrap();

    let mut late = participant(&state, &created.join_code, "p9", "Late").await;
    let catch_up = late.drain();
    let lists = named(&catch_up, EVENT_QUESTION_LIST);
    assert_eq!(lists.len(), 1);
    let questions = lists[0].data["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 3);
    assert_eq!(questions[2]["id"], "q3");
    assert!(questions[2].get("correct_index").is_none());
}

#[tokio::test(start_paused = true)]
async fn question_timer_survives_a_restart() {
    let sessions = Arc::new(MemorySessionStore::new());
    let live = Arc::new(MemoryLiveStore::new(Duration::from_secs(3_600)));
    let journal = Arc::new(MemoryJobJournal::new());
    let config = || AppConfig {
        shutdown_grace: Duration::from_millis(100),
        ..AppConfig::default()
    };

    let first = AppState::with_journal(config(), sessions.clone(), live.clone(), journal.clone());
    let created = create(&first).await;
    let host = presenter(&first, &created).await;
    send(&first, &host, ClientMessage::ChangeStatus { status: SessionStatus::Live }).await;
    send(
        &first,
        &host,
        ClientMessage::OpenQuestion {
            question_id: "q1".into(),
            duration_seconds: Some(5),
        },
    )
    .await;
    sleep(Duration::from_secs(1)).await;
    first.jobs().shutdown().await;
    assert_eq!(journal.len(), 1);

    let second = AppState::with_journal(config(), sessions, live, journal.clone());
    let mut ada = participant(&second, &created.join_code, "p1", "Ada").await;
    sleep(Duration::from_secs(6)).await;

    let events = ada.drain();
    let expired = named(&events, EVENT_QUESTION_EXPIRED);
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].data["question_id"], "q1");
    assert!(journal.is_empty());
}
