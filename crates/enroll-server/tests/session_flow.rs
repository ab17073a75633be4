//! End-to-end: a real listener on an ephemeral port with several clients.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;

use enroll_core::{AgeCategory, Competition, CompetitionFilter, CompetitionId};
use enroll_server::codec::{read_envelope, write_envelope, DEFAULT_MAX_FRAME_LENGTH};
use enroll_server::message_type as mt;
use enroll_server::{EnrollClient, EnrollServer, Envelope, Reply, ServerConfig, ServerHandle};
use enroll_store::{seed_competitions, CompetitionRepo, Database, ParticipantRepo};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    handle: ServerHandle,
    db: Database,
}

async fn start_server() -> Harness {
    let db = Database::in_memory().unwrap();
    seed_competitions(&CompetitionRepo::new(db.clone())).unwrap();
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let handle = EnrollServer::new(config, db.clone()).start().await.unwrap();
    Harness { handle, db }
}

async fn connect(h: &Harness) -> (EnrollClient, UnboundedReceiver<Envelope>) {
    let expected = h.handle.registry().connection_count() + 1;
    let conn = EnrollClient::connect_with_channel(h.handle.local_addr()).await.unwrap();
    wait_for_connections(h, expected).await;
    conn
}

async fn wait_for_connections(h: &Harness, expected: usize) {
    tokio::time::timeout(WAIT, async {
        while h.handle.registry().connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection count never reached expected value");
}

async fn next(rx: &mut UnboundedReceiver<Envelope>) -> Envelope {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for envelope")
        .expect("receiver closed")
}

/// Next envelope of the given type, skipping anything else (e.g. UPDATEs).
async fn next_of(rx: &mut UnboundedReceiver<Envelope>, kind: &str) -> Envelope {
    loop {
        let env = next(rx).await;
        if env.message_type == kind {
            return env;
        }
    }
}

fn competitions(env: &Envelope) -> Vec<Competition> {
    match Reply::decode(env).unwrap() {
        Reply::AllCompetitions(list) | Reply::FilteredCompetitions(list) => list,
        other => panic!("not a competition list: {other:?}"),
    }
}

#[tokio::test]
async fn add_participant_replies_to_sender_and_updates_everyone() {
    let h = start_server().await;
    let (alice, mut alice_rx) = connect(&h).await;
    let (_bob, mut bob_rx) = connect(&h).await;

    alice.add_participant("Ana", 9).await.unwrap();

    let reply = next(&mut alice_rx).await;
    assert_eq!(reply.message_type, mt::ADD_PARTICIPANT_REPLY);
    let Reply::ParticipantAdded(p) = Reply::decode(&reply).unwrap() else {
        panic!("unexpected reply");
    };
    assert_eq!(p.name, "Ana");
    assert_eq!(p.age, 9);
    assert!(p.id.get() > 0);

    assert_eq!(next(&mut alice_rx).await, Envelope::empty(mt::UPDATE));
    assert_eq!(next(&mut bob_rx).await, Envelope::empty(mt::UPDATE));

    h.handle.shutdown().await;
}

#[tokio::test]
async fn invalid_participant_gets_error_and_no_update() {
    let h = start_server().await;
    let (alice, mut alice_rx) = connect(&h).await;

    alice.add_participant("", 9).await.unwrap();
    let reply = next(&mut alice_rx).await;
    assert_eq!(reply.message_type, mt::ERROR);

    // Session is still usable and nothing was broadcast in between.
    alice.get_all_participants().await.unwrap();
    let reply = next(&mut alice_rx).await;
    assert_eq!(reply, Envelope::new(mt::GET_ALL_PARTICIPANTS_REPLY, "[]"));

    h.handle.shutdown().await;
}

#[tokio::test]
async fn enroll_over_capacity_is_rejected_without_side_effects() {
    let h = start_server().await;
    let (client, mut rx) = connect(&h).await;

    client.add_participant("Ana", 9).await.unwrap();
    let Reply::ParticipantAdded(p) = Reply::decode(&next_of(&mut rx, mt::ADD_PARTICIPANT_REPLY).await).unwrap() else {
        panic!("unexpected reply");
    };

    for c in [1, 2] {
        client.enroll(p.id, CompetitionId::new(c)).await.unwrap();
        assert_eq!(next(&mut rx).await.message_type, mt::UPDATE);
    }
    let comps = CompetitionRepo::new(h.db.clone());
    let before = comps.get_by_id(CompetitionId::new(4)).unwrap().unwrap();

    client.enroll(p.id, before.id).await.unwrap();
    let reply = next_of(&mut rx, mt::ERROR).await;
    assert!(reply.payload.contains("already enrolled in 2"), "{}", reply.payload);

    let after = comps.get_by_id(before.id).unwrap().unwrap();
    assert_eq!(after.nr_of_participants, before.nr_of_participants);
    assert_eq!(comps.enrollment_count(p.id).unwrap(), 2);

    h.handle.shutdown().await;
}

#[tokio::test]
async fn concurrent_enrolls_from_many_clients_allow_two() {
    let h = start_server().await;
    let participant = ParticipantRepo::new(h.db.clone())
        .add(&enroll_core::NewParticipant {
            name: "Ana".into(),
            age: 9,
        })
        .unwrap();

    let targets: Vec<CompetitionId> = CompetitionRepo::new(h.db.clone())
        .get_all()
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .take(5)
        .collect();

    let mut clients = Vec::new();
    for _ in &targets {
        clients.push(connect(&h).await);
    }

    let mut tasks = Vec::new();
    for ((client, _), cid) in clients.iter().zip(&targets) {
        tasks.push(client.enroll(participant.id, *cid));
    }
    for result in futures::future::join_all(tasks).await {
        result.unwrap();
    }

    let mut errors = 0;
    for (_, rx) in &mut clients {
        // Each client sees UPDATEs from successes and at most one ERROR of its own.
        while let Ok(Some(env)) = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await {
            if env.message_type == mt::ERROR {
                errors += 1;
            }
        }
    }
    assert_eq!(errors, targets.len() - 2);

    let comps = CompetitionRepo::new(h.db.clone());
    assert_eq!(comps.enrollment_count(participant.id).unwrap(), 2);
    let total: i64 = comps.get_all().unwrap().iter().map(|c| c.nr_of_participants).sum();
    assert_eq!(total, 2);

    h.handle.shutdown().await;
}

#[tokio::test]
async fn filter_competitions_by_type_and_age() {
    let h = start_server().await;
    let (client, mut rx) = connect(&h).await;

    client.filter_competitions(CompetitionFilter::All).await.unwrap();
    let all = competitions(&next(&mut rx).await);
    assert_eq!(all.len(), 9);

    client
        .filter_competitions(CompetitionFilter::ByType("Drawing".into()))
        .await
        .unwrap();
    let drawing = competitions(&next(&mut rx).await);
    assert_eq!(drawing.len(), 3);
    assert!(drawing.iter().all(|c| c.competition_type == "Drawing"));

    client
        .send(mt::FILTER_COMPETITIONS, r#"{"type":"All competitions","age":"12-15 years old"}"#)
        .await
        .unwrap();
    let senior = competitions(&next(&mut rx).await);
    assert_eq!(senior.len(), 3);
    assert!(senior.iter().all(|c| c.age_category == AgeCategory::Senior));

    client
        .filter_competitions(CompetitionFilter::ByTypeAndCategory("Poetry".into(), AgeCategory::Young))
        .await
        .unwrap();
    let one = competitions(&next(&mut rx).await);
    assert_eq!(one.len(), 1);

    client
        .send(mt::FILTER_COMPETITIONS, r#"{"type":"Poetry","age":"16-18 years old"}"#)
        .await
        .unwrap();
    let reply = next(&mut rx).await;
    assert_eq!(reply, Envelope::new(mt::FILTER_COMPETITIONS_REPLY, "[]"));

    h.handle.shutdown().await;
}

#[tokio::test]
async fn auth_user_replies_null_for_unknown() {
    let h = start_server().await;
    enroll_store::UserRepo::new(h.db.clone())
        .add(&enroll_core::Credentials {
            user_name: "admin".into(),
            password: "pw".into(),
        })
        .unwrap();
    let (client, mut rx) = connect(&h).await;

    client.authenticate("admin", "pw").await.unwrap();
    let ok = next(&mut rx).await;
    assert_eq!(ok.message_type, mt::AUTH_USER_REPLY);
    assert!(ok.payload.contains("\"userName\":\"admin\""));
    assert!(!ok.payload.contains("pw"));

    client.authenticate("admin", "wrong").await.unwrap();
    assert_eq!(next(&mut rx).await, Envelope::new(mt::AUTH_USER_REPLY, "null"));

    h.handle.shutdown().await;
}

#[tokio::test]
async fn participants_for_competition_after_enroll() {
    let h = start_server().await;
    let (client, mut rx) = connect(&h).await;

    client.add_participant("Bo", 12).await.unwrap();
    let Reply::ParticipantAdded(p) = Reply::decode(&next_of(&mut rx, mt::ADD_PARTICIPANT_REPLY).await).unwrap() else {
        panic!("unexpected reply");
    };
    let target = CompetitionId::new(3);
    client.enroll(p.id, target).await.unwrap();
    client.get_participants_for_competition(target).await.unwrap();

    let env = next_of(&mut rx, mt::GET_PARTICIPANTS_FOR_COMP_REPLY).await;
    let Reply::ParticipantsForCompetition(list) = Reply::decode(&env).unwrap() else {
        panic!("unexpected reply");
    };
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, p.id);

    h.handle.shutdown().await;
}

#[tokio::test]
async fn rejected_enroll_error_precedes_the_next_reply() {
    let h = start_server().await;
    let (client, mut rx) = connect(&h).await;
    let (other, mut other_rx) = connect(&h).await;

    client.add_participant("Ana", 9).await.unwrap();
    let Reply::ParticipantAdded(p) = Reply::decode(&next_of(&mut rx, mt::ADD_PARTICIPANT_REPLY).await).unwrap() else {
        panic!("unexpected reply");
    };
    for c in [1, 2] {
        client.enroll(p.id, CompetitionId::new(c)).await.unwrap();
    }

    // Another client's change puts an UPDATE on this connection too.
    other.add_participant("Bo", 12).await.unwrap();
    next_of(&mut other_rx, mt::ADD_PARTICIPANT_REPLY).await;

    let target = CompetitionId::new(4);
    client.enroll(p.id, target).await.unwrap();
    client.get_participants_for_competition(target).await.unwrap();

    let mut replies = Vec::new();
    while replies.len() < 2 {
        let env = next(&mut rx).await;
        if env.message_type != mt::UPDATE {
            replies.push(env);
        }
    }
    assert_eq!(replies[0].message_type, mt::ERROR);
    let Reply::ParticipantsForCompetition(list) = Reply::decode(&replies[1]).unwrap() else {
        panic!("unexpected reply: {:?}", replies[1]);
    };
    assert!(list.iter().all(|q| q.id != p.id));

    h.handle.shutdown().await;
}

#[tokio::test]
async fn closed_peer_is_dropped_from_broadcast() {
    let h = start_server().await;
    let (alice, mut alice_rx) = connect(&h).await;
    let (bob, _bob_rx) = connect(&h).await;
    let (_carol, mut carol_rx) = connect(&h).await;
    assert_eq!(h.handle.registry().connection_count(), 3);

    bob.close().await.unwrap();
    wait_for_connections(&h, 2).await;

    alice.add_participant("Ana", 9).await.unwrap();
    assert_eq!(next_of(&mut alice_rx, mt::UPDATE).await, Envelope::empty(mt::UPDATE));
    assert_eq!(next(&mut carol_rx).await, Envelope::empty(mt::UPDATE));

    h.handle.shutdown().await;
}

#[tokio::test]
async fn broadcast_survives_an_abruptly_dropped_socket() {
    let h = start_server().await;
    let (alice, mut alice_rx) = connect(&h).await;
    let (_bob, mut bob_rx) = connect(&h).await;
    let (_carol, mut carol_rx) = connect(&h).await;
    let dead = TcpStream::connect(h.handle.local_addr()).await.unwrap();
    wait_for_connections(&h, 4).await;

    // No goodbye: the server may still hold this channel when broadcasting.
    drop(dead);
    for i in 0..3 {
        alice.add_participant(&format!("Kid {i}"), 10).await.unwrap();
    }

    for rx in [&mut alice_rx, &mut bob_rx, &mut carol_rx] {
        for _ in 0..3 {
            assert_eq!(next_of(rx, mt::UPDATE).await, Envelope::empty(mt::UPDATE));
        }
    }
    wait_for_connections(&h, 3).await;

    h.handle.shutdown().await;
}

#[tokio::test]
async fn unknown_type_is_ignored() {
    let h = start_server().await;
    let (client, mut rx) = connect(&h).await;

    client.send("SELF_DESTRUCT", "now").await.unwrap();
    client.get_all_users().await.unwrap();
    assert_eq!(next(&mut rx).await.message_type, mt::GET_ALL_USERS_REPLY);

    h.handle.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_closes_only_that_session() {
    let h = start_server().await;
    let (good, mut good_rx) = connect(&h).await;

    let mut raw = TcpStream::connect(h.handle.local_addr()).await.unwrap();
    wait_for_connections(&h, 2).await;
    raw.write_all(&3u32.to_be_bytes()).await.unwrap();
    raw.write_all(b"???").await.unwrap();

    // Server closes the bad connection.
    let eof = tokio::time::timeout(WAIT, read_envelope(&mut raw, DEFAULT_MAX_FRAME_LENGTH))
        .await
        .unwrap();
    assert!(matches!(eof, Ok(None) | Err(_)));
    wait_for_connections(&h, 1).await;

    good.get_all_competitions().await.unwrap();
    assert_eq!(competitions(&next(&mut good_rx).await).len(), 9);

    h.handle.shutdown().await;
}

#[tokio::test]
async fn raw_enroll_payload_errors() {
    let h = start_server().await;
    let mut raw = TcpStream::connect(h.handle.local_addr()).await.unwrap();

    write_envelope(&mut raw, &Envelope::new(mt::ENROLL_PARTICIPANT, "5;12")).await.unwrap();
    let reply = read_envelope(&mut raw, DEFAULT_MAX_FRAME_LENGTH).await.unwrap().unwrap();
    assert_eq!(reply.message_type, mt::ERROR);
    assert!(reply.payload.contains("participantID,competitionID"));

    write_envelope(&mut raw, &Envelope::new(mt::ENROLL_PARTICIPANT, "5,12")).await.unwrap();
    let reply = read_envelope(&mut raw, DEFAULT_MAX_FRAME_LENGTH).await.unwrap().unwrap();
    assert_eq!(reply.message_type, mt::ERROR);
    assert!(reply.payload.contains("not found"));

    let registry = Arc::clone(h.handle.registry());
    h.handle.shutdown().await;
    assert_eq!(registry.connection_count(), 0);
}
