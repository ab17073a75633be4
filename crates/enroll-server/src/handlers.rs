//! Request handlers. One function per request kind; each returns the reply
//! for the caller and whether every client should be told to refresh.

use tracing::{error, info, warn};

use enroll_core::validation::validate_participant;
use enroll_core::{CompetitionFilter, CompetitionId, Credentials, NewParticipant, ParticipantId};
use enroll_store::{CompetitionRepo, Database, ParticipantRepo, StoreError, UserRepo};

use crate::enrollment::{EnrollError, EnrollmentCoordinator};
use crate::protocol::{Reply, Request};

/// Error text for a rejected `ADD_PARTICIPANT`.
pub const INVALID_PARTICIPANT: &str = "Invalid participant data";

/// What a session should do after handling one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub reply: Option<Reply>,
    pub broadcast: bool,
}

impl HandlerOutcome {
    fn reply(reply: Reply) -> Self {
        Self {
            reply: Some(reply),
            broadcast: false,
        }
    }

    fn reply_and_broadcast(reply: Reply) -> Self {
        Self {
            reply: Some(reply),
            broadcast: true,
        }
    }

    fn broadcast_only() -> Self {
        Self {
            reply: None,
            broadcast: true,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::reply(Reply::Error(message.into()))
    }
}

/// Shared state handed to every session.
pub struct HandlerState {
    pub participants: ParticipantRepo,
    pub competitions: CompetitionRepo,
    pub users: UserRepo,
    pub enrollment: EnrollmentCoordinator,
}

impl HandlerState {
    pub fn new(db: Database) -> Self {
        Self {
            participants: ParticipantRepo::new(db.clone()),
            competitions: CompetitionRepo::new(db.clone()),
            users: UserRepo::new(db.clone()),
            enrollment: EnrollmentCoordinator::new(db),
        }
    }

    pub fn handle(&self, request: Request) -> HandlerOutcome {
        match request {
            Request::AddParticipant(p) => self.add_participant(p),
            Request::GetParticipantsForCompetition(id) => self.participants_for_competition(id),
            Request::GetAllCompetitions => {
                store_reply(self.competitions.get_all(), Reply::AllCompetitions)
            }
            Request::GetAllParticipants => {
                store_reply(self.participants.get_all(), Reply::AllParticipants)
            }
            Request::GetAllUsers => store_reply(self.users.get_all(), Reply::AllUsers),
            Request::AuthUser(creds) => self.auth_user(&creds),
            Request::EnrollParticipant {
                participant_id,
                competition_id,
            } => self.enroll(participant_id, competition_id),
            Request::FilterCompetitions(filter) => self.filter(&filter),
        }
    }

    fn add_participant(&self, participant: NewParticipant) -> HandlerOutcome {
        if let Err(e) = validate_participant(&participant) {
            warn!(name = %participant.name, age = participant.age, error = %e, "invalid participant data");
            return HandlerOutcome::error(format!("{INVALID_PARTICIPANT}: {e}"));
        }
        match self.participants.add(&participant) {
            Ok(created) => {
                info!(participant_id = %created.id, "participant added");
                HandlerOutcome::reply_and_broadcast(Reply::ParticipantAdded(created))
            }
            Err(e) => store_failure(e),
        }
    }

    fn participants_for_competition(&self, id: CompetitionId) -> HandlerOutcome {
        store_reply(
            self.participants.get_for_competition(id),
            Reply::ParticipantsForCompetition,
        )
    }

    fn auth_user(&self, credentials: &Credentials) -> HandlerOutcome {
        store_reply(self.users.authenticate(credentials), Reply::AuthUser)
    }

    fn enroll(&self, participant_id: ParticipantId, competition_id: CompetitionId) -> HandlerOutcome {
        match self.enrollment.enroll(participant_id, competition_id) {
            Ok(()) => HandlerOutcome::broadcast_only(),
            Err(EnrollError::Store(e)) => store_failure(e),
            Err(e) => HandlerOutcome::error(e.to_string()),
        }
    }

    fn filter(&self, filter: &CompetitionFilter) -> HandlerOutcome {
        store_reply(self.competitions.filter(filter), Reply::FilteredCompetitions)
    }
}

fn store_reply<T>(result: Result<T, StoreError>, wrap: impl FnOnce(T) -> Reply) -> HandlerOutcome {
    match result {
        Ok(value) => HandlerOutcome::reply(wrap(value)),
        Err(e) => store_failure(e),
    }
}

fn store_failure(e: StoreError) -> HandlerOutcome {
    error!(error = %e, "store operation failed");
    HandlerOutcome::error(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use enroll_core::AgeCategory;
    use enroll_store::seed_competitions;

    fn state() -> HandlerState {
        let db = Database::in_memory().unwrap();
        seed_competitions(&CompetitionRepo::new(db.clone())).unwrap();
        HandlerState::new(db)
    }

    fn add(state: &HandlerState, name: &str, age: i32) -> HandlerOutcome {
        state.handle(Request::AddParticipant(NewParticipant { name: name.into(), age }))
    }

    #[test]
    fn add_participant_replies_and_broadcasts() {
        let state = state();
        let outcome = add(&state, "Ana", 9);
        assert!(outcome.broadcast);
        let Some(Reply::ParticipantAdded(p)) = outcome.reply else {
            panic!("unexpected reply: {:?}", outcome.reply);
        };
        assert_eq!(p.name, "Ana");
        assert_eq!(p.age, 9);
    }

    #[test]
    fn invalid_participant_is_error_without_broadcast() {
        let state = state();
        for (name, age) in [("", 9), ("Ana", 4), ("Ana", 16)] {
            let outcome = add(&state, name, age);
            assert!(!outcome.broadcast);
            assert!(matches!(&outcome.reply, Some(Reply::Error(m)) if m.starts_with(INVALID_PARTICIPANT)));
        }
        assert!(state.participants.get_all().unwrap().is_empty());
    }

    #[test]
    fn enroll_success_broadcasts_without_reply() {
        let state = state();
        add(&state, "Ana", 9);
        let outcome = state.handle(Request::EnrollParticipant {
            participant_id: ParticipantId::new(1),
            competition_id: CompetitionId::new(1),
        });
        assert_eq!(outcome, HandlerOutcome::broadcast_only());
    }

    #[test]
    fn enroll_over_capacity_is_error() {
        let state = state();
        add(&state, "Ana", 9);
        let p = ParticipantId::new(1);
        for c in [1, 2] {
            state.handle(Request::EnrollParticipant {
                participant_id: p,
                competition_id: CompetitionId::new(c),
            });
        }
        let outcome = state.handle(Request::EnrollParticipant {
            participant_id: p,
            competition_id: CompetitionId::new(3),
        });
        assert!(!outcome.broadcast);
        assert!(matches!(&outcome.reply, Some(Reply::Error(m)) if m.contains("already enrolled in 2")));
        let third = state.competitions.get_by_id(CompetitionId::new(3)).unwrap().unwrap();
        assert_eq!(third.nr_of_participants, 0);
    }

    #[test]
    fn participants_for_competition_lists_enrolled() {
        let state = state();
        add(&state, "Ana", 9);
        add(&state, "Bo", 10);
        state.handle(Request::EnrollParticipant {
            participant_id: ParticipantId::new(2),
            competition_id: CompetitionId::new(4),
        });
        let outcome = state.handle(Request::GetParticipantsForCompetition(CompetitionId::new(4)));
        let Some(Reply::ParticipantsForCompetition(list)) = outcome.reply else {
            panic!("unexpected reply");
        };
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "Bo");
    }

    #[test]
    fn filter_by_type_and_category() {
        let state = state();
        let all = state.handle(Request::FilterCompetitions(CompetitionFilter::All));
        assert!(matches!(all.reply, Some(Reply::FilteredCompetitions(ref l)) if l.len() == 9));

        let drawing = state.handle(Request::FilterCompetitions(CompetitionFilter::ByType("Drawing".into())));
        let Some(Reply::FilteredCompetitions(list)) = drawing.reply else {
            panic!("unexpected reply");
        };
        assert_eq!(list.len(), 3);
        assert!(list.iter().all(|c| c.competition_type == "Drawing"));

        let young = state.handle(Request::FilterCompetitions(CompetitionFilter::ByCategory(AgeCategory::Young)));
        assert!(matches!(young.reply, Some(Reply::FilteredCompetitions(ref l)) if l.len() == 3));
    }

    #[test]
    fn auth_user_matches_or_none() {
        let state = state();
        let creds = Credentials {
            user_name: "admin".into(),
            password: "pw".into(),
        };
        state.users.add(&creds).unwrap();

        let ok = state.handle(Request::AuthUser(creds.clone()));
        assert!(matches!(ok.reply, Some(Reply::AuthUser(Some(ref u))) if u.user_name == "admin"));

        let bad = state.handle(Request::AuthUser(Credentials {
            password: "nope".into(),
            ..creds
        }));
        assert_eq!(bad.reply, Some(Reply::AuthUser(None)));
        assert!(!bad.broadcast);
    }

    #[test]
    fn read_requests_do_not_broadcast() {
        let state = state();
        for request in [Request::GetAllCompetitions, Request::GetAllParticipants, Request::GetAllUsers] {
            assert!(!state.handle(request).broadcast);
        }
    }
}
