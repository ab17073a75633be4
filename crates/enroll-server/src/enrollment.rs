//! Enrollment rules: the two-competition cap and age-based routing.

use tracing::{info, instrument, warn};

use enroll_core::{
    select_competition, AgeCategory, Competition, CompetitionId, ParticipantId,
};
use enroll_store::{CompetitionRepo, Database, ParticipantRepo, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum EnrollError {
    #[error("Participant {participant_id} is already enrolled in {limit} competitions.")]
    CapacityExceeded { participant_id: ParticipantId, limit: usize },
    #[error("Participant {participant_id} is already enrolled in competition {competition_id}.")]
    AlreadyEnrolled {
        participant_id: ParticipantId,
        competition_id: CompetitionId,
    },
    #[error("{0} not found")]
    NotFound(String),
    #[error("no {competition_type} competition for age {age}")]
    NoMatchingCompetition { age: i32, competition_type: String },
    #[error(transparent)]
    Store(StoreError),
}

pub struct EnrollmentCoordinator {
    competitions: CompetitionRepo,
    participants: ParticipantRepo,
}

impl EnrollmentCoordinator {
    pub fn new(db: Database) -> Self {
        Self {
            competitions: CompetitionRepo::new(db.clone()),
            participants: ParticipantRepo::new(db),
        }
    }

    /// Enroll a participant in a competition.
    ///
    /// The count check and the insert happen atomically in the store, so
    /// concurrent calls for one participant yield at most two successes.
    #[instrument(skip(self), fields(participant_id = %participant_id, competition_id = %competition_id))]
    pub fn enroll(
        &self,
        participant_id: ParticipantId,
        competition_id: CompetitionId,
    ) -> Result<(), EnrollError> {
        match self.competitions.enroll_participant(participant_id, competition_id) {
            Ok(()) => {
                info!("participant enrolled");
                Ok(())
            }
            Err(StoreError::CapacityExceeded { limit, .. }) => {
                warn!(limit, "enrollment rejected, participant at capacity");
                Err(EnrollError::CapacityExceeded {
                    participant_id,
                    limit,
                })
            }
            Err(StoreError::Conflict(_)) => Err(EnrollError::AlreadyEnrolled {
                participant_id,
                competition_id,
            }),
            Err(StoreError::NotFound(what)) => Err(EnrollError::NotFound(what)),
            Err(e) => Err(EnrollError::Store(e)),
        }
    }

    /// First competition of `competition_type` in the category for `age`.
    /// `None` when the age has no category or nothing matches.
    pub fn competition_to_enroll_in(
        &self,
        age: i32,
        competition_type: &str,
    ) -> Result<Option<Competition>, EnrollError> {
        if AgeCategory::for_age(age).is_none() {
            return Ok(None);
        }
        let candidates = self
            .competitions
            .get_by_type(competition_type)
            .map_err(EnrollError::Store)?;
        Ok(select_competition(&candidates, age, competition_type).cloned())
    }

    /// Enroll a participant in one competition per requested type, routed by
    /// their age. Stops at the first failure; earlier enrollments stay.
    #[instrument(skip(self, types), fields(participant_id = %participant_id, types = types.len()))]
    pub fn enroll_in_types(
        &self,
        participant_id: ParticipantId,
        types: &[String],
    ) -> Result<Vec<CompetitionId>, EnrollError> {
        let participant = self
            .participants
            .get_by_id(participant_id)
            .map_err(EnrollError::Store)?
            .ok_or_else(|| EnrollError::NotFound(format!("participant {participant_id}")))?;

        let mut enrolled = Vec::with_capacity(types.len());
        for competition_type in types {
            let competition = self
                .competition_to_enroll_in(participant.age, competition_type)?
                .ok_or_else(|| EnrollError::NoMatchingCompetition {
                    age: participant.age,
                    competition_type: competition_type.clone(),
                })?;
            self.enroll(participant_id, competition.id)?;
            enrolled.push(competition.id);
        }
        Ok(enrolled)
    }
}
