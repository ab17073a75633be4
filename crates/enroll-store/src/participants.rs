use rusqlite::params;
use tracing::instrument;

use enroll_core::{CompetitionId, NewParticipant, Participant, ParticipantId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{collect_rows, participant_from_row};

pub struct ParticipantRepo {
    db: Database,
}

impl ParticipantRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, participant), fields(name = %participant.name, age = participant.age))]
    pub fn add(&self, participant: &NewParticipant) -> Result<Participant, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO participants (name, age) VALUES (?1, ?2)",
                params![participant.name, participant.age],
            )?;
            Ok(Participant {
                id: conn.last_insert_rowid().into(),
                name: participant.name.clone(),
                age: participant.age,
            })
        })
    }

    #[instrument(skip(self, participant), fields(participant_id = %participant.id))]
    pub fn update(&self, participant: &Participant) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE participants SET name = ?1, age = ?2 WHERE id = ?3",
                params![participant.name, participant.age, participant.id.get()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("participant {}", participant.id)));
            }
            Ok(())
        })
    }

    /// Delete a participant and release their enrollments, decrementing the
    /// counter of every competition they were in.
    #[instrument(skip(self), fields(participant_id = %id))]
    pub fn remove(&self, id: ParticipantId) -> Result<(), StoreError> {
        self.db.with_tx(|tx| {
            tx.execute(
                "UPDATE competitions SET nr_of_participants = nr_of_participants - 1 \
                 WHERE id IN (SELECT competition_id FROM participant_competitions WHERE participant_id = ?1)",
                [id.get()],
            )?;
            let changed = tx.execute("DELETE FROM participants WHERE id = ?1", [id.get()])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("participant {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn get_all(&self) -> Result<Vec<Participant>, StoreError> {
        self.db.with_conn(|conn| {
            collect_rows(
                conn,
                "SELECT id, name, age FROM participants ORDER BY id",
                [],
                participant_from_row,
            )
        })
    }

    #[instrument(skip(self), fields(participant_id = %id))]
    pub fn get_by_id(&self, id: ParticipantId) -> Result<Option<Participant>, StoreError> {
        self.db.with_conn(|conn| {
            let found = collect_rows(
                conn,
                "SELECT id, name, age FROM participants WHERE id = ?1",
                [id.get()],
                participant_from_row,
            )?;
            Ok(found.into_iter().next())
        })
    }

    /// Participants enrolled in a competition, in enrollment order.
    #[instrument(skip(self), fields(competition_id = %competition_id))]
    pub fn get_for_competition(
        &self,
        competition_id: CompetitionId,
    ) -> Result<Vec<Participant>, StoreError> {
        self.db.with_conn(|conn| {
            collect_rows(
                conn,
                "SELECT p.id, p.name, p.age FROM participants p \
                 JOIN participant_competitions pc ON pc.participant_id = p.id \
                 WHERE pc.competition_id = ?1 ORDER BY pc.enrolled_at, p.id",
                [competition_id.get()],
                participant_from_row,
            )
        })
    }
}
