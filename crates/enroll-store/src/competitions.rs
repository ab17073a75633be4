use chrono::Utc;
use rusqlite::{params, ErrorCode, OptionalExtension};
use tracing::{debug, instrument};

use enroll_core::{
    AgeCategory, Competition, CompetitionFilter, CompetitionId, NewCompetition, ParticipantId,
    MAX_ENROLLMENTS_PER_PARTICIPANT,
};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{collect_rows, competition_from_row, COMPETITION_COLUMNS};

pub struct CompetitionRepo {
    db: Database,
}

impl CompetitionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, competition), fields(kind = %competition.competition_type))]
    pub fn add(&self, competition: &NewCompetition) -> Result<Competition, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO competitions (type, age_category, nr_of_participants) VALUES (?1, ?2, 0)",
                params![competition.competition_type, competition.age_category.label()],
            )?;
            Ok(Competition {
                id: conn.last_insert_rowid().into(),
                competition_type: competition.competition_type.clone(),
                age_category: competition.age_category,
                nr_of_participants: 0,
            })
        })
    }

    #[instrument(skip(self, competition), fields(competition_id = %competition.id))]
    pub fn update(&self, competition: &Competition) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE competitions SET type = ?1, age_category = ?2, nr_of_participants = ?3 WHERE id = ?4",
                params![
                    competition.competition_type,
                    competition.age_category.label(),
                    competition.nr_of_participants,
                    competition.id.get()
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("competition {}", competition.id)));
            }
            Ok(())
        })
    }

    /// Delete a competition. Its enrollment facts go with it.
    #[instrument(skip(self), fields(competition_id = %id))]
    pub fn remove(&self, id: CompetitionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM competitions WHERE id = ?1", [id.get()])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("competition {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn get_all(&self) -> Result<Vec<Competition>, StoreError> {
        self.db.with_conn(|conn| {
            collect_rows(
                conn,
                &format!("SELECT {COMPETITION_COLUMNS} FROM competitions ORDER BY id"),
                [],
                competition_from_row,
            )
        })
    }

    #[instrument(skip(self), fields(competition_id = %id))]
    pub fn get_by_id(&self, id: CompetitionId) -> Result<Option<Competition>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMPETITION_COLUMNS} FROM competitions WHERE id = ?1"
            ))?;
            let mut rows = stmt.query([id.get()])?;
            match rows.next()? {
                Some(row) => Ok(Some(competition_from_row(row)?)),
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self))]
    pub fn get_by_type(&self, competition_type: &str) -> Result<Vec<Competition>, StoreError> {
        self.db.with_conn(|conn| {
            collect_rows(
                conn,
                &format!("SELECT {COMPETITION_COLUMNS} FROM competitions WHERE type = ?1 ORDER BY id"),
                [competition_type],
                competition_from_row,
            )
        })
    }

    #[instrument(skip(self), fields(category = %category))]
    pub fn get_by_age(&self, category: AgeCategory) -> Result<Vec<Competition>, StoreError> {
        self.db.with_conn(|conn| {
            collect_rows(
                conn,
                &format!(
                    "SELECT {COMPETITION_COLUMNS} FROM competitions WHERE age_category = ?1 ORDER BY id"
                ),
                [category.label()],
                competition_from_row,
            )
        })
    }

    #[instrument(skip(self), fields(category = %category))]
    pub fn get_by_type_and_age(
        &self,
        competition_type: &str,
        category: AgeCategory,
    ) -> Result<Vec<Competition>, StoreError> {
        self.db.with_conn(|conn| {
            collect_rows(
                conn,
                &format!(
                    "SELECT {COMPETITION_COLUMNS} FROM competitions \
                     WHERE type = ?1 AND age_category = ?2 ORDER BY id"
                ),
                params![competition_type, category.label()],
                competition_from_row,
            )
        })
    }

    pub fn filter(&self, filter: &CompetitionFilter) -> Result<Vec<Competition>, StoreError> {
        match filter {
            CompetitionFilter::All => self.get_all(),
            CompetitionFilter::ByType(t) => self.get_by_type(t),
            CompetitionFilter::ByCategory(c) => self.get_by_age(*c),
            CompetitionFilter::ByTypeAndCategory(t, c) => self.get_by_type_and_age(t, *c),
            CompetitionFilter::UnknownCategory { .. } => Ok(Vec::new()),
        }
    }

    /// Bump the participant counter without recording a fact. Enrollment
    /// goes through [`CompetitionRepo::enroll_participant`], which does both.
    #[instrument(skip(self), fields(competition_id = %id))]
    pub fn increment_participant_count(&self, id: CompetitionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE competitions SET nr_of_participants = nr_of_participants + 1 WHERE id = ?1",
                [id.get()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("competition {id}")));
            }
            Ok(())
        })
    }

    /// Record that `participant_id` takes part in `competition_id`.
    ///
    /// Existence checks, the per-participant count, the insert and the counter
    /// increment all run in one immediate transaction, so concurrent callers
    /// for the same participant serialize and at most
    /// [`MAX_ENROLLMENTS_PER_PARTICIPANT`] of them succeed.
    #[instrument(skip(self), fields(participant_id = %participant_id, competition_id = %competition_id))]
    pub fn enroll_participant(
        &self,
        participant_id: ParticipantId,
        competition_id: CompetitionId,
    ) -> Result<(), StoreError> {
        let capacity_exceeded = || StoreError::CapacityExceeded {
            participant_id: participant_id.get(),
            limit: MAX_ENROLLMENTS_PER_PARTICIPANT,
        };

        self.db.with_tx(|tx| {
            let participant: Option<i64> = tx
                .query_row(
                    "SELECT id FROM participants WHERE id = ?1",
                    [participant_id.get()],
                    |row| row.get(0),
                )
                .optional()?;
            if participant.is_none() {
                return Err(StoreError::NotFound(format!("participant {participant_id}")));
            }

            let competition: Option<i64> = tx
                .query_row(
                    "SELECT id FROM competitions WHERE id = ?1",
                    [competition_id.get()],
                    |row| row.get(0),
                )
                .optional()?;
            if competition.is_none() {
                return Err(StoreError::NotFound(format!("competition {competition_id}")));
            }

            let mut stmt =
                tx.prepare("SELECT competition_id, slot FROM participant_competitions WHERE participant_id = ?1")?;
            let facts = stmt
                .query_map([participant_id.get()], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            if facts.iter().any(|(c, _)| *c == competition_id.get()) {
                return Err(StoreError::Conflict(format!(
                    "participant {participant_id} is already enrolled in competition {competition_id}"
                )));
            }
            if facts.len() >= MAX_ENROLLMENTS_PER_PARTICIPANT {
                return Err(capacity_exceeded());
            }
            let slot = (0..MAX_ENROLLMENTS_PER_PARTICIPANT as i64)
                .find(|s| facts.iter().all(|(_, used)| used != s))
                .ok_or_else(capacity_exceeded)?;

            tx.execute(
                "INSERT INTO participant_competitions (participant_id, competition_id, slot, enrolled_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![participant_id.get(), competition_id.get(), slot, Utc::now().to_rfc3339()],
            )
            .map_err(|e| match e.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation) => capacity_exceeded(),
                _ => StoreError::from(e),
            })?;

            tx.execute(
                "UPDATE competitions SET nr_of_participants = nr_of_participants + 1 WHERE id = ?1",
                [competition_id.get()],
            )?;

            debug!(slot, "enrollment recorded");
            Ok(())
        })
    }

    /// Number of competitions the participant is enrolled in.
    #[instrument(skip(self), fields(participant_id = %participant_id))]
    pub fn enrollment_count(&self, participant_id: ParticipantId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM participant_competitions WHERE participant_id = ?1",
                [participant_id.get()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }
}
