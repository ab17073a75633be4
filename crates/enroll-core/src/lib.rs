//! # enroll-core
//!
//! Shared vocabulary for the enrollment server and its clients: entity
//! records, integer ids, the age-category table, competition filters and
//! entry validation.

pub mod category;
pub mod entities;
pub mod filter;
pub mod ids;
pub mod validation;

pub use category::{select_competition, AgeCategory};
pub use entities::{
    Competition, Credentials, NewCompetition, NewParticipant, Participant, User,
    COMPETITION_TYPES, MAX_ENROLLMENTS_PER_PARTICIPANT,
};
pub use filter::{CompetitionFilter, FilterPayload};
pub use ids::{CompetitionId, ParticipantId, UserId};
pub use validation::ValidationError;
