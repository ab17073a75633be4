//! # enroll-store
//!
//! SQLite persistence for competitions, participants, users and the
//! participant/competition enrollment facts.

pub mod competitions;
pub mod database;
pub mod error;
pub mod participants;
mod row_helpers;
pub mod schema;
pub mod seed;
pub mod users;

pub use competitions::CompetitionRepo;
pub use database::Database;
pub use error::StoreError;
pub use participants::ParticipantRepo;
pub use seed::seed_competitions;
pub use users::UserRepo;
