//! Entry validation shared by the server and the desktop client form.

use crate::category::{MAX_AGE, MIN_AGE};
use crate::entities::NewParticipant;

/// Placeholder the client form uses for "no competition selected".
pub const NO_COMPETITION: &str = "Empty";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Name cannot be empty.")]
    EmptyName,
    #[error("Age should be between 6 and 15.")]
    AgeOutOfRange(i32),
    #[error("At least one competition should be selected.")]
    NoCompetitionSelected,
    #[error("Competitions should be different.")]
    DuplicateCompetition,
}

pub fn validate_name_and_age(name: &str, age: i32) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if !(MIN_AGE..=MAX_AGE).contains(&age) {
        return Err(ValidationError::AgeOutOfRange(age));
    }
    Ok(())
}

pub fn validate_participant(participant: &NewParticipant) -> Result<(), ValidationError> {
    validate_name_and_age(&participant.name, participant.age)
}

/// Full form check: name and age, plus the two competition pickers.
/// Either pick may be [`NO_COMPETITION`] or empty, but not both, and two
/// real picks must differ.
pub fn validate_entry(
    name: &str,
    age: i32,
    first: &str,
    second: &str,
) -> Result<(), ValidationError> {
    validate_name_and_age(name, age)?;
    let picked = |s: &str| !s.is_empty() && s != NO_COMPETITION;
    if !picked(first) && !picked(second) {
        return Err(ValidationError::NoCompetitionSelected);
    }
    if picked(first) && first == second {
        return Err(ValidationError::DuplicateCompetition);
    }
    Ok(())
}
