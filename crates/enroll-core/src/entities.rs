//! Domain records. Field names on the wire follow the desktop client's JSON
//! (`participantID`, `ageCategory`, ...).

use serde::{Deserialize, Serialize};

use crate::category::AgeCategory;
use crate::ids::{CompetitionId, ParticipantId, UserId};

/// Competition types offered by the desktop client.
pub const COMPETITION_TYPES: [&str; 3] = ["Drawing", "Treasure Hunt", "Poetry"];

/// A participant may hold at most this many enrollments.
pub const MAX_ENROLLMENTS_PER_PARTICIPANT: usize = 2;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competition {
    #[serde(rename = "competitionID")]
    pub id: CompetitionId,
    #[serde(rename = "type")]
    pub competition_type: String,
    #[serde(rename = "ageCategory")]
    pub age_category: AgeCategory,
    #[serde(rename = "nrOfParticipants")]
    pub nr_of_participants: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCompetition {
    #[serde(rename = "type")]
    pub competition_type: String,
    #[serde(rename = "ageCategory")]
    pub age_category: AgeCategory,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(rename = "participantID")]
    pub id: ParticipantId,
    pub name: String,
    pub age: i32,
}

/// Participant data before the store assigns an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewParticipant {
    pub name: String,
    pub age: i32,
}

/// The password is accepted on input but never serialized back out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "userID")]
    pub id: UserId,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "userName")]
    pub user_name: String,
    pub password: String,
}
