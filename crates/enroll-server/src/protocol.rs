//! Typed requests and replies carried inside [`Envelope`]s.
//!
//! Each envelope is decoded once into a [`Request`] (server side) or a
//! [`Reply`] (client side); handlers never look at raw type strings.

use serde::de::DeserializeOwned;
use serde::Serialize;

use enroll_core::{
    Competition, CompetitionFilter, CompetitionId, Credentials, FilterPayload, NewParticipant,
    Participant, ParticipantId, User,
};

use crate::codec::Envelope;

/// Message type strings on the wire.
pub mod message_type {
    pub const ADD_PARTICIPANT: &str = "ADD_PARTICIPANT";
    pub const ADD_PARTICIPANT_REPLY: &str = "ADD_PARTICIPANT_REPLY";
    pub const GET_PARTICIPANTS_FOR_COMP: &str = "GET_PARTICIPANTS_FOR_COMP";
    pub const GET_PARTICIPANTS_FOR_COMP_REPLY: &str = "GET_PARTICIPANTS_FOR_COMP_REPLY";
    pub const GET_ALL_COMPETITIONS: &str = "GET_ALL_COMPETITIONS";
    pub const GET_ALL_COMPETITIONS_REPLY: &str = "GET_ALL_COMPETITIONS_REPLY";
    pub const GET_ALL_PARTICIPANTS: &str = "GET_ALL_PARTICIPANTS";
    pub const GET_ALL_PARTICIPANTS_REPLY: &str = "GET_ALL_PARTICIPANTS_REPLY";
    pub const GET_ALL_USERS: &str = "GET_ALL_USERS";
    pub const GET_ALL_USERS_REPLY: &str = "GET_ALL_USERS_REPLY";
    pub const AUTH_USER: &str = "AUTH_USER";
    pub const AUTH_USER_REPLY: &str = "AUTH_USER_REPLY";
    pub const ENROLL_PARTICIPANT: &str = "ENROLL_PARTICIPANT";
    pub const FILTER_COMPETITIONS: &str = "FILTER_COMPETITIONS";
    pub const FILTER_COMPETITIONS_REPLY: &str = "FILTER_COMPETITIONS_REPLY";
    pub const UPDATE: &str = "UPDATE";
    pub const ERROR: &str = "ERROR";
}

use message_type as mt;

/// Error text sent when an `ENROLL_PARTICIPANT` payload is not two ids.
pub const ENROLL_PAYLOAD_HINT: &str = "Payload must be: participantID,competitionID";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("invalid {message_type} payload: {reason}")]
    InvalidPayload {
        message_type: &'static str,
        reason: String,
    },
    #[error("failed to encode {message_type}: {reason}")]
    Encode {
        message_type: &'static str,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    AddParticipant(NewParticipant),
    GetParticipantsForCompetition(CompetitionId),
    GetAllCompetitions,
    GetAllParticipants,
    GetAllUsers,
    AuthUser(Credentials),
    EnrollParticipant {
        participant_id: ParticipantId,
        competition_id: CompetitionId,
    },
    FilterCompetitions(CompetitionFilter),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    ParticipantAdded(Participant),
    ParticipantsForCompetition(Vec<Participant>),
    AllCompetitions(Vec<Competition>),
    AllParticipants(Vec<Participant>),
    AllUsers(Vec<User>),
    /// `None` when no user matched; sent as the literal `null`.
    AuthUser(Option<User>),
    FilteredCompetitions(Vec<Competition>),
    Update,
    Error(String),
}

fn parse_json<T: DeserializeOwned>(message_type: &'static str, payload: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(payload).map_err(|e| ProtocolError::InvalidPayload {
        message_type,
        reason: e.to_string(),
    })
}

fn to_json<T: Serialize>(message_type: &'static str, value: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(value).map_err(|e| ProtocolError::Encode {
        message_type,
        reason: e.to_string(),
    })
}

/// Parse `"participantID,competitionID"`. Exactly two parts, each an integer
/// after trimming.
pub fn parse_enroll_payload(payload: &str) -> Result<(ParticipantId, CompetitionId), ProtocolError> {
    let invalid = |reason: String| ProtocolError::InvalidPayload {
        message_type: mt::ENROLL_PARTICIPANT,
        reason,
    };
    let parts: Vec<&str> = payload.split(',').collect();
    let [p, c] = parts.as_slice() else {
        return Err(invalid(ENROLL_PAYLOAD_HINT.to_string()));
    };
    let participant_id = p
        .parse()
        .map_err(|e| invalid(format!("{ENROLL_PAYLOAD_HINT} ({e})")))?;
    let competition_id = c
        .parse()
        .map_err(|e| invalid(format!("{ENROLL_PAYLOAD_HINT} ({e})")))?;
    Ok((participant_id, competition_id))
}

impl Request {
    /// Decode an inbound envelope. Unknown types yield
    /// [`ProtocolError::UnknownType`].
    pub fn decode(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let payload = envelope.payload.as_str();
        match envelope.message_type.as_str() {
            mt::ADD_PARTICIPANT => Ok(Self::AddParticipant(parse_json(mt::ADD_PARTICIPANT, payload)?)),
            mt::GET_PARTICIPANTS_FOR_COMP => payload
                .parse()
                .map(Self::GetParticipantsForCompetition)
                .map_err(|e| ProtocolError::InvalidPayload {
                    message_type: mt::GET_PARTICIPANTS_FOR_COMP,
                    reason: format!("competition id: {e}"),
                }),
            mt::GET_ALL_COMPETITIONS => Ok(Self::GetAllCompetitions),
            mt::GET_ALL_PARTICIPANTS => Ok(Self::GetAllParticipants),
            mt::GET_ALL_USERS => Ok(Self::GetAllUsers),
            mt::AUTH_USER => Ok(Self::AuthUser(parse_json(mt::AUTH_USER, payload)?)),
            mt::ENROLL_PARTICIPANT => {
                let (participant_id, competition_id) = parse_enroll_payload(payload)?;
                Ok(Self::EnrollParticipant {
                    participant_id,
                    competition_id,
                })
            }
            mt::FILTER_COMPETITIONS => {
                let raw: FilterPayload = if payload.trim().is_empty() {
                    FilterPayload::default()
                } else {
                    parse_json(mt::FILTER_COMPETITIONS, payload)?
                };
                Ok(Self::FilterCompetitions(CompetitionFilter::from(raw)))
            }
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Self::AddParticipant(_) => mt::ADD_PARTICIPANT,
            Self::GetParticipantsForCompetition(_) => mt::GET_PARTICIPANTS_FOR_COMP,
            Self::GetAllCompetitions => mt::GET_ALL_COMPETITIONS,
            Self::GetAllParticipants => mt::GET_ALL_PARTICIPANTS,
            Self::GetAllUsers => mt::GET_ALL_USERS,
            Self::AuthUser(_) => mt::AUTH_USER,
            Self::EnrollParticipant { .. } => mt::ENROLL_PARTICIPANT,
            Self::FilterCompetitions(_) => mt::FILTER_COMPETITIONS,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        let kind = self.message_type();
        let payload = match self {
            Self::AddParticipant(p) => to_json(kind, p)?,
            Self::GetParticipantsForCompetition(id) => id.to_string(),
            Self::GetAllCompetitions | Self::GetAllParticipants | Self::GetAllUsers => String::new(),
            Self::AuthUser(creds) => to_json(kind, creds)?,
            Self::EnrollParticipant {
                participant_id,
                competition_id,
            } => format!("{participant_id},{competition_id}"),
            Self::FilterCompetitions(filter) => to_json(kind, &FilterPayload::from(filter))?,
        };
        Ok(Envelope::new(kind, payload))
    }
}

impl Reply {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::ParticipantAdded(_) => mt::ADD_PARTICIPANT_REPLY,
            Self::ParticipantsForCompetition(_) => mt::GET_PARTICIPANTS_FOR_COMP_REPLY,
            Self::AllCompetitions(_) => mt::GET_ALL_COMPETITIONS_REPLY,
            Self::AllParticipants(_) => mt::GET_ALL_PARTICIPANTS_REPLY,
            Self::AllUsers(_) => mt::GET_ALL_USERS_REPLY,
            Self::AuthUser(_) => mt::AUTH_USER_REPLY,
            Self::FilteredCompetitions(_) => mt::FILTER_COMPETITIONS_REPLY,
            Self::Update => mt::UPDATE,
            Self::Error(_) => mt::ERROR,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        let kind = self.message_type();
        let payload = match self {
            Self::ParticipantAdded(p) => to_json(kind, p)?,
            Self::ParticipantsForCompetition(list) | Self::AllParticipants(list) => to_json(kind, list)?,
            Self::AllCompetitions(list) | Self::FilteredCompetitions(list) => to_json(kind, list)?,
            Self::AllUsers(list) => to_json(kind, list)?,
            Self::AuthUser(user) => to_json(kind, user)?,
            Self::Update => String::new(),
            Self::Error(message) => message.clone(),
        };
        Ok(Envelope::new(kind, payload))
    }

    /// Decode a server envelope on the client side.
    pub fn decode(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let payload = envelope.payload.as_str();
        match envelope.message_type.as_str() {
            mt::ADD_PARTICIPANT_REPLY => Ok(Self::ParticipantAdded(parse_json(mt::ADD_PARTICIPANT_REPLY, payload)?)),
            mt::GET_PARTICIPANTS_FOR_COMP_REPLY => Ok(Self::ParticipantsForCompetition(parse_json(
                mt::GET_PARTICIPANTS_FOR_COMP_REPLY,
                payload,
            )?)),
            mt::GET_ALL_COMPETITIONS_REPLY => Ok(Self::AllCompetitions(parse_json(
                mt::GET_ALL_COMPETITIONS_REPLY,
                payload,
            )?)),
            mt::GET_ALL_PARTICIPANTS_REPLY => Ok(Self::AllParticipants(parse_json(
                mt::GET_ALL_PARTICIPANTS_REPLY,
                payload,
            )?)),
            mt::GET_ALL_USERS_REPLY => Ok(Self::AllUsers(parse_json(mt::GET_ALL_USERS_REPLY, payload)?)),
            mt::AUTH_USER_REPLY => Ok(Self::AuthUser(parse_json(mt::AUTH_USER_REPLY, payload)?)),
            mt::FILTER_COMPETITIONS_REPLY => Ok(Self::FilteredCompetitions(parse_json(
                mt::FILTER_COMPETITIONS_REPLY,
                payload,
            )?)),
            mt::UPDATE => Ok(Self::Update),
            mt::ERROR => Ok(Self::Error(payload.to_string())),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}
