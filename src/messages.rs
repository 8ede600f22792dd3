//! Protocol messages.
//!
//! Every message exchanged between nodes is one [`Message`] case. The
//! value payload is generic; nodes never interpret it beyond carrying
//! it and (in the learner) comparing stringified forms.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::suggestion::{LastAccepted, SuggestionId};

/// A node identity. UUIDs are recommended; any unique string works.
pub type Uid = String;

/// The case tag of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Case {
    /// Phase 1 request for permission to suggest.
    PermitRequest,
    /// Phase 1 grant, carrying the acceptor's accepted history.
    PermitGranted,
    /// Phase 2 request to accept a value.
    Suggestion,
    /// An acceptor's vote for a `(sid, value)` pair.
    Acceptance,
    /// Terminal: a learner declared this value final.
    Success,
    /// Refusal, carrying the acceptor's highest granted sid.
    Nack,
}

impl fmt::Display for Case {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PermitRequest => "PermitRequest",
            Self::PermitGranted => "PermitGranted",
            Self::Suggestion => "Suggestion",
            Self::Acceptance => "Acceptance",
            Self::Success => "Success",
            Self::Nack => "Nack",
        };
        f.write_str(name)
    }
}

/// A protocol message, tagged by [`Case`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "case")]
pub enum Message<V> {
    /// A proposer asks every acceptor for permission to suggest under `sid`.
    PermitRequest {
        /// The requesting proposer, and the reply target.
        sender_id: Uid,
        /// The proposal number permission is requested for.
        sid: SuggestionId,
    },
    /// An acceptor grants permission for `sid`.
    PermitGranted {
        /// The granted proposal number.
        sid: SuggestionId,
        /// What this acceptor last accepted, if anything.
        last_accepted: Option<LastAccepted<V>>,
    },
    /// A proposer suggests `value` under `sid` to every acceptor.
    Suggestion {
        /// The suggesting proposer, and the Nack reply target.
        sender_id: Uid,
        /// The proposal number the suggestion runs under.
        sid: SuggestionId,
        /// The suggested value.
        value: V,
    },
    /// An acceptor accepted `(sid, value)`; broadcast to all learners.
    Acceptance {
        /// The accepted proposal number.
        sid: SuggestionId,
        /// The accepted value.
        value: V,
    },
    /// A learner witnessed a majority and declared `value` final.
    Success {
        /// The chosen value.
        value: V,
    },
    /// An acceptor refuses `current_sid`; it already granted higher.
    Nack {
        /// The refused proposal number.
        current_sid: SuggestionId,
        /// The highest proposal number this acceptor has granted.
        last_granted_sid: SuggestionId,
    },
}

/// Extraction was attempted for the wrong [`Case`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected} message, got {actual}")]
pub struct WrongCase {
    /// The case the extraction asked for.
    pub expected: Case,
    /// The case the message actually carried.
    pub actual: Case,
}

impl<V> Message<V> {
    /// The case tag of this message.
    #[must_use]
    pub fn case(&self) -> Case {
        match self {
            Self::PermitRequest { .. } => Case::PermitRequest,
            Self::PermitGranted { .. } => Case::PermitGranted,
            Self::Suggestion { .. } => Case::Suggestion,
            Self::Acceptance { .. } => Case::Acceptance,
            Self::Success { .. } => Case::Success,
            Self::Nack { .. } => Case::Nack,
        }
    }

    /// Whether this message carries the given case.
    #[must_use]
    pub fn is(&self, case: Case) -> bool {
        self.case() == case
    }

    fn wrong(self, expected: Case) -> WrongCase {
        WrongCase {
            expected,
            actual: self.case(),
        }
    }

    /// Extract a `PermitRequest` payload: `(sender_id, sid)`.
    ///
    /// # Errors
    ///
    /// Returns [`WrongCase`] if the tag is any other case.
    pub fn into_permit_request(self) -> Result<(Uid, SuggestionId), WrongCase> {
        match self {
            Self::PermitRequest { sender_id, sid } => Ok((sender_id, sid)),
            other => Err(other.wrong(Case::PermitRequest)),
        }
    }

    /// Extract a `PermitGranted` payload: `(sid, last_accepted)`.
    ///
    /// # Errors
    ///
    /// Returns [`WrongCase`] if the tag is any other case.
    pub fn into_permit_granted(
        self,
    ) -> Result<(SuggestionId, Option<LastAccepted<V>>), WrongCase> {
        match self {
            Self::PermitGranted { sid, last_accepted } => Ok((sid, last_accepted)),
            other => Err(other.wrong(Case::PermitGranted)),
        }
    }

    /// Extract a `Suggestion` payload: `(sender_id, sid, value)`.
    ///
    /// # Errors
    ///
    /// Returns [`WrongCase`] if the tag is any other case.
    pub fn into_suggestion(self) -> Result<(Uid, SuggestionId, V), WrongCase> {
        match self {
            Self::Suggestion {
                sender_id,
                sid,
                value,
            } => Ok((sender_id, sid, value)),
            other => Err(other.wrong(Case::Suggestion)),
        }
    }

    /// Extract an `Acceptance` payload: `(sid, value)`.
    ///
    /// # Errors
    ///
    /// Returns [`WrongCase`] if the tag is any other case.
    pub fn into_acceptance(self) -> Result<(SuggestionId, V), WrongCase> {
        match self {
            Self::Acceptance { sid, value } => Ok((sid, value)),
            other => Err(other.wrong(Case::Acceptance)),
        }
    }

    /// Extract a `Success` payload: the chosen value.
    ///
    /// # Errors
    ///
    /// Returns [`WrongCase`] if the tag is any other case.
    pub fn into_success(self) -> Result<V, WrongCase> {
        match self {
            Self::Success { value } => Ok(value),
            other => Err(other.wrong(Case::Success)),
        }
    }

    /// Extract a `Nack` payload: `(current_sid, last_granted_sid)`.
    ///
    /// # Errors
    ///
    /// Returns [`WrongCase`] if the tag is any other case.
    pub fn into_nack(self) -> Result<(SuggestionId, SuggestionId), WrongCase> {
        match self {
            Self::Nack {
                current_sid,
                last_granted_sid,
            } => Ok((current_sid, last_granted_sid)),
            other => Err(other.wrong(Case::Nack)),
        }
    }
}
