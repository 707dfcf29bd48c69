// =============================================================================
// TUMBLEMIX v0.4 - Wire Messages & Status Codes
// =============================================================================
//
// Message envelopes for the seven exchange operations plus Ping and
// Version, and the mapping from internal errors onto coarse transport
// status codes. Protocol validation failures all map to one opaque
// "bad request" so a probing client can't learn which check it tripped.
//
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::contract::ContractError;
use crate::tumbler::{
    EscrowRequest, PaymentOffer, PuzzleDisclosure, SignatureChallenges, SolutionChallenges,
    TransactionDisclosure, TumblerError,
};

/// Protocol version spoken by this server.
pub const PROTOCOL_VERSION: u32 = 1;

// =============================================================================
// Envelopes
// =============================================================================

/// Request bodies of the exchange protocol.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RequestBody {
    Ping,
    Version,
    SetupEscrow(EscrowRequest),
    GetPuzzlePromises(SignatureChallenges),
    FinalizeEscrow(TransactionDisclosure),
    GetSolutionPromises(SolutionChallenges),
    ValidateSolutions(PuzzleDisclosure),
    PaymentOffer(PaymentOffer),
}

/// A framed request. Every request after a session's first carries the
/// 16-byte cookie issued at session creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub cookie: Option<[u8; 16]>,
    pub body: RequestBody,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionReply {
    pub version: u32,
}

impl Request {
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

// =============================================================================
// Status Codes
// =============================================================================

/// Transport-level status codes surfaced to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    InvalidArgument,
    FailedPrecondition,
    Aborted,
    Internal,
    Unavailable,
}

/// Maps an internal error to the coarse status surfaced on the wire.
/// Client-caused protocol failures share one opaque answer.
pub fn status_for(err: &TumblerError) -> (StatusCode, &'static str) {
    match err {
        TumblerError::BadCookie => (StatusCode::InvalidArgument, "bad cookie"),
        TumblerError::InProgress => (StatusCode::Aborted, "operation in progress"),
        TumblerError::Contract(ContractError::BadAddress(_)) => {
            (StatusCode::InvalidArgument, "bad address")
        }
        TumblerError::EscrowFailed(_) => (StatusCode::Unavailable, "escrow failed"),
        TumblerError::Wallet(_) | TumblerError::Internal(_) => {
            (StatusCode::Internal, "temporary failure")
        }
        TumblerError::ServiceNotReady => (StatusCode::FailedPrecondition, "service not ready"),
        _ => (StatusCode::FailedPrecondition, "bad request"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puzzle::PuzzleError;
    use crate::wallet::WalletError;

    #[test]
    fn test_request_round_trip() {
        let req = Request {
            cookie: Some([7u8; 16]),
            body: RequestBody::SetupEscrow(EscrowRequest {
                address: "addr".into(),
                public_key: vec![2u8; 33],
                amount: crate::UNIT_VALUE,
            }),
        };
        let bytes = req.to_bytes();
        let decoded = Request::from_bytes(&bytes).expect("decode");
        assert_eq!(decoded.cookie, Some([7u8; 16]));
        assert!(matches!(decoded.body, RequestBody::SetupEscrow(_)));

        assert!(Request::from_bytes(&bytes[..bytes.len() / 2]).is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&TumblerError::BadCookie),
            (StatusCode::InvalidArgument, "bad cookie")
        );
        assert_eq!(
            status_for(&TumblerError::InProgress),
            (StatusCode::Aborted, "operation in progress")
        );
        assert_eq!(
            status_for(&TumblerError::Wallet(WalletError::NotFound)),
            (StatusCode::Internal, "temporary failure")
        );
        assert_eq!(
            status_for(&TumblerError::EscrowFailed(WalletError::NotFound)),
            (StatusCode::Unavailable, "escrow failed")
        );
        assert_eq!(
            status_for(&TumblerError::ServiceNotReady),
            (StatusCode::FailedPrecondition, "service not ready")
        );

        // Every protocol validation failure is deliberately opaque.
        for err in [
            TumblerError::FakeSetMismatch,
            TumblerError::PuzzleVerification,
            TumblerError::BadInputValues,
            TumblerError::Puzzle(PuzzleError::BadListLength(3)),
        ] {
            assert_eq!(
                status_for(&err),
                (StatusCode::FailedPrecondition, "bad request")
            );
        }
    }
}
