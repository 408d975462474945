// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::types::H256;
use std::fmt;

/// Which side of a redundant-provider comparison was missing an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceDirection {
    /// A secondary provider reported an event the canonical provider lacks.
    MissingFromCanonical,
    /// The canonical provider reported an event a secondary lacks.
    MissingFromSecondary,
}

impl fmt::Display for DivergenceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DivergenceDirection::MissingFromCanonical => {
                write!(f, "present in secondary but missing from canonical")
            }
            DivergenceDirection::MissingFromSecondary => {
                write!(f, "present in canonical but missing from secondary")
            }
        }
    }
}

/// Whether a signing-path failure happened before or after broadcast.
///
/// The recovery differs: a `Call` failure means the transaction would revert
/// (investigate the revert reason), a `Submission` failure means the network
/// rejected the broadcast (retry with different params).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningErrorKind {
    Call,
    Submission,
}

impl fmt::Display for SigningErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningErrorKind::Call => write!(f, "call"),
            SigningErrorKind::Submission => write!(f, "submission"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    // Missing/invalid parameter detected at construction. Fatal, not retried.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    // Redundant providers disagree on an event window. Fatal for the poll;
    // the cache stays at its last-good state and an operator should look.
    #[error("provider {provider_index} diverges from canonical: tx {tx_hash:?} {direction}")]
    Divergence {
        provider_index: usize,
        tx_hash: H256,
        direction: DivergenceDirection,
    },

    // Provider returned something structurally wrong (log without block
    // number, mismatched contract address, ...).
    #[error("provider error: {0}")]
    ProviderError(String),

    // Provider unreachable or rate limited; safe to retry on the next cycle.
    #[error("transient provider error: {0}")]
    TransientProviderError(String),

    // External API returned nothing where data was expected for a past window.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    // Historical price requested before the retained lookback window.
    #[error("no price history at {requested} (earliest retained: {earliest:?})")]
    PriceHistoryUnavailable { requested: u64, earliest: Option<u64> },

    // Historical/current price requested before any update completed.
    #[error("price feed has never completed an update")]
    FeedNeverUpdated,

    // Transaction signing path failure, tagged by phase.
    #[error("signing error ({kind}): {message}")]
    Signing {
        kind: SigningErrorKind,
        message: String,
    },

    // Uncategorized error
    #[error("{0}")]
    Generic(String),
}

impl ClientError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            ClientError::Configuration(_) => "configuration",
            ClientError::Divergence { .. } => "provider_divergence",
            ClientError::ProviderError(_) => "provider_error",
            ClientError::TransientProviderError(_) => "transient_provider_error",
            ClientError::MalformedResponse(_) => "malformed_response",
            ClientError::PriceHistoryUnavailable { .. } => "price_history_unavailable",
            ClientError::FeedNeverUpdated => "feed_never_updated",
            ClientError::Signing {
                kind: SigningErrorKind::Call,
                ..
            } => "signing_call",
            ClientError::Signing {
                kind: SigningErrorKind::Submission,
                ..
            } => "signing_submission",
            ClientError::Generic(_) => "generic",
        }
    }

    /// Whether the next poll cycle may reasonably retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::TransientProviderError(_) | ClientError::ProviderError(_)
        )
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_simple_variants() {
        let cases = vec![
            (
                ClientError::Configuration("missing url".to_string()),
                "configuration",
            ),
            (
                ClientError::ProviderError("bad log".to_string()),
                "provider_error",
            ),
            (
                ClientError::TransientProviderError("timeout".to_string()),
                "transient_provider_error",
            ),
            (
                ClientError::MalformedResponse("empty body".to_string()),
                "malformed_response",
            ),
            (
                ClientError::PriceHistoryUnavailable {
                    requested: 100,
                    earliest: Some(200),
                },
                "price_history_unavailable",
            ),
            (ClientError::FeedNeverUpdated, "feed_never_updated"),
            (ClientError::Generic("x".to_string()), "generic"),
        ];
        for (error, expected) in cases {
            assert_eq!(error.error_type(), expected, "mismatch for {:?}", error);
        }
    }

    #[test]
    fn test_error_type_signing_split_by_kind() {
        let call = ClientError::Signing {
            kind: SigningErrorKind::Call,
            message: "revert".to_string(),
        };
        let submission = ClientError::Signing {
            kind: SigningErrorKind::Submission,
            message: "underpriced".to_string(),
        };
        assert_eq!(call.error_type(), "signing_call");
        assert_eq!(submission.error_type(), "signing_submission");
    }

    #[test]
    fn test_divergence_message_names_hash_and_provider() {
        let err = ClientError::Divergence {
            provider_index: 2,
            tx_hash: H256::repeat_byte(0xab),
            direction: DivergenceDirection::MissingFromCanonical,
        };
        let msg = err.to_string();
        assert!(msg.contains("provider 2"));
        assert!(msg.contains("abab"));
        assert!(msg.contains("missing from canonical"));
    }

    /// error_type values feed prometheus labels and alerting rules; they
    /// must stay lowercase snake case and must not change.
    #[test]
    fn test_error_type_valid_prometheus_labels() {
        let errors = vec![
            ClientError::Configuration("x".to_string()),
            ClientError::Divergence {
                provider_index: 0,
                tx_hash: H256::zero(),
                direction: DivergenceDirection::MissingFromSecondary,
            },
            ClientError::ProviderError("x".to_string()),
            ClientError::FeedNeverUpdated,
            ClientError::Signing {
                kind: SigningErrorKind::Submission,
                message: "x".to_string(),
            },
        ];
        for error in errors {
            let label = error.error_type();
            assert!(!label.is_empty());
            for c in label.chars() {
                assert!(
                    c.is_ascii_lowercase() || c == '_',
                    "label '{}' contains invalid char '{}'",
                    label,
                    c
                );
            }
            assert!(!label.starts_with('_'));
            assert!(!label.ends_with('_'));
        }
    }

    #[test]
    fn test_error_type_payload_independence() {
        let a = ClientError::ProviderError("short".to_string());
        let b = ClientError::ProviderError("a much longer provider error".to_string());
        assert_eq!(a.error_type(), b.error_type());
    }
}
