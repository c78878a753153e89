//! Data model shared by the dispatch engine and its stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Destinations ──────────────────────────────────────────

/// A remote chat/channel target that messages are sent to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Destination {
    /// Opaque remote id, handed to the transport as-is.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Public username / handle, if the destination has one.
    pub alias: Option<String>,
    /// Owning account. `None` means the destination is shared by every session.
    pub account_id: Option<String>,
    /// Current availability. Only the availability state machine changes it.
    pub availability: Availability,
    /// Successful sends so far.
    pub send_count: u64,
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Bumped by every availability transition.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Destination {
    /// Create a fresh, active destination.
    pub fn new(id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            alias: None,
            account_id: None,
            availability: Availability::Active,
            send_count: 0,
            last_sent_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn with_account(mut self, account_id: &str) -> Self {
        self.account_id = Some(account_id.to_string());
        self
    }

    /// Whether this destination belongs to the given account scope.
    pub fn in_scope(&self, account_id: Option<&str>) -> bool {
        match (account_id, self.account_id.as_deref()) {
            (None, _) | (_, None) => true,
            (Some(want), Some(have)) => want == have,
        }
    }
}

/// Availability of a destination.
///
/// The expiry lives inside the temporary variant, so "expiry is set iff the
/// destination is temporarily suppressed" cannot be violated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Availability {
    Active,
    SuppressedTemporary {
        reason: SuppressionReason,
        until: DateTime<Utc>,
    },
    SuppressedPermanent {
        reason: SuppressionReason,
    },
}

impl Availability {
    pub fn kind(&self) -> AvailabilityKind {
        match self {
            Availability::Active => AvailabilityKind::Active,
            Availability::SuppressedTemporary { .. } => AvailabilityKind::SuppressedTemporary,
            Availability::SuppressedPermanent { .. } => AvailabilityKind::SuppressedPermanent,
        }
    }

    pub fn reason(&self) -> Option<SuppressionReason> {
        match self {
            Availability::Active => None,
            Availability::SuppressedTemporary { reason, .. }
            | Availability::SuppressedPermanent { reason } => Some(*reason),
        }
    }

    pub fn suppressed_until(&self) -> Option<DateTime<Utc>> {
        match self {
            Availability::SuppressedTemporary { until, .. } => Some(*until),
            _ => None,
        }
    }

    /// Rebuild from the flat (state, reason, expiry) columns a store keeps.
    pub fn from_parts(
        kind: AvailabilityKind,
        reason: Option<SuppressionReason>,
        until: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        match kind {
            AvailabilityKind::Active => Some(Availability::Active),
            AvailabilityKind::SuppressedTemporary => Some(Availability::SuppressedTemporary {
                reason: reason?,
                until: until?,
            }),
            AvailabilityKind::SuppressedPermanent => {
                Some(Availability::SuppressedPermanent { reason: reason? })
            }
        }
    }
}

/// State tag of [`Availability`], used for queries and compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityKind {
    Active,
    SuppressedTemporary,
    SuppressedPermanent,
}

impl AvailabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityKind::Active => "active",
            AvailabilityKind::SuppressedTemporary => "suppressed_temporary",
            AvailabilityKind::SuppressedPermanent => "suppressed_permanent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AvailabilityKind::Active),
            "suppressed_temporary" => Some(AvailabilityKind::SuppressedTemporary),
            "suppressed_permanent" => Some(AvailabilityKind::SuppressedPermanent),
            _ => None,
        }
    }
}

impl std::fmt::Display for AvailabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a destination is suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    RateLimited,
    /// Cycle-scoped: cleared unconditionally at the start of every cycle.
    SlowMode,
    UserBanned,
    WriteForbidden,
    DestinationPrivate,
    DestinationInvalid,
}

impl SuppressionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionReason::RateLimited => "rate_limited",
            SuppressionReason::SlowMode => "slow_mode",
            SuppressionReason::UserBanned => "user_banned",
            SuppressionReason::WriteForbidden => "write_forbidden",
            SuppressionReason::DestinationPrivate => "destination_private",
            SuppressionReason::DestinationInvalid => "destination_invalid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rate_limited" => Some(SuppressionReason::RateLimited),
            "slow_mode" => Some(SuppressionReason::SlowMode),
            "user_banned" => Some(SuppressionReason::UserBanned),
            "write_forbidden" => Some(SuppressionReason::WriteForbidden),
            "destination_private" => Some(SuppressionReason::DestinationPrivate),
            "destination_invalid" => Some(SuppressionReason::DestinationInvalid),
            _ => None,
        }
    }

    pub fn is_cycle_scoped(&self) -> bool {
        matches!(self, SuppressionReason::SlowMode)
    }
}

impl std::fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts of destinations per availability state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySummary {
    pub active: usize,
    pub suppressed_temporary: usize,
    pub suppressed_permanent: usize,
}

impl AvailabilitySummary {
    pub fn total(&self) -> usize {
        self.active + self.suppressed_temporary + self.suppressed_permanent
    }
}

// ─── Transport errors ──────────────────────────────────────

/// Classified failure reported by a transport client for a single send.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("rate limited, must wait {wait_secs}s")]
    RateLimited { wait_secs: u64 },

    #[error("slow mode is enabled on the destination")]
    SlowMode { wait_secs: Option<u64> },

    #[error("account is banned from the destination")]
    UserBanned,

    #[error("writing to the destination is forbidden")]
    WriteForbidden,

    #[error("destination is private")]
    DestinationPrivate,

    #[error("destination id is invalid")]
    DestinationInvalid,

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::RateLimited { .. } => ErrorClass::RateLimit,
            TransportError::SlowMode { .. } => ErrorClass::SlowMode,
            TransportError::UserBanned
            | TransportError::WriteForbidden
            | TransportError::DestinationPrivate
            | TransportError::DestinationInvalid => ErrorClass::Permanent,
            TransportError::Other(_) => ErrorClass::Transient,
        }
    }

    /// Suppression reason this error leads to, if any.
    pub fn suppression_reason(&self) -> Option<SuppressionReason> {
        match self {
            TransportError::RateLimited { .. } => Some(SuppressionReason::RateLimited),
            TransportError::SlowMode { .. } => Some(SuppressionReason::SlowMode),
            TransportError::UserBanned => Some(SuppressionReason::UserBanned),
            TransportError::WriteForbidden => Some(SuppressionReason::WriteForbidden),
            TransportError::DestinationPrivate => Some(SuppressionReason::DestinationPrivate),
            TransportError::DestinationInvalid => Some(SuppressionReason::DestinationInvalid),
            TransportError::Other(_) => None,
        }
    }
}

/// Coarse classification the dispatch engine switches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    RateLimit,
    SlowMode,
    Permanent,
    Transient,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::SlowMode => "slow_mode",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Transient => "transient",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rate_limit" => Some(ErrorClass::RateLimit),
            "slow_mode" => Some(ErrorClass::SlowMode),
            "permanent" => Some(ErrorClass::Permanent),
            "transient" => Some(ErrorClass::Transient),
            _ => None,
        }
    }
}

// ─── Outcomes ──────────────────────────────────────────────

/// Result status for one destination in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Sent,
    SkippedSuppressed,
    FailedRetriesExhausted,
    FailedTerminal,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Sent => "sent",
            OutcomeStatus::SkippedSuppressed => "skipped_suppressed",
            OutcomeStatus::FailedRetriesExhausted => "failed_retries_exhausted",
            OutcomeStatus::FailedTerminal => "failed_terminal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(OutcomeStatus::Sent),
            "skipped_suppressed" => Some(OutcomeStatus::SkippedSuppressed),
            "failed_retries_exhausted" => Some(OutcomeStatus::FailedRetriesExhausted),
            "failed_terminal" => Some(OutcomeStatus::FailedTerminal),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            OutcomeStatus::FailedRetriesExhausted | OutcomeStatus::FailedTerminal
        )
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of what happened to one destination in one cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchOutcome {
    pub id: String,
    pub cycle_id: String,
    pub session_id: String,
    pub destination_id: String,
    pub status: OutcomeStatus,
    pub error_class: Option<ErrorClass>,
    /// Transport error text, or the reason a destination was skipped.
    pub error_detail: Option<String>,
    /// Send attempts made (0 when skipped).
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl DispatchOutcome {
    pub fn new(
        cycle_id: &str,
        session_id: &str,
        destination_id: &str,
        status: OutcomeStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cycle_id: cycle_id.to_string(),
            session_id: session_id.to_string(),
            destination_id: destination_id.to_string(),
            status,
            error_class: None,
            error_detail: None,
            attempts: 0,
            timestamp,
        }
    }

    pub fn with_error(mut self, class: ErrorClass, detail: impl Into<String>) -> Self {
        self.error_class = Some(class);
        self.error_detail = Some(detail.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

// ─── Cycles & sessions ─────────────────────────────────────

/// Scheduler-owned record of a single cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRun {
    pub id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of eligible destinations at cycle start.
    pub destination_count: usize,
    pub sent: usize,
    pub failed: usize,
    /// Delay chosen before the next cycle, in seconds.
    pub next_delay_secs: Option<u64>,
    /// Set when the cycle was abandoned.
    pub error: Option<String>,
}

impl CycleRun {
    pub fn start(session_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            id: format!("cycle-{}", uuid::Uuid::new_v4()),
            session_id: session_id.to_string(),
            started_at,
            finished_at: None,
            destination_count: 0,
            sent: 0,
            failed: 0,
            next_delay_secs: None,
            error: None,
        }
    }

    /// Close the run with the outcomes it produced.
    pub fn finish(&mut self, outcomes: &[DispatchOutcome], at: DateTime<Utc>) {
        self.sent = outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Sent)
            .count();
        self.failed = outcomes.iter().filter(|o| o.status.is_failure()).count();
        self.finished_at = Some(at);
    }

    /// Close the run as abandoned.
    pub fn abandon(&mut self, error: String, at: DateTime<Utc>) {
        self.error = Some(error);
        self.finished_at = Some(at);
    }
}

/// A logical authenticated sending identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    /// Owning account reference.
    pub account_id: String,
    /// Human-readable label (usually the phone number the client logged in with).
    pub label: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: &str, account_id: &str) -> Self {
        Self {
            id: id.to_string(),
            account_id: account_id.to_string(),
            label: None,
            connected_at: Utc::now(),
        }
    }
}
