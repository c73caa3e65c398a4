//! Shared primitive types used across the entire pipeline.

/// Identifier of a user (the owning entity of every ledger row).
pub type UserId = String;

/// A stable, unique identifier for any other entity (subscription, event, ticket).
pub type EntityId = String;

/// The canonical run identifier.
pub type RunId = String;

/// Absolute tolerance for the monthly bridge identity.
pub const DEFAULT_RECONCILIATION_TOLERANCE: f64 = 1e-4;

/// Ratios whose denominator is at or below this are reported as undefined.
pub const RATIO_EPSILON: f64 = 1e-6;
