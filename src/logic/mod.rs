//! Pure decision logic: version ordering and reconciliation planning.

pub mod plan;
pub mod version;
