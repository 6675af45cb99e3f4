/// The standardized `Tender` trait and the ways it can be transitioned
/// to a different `Tender` state
pub mod tender;
/// Metadata about transitions between `Tender` states
pub mod transition;
