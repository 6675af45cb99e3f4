use std::fmt::Debug;

use super::transition::TransitionMetadata;
use crate::mem::guest_mem::GuestMemory;
use crate::Result;

/// The minimal functionality of a tender in any state.
///
/// Tenders are states in a one-way state machine: each state knows how to
/// "evolve" into the next one, consuming itself. The final state never
/// hands control back.
pub trait Tender: Sized + Debug {
    /// The guest memory the tender owns
    fn memory(&self) -> &GuestMemory;
}

/// A `Tender` that knows how to "evolve" into a next state.
pub trait EvolvableTender<Cur: Tender, Next: Tender, T: TransitionMetadata<Cur, Next>>:
    Tender
{
    /// Move to the next state, consuming `self`
    fn evolve(self, tsn: T) -> Result<Next>;
}
