use super::tender::Tender;

/// Metadata about an evolution. Any `Tender` implementation that also
/// implements `EvolvableTender` can decide the following things in a
/// type-safe way:
///
/// 1. That transition is possible
/// 2. That transition requires a specific kind of metadata
///
/// For example, if you have the following structs:
///
/// ```ignore
/// struct Loaded {}
/// struct Booted {}
///
/// impl Tender for Loaded {...}
/// impl Tender for Booted {...}
/// ```
///
/// ...then a transition from `Loaded` to `Booted` that needs an entry point
/// looks like this:
///
/// ```ignore
/// struct Entry(u64);
/// impl TransitionMetadata<Loaded, Booted> for Entry {}
///
/// impl EvolvableTender<Loaded, Booted, Entry> for Loaded {
///     fn evolve(self, entry: Entry) -> Result<Booted> {
///         Ok(Booted {})
///     }
/// }
/// ```
pub trait TransitionMetadata<Cur: Tender, Next: Tender> {}
