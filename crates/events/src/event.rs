/// A domain event of one aggregate type.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution happens by adding optional fields and
///   bumping `schema_version`; old versions stay decodable forever)
/// - designed to be **append-only**
///
/// Sequence, commit timestamp and editor are not part of the event itself;
/// the append engine records them on the [`EventEnvelope`](crate::EventEnvelope).
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable, namespaced event type (e.g. "org.domain.added").
    fn event_type(&self) -> &'static str;

    /// Schema version the payload is written with.
    fn schema_version(&self) -> u32;
}
