//! Store error types.

/// Errors raised by store writes and store construction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The kind was never registered with this store.
    #[error("kind `{0}` is not registered with this store")]
    UnknownKind(&'static str),

    /// Two kinds with the same name were registered.
    #[error("kind `{0}` registered twice")]
    DuplicateKind(&'static str),

    /// The object's identity field is empty.
    #[error("{kind}: cannot store an entity with an empty identity")]
    EmptyIdentity {
        /// Kind of the rejected object.
        kind: &'static str,
    },

    /// The object is not an instance of the kind it was stored under.
    #[error("object is not an instance of kind `{0}`")]
    WrongType(&'static str),

    /// A unique index already holds the key for another entity.
    #[error("{kind}/{id}: unique index `{index}` already holds this key for `{other}`")]
    UniqueViolation {
        /// Kind being written.
        kind: &'static str,
        /// Name of the violated index.
        index: &'static str,
        /// Identity of the rejected entity.
        id: String,
        /// Identity of the entity already holding the key.
        other: String,
    },
}
