//! Schema-layer error types.

/// Errors raised while building a [`Kind`](crate::Kind).
///
/// These are construction-time failures: a kind that fails to build is a
/// programming error in the entity declaration, so callers usually `expect`
/// on them inside a `LazyLock` initialiser.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// No field was declared as the identity.
    #[error("kind `{0}` declares no identity field")]
    NoIdentity(&'static str),

    /// More than one field was declared as the identity.
    #[error("kind `{kind}` declares several identity fields: `{first}` and `{second}`")]
    MultipleIdentity {
        kind: &'static str,
        first: &'static str,
        second: &'static str,
    },

    /// Two fields (possibly from different sections) share a wire name.
    #[error("kind `{kind}` declares wire field `{field}` twice")]
    DuplicateField {
        kind: &'static str,
        field: &'static str,
    },

    /// Two indices share a name, or an index uses the reserved `id` name.
    #[error("kind `{kind}` declares index `{index}` twice")]
    DuplicateIndex {
        kind: &'static str,
        index: &'static str,
    },

    /// A section names a different kind than the builder it was added to.
    #[error("section declares kind `{found}` but was added to kind `{expected}`")]
    KindMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// The entity does not serialise to a JSON object.
    #[error("kind `{0}` does not serialise to an object")]
    NotAnObject(&'static str),

    /// A declared wire field is missing from the entity's serialised form.
    #[error("kind `{kind}` declares field `{field}` that the entity does not serialise")]
    MissingWireField {
        kind: &'static str,
        field: &'static str,
    },

    /// Serialising the zero value failed.
    #[error("kind `{kind}` zero value failed to serialise: {source}")]
    Zero {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by the diff codec and by field-level validation.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A `const` field would change on an entity that already exists.
    #[error("field `{field}` of kind `{kind}` is const and cannot change")]
    ConstViolation {
        kind: &'static str,
        field: &'static str,
    },

    /// The writer is not allowed to change this field.
    #[error("producer `{producer}` may not write field `{field}`")]
    Unauthorized {
        field: &'static str,
        producer: String,
    },

    /// A required field still holds its zero value.
    #[error("required field `{field}` of kind `{kind}` is empty")]
    MissingRequired {
        kind: &'static str,
        field: &'static str,
    },

    /// The diff names a field the kind does not declare.
    #[error("kind `{kind}` has no wire field `{field}`")]
    UnknownField { kind: &'static str, field: String },

    /// The object handed to the codec is not an instance of the kind.
    #[error("object is not an instance of kind `{0}`")]
    WrongType(&'static str),

    /// The entity did not serialise to a JSON object.
    #[error("kind `{0}` did not serialise to an object")]
    NotAnObject(&'static str),

    /// Serialising or deserialising the entity failed.
    #[error("kind `{kind}` JSON error: {source}")]
    Json {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
