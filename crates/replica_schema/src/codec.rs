//! Field-level diff codec.
//!
//! [`encode`] turns a before/after pair into a sparse [`Diff`]; [`decode`]
//! merges a diff over an existing entity. Both enforce `const` fields and
//! consult a validator for every field whose value actually changes, which is
//! where write authorization ([`authorize`]) plugs in.
//!
//! Decode returns `None` when the diff changes nothing, which makes replaying
//! a diff idempotent.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::entity::{AnyEntity, Entity, Object};
use crate::error::CodecError;
use crate::kind::{Field, Kind};

/// A sparse change: wire field name → new serialised value.
pub type Diff = BTreeMap<String, Value>;

/// Encode the difference between `before` and `after`.
///
/// `before == None` means the entity is being created; fields are then
/// compared against the kind's zero value. For every field whose value
/// differs the codec fails on `const` fields (when `before` exists), then
/// calls `validate(field, old, new)`, then records the new value.
///
/// Returns `Ok(None)` when nothing changed.
///
/// # Errors
///
/// Returns [`CodecError::ConstViolation`], any error produced by `validate`,
/// or a serialisation error.
pub fn encode<V>(
    kind: &Kind,
    before: Option<&AnyEntity>,
    after: &AnyEntity,
    mut validate: V,
) -> Result<Option<Diff>, CodecError>
where
    V: FnMut(&Field, &Value, &Value) -> Result<(), CodecError>,
{
    let old = match before {
        Some(before) => kind.to_map(before)?,
        None => kind.zero().clone(),
    };
    let new = kind.to_map(after)?;

    let mut diff = Diff::new();
    for field in kind.fields() {
        let old_value = value_of(&old, field);
        let new_value = value_of(&new, field);
        if old_value == new_value {
            continue;
        }
        if field.is_const() && before.is_some() {
            return Err(CodecError::ConstViolation {
                kind: kind.name(),
                field: field.wire_name(),
            });
        }
        validate(field, old_value, new_value)?;
        diff.insert(field.wire_name().to_string(), new_value.clone());
    }

    Ok((!diff.is_empty()).then_some(diff))
}

/// Merge `diff` over `existing`, producing the updated entity.
///
/// `existing == None` starts from the kind's zero value. Each field named in
/// the diff replaces the whole field slot. Fields whose merged value equals
/// the old one are skipped; for the rest the codec fails on `const` fields
/// (when `existing` exists) and calls `validate(field, old, new)`.
///
/// Returns `Ok(None)` when no field actually changed.
///
/// # Errors
///
/// Returns [`CodecError::UnknownField`] for undeclared wire fields,
/// [`CodecError::ConstViolation`], any error produced by `validate`, or a
/// deserialisation error.
pub fn decode<V>(
    kind: &Kind,
    existing: Option<&AnyEntity>,
    diff: &Diff,
    mut validate: V,
) -> Result<Option<Object>, CodecError>
where
    V: FnMut(&Field, &Value, &Value) -> Result<(), CodecError>,
{
    let old = match existing {
        Some(existing) => kind.to_map(existing)?,
        None => kind.zero().clone(),
    };

    let mut fields = Vec::with_capacity(diff.len());
    let mut merged = old.clone();
    for (wire, value) in diff {
        let field = kind.field(wire).ok_or_else(|| CodecError::UnknownField {
            kind: kind.name(),
            field: wire.clone(),
        })?;
        merged.insert(wire.clone(), value.clone());
        fields.push(field);
    }

    let obj = kind.from_map(merged)?;
    // Re-serialise so values are compared in their canonical form.
    let normalised = kind.to_map(&*obj)?;

    let mut changed = false;
    for field in fields {
        let old_value = value_of(&old, field);
        let new_value = value_of(&normalised, field);
        if old_value == new_value {
            continue;
        }
        if field.is_const() && existing.is_some() {
            return Err(CodecError::ConstViolation {
                kind: kind.name(),
                field: field.wire_name(),
            });
        }
        validate(field, old_value, new_value)?;
        changed = true;
    }

    Ok(changed.then_some(obj))
}

/// A validator enforcing per-field write ownership for `producer`.
///
/// An empty `producer` is the administrative (unattributed) writer. Fields
/// with no declared producers may only be changed by that writer; any other
/// field may only be changed by one of its declared producers.
///
/// The identity field is exempt: any producer may set it on creation, and
/// being constant it can never change afterwards.
pub fn authorize(producer: &str) -> impl FnMut(&Field, &Value, &Value) -> Result<(), CodecError> + '_ {
    move |field, _old, _new| {
        let allowed = if field.is_identity() {
            true
        } else if field.producers().is_empty() {
            producer.is_empty()
        } else {
            field.producers().contains(producer)
        };
        if allowed {
            Ok(())
        } else {
            Err(CodecError::Unauthorized {
                field: field.wire_name(),
                producer: producer.to_string(),
            })
        }
    }
}

/// A validator that accepts every change.
pub fn permit_all(_field: &Field, _old: &Value, _new: &Value) -> Result<(), CodecError> {
    Ok(())
}

/// Typed [`encode`].
///
/// # Errors
///
/// See [`encode`].
pub fn encode_entity<T, V>(before: Option<&T>, after: &T, validate: V) -> Result<Option<Diff>, CodecError>
where
    T: Entity,
    V: FnMut(&Field, &Value, &Value) -> Result<(), CodecError>,
{
    encode(
        T::kind(),
        before.map(|b| b as &AnyEntity),
        after,
        validate,
    )
}

/// Typed [`decode`].
///
/// # Errors
///
/// See [`decode`].
pub fn decode_entity<T, V>(existing: Option<&T>, diff: &Diff, validate: V) -> Result<Option<T>, CodecError>
where
    T: Entity,
    V: FnMut(&Field, &Value, &Value) -> Result<(), CodecError>,
{
    let kind = T::kind();
    let merged = decode(kind, existing.map(|e| e as &AnyEntity), diff, validate)?;
    match merged {
        None => Ok(None),
        Some(obj) => match Arc::downcast::<T>(obj) {
            Ok(obj) => Ok(Some(Arc::try_unwrap(obj).unwrap_or_else(|_| unreachable!("freshly decoded object is unshared")))),
            Err(_) => Err(CodecError::WrongType(kind.name())),
        },
    }
}

fn value_of<'a>(map: &'a Map<String, Value>, field: &Field) -> &'a Value {
    map.get(field.wire_name()).unwrap_or(&Value::Null)
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;
    use crate::kind::Section;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Foo {
        #[serde(rename = "ID")]
        id: String,
        #[serde(rename = "A")]
        a: i64,
        #[serde(rename = "B")]
        b: i64,
        #[serde(rename = "Tags")]
        tags: Vec<String>,
        #[serde(rename = "Note")]
        note: String,
    }

    static FOO: LazyLock<Kind> = LazyLock::new(|| {
        Kind::builder::<Foo>("foo")
            .section(Section::new().field(Field::identity("id").wire("ID")))
            .section(Section::new().produced_by("a").field(Field::new("a").wire("A")))
            .section(Section::new().produced_by("b").field(Field::new("b").wire("B")))
            .section(
                Section::new()
                    .field(Field::new("tags").wire("Tags"))
                    .field(Field::new("note").wire("Note").constant()),
            )
            .build()
            .expect("foo kind")
    });

    impl Entity for Foo {
        fn kind() -> &'static Kind {
            &FOO
        }

        fn id(&self) -> &str {
            &self.id
        }
    }

    fn diff(value: Value) -> Diff {
        serde_json::from_value(value).unwrap()
    }

    fn foo(id: &str, a: i64, b: i64) -> Foo {
        Foo {
            id: id.to_string(),
            a,
            b,
            ..Foo::default()
        }
    }

    #[test]
    fn test_encode_create_includes_non_zero_fields() {
        let d = encode_entity(None, &foo("f1", 7, 0), permit_all).unwrap().unwrap();
        assert_eq!(d, diff(json!({"ID": "f1", "A": 7})));
    }

    #[test]
    fn test_encode_unchanged_is_none() {
        let f = foo("f1", 7, 0);
        assert!(encode_entity(Some(&f), &f.clone(), permit_all).unwrap().is_none());
    }

    #[test]
    fn test_encode_const_violation() {
        let before = foo("f1", 1, 0);
        let mut after = before.clone();
        after.note = "changed".into();
        assert!(matches!(
            encode_entity(Some(&before), &after, permit_all),
            Err(CodecError::ConstViolation { field: "Note", .. })
        ));

        // Creation may set a const field.
        assert!(encode_entity(None, &after, permit_all).is_ok());
    }

    #[test]
    fn test_decode_new_then_noop() {
        let d = diff(json!({"ID": "x", "A": 1}));
        let created = decode_entity::<Foo, _>(None, &d, permit_all).unwrap().unwrap();
        assert_eq!(created, foo("x", 1, 0));

        let again = decode_entity(Some(&created), &diff(json!({"A": 1})), permit_all).unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn test_decode_is_idempotent() {
        let x = foo("x", 1, 2);
        let mut y = x.clone();
        y.a = 5;
        y.tags = vec!["t".into()];
        let d = encode_entity(Some(&x), &y, permit_all).unwrap().unwrap();

        let merged = decode_entity(Some(&x), &d, permit_all).unwrap().unwrap();
        assert_eq!(merged, y);
        assert!(decode_entity(Some(&merged), &d, permit_all).unwrap().is_none());
    }

    #[test]
    fn test_round_trip_from_nothing() {
        let y = Foo {
            id: "r".into(),
            a: -4,
            b: 9,
            tags: vec!["x".into(), "y".into()],
            note: "n".into(),
        };
        let d = encode_entity(None, &y, permit_all).unwrap().unwrap();
        let back = decode_entity::<Foo, _>(None, &d, permit_all).unwrap().unwrap();
        assert_eq!(back, y);
    }

    #[test]
    fn test_decode_replaces_container_slot() {
        let mut x = foo("x", 0, 0);
        x.tags = vec!["a".into(), "b".into(), "c".into()];
        let merged = decode_entity(Some(&x), &diff(json!({"Tags": ["z"]})), permit_all)
            .unwrap()
            .unwrap();
        assert_eq!(merged.tags, vec!["z".to_string()]);
    }

    #[test]
    fn test_decode_const_violation() {
        let x = foo("x", 0, 0);
        assert!(matches!(
            decode_entity(Some(&x), &diff(json!({"ID": "other"})), permit_all),
            Err(CodecError::ConstViolation { field: "ID", .. })
        ));
        // Restating the same identity is not a change.
        assert!(decode_entity(Some(&x), &diff(json!({"ID": "x"})), permit_all).unwrap().is_none());
    }

    #[test]
    fn test_decode_unknown_field() {
        assert!(matches!(
            decode_entity::<Foo, _>(None, &diff(json!({"ID": "x", "Nope": 1})), permit_all),
            Err(CodecError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_decode_malformed_value() {
        assert!(matches!(
            decode_entity::<Foo, _>(None, &diff(json!({"ID": "x", "A": "seven"})), permit_all),
            Err(CodecError::Json { .. })
        ));
    }

    #[test]
    fn test_authorize_by_producer() {
        let base = foo("f1", 7, 0);

        // Producer b may write B.
        let mut b_write = base.clone();
        b_write.b = 3;
        assert!(encode_entity(Some(&base), &b_write, authorize("b")).is_ok());

        // Producer b may not write A.
        let mut a_write = base.clone();
        a_write.a = 8;
        assert!(matches!(
            encode_entity(Some(&base), &a_write, authorize("b")),
            Err(CodecError::Unauthorized { field: "A", .. })
        ));

        // Producer a may write A through decode as well.
        assert!(decode_entity(Some(&base), &diff(json!({"A": 9})), authorize("a")).is_ok());
        assert!(decode_entity(Some(&base), &diff(json!({"B": 9})), authorize("a")).is_err());
    }

    #[test]
    fn test_authorize_unowned_fields_need_admin() {
        let base = foo("f1", 0, 0);
        let mut tagged = base.clone();
        tagged.tags = vec!["t".into()];
        assert!(encode_entity(Some(&base), &tagged, authorize("")).is_ok());
        assert!(matches!(
            encode_entity(Some(&base), &tagged, authorize("a")),
            Err(CodecError::Unauthorized { field: "Tags", .. })
        ));
    }

    #[test]
    fn test_producer_split_create_then_update() {
        let created = decode_entity::<Foo, _>(None, &diff(json!({"ID": "f1", "A": 7})), authorize("a"))
            .unwrap()
            .unwrap();
        assert_eq!(created, foo("f1", 7, 0));

        let mut by_b = created.clone();
        by_b.b = 3;
        let d = encode_entity(Some(&created), &by_b, authorize("b")).unwrap().unwrap();
        assert_eq!(d, diff(json!({"B": 3})));

        let mut a_by_b = created.clone();
        a_by_b.a = 8;
        assert!(matches!(
            encode_entity(Some(&created), &a_by_b, authorize("b")),
            Err(CodecError::Unauthorized { field: "A", .. })
        ));
    }

    #[test]
    fn test_identity_cannot_change_after_create() {
        let base = foo("f1", 7, 0);
        assert!(matches!(
            decode_entity(Some(&base), &diff(json!({"ID": "f2"})), authorize("a")),
            Err(CodecError::ConstViolation { field: "ID", .. })
        ));
    }

    #[test]
    fn test_validator_sees_old_and_new() {
        let base = foo("f1", 1, 0);
        let mut seen = Vec::new();
        decode_entity(Some(&base), &diff(json!({"A": 2, "B": 0})), |f: &Field, old: &Value, new: &Value| {
            seen.push((f.wire_name(), old.clone(), new.clone()));
            Ok(())
        })
        .unwrap();
        // B did not change, so only A is validated.
        assert_eq!(seen, vec![("A", json!(1), json!(2))]);
    }
}
