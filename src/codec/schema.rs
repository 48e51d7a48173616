//! Ordered field schemas.
//!
//! A [`Schema`] is the declared, ordered set of typed fields used for call
//! arguments, responses and record types. It enforces the exact-match rule:
//! every declared field present, nothing extra, no duplicates.

use bytes::Bytes;

use super::binary;
use super::value::{Fields, Value, ValueType};
use crate::error::{AmpError, Result};

/// One declared field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name, unique within its schema.
    pub name: String,
    /// Declared type.
    pub ty: ValueType,
}

/// A field after encoding, as carried inside a message.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedField {
    /// Field name.
    pub name: String,
    /// Type tag of the encoded value.
    pub tag: u8,
    /// Encoded value bytes.
    pub value: Bytes,
}

/// Ordered list of typed fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<FieldDef>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Append a field declaration (builder style).
    pub fn field(mut self, name: &str, ty: ValueType) -> Self {
        self.fields.push(FieldDef {
            name: name.to_string(),
            ty,
        });
        self
    }

    /// Declared fields in order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Declared type of a field.
    pub fn get(&self, name: &str) -> Option<&ValueType> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.ty)
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if no fields are declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check the declaration itself: non-empty, unique names, nested records too.
    pub fn validate(&self) -> Result<()> {
        for (i, def) in self.fields.iter().enumerate() {
            if def.name.is_empty() {
                return Err(AmpError::SchemaViolation(
                    "field names must not be empty".to_string(),
                ));
            }
            if self.fields[..i].iter().any(|f| f.name == def.name) {
                return Err(AmpError::SchemaViolation(format!(
                    "field {} declared twice",
                    def.name
                )));
            }
            validate_type(&def.ty)?;
        }
        Ok(())
    }

    /// Pair each declared field with its value from `fields`, in declared order.
    ///
    /// Fails with `SchemaViolation` if a declared field is absent, a field is
    /// not declared, or a name appears twice.
    pub fn match_fields<'a>(&'a self, fields: &'a Fields) -> Result<Vec<(&'a FieldDef, &'a Value)>> {
        self.check_names(fields.iter().map(|(name, _)| name))?;
        self.fields
            .iter()
            .map(|def| {
                fields
                    .get(&def.name)
                    .map(|value| (def, value))
                    .ok_or_else(|| missing(&def.name))
            })
            .collect()
    }

    /// Encode a field set in declared order.
    pub fn encode_fields(&self, fields: &Fields) -> Result<Vec<EncodedField>> {
        self.match_fields(fields)?
            .into_iter()
            .map(|(def, value)| {
                Ok(EncodedField {
                    name: def.name.clone(),
                    tag: def.ty.tag(),
                    value: Bytes::from(binary::encode(value, &def.ty)?),
                })
            })
            .collect()
    }

    /// Decode encoded fields against this schema.
    ///
    /// Fields may arrive in any order; the result is in declared order.
    /// Shape mismatches (missing, extra, duplicate, wrong tag) are
    /// `SchemaViolation`; undecodable bytes are `MalformedValue`.
    pub fn decode_fields(&self, encoded: &[EncodedField]) -> Result<Fields> {
        self.check_names(encoded.iter().map(|f| f.name.as_str()))?;

        let mut out = Fields::new();
        for def in &self.fields {
            let field = encoded
                .iter()
                .find(|f| f.name == def.name)
                .ok_or_else(|| missing(&def.name))?;
            if field.tag != def.ty.tag() {
                return Err(AmpError::SchemaViolation(format!(
                    "field {} has type tag {}, expected {}",
                    def.name,
                    field.tag,
                    def.ty.name()
                )));
            }
            out.push(&def.name, binary::decode(&field.value, &def.ty)?);
        }
        Ok(out)
    }

    fn check_names<'a>(&self, names: impl Iterator<Item = &'a str>) -> Result<()> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.fields.len());
        for name in names {
            if seen.contains(&name) {
                return Err(AmpError::SchemaViolation(format!(
                    "field {} appears twice",
                    name
                )));
            }
            if self.get(name).is_none() {
                return Err(AmpError::SchemaViolation(format!(
                    "unexpected field {}",
                    name
                )));
            }
            seen.push(name);
        }
        Ok(())
    }
}

fn missing(name: &str) -> AmpError {
    AmpError::SchemaViolation(format!("missing field {}", name))
}

fn validate_type(ty: &ValueType) -> Result<()> {
    match ty {
        ValueType::List(element) => validate_type(element),
        ValueType::Record(schema) => schema.validate(),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_schema() -> Schema {
        Schema::new()
            .field("a", ValueType::Integer)
            .field("b", ValueType::Text)
    }

    #[test]
    fn test_encode_orders_by_declaration() {
        let fields = Fields::new().with("b", "hello").with("a", 7);
        let encoded = item_schema().encode_fields(&fields).unwrap();

        let names: Vec<_> = encoded.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(encoded[0].tag, ValueType::Integer.tag());
    }

    #[test]
    fn test_decode_any_order() {
        let schema = item_schema();
        let mut encoded = schema
            .encode_fields(&Fields::new().with("a", 7).with("b", "x"))
            .unwrap();
        encoded.reverse();

        let decoded = schema.decode_fields(&encoded).unwrap();
        assert_eq!(decoded, Fields::new().with("a", 7).with("b", "x"));
    }

    #[test]
    fn test_missing_field_rejected() {
        let err = item_schema()
            .encode_fields(&Fields::new().with("a", 7))
            .unwrap_err();
        assert!(matches!(err, AmpError::SchemaViolation(ref m) if m.contains("missing field b")));
    }

    #[test]
    fn test_extra_field_rejected() {
        let fields = Fields::new().with("a", 7).with("b", "x").with("c", true);
        let err = item_schema().encode_fields(&fields).unwrap_err();
        assert!(matches!(err, AmpError::SchemaViolation(ref m) if m.contains("unexpected field c")));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let fields = Fields::new().with("a", 7).with("a", 8).with("b", "x");
        assert!(matches!(
            item_schema().encode_fields(&fields),
            Err(AmpError::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_tag_mismatch_is_schema_violation() {
        let schema = item_schema();
        let mut encoded = schema
            .encode_fields(&Fields::new().with("a", 7).with("b", "x"))
            .unwrap();
        encoded[1].tag = ValueType::Bytes.tag();

        assert!(matches!(
            schema.decode_fields(&encoded),
            Err(AmpError::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_validate_declaration() {
        assert!(item_schema().validate().is_ok());
        assert!(Schema::new().field("", ValueType::Integer).validate().is_err());
        assert!(Schema::new()
            .field("a", ValueType::Integer)
            .field("a", ValueType::Text)
            .validate()
            .is_err());

        let nested = Schema::new().field(
            "okla",
            ValueType::list(ValueType::Record(
                Schema::new().field("x", ValueType::Integer).field("x", ValueType::Integer),
            )),
        );
        assert!(nested.validate().is_err());
    }
}
