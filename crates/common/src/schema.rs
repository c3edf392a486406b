// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Event schema registry for positional payload decoding.
//!
//! The DLL emits event payloads as positional arrays; the declared field
//! order of each schema is the only thing that gives those positions names.
//! Decoding is a zip over the declared fields; validation is per-field type
//! checking. Unknown events are not an error at this layer — the pipeline
//! decides whether to drop them.

use serde_json::{Map, Value};
use std::collections::HashMap;
use strum::Display;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload for '{event}' is not an array")]
    PayloadNotArray { event: String },
    #[error("payload for '{event}' has {actual} fields, schema declares {expected}")]
    ArityMismatch {
        event: String,
        expected: usize,
        actual: usize,
    },
    #[error("field '{field}' of '{event}' is not a {expected}: {value}")]
    TypeMismatch {
        event: String,
        field: String,
        expected: FieldType,
        value: Value,
    },
}

/// Declared type of one positional payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FieldType {
    Number,
    String,
    Boolean,
    /// Any JSON value, passed through unchecked.
    Json,
}

impl FieldType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::Number => value.is_number(),
            FieldType::String => value.is_string(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Json => true,
        }
    }
}

/// One named, typed field of an event payload.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
}

impl FieldSpec {
    pub const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self { name, field_type }
    }
}

/// Declared field order for one event type.
#[derive(Debug, Clone)]
pub struct EventSchema {
    pub name: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl EventSchema {
    pub fn new(name: &'static str, fields: Vec<FieldSpec>) -> Self {
        Self { name, fields }
    }

    /// Zip the positional payload over the declared fields, producing a named
    /// object. Fails if the payload is not an array, has the wrong arity, or
    /// any field fails its type check.
    pub fn decode(&self, payload: &Value) -> Result<Map<String, Value>, DecodeError> {
        let Some(items) = payload.as_array() else {
            return Err(DecodeError::PayloadNotArray {
                event: self.name.to_string(),
            });
        };
        if items.len() != self.fields.len() {
            return Err(DecodeError::ArityMismatch {
                event: self.name.to_string(),
                expected: self.fields.len(),
                actual: items.len(),
            });
        }
        let mut object = Map::with_capacity(self.fields.len());
        for (field, value) in self.fields.iter().zip(items) {
            if !field.field_type.accepts(value) {
                return Err(DecodeError::TypeMismatch {
                    event: self.name.to_string(),
                    field: field.name.to_string(),
                    expected: field.field_type,
                    value: value.clone(),
                });
            }
            object.insert(field.name.to_string(), value.clone());
        }
        Ok(object)
    }
}

/// All event schemas known to the pipeline, keyed by event name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<&'static str, EventSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The schemas the stock Civ V event stream uses.
    pub fn with_defaults() -> Self {
        use FieldType::*;
        let mut registry = Self::new();
        for schema in [
            EventSchema::new(
                "PlayerDoneTurn",
                vec![
                    FieldSpec::new("PlayerID", Number),
                    FieldSpec::new("Turn", Number),
                ],
            ),
            EventSchema::new(
                "PlayerEndTurnInitiated",
                vec![FieldSpec::new("PlayerID", Number)],
            ),
            EventSchema::new(
                "PlayerVictory",
                vec![
                    FieldSpec::new("PlayerID", Number),
                    FieldSpec::new("VictoryType", String),
                ],
            ),
            EventSchema::new(
                "CityFounded",
                vec![
                    FieldSpec::new("PlayerID", Number),
                    FieldSpec::new("CityID", Number),
                    FieldSpec::new("Name", String),
                    FieldSpec::new("X", Number),
                    FieldSpec::new("Y", Number),
                ],
            ),
            EventSchema::new(
                "CityCaptured",
                vec![
                    FieldSpec::new("OldOwnerID", Number),
                    FieldSpec::new("NewOwnerID", Number),
                    FieldSpec::new("CityID", Number),
                ],
            ),
            EventSchema::new(
                "WarDeclared",
                vec![
                    FieldSpec::new("AttackerID", Number),
                    FieldSpec::new("DefenderID", Number),
                ],
            ),
            EventSchema::new(
                "PeaceMade",
                vec![
                    FieldSpec::new("PlayerID", Number),
                    FieldSpec::new("OtherPlayerID", Number),
                ],
            ),
            EventSchema::new(
                "UnitKilled",
                vec![
                    FieldSpec::new("OwnerID", Number),
                    FieldSpec::new("UnitID", Number),
                    FieldSpec::new("KillerID", Number),
                ],
            ),
            EventSchema::new(
                "TechResearched",
                vec![
                    FieldSpec::new("PlayerID", Number),
                    FieldSpec::new("TechType", String),
                ],
            ),
            EventSchema::new(
                "PolicyAdopted",
                vec![
                    FieldSpec::new("PlayerID", Number),
                    FieldSpec::new("PolicyType", String),
                ],
            ),
            EventSchema::new(
                "PlayersMet",
                vec![
                    FieldSpec::new("PlayerID", Number),
                    FieldSpec::new("OtherPlayerID", Number),
                ],
            ),
            EventSchema::new(
                "ExternalCall",
                vec![
                    FieldSpec::new("name", String),
                    FieldSpec::new("args", Json),
                    FieldSpec::new("callID", String),
                ],
            ),
        ] {
            registry.register(schema);
        }
        registry
    }

    pub fn register(&mut self, schema: EventSchema) {
        self.schemas.insert(schema.name, schema);
    }

    pub fn get(&self, event: &str) -> Option<&EventSchema> {
        self.schemas.get(event)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.schemas.contains_key(event)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn turn_schema() -> EventSchema {
        EventSchema::new(
            "PlayerEndTurnInitiated",
            vec![FieldSpec::new("PlayerID", FieldType::Number)],
        )
    }

    #[test]
    fn decode_zips_positional_payload() {
        let decoded = turn_schema().decode(&json!([7])).unwrap();
        assert_eq!(decoded.get("PlayerID"), Some(&json!(7)));
    }

    #[test]
    fn decode_rejects_wrong_arity() {
        let err = turn_schema().decode(&json!([7, 8])).unwrap_err();
        assert!(matches!(err, DecodeError::ArityMismatch { expected: 1, actual: 2, .. }));
    }

    #[test]
    fn decode_rejects_wrong_type() {
        let err = turn_schema().decode(&json!(["seven"])).unwrap_err();
        assert!(matches!(err, DecodeError::TypeMismatch { .. }));
    }

    #[test]
    fn decode_rejects_non_array_payload() {
        let err = turn_schema().decode(&json!({"PlayerID": 7})).unwrap_err();
        assert!(matches!(err, DecodeError::PayloadNotArray { .. }));
    }

    #[test]
    fn default_registry_knows_turn_events() {
        let registry = SchemaRegistry::with_defaults();
        assert!(registry.contains("PlayerDoneTurn"));
        assert!(registry.contains("ExternalCall"));
        assert!(!registry.contains("NoSuchEvent"));
    }
}
