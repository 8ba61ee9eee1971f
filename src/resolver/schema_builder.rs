// In: src/resolver/schema_builder.rs

//! Accumulates per-field observations and produces the unified Arrow schema.

use std::collections::{BTreeMap, HashMap as StdHashMap};

use arrow::datatypes::{DataType, Field, Schema};
use hashbrown::HashMap;
use serde_json::Value;

use crate::types::{InferredType, ENCODING_METADATA_KEY, JSON_ENCODING};

#[derive(Debug, Clone, Copy)]
struct FieldObservation {
    ty: InferredType,
    saw_null: bool,
    /// Number of records in which the field appeared.
    present: u64,
}

pub(crate) struct SchemaBuilder<'a> {
    type_hints: &'a BTreeMap<String, DataType>,
    /// Field names in first-seen order.
    order: Vec<String>,
    fields: HashMap<String, FieldObservation>,
    /// Records fields may be absent from; `false` for column arrays.
    track_presence: bool,
    records: u64,
}

impl<'a> SchemaBuilder<'a> {
    /// A builder for row objects, where a field missing from some record is nullable.
    pub fn for_records(type_hints: &'a BTreeMap<String, DataType>) -> Self {
        Self::new(type_hints, true)
    }

    /// A builder for column arrays, where each field is observed element by element.
    pub fn for_columns(type_hints: &'a BTreeMap<String, DataType>) -> Self {
        Self::new(type_hints, false)
    }

    fn new(type_hints: &'a BTreeMap<String, DataType>, track_presence: bool) -> Self {
        Self {
            type_hints,
            order: Vec::new(),
            fields: HashMap::new(),
            track_presence,
            records: 0,
        }
    }

    fn entry(&mut self, name: &str) -> &mut FieldObservation {
        if !self.fields.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.fields
            .entry_ref(name)
            .or_insert(FieldObservation {
                ty: InferredType::Null,
                saw_null: false,
                present: 0,
            })
    }

    /// Registers a field without observing a value for it.
    pub fn declare(&mut self, name: &str) {
        self.entry(name);
    }

    pub fn observe(&mut self, name: &str, value: &Value) {
        self.observe_type(name, InferredType::of_value(value));
    }

    pub fn observe_type(&mut self, name: &str, ty: InferredType) {
        let entry = self.entry(name);
        entry.present += 1;
        if ty == InferredType::Null {
            entry.saw_null = true;
            return;
        }
        let previous = entry.ty;
        entry.ty = previous.merge(ty);
        if entry.ty == InferredType::Variant && previous != InferredType::Variant {
            log::warn!(
                "Field '{}' mixes {} and {} values; storing it as JSON text",
                name,
                previous,
                ty
            );
        }
    }

    /// Marks the end of one record.
    pub fn end_record(&mut self) {
        self.records += 1;
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Builds the schema. When `partial` is set, inference stopped before the
    /// end of the data and every field is declared nullable.
    pub fn finish(self, partial: bool) -> Schema {
        let fields: Vec<Field> = self
            .order
            .iter()
            .map(|name| {
                let obs = self.fields[name.as_str()];
                let absent_somewhere = self.track_presence && obs.present < self.records;
                let nullable =
                    partial || obs.saw_null || absent_somewhere || obs.ty == InferredType::Null;

                match self.type_hints.get(name) {
                    Some(hinted) => Field::new(name, hinted.clone(), nullable),
                    None => {
                        let field = Field::new(name, obs.ty.to_arrow_type(), nullable);
                        if obs.ty.is_json_encoded() {
                            field.with_metadata(StdHashMap::from([(
                                ENCODING_METADATA_KEY.to_string(),
                                JSON_ENCODING.to_string(),
                            )]))
                        } else {
                            field
                        }
                    }
                }
            })
            .collect();
        Schema::new(fields)
    }
}
