//! Spool records and the fixed variable schema.
//!
//! A `SpoolRecord` is what the inventory service told us about one spool,
//! with every field optional. A `ResolvedSchema` is the six-field value the
//! engine writes to the macro variables, where anything missing has been
//! replaced by the null sentinel.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Number;

/// A spool as reported by the inventory service.
///
/// Fetched fresh for every reconciliation; never cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpoolRecord {
    /// Filament identifier
    pub id: Option<u64>,

    /// Extruder temperature setting
    pub hotend_temp: Option<Number>,

    /// Bed temperature setting
    pub bed_temp: Option<Number>,

    /// Material, e.g. "PLA"
    pub material: Option<String>,

    /// Filament name
    pub name: Option<String>,

    /// Vendor name
    pub vendor: Option<String>,
}

impl SpoolRecord {
    /// A record with every field absent
    pub fn empty() -> Self {
        Self::default()
    }
}

/// One of the six variables written to the macro
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaField {
    Id,
    HotendTemp,
    BedTemp,
    Material,
    Name,
    Vendor,
}

impl SchemaField {
    /// All fields, in write order
    pub const ALL: [SchemaField; 6] = [
        SchemaField::Id,
        SchemaField::HotendTemp,
        SchemaField::BedTemp,
        SchemaField::Material,
        SchemaField::Name,
        SchemaField::Vendor,
    ];

    /// Variable name on the macro
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaField::Id => "id",
            SchemaField::HotendTemp => "hotend_temp",
            SchemaField::BedTemp => "bed_temp",
            SchemaField::Material => "material",
            SchemaField::Name => "name",
            SchemaField::Vendor => "vendor",
        }
    }
}

impl fmt::Display for SchemaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a single schema field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// The null sentinel
    Null,

    /// A number, passed through exactly as the inventory reported it
    Number(Number),

    /// A string
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    fn from_number(value: Option<&Number>) -> Self {
        value.cloned().map(FieldValue::Number).unwrap_or(FieldValue::Null)
    }

    fn from_text(value: Option<&String>) -> Self {
        value.cloned().map(FieldValue::Text).unwrap_or(FieldValue::Null)
    }
}

/// The fixed six-field structure written to the variable store.
///
/// This is the only externally observable state the engine produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSchema {
    pub id: FieldValue,
    pub hotend_temp: FieldValue,
    pub bed_temp: FieldValue,
    pub material: FieldValue,
    pub name: FieldValue,
    pub vendor: FieldValue,
}

impl Default for ResolvedSchema {
    fn default() -> Self {
        Self::all_null()
    }
}

impl ResolvedSchema {
    /// Schema with every field set to the null sentinel
    pub fn all_null() -> Self {
        Self {
            id: FieldValue::Null,
            hotend_temp: FieldValue::Null,
            bed_temp: FieldValue::Null,
            material: FieldValue::Null,
            name: FieldValue::Null,
            vendor: FieldValue::Null,
        }
    }

    /// Map a fetched record into the schema.
    ///
    /// Missing fields become the null sentinel. Temperatures are copied
    /// verbatim; defaulting them is the macro's business.
    pub fn from_record(record: &SpoolRecord) -> Self {
        Self {
            id: record
                .id
                .map(|id| FieldValue::Number(id.into()))
                .unwrap_or(FieldValue::Null),
            hotend_temp: FieldValue::from_number(record.hotend_temp.as_ref()),
            bed_temp: FieldValue::from_number(record.bed_temp.as_ref()),
            material: FieldValue::from_text(record.material.as_ref()),
            name: FieldValue::from_text(record.name.as_ref()),
            vendor: FieldValue::from_text(record.vendor.as_ref()),
        }
    }

    /// Resolve an optional record; `None` means no active spool
    pub fn resolve(record: Option<&SpoolRecord>) -> Self {
        record.map(Self::from_record).unwrap_or_else(Self::all_null)
    }

    /// Value of one field
    pub fn get(&self, field: SchemaField) -> &FieldValue {
        match field {
            SchemaField::Id => &self.id,
            SchemaField::HotendTemp => &self.hotend_temp,
            SchemaField::BedTemp => &self.bed_temp,
            SchemaField::Material => &self.material,
            SchemaField::Name => &self.name,
            SchemaField::Vendor => &self.vendor,
        }
    }

    /// Iterate all fields in write order
    pub fn fields(&self) -> impl Iterator<Item = (SchemaField, &FieldValue)> {
        SchemaField::ALL.into_iter().map(move |field| (field, self.get(field)))
    }

    pub fn is_all_null(&self) -> bool {
        self.fields().all(|(_, value)| value.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_record_fills_null_sentinel() {
        let record = SpoolRecord {
            id: Some(5),
            hotend_temp: Some(210.into()),
            material: Some("PLA".to_string()),
            ..Default::default()
        };

        let schema = ResolvedSchema::from_record(&record);

        assert_eq!(schema.id, FieldValue::Number(5.into()));
        assert_eq!(schema.hotend_temp, FieldValue::Number(210.into()));
        assert_eq!(schema.bed_temp, FieldValue::Null);
        assert_eq!(schema.material, FieldValue::Text("PLA".to_string()));
        assert_eq!(schema.name, FieldValue::Null);
        assert_eq!(schema.vendor, FieldValue::Null);
    }

    #[test]
    fn test_no_record_is_all_null() {
        assert!(ResolvedSchema::resolve(None).is_all_null());
        assert!(ResolvedSchema::from_record(&SpoolRecord::empty()).is_all_null());
    }

    #[test]
    fn test_temperatures_pass_through_unmodified() {
        let record = SpoolRecord {
            hotend_temp: Some(Number::from_f64(212.5).unwrap()),
            bed_temp: Some((-5).into()),
            ..Default::default()
        };

        let schema = ResolvedSchema::from_record(&record);
        assert_eq!(schema.hotend_temp.clone(), FieldValue::Number(Number::from_f64(212.5).unwrap()));
        assert_eq!(schema.bed_temp, FieldValue::Number((-5).into()));
    }

    #[test]
    fn test_fields_in_write_order() {
        let names: Vec<&str> = ResolvedSchema::all_null()
            .fields()
            .map(|(field, _)| field.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["id", "hotend_temp", "bed_temp", "material", "name", "vendor"]
        );
    }

    #[test]
    fn test_schema_json_uses_null_for_sentinel() {
        let record = SpoolRecord {
            id: Some(3),
            vendor: Some("Prusament".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(ResolvedSchema::from_record(&record)).unwrap();

        assert_eq!(json["id"], 3);
        assert_eq!(json["vendor"], "Prusament");
        assert!(json["material"].is_null());
    }
}
