//! Minimal structural model of the FHIR resources the aggregator fetches.
//!
//! Each resource keeps only the fields this backend reads (identifiers,
//! coded display text, quantities, references, dates). Everything else is
//! carried through untouched in a flattened `extra` map, so re-serializing a
//! fetched bundle hands the presentation layer what the server sent.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

/// A FHIR searchset Bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(rename = "resourceType")]
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<BundleEntry>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Bundle {
    /// Parse a response body, rejecting anything that is not a Bundle.
    ///
    /// # Errors
    ///
    /// Returns a description of why the body is not a usable Bundle.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let bundle: Self = serde_json::from_value(value).map_err(|e| e.to_string())?;
        if bundle.resource_type != "Bundle" {
            return Err(format!("expected Bundle, got {}", bundle.resource_type));
        }
        Ok(bundle)
    }

    /// Number of entries in this page.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entry.len()
    }

    /// Iterate over the resources in this bundle.
    pub fn resources(&self) -> impl Iterator<Item = &ClinicalResource> {
        self.entry.iter().filter_map(|e| e.resource.as_ref())
    }
}

/// One entry of a Bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ClinicalResource>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A clinical resource, tagged by its `resourceType`.
///
/// Resource types outside the aggregated set (e.g. `OperationOutcome`
/// entries in a searchset) are kept as opaque JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClinicalResource {
    Patient(Patient),
    Observation(Observation),
    Encounter(Encounter),
    MedicationRequest(MedicationRequest),
    DiagnosticReport(DiagnosticReport),
    Procedure(Procedure),
    Other(Value),
}

impl<'de> Deserialize<'de> for ClinicalResource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let Some(kind) = value.get("resourceType").and_then(Value::as_str) else {
            return Err(D::Error::missing_field("resourceType"));
        };

        let typed = match kind {
            "Patient" => Self::typed(&value, Self::Patient),
            "Observation" => Self::typed(&value, Self::Observation),
            "Encounter" => Self::typed(&value, Self::Encounter),
            "MedicationRequest" => Self::typed(&value, Self::MedicationRequest),
            "DiagnosticReport" => Self::typed(&value, Self::DiagnosticReport),
            "Procedure" => Self::typed(&value, Self::Procedure),
            _ => None,
        };
        Ok(typed.unwrap_or_else(|| Self::Other(value)))
    }
}

impl ClinicalResource {
    /// Read `value` into a typed variant. A resource whose contract fields
    /// carry unexpected shapes stays opaque rather than failing its bundle.
    fn typed<T: serde::de::DeserializeOwned>(value: &Value, wrap: fn(T) -> Self) -> Option<Self> {
        match T::deserialize(value) {
            Ok(resource) => Some(wrap(resource)),
            Err(e) => {
                tracing::debug!(error = %e, "Keeping resource as opaque JSON");
                None
            }
        }
    }

    /// The resource's logical id.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Patient(r) => r.id.as_deref(),
            Self::Observation(r) => r.id.as_deref(),
            Self::Encounter(r) => r.id.as_deref(),
            Self::MedicationRequest(r) => r.id.as_deref(),
            Self::DiagnosticReport(r) => r.id.as_deref(),
            Self::Procedure(r) => r.id.as_deref(),
            Self::Other(v) => v.get("id").and_then(Value::as_str),
        }
    }

    /// The patient this resource belongs to, as a `Patient/{id}` reference.
    #[must_use]
    pub fn patient_reference(&self) -> Option<String> {
        let subject = match self {
            Self::Patient(r) => return r.id.as_ref().map(|id| format!("Patient/{id}")),
            Self::Observation(r) => r.subject.as_ref(),
            Self::Encounter(r) => r.subject.as_ref(),
            Self::MedicationRequest(r) => r.subject.as_ref(),
            Self::DiagnosticReport(r) => r.subject.as_ref(),
            Self::Procedure(r) => r.subject.as_ref(),
            Self::Other(_) => None,
        };
        subject.and_then(|s| s.reference.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<HumanName>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Patient {
    /// Best display name: `text`, else given names followed by family.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        let name = self.name.first()?;
        if let Some(text) = &name.text {
            return Some(text.clone());
        }
        let mut parts: Vec<&str> = name.given.iter().flatten().map(String::as_str).collect();
        if let Some(family) = &name.family {
            parts.push(family);
        }
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_quantity: Option<Quantity>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encounter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medication_codeable_concept: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authored_on: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date_time: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result: Vec<Reference>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Procedure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performed_date_time: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,

    /// Entries may be `null` when only a `_given` extension carries the value.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub given: Vec<Option<String>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CodeableConcept {
    /// `text`, else the first coding's display, else its code.
    #[must_use]
    pub fn display_text(&self) -> Option<&str> {
        self.text.as_deref().or_else(|| {
            self.coding.iter().find_map(|c| c.display.as_deref().or(c.code.as_deref()))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A measured amount. `value` is kept as a JSON number, not coerced to `f64`;
/// trailing zeros (`98.60`) are not preserved on re-serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Number>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Period {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn vitals_bundle() -> Value {
        json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": 2,
            "entry": [
                {
                    "fullUrl": "https://fhir.example/Observation/o1",
                    "resource": {
                        "resourceType": "Observation",
                        "id": "o1",
                        "status": "final",
                        "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4", "display": "Heart rate"}]},
                        "subject": {"reference": "Patient/p1"},
                        "effectiveDateTime": "2024-01-02T03:04:05Z",
                        "valueQuantity": {"value": 72, "unit": "beats/minute", "comparator": "<"}
                    },
                    "search": {"mode": "match"}
                },
                {
                    "resource": {"resourceType": "OperationOutcome", "id": "warn"}
                }
            ]
        })
    }

    #[test]
    fn test_bundle_passthrough_preserves_unknown_fields() {
        let raw = vitals_bundle();
        let bundle = Bundle::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&bundle).unwrap(), raw);
    }

    #[test]
    fn test_typed_fields() {
        let bundle = Bundle::from_value(vitals_bundle()).unwrap();
        assert_eq!(bundle.entry_count(), 2);

        let first = bundle.resources().next().unwrap();
        let ClinicalResource::Observation(obs) = first else {
            panic!("expected observation");
        };
        assert_eq!(obs.code.as_ref().unwrap().display_text(), Some("Heart rate"));
        assert_eq!(obs.value_quantity.as_ref().unwrap().value, Some(Number::from(72)));
        assert_eq!(first.patient_reference().as_deref(), Some("Patient/p1"));

        let second = bundle.resources().nth(1).unwrap();
        assert!(matches!(second, ClinicalResource::Other(_)));
        assert_eq!(second.id(), Some("warn"));
    }

    #[test]
    fn test_rejects_non_bundle() {
        let err = Bundle::from_value(json!({"resourceType": "Patient", "id": "p1"})).unwrap_err();
        assert!(err.contains("expected Bundle"));
        assert!(Bundle::from_value(json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn test_patient_display_name() {
        let patient: Patient = serde_json::from_value(json!({
            "resourceType": "Patient",
            "id": "p1",
            "name": [{"given": ["Jane", "Q"], "family": "Doe"}]
        }))
        .unwrap();
        assert_eq!(patient.display_name().as_deref(), Some("Jane Q Doe"));
        assert_eq!(
            ClinicalResource::Patient(patient).patient_reference().as_deref(),
            Some("Patient/p1")
        );
    }

    #[test]
    fn test_null_given_name_with_extension() {
        let raw = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "entry": [{
                "resource": {
                    "resourceType": "Patient",
                    "id": "p1",
                    "name": [{
                        "family": "Doe",
                        "given": ["Jane", null],
                        "_given": [null, {"extension": [{"url": "http://example.org/initial", "valueString": "Q"}]}]
                    }]
                }
            }]
        });

        let bundle = Bundle::from_value(raw.clone()).unwrap();
        let Some(ClinicalResource::Patient(patient)) = bundle.resources().next() else {
            panic!("expected typed patient");
        };
        assert_eq!(patient.display_name().as_deref(), Some("Jane Doe"));
        assert_eq!(serde_json::to_value(&bundle).unwrap(), raw);
    }

    #[test]
    fn test_unexpected_field_shape_keeps_resource_opaque() {
        let raw = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "entry": [
                {"resource": {"resourceType": "Observation", "id": "o1", "status": "final"}},
                {"resource": {"resourceType": "Observation", "id": "o2", "effectiveDateTime": 20240102}}
            ]
        });

        let bundle = Bundle::from_value(raw.clone()).unwrap();
        assert_eq!(bundle.entry_count(), 2);

        let kinds: Vec<_> = bundle.resources().collect();
        assert!(matches!(kinds[0], ClinicalResource::Observation(_)));
        assert!(matches!(kinds[1], ClinicalResource::Other(_)));
        assert_eq!(kinds[1].id(), Some("o2"));
        assert_eq!(serde_json::to_value(&bundle).unwrap(), raw);
    }

    #[test]
    fn test_quantity_decimal_value() {
        let quantity: Quantity = serde_json::from_str(r#"{"value": 98.60, "unit": "degF"}"#).unwrap();
        assert_eq!(quantity.value.as_ref().and_then(Number::as_f64), Some(98.6));
        assert_eq!(serde_json::to_string(&quantity).unwrap(), r#"{"value":98.6,"unit":"degF"}"#);
    }
}
