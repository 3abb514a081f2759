//! The clinical resource kinds the aggregator knows how to fetch.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use url::Url;

/// One clinical resource collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    Patient,
    Observation,
    Encounter,
    MedicationRequest,
    DiagnosticReport,
    Procedure,
}

impl ResourceKind {
    /// Every kind, in payload order.
    pub const ALL: [Self; 6] = [
        Self::Patient,
        Self::Observation,
        Self::Encounter,
        Self::MedicationRequest,
        Self::DiagnosticReport,
        Self::Procedure,
    ];

    /// FHIR resource type name.
    #[must_use]
    pub const fn resource_type(self) -> &'static str {
        match self {
            Self::Patient => "Patient",
            Self::Observation => "Observation",
            Self::Encounter => "Encounter",
            Self::MedicationRequest => "MedicationRequest",
            Self::DiagnosticReport => "DiagnosticReport",
            Self::Procedure => "Procedure",
        }
    }

    /// Key of this kind in the aggregated payload.
    #[must_use]
    pub const fn payload_key(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Observation => "observations",
            Self::Encounter => "encounters",
            Self::MedicationRequest => "medications",
            Self::DiagnosticReport => "diagnostic_reports",
            Self::Procedure => "procedures",
        }
    }

    /// Search parameter that pins a query to one patient.
    #[must_use]
    pub const fn patient_param(self) -> &'static str {
        match self {
            Self::Patient => "_id",
            _ => "patient",
        }
    }

    /// Search parameters, filtered by patient when the session has one.
    #[must_use]
    pub fn search_params(self, patient_id: Option<&str>) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();

        if let Some(pid) = patient_id {
            params.push((self.patient_param(), pid.to_string()));
        }

        match self {
            Self::Patient => {}
            Self::Observation => {
                params.push(("category", "vital-signs".to_string()));
                params.push(("_sort", "-date".to_string()));
                params.push(("_count", "20".to_string()));
            }
            Self::Encounter => {
                params.push(("_sort", "-date".to_string()));
                params.push(("_count", "10".to_string()));
            }
            Self::MedicationRequest | Self::DiagnosticReport | Self::Procedure => {
                params.push(("_sort", "-date".to_string()));
                params.push(("_count", "5".to_string()));
            }
        }
        params
    }

    /// Absolute search URL under `base_url`.
    ///
    /// # Errors
    ///
    /// Returns a parse error if `base_url` is not an absolute URL.
    pub fn search_url(self, base_url: &str, patient_id: Option<&str>) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&format!("{}/{}", base_url.trim_end_matches('/'), self.resource_type()))?;
        let params = self.search_params(patient_id);
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    /// Search URL for a caller-supplied query string.
    ///
    /// When the session is scoped to a patient, any parameter that would
    /// select other patients (`patient`, `subject`, `_id` on Patient, with
    /// modifiers or chains) is dropped and the session's patient is pinned.
    ///
    /// # Errors
    ///
    /// Returns a parse error if `base_url` is not an absolute URL.
    pub fn custom_search_url(
        self,
        base_url: &str,
        patient_id: Option<&str>,
        query: &str,
    ) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&format!("{}/{}", base_url.trim_end_matches('/'), self.resource_type()))?;

        let mut params: Vec<(String, String)> = url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
            .filter(|(key, _)| !key.is_empty())
            .filter(|(key, _)| patient_id.is_none() || !self.selects_patient(key))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        if let Some(pid) = patient_id {
            params.push((self.patient_param().to_string(), pid.to_string()));
        }

        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    fn selects_patient(self, key: &str) -> bool {
        let base = key.split([':', '.']).next().unwrap_or(key);
        match self {
            Self::Patient => base == "_id",
            _ => base == "patient" || base == "subject",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource_type())
    }
}

/// Error parsing a resource kind name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown resource kind: {0}")]
pub struct UnknownResourceKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownResourceKind;

    /// Accepts the FHIR type name or the payload key, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| {
                kind.resource_type().eq_ignore_ascii_case(needle)
                    || kind.payload_key().eq_ignore_ascii_case(needle)
            })
            .ok_or_else(|| UnknownResourceKind(needle.to_string()))
    }
}

/// Parse a comma-separated kind list. Empty input means every kind.
///
/// # Errors
///
/// Returns the first name that is not a known kind.
pub fn parse_kind_list(raw: &str) -> Result<Vec<ResourceKind>, UnknownResourceKind> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_urls() {
        let base = "https://sandbox.example/fhir/";

        let url = ResourceKind::Patient.search_url(base, Some("p1")).unwrap();
        assert_eq!(url.as_str(), "https://sandbox.example/fhir/Patient?_id=p1");

        let url = ResourceKind::Observation.search_url(base, Some("p1")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://sandbox.example/fhir/Observation?patient=p1&category=vital-signs&_sort=-date&_count=20"
        );

        let url = ResourceKind::Patient.search_url(base, None).unwrap();
        assert_eq!(url.as_str(), "https://sandbox.example/fhir/Patient");
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("observation".parse::<ResourceKind>(), Ok(ResourceKind::Observation));
        assert_eq!("diagnostic_reports".parse::<ResourceKind>(), Ok(ResourceKind::DiagnosticReport));
        assert_eq!("medications".parse::<ResourceKind>(), Ok(ResourceKind::MedicationRequest));
        assert!("Condition".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_kind_list("Patient, Observation,,").unwrap(),
            vec![ResourceKind::Patient, ResourceKind::Observation]
        );
        assert!(parse_kind_list("").unwrap().is_empty());
        assert_eq!(parse_kind_list("Patient,Bogus").unwrap_err().0, "Bogus");
    }

    #[test]
    fn test_custom_search_pins_patient() {
        let base = "https://sandbox.example/fhir";

        let url = ResourceKind::Observation
            .custom_search_url(base, Some("p1"), "code=8867-4&patient=p2&subject:Patient=p3&_count=3")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://sandbox.example/fhir/Observation?code=8867-4&_count=3&patient=p1"
        );

        let url = ResourceKind::Patient.custom_search_url(base, Some("p1"), "?_id=p2&_elements=name").unwrap();
        assert_eq!(url.as_str(), "https://sandbox.example/fhir/Patient?_elements=name&_id=p1");
    }

    #[test]
    fn test_custom_search_without_patient_context() {
        let base = "https://sandbox.example/fhir";

        let url = ResourceKind::Encounter.custom_search_url(base, None, "patient=p9&status=finished").unwrap();
        assert_eq!(url.as_str(), "https://sandbox.example/fhir/Encounter?patient=p9&status=finished");

        let url = ResourceKind::Encounter.custom_search_url(base, None, "").unwrap();
        assert_eq!(url.as_str(), "https://sandbox.example/fhir/Encounter");
    }
}
