//! Data models for SMART protocol documents and FHIR resources.
//!
//! All models use `#[serde(default)]` for optional fields so sparse upstream
//! documents still parse.

mod resources;
mod smart;

pub use resources::{
    Bundle, BundleEntry, ClinicalResource, CodeableConcept, Coding, DiagnosticReport, Encounter,
    HumanName, MedicationRequest, Observation, Patient, Period, Procedure, Quantity, Reference,
};
pub use smart::{
    CapabilityStatement, IdTokenClaims, OAUTH_URIS_EXTENSION, SmartConfiguration, TokenResponse,
};
