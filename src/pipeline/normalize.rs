//! AI-output normalization and geofence validation.
//!
//! Vendors return free text that should be JSON but often arrives wrapped in
//! a markdown fence or as a bare object. `normalize` turns any accepted shape
//! into a list of listing objects; `validate` then enforces the
//! Argentina-only service area on every listing's locations.

use serde_json::Value;

use crate::error::ValidationError;

/// How much of an unparseable response to keep in the error.
const SNIPPET_LEN: usize = 200;

/// Parse a raw completion into a list of listing objects.
///
/// Accepts a JSON array, a single JSON object (wrapped into a one-element
/// list), or either of those inside one markdown code fence. An empty array
/// is a valid outcome meaning "no listings in this message". Already-clean
/// input passes through unchanged, so normalizing twice is a no-op.
pub fn normalize(raw: &str) -> Result<Vec<Value>, ValidationError> {
    let text = strip_fence(raw.trim());

    let value: Value = serde_json::from_str(text).map_err(|e| ValidationError::NotJson {
        reason: e.to_string(),
        snippet: text.chars().take(SNIPPET_LEN).collect(),
    })?;

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![value]),
        Value::Null => Err(ValidationError::WrongShape { kind: "null" }),
        Value::Bool(_) => Err(ValidationError::WrongShape { kind: "boolean" }),
        Value::Number(_) => Err(ValidationError::WrongShape { kind: "number" }),
        Value::String(_) => Err(ValidationError::WrongShape { kind: "string" }),
    }
}

/// Remove at most one markdown code fence (with or without a language tag)
/// wrapping the whole text.
fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(stripped) = rest.strip_suffix("```") else {
        return text;
    };
    // Drop the language tag line ("json", "JSON", ...) if present
    match stripped.split_once('\n') {
        Some((first_line, body)) if !first_line.trim_start().starts_with(['[', '{']) => {
            body.trim()
        }
        _ => stripped.trim(),
    }
}

// ── Geofence ────────────────────────────────────────────────────────

/// Service-area rules for listing locations. All matching is
/// case-insensitive substring containment on the raw field text.
#[derive(Debug, Clone)]
pub struct GeofenceRules {
    /// Every location must name this country.
    pub required_qualifier: String,
    /// Locations naming any of these are rejected.
    pub forbidden_countries: Vec<String>,
    /// Argentine places whose names contain a forbidden country's name.
    pub exceptions: Vec<String>,
    /// Phrases meaning the model could not determine a location.
    pub unknown_terms: Vec<String>,
}

impl Default for GeofenceRules {
    fn default() -> Self {
        Self {
            required_qualifier: "argentina".to_string(),
            forbidden_countries: [
                "brasil", "brazil", "chile", "uruguay", "paraguay", "bolivia", "perú", "peru",
                "ecuador", "colombia", "venezuela", "mexico", "méxico",
            ]
            .map(String::from)
            .to_vec(),
            exceptions: [
                "concepción del uruguay",
                "concepcion del uruguay",
                "chilecito",
                "perúgorría",
                "perugorria",
                "perugorría",
            ]
            .map(String::from)
            .to_vec(),
            unknown_terms: [
                "desconocida",
                "desconocido",
                "unknown",
                "sin especificar",
                "no especificado",
                "n/a",
                "no disponible",
                "sin datos",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

const LOCATION_FIELDS: [&str; 2] = ["localidadCarga", "localidadDescarga"];

/// Check every listing's pickup and dropoff against the service area.
/// The first violation fails the whole batch; the error names the listing
/// index and field.
pub fn validate(listings: &[Value], rules: &GeofenceRules) -> Result<(), ValidationError> {
    for (index, listing) in listings.iter().enumerate() {
        for field in LOCATION_FIELDS {
            let value = listing.get(field).and_then(Value::as_str).unwrap_or("");
            validate_location(index, field, value, rules)?;
        }
    }
    Ok(())
}

fn validate_location(
    index: usize,
    field: &'static str,
    value: &str,
    rules: &GeofenceRules,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { index, field });
    }

    let lower = value.to_lowercase();

    if !lower.contains(&rules.required_qualifier) {
        return Err(ValidationError::MissingQualifier {
            index,
            field,
            value: value.to_string(),
            required: rules.required_qualifier.clone(),
        });
    }

    let is_exception = rules.exceptions.iter().any(|city| lower.contains(city));
    if !is_exception {
        if let Some(country) = rules
            .forbidden_countries
            .iter()
            .find(|country| lower.contains(*country))
        {
            return Err(ValidationError::ForbiddenCountry {
                index,
                field,
                country: country.clone(),
            });
        }
    }

    if let Some(term) = rules.unknown_terms.iter().find(|term| lower.contains(*term)) {
        return Err(ValidationError::UnknownLocation {
            index,
            field,
            phrase: term.clone(),
        });
    }

    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────
