//! Listing persistence sink.
//!
//! Validated listings leave the pipeline through `ListingSink`. The sink owns
//! the mapping from the extractor's free-text fields onto the remote
//! service's vocabulary ids, plus phone and date canonicalization.

pub mod rest;

pub use rest::RestSink;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::error::SinkError;

/// One freight listing as extracted by the model. Every field is free text;
/// absent fields deserialize to empty strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Listing {
    pub material: String,
    pub presentacion: String,
    pub peso: String,
    pub tipo_equipo: String,
    pub localidad_carga: String,
    pub localidad_descarga: String,
    pub fecha_carga: String,
    pub fecha_descarga: String,
    pub telefono: String,
    pub correo: String,
    pub punto_referencia: String,
    pub precio: String,
    pub forma_de_pago: String,
    pub observaciones: String,
}

/// Where accepted listings go.
#[async_trait]
pub trait ListingSink: Send + Sync {
    /// Persist all listings, in order. Returns the created record ids.
    /// `contact_phone` is the sender's resolved identity, used when the
    /// listing itself has no phone.
    async fn create_listings(
        &self,
        listings: &[serde_json::Value],
        contact_phone: &str,
    ) -> Result<Vec<String>, SinkError>;
}

// ── Vocabulary ──────────────────────────────────────────────────────
//
// The remote service keys materials, packaging, equipment, and payment
// methods by fixed ids. Free text from the model maps onto these; anything
// unrecognized falls back to the catch-all entry.

const MATERIALS: &[(&str, &str)] = &[
    ("Agroquímicos", "b93fcec6-b173-47d4-be39-52d272bc8a87"),
    ("Alimentos y bebidas", "97ca010a-6375-40d6-880e-051ba3818516"),
    ("Fertilizante", "220193b8-bafe-476d-a225-433b567db256"),
    ("Ganado", "b181d3b8-f92c-44fd-9334-c34041ef29df"),
    ("Girasol", "bdb09420-ef80-4de0-a038-03285d48fb92"),
    ("Maiz", "6def5e3b-358d-46e5-9170-8e42a2c97d23"),
    ("Maquinarias", "4e9efe3d-8eb6-4600-96dd-eb35cbad8699"),
    ("Materiales construcción", "49ebf50f-d37a-446c-927c-f463fda953e0"),
    ("Otras cargas generales", "8cd407f6-297e-4730-a1d6-15a2ac485809"),
    ("Otros cultivos", "c921caf8-5e2b-4fdb-9190-d7fe624771bf"),
    ("Refrigerados", "176bf83f-3109-431d-8a35-1d157ae4d91f"),
    ("Soja", "4edee3cb-7308-4d1b-96e7-a378052004e7"),
    ("Trigo", "04ba66a5-6a87-4243-b8ed-45baf6cfc2e8"),
];
const MATERIAL_DEFAULT: &str = "Otras cargas generales";

const PACKAGINGS: &[(&str, &str)] = &[
    ("Big Bag", "ca7cf082-837c-4c14-b2ad-c85f0821d86c"),
    ("Bolsa", "e676ca36-8a96-4338-9a41-2692c18664f5"),
    ("Granel", "3923f3da-eb7d-4438-8fcd-74d53891c392"),
    ("Otros", "510db5c8-eb5f-4ef1-b23a-96d4e4869f2d"),
    ("Pallet", "234a739b-6666-4595-a8df-51e840c09599"),
];
const PACKAGING_DEFAULT: &str = "Otros";

const EQUIPMENT: &[(&str, &str)] = &[
    ("Batea", "85bf5951-50a7-4abc-af6e-ea3b9550d97d"),
    ("Camioneta", "8fa614ad-af82-4909-b0ff-b1d288ea97a3"),
    ("CamionJaula", "1933f25d-eb8e-43cf-b2e8-5224ab6a4ef2"),
    ("Carreton", "779ba2a1-f4e3-4121-be59-3e1cdd2c6da8"),
    ("Chasis y Acoplado", "a16bdd90-df15-4adf-8cc4-7a74ad375ffd"),
    ("Furgon", "9eb2b303-5c92-45ae-8120-4cc40dd3fa49"),
    ("Otros", "e1c0cc7d-27fb-4206-9fe3-280ffc40d742"),
    ("Semi", "be085c4d-f6a5-4f36-b869-9ec606bef794"),
    ("Tolva", "5939b8d1-71d7-4e37-851b-db388856945e"),
];
const EQUIPMENT_DEFAULT: &str = "Otros";

const PAYMENT_METHODS: &[(&str, &str)] = &[
    ("Cheque", "48c0c41f-ed88-4b3a-b06d-9a1f03131fe8"),
    ("E-check", "692684a5-9103-4257-a3e3-6486f907177a"),
    ("Efectivo", "c96c6cd8-8742-4a8c-9df6-18554a7c87af"),
    ("Otros", "e0f74bf6-2886-44da-9469-c68ffaf53e4f"),
    ("Transferencia", "7b998228-2121-465b-9721-679a320e50ae"),
];
const PAYMENT_DEFAULT: &str = "Efectivo";

fn vocab_id(
    table: &'static [(&'static str, &'static str)],
    name: &str,
    default: &str,
) -> &'static str {
    let target = if table.iter().any(|(n, _)| *n == name) {
        name
    } else {
        default
    };
    table
        .iter()
        .find(|(n, _)| *n == target)
        .map(|(_, id)| *id)
        .unwrap_or("")
}

pub fn material_id(name: &str) -> &'static str {
    vocab_id(MATERIALS, name, MATERIAL_DEFAULT)
}

pub fn packaging_id(name: &str) -> &'static str {
    vocab_id(PACKAGINGS, name, PACKAGING_DEFAULT)
}

pub fn equipment_id(name: &str) -> &'static str {
    vocab_id(EQUIPMENT, name, EQUIPMENT_DEFAULT)
}

pub fn payment_method_id(name: &str) -> &'static str {
    vocab_id(PAYMENT_METHODS, name, PAYMENT_DEFAULT)
}

// ── Field normalization ─────────────────────────────────────────────

/// Canonicalize an Argentine phone number: strip separators, prefix +54
/// (or +549 for mobile-format numbers) when no country code is present.
pub fn normalize_phone(phone: &str) -> String {
    if phone.is_empty() {
        return String::new();
    }

    let clean: String = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();

    if clean.starts_with("+54") || clean.starts_with("54") {
        clean
    } else if let Some(rest) = clean.strip_prefix('9') {
        format!("+549{rest}")
    } else {
        format!("+54{clean}")
    }
}

const DATE_FORMATS: [&str; 3] = ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y"];

/// Normalize a free-text date to ISO `YYYY-MM-DD`. Empty or unparseable
/// dates become today.
pub fn normalize_date(date: &str) -> String {
    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(date, format) {
            return parsed.format("%Y-%m-%d").to_string();
        }
    }
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listing_deserializes_from_model_output() {
        let value = json!({
            "material": "Soja",
            "tipoEquipo": "Tolva",
            "localidadCarga": "Rosario, Argentina",
            "localidadDescarga": "Córdoba, Argentina",
            "formaDePago": "Transferencia",
        });
        let listing: Listing = serde_json::from_value(value).unwrap();
        assert_eq!(listing.material, "Soja");
        assert_eq!(listing.tipo_equipo, "Tolva");
        assert_eq!(listing.forma_de_pago, "Transferencia");
        // Absent fields are empty, not an error
        assert!(listing.telefono.is_empty());
    }

    #[test]
    fn vocab_lookup_with_fallbacks() {
        assert_eq!(material_id("Soja"), "4edee3cb-7308-4d1b-96e7-a378052004e7");
        assert_eq!(material_id("criptomonedas"), material_id("Otras cargas generales"));
        assert_eq!(packaging_id("Granel"), "3923f3da-eb7d-4438-8fcd-74d53891c392");
        assert_eq!(packaging_id(""), packaging_id("Otros"));
        assert_eq!(equipment_id("nave espacial"), equipment_id("Otros"));
        assert_eq!(payment_method_id("trueque"), payment_method_id("Efectivo"));
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone("+54 9 341 123-4567"), "+5493411234567");
        assert_eq!(normalize_phone("341 1234567"), "+543411234567");
        assert_eq!(normalize_phone("9341123456"), "+549341123456");
        assert_eq!(normalize_phone("5493411234567"), "5493411234567");
        assert_eq!(normalize_phone(""), "");
    }

    #[test]
    fn date_normalization() {
        assert_eq!(normalize_date("25/12/2026"), "2026-12-25");
        assert_eq!(normalize_date("2026-12-25"), "2026-12-25");
        assert_eq!(normalize_date("25-12-2026"), "2026-12-25");

        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        assert_eq!(normalize_date(""), today);
        assert_eq!(normalize_date("mañana"), today);
    }
}
