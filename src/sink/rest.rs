//! PostgREST-style sink implementation.
//!
//! Talks to the listing service's REST layer: locations are looked up (or
//! created) by address text, then one listing row is inserted per extracted
//! listing with `Prefer: return=representation` so the created id comes back.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::SinkError;
use crate::sink::{
    Listing, ListingSink, equipment_id, material_id, normalize_date, normalize_phone,
    packaging_id, payment_method_id,
};

/// Pause between consecutive listing inserts from one message.
const INSERT_PAUSE: Duration = Duration::from_millis(100);

pub struct RestSink {
    base_url: String,
    api_key: SecretString,
    /// Account the created listings belong to.
    owner_id: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl RestSink {
    pub fn new(base_url: String, api_key: SecretString, owner_id: String, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            owner_id,
            http: reqwest::Client::new(),
            timeout,
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .timeout(self.timeout)
            .header("apikey", self.api_key.expose_secret())
            .bearer_auth(self.api_key.expose_secret())
    }

    /// Resolve an address to a location id, creating the row when the
    /// address is new.
    async fn ensure_location(&self, address: &str) -> Result<String, SinkError> {
        if address.is_empty() {
            return Err(SinkError::Rejected {
                status: 400,
                body: "location address is empty".to_string(),
            });
        }

        let url = format!(
            "{}/rest/v1/ubicaciones?direccion=eq.{}&select=id",
            self.base_url, address
        );
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        if let Ok(rows) = serde_json::from_str::<Vec<Value>>(&body) {
            if let Some(id) = rows.first().and_then(|r| r["id"].as_str()) {
                debug!(address, id, "Location found");
                return Ok(id.to_string());
            }
        }

        debug!(address, "Location not found, creating");
        let url = format!("{}/rest/v1/ubicaciones?select=id", self.base_url);
        let created = self
            .insert_returning_id(url, json!({ "direccion": address }))
            .await?;
        Ok(created)
    }

    /// POST a row and pull the created id out of the representation.
    async fn insert_returning_id(&self, url: String, payload: Value) -> Result<String, SinkError> {
        let response = self
            .request(reqwest::Method::POST, url)
            .header("Prefer", "return=representation")
            .json(&payload)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        // Representation may be a one-element array or a bare object
        if let Ok(rows) = serde_json::from_str::<Vec<Value>>(&body) {
            if let Some(id) = rows.first().and_then(|r| r["id"].as_str()) {
                return Ok(id.to_string());
            }
        }
        if let Ok(row) = serde_json::from_str::<Value>(&body) {
            if let Some(id) = row["id"].as_str() {
                return Ok(id.to_string());
            }
        }
        Err(SinkError::MissingId(body))
    }

    async fn create_one(&self, listing: &Listing, contact_phone: &str) -> Result<String, SinkError> {
        let pickup_id = self.ensure_location(&listing.localidad_carga).await?;
        let dropoff_id = self.ensure_location(&listing.localidad_descarga).await?;

        let phone = if listing.telefono.is_empty() {
            contact_phone.to_string()
        } else {
            normalize_phone(&listing.telefono)
        };

        let payload = json!({
            "dador_id": &self.owner_id,
            "peso": &listing.peso,
            "ubicacioninicial_id": pickup_id,
            "ubicacionfinal_id": dropoff_id,
            "telefonodador": phone,
            "puntoreferencia": &listing.punto_referencia,
            "material_id": material_id(&listing.material),
            "presentacion_id": packaging_id(&listing.presentacion),
            "valorviaje": &listing.precio,
            "pagopor": "Otros",
            "otropagopor": Value::Null,
            "fechacarga": normalize_date(&listing.fecha_carga),
            "fechadescarga": normalize_date(&listing.fecha_descarga),
            "formadepago_id": payment_method_id(&listing.forma_de_pago),
            "email": &listing.correo,
            "tipo_equipo": equipment_id(&listing.tipo_equipo),
            "observaciones": &listing.observaciones,
        });

        let url = format!("{}/rest/v1/cargas", self.base_url);
        self.insert_returning_id(url, payload).await
    }
}

#[async_trait]
impl ListingSink for RestSink {
    async fn create_listings(
        &self,
        listings: &[Value],
        contact_phone: &str,
    ) -> Result<Vec<String>, SinkError> {
        let mut created = Vec::with_capacity(listings.len());

        for value in listings {
            let listing: Listing = serde_json::from_value(value.clone())
                .map_err(|e| SinkError::Rejected {
                    status: 400,
                    body: format!("listing does not match expected shape: {e}"),
                })?;

            let id = self.create_one(&listing, contact_phone).await?;
            info!(listing_id = %id, "Listing created");
            created.push(id);

            if listings.len() > 1 {
                tokio::time::sleep(INSERT_PAUSE).await;
            }
        }

        Ok(created)
    }
}
