//! BigQuery BI Engine reservation client.
//!
//! Reads and patches the per-project, per-location `biReservation` resource.
//! Sizes travel in bytes and are logged in GB. The wire `size` field may be
//! a JSON number or a decimal string (GCP's int64-as-string convention);
//! both parse. A malformed body is a typed error, not a panic.

use serde_json::json;

use crate::secret::Secret;

/// Default reservation API base URL.
pub const DEFAULT_BASE_URL: &str = "https://bigqueryreservation.googleapis.com";

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Reservation API error types.
#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("network error communicating with the reservation API")]
    Network(#[source] reqwest::Error),

    #[error("reservation API request failed with status {0}")]
    Status(u16),

    #[error("malformed reservation API response: {0}")]
    MalformedResponse(String),

    #[error("requested reservation size {0} GB does not fit in a byte count")]
    SizeOverflow(u64),
}

/// BI Engine reservation REST client.
#[derive(Debug, Clone)]
pub struct ReservationClient {
    http: reqwest::Client,
    base_url: String,
}

/// Convert a byte count to GB for log lines.
pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB as f64
}

/// Parse the `size` field, accepting both number and string forms.
fn parse_size(body: &serde_json::Value) -> Result<u64, ReservationError> {
    let size = body
        .get("size")
        .ok_or_else(|| ReservationError::MalformedResponse("missing 'size' field".into()))?;
    match size {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ReservationError::MalformedResponse(format!("size {n} out of range"))),
        serde_json::Value::String(s) => s.parse::<u64>().map_err(|_| {
            ReservationError::MalformedResponse(format!("size '{s}' is not an integer"))
        }),
        other => Err(ReservationError::MalformedResponse(format!(
            "size has unexpected type: {other}"
        ))),
    }
}

impl ReservationClient {
    /// Create a client against the public reservation API.
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, DEFAULT_BASE_URL)
    }

    /// Create a client against a custom base URL (for tests).
    pub fn with_base_url(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    fn reservation_url(&self, project_id: &str, location: &str) -> String {
        format!(
            "{}/v1/projects/{project_id}/locations/{location}/biReservation",
            self.base_url
        )
    }

    /// Read the current reservation size in bytes.
    pub async fn get_reservation(
        &self,
        project_id: &str,
        location: &str,
        token: &Secret,
    ) -> Result<u64, ReservationError> {
        let resp = self
            .http
            .get(self.reservation_url(project_id, location))
            .bearer_auth(token.as_str().unwrap_or_default())
            .send()
            .await
            .map_err(ReservationError::Network)?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(ReservationError::Status(status));
        }

        let body = resp
            .json::<serde_json::Value>()
            .await
            .map_err(ReservationError::Network)?;
        parse_size(&body)
    }

    /// Set the reservation to `desired_gb`, returning the resulting size in
    /// bytes as reported by the service.
    pub async fn set_reservation(
        &self,
        project_id: &str,
        location: &str,
        token: &Secret,
        desired_gb: u64,
    ) -> Result<u64, ReservationError> {
        let desired_bytes = desired_gb
            .checked_mul(BYTES_PER_GB)
            .ok_or(ReservationError::SizeOverflow(desired_gb))?;
        let body = json!({
            "name": format!("projects/{project_id}/locations/{location}/biReservation"),
            "size": desired_bytes,
        });

        let resp = self
            .http
            .patch(self.reservation_url(project_id, location))
            .bearer_auth(token.as_str().unwrap_or_default())
            .json(&body)
            .send()
            .await
            .map_err(ReservationError::Network)?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(ReservationError::Status(status));
        }

        let body = resp
            .json::<serde_json::Value>()
            .await
            .map_err(ReservationError::Network)?;
        parse_size(&body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ReservationClient {
        ReservationClient::with_base_url(reqwest::Client::new(), &server.uri())
    }

    fn token() -> Secret {
        Secret::from_string("ya29.token".into())
    }

    #[test]
    fn bytes_to_gb_is_exact_for_whole_gb() {
        assert_eq!(bytes_to_gb(1_073_741_824), 1.0);
        assert_eq!(bytes_to_gb(2_147_483_648), 2.0);
    }

    #[test]
    fn parse_size_accepts_number_and_string() {
        assert_eq!(parse_size(&json!({"size": 2147483648u64})).unwrap(), 2_147_483_648);
        assert_eq!(parse_size(&json!({"size": "2147483648"})).unwrap(), 2_147_483_648);
    }

    #[test]
    fn parse_size_rejects_missing_and_bad_values() {
        assert!(matches!(
            parse_size(&json!({})),
            Err(ReservationError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_size(&json!({"size": "lots"})),
            Err(ReservationError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_size(&json!({"size": true})),
            Err(ReservationError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn get_reservation_reads_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/p1/locations/us/biReservation"))
            .and(header("authorization", "Bearer ya29.token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/p1/locations/us/biReservation",
                "size": "1073741824"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let size = client(&server)
            .get_reservation("p1", "us", &token())
            .await
            .unwrap();
        assert_eq!(size, 1_073_741_824);
    }

    #[tokio::test]
    async fn set_reservation_patches_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/projects/p1/locations/us/biReservation"))
            .and(header("authorization", "Bearer ya29.token"))
            .and(body_json(json!({
                "name": "projects/p1/locations/us/biReservation",
                "size": 2147483648u64
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/p1/locations/us/biReservation",
                "size": 2147483648u64
            })))
            .expect(1)
            .mount(&server)
            .await;

        let size = client(&server)
            .set_reservation("p1", "us", &token(), 2)
            .await
            .unwrap();
        assert_eq!(size, 2_147_483_648);
    }

    #[tokio::test]
    async fn oversized_request_is_rejected_before_any_call() {
        // No mock is mounted: the overflow is caught before a request goes out.
        let server = MockServer::start().await;
        let err = client(&server)
            .set_reservation("p1", "us", &token(), u64::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::SizeOverflow(_)));
    }

    #[tokio::test]
    async fn non_2xx_is_a_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/p1/locations/us/biReservation"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_reservation("p1", "us", &token())
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::Status(403)));
    }

    #[tokio::test]
    async fn malformed_body_is_typed_not_a_panic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/p1/locations/us/biReservation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "x"})))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_reservation("p1", "us", &token())
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::MalformedResponse(_)));
    }
}
