use super::config::{CACERT_NONE, IpamConfig};
use super::IpamApi;
use crate::error::{IpamError, Result};
use crate::model::Record;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// HTTP client for the phpIPAM REST API.
///
/// Authenticates once on [`RestClient::connect`] and sends the resulting
/// token with every request. Requests are issued one at a time.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    /// `{url}/api/{app_id}`
    base_url: Url,
    token: String,
}

/// Response envelope wrapped around every phpIPAM answer.
#[derive(Debug, Default, Deserialize)]
struct Envelope {
    code: Option<u16>,
    #[serde(default)]
    success: Value,
    message: Option<String>,
    #[serde(default)]
    data: Value,
    id: Option<Value>,
}

impl Envelope {
    /// phpIPAM reports success as `true` or `1`.
    fn succeeded(&self, status: StatusCode) -> bool {
        match &self.success {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_i64() != Some(0),
            Value::Null => status.is_success(),
            _ => true,
        }
    }
}

impl RestClient {
    /// Build the HTTP client and authenticate.
    pub async fn connect(config: &IpamConfig) -> Result<Self> {
        config.validate()?;

        let http = build_http_client(config).await?;
        let base_url = Url::parse(&format!("{}/api/{}", config.url, config.app_id))
            .map_err(|e| IpamError::Config(format!("invalid service URL '{}': {}", config.url, e)))?;

        let mut client = Self {
            http,
            base_url,
            token: config.token.clone(),
        };

        if config.uses_login() {
            client.token = client.login(&config.user, &config.password).await?;
            tracing::info!("Logged in to {} as {}", config.url, config.user);
        } else {
            tracing::debug!("Using static application token for {}", config.url);
        }

        Ok(client)
    }

    async fn login(&self, user: &str, password: &str) -> Result<String> {
        let url = self.endpoint("user", "")?;
        tracing::debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .basic_auth(user, Some(password))
            .send()
            .await?;
        let envelope = decode(resp, "user", "").await?;

        envelope
            .data
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| IpamError::Api {
                code: envelope.code.unwrap_or(0),
                message: "login response carries no token".to_string(),
            })
    }

    /// `{base}/{controller}/{path}/`, each segment percent-encoded.
    fn endpoint(&self, controller: &str, path: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IpamError::Config(format!("service URL '{}' can't take a path", self.base_url)))?
            .pop_if_empty()
            .extend(
                controller
                    .split('/')
                    .chain(path.split('/'))
                    .filter(|segment| !segment.is_empty()),
            )
            .push("");
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        controller: &str,
        path: &str,
        body: Option<&Record>,
    ) -> Result<Envelope> {
        let url = self.endpoint(controller, path)?;
        tracing::debug!("{} {}", method, url);

        let mut request = self.http.request(method, url).header("token", &self.token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let resp = request.send().await?;
        decode(resp, controller, path).await
    }
}

async fn build_http_client(config: &IpamConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs));

    match config.cacert.as_str() {
        "" => {}
        CACERT_NONE => {
            tracing::warn!("TLS certificate verification disabled for {}", config.url);
            builder = builder.danger_accept_invalid_certs(true);
        }
        path => {
            let pem = tokio::fs::read(path).await.map_err(|e| {
                IpamError::Config(format!("failed to read CA certificate {}: {}", path, e))
            })?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }
    }

    Ok(builder.build()?)
}

/// Map an HTTP response to its envelope, turning failures into errors.
async fn decode(resp: reqwest::Response, controller: &str, path: &str) -> Result<Envelope> {
    let status = resp.status();
    let body = resp.text().await?;

    let envelope: Envelope = if body.trim().is_empty() {
        Envelope::default()
    } else {
        match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(IpamError::Api {
                    code: status.as_u16(),
                    message: body,
                });
            }
            Err(e) => return Err(e.into()),
        }
    };

    let code = envelope.code.unwrap_or(status.as_u16());
    if status == StatusCode::NOT_FOUND || code == 404 {
        tracing::debug!("{}/{} not found", controller, path);
        return Err(IpamError::NotFound {
            controller: controller.to_string(),
            path: path.to_string(),
        });
    }

    if !status.is_success() || !envelope.succeeded(status) {
        let message = envelope.message.clone().unwrap_or_default();
        tracing::error!("{}/{} failed: {} - {}", controller, path, code, message);
        return Err(IpamError::Api { code, message });
    }

    Ok(envelope)
}

impl IpamApi for RestClient {
    async fn fetch_entities(&self, controller: &str, path: &str) -> Result<Value> {
        let envelope = self.request(Method::GET, controller, path, None).await?;
        Ok(envelope.data)
    }

    async fn create_entity(&self, controller: &str, data: &Record) -> Result<Value> {
        let envelope = self.request(Method::POST, controller, "", Some(data)).await?;
        Ok(json!({
            "id": envelope.id,
            "message": envelope.message,
            "data": envelope.data,
        }))
    }

    async fn update_entity(&self, controller: &str, path: &str, params: &Record) -> Result<()> {
        self.request(Method::PATCH, controller, path, Some(params))
            .await
            .map(|_| ())
    }

    async fn delete_entity(&self, controller: &str, path: &str) -> Result<()> {
        self.request(Method::DELETE, controller, path, None)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> RestClient {
        RestClient {
            http: reqwest::Client::new(),
            base_url: Url::parse(base).unwrap(),
            token: "t".to_string(),
        }
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let c = client("https://ipam.example.com/api/myapp");
        assert_eq!(
            c.endpoint("subnets", "/search/10.0.0.0/24").unwrap().as_str(),
            "https://ipam.example.com/api/myapp/subnets/search/10.0.0.0/24/"
        );
        assert_eq!(
            c.endpoint("tools/scanagents", "").unwrap().as_str(),
            "https://ipam.example.com/api/myapp/tools/scanagents/"
        );
        assert_eq!(
            c.endpoint("addresses", "search_hostname/web 1").unwrap().as_str(),
            "https://ipam.example.com/api/myapp/addresses/search_hostname/web%201/"
        );
    }

    #[test]
    fn test_envelope_success_forms() {
        let ok: Envelope = serde_json::from_str(r#"{"code":200,"success":true,"data":[]}"#).unwrap();
        assert!(ok.succeeded(StatusCode::OK));

        let numeric: Envelope = serde_json::from_str(r#"{"code":200,"success":0,"message":"bad"}"#).unwrap();
        assert!(!numeric.succeeded(StatusCode::OK));

        let bare: Envelope = serde_json::from_str(r#"{"data":{"id":"1"}}"#).unwrap();
        assert!(bare.succeeded(StatusCode::OK));
        assert!(!bare.succeeded(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
