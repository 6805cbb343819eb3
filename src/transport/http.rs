//! Blocking HTTP transport over `ureq`.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use url::Url;

use super::form::{new_boundary, Form};
use super::{Endpoint, Method, Request, RequestBody, Transport};
use crate::config::{ClientConfig, EndpointPaths};
use crate::error::CaptureError;

const MAX_RESPONSE_BYTES: u64 = 4 * 1024 * 1024;

pub struct HttpTransport {
    agent: ureq::Agent,
    base_url: Url,
    endpoints: EndpointPaths,
    retrain_timeout: Duration,
}

impl HttpTransport {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let mut base_url =
            Url::parse(&cfg.base_url).context("parse detection service base url")?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("base url '{}' cannot carry paths", cfg.base_url));
        }
        // Endpoint paths resolve below the base path, so it must end in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(cfg.timeouts.request)
            .build();
        Ok(Self {
            agent,
            base_url,
            endpoints: cfg.endpoints.clone(),
            retrain_timeout: cfg.timeouts.retrain,
        })
    }

    /// `http://host/prefix` + `/detect` gives `http://host/prefix/detect`.
    pub fn url_for(&self, endpoint: Endpoint) -> Result<Url, CaptureError> {
        self.base_url
            .join(self.endpoints.path(endpoint).trim_start_matches('/'))
            .map_err(|e| CaptureError::transport(endpoint, format!("invalid endpoint url: {e}")))
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: Request) -> Result<Vec<u8>, CaptureError> {
        let endpoint = request.endpoint;
        let url = self.url_for(endpoint)?;
        log::debug!("{:?} {}", request.method, url);

        let mut call = match request.method {
            Method::Get => self.agent.get(url.as_str()),
            Method::Post => self.agent.post(url.as_str()),
        };
        if endpoint == Endpoint::Retrain {
            call = call.timeout(self.retrain_timeout);
        }

        let result = match &request.body {
            RequestBody::Empty => call.call(),
            RequestBody::Json(value) => {
                let bytes = serde_json::to_vec(value)
                    .map_err(|e| CaptureError::transport(endpoint, format!("encode json: {e}")))?;
                call.set("Content-Type", "application/json")
                    .send_bytes(&bytes)
            }
            RequestBody::Form(form) => {
                let boundary = new_boundary();
                call.set("Content-Type", &Form::content_type(&boundary))
                    .send_bytes(&form.encode(&boundary))
            }
        };

        let response = result.map_err(|err| match err {
            ureq::Error::Status(code, response) => CaptureError::transport(
                endpoint,
                format!("HTTP {} {}", code, response.status_text()),
            ),
            ureq::Error::Transport(transport) => {
                CaptureError::transport(endpoint, transport.to_string())
            }
        })?;

        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut body)
            .map_err(|e| CaptureError::transport(endpoint, format!("read response: {e}")))?;
        log::debug!("{} answered {} bytes", endpoint, body.len());
        Ok(body)
    }
}
