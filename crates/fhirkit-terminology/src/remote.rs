//! Remote terminology service: a thin proxy over a FHIR terminology server.
//!
//! Speaks the standard operations (`ValueSet/$validate-code`,
//! `CodeSystem/$subsumes`, `ValueSet?url=`) over `application/fhir+json` and
//! extracts named parameters from the returned `Parameters` resources.
//! Timeouts and authentication headers are supplied by the host.

use crate::error::{Result, TerminologyError};
use crate::models::{SubsumptionOutcome, ValidateCodeResult, ValueSet};
use crate::service::TerminologyService;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, ACCEPT};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Client for an external FHIR terminology server.
pub struct FhirTerminologyClient {
    base_url: String,
    client: Client,
    headers: HeaderMap,
}

impl FhirTerminologyClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_options(base_url, HeaderMap::new(), Duration::from_secs(30))
    }

    /// Build a client with host-supplied headers (e.g. authorization) and
    /// timeout.
    pub fn with_options(
        base_url: impl Into<String>,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TerminologyError::Server(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            headers,
        })
    }

    fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "terminology request");
        let response = self
            .client
            .get(&url)
            .headers(self.headers.clone())
            .header(ACCEPT, "application/fhir+json")
            .query(query)
            .send()
            .map_err(|e| TerminologyError::Server(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TerminologyError::Server(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        response
            .json()
            .map_err(|e| TerminologyError::Server(e.to_string()))
    }
}

/// Pull a named parameter out of a FHIR `Parameters` resource.
fn parameter<'a>(parameters: &'a Value, name: &str) -> Option<&'a Value> {
    parameters
        .get("parameter")?
        .as_array()?
        .iter()
        .find(|p| p.get("name").and_then(Value::as_str) == Some(name))
        .and_then(|p| {
            p.as_object()?
                .iter()
                .find(|(key, _)| key.starts_with("value"))
                .map(|(_, value)| value)
        })
}

impl TerminologyService for FhirTerminologyClient {
    fn validate_code(
        &self,
        valueset_url: &str,
        valueset_version: Option<&str>,
        code: &str,
        system: Option<&str>,
    ) -> Result<ValidateCodeResult> {
        let mut query = vec![("url", valueset_url), ("code", code)];
        if let Some(system) = system {
            query.push(("system", system));
        }
        if let Some(version) = valueset_version {
            query.push(("valueSetVersion", version));
        }
        let response = self.get("ValueSet/$validate-code", &query)?;

        Ok(ValidateCodeResult {
            result: parameter(&response, "result")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            message: parameter(&response, "message")
                .and_then(Value::as_str)
                .map(str::to_string),
            display: parameter(&response, "display")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    fn member_of(&self, code: &str, system: Option<&str>, valueset_url: &str) -> Result<bool> {
        Ok(self
            .validate_code(valueset_url, None, code, system)?
            .result)
    }

    fn subsumes(
        &self,
        code_a: &str,
        code_b: &str,
        system_url: &str,
    ) -> Result<SubsumptionOutcome> {
        let query = [("codeA", code_a), ("codeB", code_b), ("system", system_url)];
        let response = self.get("CodeSystem/$subsumes", &query)?;

        let outcome = parameter(&response, "outcome")
            .and_then(Value::as_str)
            .and_then(SubsumptionOutcome::parse);
        match outcome {
            Some(outcome) => Ok(outcome),
            None => {
                warn!(system_url, "malformed $subsumes response");
                Err(TerminologyError::Server(
                    "missing outcome parameter in $subsumes response".to_string(),
                ))
            }
        }
    }

    fn expand(
        &self,
        valueset_url: &str,
        filter: Option<&str>,
        offset: usize,
        count: Option<usize>,
    ) -> Result<ValueSet> {
        let offset_string = offset.to_string();
        let count_string = count.map(|c| c.to_string());
        let mut query = vec![("url", valueset_url), ("offset", offset_string.as_str())];
        if let Some(filter) = filter {
            query.push(("filter", filter));
        }
        if let Some(count) = &count_string {
            query.push(("count", count.as_str()));
        }
        let response = self.get("ValueSet/$expand", &query)?;
        serde_json::from_value(response).map_err(Into::into)
    }

    fn get_value_set(&self, url: &str, version: Option<&str>) -> Option<ValueSet> {
        let mut query = vec![("url", url)];
        if let Some(version) = version {
            query.push(("version", version));
        }
        let bundle = self.get("ValueSet", &query).ok()?;
        let entry = bundle.get("entry")?.as_array()?.first()?;
        serde_json::from_value(entry.get("resource")?.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parameter_extraction() {
        let parameters = json!({
            "resourceType": "Parameters",
            "parameter": [
                {"name": "result", "valueBoolean": true},
                {"name": "display", "valueString": "Type 2 diabetes"}
            ]
        });
        assert_eq!(parameter(&parameters, "result"), Some(&json!(true)));
        assert_eq!(
            parameter(&parameters, "display"),
            Some(&json!("Type 2 diabetes"))
        );
        assert_eq!(parameter(&parameters, "missing"), None);
    }
}
