// HTTP backend - reqwest adapter for the measurement, segment and export endpoints
use crate::application::analysis_repository::{
    AggregateQuery, CropOutcome, ExportPayload, ExportQueue, MeasurementStore, RawQuery,
    SegmentStore,
};
use crate::domain::export::{ExportRequest, JobStatusReport};
use crate::domain::measurement::{MeasurementAggregate, MeasurementRaw};
use crate::domain::segment::{Segment, SegmentDraft};
use crate::domain::sensor::Sensor;
use crate::domain::{SegmentId, SensorId, TestId};
use crate::error::{AnalysisError, Result};
use crate::infrastructure::config::{prepare_path, BackendSettings, EndpointTemplates};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    endpoints: EndpointTemplates,
}

#[derive(Debug, Serialize)]
struct CropBody {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct SegmentBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    test_id: Option<TestId>,
    segment_name: &'a str,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SubmittedJob {
    #[serde(alias = "jobId", alias = "id")]
    job_id: String,
}

impl HttpBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| AnalysisError::Transport {
                url: settings.base_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            endpoints: settings.endpoints.clone(),
        })
    }

    fn url(&self, template: &str, vars: &[(&str, String)]) -> String {
        let vars: HashMap<&str, String> = vars.iter().cloned().collect();
        format!("{}{}", self.base_url, prepare_path(template, &vars))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("Accept", "application/json")
    }

    /// Sends the request and fails on transport errors and non-2xx statuses.
    async fn send(&self, url: &str, builder: RequestBuilder) -> Result<Response> {
        tracing::debug!("Backend request {}", url);
        let response = builder.send().await.map_err(|e| {
            tracing::error!("Request to {} failed: {}", url, e);
            AnalysisError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Backend {} answered {}: {}", url, status, body);
            return Err(AnalysisError::Server { status, body });
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(&self, url: &str, builder: RequestBuilder) -> Result<T> {
        let response = self.send(url, builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| AnalysisError::Decode(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl MeasurementStore for HttpBackend {
    async fn list_test_sensors(&self, test_id: TestId) -> Result<Vec<Sensor>> {
        let url = self.url(&self.endpoints.test_sensors, &[("test_id", test_id.to_string())]);
        self.json(&url, self.request(Method::GET, &url)).await
    }

    async fn fetch_raw(&self, sensor_id: SensorId, query: RawQuery) -> Result<Vec<MeasurementRaw>> {
        let url = self.url(&self.endpoints.raw, &[("sensor_id", sensor_id.to_string())]);
        let mut params = vec![("limit", query.limit.to_string())];
        if let Some(minutes) = query.last_minutes {
            params.push(("last_minutes", minutes.to_string()));
        }
        let rows: Vec<MeasurementRaw> = self
            .json(&url, self.request(Method::GET, &url).query(&params))
            .await?;
        tracing::debug!("Sensor {} returned {} raw rows", sensor_id, rows.len());
        Ok(rows)
    }

    async fn fetch_aggregate(
        &self,
        sensor_id: SensorId,
        query: AggregateQuery,
    ) -> Result<Vec<MeasurementAggregate>> {
        let url = self.url(&self.endpoints.aggregate, &[("sensor_id", sensor_id.to_string())]);
        let rows: Vec<MeasurementAggregate> = self
            .json(
                &url,
                self.request(Method::GET, &url)
                    .query(&[("limit", query.limit.to_string())]),
            )
            .await?;
        tracing::debug!("Sensor {} returned {} aggregate rows", sensor_id, rows.len());
        Ok(rows)
    }

    async fn crop(
        &self,
        test_id: TestId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CropOutcome> {
        let url = self.url(&self.endpoints.crop, &[("test_id", test_id.to_string())]);
        let body = CropBody {
            start_time: start,
            end_time: end,
        };
        self.json(&url, self.request(Method::POST, &url).json(&body))
            .await
    }
}

#[async_trait]
impl SegmentStore for HttpBackend {
    async fn list_segments(&self, test_id: TestId) -> Result<Vec<Segment>> {
        let url = self.url(&self.endpoints.test_segments, &[("test_id", test_id.to_string())]);
        self.json(&url, self.request(Method::GET, &url)).await
    }

    async fn create_segment(&self, test_id: TestId, draft: &SegmentDraft) -> Result<Segment> {
        let url = self.url(&self.endpoints.segments, &[]);
        let body = SegmentBody {
            test_id: Some(test_id),
            segment_name: &draft.name,
            start_time: draft.start_time,
            end_time: draft.end_time,
        };
        self.json(&url, self.request(Method::POST, &url).json(&body))
            .await
    }

    async fn update_segment(&self, segment_id: SegmentId, draft: &SegmentDraft) -> Result<Segment> {
        let url = self.url(&self.endpoints.segment, &[("segment_id", segment_id.to_string())]);
        let body = SegmentBody {
            test_id: None,
            segment_name: &draft.name,
            start_time: draft.start_time,
            end_time: draft.end_time,
        };
        self.json(&url, self.request(Method::PUT, &url).json(&body))
            .await
    }

    async fn delete_segment(&self, segment_id: SegmentId) -> Result<()> {
        let url = self.url(&self.endpoints.segment, &[("segment_id", segment_id.to_string())]);
        self.send(&url, self.request(Method::DELETE, &url)).await?;
        Ok(())
    }
}

#[async_trait]
impl ExportQueue for HttpBackend {
    async fn submit_export(&self, test_id: TestId, request: &ExportRequest) -> Result<String> {
        let url = self.url(&self.endpoints.export, &[("test_id", test_id.to_string())]);
        let job: SubmittedJob = self
            .json(&url, self.request(Method::POST, &url).json(request))
            .await?;
        Ok(job.job_id)
    }

    async fn export_status(&self, job_id: &str) -> Result<JobStatusReport> {
        let url = self.url(&self.endpoints.export_status, &[("job_id", job_id.to_string())]);
        self.json(&url, self.request(Method::GET, &url)).await
    }

    async fn download_export(&self, job_id: &str) -> Result<ExportPayload> {
        let url = self.url(&self.endpoints.export_download, &[("job_id", job_id.to_string())]);
        let response = self
            .send(&url, self.client.request(Method::GET, &url))
            .await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await.map_err(|e| AnalysisError::Transport {
            url: url.clone(),
            message: e.to_string(),
        })?;
        Ok(ExportPayload {
            content_type,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_are_built_from_templates() {
        let settings = BackendSettings {
            base_url: "http://backend:8000/".to_string(),
            ..BackendSettings::default()
        };
        let backend = HttpBackend::new(&settings).unwrap();
        assert_eq!(
            backend.url(&backend.endpoints.aggregate, &[("sensor_id", "12".to_string())]),
            "http://backend:8000/api/measurements/avg/12"
        );
        assert_eq!(
            backend.url(&backend.endpoints.export_status, &[("job_id", "a b".to_string())]),
            "http://backend:8000/api/exports/a%20b/status"
        );
    }

    #[test]
    fn test_submitted_job_accepts_camel_case() {
        let job: SubmittedJob = serde_json::from_str(r#"{"jobId": "42"}"#).unwrap();
        assert_eq!(job.job_id, "42");
    }

    #[test]
    fn test_segment_body_matches_backend_fields() {
        let body = SegmentBody {
            test_id: None,
            segment_name: "soak",
            start_time: DateTime::from_timestamp(0, 0).unwrap(),
            end_time: DateTime::from_timestamp(60, 0).unwrap(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["segment_name"], "soak");
        assert!(json.get("test_id").is_none());
    }
}
