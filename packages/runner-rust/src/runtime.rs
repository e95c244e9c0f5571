//! HTTP/JSON client for the feature runtime.
//!
//! Endpoints, all `POST` with JSON bodies:
//! - `{base}/v1/schemas`: `{uuid, schema}` → `{uuid}`
//! - `{base}/v1/programs`: `{uuid, program}` → `{uuid, fingerprint}`
//! - `{base}/v1/programs/execute`: [`ExecuteRequest`] → [`ExecuteResponse`]
//!
//! A 404 maps to [`RuntimeError::NotFound`], other non-2xx statuses to
//! [`RuntimeError::Status`], connection and decode failures to
//! [`RuntimeError::Transport`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::traits::{ExecuteRequest, ExecuteResponse, LoadProgramResponse, RuntimeClient};

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterSchemaRequest {
    pub uuid: String,
    pub schema: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterSchemaResponse {
    pub uuid: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadProgramRequest {
    pub uuid: String,
    pub program: String,
}

/// [`RuntimeClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRuntimeClient {
    http: Client,
    base: String,
}

impl HttpRuntimeClient {
    /// Creates a client for `base` (e.g. `http://127.0.0.1:60005`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, RuntimeError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| RuntimeError::Transport(anyhow::Error::new(e).context(format!("POST {url}"))))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(if status == StatusCode::NOT_FOUND {
                RuntimeError::NotFound(message)
            } else {
                RuntimeError::Status {
                    code: status.as_u16(),
                    message,
                }
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| RuntimeError::Transport(anyhow::Error::new(e).context(format!("decoding {url}"))))
    }
}

#[async_trait]
impl RuntimeClient for HttpRuntimeClient {
    async fn register_schema(&self, uuid: &str, schema: &str) -> Result<String, RuntimeError> {
        let req = RegisterSchemaRequest {
            uuid: uuid.to_string(),
            schema: schema.to_string(),
        };
        let resp: RegisterSchemaResponse = self.post("/v1/schemas", &req).await?;
        Ok(resp.uuid)
    }

    async fn load_program(
        &self,
        uuid: &str,
        program: &str,
    ) -> Result<LoadProgramResponse, RuntimeError> {
        let req = LoadProgramRequest {
            uuid: uuid.to_string(),
            program: program.to_string(),
        };
        self.post("/v1/programs", &req).await
    }

    async fn execute_program(
        &self,
        request: ExecuteRequest,
    ) -> Result<ExecuteResponse, RuntimeError> {
        self.post("/v1/programs/execute", &request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use streaming_runner_core::TypedPayload;
    use tokio::net::TcpListener;

    use super::*;

    #[derive(Default)]
    struct FakeRuntime {
        programs: Mutex<Vec<String>>,
        known: Mutex<Vec<String>>,
    }

    async fn schemas(Json(req): Json<RegisterSchemaRequest>) -> Json<RegisterSchemaResponse> {
        Json(RegisterSchemaResponse { uuid: req.uuid })
    }

    async fn programs(
        State(rt): State<Arc<FakeRuntime>>,
        Json(req): Json<LoadProgramRequest>,
    ) -> Json<LoadProgramResponse> {
        let fingerprint = format!("sha-{}", req.program.len());
        rt.programs.lock().push(req.program);
        rt.known.lock().push(fingerprint.clone());
        Json(LoadProgramResponse {
            uuid: req.uuid,
            fingerprint,
        })
    }

    async fn execute(
        State(rt): State<Arc<FakeRuntime>>,
        Json(req): Json<ExecuteRequest>,
    ) -> Result<Json<ExecuteResponse>, (HttpStatus, String)> {
        if req.fqn == "broken.prod" {
            return Err((HttpStatus::INTERNAL_SERVER_ERROR, "boom".into()));
        }
        if !rt.known.lock().contains(&req.fingerprint) {
            return Err((HttpStatus::NOT_FOUND, format!("no program {}", req.fingerprint)));
        }
        Ok(Json(ExecuteResponse { uuid: req.uuid }))
    }

    async fn serve() -> (String, Arc<FakeRuntime>) {
        let rt = Arc::new(FakeRuntime::default());
        let app = Router::new()
            .route("/v1/schemas", post(schemas))
            .route("/v1/programs", post(programs))
            .route("/v1/programs/execute", post(execute))
            .with_state(Arc::clone(&rt));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/"), rt)
    }

    fn request(fqn: &str, fingerprint: &str) -> ExecuteRequest {
        ExecuteRequest {
            uuid: "corr-1".into(),
            fqn: fqn.into(),
            fingerprint: fingerprint.into(),
            payload: TypedPayload {
                type_url: "type.example/x".into(),
                value: vec![1, 2, 3],
            },
        }
    }

    fn client(base: &str) -> HttpRuntimeClient {
        HttpRuntimeClient::new(base, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn registers_and_executes() {
        let (base, rt) = serve().await;
        let client = client(&base);

        let echoed = client
            .register_schema("u-1", "https://s.example.com/a#A")
            .await
            .unwrap();
        assert_eq!(echoed, "u-1");

        let loaded = client.load_program("u-2", "def f(): pass").await.unwrap();
        assert_eq!(loaded.uuid, "u-2");
        assert_eq!(rt.programs.lock().as_slice(), ["def f(): pass"]);

        let resp = client
            .execute_program(request("a.prod", &loaded.fingerprint))
            .await
            .unwrap();
        assert_eq!(resp.uuid, "corr-1");
    }

    #[tokio::test]
    async fn unknown_fingerprint_is_not_found() {
        let (base, _rt) = serve().await;
        let err = client(&base)
            .execute_program(request("a.prod", "sha-unknown"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn server_errors_keep_their_status() {
        let (base, _rt) = serve().await;
        let err = client(&base)
            .execute_program(request("broken.prod", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Status { code: 500, ref message } if message == "boom"));
    }

    #[tokio::test]
    async fn unreachable_runtime_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}"))
            .register_schema("u", "s")
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Transport(_)));
    }
}
