use super::{Invocation, Invoker, TIMEOUT_STATUS};
use reqwest::Client;
use std::time::Duration;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// POSTs an empty JSON object to the target and reports the status.
#[derive(Clone)]
pub struct HttpInvoker {
    client: Client,
}

impl HttpInvoker {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("croncall/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Invoker for HttpInvoker {
    async fn invoke(&self, target: &str) -> Invocation {
        let result = self
            .client
            .post(target)
            .json(&serde_json::json!({}))
            .send()
            .await;

        match result {
            // reqwest hands back every status as a response, so 4xx/5xx land here too
            Ok(resp) => Invocation::responded(resp.status().as_u16()),
            Err(e) => {
                let status_code = if let Some(status) = e.status() {
                    Some(status.as_u16())
                } else if e.is_timeout() {
                    Some(TIMEOUT_STATUS)
                } else {
                    None
                };
                Invocation::failed(status_code, e.to_string())
            }
        }
    }
}
