use crate::prelude::*;
use crate::error::Result;

use {
    async_trait::async_trait,
    std::sync::atomic::{AtomicBool, Ordering},
    std::time::Duration,
    tokio::sync::Mutex,
    tokio_util::sync::CancellationToken,
    url::Url,
};

pub const STATUS_PATH: &str = "/api/v1/status";

/// JSON-over-HTTP link to the companion meter.
///
/// The meter exposes no registers; the register operations of
/// [`Transport`] are rejected.
pub struct HttpTransport {
    base: Url,
    timeout: Duration,
    client: Mutex<Option<reqwest::Client>>,
    healthy: AtomicBool,
    cancel: std::sync::Mutex<CancellationToken>,
}

impl HttpTransport {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let base = Url::parse(&format!("http://{}:{}/", host, port))
            .map_err(|e| Error::validation(format!("meter address {}:{}: {}", host, port, e)))?;

        Ok(Self {
            base,
            timeout,
            client: Mutex::new(None),
            healthy: AtomicBool::new(false),
            cancel: std::sync::Mutex::new(CancellationToken::new()),
        })
    }

    pub fn from_config(meter: &config::Meter) -> Result<Self> {
        Self::new(meter.host(), meter.port(), meter.timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn build_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(self.timeout).build()?)
    }

    fn cancel_token(&self) -> CancellationToken {
        match self.cancel.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_cancel_token(&self) -> CancellationToken {
        let mut token = match self.cancel.lock() {
            Ok(token) => token,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *token, CancellationToken::new())
    }

    /// GETs `path` and parses the body as JSON.
    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = self
            .base
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::validation(format!("bad path {}: {}", path, e)))?;

        let token = self.cancel_token();
        tokio::select! {
            _ = token.cancelled() => Err(Error::Closed),
            result = self.get_locked(url) => result,
        }
    }

    pub async fn fetch_status(&self) -> Result<serde_json::Value> {
        self.get_json(STATUS_PATH).await
    }

    async fn get_locked(&self, url: Url) -> Result<serde_json::Value> {
        let mut guard = self.client.lock().await;
        let client = match guard.as_ref() {
            Some(client) => client.clone(),
            None => {
                let client = self.build_client()?;
                *guard = Some(client.clone());
                client
            }
        };

        debug!("http GET {}", url);
        let result = async {
            let response = client.get(url.clone()).send().await?;
            if response.status() != reqwest::StatusCode::OK {
                return Err(Error::transport(format!(
                    "{} returned HTTP {}",
                    url,
                    response.status()
                )));
            }
            let body = response.text().await?;
            serde_json::from_str::<serde_json::Value>(&body)
                .map_err(|e| Error::transport(format!("invalid JSON from {}: {}", url, e)))
        }
        .await;

        self.healthy.store(result.is_ok(), Ordering::Relaxed);
        if let Err(e) = &result {
            warn!("http {}: {}", self.base, e);
        }
        result
    }

    fn no_registers(&self) -> Error {
        Error::validation(format!("meter at {} exposes no registers", self.base))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<()> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(self.build_client()?);
        }
        Ok(())
    }

    async fn close(&self) {
        self.replace_cancel_token().cancel();
        self.client.lock().await.take();
        self.healthy.store(false, Ordering::Relaxed);
    }

    async fn read_holding(&self, _address: u16, _count: u16) -> Result<Vec<u16>> {
        Err(self.no_registers())
    }

    async fn write_single(&self, _address: u16, _value: u16) -> Result<()> {
        Err(self.no_registers())
    }

    async fn write_multiple(&self, _address: u16, _values: &[u16]) -> Result<()> {
        Err(self.no_registers())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}
