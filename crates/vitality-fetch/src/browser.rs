//! Headless-browser pool for JavaScript-rendered pages.
//!
//! The pool holds a fixed number of browser contexts. Each context is leased
//! to exactly one fetch at a time (FIFO, bounded wait); a context that throws
//! is destroyed and replaced from the factory.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use vitality_core::{PipelineError, Result};

/// One browser context capable of rendering a page to HTML.
#[async_trait]
pub trait HeadlessBrowser: Send + Sync {
    async fn render(&self, url: &str) -> Result<String>;
}

/// Creates replacement contexts when one dies.
#[async_trait]
pub trait BrowserFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn HeadlessBrowser>>;
}

pub struct BrowserPool {
    contexts: Mutex<VecDeque<Box<dyn HeadlessBrowser>>>,
    slots: Arc<Semaphore>,
    factory: Box<dyn BrowserFactory>,
    acquire_timeout: Duration,
}

impl BrowserPool {
    /// Build the pool, creating `size` contexts up front.
    pub async fn new(
        factory: Box<dyn BrowserFactory>,
        size: usize,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let mut contexts = VecDeque::with_capacity(size);
        for _ in 0..size.max(1) {
            contexts.push_back(factory.create().await?);
        }
        info!("browser pool ready with {} contexts", contexts.len());
        Ok(Self {
            slots: Arc::new(Semaphore::new(contexts.len())),
            contexts: Mutex::new(contexts),
            factory,
            acquire_timeout,
        })
    }

    /// Render `url` in a leased context. Waits FIFO up to the acquire
    /// timeout, then fails with `ResourceExhausted`.
    pub async fn render(&self, url: &str) -> Result<String> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            self.slots.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            PipelineError::ResourceExhausted("browser pool acquisition timed out".to_string())
        })?
        .map_err(|_| PipelineError::Cancelled)?;

        let context = {
            let mut contexts = self.contexts.lock().await;
            match contexts.pop_front() {
                Some(ctx) => ctx,
                None => self.factory.create().await?,
            }
        };

        match context.render(url).await {
            Ok(html) => {
                self.contexts.lock().await.push_back(context);
                drop(permit);
                Ok(html)
            }
            Err(e) => {
                // The context may be wedged; replace it rather than reuse.
                drop(context);
                match self.factory.create().await {
                    Ok(fresh) => {
                        self.contexts.lock().await.push_back(fresh);
                        drop(permit);
                    }
                    Err(create_err) => {
                        warn!("browser context replacement failed: {}", create_err);
                        permit.forget();
                    }
                }
                Err(e)
            }
        }
    }
}

/// Renders pages through a remote headless-Chrome service (browserless-style
/// `POST /content` returning the rendered document).
pub struct RemoteRenderer {
    http: reqwest::Client,
    endpoint: String,
}

impl RemoteRenderer {
    pub fn new(endpoint: impl Into<String>, render_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(render_timeout)
            .build()
            .map_err(|e| PipelineError::TransportError(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl HeadlessBrowser for RemoteRenderer {
    async fn render(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/content", self.endpoint.trim_end_matches('/')))
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::ServerError(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}

/// Factory producing [`RemoteRenderer`] contexts against one endpoint.
pub struct RemoteRendererFactory {
    pub endpoint: String,
    pub render_timeout: Duration,
}

#[async_trait]
impl BrowserFactory for RemoteRendererFactory {
    async fn create(&self) -> Result<Box<dyn HeadlessBrowser>> {
        Ok(Box::new(RemoteRenderer::new(
            self.endpoint.clone(),
            self.render_timeout,
        )?))
    }
}
