use std::time::Duration;

use async_trait::async_trait;
use fantoccini::{error::CmdError, wd::Capabilities, Client, ClientBuilder, Locator};
use serde_json::json;
use tokio::time::{self, Instant};
use tracing::debug;

use super::SampleError;

/// How long to wait between clickability checks of a located element.
const READY_POLL: Duration = Duration::from_millis(250);

/// Element lookup understood by the browser boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Css(String),
    XPath(String),
}

impl Target {
    fn locator(&self) -> Locator<'_> {
        match self {
            Target::Css(s) => Locator::Css(s),
            Target::XPath(s) => Locator::XPath(s),
        }
    }
}

/// An exclusive browser session for one scrape run.
#[async_trait]
pub trait PageSession: Send {
    async fn goto(&mut self, url: &str) -> Result<(), SampleError>;

    async fn page_source(&mut self) -> Result<String, SampleError>;

    /// Waits until `target` is present, displayed and enabled. Gives up with
    /// `SampleError::Timeout` after `timeout`.
    async fn wait_clickable(&mut self, target: &Target, timeout: Duration)
        -> Result<(), SampleError>;

    async fn click(&mut self, target: &Target) -> Result<(), SampleError>;

    async fn close(&mut self) -> Result<(), SampleError>;
}

/// Headless Chrome behind a WebDriver endpoint (chromedriver, selenium).
pub struct WebDriverSession {
    client: Client,
}

impl WebDriverSession {
    pub async fn connect(webdriver_url: &str) -> Result<Self, SampleError> {
        let client = ClientBuilder::native()
            .capabilities(headless_chrome())
            .connect(webdriver_url)
            .await
            .map_err(|e| SampleError::Browser(format!("WebDriver session failed: {e}")))?;
        debug!(webdriver_url = %webdriver_url, "WebDriver session opened");
        Ok(Self { client })
    }
}

fn headless_chrome() -> Capabilities {
    let mut caps = Capabilities::new();
    caps.insert(
        "goog:chromeOptions".to_owned(),
        json!({ "args": ["--headless", "--no-sandbox", "--disable-dev-shm-usage"] }),
    );
    caps
}

#[async_trait]
impl PageSession for WebDriverSession {
    async fn goto(&mut self, url: &str) -> Result<(), SampleError> {
        self.client.goto(url).await.map_err(browser_error)
    }

    async fn page_source(&mut self) -> Result<String, SampleError> {
        self.client.source().await.map_err(browser_error)
    }

    async fn wait_clickable(
        &mut self,
        target: &Target,
        timeout: Duration,
    ) -> Result<(), SampleError> {
        let deadline = Instant::now() + timeout;
        let timed_out = || SampleError::Timeout {
            target: format!("{target:?}"),
            after: timeout,
        };

        let element = self
            .client
            .wait()
            .at_most(timeout)
            .for_element(target.locator())
            .await
            .map_err(|e| match e {
                CmdError::WaitTimeout => timed_out(),
                other => browser_error(other),
            })?;

        loop {
            let ready = element.is_displayed().await.map_err(browser_error)?
                && element.is_enabled().await.map_err(browser_error)?;
            if ready {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(timed_out());
            }
            time::sleep(READY_POLL).await;
        }
    }

    async fn click(&mut self, target: &Target) -> Result<(), SampleError> {
        let element = self.client.find(target.locator()).await.map_err(browser_error)?;
        element.click().await.map_err(browser_error)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SampleError> {
        self.client.clone().close().await.map_err(browser_error)
    }
}

fn browser_error(e: CmdError) -> SampleError {
    SampleError::Browser(e.to_string())
}
