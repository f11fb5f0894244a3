//! reCAPTCHA solving through the 2Captcha service.
//!
//! Submit:  https://2captcha.com/in.php  (method=userrecaptcha)
//! Poll:    https://2captcha.com/res.php (action=get) every 5 s until solved

use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use medsearch_access::{CaptchaChallenge, CaptchaSolver};
use medsearch_common::sandbox::SandboxClient;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

const SUBMIT_URL: &str = "https://2captcha.com/in.php";
const RESULT_URL: &str = "https://2captcha.com/res.php";
const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct TwoCaptchaSolver {
    client: SandboxClient,
    api_key: SecretString,
    timeout: Duration,
}

impl TwoCaptchaSolver {
    pub fn new(client: SandboxClient, api_key: SecretString, timeout: Duration) -> Self {
        Self { client, api_key, timeout }
    }

    async fn call(&self, url: &str, params: &[(&str, String)]) -> anyhow::Result<Reply> {
        let body: Value = self
            .client
            .post(url)?
            .query(params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Reply::from_json(&body))
    }
}

#[derive(Debug, PartialEq)]
enum Reply {
    Ok(String),
    NotReady,
    Error(String),
}

impl Reply {
    fn from_json(body: &Value) -> Self {
        let request = match &body["request"] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if body["status"].as_i64() == Some(1) {
            Reply::Ok(request)
        } else if request == "CAPCHA_NOT_READY" {
            Reply::NotReady
        } else {
            Reply::Error(request)
        }
    }
}

#[async_trait]
impl CaptchaSolver for TwoCaptchaSolver {
    async fn solve(&self, challenge: &CaptchaChallenge) -> anyhow::Result<String> {
        info!(page_url = %challenge.page_url, "Submitting reCAPTCHA to 2Captcha");
        let key = self.api_key.expose_secret().to_string();
        let submit = [
            ("key", key.clone()),
            ("method", "userrecaptcha".to_string()),
            ("googlekey", challenge.site_key.clone()),
            ("pageurl", challenge.page_url.clone()),
            ("json", "1".to_string()),
        ];
        let id = match self.call(SUBMIT_URL, &submit).await? {
            Reply::Ok(id) => id,
            Reply::NotReady => bail!("2Captcha did not accept the task"),
            Reply::Error(e) => bail!("2Captcha rejected the task: {e}"),
        };

        let poll = [
            ("key", key),
            ("action", "get".to_string()),
            ("id", id),
            ("json", "1".to_string()),
        ];
        let deadline = Instant::now() + self.timeout;
        while Instant::now() < deadline {
            sleep(POLL_INTERVAL).await;
            match self.call(RESULT_URL, &poll).await? {
                Reply::Ok(token) => {
                    info!("reCAPTCHA solved");
                    return Ok(token);
                }
                Reply::NotReady => debug!("reCAPTCHA not ready yet"),
                Reply::Error(e) => bail!("2Captcha failed: {e}"),
            }
        }
        bail!("reCAPTCHA not solved within {}s", self.timeout.as_secs())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
