//! Minimal W3C WebDriver client driving Chrome through `chromedriver`.
//!
//! Only the handful of commands the messaging session needs are implemented:
//! new session, navigate, refresh, find element, click, send keys, screenshot
//! and delete session.

use crate::error::{CumpleError, Result};
use crate::session::{pause, Launcher, Surface};
use base64::Engine as _;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// W3C element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
/// WebDriver key code for Enter.
const ENTER_KEY: &str = "\u{E007}";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const DRIVER_STARTUP: Duration = Duration::from_secs(15);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

// ---------------------------------------------------------------------------
// Launch options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Chrome binary. `None` lets chromedriver pick.
    pub chrome_bin: Option<String>,
    /// Durable user-data directory holding the paired identity.
    pub profile_dir: PathBuf,
    pub headless: bool,
    /// An already running WebDriver endpoint. `None` spawns `chromedriver`.
    pub webdriver_url: Option<String>,
    /// chromedriver executable name or path.
    pub chromedriver: String,
}

/// Command-line switches for Chrome.
pub fn chrome_args(opts: &LaunchOptions) -> Vec<String> {
    let mut args = vec![
        format!("--user-data-dir={}", opts.profile_dir.display()),
        "--profile-directory=Default".to_string(),
        "--window-size=1440,1000".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
    ];
    if opts.headless {
        args.push("--headless=new".to_string());
    }
    args.extend([
        format!("--user-agent={USER_AGENT}"),
        "--disable-gpu".to_string(),
        "--lang=es-ES,es".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
    ]);
    args
}

fn capabilities(opts: &LaunchOptions) -> Value {
    let mut chrome = json!({
        "args": chrome_args(opts),
        "excludeSwitches": ["enable-automation"],
        "useAutomationExtension": false,
    });
    if let Some(bin) = &opts.chrome_bin {
        chrome["binary"] = json!(bin);
    }
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": chrome,
            }
        }
    })
}

// ---------------------------------------------------------------------------
// chromedriver process
// ---------------------------------------------------------------------------

/// Spawned chromedriver, killed when dropped.
struct DriverProcess(Child);

impl Drop for DriverProcess {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn spawn_driver(client: &Client, name: &str) -> Result<(String, DriverProcess)> {
    let bin = which::which(name)
        .map_err(|e| CumpleError::WebDriver(format!("'{name}' not found on PATH: {e}")))?;
    let port = free_port()?;
    let child = Command::new(&bin)
        .arg(format!("--port={port}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    let process = DriverProcess(child);
    let base = format!("http://127.0.0.1:{port}");

    let deadline = Instant::now() + DRIVER_STARTUP;
    loop {
        let ready = client
            .get(format!("{base}/status"))
            .send()
            .ok()
            .and_then(|r| r.json::<Value>().ok())
            .and_then(|v| v["value"]["ready"].as_bool())
            .unwrap_or(false);
        if ready {
            info!(port, driver = %bin.display(), "chromedriver started");
            return Ok((base, process));
        }
        if Instant::now() >= deadline {
            return Err(CumpleError::WebDriver(format!(
                "chromedriver did not become ready within {}s",
                DRIVER_STARTUP.as_secs()
            )));
        }
        pause(Duration::from_millis(250));
    }
}

// ---------------------------------------------------------------------------
// ChromeLauncher
// ---------------------------------------------------------------------------

pub struct ChromeLauncher {
    opts: LaunchOptions,
}

impl ChromeLauncher {
    pub fn new(opts: LaunchOptions) -> Self {
        Self { opts }
    }
}

impl Launcher for ChromeLauncher {
    fn launch(&self) -> Result<Box<dyn Surface>> {
        crate::io::ensure_dir(&self.opts.profile_dir)?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let (base, driver) = match &self.opts.webdriver_url {
            Some(url) => (url.trim_end_matches('/').to_string(), None),
            None => {
                let (base, process) = spawn_driver(&client, &self.opts.chromedriver)?;
                (base, Some(process))
            }
        };
        let surface = WebDriverSurface::start(client, base, &self.opts, driver)?;
        Ok(Box::new(surface))
    }
}

// ---------------------------------------------------------------------------
// WebDriverSurface
// ---------------------------------------------------------------------------

pub struct WebDriverSurface {
    client: Client,
    base: String,
    session_id: Option<String>,
    _driver: Option<DriverProcess>,
}

impl WebDriverSurface {
    fn start(
        client: Client,
        base: String,
        opts: &LaunchOptions,
        driver: Option<DriverProcess>,
    ) -> Result<Self> {
        let mut surface = Self {
            client,
            base,
            session_id: None,
            _driver: driver,
        };
        let value = surface.command(reqwest::Method::POST, "/session", Some(capabilities(opts)))?;
        let id = value["sessionId"]
            .as_str()
            .ok_or_else(|| CumpleError::WebDriver("new session response has no sessionId".into()))?;
        info!(session = id, "webdriver session created");
        surface.session_id = Some(id.to_string());
        Ok(surface)
    }

    fn session_path(&self, suffix: &str) -> Result<String> {
        let id = self
            .session_id
            .as_deref()
            .ok_or_else(|| CumpleError::WebDriver("session already closed".into()))?;
        Ok(format!("/session/{id}{suffix}"))
    }

    /// Issue a command and return the response's `value` member.
    fn command(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<Value> {
        debug!(%method, path, "webdriver command");
        let mut req = self.client.request(method, format!("{}{path}", self.base));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send()?;
        let status = resp.status();
        let mut payload: Value = resp.json().unwrap_or(Value::Null);
        let value = payload
            .get_mut("value")
            .map(Value::take)
            .unwrap_or(Value::Null);
        if status.is_success() {
            return Ok(value);
        }
        let error = value["error"].as_str().unwrap_or("unknown error");
        let message = value["message"].as_str().unwrap_or("");
        Err(CumpleError::WebDriver(format!("{error} ({status}): {message}")))
    }

    fn is_no_such_element(err: &CumpleError) -> bool {
        matches!(err, CumpleError::WebDriver(msg) if msg.starts_with("no such element"))
    }

    /// Element id, or `None` when nothing matches.
    fn find(&self, using: &str, selector: &str) -> Result<Option<String>> {
        let path = self.session_path("/element")?;
        match self.command(
            reqwest::Method::POST,
            &path,
            Some(json!({ "using": using, "value": selector })),
        ) {
            Ok(value) => value[ELEMENT_KEY]
                .as_str()
                .map(|id| Some(id.to_string()))
                .ok_or_else(|| CumpleError::WebDriver("element reference missing".into())),
            Err(e) if Self::is_no_such_element(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn require(&self, xpath: &str) -> Result<String> {
        self.find("xpath", xpath)?
            .ok_or_else(|| CumpleError::WebDriver(format!("no such element: {xpath}")))
    }
}

impl Surface for WebDriverSurface {
    fn navigate(&mut self, url: &str) -> Result<()> {
        let path = self.session_path("/url")?;
        self.command(reqwest::Method::POST, &path, Some(json!({ "url": url })))?;
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        let path = self.session_path("/refresh")?;
        self.command(reqwest::Method::POST, &path, Some(json!({})))?;
        Ok(())
    }

    fn wait_for_css(&mut self, css: &str, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.find("css selector", css)?.is_some() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            pause(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn click_xpath(&mut self, xpath: &str) -> Result<()> {
        let id = self.require(xpath)?;
        let path = self.session_path(&format!("/element/{id}/click"))?;
        self.command(reqwest::Method::POST, &path, Some(json!({})))?;
        Ok(())
    }

    fn press_enter_xpath(&mut self, xpath: &str) -> Result<()> {
        let id = self.require(xpath)?;
        let path = self.session_path(&format!("/element/{id}/value"))?;
        self.command(
            reqwest::Method::POST,
            &path,
            Some(json!({ "text": ENTER_KEY })),
        )?;
        Ok(())
    }

    fn screenshot_png(&mut self) -> Result<Vec<u8>> {
        let path = self.session_path("/screenshot")?;
        let value = self.command(reqwest::Method::GET, &path, None)?;
        let encoded = value
            .as_str()
            .ok_or_else(|| CumpleError::WebDriver("screenshot is not a string".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CumpleError::WebDriver(format!("screenshot is not base64: {e}")))
    }

    fn quit(&mut self) -> Result<()> {
        let path = self.session_path("")?;
        let result = self.command(reqwest::Method::DELETE, &path, None);
        self.session_id = None;
        if let Err(ref e) = result {
            warn!(error = %e, "webdriver session delete failed");
        }
        result.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn opts(url: Option<String>) -> LaunchOptions {
        LaunchOptions {
            chrome_bin: Some("/usr/bin/google-chrome".into()),
            profile_dir: std::env::temp_dir().join("cumple-webdriver-test-profile"),
            headless: true,
            webdriver_url: url,
            chromedriver: "chromedriver".into(),
        }
    }

    fn new_session_mock(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/session")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"value":{"sessionId":"abc","capabilities":{}}}"#)
            .create()
    }

    #[test]
    fn chrome_args_follow_headless_toggle() {
        let mut o = opts(None);
        assert!(chrome_args(&o).contains(&"--headless=new".to_string()));
        assert!(chrome_args(&o)
            .iter()
            .any(|a| a.starts_with("--user-data-dir=") && a.ends_with("cumple-webdriver-test-profile")));
        o.headless = false;
        assert!(!chrome_args(&o).iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn capabilities_carry_binary() {
        let caps = capabilities(&opts(None));
        let chrome = &caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"];
        assert_eq!(chrome["binary"], "/usr/bin/google-chrome");
        assert_eq!(chrome["excludeSwitches"][0], "enable-automation");
    }

    #[test]
    fn launches_against_existing_endpoint_and_navigates() {
        let mut server = mockito::Server::new();
        let created = new_session_mock(&mut server);
        let nav = server
            .mock("POST", "/session/abc/url")
            .match_body(mockito::Matcher::PartialJson(
                json!({ "url": "https://web.whatsapp.com/" }),
            ))
            .with_status(200)
            .with_body(r#"{"value":null}"#)
            .create();
        let deleted = server
            .mock("DELETE", "/session/abc")
            .with_status(200)
            .with_body(r#"{"value":null}"#)
            .create();

        let launcher = ChromeLauncher::new(opts(Some(format!("{}/", server.url()))));
        let mut surface = launcher.launch().unwrap();
        surface.navigate("https://web.whatsapp.com/").unwrap();
        surface.quit().unwrap();

        created.assert();
        nav.assert();
        deleted.assert();
    }

    #[test]
    fn wait_for_css_finds_element() {
        let mut server = mockito::Server::new();
        new_session_mock(&mut server);
        server
            .mock("POST", "/session/abc/element")
            .with_status(200)
            .with_body(format!(r#"{{"value":{{"{ELEMENT_KEY}":"el-1"}}}}"#))
            .create();

        let mut surface = ChromeLauncher::new(opts(Some(server.url()))).launch().unwrap();
        assert!(surface.wait_for_css("canvas", Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn wait_for_css_times_out_on_no_such_element() {
        let mut server = mockito::Server::new();
        new_session_mock(&mut server);
        server
            .mock("POST", "/session/abc/element")
            .with_status(404)
            .with_body(r#"{"value":{"error":"no such element","message":"Unable to locate element"}}"#)
            .create();

        let mut surface = ChromeLauncher::new(opts(Some(server.url()))).launch().unwrap();
        assert!(!surface.wait_for_css("canvas", Duration::ZERO).unwrap());
        let err = surface.click_xpath("//button").unwrap_err();
        assert!(err.to_string().contains("no such element"));
    }

    #[test]
    fn other_driver_errors_propagate() {
        let mut server = mockito::Server::new();
        new_session_mock(&mut server);
        server
            .mock("POST", "/session/abc/element")
            .with_status(500)
            .with_body(r#"{"value":{"error":"invalid session id","message":"gone"}}"#)
            .create();

        let mut surface = ChromeLauncher::new(opts(Some(server.url()))).launch().unwrap();
        let err = surface.wait_for_css("canvas", Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("invalid session id"));
    }

    #[test]
    fn screenshot_is_decoded() {
        let mut server = mockito::Server::new();
        new_session_mock(&mut server);
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG\r\n");
        server
            .mock("GET", "/session/abc/screenshot")
            .with_status(200)
            .with_body(format!(r#"{{"value":"{encoded}"}}"#))
            .create();

        let mut surface = ChromeLauncher::new(opts(Some(server.url()))).launch().unwrap();
        assert_eq!(surface.screenshot_png().unwrap(), b"\x89PNG\r\n");
    }

    #[test]
    fn missing_chromedriver_is_reported() {
        let mut o = opts(None);
        o.chromedriver = "definitely-not-a-real-chromedriver-binary".into();
        let err = ChromeLauncher::new(o).launch().err().unwrap();
        assert!(err.to_string().contains("not found on PATH"));
    }
}
