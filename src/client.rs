use anyhow::{Context, Result, anyhow, bail};
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderValue};
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

use crate::config::{Credential, DEFAULT_TIMEOUT_SECS, EffectiveConfig};

const LOGIN_URL: &str = "/sys/login/user";
const LOGOUT_URL: &str = "/sys/logout";

/// The six JSON-RPC verbs FortiManager accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    Get,
    Add,
    Set,
    Update,
    Delete,
    Exec,
}

impl RpcMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RpcMethod::Get => "get",
            RpcMethod::Add => "add",
            RpcMethod::Set => "set",
            RpcMethod::Update => "update",
            RpcMethod::Delete => "delete",
            RpcMethod::Exec => "exec",
        }
    }
}

#[derive(Debug, Error)]
pub enum FmgError {
    #[error("FortiManager returned {code} for {url}: {message}")]
    Api {
        code: i64,
        message: String,
        url: String,
    },
    #[error("login as {username} failed: {message}")]
    Login { username: String, message: String },
}

/// The unpacked `result[0]` of a JSON-RPC reply. `data` falls back to the
/// whole result object when the reply carries no `data` key, so `add` and
/// `delete` responses still have something to render.
#[derive(Debug, Clone)]
pub struct FmgResponse {
    pub code: i64,
    pub message: String,
    pub url: String,
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub use_ssl: bool,
    pub verify_ssl: bool,
    pub timeout_secs: u64,
    pub debug: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            use_ssl: true,
            verify_ssl: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            debug: false,
        }
    }
}

/// An authenticated connection to one appliance. With an API key every call
/// carries a bearer header; with a password the first call logs in and the
/// session id travels in the envelope.
pub struct Session {
    rpc_url: Url,
    http: Client,
    username: String,
    credential: Credential,
    session_id: Option<String>,
    request_id: u64,
    debug: bool,
}

impl Session {
    pub fn new(config: &EffectiveConfig, options: &SessionOptions) -> Result<Self> {
        let scheme = if options.use_ssl { "https" } else { "http" };
        let base = if config.host.contains("://") {
            config.host.trim_end_matches('/').to_string()
        } else {
            format!("{scheme}://{}", config.host)
        };
        let rpc_url = Url::parse(&format!("{base}/jsonrpc"))
            .with_context(|| format!("parsing FortiManager url {base}"))?;
        let http = Client::builder()
            .danger_accept_invalid_certs(!options.verify_ssl)
            .timeout(Duration::from_secs(options.timeout_secs))
            .user_agent(concat!("fmgctl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            rpc_url,
            http,
            username: config.username.clone(),
            credential: config.credential.clone(),
            session_id: None,
            request_id: 0,
            debug: options.debug,
        })
    }

    /// One management call: logs in first when password auth has no session
    /// yet, posts the envelope, and unpacks `result[0]`. A nonzero status
    /// code becomes [`FmgError::Api`]; the renderer never sees it.
    pub fn request(
        &mut self,
        method: RpcMethod,
        endpoint: &str,
        data: Option<Value>,
        attributes: &[(String, Value)],
    ) -> Result<FmgResponse> {
        self.ensure_login()?;

        let url = normalize_endpoint(endpoint);
        let mut params = serde_json::Map::new();
        params.insert("url".to_string(), Value::String(url));
        for (key, value) in attributes {
            params.insert(key.clone(), value.clone());
        }
        if let Some(data) = data {
            params.insert("data".to_string(), data);
        }

        let envelope = self.rpc_call(method.as_str(), Value::Object(params))?;
        let response = parse_result(&envelope)?;
        if response.code != 0 {
            return Err(FmgError::Api {
                code: response.code,
                message: response.message,
                url: response.url,
            }
            .into());
        }
        Ok(response)
    }

    /// Close a password session. Best-effort: failures are reported only
    /// under --debug and never change the invocation's outcome.
    pub fn logout(&mut self) {
        if self.session_id.is_none() {
            return;
        }
        if let Err(err) = self.rpc_call("exec", json!({ "url": LOGOUT_URL })) {
            if self.debug {
                eprintln!("logout failed: {err:#}");
            }
        }
        self.session_id = None;
    }

    fn ensure_login(&mut self) -> Result<()> {
        if self.session_id.is_some() || matches!(self.credential, Credential::ApiKey(_)) {
            return Ok(());
        }
        self.login()
    }

    fn login(&mut self) -> Result<()> {
        let password = match &self.credential {
            Credential::Password(password) => password.clone(),
            Credential::ApiKey(_) => return Ok(()),
        };
        let params = json!({
            "url": LOGIN_URL,
            "data": { "user": self.username, "passwd": password },
        });
        let envelope = self.rpc_call("exec", params)?;
        let result = parse_result(&envelope)?;
        if result.code != 0 {
            return Err(FmgError::Login {
                username: self.username.clone(),
                message: result.message,
            }
            .into());
        }
        let sid = envelope
            .get("session")
            .and_then(Value::as_str)
            .ok_or_else(|| FmgError::Login {
                username: self.username.clone(),
                message: "no session id in login response".to_string(),
            })?;
        self.session_id = Some(sid.to_string());
        Ok(())
    }

    fn rpc_call(&mut self, method: &str, params: Value) -> Result<Value> {
        self.request_id += 1;
        let mut envelope = json!({
            "id": self.request_id,
            "method": method,
            "params": [params],
        });
        if let Some(sid) = &self.session_id {
            envelope["session"] = json!(sid);
        }
        if self.debug {
            eprintln!("request: {:#}", redact_login(&envelope));
        }

        let mut request = self
            .http
            .post(self.rpc_url.clone())
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .json(&envelope);
        if let Credential::ApiKey(key) = &self.credential {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .and_then(|resp| resp.error_for_status())
            .with_context(|| format!("sending request to {}", self.rpc_url))?;
        let text = response.text().context("reading response body")?;
        let body: Value = serde_json::from_str(&text)
            .with_context(|| format!("response from {} is not valid JSON", self.rpc_url))?;
        if self.debug {
            eprintln!("response: {body:#}");
        }
        Ok(body)
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{endpoint}")
    }
}

fn parse_result(envelope: &Value) -> Result<FmgResponse> {
    let result = envelope
        .get("result")
        .and_then(|r| r.get(0))
        .ok_or_else(|| anyhow!("response is missing the JSON-RPC result list"))?;
    let status = result.get("status");
    let code = status
        .and_then(|s| s.get("code"))
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow!("response result carries no status code"))?;
    let message = status
        .and_then(|s| s.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let url = result
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let data = result.get("data").cloned().unwrap_or_else(|| result.clone());
    Ok(FmgResponse {
        code,
        message,
        url,
        data,
    })
}

/// Parse a `KEY=VALUE` request attribute. The value is taken as JSON when it
/// parses (numbers, arrays, objects, booleans), else as a plain string.
pub fn parse_attribute(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("invalid request parameter {raw:?}; expected KEY=VALUE");
    };
    let parsed = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), parsed))
}

fn redact_login(envelope: &Value) -> Value {
    let mut copy = envelope.clone();
    if let Some(passwd) = copy.pointer_mut("/params/0/data/passwd") {
        *passwd = Value::String("*****".to_string());
    }
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn password_config(server: &MockServer) -> EffectiveConfig {
        EffectiveConfig {
            host: server.base_url(),
            username: "admin".to_string(),
            credential: Credential::Password("secret".to_string()),
        }
    }

    fn apikey_config(server: &MockServer) -> EffectiveConfig {
        EffectiveConfig {
            host: server.base_url(),
            username: "admin".to_string(),
            credential: Credential::ApiKey("token-1".to_string()),
        }
    }

    fn ok_envelope(url: &str, data: Value) -> Value {
        json!({
            "id": 1,
            "result": [{
                "status": { "code": 0, "message": "OK" },
                "url": url,
                "data": data,
            }],
        })
    }

    #[test]
    fn password_login_attaches_session_and_logs_out() {
        let server = MockServer::start();
        let login = server.mock(|when, then| {
            when.method(POST).path("/jsonrpc").body_contains(LOGIN_URL);
            then.status(200).json_body(json!({
                "id": 1,
                "result": [{ "status": { "code": 0, "message": "OK" }, "url": LOGIN_URL }],
                "session": "SID-1",
            }));
        });
        let get = server.mock(|when, then| {
            when.method(POST)
                .path("/jsonrpc")
                .body_contains("firewall/address")
                .body_contains("SID-1");
            then.status(200).json_body(ok_envelope(
                "/pm/config/adom/root/obj/firewall/address",
                json!([{ "name": "a" }]),
            ));
        });
        let logout = server.mock(|when, then| {
            when.method(POST).path("/jsonrpc").body_contains(LOGOUT_URL);
            then.status(200).json_body(json!({
                "id": 3,
                "result": [{ "status": { "code": 0, "message": "OK" }, "url": LOGOUT_URL }],
            }));
        });

        let mut session =
            Session::new(&password_config(&server), &SessionOptions::default()).unwrap();
        let response = session
            .request(
                RpcMethod::Get,
                "/pm/config/adom/root/obj/firewall/address",
                None,
                &[],
            )
            .unwrap();
        assert_eq!(response.code, 0);
        assert_eq!(response.data, json!([{ "name": "a" }]));
        session.logout();

        login.assert();
        get.assert();
        logout.assert();
    }

    #[test]
    fn apikey_sends_bearer_and_never_logs_in() {
        let server = MockServer::start();
        let login = server.mock(|when, then| {
            when.method(POST).path("/jsonrpc").body_contains(LOGIN_URL);
            then.status(200).json_body(json!({}));
        });
        let get = server.mock(|when, then| {
            when.method(POST)
                .path("/jsonrpc")
                .header("authorization", "Bearer token-1")
                .body_contains("/sys/status");
            then.status(200)
                .json_body(ok_envelope("/sys/status", json!({ "Version": "v7.4.3" })));
        });

        let mut session =
            Session::new(&apikey_config(&server), &SessionOptions::default()).unwrap();
        let response = session
            .request(RpcMethod::Get, "/sys/status", None, &[])
            .unwrap();
        assert_eq!(response.data["Version"], "v7.4.3");
        session.logout();

        get.assert();
        login.assert_hits(0);
    }

    #[test]
    fn endpoints_gain_a_leading_slash() {
        let server = MockServer::start();
        let get = server.mock(|when, then| {
            when.method(POST)
                .path("/jsonrpc")
                .body_contains(r#""url":"/dvmdb/adom""#);
            then.status(200)
                .json_body(ok_envelope("/dvmdb/adom", json!([])));
        });

        let mut session =
            Session::new(&apikey_config(&server), &SessionOptions::default()).unwrap();
        session
            .request(RpcMethod::Get, "dvmdb/adom", None, &[])
            .unwrap();
        get.assert();
    }

    #[test]
    fn data_and_attributes_are_merged_into_params() {
        let server = MockServer::start();
        let add = server.mock(|when, then| {
            when.method(POST)
                .path("/jsonrpc")
                .body_contains(r#""method":"add""#)
                .body_contains(r#""loadsub":0"#)
                .body_contains(r#""data":{"name":"host1"}"#);
            then.status(200).json_body(ok_envelope(
                "/pm/config/adom/root/obj/firewall/address",
                json!({ "name": "host1" }),
            ));
        });

        let mut session =
            Session::new(&apikey_config(&server), &SessionOptions::default()).unwrap();
        session
            .request(
                RpcMethod::Add,
                "/pm/config/adom/root/obj/firewall/address",
                Some(json!({ "name": "host1" })),
                &[("loadsub".to_string(), json!(0))],
            )
            .unwrap();
        add.assert();
    }

    #[test]
    fn set_and_update_use_distinct_methods() {
        let server = MockServer::start();
        let set = server.mock(|when, then| {
            when.method(POST)
                .path("/jsonrpc")
                .body_contains(r#""method":"set""#);
            then.status(200).json_body(ok_envelope("/x", json!({})));
        });
        let update = server.mock(|when, then| {
            when.method(POST)
                .path("/jsonrpc")
                .body_contains(r#""method":"update""#);
            then.status(200).json_body(ok_envelope("/x", json!({})));
        });

        let mut session =
            Session::new(&apikey_config(&server), &SessionOptions::default()).unwrap();
        session
            .request(RpcMethod::Set, "/x", Some(json!({})), &[])
            .unwrap();
        session
            .request(RpcMethod::Update, "/x", Some(json!({})), &[])
            .unwrap();
        set.assert();
        update.assert();
    }

    #[test]
    fn api_errors_carry_the_status_code() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/jsonrpc");
            then.status(200).json_body(json!({
                "id": 1,
                "result": [{
                    "status": { "code": -11, "message": "No permission for the resource" },
                    "url": "/pm/config/adom/root/obj/firewall/address",
                }],
            }));
        });

        let mut session =
            Session::new(&apikey_config(&server), &SessionOptions::default()).unwrap();
        let err = session
            .request(RpcMethod::Get, "/pm/config/adom/root/obj/firewall/address", None, &[])
            .unwrap_err();
        match err.downcast_ref::<FmgError>() {
            Some(FmgError::Api { code, message, .. }) => {
                assert_eq!(*code, -11);
                assert!(message.contains("No permission"));
            }
            other => panic!("expected an API error, got {other:?}"),
        }
    }

    #[test]
    fn login_failures_are_login_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/jsonrpc").body_contains(LOGIN_URL);
            then.status(200).json_body(json!({
                "id": 1,
                "result": [{
                    "status": { "code": -22, "message": "Login fail" },
                    "url": LOGIN_URL,
                }],
            }));
        });

        let mut session =
            Session::new(&password_config(&server), &SessionOptions::default()).unwrap();
        let err = session
            .request(RpcMethod::Get, "/sys/status", None, &[])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FmgError>(),
            Some(FmgError::Login { .. })
        ));
        assert!(err.to_string().contains("login as admin failed"));
    }

    #[test]
    fn non_json_bodies_are_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/jsonrpc");
            then.status(200).body("<html>gateway</html>");
        });

        let mut session =
            Session::new(&apikey_config(&server), &SessionOptions::default()).unwrap();
        let err = session
            .request(RpcMethod::Get, "/sys/status", None, &[])
            .unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn missing_result_list_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/jsonrpc");
            then.status(200).json_body(json!({ "id": 1, "result": [] }));
        });

        let mut session =
            Session::new(&apikey_config(&server), &SessionOptions::default()).unwrap();
        let err = session
            .request(RpcMethod::Get, "/sys/status", None, &[])
            .unwrap_err();
        assert!(err.to_string().contains("result list"));
    }

    #[test]
    fn http_errors_are_transport_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/jsonrpc");
            then.status(502);
        });

        let mut session =
            Session::new(&apikey_config(&server), &SessionOptions::default()).unwrap();
        let err = session
            .request(RpcMethod::Get, "/sys/status", None, &[])
            .unwrap_err();
        assert!(err.to_string().contains("sending request"));
    }

    #[test]
    fn results_without_data_fall_back_to_the_result_object() {
        let envelope = json!({
            "id": 1,
            "result": [{
                "status": { "code": 0, "message": "OK" },
                "url": "/pm/config/adom/root/obj/firewall/address/host1",
            }],
        });
        let parsed = parse_result(&envelope).unwrap();
        assert_eq!(parsed.code, 0);
        assert_eq!(
            parsed.data["url"],
            "/pm/config/adom/root/obj/firewall/address/host1"
        );
    }

    #[test]
    fn attribute_values_parse_as_json_when_possible() {
        let (key, value) = parse_attribute("loadsub=0").unwrap();
        assert_eq!(key, "loadsub");
        assert_eq!(value, json!(0));

        let (_, filter) = parse_attribute(r#"filter=["name","==","all"]"#).unwrap();
        assert_eq!(filter, json!(["name", "==", "all"]));

        let (_, option) = parse_attribute("option=object member").unwrap();
        assert_eq!(option, json!("object member"));

        assert!(parse_attribute("no-separator").is_err());
    }

    #[test]
    fn login_envelopes_are_redacted_for_debug() {
        let envelope = json!({
            "id": 1,
            "method": "exec",
            "params": [{ "url": LOGIN_URL, "data": { "user": "admin", "passwd": "sup3rsecret" } }],
        });
        let redacted = redact_login(&envelope);
        assert_eq!(redacted["params"][0]["data"]["passwd"], "*****");
        assert_eq!(redacted["params"][0]["data"]["user"], "admin");

        let plain = json!({ "id": 2, "method": "get", "params": [{ "url": "/sys/status" }] });
        assert_eq!(redact_login(&plain), plain);
    }
}
