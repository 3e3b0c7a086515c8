#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pssst::crypto::{self, RSA_SIZE};
use pssst::protocol::{format_signature_header, parse_signature_header, ProtocolVersion};
use pssst::{
    ClientConfig, HttpRequest, HttpResponse, Identity, KeyPair, MailboxClient, Method, Transport,
    TransportError,
};
use serde_json::Value;

pub const API_URL: &str = "http://pssst.test:62221";
pub const PASSWORD: &str = "Pass1234";
pub const USER_AGENT: &str = "pssst-tests";

/// Server key shared by every mock server in a test binary.
pub fn server_key() -> &'static KeyPair {
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(|| KeyPair::generate(RSA_SIZE).unwrap())
}

#[derive(Default)]
struct User {
    key: Option<String>,
    mailbox: Vec<Value>,
}

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    requests: Vec<(Method, String)>,
    user_agents: Vec<String>,
    clock_offset: i64,
}

/// In-process pssst server speaking one protocol revision.
#[derive(Clone)]
pub struct MockServer {
    protocol: ProtocolVersion,
    state: Arc<Mutex<State>>,
}

impl MockServer {
    pub fn new(protocol: ProtocolVersion) -> Self {
        Self {
            protocol,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn current() -> Self {
        Self::new(ProtocolVersion::Current)
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Shift the server clock used for response signatures.
    pub fn set_clock_offset(&self, seconds: i64) {
        self.state.lock().unwrap().clock_offset = seconds;
    }

    /// Number of requests whose method matches and whose url ends with `suffix`.
    pub fn count(&self, method: Method, suffix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(m, path)| *m == method && path.ends_with(suffix))
            .count()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub fn mailbox_len(&self, address: &str) -> usize {
        self.mailbox(address).len()
    }

    /// Stored envelopes of `address`, oldest first.
    pub fn mailbox(&self, address: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .users
            .get(address)
            .map(|user| user.mailbox.clone())
            .unwrap_or_default()
    }

    /// Store `envelope` in the mailbox of `address` as is.
    pub fn inject(&self, address: &str, envelope: Value) {
        if let Some(user) = self.state.lock().unwrap().users.get_mut(address) {
            user.mailbox.push(envelope);
        }
    }

    /// Distinct `user-agent` values seen so far.
    pub fn user_agents(&self) -> Vec<String> {
        self.state.lock().unwrap().user_agents.clone()
    }

    fn handle(&self, request: HttpRequest) -> HttpResponse {
        let mut state = self.state.lock().unwrap();
        // any host is served; the request log keeps the full url
        let path = request
            .url
            .split_once("://")
            .and_then(|(_, rest)| rest.find('/').map(|at| rest[at..].to_string()))
            .unwrap_or_default();
        state.requests.push((request.method, request.url.clone()));
        if let Some(agent) = request.header("user-agent") {
            if !state.user_agents.iter().any(|seen| seen == agent) {
                state.user_agents.push(agent.to_string());
            }
        }

        if path == "/key" {
            let pem = server_key().export_public().unwrap();
            return HttpResponse::new(200, String::from_utf8(pem).unwrap())
                .with_header("content-type", "text/plain");
        }

        let Some(rest) = path.strip_prefix("/2/") else {
            return self.sign(&state, 404, "Not found", false);
        };
        let segments: Vec<&str> = rest.split('/').collect();
        let address = segments[0].to_string();

        if address.len() != 64 || !address.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return self.sign(&state, 400, "Hash invalid", false);
        }

        let mailbox_segment = match self.protocol {
            ProtocolVersion::Current => Some("box"),
            ProtocolVersion::Legacy => None,
        };
        let tail = segments.get(1).copied();

        match (request.method, tail) {
            (Method::Post, None) => self.create(&mut state, &address, &request),
            (Method::Delete, None) => self.delete(&mut state, &address, &request),
            (Method::Get, Some("key")) => self.key(&state, &address),
            (Method::Put, t) if t == mailbox_segment => self.push(&mut state, &address, &request),
            (Method::Get, t) if t == mailbox_segment => self.pull(&mut state, &address, &request),
            _ => self.sign(&state, 404, "Not found", false),
        }
    }

    fn verify_request(&self, request: &HttpRequest, pem: &str) -> bool {
        let Some(header) = request.header(self.protocol.signature_header()) else {
            return false;
        };
        let Ok(signature) = parse_signature_header(header) else {
            return false;
        };
        let Ok(key) = KeyPair::import(pem.as_bytes(), None) else {
            return false;
        };
        key.verify_within(
            request.body.as_bytes(),
            &signature,
            crypto::now(),
            self.protocol.grace(),
        )
    }

    fn authenticate<'a>(
        &self,
        state: &'a mut State,
        address: &str,
        request: &HttpRequest,
    ) -> Result<&'a mut User, HttpResponse> {
        let key = state.users.get(address).and_then(|user| user.key.clone());
        match key {
            Some(pem) if self.verify_request(request, &pem) => {
                Ok(state.users.get_mut(address).unwrap())
            }
            _ => Err(self.sign(state, 401, "Verification failed", false)),
        }
    }

    fn create(&self, state: &mut State, address: &str, request: &HttpRequest) -> HttpResponse {
        let body: Value = serde_json::from_str(&request.body).unwrap_or(Value::Null);
        let Some(pem) = body.get("key").and_then(Value::as_str) else {
            return self.sign(state, 400, "User key invalid", false);
        };
        if !self.verify_request(request, pem) {
            return self.sign(state, 401, "Verification failed", false);
        }
        if state.users.contains_key(address) {
            return self.sign(state, 409, "User already exists", false);
        }
        if !pem.contains("PUBLIC KEY") {
            return self.sign(state, 400, "User key invalid", false);
        }

        state.users.insert(
            address.to_string(),
            User {
                key: Some(pem.to_string()),
                mailbox: Vec::new(),
            },
        );
        self.sign(state, 200, "User created", false)
    }

    fn delete(&self, state: &mut State, address: &str, request: &HttpRequest) -> HttpResponse {
        match self.authenticate(state, address, request) {
            Ok(user) => {
                user.key = None;
                user.mailbox.clear();
                self.sign(state, 200, "User deleted", false)
            }
            Err(response) => response,
        }
    }

    fn key(&self, state: &State, address: &str) -> HttpResponse {
        match state.users.get(address) {
            None => self.sign(state, 404, "User not found", false),
            Some(User { key: None, .. }) => self.sign(state, 410, "User was deleted", false),
            Some(User { key: Some(pem), .. }) => self.sign(state, 200, pem, false),
        }
    }

    // Legacy pushes are signed by the sender named in `head.user`; the
    // field is removed before the message is stored.
    fn push(&self, state: &mut State, address: &str, request: &HttpRequest) -> HttpResponse {
        let mut envelope: Value = match serde_json::from_str(&request.body) {
            Ok(value) => value,
            Err(_) => return self.sign(state, 400, "Message invalid", false),
        };

        if self.protocol == ProtocolVersion::Legacy {
            let Some(head) = envelope.get_mut("head").and_then(Value::as_object_mut) else {
                return self.sign(state, 400, "Message invalid", false);
            };
            let sender = head.remove("user").and_then(|user| user.as_str().map(str::to_string));
            let key = sender
                .and_then(|sender| state.users.get(&sender))
                .and_then(|user| user.key.clone());
            match key {
                Some(pem) if self.verify_request(request, &pem) => {}
                _ => return self.sign(state, 401, "Verification failed", false),
            }
        }
        match state.users.get_mut(address) {
            None => self.sign(state, 404, "User not found", false),
            Some(User { key: None, .. }) => self.sign(state, 410, "User was deleted", false),
            Some(user) => {
                user.mailbox.push(envelope);
                self.sign(state, 200, "Message sent", false)
            }
        }
    }

    fn pull(&self, state: &mut State, address: &str, request: &HttpRequest) -> HttpResponse {
        let protocol = self.protocol;
        let body = match self.authenticate(state, address, request) {
            Ok(user) => match protocol {
                ProtocolVersion::Current => {
                    let messages: Vec<Value> = user.mailbox.drain(..).collect();
                    Value::Array(messages).to_string()
                }
                ProtocolVersion::Legacy => {
                    if user.mailbox.is_empty() {
                        String::new()
                    } else {
                        user.mailbox.remove(0).to_string()
                    }
                }
            },
            Err(response) => return response,
        };

        if body.is_empty() {
            self.sign(state, 204, "", false)
        } else {
            self.sign(state, 200, &body, true)
        }
    }

    fn sign(&self, state: &State, status: u16, body: &str, json: bool) -> HttpResponse {
        let signature = server_key()
            .sign_at(body.as_bytes(), crypto::now() + state.clock_offset)
            .unwrap();
        HttpResponse::new(status, body)
            .with_header(
                "content-type",
                if json { "application/json; charset=utf-8" } else { "text/plain; charset=utf-8" },
            )
            .with_header(self.protocol.signature_header(), format_signature_header(&signature))
    }
}

impl Transport for MockServer {
    fn request(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send {
        let response = self.handle(request);
        async move { Ok(response) }
    }
}

/// How [`Tampering`] mangles signed responses.
#[derive(Clone, Copy, Debug)]
pub enum Tamper {
    /// Flip one bit of the response signature.
    FlipSignatureBit,
    /// Remove the signature header.
    DropHeader,
    /// Replace the header with garbage.
    GarbleHeader,
    /// Replace the body, keeping its signature.
    ReplaceBody,
}

/// Transport wrapper that tampers with every signed response.
#[derive(Clone)]
pub struct Tampering<T> {
    inner: T,
    mode: Arc<Mutex<Option<Tamper>>>,
}

impl<T: Transport> Tampering<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            mode: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set(&self, mode: Option<Tamper>) {
        *self.mode.lock().unwrap() = mode;
    }

    fn apply(mode: Option<Tamper>, header: &str, mut response: HttpResponse) -> HttpResponse {
        let Some(mode) = mode else {
            return response;
        };
        let Some(value) = response.header(header).map(str::to_string) else {
            return response;
        };

        match mode {
            Tamper::FlipSignatureBit => {
                let mut signature = parse_signature_header(&value).unwrap();
                signature.bytes[0] ^= 0x01;
                response
                    .headers
                    .insert(header.to_string(), format_signature_header(&signature));
            }
            Tamper::DropHeader => {
                response.headers.remove(header);
            }
            Tamper::GarbleHeader => {
                response
                    .headers
                    .insert(header.to_string(), format!("now; {}", STANDARD.encode(b"x")));
            }
            Tamper::ReplaceBody => response.text = "\"forged\"".to_string(),
        }
        response
    }
}

impl<T: Transport> Transport for Tampering<T> {
    fn request(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send {
        let mode = *self.mode.lock().unwrap();
        async move {
            let response = self.inner.request(request).await?;
            Ok(Self::apply(
                mode,
                ProtocolVersion::Current.signature_header(),
                response,
            ))
        }
    }
}

pub fn config(dir: &Path, protocol: ProtocolVersion) -> ClientConfig {
    ClientConfig::builder()
        .with_api_url(API_URL)
        .with_key_dir(dir)
        .with_protocol(protocol)
        .with_user_agent(USER_AGENT)
        .build()
}

/// Open a client for `name` with the default test password.
pub async fn open<T: Transport>(
    transport: T,
    protocol: ProtocolVersion,
    dir: &Path,
    name: &str,
) -> pssst::Result<MailboxClient<T>> {
    let identity = Identity::parse(name)?.with_password(PASSWORD);
    MailboxClient::with_transport(identity, config(dir, protocol), transport).await
}

/// Open and register a client on `server`.
pub async fn created(server: &MockServer, dir: &Path, name: &str) -> MailboxClient<MockServer> {
    let client = open(server.clone(), server.protocol(), dir, name).await.unwrap();
    client.create().await.unwrap();
    client
}
