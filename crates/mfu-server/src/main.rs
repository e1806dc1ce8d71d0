use base64::Engine;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use ultralight::crypto::{self, TdesKey, BLOCK_SIZE, ZERO_IV};
use ultralight::memory;
use ultralight::{
    DumpRecord, Emulator, Reader, ReaderConfig, TagType, UltralightError, VersionResponse,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable naming a JSON `ReaderConfig`
const CONFIG_ENV: &str = "MFU_SERVER_CONFIG";

/// UID given to emulated tags loaded without one
const DEFAULT_UID: [u8; 7] = [0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

const METHODS: &[(&str, &str)] = &[
    ("help", "Displays this help message."),
    ("emulator_load", "Places an emulated tag on the reader: {tag_type, uid?, image?, key?, counters?}."),
    ("tag_classify", "Identifies the tag variant, including magic clones."),
    ("tag_info", "Collects manufacturer block, configuration, version, signature, counters and default secrets."),
    ("tag_authenticate", "Searches Ultralight C keys: {keys?: [hex]} or the built-in and configured list."),
    ("tag_dump", "Reads the whole memory: {key?, swap_endian?}. Returns a base64 image."),
    ("tag_write", "Writes one page: {page, data}."),
    ("tag_set_uid", "Rewrites the UID of a magic tag: {uid}."),
    ("tag_set_key", "Stores a new Ultralight C key: {key, current_key?}."),
    ("lockbits_interpret", "Per-page lock state of an image: {tag_type, image}."),
    ("config_summarize", "Decodes the configuration pages of an image: {tag_type, image}."),
    ("crypto_encrypt", "3DES-CBC encryption: {key, iv?, data}."),
    ("crypto_decrypt", "3DES-CBC decryption: {key, iv?, data}."),
    ("keys_diversify", "Diversifies a MIFARE key: {master_key, uid, sector, mifare_key}."),
    ("keys_password", "Derives an 8-byte password from a MIFARE key pair: {key_a, key_b}."),
    ("version_decode", "Decodes a GET_VERSION answer: {data}."),
];

// --- Struct Definitions ---
#[derive(Deserialize, Serialize, Clone, Debug)]
struct RpcRequest {
    jsonrpc: String,
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize, Debug)]
struct RpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize, Debug)]
struct RpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct EmulatorLoadParams {
    tag_type: String,
    #[serde(default)]
    uid: Option<String>,
    /// Base64 page image
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    counters: Option<[u32; 3]>,
}

#[derive(Deserialize, Default)]
struct AuthenticateParams {
    #[serde(default)]
    keys: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
struct DumpParams {
    #[serde(default)]
    key: Option<String>,
    /// Append the secret with each 8-byte half reversed
    #[serde(default)]
    swap_endian: bool,
}

#[derive(Deserialize, Debug)]
struct WriteParams {
    page: u8,
    data: String,
}

#[derive(Deserialize, Debug)]
struct SetUidParams {
    uid: String,
}

#[derive(Deserialize)]
struct SetKeyParams {
    key: String,
    #[serde(default)]
    current_key: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ImageParams {
    tag_type: String,
    image: String,
}

#[derive(Deserialize)]
struct CipherParams {
    key: String,
    #[serde(default)]
    iv: Option<String>,
    data: String,
}

#[derive(Deserialize)]
struct DiversifyParams {
    master_key: String,
    uid: String,
    sector: u8,
    mifare_key: String,
}

#[derive(Deserialize)]
struct PasswordParams {
    key_a: String,
    key_b: String,
}

#[derive(Deserialize, Debug)]
struct VersionParams {
    data: String,
}
// --- Struct Definitions End ---

#[derive(Debug, Error)]
enum ServerError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("No tag on the reader; call emulator_load first")]
    NoReader,

    #[error(transparent)]
    Tag(#[from] UltralightError),

    #[error("Failed to serialize result: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServerError {
    fn code(&self) -> i32 {
        match self {
            Self::InvalidParams(_) => -32602,
            Self::NoReader => -32001,
            Self::Tag(_) | Self::Serialization(_) => -32000,
        }
    }

    fn data(&self) -> Option<Value> {
        match self {
            Self::Tag(e) => Some(json!({
                "category": e.category(),
                "retryable": e.is_retryable(),
                "suggestion": e.suggestion(),
            })),
            _ => None,
        }
    }
}

struct ServerState {
    config: ReaderConfig,
    reader: Option<Reader<Emulator>>,
}

impl ServerState {
    fn from_env() -> Self {
        let config = match std::env::var(CONFIG_ENV) {
            Ok(path) => match ReaderConfig::load(&path) {
                Ok(config) => {
                    info!(path = %path, "Loaded reader configuration");
                    config
                }
                Err(e) => {
                    warn!(path = %path, "Ignoring unreadable configuration: {}", e);
                    ReaderConfig::default()
                }
            },
            Err(_) => ReaderConfig::default(),
        };
        Self {
            config,
            reader: None,
        }
    }

    fn reader(&mut self) -> Result<&mut Reader<Emulator>, ServerError> {
        self.reader.as_mut().ok_or(ServerError::NoReader)
    }
}

static STATE: OnceLock<Mutex<ServerState>> = OnceLock::new();

fn state() -> &'static Mutex<ServerState> {
    STATE.get_or_init(|| Mutex::new(ServerState::from_env()))
}

// --- Helper Functions ---
fn create_error_response(id: Value, code: i32, message: String, data: Option<Value>) -> RpcResponse {
    error!("Responding with error: code={}, message={}", code, message);
    RpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: None,
        error: Some(RpcError {
            code,
            message,
            data,
        }),
    }
}

fn create_success_response(id: Value, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: Some(result),
        error: None,
    }
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, ServerError> {
    let params = if params.is_null() {
        Value::Object(Map::new())
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|e| ServerError::InvalidParams(format!("{}: {}", method, e)))
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, ServerError> {
    hex::decode(value.trim())
        .map_err(|e| ServerError::InvalidParams(format!("'{}' is not valid hex: {}", field, e)))
}

fn decode_hex_array<const N: usize>(field: &str, value: &str) -> Result<[u8; N], ServerError> {
    let bytes = decode_hex(field, value)?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        ServerError::InvalidParams(format!("'{}' must be {} bytes, got {}", field, N, bytes.len()))
    })
}

fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>, ServerError> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| ServerError::InvalidParams(format!("'{}' is not valid base64: {}", field, e)))
}

fn parse_key(field: &str, value: &str) -> Result<TdesKey, ServerError> {
    TdesKey::from_hex(value)
        .map_err(|e| ServerError::InvalidParams(format!("'{}': {}", field, e)))
}

fn parse_tag_type(name: &str) -> Result<TagType, ServerError> {
    let tag_type = match name.trim().to_ascii_uppercase().as_str() {
        "UL" => TagType::UL,
        "UL_MAGIC" => TagType::UL_MAGIC,
        "UL_C" => TagType::UL_C,
        "UL_C_MAGIC" => TagType::UL_C_MAGIC,
        "UL_EV1_48" => TagType::UL_EV1_48,
        "UL_EV1_128" => TagType::UL_EV1_128,
        "NTAG_213" => TagType::NTAG_213,
        "NTAG_215" => TagType::NTAG_215,
        "NTAG_216" => TagType::NTAG_216,
        other => {
            return Err(ServerError::InvalidParams(format!(
                "Unknown tag type: {}",
                other
            )))
        }
    };
    Ok(tag_type)
}

fn tag_type_json(tag_type: TagType) -> Value {
    json!({
        "bits": tag_type,
        "description": tag_type.to_string(),
        "magic": tag_type.is_magic(),
        "page_count": tag_type.page_count(),
    })
}
// --- Helper Functions End ---

// --- Method Handlers ---
async fn emulator_load(params: Value) -> Result<Value, ServerError> {
    let p: EmulatorLoadParams = parse_params("emulator_load", params)?;
    let tag_type = parse_tag_type(&p.tag_type)?;
    let mut emulator = match &p.image {
        Some(image) => Emulator::new(tag_type, decode_base64("image", image)?)
            .map_err(UltralightError::from)?,
        None => {
            let uid = match &p.uid {
                Some(uid) => decode_hex_array::<7>("uid", uid)?,
                None => DEFAULT_UID,
            };
            Emulator::factory(tag_type, uid).map_err(UltralightError::from)?
        }
    };
    if let Some(key) = &p.key {
        emulator = emulator.with_key(parse_key("key", key)?);
    }
    if let Some(counters) = p.counters {
        emulator = emulator.with_counters(counters);
    }
    let uid = emulator.uid();

    let mut state = state().lock().await;
    let config = state.config.clone();
    state.reader = Some(Reader::with_config(emulator, config));
    info!(tag = %tag_type, uid = %hex::encode_upper(uid), "Emulated tag loaded");
    Ok(json!({
        "tag_type": tag_type_json(tag_type),
        "uid": hex::encode_upper(uid),
    }))
}

async fn tag_classify() -> Result<Value, ServerError> {
    let mut state = state().lock().await;
    let tag_type = state.reader()?.try_classify()?;
    Ok(tag_type_json(tag_type))
}

async fn tag_info() -> Result<Value, ServerError> {
    let mut state = state().lock().await;
    let info = state.reader()?.info()?;
    Ok(serde_json::to_value(&info)?)
}

async fn tag_authenticate(params: Value) -> Result<Value, ServerError> {
    let p: AuthenticateParams = parse_params("tag_authenticate", params)?;
    let keys = match &p.keys {
        Some(keys) => Some(
            keys.iter()
                .enumerate()
                .map(|(i, k)| parse_key(&format!("keys[{}]", i), k))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        None => None,
    };

    let mut state = state().lock().await;
    let reader = state.reader()?;
    let outcome = match &keys {
        Some(keys) => reader.authenticate(keys)?,
        None => reader.authenticate_defaults()?,
    };
    Ok(json!({
        "authenticated": outcome.is_authenticated(),
        "matched_index": outcome.matched_index,
        "attempts": outcome.attempts,
        "key": outcome.matched_key.as_ref().map(|k| hex::encode_upper(k.as_slice())),
    }))
}

async fn tag_dump(params: Value) -> Result<Value, ServerError> {
    let p: DumpParams = parse_params("tag_dump", params)?;
    let key = p.key.as_deref().map(|k| parse_key("key", k)).transpose()?;

    let mut state = state().lock().await;
    let (tag_type, mut record) = state.reader()?.dump(key.as_ref())?;
    if let (Some(key), true) = (&key, p.swap_endian) {
        let mut bytes = record.pages().to_vec();
        bytes.extend_from_slice(key.swap_halves_endianness().as_slice());
        record = DumpRecord::from_bytes(&bytes, record.page_count()).map_err(UltralightError::from)?;
    }

    let digest = Sha256::digest(record.as_bytes());
    info!(
        tag = %tag_type,
        bytes = record.as_bytes().len(),
        sha256 = %hex::encode(digest),
        "Dump complete"
    );
    Ok(json!({
        "id": Uuid::new_v4().to_string(),
        "tag_type": tag_type_json(tag_type),
        "page_count": record.page_count(),
        "has_secret": record.has_secret(),
        "file_name": record.default_file_name().ok(),
        "image": base64::engine::general_purpose::STANDARD.encode(record.as_bytes()),
        "sha256": hex::encode(digest),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn tag_write(params: Value) -> Result<Value, ServerError> {
    let p: WriteParams = parse_params("tag_write", params)?;
    let data = decode_hex_array::<4>("data", &p.data)?;
    let mut state = state().lock().await;
    state.reader()?.write_block(p.page, &data)?;
    Ok(json!({ "page": p.page, "status": "written" }))
}

async fn tag_set_uid(params: Value) -> Result<Value, ServerError> {
    let p: SetUidParams = parse_params("tag_set_uid", params)?;
    let uid = decode_hex_array::<7>("uid", &p.uid)?;
    let mut state = state().lock().await;
    state.reader()?.set_uid(&uid)?;
    Ok(json!({ "uid": hex::encode_upper(uid), "status": "written" }))
}

async fn tag_set_key(params: Value) -> Result<Value, ServerError> {
    let p: SetKeyParams = parse_params("tag_set_key", params)?;
    let key = parse_key("key", &p.key)?;
    let current = p
        .current_key
        .as_deref()
        .map(|k| parse_key("current_key", k))
        .transpose()?;
    let mut state = state().lock().await;
    state.reader()?.set_key(&key, current.as_ref())?;
    Ok(json!({ "status": "written" }))
}

fn lockbits_interpret(params: Value) -> Result<Value, ServerError> {
    let p: ImageParams = parse_params("lockbits_interpret", params)?;
    let tag_type = parse_tag_type(&p.tag_type)?;
    let image = decode_base64("image", &p.image)?;
    let table = memory::interpret_pages(&image, tag_type).map_err(UltralightError::from)?;
    let pages: Vec<Value> = table
        .iter()
        .map(|(page, lock)| json!({ "page": page, "lock": lock }))
        .collect();
    Ok(json!({ "pages": pages, "locked": table.locked_pages() }))
}

fn config_summarize(params: Value) -> Result<Value, ServerError> {
    let p: ImageParams = parse_params("config_summarize", params)?;
    let tag_type = parse_tag_type(&p.tag_type)?;
    let image = decode_base64("image", &p.image)?;
    let summary = memory::summarize_config(&image, tag_type).map_err(UltralightError::from)?;
    Ok(serde_json::to_value(&summary)?)
}

fn crypto_apply(method: &str, params: Value, encrypt: bool) -> Result<Value, ServerError> {
    let p: CipherParams = parse_params(method, params)?;
    let key = parse_key("key", &p.key)?;
    let iv = match &p.iv {
        Some(iv) => decode_hex_array::<BLOCK_SIZE>("iv", iv)?,
        None => ZERO_IV,
    };
    let data = decode_hex("data", &p.data)?;
    let output = match encrypt {
        true => crypto::encrypt(&key, &iv, &data),
        false => crypto::decrypt(&key, &iv, &data),
    }
    .map_err(UltralightError::from)?;
    // last ciphertext block, the IV of a following call
    let next_iv = crypto::chain_iv(if encrypt { &output } else { &data })
        .map_err(UltralightError::from)?;
    Ok(json!({ "data": hex::encode(output), "next_iv": hex::encode(next_iv) }))
}

fn keys_diversify(params: Value) -> Result<Value, ServerError> {
    let p: DiversifyParams = parse_params("keys_diversify", params)?;
    let master_key = parse_key("master_key", &p.master_key)?;
    let uid = decode_hex_array::<4>("uid", &p.uid)?;
    let mifare_key = decode_hex_array::<6>("mifare_key", &p.mifare_key)?;
    let key = crypto::diversify_mifare_key(&master_key, &uid, p.sector, &mifare_key)
        .map_err(UltralightError::from)?;
    Ok(json!({ "key": hex::encode_upper(key) }))
}

fn keys_password(params: Value) -> Result<Value, ServerError> {
    let p: PasswordParams = parse_params("keys_password", params)?;
    let key_a = decode_hex_array::<6>("key_a", &p.key_a)?;
    let key_b = decode_hex_array::<6>("key_b", &p.key_b)?;
    let password =
        crypto::password_from_key_pair(&key_a, &key_b).map_err(UltralightError::from)?;
    Ok(json!({
        "des_key_a": hex::encode_upper(crypto::des_key_from_key_a(&key_a)),
        "des_key_b": hex::encode_upper(crypto::des_key_from_key_b(&key_b)),
        "password": hex::encode_upper(password),
    }))
}

fn version_decode(params: Value) -> Result<Value, ServerError> {
    let p: VersionParams = parse_params("version_decode", params)?;
    let data = decode_hex("data", &p.data)?;
    let version = VersionResponse::from_bytes(&data).ok_or_else(|| {
        ServerError::InvalidParams(format!(
            "GET_VERSION answer needs 8 bytes, got {}",
            data.len()
        ))
    })?;
    Ok(json!({
        "version": version,
        "product": version.product_type_name(),
        "capacitance": version.capacitance(),
        "storage": version.storage().to_string(),
    }))
}
// --- Method Handlers End ---

type ResponseFuture = Pin<Box<dyn Future<Output = RpcResponse> + Send>>;

fn respond(id: Value, result: Result<Value, ServerError>) -> RpcResponse {
    match result {
        Ok(value) => create_success_response(id, value),
        Err(e) => {
            let data = e.data();
            create_error_response(id, e.code(), e.to_string(), data)
        }
    }
}

// --- Main Request Processor ---
fn process_request(req: RpcRequest) -> ResponseFuture {
    Box::pin(async move {
        debug!(method = %req.method, "Processing request");

        if req.jsonrpc != "2.0" {
            return create_error_response(
                req.id,
                -32600,
                "Invalid Request: jsonrpc must be \"2.0\"".to_string(),
                None,
            );
        }

        match req.method.as_str() {
            "help" => {
                let commands: Map<String, Value> = METHODS
                    .iter()
                    .map(|(name, description)| (name.to_string(), json!({ "description": description })))
                    .collect();
                create_success_response(
                    req.id,
                    json!({
                        "message": "Ultralight / NTAG tool server. Load an emulated tag, then classify, authenticate, inspect or dump it.",
                        "commands": commands,
                    }),
                )
            }

            "initialize" => {
                info!("Received initialize request");
                create_success_response(
                    req.id,
                    json!({
                        "serverInfo": { "name": "mfu-server", "version": env!("CARGO_PKG_VERSION") },
                        "protocolVersion": "2024-11-05",
                        "capabilities": { "tools": {} },
                    }),
                )
            }

            "listTools" | "tools/list" => {
                let tools: Vec<Value> = METHODS
                    .iter()
                    .filter(|(name, _)| *name != "help")
                    .map(|(name, description)| {
                        json!({
                            "name": name,
                            "description": description,
                            "inputSchema": { "type": "object" },
                        })
                    })
                    .collect();
                info!("Sending tools/list response ({} tools)", tools.len());
                create_success_response(req.id, json!({ "tools": tools }))
            }

            "emulator_load" => respond(req.id, emulator_load(req.params).await),
            "tag_classify" => respond(req.id, tag_classify().await),
            "tag_info" => respond(req.id, tag_info().await),
            "tag_authenticate" => respond(req.id, tag_authenticate(req.params).await),
            "tag_dump" => respond(req.id, tag_dump(req.params).await),
            "tag_write" => respond(req.id, tag_write(req.params).await),
            "tag_set_uid" => respond(req.id, tag_set_uid(req.params).await),
            "tag_set_key" => respond(req.id, tag_set_key(req.params).await),
            "lockbits_interpret" => respond(req.id, lockbits_interpret(req.params)),
            "config_summarize" => respond(req.id, config_summarize(req.params)),
            "crypto_encrypt" => respond(req.id, crypto_apply("crypto_encrypt", req.params, true)),
            "crypto_decrypt" => respond(req.id, crypto_apply("crypto_decrypt", req.params, false)),
            "keys_diversify" => respond(req.id, keys_diversify(req.params)),
            "keys_password" => respond(req.id, keys_password(req.params)),
            "version_decode" => respond(req.id, version_decode(req.params)),

            "tools/call" => {
                let Value::Object(params) = &req.params else {
                    return create_error_response(
                        req.id,
                        -32602,
                        "Invalid params structure for tools/call".to_string(),
                        None,
                    );
                };
                let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
                let arguments = params
                    .get("arguments")
                    .or_else(|| params.get("parameters"))
                    .cloned()
                    .unwrap_or(Value::Null);
                let method = tool_name
                    .strip_prefix("mcp__mfu__")
                    .or_else(|| tool_name.strip_prefix("mfu__"))
                    .or_else(|| tool_name.strip_prefix("mfu_"))
                    .unwrap_or(tool_name);
                info!("Translating tool call '{}' -> method '{}'", tool_name, method);
                let internal_req = RpcRequest {
                    jsonrpc: "2.0".to_string(),
                    id: req.id.clone(),
                    method: method.to_string(),
                    params: arguments,
                };
                process_request(internal_req).await
            }

            _ => {
                warn!("Method not found: '{}'", req.method);
                create_error_response(
                    req.id,
                    -32601,
                    format!("Method not found: {}", req.method),
                    None,
                )
            }
        }
    })
}

async fn write_line(stdout: &mut tokio::io::Stdout, line: &str) -> std::io::Result<()> {
    stdout.write_all(format!("{}\r\n", line).as_bytes()).await?;
    stdout.flush().await
}

fn serialize_response(response: &RpcResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        format!(
            r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":-32000,"message":"Serialization error: {}"}}}}"#,
            e
        )
    })
}

// --- Main Function ---
#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting Ultralight JSON-RPC server on stdio...");
    // Load the configuration before the first request
    drop(state().lock().await);

    let mut reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut line_buffer = String::new();

    let ready = json!({"jsonrpc": "2.0", "method": "server/ready", "params": {"status": "ready"}});
    if let Err(e) = write_line(&mut stdout, &ready.to_string()).await {
        error!("Fatal: Failed to write ready message: {}", e);
        return;
    }

    loop {
        line_buffer.clear();
        match reader.read_line(&mut line_buffer).await {
            Ok(0) => {
                info!("Stdin closed (EOF). Exiting server.");
                break;
            }
            Ok(_) => {
                let trimmed_line = line_buffer.trim();
                if trimmed_line.is_empty() || !trimmed_line.starts_with('{') {
                    if !trimmed_line.is_empty() {
                        warn!("Received non-JSON input line, ignoring.");
                    }
                    continue;
                }
                debug!("<<< Received {} bytes", trimmed_line.len());

                let parsed_json: Value = match serde_json::from_str(trimmed_line) {
                    Ok(v) => v,
                    Err(e) => {
                        let resp = create_error_response(Value::Null, -32700, format!("Parse error: {}", e), None);
                        if let Err(io_e) = write_line(&mut stdout, &serialize_response(&resp)).await {
                            error!("Failed to write parse error response: {}", io_e);
                        }
                        continue;
                    }
                };

                // Notifications carry no id and get no answer
                if parsed_json.get("id").map_or(true, Value::is_null) {
                    match parsed_json.get("method").and_then(|m| m.as_str()) {
                        Some(method) => info!("Received notification: {}", method),
                        None => warn!("Received notification without method field"),
                    }
                    continue;
                }

                let req: RpcRequest = match serde_json::from_value(parsed_json.clone()) {
                    Ok(r) => r,
                    Err(e) => {
                        let id = parsed_json.get("id").cloned().unwrap_or(Value::Null);
                        let resp = create_error_response(id, -32700, format!("Parse error: {}", e), None);
                        if let Err(io_e) = write_line(&mut stdout, &serialize_response(&resp)).await {
                            error!("Failed to write parse error response: {}", io_e);
                        }
                        continue;
                    }
                };

                let request_id = req.id.clone();
                let request_method = req.method.clone();
                let response = match tokio::time::timeout(REQUEST_TIMEOUT, process_request(req)).await {
                    Ok(response) => response,
                    Err(_) => {
                        error!("Request processing timed out after 10s for Method '{}', ID {:?}", request_method, request_id);
                        create_error_response(
                            request_id.clone(),
                            -32000,
                            format!("Request timed out for method '{}'", request_method),
                            None,
                        )
                    }
                };
                if let Err(e) = write_line(&mut stdout, &serialize_response(&response)).await {
                    error!("Failed to write response for ID {:?}: {}", request_id, e);
                }
            }
            Err(e) => {
                error!("Error reading from stdin: {}. Exiting.", e);
                break;
            }
        }
    }
    info!("Ultralight JSON-RPC server shutting down.");
}
