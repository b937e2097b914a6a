//! Demo contracts served by `wirecall_registry`
//!
//! | id | name               | kind   | response                         |
//! |----|--------------------|--------|----------------------------------|
//! | 1  | GetWeatherForecast | unary  | `u32:date|i32:temp|c16:summary`  |
//! | 2  | GetSystemStatus    | unary  | `c2:status`                      |
//! | 3  | LiveTelemetry      | stream | `u32:counter|f32:uptime`         |
//! | 4  | RegisterUser       | unary  | `u32:id|str:name|str:email`      |
//! | L  | Login              | unary  | `u32:id|str:name`                |
//!
//! User disimpan di memori saja.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{info, warn};

use super::Registry;
use crate::core::SchemaError;
use crate::protocol::{decode, encode, CommandId, Schema, Strictness};

const REGISTER_REQUEST: &str = "str:name|str:email|str:password";
const REGISTER_RESPONSE: &str = "u32:id|str:name|str:email";
const LOGIN_REQUEST: &str = "str:email|str:password";
const LOGIN_RESPONSE: &str = "u32:id|str:name";

/// Reply of `RegisterUser` for an email that is already taken.
pub const DUPLICATE_REPLY: &[u8] = b"DUP";

struct User {
    id: u32,
    name: String,
    email: String,
    password: String,
}

#[derive(Default)]
struct Users {
    rows: Vec<User>,
}

/// Registry with the demo contracts. `started` anchors the telemetry uptime.
pub fn registry(started: Instant) -> Result<Registry, SchemaError> {
    let users = Arc::new(Mutex::new(Users::default()));
    let mut registry = Registry::new();

    registry.register_command(
        CommandId::new(b'1'),
        "GetWeatherForecast",
        24,
        "",
        "u32:date|i32:temp|c16:summary",
        |_| {
            let mut out = Vec::with_capacity(24);
            out.extend_from_slice(&20260120u32.to_le_bytes());
            out.extend_from_slice(&22i32.to_le_bytes());
            let mut summary = [0u8; 16];
            summary[..6].copy_from_slice(b"Chilly");
            out.extend_from_slice(&summary);
            out
        },
    )?;

    registry.register_command(CommandId::new(b'2'), "GetSystemStatus", 2, "", "c2:status", |_| {
        b"OK".to_vec()
    })?;

    let mut counter = 0u32;
    registry.register_stream(
        CommandId::new(b'3'),
        "LiveTelemetry",
        8,
        "u32:counter|f32:uptime",
        move || {
            counter = counter.wrapping_add(1);
            let uptime = started.elapsed().as_secs() as f32;
            let mut out = Vec::with_capacity(8);
            out.extend_from_slice(&counter.to_le_bytes());
            out.extend_from_slice(&uptime.to_le_bytes());
            out
        },
    )?;

    let request = Schema::parse(REGISTER_REQUEST)?;
    let response = Schema::parse(REGISTER_RESPONSE)?;
    let store = users.clone();
    registry.register_command(
        CommandId::new(b'4'),
        "RegisterUser",
        0,
        REGISTER_REQUEST,
        REGISTER_RESPONSE,
        move |body| register_user(&store, &request, &response, body),
    )?;

    let request = Schema::parse(LOGIN_REQUEST)?;
    let response = Schema::parse(LOGIN_RESPONSE)?;
    registry.register_command(
        CommandId::new(b'L'),
        "Login",
        0,
        LOGIN_REQUEST,
        LOGIN_RESPONSE,
        move |body| login(&users, &request, &response, body),
    )?;

    Ok(registry)
}

fn text(record: &crate::protocol::Record, name: &str) -> String {
    record
        .get(name)
        .and_then(|v| v.as_text())
        .unwrap_or_default()
        .to_string()
}

fn register_user(users: &Mutex<Users>, request: &Schema, response: &Schema, body: &[u8]) -> Vec<u8> {
    let Ok(record) = decode(body, request) else {
        warn!(bytes = body.len(), "registration body does not match schema");
        return Vec::new();
    };
    let (name, email, password) = (text(&record, "name"), text(&record, "email"), text(&record, "password"));
    if name.is_empty() || email.is_empty() {
        warn!("registration failed: missing name or email");
        return Vec::new();
    }

    let Ok(mut users) = users.lock() else {
        return Vec::new();
    };
    if users.rows.iter().any(|u| u.email == email) {
        warn!(%email, "registration failed: duplicate email");
        return DUPLICATE_REPLY.to_vec();
    }

    let id = users.rows.len() as u32 + 1;
    users.rows.push(User {
        id,
        name: name.clone(),
        email: email.clone(),
        password,
    });
    info!(%email, id, "user registered");

    let id = id.to_string();
    encode(
        response,
        &[("id", id.as_str()), ("name", name.as_str()), ("email", email.as_str())],
        Strictness::Strict,
    )
    .unwrap_or_default()
}

fn login(users: &Mutex<Users>, request: &Schema, response: &Schema, body: &[u8]) -> Vec<u8> {
    let Ok(record) = decode(body, request) else {
        return Vec::new();
    };
    let (email, password) = (text(&record, "email"), text(&record, "password"));

    let Ok(users) = users.lock() else {
        return Vec::new();
    };
    match users.rows.iter().find(|u| u.email == email && u.password == password) {
        Some(user) => {
            info!(%email, id = user.id, "login succeeded");
            let id = user.id.to_string();
            encode(
                response,
                &[("id", id.as_str()), ("name", user.name.as_str())],
                Strictness::Strict,
            )
            .unwrap_or_default()
        }
        None => {
            info!(%email, "login failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RecordLayout, Value};

    fn body(schema: &str, values: &[(&str, &str)]) -> Vec<u8> {
        encode(&Schema::parse(schema).unwrap(), values, Strictness::Strict).unwrap()
    }

    #[test]
    fn test_demo_contracts() {
        let registry = registry(Instant::now()).unwrap();
        let ids: Vec<char> = registry.contracts().map(|c| c.id.as_char()).collect();
        assert_eq!(ids, vec!['1', '2', '3', '4', 'L']);
        assert_eq!(registry.encode_contracts(RecordLayout::Current).len(), 5 * 128);
    }

    #[test]
    fn test_weather_matches_its_schema() {
        let mut registry = registry(Instant::now()).unwrap();
        let raw = registry.invoke(CommandId::new(b'1'), &[]).unwrap();
        let record = decode(&raw, &Schema::parse("u32:date|i32:temp|c16:summary").unwrap()).unwrap();

        assert_eq!(raw.len(), 24);
        assert_eq!(record.get("temp"), Some(&Value::I32(22)));
        assert_eq!(record.get("summary"), Some(&Value::Text("Chilly".into())));
    }

    #[test]
    fn test_register_then_login() {
        let mut registry = registry(Instant::now()).unwrap();
        let register = body(REGISTER_REQUEST, &[("name", "Ann"), ("email", "a@x"), ("password", "pw")]);

        let raw = registry.invoke(CommandId::new(b'4'), &register).unwrap();
        let record = decode(&raw, &Schema::parse(REGISTER_RESPONSE).unwrap()).unwrap();
        assert_eq!(record.get("id"), Some(&Value::U32(1)));

        assert_eq!(registry.invoke(CommandId::new(b'4'), &register).unwrap(), DUPLICATE_REPLY);

        let ok = body(LOGIN_REQUEST, &[("email", "a@x"), ("password", "pw")]);
        let raw = registry.invoke(CommandId::new(b'L'), &ok).unwrap();
        let record = decode(&raw, &Schema::parse(LOGIN_RESPONSE).unwrap()).unwrap();
        assert_eq!(record.get("name"), Some(&Value::Text("Ann".into())));

        let bad = body(LOGIN_REQUEST, &[("email", "a@x"), ("password", "nope")]);
        assert!(registry.invoke(CommandId::new(b'L'), &bad).unwrap().is_empty());
    }

    #[test]
    fn test_telemetry_counts_up() {
        let mut registry = registry(Instant::now()).unwrap();
        let first = registry.produce(CommandId::new(b'3')).unwrap();
        let second = registry.produce(CommandId::new(b'3')).unwrap();
        assert_eq!(&first[..4], &1u32.to_le_bytes());
        assert_eq!(&second[..4], &2u32.to_le_bytes());
    }
}
