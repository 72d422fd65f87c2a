//! Parser for the collectd binary protocol (v4/v5).
//!
//! A packet is a sequence of parts, each `[u16 type][u16 length]` (big
//! endian, length covering the header). Identifier parts update a running
//! state; every Values part emits one [`ValueList`] carrying the identifier
//! as of that point. Signature and encryption parts wrap the remainder of
//! the packet in HMAC-SHA-256 and AES-256-OFB respectively.

use crate::typesdb::TypesDb;
use crate::{PasswordLookup, SecurityLevel};
use aes::Aes256;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use ofb::cipher::{KeyIvInit, StreamCipher};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

const TYPE_HOST: u16 = 0x0000;
const TYPE_TIME: u16 = 0x0001;
const TYPE_PLUGIN: u16 = 0x0002;
const TYPE_PLUGIN_INSTANCE: u16 = 0x0003;
const TYPE_TYPE: u16 = 0x0004;
const TYPE_TYPE_INSTANCE: u16 = 0x0005;
const TYPE_VALUES: u16 = 0x0006;
const TYPE_INTERVAL: u16 = 0x0007;
const TYPE_TIME_HR: u16 = 0x0008;
const TYPE_INTERVAL_HR: u16 = 0x0009;
const TYPE_MESSAGE: u16 = 0x0100;
const TYPE_SEVERITY: u16 = 0x0101;
const TYPE_SIGN_SHA256: u16 = 0x0200;
const TYPE_ENCR_AES256: u16 = 0x0210;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("packet truncated")]
    Truncated,
    #[error("invalid part length {0}")]
    PartLength(usize),
    #[error("string part is not valid UTF-8")]
    InvalidString,
    #[error("string part is not NUL-terminated")]
    UnterminatedString,
    #[error("unknown value kind {0}")]
    UnknownValueKind(u8),
    #[error("signature verification failed")]
    BadSignature,
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    #[error("no password lookup configured for secured packets")]
    MissingPasswordLookup,
    #[error("encrypted payload checksum mismatch")]
    BadChecksum,
    #[error("security level requires signed packets")]
    SignatureRequired,
    #[error("security level requires encrypted packets")]
    EncryptionRequired,
}

/// One sampled value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Counter(u64),
    Gauge(f64),
    Derive(i64),
    Absolute(u64),
}

impl Value {
    /// Storage keeps every kind as a double.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Counter(v) => v as f64,
            Value::Gauge(v) => v,
            Value::Derive(v) => v as f64,
            Value::Absolute(v) => v as f64,
        }
    }
}

/// One collectd record: an identifier, a timestamp, and its values.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueList {
    pub host: String,
    pub plugin: String,
    pub plugin_instance: String,
    pub r#type: String,
    pub type_instance: String,
    pub time: DateTime<Utc>,
    pub interval: Duration,
    pub values: Vec<Value>,
    /// Data-source name per value, resolved against the types database.
    pub ds_names: Vec<String>,
}

#[derive(Clone)]
pub struct ParseOpts {
    pub security_level: SecurityLevel,
    pub password_lookup: Option<Arc<dyn PasswordLookup>>,
    pub types_db: TypesDb,
}

impl Default for ParseOpts {
    fn default() -> Self {
        Self {
            security_level: SecurityLevel::None,
            password_lookup: None,
            types_db: TypesDb::default(),
        }
    }
}

#[derive(Default)]
struct Identifier {
    host: String,
    plugin: String,
    plugin_instance: String,
    type_name: String,
    type_instance: String,
    time: Option<DateTime<Utc>>,
    interval: Duration,
}

#[derive(Default)]
struct Security {
    signed: bool,
    encrypted: bool,
}

/// Parse a datagram into value lists, enforcing the configured security
/// level for the packet as a whole.
pub fn parse(buf: &[u8], opts: &ParseOpts) -> Result<Vec<ValueList>, ParseError> {
    let mut lists = Vec::new();
    let mut identifier = Identifier::default();
    let mut security = Security::default();

    parse_parts(buf, opts, &mut identifier, &mut security, &mut lists)?;

    match opts.security_level {
        SecurityLevel::None => {}
        SecurityLevel::Sign if !security.signed && !security.encrypted => {
            return Err(ParseError::SignatureRequired);
        }
        SecurityLevel::Encrypt if !security.encrypted => {
            return Err(ParseError::EncryptionRequired);
        }
        _ => {}
    }
    Ok(lists)
}

fn parse_parts(
    mut buf: &[u8],
    opts: &ParseOpts,
    identifier: &mut Identifier,
    security: &mut Security,
    lists: &mut Vec<ValueList>,
) -> Result<(), ParseError> {
    while !buf.is_empty() {
        if buf.len() < 4 {
            return Err(ParseError::Truncated);
        }
        let part_type = u16::from_be_bytes([buf[0], buf[1]]);
        let part_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if part_len < 4 {
            return Err(ParseError::PartLength(part_len));
        }
        if part_len > buf.len() {
            return Err(ParseError::Truncated);
        }
        let body = &buf[4..part_len];
        let rest = &buf[part_len..];

        match part_type {
            TYPE_HOST => identifier.host = parse_string(body)?,
            TYPE_PLUGIN => identifier.plugin = parse_string(body)?,
            TYPE_PLUGIN_INSTANCE => identifier.plugin_instance = parse_string(body)?,
            TYPE_TYPE => identifier.type_name = parse_string(body)?,
            TYPE_TYPE_INSTANCE => identifier.type_instance = parse_string(body)?,

            TYPE_TIME => {
                let secs = parse_u64(body)?;
                identifier.time = Some(epoch_seconds(secs as i64));
            }
            TYPE_TIME_HR => {
                identifier.time = Some(cdtime_to_datetime(parse_u64(body)?));
            }
            TYPE_INTERVAL => {
                identifier.interval = Duration::from_secs(parse_u64(body)?);
            }
            TYPE_INTERVAL_HR => {
                identifier.interval = cdtime_to_duration(parse_u64(body)?);
            }

            TYPE_VALUES => {
                let values = parse_values(body)?;
                let ds_names = resolve_ds_names(&opts.types_db, &identifier.type_name, values.len());
                lists.push(ValueList {
                    host: identifier.host.clone(),
                    plugin: identifier.plugin.clone(),
                    plugin_instance: identifier.plugin_instance.clone(),
                    r#type: identifier.type_name.clone(),
                    type_instance: identifier.type_instance.clone(),
                    time: identifier.time.unwrap_or_else(|| epoch_seconds(0)),
                    interval: identifier.interval,
                    values,
                    ds_names,
                });
            }

            TYPE_SIGN_SHA256 => {
                // The signature covers everything after this part.
                if opts.security_level != SecurityLevel::None {
                    verify_signature(body, rest, opts)?;
                    security.signed = true;
                }
            }
            TYPE_ENCR_AES256 => {
                let plaintext = decrypt(body, opts)?;
                security.encrypted = true;
                parse_parts(&plaintext, opts, identifier, security, lists)?;
            }

            // Notifications and unknown (future) part types are skipped.
            TYPE_MESSAGE | TYPE_SEVERITY => {}
            _ => {}
        }

        buf = rest;
    }
    Ok(())
}

fn parse_string(body: &[u8]) -> Result<String, ParseError> {
    match body.split_last() {
        Some((0, init)) => std::str::from_utf8(init)
            .map(str::to_string)
            .map_err(|_| ParseError::InvalidString),
        _ => Err(ParseError::UnterminatedString),
    }
}

fn parse_u64(body: &[u8]) -> Result<u64, ParseError> {
    let bytes: [u8; 8] = body.try_into().map_err(|_| ParseError::PartLength(body.len() + 4))?;
    Ok(u64::from_be_bytes(bytes))
}

fn parse_values(body: &[u8]) -> Result<Vec<Value>, ParseError> {
    if body.len() < 2 {
        return Err(ParseError::Truncated);
    }
    let count = u16::from_be_bytes([body[0], body[1]]) as usize;
    if body.len() != 2 + count * 9 {
        return Err(ParseError::PartLength(body.len() + 4));
    }

    let kinds = &body[2..2 + count];
    let mut values = Vec::with_capacity(count);
    for (i, &kind) in kinds.iter().enumerate() {
        let start = 2 + count + i * 8;
        let bytes: [u8; 8] = body[start..start + 8]
            .try_into()
            .map_err(|_| ParseError::Truncated)?;

        values.push(match kind {
            0 => Value::Counter(u64::from_be_bytes(bytes)),
            // Gauges are the lone little-endian field of the protocol.
            1 => Value::Gauge(f64::from_le_bytes(bytes)),
            2 => Value::Derive(i64::from_be_bytes(bytes)),
            3 => Value::Absolute(u64::from_be_bytes(bytes)),
            other => return Err(ParseError::UnknownValueKind(other)),
        });
    }
    Ok(values)
}

fn resolve_ds_names(types_db: &TypesDb, type_name: &str, count: usize) -> Vec<String> {
    let sources = types_db.data_sources(type_name);
    (0..count)
        .map(|i| match sources.and_then(|s| s.get(i)) {
            Some(source) => source.name.clone(),
            None if count == 1 => "value".to_string(),
            None => i.to_string(),
        })
        .collect()
}

fn verify_signature(body: &[u8], rest: &[u8], opts: &ParseOpts) -> Result<(), ParseError> {
    if body.len() < 33 {
        return Err(ParseError::PartLength(body.len() + 4));
    }
    let (signature, username_bytes) = body.split_at(32);
    let username =
        std::str::from_utf8(username_bytes).map_err(|_| ParseError::InvalidString)?;

    let lookup = opts
        .password_lookup
        .as_ref()
        .ok_or(ParseError::MissingPasswordLookup)?;
    let password = lookup
        .password(username)
        .ok_or_else(|| ParseError::UnknownUser(username.to_string()))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(password.as_bytes())
        .map_err(|_| ParseError::BadSignature)?;
    mac.update(username_bytes);
    mac.update(rest);
    mac.verify_slice(signature)
        .map_err(|_| ParseError::BadSignature)
}

fn decrypt(body: &[u8], opts: &ParseOpts) -> Result<Vec<u8>, ParseError> {
    if body.len() < 2 {
        return Err(ParseError::Truncated);
    }
    let username_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    if body.len() < 2 + username_len + 16 {
        return Err(ParseError::Truncated);
    }
    let username = std::str::from_utf8(&body[2..2 + username_len])
        .map_err(|_| ParseError::InvalidString)?;
    let iv = &body[2 + username_len..2 + username_len + 16];
    let ciphertext = &body[2 + username_len + 16..];

    let lookup = opts
        .password_lookup
        .as_ref()
        .ok_or(ParseError::MissingPasswordLookup)?;
    let password = lookup
        .password(username)
        .ok_or_else(|| ParseError::UnknownUser(username.to_string()))?;

    let key = Sha256::digest(password.as_bytes());
    let mut plaintext = ciphertext.to_vec();
    let mut cipher = ofb::Ofb::<Aes256>::new_from_slices(key.as_slice(), iv)
        .map_err(|_| ParseError::BadChecksum)?;
    cipher.apply_keystream(&mut plaintext);

    // The plaintext leads with a SHA-1 of the embedded parts.
    if plaintext.len() < 20 {
        return Err(ParseError::Truncated);
    }
    let (checksum, parts) = plaintext.split_at(20);
    if Sha1::digest(parts).as_slice() != checksum {
        return Err(ParseError::BadChecksum);
    }
    Ok(parts.to_vec())
}

fn epoch_seconds(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_nanos(0))
}

/// collectd's 2^-30-second fixed-point time format.
fn cdtime_to_datetime(v: u64) -> DateTime<Utc> {
    let secs = (v >> 30) as i64;
    let nanos = (((v & 0x3fff_ffff) * 1_000_000_000) >> 30) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(|| Utc.timestamp_nanos(0))
}

fn cdtime_to_duration(v: u64) -> Duration {
    Duration::new(v >> 30, (((v & 0x3fff_ffff) * 1_000_000_000) >> 30) as u32)
}

/// Test-only packet construction.
#[cfg(test)]
pub(crate) mod encode {
    use super::*;

    pub fn string_part(part_type: u16, value: &str) -> Vec<u8> {
        let mut part = Vec::new();
        part.extend_from_slice(&part_type.to_be_bytes());
        part.extend_from_slice(&((4 + value.len() + 1) as u16).to_be_bytes());
        part.extend_from_slice(value.as_bytes());
        part.push(0);
        part
    }

    pub fn u64_part(part_type: u16, value: u64) -> Vec<u8> {
        let mut part = Vec::new();
        part.extend_from_slice(&part_type.to_be_bytes());
        part.extend_from_slice(&12u16.to_be_bytes());
        part.extend_from_slice(&value.to_be_bytes());
        part
    }

    pub fn values_part(values: &[Value]) -> Vec<u8> {
        let count = values.len();
        let mut part = Vec::new();
        part.extend_from_slice(&TYPE_VALUES.to_be_bytes());
        part.extend_from_slice(&((4 + 2 + count * 9) as u16).to_be_bytes());
        part.extend_from_slice(&(count as u16).to_be_bytes());
        for value in values {
            part.push(match value {
                Value::Counter(_) => 0,
                Value::Gauge(_) => 1,
                Value::Derive(_) => 2,
                Value::Absolute(_) => 3,
            });
        }
        for value in values {
            match *value {
                Value::Counter(v) => part.extend_from_slice(&v.to_be_bytes()),
                Value::Gauge(v) => part.extend_from_slice(&v.to_le_bytes()),
                Value::Derive(v) => part.extend_from_slice(&v.to_be_bytes()),
                Value::Absolute(v) => part.extend_from_slice(&v.to_be_bytes()),
            }
        }
        part
    }

    /// A `df`-style packet: host, time, plugin/type identifiers, and one
    /// values part.
    pub fn packet(host: &str, time_secs: u64, plugin: &str, values: &[Value]) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.extend(string_part(TYPE_HOST, host));
        packet.extend(u64_part(TYPE_TIME, time_secs));
        packet.extend(string_part(TYPE_PLUGIN, plugin));
        packet.extend(string_part(TYPE_TYPE, plugin));
        packet.extend(values_part(values));
        packet
    }

    /// Prefix `packet` with a signature part.
    pub fn sign(packet: &[u8], username: &str, password: &str) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(password.as_bytes()).unwrap();
        mac.update(username.as_bytes());
        mac.update(packet);
        let signature = mac.finalize().into_bytes();

        let mut signed = Vec::new();
        signed.extend_from_slice(&TYPE_SIGN_SHA256.to_be_bytes());
        signed.extend_from_slice(&((4 + 32 + username.len()) as u16).to_be_bytes());
        signed.extend_from_slice(signature.as_slice());
        signed.extend_from_slice(username.as_bytes());
        signed.extend_from_slice(packet);
        signed
    }

    /// Wrap `packet` in an encryption part.
    pub fn encrypt(packet: &[u8], username: &str, password: &str, iv: [u8; 16]) -> Vec<u8> {
        let mut plaintext = Sha1::digest(packet).as_slice().to_vec();
        plaintext.extend_from_slice(packet);

        let key = Sha256::digest(password.as_bytes());
        let mut cipher = ofb::Ofb::<Aes256>::new_from_slices(key.as_slice(), &iv).unwrap();
        cipher.apply_keystream(&mut plaintext);

        let mut part = Vec::new();
        part.extend_from_slice(&TYPE_ENCR_AES256.to_be_bytes());
        let len = 4 + 2 + username.len() + 16 + plaintext.len();
        part.extend_from_slice(&(len as u16).to_be_bytes());
        part.extend_from_slice(&(username.len() as u16).to_be_bytes());
        part.extend_from_slice(username.as_bytes());
        part.extend_from_slice(&iv);
        part.extend_from_slice(&plaintext);
        part
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    struct Passwords(HashMap<String, String>);

    impl PasswordLookup for Passwords {
        fn password(&self, username: &str) -> Option<String> {
            self.0.get(username).cloned()
        }
    }

    fn opts_with_types() -> ParseOpts {
        ParseOpts {
            types_db: TypesDb::parse("df used:GAUGE:0:U, free:GAUGE:0:U\n").unwrap(),
            ..Default::default()
        }
    }

    fn secured_opts(level: SecurityLevel) -> ParseOpts {
        ParseOpts {
            security_level: level,
            password_lookup: Some(Arc::new(Passwords(HashMap::from([(
                "metrics".to_string(),
                "s3cr3t".to_string(),
            )])))),
            types_db: TypesDb::default(),
        }
    }

    #[test]
    fn test_parse_single_value_list() {
        let packet = encode::packet(
            "h1",
            1_414_141_414,
            "df",
            &[Value::Gauge(1000.0), Value::Gauge(2500.0)],
        );

        let lists = parse(&packet, &opts_with_types()).unwrap();
        assert_eq!(lists.len(), 1);

        let vl = &lists[0];
        assert_eq!(vl.host, "h1");
        assert_eq!(vl.plugin, "df");
        assert_eq!(vl.r#type, "df");
        assert_eq!(vl.time, Utc.timestamp_opt(1_414_141_414, 0).unwrap());
        assert_eq!(vl.values, vec![Value::Gauge(1000.0), Value::Gauge(2500.0)]);
        assert_eq!(vl.ds_names, vec!["used", "free"]);
    }

    #[test]
    fn test_identifier_state_spans_value_parts() {
        let mut packet = Vec::new();
        packet.extend(encode::string_part(TYPE_HOST, "h1"));
        packet.extend(encode::string_part(TYPE_PLUGIN, "cpu"));
        packet.extend(encode::string_part(TYPE_TYPE, "cpu"));
        packet.extend(encode::string_part(TYPE_TYPE_INSTANCE, "user"));
        packet.extend(encode::values_part(&[Value::Derive(7)]));
        packet.extend(encode::string_part(TYPE_TYPE_INSTANCE, "system"));
        packet.extend(encode::values_part(&[Value::Derive(9)]));

        let lists = parse(&packet, &ParseOpts::default()).unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].type_instance, "user");
        assert_eq!(lists[1].type_instance, "system");
        // Both inherit the same host and plugin.
        assert!(lists.iter().all(|vl| vl.host == "h1" && vl.plugin == "cpu"));
        // No types db: a single value falls back to "value".
        assert_eq!(lists[0].ds_names, vec!["value"]);
    }

    #[test]
    fn test_value_kind_decoding() {
        let packet = encode::packet(
            "h",
            0,
            "mixed",
            &[
                Value::Counter(10),
                Value::Gauge(2.5),
                Value::Derive(-3),
                Value::Absolute(u64::MAX),
            ],
        );
        let lists = parse(&packet, &ParseOpts::default()).unwrap();

        let values = &lists[0].values;
        assert_eq!(values[0].as_f64(), 10.0);
        assert_eq!(values[1].as_f64(), 2.5);
        assert_eq!(values[2].as_f64(), -3.0);
        // Multiple values without a types db name by index.
        assert_eq!(lists[0].ds_names, vec!["0", "1", "2", "3"]);
    }

    #[test]
    fn test_nan_gauges_survive_parsing() {
        // NaN is collectd's encoding of "no reading"; the parser passes it
        // through and the point layer drops it.
        let packet = encode::packet("h", 0, "df", &[Value::Gauge(f64::NAN)]);
        let lists = parse(&packet, &ParseOpts::default()).unwrap();
        match lists[0].values[0] {
            Value::Gauge(v) => assert!(v.is_nan()),
            ref other => panic!("expected gauge, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_packets_are_rejected() {
        let packet = encode::packet("h1", 0, "df", &[Value::Gauge(1.0)]);

        // Truncation anywhere is an error for the whole datagram.
        for cut in [1, 5, packet.len() - 1] {
            assert!(parse(&packet[..cut], &ParseOpts::default()).is_err());
        }

        // A part length smaller than its own header.
        assert_eq!(
            parse(&[0x00, 0x00, 0x00, 0x02], &ParseOpts::default()),
            Err(ParseError::PartLength(2)),
        );

        // A string part without its terminator.
        let mut unterminated = encode::string_part(TYPE_HOST, "h1");
        let last = unterminated.len() - 1;
        unterminated[last] = b'x';
        assert_eq!(
            parse(&unterminated, &ParseOpts::default()),
            Err(ParseError::UnterminatedString),
        );
    }

    #[test]
    fn test_signed_packets() {
        let inner = encode::packet("h1", 7, "df", &[Value::Gauge(1.0)]);
        let signed = encode::sign(&inner, "metrics", "s3cr3t");

        let lists = parse(&signed, &secured_opts(SecurityLevel::Sign)).unwrap();
        assert_eq!(lists.len(), 1);

        // A flipped payload byte invalidates the signature.
        let mut tampered = signed.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert_eq!(
            parse(&tampered, &secured_opts(SecurityLevel::Sign)),
            Err(ParseError::BadSignature),
        );

        // An unsigned packet is refused outright at this level.
        assert_eq!(
            parse(&inner, &secured_opts(SecurityLevel::Sign)),
            Err(ParseError::SignatureRequired),
        );

        // An unknown user can't authenticate.
        let unknown = encode::sign(&inner, "nobody", "s3cr3t");
        assert_eq!(
            parse(&unknown, &secured_opts(SecurityLevel::Sign)),
            Err(ParseError::UnknownUser("nobody".to_string())),
        );

        // At level none the signature part is skipped, not verified.
        let lists = parse(&tampered, &ParseOpts::default()).unwrap();
        assert_eq!(lists.len(), 1);
    }

    #[test]
    fn test_encrypted_packets() {
        let inner = encode::packet("h1", 7, "df", &[Value::Gauge(1.0)]);
        let encrypted = encode::encrypt(&inner, "metrics", "s3cr3t", [0x24; 16]);

        let lists = parse(&encrypted, &secured_opts(SecurityLevel::Encrypt)).unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].host, "h1");

        // Encryption satisfies the sign level too.
        assert!(parse(&encrypted, &secured_opts(SecurityLevel::Sign)).is_ok());

        // A plaintext packet is refused at the encrypt level.
        assert_eq!(
            parse(&inner, &secured_opts(SecurityLevel::Encrypt)),
            Err(ParseError::EncryptionRequired),
        );

        // A wrong password garbles the payload and fails its checksum.
        let mut opts = secured_opts(SecurityLevel::Encrypt);
        opts.password_lookup = Some(Arc::new(Passwords(HashMap::from([(
            "metrics".to_string(),
            "wrong".to_string(),
        )]))));
        assert_eq!(parse(&encrypted, &opts), Err(ParseError::BadChecksum));
    }
}
