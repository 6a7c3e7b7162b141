//! Notification-originating variation module.
//!
//! A record tagged with this module sends an SNMP trap or inform as a
//! side effect of being looked up, then answers the lookup normally.
//! The record's value field carries `key=value` options:
//!
//! ```text
//! 1.3.6.1.2.1.1.3.0|67:notification|version=2c,community=foo,host=203.0.113.1,op=get,value=123
//! ```
//!
//! Option reference: `op` (get|set|any|*), `version` (1|2c|3, required),
//! `community`, `user`/`authkey`/`authproto`/`privkey`/`privproto`,
//! `proto` (udp|udp6), `host`/`port`/`bindaddr`, `ntftype`
//! (trap|inform), `trapoid`, `uptime`, `agentaddress`/`enterprise`
//! (v1 only), `varbinds` (`oid:type:value` triples), `value`/`hexvalue`
//! (response override), `vlist` (`eq`/`lt`/`gt` predicates gating the
//! SET trigger). Bad options make the record inert; sending is
//! fire-and-forget and never delays the lookup.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::notify::{
    Notification, NotifyAuth, NotifyKind, NotifyTarget, TransportKind, UsmSecurity,
};
use crate::notify::usm::{AuthProtocol, PrivProtocol};
use crate::oid::Oid;
use crate::record::Record;
use crate::util::decode_hex;
use crate::value::Value;
use crate::varbind::VarBind;
use crate::variation::{VariationContext, VariationModule};
use crate::version::Version;

const MODULE: &str = "notification";
const DEFAULT_TRAP_OID: [u32; 10] = [1, 3, 6, 1, 6, 3, 1, 1, 5, 1];

/// Which request polarity triggers a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Get,
    Set,
    Any,
}

/// Accumulated `vlist` predicates.
#[derive(Debug, Clone, Default)]
struct Vlist {
    eq: Vec<Value>,
    lt: Option<Value>,
    gt: Option<Value>,
}

impl Vlist {
    fn matches(&self, value: &Value) -> bool {
        if self.eq.contains(value) {
            return true;
        }
        if let Some(bound) = &self.lt {
            if value_cmp(value, bound) == Some(Ordering::Less) {
                return true;
            }
        }
        if let Some(bound) = &self.gt {
            if value_cmp(value, bound) == Some(Ordering::Greater) {
                return true;
            }
        }
        false
    }

    fn is_empty(&self) -> bool {
        self.eq.is_empty() && self.lt.is_none() && self.gt.is_none()
    }
}

/// Order two values of the same variant; incomparable kinds gate false.
fn value_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::Counter32(x), Value::Counter32(y)) => Some(x.cmp(y)),
        (Value::Gauge32(x), Value::Gauge32(y)) => Some(x.cmp(y)),
        (Value::TimeTicks(x), Value::TimeTicks(y)) => Some(x.cmp(y)),
        (Value::Counter64(x), Value::Counter64(y)) => Some(x.cmp(y)),
        (Value::OctetString(x), Value::OctetString(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct Settings {
    op: OpKind,
    version: Version,
    auth: NotifyAuth,
    target: NotifyTarget,
    kind: NotifyKind,
    trap_oid: Oid,
    uptime: Option<u32>,
    agent_addr: Option<Ipv4Addr>,
    enterprise: Option<Oid>,
    extra_varbinds: Vec<VarBind>,
    value_override: Option<Value>,
    vlist: Vlist,
}

type RecordKey = (PathBuf, Oid);

/// The notification module. Per-record settings are parsed on first
/// invocation and cached; a record with unusable options stays inert.
#[derive(Debug, Default)]
pub struct NotificationModule {
    records: Mutex<HashMap<RecordKey, Arc<std::result::Result<Settings, String>>>>,
}

impl NotificationModule {
    /// Create the module with an empty settings cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn settings_for(
        &self,
        record: &Record,
        ctx: &VariationContext<'_>,
    ) -> Arc<std::result::Result<Settings, String>> {
        let key = (ctx.data_file.to_path_buf(), record.oid.clone());
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records
            .entry(key)
            .or_insert_with(|| Arc::new(parse_settings(record)))
            .clone()
    }
}

impl VariationModule for NotificationModule {
    fn variate(&self, record: &Record, ctx: &VariationContext<'_>) -> Result<(Oid, Value)> {
        let Some(notifier) = ctx.notifier else {
            return Err(Error::variation_config(
                MODULE,
                "no notification sender wired into the request context",
            ));
        };

        // Inexact plain GETs never reach a real instance; bail the way
        // the resolver would.
        if !ctx.next_flag && !ctx.exact_match {
            return Ok((ctx.orig_oid.clone(), ctx.error_status.clone()));
        }

        let settings = self.settings_for(record, ctx);
        let settings = match &*settings {
            Ok(settings) => settings,
            Err(reason) => {
                warn!(module = MODULE, oid = %record.oid, %reason, "record is inert");
                return Ok((ctx.orig_oid.clone(), ctx.error_status.clone()));
            }
        };

        // A SET only triggers when the written value passes the filter.
        if ctx.set_flag && !settings.vlist.is_empty() && !settings.vlist.matches(ctx.orig_value) {
            return Ok((record.oid.clone(), ctx.orig_value.clone()));
        }

        let triggered = match settings.op {
            OpKind::Get => !ctx.set_flag,
            OpKind::Set => ctx.set_flag,
            OpKind::Any => true,
        };
        if triggered {
            debug!(
                module = MODULE,
                oid = %record.oid,
                dest = %settings.target,
                version = %settings.version,
                "originating notification"
            );
            notifier.submit(Notification {
                version: settings.version,
                auth: settings.auth.clone(),
                target: settings.target.clone(),
                kind: settings.kind,
                trap_oid: settings.trap_oid.clone(),
                uptime: settings.uptime,
                varbinds: settings.extra_varbinds.clone(),
                agent_addr: settings.agent_addr,
                enterprise: settings.enterprise.clone(),
            });
        }

        match &settings.value_override {
            Some(value) if !ctx.set_flag => Ok((record.oid.clone(), value.clone())),
            _ => Ok((record.oid.clone(), ctx.orig_value.clone())),
        }
    }
}

fn parse_settings(record: &Record) -> std::result::Result<Settings, String> {
    let mut options: HashMap<&str, &str> = HashMap::new();
    for item in record.value.split(',') {
        if item.is_empty() {
            continue;
        }
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| format!("malformed option {:?}", item))?;
        options.insert(key.trim(), value);
    }

    let op = match options.get("op").copied().unwrap_or("set") {
        "get" => OpKind::Get,
        "set" => OpKind::Set,
        "any" | "*" => OpKind::Any,
        other => return Err(format!("unknown request type {:?}", other)),
    };

    let version = match options.get("version") {
        Some(&"1") => Version::V1,
        Some(&"2c") => Version::V2c,
        Some(&"3") => Version::V3,
        Some(other) => return Err(format!("unknown SNMP version {:?}", other)),
        None => return Err("version not configured".into()),
    };

    let auth = match version {
        Version::V1 | Version::V2c => NotifyAuth::Community(Bytes::copy_from_slice(
            options.get("community").copied().unwrap_or("public").as_bytes(),
        )),
        Version::V3 => NotifyAuth::Usm(parse_usm(&options)?),
        _ => return Err("unsupported SNMP version".into()),
    };

    let host = options
        .get("host")
        .copied()
        .ok_or_else(|| "target hostname not configured".to_string())?;
    let port: u16 = options
        .get("port")
        .copied()
        .unwrap_or("162")
        .parse()
        .map_err(|_| "malformed port".to_string())?;
    let transport = match options.get("proto").copied().unwrap_or("udp") {
        "udp" => TransportKind::Udp,
        "udp6" => TransportKind::Udp6,
        other => return Err(format!("unknown transport {:?}", other)),
    };
    let bind_addr = match options.get("bindaddr") {
        Some(text) => Some(
            text.parse::<IpAddr>()
                .map_err(|_| "malformed bindaddr".to_string())?,
        ),
        None => None,
    };

    let kind = match options.get("ntftype").copied().unwrap_or("trap") {
        "trap" => NotifyKind::Trap,
        "inform" => NotifyKind::Inform,
        other => return Err(format!("unknown notification type {:?}", other)),
    };

    let trap_oid = match options.get("trapoid") {
        Some(text) => text
            .parse()
            .map_err(|_| "malformed trapoid".to_string())?,
        None => Oid::from_arcs(&DEFAULT_TRAP_OID),
    };

    let uptime = match options.get("uptime") {
        Some(text) => Some(text.parse().map_err(|_| "malformed uptime".to_string())?),
        None => None,
    };
    let agent_addr = match options.get("agentaddress") {
        Some(text) => Some(
            text.parse::<Ipv4Addr>()
                .map_err(|_| "malformed agentaddress".to_string())?,
        ),
        None => None,
    };
    let enterprise = match options.get("enterprise") {
        Some(text) => Some(
            text.parse::<Oid>()
                .map_err(|_| "malformed enterprise".to_string())?,
        ),
        None => None,
    };

    let extra_varbinds = match options.get("varbinds") {
        Some(text) => parse_varbinds(text)?,
        None => Vec::new(),
    };

    let value_override = if let Some(hex) = options.get("hexvalue") {
        let bytes = decode_hex(hex).map_err(|_| "malformed hexvalue".to_string())?;
        Some(Value::OctetString(Bytes::from(bytes)))
    } else if let Some(text) = options.get("value") {
        Some(
            record
                .typed_value_of(text)
                .map_err(|e| format!("malformed value override: {}", e))?,
        )
    } else {
        None
    };

    let vlist = match options.get("vlist") {
        Some(text) => parse_vlist(record, text),
        None => Vlist::default(),
    };

    Ok(Settings {
        op,
        version,
        auth,
        target: NotifyTarget {
            host: host.to_string(),
            port,
            transport,
            bind_addr,
        },
        kind,
        trap_oid,
        uptime,
        agent_addr,
        enterprise,
        extra_varbinds,
        value_override,
        vlist,
    })
}

fn parse_usm(options: &HashMap<&str, &str>) -> std::result::Result<UsmSecurity, String> {
    let user = options
        .get("user")
        .copied()
        .ok_or_else(|| "user not configured".to_string())?;

    // No key means no authentication, whatever the protocol says.
    let auth = match options.get("authkey").copied().filter(|k| !k.is_empty()) {
        None => None,
        Some(key) => match options.get("authproto").copied().unwrap_or("md5") {
            "none" => None,
            "md5" => Some((AuthProtocol::Md5, key.to_string())),
            "sha" => Some((AuthProtocol::Sha1, key.to_string())),
            other => return Err(format!("unknown auth proto {:?}", other)),
        },
    };

    let privacy = match options.get("privkey") {
        None => None,
        Some(key) if key.is_empty() => None,
        Some(key) => {
            if auth.is_none() {
                return Err("privacy requires authentication".into());
            }
            let proto = match options.get("privproto").copied().unwrap_or("des") {
                "des" => PrivProtocol::Des,
                "aes" => PrivProtocol::Aes128,
                "none" => return Ok(UsmSecurity {
                    user: user.to_string(),
                    auth,
                    privacy: None,
                }),
                other => return Err(format!("unknown privacy proto {:?}", other)),
            };
            Some((proto, key.to_string()))
        }
    };

    Ok(UsmSecurity {
        user: user.to_string(),
        auth,
        privacy,
    })
}

/// `oid:type:value` triples. Type letters follow the classic
/// command-line convention.
fn parse_varbinds(text: &str) -> std::result::Result<Vec<VarBind>, String> {
    let fields: Vec<&str> = text.split(':').collect();
    if !fields.len().is_multiple_of(3) {
        return Err("varbinds not oid:type:value triples".into());
    }
    let mut varbinds = Vec::with_capacity(fields.len() / 3);
    for triple in fields.chunks(3) {
        let oid: Oid = triple[0]
            .parse()
            .map_err(|_| format!("malformed varbind OID {:?}", triple[0]))?;
        let value = parse_typed_value(triple[1], triple[2])
            .ok_or_else(|| format!("malformed varbind value {:?}", triple[2]))?;
        varbinds.push(VarBind::new(oid, value));
    }
    Ok(varbinds)
}

fn parse_typed_value(code: &str, text: &str) -> Option<Value> {
    match code {
        "s" => Some(Value::from(text)),
        "h" => decode_hex(text).ok().map(|b| Value::OctetString(Bytes::from(b))),
        "i" => text.parse().ok().map(Value::Integer),
        "o" => text.parse().ok().map(Value::ObjectIdentifier),
        "a" => text
            .parse::<Ipv4Addr>()
            .ok()
            .map(|a| Value::IpAddress(a.octets())),
        "u" | "g" => text.parse().ok().map(Value::Gauge32),
        "t" => text.parse().ok().map(Value::TimeTicks),
        "b" => Some(Value::from(text)),
        "I" => text.parse().ok().map(Value::Counter64),
        _ => None,
    }
}

/// `pred:value` pairs, accumulated: repeated `eq` values form a set,
/// `lt`/`gt` keep a single bound. Bad pairs are logged and skipped.
fn parse_vlist(record: &Record, text: &str) -> Vlist {
    let mut vlist = Vlist::default();
    let fields: Vec<&str> = text.split(':').collect();
    for pair in fields.chunks(2) {
        let [pred, raw] = pair else {
            warn!(module = MODULE, "dangling vlist predicate; ignored");
            break;
        };
        let Ok(value) = record.typed_value_of(raw) else {
            warn!(module = MODULE, value = %raw, "untypeable vlist value; ignored");
            continue;
        };
        match *pred {
            "eq" => {
                if !vlist.eq.contains(&value) {
                    vlist.eq.push(value);
                }
            }
            "lt" => vlist.lt = Some(value),
            "gt" => vlist.gt = Some(value),
            other => {
                warn!(module = MODULE, predicate = %other, "bad vlist syntax; ignored");
            }
        }
    }
    vlist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationSender;
    use crate::oid;
    use crate::record::SnmprecGrammar;
    use std::net::SocketAddr;
    use std::path::Path;

    fn record(value: &str) -> Record {
        SnmprecGrammar
            .parse(&format!("1.3.6.1.2.1.1.3.0|2:notification|{}", value))
            .unwrap()
    }

    fn context<'a>(
        orig_oid: &'a Oid,
        orig_value: &'a Value,
        set_flag: bool,
        notifier: Option<&'a NotificationSender>,
        domain: &'a Oid,
        error_status: &'a Value,
    ) -> VariationContext<'a> {
        VariationContext {
            orig_oid,
            orig_value,
            data_file: Path::new("/tmp/agent.snmprec"),
            subtree_flag: false,
            exact_match: true,
            error_status,
            vars_total: 1,
            vars_remaining: 0,
            next_flag: false,
            set_flag,
            transport_domain: domain,
            transport_address: "127.0.0.1:33161".parse::<SocketAddr>().unwrap(),
            context_engine_id: b"",
            context_name: b"public",
            notifier,
        }
    }

    #[test]
    fn test_parse_settings_basic() {
        let rec = record("op=get,host=203.0.113.1,version=2c,community=foo,value=99");
        let settings = parse_settings(&rec).unwrap();
        assert_eq!(settings.op, OpKind::Get);
        assert_eq!(settings.version, Version::V2c);
        assert_eq!(settings.target.host, "203.0.113.1");
        assert_eq!(settings.target.port, 162);
        assert_eq!(settings.kind, NotifyKind::Trap);
        assert_eq!(settings.trap_oid, Oid::from_arcs(&DEFAULT_TRAP_OID));
        // The record tag is Integer, so the override types as one.
        assert_eq!(settings.value_override, Some(Value::Integer(99)));
        match settings.auth {
            NotifyAuth::Community(community) => assert_eq!(&community[..], b"foo"),
            other => panic!("unexpected auth: {:?}", other),
        }
    }

    #[test]
    fn test_version_is_mandatory() {
        let err = parse_settings(&record("op=get,host=203.0.113.1")).unwrap_err();
        assert!(err.contains("version"));
        let err = parse_settings(&record("version=4,host=h")).unwrap_err();
        assert!(err.contains("unknown SNMP version"));
    }

    #[test]
    fn test_host_is_mandatory() {
        let err = parse_settings(&record("version=2c")).unwrap_err();
        assert!(err.contains("hostname"));
    }

    #[test]
    fn test_unknown_op_and_protos_rejected() {
        assert!(parse_settings(&record("version=2c,host=h,op=walk")).is_err());
        assert!(parse_settings(&record("version=3,host=h,user=u,authproto=rot13,authkey=k")).is_err());
        assert!(
            parse_settings(&record(
                "version=3,host=h,user=u,authkey=k,privkey=p,privproto=xor"
            ))
            .is_err()
        );
    }

    #[test]
    fn test_usm_parsing() {
        let rec = record(
            "version=3,host=h,user=simulator,authproto=sha,authkey=authpass,privproto=aes,privkey=privpass",
        );
        let settings = parse_settings(&rec).unwrap();
        let NotifyAuth::Usm(usm) = settings.auth else {
            panic!("expected USM credentials");
        };
        assert_eq!(usm.user, "simulator");
        assert_eq!(usm.auth, Some((AuthProtocol::Sha1, "authpass".into())));
        assert_eq!(usm.privacy, Some((PrivProtocol::Aes128, "privpass".into())));
    }

    #[test]
    fn test_usm_privacy_requires_auth() {
        let err =
            parse_settings(&record("version=3,host=h,user=u,authproto=none,privkey=p")).unwrap_err();
        assert!(err.contains("privacy requires authentication"));
    }

    #[test]
    fn test_varbinds_triples() {
        let rec = record("version=2c,host=h,varbinds=1.3.6.1.9.1:i:5:1.3.6.1.9.2:s:hey");
        let settings = parse_settings(&rec).unwrap();
        assert_eq!(
            settings.extra_varbinds,
            vec![
                VarBind::new(oid!(1, 3, 6, 1, 9, 1), Value::Integer(5)),
                VarBind::new(oid!(1, 3, 6, 1, 9, 2), Value::from("hey")),
            ]
        );
    }

    #[test]
    fn test_vlist_accumulates() {
        let rec = record("version=2c,host=h,vlist=eq:1:eq:2:lt:0:gt:10");
        let settings = parse_settings(&rec).unwrap();
        assert_eq!(settings.vlist.eq, vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(settings.vlist.lt, Some(Value::Integer(0)));
        assert_eq!(settings.vlist.gt, Some(Value::Integer(10)));

        assert!(settings.vlist.matches(&Value::Integer(1)));
        assert!(settings.vlist.matches(&Value::Integer(2)));
        assert!(settings.vlist.matches(&Value::Integer(-5)));
        assert!(settings.vlist.matches(&Value::Integer(11)));
        assert!(!settings.vlist.matches(&Value::Integer(5)));
    }

    #[test]
    fn test_set_with_nonmatching_vlist_is_silent() {
        let module = NotificationModule::new();
        let rec = record("op=set,version=2c,host=203.0.113.1,vlist=eq:7");
        let sender = NotificationSender::spawn(Bytes::from_static(b"t"));
        let domain = oid!(1, 3, 6, 1, 6, 1, 1);
        let orig_oid = rec.oid.clone();
        let written = Value::Integer(3);
        let error_status = Value::NoSuchInstance;
        let ctx = context(&orig_oid, &written, true, Some(&sender), &domain, &error_status);
        let (oid, value) = module.variate(&rec, &ctx).unwrap();
        assert_eq!(oid, rec.oid);
        assert_eq!(value, Value::Integer(3));
    }

    #[test]
    fn test_get_returns_override_set_returns_original() {
        let module = NotificationModule::new();
        let rec = record("op=get,version=2c,host=203.0.113.1,community=foo,value=99");
        let sender = NotificationSender::spawn(Bytes::from_static(b"t"));
        let domain = oid!(1, 3, 6, 1, 6, 1, 1);
        let orig_oid = rec.oid.clone();
        let error_status = Value::NoSuchInstance;

        let null = Value::Null;
        let ctx = context(&orig_oid, &null, false, Some(&sender), &domain, &error_status);
        let (_, value) = module.variate(&rec, &ctx).unwrap();
        assert_eq!(value, Value::Integer(99));

        let written = Value::Integer(1);
        let ctx = context(&orig_oid, &written, true, Some(&sender), &domain, &error_status);
        let (_, value) = module.variate(&rec, &ctx).unwrap();
        assert_eq!(value, Value::Integer(1));
    }

    #[test]
    fn test_inert_record_answers_error_status() {
        let module = NotificationModule::new();
        let rec = record("op=get,host=203.0.113.1"); // no version
        let sender = NotificationSender::spawn(Bytes::from_static(b"t"));
        let domain = oid!(1, 3, 6, 1, 6, 1, 1);
        let orig_oid = rec.oid.clone();
        let null = Value::Null;
        let error_status = Value::NoSuchInstance;
        let ctx = context(&orig_oid, &null, false, Some(&sender), &domain, &error_status);
        let (oid, value) = module.variate(&rec, &ctx).unwrap();
        assert_eq!(oid, orig_oid);
        assert_eq!(value, Value::NoSuchInstance);
    }

    #[test]
    fn test_missing_notifier_is_an_error() {
        let module = NotificationModule::new();
        let rec = record("version=2c,host=203.0.113.1");
        let domain = oid!(1, 3, 6, 1, 6, 1, 1);
        let orig_oid = rec.oid.clone();
        let null = Value::Null;
        let error_status = Value::NoSuchInstance;
        let ctx = context(&orig_oid, &null, false, None, &domain, &error_status);
        assert!(matches!(
            module.variate(&rec, &ctx),
            Err(Error::VariationConfig { .. })
        ));
    }
}
