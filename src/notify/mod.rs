//! Outbound SNMP notifications (traps and informs).
//!
//! The sender owns a dedicated thread running a current-thread tokio
//! loop, deliberately separate from whatever loop serves SNMP requests:
//! a resolver mid-request only ever hands work over a channel and never
//! awaits delivery. Informs are confirmed inside the sender loop with
//! timeout and retry; failures of any kind are logged, never surfaced
//! to the request that triggered the notification.

pub mod ber;
pub mod usm;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::ErrorStatus;
use crate::oid::Oid;
use crate::util::HexBytes;
use crate::value::Value;
use crate::varbind::VarBind;
use crate::version::Version;

use ber::{DecodeError, Decoder, EncodeBuf, tag};
use usm::{AuthProtocol, CryptoError, PrivProtocol, localize_password};

/// sysUpTime.0
const SYS_UPTIME: [u32; 9] = [1, 3, 6, 1, 2, 1, 1, 3, 0];
/// snmpTrapOID.0
const SNMP_TRAP_OID: [u32; 11] = [1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0];
/// snmpTraps: the parent of the standard trap OIDs (RFC 3418).
const SNMP_TRAPS: [u32; 9] = [1, 3, 6, 1, 6, 3, 1, 1, 5];

const MAX_MESSAGE_SIZE: i32 = 65507;
const INFORM_TIMEOUT: Duration = Duration::from_secs(1);
const INFORM_ATTEMPTS: u32 = 3;

const FLAG_AUTH: u8 = 0x01;
const FLAG_PRIV: u8 = 0x02;
const FLAG_REPORTABLE: u8 = 0x04;

/// Trap or inform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    /// Unconfirmed notification.
    Trap,
    /// Confirmed notification; the sender waits for the response.
    Inform,
}

/// Destination transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// UDP over IPv4.
    Udp,
    /// UDP over IPv6.
    Udp6,
}

/// Where to deliver a notification.
#[derive(Debug, Clone)]
pub struct NotifyTarget {
    /// Destination host name or address literal.
    pub host: String,
    /// Destination port.
    pub port: u16,
    /// Address family to resolve into.
    pub transport: TransportKind,
    /// Optional local bind address.
    pub bind_addr: Option<IpAddr>,
}

impl std::fmt::Display for NotifyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// SNMPv3 USM credentials for outbound messages.
#[derive(Debug, Clone)]
pub struct UsmSecurity {
    /// Security name.
    pub user: String,
    /// Authentication protocol and password, or unauthenticated.
    pub auth: Option<(AuthProtocol, String)>,
    /// Privacy protocol and password; requires `auth`.
    pub privacy: Option<(PrivProtocol, String)>,
}

/// Credentials, per message processing model.
#[derive(Debug, Clone)]
pub enum NotifyAuth {
    /// v1/v2c community string.
    Community(Bytes),
    /// v3 USM user.
    Usm(UsmSecurity),
}

/// One notification to originate.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Message processing model.
    pub version: Version,
    /// Credentials matching `version`.
    pub auth: NotifyAuth,
    /// Destination.
    pub target: NotifyTarget,
    /// Trap or inform.
    pub kind: NotifyKind,
    /// Notification type OID (snmpTrapOID.0 value).
    pub trap_oid: Oid,
    /// Explicit sysUpTime value in ticks; sender uptime otherwise.
    pub uptime: Option<u32>,
    /// Additional varbinds after the standard pair.
    pub varbinds: Vec<VarBind>,
    /// v1 trap agent-addr field.
    pub agent_addr: Option<Ipv4Addr>,
    /// v1 trap enterprise field override.
    pub enterprise: Option<Oid>,
}

/// Handle to the notification sender loop.
///
/// Cloneable and cheap; every clone feeds the same loop. The engine ID
/// identifies this simulator as the authoritative engine for v3 traps.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    engine_id: Bytes,
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationSender {
    /// Start the sender loop on its own thread.
    pub fn spawn(engine_id: impl Into<Bytes>) -> Self {
        let engine_id = engine_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let loop_engine = engine_id.clone();
        let spawned = std::thread::Builder::new()
            .name("snmp-mimic-notify".into())
            .spawn(move || match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(run_loop(loop_engine, rx)),
                Err(e) => error!(error = %e, "notification loop failed to start"),
            });
        if let Err(e) = spawned {
            error!(error = %e, "could not spawn notification thread");
        }
        Self { engine_id, tx }
    }

    /// The local engine ID (authoritative for v3 traps).
    pub fn engine_id(&self) -> &Bytes {
        &self.engine_id
    }

    /// Enqueue a notification. Never blocks; a dead loop only logs.
    pub fn submit(&self, notification: Notification) {
        debug!(dest = %notification.target, kind = ?notification.kind, "queueing notification");
        if self.tx.send(notification).is_err() {
            warn!("notification loop is gone; dropping notification");
        }
    }
}

struct SenderState {
    engine_id: Bytes,
    started: Instant,
    msg_id: AtomicU32,
    salt: AtomicU64,
}

impl SenderState {
    fn uptime_ticks(&self) -> u32 {
        (self.started.elapsed().as_millis() / 10) as u32
    }

    fn engine_time(&self) -> u32 {
        self.started.elapsed().as_secs() as u32
    }

    fn next_id(&self) -> i32 {
        (self.msg_id.fetch_add(1, Ordering::Relaxed) & 0x7fff_ffff) as i32
    }

    fn next_salt(&self) -> u64 {
        self.salt.fetch_add(1, Ordering::Relaxed)
    }
}

async fn run_loop(engine_id: Bytes, mut rx: mpsc::UnboundedReceiver<Notification>) {
    let mut seed = [0u8; 12];
    if let Err(e) = getrandom::fill(&mut seed) {
        warn!(error = %e, "no OS entropy for salt seed; falling back to zero seed");
    }
    let mut salt_seed = [0u8; 8];
    salt_seed.copy_from_slice(&seed[..8]);
    let mut id_seed = [0u8; 4];
    id_seed.copy_from_slice(&seed[8..]);

    let state = Arc::new(SenderState {
        engine_id,
        started: Instant::now(),
        msg_id: AtomicU32::new(u32::from_be_bytes(id_seed) & 0x7fff_ffff),
        salt: AtomicU64::new(u64::from_be_bytes(salt_seed)),
    });
    info!(engine_id = %HexBytes(&state.engine_id), "notification loop running");

    while let Some(job) = rx.recv().await {
        let state = state.clone();
        tokio::spawn(async move {
            let target = job.target.clone();
            match dispatch(&state, job).await {
                Ok(()) => debug!(dest = %target, "notification delivered"),
                Err(e) => warn!(dest = %target, error = %e, "notification failed"),
            }
        });
    }
}

/// Send failure; logged by the loop, never surfaced to the resolver.
#[derive(Debug)]
enum SendError {
    Io(std::io::Error),
    NoAddress,
    Decode(DecodeError),
    Crypto(CryptoError),
    NoResponse { attempts: u32 },
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::NoAddress => write!(f, "no address of the requested family"),
            Self::Decode(e) => write!(f, "bad response: {}", e),
            Self::Crypto(e) => write!(f, "privacy failure: {}", e),
            Self::NoResponse { attempts } => {
                write!(f, "no response after {} attempts", attempts)
            }
        }
    }
}

impl From<std::io::Error> for SendError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DecodeError> for SendError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<CryptoError> for SendError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

async fn dispatch(state: &SenderState, job: Notification) -> Result<(), SendError> {
    let addr = resolve_target(&job.target).await?;
    let socket = bind_for_target(addr, job.target.bind_addr).await?;
    socket.connect(addr).await?;

    match (&job.version, &job.auth) {
        (Version::V1, NotifyAuth::Community(community)) => {
            let msg = build_v1_trap(state, &job, community);
            socket.send(&msg).await?;
            Ok(())
        }
        (Version::V2c, NotifyAuth::Community(community)) => {
            let request_id = state.next_id();
            let msg = build_v2c_message(state, &job, community, request_id);
            match job.kind {
                NotifyKind::Trap => {
                    socket.send(&msg).await?;
                    Ok(())
                }
                NotifyKind::Inform => confirm_v2c(&socket, &msg, request_id).await,
            }
        }
        (Version::V3, NotifyAuth::Usm(creds)) => send_v3(state, &socket, &job, creds).await,
        // The notification module never constructs these combinations.
        (version, _) => {
            warn!(%version, "credentials do not match message version");
            Ok(())
        }
    }
}

async fn resolve_target(target: &NotifyTarget) -> Result<SocketAddr, SendError> {
    let addrs = tokio::net::lookup_host((target.host.as_str(), target.port)).await?;
    let want_v6 = target.transport == TransportKind::Udp6;
    addrs
        .into_iter()
        .find(|a| a.is_ipv6() == want_v6)
        .ok_or(SendError::NoAddress)
}

/// Bind a UDP socket suited to `target`, on `bind_addr` when given.
///
/// IPv6 sockets get `IPV6_V6ONLY` so v4-mapped traffic never leaks in.
async fn bind_for_target(
    target: SocketAddr,
    bind_addr: Option<IpAddr>,
) -> std::io::Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let bind = match bind_addr {
        Some(ip) => SocketAddr::new(ip, 0),
        None if target.is_ipv6() => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        None => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
    };
    let domain = if bind.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if bind.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&bind.into())?;
    UdpSocket::from_std(socket.into())
}

async fn confirm_v2c(
    socket: &UdpSocket,
    message: &[u8],
    request_id: i32,
) -> Result<(), SendError> {
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE as usize];
    for _ in 0..INFORM_ATTEMPTS {
        socket.send(message).await?;
        match tokio::time::timeout(INFORM_TIMEOUT, socket.recv(&mut buf)).await {
            Ok(received) => {
                let n = received?;
                match parse_v2c_response(&buf[..n]) {
                    Ok((rsp_id, status)) if rsp_id == request_id => {
                        if status != ErrorStatus::NoError {
                            info!(%status, "inform acknowledged with error status");
                        }
                        return Ok(());
                    }
                    Ok((rsp_id, _)) => {
                        debug!(rsp_id, request_id, "ignoring unrelated response");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(_) => continue,
        }
    }
    Err(SendError::NoResponse {
        attempts: INFORM_ATTEMPTS,
    })
}

// ---------------------------------------------------------------------------
// Message builders
// ---------------------------------------------------------------------------

fn push_value(buf: &mut EncodeBuf, value: &Value) {
    match value {
        Value::Integer(v) => buf.push_integer(*v),
        Value::OctetString(bytes) => buf.push_octet_string(bytes),
        Value::Null => buf.push_null(),
        Value::ObjectIdentifier(oid) => buf.push_oid(oid),
        Value::IpAddress(octets) => buf.push_ip_address(*octets),
        Value::Counter32(v) => buf.push_unsigned32(tag::COUNTER32, *v),
        Value::Gauge32(v) => buf.push_unsigned32(tag::GAUGE32, *v),
        Value::TimeTicks(v) => buf.push_unsigned32(tag::TIMETICKS, *v),
        Value::Opaque(bytes) => buf.push_tagged_bytes(tag::OPAQUE, bytes),
        Value::Counter64(v) => buf.push_integer64(*v),
        // Exception values never appear in originated notifications.
        Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView => buf.push_null(),
    }
}

fn push_varbinds(buf: &mut EncodeBuf, varbinds: &[VarBind]) {
    buf.push_sequence(|buf| {
        for vb in varbinds.iter().rev() {
            buf.push_sequence(|buf| {
                push_value(buf, &vb.value);
                buf.push_oid(&vb.oid);
            });
        }
    });
}

/// RFC 2576 §3.2: derive the v1 trap PDU fields from a v2 trap OID.
fn v1_trap_fields(trap_oid: &Oid, enterprise_override: Option<&Oid>) -> (Oid, i32, i32) {
    let arcs = trap_oid.arcs();
    let is_standard = arcs.len() == SNMP_TRAPS.len() + 1
        && arcs[..SNMP_TRAPS.len()] == SNMP_TRAPS
        && (1..=6).contains(&arcs[SNMP_TRAPS.len()]);
    if is_standard {
        let generic = arcs[SNMP_TRAPS.len()] as i32 - 1;
        let enterprise = enterprise_override
            .cloned()
            .unwrap_or_else(|| Oid::from_arcs(&SNMP_TRAPS));
        return (enterprise, generic, 0);
    }
    let specific = arcs.last().copied().unwrap_or(0) as i32;
    let derived = if arcs.len() >= 2 && arcs[arcs.len() - 2] == 0 {
        trap_oid.truncated(2)
    } else {
        trap_oid.truncated(1)
    };
    let enterprise = enterprise_override.cloned().unwrap_or(derived);
    (enterprise, 6, specific)
}

fn build_v1_trap(state: &SenderState, job: &Notification, community: &[u8]) -> Vec<u8> {
    let (enterprise, generic, specific) = v1_trap_fields(&job.trap_oid, job.enterprise.as_ref());
    let agent_addr = job.agent_addr.map(|a| a.octets()).unwrap_or([0, 0, 0, 0]);
    let timestamp = job.uptime.unwrap_or_else(|| state.uptime_ticks());

    let mut buf = EncodeBuf::new();
    buf.push_sequence(|buf| {
        buf.push_constructed(tag::TRAP_V1, |buf| {
            push_varbinds(buf, &job.varbinds);
            buf.push_unsigned32(tag::TIMETICKS, timestamp);
            buf.push_integer(specific);
            buf.push_integer(generic);
            buf.push_ip_address(agent_addr);
            buf.push_oid(&enterprise);
        });
        buf.push_octet_string(community);
        buf.push_integer(Version::V1.as_i32());
    });
    buf.finish_vec()
}

/// The standard leading varbinds plus the record's own.
fn notification_varbinds(state: &SenderState, job: &Notification) -> Vec<VarBind> {
    let uptime = job.uptime.unwrap_or_else(|| state.uptime_ticks());
    let mut varbinds = Vec::with_capacity(job.varbinds.len() + 2);
    varbinds.push(VarBind::new(
        Oid::from_arcs(&SYS_UPTIME),
        Value::TimeTicks(uptime),
    ));
    varbinds.push(VarBind::new(
        Oid::from_arcs(&SNMP_TRAP_OID),
        Value::ObjectIdentifier(job.trap_oid.clone()),
    ));
    varbinds.extend(job.varbinds.iter().cloned());
    varbinds
}

fn build_v2c_message(
    state: &SenderState,
    job: &Notification,
    community: &[u8],
    request_id: i32,
) -> Vec<u8> {
    let pdu_tag = match job.kind {
        NotifyKind::Trap => tag::TRAP_V2,
        NotifyKind::Inform => tag::INFORM_REQUEST,
    };
    let varbinds = notification_varbinds(state, job);

    let mut buf = EncodeBuf::new();
    buf.push_sequence(|buf| {
        buf.push_constructed(pdu_tag, |buf| {
            push_varbinds(buf, &varbinds);
            buf.push_integer(0); // error-index
            buf.push_integer(0); // error-status
            buf.push_integer(request_id);
        });
        buf.push_octet_string(community);
        buf.push_integer(Version::V2c.as_i32());
    });
    buf.finish_vec()
}

fn parse_v2c_response(data: &[u8]) -> Result<(i32, ErrorStatus), DecodeError> {
    let mut dec = Decoder::new(data);
    let mut msg = dec.read_sequence()?;
    let _version = msg.read_integer()?;
    let _community = msg.read_octet_string()?;
    let (pdu_tag, mut pdu) = msg.read_constructed()?;
    if pdu_tag != tag::RESPONSE {
        return Err(DecodeError::UnexpectedTag {
            expected: tag::RESPONSE,
            actual: pdu_tag,
        });
    }
    let request_id = pdu.read_integer()? as i32;
    let status = ErrorStatus::from_i32(pdu.read_integer()? as i32);
    Ok((request_id, status))
}

// ---------------------------------------------------------------------------
// SNMPv3 (USM)
// ---------------------------------------------------------------------------

struct V3Params<'a> {
    msg_id: i32,
    flags: u8,
    engine_id: &'a [u8],
    boots: u32,
    time: u32,
    user: &'a [u8],
    authenticated: bool,
    priv_params: &'a [u8],
    /// Fully encoded scoped-PDU TLV (plaintext SEQUENCE or the
    /// OCTET STRING holding the ciphertext).
    scoped_tlv: &'a [u8],
}

/// Assemble a v3 message; returns the wire bytes and, for authenticated
/// messages, the offset of the 12-byte digest placeholder.
fn build_v3_message(params: &V3Params<'_>) -> (Vec<u8>, Option<usize>) {
    let mut usm = EncodeBuf::new();
    let mut auth_mark = None;
    usm.push_sequence(|buf| {
        buf.push_octet_string(params.priv_params);
        if params.authenticated {
            buf.push_bytes(&[0u8; usm::MAC_LEN]);
            auth_mark = Some(buf.mark());
            buf.push_length(usm::MAC_LEN);
            buf.push_tag(tag::OCTET_STRING);
        } else {
            buf.push_octet_string(&[]);
        }
        buf.push_octet_string(params.user);
        buf.push_integer(params.time as i32);
        buf.push_integer(params.boots as i32);
        buf.push_octet_string(params.engine_id);
    });
    let usm_bytes = usm.finish_vec();
    let auth_pos_in_usm = auth_mark.map(|mark| usm_bytes.len() - mark);

    let mut buf = EncodeBuf::new();
    buf.push_sequence(|buf| {
        buf.push_bytes(params.scoped_tlv);
        buf.push_octet_string(&usm_bytes);
        buf.push_sequence(|buf| {
            buf.push_integer(3); // USM security model
            buf.push_octet_string(&[params.flags]);
            buf.push_integer(MAX_MESSAGE_SIZE);
            buf.push_integer(params.msg_id);
        });
        buf.push_integer(Version::V3.as_i32());
    });
    let message = buf.finish_vec();

    let auth_pos = auth_pos_in_usm.map(|pos| {
        // usm_bytes sits directly before the scoped TLV; the octet
        // string wrapper precedes it, so its content starts there.
        message.len() - params.scoped_tlv.len() - usm_bytes.len() + pos
    });
    (message, auth_pos)
}

fn build_scoped_pdu(
    engine_id: &[u8],
    pdu_tag: u8,
    request_id: i32,
    varbinds: &[VarBind],
) -> Vec<u8> {
    let mut buf = EncodeBuf::new();
    buf.push_sequence(|buf| {
        buf.push_constructed(pdu_tag, |buf| {
            push_varbinds(buf, varbinds);
            buf.push_integer(0);
            buf.push_integer(0);
            buf.push_integer(request_id);
        });
        buf.push_octet_string(&[]); // context name
        buf.push_octet_string(engine_id);
    });
    buf.finish_vec()
}

/// Engine discovery probe: empty engine/user, reportable GET with no
/// varbinds (RFC 3414 §4).
fn build_discovery_probe(msg_id: i32, request_id: i32) -> Vec<u8> {
    let scoped = build_scoped_pdu(&[], tag::GET_REQUEST, request_id, &[]);
    let (message, _) = build_v3_message(&V3Params {
        msg_id,
        flags: FLAG_REPORTABLE,
        engine_id: &[],
        boots: 0,
        time: 0,
        user: &[],
        authenticated: false,
        priv_params: &[],
        scoped_tlv: &scoped,
    });
    message
}

/// Pull the authoritative engine ID, boots, and time out of a report.
fn parse_v3_engine(data: &[u8]) -> Result<(Vec<u8>, u32, u32), DecodeError> {
    let mut dec = Decoder::new(data);
    let mut msg = dec.read_sequence()?;
    let _version = msg.read_integer()?;
    let _header = msg.read_sequence()?;
    let usm_outer = msg.read_octet_string()?;
    let mut usm = Decoder::new(usm_outer);
    let mut params = usm.read_sequence()?;
    let engine_id = params.read_octet_string()?.to_vec();
    let boots = params.read_integer()? as u32;
    let time = params.read_integer()? as u32;
    Ok((engine_id, boots, time))
}

async fn discover_engine(socket: &UdpSocket, state: &SenderState) -> Result<(Vec<u8>, u32, u32), SendError> {
    let probe = build_discovery_probe(state.next_id(), state.next_id());
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE as usize];
    for _ in 0..INFORM_ATTEMPTS {
        socket.send(&probe).await?;
        match tokio::time::timeout(INFORM_TIMEOUT, socket.recv(&mut buf)).await {
            Ok(received) => {
                let n = received?;
                let discovered = parse_v3_engine(&buf[..n])?;
                debug!(engine_id = %HexBytes(&discovered.0), "discovered authoritative engine");
                return Ok(discovered);
            }
            Err(_) => continue,
        }
    }
    Err(SendError::NoResponse {
        attempts: INFORM_ATTEMPTS,
    })
}

async fn send_v3(
    state: &SenderState,
    socket: &UdpSocket,
    job: &Notification,
    creds: &UsmSecurity,
) -> Result<(), SendError> {
    // Traps are sent under our own (authoritative) engine; informs are
    // authoritative at the receiver, so discover its engine first.
    let (engine_id, boots, time, pdu_tag, mut flags) = match job.kind {
        NotifyKind::Trap => (
            state.engine_id.to_vec(),
            1,
            state.engine_time(),
            tag::TRAP_V2,
            0,
        ),
        NotifyKind::Inform => {
            let (engine_id, boots, time) = discover_engine(socket, state).await?;
            (engine_id, boots, time, tag::INFORM_REQUEST, FLAG_REPORTABLE)
        }
    };

    let request_id = state.next_id();
    let varbinds = notification_varbinds(state, job);
    let scoped = build_scoped_pdu(&engine_id, pdu_tag, request_id, &varbinds);

    let auth = creds
        .auth
        .as_ref()
        .map(|(proto, password)| (*proto, localize_password(*proto, password.as_bytes(), &engine_id)));
    if auth.is_some() {
        flags |= FLAG_AUTH;
    }

    let mut priv_salt = [0u8; usm::SALT_LEN];
    let scoped_tlv = match (&auth, &creds.privacy) {
        (Some((auth_proto, _)), Some((priv_proto, password))) => {
            flags |= FLAG_PRIV;
            // RFC 3414 §2.6: privacy keys are derived with the auth
            // protocol's hash.
            let priv_key = localize_password(*auth_proto, password.as_bytes(), &engine_id);
            let (ciphertext, salt) = match priv_proto {
                PrivProtocol::Des => {
                    usm::encrypt_des(&priv_key, boots, state.next_salt() as u32, &scoped)?
                }
                PrivProtocol::Aes128 => {
                    usm::encrypt_aes128(&priv_key, boots, time, state.next_salt(), &scoped)?
                }
            };
            priv_salt = salt;
            let mut buf = EncodeBuf::new();
            buf.push_octet_string(&ciphertext);
            buf.finish_vec()
        }
        _ => scoped,
    };
    let priv_params: &[u8] = if flags & FLAG_PRIV != 0 {
        &priv_salt
    } else {
        &[]
    };

    let (mut message, auth_pos) = build_v3_message(&V3Params {
        msg_id: state.next_id(),
        flags,
        engine_id: &engine_id,
        boots,
        time,
        user: creds.user.as_bytes(),
        authenticated: auth.is_some(),
        priv_params,
        scoped_tlv: &scoped_tlv,
    });

    if let (Some((proto, key)), Some(pos)) = (&auth, auth_pos) {
        let mac = usm::hmac96(*proto, key, &message);
        message[pos..pos + usm::MAC_LEN].copy_from_slice(&mac);
    }

    match job.kind {
        NotifyKind::Trap => {
            socket.send(&message).await?;
            Ok(())
        }
        NotifyKind::Inform => {
            let mut buf = vec![0u8; MAX_MESSAGE_SIZE as usize];
            for _ in 0..INFORM_ATTEMPTS {
                socket.send(&message).await?;
                match tokio::time::timeout(INFORM_TIMEOUT, socket.recv(&mut buf)).await {
                    Ok(received) => {
                        received?;
                        debug!("inform response received");
                        return Ok(());
                    }
                    Err(_) => continue,
                }
            }
            Err(SendError::NoResponse {
                attempts: INFORM_ATTEMPTS,
            })
        }
    }
}
