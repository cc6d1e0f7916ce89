// ABOUTME: End-to-end tests driving the listener with a real russh client.
// ABOUTME: Covers credential harvesting, exec recording and the fake shell.

use russh::client::{self, AuthResult};
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::ssh_key::{Algorithm, PrivateKey};
use russh::keys::PrivateKeyWithHashAlg;
use russh::{ChannelMsg, MethodKind};
use spot_core::{
    AuditEvent, AuthMethodConfig, EventKind, Listener, MemorySink, ServerSettings, Severity,
    StaticPolicy,
};
use spot_ssh::KeyAlgorithm;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const ACCEPT: AuthMethodConfig = AuthMethodConfig {
    enable: true,
    accept: true,
};

struct Client;

impl client::Handler for Client {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

struct Honeypot {
    addr: SocketAddr,
    sink: Arc<MemorySink>,
    _keys: TempDir,
}

async fn start(
    password: AuthMethodConfig,
    public_key: AuthMethodConfig,
    max_auth_attempts: usize,
) -> Honeypot {
    let keys = TempDir::new().expect("should create temp dir");
    let key_paths = [keys.path().join("host.key")];
    let identities = spot_ssh::load_or_create(&key_paths, KeyAlgorithm::Ed25519)
        .expect("should create host key");
    let sink = MemorySink::new();
    let policy = StaticPolicy::new(AuthMethodConfig::default(), password, public_key, sink.clone());
    let settings = ServerSettings {
        max_auth_attempts,
        auth_rejection_time: Duration::from_millis(10),
        ..ServerSettings::default()
    };

    let listener = Listener::bind(
        "127.0.0.1:0".parse().expect("valid addr"),
        identities,
        settings,
        Arc::new(policy),
        sink.clone(),
    )
    .await
    .expect("should bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(listener.run());

    Honeypot {
        addr,
        sink,
        _keys: keys,
    }
}

async fn connect(addr: SocketAddr) -> client::Handle<Client> {
    let config = Arc::new(client::Config::default());
    client::connect(config, addr, Client)
        .await
        .expect("handshake should succeed")
}

/// Poll the sink until `done` holds or two seconds pass.
async fn wait_for(sink: &MemorySink, done: impl Fn(&[AuditEvent]) -> bool) -> Vec<AuditEvent> {
    for _ in 0..40 {
        let events = sink.events();
        if done(&events) {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    sink.events()
}

fn shell_messages(events: &[AuditEvent]) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.kind() == EventKind::SshShell)
        .map(|e| e.message().to_string())
        .collect()
}

#[tokio::test]
async fn password_is_harvested_and_denied() {
    let honeypot = start(AuthMethodConfig::HARVEST, AuthMethodConfig::HARVEST, 6).await;
    let mut session = connect(honeypot.addr).await;

    let result = session
        .authenticate_password("root", "hunter2")
        .await
        .expect("auth exchange should complete");

    assert!(!matches!(result, AuthResult::Success));
    let attempts = honeypot.sink.of_kind(EventKind::PasswordAuth);
    assert_eq!(attempts.len(), 1, "exactly one event per attempt");
    assert_eq!(attempts[0].field("user"), Some("root"));
    assert_eq!(attempts[0].field("password"), Some("hunter2"));
    assert_eq!(attempts[0].severity(), Severity::Info);
    assert!(attempts[0].message().starts_with("reject client: SSH-2.0-"));
    assert!(attempts[0]
        .field("client_version")
        .is_some_and(|v| v.starts_with("SSH-2.0-")));
}

#[tokio::test]
async fn attempts_stop_after_max_auth_tries() {
    let honeypot = start(AuthMethodConfig::HARVEST, AuthMethodConfig::HARVEST, 2).await;
    let mut session = connect(honeypot.addr).await;

    let first = session
        .authenticate_password("root", "123456")
        .await
        .expect("first attempt is answered");
    assert!(!matches!(first, AuthResult::Success));

    let second = tokio::time::timeout(
        Duration::from_secs(5),
        session.authenticate_password("root", "password"),
    )
    .await
    .expect("server should drop the connection");
    assert!(second.is_err(), "the last allowed attempt ends the connection");

    let third = tokio::time::timeout(
        Duration::from_secs(5),
        session.authenticate_password("root", "admin"),
    )
    .await
    .expect("closed session answers immediately");
    assert!(third.is_err());

    let attempts = honeypot.sink.of_kind(EventKind::PasswordAuth);
    let passwords: Vec<_> = attempts.iter().filter_map(|e| e.field("password")).collect();
    assert_eq!(passwords, ["123456", "password"]);
}

#[tokio::test]
async fn disabled_method_is_never_offered() {
    let honeypot = start(AuthMethodConfig::HARVEST, AuthMethodConfig::default(), 6).await;
    let mut session = connect(honeypot.addr).await;

    let result = session
        .authenticate_password("root", "hunter2")
        .await
        .expect("auth exchange should complete");

    match result {
        AuthResult::Failure {
            remaining_methods, ..
        } => {
            assert!(remaining_methods.contains(&MethodKind::Password));
            assert!(!remaining_methods.contains(&MethodKind::PublicKey));
        }
        AuthResult::Success => panic!("harvested password must be denied"),
    }
    assert!(honeypot.sink.of_kind(EventKind::PublicKeyAuth).is_empty());
}

#[tokio::test]
async fn non_session_channel_is_rejected() {
    let honeypot = start(ACCEPT, AuthMethodConfig::HARVEST, 6).await;
    let mut session = connect(honeypot.addr).await;
    session
        .authenticate_password("root", "toor")
        .await
        .expect("auth exchange should complete");

    let forward = session
        .channel_open_direct_tcpip("10.0.0.5", 3306, "127.0.0.1", 40000)
        .await;
    assert!(forward.is_err(), "direct-tcpip must not open");

    let events = wait_for(&honeypot.sink, |events| {
        events
            .iter()
            .any(|e| e.message() == "reject channel, type: direct-tcpip")
    })
    .await;
    let rejected = events
        .iter()
        .find(|e| e.message() == "reject channel, type: direct-tcpip")
        .expect("rejection recorded");
    assert_eq!(rejected.kind(), EventKind::SysRunning);
    assert_eq!(rejected.severity(), Severity::Debug);

    let mut channel = session
        .channel_open_session()
        .await
        .expect("session channels still open");
    channel.exec(true, "id").await.expect("exec request sent");
    wait_for(&honeypot.sink, |events| {
        events.iter().any(|e| e.kind() == EventKind::SshExec)
    })
    .await;
    assert_eq!(honeypot.sink.of_kind(EventKind::SshExec).len(), 1);
    let _ = channel.wait().await;
}

#[tokio::test]
async fn malformed_client_does_not_stop_listener() {
    use tokio::io::AsyncWriteExt;

    let honeypot = start(AuthMethodConfig::HARVEST, AuthMethodConfig::HARVEST, 6).await;

    let mut raw = tokio::net::TcpStream::connect(honeypot.addr)
        .await
        .expect("connect");
    let mut garbage = b"SSH-2.0-scanner\r\n".to_vec();
    garbage.extend_from_slice(b"\x00\x00\x00\x0c\x0a\x14\xff\xfe\xfd\xfc\xc3\x28\xa0\xa1\x80\x81");
    raw.write_all(&garbage).await.expect("write");
    drop(raw);

    wait_for(&honeypot.sink, |events| {
        events.iter().any(|e| e.kind() == EventKind::SysRunning)
    })
    .await;

    let mut session = connect(honeypot.addr).await;
    session
        .authenticate_password("root", "after-garbage")
        .await
        .expect("listener still serves clients");
    let attempts = honeypot.sink.of_kind(EventKind::PasswordAuth);
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].field("password"), Some("after-garbage"));
}

#[tokio::test]
async fn public_key_is_fingerprinted_and_denied() {
    let honeypot = start(AuthMethodConfig::HARVEST, AuthMethodConfig::HARVEST, 6).await;
    let mut session = connect(honeypot.addr).await;
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).expect("should generate key");
    let fingerprint = spot_ssh::compute_fingerprint(key.public_key());

    let result = session
        .authenticate_publickey("admin", PrivateKeyWithHashAlg::new(Arc::new(key), None))
        .await
        .expect("auth exchange should complete");

    assert!(!matches!(result, AuthResult::Success));
    let attempts = honeypot.sink.of_kind(EventKind::PublicKeyAuth);
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].field("user"), Some("admin"));
    assert_eq!(attempts[0].field("key_fingerprint"), Some(fingerprint.as_str()));
}

#[tokio::test]
async fn exec_is_recorded_and_channel_closed() {
    let honeypot = start(ACCEPT, AuthMethodConfig::HARVEST, 6).await;
    let mut session = connect(honeypot.addr).await;
    let result = session
        .authenticate_password("root", "toor")
        .await
        .expect("auth exchange should complete");
    assert!(matches!(result, AuthResult::Success));

    let mut channel = session.channel_open_session().await.expect("session channel");
    channel.exec(true, "ls -la").await.expect("exec request sent");

    let mut output = Vec::new();
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.extend_from_slice(&data),
                ChannelMsg::Close => return true,
                _ => {}
            }
        }
        true
    })
    .await
    .expect("channel should close");

    assert!(closed);
    assert!(output.is_empty(), "exec produces no output");
    let execs = honeypot.sink.of_kind(EventKind::SshExec);
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].field("command"), Some("ls -la"));
    assert_eq!(execs[0].message(), "exec:[ls -la]");
    assert!(shell_messages(&honeypot.sink.events()).is_empty(), "no shell spawned");
}

#[tokio::test]
async fn shell_lines_are_recorded_until_eof() {
    let honeypot = start(ACCEPT, AuthMethodConfig::HARVEST, 6).await;
    let mut session = connect(honeypot.addr).await;
    session
        .authenticate_password("root", "toor")
        .await
        .expect("auth exchange should complete");

    let mut channel = session.channel_open_session().await.expect("session channel");
    channel
        .request_pty(true, "xterm", 80, 24, 0, 0, &[])
        .await
        .expect("pty request sent");
    channel
        .set_env(true, "LANG", "en_US.UTF-8")
        .await
        .expect("env request sent");
    channel.request_shell(true).await.expect("shell request sent");
    channel.data(&b"whoami\n"[..]).await.expect("data sent");
    channel.eof().await.expect("eof sent");

    let mut output = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.extend_from_slice(&data),
                ChannelMsg::Close => break,
                _ => {}
            }
        }
    })
    .await;

    let events = wait_for(&honeypot.sink, |events| {
        shell_messages(events).last().map(String::as_str) == Some("shell exit")
    })
    .await;

    assert_eq!(
        shell_messages(&events),
        ["allocate shell", "shell received: whoami", "shell exit"]
    );
    assert!(output.starts_with(b"$ whoami\r\n$ "));

    let pty = events
        .iter()
        .find(|e| e.kind() == EventKind::SshPtyReq)
        .expect("pty recorded");
    assert_eq!(pty.field("term"), Some("xterm"));

    let env = events
        .iter()
        .find(|e| e.kind() == EventKind::SshEnv)
        .expect("env recorded");
    assert_eq!(env.field("name"), Some("LANG"));
    assert_eq!(env.field("value"), Some("en_US.UTF-8"));
}

#[tokio::test]
async fn disconnect_ends_shell() {
    let honeypot = start(ACCEPT, AuthMethodConfig::HARVEST, 6).await;
    let mut session = connect(honeypot.addr).await;
    session
        .authenticate_password("root", "toor")
        .await
        .expect("auth exchange should complete");

    let channel = session.channel_open_session().await.expect("session channel");
    channel.request_shell(true).await.expect("shell request sent");
    channel.data(&b"uname -a\r"[..]).await.expect("data sent");
    wait_for(&honeypot.sink, |events| shell_messages(events).len() >= 2).await;

    session
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await
        .expect("disconnect sent");

    let events = wait_for(&honeypot.sink, |events| {
        shell_messages(events).last().map(String::as_str) == Some("shell exit")
    })
    .await;
    assert_eq!(
        shell_messages(&events),
        ["allocate shell", "shell received: uname -a", "shell exit"]
    );
}
