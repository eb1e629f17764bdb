//! Shared utilities for integration testing: a fake admin daemon.
//!
//! Speaks the real framing and challenge handshake and keeps a small model
//! of the daemon's VCL registry so reload tests can check what ends up
//! active.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use varnishconf::admin::{AdminClientConfig, SecretSource};

pub const SECRET: &[u8] = b"s3cr3t\n";

/// Override for one command: return `Some` to answer instead of the model.
type Hook = Box<dyn Fn(&str) -> Option<Reply> + Send + Sync>;

/// What the fake daemon does with a command.
pub enum Reply {
    Frame(u16, String),
    /// Close the connection without answering.
    Hangup,
    /// Never answer.
    Silence,
    /// Answer from the model after a pause.
    Delayed(Duration),
}

/// Minimal model of the daemon's VCL registry.
#[derive(Debug, Default)]
pub struct Registry {
    /// Loaded VCLs in load order, with their status.
    pub vcls: Vec<(String, &'static str)>,
    pub labels: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub started: u32,
}

impl Registry {
    pub fn active(&self) -> Option<&str> {
        self.vcls
            .iter()
            .find(|(_, status)| *status == "active")
            .map(|(name, _)| name.as_str())
    }

    pub fn names(&self) -> Vec<String> {
        self.vcls.iter().map(|(name, _)| name.clone()).collect()
    }

    fn handle(&mut self, line: &str) -> (u16, String) {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["ping"] => (200, "PONG 1629933022 1.0".into()),
            ["vcl.list", "-j"] => (200, self.listing()),
            ["vcl.load", name, _path] => {
                if self.vcls.iter().any(|(n, _)| n.as_str() == *name) {
                    return (106, format!("Already a VCL named {name}"));
                }
                self.vcls.push((name.to_string(), "available"));
                (200, "VCL compiled.".into())
            }
            ["vcl.label", label, target] => {
                if !self.vcls.iter().any(|(n, _)| n.as_str() == *target) {
                    return (106, format!("No configuration named {target} known."));
                }
                self.labels.insert(label.to_string(), target.to_string());
                (200, String::new())
            }
            ["vcl.use", name] => {
                if !self.vcls.iter().any(|(n, _)| n.as_str() == *name) {
                    return (106, format!("No configuration named {name} known."));
                }
                for (n, status) in &mut self.vcls {
                    *status = if n.as_str() == *name { "active" } else { "available" };
                }
                (200, format!("VCL '{name}' now active"))
            }
            ["vcl.discard", name] => {
                match self.vcls.iter().position(|(n, _)| n.as_str() == *name) {
                    Some(i) if self.vcls[i].1 == "active" => {
                        (106, "Cannot discard active VCL\nType 'help' for more info.".into())
                    }
                    Some(i) => {
                        self.vcls.remove(i);
                        (200, String::new())
                    }
                    None => (106, format!("No VCL named {name} known.")),
                }
            }
            ["param.set", name, value] => {
                self.params.insert(name.to_string(), value.to_string());
                (200, String::new())
            }
            ["start"] => {
                self.started += 1;
                (200, String::new())
            }
            _ => (101, "Unknown request.\nType 'help' for more info.".into()),
        }
    }

    /// `vcl.list -j`, including the daemon's trailing-comma quirk.
    fn listing(&self) -> String {
        let mut out = String::from("[ 2, [\"vcl.list\", \"-j\"], 1629933022.312,\n");
        for (name, status) in &self.vcls {
            out.push_str(&format!(
                "{{\"status\": \"{status}\", \"state\": \"auto\", \"temperature\": \"warm\", \"busy\": 0, \"name\": \"{name}\"}},\n"
            ));
        }
        out.push_str("\n]");
        out
    }
}

struct Shared {
    secret: Vec<u8>,
    registry: Mutex<Registry>,
    commands: Mutex<Vec<String>>,
    hook: Mutex<Option<Hook>>,
    connections: AtomicU32,
    auth_failures: AtomicU32,
    kill: watch::Sender<u64>,
}

/// A fake daemon admin socket on an ephemeral port.
#[derive(Clone)]
pub struct FakeDaemon {
    addr: SocketAddr,
    shared: Arc<Shared>,
}

impl FakeDaemon {
    pub async fn start() -> Self {
        Self::with_secret(SECRET).await
    }

    pub async fn with_secret(secret: &[u8]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (kill, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            secret: secret.to_vec(),
            registry: Mutex::new(Registry::default()),
            commands: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
            connections: AtomicU32::new(0),
            auth_failures: AtomicU32::new(0),
            kill,
        });

        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, _)) => {
                        let shared = Arc::clone(&accept_shared);
                        tokio::spawn(serve(socket, shared));
                    }
                    Err(_) => break,
                }
            }
        });

        Self { addr, shared }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Client settings with short timeouts and the matching secret.
    pub fn client_config(&self) -> AdminClientConfig {
        let mut config =
            AdminClientConfig::new(self.address(), SecretSource::Inline(SECRET.to_vec()));
        config.connect_timeout = Duration::from_secs(2);
        config.response_timeout = Duration::from_secs(2);
        config.reconnect_delay = Duration::from_millis(50);
        config
    }

    /// Answer commands through `hook` first, falling back to the model.
    pub fn set_hook(&self, hook: impl Fn(&str) -> Option<Reply> + Send + Sync + 'static) {
        *self.shared.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn clear_hook(&self) {
        *self.shared.hook.lock().unwrap() = None;
    }

    /// Commands received after authentication, in order.
    pub fn commands(&self) -> Vec<String> {
        self.shared.commands.lock().unwrap().clone()
    }

    pub fn clear_commands(&self) {
        self.shared.commands.lock().unwrap().clear();
    }

    pub fn registry<T>(&self, f: impl FnOnce(&mut Registry) -> T) -> T {
        f(&mut self.shared.registry.lock().unwrap())
    }

    pub fn connections(&self) -> u32 {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn auth_failures(&self) -> u32 {
        self.shared.auth_failures.load(Ordering::SeqCst)
    }

    /// Close every open connection.
    pub fn drop_connections(&self) {
        self.shared.kill.send_modify(|n| *n += 1);
    }
}

fn frame(status: u16, body: &str) -> String {
    format!("{:<3} {:<8}\n{}\n", status, body.len(), body)
}

fn expected_auth(challenge: &str, secret: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge.as_bytes());
    hasher.update(b"\n");
    hasher.update(secret);
    hasher.update(challenge.as_bytes());
    hasher.update(b"\n");
    format!("auth {}", hex::encode(hasher.finalize()))
}

async fn serve(socket: TcpStream, shared: Arc<Shared>) {
    let id = shared.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let mut kill = shared.kill.subscribe();
    let (read_half, mut writer) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let challenge = format!("{:a>32}", id);
    let banner = format!("{challenge}\n\nAuthentication required.\n");
    if writer.write_all(frame(107, &banner).as_bytes()).await.is_err() {
        return;
    }

    let mut authenticated = false;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => return,
            },
            _ = kill.changed() => return,
        };

        if !authenticated {
            if line == expected_auth(&challenge, &shared.secret) {
                authenticated = true;
                let banner = "-----------------------------\nVarnish Cache CLI 1.0\n";
                if writer.write_all(frame(200, banner).as_bytes()).await.is_err() {
                    return;
                }
            } else {
                shared.auth_failures.fetch_add(1, Ordering::SeqCst);
                let _ = writer.write_all(frame(107, &banner).as_bytes()).await;
            }
            continue;
        }

        shared.commands.lock().unwrap().push(line.clone());
        let hooked = shared
            .hook
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|hook| hook(&line));
        let reply = match hooked {
            Some(reply) => reply,
            None => {
                let (status, body) = shared.registry.lock().unwrap().handle(&line);
                Reply::Frame(status, body)
            }
        };

        let (status, body) = match reply {
            Reply::Frame(status, body) => (status, body),
            Reply::Hangup => return,
            Reply::Silence => continue,
            Reply::Delayed(pause) => {
                tokio::time::sleep(pause).await;
                let answer = shared.registry.lock().unwrap().handle(&line);
                answer
            }
        };
        if writer.write_all(frame(status, &body).as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Wait until `condition` holds, polling every 10ms.
pub async fn eventually(deadline: Duration, mut condition: impl FnMut() -> bool) {
    let started = std::time::Instant::now();
    while !condition() {
        if started.elapsed() > deadline {
            panic!("condition not met within {deadline:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
