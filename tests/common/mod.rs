#![allow(dead_code)]

use pjlink_ctl::ProjectorInfo;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const SEED: &str = "498e4a67";

/// Mutable device state shared by every connection to the fake.
#[derive(Debug, Clone)]
pub struct FakeState {
    pub password: Option<String>,
    pub name: String,
    pub manufacturer: String,
    pub product: String,
    pub class: char,
    pub power: char,
    pub input: String,
    pub inputs: Vec<String>,
    pub av_mute: String,
    pub errors: String,
    pub lamps: String,
    /// Power-on reports warming up instead of switching on directly.
    pub warm_up: bool,
    /// Lines are read but never answered.
    pub silent: bool,
    /// Replies are written this long after the command arrives.
    pub reply_delay: Duration,
    pub received: Vec<String>,
    pub connections: usize,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            password: None,
            name: "Fake Projector".to_string(),
            manufacturer: "ACME".to_string(),
            product: "PJ-1000".to_string(),
            class: '1',
            power: '0',
            input: "31".to_string(),
            inputs: vec!["11".into(), "21".into(), "31".into(), "32".into()],
            av_mute: "30".to_string(),
            errors: "000000".to_string(),
            lamps: "1200 1".to_string(),
            warm_up: false,
            silent: false,
            reply_delay: Duration::ZERO,
            received: Vec::new(),
            connections: 0,
        }
    }
}

/// An in-process PJLink projector on 127.0.0.1.
pub struct FakeProjector {
    addr: SocketAddr,
    state: Arc<Mutex<FakeState>>,
    handle: JoinHandle<()>,
}

impl FakeProjector {
    pub async fn start() -> Self {
        Self::start_with(FakeState::default()).await
    }

    pub async fn start_with(state: FakeState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(state));

        let shared = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&shared);
                tokio::spawn(async move {
                    let _ = serve(stream, state).await;
                });
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn info(&self, name: &str) -> ProjectorInfo {
        ProjectorInfo::new(name, "127.0.0.1", self.port())
    }

    pub fn update(&self, apply: impl FnOnce(&mut FakeState)) {
        apply(&mut self.state.lock().unwrap());
    }

    pub fn state(&self) -> FakeState {
        self.state.lock().unwrap().clone()
    }

    pub fn received(&self) -> Vec<String> {
        self.state().received
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for FakeProjector {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<FakeState>>) -> std::io::Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let password = {
        let mut state = state.lock().unwrap();
        state.connections += 1;
        state.password.clone()
    };
    let greeting = match &password {
        Some(_) => format!("PJLINK 1 {}\r", SEED),
        None => "PJLINK 0\r".to_string(),
    };
    writer.write_all(greeting.as_bytes()).await?;

    let mut authenticated = password.is_none();
    loop {
        let mut buf = Vec::new();
        if reader.read_until(b'\r', &mut buf).await? == 0 {
            return Ok(());
        }
        let mut line = String::from_utf8_lossy(&buf).trim_end_matches('\r').to_string();

        if !authenticated {
            let expected = format!(
                "{:x}",
                md5::compute(format!("{}{}", SEED, password.as_deref().unwrap_or_default()))
            );
            if line.len() < 32 || line[..32] != expected {
                writer.write_all(b"PJLINK ERRA\r").await?;
                return Ok(());
            }
            line = line[32..].to_string();
            authenticated = true;
        }

        let (reply, delay) = {
            let mut state = state.lock().unwrap();
            state.received.push(line.clone());
            let reply = if state.silent {
                None
            } else {
                Some(respond(&mut state, &line))
            };
            (reply, state.reply_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(reply) = reply {
            writer.write_all(reply.as_bytes()).await?;
        }
    }
}

fn respond(state: &mut FakeState, line: &str) -> String {
    if line.len() < 7 || !line.starts_with('%') {
        return "%1POWR=ERR1\r".to_string();
    }
    let class = &line[1..2];
    let command = &line[2..6];
    let parameter = line[6..].trim();
    let query = parameter == "?";

    let value = match (command, query) {
        ("POWR", true) => state.power.to_string(),
        ("POWR", false) => match parameter {
            "1" => {
                state.power = if state.warm_up { '3' } else { '1' };
                "OK".to_string()
            }
            "0" => {
                state.power = '0';
                "OK".to_string()
            }
            _ => "ERR2".to_string(),
        },
        ("INPT", _) if state.power != '1' => "ERR3".to_string(),
        ("INPT", true) => state.input.clone(),
        ("INPT", false) => {
            if state.inputs.iter().any(|i| i == parameter) {
                state.input = parameter.to_string();
                "OK".to_string()
            } else {
                "ERR2".to_string()
            }
        }
        ("AVMT", true) => state.av_mute.clone(),
        ("AVMT", false) => {
            state.av_mute = parameter.to_string();
            "OK".to_string()
        }
        ("ERST", true) => state.errors.clone(),
        ("LAMP", true) => state.lamps.clone(),
        ("INST", true) => state.inputs.join(" "),
        ("NAME", true) => state.name.clone(),
        ("INF1", true) => state.manufacturer.clone(),
        ("INF2", true) => state.product.clone(),
        ("INFO", true) => format!("{} {}", state.manufacturer, state.product),
        ("CLSS", true) => state.class.to_string(),
        ("ERST" | "LAMP" | "INST" | "NAME" | "INF1" | "INF2" | "INFO" | "CLSS", false) => {
            "ERR2".to_string()
        }
        _ => "ERR1".to_string(),
    };

    format!("%{}{}={}\r", class, command, value)
}

/// Short timeouts so failing paths finish quickly.
pub fn fast_options() -> pjlink_ctl::ClientOptions {
    pjlink_ctl::ClientOptions {
        connect_timeout: Duration::from_millis(500),
        command_timeout: Duration::from_millis(500),
        power_on_timeout: Duration::from_millis(500),
        reconnect_interval: Duration::from_millis(50),
        ..Default::default()
    }
}
