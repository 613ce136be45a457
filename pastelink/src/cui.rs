use std::{
    io::{self, BufRead, Write},
    thread,
};

use anyhow::{bail, Result};
use pastelink_lib::{
    connection::StatusSubscription, rtc::RtcTransportFactory, signaling,
    transport::SdpType, Connection, ConnectionError, MessagePayload, SessionDescription, State,
};
use tokio::{select, sync::mpsc};
use tracing::{debug, info};

use crate::settings::Settings;

const QUIT: &str = "/quit";

/// Stdin lines, read on a dedicated thread so that a pending read never
/// swallows input meant for the next prompt.
struct Console {
    lines: mpsc::UnboundedReceiver<String>,
}

impl Console {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line.trim().to_owned()).is_err() {
                    break;
                }
            }
        });
        Self { lines: rx }
    }

    /// `None` once stdin is closed.
    async fn read_line(&mut self) -> Option<String> {
        io::stdout().flush().ok()?;
        self.lines.recv().await
    }

    async fn read_line_loop(&mut self, msg: &str) -> Option<String> {
        loop {
            println!("{}", msg);
            let buf = self.read_line().await?;
            if !buf.is_empty() {
                return Some(buf);
            }
        }
    }

    async fn read_code(&mut self, msg: &str, expected: SdpType) -> Option<SessionDescription> {
        loop {
            let code = self.read_line_loop(msg).await?;
            match signaling::decode(&code) {
                Ok(desc) if desc.sdp_type == expected => return Some(desc),
                Ok(desc) => {
                    println!("That is an {} code, not an {} code.", desc.sdp_type, expected)
                }
                Err(err) => println!("Invalid signaling code: {:#}", err),
            }
        }
    }
}

fn print_code(desc: &SessionDescription, msg: &str) -> Result<()> {
    println!();
    println!("Your signaling code:");
    println!();
    println!("{}", signaling::encode(desc)?);
    println!();
    println!("{}", msg);
    Ok(())
}

fn print_failure(err: &ConnectionError) {
    println!("Connection failed: {}", err);
    for (key, value) in err.context() {
        println!("  {}: {}", key, value);
    }
    for warning in err.warnings() {
        println!("  warning while {:?}: {}", warning.state, warning.message);
    }
}

fn print_error(err: &anyhow::Error) {
    match err.downcast_ref::<ConnectionError>() {
        Some(err) => print_failure(err),
        None => println!("{:#}", err),
    }
}

async fn wait_for_connected(mut status: StatusSubscription) -> Result<()> {
    loop {
        match status.next().await {
            Some(Ok(State::Connected)) => return Ok(()),
            Some(Ok(state)) => debug!("waiting for connection, now {:?}", state),
            Some(Err(err)) => return Err(err.into()),
            None => bail!("connection closed"),
        }
    }
}

/// `Ok(false)` if stdin was closed before the connection was established.
async fn connect_as_host(conn: &Connection, console: &mut Console) -> Result<bool> {
    let status = conn.status();
    let offer = conn.create_offer().await?;
    print_code(&offer, "Share your signaling code with your guest.")?;
    let Some(answer) = console
        .read_code("Input guest's signaling code:", SdpType::Answer)
        .await
    else {
        return Ok(false);
    };
    conn.accept_sdp(answer).await;
    println!("Waiting for guest to connect...");
    wait_for_connected(status).await?;
    Ok(true)
}

async fn connect_as_guest(conn: &Connection, console: &mut Console) -> Result<bool> {
    let status = conn.status();
    println!();
    let Some(offer) = console
        .read_code("Input host's signaling code:", SdpType::Offer)
        .await
    else {
        return Ok(false);
    };
    conn.accept_sdp(offer).await;
    let answer = conn.create_answer().await?;
    print_code(&answer, "Share your signaling code with your host.")?;
    println!("Waiting for host to connect...");
    wait_for_connected(status).await?;
    Ok(true)
}

fn print_message(message: MessagePayload) {
    match message {
        MessagePayload::Text(text) => println!("> {}", text),
        other => println!("> ({} bytes of binary data)", other.size()),
    }
}

async fn print_end(status: &mut StatusSubscription) {
    while let Some(state) = status.next().await {
        if let Err(err) = state {
            print_failure(&err);
            return;
        }
    }
    println!("Disconnected.");
}

/// `false` if stdin was closed.
async fn chat(conn: &Connection, console: &mut Console) -> bool {
    println!();
    println!("Connected. Type a message and press Enter, {} to leave.", QUIT);
    let mut status = conn.status();
    let mut messages = conn.message();
    loop {
        select! {
            line = console.read_line() => {
                let Some(line) = line else {
                    conn.close();
                    return false;
                };
                if line == QUIT {
                    conn.close();
                    return true;
                }
                if line.is_empty() {
                    continue;
                }
                if let Err(err) = conn.send(line) {
                    print_failure(&err);
                }
            }
            message = messages.recv() => {
                let Some(message) = message else {
                    print_end(&mut status).await;
                    return true;
                };
                print_message(message);
            }
            state = status.next() => match state {
                Some(Ok(state)) => debug!("state {:?}", state),
                Some(Err(err)) => {
                    print_failure(&err);
                    return true;
                }
                None => {
                    println!("Disconnected.");
                    return true;
                }
            }
        }
    }
}

pub async fn main_menu(settings: &Settings) -> Result<()> {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    let mut console = Console::new();
    let factory = RtcTransportFactory::default();
    loop {
        println!();
        println!("1) Connect as Host");
        println!("2) Connect as Guest");
        println!();
        println!("0) Exit");
        println!();

        let select = loop {
            print!("Select (0-2): ");
            let Some(buf) = console.read_line().await else {
                return Ok(());
            };
            let Ok(select) = buf.parse::<u8>() else {
                continue;
            };
            if !(0..=2).contains(&select) {
                continue;
            }
            break select;
        };

        if select == 0 {
            break;
        }

        let conn = Connection::new(settings.ice_servers.clone(), &factory).await;
        let result = if select == 1 {
            connect_as_host(&conn, &mut console).await
        } else {
            connect_as_guest(&conn, &mut console).await
        };
        let stdin_open = match result {
            Ok(true) => {
                info!("connected as {}", if select == 1 { "host" } else { "guest" });
                chat(&conn, &mut console).await
            }
            Ok(false) => false,
            Err(err) => {
                print_error(&err);
                true
            }
        };
        if !stdin_open {
            break;
        }
    }
    Ok(())
}
