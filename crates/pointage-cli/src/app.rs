//! Terminal screens.
//!
//! Every protected screen goes through [`route`] before printing anything;
//! without a session the operator is sent to login instead.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use pointage_core::scan::STATUS_SUBMITTING;
use pointage_core::{
    route, BannerKind, CameraManager, CameraSource, ClientConfig, ClockingClient, PointageError,
    PointageType, ScanEvent, ScanPhase, ScanRecord, ScanSession, ScanSettings, Screen, StateStore,
    Submitter, TextDecoder,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::wedge::WedgeScanner;

const LOGIN_HINT: &str = "Not logged in. Run `pointage login <email>` first.";

/// Resolve `requested`; prints the login hint and returns `false` when the
/// operator has to log in first.
fn guard(store: &StateStore, requested: Screen) -> bool {
    if route(store, requested) == Screen::Login {
        println!("{LOGIN_HINT}");
        return false;
    }
    true
}

/// `pointage login`.
pub async fn login(
    config: &ClientConfig,
    store: &mut StateStore,
    email: &str,
    password: Option<String>,
) -> anyhow::Result<()> {
    if route(store, Screen::Login) == Screen::Dashboard {
        println!("Already logged in.");
        status(config, store);
        return Ok(());
    }

    let password = match password {
        Some(password) => password,
        None => prompt("Password: ").await?,
    };

    let client = ClockingClient::new(&config.api).map_err(PointageError::from)?;
    let session = client
        .login(email, &password)
        .await
        .map_err(PointageError::from)?;
    let pointage_type = session.pointage_type;
    store.set_session(session).map_err(PointageError::from)?;

    println!("Logged in. Pointage type: {}", type_label(pointage_type));
    Ok(())
}

/// `pointage logout`.
pub fn logout(store: &mut StateStore) {
    pointage_core::logout(store);
    println!("Logged out.");
}

/// `pointage status`: the dashboard.
pub fn status(config: &ClientConfig, store: &mut StateStore) {
    if !guard(store, Screen::Dashboard) {
        return;
    }
    print!("{}", render_dashboard(store, config.display.timezone, Utc::now()));
}

/// `pointage select-type`.
pub fn select_type(store: &mut StateStore, pointage_type: PointageType) -> anyhow::Result<()> {
    if !guard(store, Screen::Dashboard) {
        return Ok(());
    }
    store
        .set_pointage_type(pointage_type)
        .map_err(PointageError::from)?;
    println!("Pointage type set to {}.", type_label(pointage_type));
    Ok(())
}

/// `pointage history`.
pub fn history(config: &ClientConfig, store: &StateStore) {
    if !guard(store, Screen::History) {
        return;
    }
    print!("{}", render_history(store.history(), config.display.timezone));
}

/// `pointage scan`: the interactive scan screen.
pub async fn scan(
    config: &ClientConfig,
    store: &mut StateStore,
    auto_submit: bool,
) -> anyhow::Result<()> {
    if !guard(store, Screen::Scan) {
        return Ok(());
    }

    let client = ClockingClient::new(&config.api).map_err(PointageError::from)?;
    let scanner = WedgeScanner::new();
    let camera = CameraManager::new(scanner.clone())
        .with_preferred(config.scan.preferred_device.clone());
    let mut settings = ScanSettings::from(config);
    settings.auto_submit |= auto_submit;

    let mut screen = ScanSession::open(store, camera, Arc::new(TextDecoder), client, settings)?;
    info!(attempt = %screen.attempt().id, "scan screen opened");

    let exit = run_scan_screen(&mut screen, &scanner).await?;
    drop(screen);

    leave_scan(exit, config, store);
    Ok(())
}

/// How the scan screen was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanExit {
    Quit,
    Dashboard,
    Logout,
}

/// Runs after the scan screen has released the camera.
fn leave_scan(exit: ScanExit, config: &ClientConfig, store: &mut StateStore) {
    match exit {
        ScanExit::Quit => {}
        ScanExit::Dashboard => status(config, store),
        ScanExit::Logout => logout(store),
    }
}

/// Event loop of the scan screen.
async fn run_scan_screen<C: CameraSource, S: Submitter>(
    screen: &mut ScanSession<'_, C, S>,
    scanner: &WedgeScanner,
) -> anyhow::Result<ScanExit> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shown = render_scan(screen);
    println!("{shown}");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read terminal input")? else {
                    return Ok(ScanExit::Quit);
                };
                match parse_input(&line, screen.phase()) {
                    Input::Empty => {}
                    Input::Code(code) => {
                        if !scanner.feed_line(&code) {
                            println!("Scanner is not active.");
                        }
                    }
                    Input::Unknown(word) => {
                        println!("Unknown command '{word}'. {}", commands_help(screen.phase()));
                    }
                    Input::Command(ScanCommand::Quit) => return Ok(ScanExit::Quit),
                    Input::Command(ScanCommand::Logout) => return Ok(ScanExit::Logout),
                    Input::Command(ScanCommand::Switch) => match screen.switch_camera().await {
                        Ok(Some(device)) => println!("Using {}.", device.label),
                        Ok(None) => println!("No other camera available."),
                        Err(e) => println!("{e}"),
                    },
                    Input::Command(ScanCommand::Force) => match screen.force_decode().await {
                        Ok(true) => {}
                        Ok(false) => println!("No code visible."),
                        Err(e) => println!("{e}"),
                    },
                    Input::Command(command) => {
                        if let Some(event) = command.event() {
                            if announces_submission(&event, screen.phase()) {
                                println!("{STATUS_SUBMITTING}");
                            }
                            if let Err(e) = screen.dispatch(event).await {
                                println!("{e}");
                            }
                        }
                    }
                }
            }
            Some(event) = screen.next_decode_event() => {
                if let Err(e) = screen.handle_decode_event(event).await {
                    warn!(error = %e, "decode event rejected");
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(ScanExit::Quit),
        }

        if screen.take_navigation() == Some(Screen::Dashboard) {
            return Ok(ScanExit::Dashboard);
        }

        let current = render_scan(screen);
        if current != shown {
            println!("{current}");
            shown = current;
        }
    }
}

/// Operator commands on the scan screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanCommand {
    Start,
    Continue,
    Send,
    Retry,
    Restart,
    Back,
    Cancel,
    Switch,
    Force,
    Logout,
    Quit,
}

impl ScanCommand {
    fn parse(word: &str) -> Option<Self> {
        Some(match word.trim().to_lowercase().as_str() {
            "start" | "s" => Self::Start,
            "continue" | "c" => Self::Continue,
            "send" | "v" => Self::Send,
            "retry" | "t" => Self::Retry,
            "restart" | "r" => Self::Restart,
            "back" | "b" => Self::Back,
            "cancel" | "x" => Self::Cancel,
            "switch" | "w" => Self::Switch,
            "force" | "f" => Self::Force,
            "logout" | "l" => Self::Logout,
            "quit" | "q" => Self::Quit,
            _ => return None,
        })
    }

    fn event(self) -> Option<ScanEvent> {
        Some(match self {
            Self::Start => ScanEvent::Start,
            Self::Continue => ScanEvent::Continue,
            Self::Send => ScanEvent::Submit,
            Self::Retry => ScanEvent::Retry,
            Self::Restart => ScanEvent::Restart,
            Self::Back => ScanEvent::Abandon,
            Self::Cancel => ScanEvent::Cancel,
            Self::Switch | Self::Force | Self::Logout | Self::Quit => return None,
        })
    }
}

/// The submitting line is only printed when the machine will accept the send.
fn announces_submission(event: &ScanEvent, phase: ScanPhase) -> bool {
    *event == ScanEvent::Submit && phase == ScanPhase::DriverLocked
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    Code(String),
    Command(ScanCommand),
    Unknown(String),
}

/// While scanning every line is scanner input unless it starts with `:`.
fn parse_input(line: &str, phase: ScanPhase) -> Input {
    if phase.awaiting().is_some() {
        return match line.strip_prefix(':') {
            Some(word) => ScanCommand::parse(word)
                .map_or_else(|| Input::Unknown(word.trim().to_string()), Input::Command),
            None => Input::Code(line.to_string()),
        };
    }

    let word = line.trim().trim_start_matches(':');
    if word.is_empty() {
        return Input::Empty;
    }
    ScanCommand::parse(word).map_or_else(|| Input::Unknown(word.to_string()), Input::Command)
}

fn commands_help(phase: ScanPhase) -> &'static str {
    match phase {
        ScanPhase::Idle => "Commands: start (s), logout (l), quit (q)",
        ScanPhase::AwaitingBus | ScanPhase::AwaitingDriver => {
            "Scan a code, or :cancel, :switch, :force, :logout, :quit"
        }
        ScanPhase::BusLocked => "Commands: continue (c), logout (l), quit (q)",
        ScanPhase::DriverLocked => "Commands: send (v), logout (l), quit (q)",
        ScanPhase::Submitting => "Please wait...",
        ScanPhase::Succeeded | ScanPhase::Failed => {
            "Commands: restart (r), back (b), logout (l), quit (q)"
        }
        ScanPhase::CameraUnavailable { .. } => {
            "Commands: retry (t), back (b), logout (l), quit (q)"
        }
    }
}

fn render_scan<C: CameraSource, S: Submitter>(screen: &ScanSession<'_, C, S>) -> String {
    let attempt = screen.attempt();
    let mut out = String::new();
    let _ = writeln!(out, "[{}] {}", attempt.phase, attempt.status);

    let names = attempt.result.as_ref();
    let bus = names
        .and_then(|r| r.resolved_bus_name.as_deref())
        .or(attempt.bus_code.as_deref())
        .unwrap_or("-");
    let driver = names
        .and_then(|r| r.resolved_driver_name.as_deref())
        .or(attempt.driver_code.as_deref())
        .unwrap_or("-");
    let _ = writeln!(out, "  bus: {bus}   driver: {driver}");

    if let Some(device) = screen.current_device() {
        let _ = writeln!(out, "  camera: {}", device.label);
    }
    let _ = write!(out, "  {}", commands_help(attempt.phase));
    out
}

/// Dashboard text. Clears the banner once it has expired.
fn render_dashboard(store: &mut StateStore, tz: Tz, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    if let Some(session) = store.session() {
        let _ = writeln!(out, "Pointage type: {}", type_label(session.pointage_type));
    }
    match store.active_banner(now) {
        Ok(Some(banner)) => {
            let tag = match banner.kind {
                BannerKind::Success => "OK",
                BannerKind::Error => "ERROR",
            };
            let _ = writeln!(out, "[{tag}] {}", banner.text);
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "failed to clear expired banner"),
    }
    out.push_str(&render_history(store.history(), tz));
    out
}

fn render_history(history: &[ScanRecord], tz: Tz) -> String {
    if history.is_empty() {
        return "No recent clockings.\n".to_string();
    }
    let mut out = String::from("Recent clockings:\n");
    for record in history {
        let _ = writeln!(
            out,
            "  {}  bus {}  driver {}  ({})",
            record.recorded_at.with_timezone(&tz).format("%Y-%m-%d %H:%M"),
            record.bus_code,
            record.driver_code,
            type_label(record.pointage_type),
        );
    }
    out
}

fn type_label(pointage_type: PointageType) -> String {
    match pointage_type {
        PointageType::Entry => "entry".to_string(),
        PointageType::Exit => "exit".to_string(),
        PointageType::Category(n) => format!("category {n}"),
    }
}

async fn prompt(label: &str) -> anyhow::Result<String> {
    use tokio::io::AsyncWriteExt;

    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;

    let line = BufReader::new(tokio::io::stdin())
        .lines()
        .next_line()
        .await?
        .context("no password given")?;
    Ok(line.trim_end().to_string())
}
