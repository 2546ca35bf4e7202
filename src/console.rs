//! Line-oriented front desk: one command per line, one reply per command.
//!
//! The console keeps a single session token, so drafts, summaries and loaded
//! calendars carry over between commands exactly as they would for one
//! browser.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::session::{Session, SessionManager};
use crate::wire;

pub const HELP: &str = "commands:
  rooms
  search <start> <end>
  choose <room_id>
  book <room_id> <start> <end>
  submit <first_name> <last_name> <email> <phone>
  summary
  availability <start> <end> <room_id>
  reservations [all|new]
  process <reservation_id>
  remove <reservation_id>
  calendar [<year> <month>]
  save <year> <month> [add_block_<room>_<yyyy-mm-d> ...]
  logout
  quit
dates are dd-mm-yyyy";

#[derive(Debug)]
pub enum ConsoleError {
    Usage(&'static str),
    Engine(EngineError),
}

impl std::fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsoleError::Usage(usage) => write!(f, "usage: {usage}"),
            ConsoleError::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConsoleError {}

impl From<EngineError> for ConsoleError {
    fn from(e: EngineError) -> Self {
        ConsoleError::Engine(e)
    }
}

fn reservation_id(arg: Option<&str>, usage: &'static str) -> Result<ReservationId, ConsoleError> {
    arg.and_then(|s| s.parse::<Ulid>().ok())
        .ok_or(ConsoleError::Usage(usage))
}

fn room_id(arg: Option<&str>, usage: &'static str) -> Result<RoomId, ConsoleError> {
    arg.and_then(|s| s.parse::<RoomId>().ok())
        .ok_or(ConsoleError::Usage(usage))
}

fn date_range(
    start: Option<&str>,
    end: Option<&str>,
    usage: &'static str,
) -> Result<DateRange, ConsoleError> {
    match (start, end) {
        (Some(start), Some(end)) => Ok(DateRange::parse(start, end, DAY_MONTH_YEAR)?),
        _ => Err(ConsoleError::Usage(usage)),
    }
}

fn reservation_line(r: &Reservation) -> String {
    let status = match r.status {
        ReservationStatus::New => "new",
        ReservationStatus::Processed => "processed",
    };
    format!(
        "{}\troom {}\t{}\t{} {}\t{}",
        r.id, r.room_id, r.range, r.guest.first_name, r.guest.last_name, status
    )
}

pub struct Console {
    engine: Arc<Engine>,
    sessions: Arc<SessionManager>,
    token: Option<String>,
}

impl Console {
    pub fn new(engine: Arc<Engine>, sessions: Arc<SessionManager>) -> Self {
        Self {
            engine,
            sessions,
            token: None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Resume the console's session, or start a new one if it expired.
    fn session(&mut self) -> Arc<Session> {
        let session = self.sessions.load(self.token.as_deref());
        self.token = Some(session.token().to_string());
        session
    }

    /// Run one command line and return its reply.
    pub async fn execute(&mut self, line: &str) -> Result<String, ConsoleError> {
        let mut args = line.split_whitespace();
        let Some(command) = args.next() else {
            return Ok(String::new());
        };
        debug!(command, "console command");
        let engine = self.engine.clone();

        match command {
            "help" => Ok(HELP.to_string()),
            "rooms" => Ok(engine
                .rooms()
                .await?
                .iter()
                .map(|room| format!("{}\t{}", room.id, room.name))
                .collect::<Vec<_>>()
                .join("\n")),
            "search" => {
                let range = date_range(args.next(), args.next(), "search <start> <end>")?;
                let session = self.session();
                let rooms = engine.start_search(session.as_ref(), range).await?;
                if rooms.is_empty() {
                    return Ok(format!("no availability for {range}"));
                }
                Ok(rooms
                    .iter()
                    .map(|room| format!("{}\t{}", room.id, room.name))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            "choose" => {
                let room_id = room_id(args.next(), "choose <room_id>")?;
                let session = self.session();
                let draft = engine.choose_room(session.as_ref(), room_id).await?;
                Ok(format!("room {room_id} held in draft for {}", draft.range))
            }
            "book" => {
                const USAGE: &str = "book <room_id> <start> <end>";
                let room_id = room_id(args.next(), USAGE)?;
                let range = date_range(args.next(), args.next(), USAGE)?;
                let session = self.session();
                engine.book_room(session.as_ref(), room_id, range).await?;
                Ok(format!("room {room_id} held in draft for {range}"))
            }
            "submit" => {
                let (Some(first_name), Some(last_name), Some(email), Some(phone)) =
                    (args.next(), args.next(), args.next(), args.next())
                else {
                    return Err(ConsoleError::Usage(
                        "submit <first_name> <last_name> <email> <phone>",
                    ));
                };
                let guest = GuestDetails {
                    first_name: first_name.into(),
                    last_name: last_name.into(),
                    email: email.into(),
                    phone: phone.into(),
                };
                let session = self.session();
                let summary = engine.submit(session.as_ref(), guest).await?;
                Ok(format!(
                    "reservation {} confirmed: {} {}",
                    summary.reservation.id, summary.room.name, summary.reservation.range
                ))
            }
            "summary" => {
                let session = self.session();
                let summary = engine.take_summary(session.as_ref())?;
                Ok(format!(
                    "{}\n{} {}\t{}\t{}",
                    reservation_line(&summary.reservation),
                    summary.room.name,
                    summary.reservation.range,
                    summary.reservation.guest.email,
                    summary.reservation.guest.phone
                ))
            }
            "availability" => {
                let (Some(start), Some(end), Some(room)) = (args.next(), args.next(), args.next())
                else {
                    return Err(ConsoleError::Usage("availability <start> <end> <room_id>"));
                };
                let form = vec![
                    ("start".to_string(), start.to_string()),
                    ("end".to_string(), end.to_string()),
                    ("room_id".to_string(), room.to_string()),
                ];
                let response = wire::availability_json(&engine, &form).await;
                response
                    .to_json()
                    .map_err(|e| ConsoleError::Engine(EngineError::PersistFailure(e.to_string())))
            }
            "reservations" => {
                let filter = match args.next() {
                    None | Some("all") => ReservationFilter::All,
                    Some("new") => ReservationFilter::New,
                    Some(_) => return Err(ConsoleError::Usage("reservations [all|new]")),
                };
                let found = engine.reservations(filter).await?;
                if found.is_empty() {
                    return Ok("no reservations".into());
                }
                Ok(found.iter().map(reservation_line).collect::<Vec<_>>().join("\n"))
            }
            "process" => {
                let id = reservation_id(args.next(), "process <reservation_id>")?;
                if engine.process(id).await? {
                    Ok(format!("reservation {id} processed"))
                } else {
                    Ok(format!("reservation {id} was already processed"))
                }
            }
            "remove" => {
                let id = reservation_id(args.next(), "remove <reservation_id>")?;
                engine.remove(id).await?;
                Ok(format!("reservation {id} removed"))
            }
            "calendar" => {
                let (year, month) = match (args.next(), args.next()) {
                    (None, None) => crate::engine::current_month(),
                    (Some(year), Some(month)) => match (year.parse::<i32>(), month.parse::<u32>()) {
                        (Ok(year), Ok(month)) => (year, month),
                        _ => return Err(ConsoleError::Usage("calendar [<year> <month>]")),
                    },
                    _ => return Err(ConsoleError::Usage("calendar [<year> <month>]")),
                };
                let session = self.session();
                let rooms = engine.rooms().await?;
                let snapshots = engine.load_calendar(session.as_ref(), year, month).await?;
                Ok(rooms
                    .iter()
                    .zip(&snapshots)
                    .map(|(room, snapshot)| wire::render_snapshot(room, snapshot))
                    .collect::<String>())
            }
            "save" => {
                let (Some(year), Some(month)) = (args.next(), args.next()) else {
                    return Err(ConsoleError::Usage("save <year> <month> [block keys]"));
                };
                let mut form = vec![
                    ("year".to_string(), year.to_string()),
                    ("month".to_string(), month.to_string()),
                ];
                form.extend(args.map(|key| (key.to_string(), "1".to_string())));
                let submission = wire::parse_calendar_form(&form)?;
                let session = self.session();
                let reports = engine.reconcile_month(session.as_ref(), &submission).await?;
                let mut out = Vec::new();
                for report in &reports {
                    out.push(format!(
                        "room {}: {} blocked, {} unblocked, {} refused",
                        report.room_id,
                        report.added.len(),
                        report.removed.len(),
                        report.failures.len()
                    ));
                    for (day, e) in &report.failures {
                        out.push(format!("  {day}: {e}"));
                    }
                }
                Ok(out.join("\n"))
            }
            "logout" => {
                self.token = None;
                Ok("session closed".into())
            }
            _ => Err(ConsoleError::Usage("unknown command, try `help`")),
        }
    }

    /// Read commands until `quit`, end of input, or `shutdown` resolves.
    pub async fn run<R, W>(
        &mut self,
        input: R,
        mut output: W,
        shutdown: impl Future<Output = ()>,
    ) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        tokio::pin!(shutdown);
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                () = &mut shutdown => {
                    info!("shutdown signal received, closing console");
                    break;
                }
            };
            let Some(line) = line else {
                debug!("console input closed");
                break;
            };
            if line.trim() == "quit" {
                break;
            }
            let reply = match self.execute(&line).await {
                Ok(reply) => reply,
                Err(e) => format!("error: {e}"),
            };
            if !reply.is_empty() {
                output.write_all(reply.as_bytes()).await?;
                if !reply.ends_with('\n') {
                    output.write_all(b"\n").await?;
                }
                output.flush().await?;
            }
        }
        Ok(())
    }
}
