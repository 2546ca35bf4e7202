use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use bookings::config::Config;
use bookings::console::Console;
use bookings::engine::Engine;
use bookings::model::{DAY_MONTH_YEAR, DateRange};
use bookings::session::{Session, SessionManager};
use bookings::store::{PersistenceStore, WalStore};
use bookings::{reaper, wire};

const USAGE: &str = "usage: bookings [serve | rooms | availability <start> <end> [room_id] | calendar <year> <month> | compact]
serve reads front-desk commands from stdin (`help` lists them)
dates are dd-mm-yyyy";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let config = Config::from_env();
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(WalStore::open(config.wal_path())?);
    seed_rooms(&store, &config.seed_rooms).await?;
    let engine = Arc::new(Engine::new(store.clone()));

    match args.first().map(String::as_str).unwrap_or("serve") {
        "serve" => serve(&config, store, engine).await?,
        "rooms" => {
            for room in engine.rooms().await? {
                println!("{}\t{}", room.id, room.name);
            }
        }
        "availability" => match args.as_slice() {
            [_, start, end, room_id] => {
                let form = vec![
                    ("start".to_string(), start.clone()),
                    ("end".to_string(), end.clone()),
                    ("room_id".to_string(), room_id.clone()),
                ];
                println!("{}", wire::availability_json(&engine, &form).await.to_json()?);
            }
            [_, start, end] => {
                let range = DateRange::parse(start, end, DAY_MONTH_YEAR)?;
                let rooms = engine.find_available_rooms(&range).await?;
                if rooms.is_empty() {
                    println!("no availability for {range}");
                }
                for room in rooms {
                    println!("{}\t{}", room.id, room.name);
                }
            }
            _ => return Err(USAGE.into()),
        },
        "calendar" => {
            let (year, month) = match args.as_slice() {
                [_, year, month] => (year.parse::<i32>()?, month.parse::<u32>()?),
                [_] => bookings::engine::current_month(),
                _ => return Err(USAGE.into()),
            };
            let session = Session::new(String::new(), i64::MAX);
            let rooms = engine.rooms().await?;
            let snapshots = engine.load_calendar(&session, year, month).await?;
            for (room, snapshot) in rooms.iter().zip(&snapshots) {
                print!("{}", wire::render_snapshot(room, snapshot));
            }
        }
        "compact" => {
            store.compact_wal().await?;
            info!("compaction done");
        }
        _ => return Err(USAGE.into()),
    }
    Ok(())
}

/// Create the configured rooms when the store has none yet.
async fn seed_rooms(store: &WalStore, names: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    if !store.rooms().await?.is_empty() {
        return Ok(());
    }
    for name in names {
        let id = store.insert_room(name.clone()).await?;
        info!("seeded room {id}: {name}");
    }
    Ok(())
}

/// Answer console commands on stdin, with maintenance tasks running, until
/// `quit`, end of input, or SIGTERM/ctrl-c.
async fn serve(
    config: &Config,
    store: Arc<WalStore>,
    engine: Arc<Engine>,
) -> Result<(), Box<dyn std::error::Error>> {
    bookings::observability::init(config.metrics_port)?;

    let sessions = Arc::new(SessionManager::new(config.session_lifetime));
    tokio::spawn(reaper::run_compactor(store.clone(), config.compact_threshold));
    tokio::spawn(reaper::run_session_sweeper(sessions.clone(), Duration::from_secs(60)));

    info!("bookings engine running");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  rooms: {}", store.room_count());
    info!("  session_lifetime: {}s", config.session_lifetime.as_secs());
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let mut console = Console::new(engine, sessions);
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let shutdown = async {
        if let Err(e) = shutdown_signal().await {
            error!("cannot listen for shutdown signals: {e}");
            std::future::pending::<()>().await;
        }
    };
    console.run(input, tokio::io::stdout(), shutdown).await?;

    // Leave a compact log behind so the next start replays quickly.
    reaper::compact_if_needed(&store, 1).await;
    info!("bookings stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => result?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    Ok(())
}
