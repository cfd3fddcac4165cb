//! Replay a recorded GPX track through a tracking session.
//!
//! ```text
//! cargo run --example replay_track -- [track.gpx] [marker_dir] [log.db]
//! ```
//!
//! Without a track the built-in PCT sample markers are walked end to end.
//! Mile changes are written to a SQLite-backed mile log and summarized.

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::info;
use trail_miles::markers::{parse_gpx_track, pct_sample_markers};
use trail_miles::mile_log::recorder;
use trail_miles::{
    ChannelProvider, FileMarkerSource, GpsPoint, MarkerSource, MileLog, Position, SqliteStore,
    TrackerConfig, TrackingSession,
};

const SECTION_ID: &str = "replay";

/// Points walked between consecutive sample markers.
const STEPS_PER_MILE: usize = 4;

fn sample_walk() -> Vec<GpsPoint> {
    let markers = pct_sample_markers();
    let mut points = Vec::new();
    for pair in markers.windows(2) {
        for step in 0..STEPS_PER_MILE {
            let t = step as f64 / STEPS_PER_MILE as f64;
            points.push(GpsPoint::new(
                pair[0].lat + (pair[1].lat - pair[0].lat) * t,
                pair[0].lng + (pair[1].lng - pair[0].lng) * t,
            ));
        }
    }
    if let Some(last) = markers.last() {
        points.push(GpsPoint::new(last.lat, last.lng));
    }
    points
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let track = match args.next() {
        Some(path) => parse_gpx_track(&tokio::fs::read_to_string(&path).await?)?,
        None => sample_walk(),
    };
    let source: Option<Arc<dyn MarkerSource>> = args
        .next()
        .map(|dir| Arc::new(FileMarkerSource::new(dir)) as Arc<dyn MarkerSource>);
    let db_path = args.next().unwrap_or_else(|| "replay_track.db".to_string());

    let log = Arc::new(Mutex::new(MileLog::open(Box::new(SqliteStore::new(
        &db_path,
    )?))?));
    let (provider, feed) = ChannelProvider::new();
    let session = TrackingSession::new(TrackerConfig::default(), Some(Arc::new(provider)), source);

    let markers = session.load_markers(&session.config().default_trail).await?;
    info!("Replaying {} points over {} markers", track.len(), markers.len());

    let producer = {
        let feed = feed.clone();
        tokio::spawn(async move {
            while feed.watcher_count() == 0 {
                tokio::task::yield_now().await;
            }
            for point in track {
                let position =
                    Position::new(point.latitude, point.longitude, Utc::now()).with_accuracy(5.0);
                feed.push(position);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    };

    session.start(recorder(Arc::clone(&log), SECTION_ID)).await?;
    producer.await?;
    // Let the session drain the last observations
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.stop();

    let log = log.lock().map_err(|e| e.to_string())?;
    let stats = log.statistics(Some(SECTION_ID));
    println!("{}", serde_json::to_string_pretty(&stats)?);
    for entry in log.recent_entries(5) {
        println!(
            "{}  mile {:>6.1}  (from {:?})",
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.mile,
            entry.previous_mile
        );
    }
    Ok(())
}
