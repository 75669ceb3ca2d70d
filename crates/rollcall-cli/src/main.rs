use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_engine::{
    load_models, run_enroll, spawn_recognition, Config, EnrollAction, EnrollOutcome, EnrollSession,
    FrameObservation, RecognitionSession, RecognitionSettings, Roster,
};
use rollcall_hw::Camera;
use rollcall_store::export::{export_all, export_daily, summarize};
use rollcall_store::{ExportOutcome, RecordStore};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance tracker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new student from the camera
    Enroll {
        /// Student's full name
        #[arg(short, long)]
        name: String,
        /// Unique enrollment number
        #[arg(short, long)]
        enrollment: String,
        /// Capture this many samples automatically instead of prompting
        #[arg(long, value_name = "N")]
        auto: Option<usize>,
        /// Minimum delay between automatic captures
        #[arg(long, default_value_t = 500, requires = "auto")]
        interval_ms: u64,
    },
    /// Take attendance until interrupted with Ctrl-C
    Recognize,
    /// List enrolled students
    Students {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show attendance totals
    Summary,
    /// Export attendance to a spreadsheet
    Export {
        /// Only records from this day (YYYY-MM-DD)
        #[arg(long, conflicts_with = "today")]
        date: Option<NaiveDate>,
        /// Only records from today
        #[arg(long)]
        today: bool,
        /// Output directory (defaults to the configured export dir)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Delete all attendance records, keeping students
    ClearAttendance {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Delete all students and attendance records
    ClearAll {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// List video capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    tracing::debug!(?config, "configuration resolved");

    match cli.command {
        Commands::Enroll {
            name,
            enrollment,
            auto,
            interval_ms,
        } => enroll(&config, &name, &enrollment, auto, Duration::from_millis(interval_ms))?,
        Commands::Recognize => recognize(&config).await?,
        Commands::Students { json } => students(&config, json)?,
        Commands::Summary => {
            let store = RecordStore::open(&config.db_path)?;
            match summarize(&store)? {
                Some(summary) => println!("{summary}"),
                None => println!("No attendance records yet"),
            }
        }
        Commands::Export {
            date,
            today,
            out_dir,
        } => {
            let store = RecordStore::open(&config.db_path)?;
            let dir = out_dir.unwrap_or_else(|| config.export_dir.clone());
            let date = if today { Some(Local::now().date_naive()) } else { date };
            let outcome = match date {
                Some(date) => export_daily(&store, date, &dir)?,
                None => export_all(&store, &dir, Local::now().naive_local())?,
            };
            match outcome {
                ExportOutcome::Written { path, rows } => {
                    println!("Exported {rows} records to {}", path.display())
                }
                ExportOutcome::Empty => println!("No attendance records to export"),
            }
        }
        Commands::ClearAttendance { yes } => {
            let mut roster = Roster::open(&config.db_path)?;
            let count = roster.count_attendance()?;
            if count == 0 {
                println!("No attendance records to delete");
            } else if yes || confirm(&format!("Delete {count} attendance records?"))? {
                let deleted = roster.delete_all_attendance()?;
                println!("Deleted {deleted} attendance records");
            } else {
                println!("Aborted");
            }
        }
        Commands::ClearAll { yes } => {
            let mut roster = Roster::open(&config.db_path)?;
            let students = roster.count_students()?;
            let records = roster.count_attendance()?;
            if students == 0 && records == 0 {
                println!("Database is already empty");
            } else if yes
                || confirm(&format!(
                    "Delete {students} students and {records} attendance records?"
                ))?
            {
                let deleted = roster.delete_all()?;
                println!(
                    "Deleted {} students and {} attendance records",
                    deleted.students, deleted.attendance
                );
            } else {
                println!("Aborted");
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

fn enroll(
    config: &Config,
    name: &str,
    enrollment: &str,
    auto: Option<usize>,
    interval: Duration,
) -> Result<()> {
    let mut roster = Roster::open(&config.db_path)?;
    // Validate before touching the camera.
    let session = EnrollSession::begin(&roster, name, enrollment)?;
    let (mut detector, mut embedder) = load_models(config)?;
    let camera = Camera::open(&config.camera_device)?;

    let outcome = match auto {
        Some(target) => {
            if target == 0 {
                bail!("--auto needs at least one sample");
            }
            let mut last_capture: Option<Instant> = None;
            run_enroll(
                camera,
                session,
                &mut roster,
                &mut detector,
                &mut embedder,
                config.detection_confidence,
                |seen, session| {
                    if session.sample_count() >= target {
                        return EnrollAction::Finish;
                    }
                    let due = last_capture.map_or(true, |t| t.elapsed() >= interval);
                    if matches!(seen, FrameObservation::Face(_)) && due {
                        last_capture = Some(Instant::now());
                        println!("Captured sample {}/{target}", session.sample_count() + 1);
                        EnrollAction::Capture
                    } else {
                        EnrollAction::Continue
                    }
                },
            )?
        }
        None => {
            println!("Enter: capture   f: finish   q: cancel   any other key: refresh");
            let stdin = std::io::stdin();
            let mut lines = stdin.lock().lines();
            run_enroll(
                camera,
                session,
                &mut roster,
                &mut detector,
                &mut embedder,
                config.detection_confidence,
                |seen, session| {
                    let status = match seen {
                        FrameObservation::Face(face) => {
                            format!("face detected ({:.0}%)", face.confidence * 100.0)
                        }
                        FrameObservation::NoFace => "no face detected".to_string(),
                        FrameObservation::Skipped => "frame skipped".to_string(),
                    };
                    print!("[{} samples] {status} > ", session.sample_count());
                    let _ = std::io::stdout().flush();

                    match lines.next() {
                        None | Some(Err(_)) => EnrollAction::Cancel,
                        Some(Ok(line)) => match line.trim() {
                            "" => EnrollAction::Capture,
                            "f" if session.sample_count() == 0 => {
                                println!("Nothing captured yet; press Enter to capture a sample");
                                EnrollAction::Continue
                            }
                            "f" => EnrollAction::Finish,
                            "q" => EnrollAction::Cancel,
                            _ => EnrollAction::Continue,
                        },
                    }
                },
            )?
        }
    };

    match outcome {
        EnrollOutcome::Enrolled {
            name,
            enrollment_number,
            samples,
            ..
        } => println!("Enrolled {name} ({enrollment_number}) from {samples} samples"),
        EnrollOutcome::Cancelled => println!("Enrollment cancelled"),
    }
    Ok(())
}

async fn recognize(config: &Config) -> Result<()> {
    let roster = Roster::open(&config.db_path)?;
    if roster.cache().is_empty() {
        println!("No students enrolled; every face will be reported as unknown");
    }
    let (detector, embedder) = load_models(config)?;
    let camera = Camera::open(&config.camera_device)?;

    let session = RecognitionSession::new(
        detector,
        embedder,
        RecordStore::open(&config.db_path)?,
        roster.cache().clone(),
        RecognitionSettings::from_config(config),
    );
    let handle = spawn_recognition(session, camera)?;
    println!("Taking attendance; press Ctrl-C to stop");

    let interrupted = wait_for_stop(
        tokio::signal::ctrl_c(),
        || handle.stop(),
        || handle.is_finished(),
    )
    .await;
    let stats = handle.join()?;
    interrupted.context("failed to listen for Ctrl-C")?;
    println!(
        "Processed {} frames: {} marked, {} repeat sightings, {} unknown faces",
        stats.frames, stats.marked, stats.duplicates_suppressed, stats.unknown
    );
    Ok(())
}

/// Wait until `interrupt` resolves or the session finishes on its own.
///
/// `stop` is called whenever `interrupt` resolves, including when listening
/// for it failed, so the caller can always join the session afterwards.
async fn wait_for_stop<F>(
    interrupt: F,
    stop: impl Fn(),
    finished: impl Fn() -> bool,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    tokio::pin!(interrupt);
    let mut poll = tokio::time::interval(Duration::from_millis(200));
    loop {
        tokio::select! {
            res = &mut interrupt => {
                tracing::info!("interrupt received, stopping recognition");
                stop();
                return res;
            }
            _ = poll.tick() => {
                if finished() {
                    return Ok(());
                }
            }
        }
    }
}

fn students(config: &Config, json: bool) -> Result<()> {
    let store = RecordStore::open(&config.db_path)?;
    let students = store.list_students()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&students)?);
        return Ok(());
    }
    if students.is_empty() {
        println!("No students enrolled");
        return Ok(());
    }
    println!("{:<6} {:<25} {:<20} {}", "ID", "Name", "Enrollment", "Registered");
    for s in &students {
        println!(
            "{:<6} {:<25} {:<20} {}",
            s.id,
            s.name,
            s.enrollment_number,
            s.created_at.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
