use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use facegate_core::{EuclideanMatcher, FaceDetector, FaceRecognizer, FaceRecord, Matcher};
use rusqlite::Connection;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate local administration CLI")]
struct Cli {
    /// Path to the SQLite database file (defaults to $FACEGATE_DB_PATH).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Directory containing the ONNX model files (defaults to $FACEGATE_MODEL_DIR).
    #[arg(long)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces in an image file and print them as JSON
    Scan {
        /// Image file to analyze
        image: PathBuf,
    },
    /// Register the face in an image file for an event
    Register {
        /// Event id to register under
        #[arg(long)]
        event: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        school: String,
        #[arg(long)]
        email: String,
        /// Image file containing the face
        image: PathBuf,
    },
    /// List face registrations for an event
    List {
        /// Event id
        #[arg(long)]
        event: String,
    },
    /// List events
    Events,
    /// Remove a face registration by id
    Remove {
        /// Face id to remove
        id: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    let model_dir = cli.model_dir.clone().unwrap_or_else(|| {
        std::env::var("FACEGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facegate_core::default_model_dir())
    });
    let threshold = std::env::var("FACEGATE_DISTANCE_THRESHOLD")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.6f32);

    match cli.command {
        Commands::Scan { image } => {
            let faces = analyze(&model_dir, &image)?;
            let summary: Vec<serde_json::Value> = faces
                .iter()
                .map(|(bbox, embedding)| {
                    serde_json::json!({
                        "box": bbox,
                        "embeddingDim": embedding.values.len(),
                        "modelVersion": embedding.model_version,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Register {
            event,
            name,
            school,
            email,
            image,
        } => {
            let conn = open_db(&db_path)?;
            if !facegate_store::event_exists(&conn, &event)? {
                bail!("unknown event: {event}");
            }

            // One registration = one face: the highest-confidence detection.
            let (_, embedding) = analyze(&model_dir, &image)?
                .into_iter()
                .max_by(|(a, _), (b, _)| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .with_context(|| format!("no face detected in {}", image.display()))?;

            let gallery = facegate_store::gallery_for_event(&conn, &event)?;
            if !EuclideanMatcher
                .matches(&embedding, &gallery, threshold)
                .is_empty()
            {
                bail!("a similar face is already registered for event {event}");
            }
            if facegate_store::email_registered(&conn, &event, &email)? {
                bail!("email {email} is already registered for event {event}");
            }

            let record = FaceRecord {
                id: Uuid::new_v4().to_string(),
                event_id: event,
                name,
                school,
                email,
                embedding,
                created_at: Utc::now().to_rfc3339(),
            };
            facegate_store::insert_face(&conn, &record)?;
            println!("registered face {}", record.id);
        }
        Commands::List { event } => {
            let conn = open_db(&db_path)?;
            let faces = facegate_store::faces_for_event(&conn, &event)?;
            println!("{}", serde_json::to_string_pretty(&faces)?);
        }
        Commands::Events => {
            let conn = open_db(&db_path)?;
            let events = facegate_store::list_events(&conn)?;
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        Commands::Remove { id } => {
            let conn = open_db(&db_path)?;
            if facegate_store::delete_face(&conn, &id)? {
                println!("removed face {id}");
            } else {
                bail!("no face with id {id}");
            }
        }
    }

    Ok(())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("FACEGATE_DB_PATH") {
        return PathBuf::from(path);
    }
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_dir.join("facegate").join("faces.db")
}

fn open_db(path: &PathBuf) -> Result<Connection> {
    let conn =
        Connection::open(path).with_context(|| format!("opening database {}", path.display()))?;
    facegate_store::init_schema(&conn)?;
    Ok(conn)
}

/// Run the detection and embedding pipeline over an image file.
fn analyze(
    model_dir: &std::path::Path,
    image_path: &std::path::Path,
) -> Result<Vec<(facegate_core::BoundingBox, facegate_core::Embedding)>> {
    let mut detector = FaceDetector::load(&model_dir.join("det_10g.onnx"))?;
    let mut recognizer = FaceRecognizer::load(&model_dir.join("w600k_r50.onnx"))?;

    let gray = image::open(image_path)
        .with_context(|| format!("opening image {}", image_path.display()))?
        .to_luma8();

    let boxes = detector.detect(&gray)?;
    let mut faces = Vec::with_capacity(boxes.len());
    for bbox in boxes {
        let embedding = recognizer.extract(&gray, &bbox)?;
        faces.push((bbox, embedding));
    }
    Ok(faces)
}
