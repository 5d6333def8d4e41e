use crate::engine::{EngineError, EngineHandle};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use facegate_core::{Embedding, EuclideanMatcher, FaceRecord, Matcher};
use facegate_store::{EventRecord, StoreError};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Shared state handed to every handler.
pub struct AppState {
    pub engine: EngineHandle,
    pub db: tokio_rusqlite::Connection,
    pub distance_threshold: f32,
}

impl AppState {
    /// Run a store operation on the database connection.
    async fn with_db<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        self.db
            .call(move |conn| f(conn).map_err(|e| tokio_rusqlite::Error::Other(Box::new(e))))
            .await
            .map_err(|e| match e {
                // Recover store errors that have a client-facing meaning.
                tokio_rusqlite::Error::Other(inner) => match inner.downcast::<StoreError>() {
                    Ok(store_err) => ApiError::from(*store_err),
                    Err(other) => ApiError::Internal(anyhow::anyhow!(other.to_string())),
                },
                other => ApiError::Internal(anyhow::Error::new(other)),
            })
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No image uploaded")]
    MissingImage,
    #[error("Missing form field: {0}")]
    MissingField(&'static str),
    #[error("Invalid multipart form data: {0}")]
    BadMultipart(String),
    #[error("Uploaded image is too large")]
    PayloadTooLarge,
    #[error("Could not decode image: {0}")]
    BadImage(String),
    #[error("No face detected in the image")]
    NoFaceDetected,
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
    #[error("This face is already registered for this event")]
    DuplicateFace,
    #[error("This email is already registered for this event")]
    DuplicateEmail,
    #[error("This face is not registered for the specific event")]
    NotRegistered,
    #[error("Face not found")]
    FaceNotFound,
    #[error("Please provide all required fields")]
    IncompleteEvent,
    #[error("Internal Server Error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingImage
            | ApiError::MissingField(_)
            | ApiError::BadMultipart(_)
            | ApiError::BadImage(_)
            | ApiError::NoFaceDetected
            | ApiError::DuplicateFace
            | ApiError::DuplicateEmail
            | ApiError::NotRegistered
            | ApiError::IncompleteEvent => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnknownEvent(_) | ApiError::FaceNotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(ref source) = self {
            tracing::error!(error = ?source, "request failed");
        }
        let body = Json(json!({ "message": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateRegistration => ApiError::DuplicateEmail,
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Decode(e) => ApiError::BadImage(e.to_string()),
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

/// Build the service router.
pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/post-face", post(post_face))
        .route("/compare-faces", post(compare_faces))
        .route("/events", post(create_event).get(list_events))
        .route("/events/{id}", get(show_event))
        .route("/events/{id}/faces", get(event_faces))
        .route("/faces/{id}", delete(remove_face))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Text fields plus the image bytes from a multipart upload.
#[derive(Default)]
struct UploadForm {
    fields: HashMap<String, String>,
    image: Option<Vec<u8>>,
}

/// Map a multipart read failure to its API error. A breached body limit
/// keeps its 413 status instead of collapsing into a generic 400.
fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::BadMultipart(err.to_string())
    }
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "image" {
                let bytes = field.bytes().await.map_err(multipart_error)?;
                if !bytes.is_empty() {
                    form.image = Some(bytes.to_vec());
                }
            } else if !name.is_empty() {
                let text = field.text().await.map_err(multipart_error)?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    fn required(&self, name: &'static str) -> Result<&str, ApiError> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ApiError::MissingField(name))
    }

    fn image(self) -> Result<Vec<u8>, ApiError> {
        self.image.ok_or(ApiError::MissingImage)
    }
}

/// `POST /post-face` — register the face in an uploaded image for an event.
async fn post_face(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = UploadForm::read(multipart).await?;

    let event_id = form.required("eventId")?.to_string();
    let name = form.required("name")?.to_string();
    let school = form.required("school")?.to_string();
    let email = form.required("email")?.to_string();
    let image = form.image()?;

    {
        let check_id = event_id.clone();
        if !state
            .with_db(move |conn| facegate_store::event_exists(conn, &check_id))
            .await?
        {
            return Err(ApiError::UnknownEvent(event_id));
        }
    }

    // One registration = one face: the highest-confidence detection.
    let face = state
        .engine
        .analyze(image)
        .await?
        .into_iter()
        .max_by(|a, b| {
            a.bbox
                .confidence
                .partial_cmp(&b.bbox.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .ok_or(ApiError::NoFaceDetected)?;

    // Dedup by distance against the event's gallery, then by email. The
    // email pre-check gives the friendly error in the common case; the
    // unique (event_id, email) index backstops concurrent registrations.
    let gallery = {
        let event_id = event_id.clone();
        state
            .with_db(move |conn| facegate_store::gallery_for_event(conn, &event_id))
            .await?
    };
    if !EuclideanMatcher
        .matches(&face.embedding, &gallery, state.distance_threshold)
        .is_empty()
    {
        return Err(ApiError::DuplicateFace);
    }
    {
        let (event_id, email) = (event_id.clone(), email.clone());
        if state
            .with_db(move |conn| facegate_store::email_registered(conn, &event_id, &email))
            .await?
        {
            return Err(ApiError::DuplicateEmail);
        }
    }

    let record = FaceRecord {
        id: Uuid::new_v4().to_string(),
        event_id: event_id.clone(),
        name,
        school,
        email,
        embedding: face.embedding,
        created_at: Utc::now().to_rfc3339(),
    };

    let face_id = record.id.clone();
    state
        .with_db(move |conn| facegate_store::insert_face(conn, &record))
        .await?;

    tracing::info!(event = %event_id, face = %face_id, "registered face");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Face added successfully",
            "faceId": face_id,
        })),
    )
        .into_response())
}

/// `POST /compare-faces` — verify an uploaded face against an event's gallery.
async fn compare_faces(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = UploadForm::read(multipart).await?;

    let event_id = form.required("eventId")?.to_string();
    let image = form.image()?;

    {
        let check_id = event_id.clone();
        if !state
            .with_db(move |conn| facegate_store::event_exists(conn, &check_id))
            .await?
        {
            return Err(ApiError::UnknownEvent(event_id));
        }
    }

    let detected = state.engine.analyze(image).await?;

    // The probe is the highest-confidence face in the upload.
    let probe: Embedding = detected
        .into_iter()
        .max_by(|a, b| {
            a.bbox
                .confidence
                .partial_cmp(&b.bbox.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|face| face.embedding)
        .ok_or(ApiError::NoFaceDetected)?;

    let gallery = {
        let event_id = event_id.clone();
        state
            .with_db(move |conn| facegate_store::gallery_for_event(conn, &event_id))
            .await?
    };

    let results = EuclideanMatcher.matches(&probe, &gallery, state.distance_threshold);
    if results.is_empty() {
        return Err(ApiError::NotRegistered);
    }

    tracing::info!(
        event = %event_id,
        matches = results.len(),
        best_distance = results[0].distance,
        "face verified"
    );

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "This face is completely verified",
            "results": results,
        })),
    )
        .into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEvent {
    title: String,
    date: String,
    facility: String,
    description: String,
    created_by: String,
}

/// `POST /events` — create an event to register faces under.
async fn create_event(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateEvent>,
) -> Result<Response, ApiError> {
    let all_present = [
        &body.title,
        &body.date,
        &body.facility,
        &body.description,
        &body.created_by,
    ]
    .iter()
    .all(|v| !v.trim().is_empty());
    if !all_present {
        return Err(ApiError::IncompleteEvent);
    }

    let event = EventRecord {
        id: Uuid::new_v4().to_string(),
        title: body.title,
        date: body.date,
        facility: body.facility,
        description: body.description,
        created_by: body.created_by,
        created_at: Utc::now().to_rfc3339(),
    };

    let stored = event.clone();
    state
        .with_db(move |conn| facegate_store::insert_event(conn, &stored))
        .await?;

    tracing::info!(event = %event.id, title = %event.title, "event created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Event created successfully", "event": event })),
    )
        .into_response())
}

/// `GET /events` — list all events.
async fn list_events(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let events = state
        .with_db(|conn| facegate_store::list_events(conn))
        .await?;
    Ok(Json(events).into_response())
}

/// `GET /events/{id}` — fetch one event.
async fn show_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Response, ApiError> {
    let lookup_id = event_id.clone();
    let event = state
        .with_db(move |conn| facegate_store::get_event(conn, &lookup_id))
        .await?
        .ok_or(ApiError::UnknownEvent(event_id))?;
    Ok(Json(event).into_response())
}

/// `GET /events/{id}/faces` — registration metadata for one event.
async fn event_faces(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Response, ApiError> {
    {
        let check_id = event_id.clone();
        if !state
            .with_db(move |conn| facegate_store::event_exists(conn, &check_id))
            .await?
        {
            return Err(ApiError::UnknownEvent(event_id));
        }
    }

    let faces = state
        .with_db(move |conn| facegate_store::faces_for_event(conn, &event_id))
        .await?;
    Ok(Json(faces).into_response())
}

/// `DELETE /faces/{id}` — remove a registration.
async fn remove_face(
    State(state): State<Arc<AppState>>,
    Path(face_id): Path<String>,
) -> Result<Response, ApiError> {
    let deleted = state
        .with_db(move |conn| facegate_store::delete_face(conn, &face_id))
        .await?;
    if !deleted {
        return Err(ApiError::FaceNotFound);
    }
    Ok(Json(json!({ "message": "Face deleted successfully" })).into_response())
}

/// `GET /health` — liveness, version, and whether the inference engine
/// behind the models is still accepting work.
async fn health(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "modelsLoaded": state.engine.is_alive(),
    }))
    .into_response()
}
