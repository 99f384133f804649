use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::{
    error::AppError,
    models::chat::{ChatMessage, ChatRequest, GenerateRequest, Generated, ModelStatus},
    services::relay::{compose_messages, trip_context, SYSTEM_PROMPT},
    routes::extract::AppJson,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stream", post(stream))
        .route("/generate", post(generate))
        .route("/status", get(status))
}

/// Relays the model's answer as SSE: `token` events, then one `done` or `error`.
async fn stream(
    State(state): State<AppState>,
    AppJson(request): AppJson<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    request.validate()?;
    let grounding = match request.trip_id {
        Some(trip_id) => {
            let trip = state.trips.get_trip(trip_id).await?;
            let itinerary = state.trips.itinerary(trip_id).await?;
            Some(trip_context(&trip, &itinerary))
        }
        None => None,
    };
    debug!(trip_id = ?request.trip_id, turns = request.messages.len(), "chat stream requested");

    let messages = compose_messages(request.messages, grounding);
    let model_request = state
        .ollama
        .request(messages, request.model, request.keep_alive);
    let events = ReceiverStream::new(state.relay.spawn(model_request)).map(|event| {
        Ok::<_, Infallible>(
            Event::default()
                .event(event.name())
                .data(event.payload().to_string()),
        )
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn generate(
    State(state): State<AppState>,
    AppJson(request): AppJson<GenerateRequest>,
) -> Result<Json<Generated>, AppError> {
    if request.prompt.trim().is_empty() {
        return Err(AppError::validation("prompt must not be empty"));
    }
    let messages = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(request.prompt),
    ];
    let generated = state
        .ollama
        .generate_structured(messages, request.model, request.schema)
        .await?;
    Ok(Json(generated))
}

async fn status(State(state): State<AppState>) -> Json<ModelStatus> {
    Json(state.ollama.status().await)
}
