use std::{fmt::Write as _, pin::Pin, sync::Arc, time::Instant};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{chat::ChatMessage, itinerary::DayPlan, itinerary::Location, trip::Trip},
};

const CHANNEL_CAPACITY: usize = 32;

pub const SYSTEM_PROMPT: &str = "You are WanderPlan, an expert AI travel planning assistant. \
You help users plan trips, create detailed itineraries, discover hidden gems, and get practical travel advice.

When a user asks about a destination, you should:
1. Suggest must-see attractions and hidden gems
2. Recommend local food and restaurants
3. Provide practical tips (weather, transport, safety, costs)
4. Help build day-by-day itineraries
5. Suggest accommodations for different budgets

When creating itineraries, format activities as JSON blocks when explicitly requested, like:
```json
{\"type\": \"itinerary\", \"days\": [{\"day\": 1, \"activities\": [...]}]}
```

Be enthusiastic, specific, and practical. Always tailor advice to the user's interests and travel style.";

pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, AppError>> + Send>>;

/// What a model server produces while answering.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Token(String),
    Done { reason: Option<String> },
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub keep_alive: String,
}

/// A language model that answers a conversation as a stream of fragments.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream_chat(&self, request: ModelRequest) -> Result<ModelStream, AppError>;
}

/// What the relay hands to its consumer. `Done` and `Error` are terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Token(String),
    Done { reason: Option<String> },
    Error { kind: &'static str, message: String },
}

impl RelayEvent {
    fn failed(err: &AppError) -> Self {
        RelayEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::Token(_) => "token",
            RelayEvent::Done { .. } => "done",
            RelayEvent::Error { .. } => "error",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            RelayEvent::Token(text) => json!({ "token": text }),
            RelayEvent::Done { reason } => json!({ "done": true, "done_reason": reason }),
            RelayEvent::Error { kind, message } => json!({ "error": kind, "detail": message }),
        }
    }
}

#[derive(Clone)]
pub struct ChatRelay {
    model: Arc<dyn ChatModel>,
}

impl ChatRelay {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Starts relaying in the background.
    ///
    /// Dropping the receiver stops the producer at its next await and drops the upstream
    /// stream with it.
    pub fn spawn(&self, request: ModelRequest) -> mpsc::Receiver<RelayEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let span = info_span!("chat_relay", stream_id = %Uuid::new_v4(), model = %request.model);
        tokio::spawn(relay(self.model.clone(), request, tx).instrument(span));
        rx
    }
}

async fn relay(model: Arc<dyn ChatModel>, request: ModelRequest, tx: mpsc::Sender<RelayEvent>) {
    let started = Instant::now();
    let opened = tokio::select! {
        biased;
        _ = tx.closed() => {
            debug!("consumer left before the model answered");
            return;
        }
        opened = model.stream_chat(request) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(err) => {
            warn!("could not open model stream: {err}");
            let _ = tx.send(RelayEvent::failed(&err)).await;
            return;
        }
    };

    let mut tokens = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => {
                debug!(tokens, "consumer disconnected, dropping model stream");
                return;
            }
            next = stream.next() => next,
        };
        let event = match next {
            Some(Ok(ModelEvent::Token(text))) => {
                tokens += 1;
                RelayEvent::Token(text)
            }
            Some(Ok(ModelEvent::Done { reason })) => {
                info!(
                    tokens,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "model stream complete"
                );
                let _ = tx.send(RelayEvent::Done { reason }).await;
                return;
            }
            Some(Err(err)) => {
                warn!(tokens, "model stream failed: {err}");
                let _ = tx.send(RelayEvent::failed(&err)).await;
                return;
            }
            None => {
                let err = AppError::upstream("model stream ended without completing");
                warn!(tokens, "{err}");
                let _ = tx.send(RelayEvent::failed(&err)).await;
                return;
            }
        };
        if tx.send(event).await.is_err() {
            debug!(tokens, "consumer disconnected, dropping model stream");
            return;
        }
    }
}

/// System prompt, optional trip grounding, then the caller's turns.
pub fn compose_messages(history: Vec<ChatMessage>, grounding: Option<String>) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));
    if let Some(grounding) = grounding {
        messages.push(ChatMessage::system(grounding));
    }
    messages.extend(history);
    messages
}

pub fn trip_context(trip: &Trip, itinerary: &[DayPlan]) -> String {
    let mut context = format!(
        "The user is planning the trip \"{}\" to {} from {} to {} ({} days).",
        trip.title,
        trip.destination,
        trip.start_date,
        trip.end_date,
        trip.duration_days()
    );
    if let Some(notes) = &trip.notes {
        let _ = write!(context, "\nTrip notes: {notes}");
    }
    if itinerary.is_empty() {
        context.push_str("\nNo itinerary days are planned yet.");
        return context;
    }

    context.push_str("\nCurrent itinerary:");
    for plan in itinerary {
        let _ = write!(context, "\n- {}", plan.day.date);
        if let Some(title) = &plan.day.title {
            let _ = write!(context, " ({title})");
        }
        if plan.activities.is_empty() {
            context.push_str(": nothing planned");
            continue;
        }
        let outline: Vec<String> = plan
            .activities
            .iter()
            .map(|activity| {
                let mut line = format!(
                    "{} {} [{}]",
                    activity.time.format("%H:%M"),
                    activity.title,
                    activity.kind
                );
                if let Some(Location::Text(place)) = &activity.location {
                    let _ = write!(line, " at {place}");
                }
                line
            })
            .collect();
        let _ = write!(context, ": {}", outline.join("; "));
    }
    context
}
