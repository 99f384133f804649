use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    error::AppError,
    services::{
        budget::BudgetStore, ollama::OllamaClient, places::PlacesClient, relay::ChatRelay,
        trips::TripStore,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub trips: TripStore,
    pub budget: BudgetStore,
    pub places: PlacesClient,
    pub ollama: OllamaClient,
    pub relay: ChatRelay,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool) -> Result<Self, AppError> {
        let ollama = OllamaClient::new(&config.ollama)?;
        let places = PlacesClient::new(&config.places)?;
        let relay = ChatRelay::new(Arc::new(ollama.clone()));
        Ok(Self {
            trips: TripStore::new(db.clone()),
            budget: BudgetStore::new(db.clone()),
            places,
            ollama,
            relay,
            config,
            db,
        })
    }
}
