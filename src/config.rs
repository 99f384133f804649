use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use url::Url;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub static_dir: PathBuf,
    pub cors_origins: Vec<String>,
    pub ollama: OllamaConfig,
    pub places: PlacesConfig,
    pub geocode_on_create: bool,
}

/// Where the local model server lives and how requests to it are shaped.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: Url,
    pub model: String,
    pub keep_alive: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PlacesConfig {
    pub nominatim_url: Url,
    pub overpass_url: Url,
    pub user_agent: String,
    pub geocode_interval: Duration,
    pub geocode_queue_bound: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("http://localhost:11434").expect("static url"),
            model: "llama3".into(),
            keep_alive: "5m".into(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl Default for PlacesConfig {
    fn default() -> Self {
        Self {
            nominatim_url: Url::parse("https://nominatim.openstreetmap.org").expect("static url"),
            overpass_url: Url::parse("https://overpass-api.de/api/interpreter")
                .expect("static url"),
            user_agent: "WanderPlan/1.0 (open-source travel planner)".into(),
            geocode_interval: Duration::from_millis(1000),
            geocode_queue_bound: 8,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://wanderplan.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let static_dir = env::var("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("static"));

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173,http://localhost:3000".to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        let ollama_defaults = OllamaConfig::default();
        let ollama = OllamaConfig {
            base_url: url_var("OLLAMA_BASE_URL", ollama_defaults.base_url)?,
            model: env::var("OLLAMA_MODEL").unwrap_or(ollama_defaults.model),
            keep_alive: env::var("OLLAMA_KEEP_ALIVE").unwrap_or(ollama_defaults.keep_alive),
            timeout: Duration::from_secs(parsed_var(
                "OLLAMA_TIMEOUT_SECS",
                ollama_defaults.timeout.as_secs(),
            )?),
        };

        let places_defaults = PlacesConfig::default();
        let geocode_queue_bound = parsed_var("GEOCODE_QUEUE_BOUND", places_defaults.geocode_queue_bound)?;
        if geocode_queue_bound == 0 {
            return Err(AppError::Config(
                "GEOCODE_QUEUE_BOUND must be at least 1".into(),
            ));
        }
        let places = PlacesConfig {
            nominatim_url: url_var("NOMINATIM_URL", places_defaults.nominatim_url)?,
            overpass_url: url_var("OVERPASS_URL", places_defaults.overpass_url)?,
            user_agent: env::var("PLACES_USER_AGENT").unwrap_or(places_defaults.user_agent),
            geocode_interval: Duration::from_millis(parsed_var(
                "GEOCODE_INTERVAL_MS",
                places_defaults.geocode_interval.as_millis() as u64,
            )?),
            geocode_queue_bound,
        };

        let geocode_on_create = parsed_var("GEOCODE_ON_CREATE", true)?;

        Ok(Self {
            database_url,
            listen_addr,
            static_dir,
            cors_origins,
            ollama,
            places,
            geocode_on_create,
        })
    }
}

fn url_var(name: &str, default: Url) -> Result<Url, AppError> {
    match env::var(name) {
        Ok(raw) => {
            Url::parse(&raw).map_err(|err| AppError::Config(format!("invalid {name}: {err}")))
        }
        Err(_) => Ok(default),
    }
}

fn parsed_var<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|err| AppError::Config(format!("invalid {name}: {err}"))),
        Err(_) => Ok(default),
    }
}
