pub mod budget;
pub mod ollama;
pub mod places;
pub mod relay;
pub mod throttle;
pub mod trips;

use url::Url;

use crate::error::AppError;

/// Appends `path` to `base`, keeping any path prefix the base already has.
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, AppError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| AppError::Config(format!("{base} cannot be used as a base url")))?
        .pop_if_empty()
        .extend(path.split('/').filter(|segment| !segment.is_empty()));
    Ok(url)
}
