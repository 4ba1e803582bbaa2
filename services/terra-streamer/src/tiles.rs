use async_trait::async_trait;
use image::ImageFormat;
use reqwest::StatusCode;
use std::collections::HashMap;
use terra_config::LoaderConfig;
use terra_core::{FetchError, FetchOutcome, Layer, LayerSet, TileId};
use terra_scheduler::TileLoader;

const USER_AGENT: &str = concat!("terra-streamer/", env!("CARGO_PKG_VERSION"));

/// Fetches layer bytes from `{z}/{x}/{y}` URL templates, one per layer.
pub struct HttpTileLoader {
    client: reqwest::Client,
    templates: HashMap<Layer, String>,
}

impl HttpTileLoader {
    pub fn new(config: &LoaderConfig, layers: LayerSet) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.fetch_timeout())
            .build()?;
        let templates = layers
            .iter()
            .map(|layer| (layer, config.url_template(layer).to_string()))
            .collect();
        Ok(Self { client, templates })
    }
}

#[async_trait]
impl TileLoader for HttpTileLoader {
    async fn fetch(&self, tile: TileId, layer: Layer) -> FetchOutcome {
        let Some(template) = self.templates.get(&layer) else {
            return Err(FetchError::NotFound);
        };
        let url = tile_url(template, tile);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| FetchError::Transient(err.to_string()))?;
        check_status(response.status())?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| FetchError::Transient(err.to_string()))?;
        check_payload(layer, &bytes)?;
        Ok(bytes.to_vec())
    }
}

pub fn tile_url(template: &str, tile: TileId) -> String {
    template
        .replace("{z}", &tile.zoom.to_string())
        .replace("{x}", &tile.x.to_string())
        .replace("{y}", &tile.y.to_string())
}

fn check_status(status: StatusCode) -> Result<(), FetchError> {
    if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
        return Err(FetchError::NotFound);
    }
    if status.is_success() {
        return Ok(());
    }
    Err(FetchError::Transient(format!("upstream returned {status}")))
}

fn check_payload(layer: Layer, bytes: &[u8]) -> Result<(), FetchError> {
    if bytes.is_empty() {
        return Err(FetchError::Malformed("empty body".to_string()));
    }
    match layer {
        Layer::Vector => Ok(()),
        Layer::Height | Layer::Ortho => match image::guess_format(bytes) {
            Ok(ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP) => Ok(()),
            Ok(other) => Err(FetchError::Malformed(format!("unexpected {other:?} image"))),
            Err(_) => Err(FetchError::Malformed(
                "unrecognised image signature".to_string(),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 16, b'J', b'F', b'I', b'F'];

    #[test]
    fn url_template_is_expanded() {
        let url = tile_url(
            "https://tiles.example/{z}/{x}/{y}.png",
            TileId::new(12, 2200, 1420),
        );
        assert_eq!(url, "https://tiles.example/12/2200/1420.png");
    }

    #[test]
    fn statuses_map_to_fetch_errors() {
        assert_eq!(check_status(StatusCode::OK), Ok(()));
        assert_eq!(check_status(StatusCode::NOT_FOUND), Err(FetchError::NotFound));
        assert_eq!(check_status(StatusCode::NO_CONTENT), Err(FetchError::NotFound));
        assert!(matches!(
            check_status(StatusCode::SERVICE_UNAVAILABLE),
            Err(FetchError::Transient(_))
        ));
        assert!(matches!(
            check_status(StatusCode::TOO_MANY_REQUESTS),
            Err(FetchError::Transient(_))
        ));
    }

    #[test]
    fn image_layers_need_a_known_signature() {
        assert_eq!(check_payload(Layer::Height, PNG_MAGIC), Ok(()));
        assert_eq!(check_payload(Layer::Ortho, JPEG_MAGIC), Ok(()));
        assert!(matches!(
            check_payload(Layer::Ortho, b"<html>rate limited</html>"),
            Err(FetchError::Malformed(_))
        ));
        assert!(matches!(
            check_payload(Layer::Height, &[]),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn vector_layer_accepts_any_non_empty_body() {
        assert_eq!(check_payload(Layer::Vector, b"{\"features\":[]}"), Ok(()));
        assert!(check_payload(Layer::Vector, &[]).is_err());
    }
}
