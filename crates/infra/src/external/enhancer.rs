//! Dish photo enhancement.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;

use kitchenline_pipeline::ServiceError;
use kitchenline_pipeline::menu_import::ImageEnhancer;

use super::http::{LazyClient, check_response, transport_error};

/// Used when no enhancement service is configured. Every image is kept as
/// fetched.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledEnhancer;

impl ImageEnhancer for DisabledEnhancer {
    fn enhance(&self, _image: &[u8], _name: &str) -> Result<Vec<u8>, ServiceError> {
        Err(ServiceError::rejected("image enhancement is not configured"))
    }
}

/// Posts the raw image to an enhancement endpoint and expects WebP back.
#[derive(Debug)]
pub struct HttpImageEnhancer {
    endpoint: String,
    client: LazyClient,
}

impl HttpImageEnhancer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: LazyClient::new(Duration::from_secs(60)),
        }
    }
}

fn is_webp(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP"
}

impl ImageEnhancer for HttpImageEnhancer {
    fn enhance(&self, image: &[u8], name: &str) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .client
            .get()?
            .post(&self.endpoint)
            .query(&[("name", name)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .map_err(transport_error)?;
        let bytes = check_response(response, &self.endpoint)?
            .bytes()
            .map_err(transport_error)?;
        if !is_webp(&bytes) {
            return Err(ServiceError::invalid_response(format!(
                "enhancer returned non-WebP data for {name}"
            )));
        }
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webp_signature_check() {
        let mut webp = b"RIFF\x10\x00\x00\x00WEBPVP8 ".to_vec();
        assert!(is_webp(&webp));
        webp[8] = b'X';
        assert!(!is_webp(&webp));
        assert!(!is_webp(b"\xff\xd8\xff"));
    }

    #[test]
    fn disabled_enhancer_always_declines() {
        assert!(DisabledEnhancer.enhance(b"jpeg", "dish_001").is_err());
    }
}
