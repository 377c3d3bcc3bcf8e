//! HTTP inference-server classifier.
//!
//! Sends the region of interest as a JPEG body and expects
//! `{"detections": [{"class": 1, "score": 0.9, "box": [top, left, bottom, right], "label": "person"}]}`
//! in return, with boxes normalized to the submitted image.

use std::io::Cursor;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Deserialize;

use crate::detect::backend::{Classifier, ClassifierDisconnected, Prediction};

const JPEG_QUALITY: u8 = 90;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    detections: Vec<RemoteDetection>,
}

#[derive(Debug, Deserialize)]
struct RemoteDetection {
    class: f32,
    score: f32,
    #[serde(rename = "box")]
    bbox: [f32; 4],
    #[serde(default)]
    label: Option<String>,
}

pub struct RemoteClassifier {
    url: String,
    agent: ureq::Agent,
}

impl RemoteClassifier {
    pub fn new(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url).with_context(|| format!("parse classifier url {}", url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("classifier url must be http(s), got {}", url));
        }
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Ok(Self {
            url: url.to_string(),
            agent,
        })
    }

    fn encode(image: &RgbImage) -> Result<Vec<u8>> {
        let mut body = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut body, JPEG_QUALITY)
            .encode_image(image)
            .context("encode classifier input")?;
        Ok(body.into_inner())
    }
}

impl Classifier for RemoteClassifier {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn predict(&self, image: &RgbImage) -> Result<Vec<Prediction>> {
        let body = Self::encode(image)?;
        let response = match self
            .agent
            .post(&self.url)
            .set("Content-Type", "image/jpeg")
            .set("Accept", "application/json")
            .send_bytes(&body)
        {
            Ok(response) => response,
            Err(ureq::Error::Transport(transport))
                if matches!(
                    transport.kind(),
                    ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Dns
                ) =>
            {
                return Err(ClassifierDisconnected::new(self.name(), transport.to_string()).into());
            }
            Err(err) => return Err(anyhow!("classifier request to {} failed: {}", self.url, err)),
        };

        let raw = response
            .into_string()
            .context("read classifier response")?;
        parse_response(&raw)
    }
}

fn parse_response(raw: &str) -> Result<Vec<Prediction>> {
    let parsed: PredictResponse =
        serde_json::from_str(raw).context("invalid classifier response")?;
    Ok(parsed
        .detections
        .into_iter()
        .filter(|detection| detection.class >= 0.0 && detection.class.is_finite())
        .map(|detection| Prediction {
            class_index: detection.class.round() as u32,
            label: detection.label,
            score: detection.score,
            bbox: detection.bbox,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_detections() -> Result<()> {
        let predictions = parse_response(
            r#"{"detections":[{"class":1.0,"score":0.91,"box":[0.1,0.2,0.5,0.6]},
                {"class":18,"score":0.7,"box":[0,0,1,1],"label":"dog"}]}"#,
        )?;
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].class_index, 1);
        assert_eq!(predictions[0].label, None);
        assert_eq!(predictions[1].label.as_deref(), Some("dog"));
        Ok(())
    }

    #[test]
    fn empty_body_object_means_no_detections() -> Result<()> {
        assert!(parse_response("{}")?.is_empty());
        Ok(())
    }

    #[test]
    fn unreachable_server_reports_disconnect() -> Result<()> {
        let classifier = RemoteClassifier::new("http://127.0.0.1:1/predict")?;
        let err = classifier.predict(&RgbImage::new(8, 8)).unwrap_err();
        assert!(err.is::<ClassifierDisconnected>());
        Ok(())
    }
}
