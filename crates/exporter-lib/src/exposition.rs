//! Exposition encoding for the scrape response
//!
//! Content type is negotiated from the request's accept header and the
//! body is optionally gzip-compressed when the client advertises
//! support. The encoders themselves come from the prometheus crate;
//! this module only picks one and wraps the bytes.

use flate2::write::GzEncoder;
use flate2::Compression;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, ProtobufEncoder, TextEncoder};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpositionFormat {
    Text,
    Protobuf,
}

/// Pick the exposition format from an accept header value. Anything
/// that does not explicitly ask for the protobuf delimited format gets
/// the text format.
pub fn negotiate_format(accept: Option<&str>) -> ExpositionFormat {
    match accept {
        Some(value) if value.contains("application/vnd.google.protobuf") => {
            ExpositionFormat::Protobuf
        }
        _ => ExpositionFormat::Text,
    }
}

/// True when an accept-encoding header value lists gzip, either as the
/// exact token or with parameters (`gzip;q=...`).
pub fn gzip_accepted(accept_encoding: Option<&str>) -> bool {
    let Some(value) = accept_encoding else {
        return false;
    };
    value.split(',').any(|part| {
        let part = part.trim();
        part == "gzip" || part.starts_with("gzip;")
    })
}

/// Encode a gathered snapshot, returning the body and its content type.
pub fn encode(
    families: &[MetricFamily],
    format: ExpositionFormat,
) -> Result<(Vec<u8>, String), prometheus::Error> {
    let mut buffer = Vec::new();
    let content_type = match format {
        ExpositionFormat::Text => {
            let encoder = TextEncoder::new();
            encoder.encode(families, &mut buffer)?;
            encoder.format_type().to_string()
        }
        ExpositionFormat::Protobuf => {
            let encoder = ProtobufEncoder::new();
            encoder.encode(families, &mut buffer)?;
            encoder.format_type().to_string()
        }
    };
    Ok((buffer, content_type))
}

pub fn gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{GaugeVec, Opts, Registry};

    fn sample_families() -> Vec<MetricFamily> {
        let registry = Registry::new();
        let gauge = GaugeVec::new(Opts::new("test_metric", "A test metric."), &["name"]).unwrap();
        registry.register(Box::new(gauge.clone())).unwrap();
        gauge.with_label_values(&["web"]).set(42.0);
        registry.gather()
    }

    #[test]
    fn test_negotiate_defaults_to_text() {
        assert_eq!(negotiate_format(None), ExpositionFormat::Text);
        assert_eq!(
            negotiate_format(Some("text/plain;version=0.0.4")),
            ExpositionFormat::Text
        );
    }

    #[test]
    fn test_negotiate_protobuf_when_requested() {
        assert_eq!(
            negotiate_format(Some(
                "application/vnd.google.protobuf;proto=io.prometheus.client.MetricFamily;encoding=delimited"
            )),
            ExpositionFormat::Protobuf
        );
    }

    #[test]
    fn test_gzip_accepted_token_forms() {
        assert!(gzip_accepted(Some("gzip")));
        assert!(gzip_accepted(Some("deflate, gzip")));
        assert!(gzip_accepted(Some("gzip;q=1.0")));
        assert!(gzip_accepted(Some(" gzip ")));
        assert!(!gzip_accepted(Some("deflate")));
        assert!(!gzip_accepted(Some("gzipped")));
        assert!(!gzip_accepted(None));
    }

    #[test]
    fn test_text_encode_contains_metric() {
        let (body, content_type) = encode(&sample_families(), ExpositionFormat::Text).unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("test_metric"));
        assert!(text.contains("42"));
        assert!(content_type.starts_with("text/plain"));
    }

    #[test]
    fn test_gzip_round_trip() {
        let (body, _) = encode(&sample_families(), ExpositionFormat::Text).unwrap();
        let compressed = gzip(&body).unwrap();
        assert_ne!(compressed, body);

        let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
        let mut restored = Vec::new();
        std::io::Read::read_to_end(&mut decoder, &mut restored).unwrap();
        assert_eq!(restored, body);
    }
}
