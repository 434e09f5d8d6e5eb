use axum::http::{header, HeaderValue};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::DescriptorSlot;
use crate::error::Result;
use crate::media::VideoDescriptor;
use crate::sink::ResponseSink;

/// Copies stored bytes to the response unchanged.
#[derive(Debug, Default)]
pub struct Passthrough {
    descriptor: DescriptorSlot,
}

impl Passthrough {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(&self, descriptor: VideoDescriptor) -> Result<()> {
        self.descriptor.set(descriptor)
    }

    pub async fn run(&self, mut chunks: mpsc::Receiver<Bytes>, sink: ResponseSink) -> Result<()> {
        let mut written = 0u64;

        while let Some(chunk) = chunks.recv().await {
            if written == 0 && !sink.is_committed() {
                self.write_headers(&sink)?;
            }
            written += chunk.len() as u64;
            sink.write(chunk).await?;
        }

        debug!(bytes = written, "Passthrough finished");
        Ok(())
    }

    fn write_headers(&self, sink: &ResponseSink) -> Result<()> {
        let descriptor = self.descriptor.get()?;

        if descriptor.mime_type.is_empty() {
            warn!(video_id = %descriptor.id, "Video has no mime type");
        } else {
            match HeaderValue::from_bytes(descriptor.mime_type.as_bytes()) {
                Ok(value) => {
                    sink.set_header(header::CONTENT_TYPE, value);
                }
                Err(_) => warn!(
                    mime_type = %descriptor.mime_type,
                    "Mime type is not a valid header value"
                ),
            }
        }

        // Raw bytes so non-ASCII file names survive; control characters do not
        let disposition = format!("attachment; filename={}", descriptor.file_name);
        match HeaderValue::from_bytes(disposition.as_bytes()) {
            Ok(value) => {
                sink.set_header(header::CONTENT_DISPOSITION, value);
            }
            Err(_) => warn!(
                file_name = %descriptor.file_name,
                "File name cannot be sent in Content-Disposition; header omitted"
            ),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn descriptor(file_name: &str) -> VideoDescriptor {
        VideoDescriptor {
            id: "v1".to_string(),
            total_length: 12,
            mime_type: "video/mp4".to_string(),
            file_name: file_name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_copies_chunks_and_sets_headers_once() {
        let emitter = Passthrough::new();
        emitter.configure(descriptor("a.mp4")).unwrap();

        let (sink, pending) = ResponseSink::channel();
        let (tx, rx) = mpsc::channel(1);

        let feeder = tokio::spawn(async move {
            tx.send(Bytes::from_static(b"abcdef")).await.unwrap();
            tx.send(Bytes::from_static(b"ghijkl")).await.unwrap();
        });
        let runner = tokio::spawn(async move { emitter.run(rx, sink).await });

        let response = pending.into_response().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=a.mp4"
        );
        assert_eq!(response.headers().get_all(header::CONTENT_TYPE).iter().count(), 1);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"abcdefghijkl"));

        feeder.await.unwrap();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unrepresentable_file_name_skips_disposition() {
        let emitter = Passthrough::new();
        emitter.configure(descriptor("bad\nname.ts")).unwrap();

        let (sink, pending) = ResponseSink::channel();
        let (tx, rx) = mpsc::channel(1);

        let runner = tokio::spawn(async move { emitter.run(rx, sink).await });
        tx.send(Bytes::from_static(b"x")).await.unwrap();
        drop(tx);

        let response = pending.into_response().await;
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        assert!(response.headers().get(header::CONTENT_DISPOSITION).is_none());
        runner.await.unwrap().unwrap();
    }
}
