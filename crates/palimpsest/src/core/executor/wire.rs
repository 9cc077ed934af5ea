//! Framed messages between the coordinator and worker processes.
//!
//! Each frame is a big-endian `u32` payload length followed by a MessagePack payload encoded
//! with field names, so optional fields may be omitted. Workers read requests on stdin and write
//! responses on stdout; logging goes to stderr.

use super::{Outcome, PageJob};
use crate::core::config::PipelineConfig;
use crate::types::PageResult;
use crate::{PalimpsestError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Coordinator to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    /// First message; the worker builds its plugins and engines from this configuration.
    Init(Box<PipelineConfig>),
    Work { index: usize, job: Box<PageJob> },
    /// Ask the job in progress to stop at its next checkpoint.
    Cancel,
    Shutdown,
}

/// Worker to coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Ready { pid: u32 },
    Done { index: usize, outcome: Box<Outcome<PageResult>> },
    /// The worker cannot continue, e.g. its configuration was rejected.
    Fatal { message: String },
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = rmp_serde::to_vec_named(message)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| PalimpsestError::serialization(format!("Frame of {} bytes is too large", payload.len())))?;

    writer.write_u32(len).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `None` on a clean end of stream before a frame starts.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(PalimpsestError::serialization(format!(
            "Frame length {} exceeds limit {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(rmp_serde::from_slice(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::types::{CompressionChoice, PageFailure, PageGeometry, PageSource, PageUnit, Rotation, TextLayer};
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_messages_survive_the_pipe() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        let mut result = PageResult::copied(2, CompressionChoice::Jbig2Lossy { threshold: 0.85 });
        result.text_layer = Some(TextLayer {
            content: b"BT ET".to_vec(),
            word_count: 1,
        });
        let job = PageJob {
            unit: PageUnit {
                index: 2,
                source: PageSource::PdfPage {
                    path: PathBuf::from("/in.pdf"),
                    page_number: 3,
                },
                geometry: PageGeometry::new(612.0, 792.0, Rotation::Deg270),
                has_existing_text: true,
                has_existing_ocr_text: false,
                policy: None,
            },
            work_dir: PathBuf::from("/tmp/page-0003"),
        };

        write_frame(&mut client, &Request::Work { index: 2, job: Box::new(job.clone()) }).await.unwrap();
        write_frame(&mut client, &Response::Done { index: 2, outcome: Box::new(Outcome::Completed(result.clone())) })
            .await
            .unwrap();
        write_frame(
            &mut client,
            &Response::Done {
                index: 4,
                outcome: Box::new(Outcome::Failed(PageFailure::new(ErrorClass::Engine, "boom"))),
            },
        )
        .await
        .unwrap();
        drop(client);

        let request: Request = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(request, Request::Work { index: 2, job: Box::new(job) });

        let response: Response = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(response, Response::Done { index: 2, outcome: Box::new(Outcome::Completed(result)) });

        let response: Response = read_frame(&mut server).await.unwrap().unwrap();
        assert!(matches!(response, Response::Done { index: 4, .. }));

        assert!(read_frame::<_, Response>(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(MAX_FRAME_LEN + 1).await.unwrap();
        let err = read_frame::<_, Request>(&mut server).await.unwrap_err();
        assert!(matches!(err, PalimpsestError::Serialization { .. }));
    }
}
